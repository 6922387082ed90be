use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::dsl::exists;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::{AsyncPgConnection, AsyncConnection, RunQueryDsl};
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, bb8::PooledConnection};
use diesel_async::scoped_futures::ScopedFutureExt;
use thiserror::Error;
use crate::db::Pool;
use crate::models::{ActiveContainer, Challenge, ChallengeId, Entrant, NewAttempt, NewRegistration, NewTeam, Profile, SolvedRecord, Solver, Team, TeamId, Tournament, TournamentId, UserId};
use crate::schema::{active_containers, attempts, challenges, profiles, solved_records, team_members, teams, tournament_registrations, tournaments};
use crate::scoring::{self, Ledger, PlanError, SolveSnapshot};
use super::{CommitOutcome, Store, StoreError};

pub struct PgStore {
	pool: Pool
}

#[derive(Debug, Error)]
enum TxError {
	#[error(transparent)]
	Database(#[from] DieselError),
	#[error("{0}")]
	Rejected(String)
}

impl From<TxError> for StoreError {
	fn from(e: TxError) -> Self {
		match e {
			TxError::Database(e) => e.into(),
			TxError::Rejected(reason) => Self::Inconsistent(reason)
		}
	}
}

fn retryable(e: &DieselError) -> bool {
	matches!(e, DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure | DatabaseErrorKind::UniqueViolation, _))
}

/// names the violated unique constraint instead of the generic "record"
fn conflict(e: DieselError, what: &'static str) -> StoreError {
	match e {
		DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => StoreError::Conflict(what),
		e => e.into()
	}
}

impl PgStore {
	pub async fn connect(url: &str) -> Result<Self, StoreError> {
		let pool = Pool::builder().build(
			AsyncDieselConnectionManager::<AsyncPgConnection>::new(url)
		).await.map_err(|e| StoreError::Pool(e.to_string()))?;

		Ok(Self { pool })
	}

	async fn conn(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, StoreError> {
		self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))
	}

	async fn user_solved(conn: &mut AsyncPgConnection, user: UserId, challenge: ChallengeId) -> Result<bool, DieselError> {
		diesel::select(exists(
			solved_records::table.find((user, challenge))
		)).get_result(conn).await
	}

	async fn team_solved(conn: &mut AsyncPgConnection, team: TeamId, challenge: ChallengeId) -> Result<bool, DieselError> {
		let members = team_members::table.filter(team_members::team_id.eq(team)).select(team_members::user_id);

		diesel::select(exists(
			solved_records::table
				.filter(solved_records::challenge_id.eq(challenge))
				.filter(solved_records::user_id.eq_any(members))
		)).get_result(conn).await
	}

	async fn credit_registration(conn: &mut AsyncPgConnection, tournament: TournamentId, entrant: Entrant, points: i32) -> Result<usize, DieselError> {
		use tournament_registrations::dsl;

		let registrations = dsl::tournament_registrations.filter(dsl::tournament_id.eq(tournament));
		match entrant {
			Entrant::User(user) => diesel::update(registrations.filter(dsl::user_id.eq(user)))
				.set(dsl::score.eq(dsl::score + points))
				.execute(conn).await,
			Entrant::Team(team) => diesel::update(registrations.filter(dsl::team_id.eq(team)))
				.set(dsl::score.eq(dsl::score + points))
				.execute(conn).await
		}
	}

	/// one serializable attempt at a commit, the challenge row lock orders concurrent solvers
	async fn commit_once(conn: &mut AsyncPgConnection, challenge: ChallengeId, solver: Solver, now: DateTime<Utc>) -> Result<CommitOutcome, TxError> {
		conn.build_transaction().serializable().run(move |conn| async move {
			let challenge: Challenge = challenges::table.find(challenge)
				.select(Challenge::as_select())
				.for_update()
				.get_result(conn).await?;

			let tournament: Option<Tournament> = match challenge.tournament_id {
				Some(id) => Some(tournaments::table.find(id).select(Tournament::as_select()).first(conn).await?),
				None => None
			};

			let solved_by_team = match solver.team_id {
				Some(team) => Self::team_solved(conn, team, challenge.id).await?,
				None => false
			};

			let snapshot = SolveSnapshot {
				challenge: &challenge,
				tournament: tournament.as_ref(),
				solved_by_user: Self::user_solved(conn, solver.user_id, challenge.id).await?,
				solved_by_team,
				solved_by_anyone: diesel::select(exists(
					solved_records::table.filter(solved_records::challenge_id.eq(challenge.id))
				)).get_result(conn).await?
			};

			let award = match scoring::plan(&snapshot, &solver, now) {
				Ok(award) => award,
				Err(PlanError::AlreadySolved) => return Ok(CommitOutcome::AlreadySolved),
				Err(e) => return Err(TxError::Rejected(e.to_string()))
			};

			let mut profile: Profile = profiles::table.find(solver.user_id)
				.select(Profile::as_select())
				.for_update()
				.get_result(conn).await
				.optional()?
				.ok_or_else(|| TxError::Rejected(format!("user {} has no profile", solver.user_id)))?;

			diesel::insert_into(solved_records::table).values(SolvedRecord {
				user_id: solver.user_id,
				challenge_id: award.challenge_id,
				points_awarded: award.points,
				solved_at: now
			}).execute(conn).await?;

			if let Ledger::Tournament { tournament_id, entrant } = award.ledger {
				if Self::credit_registration(conn, tournament_id, entrant, award.points).await? == 0 {
					return Err(TxError::Rejected(format!("{entrant:?} is not registered for tournament {tournament_id}")));
				}
			}

			profile.credit(award.points, now);
			diesel::update(profiles::table.find(solver.user_id))
				.set((profiles::total_points.eq(profile.total_points), profiles::last_solved.eq(profile.last_solved)))
				.execute(conn).await?;

			Ok(CommitOutcome::Credited(award))
		}.scope_boxed()).await
	}
}

impl Store for PgStore {
	async fn challenge(&self, id: ChallengeId) -> Result<Option<Challenge>, StoreError> {
		let mut conn = self.conn().await?;

		Ok(challenges::table.find(id).select(Challenge::as_select()).first(&mut conn).await.optional()?)
	}

	async fn active_challenges(&self) -> Result<Vec<Challenge>, StoreError> {
		let mut conn = self.conn().await?;

		Ok(challenges::table
			.filter(challenges::is_active.eq(true))
			.order(challenges::id)
			.select(Challenge::as_select())
			.load(&mut conn).await?)
	}

	async fn tournament(&self, id: TournamentId) -> Result<Option<Tournament>, StoreError> {
		let mut conn = self.conn().await?;

		Ok(tournaments::table.find(id).select(Tournament::as_select()).first(&mut conn).await.optional()?)
	}

	async fn tournaments(&self) -> Result<Vec<Tournament>, StoreError> {
		let mut conn = self.conn().await?;

		Ok(tournaments::table.order(tournaments::start_date.desc()).select(Tournament::as_select()).load(&mut conn).await?)
	}

	async fn team_of(&self, user: UserId) -> Result<Option<Team>, StoreError> {
		let mut conn = self.conn().await?;

		Ok(teams::table
			.inner_join(team_members::table)
			.filter(team_members::user_id.eq(user))
			.select(Team::as_select())
			.first(&mut conn).await
			.optional()?)
	}

	async fn create_team(&self, team: NewTeam) -> Result<Team, StoreError> {
		let mut conn = self.conn().await?;

		conn.transaction(|conn| async move {
			let created: Team = diesel::insert_into(teams::table)
				.values(&team)
				.returning(Team::as_returning())
				.get_result(conn).await?;

			diesel::insert_into(team_members::table)
				.values((team_members::user_id.eq(created.captain_id), team_members::team_id.eq(created.id)))
				.execute(conn).await?;

			Ok(created)
		}.scope_boxed()).await.map_err(|e: DieselError| {
			let constraint = match &e {
				DieselError::DatabaseError(_, info) => info.constraint_name().map(String::from),
				_ => None
			};

			match constraint.as_deref() {
				Some("teams_name_key") => conflict(e, "team name"),
				Some("teams_invite_token_key") => conflict(e, "invite token"),
				_ => conflict(e, "team membership")
			}
		})
	}

	async fn join_team(&self, invite_token: &str, user: UserId) -> Result<Team, StoreError> {
		let mut conn = self.conn().await?;

		let team: Team = teams::table
			.filter(teams::invite_token.eq(invite_token))
			.select(Team::as_select())
			.first(&mut conn).await?;

		diesel::insert_into(team_members::table)
			.values((team_members::user_id.eq(user), team_members::team_id.eq(team.id)))
			.execute(&mut conn).await
			.map_err(|e| conflict(e, "team membership"))?;

		Ok(team)
	}

	async fn remove_member(&self, team: TeamId, user: UserId) -> Result<(), StoreError> {
		let mut conn = self.conn().await?;

		let removed = diesel::delete(
			team_members::table.filter(team_members::user_id.eq(user)).filter(team_members::team_id.eq(team))
		).execute(&mut conn).await?;

		match removed {
			0 => Err(StoreError::NotFound),
			_ => Ok(())
		}
	}

	async fn is_registered(&self, tournament: TournamentId, entrant: Entrant) -> Result<bool, StoreError> {
		Ok(self.registration_score(tournament, entrant).await?.is_some())
	}

	async fn register(&self, tournament: TournamentId, entrant: Entrant) -> Result<(), StoreError> {
		let mut conn = self.conn().await?;

		let result = diesel::insert_into(tournament_registrations::table)
			.values(NewRegistration::new(tournament, entrant))
			.on_conflict_do_nothing()
			.execute(&mut conn).await;

		match result {
			Ok(_) => Ok(()),
			Err(DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _)) => Err(StoreError::NotFound),
			Err(e) => Err(e.into())
		}
	}

	async fn registration_score(&self, tournament: TournamentId, entrant: Entrant) -> Result<Option<i32>, StoreError> {
		use tournament_registrations::dsl;

		let mut conn = self.conn().await?;

		let registrations = dsl::tournament_registrations.filter(dsl::tournament_id.eq(tournament)).select(dsl::score);
		let score = match entrant {
			Entrant::User(user) => registrations.filter(dsl::user_id.eq(user)).first(&mut conn).await,
			Entrant::Team(team) => registrations.filter(dsl::team_id.eq(team)).first(&mut conn).await
		};

		Ok(score.optional()?)
	}

	async fn is_solved(&self, challenge: ChallengeId, solver: Solver, team_scoped: bool) -> Result<bool, StoreError> {
		let mut conn = self.conn().await?;

		if Self::user_solved(&mut conn, solver.user_id, challenge).await? {
			return Ok(true);
		}

		match (team_scoped, solver.team_id) {
			(true, Some(team)) => Ok(Self::team_solved(&mut conn, team, challenge).await?),
			_ => Ok(false)
		}
	}

	async fn solved_challenges(&self, user: UserId) -> Result<Vec<(SolvedRecord, String)>, StoreError> {
		let mut conn = self.conn().await?;

		Ok(solved_records::table
			.inner_join(challenges::table)
			.filter(solved_records::user_id.eq(user))
			.order(solved_records::solved_at.desc())
			.select((SolvedRecord::as_select(), challenges::title))
			.load(&mut conn).await?)
	}

	async fn attempted_challenges(&self, user: UserId) -> Result<Vec<ChallengeId>, StoreError> {
		let mut conn = self.conn().await?;

		Ok(attempts::table
			.filter(attempts::user_id.eq(user))
			.select(attempts::challenge_id)
			.distinct()
			.order(attempts::challenge_id)
			.load(&mut conn).await?)
	}

	async fn recent_failures(&self, user: UserId, challenge: ChallengeId, since: DateTime<Utc>) -> Result<usize, StoreError> {
		let mut conn = self.conn().await?;

		let count: i64 = attempts::table
			.filter(attempts::user_id.eq(user))
			.filter(attempts::challenge_id.eq(challenge))
			.filter(attempts::is_correct.eq(false))
			.filter(attempts::created_at.ge(since))
			.count()
			.get_result(&mut conn).await?;

		Ok(count as usize)
	}

	async fn log_attempt(&self, attempt: NewAttempt) -> Result<(), StoreError> {
		let mut conn = self.conn().await?;

		diesel::insert_into(attempts::table).values(attempt).execute(&mut conn).await?;
		Ok(())
	}

	async fn commit_solve(&self, challenge: ChallengeId, solver: Solver, now: DateTime<Utc>) -> Result<CommitOutcome, StoreError> {
		let mut conn = self.conn().await?;
		let mut retried = false;

		loop {
			match Self::commit_once(&mut conn, challenge, solver, now).await {
				// the loser of a concurrent first solve sees the winner on its second pass
				Err(TxError::Database(e)) if !retried && retryable(&e) => {
					log::warn!("retrying solve of challenge {challenge} by user {}: {e}", solver.user_id);
					retried = true;
				},
				result => return result.map_err(StoreError::from)
			}
		}
	}

	async fn revoke_solve(&self, user: UserId, challenge: ChallengeId) -> Result<Option<i32>, StoreError> {
		let mut conn = self.conn().await?;

		Ok(conn.transaction(|conn| async move {
			let removed: Option<i32> = diesel::delete(solved_records::table.find((user, challenge)))
				.returning(solved_records::points_awarded)
				.get_result(conn).await
				.optional()?;

			if let Some(points) = removed {
				let profile: Option<Profile> = profiles::table.find(user)
					.select(Profile::as_select())
					.for_update()
					.get_result(conn).await
					.optional()?;

				if let Some(mut profile) = profile {
					profile.deduct(points);
					diesel::update(profiles::table.find(user))
						.set(profiles::total_points.eq(profile.total_points))
						.execute(conn).await?;
				}
			}

			Ok::<_, DieselError>(removed)
		}.scope_boxed()).await?)
	}

	async fn ensure_profile(&self, user: UserId) -> Result<Profile, StoreError> {
		let mut conn = self.conn().await?;

		diesel::insert_into(profiles::table)
			.values(Profile::new(user))
			.on_conflict_do_nothing()
			.execute(&mut conn).await?;

		Ok(profiles::table.find(user).select(Profile::as_select()).first(&mut conn).await?)
	}

	async fn profile(&self, user: UserId) -> Result<Option<Profile>, StoreError> {
		let mut conn = self.conn().await?;

		Ok(profiles::table.find(user).select(Profile::as_select()).first(&mut conn).await.optional()?)
	}

	async fn leaderboard(&self, limit: usize) -> Result<Vec<Profile>, StoreError> {
		let mut conn = self.conn().await?;

		Ok(profiles::table
			.order((profiles::total_points.desc(), profiles::last_solved.asc().nulls_last()))
			.limit(limit as i64)
			.select(Profile::as_select())
			.load(&mut conn).await?)
	}

	async fn players_ahead(&self, points: i32) -> Result<usize, StoreError> {
		let mut conn = self.conn().await?;

		let count: i64 = profiles::table.filter(profiles::total_points.gt(points)).count().get_result(&mut conn).await?;
		Ok(count as usize)
	}

	async fn active_container(&self, user: UserId) -> Result<Option<ActiveContainer>, StoreError> {
		let mut conn = self.conn().await?;

		Ok(active_containers::table.find(user).select(ActiveContainer::as_select()).first(&mut conn).await.optional()?)
	}

	async fn insert_container(&self, container: ActiveContainer) -> Result<(), StoreError> {
		let mut conn = self.conn().await?;

		diesel::insert_into(active_containers::table)
			.values(container)
			.execute(&mut conn).await
			.map_err(|e| conflict(e, "active container"))?;

		Ok(())
	}

	async fn delete_container(&self, user: UserId, challenge: ChallengeId) -> Result<(), StoreError> {
		let mut conn = self.conn().await?;

		diesel::delete(
			active_containers::table.filter(active_containers::user_id.eq(user)).filter(active_containers::challenge_id.eq(challenge))
		).execute(&mut conn).await?;

		Ok(())
	}
}
