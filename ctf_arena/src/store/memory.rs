use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use chrono::{DateTime, Utc};
use crate::models::{ActiveContainer, AttemptRecord, Challenge, ChallengeId, Entrant, NewAttempt, NewRegistration, NewTeam, Profile, Registration, SolvedRecord, Solver, Team, TeamId, Tournament, TournamentId, UserId};
use crate::scoring::{self, Ledger, PlanError, SolveSnapshot};
use super::{CommitOutcome, Store, StoreError, leaderboard_order};

/// Single-process store used by tests and local development.
///
/// One mutex guards everything, so every method is trivially serializable.
#[derive(Default)]
pub struct MemoryStore {
	inner: Mutex<Inner>
}

#[derive(Default)]
struct Inner {
	challenges: BTreeMap<ChallengeId, Challenge>,
	tournaments: BTreeMap<TournamentId, Tournament>,
	solved: Vec<SolvedRecord>,
	attempts: Vec<AttemptRecord>,
	profiles: HashMap<UserId, Profile>,
	registrations: Vec<Registration>,
	teams: BTreeMap<TeamId, Team>,
	members: HashMap<UserId, TeamId>,
	containers: HashMap<UserId, ActiveContainer>,
	last_id: i64
}

impl Inner {
	fn next_id(&mut self) -> i64 {
		self.last_id += 1;
		self.last_id
	}

	fn has_solved(&self, user: UserId, challenge: ChallengeId) -> bool {
		self.solved.iter().any(|s| s.user_id == user && s.challenge_id == challenge)
	}

	fn team_solved(&self, team: TeamId, challenge: ChallengeId) -> bool {
		self.solved.iter().any(|s| s.challenge_id == challenge && self.members.get(&s.user_id) == Some(&team))
	}

	fn registration_index(&self, tournament: TournamentId, entrant: Entrant) -> Option<usize> {
		self.registrations.iter().position(|r| r.tournament_id == tournament && r.entrant() == Some(entrant))
	}
}

impl MemoryStore {
	fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
		self.inner.lock().map_err(|_| StoreError::Inconsistent(String::from("memory store lock poisoned")))
	}

	pub fn insert_challenge(&self, challenge: Challenge) -> Result<(), StoreError> {
		self.lock()?.challenges.insert(challenge.id, challenge);
		Ok(())
	}

	pub fn insert_tournament(&self, tournament: Tournament) -> Result<(), StoreError> {
		self.lock()?.tournaments.insert(tournament.id, tournament);
		Ok(())
	}

	pub fn solve_count(&self, challenge: ChallengeId) -> Result<usize, StoreError> {
		Ok(self.lock()?.solved.iter().filter(|s| s.challenge_id == challenge).count())
	}

	pub fn attempt_count(&self, user: UserId, challenge: ChallengeId) -> Result<usize, StoreError> {
		Ok(self.lock()?.attempts.iter().filter(|a| a.user_id == user && a.challenge_id == challenge).count())
	}

	pub fn container_count(&self) -> Result<usize, StoreError> {
		Ok(self.lock()?.containers.len())
	}
}

impl Store for MemoryStore {
	async fn challenge(&self, id: ChallengeId) -> Result<Option<Challenge>, StoreError> {
		Ok(self.lock()?.challenges.get(&id).cloned())
	}

	async fn active_challenges(&self) -> Result<Vec<Challenge>, StoreError> {
		Ok(self.lock()?.challenges.values().filter(|c| c.is_active).cloned().collect())
	}

	async fn tournament(&self, id: TournamentId) -> Result<Option<Tournament>, StoreError> {
		Ok(self.lock()?.tournaments.get(&id).cloned())
	}

	async fn tournaments(&self) -> Result<Vec<Tournament>, StoreError> {
		Ok(self.lock()?.tournaments.values().cloned().collect())
	}

	async fn team_of(&self, user: UserId) -> Result<Option<Team>, StoreError> {
		let inner = self.lock()?;
		Ok(inner.members.get(&user).and_then(|t| inner.teams.get(t)).cloned())
	}

	async fn create_team(&self, team: NewTeam) -> Result<Team, StoreError> {
		let mut inner = self.lock()?;

		if inner.members.contains_key(&team.captain_id) {
			return Err(StoreError::Conflict("team membership"));
		}
		if inner.teams.values().any(|t| t.name == team.name) {
			return Err(StoreError::Conflict("team name"));
		}
		if inner.teams.values().any(|t| t.invite_token == team.invite_token) {
			return Err(StoreError::Conflict("invite token"));
		}

		let id = inner.next_id() as TeamId;
		let team = Team {
			id,
			name: team.name,
			captain_id: team.captain_id,
			invite_token: team.invite_token
		};

		inner.members.insert(team.captain_id, id);
		inner.teams.insert(id, team.clone());
		Ok(team)
	}

	async fn join_team(&self, invite_token: &str, user: UserId) -> Result<Team, StoreError> {
		let mut inner = self.lock()?;

		let team = inner.teams.values().find(|t| t.invite_token == invite_token).cloned().ok_or(StoreError::NotFound)?;
		if inner.members.contains_key(&user) {
			return Err(StoreError::Conflict("team membership"));
		}

		inner.members.insert(user, team.id);
		Ok(team)
	}

	async fn remove_member(&self, team: TeamId, user: UserId) -> Result<(), StoreError> {
		let mut inner = self.lock()?;

		match inner.members.get(&user) {
			Some(t) if *t == team => {
				inner.members.remove(&user);
				Ok(())
			},
			_ => Err(StoreError::NotFound)
		}
	}

	async fn is_registered(&self, tournament: TournamentId, entrant: Entrant) -> Result<bool, StoreError> {
		Ok(self.lock()?.registration_index(tournament, entrant).is_some())
	}

	async fn register(&self, tournament: TournamentId, entrant: Entrant) -> Result<(), StoreError> {
		let mut inner = self.lock()?;

		if !inner.tournaments.contains_key(&tournament) {
			return Err(StoreError::NotFound);
		}

		if inner.registration_index(tournament, entrant).is_none() {
			let new = NewRegistration::new(tournament, entrant);
			let id = inner.next_id() as i32;
			inner.registrations.push(Registration {
				id,
				tournament_id: new.tournament_id,
				user_id: new.user_id,
				team_id: new.team_id,
				score: new.score
			});
		}

		Ok(())
	}

	async fn registration_score(&self, tournament: TournamentId, entrant: Entrant) -> Result<Option<i32>, StoreError> {
		let inner = self.lock()?;
		Ok(inner.registration_index(tournament, entrant).map(|i| inner.registrations[i].score))
	}

	async fn is_solved(&self, challenge: ChallengeId, solver: Solver, team_scoped: bool) -> Result<bool, StoreError> {
		let inner = self.lock()?;

		let by_team = match (team_scoped, solver.team_id) {
			(true, Some(team)) => inner.team_solved(team, challenge),
			_ => false
		};

		Ok(by_team || inner.has_solved(solver.user_id, challenge))
	}

	async fn solved_challenges(&self, user: UserId) -> Result<Vec<(SolvedRecord, String)>, StoreError> {
		let inner = self.lock()?;

		let mut solved: Vec<(SolvedRecord, String)> = inner.solved.iter().filter(|s| s.user_id == user).map(|s| {
			let title = inner.challenges.get(&s.challenge_id).map(|c| c.title.clone()).unwrap_or_default();
			(s.clone(), title)
		}).collect();
		solved.sort_by(|(a, _), (b, _)| b.solved_at.cmp(&a.solved_at));

		Ok(solved)
	}

	async fn attempted_challenges(&self, user: UserId) -> Result<Vec<ChallengeId>, StoreError> {
		let inner = self.lock()?;

		let mut ids: Vec<ChallengeId> = inner.attempts.iter().filter(|a| a.user_id == user).map(|a| a.challenge_id).collect();
		ids.sort_unstable();
		ids.dedup();

		Ok(ids)
	}

	async fn recent_failures(&self, user: UserId, challenge: ChallengeId, since: DateTime<Utc>) -> Result<usize, StoreError> {
		Ok(self.lock()?.attempts.iter().filter(|a| {
			a.user_id == user && a.challenge_id == challenge && !a.is_correct && a.created_at >= since
		}).count())
	}

	async fn log_attempt(&self, attempt: NewAttempt) -> Result<(), StoreError> {
		let mut inner = self.lock()?;

		let id = inner.next_id();
		inner.attempts.push(AttemptRecord {
			id,
			user_id: attempt.user_id,
			challenge_id: attempt.challenge_id,
			submitted: attempt.submitted,
			is_correct: attempt.is_correct,
			created_at: attempt.created_at
		});

		Ok(())
	}

	async fn commit_solve(&self, challenge: ChallengeId, solver: Solver, now: DateTime<Utc>) -> Result<CommitOutcome, StoreError> {
		let mut guard = self.lock()?;
		let inner = &mut *guard;

		let challenge = inner.challenges.get(&challenge).ok_or(StoreError::NotFound)?;
		let tournament = match challenge.tournament_id {
			Some(id) => Some(inner.tournaments.get(&id).ok_or(StoreError::NotFound)?),
			None => None
		};

		let snapshot = SolveSnapshot {
			challenge,
			tournament,
			solved_by_user: inner.has_solved(solver.user_id, challenge.id),
			solved_by_team: solver.team_id.is_some_and(|t| inner.team_solved(t, challenge.id)),
			solved_by_anyone: inner.solved.iter().any(|s| s.challenge_id == challenge.id)
		};

		let award = match scoring::plan(&snapshot, &solver, now) {
			Ok(award) => award,
			Err(PlanError::AlreadySolved) => return Ok(CommitOutcome::AlreadySolved),
			Err(e) => return Err(StoreError::Inconsistent(e.to_string()))
		};

		// everything that can fail is checked before the first write
		if !inner.profiles.contains_key(&solver.user_id) {
			return Err(StoreError::Inconsistent(format!("user {} has no profile", solver.user_id)));
		}
		let registration = match award.ledger {
			Ledger::Global => None,
			Ledger::Tournament { tournament_id, entrant } => Some(inner.registration_index(tournament_id, entrant).ok_or_else(|| {
				StoreError::Inconsistent(format!("{entrant:?} is not registered for tournament {tournament_id}"))
			})?)
		};

		inner.solved.push(SolvedRecord {
			user_id: solver.user_id,
			challenge_id: award.challenge_id,
			points_awarded: award.points,
			solved_at: now
		});

		if let Some(i) = registration {
			let reg = &mut inner.registrations[i];
			reg.score = reg.score.saturating_add(award.points);
		}

		if let Some(profile) = inner.profiles.get_mut(&solver.user_id) {
			profile.credit(award.points, now);
		}

		Ok(CommitOutcome::Credited(award))
	}

	async fn revoke_solve(&self, user: UserId, challenge: ChallengeId) -> Result<Option<i32>, StoreError> {
		let mut inner = self.lock()?;

		let Some(i) = inner.solved.iter().position(|s| s.user_id == user && s.challenge_id == challenge) else {
			return Ok(None);
		};

		let record = inner.solved.remove(i);
		if let Some(profile) = inner.profiles.get_mut(&user) {
			profile.deduct(record.points_awarded);
		}

		Ok(Some(record.points_awarded))
	}

	async fn ensure_profile(&self, user: UserId) -> Result<Profile, StoreError> {
		Ok(self.lock()?.profiles.entry(user).or_insert_with(|| Profile::new(user)).clone())
	}

	async fn profile(&self, user: UserId) -> Result<Option<Profile>, StoreError> {
		Ok(self.lock()?.profiles.get(&user).cloned())
	}

	async fn leaderboard(&self, limit: usize) -> Result<Vec<Profile>, StoreError> {
		let mut profiles: Vec<Profile> = self.lock()?.profiles.values().cloned().collect();
		profiles.sort_by(leaderboard_order);
		profiles.truncate(limit);
		Ok(profiles)
	}

	async fn players_ahead(&self, points: i32) -> Result<usize, StoreError> {
		Ok(self.lock()?.profiles.values().filter(|p| p.total_points > points).count())
	}

	async fn active_container(&self, user: UserId) -> Result<Option<ActiveContainer>, StoreError> {
		Ok(self.lock()?.containers.get(&user).cloned())
	}

	async fn insert_container(&self, container: ActiveContainer) -> Result<(), StoreError> {
		let mut inner = self.lock()?;

		if inner.containers.contains_key(&container.user_id) {
			return Err(StoreError::Conflict("active container"));
		}

		inner.containers.insert(container.user_id, container);
		Ok(())
	}

	async fn delete_container(&self, user: UserId, challenge: ChallengeId) -> Result<(), StoreError> {
		let mut inner = self.lock()?;

		if inner.containers.get(&user).is_some_and(|c| c.challenge_id == challenge) {
			inner.containers.remove(&user);
		}

		Ok(())
	}
}
