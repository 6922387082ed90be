//! The arena's operations, independent of HTTP.
//!
//! [`ArenaService`] ties a [`Store`] and a [`ContainerRuntime`] together. Every
//! operation takes the current time from the caller so tests can move the clock.

use std::collections::{HashMap, HashSet};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use crate::flag;
use crate::gate::{self, Entry, GateRejection, GateState};
use crate::labs::{LabError, LabHandle, LabManager};
use crate::models::{ChallengeId, Entrant, NewAttempt, NewTeam, Solver, Team, TournamentId, TournamentMode, UserId};
use crate::pagination::paginate;
use crate::runtime::ContainerRuntime;
use crate::scoring;
use crate::store::{CommitOutcome, Store, StoreError};
use crate::throttle::Throttle;
use crate::views::{CHALLENGES_PER_PAGE, ChallengeFilter, ChallengeList, LeaderboardEntry, ProfileSummary, leaderboard_entries};

pub const MAX_TEAM_NAME: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
	AlreadySolved,
	Throttled,
	TournamentNotOpen,
	TournamentNotRegistered,
	TournamentEnded,
	WrongFlag,
	NotFound,
	Internal
}

/// where the client should go after a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "to", rename_all = "snake_case")]
pub enum Redirect {
	Challenges,
	Challenge { id: ChallengeId },
	TournamentList,
	Tournament { id: TournamentId }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
	Accepted {
		points_awarded: i32,
		first_blood: bool,
		redirect: Redirect
	},
	Rejected {
		reason: RejectReason,
		redirect: Redirect
	}
}

impl SubmitOutcome {
	fn rejected(reason: RejectReason, redirect: Redirect) -> Self {
		Self::Rejected { reason, redirect }
	}

	pub fn reason(&self) -> Option<RejectReason> {
		match self {
			Self::Accepted { .. } => None,
			Self::Rejected { reason, .. } => Some(*reason)
		}
	}
}

#[derive(Debug, Error)]
pub enum RegistrationError {
	#[error("tournament not found")]
	NotFound,
	#[error("tournament has ended")]
	Ended,
	#[error("team tournaments need a team")]
	NoTeam,
	#[error("only the captain can register a team")]
	NotCaptain,
	#[error("backend error: {0}")]
	Backend(#[from] StoreError)
}

impl RegistrationError {
	pub fn code(&self) -> &'static str {
		match self {
			Self::NotFound => "NOT_FOUND",
			Self::Ended => "TOURNAMENT_ENDED",
			Self::NoTeam => "NO_TEAM",
			Self::NotCaptain => "NOT_CAPTAIN",
			Self::Backend(_) => "INTERNAL"
		}
	}
}

#[derive(Debug, Error)]
pub enum TeamError {
	#[error("team name must be 1 to {MAX_TEAM_NAME} characters")]
	InvalidName,
	#[error("team name is taken")]
	NameTaken,
	#[error("user is already in a team")]
	AlreadyInTeam,
	#[error("invite token doesn't match any team")]
	InvalidToken,
	#[error("only the captain can do that")]
	NotCaptain,
	#[error("the captain can't be removed")]
	CannotRemoveCaptain,
	#[error("user is not a member of this team")]
	NotAMember,
	#[error("couldn't generate an invite token: {0}")]
	Randomness(String),
	#[error("backend error: {0}")]
	Backend(#[from] StoreError)
}

impl TeamError {
	pub fn code(&self) -> &'static str {
		match self {
			Self::InvalidName => "INVALID_NAME",
			Self::NameTaken => "NAME_TAKEN",
			Self::AlreadyInTeam => "ALREADY_IN_TEAM",
			Self::InvalidToken => "INVALID_TOKEN",
			Self::NotCaptain => "NOT_CAPTAIN",
			Self::CannotRemoveCaptain => "CANNOT_REMOVE_CAPTAIN",
			Self::NotAMember => "NOT_A_MEMBER",
			Self::Randomness(_) | Self::Backend(_) => "INTERNAL"
		}
	}
}

fn invite_token() -> Result<String, TeamError> {
	let mut bytes = [0u8; 16];
	getrandom::fill(&mut bytes).map_err(|e| TeamError::Randomness(e.to_string()))?;
	Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

pub struct ArenaService<S, R> {
	store: S,
	labs: LabManager<R>,
	throttle: Throttle
}

impl<S: Store, R: ContainerRuntime> ArenaService<S, R> {
	pub fn new(store: S, labs: LabManager<R>) -> Self {
		Self {
			store,
			labs,
			throttle: Throttle::default()
		}
	}

	pub fn store(&self) -> &S {
		&self.store
	}

	pub fn labs(&self) -> &LabManager<R> {
		&self.labs
	}

	pub async fn submit_flag(&self, user: UserId, challenge: ChallengeId, raw: &str, entry: Entry, now: DateTime<Utc>) -> SubmitOutcome {
		match self.try_submit(user, challenge, raw, entry, now).await {
			Ok(outcome) => outcome,
			Err(e) => {
				log::error!("submission by user {user} for challenge {challenge} failed: {e}");
				SubmitOutcome::rejected(RejectReason::Internal, Redirect::Challenge { id: challenge })
			}
		}
	}

	async fn try_submit(&self, user: UserId, challenge_id: ChallengeId, raw: &str, entry: Entry, now: DateTime<Utc>) -> Result<SubmitOutcome, StoreError> {
		let Some(challenge) = self.store.challenge(challenge_id).await?.filter(|c| c.is_active) else {
			return Ok(SubmitOutcome::rejected(RejectReason::NotFound, Redirect::Challenges));
		};

		let solver = Solver {
			user_id: user,
			team_id: self.store.team_of(user).await?.map(|t| t.id)
		};

		let tournament = match challenge.tournament_id {
			Some(id) => Some(self.store.tournament(id).await?.ok_or_else(|| {
				StoreError::Inconsistent(format!("challenge {challenge_id} references missing tournament {id}"))
			})?),
			None => None
		};

		let back = match (entry, &tournament) {
			(Entry::Tournament, Some(t)) => Redirect::Tournament { id: t.id },
			_ => Redirect::Challenge { id: challenge_id }
		};

		if let Some(t) = &tournament {
			let registered = match (t.is_open(now), solver.entrant(t.mode)) {
				(true, Some(entrant)) => self.store.is_registered(t.id, entrant).await?,
				_ => false
			};

			if let Err(rejection) = GateState::of(t, now, registered).admits(entry) {
				let (reason, redirect) = match rejection {
					GateRejection::NotOpen => (RejectReason::TournamentNotOpen, Redirect::TournamentList),
					GateRejection::NotRegistered => (RejectReason::TournamentNotRegistered, Redirect::Tournament { id: t.id }),
					GateRejection::Ended => (RejectReason::TournamentEnded, Redirect::Tournament { id: t.id })
				};

				return Ok(SubmitOutcome::rejected(reason, redirect));
			}
		}

		let failures = self.store.recent_failures(user, challenge_id, self.throttle.window_start(now)).await?;
		if !self.throttle.allows(failures) {
			log::warn!("user {user} is throttled on challenge {challenge_id}");
			return Ok(SubmitOutcome::rejected(RejectReason::Throttled, back));
		}

		if self.store.is_solved(challenge_id, solver, scoring::team_scoped(tournament.as_ref())).await? {
			return Ok(SubmitOutcome::rejected(RejectReason::AlreadySolved, back));
		}

		let correct = flag::verify(raw, &challenge.flag_hash);
		self.store.log_attempt(NewAttempt::new(user, challenge_id, raw, correct, now)).await?;

		if !correct {
			return Ok(SubmitOutcome::rejected(RejectReason::WrongFlag, back));
		}

		match self.store.commit_solve(challenge_id, solver, now).await? {
			CommitOutcome::Credited(award) => {
				log::info!("user {user} solved challenge {challenge_id} for {} points{}", award.points, match award.first_blood {
					true => " (first blood)",
					false => ""
				});

				Ok(SubmitOutcome::Accepted {
					points_awarded: award.points,
					first_blood: award.first_blood,
					redirect: back
				})
			},
			CommitOutcome::AlreadySolved => Ok(SubmitOutcome::rejected(RejectReason::AlreadySolved, back))
		}
	}

	pub async fn provision_lab(&self, user: UserId, challenge: ChallengeId, now: DateTime<Utc>) -> Result<LabHandle, LabError> {
		let challenge = self.store.challenge(challenge).await?
			.filter(|c| c.is_active)
			.ok_or(LabError::UnknownChallenge)?;

		self.labs.provision(&self.store, user, &challenge, now).await
	}

	pub async fn terminate_lab(&self, user: UserId, challenge: ChallengeId) -> Result<(), LabError> {
		self.labs.terminate(&self.store, user, challenge).await
	}

	pub async fn lab_status(&self, user: UserId, challenge: ChallengeId) -> Result<Option<LabHandle>, LabError> {
		self.labs.current(&self.store, user, challenge).await
	}

	pub async fn ensure_profile(&self, user: UserId) -> Result<(), StoreError> {
		self.store.ensure_profile(user).await?;
		Ok(())
	}

	pub async fn list_challenges(&self, user: UserId, filter: &ChallengeFilter, page: Option<i64>, now: DateTime<Utc>) -> Result<ChallengeList, StoreError> {
		let challenges = self.store.active_challenges().await?;
		let tournaments: HashMap<_, _> = self.store.tournaments().await?.into_iter().map(|t| (t.id, t)).collect();

		let listed: Vec<_> = challenges.iter().filter(|c| {
			gate::publicly_listed(c, c.tournament_id.and_then(|id| tournaments.get(&id)), now)
		}).collect();
		let total = listed.len();
		let filtered: Vec<_> = listed.into_iter().filter(|c| filter.matches(c)).collect();

		let solved: HashSet<_> = self.store.solved_challenges(user).await?.into_iter().map(|(s, _)| s.challenge_id).collect();
		let attempted: HashSet<_> = self.store.attempted_challenges(user).await?.into_iter().collect();

		let page = paginate(filtered, CHALLENGES_PER_PAGE, page);
		Ok(ChallengeList::build(page, total, &solved, &attempted, filter.category))
	}

	pub async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, StoreError> {
		Ok(leaderboard_entries(self.store.leaderboard(limit).await?))
	}

	pub async fn profile_summary(&self, user: UserId) -> Result<Option<ProfileSummary>, StoreError> {
		let Some(profile) = self.store.profile(user).await? else {
			return Ok(None);
		};

		let rank = self.store.players_ahead(profile.total_points).await? + 1;
		let solved = self.store.solved_challenges(user).await?;

		Ok(Some(ProfileSummary::build(profile, rank, solved)))
	}

	pub async fn register_for_tournament(&self, user: UserId, tournament: TournamentId, now: DateTime<Utc>) -> Result<Entrant, RegistrationError> {
		let tournament = self.store.tournament(tournament).await?.ok_or(RegistrationError::NotFound)?;

		if tournament.has_ended(now) {
			return Err(RegistrationError::Ended);
		}

		let entrant = match tournament.mode {
			TournamentMode::Solo => Entrant::User(user),
			TournamentMode::Team => {
				let team = self.store.team_of(user).await?.ok_or(RegistrationError::NoTeam)?;
				if team.captain_id != user {
					return Err(RegistrationError::NotCaptain);
				}

				Entrant::Team(team.id)
			}
		};

		self.store.register(tournament.id, entrant).await.map_err(|e| match e {
			StoreError::NotFound => RegistrationError::NotFound,
			e => e.into()
		})?;

		log::info!("{entrant:?} registered for tournament {}", tournament.id);
		Ok(entrant)
	}

	pub async fn create_team(&self, user: UserId, name: &str) -> Result<Team, TeamError> {
		let name = name.trim();
		if name.is_empty() || name.chars().count() > MAX_TEAM_NAME {
			return Err(TeamError::InvalidName);
		}

		if self.store.team_of(user).await?.is_some() {
			return Err(TeamError::AlreadyInTeam);
		}

		let team = self.store.create_team(NewTeam {
			name: String::from(name),
			captain_id: user,
			invite_token: invite_token()?
		}).await.map_err(|e| match e {
			StoreError::Conflict("team name") => TeamError::NameTaken,
			StoreError::Conflict("team membership") => TeamError::AlreadyInTeam,
			e => e.into()
		})?;

		log::info!("user {user} created team {:?}", team.name);
		Ok(team)
	}

	pub async fn join_team(&self, user: UserId, invite_token: &str) -> Result<Team, TeamError> {
		self.store.join_team(invite_token.trim(), user).await.map_err(|e| match e {
			StoreError::NotFound => TeamError::InvalidToken,
			StoreError::Conflict(_) => TeamError::AlreadyInTeam,
			e => e.into()
		})
	}

	pub async fn remove_member(&self, captain: UserId, member: UserId) -> Result<(), TeamError> {
		let team = self.store.team_of(captain).await?.ok_or(TeamError::NotCaptain)?;

		if team.captain_id != captain {
			return Err(TeamError::NotCaptain);
		}
		if member == captain {
			return Err(TeamError::CannotRemoveCaptain);
		}

		self.store.remove_member(team.id, member).await.map_err(|e| match e {
			StoreError::NotFound => TeamError::NotAMember,
			e => e.into()
		})
	}

	/// administrative correction, the global profile loses the points again
	pub async fn revoke_solve(&self, user: UserId, challenge: ChallengeId) -> Result<Option<i32>, StoreError> {
		let removed = self.store.revoke_solve(user, challenge).await?;

		if let Some(points) = removed {
			log::info!("revoked solve of challenge {challenge} by user {user}, {points} points removed");
		}

		Ok(removed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use chrono::TimeDelta;
	use crate::models::Category;
	use crate::ports::PortAllocator;
	use crate::store::MemoryStore;
	use crate::testing::{FLAG, FakeRuntime, challenge, tournament};

	type Arena = ArenaService<MemoryStore, Arc<FakeRuntime>>;

	async fn arena() -> Arena {
		let labs = LabManager::connect(Arc::new(FakeRuntime::default()), PortAllocator::default()).await;
		ArenaService::new(MemoryStore::default(), labs)
	}

	async fn player(arena: &Arena, user: UserId) {
		arena.ensure_profile(user).await.unwrap();
	}

	fn accepted(outcome: SubmitOutcome) -> (i32, bool) {
		match outcome {
			SubmitOutcome::Accepted { points_awarded, first_blood, .. } => (points_awarded, first_blood),
			SubmitOutcome::Rejected { reason, .. } => panic!("submission rejected with {reason:?}")
		}
	}

	/// a challenge bound to tournament `tid`
	fn tournament_challenge(id: ChallengeId, tid: TournamentId) -> crate::models::Challenge {
		let mut c = challenge(id, 100);
		c.tournament_id = Some(tid);
		c
	}

	#[tokio::test]
	async fn first_blood_then_base_points() {
		let arena = arena().await;
		arena.store().insert_challenge(challenge(1, 500)).unwrap();
		player(&arena, 1).await;
		player(&arena, 2).await;

		let now = Utc::now();
		assert_eq!(accepted(arena.submit_flag(1, 1, FLAG, Entry::Archive, now).await), (550, true));
		assert_eq!(accepted(arena.submit_flag(2, 1, &format!("  {FLAG}\n"), Entry::Archive, now).await), (500, false));

		assert_eq!(arena.store().profile(1).await.unwrap().unwrap().total_points, 550);
		assert_eq!(arena.store().profile(2).await.unwrap().unwrap().total_points, 500);
	}

	#[tokio::test]
	async fn resubmission_is_already_solved() {
		let arena = arena().await;
		arena.store().insert_challenge(challenge(1, 500)).unwrap();
		player(&arena, 1).await;

		let now = Utc::now();
		accepted(arena.submit_flag(1, 1, FLAG, Entry::Archive, now).await);
		let again = arena.submit_flag(1, 1, FLAG, Entry::Archive, now).await;

		assert_eq!(again.reason(), Some(RejectReason::AlreadySolved));
		assert_eq!(arena.store().profile(1).await.unwrap().unwrap().total_points, 550);
		assert_eq!(arena.store().solve_count(1).unwrap(), 1);
	}

	#[tokio::test]
	async fn wrong_flags_are_logged() {
		let arena = arena().await;
		arena.store().insert_challenge(challenge(1, 500)).unwrap();
		player(&arena, 1).await;

		let outcome = arena.submit_flag(1, 1, "FLAG{nope}", Entry::Archive, Utc::now()).await;
		assert_eq!(outcome, SubmitOutcome::Rejected { reason: RejectReason::WrongFlag, redirect: Redirect::Challenge { id: 1 } });
		assert_eq!(arena.store().attempt_count(1, 1).unwrap(), 1);
		assert_eq!(arena.store().solve_count(1).unwrap(), 0);
	}

	#[tokio::test]
	async fn unknown_and_inactive_challenges_are_not_found() {
		let arena = arena().await;
		let mut hidden = challenge(2, 100);
		hidden.is_active = false;
		arena.store().insert_challenge(hidden).unwrap();

		for id in [1, 2] {
			let outcome = arena.submit_flag(1, id, FLAG, Entry::Archive, Utc::now()).await;
			assert_eq!(outcome, SubmitOutcome::Rejected { reason: RejectReason::NotFound, redirect: Redirect::Challenges });
		}
	}

	#[tokio::test]
	async fn throttle_blocks_even_correct_flags() {
		let arena = arena().await;
		arena.store().insert_challenge(challenge(1, 500)).unwrap();
		player(&arena, 1).await;

		let now = Utc::now();
		for i in 0..5 {
			let outcome = arena.submit_flag(1, 1, "wrong", Entry::Archive, now + TimeDelta::seconds(i)).await;
			assert_eq!(outcome.reason(), Some(RejectReason::WrongFlag));
		}

		let blocked = arena.submit_flag(1, 1, FLAG, Entry::Archive, now + TimeDelta::seconds(10)).await;
		assert_eq!(blocked.reason(), Some(RejectReason::Throttled));
		// throttled submissions write nothing
		assert_eq!(arena.store().attempt_count(1, 1).unwrap(), 5);

		// once the oldest failures fall out of the window the user may try again
		let later = now + TimeDelta::seconds(61);
		assert_eq!(accepted(arena.submit_flag(1, 1, FLAG, Entry::Archive, later).await), (550, true));
	}

	#[tokio::test]
	async fn throttle_is_per_challenge() {
		let arena = arena().await;
		arena.store().insert_challenge(challenge(1, 500)).unwrap();
		arena.store().insert_challenge(challenge(2, 100)).unwrap();
		player(&arena, 1).await;

		let now = Utc::now();
		for _ in 0..5 {
			arena.submit_flag(1, 1, "wrong", Entry::Archive, now).await;
		}

		assert_eq!(arena.submit_flag(1, 1, FLAG, Entry::Archive, now).await.reason(), Some(RejectReason::Throttled));
		accepted(arena.submit_flag(1, 2, FLAG, Entry::Archive, now).await);
	}

	#[tokio::test]
	async fn future_tournaments_are_closed() {
		let arena = arena().await;
		arena.store().insert_tournament(tournament(3, TournamentMode::Solo, 1, 2)).unwrap();
		arena.store().insert_challenge(tournament_challenge(1, 3)).unwrap();
		player(&arena, 1).await;

		for entry in [Entry::Tournament, Entry::Archive] {
			let outcome = arena.submit_flag(1, 1, FLAG, entry, Utc::now()).await;
			assert_eq!(outcome, SubmitOutcome::Rejected { reason: RejectReason::TournamentNotOpen, redirect: Redirect::TournamentList });
		}
		assert_eq!(arena.store().attempt_count(1, 1).unwrap(), 0);
	}

	#[tokio::test]
	async fn open_tournaments_need_registration() {
		let arena = arena().await;
		arena.store().insert_tournament(tournament(3, TournamentMode::Solo, -1, 1)).unwrap();
		arena.store().insert_challenge(tournament_challenge(1, 3)).unwrap();
		player(&arena, 1).await;

		let now = Utc::now();
		let outcome = arena.submit_flag(1, 1, FLAG, Entry::Tournament, now).await;
		assert_eq!(outcome, SubmitOutcome::Rejected { reason: RejectReason::TournamentNotRegistered, redirect: Redirect::Tournament { id: 3 } });

		assert_eq!(arena.register_for_tournament(1, 3, now).await.unwrap(), Entrant::User(1));
		let outcome = arena.submit_flag(1, 1, FLAG, Entry::Tournament, now).await;
		assert_eq!(outcome, SubmitOutcome::Accepted { points_awarded: 150, first_blood: true, redirect: Redirect::Tournament { id: 3 } });

		// both ledgers grow
		assert_eq!(arena.store().registration_score(3, Entrant::User(1)).await.unwrap(), Some(150));
		assert_eq!(arena.store().profile(1).await.unwrap().unwrap().total_points, 150);
	}

	#[tokio::test]
	async fn ended_tournaments_are_practice_only() {
		let arena = arena().await;
		arena.store().insert_tournament(tournament(3, TournamentMode::Solo, -2, -1)).unwrap();
		arena.store().insert_challenge(tournament_challenge(1, 3)).unwrap();
		player(&arena, 1).await;

		let now = Utc::now();
		let outcome = arena.submit_flag(1, 1, FLAG, Entry::Tournament, now).await;
		assert_eq!(outcome.reason(), Some(RejectReason::TournamentEnded));

		assert_eq!(accepted(arena.submit_flag(1, 1, FLAG, Entry::Archive, now).await), (150, true));
		assert_eq!(arena.store().registration_score(3, Entrant::User(1)).await.unwrap(), None);
		assert_eq!(arena.store().profile(1).await.unwrap().unwrap().total_points, 150);
		assert!(matches!(arena.register_for_tournament(1, 3, now).await, Err(RegistrationError::Ended)));
	}

	#[tokio::test]
	async fn team_solves_are_shared() {
		let arena = arena().await;
		arena.store().insert_tournament(tournament(3, TournamentMode::Team, -1, 1)).unwrap();
		arena.store().insert_challenge(tournament_challenge(1, 3)).unwrap();
		player(&arena, 1).await;
		player(&arena, 2).await;

		let now = Utc::now();
		let team = arena.create_team(1, "Kiber Qalqon").await.unwrap();
		arena.join_team(2, &team.invite_token).await.unwrap();

		assert!(matches!(arena.register_for_tournament(2, 3, now).await, Err(RegistrationError::NotCaptain)));
		assert_eq!(arena.register_for_tournament(1, 3, now).await.unwrap(), Entrant::Team(team.id));

		accepted(arena.submit_flag(2, 1, FLAG, Entry::Tournament, now).await);
		let outcome = arena.submit_flag(1, 1, FLAG, Entry::Tournament, now).await;

		assert_eq!(outcome.reason(), Some(RejectReason::AlreadySolved));
		assert_eq!(arena.store().registration_score(3, Entrant::Team(team.id)).await.unwrap(), Some(150));
		assert_eq!(arena.store().profile(2).await.unwrap().unwrap().total_points, 150);
		assert_eq!(arena.store().profile(1).await.unwrap().unwrap().total_points, 0);
	}

	#[tokio::test]
	async fn team_tournaments_reject_solo_players() {
		let arena = arena().await;
		arena.store().insert_tournament(tournament(3, TournamentMode::Team, -1, 1)).unwrap();
		arena.store().insert_challenge(tournament_challenge(1, 3)).unwrap();
		player(&arena, 1).await;

		let now = Utc::now();
		assert!(matches!(arena.register_for_tournament(1, 3, now).await, Err(RegistrationError::NoTeam)));
		assert_eq!(arena.submit_flag(1, 1, FLAG, Entry::Tournament, now).await.reason(), Some(RejectReason::TournamentNotRegistered));
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrent_solvers_share_one_first_blood() {
		const PLAYERS: UserId = 16;

		let arena = Arc::new(arena().await);
		arena.store().insert_challenge(challenge(1, 500)).unwrap();
		for user in 1..=PLAYERS {
			player(&arena, user).await;
		}

		let now = Utc::now();
		let tasks: Vec<_> = (1..=PLAYERS).map(|user| {
			let arena = arena.clone();
			tokio::spawn(async move {
				accepted(arena.submit_flag(user, 1, FLAG, Entry::Archive, now).await)
			})
		}).collect();

		let mut first_bloods = 0;
		let mut total = 0;
		for task in tasks {
			let (points, first_blood) = task.await.unwrap();
			total += points;
			first_bloods += first_blood as i32;
		}

		assert_eq!(first_bloods, 1);
		assert_eq!(total, PLAYERS * 500 + scoring::FIRST_BLOOD_BONUS);
		assert_eq!(arena.store().solve_count(1).unwrap(), PLAYERS as usize);
	}

	#[tokio::test]
	async fn missing_profile_is_internal_and_credits_nothing() {
		let arena = arena().await;
		arena.store().insert_challenge(challenge(1, 500)).unwrap();

		let outcome = arena.submit_flag(1, 1, FLAG, Entry::Archive, Utc::now()).await;
		assert_eq!(outcome.reason(), Some(RejectReason::Internal));
		assert_eq!(arena.store().solve_count(1).unwrap(), 0);
	}

	#[tokio::test]
	async fn listing_hides_running_tournaments() {
		let arena = arena().await;
		arena.store().insert_tournament(tournament(3, TournamentMode::Solo, -1, 1)).unwrap();
		arena.store().insert_tournament(tournament(4, TournamentMode::Solo, -2, -1)).unwrap();
		arena.store().insert_challenge(challenge(1, 100)).unwrap();
		arena.store().insert_challenge(tournament_challenge(2, 3)).unwrap();
		arena.store().insert_challenge(tournament_challenge(3, 4)).unwrap();
		let mut crypto = challenge(4, 100);
		crypto.category = Category::Crypto;
		arena.store().insert_challenge(crypto).unwrap();
		player(&arena, 1).await;

		let now = Utc::now();
		accepted(arena.submit_flag(1, 1, FLAG, Entry::Archive, now).await);
		arena.submit_flag(1, 3, "wrong", Entry::Archive, now).await;

		let list = arena.list_challenges(1, &ChallengeFilter::default(), None, now).await.unwrap();
		let ids: Vec<_> = list.challenges.iter().map(|c| c.id).collect();
		assert_eq!(ids, vec![1, 3, 4]);
		assert_eq!(list.total_challenges, 3);
		assert!(list.challenges[0].is_solved);
		assert!(list.challenges[1].is_attempted);
		assert_eq!(list.challenges[2].serial_number, 3);

		let filter = ChallengeFilter { query: None, category: Some(Category::Crypto) };
		let list = arena.list_challenges(1, &filter, Some(9), now).await.unwrap();
		assert_eq!(list.displayed_count, 1);
		assert_eq!(list.page, 1);
		assert_eq!(list.total_challenges, 3);
	}

	#[tokio::test]
	async fn profile_rank_counts_players_ahead() {
		let arena = arena().await;
		arena.store().insert_challenge(challenge(1, 500)).unwrap();
		arena.store().insert_challenge(challenge(2, 100)).unwrap();
		for user in 1..=3 {
			player(&arena, user).await;
		}

		let now = Utc::now();
		accepted(arena.submit_flag(1, 1, FLAG, Entry::Archive, now).await);
		accepted(arena.submit_flag(2, 2, FLAG, Entry::Archive, now).await);
		accepted(arena.submit_flag(2, 1, FLAG, Entry::Archive, now + TimeDelta::seconds(5)).await);

		let summary = arena.profile_summary(1).await.unwrap().unwrap();
		assert_eq!(summary.rank, 2);
		assert_eq!(summary.total_points, 550);

		let summary = arena.profile_summary(2).await.unwrap().unwrap();
		assert_eq!(summary.rank, 1);
		assert_eq!(summary.solved.iter().map(|s| s.challenge_id).collect::<Vec<_>>(), vec![1, 2]);

		assert_eq!(arena.profile_summary(3).await.unwrap().unwrap().rank, 3);
		assert!(arena.profile_summary(9).await.unwrap().is_none());

		let board = arena.leaderboard(2).await.unwrap();
		assert_eq!(board.iter().map(|e| e.user_id).collect::<Vec<_>>(), vec![2, 1]);
	}

	#[tokio::test]
	async fn team_membership_rules() {
		let arena = arena().await;

		assert!(matches!(arena.create_team(1, "   ").await, Err(TeamError::InvalidName)));
		let team = arena.create_team(1, "Kiber Qalqon").await.unwrap();
		assert_eq!(team.invite_token.len(), 32);

		assert!(matches!(arena.create_team(1, "Another").await, Err(TeamError::AlreadyInTeam)));
		assert!(matches!(arena.create_team(2, "Kiber Qalqon").await, Err(TeamError::NameTaken)));
		assert!(matches!(arena.join_team(2, "not-a-token").await, Err(TeamError::InvalidToken)));

		arena.join_team(2, &team.invite_token).await.unwrap();
		assert!(matches!(arena.join_team(2, &team.invite_token).await, Err(TeamError::AlreadyInTeam)));

		assert!(matches!(arena.remove_member(2, 1).await, Err(TeamError::NotCaptain)));
		assert!(matches!(arena.remove_member(1, 1).await, Err(TeamError::CannotRemoveCaptain)));
		assert!(matches!(arena.remove_member(1, 3).await, Err(TeamError::NotAMember)));

		arena.remove_member(1, 2).await.unwrap();
		assert_eq!(arena.store().team_of(2).await.unwrap(), None);
	}

	#[tokio::test]
	async fn revoke_takes_points_back() {
		let arena = arena().await;
		arena.store().insert_challenge(challenge(1, 500)).unwrap();
		player(&arena, 1).await;

		accepted(arena.submit_flag(1, 1, FLAG, Entry::Archive, Utc::now()).await);
		assert_eq!(arena.revoke_solve(1, 1).await.unwrap(), Some(550));
		assert_eq!(arena.store().profile(1).await.unwrap().unwrap().total_points, 0);

		// the challenge can be solved again
		accepted(arena.submit_flag(1, 1, FLAG, Entry::Archive, Utc::now()).await);
	}

	#[tokio::test]
	async fn labs_need_a_known_challenge() {
		let arena = arena().await;
		arena.store().insert_challenge(crate::testing::lab_challenge(1)).unwrap();

		assert!(matches!(arena.provision_lab(7, 2, Utc::now()).await, Err(LabError::UnknownChallenge)));

		let handle = arena.provision_lab(7, 1, Utc::now()).await.unwrap();
		assert_eq!(arena.lab_status(7, 1).await.unwrap(), Some(handle));

		arena.terminate_lab(7, 1).await.unwrap();
		assert_eq!(arena.lab_status(7, 1).await.unwrap(), None);
	}
}
