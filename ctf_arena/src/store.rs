use std::cmp::Ordering;
use std::future::Future;
use chrono::{DateTime, Utc};
use diesel::result::DatabaseErrorKind;
use thiserror::Error;
use crate::models::{ActiveContainer, Challenge, ChallengeId, Entrant, NewAttempt, NewTeam, Profile, SolvedRecord, Solver, Team, TeamId, Tournament, TournamentId, UserId};
use crate::scoring::Award;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("record not found")]
	NotFound,
	#[error("conflicting {0}")]
	Conflict(&'static str),
	#[error("inconsistent state: {0}")]
	Inconsistent(String),
	#[error("database error: {0}")]
	Database(diesel::result::Error),
	#[error("connection pool error: {0}")]
	Pool(String)
}

impl From<diesel::result::Error> for StoreError {
	fn from(e: diesel::result::Error) -> Self {
		match e {
			diesel::result::Error::NotFound => Self::NotFound,
			diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => Self::Conflict("record"),
			e => Self::Database(e)
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
	Credited(Award),
	AlreadySolved
}

/// Persistence boundary of the arena.
///
/// Every method is its own unit of work. [`Store::commit_solve`] is the only
/// read-modify-write path for scores and must be atomic: it either inserts the
/// solve and updates every ledger the award names, or changes nothing.
pub trait Store: Send + Sync + 'static {
	fn challenge(&self, id: ChallengeId) -> impl Future<Output = Result<Option<Challenge>, StoreError>> + Send;

	/// active challenges ordered by id
	fn active_challenges(&self) -> impl Future<Output = Result<Vec<Challenge>, StoreError>> + Send;

	fn tournament(&self, id: TournamentId) -> impl Future<Output = Result<Option<Tournament>, StoreError>> + Send;

	fn tournaments(&self) -> impl Future<Output = Result<Vec<Tournament>, StoreError>> + Send;

	fn team_of(&self, user: UserId) -> impl Future<Output = Result<Option<Team>, StoreError>> + Send;

	/// inserts the team and makes the captain its first member
	fn create_team(&self, team: NewTeam) -> impl Future<Output = Result<Team, StoreError>> + Send;

	fn join_team(&self, invite_token: &str, user: UserId) -> impl Future<Output = Result<Team, StoreError>> + Send;

	fn remove_member(&self, team: TeamId, user: UserId) -> impl Future<Output = Result<(), StoreError>> + Send;

	fn is_registered(&self, tournament: TournamentId, entrant: Entrant) -> impl Future<Output = Result<bool, StoreError>> + Send;

	/// idempotent
	fn register(&self, tournament: TournamentId, entrant: Entrant) -> impl Future<Output = Result<(), StoreError>> + Send;

	fn registration_score(&self, tournament: TournamentId, entrant: Entrant) -> impl Future<Output = Result<Option<i32>, StoreError>> + Send;

	/// with `team_scoped`, a solve by any current teammate counts too
	fn is_solved(&self, challenge: ChallengeId, solver: Solver, team_scoped: bool) -> impl Future<Output = Result<bool, StoreError>> + Send;

	/// the user's solves with challenge titles, newest first
	fn solved_challenges(&self, user: UserId) -> impl Future<Output = Result<Vec<(SolvedRecord, String)>, StoreError>> + Send;

	fn attempted_challenges(&self, user: UserId) -> impl Future<Output = Result<Vec<ChallengeId>, StoreError>> + Send;

	/// wrong attempts for (user, challenge) at or after `since`
	fn recent_failures(&self, user: UserId, challenge: ChallengeId, since: DateTime<Utc>) -> impl Future<Output = Result<usize, StoreError>> + Send;

	fn log_attempt(&self, attempt: NewAttempt) -> impl Future<Output = Result<(), StoreError>> + Send;

	fn commit_solve(&self, challenge: ChallengeId, solver: Solver, now: DateTime<Utc>) -> impl Future<Output = Result<CommitOutcome, StoreError>> + Send;

	/// removes a solve and takes its points back from the profile, returns the points removed
	fn revoke_solve(&self, user: UserId, challenge: ChallengeId) -> impl Future<Output = Result<Option<i32>, StoreError>> + Send;

	fn ensure_profile(&self, user: UserId) -> impl Future<Output = Result<Profile, StoreError>> + Send;

	fn profile(&self, user: UserId) -> impl Future<Output = Result<Option<Profile>, StoreError>> + Send;

	/// ordered by [`leaderboard_order`]
	fn leaderboard(&self, limit: usize) -> impl Future<Output = Result<Vec<Profile>, StoreError>> + Send;

	/// number of profiles with strictly more points
	fn players_ahead(&self, points: i32) -> impl Future<Output = Result<usize, StoreError>> + Send;

	fn active_container(&self, user: UserId) -> impl Future<Output = Result<Option<ActiveContainer>, StoreError>> + Send;

	/// fails with [`StoreError::Conflict`] if the user already holds a lab
	fn insert_container(&self, container: ActiveContainer) -> impl Future<Output = Result<(), StoreError>> + Send;

	fn delete_container(&self, user: UserId, challenge: ChallengeId) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// more points first, then whoever got there earlier; players who never solved anything go last
pub fn leaderboard_order(a: &Profile, b: &Profile) -> Ordering {
	b.total_points.cmp(&a.total_points).then_with(|| match (a.last_solved, b.last_solved) {
		(Some(a), Some(b)) => a.cmp(&b),
		(Some(_), None) => Ordering::Less,
		(None, Some(_)) => Ordering::Greater,
		(None, None) => Ordering::Equal
	})
}
