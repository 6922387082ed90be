use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use utoipa::ToSchema;
use crate::schema;

pub type UserId = i32;
pub type ChallengeId = i32;
pub type TournamentId = i32;
pub type TeamId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, DbEnum, Serialize, Deserialize, ToSchema)]
#[ExistingTypePath = "crate::schema::sql_types::Category"]
pub enum Category {
	Web,
	Crypto,
	Osint,
	Forensics,
	Reverse,
	Misc
}

impl Category {
	pub const ALL: [Category; 6] = [
		Self::Web,
		Self::Crypto,
		Self::Osint,
		Self::Forensics,
		Self::Reverse,
		Self::Misc
	];

	pub fn code(&self) -> &'static str {
		match self {
			Self::Web => "Web",
			Self::Crypto => "Crypto",
			Self::Osint => "OSINT",
			Self::Forensics => "Forensics",
			Self::Reverse => "Reverse",
			Self::Misc => "Misc"
		}
	}

	pub fn display_name(&self) -> &'static str {
		match self {
			Self::Web => "Web Exploitation",
			Self::Crypto => "Cryptography",
			Self::Osint => "OSINT",
			Self::Forensics => "Forensics",
			Self::Reverse => "Reverse Engineering",
			Self::Misc => "Miscellaneous"
		}
	}

	pub fn parse(code: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|c| c.code().eq_ignore_ascii_case(code))
	}
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::challenges)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Challenge {
	pub id: ChallengeId,
	pub title: String,
	pub description: String,
	pub category: Category,
	pub points: i32,
	/// hex SHA-256 of the flag, never the flag itself
	pub flag_hash: String,
	pub is_active: bool,
	pub tournament_id: Option<TournamentId>,
	pub docker_image: Option<String>,
	pub docker_port: Option<i32>,
	pub created_at: DateTime<Utc>
}

impl Challenge {
	/// image and internal port of the lab, if this challenge has one
	pub fn lab_target(&self) -> Option<(&str, u16)> {
		let image = self.docker_image.as_deref().map(str::trim).filter(|i| !i.is_empty())?;
		let port = u16::try_from(self.docker_port?).ok().filter(|p| *p != 0)?;
		Some((image, port))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, DbEnum, Serialize, Deserialize, ToSchema)]
#[ExistingTypePath = "crate::schema::sql_types::TournamentMode"]
pub enum TournamentMode {
	Solo,
	Team
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::tournaments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Tournament {
	pub id: TournamentId,
	pub name: String,
	pub start_date: DateTime<Utc>,
	pub end_date: DateTime<Utc>,
	pub is_active: bool,
	pub mode: TournamentMode
}

impl Tournament {
	pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
		now > self.end_date
	}

	/// attemptable for registered entrants and credited to the tournament ledger
	pub fn is_open(&self, now: DateTime<Utc>) -> bool {
		self.is_active && self.start_date <= now && now <= self.end_date
	}
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = schema::solved_records)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SolvedRecord {
	pub user_id: UserId,
	pub challenge_id: ChallengeId,
	pub points_awarded: i32,
	pub solved_at: DateTime<Utc>
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::attempts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AttemptRecord {
	pub id: i64,
	pub user_id: UserId,
	pub challenge_id: ChallengeId,
	pub submitted: String,
	pub is_correct: bool,
	pub created_at: DateTime<Utc>
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::attempts)]
pub struct NewAttempt {
	pub user_id: UserId,
	pub challenge_id: ChallengeId,
	pub submitted: String,
	pub is_correct: bool,
	pub created_at: DateTime<Utc>
}

/// longest submission we keep in the attempt log
pub const MAX_LOGGED_SUBMISSION: usize = 255;

impl NewAttempt {
	pub fn new(user_id: UserId, challenge_id: ChallengeId, raw: &str, is_correct: bool, created_at: DateTime<Utc>) -> Self {
		Self {
			user_id,
			challenge_id,
			submitted: raw.trim().chars().take(MAX_LOGGED_SUBMISSION).collect(),
			is_correct,
			created_at
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = schema::profiles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Profile {
	pub user_id: UserId,
	pub total_points: i32,
	pub last_solved: Option<DateTime<Utc>>
}

impl Profile {
	pub fn new(user_id: UserId) -> Self {
		Self {
			user_id,
			total_points: 0,
			last_solved: None
		}
	}

	pub fn credit(&mut self, points: i32, now: DateTime<Utc>) {
		self.total_points = self.total_points.saturating_add(points);
		self.last_solved = Some(now);
	}

	/// corrective subtraction, clamped at zero
	pub fn deduct(&mut self, points: i32) {
		self.total_points = self.total_points.saturating_sub(points).max(0);
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entrant {
	User(UserId),
	Team(TeamId)
}

impl Entrant {
	fn split(self) -> (Option<UserId>, Option<TeamId>) {
		match self {
			Self::User(id) => (Some(id), None),
			Self::Team(id) => (None, Some(id))
		}
	}
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::tournament_registrations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Registration {
	pub id: i32,
	pub tournament_id: TournamentId,
	pub user_id: Option<UserId>,
	pub team_id: Option<TeamId>,
	pub score: i32
}

impl Registration {
	pub fn entrant(&self) -> Option<Entrant> {
		match (self.user_id, self.team_id) {
			(Some(user), None) => Some(Entrant::User(user)),
			(None, Some(team)) => Some(Entrant::Team(team)),
			_ => None
		}
	}
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::tournament_registrations)]
pub struct NewRegistration {
	pub tournament_id: TournamentId,
	pub user_id: Option<UserId>,
	pub team_id: Option<TeamId>,
	pub score: i32
}

impl NewRegistration {
	pub fn new(tournament_id: TournamentId, entrant: Entrant) -> Self {
		let (user_id, team_id) = entrant.split();

		Self {
			tournament_id,
			user_id,
			team_id,
			score: 0
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable)]
#[diesel(table_name = schema::teams)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Team {
	pub id: TeamId,
	pub name: String,
	pub captain_id: UserId,
	pub invite_token: String
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::teams)]
pub struct NewTeam {
	pub name: String,
	pub captain_id: UserId,
	pub invite_token: String
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = schema::active_containers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ActiveContainer {
	pub user_id: UserId,
	pub challenge_id: ChallengeId,
	pub container_id: String,
	pub host_port: i32,
	pub started_at: DateTime<Utc>
}

/// the identity a submission is made under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Solver {
	pub user_id: UserId,
	pub team_id: Option<TeamId>
}

impl Solver {
	pub fn solo(user_id: UserId) -> Self {
		Self {
			user_id,
			team_id: None
		}
	}

	/// who gets registered and credited in a tournament of the given mode
	pub fn entrant(&self, mode: TournamentMode) -> Option<Entrant> {
		match mode {
			TournamentMode::Solo => Some(Entrant::User(self.user_id)),
			TournamentMode::Team => self.team_id.map(Entrant::Team)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn challenge(image: Option<&str>, port: Option<i32>) -> Challenge {
		Challenge {
			id: 1,
			title: String::from("Network Diagnostic Tool"),
			description: String::new(),
			category: Category::Web,
			points: 500,
			flag_hash: String::new(),
			is_active: true,
			tournament_id: None,
			docker_image: image.map(String::from),
			docker_port: port,
			created_at: Utc::now()
		}
	}

	#[test]
	fn lab_target_requires_image_and_port() {
		assert_eq!(challenge(Some("wan-net/ping-rce:latest"), Some(5000)).lab_target(), Some(("wan-net/ping-rce:latest", 5000)));
		assert_eq!(challenge(Some("   "), Some(5000)).lab_target(), None);
		assert_eq!(challenge(None, Some(5000)).lab_target(), None);
		assert_eq!(challenge(Some("nginx"), None).lab_target(), None);
		assert_eq!(challenge(Some("nginx"), Some(70000)).lab_target(), None);
	}

	#[test]
	fn profile_deduction_clamps_at_zero() {
		let mut profile = Profile::new(7);
		profile.credit(30, Utc::now());
		profile.deduct(50);
		assert_eq!(profile.total_points, 0);
	}

	#[test]
	fn team_mode_needs_a_team() {
		assert_eq!(Solver::solo(3).entrant(TournamentMode::Team), None);
		assert_eq!(Solver { user_id: 3, team_id: Some(9) }.entrant(TournamentMode::Team), Some(Entrant::Team(9)));
		assert_eq!(Solver { user_id: 3, team_id: Some(9) }.entrant(TournamentMode::Solo), Some(Entrant::User(3)));
	}

	#[test]
	fn category_codes_parse_case_insensitively() {
		assert_eq!(Category::parse("osint"), Some(Category::Osint));
		assert_eq!(Category::parse("Web"), Some(Category::Web));
		assert_eq!(Category::parse("Kategoriyalar"), None);
	}
}
