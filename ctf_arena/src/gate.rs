use chrono::{DateTime, Utc};
use crate::models::{Challenge, Tournament};

/// where a submission came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
	/// the tournament's own challenge page
	Tournament,
	/// the general practice list
	Archive
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
	NotStarted,
	OpenRegistered,
	OpenUnregistered,
	Ended
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
	NotOpen,
	NotRegistered,
	Ended
}

impl GateState {
	/// `registered` only matters while the tournament is open
	pub fn of(tournament: &Tournament, now: DateTime<Utc>, registered: bool) -> Self {
		if tournament.has_ended(now) {
			Self::Ended
		} else if now < tournament.start_date || !tournament.is_active {
			Self::NotStarted
		} else if registered {
			Self::OpenRegistered
		} else {
			Self::OpenUnregistered
		}
	}

	pub fn admits(self, entry: Entry) -> Result<(), GateRejection> {
		match (self, entry) {
			(Self::NotStarted, _) => Err(GateRejection::NotOpen),
			(Self::OpenRegistered, _) => Ok(()),
			(Self::OpenUnregistered, _) => Err(GateRejection::NotRegistered),
			(Self::Ended, Entry::Tournament) => Err(GateRejection::Ended),
			(Self::Ended, Entry::Archive) => Ok(())
		}
	}
}

/// whether a challenge shows up in the public practice list
pub fn publicly_listed(challenge: &Challenge, tournament: Option<&Tournament>, now: DateTime<Utc>) -> bool {
	if !challenge.is_active {
		return false;
	}

	match (challenge.tournament_id, tournament) {
		(None, _) => true,
		(Some(_), Some(t)) => t.end_date < now,
		// dangling tournament reference, keep it hidden
		(Some(_), None) => false
	}
}
