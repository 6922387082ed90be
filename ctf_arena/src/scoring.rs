//! Pure decision half of the scoring engine.
//!
//! Every store backend loads a [`SolveSnapshot`] inside its transaction, asks [`plan`]
//! what to do, and then applies the resulting [`Award`] before committing. Keeping the
//! rules here means the in-memory store and Postgres can't drift apart.

use chrono::{DateTime, Utc};
use thiserror::Error;
use crate::models::{Challenge, ChallengeId, Entrant, Solver, Tournament, TournamentId, TournamentMode};

pub const FIRST_BLOOD_BONUS: i32 = 50;

/// everything the scoring rules need, read under the commit's lock
#[derive(Debug, Clone, Copy)]
pub struct SolveSnapshot<'a> {
	pub challenge: &'a Challenge,
	pub tournament: Option<&'a Tournament>,
	pub solved_by_user: bool,
	/// any current member of the solver's team solved it (false without a team)
	pub solved_by_team: bool,
	pub solved_by_anyone: bool
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ledger {
	Global,
	/// credited to the registration of `entrant` as well as the global profile
	Tournament {
		tournament_id: TournamentId,
		entrant: Entrant
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Award {
	pub challenge_id: ChallengeId,
	pub points: i32,
	pub first_blood: bool,
	pub ledger: Ledger
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlanError {
	#[error("challenge already solved")]
	AlreadySolved,
	#[error("tournament {0} is not open")]
	TournamentNotOpen(TournamentId),
	#[error("no entrant for team tournament {0}")]
	NoEntrant(TournamentId)
}

pub fn awarded_points(points: i32, first_blood: bool) -> i32 {
	match first_blood {
		true => points.saturating_add(FIRST_BLOOD_BONUS),
		false => points
	}
}

/// solve status is shared across a team only for team-mode tournament challenges
pub fn team_scoped(tournament: Option<&Tournament>) -> bool {
	tournament.is_some_and(|t| t.mode == TournamentMode::Team)
}

pub fn plan(snapshot: &SolveSnapshot<'_>, solver: &Solver, now: DateTime<Utc>) -> Result<Award, PlanError> {
	if snapshot.solved_by_user || (team_scoped(snapshot.tournament) && snapshot.solved_by_team) {
		return Err(PlanError::AlreadySolved);
	}

	let ledger = match snapshot.tournament {
		Some(t) if t.is_open(now) => Ledger::Tournament {
			tournament_id: t.id,
			entrant: solver.entrant(t.mode).ok_or(PlanError::NoEntrant(t.id))?
		},
		// past tournaments are practice material and only count towards lifetime score
		Some(t) if t.has_ended(now) => Ledger::Global,
		Some(t) => return Err(PlanError::TournamentNotOpen(t.id)),
		None => Ledger::Global
	};

	let first_blood = !snapshot.solved_by_anyone;

	Ok(Award {
		challenge_id: snapshot.challenge.id,
		points: awarded_points(snapshot.challenge.points, first_blood),
		first_blood,
		ledger
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeDelta;
	use crate::models::Category;

	fn challenge(points: i32, tournament_id: Option<TournamentId>) -> Challenge {
		Challenge {
			id: 11,
			title: String::from("Sirli Xabar"),
			description: String::new(),
			category: Category::Crypto,
			points,
			flag_hash: String::new(),
			is_active: true,
			tournament_id,
			docker_image: None,
			docker_port: None,
			created_at: Utc::now()
		}
	}

	fn tournament(mode: TournamentMode, start_offset: i64, end_offset: i64) -> Tournament {
		let now = Utc::now();
		Tournament {
			id: 4,
			name: String::from("Winter Cup"),
			start_date: now + TimeDelta::hours(start_offset),
			end_date: now + TimeDelta::hours(end_offset),
			is_active: true,
			mode
		}
	}

	fn snapshot<'a>(challenge: &'a Challenge, tournament: Option<&'a Tournament>) -> SolveSnapshot<'a> {
		SolveSnapshot {
			challenge,
			tournament,
			solved_by_user: false,
			solved_by_team: false,
			solved_by_anyone: false
		}
	}

	#[test]
	fn first_blood_gets_the_bonus() {
		let c = challenge(500, None);
		let award = plan(&snapshot(&c, None), &Solver::solo(1), Utc::now()).unwrap();
		assert_eq!(award.points, 550);
		assert!(award.first_blood);
		assert_eq!(award.ledger, Ledger::Global);

		let later = SolveSnapshot { solved_by_anyone: true, ..snapshot(&c, None) };
		let award = plan(&later, &Solver::solo(2), Utc::now()).unwrap();
		assert_eq!(award.points, 500);
		assert!(!award.first_blood);
	}

	#[test]
	fn repeat_solve_is_rejected() {
		let c = challenge(10, None);
		let s = SolveSnapshot { solved_by_user: true, solved_by_anyone: true, ..snapshot(&c, None) };
		assert_eq!(plan(&s, &Solver::solo(1), Utc::now()), Err(PlanError::AlreadySolved));
	}

	#[test]
	fn team_solves_only_block_in_team_tournaments() {
		let solver = Solver { user_id: 1, team_id: Some(3) };

		let team = tournament(TournamentMode::Team, -1, 1);
		let c = challenge(100, Some(team.id));
		let s = SolveSnapshot { solved_by_team: true, solved_by_anyone: true, ..snapshot(&c, Some(&team)) };
		assert_eq!(plan(&s, &solver, Utc::now()), Err(PlanError::AlreadySolved));

		let solo = tournament(TournamentMode::Solo, -1, 1);
		let s = SolveSnapshot { solved_by_team: true, solved_by_anyone: true, ..snapshot(&c, Some(&solo)) };
		let award = plan(&s, &solver, Utc::now()).unwrap();
		assert_eq!(award.ledger, Ledger::Tournament { tournament_id: solo.id, entrant: Entrant::User(1) });
	}

	#[test]
	fn open_team_tournament_credits_the_team() {
		let t = tournament(TournamentMode::Team, -1, 1);
		let c = challenge(100, Some(t.id));
		let award = plan(&snapshot(&c, Some(&t)), &Solver { user_id: 1, team_id: Some(3) }, Utc::now()).unwrap();
		assert_eq!(award.ledger, Ledger::Tournament { tournament_id: t.id, entrant: Entrant::Team(3) });

		assert_eq!(plan(&snapshot(&c, Some(&t)), &Solver::solo(1), Utc::now()), Err(PlanError::NoEntrant(t.id)));
	}

	#[test]
	fn ended_tournament_scores_globally() {
		let t = tournament(TournamentMode::Solo, -3, -1);
		let c = challenge(100, Some(t.id));
		let award = plan(&snapshot(&c, Some(&t)), &Solver::solo(1), Utc::now()).unwrap();
		assert_eq!(award.ledger, Ledger::Global);
	}

	#[test]
	fn future_tournament_cannot_be_credited() {
		let t = tournament(TournamentMode::Solo, 1, 3);
		let c = challenge(100, Some(t.id));
		assert_eq!(plan(&snapshot(&c, Some(&t)), &Solver::solo(1), Utc::now()), Err(PlanError::TournamentNotOpen(t.id)));
	}
}
