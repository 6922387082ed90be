//! Fixtures shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use core::time::Duration;
use chrono::{TimeDelta, Utc};
use crate::flag::hash_flag;
use crate::models::{Category, Challenge, ChallengeId, Tournament, TournamentId, TournamentMode};
use crate::runtime::{ContainerRuntime, ContainerStatus, RunSpec, RuntimeError};

pub const FLAG: &str = "FLAG{view_source_master}";

pub fn challenge(id: ChallengeId, points: i32) -> Challenge {
	Challenge {
		id,
		title: format!("challenge {id}"),
		description: String::from("read the page source"),
		category: Category::Web,
		points,
		flag_hash: hash_flag(FLAG),
		is_active: true,
		tournament_id: None,
		docker_image: None,
		docker_port: None,
		created_at: Utc::now()
	}
}

pub fn lab_challenge(id: ChallengeId) -> Challenge {
	Challenge {
		docker_image: Some(String::from("wan-net/ping-rce:latest")),
		docker_port: Some(5000),
		..challenge(id, 500)
	}
}

/// a tournament running from `start_hours` to `end_hours` relative to now
pub fn tournament(id: TournamentId, mode: TournamentMode, start_hours: i64, end_hours: i64) -> Tournament {
	let now = Utc::now();

	Tournament {
		id,
		name: format!("tournament {id}"),
		start_date: now + TimeDelta::hours(start_hours),
		end_date: now + TimeDelta::hours(end_hours),
		is_active: true,
		mode
	}
}

#[derive(Default)]
pub struct FakeState {
	pub containers: HashMap<String, ContainerStatus>,
	pub runs: Vec<RunSpec>,
	pub stops: Vec<String>,
	pub run_failures: VecDeque<RuntimeError>,
	pub failing_stops: bool,
	/// `stop` never returns
	pub hanging_stops: bool,
	/// `run` yields before starting anything, letting concurrent callers interleave
	pub yielding_runs: bool,
	pub unreachable: bool,
	next_id: u32
}

/// container runtime that only keeps books
#[derive(Default)]
pub struct FakeRuntime {
	state: Mutex<FakeState>
}

impl FakeRuntime {
	pub fn unreachable() -> Self {
		let runtime = Self::default();
		runtime.state().unreachable = true;
		runtime
	}

	pub fn state(&self) -> MutexGuard<'_, FakeState> {
		self.state.lock().unwrap()
	}

	pub fn fail_next_run(&self, e: RuntimeError) {
		self.state().run_failures.push_back(e);
	}

	/// the container disappears behind our back
	pub fn kill(&self, id: &str) {
		self.state().containers.remove(id);
	}
}

impl ContainerRuntime for FakeRuntime {
	async fn ping(&self) -> Result<(), RuntimeError> {
		match self.state().unreachable {
			true => Err(RuntimeError::Unavailable(String::from("fake runtime is down"))),
			false => Ok(())
		}
	}

	async fn run(&self, spec: &RunSpec) -> Result<String, RuntimeError> {
		let yielding = self.state().yielding_runs;
		if yielding {
			tokio::task::yield_now().await;
		}

		let mut state = self.state();

		state.runs.push(spec.clone());
		if let Some(e) = state.run_failures.pop_front() {
			return Err(e);
		}

		state.next_id += 1;
		let id = format!("fake{:04}", state.next_id);
		state.containers.insert(id.clone(), ContainerStatus::Running);

		Ok(id)
	}

	async fn stop(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
		let hanging = {
			let mut state = self.state();
			state.stops.push(String::from(id));
			state.hanging_stops
		};

		if hanging {
			std::future::pending::<()>().await;
		}

		let mut state = self.state();
		if state.failing_stops {
			return Err(RuntimeError::Response(6));
		}

		state.containers.remove(id);
		Ok(())
	}

	async fn status(&self, id: &str) -> Result<ContainerStatus, RuntimeError> {
		let state = self.state();

		if state.unreachable {
			return Err(RuntimeError::Unavailable(String::from("fake runtime is down")));
		}

		Ok(state.containers.get(id).copied().unwrap_or(ContainerStatus::NotFound))
	}
}
