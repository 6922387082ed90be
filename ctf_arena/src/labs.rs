//! Per-user lab containers.
//!
//! The `active_containers` table holds at most one row per user. A row is only
//! trusted after the runtime confirms its container is still running; rows whose
//! container is gone are deleted the first time anyone looks at them.

use chrono::{DateTime, Utc};
use core::time::Duration;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use crate::models::{ActiveContainer, Challenge, ChallengeId, UserId};
use crate::ports::{PortAllocator, PortReservation};
use crate::runtime::{ContainerRuntime, ContainerStatus, LAB_LIMITS, Limits, RunSpec, RuntimeError};
use crate::store::{Store, StoreError};

/// grace period handed to the runtime's own stop
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);
/// our deadline for the whole stop request
pub const STOP_DEADLINE: Duration = Duration::from_secs(5);
/// port allocations tried when the runtime reports the port as taken
pub const ALLOCATION_ROUNDS: usize = 3;

#[derive(Debug, Error)]
pub enum LabError {
	#[error("challenge has no lab image")]
	NoImage,
	#[error("user already runs a lab for another challenge")]
	AlreadyRunningElsewhere,
	#[error("no free host port")]
	NoPort,
	#[error("container runtime failure: {0}")]
	RuntimeFailure(String),
	#[error("unknown challenge")]
	UnknownChallenge,
	#[error("backend error: {0}")]
	Backend(#[from] StoreError)
}

impl LabError {
	pub fn code(&self) -> &'static str {
		match self {
			Self::NoImage => "NO_IMAGE",
			Self::AlreadyRunningElsewhere => "ALREADY_RUNNING_ELSEWHERE",
			Self::NoPort => "NO_PORT",
			Self::RuntimeFailure(_) => "RUNTIME_FAILURE",
			Self::UnknownChallenge => "NOT_FOUND",
			Self::Backend(_) => "INTERNAL"
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct LabHandle {
	pub challenge_id: ChallengeId,
	#[schema(example = 23456)]
	pub host_port: u16,
	pub started_at: DateTime<Utc>
}

impl LabHandle {
	fn of(row: &ActiveContainer) -> Result<Self, LabError> {
		Ok(Self {
			challenge_id: row.challenge_id,
			host_port: u16::try_from(row.host_port).map_err(|_| {
				StoreError::Inconsistent(format!("stored host port {} out of range", row.host_port))
			})?,
			started_at: row.started_at
		})
	}
}

/// established once at startup by pinging the runtime
pub enum Availability<R> {
	Ready(R),
	Unavailable(String)
}

pub struct LabManager<R> {
	runtime: Availability<R>,
	ports: PortAllocator,
	limits: Limits
}

impl<R: ContainerRuntime> LabManager<R> {
	pub async fn connect(runtime: R, ports: PortAllocator) -> Self {
		let runtime = match runtime.ping().await {
			Ok(()) => {
				log::info!("container runtime is reachable");
				Availability::Ready(runtime)
			},
			Err(e) => {
				log::error!("container runtime unavailable, labs are disabled: {e}");
				Availability::Unavailable(e.to_string())
			}
		};

		Self {
			runtime,
			ports,
			limits: LAB_LIMITS
		}
	}

	pub fn is_available(&self) -> bool {
		matches!(self.runtime, Availability::Ready(_))
	}

	fn runtime(&self) -> Result<&R, LabError> {
		match &self.runtime {
			Availability::Ready(runtime) => Ok(runtime),
			Availability::Unavailable(reason) => Err(LabError::RuntimeFailure(reason.clone()))
		}
	}

	/// the user's container row, after deleting it if the container is gone
	async fn live_row<S: Store>(&self, store: &S, user: UserId) -> Result<Option<ActiveContainer>, LabError> {
		let Some(row) = store.active_container(user).await? else {
			return Ok(None);
		};

		let status = match self.runtime() {
			Ok(runtime) => runtime.status(&row.container_id).await,
			Err(_) => Err(RuntimeError::Unavailable(String::from("runtime not connected")))
		};

		match status {
			Ok(ContainerStatus::Running) => Ok(Some(row)),
			Ok(status) => {
				log::warn!("container {:?} of user {user} is {status:?}, forgetting it", row.container_id);
				store.delete_container(user, row.challenge_id).await?;
				Ok(None)
			},
			// we can't tell, so the row stays until a probe succeeds
			Err(e) => {
				log::warn!("couldn't probe container {:?} of user {user}: {e}", row.container_id);
				Ok(Some(row))
			}
		}
	}

	async fn stop_quietly(runtime: &R, id: &str) {
		match tokio::time::timeout(STOP_DEADLINE, runtime.stop(id, STOP_TIMEOUT)).await {
			Ok(Ok(())) => log::info!("stopped container {id:?}"),
			Ok(Err(e)) => log::warn!("failed to stop container {id:?}: {e}"),
			Err(_) => log::warn!("stopping container {id:?} timed out")
		}
	}

	/// starts a container on a fresh port, retrying when the runtime finds the port taken
	async fn start(&self, runtime: &R, image: &str, container_port: u16) -> Result<(String, PortReservation), LabError> {
		// ports the runtime refused stay reserved until we're done so we don't draw them again
		let mut refused = Vec::new();

		for _ in 0..ALLOCATION_ROUNDS {
			let reservation = self.ports.allocate().ok_or(LabError::NoPort)?;
			let spec = RunSpec {
				image: String::from(image),
				container_port,
				host_port: reservation.port(),
				limits: self.limits
			};

			match runtime.run(&spec).await {
				Ok(id) => return Ok((id, reservation)),
				Err(RuntimeError::PortInUse) => {
					log::warn!("host port {} turned out to be in use, picking another", reservation.port());
					refused.push(reservation);
				},
				Err(e) => return Err(LabError::RuntimeFailure(e.to_string()))
			}
		}

		Err(LabError::NoPort)
	}

	pub async fn provision<S: Store>(&self, store: &S, user: UserId, challenge: &Challenge, now: DateTime<Utc>) -> Result<LabHandle, LabError> {
		let (image, container_port) = challenge.lab_target().ok_or(LabError::NoImage)?;

		if let Some(row) = self.live_row(store, user).await? {
			return match row.challenge_id == challenge.id {
				true => LabHandle::of(&row),
				false => Err(LabError::AlreadyRunningElsewhere)
			};
		}

		let runtime = self.runtime()?;
		let (container_id, reservation) = self.start(runtime, image, container_port).await?;

		let row = ActiveContainer {
			user_id: user,
			challenge_id: challenge.id,
			container_id,
			host_port: reservation.port().into(),
			started_at: now
		};

		match store.insert_container(row.clone()).await {
			Ok(()) => {
				log::info!("user {user} started lab {:?} for challenge {} on port {}", row.container_id, challenge.id, row.host_port);
				LabHandle::of(&row)
			},
			Err(e) => {
				Self::stop_quietly(runtime, &row.container_id).await;

				let StoreError::Conflict(_) = e else {
					return Err(e.into());
				};

				// a concurrent provision for this user won, which is fine if it was for this challenge
				match store.active_container(user).await? {
					Some(winner) if winner.challenge_id == challenge.id => LabHandle::of(&winner),
					_ => Err(LabError::AlreadyRunningElsewhere)
				}
			}
		}
	}

	pub async fn terminate<S: Store>(&self, store: &S, user: UserId, challenge: ChallengeId) -> Result<(), LabError> {
		let row = match store.active_container(user).await? {
			Some(row) if row.challenge_id == challenge => row,
			_ => return Ok(())
		};

		match self.runtime() {
			Ok(runtime) => Self::stop_quietly(runtime, &row.container_id).await,
			Err(e) => log::warn!("can't stop container {:?}: {e}", row.container_id)
		}

		store.delete_container(user, challenge).await?;
		Ok(())
	}

	/// the user's running lab for this challenge, if any
	pub async fn current<S: Store>(&self, store: &S, user: UserId, challenge: ChallengeId) -> Result<Option<LabHandle>, LabError> {
		match self.live_row(store, user).await? {
			Some(row) if row.challenge_id == challenge => Ok(Some(LabHandle::of(&row)?)),
			_ => Ok(None)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use crate::store::MemoryStore;
	use crate::testing::{FakeRuntime, lab_challenge};

	async fn manager(runtime: &Arc<FakeRuntime>) -> LabManager<Arc<FakeRuntime>> {
		LabManager::connect(runtime.clone(), PortAllocator::default()).await
	}

	#[tokio::test]
	async fn provision_is_idempotent_per_challenge() {
		let runtime = Arc::new(FakeRuntime::default());
		let labs = manager(&runtime).await;
		let store = MemoryStore::default();
		let challenge = lab_challenge(1);

		let first = labs.provision(&store, 7, &challenge, Utc::now()).await.unwrap();
		let second = labs.provision(&store, 7, &challenge, Utc::now()).await.unwrap();

		assert_eq!(first.host_port, second.host_port);
		assert!(crate::ports::LAB_PORT_RANGE.contains(&first.host_port));
		assert_eq!(runtime.state().runs.len(), 1);

		let state = runtime.state();
		let spec = &state.runs[0];
		assert_eq!(spec.limits, LAB_LIMITS);
		assert_eq!(spec.container_port, 5000);
	}

	#[tokio::test]
	async fn one_lab_per_user() {
		let runtime = Arc::new(FakeRuntime::default());
		let labs = manager(&runtime).await;
		let store = MemoryStore::default();

		labs.provision(&store, 7, &lab_challenge(1), Utc::now()).await.unwrap();
		let result = labs.provision(&store, 7, &lab_challenge(2), Utc::now()).await;

		assert!(matches!(result, Err(LabError::AlreadyRunningElsewhere)));
		assert_eq!(runtime.state().runs.len(), 1);
	}

	#[tokio::test]
	async fn challenges_without_image_have_no_lab() {
		let runtime = Arc::new(FakeRuntime::default());
		let labs = manager(&runtime).await;
		let store = MemoryStore::default();

		let mut challenge = lab_challenge(1);
		challenge.docker_image = Some(String::from("  "));

		assert!(matches!(labs.provision(&store, 7, &challenge, Utc::now()).await, Err(LabError::NoImage)));
		assert!(runtime.state().runs.is_empty());
	}

	#[tokio::test]
	async fn dead_containers_are_forgotten() {
		let runtime = Arc::new(FakeRuntime::default());
		let labs = manager(&runtime).await;
		let store = MemoryStore::default();

		labs.provision(&store, 7, &lab_challenge(1), Utc::now()).await.unwrap();
		let id = store.active_container(7).await.unwrap().unwrap().container_id;
		runtime.kill(&id);

		assert_eq!(labs.current(&store, 7, 1).await.unwrap(), None);
		assert_eq!(store.container_count().unwrap(), 0);

		// and the user is free to start something else
		labs.provision(&store, 7, &lab_challenge(2), Utc::now()).await.unwrap();
	}

	#[tokio::test]
	async fn port_conflicts_pick_another_port() {
		let runtime = Arc::new(FakeRuntime::default());
		runtime.fail_next_run(RuntimeError::PortInUse);
		let labs = manager(&runtime).await;
		let store = MemoryStore::default();

		let handle = labs.provision(&store, 7, &lab_challenge(1), Utc::now()).await.unwrap();

		let state = runtime.state();
		let runs = &state.runs;
		assert_eq!(runs.len(), 2);
		assert_ne!(runs[0].host_port, runs[1].host_port);
		assert_eq!(handle.host_port, runs[1].host_port);
	}

	#[tokio::test]
	async fn persistent_port_conflicts_give_up() {
		let runtime = Arc::new(FakeRuntime::default());
		for _ in 0..ALLOCATION_ROUNDS {
			runtime.fail_next_run(RuntimeError::PortInUse);
		}
		let labs = manager(&runtime).await;
		let store = MemoryStore::default();

		assert!(matches!(labs.provision(&store, 7, &lab_challenge(1), Utc::now()).await, Err(LabError::NoPort)));
		assert_eq!(store.container_count().unwrap(), 0);
	}

	#[tokio::test]
	async fn runtime_failures_persist_nothing() {
		let runtime = Arc::new(FakeRuntime::default());
		runtime.fail_next_run(RuntimeError::ImageNotFound);
		let labs = manager(&runtime).await;
		let store = MemoryStore::default();

		assert!(matches!(labs.provision(&store, 7, &lab_challenge(1), Utc::now()).await, Err(LabError::RuntimeFailure(_))));
		assert_eq!(store.container_count().unwrap(), 0);
	}

	#[tokio::test]
	async fn terminate_forgets_the_row_even_if_stop_fails() {
		let runtime = Arc::new(FakeRuntime::default());
		let labs = manager(&runtime).await;
		let store = MemoryStore::default();

		labs.provision(&store, 7, &lab_challenge(1), Utc::now()).await.unwrap();
		runtime.state().failing_stops = true;

		labs.terminate(&store, 7, 1).await.unwrap();
		assert_eq!(store.container_count().unwrap(), 0);
		assert_eq!(runtime.state().stops.len(), 1);
	}

	#[tokio::test]
	async fn concurrent_starts_of_one_lab_share_it() {
		let runtime = Arc::new(FakeRuntime::default());
		runtime.state().yielding_runs = true;
		let labs = manager(&runtime).await;
		let store = MemoryStore::default();
		let challenge = lab_challenge(1);
		let now = Utc::now();

		let (a, b) = tokio::join!(
			labs.provision(&store, 7, &challenge, now),
			labs.provision(&store, 7, &challenge, now)
		);
		let (a, b) = (a.unwrap(), b.unwrap());

		assert_eq!(a.host_port, b.host_port);
		assert_eq!(store.container_count().unwrap(), 1);

		// both started a container, the loser's is stopped again
		let state = runtime.state();
		assert_eq!(state.runs.len(), 2);
		assert_eq!(state.stops.len(), 1);
		assert_eq!(state.containers.len(), 1);
	}

	#[tokio::test]
	async fn concurrent_starts_of_different_labs_keep_one() {
		let runtime = Arc::new(FakeRuntime::default());
		runtime.state().yielding_runs = true;
		let labs = manager(&runtime).await;
		let store = MemoryStore::default();
		let now = Utc::now();

		let (challenge_1, challenge_2) = (lab_challenge(1), lab_challenge(2));
		let (a, b) = tokio::join!(
			labs.provision(&store, 7, &challenge_1, now),
			labs.provision(&store, 7, &challenge_2, now)
		);

		let outcomes = [a, b];
		assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
		assert!(outcomes.iter().any(|r| matches!(r, Err(LabError::AlreadyRunningElsewhere))));
		assert_eq!(store.container_count().unwrap(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn terminate_gives_up_on_a_hung_stop() {
		let runtime = Arc::new(FakeRuntime::default());
		let labs = manager(&runtime).await;
		let store = MemoryStore::default();

		labs.provision(&store, 7, &lab_challenge(1), Utc::now()).await.unwrap();
		runtime.state().hanging_stops = true;

		let started = tokio::time::Instant::now();
		labs.terminate(&store, 7, 1).await.unwrap();

		assert!(started.elapsed() >= STOP_DEADLINE);
		assert_eq!(store.container_count().unwrap(), 0);
		assert_eq!(runtime.state().stops.len(), 1);
	}

	#[tokio::test]
	async fn unreachable_runtime_disables_labs() {
		let runtime = Arc::new(FakeRuntime::unreachable());
		let labs = manager(&runtime).await;
		let store = MemoryStore::default();

		assert!(!labs.is_available());
		assert!(matches!(labs.provision(&store, 7, &lab_challenge(1), Utc::now()).await, Err(LabError::RuntimeFailure(_))));
	}
}
