use bollard::{Docker, errors::Error, models::HostConfig};
use bollard::models::{ContainerCreateBody, ContainerStateStatusEnum, RestartPolicy, RestartPolicyNameEnum};
use bollard::query_parameters::{StartContainerOptions, WaitContainerOptions, CreateContainerOptions, InspectContainerOptions, StopContainerOptions, RemoveContainerOptions, ListContainersOptions};
use futures_util::StreamExt;
use std::collections::HashMap;
use thiserror::Error;
use crate::ports::PortMappings;

/// resources requested by the client, already validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
	pub memory_bytes: i64,
	pub nano_cpus: i64
}

/// marks the containers we started so a restarted daemon can find them again
pub const LAB_LABEL: &str = "challd.lab";

#[derive(Debug, Error)]
pub enum CreateError {
	#[error("image not found")]
	ImageNotFound,
	#[error("host port already in use")]
	PortInUse,
	#[error("docker error: {0}")]
	Docker(#[from] Error)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
	Running,
	Stopped,
	NotFound
}

fn is_port_conflict(message: &str) -> bool {
	let message = message.to_ascii_lowercase();
	message.contains("port is already allocated") || message.contains("address already in use")
}

fn classify(e: Error) -> CreateError {
	match e {
		Error::DockerResponseServerError { status_code: 404, .. } => CreateError::ImageNotFound,
		Error::DockerResponseServerError { ref message, .. } if is_port_conflict(message) => CreateError::PortInUse,
		e => CreateError::Docker(e)
	}
}

pub struct Container {
	id: String,
	docker: Docker
}

impl Container {
	pub async fn create(docker: &Docker, image_name: String, ports: PortMappings, limits: Limits) -> Result<Self, CreateError> {
		let id = docker.create_container(None::<CreateContainerOptions>, ContainerCreateBody {
			image: Some(image_name),
			labels: Some(HashMap::from([(String::from(LAB_LABEL), String::from("1"))])),
			host_config: Some(HostConfig {
				auto_remove: Some(true),
				memory: Some(limits.memory_bytes),
				memory_swap: Some(limits.memory_bytes),
				nano_cpus: Some(limits.nano_cpus),
				pids_limit: Some(150), // limit fork bomb trolling
				restart_policy: Some(RestartPolicy {
					name: Some(RestartPolicyNameEnum::NO),
					maximum_retry_count: None
				}),
				port_bindings: Some(ports.into_hashmap()),
				#[cfg(feature = "gvisor")]
				runtime: Some(String::from("runsc")),
				..Default::default()
			}),
			..Default::default()
		}).await.map_err(classify)?.id;

		if let Err(e) = docker.start_container(&id, None::<StartContainerOptions>).await {
			// a created but never started container isn't auto-removed
			let remove = RemoveContainerOptions {
				force: true,
				..Default::default()
			};
			if let Err(e) = docker.remove_container(&id, Some(remove)).await {
				log::warn!("failed to remove unstartable container {id:?}: {e}");
			}

			return Err(classify(e));
		}

		Ok(Self {
			id,
			docker: docker.clone()
		})
	}

	/// takes over a container started by an earlier run of the daemon
	pub fn adopt(docker: &Docker, id: String) -> Self {
		Self {
			id,
			docker: docker.clone()
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	/// resolves once the container is no longer running
	pub fn shutdown_signal(&self) -> impl core::future::Future<Output = ()> + Send + 'static {
		let docker = self.docker.clone();
		let id = self.id.clone();

		async move {
			let mut shutdown_stream = docker.wait_container(&id, Some(WaitContainerOptions {
				condition: String::from("not-running")
			}));

			while shutdown_stream.next().await.is_some() {
				// eat all events, wait for stream to terminate
			}
		}
	}
}

/// running lab containers as (id, creation time in unix seconds)
pub async fn running_labs(docker: &Docker) -> Result<Vec<(String, Option<i64>)>, Error> {
	let options = ListContainersOptions {
		filters: Some(HashMap::from([(String::from("label"), vec![String::from(LAB_LABEL)])])),
		..Default::default()
	};

	Ok(docker.list_containers(Some(options)).await?
		.into_iter()
		.filter_map(|summary| Some((summary.id?, summary.created)))
		.collect())
}

/// a container that's already gone counts as stopped
pub async fn stop(docker: &Docker, id: &str, timeout_secs: u16) -> Result<(), Error> {
	let options = StopContainerOptions {
		t: Some(i32::from(timeout_secs)),
		..Default::default()
	};

	match docker.stop_container(id, Some(options)).await {
		Ok(()) => Ok(()),
		Err(Error::DockerResponseServerError { status_code: 304 | 404, .. }) => {
			log::debug!("container {id:?} was already stopped");
			Ok(())
		},
		Err(e) => Err(e)
	}
}

pub async fn status(docker: &Docker, id: &str) -> Result<Status, Error> {
	match docker.inspect_container(id, None::<InspectContainerOptions>).await {
		Ok(info) => Ok(match info.state.and_then(|s| s.status) {
			Some(ContainerStateStatusEnum::RUNNING | ContainerStateStatusEnum::RESTARTING) => Status::Running,
			_ => Status::Stopped
		}),
		Err(Error::DockerResponseServerError { status_code: 404, .. }) => Ok(Status::NotFound),
		Err(e) => Err(e)
	}
}
