use std::future::Future;
use std::sync::Arc;
use core::time::Duration;
use thiserror::Error;

/// resources every lab container is started with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
	/// swap is capped at the same value
	pub memory_bytes: i64,
	pub nano_cpus: i64
}

pub const LAB_LIMITS: Limits = Limits {
	memory_bytes: 128 * 1024 * 1024,
	nano_cpus: 5 * 10_i64.pow(8) // 0.5 CPUs
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
	pub image: String,
	pub container_port: u16,
	pub host_port: u16,
	pub limits: Limits
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
	Running,
	Stopped,
	NotFound
}

#[derive(Debug, Error)]
pub enum RuntimeError {
	#[error("container runtime unavailable: {0}")]
	Unavailable(String),
	#[error("host port is already in use")]
	PortInUse,
	#[error("image not found")]
	ImageNotFound,
	#[error("runtime is at its instance limit")]
	Busy,
	#[error("invalid request: {0}")]
	InvalidRequest(&'static str),
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("response not OK, received code {0} instead")]
	Response(u8),
	#[error("malformed response")]
	Malformed,
	#[error("no answer within {0:?}")]
	TimedOut(Duration)
}

/// Whatever actually starts and stops lab containers.
///
/// `run` returns the runtime's container id. Stopping a container that no
/// longer exists is not an error.
pub trait ContainerRuntime: Send + Sync + 'static {
	fn ping(&self) -> impl Future<Output = Result<(), RuntimeError>> + Send;

	fn run(&self, spec: &RunSpec) -> impl Future<Output = Result<String, RuntimeError>> + Send;

	fn stop(&self, id: &str, timeout: Duration) -> impl Future<Output = Result<(), RuntimeError>> + Send;

	fn status(&self, id: &str) -> impl Future<Output = Result<ContainerStatus, RuntimeError>> + Send;
}

impl<R: ContainerRuntime> ContainerRuntime for Arc<R> {
	fn ping(&self) -> impl Future<Output = Result<(), RuntimeError>> + Send {
		(**self).ping()
	}

	fn run(&self, spec: &RunSpec) -> impl Future<Output = Result<String, RuntimeError>> + Send {
		(**self).run(spec)
	}

	fn stop(&self, id: &str, timeout: Duration) -> impl Future<Output = Result<(), RuntimeError>> + Send {
		(**self).stop(id, timeout)
	}

	fn status(&self, id: &str) -> impl Future<Output = Result<ContainerStatus, RuntimeError>> + Send {
		(**self).status(id)
	}
}
