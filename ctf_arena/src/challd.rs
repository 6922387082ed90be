//! Client for `challd`, the daemon that owns the Docker connection.
//!
//! Every request is a single exchange over a fresh unix socket connection: one
//! opcode byte, the little-endian request body, then a result byte followed by
//! the op-specific payload when the result is OK.

use std::future::Future;
use std::path::PathBuf;
use core::time::Duration;
use tokio::net::UnixStream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use crate::runtime::{ContainerRuntime, ContainerStatus, RunSpec, RuntimeError};

const OP_PING: u8 = 0;
const OP_RUN: u8 = 1;
const OP_STOP: u8 = 2;
const OP_STATUS: u8 = 3;

const RESPONSE_OK: u8 = 0;
const RESPONSE_BUSY: u8 = 3;
const RESPONSE_PORT_IN_USE: u8 = 4;
const RESPONSE_IMAGE_NOT_FOUND: u8 = 5;

const PORT_TCP: u8 = 0;

const STATUS_RUNNING: u8 = 0;
const STATUS_STOPPED: u8 = 1;
const STATUS_NOT_FOUND: u8 = 2;

pub const DEFAULT_SOCKET: &str = "/etc/challd/challd.sock";

/// status probes sit on request paths, a hung daemon must not stall them
pub const STATUS_DEADLINE: Duration = Duration::from_secs(5);
/// creating and starting a container takes a while on a busy host
pub const RUN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ChalldClient {
	socket: PathBuf
}

impl ChalldClient {
	pub fn new(socket: impl Into<PathBuf>) -> Self {
		Self {
			socket: socket.into()
		}
	}

	async fn send(&self, message: &[u8]) -> Result<UnixStream, RuntimeError> {
		let mut conn = UnixStream::connect(&self.socket).await.map_err(|e| {
			RuntimeError::Unavailable(format!("{}: {e}", self.socket.display()))
		})?;

		conn.write_all(message).await?;
		Ok(conn)
	}
}

async fn bounded<T>(deadline: Duration, exchange: impl Future<Output = Result<T, RuntimeError>>) -> Result<T, RuntimeError> {
	tokio::time::timeout(deadline, exchange).await.map_err(|_| RuntimeError::TimedOut(deadline))?
}

fn push_str(message: &mut Vec<u8>, s: &str, what: &'static str) -> Result<(), RuntimeError> {
	let len: u8 = s.len().try_into().map_err(|_| RuntimeError::InvalidRequest(what))?;
	message.push(len);
	message.extend(s.as_bytes());
	Ok(())
}

pub fn encode_run(spec: &RunSpec) -> Result<Vec<u8>, RuntimeError> {
	let mut message = Vec::with_capacity(
		1 + // op
		1 + spec.image.len() + // image
		1 + 5 + // one tcp mapping
		8 + 8 // limits
	);

	message.push(OP_RUN);
	push_str(&mut message, &spec.image, "image name too long")?;
	message.push(1);
	message.extend(spec.container_port.to_le_bytes());
	message.extend(spec.host_port.to_le_bytes());
	message.push(PORT_TCP);
	message.extend(spec.limits.memory_bytes.to_le_bytes());
	message.extend(spec.limits.nano_cpus.to_le_bytes());

	Ok(message)
}

pub fn encode_stop(id: &str, timeout: Duration) -> Result<Vec<u8>, RuntimeError> {
	let mut message = Vec::with_capacity(1 + 1 + id.len() + 2);
	message.push(OP_STOP);
	push_str(&mut message, id, "container id too long")?;
	message.extend(u16::try_from(timeout.as_secs()).unwrap_or(u16::MAX).to_le_bytes());
	Ok(message)
}

pub fn encode_status(id: &str) -> Result<Vec<u8>, RuntimeError> {
	let mut message = Vec::with_capacity(1 + 1 + id.len());
	message.push(OP_STATUS);
	push_str(&mut message, id, "container id too long")?;
	Ok(message)
}

pub async fn read_result<S: AsyncRead + Unpin>(stream: &mut S) -> Result<(), RuntimeError> {
	match stream.read_u8().await? {
		RESPONSE_OK => Ok(()),
		RESPONSE_BUSY => Err(RuntimeError::Busy),
		RESPONSE_PORT_IN_USE => Err(RuntimeError::PortInUse),
		RESPONSE_IMAGE_NOT_FOUND => Err(RuntimeError::ImageNotFound),
		code => {
			log::error!("received error {code:?} from challd");
			Err(RuntimeError::Response(code))
		}
	}
}

pub async fn read_container_id<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, RuntimeError> {
	read_result(stream).await?;

	let len = stream.read_u8().await?;
	let mut buf = vec![0; len as usize];
	stream.read_exact(&mut buf).await?;

	match String::from_utf8(buf) {
		Ok(id) if !id.is_empty() => Ok(id),
		_ => Err(RuntimeError::Malformed)
	}
}

pub async fn read_status<S: AsyncRead + Unpin>(stream: &mut S) -> Result<ContainerStatus, RuntimeError> {
	read_result(stream).await?;

	match stream.read_u8().await? {
		STATUS_RUNNING => Ok(ContainerStatus::Running),
		STATUS_STOPPED => Ok(ContainerStatus::Stopped),
		STATUS_NOT_FOUND => Ok(ContainerStatus::NotFound),
		_ => Err(RuntimeError::Malformed)
	}
}

impl ContainerRuntime for ChalldClient {
	async fn ping(&self) -> Result<(), RuntimeError> {
		let mut conn = self.send(&[OP_PING]).await?;
		read_result(&mut conn).await
	}

	async fn run(&self, spec: &RunSpec) -> Result<String, RuntimeError> {
		let message = encode_run(spec)?;

		// if this times out challd may still start the container, its lifetime cap reaps it
		bounded(RUN_DEADLINE, async {
			let mut conn = self.send(&message).await?;
			read_container_id(&mut conn).await
		}).await
	}

	async fn stop(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
		let message = encode_stop(id, timeout)?;
		let mut conn = self.send(&message).await?;
		read_result(&mut conn).await
	}

	async fn status(&self, id: &str) -> Result<ContainerStatus, RuntimeError> {
		let message = encode_status(id)?;

		bounded(STATUS_DEADLINE, async {
			let mut conn = self.send(&message).await?;
			read_status(&mut conn).await
		}).await
	}
}
