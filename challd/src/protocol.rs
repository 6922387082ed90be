//! Request parsing and response encoding for the challd socket.
//!
//! A request is one opcode byte followed by a little-endian body. Every
//! response starts with a result byte; only OK responses carry a payload.

use tokio::io::{AsyncRead, AsyncReadExt};
use crate::container::{Limits, Status};
use crate::ports::PortMappings;

pub const RESULT_OK: u8 = 0;
pub const RESULT_MALFORMED_REQUEST: u8 = 1;
pub const RESULT_INVALID_PORT: u8 = 2;
pub const RESULT_BUSY: u8 = 3;
pub const RESULT_PORT_IN_USE: u8 = 4;
pub const RESULT_IMAGE_NOT_FOUND: u8 = 5;
pub const RESULT_RUNTIME_ERROR: u8 = 6;

const OP_PING: u8 = 0;
const OP_RUN: u8 = 1;
const OP_STOP: u8 = 2;
const OP_STATUS: u8 = 3;

const STATUS_RUNNING: u8 = 0;
const STATUS_STOPPED: u8 = 1;
const STATUS_NOT_FOUND: u8 = 2;

#[derive(Debug, PartialEq, Eq)]
pub enum Request {
	Ping,
	Run {
		image: String,
		ports: PortMappings,
		limits: Limits
	},
	Stop {
		id: String,
		timeout_secs: u16
	},
	Status {
		id: String
	}
}

macro_rules! handle_error {
	($f:expr, on_error=$e:ident) => {
		match $f {
			Ok(v) => v,
			Err(_) => return Err($e)
		}
	};
	($f:expr, on_none=$e:ident) => {
		match $f {
			Some(v) => v,
			None => return Err($e)
		}
	}
}

async fn read_string<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, u8> {
	let len = handle_error!(stream.read_u8().await, on_error=RESULT_MALFORMED_REQUEST);

	let mut buf = vec![0; len as usize];
	handle_error!(stream.read_exact(&mut buf).await, on_error=RESULT_MALFORMED_REQUEST);

	match String::from_utf8(buf) {
		Ok(s) if !s.is_empty() => Ok(s),
		_ => Err(RESULT_MALFORMED_REQUEST)
	}
}

/// On failure, returns the result code to send back.
pub async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Request, u8> {
	let op = handle_error!(stream.read_u8().await, on_error=RESULT_MALFORMED_REQUEST);

	match op {
		OP_PING => Ok(Request::Ping),
		OP_RUN => {
			let image = read_string(stream).await?;
			let ports = handle_error!(PortMappings::read(stream).await, on_none=RESULT_INVALID_PORT);
			let memory_bytes = handle_error!(stream.read_i64_le().await, on_error=RESULT_MALFORMED_REQUEST);
			let nano_cpus = handle_error!(stream.read_i64_le().await, on_error=RESULT_MALFORMED_REQUEST);

			if memory_bytes <= 0 || nano_cpus <= 0 {
				return Err(RESULT_MALFORMED_REQUEST);
			}

			Ok(Request::Run {
				image,
				ports,
				limits: Limits {
					memory_bytes,
					nano_cpus
				}
			})
		},
		OP_STOP => {
			let id = read_string(stream).await?;
			let timeout_secs = handle_error!(stream.read_u16_le().await, on_error=RESULT_MALFORMED_REQUEST);
			Ok(Request::Stop { id, timeout_secs })
		},
		OP_STATUS => Ok(Request::Status {
			id: read_string(stream).await?
		}),
		_ => Err(RESULT_MALFORMED_REQUEST)
	}
}

pub fn container_id(id: &str) -> Vec<u8> {
	let Ok(len) = u8::try_from(id.len()) else {
		log::error!("container id {id:?} doesn't fit in a response");
		return vec![RESULT_RUNTIME_ERROR];
	};

	let mut response = Vec::with_capacity(2 + id.len());
	response.push(RESULT_OK);
	response.push(len);
	response.extend(id.as_bytes());
	response
}

pub fn status(status: Status) -> Vec<u8> {
	vec![RESULT_OK, match status {
		Status::Running => STATUS_RUNNING,
		Status::Stopped => STATUS_STOPPED,
		Status::NotFound => STATUS_NOT_FOUND
	}]
}

#[cfg(test)]
mod tests {
	use super::*;

	fn run_request(image: &[u8], memory: i64, nano_cpus: i64) -> Vec<u8> {
		let mut message = vec![OP_RUN, image.len() as u8];
		message.extend(image);
		message.push(1);
		message.extend(5000u16.to_le_bytes());
		message.extend(20001u16.to_le_bytes());
		message.push(0);
		message.extend(memory.to_le_bytes());
		message.extend(nano_cpus.to_le_bytes());
		message
	}

	#[tokio::test]
	async fn parses_run() {
		let message = run_request(b"wan-net/ping-rce:latest", 128 * 1024 * 1024, 500_000_000);

		match read_request(&mut message.as_slice()).await.unwrap() {
			Request::Run { image, limits, .. } => {
				assert_eq!(image, "wan-net/ping-rce:latest");
				assert_eq!(limits, Limits {
					memory_bytes: 128 * 1024 * 1024,
					nano_cpus: 500_000_000
				});
			},
			other => panic!("unexpected request {other:?}")
		}
	}

	#[tokio::test]
	async fn refuses_unlimited_containers() {
		let message = run_request(b"nginx", 0, 500_000_000);
		assert_eq!(read_request(&mut message.as_slice()).await, Err(RESULT_MALFORMED_REQUEST));

		let message = run_request(b"nginx", 1024, -1);
		assert_eq!(read_request(&mut message.as_slice()).await, Err(RESULT_MALFORMED_REQUEST));
	}

	#[tokio::test]
	async fn bad_ports_get_their_own_code() {
		let mut message = vec![OP_RUN, 5];
		message.extend(b"nginx");
		message.push(0);
		assert_eq!(read_request(&mut message.as_slice()).await, Err(RESULT_INVALID_PORT));
	}

	#[tokio::test]
	async fn parses_stop_and_status() {
		let message = [OP_STOP, 3, b'a', b'b', b'c', 2, 0];
		assert_eq!(read_request(&mut message.as_slice()).await, Ok(Request::Stop {
			id: String::from("abc"),
			timeout_secs: 2
		}));

		let message = [OP_STATUS, 3, b'a', b'b', b'c'];
		assert_eq!(read_request(&mut message.as_slice()).await, Ok(Request::Status {
			id: String::from("abc")
		}));
	}

	#[tokio::test]
	async fn rejects_garbage() {
		assert_eq!(read_request(&mut [9u8].as_slice()).await, Err(RESULT_MALFORMED_REQUEST));
		assert_eq!(read_request(&mut [OP_STATUS, 0].as_slice()).await, Err(RESULT_MALFORMED_REQUEST));
		assert_eq!(read_request(&mut [OP_STATUS, 4, 0xff, 0xfe, 0xfd, 0xfc].as_slice()).await, Err(RESULT_MALFORMED_REQUEST));
		assert_eq!(read_request(&mut [0u8; 0].as_slice()).await, Err(RESULT_MALFORMED_REQUEST));
	}

	#[test]
	fn encodes_responses() {
		assert_eq!(container_id("abc"), vec![RESULT_OK, 3, b'a', b'b', b'c']);
		assert_eq!(container_id(&"a".repeat(300)), vec![RESULT_RUNTIME_ERROR]);
		assert_eq!(status(Status::NotFound), vec![RESULT_OK, STATUS_NOT_FOUND]);
	}
}
