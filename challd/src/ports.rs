use tokio::io::{AsyncRead, AsyncReadExt};
use bollard::models::PortBinding;
use std::collections::HashMap;

/// most mappings a single request may carry
pub const MAX_MAPPINGS: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
	Tcp,
	Udp
}

impl PortType {
	fn as_string(&self, port: u16) -> String {
		match self {
			Self::Tcp => format!("{port}/tcp"),
			Self::Udp => format!("{port}/udp")
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
	pub container_port: u16,
	pub host_port: u16,
	pub port_type: PortType
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMappings(Vec<PortMapping>);

impl PortMappings {
	/// `None` if the mappings are malformed or name a port we won't publish
	pub async fn read<S: AsyncRead + Unpin>(stream: &mut S) -> Option<Self> {
		let num_mappings = stream.read_u8().await.ok()?;

		if num_mappings == 0 || num_mappings >= MAX_MAPPINGS {
			return None;
		}

		let mut mappings = Vec::with_capacity(num_mappings as usize);

		for _ in 0..num_mappings {
			let container_port = stream.read_u16_le().await.ok()?;
			let host_port = stream.read_u16_le().await.ok()?;
			let port_type = match stream.read_u8().await.ok()? {
				0 => PortType::Tcp,
				1 => PortType::Udp,
				_ => return None
			};

			// privileged host ports are off limits
			if container_port == 0 || host_port < 1024 {
				return None;
			}

			mappings.push(PortMapping {
				container_port,
				host_port,
				port_type
			});
		}

		Some(Self(mappings))
	}

	pub fn into_hashmap(self) -> HashMap<String, Option<Vec<PortBinding>>> {
		let mut hashmap = HashMap::with_capacity(self.0.len());

		for mapping in self.0.into_iter() {
			let binding = PortBinding {
				host_ip: Some(String::from("0.0.0.0")),
				host_port: Some(mapping.host_port.to_string())
			};

			hashmap.insert(mapping.port_type.as_string(mapping.container_port), Some(vec![binding]));
		}

		hashmap
	}
}
