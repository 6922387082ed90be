use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const LAB_PORT_RANGE: RangeInclusive<u16> = 20000..=29999;
/// random candidates tried per allocation before giving up
pub const MAX_CANDIDATES: usize = 10;

/// Hands out host ports for lab containers.
///
/// A port stays reserved in-process for as long as its [`PortReservation`] is alive,
/// so two concurrent provisions never try the same port. The runtime's own bind is
/// still the final word.
#[derive(Debug, Clone)]
pub struct PortAllocator {
	range: RangeInclusive<u16>,
	reserved: Arc<Mutex<HashSet<u16>>>
}

impl Default for PortAllocator {
	fn default() -> Self {
		Self::new(LAB_PORT_RANGE)
	}
}

impl PortAllocator {
	pub fn new(range: RangeInclusive<u16>) -> Self {
		Self {
			range,
			reserved: Arc::default()
		}
	}

	fn reserved(&self) -> MutexGuard<'_, HashSet<u16>> {
		self.reserved.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn candidate(&self) -> Option<u16> {
		let (start, end) = (*self.range.start() as u32, *self.range.end() as u32);
		if start > end {
			return None;
		}

		let offset = getrandom::u32().ok()? % (end - start + 1);
		u16::try_from(start + offset).ok()
	}

	pub fn allocate(&self) -> Option<PortReservation> {
		for _ in 0..MAX_CANDIDATES {
			let Some(port) = self.candidate() else {
				break;
			};

			// hold the lock across the probe so a concurrent allocation can't pick the same port
			let mut reserved = self.reserved();
			if reserved.contains(&port) || !bindable(port) {
				continue;
			}

			reserved.insert(port);
			return Some(PortReservation {
				port,
				reserved: self.reserved.clone()
			});
		}

		None
	}

	pub fn is_reserved(&self, port: u16) -> bool {
		self.reserved().contains(&port)
	}
}

fn bindable(port: u16) -> bool {
	TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}

#[derive(Debug)]
pub struct PortReservation {
	port: u16,
	reserved: Arc<Mutex<HashSet<u16>>>
}

impl PortReservation {
	pub fn port(&self) -> u16 {
		self.port
	}
}

impl Drop for PortReservation {
	fn drop(&mut self) {
		self.reserved.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.port);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	/// a port the OS just proved free
	fn free_port() -> u16 {
		TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap().local_addr().unwrap().port()
	}

	#[test]
	fn allocates_inside_the_range() {
		let port = PortAllocator::default().allocate().unwrap().port();
		assert!(LAB_PORT_RANGE.contains(&port));
	}

	#[test]
	fn reserved_ports_are_skipped_until_released() {
		let port = free_port();
		let ports = PortAllocator::new(port..=port);

		let reservation = ports.allocate().unwrap();
		assert_eq!(reservation.port(), port);
		assert!(ports.is_reserved(port));
		assert!(ports.allocate().is_none());

		drop(reservation);
		assert!(!ports.is_reserved(port));
		assert_eq!(ports.allocate().unwrap().port(), port);
	}

	#[test]
	fn bound_ports_are_skipped() {
		let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
		let port = listener.local_addr().unwrap().port();

		assert!(PortAllocator::new(port..=port).allocate().is_none());
	}
}
