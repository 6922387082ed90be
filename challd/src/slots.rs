use std::sync::atomic::{AtomicBool, Ordering};

/// Caps how many containers run at once.
pub struct Slots {
	used: Vec<AtomicBool>
}

impl Slots {
	pub fn new(max_instances: usize) -> Self {
		Self {
			used: (0..max_instances).map(|_| AtomicBool::new(false)).collect()
		}
	}

	pub fn take(&self) -> Option<usize> {
		self.used.iter().position(|used| !used.swap(true, Ordering::AcqRel))
	}

	pub fn release(&self, slot: usize) {
		if let Some(used) = self.used.get(slot) {
			used.store(false, Ordering::Release);
		}
	}

	pub fn in_use(&self) -> usize {
		self.used.iter().filter(|used| used.load(Ordering::Acquire)).count()
	}
}
