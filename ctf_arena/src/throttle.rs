use chrono::{DateTime, TimeDelta, Utc};

/// wrong submissions tolerated per (user, challenge) inside one window
pub const MAX_FAILURES: usize = 5;
pub const WINDOW_SECS: i64 = 60;

/// Sliding-window limiter over the attempt log.
///
/// The throttle itself is stateless: the store counts failed attempts newer than
/// [`Throttle::window_start`] and the throttle decides. A throttled submission is
/// never logged, so waiting out the window always works.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
	window_secs: i64,
	max_failures: usize
}

impl Default for Throttle {
	fn default() -> Self {
		Self::new(WINDOW_SECS, MAX_FAILURES)
	}
}

impl Throttle {
	pub const fn new(window_secs: i64, max_failures: usize) -> Self {
		Self {
			window_secs,
			max_failures
		}
	}

	/// failures at or after this instant count against the user
	pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
		now - TimeDelta::seconds(self.window_secs)
	}

	pub fn counts(&self, created_at: DateTime<Utc>, is_correct: bool, now: DateTime<Utc>) -> bool {
		!is_correct && created_at >= self.window_start(now)
	}

	pub fn allows(&self, recent_failures: usize) -> bool {
		recent_failures < self.max_failures
	}
}
