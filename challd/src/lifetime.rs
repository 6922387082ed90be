use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use core::time::Duration;

/// Why a container's watch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum End {
	Expired,
	Shutdown,
	Exited
}

/// Runs `cleanup` once the container outlives `lifetime`, the daemon shuts down,
/// or the container exits on its own, whichever comes first.
pub fn watch<C, D, F>(
	tracker: &TaskTracker,
	cleanup: C,
	lifetime: Duration,
	token: CancellationToken,
	shutdown_signal: D
) where
	C: FnOnce(End) -> F + Send + 'static,
	D: core::future::Future<Output = ()> + Send + 'static,
	F: core::future::Future<Output = ()> + Send + 'static
{
	tracker.spawn(async move {
		let end = tokio::select! {
			_ = tokio::time::sleep(lifetime) => End::Expired,
			_ = token.cancelled() => End::Shutdown,
			_ = shutdown_signal => End::Exited
		};

		cleanup(end).await;
	});
}

/// what's left of `lifetime` for a container created at `created` (unix seconds)
///
/// An unknown or future creation time gets the full lifetime.
pub fn remaining(lifetime: Duration, created: Option<i64>, now: i64) -> Duration {
	match created {
		Some(created) if created <= now => lifetime.saturating_sub(Duration::from_secs(now.abs_diff(created))),
		_ => lifetime
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::sync::oneshot;

	#[test]
	fn adopted_containers_keep_their_age() {
		let lifetime = Duration::from_secs(4 * 60 * 60);

		assert_eq!(remaining(lifetime, Some(1_000), 1_000 + 60 * 60), Duration::from_secs(3 * 60 * 60));
		assert_eq!(remaining(lifetime, Some(1_000), 1_000 + 5 * 60 * 60), Duration::ZERO);
		assert_eq!(remaining(lifetime, None, 1_000), lifetime);
		assert_eq!(remaining(lifetime, Some(2_000), 1_000), lifetime);
	}

	async fn run_watch(lifetime: Duration, token: CancellationToken, exit: impl core::future::Future<Output = ()> + Send + 'static) -> End {
		let tracker = TaskTracker::new();
		let (tx, rx) = oneshot::channel();

		watch(&tracker, move |end| async move {
			let _ = tx.send(end);
		}, lifetime, token, exit);

		tracker.close();
		tracker.wait().await;
		rx.await.unwrap()
	}

	#[tokio::test(start_paused = true)]
	async fn expires_after_lifetime() {
		let end = run_watch(Duration::from_secs(4 * 60 * 60), CancellationToken::new(), std::future::pending()).await;
		assert_eq!(end, End::Expired);
	}

	#[tokio::test]
	async fn shutdown_cancels_the_watch() {
		let token = CancellationToken::new();
		token.cancel();

		let end = run_watch(Duration::from_secs(60), token, std::future::pending()).await;
		assert_eq!(end, End::Shutdown);
	}

	#[tokio::test]
	async fn early_exit_is_noticed() {
		let end = run_watch(Duration::from_secs(60), CancellationToken::new(), async {}).await;
		assert_eq!(end, End::Exited);
	}
}
