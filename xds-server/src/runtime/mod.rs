//! Async runtime abstraction used by session workers.

use std::future::Future;
use std::time::Duration;

#[cfg(feature = "rt-tokio")]
pub mod tokio;

/// Spawning and timers, as needed by the session manager.
///
/// Each accepted session runs as one spawned task; nack retries are
/// scheduled with [`Runtime::sleep`].
pub trait Runtime: Send + Sync + Clone + 'static {
    /// Run `future` in the background.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Complete after `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}
