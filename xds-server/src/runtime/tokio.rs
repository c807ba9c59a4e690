//! [`Runtime`] implementations for `tokio`.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::runtime::Runtime;

/// Spawns onto the current `tokio` runtime.
///
/// Must be used from within a runtime context. Timers honor
/// `tokio::time::pause`, which the session tests rely on.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioRuntime;

impl Runtime for TokioRuntime {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Spawns sessions onto a specific runtime, e.g. a dedicated one kept apart
/// from the publisher's.
impl Runtime for Handle {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Handle::spawn(self, future);
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_follows_paused_clock() {
        let start = tokio::time::Instant::now();
        TokioRuntime.sleep(Duration::from_secs(30)).await;
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_handle_spawns_on_its_runtime() {
        let (tx, rx) = oneshot::channel();
        Runtime::spawn(&Handle::current(), async move {
            let _ = tx.send(());
        });
        rx.await.unwrap();
    }
}
