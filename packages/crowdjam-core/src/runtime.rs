//! Where session timers run.
//!
//! Tickers, genre countdowns and host grace timers go through a
//! [`TaskSpawner`] instead of calling `tokio::spawn`, so an embedding
//! application can hand in its own runtime handle.

use std::future::Future;

/// Spawns detached background tasks.
///
/// Tasks outlive the spawner; callers stop them with a `CancellationToken`.
pub trait TaskSpawner: Send + Sync {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Spawns onto a Tokio runtime.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Spawner for the runtime this is called from.
    ///
    /// # Panics
    ///
    /// Panics outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl From<tokio::runtime::Handle> for TokioSpawner {
    fn from(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn task_outlives_its_spawner() {
        let (tx, rx) = oneshot::channel();
        let spawner = TokioSpawner::from(tokio::runtime::Handle::current());
        spawner.spawn(async move {
            tokio::task::yield_now().await;
            let _ = tx.send("ABCD");
        });
        drop(spawner);

        assert_eq!(rx.await.unwrap(), "ABCD");
    }
}
