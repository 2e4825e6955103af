//! Per-session background timers.
//!
//! Each session gets a [`SessionScheduler`] holding a child of the server's
//! shutdown token. Every timer spawned through it stops when the session is
//! removed or the server shuts down, whichever comes first.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::runtime::{TaskSpawner, TokioSpawner};

/// Timers owned by one session.
#[derive(Clone)]
pub struct SessionScheduler {
    session_id: String,
    token: CancellationToken,
    spawner: TokioSpawner,
}

impl SessionScheduler {
    /// Creates a scheduler cancelled together with `parent`.
    pub fn new(session_id: &str, parent: &CancellationToken, spawner: TokioSpawner) -> Self {
        Self {
            session_id: session_id.to_string(),
            token: parent.child_token(),
            spawner,
        }
    }

    /// Runs `task` every `period` until it breaks or the session is cancelled.
    ///
    /// The first run happens immediately. Slow runs delay the next one
    /// instead of bursting to catch up.
    pub fn spawn_interval<F, Fut>(&self, label: &'static str, period: Duration, mut task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let token = self.token.clone();
        let session_id = self.session_id.clone();
        self.spawner.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if task().await.is_break() {
                            break;
                        }
                    }
                }
            }
            log::debug!("[Scheduler] {} timer stopped for session {}", label, session_id);
        });
    }

    /// Runs `task` once after `delay`, unless the session is cancelled first.
    pub fn spawn_after<Fut>(&self, label: &'static str, delay: Duration, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        let session_id = self.session_id.clone();
        self.spawner.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    log::debug!("[Scheduler] {} cancelled for session {}", label, session_id);
                }
                _ = tokio::time::sleep(delay) => task.await,
            }
        });
    }

    /// Stops every timer of this session.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
