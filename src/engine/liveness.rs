use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::engine::store::JobStore;

/// Periodically marks running tasks whose heartbeat is stale as failed.
/// Touches only `JobStore::mark_stuck_tasks` — never talks to processors
/// directly.
pub struct LivenessMonitor {
    store: Arc<dyn JobStore>,
    heartbeat_stale: Duration,
}

impl LivenessMonitor {
    pub fn new(store: Arc<dyn JobStore>, heartbeat_stale: Duration) -> Self {
        Self {
            store,
            heartbeat_stale,
        }
    }

    pub async fn run_once(&self) {
        match self.store.mark_stuck_tasks(self.heartbeat_stale).await {
            Ok(0) => {}
            Ok(n) => tracing::warn!(count = n, "liveness: marked stuck tasks as failed"),
            Err(e) => tracing::error!("liveness: mark_stuck_tasks failed: {e}"),
        }
    }

    pub async fn run(&self, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = interval.tick() => self.run_once().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("liveness monitor: shutting down");
                        break;
                    }
                }
            }
        }
    }
}
