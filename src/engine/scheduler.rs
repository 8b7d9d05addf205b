use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use crate::engine::store::JobStore;

/// Timer-driven selection of due jobs and creation of pending tasks.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    batch: i64,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, batch: i64) -> Self {
        Self { store, batch }
    }

    /// One tick: select due jobs and insert one pending task per job.
    /// Errors are logged and do not abort the tick — scheduling is
    /// idempotent, so the next tick will pick up anything missed.
    pub async fn run_once(&self) {
        let now = Utc::now();

        let due = match self.store.list_jobs_to_schedule(now, self.batch).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!("scheduler: failed to list due jobs: {e}");
                return;
            }
        };

        for job in due {
            match self.store.insert_pending_task(job.id, now).await {
                Ok(()) => {
                    tracing::info!(job_id = %job.id, job_name = %job.name, "scheduled task");
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, "scheduler: failed to insert task: {e}");
                }
            }
        }
    }

    /// Run forever on `tick`, until `shutdown` reports true.
    pub async fn run(&self, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = interval.tick() => self.run_once().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("scheduler: shutting down");
                        break;
                    }
                }
            }
        }
    }
}
