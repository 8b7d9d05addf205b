use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::engine::processor::{HeartBeat, ProcessorInput, TaskMemoryHandle};
use crate::engine::registry::ProcessorRegistry;
use crate::engine::store::JobStore;
use crate::error::OrchestratorError;
use crate::models::{Job, MessageStatus, Task, TaskOutcome};
use crate::sources::ObjectStore;

/// Claims pending/failed-retryable tasks, transitions them to *running*,
/// invokes the registered processor, and reports the outcome.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    registry: ProcessorRegistry,
    object_store: Arc<dyn ObjectStore>,
    max_retries: i32,
    heartbeat_throttle: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: ProcessorRegistry,
        object_store: Arc<dyn ObjectStore>,
        max_retries: i32,
        heartbeat_throttle: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            object_store,
            max_retries,
            heartbeat_throttle,
        }
    }

    /// Claim and run every eligible task, stopping when none remain or
    /// shutdown is requested.
    pub async fn run_once(&self, shutdown: &watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let claimed = match self.store.claim_next_task(self.max_retries).await {
                Ok(Some(pair)) => pair,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("dispatcher: claim_next_task failed: {e}");
                    break;
                }
            };

            self.process_task(claimed, shutdown.clone()).await;
        }
    }

    async fn process_task(&self, claimed: (Task, Job), cancelled: watch::Receiver<bool>) {
        let (task, job) = claimed;

        let Some(processor) = self.registry.get(&job.method) else {
            let err = OrchestratorError::MethodNotRegistered(job.method.clone());
            let msg = err.user_message();
            tracing::warn!(task_id = %task.id, method = %job.method, "{msg}");
            if let Err(e) = self
                .store
                .finalize_task(
                    task.id,
                    TaskOutcome::Failed,
                    msg.clone(),
                    None,
                    msg,
                    MessageStatus::Error,
                    err.increments_retry_count(),
                )
                .await
            {
                tracing::error!(task_id = %task.id, "dispatcher: finalize_task failed: {e}");
            }
            return;
        };

        let store_for_heartbeat = Arc::clone(&self.store);
        let heartbeat = Arc::new(HeartBeat::new(
            task.id,
            self.heartbeat_throttle,
            cancelled,
            move |task_id| {
                let store = Arc::clone(&store_for_heartbeat);
                Box::pin(async move { store.record_heartbeat(task_id).await })
            },
        ));

        let task_memory = TaskMemoryHandle::new(job.task_memory.clone());

        tracing::info!(task_id = %task.id, job_id = %job.id, method = %job.method, "dispatching task");

        let input = ProcessorInput {
            job: job.clone(),
            task_memory: task_memory.clone(),
            heartbeat,
            object_store: Arc::clone(&self.object_store),
        };

        let result = processor.run(input).await;
        let memory_patch = task_memory.snapshot().await;

        let (outcome, task_message, job_message, job_status, increment_retry) = match result {
            Ok(()) => (
                TaskOutcome::Success,
                "completed successfully".to_string(),
                format!("Automatic backup completed for {}", job.name),
                MessageStatus::Info,
                false,
            ),
            Err(e) => {
                let msg = e.user_message();
                (
                    TaskOutcome::Failed,
                    msg.clone(),
                    msg,
                    MessageStatus::Error,
                    e.increments_retry_count(),
                )
            }
        };

        if let Err(e) = self
            .store
            .finalize_task(
                task.id,
                outcome,
                task_message,
                Some(memory_patch),
                job_message,
                job_status,
                increment_retry,
            )
            .await
        {
            tracing::error!(task_id = %task.id, "dispatcher: finalize_task failed: {e}");
        }
    }

    pub async fn run(&self, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = interval.tick() => self.run_once(&shutdown).await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("dispatcher: shutting down");
                        break;
                    }
                }
            }
        }
    }
}
