use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::models::{CreateJob, Job, MessageStatus, Task, TaskOutcome, TaskStatus, UpdateJob};

/// Durable CRUD over jobs and tasks, plus the transactional claim operations
/// the scheduling engine needs. Every mutating method here is a single
/// commit — no partial state is ever observable from the outside.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Selects the jobs due to run and flags them as queued in the same
    /// transaction. Leaves selected rows with `message = "push to queue"`.
    async fn list_jobs_to_schedule(
        &self,
        now: chrono::DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<Job>, OrchestratorError>;

    /// Insert one pending task for `job_id` and stamp `last_run`.
    async fn insert_pending_task(
        &self,
        job_id: Uuid,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), OrchestratorError>;

    /// Atomically claims the next eligible task and returns it together with
    /// its owning job (the dispatcher needs both in one shot).
    async fn claim_next_task(
        &self,
        max_retries: i32,
    ) -> Result<Option<(Task, Job)>, OrchestratorError>;

    /// Records a liveness signal for a running task.
    async fn record_heartbeat(&self, task_id: Uuid) -> Result<(), OrchestratorError>;

    /// Commits a task's terminal status, the retry increment, and the
    /// merged task-memory patch in one transaction.
    #[allow(clippy::too_many_arguments)]
    async fn finalize_task(
        &self,
        task_id: Uuid,
        outcome: TaskOutcome,
        task_message: String,
        task_memory_patch: Option<serde_json::Value>,
        job_message: String,
        job_message_status: MessageStatus,
        increment_retry: bool,
    ) -> Result<(), OrchestratorError>;

    /// Marks running tasks whose heartbeat has gone stale as failed. Returns
    /// the number of tasks marked failed.
    async fn mark_stuck_tasks(&self, threshold: Duration) -> Result<u64, OrchestratorError>;

    // ─── CRUD surface for the HTTP layer ───────────────────────────────

    async fn create_job(&self, input: CreateJob) -> Result<Job, OrchestratorError>;
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, OrchestratorError>;
    async fn list_jobs(&self, user_id: &str) -> Result<Vec<Job>, OrchestratorError>;
    async fn update_job(&self, id: Uuid, patch: UpdateJob) -> Result<Option<Job>, OrchestratorError>;
    async fn soft_delete_job(&self, id: Uuid) -> Result<bool, OrchestratorError>;
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, OrchestratorError>;
    async fn list_tasks_for_job(&self, job_id: Uuid) -> Result<Vec<Task>, OrchestratorError>;
}

/// Postgres-backed `JobStore`. Uses `SELECT ... FOR UPDATE SKIP LOCKED` for
/// `claim_next_task` so that any number of orchestrator processes can race
/// on the same queue safely — exactly one of them ever sees a given row.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn list_jobs_to_schedule(
        &self,
        now: chrono::DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<Job>, OrchestratorError> {
        let mut tx = self.pool.begin().await?;

        let candidates: Vec<Job> = sqlx::query_as(
            r#"SELECT * FROM jobs
               WHERE active = true
                 AND deleted_at IS NULL
                 AND (message IS NULL OR message <> 'push to queue')
                 AND (last_run IS NULL OR last_run <> $1::date)
                 AND NOT EXISTS (
                     SELECT 1 FROM tasks
                     WHERE tasks.cron_job_id = jobs.id
                       AND tasks.status IN ('pending', 'running')
                 )
               ORDER BY id
               LIMIT $2
               FOR UPDATE SKIP LOCKED"#,
        )
        .bind(now.date_naive())
        .bind(batch)
        .fetch_all(&mut *tx)
        .await?;

        let due: Vec<Job> = candidates
            .into_iter()
            .filter(|job| job.schedule_matches(now))
            .collect();

        for job in &due {
            sqlx::query(
                "UPDATE jobs SET message = 'push to queue', message_status = 'info' WHERE id = $1",
            )
            .bind(job.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(due)
    }

    async fn insert_pending_task(
        &self,
        job_id: Uuid,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO tasks (cron_job_id, status) VALUES ($1, 'pending')")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE jobs SET last_run = $2 WHERE id = $1")
            .bind(job_id)
            .bind(now.date_naive())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn claim_next_task(
        &self,
        max_retries: i32,
    ) -> Result<Option<(Task, Job)>, OrchestratorError> {
        let mut tx = self.pool.begin().await?;

        let task: Option<Task> = sqlx::query_as(
            r#"UPDATE tasks SET
                status = 'running', start_time = now(), last_heart_beat = now()
               WHERE id = (
                   SELECT tasks.id FROM tasks
                   JOIN jobs ON jobs.id = tasks.cron_job_id
                   WHERE jobs.active = true
                     AND jobs.deleted_at IS NULL
                     AND (
                         tasks.status = 'pending'
                         OR (tasks.status = 'failed' AND tasks.retry_count < $1)
                     )
                   ORDER BY tasks.created_at ASC
                   LIMIT 1
                   FOR UPDATE OF tasks SKIP LOCKED
               )
               RETURNING *"#,
        )
        .bind(max_retries)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(task) = task else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE jobs SET message = 'Automatic backup started', message_status = 'info' WHERE id = $1")
            .bind(task.cron_job_id)
            .execute(&mut *tx)
            .await?;

        let job: Job = sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(task.cron_job_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some((task, job)))
    }

    async fn record_heartbeat(&self, task_id: Uuid) -> Result<(), OrchestratorError> {
        sqlx::query("UPDATE tasks SET last_heart_beat = now() WHERE id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finalize_task(
        &self,
        task_id: Uuid,
        outcome: TaskOutcome,
        task_message: String,
        task_memory_patch: Option<serde_json::Value>,
        job_message: String,
        job_message_status: MessageStatus,
        increment_retry: bool,
    ) -> Result<(), OrchestratorError> {
        let status = match outcome {
            TaskOutcome::Success => "success",
            TaskOutcome::Failed => "failed",
        };

        let mut tx = self.pool.begin().await?;

        let row: (Uuid,) = sqlx::query_as(
            r#"UPDATE tasks SET
                status = $2,
                message = $3,
                execution_seconds = EXTRACT(EPOCH FROM (now() - start_time)),
                retry_count = retry_count + CASE WHEN $4 THEN 1 ELSE 0 END
               WHERE id = $1
               RETURNING cron_job_id"#,
        )
        .bind(task_id)
        .bind(status)
        .bind(&task_message)
        .bind(increment_retry)
        .fetch_one(&mut *tx)
        .await?;

        let job_id = row.0;

        if let Some(patch) = task_memory_patch {
            sqlx::query("UPDATE jobs SET task_memory = task_memory || $2 WHERE id = $1")
                .bind(job_id)
                .bind(patch)
                .execute(&mut *tx)
                .await?;
        }

        let message_status = match job_message_status {
            MessageStatus::Info => "info",
            MessageStatus::Warning => "warning",
            MessageStatus::Error => "error",
        };
        sqlx::query("UPDATE jobs SET message = $2, message_status = $3 WHERE id = $1")
            .bind(job_id)
            .bind(&job_message)
            .bind(message_status)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_stuck_tasks(&self, threshold: Duration) -> Result<u64, OrchestratorError> {
        let threshold_secs = threshold.as_secs() as f64;

        let mut tx = self.pool.begin().await?;

        let stuck: Vec<(Uuid, Uuid)> = sqlx::query_as(
            r#"UPDATE tasks SET
                status = 'failed',
                message = 'Process got stuck because of some reason. Marked as failed',
                execution_seconds = EXTRACT(EPOCH FROM (now() - start_time)),
                retry_count = retry_count + 1
               WHERE id IN (
                   SELECT id FROM tasks
                   WHERE status = 'running'
                     AND (last_heart_beat IS NULL OR last_heart_beat < now() - make_interval(secs => $1))
                   FOR UPDATE SKIP LOCKED
               )
               RETURNING id, cron_job_id"#,
        )
        .bind(threshold_secs)
        .fetch_all(&mut *tx)
        .await?;

        for (_, job_id) in &stuck {
            sqlx::query(
                "UPDATE jobs SET message = 'Process got stuck because of some reason. Marked as failed', message_status = 'error' WHERE id = $1",
            )
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(stuck.len() as u64)
    }

    async fn create_job(&self, input: CreateJob) -> Result<Job, OrchestratorError> {
        let job: Job = sqlx::query_as(
            r#"INSERT INTO jobs (user_id, name, method, interval, on_value, input_data, storx_token)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING *"#,
        )
        .bind(input.user_id)
        .bind(input.name)
        .bind(input.method)
        .bind(input.interval)
        .bind(input.on_value)
        .bind(input.input_data)
        .bind(input.storx_token)
        .fetch_one(&self.pool)
        .await?;
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, OrchestratorError> {
        let job = sqlx::query_as("SELECT * FROM jobs WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn list_jobs(&self, user_id: &str) -> Result<Vec<Job>, OrchestratorError> {
        let jobs = sqlx::query_as(
            "SELECT * FROM jobs WHERE user_id = $1 AND deleted_at IS NULL ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn update_job(&self, id: Uuid, patch: UpdateJob) -> Result<Option<Job>, OrchestratorError> {
        let job = sqlx::query_as(
            r#"UPDATE jobs SET
                active = COALESCE($2, active),
                interval = COALESCE($3, interval),
                on_value = CASE WHEN $4 THEN $5 ELSE on_value END,
                input_data = COALESCE($6, input_data),
                storx_token = COALESCE($7, storx_token)
               WHERE id = $1 AND deleted_at IS NULL
               RETURNING *"#,
        )
        .bind(id)
        .bind(patch.active)
        .bind(patch.interval)
        .bind(patch.on_value.is_some())
        .bind(patch.on_value.flatten())
        .bind(patch.input_data)
        .bind(patch.storx_token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    async fn soft_delete_job(&self, id: Uuid) -> Result<bool, OrchestratorError> {
        let result = sqlx::query("UPDATE jobs SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, OrchestratorError> {
        let task = sqlx::query_as("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    async fn list_tasks_for_job(&self, job_id: Uuid) -> Result<Vec<Task>, OrchestratorError> {
        let tasks = sqlx::query_as(
            "SELECT * FROM tasks WHERE cron_job_id = $1 ORDER BY created_at DESC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }
}

/// In-memory `JobStore` used by the property and scenario test suites so
/// they run without a live Postgres instance. Mirrors `PgJobStore`'s
/// semantics, guarded by a single `tokio::sync::Mutex` standing in for row
/// locks — sufficient because tests don't need cross-process fairness, only
/// the same observable state machine.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Inner {
        jobs: HashMap<Uuid, Job>,
        tasks: HashMap<Uuid, Task>,
        task_order: Vec<Uuid>,
    }

    pub struct InMemoryJobStore {
        inner: Mutex<Inner>,
    }

    impl Default for InMemoryJobStore {
        fn default() -> Self {
            Self {
                inner: Mutex::new(Inner::default()),
            }
        }
    }

    impl InMemoryJobStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Test helper: insert a fully-formed job directly.
        pub async fn seed_job(&self, job: Job) {
            let mut inner = self.inner.lock().await;
            inner.jobs.insert(job.id, job);
        }

        pub async fn job_snapshot(&self, id: Uuid) -> Option<Job> {
            self.inner.lock().await.jobs.get(&id).cloned()
        }

        pub async fn task_snapshot(&self, id: Uuid) -> Option<Task> {
            self.inner.lock().await.tasks.get(&id).cloned()
        }

        /// Test helper: overwrite a task row directly (e.g. to backdate a
        /// heartbeat for liveness tests).
        pub async fn seed_task(&self, task: Task) {
            let mut inner = self.inner.lock().await;
            inner.tasks.insert(task.id, task);
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn list_jobs_to_schedule(
            &self,
            now: chrono::DateTime<Utc>,
            batch: i64,
        ) -> Result<Vec<Job>, OrchestratorError> {
            let mut inner = self.inner.lock().await;
            let mut ids: Vec<Uuid> = inner.jobs.keys().copied().collect();
            ids.sort();

            let mut due = Vec::new();
            for id in ids {
                if due.len() as i64 >= batch {
                    break;
                }
                let job = inner.jobs.get(&id).unwrap();
                let already_queued = inner
                    .tasks
                    .values()
                    .any(|t| t.cron_job_id == id && matches!(t.status, TaskStatus::Pending | TaskStatus::Running));
                let eligible = job.active
                    && job.deleted_at.is_none()
                    && job.message.as_deref() != Some("push to queue")
                    && job.last_run != Some(now.date_naive())
                    && job.schedule_matches(now)
                    && !already_queued;
                if eligible {
                    due.push(id);
                }
            }

            for id in &due {
                let job = inner.jobs.get_mut(id).unwrap();
                job.message = Some("push to queue".to_string());
                job.message_status = Some(MessageStatus::Info);
            }

            Ok(due.into_iter().map(|id| inner.jobs[&id].clone()).collect())
        }

        async fn insert_pending_task(
            &self,
            job_id: Uuid,
            now: chrono::DateTime<Utc>,
        ) -> Result<(), OrchestratorError> {
            let mut inner = self.inner.lock().await;
            let task = Task {
                id: Uuid::new_v4(),
                cron_job_id: job_id,
                status: TaskStatus::Pending,
                start_time: None,
                last_heart_beat: None,
                execution_seconds: None,
                retry_count: 0,
                message: None,
                created_at: Utc::now(),
            };
            inner.task_order.push(task.id);
            inner.tasks.insert(task.id, task);
            if let Some(job) = inner.jobs.get_mut(&job_id) {
                job.last_run = Some(now.date_naive());
            }
            Ok(())
        }

        async fn claim_next_task(
            &self,
            max_retries: i32,
        ) -> Result<Option<(Task, Job)>, OrchestratorError> {
            let mut inner = self.inner.lock().await;
            let order = inner.task_order.clone();
            let mut claimed_id = None;
            for id in order {
                let eligible = {
                    let Some(task) = inner.tasks.get(&id) else {
                        continue;
                    };
                    let Some(job) = inner.jobs.get(&task.cron_job_id) else {
                        continue;
                    };
                    job.active
                        && job.deleted_at.is_none()
                        && (task.status == TaskStatus::Pending
                            || (task.status == TaskStatus::Failed && task.retry_count < max_retries))
                };
                if eligible {
                    claimed_id = Some(id);
                    break;
                }
            }

            let Some(id) = claimed_id else {
                return Ok(None);
            };

            let now = Utc::now();
            let job_id = {
                let task = inner.tasks.get_mut(&id).unwrap();
                task.status = TaskStatus::Running;
                task.start_time = Some(now);
                task.last_heart_beat = Some(now);
                task.cron_job_id
            };

            let job = inner.jobs.get_mut(&job_id).unwrap();
            job.message = Some("Automatic backup started".to_string());
            job.message_status = Some(MessageStatus::Info);
            let job = job.clone();
            let task = inner.tasks.get(&id).unwrap().clone();

            Ok(Some((task, job)))
        }

        async fn record_heartbeat(&self, task_id: Uuid) -> Result<(), OrchestratorError> {
            let mut inner = self.inner.lock().await;
            if let Some(task) = inner.tasks.get_mut(&task_id) {
                task.last_heart_beat = Some(Utc::now());
            }
            Ok(())
        }

        async fn finalize_task(
            &self,
            task_id: Uuid,
            outcome: TaskOutcome,
            task_message: String,
            task_memory_patch: Option<serde_json::Value>,
            job_message: String,
            job_message_status: MessageStatus,
            increment_retry: bool,
        ) -> Result<(), OrchestratorError> {
            let mut inner = self.inner.lock().await;
            let job_id = {
                let task = inner
                    .tasks
                    .get_mut(&task_id)
                    .ok_or_else(|| OrchestratorError::Processor("unknown task".into()))?;
                task.status = match outcome {
                    TaskOutcome::Success => TaskStatus::Success,
                    TaskOutcome::Failed => TaskStatus::Failed,
                };
                task.message = Some(task_message);
                if let Some(start) = task.start_time {
                    task.execution_seconds =
                        Some((Utc::now() - start).num_milliseconds() as f64 / 1000.0);
                }
                if increment_retry {
                    task.retry_count += 1;
                }
                task.cron_job_id
            };

            if let Some(job) = inner.jobs.get_mut(&job_id) {
                if let Some(patch) = task_memory_patch {
                    merge_json(&mut job.task_memory, &patch);
                }
                job.message = Some(job_message);
                job.message_status = Some(job_message_status);
            }

            Ok(())
        }

        async fn mark_stuck_tasks(&self, threshold: Duration) -> Result<u64, OrchestratorError> {
            let mut inner = self.inner.lock().await;
            let now = Utc::now();
            let chrono_threshold = chrono::Duration::from_std(threshold)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));

            let stuck_ids: Vec<Uuid> = inner
                .tasks
                .values()
                .filter(|t| {
                    t.status == TaskStatus::Running
                        && match t.last_heart_beat {
                            None => true,
                            Some(hb) => now - hb >= chrono_threshold,
                        }
                })
                .map(|t| t.id)
                .collect();

            for id in &stuck_ids {
                let job_id = {
                    let task = inner.tasks.get_mut(id).unwrap();
                    task.status = TaskStatus::Failed;
                    task.message =
                        Some("Process got stuck because of some reason. Marked as failed".to_string());
                    task.retry_count += 1;
                    if let Some(start) = task.start_time {
                        task.execution_seconds =
                            Some((now - start).num_milliseconds() as f64 / 1000.0);
                    }
                    task.cron_job_id
                };
                if let Some(job) = inner.jobs.get_mut(&job_id) {
                    job.message =
                        Some("Process got stuck because of some reason. Marked as failed".to_string());
                    job.message_status = Some(MessageStatus::Error);
                }
            }

            Ok(stuck_ids.len() as u64)
        }

        async fn create_job(&self, input: CreateJob) -> Result<Job, OrchestratorError> {
            let job = Job {
                id: Uuid::new_v4(),
                user_id: input.user_id,
                name: input.name,
                method: input.method,
                interval: input.interval,
                on_value: input.on_value,
                last_run: None,
                active: true,
                input_data: input.input_data,
                storx_token: input.storx_token,
                task_memory: serde_json::json!({}),
                message: None,
                message_status: None,
                deleted_at: None,
                created_at: Utc::now(),
            };
            let mut inner = self.inner.lock().await;
            inner.jobs.insert(job.id, job.clone());
            Ok(job)
        }

        async fn get_job(&self, id: Uuid) -> Result<Option<Job>, OrchestratorError> {
            Ok(self.inner.lock().await.jobs.get(&id).cloned())
        }

        async fn list_jobs(&self, user_id: &str) -> Result<Vec<Job>, OrchestratorError> {
            Ok(self
                .inner
                .lock()
                .await
                .jobs
                .values()
                .filter(|j| j.user_id == user_id && j.deleted_at.is_none())
                .cloned()
                .collect())
        }

        async fn update_job(&self, id: Uuid, patch: UpdateJob) -> Result<Option<Job>, OrchestratorError> {
            let mut inner = self.inner.lock().await;
            let Some(job) = inner.jobs.get_mut(&id) else {
                return Ok(None);
            };
            if let Some(active) = patch.active {
                job.active = active;
            }
            if let Some(interval) = patch.interval {
                job.interval = interval;
            }
            if let Some(on_value) = patch.on_value {
                job.on_value = on_value;
            }
            if let Some(input_data) = patch.input_data {
                job.input_data = input_data;
            }
            if let Some(storx_token) = patch.storx_token {
                job.storx_token = storx_token;
            }
            Ok(Some(job.clone()))
        }

        async fn soft_delete_job(&self, id: Uuid) -> Result<bool, OrchestratorError> {
            let mut inner = self.inner.lock().await;
            match inner.jobs.get_mut(&id) {
                Some(job) if job.deleted_at.is_none() => {
                    job.deleted_at = Some(Utc::now());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn get_task(&self, id: Uuid) -> Result<Option<Task>, OrchestratorError> {
            Ok(self.inner.lock().await.tasks.get(&id).cloned())
        }

        async fn list_tasks_for_job(&self, job_id: Uuid) -> Result<Vec<Task>, OrchestratorError> {
            Ok(self
                .inner
                .lock()
                .await
                .tasks
                .values()
                .filter(|t| t.cron_job_id == job_id)
                .cloned()
                .collect())
        }
    }

    fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
        if let (Some(base_obj), Some(patch_obj)) = (base.as_object_mut(), patch.as_object()) {
            for (k, v) in patch_obj {
                base_obj.insert(k.clone(), v.clone());
            }
        }
    }
}

pub use memory::InMemoryJobStore;
