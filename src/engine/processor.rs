use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::models::Job;
use crate::sources::ObjectStore;

/// Per-source strategy that turns a job into object-store writes.
/// Implementations should be cheap to construct — one instance per
/// `method` lives in the `ProcessorRegistry` for the life of the process.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn run(&self, input: ProcessorInput) -> Result<(), OrchestratorError>;
}

/// Bound to one task id; throttles DB writes to at most one per
/// `throttle` (default 30s) and turns dispatcher-side cancellation into an
/// error the processor is required to propagate.
pub struct HeartBeat {
    task_id: Uuid,
    write: Box<dyn Fn(Uuid) -> futures::future::BoxFuture<'static, Result<(), OrchestratorError>> + Send + Sync>,
    last_write: Mutex<Option<Instant>>,
    throttle: Duration,
    cancelled: watch::Receiver<bool>,
}

impl HeartBeat {
    pub fn new(
        task_id: Uuid,
        throttle: Duration,
        cancelled: watch::Receiver<bool>,
        write: impl Fn(Uuid) -> futures::future::BoxFuture<'static, Result<(), OrchestratorError>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            task_id,
            write: Box::new(write),
            last_write: Mutex::new(None),
            throttle,
            cancelled,
        }
    }

    /// Call at every natural progress point. Returns an error when the
    /// engine wants the processor to abort gracefully.
    pub async fn beat(&self) -> Result<(), OrchestratorError> {
        if *self.cancelled.borrow() {
            return Err(OrchestratorError::Cancelled);
        }

        let mut last = self.last_write.lock().await;
        let due = match *last {
            None => true,
            Some(t) => t.elapsed() >= self.throttle,
        };
        if due {
            (self.write)(self.task_id).await?;
            *last = Some(Instant::now());
        }
        Ok(())
    }
}

/// Mutable handle over a job's `task_memory` — the free-form state a source
/// adapter persists between runs (page cursor, counts, whatever it needs).
/// Shared (`Arc<Mutex<_>>`) so the dispatcher retains a reference after
/// handing ownership of `ProcessorInput` into `Processor::run`, and can read
/// back whatever the processor left behind regardless of outcome.
#[derive(Clone)]
pub struct TaskMemoryHandle {
    inner: Arc<Mutex<serde_json::Value>>,
}

impl TaskMemoryHandle {
    pub fn new(initial: serde_json::Value) -> Self {
        let initial = if initial.is_object() {
            initial
        } else {
            serde_json::json!({})
        };
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    pub async fn next_page_cursor(&self) -> Option<String> {
        self.inner
            .lock()
            .await
            .get("next_page_cursor")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    pub async fn set_next_page_cursor(&self, cursor: Option<String>) {
        let mut guard = self.inner.lock().await;
        set_field(&mut guard, "next_page_cursor", json_opt_str(cursor));
    }

    pub async fn synced_count(&self) -> u64 {
        self.inner
            .lock()
            .await
            .get("synced_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    /// Never decreases across the life of a job.
    pub async fn add_synced(&self, n: u64) {
        let mut guard = self.inner.lock().await;
        let current = guard
            .get("synced_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        set_field(&mut guard, "synced_count", serde_json::json!(current + n));
    }

    pub async fn skip_count(&self) -> i64 {
        self.inner
            .lock()
            .await
            .get("skip_count")
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }

    pub async fn set_skip_count(&self, v: i64) {
        let mut guard = self.inner.lock().await;
        set_field(&mut guard, "skip_count", serde_json::json!(v));
    }

    pub async fn page_limit(&self, default: i64) -> i64 {
        self.inner
            .lock()
            .await
            .get("limit")
            .and_then(|v| v.as_i64())
            .unwrap_or(default)
    }

    pub async fn set_page_limit(&self, v: i64) {
        let mut guard = self.inner.lock().await;
        set_field(&mut guard, "limit", serde_json::json!(v));
    }

    /// Full snapshot handed to `JobStore::finalize_task` as the task-memory
    /// patch.
    pub async fn snapshot(&self) -> serde_json::Value {
        self.inner.lock().await.clone()
    }
}

fn set_field(value: &mut serde_json::Value, key: &str, new_value: serde_json::Value) {
    if let Some(obj) = value.as_object_mut() {
        obj.insert(key.to_string(), new_value);
    }
}

fn json_opt_str(v: Option<String>) -> serde_json::Value {
    match v {
        Some(s) => serde_json::Value::String(s),
        None => serde_json::Value::Null,
    }
}

/// Everything `Processor::run` needs to do its work.
pub struct ProcessorInput {
    pub job: Job,
    pub task_memory: TaskMemoryHandle,
    pub heartbeat: Arc<HeartBeat>,
    pub object_store: Arc<dyn ObjectStore>,
}

impl ProcessorInput {
    /// `input_data` forwarded verbatim — opaque to the engine.
    pub fn source_credentials(&self) -> &serde_json::Value {
        &self.job.input_data
    }
}

// ─── Shared processor responsibilities ─────────────────────────────────

/// #1: guarantee the "folder" exists so prefix-listing succeeds.
pub async fn upload_placeholder(
    store: &dyn ObjectStore,
    bucket: &str,
    job_name: &str,
) -> Result<(), OrchestratorError> {
    let key = format!("{job_name}/.file_placeholder");
    store.upload(bucket, &key, Vec::new()).await
}

/// #2: the de-duplication oracle.
pub async fn list_existing_keys(
    store: &dyn ObjectStore,
    bucket: &str,
    job_name: &str,
) -> Result<HashSet<String>, OrchestratorError> {
    let prefix = format!("{job_name}/");
    store.list_with_prefix(bucket, &prefix).await
}

/// #3: idempotent key derivation. Forward slashes inside the item-derived
/// tail are replaced with underscores so a sender/subject containing `/`
/// can't fabricate spurious path segments under the job's prefix.
pub fn derive_key(job_name: &str, sender: &str, subject: &str, item_id: &str, tag: &str) -> String {
    let tail = format!("{sender} - {subject} - {item_id}.{tag}").replace('/', "_");
    format!("{job_name}/{tail}")
}

/// #4: upload only if the key isn't already present; on success, records the
/// key in `existing` so subsequent items in the same run see it too.
pub async fn upload_if_new(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    bytes: Vec<u8>,
    existing: &mut HashSet<String>,
) -> Result<bool, OrchestratorError> {
    if existing.contains(key) {
        return Ok(false);
    }
    store.upload(bucket, key, bytes).await?;
    existing.insert(key.to_string());
    Ok(true)
}
