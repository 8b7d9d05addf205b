//! Offset-paged processor for Outlook-like sources. The concrete provider
//! client lives outside this crate; this module carries the processor's
//! control flow plus a mock source used by tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::engine::pool::WorkerPool;
use crate::engine::processor::{
    derive_key, list_existing_keys, upload_placeholder, Processor, ProcessorInput,
};
use crate::error::OrchestratorError;

use super::{OffsetPagedSource, SourceItem};

/// Drives an `OffsetPagedSource` through the shared processor
/// responsibilities, fetching the full form of each listed item before
/// upload. Per-item `get_full` + upload fans out across a bounded
/// `WorkerPool` since these are the I/O-heavy calls this processor shape
/// makes per item. One instance lives in the `ProcessorRegistry` under
/// method `"outlook"`.
pub struct OutlookProcessor {
    source: Arc<dyn OffsetPagedSource>,
    bucket: String,
    default_page_size: i64,
    empty_page_streak_limit: u32,
    worker_pool_size: usize,
}

impl OutlookProcessor {
    pub fn new(
        source: Arc<dyn OffsetPagedSource>,
        bucket: impl Into<String>,
        default_page_size: i64,
        empty_page_streak_limit: u32,
        worker_pool_size: usize,
    ) -> Self {
        Self {
            source,
            bucket: bucket.into(),
            default_page_size,
            empty_page_streak_limit,
            worker_pool_size,
        }
    }
}

#[async_trait]
impl Processor for OutlookProcessor {
    async fn run(&self, input: ProcessorInput) -> Result<(), OrchestratorError> {
        let job_name = input.job.name.clone();
        upload_placeholder(&*input.object_store, &self.bucket, &job_name).await?;
        let existing = list_existing_keys(&*input.object_store, &self.bucket, &job_name).await?;
        let existing = Arc::new(Mutex::new(existing));

        let mut skip = input.task_memory.skip_count().await;
        let limit = input.task_memory.page_limit(self.default_page_size).await;
        let mut empty_streak: u32 = 0;

        // One pool for the whole task, bounding total concurrent I/O rather
        // than concurrency per page.
        let pool = WorkerPool::new(self.worker_pool_size);
        // Fan-in of per-item errors via a mutex-protected slice.
        let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(AtomicBool::new(false));

        loop {
            input.heartbeat.beat().await?;

            let page = self.source.list_page(skip, limit).await?;
            let page_len = page.len() as i64;

            let uploaded_any = Arc::new(AtomicBool::new(false));
            let mut handles = Vec::with_capacity(page.len());

            for item in page {
                let source = Arc::clone(&self.source);
                let object_store = Arc::clone(&input.object_store);
                let bucket = self.bucket.clone();
                let job_name = job_name.clone();
                let task_memory = input.task_memory.clone();
                let heartbeat = Arc::clone(&input.heartbeat);
                let existing = Arc::clone(&existing);
                let errors = Arc::clone(&errors);
                let uploaded_any = Arc::clone(&uploaded_any);
                let cancelled = Arc::clone(&cancelled);

                let handle = pool
                    .submit_and_wait(async move {
                        if let Err(e) = heartbeat.beat().await {
                            cancelled.store(true, Ordering::SeqCst);
                            errors.lock().await.push(e.to_string());
                            return;
                        }

                        let full = match source.get_full(&item).await {
                            Ok(full) => full,
                            Err(e) => {
                                errors.lock().await.push(format!("get_full failed for {}: {e}", item.id));
                                return;
                            }
                        };

                        let key = derive_key(&job_name, &full.sender, &full.subject, &full.id, "outlook");
                        let bytes = match serde_json::to_vec(&full.payload) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                errors.lock().await.push(format!("serialize failed for {key}: {e}"));
                                return;
                            }
                        };

                        if existing.lock().await.contains(&key) {
                            return;
                        }
                        match object_store.upload(&bucket, &key, bytes).await {
                            Ok(()) => {
                                existing.lock().await.insert(key);
                                task_memory.add_synced(1).await;
                                uploaded_any.store(true, Ordering::SeqCst);
                            }
                            Err(e) => errors.lock().await.push(format!("upload failed for {key}: {e}")),
                        }
                    })
                    .await?;
                handles.push(handle);
            }

            for handle in handles {
                handle.wait().await;
            }

            for msg in errors.lock().await.drain(..) {
                tracing::warn!("outlook: {msg}");
            }

            if cancelled.load(Ordering::SeqCst) {
                pool.shutdown().await;
                return Err(OrchestratorError::Cancelled);
            }

            skip += page_len;
            input.task_memory.set_skip_count(skip).await;

            empty_streak = if uploaded_any.load(Ordering::SeqCst) { 0 } else { empty_streak + 1 };

            if page_len < limit {
                input.task_memory.set_skip_count(0).await;
                pool.wait().await;
                return Ok(());
            }

            if empty_streak > self.empty_page_streak_limit {
                input.task_memory.set_skip_count(0).await;
                pool.wait().await;
                return Ok(());
            }
        }
    }
}

/// Fixed sequence of pages, consumed strictly in order.
pub struct MockOutlookSource {
    pages: Mutex<VecDeque<Vec<SourceItem>>>,
}

impl MockOutlookSource {
    pub fn new(pages: Vec<Vec<SourceItem>>) -> Self {
        Self {
            pages: Mutex::new(pages.into_iter().collect()),
        }
    }
}

#[async_trait]
impl OffsetPagedSource for MockOutlookSource {
    async fn list_page(&self, _skip: i64, _limit: i64) -> Result<Vec<SourceItem>, OrchestratorError> {
        let mut pages = self.pages.lock().await;
        Ok(pages.pop_front().unwrap_or_default())
    }

    async fn get_full(&self, item: &SourceItem) -> Result<SourceItem, OrchestratorError> {
        Ok(item.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::processor::{HeartBeat, TaskMemoryHandle};
    use crate::models::{Interval, Job};
    use crate::sources::object_store::InMemoryObjectStore;
    use chrono::Utc;
    use tokio::sync::watch;
    use uuid::Uuid;

    fn item(id: &str) -> SourceItem {
        SourceItem {
            id: id.to_string(),
            sender: "b@example.com".to_string(),
            subject: "invoice".to_string(),
            received_at: Utc::now(),
            payload: serde_json::json!({"id": id}),
        }
    }

    fn job() -> Job {
        Job {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            name: "mail-backup-2".into(),
            method: "outlook".into(),
            interval: Interval::Daily,
            on_value: None,
            last_run: None,
            active: true,
            input_data: serde_json::json!({}),
            storx_token: "tok".into(),
            task_memory: serde_json::json!({}),
            message: None,
            message_status: None,
            deleted_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn terminates_on_short_page_and_resets_skip_count() {
        let pages = vec![
            vec![item("1"), item("2")],
            vec![item("3")], // shorter than limit -> last page
        ];
        let source = Arc::new(MockOutlookSource::new(pages));
        let object_store = Arc::new(InMemoryObjectStore::new());
        let processor = OutlookProcessor::new(source, "bucket", 2, 20, 4);

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let heartbeat = Arc::new(HeartBeat::new(Uuid::new_v4(), std::time::Duration::from_secs(30), cancel_rx, |_| {
            Box::pin(async { Ok(()) })
        }));
        let task_memory = TaskMemoryHandle::new(serde_json::json!({}));

        let input = ProcessorInput {
            job: job(),
            task_memory: task_memory.clone(),
            heartbeat,
            object_store: object_store.clone(),
        };

        processor.run(input).await.unwrap();

        let keys = object_store
            .list_with_prefix("bucket", "mail-backup-2/")
            .await
            .unwrap();
        assert_eq!(keys.len(), 4); // 3 items + placeholder
        assert_eq!(task_memory.synced_count().await, 3);
        assert_eq!(task_memory.skip_count().await, 0);
    }

    /// A source whose `get_full` fails for one fixed item id and records the
    /// peak number of concurrently in-flight `get_full` calls it observed.
    struct FlakySource {
        pages: Mutex<VecDeque<Vec<SourceItem>>>,
        failing_id: String,
        in_flight: std::sync::atomic::AtomicUsize,
        peak_in_flight: std::sync::atomic::AtomicUsize,
    }

    impl FlakySource {
        fn new(pages: Vec<Vec<SourceItem>>, failing_id: &str) -> Self {
            Self {
                pages: Mutex::new(pages.into_iter().collect()),
                failing_id: failing_id.to_string(),
                in_flight: std::sync::atomic::AtomicUsize::new(0),
                peak_in_flight: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OffsetPagedSource for FlakySource {
        async fn list_page(&self, _skip: i64, _limit: i64) -> Result<Vec<SourceItem>, OrchestratorError> {
            let mut pages = self.pages.lock().await;
            Ok(pages.pop_front().unwrap_or_default())
        }

        async fn get_full(&self, item: &SourceItem) -> Result<SourceItem, OrchestratorError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if item.id == self.failing_id {
                return Err(OrchestratorError::Processor("boom".into()));
            }
            Ok(item.clone())
        }
    }

    #[tokio::test]
    async fn fans_out_get_full_calls_and_isolates_single_item_errors() {
        let pages = vec![vec![item("1"), item("2"), item("3"), item("4")]];
        let source = Arc::new(FlakySource::new(pages, "2"));
        let object_store = Arc::new(InMemoryObjectStore::new());
        // Pool wide enough that all 4 items can run concurrently.
        let processor = OutlookProcessor::new(Arc::clone(&source) as Arc<dyn OffsetPagedSource>, "bucket", 10, 20, 8);

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let heartbeat = Arc::new(HeartBeat::new(Uuid::new_v4(), std::time::Duration::from_secs(30), cancel_rx, |_| {
            Box::pin(async { Ok(()) })
        }));
        let task_memory = TaskMemoryHandle::new(serde_json::json!({}));

        let input = ProcessorInput {
            job: job(),
            task_memory: task_memory.clone(),
            heartbeat,
            object_store: object_store.clone(),
        };

        // The single-item error (item "2") must not fail the task.
        processor.run(input).await.unwrap();

        let keys = object_store
            .list_with_prefix("bucket", "mail-backup-2/")
            .await
            .unwrap();
        // 3 uploaded items + placeholder; item "2" swallowed as a per-item error.
        assert_eq!(keys.len(), 4);
        assert_eq!(task_memory.synced_count().await, 3);
        assert!(
            source.peak_in_flight.load(std::sync::atomic::Ordering::SeqCst) > 1,
            "get_full calls for a page should overlap, not run strictly sequentially"
        );
    }
}
