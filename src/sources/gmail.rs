//! Cursor-paged processor for Gmail-like sources. The concrete provider
//! client lives outside this crate; this module carries the processor's
//! control flow plus a mock source used by tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::engine::processor::{
    derive_key, list_existing_keys, upload_if_new, upload_placeholder, Processor, ProcessorInput,
};
use crate::error::OrchestratorError;

use super::{CursorPage, CursorPagedSource, SourceItem};

/// Drives a `CursorPagedSource` through the shared processor responsibilities:
/// placeholder, dedup, key derivation, idempotent upload. One instance lives
/// in the `ProcessorRegistry` under method `"gmail"`.
pub struct GmailProcessor {
    source: Arc<dyn CursorPagedSource>,
    bucket: String,
    default_label_filter: Option<String>,
    page_size: i64,
    empty_page_streak_limit: u32,
}

impl GmailProcessor {
    pub fn new(
        source: Arc<dyn CursorPagedSource>,
        bucket: impl Into<String>,
        page_size: i64,
        empty_page_streak_limit: u32,
    ) -> Self {
        Self {
            source,
            bucket: bucket.into(),
            default_label_filter: None,
            page_size,
            empty_page_streak_limit,
        }
    }

    pub fn with_default_label_filter(mut self, label: impl Into<String>) -> Self {
        self.default_label_filter = Some(label.into());
        self
    }
}

#[async_trait]
impl Processor for GmailProcessor {
    async fn run(&self, input: ProcessorInput) -> Result<(), OrchestratorError> {
        let job_name = input.job.name.clone();
        upload_placeholder(&*input.object_store, &self.bucket, &job_name).await?;
        let mut existing = list_existing_keys(&*input.object_store, &self.bucket, &job_name).await?;

        let label_filter = input
            .job
            .input_data
            .get("label")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .or_else(|| self.default_label_filter.clone());

        let mut cursor = input.task_memory.next_page_cursor().await;
        let mut empty_streak: u32 = 0;

        loop {
            input.heartbeat.beat().await?;

            let page = self
                .source
                .list_page(cursor.as_deref(), self.page_size, label_filter.as_deref())
                .await?;

            let mut uploaded_any = false;
            for item in &page.items {
                input.heartbeat.beat().await?;

                let key = derive_key(&job_name, &item.sender, &item.subject, &item.id, "gmail");
                match serde_json::to_vec(&item.payload) {
                    Ok(bytes) => {
                        match upload_if_new(&*input.object_store, &self.bucket, &key, bytes, &mut existing)
                            .await
                        {
                            Ok(true) => {
                                uploaded_any = true;
                                input.task_memory.add_synced(1).await;
                            }
                            Ok(false) => {}
                            Err(e) => tracing::warn!("gmail: upload failed for {key}: {e}"),
                        }
                    }
                    Err(e) => tracing::warn!("gmail: serialize failed for {key}: {e}"),
                }
            }

            empty_streak = if uploaded_any { 0 } else { empty_streak + 1 };

            match page.next_cursor {
                None => {
                    input.task_memory.set_next_page_cursor(None).await;
                    return Ok(());
                }
                Some(next) => {
                    input.task_memory.set_next_page_cursor(Some(next.clone())).await;
                    cursor = Some(next);
                }
            }

            if empty_streak > self.empty_page_streak_limit {
                input.task_memory.set_next_page_cursor(None).await;
                return Ok(());
            }
        }
    }
}

/// Fixed sequence of pages, consumed in order regardless of the cursor value
/// handed in — good enough for unit tests and scenario fixtures.
pub struct MockGmailSource {
    pages: Mutex<VecDeque<CursorPage>>,
}

impl MockGmailSource {
    pub fn new(pages: Vec<CursorPage>) -> Self {
        Self {
            pages: Mutex::new(pages.into_iter().collect()),
        }
    }
}

#[async_trait]
impl CursorPagedSource for MockGmailSource {
    async fn list_page(
        &self,
        _cursor: Option<&str>,
        _page_size: i64,
        _filter: Option<&str>,
    ) -> Result<CursorPage, OrchestratorError> {
        let mut pages = self.pages.lock().await;
        Ok(pages.pop_front().unwrap_or(CursorPage {
            items: Vec::new(),
            next_cursor: None,
        }))
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
            sender: "a@example.com".to_string(),
            subject: "weekly digest".to_string(),
            received_at: Utc::now(),
            payload: serde_json::json!({"id": id}),
        }
    }

    fn job() -> Job {
        Job {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            name: "mail-backup".into(),
            method: "gmail".into(),
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
    async fn uploads_every_item_across_pages_then_stops_on_empty_cursor() {
        let pages = vec![
            CursorPage {
                items: vec![item("1"), item("2")],
                next_cursor: Some("p2".into()),
            },
            CursorPage {
                items: vec![item("3"), item("4")],
                next_cursor: Some("p3".into()),
            },
            CursorPage {
                items: vec![item("5"), item("6")],
                next_cursor: None,
            },
        ];

        let source = Arc::new(MockGmailSource::new(pages));
        let object_store = Arc::new(InMemoryObjectStore::new());
        let processor = GmailProcessor::new(source, "bucket", 50, 20);

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
            .list_with_prefix("bucket", "mail-backup/")
            .await
            .unwrap();
        // 6 items + the placeholder.
        assert_eq!(keys.len(), 7);
        assert_eq!(task_memory.synced_count().await, 6);
        assert_eq!(task_memory.next_page_cursor().await, None);
    }
}
