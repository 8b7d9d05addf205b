//! External interfaces the engine depends on — source adapters and the
//! object store. Concrete provider clients (Gmail, Outlook, Drive, ...) and
//! a real object-store client live outside this crate; this module carries
//! the contracts plus mock implementations used by the bundled processors
//! and by tests.

pub mod gmail;
pub mod object_store;
pub mod outlook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// A single item retrieved from a source. Every source, regardless of
/// pagination shape, normalizes into this: a stable id, a sender/owner
/// string, a subject/title string, a received/created timestamp, and a
/// serialized payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// One page of a cursor-paged source (Gmail-like). `next_cursor = None`
/// means end of stream.
pub struct CursorPage {
    pub items: Vec<SourceItem>,
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait CursorPagedSource: Send + Sync {
    async fn list_page(
        &self,
        cursor: Option<&str>,
        page_size: i64,
        filter: Option<&str>,
    ) -> Result<CursorPage, OrchestratorError>;
}

/// One page of an offset-paged source (Outlook-like). `items.len() < limit`
/// means end of stream.
#[async_trait]
pub trait OffsetPagedSource: Send + Sync {
    async fn list_page(&self, skip: i64, limit: i64) -> Result<Vec<SourceItem>, OrchestratorError>;

    /// Fetch the full form of an item (with attachments) when the list view
    /// lacks the full payload. Optional — sources whose list view already
    /// carries the full payload can make this a no-op passthrough.
    async fn get_full(&self, item: &SourceItem) -> Result<SourceItem, OrchestratorError>;
}

/// Object-store contract. `bucket` is an opaque constant chosen by each
/// processor.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), OrchestratorError>;
    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, OrchestratorError>;
    async fn list_with_prefix(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<std::collections::HashSet<String>, OrchestratorError>;
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), OrchestratorError>;
}
