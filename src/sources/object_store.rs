use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::OrchestratorError;

use super::ObjectStore;

/// In-memory object store used by tests and the bundled processors. A real
/// deployment would point processors at an S3-shaped client instead; the
/// engine only ever depends on the `ObjectStore` trait.
#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    buckets: Arc<RwLock<HashMap<String, HashMap<String, Vec<u8>>>>>,
    upload_count: Arc<AtomicU64>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of `upload` calls that actually wrote bytes — lets tests
    /// assert that a second run only re-uploads the new items.
    pub fn upload_count(&self) -> u64 {
        self.upload_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn upload(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), OrchestratorError> {
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), bytes);
        self.upload_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, OrchestratorError> {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .cloned()
            .ok_or_else(|| OrchestratorError::Processor(format!("object not found: {key}")))
    }

    async fn list_with_prefix(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<HashSet<String>, OrchestratorError> {
        let buckets = self.buckets.read().await;
        let keys = buckets
            .get(bucket)
            .map(|b| {
                b.keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(keys)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), OrchestratorError> {
        let mut buckets = self.buckets.write().await;
        if let Some(b) = buckets.get_mut(bucket) {
            b.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_bytes() {
        let store = InMemoryObjectStore::new();
        store
            .upload("bucket", "job/a.json", b"hello".to_vec())
            .await
            .unwrap();
        let bytes = store.download("bucket", "job/a.json").await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn list_with_prefix_filters_and_defaults_empty() {
        let store = InMemoryObjectStore::new();
        store.upload("b", "job/a", vec![]).await.unwrap();
        store.upload("b", "job/b", vec![]).await.unwrap();
        store.upload("b", "other/c", vec![]).await.unwrap();

        let keys = store.list_with_prefix("b", "job/").await.unwrap();
        assert_eq!(keys.len(), 2);

        let empty = store.list_with_prefix("b", "missing/").await.unwrap();
        assert!(empty.is_empty());
    }
}
