//! Storage engine interface consumed by the migrator.
//!
//! The local engines (hash/lsm/btree) live outside this crate; the migrator
//! only needs their bulk-write and range-scan surface. [`MemoryEngine`]
//! backs tests and single-process deployments.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::error::{TopologyError, TopologyResult};

/// Bulk-write and range-scan surface of a storage engine.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Stage a put into the current batch.
    async fn batch_put(&self, key: Bytes, value: Bytes) -> TopologyResult<()>;

    /// Stage a delete into the current batch.
    async fn batch_delete(&self, key: Bytes) -> TopologyResult<()>;

    /// Apply the staged batch atomically.
    async fn batch_commit(&self) -> TopologyResult<()>;

    /// Discard the staged batch.
    async fn batch_clear(&self) -> TopologyResult<()>;

    /// Staged entry count and byte volume.
    async fn batch_status(&self) -> (usize, usize);

    /// Keys in `[start, end)` in lexicographic order, up to `limit`.
    /// An empty `end` means unbounded.
    async fn scan(&self, start: &[u8], end: &[u8], limit: usize)
        -> TopologyResult<Vec<(Bytes, Bytes)>>;
}

/// A staged batch operation.
enum BatchOp {
    Put(Bytes, Bytes),
    Delete(Bytes),
}

/// Ordered in-memory engine with an atomic batch buffer.
#[derive(Default)]
pub struct MemoryEngine {
    data: Mutex<BTreeMap<Bytes, Bytes>>,
    batch: Mutex<Vec<BatchOp>>,
}

impl MemoryEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct write, bypassing the batch. Test seeding.
    pub async fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.data.lock().await.insert(key.into(), value.into());
    }

    /// Direct read.
    pub async fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.data.lock().await.get(key).cloned()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.data.lock().await.len()
    }

    /// Whether the engine holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.data.lock().await.is_empty()
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn batch_put(&self, key: Bytes, value: Bytes) -> TopologyResult<()> {
        self.batch.lock().await.push(BatchOp::Put(key, value));
        Ok(())
    }

    async fn batch_delete(&self, key: Bytes) -> TopologyResult<()> {
        self.batch.lock().await.push(BatchOp::Delete(key));
        Ok(())
    }

    async fn batch_commit(&self) -> TopologyResult<()> {
        let ops = std::mem::take(&mut *self.batch.lock().await);
        let mut data = self.data.lock().await;
        for op in ops {
            match op {
                BatchOp::Put(key, value) => {
                    data.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn batch_clear(&self) -> TopologyResult<()> {
        self.batch.lock().await.clear();
        Ok(())
    }

    async fn batch_status(&self) -> (usize, usize) {
        let batch = self.batch.lock().await;
        let bytes = batch
            .iter()
            .map(|op| match op {
                BatchOp::Put(k, v) => k.len() + v.len(),
                BatchOp::Delete(k) => k.len(),
            })
            .sum();
        (batch.len(), bytes)
    }

    async fn scan(
        &self,
        start: &[u8],
        end: &[u8],
        limit: usize,
    ) -> TopologyResult<Vec<(Bytes, Bytes)>> {
        if !end.is_empty() && start > end {
            return Err(TopologyError::Internal(format!(
                "scan start {start:?} is past end {end:?}"
            )));
        }
        let data = self.data.lock().await;
        let out = data
            .range(Bytes::copy_from_slice(start)..)
            .take_while(|(k, _)| end.is_empty() || k.as_ref() < end)
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_batch_commit_is_atomic() {
        let engine = MemoryEngine::new();
        engine.batch_put(Bytes::from("a"), Bytes::from("1")).await.unwrap();
        engine.batch_put(Bytes::from("b"), Bytes::from("2")).await.unwrap();
        assert!(engine.is_empty().await);
        assert_eq!(engine.batch_status().await, (2, 4));

        engine.batch_commit().await.unwrap();
        assert_eq!(engine.len().await, 2);
        assert_eq!(engine.batch_status().await, (0, 0));
        assert_eq!(engine.get(b"a").await, Some(Bytes::from("1")));
    }

    #[tokio::test]
    async fn test_batch_clear_discards() {
        let engine = MemoryEngine::new();
        engine.batch_put(Bytes::from("a"), Bytes::from("1")).await.unwrap();
        engine.batch_clear().await.unwrap();
        engine.batch_commit().await.unwrap();
        assert!(engine.is_empty().await);
    }

    #[tokio::test]
    async fn test_batch_delete() {
        let engine = MemoryEngine::new();
        engine.put("a", "1").await;
        engine.batch_delete(Bytes::from("a")).await.unwrap();
        engine.batch_commit().await.unwrap();
        assert!(engine.is_empty().await);
    }

    #[tokio::test]
    async fn test_scan_bounds() {
        let engine = MemoryEngine::new();
        for i in 0..10 {
            engine.put(format!("k-{i}"), format!("v{i}")).await;
        }

        let range = engine.scan(b"k-2", b"k-5", 100).await.unwrap();
        let keys: Vec<&[u8]> = range.iter().map(|(k, _)| k.as_ref()).collect();
        assert_eq!(keys, vec![b"k-2".as_slice(), b"k-3", b"k-4"]);

        // Unbounded end, limited count.
        let limited = engine.scan(b"k-7", b"", 2).await.unwrap();
        assert_eq!(limited.len(), 2);

        assert!(engine.scan(b"z", b"a", 10).await.is_err());
    }
}
