//! Batch transfer interface between storage nodes.
//!
//! The migrator pulls key batches from the source node and pushes them to
//! the target through this trait. The production transport lives with the
//! node runtime; [`InMemoryTransfer`] wires batches straight between
//! [`MemoryEngine`]s for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use concord_core::hash;
use concord_core::{KeyRange, NodeId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::engine::{MemoryEngine, StorageEngine};
use crate::error::{TopologyError, TopologyResult};

/// One key/value pair in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvEntry {
    /// Key bytes
    pub key: Bytes,
    /// Value bytes
    pub value: Bytes,
}

/// A batch of entries moving between nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvBatch {
    /// Entries in key order
    pub entries: Vec<KvEntry>,
    /// Optional integrity digest over the serialized entries
    pub checksum: Option<String>,
}

impl KvBatch {
    /// Byte volume of the batch payload.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.entries.iter().map(|e| e.key.len() + e.value.len()).sum()
    }

    /// SHA-256 over the bincode frame of the entries.
    pub fn compute_checksum(&self) -> TopologyResult<String> {
        let frame = bincode::serialize(&self.entries)?;
        Ok(hash::digest_hex(&frame))
    }

    /// Stamp the checksum field.
    pub fn seal(&mut self) -> TopologyResult<()> {
        self.checksum = Some(self.compute_checksum()?);
        Ok(())
    }

    /// Verify the checksum, if one is present.
    pub fn verify(&self) -> TopologyResult<()> {
        if let Some(expected) = &self.checksum {
            let actual = self.compute_checksum()?;
            if &actual != expected {
                return Err(TopologyError::Transport(format!(
                    "batch checksum mismatch: expected {expected}, got {actual}"
                )));
            }
        }
        Ok(())
    }
}

/// Transport used by the migrator to move shard data.
#[async_trait]
pub trait NetworkTransfer: Send + Sync {
    /// Open a connection to a node. Idempotent.
    async fn establish_connection(&self, node_id: &str) -> TopologyResult<()>;

    /// Close a connection to a node. Idempotent.
    async fn close_connection(&self, node_id: &str) -> TopologyResult<()>;

    /// Count the keys a node holds inside `range`.
    async fn count_range(&self, source: &str, range: &KeyRange) -> TopologyResult<u64>;

    /// Pull the next batch from `source`, resuming after `cursor`.
    ///
    /// Returns the batch and the cursor for the following call; a `None`
    /// cursor means the range is exhausted.
    async fn receive_batch(
        &self,
        source: &str,
        range: &KeyRange,
        cursor: Option<Bytes>,
        max_entries: usize,
        max_bytes: usize,
    ) -> TopologyResult<(KvBatch, Option<Bytes>)>;

    /// Push a batch to `target`, returning the applied entry count.
    async fn send_batch(&self, target: &str, batch: &KvBatch) -> TopologyResult<usize>;

    /// Delete previously transferred keys from `target` (rollback).
    async fn delete_batch(&self, target: &str, keys: &[Bytes]) -> TopologyResult<()>;
}

/// Transfer that moves batches directly between in-memory engines.
#[derive(Default)]
pub struct InMemoryTransfer {
    engines: RwLock<HashMap<NodeId, Arc<MemoryEngine>>>,
    /// Fault injection: the next N sends fail with a transport error
    fail_sends: AtomicU32,
}

impl InMemoryTransfer {
    /// Create an empty transfer fabric.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node's engine.
    pub async fn register_engine(&self, node_id: &str, engine: Arc<MemoryEngine>) {
        self.engines.write().await.insert(node_id.to_string(), engine);
    }

    /// Make the next `n` sends fail, for retry tests.
    pub fn fail_next_sends(&self, n: u32) {
        self.fail_sends.store(n, Ordering::SeqCst);
    }

    async fn engine(&self, node_id: &str) -> TopologyResult<Arc<MemoryEngine>> {
        self.engines
            .read()
            .await
            .get(node_id)
            .cloned()
            .ok_or_else(|| TopologyError::Transport(format!("no route to node {node_id}")))
    }

    /// Scan bounds for a range: byte ranges scan their own bounds, hash
    /// ranges scan everything and filter.
    fn scan_bounds(range: &KeyRange) -> (Vec<u8>, Vec<u8>) {
        match range {
            KeyRange::Bytes { start, end } => (start.clone().into_bytes(), end.clone().into_bytes()),
            KeyRange::Hash { .. } => (Vec::new(), Vec::new()),
        }
    }
}

/// The lexicographically next key after `key`.
fn next_key(key: &[u8]) -> Vec<u8> {
    let mut next = key.to_vec();
    next.push(0);
    next
}

#[async_trait]
impl NetworkTransfer for InMemoryTransfer {
    async fn establish_connection(&self, node_id: &str) -> TopologyResult<()> {
        // Existence is the connection.
        self.engine(node_id).await.map(|_| ())
    }

    async fn close_connection(&self, _node_id: &str) -> TopologyResult<()> {
        Ok(())
    }

    async fn count_range(&self, source: &str, range: &KeyRange) -> TopologyResult<u64> {
        let engine = self.engine(source).await?;
        let (start, end) = Self::scan_bounds(range);
        let mut count = 0u64;
        let mut cursor = start;
        loop {
            let chunk = engine.scan(&cursor, &end, 4096).await?;
            if chunk.is_empty() {
                break;
            }
            count += chunk.iter().filter(|(k, _)| range.contains_key(k)).count() as u64;
            let Some((last, _)) = chunk.last() else { break };
            cursor = next_key(last);
            if chunk.len() < 4096 {
                break;
            }
        }
        Ok(count)
    }

    async fn receive_batch(
        &self,
        source: &str,
        range: &KeyRange,
        cursor: Option<Bytes>,
        max_entries: usize,
        max_bytes: usize,
    ) -> TopologyResult<(KvBatch, Option<Bytes>)> {
        let engine = self.engine(source).await?;
        let (range_start, range_end) = Self::scan_bounds(range);

        let mut scan_from = match &cursor {
            Some(c) => next_key(c),
            None => range_start,
        };

        let mut entries = Vec::new();
        let mut bytes = 0usize;
        let mut exhausted = false;

        'outer: loop {
            let chunk = engine.scan(&scan_from, &range_end, max_entries.max(64)).await?;
            if chunk.is_empty() {
                exhausted = true;
                break;
            }
            let chunk_len = chunk.len();
            let Some((chunk_last, _)) = chunk.last() else { break };
            let chunk_last = chunk_last.clone();

            for (key, value) in chunk {
                if !range.contains_key(&key) {
                    continue;
                }
                bytes += key.len() + value.len();
                entries.push(KvEntry { key, value });
                if entries.len() >= max_entries || bytes >= max_bytes {
                    break 'outer;
                }
            }
            scan_from = next_key(&chunk_last);
            if chunk_len < max_entries.max(64) {
                exhausted = true;
                break;
            }
        }

        let next_cursor = if exhausted || entries.is_empty() {
            None
        } else {
            entries.last().map(|e| e.key.clone())
        };

        debug!(
            source,
            entries = entries.len(),
            bytes,
            exhausted,
            "Batch received from source engine"
        );
        Ok((KvBatch { entries, checksum: None }, next_cursor))
    }

    async fn send_batch(&self, target: &str, batch: &KvBatch) -> TopologyResult<usize> {
        let pending = self.fail_sends.load(Ordering::SeqCst);
        if pending > 0
            && self
                .fail_sends
                .compare_exchange(pending, pending - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(TopologyError::Transport(format!(
                "injected send failure to {target}"
            )));
        }

        batch.verify()?;
        let engine = self.engine(target).await?;
        for entry in &batch.entries {
            engine.batch_put(entry.key.clone(), entry.value.clone()).await?;
        }
        engine.batch_commit().await?;
        Ok(batch.entries.len())
    }

    async fn delete_batch(&self, target: &str, keys: &[Bytes]) -> TopologyResult<()> {
        let engine = self.engine(target).await?;
        for key in keys {
            engine.batch_delete(key.clone()).await?;
        }
        engine.batch_commit().await
    }
}
