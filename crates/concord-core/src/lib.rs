//! # ConcordKV Core Types
//!
//! Shared data model and wire formats for the ConcordKV distribution core.
//! Everything that crosses a component boundary lives here: shard and node
//! descriptors, topology snapshots and events, migration tasks, and the
//! pinned key-hashing used by both the server-side ring and the client-side
//! consistent-hash balancer.
//!
//! ## Wire compatibility
//!
//! All types in this crate serialize with lowerCamelCase field names
//! (`shardId`, `primaryNode`, `activeConnections`, ...) to stay compatible
//! with the existing ConcordKV client surface. Hashing is pinned to SHA-256
//! (first 8 bytes, big-endian) — see [`hash`] — and must never diverge
//! between deployments of clients and servers.

pub mod error;
pub mod event;
pub mod hash;
pub mod keyrange;
pub mod migration;
pub mod snapshot;
pub mod types;

// Re-export main types
pub use error::ErrorKind;
pub use event::{TopologyEvent, TopologyEventType};
pub use keyrange::KeyRange;
pub use migration::{MigrationProgress, MigrationStatus, MigrationTask};
pub use snapshot::TopologySnapshot;
pub use types::{LoadInfo, NodeHealth, NodeId, NodeStatus, ShardId, ShardInfo, ShardState};
