//! # ConcordKV Topology Service
//!
//! Server side of the ConcordKV distribution core: the consistent-hash
//! ring, the authoritative shard/node metadata store, health checking, the
//! ordered topology event fanout, load monitoring, the rebalancer and the
//! data migrator.
//!
//! ## Architecture Overview
//!
//! ```text
//!              ┌──────────────────────────────────────────┐
//!              │             TopologyService              │
//!              │                                          │
//!  probes ───► │  HealthChecker ──► MetadataStore ──────┐ │
//!              │                        │ version++     │ │
//!              │   HashRing ◄── Rebalancer   one event  │ │
//!              │      ▲             │                   ▼ │
//!              │      │             ▼              EventFanout ───► subscribers
//!              │  LoadMonitor    Migrator ──► NetworkTransfer      (ordered,
//!              │                                          │         bounded)
//!              └──────────────────────────────────────────┘
//! ```
//!
//! Every mutation of cluster state flows through the [`store::MetadataStore`],
//! which bumps its monotonic version and emits exactly one event; the
//! [`fanout::EventFanout`] delivers those events to subscribers in version
//! order. Key placement is the [`ring::HashRing`]'s job; load drift is
//! corrected by the [`rebalancer::Rebalancer`], whose shard moves are carried
//! out by the [`migrator::Migrator`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use concord_topology::{TopologyConfig, TopologyService};
//! use concord_topology::health::TcpHealthProbe;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TopologyConfig::builder()
//!         .virtual_nodes_per_node(150)
//!         .replication_factor(3)
//!         .build()?;
//!
//!     let service = TopologyService::new(config, Arc::new(TcpHealthProbe))?;
//!     service.start().await;
//!     service.register_node("node1", "10.0.0.1:7700", 1.0).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod health;
pub mod metrics;
pub mod migrator;
pub mod monitor;
pub mod rebalancer;
pub mod ring;
pub mod service;
pub mod store;
pub mod transfer;

// Re-export main types
pub use config::{MigratorConfig, RebalancerConfig, TopologyConfig};
pub use error::{TopologyError, TopologyResult};
pub use fanout::{SubscribeOptions, Subscription};
pub use migrator::Migrator;
pub use rebalancer::{MinimalDisruption, Rebalancer, WeightBased};
pub use ring::HashRing;
pub use service::TopologyService;
pub use store::MetadataStore;
