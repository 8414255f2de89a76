//! # ConcordKV Client Router
//!
//! Client side of the ConcordKV distribution core. The router holds a
//! local topology snapshot, keeps it fresh through the service's event
//! stream, and resolves every key to a target node through health
//! filtering, per-node circuit breakers and a pluggable load balancer.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use concord_client::{
//!     HttpTopologySource, Router, RouterConfig, RoutingRequest, RoutingStrategy,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = Arc::new(HttpTopologySource::new(
//!         "http://topology:7900",
//!         Duration::from_secs(3),
//!     )?);
//!     let router = Arc::new(Router::new(RouterConfig::with_defaults(), source)?);
//!     router.start().await?;
//!
//!     let route = router
//!         .resolve(RoutingRequest::new(b"user:42".to_vec(), RoutingStrategy::WritePrimary))
//!         .await?;
//!     println!("write to {}", route.target_node);
//!
//!     // After the actual call, feed the outcome back.
//!     router.record_outcome(&route.target_node, 1.8, true);
//!     Ok(())
//! }
//! ```

pub mod balancer;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod error;
pub mod retry;
pub mod router;
pub mod source;

// Re-export main types
pub use balancer::{BalancerKind, Candidate, LoadBalancer};
pub use breaker::{BreakerState, CircuitBreaker};
pub use config::{BreakerConfig, RetryConfig, RouterConfig};
pub use error::{ClientError, ClientResult};
pub use router::{
    BatchRoutingResult, Router, RoutingRequest, RoutingResult, RoutingStrategy,
};
pub use source::{HttpTopologySource, TopologySource};
