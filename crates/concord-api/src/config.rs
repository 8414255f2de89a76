//! Server configuration and file loading.

use std::path::Path;

use concord_core::KeyRange;
use concord_topology::TopologyConfig;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Configuration of the topology server binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    /// Address the HTTP server binds
    pub bind_addr: String,

    /// Value of the `X-Topology-Service` response header
    pub service_name: String,

    /// Topology service configuration
    pub topology: TopologyConfig,

    /// Nodes and shards installed at startup
    pub seed: SeedConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7900".to_string(),
            service_name: "concordkv-topology".to_string(),
            topology: TopologyConfig::default(),
            seed: SeedConfig::default(),
        }
    }
}

/// Cluster members seeded at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SeedConfig {
    /// Nodes registered before serving
    pub nodes: Vec<SeedNode>,

    /// Shards installed before serving
    pub shards: Vec<SeedShard>,
}

/// One seeded node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedNode {
    /// Node id
    pub id: String,

    /// Dial address
    pub address: String,

    /// Ring weight
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// One seeded shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedShard {
    /// Shard id
    pub id: String,

    /// Key range
    pub range: KeyRange,

    /// Primary node id
    pub primary: String,

    /// Replica node ids
    #[serde(default)]
    pub replicas: Vec<String>,
}

impl ServerConfig {
    /// Load configuration from a JSON or TOML file. Unknown fields are
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns a BadRequest-kind error when the file cannot be read or
    /// carries unknown or invalid fields.
    pub fn load(path: &Path) -> Result<Self, ApiError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| ApiError::BadRequest(format!("config file {}: {e}", path.display())))?;
        let loaded: Self = settings
            .try_deserialize()
            .map_err(|e| ApiError::BadRequest(format!("config file {}: {e}", path.display())))?;
        loaded
            .topology
            .validate()
            .map_err(|e| ApiError::BadRequest(format!("config file {}: {e}", path.display())))?;
        Ok(loaded)
    }
}
