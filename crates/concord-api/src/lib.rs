//! # ConcordKV Topology API
//!
//! HTTP and Server-Sent-Events surface over the topology service. All
//! endpoints live under `/api/topology` with JSON bodies in the wire
//! format of `concord-core`; `/api/topology/subscribe` streams the
//! ordered event feed as SSE frames.

pub mod config;
pub mod error;
pub mod handlers;
pub mod sse;

use std::sync::Arc;

use actix_web::middleware::DefaultHeaders;
use actix_web::{web, App, HttpServer};
use concord_topology::health::TcpHealthProbe;
use concord_topology::TopologyService;
use tracing::info;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use handlers::ApiState;

/// Build the topology service for a server config and seed it.
///
/// # Errors
///
/// Returns an error when the topology config is invalid or seeding
/// references unknown nodes.
pub async fn build_service(config: &ServerConfig) -> ApiResult<Arc<TopologyService>> {
    let service = Arc::new(TopologyService::new(
        config.topology.clone(),
        Arc::new(TcpHealthProbe),
    )?);
    service.start().await;

    for node in &config.seed.nodes {
        service.register_node(&node.id, &node.address, node.weight).await?;
    }
    for shard in &config.seed.shards {
        let info = concord_core::ShardInfo::new(
            shard.id.clone(),
            shard.range.clone(),
            shard.primary.clone(),
        )
        .with_replicas(shard.replicas.clone());
        service.add_shard(info).await?;
    }

    info!(
        nodes = config.seed.nodes.len(),
        shards = config.seed.shards.len(),
        "Topology service seeded"
    );
    Ok(service)
}

/// Run the HTTP server until it is stopped.
///
/// # Errors
///
/// Returns an error if the listener cannot bind.
pub async fn start_server(
    config: ServerConfig,
    service: Arc<TopologyService>,
) -> std::io::Result<()> {
    let service_name = config.service_name.clone();
    let bind_addr = config.bind_addr.clone();
    info!(bind_addr = %bind_addr, "Starting topology API server");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(ApiState { service: Arc::clone(&service) }))
            .wrap(DefaultHeaders::new().add(("X-Topology-Service", service_name.clone())))
            .configure(handlers::configure)
    })
    .bind(bind_addr)?
    .run()
    .await
}
