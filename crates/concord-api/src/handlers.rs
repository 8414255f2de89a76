//! HTTP handlers of the topology API.

use std::collections::HashSet;
use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use concord_core::{NodeStatus, ShardInfo, TopologyEvent, TopologyEventType, TopologySnapshot};
use concord_topology::service::{HealthSummary, ServiceStats};
use concord_topology::{SubscribeOptions, TopologyService};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::sse::EventStream;

/// Hard ceiling on the events endpoint page size.
const MAX_EVENT_LIMIT: usize = 1000;

/// Shared handler state.
pub struct ApiState {
    /// The topology service behind this API
    pub service: Arc<TopologyService>,
}

/// Mount the topology API under `/api/topology`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/topology")
            .service(web::resource("/snapshot").route(web::get().to(get_snapshot)))
            .service(web::resource("/shards").route(web::get().to(get_shards)))
            .service(web::resource("/nodes").route(web::get().to(get_nodes)))
            .service(web::resource("/version").route(web::get().to(get_version)))
            .service(web::resource("/health").route(web::get().to(get_health)))
            .service(web::resource("/stats").route(web::get().to(get_stats)))
            .service(web::resource("/events").route(web::get().to(get_events)))
            .service(web::resource("/subscribe").route(web::get().to(subscribe))),
    );
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotResponse {
    success: bool,
    snapshot: TopologySnapshot,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ShardsResponse {
    success: bool,
    shards: Vec<ShardInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ShardResponse {
    success: bool,
    shard: ShardInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NodesResponse {
    success: bool,
    nodes: Vec<NodeStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeResponse {
    success: bool,
    node: NodeStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionResponse {
    version: u64,
    timestamp: DateTime<Utc>,
    config_hash: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    success: bool,
    stats: ServiceStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventsResponse {
    success: bool,
    events: Vec<TopologyEvent>,
    count: usize,
}

#[derive(Debug, Deserialize)]
struct ShardsQuery {
    #[serde(rename = "shardId")]
    shard_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NodesQuery {
    #[serde(rename = "nodeId")]
    node_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(rename = "sinceVersion")]
    since_version: Option<u64>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SubscribeQuery {
    #[serde(rename = "eventTypes")]
    event_types: Option<String>,
    #[serde(rename = "sinceVersion")]
    since_version: Option<u64>,
}

async fn get_snapshot(state: web::Data<ApiState>) -> ApiResult<HttpResponse> {
    let snapshot = state.service.snapshot().await;
    Ok(HttpResponse::Ok().json(SnapshotResponse {
        success: true,
        snapshot: (*snapshot).clone(),
        message: None,
    }))
}

async fn get_shards(
    state: web::Data<ApiState>,
    query: web::Query<ShardsQuery>,
) -> ApiResult<HttpResponse> {
    match &query.shard_id {
        Some(shard_id) => {
            let shard = state.service.shard(shard_id).await?;
            Ok(HttpResponse::Ok().json(ShardResponse { success: true, shard }))
        }
        None => {
            let mut shards = state.service.shards().await;
            shards.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(HttpResponse::Ok().json(ShardsResponse { success: true, shards }))
        }
    }
}

async fn get_nodes(
    state: web::Data<ApiState>,
    query: web::Query<NodesQuery>,
) -> ApiResult<HttpResponse> {
    match &query.node_id {
        Some(node_id) => {
            let node = state.service.node(node_id).await?;
            Ok(HttpResponse::Ok().json(NodeResponse { success: true, node }))
        }
        None => {
            let mut nodes = state.service.nodes().await;
            nodes.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(HttpResponse::Ok().json(NodesResponse { success: true, nodes }))
        }
    }
}

async fn get_version(state: web::Data<ApiState>) -> ApiResult<HttpResponse> {
    let snapshot = state.service.snapshot().await;
    Ok(HttpResponse::Ok().json(VersionResponse {
        version: snapshot.version,
        timestamp: snapshot.timestamp,
        config_hash: snapshot.config_hash.clone(),
    }))
}

async fn get_health(state: web::Data<ApiState>) -> ApiResult<HttpResponse> {
    let summary: HealthSummary = state.service.health_summary().await;
    Ok(HttpResponse::Ok().json(summary))
}

async fn get_stats(state: web::Data<ApiState>) -> ApiResult<HttpResponse> {
    let stats = state.service.stats().await;
    Ok(HttpResponse::Ok().json(StatsResponse { success: true, stats }))
}

async fn get_events(
    state: web::Data<ApiState>,
    query: web::Query<EventsQuery>,
) -> ApiResult<HttpResponse> {
    let limit = query.limit.unwrap_or(MAX_EVENT_LIMIT);
    if limit > MAX_EVENT_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit {limit} exceeds the maximum of {MAX_EVENT_LIMIT}"
        )));
    }
    let since = query.since_version.unwrap_or(0);
    let events = state.service.events_since(since, limit).await;
    Ok(HttpResponse::Ok().json(EventsResponse {
        success: true,
        count: events.len(),
        events,
    }))
}

/// Parse a comma-separated event type filter.
fn parse_event_types(raw: &str) -> Result<HashSet<TopologyEventType>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            serde_json::from_value::<TopologyEventType>(serde_json::Value::String(
                name.to_string(),
            ))
            .map_err(|_| ApiError::BadRequest(format!("unknown event type: {name}")))
        })
        .collect()
}

async fn subscribe(
    state: web::Data<ApiState>,
    query: web::Query<SubscribeQuery>,
    request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let event_types = match &query.event_types {
        Some(raw) => Some(parse_event_types(raw)?),
        None => None,
    };

    // Reconnecting clients resume from their last seen version.
    let last_event_id = request
        .headers()
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let since_version = last_event_id.or(query.since_version);

    let client_addr = request
        .connection_info()
        .peer_addr()
        .unwrap_or("unknown")
        .to_string();

    let subscription = state
        .service
        .subscribe(SubscribeOptions {
            client_addr: client_addr.clone(),
            event_types,
            since_version,
            buffer: None,
        })
        .await?;

    debug!(
        subscription = %subscription.id,
        client = %client_addr,
        since = ?since_version,
        "SSE subscriber connected"
    );

    Ok(HttpResponse::Ok()
        .insert_header(("Content-Type", "text/event-stream"))
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .streaming(EventStream::new(subscription.receiver)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::middleware::DefaultHeaders;
    use actix_web::{test, App};
    use concord_core::KeyRange;
    use concord_topology::health::TcpHealthProbe;
    use concord_topology::TopologyConfig;

    async fn seeded_service() -> Arc<TopologyService> {
        let service = Arc::new(
            TopologyService::new(TopologyConfig::default(), Arc::new(TcpHealthProbe)).unwrap(),
        );
        service.start().await;
        service.register_node("node1", "10.0.0.1:7700", 1.0).await.unwrap();
        service.register_node("node2", "10.0.0.2:7700", 1.0).await.unwrap();
        service
            .add_shard(
                ShardInfo::new("s1", KeyRange::full(), "node1")
                    .with_replicas(vec!["node2".into()]),
            )
            .await
            .unwrap();
        service
    }

    macro_rules! test_app {
        ($service:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new(ApiState { service: $service }))
                    .wrap(DefaultHeaders::new().add(("X-Topology-Service", "concordkv-topology")))
                    .configure(configure),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_snapshot_endpoint() {
        let service = seeded_service().await;
        let app = test_app!(Arc::clone(&service));

        let request = test::TestRequest::get().uri("/api/topology/snapshot").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("X-Topology-Service").unwrap(),
            "concordkv-topology"
        );

        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["snapshot"]["version"], 3);
        assert!(body["snapshot"]["shardMap"]["s1"]["primaryNode"] == "node1");
        service.stop().await;
    }

    #[actix_web::test]
    async fn test_shard_lookup_and_404() {
        let service = seeded_service().await;
        let app = test_app!(Arc::clone(&service));

        let request =
            test::TestRequest::get().uri("/api/topology/shards?shardId=s1").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["shard"]["id"], "s1");

        let request =
            test::TestRequest::get().uri("/api/topology/shards?shardId=ghost").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["success"], false);
        service.stop().await;
    }

    #[actix_web::test]
    async fn test_nodes_listing_sorted() {
        let service = seeded_service().await;
        let app = test_app!(Arc::clone(&service));

        let request = test::TestRequest::get().uri("/api/topology/nodes").to_request();
        let response = test::call_service(&app, request).await;
        let body: serde_json::Value = test::read_body_json(response).await;
        let ids: Vec<&str> =
            body["nodes"].as_array().unwrap().iter().map(|n| n["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["node1", "node2"]);
        service.stop().await;
    }

    #[actix_web::test]
    async fn test_version_and_health() {
        let service = seeded_service().await;
        let app = test_app!(Arc::clone(&service));

        let request = test::TestRequest::get().uri("/api/topology/version").to_request();
        let body: serde_json::Value =
            test::read_body_json(test::call_service(&app, request).await).await;
        assert_eq!(body["version"], 3);
        assert!(body["configHash"].as_str().unwrap().len() == 64);

        let request = test::TestRequest::get().uri("/api/topology/health").to_request();
        let body: serde_json::Value =
            test::read_body_json(test::call_service(&app, request).await).await;
        assert_eq!(body["health"], "healthy");
        assert_eq!(body["healthyNodes"], 2);
        assert_eq!(body["totalNodes"], 2);
        service.stop().await;
    }

    #[actix_web::test]
    async fn test_events_replay_and_limit() {
        let service = seeded_service().await;
        // Give the dispatcher a beat to absorb the seeded events.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let app = test_app!(Arc::clone(&service));

        let request = test::TestRequest::get()
            .uri("/api/topology/events?sinceVersion=1&limit=10")
            .to_request();
        let body: serde_json::Value =
            test::read_body_json(test::call_service(&app, request).await).await;
        assert_eq!(body["success"], true);
        let versions: Vec<u64> = body["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["version"].as_u64().unwrap())
            .collect();
        assert_eq!(versions, vec![2, 3]);

        let request = test::TestRequest::get()
            .uri("/api/topology/events?limit=5000")
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        service.stop().await;
    }

    #[actix_web::test]
    async fn test_malformed_query_is_400() {
        let service = seeded_service().await;
        let app = test_app!(Arc::clone(&service));

        let request = test::TestRequest::get()
            .uri("/api/topology/events?sinceVersion=banana")
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        service.stop().await;
    }

    #[actix_web::test]
    async fn test_wrong_method_is_405() {
        let service = seeded_service().await;
        let app = test_app!(Arc::clone(&service));

        let request = test::TestRequest::post().uri("/api/topology/snapshot").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        service.stop().await;
    }

    #[actix_web::test]
    async fn test_subscribe_headers_and_filter_validation() {
        let service = seeded_service().await;
        let app = test_app!(Arc::clone(&service));

        let request = test::TestRequest::get()
            .uri("/api/topology/subscribe?eventTypes=NotAThing")
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = test::TestRequest::get()
            .uri("/api/topology/subscribe?eventTypes=ShardAdd,NodeJoin")
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "text/event-stream"
        );
        service.stop().await;
    }

    #[actix_web::test]
    async fn test_subscribe_replays_since_version() {
        let service = seeded_service().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let app = test_app!(Arc::clone(&service));

        let request = test::TestRequest::get()
            .uri("/api/topology/subscribe")
            .insert_header(("Last-Event-ID", "1"))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        // Stopping the service closes the subscriber channel, so the
        // stream ends after the replayed frames for versions 2 and 3.
        service.stop().await;
        let body = test::read_body(response).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        let ids: Vec<&str> =
            text.lines().filter(|l| l.starts_with("id: ")).collect();
        assert_eq!(ids, vec!["id: 2", "id: 3"]);
    }
}
