//! Where the router gets its topology: snapshot fetch plus event stream.

use std::time::Duration;

use async_trait::async_trait;
use concord_core::{TopologyEvent, TopologySnapshot};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

/// Supplies snapshots and ordered topology events to a router.
///
/// The router owns the subscription; the source never holds a reference
/// back into the router.
#[async_trait]
pub trait TopologySource: Send + Sync {
    /// Fetch a fresh snapshot.
    async fn fetch_snapshot(&self) -> ClientResult<TopologySnapshot>;

    /// Open an event stream, replaying from `since_version` when given.
    /// The stream ends when the returned receiver yields `None`.
    async fn subscribe(
        &self,
        since_version: Option<u64>,
    ) -> ClientResult<mpsc::Receiver<TopologyEvent>>;
}

/// Wire envelope of the snapshot endpoint.
#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    success: bool,
    snapshot: Option<TopologySnapshot>,
    message: Option<String>,
}

/// Wire envelope of the events endpoint.
#[derive(Debug, Deserialize)]
struct EventsResponse {
    success: bool,
    #[serde(default)]
    events: Vec<TopologyEvent>,
}

/// Topology source backed by the HTTP API of the topology service.
///
/// Events arrive by polling `/api/topology/events?sinceVersion=N`; the
/// poll loop keeps its own cursor, so the receiver observes the same
/// gapless version order an SSE subscriber would.
pub struct HttpTopologySource {
    base_url: String,
    client: reqwest::Client,
    poll_interval: Duration,
}

impl HttpTopologySource {
    /// Source against `base_url` (e.g. `http://topology:7900`).
    ///
    /// # Errors
    ///
    /// Returns a Configuration error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            poll_interval: Duration::from_secs(1),
        })
    }

    /// Override the event poll cadence.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl TopologySource for HttpTopologySource {
    async fn fetch_snapshot(&self) -> ClientResult<TopologySnapshot> {
        let url = format!("{}/api/topology/snapshot", self.base_url);
        let response: SnapshotResponse =
            self.client.get(&url).send().await?.error_for_status()?.json().await?;
        if !response.success {
            return Err(ClientError::Transport(
                response.message.unwrap_or_else(|| "snapshot request failed".into()),
            ));
        }
        response
            .snapshot
            .ok_or_else(|| ClientError::Transport("snapshot response had no snapshot".into()))
    }

    async fn subscribe(
        &self,
        since_version: Option<u64>,
    ) -> ClientResult<mpsc::Receiver<TopologyEvent>> {
        let (tx, rx) = mpsc::channel(256);
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let poll_interval = self.poll_interval;
        let mut cursor = since_version.unwrap_or(0);

        tokio::spawn(async move {
            loop {
                let url = format!(
                    "{base_url}/api/topology/events?sinceVersion={cursor}&limit=1000"
                );
                match client.get(&url).send().await {
                    Ok(response) => match response.json::<EventsResponse>().await {
                        Ok(body) if body.success => {
                            for event in body.events {
                                cursor = cursor.max(event.version);
                                if tx.send(event).await.is_err() {
                                    // Receiver gone; the router unsubscribed.
                                    return;
                                }
                            }
                        }
                        Ok(_) => warn!("Event poll rejected by server"),
                        Err(e) => warn!(error = %e, "Event poll returned malformed body"),
                    },
                    Err(e) => {
                        debug!(error = %e, "Event poll failed; will retry");
                    }
                }

                if tx.is_closed() {
                    return;
                }
                tokio::time::sleep(poll_interval).await;
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let source =
            HttpTopologySource::new("http://localhost:7900/", Duration::from_secs(2)).unwrap();
        assert_eq!(source.base_url, "http://localhost:7900");
    }

    #[test]
    fn test_envelope_parsing() {
        let body = r#"{"success": true, "events": [
            {"type": "NodeJoin", "version": 3, "timestamp": "2026-01-01T00:00:00Z", "nodeId": "n1"}
        ]}"#;
        let parsed: EventsResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.events[0].version, 3);

        let body = r#"{"success": false, "snapshot": null, "message": "nope"}"#;
        let parsed: SnapshotResponse = serde_json::from_str(body).unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.message.as_deref(), Some("nope"));
    }
}
