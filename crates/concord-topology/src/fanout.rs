//! Event fanout: one ordered ingest stream, many bounded subscribers.
//!
//! The metadata store enqueues events into an unbounded ingest channel; a
//! single dispatcher task pulls them in version order, appends them to a
//! bounded replay history, and delivers to every matching subscriber with a
//! non-blocking send. A subscriber that cannot keep up is disconnected —
//! the service never blocks on a slow consumer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use concord_core::{TopologyEvent, TopologyEventType};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::FanoutConfig;
use crate::error::{TopologyError, TopologyResult};
use uuid::Uuid;

/// Options for a new subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Address or label of the subscribing client, for logs
    pub client_addr: String,
    /// Event types to deliver; `None` delivers everything
    pub event_types: Option<HashSet<TopologyEventType>>,
    /// Replay history events with version strictly greater than this
    pub since_version: Option<u64>,
    /// Per-subscriber buffer override; defaults to the configured size
    pub buffer: Option<usize>,
}

/// A live subscription handle. Dropping the receiver unsubscribes lazily;
/// calling [`EventFanout::unsubscribe`] does so eagerly.
pub struct Subscription {
    /// Subscription id
    pub id: Uuid,
    /// Ordered event stream
    pub receiver: mpsc::Receiver<TopologyEvent>,
}

/// One registered subscriber.
struct SubscriberEntry {
    /// Client label for logs
    client_addr: String,
    /// Delivery filter; `None` means all types
    filter: Option<HashSet<TopologyEventType>>,
    /// Bounded channel into the subscriber
    sender: mpsc::Sender<TopologyEvent>,
}

impl SubscriberEntry {
    fn wants(&self, event_type: TopologyEventType) -> bool {
        // Heartbeats are liveness signals and bypass the filter.
        event_type == TopologyEventType::Heartbeat
            || self.filter.as_ref().is_none_or(|f| f.contains(&event_type))
    }
}

/// Shared fanout state.
struct FanoutState {
    /// Subscribers by id
    subscribers: HashMap<Uuid, SubscriberEntry>,
    /// Replay history, oldest first, bounded FIFO
    history: VecDeque<TopologyEvent>,
    /// Events delivered across all subscribers
    delivered: u64,
    /// Subscribers evicted for falling behind
    evicted: u64,
}

/// Statistics about the fanout.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutStats {
    /// Live subscribers
    pub subscribers: usize,
    /// Events currently held for replay
    pub history_len: usize,
    /// Total deliveries
    pub delivered: u64,
    /// Subscribers evicted for overflow
    pub evicted: u64,
}

/// In-process topology event bus.
pub struct EventFanout {
    config: FanoutConfig,
    state: Arc<RwLock<FanoutState>>,
    ingest_tx: mpsc::UnboundedSender<TopologyEvent>,
    /// Receiver handed to the dispatcher at start
    ingest_rx: Mutex<Option<mpsc::UnboundedReceiver<TopologyEvent>>>,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl EventFanout {
    /// Create a fanout. The returned bus is inert until [`start`] runs.
    ///
    /// [`start`]: EventFanout::start
    #[must_use]
    pub fn new(config: FanoutConfig) -> Self {
        let (ingest_tx, ingest_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            state: Arc::new(RwLock::new(FanoutState {
                subscribers: HashMap::new(),
                history: VecDeque::new(),
                delivered: 0,
                evicted: 0,
            })),
            ingest_tx,
            ingest_rx: Mutex::new(Some(ingest_rx)),
            shutdown_tx,
            dispatcher: Mutex::new(None),
        }
    }

    /// Sender for the metadata store to enqueue events on.
    #[must_use]
    pub fn ingest_sender(&self) -> mpsc::UnboundedSender<TopologyEvent> {
        self.ingest_tx.clone()
    }

    /// Spawn the dispatcher task. Idempotent; the second call is a no-op.
    pub async fn start(&self) {
        let Some(mut ingest_rx) = self.ingest_rx.lock().await.take() else {
            return;
        };

        let state = Arc::clone(&self.state);
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
            heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first interval tick completes immediately; consume it so
            // heartbeats start one interval in.
            heartbeat.tick().await;

            loop {
                tokio::select! {
                    maybe_event = ingest_rx.recv() => match maybe_event {
                        Some(event) => {
                            Self::dispatch(&state, &config, event).await;
                        }
                        None => break,
                    },
                    _ = heartbeat.tick() => {
                        Self::dispatch(&state, &config, TopologyEvent::heartbeat()).await;
                    }
                    _ = shutdown_rx.changed() => {
                        // Drain whatever the store already enqueued, then stop.
                        while let Ok(event) = ingest_rx.try_recv() {
                            Self::dispatch(&state, &config, event).await;
                        }
                        break;
                    }
                }
            }

            // Dropping the senders closes every subscriber channel.
            let mut state = state.write().await;
            let count = state.subscribers.len();
            state.subscribers.clear();
            info!(subscribers = count, "Event fanout dispatcher stopped");
        });

        *self.dispatcher.lock().await = Some(handle);
        debug!("Event fanout dispatcher started");
    }

    /// Stop the dispatcher, draining pending events and closing all
    /// subscriber channels.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.dispatcher.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Register a subscriber, replaying history past `since_version` first.
    ///
    /// # Errors
    ///
    /// Returns a Rejected error when the subscriber cap is reached.
    pub async fn subscribe(&self, options: SubscribeOptions) -> TopologyResult<Subscription> {
        let mut state = self.state.write().await;
        if state.subscribers.len() >= self.config.max_subscribers {
            return Err(TopologyError::SubscriberLimit(self.config.max_subscribers));
        }

        let filter = options.event_types.clone();
        let wants = |event: &TopologyEvent| {
            filter.as_ref().is_none_or(|f| f.contains(&event.event_type))
        };

        let replay: Vec<TopologyEvent> = match options.since_version {
            Some(since) => state
                .history
                .iter()
                .filter(|e| e.version > since && wants(e))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        // The channel is sized to absorb the replay on top of the live
        // buffer, so a fresh subscriber is never evicted by its own replay.
        let buffer = options.buffer.unwrap_or(self.config.subscriber_buffer).max(1);
        let (tx, rx) = mpsc::channel(buffer + replay.len());
        for event in replay {
            let _ = tx.try_send(event);
        }

        let id = Uuid::new_v4();
        state.subscribers.insert(
            id,
            SubscriberEntry {
                client_addr: options.client_addr.clone(),
                filter: options.event_types,
                sender: tx,
            },
        );
        info!(
            subscription = %id,
            client = %options.client_addr,
            since = ?options.since_version,
            subscribers = state.subscribers.len(),
            "Subscriber registered"
        );
        Ok(Subscription { id, receiver: rx })
    }

    /// Remove a subscriber, closing its channel.
    pub async fn unsubscribe(&self, id: Uuid) -> bool {
        let mut state = self.state.write().await;
        let removed = state.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscription = %id, "Subscriber removed");
        }
        removed
    }

    /// Events with version strictly greater than `since`, oldest first,
    /// capped at `limit`.
    pub async fn events_since(&self, since: u64, limit: usize) -> Vec<TopologyEvent> {
        let state = self.state.read().await;
        state.history.iter().filter(|e| e.version > since).take(limit).cloned().collect()
    }

    /// Fanout statistics.
    pub async fn stats(&self) -> FanoutStats {
        let state = self.state.read().await;
        FanoutStats {
            subscribers: state.subscribers.len(),
            history_len: state.history.len(),
            delivered: state.delivered,
            evicted: state.evicted,
        }
    }

    /// Deliver one event: record it, then non-blocking send to every
    /// matching subscriber, evicting any whose buffer is full.
    async fn dispatch(state: &RwLock<FanoutState>, config: &FanoutConfig, event: TopologyEvent) {
        let mut state = state.write().await;

        if event.event_type != TopologyEventType::Heartbeat {
            state.history.push_back(event.clone());
            while state.history.len() > config.max_event_history {
                state.history.pop_front();
            }
        }

        let mut evicted: Vec<Uuid> = Vec::new();
        let mut delivered = 0u64;
        for (id, entry) in &state.subscribers {
            if !entry.wants(event.event_type) {
                continue;
            }
            match entry.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        subscription = %id,
                        client = %entry.client_addr,
                        "Subscriber buffer full; evicting"
                    );
                    evicted.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    evicted.push(*id);
                }
            }
        }

        state.delivered += delivered;
        state.evicted += evicted.len() as u64;
        for id in evicted {
            state.subscribers.remove(&id);
        }
    }
}
