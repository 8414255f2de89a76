//! Load-based rebalancing: detection, planning, execution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use concord_core::{MigrationTask, NodeId, ShardId, ShardState, TopologySnapshot};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RebalancerConfig;
use crate::error::{TopologyError, TopologyResult};
use crate::migrator::Migrator;
use crate::ring::HashRing;
use crate::store::MetadataStore;

/// Weights of the load score components.
const QPS_WEIGHT: f64 = 0.5;
const CPU_WEIGHT: f64 = 0.3;
const MEM_WEIGHT: f64 = 0.2;

/// Result of one imbalance check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImbalanceReport {
    /// Whether a rebalance should run now
    pub requires_rebalance: bool,
    /// `(max - min) / avg` over node load scores
    pub imbalance_ratio: f64,
    /// Mean load score
    pub average_score: f64,
    /// Nodes with score above `avg * (1 + threshold)`
    pub overloaded_nodes: Vec<NodeId>,
    /// Nodes with score below `avg * (1 - threshold)`
    pub underloaded_nodes: Vec<NodeId>,
    /// Load score per node
    pub load_scores: HashMap<NodeId, f64>,
}

/// One step of a rebalance plan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "action")]
pub enum RebalanceAction {
    /// Change a node's ring weight; no data moves
    SetWeight {
        /// Node to adjust
        node_id: NodeId,
        /// New ring weight
        weight: f64,
    },
    /// Move one shard between nodes via the migrator
    MoveShard {
        /// Shard to move
        shard_id: ShardId,
        /// Node the shard leaves
        source_node: NodeId,
        /// Node the shard lands on
        target_node: NodeId,
    },
}

/// A generated plan, ready for execution or dry-run logging.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalancePlan {
    /// Strategy that produced the plan
    pub strategy: String,
    /// Ordered actions
    pub actions: Vec<RebalanceAction>,
}

/// Pluggable plan generation.
pub trait RebalanceStrategy: Send + Sync {
    /// Strategy name for logs and plan records.
    fn name(&self) -> &'static str;

    /// Produce a plan for the reported imbalance.
    fn plan(&self, report: &ImbalanceReport, snapshot: &TopologySnapshot) -> RebalancePlan;
}

/// Shift ring weights instead of moving data. The ring absorbs the change
/// for new keys; no migrations are requested.
pub struct WeightBased;

impl RebalanceStrategy for WeightBased {
    fn name(&self) -> &'static str {
        "weight-based"
    }

    fn plan(&self, report: &ImbalanceReport, _snapshot: &TopologySnapshot) -> RebalancePlan {
        let avg = report.average_score.max(f64::EPSILON);
        let mut actions = Vec::new();

        for node in &report.overloaded_nodes {
            let score = report.load_scores.get(node).copied().unwrap_or_default();
            let weight = (1.0 / (1.0 + score)).clamp(0.1, 1.0);
            actions.push(RebalanceAction::SetWeight { node_id: node.clone(), weight });
        }
        for node in &report.underloaded_nodes {
            let score = report.load_scores.get(node).copied().unwrap_or_default();
            let weight = (1.0 + (avg - score) / avg).clamp(1.0, 2.0);
            actions.push(RebalanceAction::SetWeight { node_id: node.clone(), weight });
        }

        RebalancePlan { strategy: self.name().to_string(), actions }
    }
}

/// Move the smallest set of shards from overloaded to underloaded nodes
/// that brings the maximum deviation back within the threshold.
pub struct MinimalDisruption {
    /// Deviation target, mirrors the rebalancer threshold
    pub threshold: f64,
}

impl RebalanceStrategy for MinimalDisruption {
    fn name(&self) -> &'static str {
        "minimal-disruption"
    }

    fn plan(&self, report: &ImbalanceReport, snapshot: &TopologySnapshot) -> RebalancePlan {
        let mut actions = Vec::new();
        let avg = report.average_score.max(f64::EPSILON);
        let mut scores = report.load_scores.clone();

        // Fill the most underloaded node first.
        let mut targets: Vec<NodeId> = report.underloaded_nodes.clone();
        targets.sort_by(|a, b| {
            let sa = scores.get(a).copied().unwrap_or_default();
            let sb = scores.get(b).copied().unwrap_or_default();
            sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.cmp(b))
        });

        for source in &report.overloaded_nodes {
            // Primary shards on the source, smallest span first so the plan
            // moves the least data; shard id breaks ties deterministically.
            let mut candidates: Vec<_> = snapshot
                .shard_map
                .values()
                .filter(|s| &s.primary_node == source && s.state == ShardState::Active)
                .collect();
            candidates.sort_by(|a, b| {
                let sa = a.range.size().unwrap_or(u128::MAX);
                let sb = b.range.size().unwrap_or(u128::MAX);
                sa.cmp(&sb).then_with(|| a.id.cmp(&b.id))
            });

            let shard_count = candidates.len().max(1);
            let per_shard_score =
                scores.get(source).copied().unwrap_or_default() / shard_count as f64;

            for shard in candidates {
                let source_score = scores.get(source).copied().unwrap_or_default();
                if source_score <= avg * (1.0 + self.threshold) {
                    break;
                }
                let Some(target) = targets.iter().find(|t| {
                    let target_score = scores.get(*t).copied().unwrap_or_default();
                    target_score + per_shard_score <= avg * (1.0 + self.threshold)
                        && *t != source
                        && !shard.replica_nodes.contains(*t)
                }) else {
                    break;
                };

                actions.push(RebalanceAction::MoveShard {
                    shard_id: shard.id.clone(),
                    source_node: source.clone(),
                    target_node: target.clone(),
                });
                *scores.entry(source.clone()).or_default() -= per_shard_score;
                *scores.entry(target.clone()).or_default() += per_shard_score;
            }
        }

        RebalancePlan { strategy: self.name().to_string(), actions }
    }
}

/// Periodically inspects load and corrects imbalance through ring weights
/// or shard moves. Only one plan executes at a time, and ring weight
/// changes flow exclusively through this single writer.
pub struct Rebalancer {
    config: RebalancerConfig,
    ring: Arc<HashRing>,
    store: Arc<MetadataStore>,
    migrator: Arc<Migrator>,
    strategy: Box<dyn RebalanceStrategy>,
    /// Single-in-flight gate
    in_flight: AtomicBool,
    /// Last executed rebalance, for the minimum interval
    last_rebalance: Mutex<Option<Instant>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Rebalancer {
    /// Create a rebalancer with the given strategy.
    #[must_use]
    pub fn new(
        config: RebalancerConfig,
        ring: Arc<HashRing>,
        store: Arc<MetadataStore>,
        migrator: Arc<Migrator>,
        strategy: Box<dyn RebalanceStrategy>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            ring,
            store,
            migrator,
            strategy,
            in_flight: AtomicBool::new(false),
            last_rebalance: Mutex::new(None),
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Spawn the periodic check loop.
    pub async fn start(self: &Arc<Self>) {
        let mut slot = self.task.lock().await;
        if slot.is_some() {
            return;
        }
        let this = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => break,
                }
                // A failed cycle must never kill the loop.
                match this.run_once().await {
                    Ok(Some(plan)) => {
                        debug!(actions = plan.actions.len(), "Rebalance cycle executed")
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Rebalance cycle failed"),
                }
            }
        }));
        info!("Rebalancer started");
    }

    /// Stop the check loop.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Compute load scores and decide whether rebalance is required.
    pub async fn detect_load_imbalance(&self) -> ImbalanceReport {
        let snapshot = self.store.snapshot().await;

        let max_qps = snapshot
            .nodes
            .values()
            .map(|n| n.load.qps)
            .fold(0.0_f64, f64::max)
            .max(f64::EPSILON);

        let mut scores: HashMap<NodeId, f64> = HashMap::new();
        for (id, node) in &snapshot.nodes {
            let qps_norm = node.load.qps / max_qps;
            let score =
                QPS_WEIGHT * qps_norm + CPU_WEIGHT * node.load.cpu + MEM_WEIGHT * node.load.mem;
            scores.insert(id.clone(), score);
        }

        if scores.is_empty() {
            return ImbalanceReport {
                requires_rebalance: false,
                imbalance_ratio: 0.0,
                average_score: 0.0,
                overloaded_nodes: Vec::new(),
                underloaded_nodes: Vec::new(),
                load_scores: scores,
            };
        }

        let avg = scores.values().sum::<f64>() / scores.len() as f64;
        let max = scores.values().fold(f64::MIN, |a, &b| a.max(b));
        let min = scores.values().fold(f64::MAX, |a, &b| a.min(b));
        let ratio = if avg > 0.0 { (max - min) / avg } else { 0.0 };

        let threshold = self.config.load_imbalance_threshold;
        let mut overloaded: Vec<NodeId> = scores
            .iter()
            .filter(|(_, &s)| s > avg * (1.0 + threshold))
            .map(|(id, _)| id.clone())
            .collect();
        let mut underloaded: Vec<NodeId> = scores
            .iter()
            .filter(|(_, &s)| s < avg * (1.0 - threshold))
            .map(|(id, _)| id.clone())
            .collect();
        overloaded.sort();
        underloaded.sort();

        let interval_ok = {
            let last = self.last_rebalance.lock().await;
            last.is_none_or(|at| at.elapsed() >= self.config.min_rebalance_interval)
        };

        ImbalanceReport {
            requires_rebalance: ratio > threshold && interval_ok,
            imbalance_ratio: ratio,
            average_score: avg,
            overloaded_nodes: overloaded,
            underloaded_nodes: underloaded,
            load_scores: scores,
        }
    }

    /// Run one detection/plan/execute cycle. Returns the executed plan, or
    /// `None` when the cluster is balanced.
    pub async fn run_once(&self) -> TopologyResult<Option<RebalancePlan>> {
        let report = self.detect_load_imbalance().await;
        if !report.requires_rebalance {
            return Ok(None);
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TopologyError::RebalanceInFlight);
        }

        let result = self.plan_and_execute(&report).await;
        self.in_flight.store(false, Ordering::SeqCst);
        result.map(Some)
    }

    async fn plan_and_execute(&self, report: &ImbalanceReport) -> TopologyResult<RebalancePlan> {
        let snapshot = self.store.snapshot().await;
        let plan = self.strategy.plan(report, &snapshot);

        info!(
            strategy = %plan.strategy,
            actions = plan.actions.len(),
            ratio = format!("{:.3}", report.imbalance_ratio),
            overloaded = ?report.overloaded_nodes,
            underloaded = ?report.underloaded_nodes,
            dry_run = self.config.dry_run,
            "Rebalance plan generated"
        );

        if self.config.dry_run {
            return Ok(plan);
        }

        let mut migrations = 0usize;
        for action in &plan.actions {
            match action {
                RebalanceAction::SetWeight { node_id, weight } => {
                    if let Err(e) = self.ring.update_weight(node_id, *weight).await {
                        warn!(node_id = %node_id, error = %e, "Weight update failed");
                    }
                }
                RebalanceAction::MoveShard { shard_id, source_node, target_node } => {
                    if migrations >= self.config.max_concurrent_migrations {
                        debug!(shard_id = %shard_id, "Migration cap reached; deferring move");
                        continue;
                    }
                    let shard = self.store.shard(shard_id).await?;
                    let task = MigrationTask::new(
                        shard_id.clone(),
                        source_node.clone(),
                        target_node.clone(),
                        shard.range.clone(),
                    );
                    match self.migrator.submit_migration_task(task).await {
                        Ok(id) => {
                            migrations += 1;
                            info!(shard_id = %shard_id, task = %id, "Migration submitted");
                        }
                        Err(e) => {
                            warn!(shard_id = %shard_id, error = %e, "Migration submission failed")
                        }
                    }
                }
            }
        }

        *self.last_rebalance.lock().await = Some(Instant::now());
        Ok(plan)
    }
}
