//! Shard data migration: bounded queue, worker pool, batched transfer.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use concord_core::{MigrationProgress, MigrationStatus, MigrationTask, ShardState};
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MigratorConfig;
use crate::error::{TopologyError, TopologyResult};
use crate::store::MetadataStore;
use crate::transfer::NetworkTransfer;

/// Live progress counters, shared between the worker and the reporter.
#[derive(Debug, Default)]
struct ProgressCell {
    total_keys: AtomicU64,
    processed_keys: AtomicU64,
    transferred_bytes: AtomicU64,
    current_batch: AtomicU64,
    total_batches: AtomicU64,
    error_count: AtomicU64,
}

/// One tracked task.
struct TaskEntry {
    /// Task descriptor; progress inside is materialized on read
    task: MigrationTask,
    /// Cooperative cancellation flag, checked between batches
    cancel: Arc<AtomicBool>,
    /// Shared progress counters
    progress: Arc<ProgressCell>,
}

/// Counters across the migrator lifetime.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigratorStats {
    /// Tasks accepted by submission
    pub submitted_tasks: u64,
    /// Tasks finished successfully
    pub completed_tasks: u64,
    /// Tasks that exhausted retries
    pub failed_tasks: u64,
    /// Tasks cancelled before completion
    pub cancelled_tasks: u64,
    /// Tasks waiting in the queue
    pub queued_tasks: usize,
    /// Tasks currently running
    pub running_tasks: usize,
}

/// Executes shard moves as bounded-concurrency batched copy jobs.
pub struct Migrator {
    config: MigratorConfig,
    transfer: Arc<dyn NetworkTransfer>,
    store: Arc<MetadataStore>,
    /// Pending task ids, highest priority first, FIFO within a priority
    queue: Mutex<VecDeque<Uuid>>,
    /// Wakes idle workers when work arrives
    queue_notify: Notify,
    /// All known tasks
    tasks: RwLock<HashMap<Uuid, TaskEntry>>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl Migrator {
    /// Create a migrator over the given transfer fabric.
    #[must_use]
    pub fn new(
        config: MigratorConfig,
        transfer: Arc<dyn NetworkTransfer>,
        store: Arc<MetadataStore>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            transfer,
            store,
            queue: Mutex::new(VecDeque::new()),
            queue_notify: Notify::new(),
            tasks: RwLock::new(HashMap::new()),
            shutdown,
            workers: Mutex::new(Vec::new()),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    /// Spawn the worker pool and the progress reporter.
    pub async fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return;
        }
        for worker_id in 0..self.config.concurrent_migrations {
            let this = Arc::clone(self);
            workers.push(tokio::spawn(async move { this.worker_loop(worker_id).await }));
        }
        let this = Arc::clone(self);
        workers.push(tokio::spawn(async move { this.reporter_loop().await }));
        info!(workers = self.config.concurrent_migrations, "Migrator started");
    }

    /// Stop workers after their current batch.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        self.queue_notify.notify_waiters();
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
        info!("Migrator stopped");
    }

    /// Validate and enqueue a migration task, returning its id.
    ///
    /// # Errors
    ///
    /// Returns a Configuration error for an invalid task and a Rejected
    /// error when the queue is full.
    pub async fn submit_migration_task(&self, task: MigrationTask) -> TopologyResult<Uuid> {
        task.validate().map_err(TopologyError::InvalidTask)?;

        let mut task = task;
        task.id = Uuid::new_v4();
        task.created_at = Utc::now();
        task.status = MigrationStatus::Pending;
        let id = task.id;
        let priority = task.priority;

        // Lock order is tasks, then queue, everywhere.
        let mut tasks = self.tasks.write().await;
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.config.queue_capacity {
            return Err(TopologyError::QueueFull(self.config.queue_capacity));
        }

        tasks.insert(
            id,
            TaskEntry {
                task,
                cancel: Arc::new(AtomicBool::new(false)),
                progress: Arc::new(ProgressCell::default()),
            },
        );

        // Highest priority first; FIFO among equals.
        let insert_at = queue
            .iter()
            .position(|qid| tasks.get(qid).is_none_or(|entry| entry.task.priority < priority))
            .unwrap_or(queue.len());
        queue.insert(insert_at, id);
        drop(queue);
        drop(tasks);

        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.queue_notify.notify_one();
        info!(task = %id, "Migration task submitted");
        Ok(id)
    }

    /// Cancel a task. Pending tasks go straight to Cancelled and never
    /// run; running tasks observe the flag between batches.
    pub async fn cancel_task(&self, id: Uuid) -> TopologyResult<()> {
        let mut tasks = self.tasks.write().await;
        let Some(entry) = tasks.get_mut(&id) else {
            return Err(TopologyError::TaskNotFound(id));
        };

        match entry.task.status {
            MigrationStatus::Pending => {
                entry.task.status = MigrationStatus::Cancelled;
                entry.task.completed_at = Some(Utc::now());
                entry.cancel.store(true, Ordering::SeqCst);
                self.queue.lock().await.retain(|qid| *qid != id);
                self.cancelled.fetch_add(1, Ordering::Relaxed);
                info!(task = %id, "Pending migration task cancelled");
                Ok(())
            }
            MigrationStatus::Running => {
                entry.cancel.store(true, Ordering::SeqCst);
                info!(task = %id, "Cancellation requested for running task");
                Ok(())
            }
            status => Err(TopologyError::TaskTerminal { id, status: status.to_string() }),
        }
    }

    /// Fetch a task with its progress materialized.
    pub async fn get_task(&self, id: Uuid) -> TopologyResult<MigrationTask> {
        let tasks = self.tasks.read().await;
        tasks
            .get(&id)
            .map(|entry| Self::materialize(entry))
            .ok_or(TopologyError::TaskNotFound(id))
    }

    /// All known tasks, most recent first.
    pub async fn tasks(&self) -> Vec<MigrationTask> {
        let tasks = self.tasks.read().await;
        let mut out: Vec<MigrationTask> = tasks.values().map(Self::materialize).collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Lifetime counters plus queue occupancy.
    pub async fn stats(&self) -> MigratorStats {
        let queued = self.queue.lock().await.len();
        let running = {
            let tasks = self.tasks.read().await;
            tasks.values().filter(|e| e.task.status == MigrationStatus::Running).count()
        };
        MigratorStats {
            submitted_tasks: self.submitted.load(Ordering::Relaxed),
            completed_tasks: self.completed.load(Ordering::Relaxed),
            failed_tasks: self.failed.load(Ordering::Relaxed),
            cancelled_tasks: self.cancelled.load(Ordering::Relaxed),
            queued_tasks: queued,
            running_tasks: running,
        }
    }

    /// Worker: pop tasks and run them until shutdown.
    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "Migration worker started");
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = self.queue.lock().await.pop_front();
            match next {
                Some(id) => {
                    if let Err(e) = self.run_task(id).await {
                        warn!(worker_id, task = %id, error = %e, "Migration task errored");
                    }
                }
                None => {
                    tokio::select! {
                        () = self.queue_notify.notified() => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }
        debug!(worker_id, "Migration worker stopped");
    }

    /// Execute one task end to end.
    async fn run_task(&self, id: Uuid) -> TopologyResult<()> {
        // Claim the task; skip it if cancellation won the race.
        let (task, cancel, progress) = {
            let mut tasks = self.tasks.write().await;
            let Some(entry) = tasks.get_mut(&id) else {
                return Ok(());
            };
            if entry.task.status != MigrationStatus::Pending {
                return Ok(());
            }
            entry.task.status = MigrationStatus::Running;
            entry.task.started_at = Some(Utc::now());
            entry.task.progress.start_time = entry.task.started_at;
            (entry.task.clone(), Arc::clone(&entry.cancel), Arc::clone(&entry.progress))
        };

        info!(
            task = %id,
            shard = %task.shard_id,
            source = %task.source_node,
            target = %task.target_node,
            "Migration started"
        );

        // The shard may not be registered when the migrator is driven
        // directly; placement bookkeeping is then the caller's concern.
        match self.store.set_shard_state(&task.shard_id, ShardState::Migrating).await {
            Ok(_) | Err(TopologyError::ShardNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let outcome = self.copy_range(&task, &cancel, &progress).await;

        match outcome {
            Ok(true) => {
                self.finish(id, MigrationStatus::Completed, None).await;
                match self
                    .store
                    .complete_migration(&task.shard_id, &task.source_node, &task.target_node)
                    .await
                {
                    Ok(_) | Err(TopologyError::ShardNotFound(_)) => {}
                    Err(e) => {
                        warn!(task = %id, error = %e, "Failed to record migration completion")
                    }
                }
                self.completed.fetch_add(1, Ordering::Relaxed);
                info!(task = %id, keys = progress.processed_keys.load(Ordering::Relaxed), "Migration completed");
            }
            Ok(false) => {
                self.finish(id, MigrationStatus::Cancelled, None).await;
                self.cancelled.fetch_add(1, Ordering::Relaxed);
                info!(task = %id, "Migration cancelled mid-flight");
            }
            Err(e) => {
                self.finish(id, MigrationStatus::Failed, Some(e.to_string())).await;
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(task = %id, error = %e, "Migration failed");
                // Leave the shard serving; a failed copy must not take it
                // offline.
                match self.store.set_shard_state(&task.shard_id, ShardState::Active).await {
                    Ok(_) | Err(TopologyError::ShardNotFound(_)) => {}
                    Err(e) => warn!(task = %id, error = %e, "Failed to restore shard state"),
                }
            }
        }
        Ok(())
    }

    /// Stream the task's range in batches. Returns `Ok(false)` on
    /// cooperative cancellation, `Ok(true)` on completion.
    async fn copy_range(
        &self,
        task: &MigrationTask,
        cancel: &AtomicBool,
        progress: &ProgressCell,
    ) -> TopologyResult<bool> {
        self.transfer.establish_connection(&task.source_node).await?;
        self.transfer.establish_connection(&task.target_node).await?;

        let total = self.transfer.count_range(&task.source_node, &task.key_range).await?;
        progress.total_keys.store(total, Ordering::SeqCst);
        progress
            .total_batches
            .store(total.div_ceil(self.config.batch_size as u64).max(1), Ordering::SeqCst);

        let mut cursor: Option<Bytes> = None;
        let mut rollback_keys: Vec<Bytes> = Vec::new();

        let result = loop {
            if cancel.load(Ordering::SeqCst) {
                break Ok(false);
            }

            let (mut batch, next_cursor) = self
                .transfer
                .receive_batch(
                    &task.source_node,
                    &task.key_range,
                    cursor.clone(),
                    self.config.batch_size,
                    self.config.batch_memory_limit,
                )
                .await?;

            if batch.entries.is_empty() {
                break Ok(true);
            }

            if self.config.enable_checksum {
                batch.seal()?;
            }
            progress.current_batch.fetch_add(1, Ordering::SeqCst);

            match self.send_with_retries(&task.target_node, &batch, progress).await {
                Ok(applied) => {
                    if self.config.enable_rollback {
                        rollback_keys.extend(batch.entries.iter().map(|e| e.key.clone()));
                    }
                    let batch_bytes = batch.byte_size() as u64;
                    let processed =
                        progress.processed_keys.fetch_add(applied as u64, Ordering::SeqCst)
                            + applied as u64;
                    progress.transferred_bytes.fetch_add(batch_bytes, Ordering::SeqCst);
                    // The source may have grown since the estimate; the
                    // invariant processed ≤ total always holds.
                    progress.total_keys.fetch_max(processed, Ordering::SeqCst);
                    self.touch_progress(task.id).await;
                }
                Err(e) => break Err(e),
            }

            match next_cursor {
                Some(c) => cursor = Some(c),
                None => break Ok(true),
            }
        };

        if matches!(result, Err(_)) && self.config.enable_rollback && !rollback_keys.is_empty() {
            if let Err(e) = self.transfer.delete_batch(&task.target_node, &rollback_keys).await {
                warn!(task = %task.id, error = %e, "Rollback failed");
            } else {
                info!(task = %task.id, keys = rollback_keys.len(), "Rolled back partial transfer");
            }
        }

        let _ = self.transfer.close_connection(&task.source_node).await;
        let _ = self.transfer.close_connection(&task.target_node).await;
        result
    }

    /// Send one batch, retrying with a fixed delay.
    async fn send_with_retries(
        &self,
        target: &str,
        batch: &crate::transfer::KvBatch,
        progress: &ProgressCell,
    ) -> TopologyResult<usize> {
        let mut attempt = 0u32;
        loop {
            match self.transfer.send_batch(target, batch).await {
                Ok(applied) => return Ok(applied),
                Err(e) if attempt < self.config.retry_attempts => {
                    attempt += 1;
                    progress.error_count.fetch_add(1, Ordering::SeqCst);
                    warn!(target, attempt, error = %e, "Batch send failed; retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Move a task to a terminal state.
    async fn finish(&self, id: Uuid, status: MigrationStatus, error: Option<String>) {
        let mut tasks = self.tasks.write().await;
        if let Some(entry) = tasks.get_mut(&id) {
            entry.task.status = status;
            entry.task.completed_at = Some(Utc::now());
            entry.task.error = error;
            entry.task.progress = Self::read_progress(&entry.task.progress, &entry.progress);
        }
    }

    /// Refresh the materialized progress on the task record.
    async fn touch_progress(&self, id: Uuid) {
        let mut tasks = self.tasks.write().await;
        if let Some(entry) = tasks.get_mut(&id) {
            entry.task.progress = Self::read_progress(&entry.task.progress, &entry.progress);
            entry.task.progress.last_update = Some(Utc::now());
        }
    }

    /// Collapse the atomic counters onto the serializable record.
    fn read_progress(base: &MigrationProgress, cell: &ProgressCell) -> MigrationProgress {
        MigrationProgress {
            total_keys: cell.total_keys.load(Ordering::SeqCst),
            processed_keys: cell.processed_keys.load(Ordering::SeqCst),
            transferred_bytes: cell.transferred_bytes.load(Ordering::SeqCst),
            start_time: base.start_time,
            last_update: base.last_update,
            current_batch: cell.current_batch.load(Ordering::SeqCst),
            total_batches: cell.total_batches.load(Ordering::SeqCst),
            error_count: cell.error_count.load(Ordering::SeqCst),
        }
    }

    /// Materialize a task with live progress.
    fn materialize(entry: &TaskEntry) -> MigrationTask {
        let mut task = entry.task.clone();
        task.progress = Self::read_progress(&task.progress, &entry.progress);
        task
    }

    /// Periodically log progress of running tasks.
    async fn reporter_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(self.config.progress_report_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            let tasks = self.tasks.read().await;
            for entry in tasks.values() {
                if entry.task.status != MigrationStatus::Running {
                    continue;
                }
                let task = Self::materialize(entry);
                let rate_mb_s = task.progress.rate_bytes_per_sec() / (1024.0 * 1024.0);
                info!(
                    task = %task.id,
                    shard = %task.shard_id,
                    processed = task.progress.processed_keys,
                    total = task.progress.total_keys,
                    percent = format!("{:.1}", task.progress.percent()),
                    rate_mb_s = format!("{rate_mb_s:.2}"),
                    eta_secs = ?task.progress.eta_secs().map(|s| s.round()),
                    "Migration progress"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::transfer::InMemoryTransfer;
    use concord_core::KeyRange;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        migrator: Arc<Migrator>,
        transfer: Arc<InMemoryTransfer>,
        source: Arc<MemoryEngine>,
        target: Arc<MemoryEngine>,
    }

    async fn fixture(config: MigratorConfig) -> Fixture {
        let transfer = Arc::new(InMemoryTransfer::new());
        let source = Arc::new(MemoryEngine::new());
        let target = Arc::new(MemoryEngine::new());
        for i in 0..1000 {
            source.put(format!("k-{i:04}"), format!("value-{i:04}")).await;
        }
        transfer.register_engine("n1", Arc::clone(&source)).await;
        transfer.register_engine("n2", Arc::clone(&target)).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let store = Arc::new(MetadataStore::new(3, 10, tx));
        let migrator = Arc::new(Migrator::new(
            config,
            Arc::clone(&transfer) as Arc<dyn NetworkTransfer>,
            store,
        ));
        Fixture { migrator, transfer, source, target }
    }

    fn task() -> MigrationTask {
        MigrationTask::new(
            "s1",
            "n1",
            "n2",
            KeyRange::Bytes { start: "k-0000".into(), end: "k-1000".into() },
        )
    }

    fn fast_config() -> MigratorConfig {
        MigratorConfig {
            batch_size: 100,
            retry_delay: Duration::from_millis(10),
            progress_report_interval: Duration::from_millis(50),
            ..MigratorConfig::default()
        }
    }

    async fn wait_terminal(migrator: &Migrator, id: Uuid) -> MigrationTask {
        for _ in 0..200 {
            let task = migrator.get_task(id).await.unwrap();
            if task.status.is_terminal() {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("task never reached a terminal state");
    }

    #[tokio::test]
    async fn test_migration_completes_with_exact_progress() {
        let fx = fixture(fast_config()).await;
        fx.migrator.start().await;

        let id = fx.migrator.submit_migration_task(task()).await.unwrap();
        let done = wait_terminal(&fx.migrator, id).await;

        assert_eq!(done.status, MigrationStatus::Completed);
        assert_eq!(done.progress.processed_keys, 1000);
        assert_eq!(done.progress.total_keys, 1000);
        assert_eq!(done.progress.error_count, 0);
        assert_eq!(done.progress.current_batch, 10);
        assert_eq!(fx.target.len().await, 1000);
        assert_eq!(fx.source.len().await, 1000);
        assert_eq!(fx.target.get(b"k-0512").await, Some(bytes::Bytes::from("value-0512")));

        let stats = fx.migrator.stats().await;
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.failed_tasks, 0);
        fx.migrator.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_task_rejected() {
        let fx = fixture(fast_config()).await;
        let mut bad = task();
        bad.target_node = "n1".into();
        assert!(matches!(
            fx.migrator.submit_migration_task(bad).await,
            Err(TopologyError::InvalidTask(_))
        ));
    }

    #[tokio::test]
    async fn test_queue_capacity() {
        let config = MigratorConfig { queue_capacity: 2, ..fast_config() };
        let fx = fixture(config).await;
        // Workers not started: submissions stay queued.
        fx.migrator.submit_migration_task(task()).await.unwrap();
        fx.migrator.submit_migration_task(task()).await.unwrap();
        assert!(matches!(
            fx.migrator.submit_migration_task(task()).await,
            Err(TopologyError::QueueFull(2))
        ));
    }

    #[tokio::test]
    async fn test_cancel_pending_never_runs() {
        let fx = fixture(fast_config()).await;
        // Submit before starting workers, cancel while still pending.
        let id = fx.migrator.submit_migration_task(task()).await.unwrap();
        fx.migrator.cancel_task(id).await.unwrap();
        assert_eq!(
            fx.migrator.get_task(id).await.unwrap().status,
            MigrationStatus::Cancelled
        );

        fx.migrator.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let after = fx.migrator.get_task(id).await.unwrap();
        assert_eq!(after.status, MigrationStatus::Cancelled);
        assert_eq!(after.progress.processed_keys, 0);
        assert!(fx.target.is_empty().await);

        // Cancelling a terminal task is a conflict.
        assert!(matches!(
            fx.migrator.cancel_task(id).await,
            Err(TopologyError::TaskTerminal { .. })
        ));
        fx.migrator.stop().await;
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let fx = fixture(fast_config()).await;
        fx.transfer.fail_next_sends(2);
        fx.migrator.start().await;

        let id = fx.migrator.submit_migration_task(task()).await.unwrap();
        let done = wait_terminal(&fx.migrator, id).await;

        assert_eq!(done.status, MigrationStatus::Completed);
        assert_eq!(done.progress.processed_keys, 1000);
        assert_eq!(done.progress.error_count, 2);
        fx.migrator.stop().await;
    }

    #[tokio::test]
    async fn test_retry_exhaustion_fails_task() {
        let config = MigratorConfig { retry_attempts: 2, ..fast_config() };
        let fx = fixture(config).await;
        fx.transfer.fail_next_sends(1000);
        fx.migrator.start().await;

        let id = fx.migrator.submit_migration_task(task()).await.unwrap();
        let done = wait_terminal(&fx.migrator, id).await;

        assert_eq!(done.status, MigrationStatus::Failed);
        assert!(done.error.is_some());
        assert_eq!(fx.migrator.stats().await.failed_tasks, 1);
        fx.migrator.stop().await;
    }

    #[tokio::test]
    async fn test_rollback_clears_partial_transfer() {
        let config = MigratorConfig {
            retry_attempts: 0,
            enable_rollback: true,
            ..fast_config()
        };
        let fx = fixture(config).await;
        fx.migrator.start().await;

        fx.transfer.fail_next_sends(1000);
        let id = fx.migrator.submit_migration_task(task()).await.unwrap();
        let done = wait_terminal(&fx.migrator, id).await;

        assert_eq!(done.status, MigrationStatus::Failed);
        assert!(fx.target.is_empty().await);
        fx.migrator.stop().await;
    }

    #[tokio::test]
    async fn test_progress_never_exceeds_total() {
        let fx = fixture(fast_config()).await;
        fx.migrator.start().await;
        let id = fx.migrator.submit_migration_task(task()).await.unwrap();

        loop {
            let t = fx.migrator.get_task(id).await.unwrap();
            if t.progress.total_keys > 0 {
                assert!(t.progress.processed_keys <= t.progress.total_keys);
            }
            if t.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        fx.migrator.stop().await;
    }

    #[tokio::test]
    async fn test_priority_orders_queue() {
        let fx = fixture(fast_config()).await;
        let low = fx.migrator.submit_migration_task(task()).await.unwrap();
        let mut urgent = task();
        urgent.priority = 10;
        let high = fx.migrator.submit_migration_task(urgent).await.unwrap();

        let queue = fx.migrator.queue.lock().await;
        assert_eq!(queue.front(), Some(&high));
        assert_eq!(queue.back(), Some(&low));
    }
}
