//! In-memory adapters for the scheduling core's ports.

use async_trait::async_trait;
use cadence_core::ids::PipelineRunId;
use cadence_core::pipeline::PipelineConfigs;
use cadence_core::ports::{
    PipelineConfigProvider, TimelineRepository, TimelineUpdateListener, Transaction,
    TransactionManager,
};
use cadence_core::timeline::{PipelineTimelineEntry, TimelineRun};
use cadence_core::{Error, Result};
use cadence_scheduler::{PipelineTimeline, SchedulerConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Materialized runs kept in memory, keyed by id.
#[derive(Default)]
pub struct InMemoryTimelineRepository {
    runs: Mutex<Vec<TimelineRun>>,
    natural_orders: Mutex<HashMap<PipelineRunId, f64>>,
    fail_natural_order_for: Mutex<Option<PipelineRunId>>,
    natural_order_delay: Mutex<Option<Duration>>,
    reads: AtomicUsize,
}

impl InMemoryTimelineRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a run visible to the next update.
    pub fn push(&self, run: TimelineRun) {
        lock(&self.runs).push(run);
    }

    /// Store a run under the next free id, as a database sequence would.
    pub fn push_next(&self, build: impl FnOnce(PipelineRunId) -> TimelineRun) -> PipelineRunId {
        let mut runs = lock(&self.runs);
        let next = runs.iter().map(|run| run.id.value()).max().unwrap_or(0) + 1;
        let id = PipelineRunId::new(next);
        runs.push(build(id));
        id
    }

    /// Seed runs from a JSON array, the way they would be exported from a database.
    pub fn load_json(&self, json: &str) -> anyhow::Result<usize> {
        let runs: Vec<TimelineRun> = serde_json::from_str(json)?;
        let count = runs.len();
        lock(&self.runs).extend(runs);
        Ok(count)
    }

    /// Fail the natural-order write for one run.
    pub fn fail_natural_order_for(&self, id: Option<PipelineRunId>) {
        *lock(&self.fail_natural_order_for) = id;
    }

    /// Make every natural-order write take this long.
    pub fn slow_natural_order(&self, delay: Option<Duration>) {
        *lock(&self.natural_order_delay) = delay;
    }

    pub fn natural_order_of(&self, id: PipelineRunId) -> Option<f64> {
        lock(&self.natural_orders).get(&id).copied()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimelineRepository for InMemoryTimelineRepository {
    async fn runs_after(&self, after: Option<PipelineRunId>) -> Result<Vec<TimelineRun>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut runs: Vec<TimelineRun> = lock(&self.runs)
            .iter()
            .filter(|run| after.is_none_or(|after| run.id > after))
            .cloned()
            .collect();
        runs.sort_by_key(|run| run.id);
        Ok(runs)
    }

    async fn update_natural_order(&self, id: PipelineRunId, natural_order: f64) -> Result<()> {
        let delay = *lock(&self.natural_order_delay);
        if let Some(delay) = delay {
            debug!(%id, delay_ms = delay.as_millis() as u64, "Delaying natural-order write");
            tokio::time::sleep(delay).await;
        }
        if *lock(&self.fail_natural_order_for) == Some(id) {
            debug!(%id, "Failing natural-order write");
            return Err(Error::Database(format!(
                "could not write natural order for {id}"
            )));
        }
        lock(&self.natural_orders).insert(id, natural_order);
        Ok(())
    }
}

/// Counts commits and rollbacks; can be told to fail either way.
#[derive(Default)]
pub struct InMemoryTransactionManager {
    state: Arc<TransactionState>,
}

#[derive(Default)]
struct TransactionState {
    begun: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
}

impl InMemoryTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_begin(&self, fail: bool) {
        self.state.fail_begin.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commit(&self, fail: bool) {
        self.state.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn begun(&self) -> usize {
        self.state.begun.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.state.rollbacks.load(Ordering::SeqCst)
    }
}

struct InMemoryTransaction {
    state: Arc<TransactionState>,
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        if self.state.fail_commit.load(Ordering::SeqCst) {
            return Err(Error::Transaction("commit rejected".to_string()));
        }
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for InMemoryTransactionManager {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        if self.state.fail_begin.load(Ordering::SeqCst) {
            return Err(Error::Transaction("no connection available".to_string()));
        }
        self.state.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryTransaction {
            state: self.state.clone(),
        }))
    }
}

/// What a listener was told about one pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub pipeline: String,
    pub oldest: PipelineRunId,
    pub entries: Vec<PipelineRunId>,
}

#[derive(Default)]
pub struct RecordingListener {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    pub fn clear(&self) {
        lock(&self.notifications).clear();
    }
}

#[async_trait]
impl TimelineUpdateListener for RecordingListener {
    async fn added(
        &self,
        oldest: Arc<PipelineTimelineEntry>,
        entries: Vec<Arc<PipelineTimelineEntry>>,
    ) -> Result<()> {
        lock(&self.notifications).push(Notification {
            pipeline: oldest.pipeline_name().to_lower().to_string(),
            oldest: oldest.id(),
            entries: entries.iter().map(|entry| entry.id()).collect(),
        });
        Ok(())
    }
}

/// A listener that always fails.
pub struct FailingListener;

#[async_trait]
impl TimelineUpdateListener for FailingListener {
    async fn added(
        &self,
        oldest: Arc<PipelineTimelineEntry>,
        _entries: Vec<Arc<PipelineTimelineEntry>>,
    ) -> Result<()> {
        Err(Error::Internal(format!(
            "listener refused {}",
            oldest.id()
        )))
    }
}

/// Serves a replaceable configuration snapshot.
pub struct InMemoryConfigProvider {
    configs: RwLock<Arc<PipelineConfigs>>,
}

impl InMemoryConfigProvider {
    pub fn new(configs: PipelineConfigs) -> Self {
        Self {
            configs: RwLock::new(Arc::new(configs)),
        }
    }

    pub fn replace(&self, configs: PipelineConfigs) {
        *self.configs.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(configs);
    }
}

#[async_trait]
impl PipelineConfigProvider for InMemoryConfigProvider {
    async fn current(&self) -> Result<Arc<PipelineConfigs>> {
        Ok(self
            .configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

/// A timeline wired to in-memory adapters.
pub struct TimelineHarness {
    pub repository: Arc<InMemoryTimelineRepository>,
    pub transactions: Arc<InMemoryTransactionManager>,
    pub listener: Arc<RecordingListener>,
    pub timeline: PipelineTimeline,
}

impl TimelineHarness {
    pub fn new() -> Self {
        Self::with_listeners(vec![], &SchedulerConfig::default())
    }

    /// The harness's recording listener is always registered first.
    pub fn with_listeners(
        extra: Vec<Arc<dyn TimelineUpdateListener>>,
        config: &SchedulerConfig,
    ) -> Self {
        let repository = Arc::new(InMemoryTimelineRepository::new());
        let transactions = Arc::new(InMemoryTransactionManager::new());
        let listener = Arc::new(RecordingListener::new());

        let mut listeners: Vec<Arc<dyn TimelineUpdateListener>> = vec![listener.clone()];
        listeners.extend(extra);

        let timeline = PipelineTimeline::with_config(
            repository.clone(),
            transactions.clone(),
            listeners,
            config,
        );

        Self {
            repository,
            transactions,
            listener,
            timeline,
        }
    }
}

impl Default for TimelineHarness {
    fn default() -> Self {
        Self::new()
    }
}
