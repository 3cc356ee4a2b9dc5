//! Pipeline timeline: every pipeline run in natural order and in schedule order.
//!
//! Two locks guard the two orders. Whenever both are needed the natural-order
//! lock is taken first and released last; see [`WriteGuards`]. Readers only
//! ever hold one of them.
//!
//! Updates are two-phase. New runs are staged in a [`TimelineBatch`] while the
//! persistence transaction is open, and only merged into the live index once
//! that transaction commits. A rolled back or cancelled update leaves the
//! index, the neighbor links and the high-water mark untouched.

use crate::config::SchedulerConfig;
use cadence_core::ids::{PipelineName, PipelineRunId};
use cadence_core::ports::{
    TimelineRepository, TimelineUpdateListener, Transaction, TransactionManager,
};
use cadence_core::timeline::{PipelineTimelineEntry, TimelineRun};
use cadence_core::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

type NaturalOrderIndex = HashMap<PipelineName, BTreeSet<Arc<PipelineTimelineEntry>>>;
type ScheduleOrderIndex = HashMap<PipelineName, Vec<Arc<PipelineTimelineEntry>>>;

const NO_ENTRIES: i64 = i64::MIN;

/// Both write locks, acquired natural order first.
///
/// Fields drop in declaration order, so the schedule-order lock is released
/// before the natural-order lock.
struct WriteGuards<'a> {
    schedule: RwLockWriteGuard<'a, ScheduleOrderIndex>,
    natural: RwLockWriteGuard<'a, NaturalOrderIndex>,
}

/// An empty neighbor slot that a staged entry fills once the batch is merged.
enum Fill {
    /// `entry` landed directly above `neighbor`.
    Above {
        neighbor: Arc<PipelineTimelineEntry>,
        entry: Arc<PipelineTimelineEntry>,
    },
    /// `entry` landed directly below `neighbor`.
    Below {
        neighbor: Arc<PipelineTimelineEntry>,
        entry: Arc<PipelineTimelineEntry>,
    },
}

impl Fill {
    fn apply(&self) -> bool {
        match self {
            Fill::Above { neighbor, entry } => neighbor.fill_inserted_before(entry),
            Fill::Below { neighbor, entry } => neighbor.fill_inserted_after(entry),
        }
    }
}

/// Runs staged during one update, not yet visible to readers.
///
/// Nothing shared is touched while staging: neighbor fills and the new
/// high-water mark are collected here and applied by the merge.
struct TimelineBatch<'a> {
    live: &'a NaturalOrderIndex,
    checkpoint: Option<PipelineRunId>,
    highest: Option<PipelineRunId>,
    staged: HashMap<PipelineName, BTreeSet<Arc<PipelineTimelineEntry>>>,
    added: Vec<Arc<PipelineTimelineEntry>>,
    fills: Vec<Fill>,
}

/// The outcome of a successful materialization, ready to merge.
struct StagedEntries {
    added: Vec<Arc<PipelineTimelineEntry>>,
    fills: Vec<Fill>,
    highest: Option<PipelineRunId>,
}

impl<'a> TimelineBatch<'a> {
    fn new(live: &'a NaturalOrderIndex, checkpoint: Option<PipelineRunId>) -> Self {
        Self {
            live,
            checkpoint,
            highest: None,
            staged: HashMap::new(),
            added: Vec::new(),
            fills: Vec::new(),
        }
    }

    /// Place a run in natural order and capture its current neighbors.
    ///
    /// Neighbors are looked up across the live index and everything staged
    /// earlier in this batch.
    fn add(&mut self, run: TimelineRun) -> Result<Arc<PipelineTimelineEntry>> {
        let live = self.live.get(&run.pipeline_name);
        let staged = self.staged.entry(run.pipeline_name.clone()).or_default();

        if live.is_some_and(|entries| entries.contains(&run)) || staged.contains(&run) {
            return Err(Error::DuplicateTimelineEntry {
                id: run.id,
                pipeline: run.pipeline_name,
            });
        }

        let above = (Bound::Excluded(&run), Bound::Unbounded);
        let below = (Bound::Unbounded, Bound::Excluded(&run));

        let higher = live
            .and_then(|entries| entries.range::<TimelineRun, _>(above).next())
            .into_iter()
            .chain(staged.range::<TimelineRun, _>(above).next())
            .min()
            .cloned();
        let lower = live
            .and_then(|entries| entries.range::<TimelineRun, _>(below).next_back())
            .into_iter()
            .chain(staged.range::<TimelineRun, _>(below).next_back())
            .max()
            .cloned();

        let entry = Arc::new(PipelineTimelineEntry::freeze(
            run,
            higher.clone(),
            lower.clone(),
        ));
        staged.insert(entry.clone());
        self.added.push(entry.clone());
        self.highest = self.highest.max(Some(entry.id()));

        if let Some(neighbor) = lower {
            self.fills.push(Fill::Above {
                neighbor,
                entry: entry.clone(),
            });
        }
        if let Some(neighbor) = higher {
            self.fills.push(Fill::Below {
                neighbor,
                entry: entry.clone(),
            });
        }

        debug!(
            pipeline = %entry.pipeline_name(),
            id = %entry.id(),
            counter = entry.counter(),
            natural_order = entry.natural_order(),
            "Staged timeline entry"
        );

        Ok(entry)
    }

    fn into_staged(self) -> StagedEntries {
        StagedEntries {
            added: self.added,
            fills: self.fills,
            highest: self.highest,
        }
    }
}

/// An open transaction that is rolled back if the update is dropped
/// before reaching commit or rollback.
struct PendingTransaction(Option<Box<dyn Transaction>>);

impl PendingTransaction {
    async fn commit(mut self) -> Result<()> {
        match self.0.take() {
            Some(transaction) => transaction.commit().await,
            None => Ok(()),
        }
    }

    async fn rollback(mut self) -> Result<()> {
        match self.0.take() {
            Some(transaction) => transaction.rollback().await,
            None => Ok(()),
        }
    }
}

impl Drop for PendingTransaction {
    fn drop(&mut self) {
        let Some(transaction) = self.0.take() else {
            return;
        };
        warn!("Timeline update cancelled before completion, rolling back");
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = transaction.rollback().await {
                        error!(error = %e, "Failed to roll back cancelled timeline update");
                    }
                });
            }
            Err(_) => error!("No runtime left to roll back cancelled timeline update"),
        }
    }
}

/// The in-memory pipeline timeline.
pub struct PipelineTimeline {
    repository: Arc<dyn TimelineRepository>,
    transactions: Arc<dyn TransactionManager>,
    listeners: Vec<Arc<dyn TimelineUpdateListener>>,
    natural_order: RwLock<NaturalOrderIndex>,
    schedule_order: RwLock<ScheduleOrderIndex>,
    maximum_id: AtomicI64,
    slow_update_threshold: Duration,
}

impl PipelineTimeline {
    pub fn new(
        repository: Arc<dyn TimelineRepository>,
        transactions: Arc<dyn TransactionManager>,
        listeners: Vec<Arc<dyn TimelineUpdateListener>>,
    ) -> Self {
        Self::with_config(repository, transactions, listeners, &SchedulerConfig::default())
    }

    pub fn with_config(
        repository: Arc<dyn TimelineRepository>,
        transactions: Arc<dyn TransactionManager>,
        listeners: Vec<Arc<dyn TimelineUpdateListener>>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            repository,
            transactions,
            listeners,
            natural_order: RwLock::new(HashMap::new()),
            schedule_order: RwLock::new(HashMap::new()),
            maximum_id: AtomicI64::new(NO_ENTRIES),
            slow_update_threshold: config.slow_update_threshold(),
        }
    }

    async fn acquire_all_write_locks(&self) -> WriteGuards<'_> {
        let natural = self.natural_order.write().await;
        let schedule = self.schedule_order.write().await;
        WriteGuards { schedule, natural }
    }

    /// Highest run id ever indexed; `None` while the timeline is empty.
    pub fn maximum_id(&self) -> Option<PipelineRunId> {
        match self.maximum_id.load(Ordering::SeqCst) {
            NO_ENTRIES => None,
            id => Some(PipelineRunId::new(id)),
        }
    }

    /// Pull newly materialized runs into the timeline inside a transaction.
    ///
    /// Listeners hear about the new entries only if the transaction commits.
    /// On any failure the staged entries are dropped and the error is
    /// returned; the live index and the high-water mark are untouched. If the
    /// returned future is dropped early, the transaction is rolled back in
    /// the background and the runs are picked up by the next update.
    pub async fn update(&self) -> Result<usize> {
        let mut guards = self.acquire_all_write_locks().await;
        let transaction = PendingTransaction(Some(self.transactions.begin().await?));

        let mut batch = TimelineBatch::new(&guards.natural, self.maximum_id());
        let materialized = self.materialize(&mut batch).await;
        let staged = batch.into_staged();

        let outcome = match materialized {
            Ok(()) => transaction.commit().await,
            Err(e) => {
                if let Err(rollback_error) = transaction.rollback().await {
                    error!(error = %rollback_error, "Failed to roll back timeline update");
                }
                Err(e)
            }
        };

        if let Err(e) = outcome {
            warn!(
                discarded = staged.added.len(),
                error = %e,
                "Timeline update rolled back"
            );
            return Err(e);
        }

        self.merge(&mut guards, &staged);
        let notifications = Self::oldest_per_pipeline(&guards.natural, &staged.added);
        drop(guards);

        if !staged.added.is_empty() {
            info!(
                added = staged.added.len(),
                maximum_id = ?self.maximum_id(),
                "Timeline update committed"
            );
        }

        self.notify_listeners(notifications).await;
        Ok(staged.added.len())
    }

    /// Rebuild the timeline at startup, outside of any transaction.
    pub async fn update_timeline_on_init(&self) -> Result<usize> {
        let mut guards = self.acquire_all_write_locks().await;

        let mut batch = TimelineBatch::new(&guards.natural, self.maximum_id());
        self.materialize(&mut batch).await?;
        let staged = batch.into_staged();

        self.merge(&mut guards, &staged);
        info!(
            entries = staged.added.len(),
            maximum_id = ?self.maximum_id(),
            "Timeline initialized"
        );
        Ok(staged.added.len())
    }

    async fn materialize(&self, batch: &mut TimelineBatch<'_>) -> Result<()> {
        let started = Instant::now();

        let runs = self.repository.runs_after(batch.checkpoint).await?;
        for run in runs {
            let entry = batch.add(run)?;
            self.repository
                .update_natural_order(entry.id(), entry.natural_order())
                .await?;
        }

        let elapsed = started.elapsed();
        if elapsed > self.slow_update_threshold {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                staged = batch.added.len(),
                "Timeline materialization held write locks longer than expected"
            );
        }
        Ok(())
    }

    /// Make a staged batch visible. Runs without awaiting, so it cannot be
    /// interrupted halfway.
    fn merge(&self, guards: &mut WriteGuards<'_>, staged: &StagedEntries) {
        for entry in &staged.added {
            let name = entry.pipeline_name().clone();
            guards
                .natural
                .entry(name.clone())
                .or_default()
                .insert(entry.clone());
            guards.schedule.entry(name).or_default().push(entry.clone());
        }
        for fill in &staged.fills {
            fill.apply();
        }
        if let Some(highest) = staged.highest {
            self.maximum_id.fetch_max(highest.value(), Ordering::SeqCst);
        }
    }

    /// The oldest new entry of every affected pipeline, with that pipeline's
    /// full natural-order set.
    fn oldest_per_pipeline(
        natural: &NaturalOrderIndex,
        added: &[Arc<PipelineTimelineEntry>],
    ) -> Vec<(Arc<PipelineTimelineEntry>, Vec<Arc<PipelineTimelineEntry>>)> {
        let mut oldest: BTreeMap<&PipelineName, &Arc<PipelineTimelineEntry>> = BTreeMap::new();
        for entry in added {
            oldest
                .entry(entry.pipeline_name())
                .and_modify(|current| {
                    if entry < *current {
                        *current = entry;
                    }
                })
                .or_insert(entry);
        }

        oldest
            .into_iter()
            .map(|(name, entry)| {
                let entries = natural
                    .get(name)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default();
                (entry.clone(), entries)
            })
            .collect()
    }

    async fn notify_listeners(
        &self,
        notifications: Vec<(Arc<PipelineTimelineEntry>, Vec<Arc<PipelineTimelineEntry>>)>,
    ) {
        for listener in &self.listeners {
            for (oldest, entries) in &notifications {
                if let Err(e) = listener.added(oldest.clone(), entries.clone()).await {
                    warn!(
                        pipeline = %oldest.pipeline_name(),
                        error = %e,
                        "Ignoring failure while notifying timeline listener"
                    );
                }
            }
        }
    }

    /// All entries of a pipeline, in natural order.
    pub async fn get_entries_for(&self, pipeline: &PipelineName) -> Vec<Arc<PipelineTimelineEntry>> {
        let natural = self.natural_order.read().await;
        natural
            .get(pipeline)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The entry that came before run `id` at the time it was indexed.
    pub async fn run_before(
        &self,
        id: PipelineRunId,
        pipeline: &PipelineName,
    ) -> Result<Option<Arc<PipelineTimelineEntry>>> {
        let entry = self.find_in_pipeline(id, pipeline).await?;
        Ok(entry.inserted_after())
    }

    /// The entry that came after run `id` at the time it was indexed.
    pub async fn run_after(
        &self,
        id: PipelineRunId,
        pipeline: &PipelineName,
    ) -> Result<Option<Arc<PipelineTimelineEntry>>> {
        let entry = self.find_in_pipeline(id, pipeline).await?;
        Ok(entry.inserted_before())
    }

    async fn find_in_pipeline(
        &self,
        id: PipelineRunId,
        pipeline: &PipelineName,
    ) -> Result<Arc<PipelineTimelineEntry>> {
        let natural = self.natural_order.read().await;
        natural
            .get(pipeline)
            .and_then(|entries| entries.iter().find(|entry| entry.id() == id))
            .cloned()
            .ok_or_else(|| Error::TimelineEntryNotFound {
                id,
                pipeline: pipeline.clone(),
            })
    }

    /// Id of the run that came before run `id`, whatever its pipeline.
    pub async fn pipeline_before(&self, id: PipelineRunId) -> Result<Option<PipelineRunId>> {
        let entry = self.find_anywhere(id).await?;
        Ok(entry.inserted_after().map(|before| before.id()))
    }

    /// Id of the run that came after run `id`, whatever its pipeline.
    pub async fn pipeline_after(&self, id: PipelineRunId) -> Result<Option<PipelineRunId>> {
        let entry = self.find_anywhere(id).await?;
        Ok(entry.inserted_before().map(|after| after.id()))
    }

    async fn find_anywhere(&self, id: PipelineRunId) -> Result<Arc<PipelineTimelineEntry>> {
        let natural = self.natural_order.read().await;
        natural
            .values()
            .flat_map(|entries| entries.iter())
            .find(|entry| entry.id() == id)
            .cloned()
            .ok_or(Error::PipelineRunNotFound(id))
    }

    pub async fn instance_count(&self, pipeline: &PipelineName) -> usize {
        let schedule = self.schedule_order.read().await;
        schedule.get(pipeline).map_or(0, Vec::len)
    }

    /// The `index`-th run of a pipeline in schedule order.
    pub async fn instance_for(
        &self,
        pipeline: &PipelineName,
        index: usize,
    ) -> Option<Arc<PipelineTimelineEntry>> {
        let schedule = self.schedule_order.read().await;
        schedule
            .get(pipeline)
            .and_then(|entries| entries.get(index))
            .cloned()
    }

    /// The run of a pipeline with the given counter, searching newest first.
    pub async fn get_entry_for(
        &self,
        pipeline: &PipelineName,
        counter: u32,
    ) -> Option<Arc<PipelineTimelineEntry>> {
        let schedule = self.schedule_order.read().await;
        schedule
            .get(pipeline)
            .and_then(|entries| entries.iter().rev().find(|entry| entry.counter() == counter))
            .cloned()
    }

    /// Highest run id indexed for one pipeline.
    pub async fn maximum_id_for(&self, pipeline: &PipelineName) -> Option<PipelineRunId> {
        let schedule = self.schedule_order.read().await;
        schedule
            .get(pipeline)
            .and_then(|entries| entries.iter().map(|entry| entry.id()).max())
    }

    /// Drop everything. Only for tests.
    pub async fn clear_which_is_evil_and_should_not_be_used_in_real_world(&self) {
        let mut guards = self.acquire_all_write_locks().await;
        guards.natural.clear();
        guards.schedule.clear();
        self.maximum_id.store(NO_ENTRIES, Ordering::SeqCst);
    }
}
