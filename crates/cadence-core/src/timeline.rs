//! Timeline entry types.
//!
//! A [`TimelineRun`] is a pipeline run as read back from persistence. Once it
//! has been placed in the timeline it becomes a [`PipelineTimelineEntry`],
//! which carries its natural-order neighbors. A neighbor slot is written at
//! most once: either when the entry is built, or by the first later entry
//! that lands next to it on an empty side.

use crate::ids::{Fingerprint, ModificationId, PipelineName, PipelineRunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

/// The revision of one material that a run was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineRevision {
    pub date: DateTime<Utc>,
    pub revision: String,
    #[serde(default)]
    pub folder: Option<String>,
    pub modification_id: ModificationId,
}

impl TimelineRevision {
    pub fn new(
        date: DateTime<Utc>,
        revision: impl Into<String>,
        modification_id: ModificationId,
    ) -> Self {
        Self {
            date,
            revision: revision.into(),
            folder: None,
            modification_id,
        }
    }
}

/// A materialized pipeline run that has not been indexed yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineRun {
    pub id: PipelineRunId,
    pub pipeline_name: PipelineName,
    pub counter: u32,
    /// Revisions per material fingerprint; the first revision of each list
    /// is the one natural ordering looks at.
    pub revisions: BTreeMap<Fingerprint, Vec<TimelineRevision>>,
}

impl TimelineRun {
    pub fn new(
        id: PipelineRunId,
        pipeline_name: impl Into<PipelineName>,
        counter: u32,
        revisions: BTreeMap<Fingerprint, Vec<TimelineRevision>>,
    ) -> Self {
        Self {
            id,
            pipeline_name: pipeline_name.into(),
            counter,
            revisions,
        }
    }

    fn by_counter(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialEq for TimelineRun {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TimelineRun {}

impl PartialOrd for TimelineRun {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Natural order.
///
/// For every material both runs were built from, the earlier of the two
/// first-revision dates is attributed to the run that owns it. The run that
/// owns the earliest of those dates comes first. When no material differs,
/// or both runs claim the earliest date, the pipeline counter decides.
impl Ord for TimelineRun {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.id == other.id {
            return Ordering::Equal;
        }

        let mut earlier: Vec<(DateTime<Utc>, Ordering)> = Vec::new();
        for (fingerprint, these) in &self.revisions {
            let Some(those) = other.revisions.get(fingerprint) else {
                continue;
            };
            let (Some(this), Some(that)) = (these.first(), those.first()) else {
                continue;
            };
            match this.date.cmp(&that.date) {
                Ordering::Equal => {}
                Ordering::Less => earlier.push((this.date, Ordering::Less)),
                Ordering::Greater => earlier.push((that.date, Ordering::Greater)),
            }
        }

        let Some(earliest) = earlier.iter().map(|(date, _)| *date).min() else {
            return self.by_counter(other);
        };

        let mut owners = earlier
            .iter()
            .filter(|(date, _)| *date == earliest)
            .map(|(_, owner)| *owner);
        let first = owners.next().unwrap_or(Ordering::Equal);
        if owners.any(|owner| owner != first) {
            return self.by_counter(other);
        }
        first
    }
}

/// A neighbor slot's value.
///
/// Neighbors known at construction are older entries and are held strongly.
/// Neighbors filled in later are newer entries and are held weakly, so two
/// entries never own each other.
enum Neighbor {
    Frozen(Arc<PipelineTimelineEntry>),
    Filled(Weak<PipelineTimelineEntry>),
}

impl Neighbor {
    fn get(&self) -> Option<Arc<PipelineTimelineEntry>> {
        match self {
            Neighbor::Frozen(entry) => Some(entry.clone()),
            Neighbor::Filled(entry) => entry.upgrade(),
        }
    }
}

fn frozen(neighbor: Option<Arc<PipelineTimelineEntry>>) -> OnceLock<Neighbor> {
    match neighbor {
        Some(entry) => OnceLock::from(Neighbor::Frozen(entry)),
        None => OnceLock::new(),
    }
}

/// A pipeline run placed in the timeline, with its neighbor links.
///
/// Each neighbor slot is written at most once. A slot that was empty at
/// insertion is filled by the first later entry inserted adjacent to it on
/// that side, and keeps that value from then on.
pub struct PipelineTimelineEntry {
    run: TimelineRun,
    inserted_before: OnceLock<Neighbor>,
    inserted_after: OnceLock<Neighbor>,
    natural_order: f64,
}

impl PipelineTimelineEntry {
    /// Build an entry with the natural-order neighbors it has right now.
    ///
    /// `inserted_before` is the next-higher entry, `inserted_after` the
    /// next-lower one. `natural_order` is derived from these and never changes.
    pub fn freeze(
        run: TimelineRun,
        inserted_before: Option<Arc<PipelineTimelineEntry>>,
        inserted_after: Option<Arc<PipelineTimelineEntry>>,
    ) -> Self {
        let lower = inserted_after.as_ref().map_or(0.0, |e| e.natural_order);
        let natural_order = match &inserted_before {
            Some(higher) => (lower + higher.natural_order) / 2.0,
            None => lower + 1.0,
        };
        Self {
            run,
            inserted_before: frozen(inserted_before),
            inserted_after: frozen(inserted_after),
            natural_order,
        }
    }

    pub fn id(&self) -> PipelineRunId {
        self.run.id
    }

    pub fn pipeline_name(&self) -> &PipelineName {
        &self.run.pipeline_name
    }

    pub fn counter(&self) -> u32 {
        self.run.counter
    }

    pub fn revisions(&self) -> &BTreeMap<Fingerprint, Vec<TimelineRevision>> {
        &self.run.revisions
    }

    pub fn run(&self) -> &TimelineRun {
        &self.run
    }

    /// The first entry ever placed immediately after this one.
    pub fn inserted_before(&self) -> Option<Arc<PipelineTimelineEntry>> {
        self.inserted_before.get().and_then(Neighbor::get)
    }

    /// The first entry ever placed immediately before this one.
    pub fn inserted_after(&self) -> Option<Arc<PipelineTimelineEntry>> {
        self.inserted_after.get().and_then(Neighbor::get)
    }

    /// Record `later` as the next-higher neighbor if that slot is still empty.
    ///
    /// Returns whether the slot was filled.
    pub fn fill_inserted_before(&self, later: &Arc<PipelineTimelineEntry>) -> bool {
        self.inserted_before
            .set(Neighbor::Filled(Arc::downgrade(later)))
            .is_ok()
    }

    /// Record `later` as the next-lower neighbor if that slot is still empty.
    pub fn fill_inserted_after(&self, later: &Arc<PipelineTimelineEntry>) -> bool {
        self.inserted_after
            .set(Neighbor::Filled(Arc::downgrade(later)))
            .is_ok()
    }

    pub fn natural_order(&self) -> f64 {
        self.natural_order
    }
}

impl fmt::Debug for PipelineTimelineEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTimelineEntry")
            .field("id", &self.run.id)
            .field("pipeline_name", &self.run.pipeline_name)
            .field("counter", &self.run.counter)
            .field("natural_order", &self.natural_order)
            .field("inserted_before", &self.inserted_before().map(|e| e.id()))
            .field("inserted_after", &self.inserted_after().map(|e| e.id()))
            .finish()
    }
}

impl PartialEq for PipelineTimelineEntry {
    fn eq(&self, other: &Self) -> bool {
        self.run == other.run
    }
}

impl Eq for PipelineTimelineEntry {}

impl PartialOrd for PipelineTimelineEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PipelineTimelineEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.run.cmp(&other.run)
    }
}

impl Borrow<TimelineRun> for Arc<PipelineTimelineEntry> {
    fn borrow(&self) -> &TimelineRun {
        &self.run
    }
}
