//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the scheduling core and the
//! adapters that own persistence, transactions and configuration.

use crate::ids::{PipelineName, PipelineRunId};
use crate::pipeline::PipelineConfigs;
use crate::timeline::{PipelineTimelineEntry, TimelineRun};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Persistence for the pipeline timeline.
#[async_trait]
pub trait TimelineRepository: Send + Sync {
    /// Materialized runs with an id greater than `after`, in ascending id order.
    ///
    /// `None` means nothing has been indexed yet and every run is new.
    async fn runs_after(&self, after: Option<PipelineRunId>) -> Result<Vec<TimelineRun>>;

    /// Record the natural order computed when a run was indexed.
    async fn update_natural_order(&self, id: PipelineRunId, natural_order: f64) -> Result<()>;
}

/// A unit of work that is either committed or rolled back.
#[async_trait]
pub trait Transaction: Send {
    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Source of transactions for the timeline's bulk updates.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// Notified once per pipeline after a timeline update commits.
#[async_trait]
pub trait TimelineUpdateListener: Send + Sync {
    /// `oldest` is the earliest new entry (in natural order) for its
    /// pipeline; `entries` is that pipeline's full natural-order set.
    async fn added(
        &self,
        oldest: Arc<PipelineTimelineEntry>,
        entries: Vec<Arc<PipelineTimelineEntry>>,
    ) -> Result<()>;
}

/// Supplies the current pipeline configuration snapshot.
#[async_trait]
pub trait PipelineConfigProvider: Send + Sync {
    async fn current(&self) -> Result<Arc<PipelineConfigs>>;

    /// Whether a pipeline with this name exists in the current snapshot.
    async fn has_pipeline(&self, name: &PipelineName) -> Result<bool> {
        Ok(self.current().await?.get(name).is_some())
    }
}
