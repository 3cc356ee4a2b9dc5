//! Fan-in dependency resolution and the pipeline timeline for Cadence CI.
//!
//! The dependency graph decides whether a revision of a material shared with
//! upstream pipelines should be ignored. The timeline keeps every pipeline
//! run in natural and schedule order for the trigger logic to query.

pub mod config;
pub mod dependency_graph;
pub mod telemetry;
pub mod timeline;
pub mod upstream;

pub use config::{SchedulerConfig, TelemetryConfig};
pub use dependency_graph::{
    BuildQueue, PipelineConfigDependencyGraph, PipelineConfigQueueEntry, ResolverOptions,
};
pub use telemetry::{TelemetryError, init_tracing};
pub use timeline::PipelineTimeline;
pub use upstream::{UpstreamError, UpstreamGraphBuilder};
