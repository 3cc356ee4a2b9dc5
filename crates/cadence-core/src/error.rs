//! Error types for Cadence CI scheduling.

use crate::ids::{Fingerprint, PipelineName, PipelineRunId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("Dependency cycle detected involving pipeline: {0}")]
    DependencyCycle(String),

    #[error(
        "Material with fingerprint {fingerprint} not found on upstream pipeline {pipeline}; \
         the configuration may have changed since the build cause was produced"
    )]
    MaterialNotFound {
        fingerprint: Fingerprint,
        pipeline: PipelineName,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    // Timeline errors
    #[error("Timeline entry {id} not found for pipeline {pipeline}")]
    TimelineEntryNotFound {
        id: PipelineRunId,
        pipeline: PipelineName,
    },

    #[error("Pipeline run {0} is not indexed in the timeline")]
    PipelineRunNotFound(PipelineRunId),

    #[error("Timeline entry {id} for pipeline {pipeline} is already indexed")]
    DuplicateTimelineEntry {
        id: PipelineRunId,
        pipeline: PipelineName,
    },

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
