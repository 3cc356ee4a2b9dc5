//! Integration test infrastructure for Cadence CI.
//!
//! In-memory adapters for the scheduling core's ports, plus fixtures for
//! pipeline configurations and materialized runs.
//!
//! # Usage
//!
//! ```ignore
//! use cadence_tests::{InMemoryTimelineRepository, TimelineHarness};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = TimelineHarness::new();
//!     harness.repository.push(TimelineRunFixture::new(1, "up", 1).at("git", 10).build());
//!     harness.timeline.update().await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,cadence_scheduler=debug,cadence_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
