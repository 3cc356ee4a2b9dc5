//! Scheduler configuration.

use crate::dependency_graph::ResolverOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings for the fan-in resolver and the pipeline timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Treat a shared material missing from every upstream declaration as
    /// a hard error rather than a revision that is never ignored.
    #[serde(default = "default_strict_material_lookup")]
    pub strict_material_lookup: bool,
    /// Warn when a timeline update holds its locks longer than this.
    #[serde(default = "default_slow_update_threshold_ms")]
    pub slow_update_threshold_ms: u64,
    /// Logging setup.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_strict_material_lookup() -> bool {
    true
}

fn default_slow_update_threshold_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default filter directive, used when `RUST_LOG` is not set.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strict_material_lookup: default_strict_material_lookup(),
            slow_update_threshold_ms: default_slow_update_threshold_ms(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> cadence_core::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(yaml: &str) -> cadence_core::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn with_strict_material_lookup(mut self, strict: bool) -> Self {
        self.strict_material_lookup = strict;
        self
    }

    pub fn with_slow_update_threshold(mut self, threshold: Duration) -> Self {
        self.slow_update_threshold_ms = threshold.as_millis() as u64;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn slow_update_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_update_threshold_ms)
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            strict_material_lookup: self.strict_material_lookup,
        }
    }
}
