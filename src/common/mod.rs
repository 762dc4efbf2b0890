// # Common Types and Traits
//
// Shared scalar identifiers and lightweight telemetry types used across the
// controller, worker, and job modules. Kept deliberately small: most of the
// domain's real structure lives in `catalog` (data model) and the component
// modules themselves.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Name of a worker node, e.g. `"worker-03"`.
pub type WorkerId = String;

/// Name of a database family, e.g. `"LSST"`.
pub type FamilyName = String;

/// Name of a database within a family.
pub type DatabaseName = String;

/// Chunk number. Values whose string form starts with `_` are rejected at
/// parse time upstream of this crate (see catalog::Chunk::parse_number).
pub type ChunkNumber = u64;

/// Globally unique request identifier (process lifetime, per invariant 3).
pub type RequestId = u64;

/// Globally unique job identifier.
pub type JobId = u64;

/// Health status of a component, used uniformly by the health/rebalance
/// loop (C9) and by per-component statistics reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// A single metric sample, for ad hoc component statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
}

/// Rolling statistics for a long-lived component (connector, job queue,
/// worker engine). Not persisted; read by health checks and logged on
/// state transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatistics {
    pub component_name: String,
    pub uptime: Duration,
    pub total_operations: u64,
    pub failed_operations: u64,
    pub custom_metrics: HashMap<String, MetricValue>,
}

impl ComponentStatistics {
    pub fn new(component_name: impl Into<String>) -> Self {
        Self {
            component_name: component_name.into(),
            uptime: Duration::from_secs(0),
            total_operations: 0,
            failed_operations: 0,
            custom_metrics: HashMap::new(),
        }
    }

    pub fn record_success(&mut self) {
        self.total_operations += 1;
    }

    pub fn record_failure(&mut self) {
        self.total_operations += 1;
        self.failed_operations += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_statistics_tracks_failures() {
        let mut stats = ComponentStatistics::new("worker-engine");
        stats.record_success();
        stats.record_failure();
        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.failed_operations, 1);
    }
}
