// # Health / rebalance loop (C9)
//
// The only component allowed to call the eviction callback (spec §4.9): at
// one cadence it pings every enabled worker with ECHO, proposing eviction
// after a configured run of consecutive failures; at a second, slower
// cadence it drives FixUp/Replicate/Rebalance jobs per family.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::interval;

use crate::common::WorkerId;
use crate::controller::ControllerRequest;
use crate::core::Runtime;
use crate::jobs::{next_request_id, FixUpJob, Job, RebalanceJob, ReplicateJob};
use crate::protocol::ReplicaRequestBody;

/// Cadences and the failure run length that triggers eviction; all
/// configuration inputs per spec §4.9.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub probe_interval: Duration,
    pub repair_interval: Duration,
    pub failure_threshold: u32,
    pub rebalance_start_pct: f64,
    pub rebalance_stop_pct: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            repair_interval: Duration::from_secs(300),
            failure_threshold: 3,
            rebalance_start_pct: 10.0,
            rebalance_stop_pct: 5.0,
        }
    }
}

/// Invoked once per worker the probe loop has given up on. The loop itself
/// does not disable or remove the worker; that is left to the callback
/// (typically wiring in `DeleteWorkerJob`).
#[async_trait]
pub trait EvictionCallback: Send + Sync {
    async fn on_worker_unhealthy(&self, worker: &str);
}

pub struct HealthLoop {
    runtime: Arc<Runtime>,
    config: HealthConfig,
    consecutive_failures: Mutex<HashMap<WorkerId, u32>>,
    evicted: Mutex<std::collections::HashSet<WorkerId>>,
}

impl HealthLoop {
    pub fn new(runtime: Arc<Runtime>, config: HealthConfig) -> Self {
        Self {
            runtime,
            config,
            consecutive_failures: Mutex::new(HashMap::new()),
            evicted: Mutex::new(std::collections::HashSet::new()),
        }
    }

    /// Pings every enabled worker once, returning the set that failed.
    pub async fn probe_once(&self) -> Vec<WorkerId> {
        let workers = self.runtime.catalog().list_enabled_workers();
        let retry_interval = Duration::from_secs(self.runtime.config().common.request_retry_interval_sec);
        let mut unhealthy = Vec::new();

        for worker in workers {
            let mut req = ControllerRequest::new(next_request_id(), worker.name.clone(), ReplicaRequestBody::Echo { data: vec![] });
            req.keep_tracking = false;
            let ok = req.execute(self.runtime.messenger(), None, retry_interval).await.is_ok();
            if ok {
                self.consecutive_failures.lock().remove(&worker.name);
                self.evicted.lock().remove(&worker.name);
            } else {
                unhealthy.push(worker.name.clone());
            }
        }

        unhealthy
    }

    async fn repair_once(&self) {
        for family in self.runtime.catalog().list_families() {
            let mut fixup = FixUpJob::new(next_request_id(), family.name.clone());
            if let Err(e) = fixup.run(&self.runtime).await {
                tracing::warn!(family = %family.name, error = %e, "health loop fixup failed");
            }

            let mut replicate = ReplicateJob::new(next_request_id(), family.name.clone(), None);
            if let Err(e) = replicate.run(&self.runtime).await {
                tracing::warn!(family = %family.name, error = %e, "health loop replicate failed");
            }

            let mut rebalance = RebalanceJob::new(
                next_request_id(),
                family.name.clone(),
                self.config.rebalance_start_pct,
                self.config.rebalance_stop_pct,
                false,
            );
            if let Err(e) = rebalance.run(&self.runtime).await {
                tracing::warn!(family = %family.name, error = %e, "health loop rebalance failed");
            }
        }
    }

    /// Runs both cadences until cancelled. `eviction` is called once per
    /// worker per failure run, not repeatedly while it stays unhealthy.
    pub async fn run(self: Arc<Self>, eviction: Arc<dyn EvictionCallback>) {
        let mut probe_tick = interval(self.config.probe_interval);
        let mut repair_tick = interval(self.config.repair_interval);

        loop {
            tokio::select! {
                _ = probe_tick.tick() => {
                    let unhealthy = self.probe_once().await;
                    for worker in unhealthy {
                        let count = {
                            let mut failures = self.consecutive_failures.lock();
                            let entry = failures.entry(worker.clone()).or_insert(0);
                            *entry += 1;
                            *entry
                        };
                        if count >= self.config.failure_threshold && self.evicted.lock().insert(worker.clone()) {
                            tracing::warn!(worker = %worker, failures = count, "proposing worker for eviction");
                            eviction.on_worker_unhealthy(&worker).await;
                        }
                    }
                }
                _ = repair_tick.tick() => {
                    self.repair_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Configuration;

    #[tokio::test]
    async fn probe_once_on_empty_catalog_reports_nothing_unhealthy() {
        let runtime = Runtime::start(Configuration::default()).await.unwrap();
        let health = HealthLoop::new(runtime, HealthConfig::default());
        let unhealthy = health.probe_once().await;
        assert!(unhealthy.is_empty());
    }
}
