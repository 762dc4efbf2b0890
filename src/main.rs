// # qserv-czar
//
// Entry point for the controller process: boots the `Runtime`, starts the
// health/rebalance loop (C9) with worker eviction wired to `DeleteWorkerJob`,
// and waits for a shutdown signal.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use qserv_rs::catalog::Configuration;
use qserv_rs::core::Runtime;
use qserv_rs::health::{EvictionCallback, HealthConfig, HealthLoop};
use qserv_rs::jobs::{next_request_id, DeleteWorkerJob, Job};
use qserv_rs::Result;

struct DeleteWorkerOnEviction {
    runtime: Arc<Runtime>,
}

#[async_trait]
impl EvictionCallback for DeleteWorkerOnEviction {
    async fn on_worker_unhealthy(&self, worker: &str) {
        let mut job = DeleteWorkerJob::new(next_request_id(), worker.to_string(), false);
        if let Err(e) = job.run(&self.runtime).await {
            error!(worker = %worker, error = %e, "failed to evict unhealthy worker");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).with_thread_ids(true).with_level(true).init();

    info!("starting qserv-czar");

    let config = Configuration::default();
    let runtime = Runtime::start(config).await?;

    let health = Arc::new(HealthLoop::new(Arc::clone(&runtime), HealthConfig::default()));
    let eviction = Arc::new(DeleteWorkerOnEviction { runtime: Arc::clone(&runtime) });
    let health_handle = tokio::spawn(Arc::clone(&health).run(eviction));

    tokio::signal::ctrl_c().await.map_err(qserv_rs::DbError::Io)?;
    info!("shutdown signal received");

    health_handle.abort();
    runtime.shutdown().await;
    Ok(())
}
