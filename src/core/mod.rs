// # Runtime
//
// Central context object for the process: owns the long-lived collaborators
// (Messenger, ChunkLocker, DatabaseServices, Configuration) that used to be
// process-wide singletons in the source this crate is modeled on. Every job,
// request, and query session is handed an `Arc<Runtime>` instead of reaching
// for a global.
//
// ## Usage
//
// ```rust,no_run
// use qserv_rs::core::Runtime;
// use qserv_rs::catalog::Configuration;
//
// #[tokio::main]
// async fn main() -> qserv_rs::Result<()> {
//     let config = Configuration::default();
//     let runtime = Runtime::start(config).await?;
//     runtime.shutdown().await;
//     Ok(())
// }
// ```

use std::sync::Arc;

use crate::catalog::{Catalog, Configuration};
use crate::db::DatabaseServices;
use crate::error::Result;
use crate::locker::ChunkLocker;
use crate::messenger::Messenger;
use crate::replication::ReplicaStore;

/// Owns every cross-cutting collaborator for a controller process.
///
/// Cloning a `Runtime` is cheap (it holds only `Arc`s); the common pattern is
/// to wrap one in an outer `Arc<Runtime>` and pass that by reference.
pub struct Runtime {
    config: Configuration,
    catalog: Catalog,
    messenger: Arc<Messenger>,
    locker: Arc<ChunkLocker>,
    db: Arc<DatabaseServices>,
    replicas: ReplicaStore,
}

impl Runtime {
    /// Boots the runtime: opens the persistence store, builds the locker and
    /// Messenger against the configured workers.
    pub async fn start(config: Configuration) -> Result<Arc<Self>> {
        let db = Arc::new(DatabaseServices::open(&config)?);
        let locker = Arc::new(ChunkLocker::new());
        let messenger = Arc::new(Messenger::new(config.common.request_retry_interval_sec));
        let catalog = Catalog::from_configuration(&config);
        let replicas = ReplicaStore::new(Arc::clone(&db));

        for worker in &config.workers {
            if let Ok(addr) = format!("{}:{}", worker.svc_host, worker.svc_port).parse() {
                messenger.register_worker(worker.name.clone(), addr);
            }
        }

        tracing::info!(
            workers = config.workers.len(),
            families = config.families.len(),
            "runtime started"
        );

        Ok(Arc::new(Self {
            config,
            catalog,
            messenger,
            locker,
            db,
            replicas,
        }))
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn messenger(&self) -> &Arc<Messenger> {
        &self.messenger
    }

    pub fn locker(&self) -> &Arc<ChunkLocker> {
        &self.locker
    }

    pub fn db(&self) -> &Arc<DatabaseServices> {
        &self.db
    }

    pub fn replicas(&self) -> &ReplicaStore {
        &self.replicas
    }

    /// Stops all connectors. Persisted state and in-memory locks are left
    /// intact; a fresh `Runtime::start` reloads them from C13.
    pub async fn shutdown(&self) {
        self.messenger.stop().await;
        tracing::info!("runtime shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_and_shuts_down_with_default_config() {
        let config = Configuration::default();
        let runtime = Runtime::start(config).await.expect("runtime starts");
        assert!(runtime.locker().locked("nobody").is_empty());
        runtime.shutdown().await;
    }
}
