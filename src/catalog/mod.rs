// # Catalog
//
// The static-ish data model: workers, databases, database families, and the
// configuration surface (spec §3, §6). `Configuration` is built
// programmatically (config-file parsing is out of scope, spec §1) with
// defaults matching the constants §6 names; a future file-backed front end
// would deserialize straight into it via `serde`.
//
// `Catalog` is the mutable registry over `Worker`/`Database`/`DatabaseFamily`,
// following the same `Arc<RwLock<HashMap<..>>>` CRUD pattern used throughout
// this crate for shared registries.

pub mod model;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DbError, Result};

pub use model::{parse_chunk_number, Chunk, Replica, ReplicaFile, ReplicaStatus, Task};

/// A worker's network endpoints and mutable admin flags (spec §3).
///
/// Immutable after configuration load except `enabled`/`read_only`, which
/// are only ever flipped through an admin action (`Catalog::set_enabled`,
/// `Catalog::set_read_only`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub name: String,
    pub svc_host: String,
    pub svc_port: u16,
    pub fs_host: String,
    pub fs_port: u16,
    /// May contain a `{worker}` substitution token (spec §6).
    pub data_dir: String,
    pub enabled: bool,
    pub read_only: bool,
}

impl Worker {
    /// Resolves `data_dir`'s `{worker}` token against this worker's name.
    pub fn resolved_data_dir(&self) -> String {
        self.data_dir.replace("{worker}", &self.name)
    }
}

/// A database: its family and the partitioned/regular table lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
    pub family: String,
    pub partitioned_tables: Vec<String>,
    pub regular_tables: Vec<String>,
}

/// A set of databases sharing a chunking scheme and replication floor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseFamily {
    pub name: String,
    pub min_replication_level: u32,
}

/// `common.*` configuration options (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonConfig {
    pub request_buf_size_bytes: usize,
    pub request_retry_interval_sec: u64,
    pub database_host: String,
    pub database_port: u16,
    pub database_name: String,
    pub database_user: String,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            request_buf_size_bytes: 1024 * 1024,
            request_retry_interval_sec: 5,
            database_host: "localhost".to_string(),
            database_port: 0,
            database_name: ":memory:".to_string(),
            database_user: "qsreplica".to_string(),
        }
    }
}

/// `controller.*` configuration options (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub num_threads: usize,
    pub http_server_port: u16,
    pub http_server_threads: usize,
    pub request_timeout_sec: u64,
    pub job_timeout_sec: u64,
    pub job_heartbeat_sec: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get().max(1),
            http_server_port: 25081,
            http_server_threads: 2,
            request_timeout_sec: 300,
            job_timeout_sec: 600,
            job_heartbeat_sec: 60,
        }
    }
}

/// `xrootd.*` configuration options. The transport itself is out of scope
/// (spec §1); these values are carried only because the controller's
/// configuration surface names them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XrootdConfig {
    pub auto_notify: bool,
    pub host: String,
    pub port: u16,
    pub request_timeout_sec: u64,
}

impl Default for XrootdConfig {
    fn default() -> Self {
        Self {
            auto_notify: false,
            host: "localhost".to_string(),
            port: 1094,
            request_timeout_sec: 300,
        }
    }
}

/// `worker.*` configuration options (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDefaultsConfig {
    pub technology: String,
    pub num_svc_processing_threads: usize,
    pub num_fs_processing_threads: usize,
    pub fs_buf_size_bytes: usize,
    pub svc_port: u16,
    pub fs_port: u16,
    pub data_dir: String,
}

impl Default for WorkerDefaultsConfig {
    fn default() -> Self {
        Self {
            technology: "fs".to_string(),
            num_svc_processing_threads: 4,
            num_fs_processing_threads: 4,
            fs_buf_size_bytes: 1024 * 1024,
            svc_port: 25000,
            fs_port: 25001,
            data_dir: "/qserv/data/{worker}".to_string(),
        }
    }
}

/// The full programmatic configuration surface (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub common: CommonConfig,
    pub controller: ControllerConfig,
    pub xrootd: XrootdConfig,
    pub worker_defaults: WorkerDefaultsConfig,
    pub workers: Vec<Worker>,
    pub databases: Vec<Database>,
    pub families: Vec<DatabaseFamily>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            common: CommonConfig::default(),
            controller: ControllerConfig::default(),
            xrootd: XrootdConfig::default(),
            worker_defaults: WorkerDefaultsConfig::default(),
            workers: Vec::new(),
            databases: Vec::new(),
            families: Vec::new(),
        }
    }
}

impl Configuration {
    pub fn family(&self, name: &str) -> Option<&DatabaseFamily> {
        self.families.iter().find(|f| f.name == name)
    }

    pub fn min_replication_level(&self, family: &str) -> u32 {
        self.family(family).map(|f| f.min_replication_level).unwrap_or(1)
    }
}

/// Mutable registry over workers/databases/families, built on top of the
/// static `Configuration` loaded at startup. `enabled`/`read_only` worker
/// flags are the only fields this registry allows mutating in place.
#[derive(Clone)]
pub struct Catalog {
    workers: Arc<RwLock<HashMap<String, Worker>>>,
    databases: Arc<RwLock<HashMap<String, Database>>>,
    families: Arc<RwLock<HashMap<String, DatabaseFamily>>>,
}

impl Catalog {
    pub fn from_configuration(config: &Configuration) -> Self {
        let workers = config.workers.iter().map(|w| (w.name.clone(), w.clone())).collect();
        let databases = config.databases.iter().map(|d| (d.name.clone(), d.clone())).collect();
        let families = config.families.iter().map(|f| (f.name.clone(), f.clone())).collect();
        Self {
            workers: Arc::new(RwLock::new(workers)),
            databases: Arc::new(RwLock::new(databases)),
            families: Arc::new(RwLock::new(families)),
        }
    }

    pub fn get_worker(&self, name: &str) -> Result<Worker> {
        self.workers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("worker {name}")))
    }

    pub fn list_workers(&self) -> Vec<Worker> {
        self.workers.read().values().cloned().collect()
    }

    pub fn list_enabled_workers(&self) -> Vec<Worker> {
        self.workers.read().values().filter(|w| w.enabled).cloned().collect()
    }

    pub fn add_worker(&self, worker: Worker) -> Result<()> {
        let mut workers = self.workers.write();
        if workers.contains_key(&worker.name) {
            return Err(DbError::AlreadyExists(format!("worker {}", worker.name)));
        }
        workers.insert(worker.name.clone(), worker);
        Ok(())
    }

    /// Removes a worker entirely, used by `DeleteWorkerJob(permanent=true)`.
    pub fn remove_worker(&self, name: &str) -> Result<()> {
        self.workers
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DbError::NotFound(format!("worker {name}")))
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut workers = self.workers.write();
        let worker = workers
            .get_mut(name)
            .ok_or_else(|| DbError::NotFound(format!("worker {name}")))?;
        worker.enabled = enabled;
        Ok(())
    }

    pub fn set_read_only(&self, name: &str, read_only: bool) -> Result<()> {
        let mut workers = self.workers.write();
        let worker = workers
            .get_mut(name)
            .ok_or_else(|| DbError::NotFound(format!("worker {name}")))?;
        worker.read_only = read_only;
        Ok(())
    }

    pub fn get_database(&self, name: &str) -> Result<Database> {
        self.databases
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("database {name}")))
    }

    pub fn databases_in_family(&self, family: &str) -> Vec<Database> {
        self.databases
            .read()
            .values()
            .filter(|d| d.family == family)
            .cloned()
            .collect()
    }

    pub fn get_family(&self, name: &str) -> Result<DatabaseFamily> {
        self.families
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("family {name}")))
    }

    pub fn list_families(&self) -> Vec<DatabaseFamily> {
        self.families.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(name: &str) -> Worker {
        Worker {
            name: name.to_string(),
            svc_host: "localhost".to_string(),
            svc_port: 25000,
            fs_host: "localhost".to_string(),
            fs_port: 25001,
            data_dir: "/data/{worker}".to_string(),
            enabled: true,
            read_only: false,
        }
    }

    #[test]
    fn resolves_worker_data_dir_token() {
        let w = worker("worker-01");
        assert_eq!(w.resolved_data_dir(), "/data/worker-01");
    }

    #[test]
    fn catalog_rejects_duplicate_worker() {
        let catalog = Catalog::from_configuration(&Configuration::default());
        catalog.add_worker(worker("w1")).unwrap();
        assert!(catalog.add_worker(worker("w1")).is_err());
    }

    #[test]
    fn catalog_disables_and_removes_worker() {
        let catalog = Catalog::from_configuration(&Configuration::default());
        catalog.add_worker(worker("w1")).unwrap();
        catalog.set_enabled("w1", false).unwrap();
        assert!(!catalog.get_worker("w1").unwrap().enabled);
        catalog.remove_worker("w1").unwrap();
        assert!(catalog.get_worker("w1").is_err());
    }
}
