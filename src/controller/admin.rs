// Admin/HTTP surface contract (spec §6), ported from
// `examples/original_source/core/modules/replica/HttpProcessor.h`'s endpoint
// set. No HTTP server is implemented here — the crate keeps this a plain
// trait so a front end can be bolted on without touching controller
// internals (an explicit SPEC_FULL decision to not pull in `axum` et al.
// for a contract-only surface).

use async_trait::async_trait;

use crate::catalog::{Database, DatabaseFamily, Worker};
use crate::common::{JobId, RequestId, WorkerId};
use crate::controller::request::{ControllerState, ExtendedState};
use crate::error::Result;

/// A cached replication-level report entry, refreshed on a configurable TTL
/// (spec §6 "replication level report").
#[derive(Debug, Clone)]
pub struct ReplicationLevelReport {
    pub family: String,
    pub num_good_chunks: u64,
    pub num_chunks: u64,
}

#[derive(Debug, Clone)]
pub struct WorkerStatusReport {
    pub worker: Worker,
    pub healthy: bool,
    pub num_requests_in_progress: usize,
}

#[derive(Debug, Clone)]
pub struct JobSummary {
    pub id: JobId,
    pub kind: String,
    pub state: String,
}

#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub id: RequestId,
    pub worker: WorkerId,
    pub state: ControllerState,
    pub extended_state: ExtendedState,
}

/// The admin surface spec.md §6 documents as a contract rather than
/// endpoint paths.
#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn list_workers(&self) -> Result<Vec<Worker>>;
    async fn worker_status(&self, worker: &str) -> Result<WorkerStatusReport>;
    async fn replication_level_report(&self, family: &str) -> Result<ReplicationLevelReport>;
    async fn list_jobs(&self) -> Result<Vec<JobSummary>>;
    async fn get_job(&self, id: JobId) -> Result<JobSummary>;
    async fn list_requests(&self, worker: &str) -> Result<Vec<RequestSummary>>;
    async fn get_request(&self, id: RequestId) -> Result<RequestSummary>;

    async fn add_worker(&self, worker: Worker) -> Result<()>;
    async fn remove_worker(&self, name: &str) -> Result<()>;
    async fn add_family(&self, family: DatabaseFamily) -> Result<()>;
    async fn add_database(&self, database: Database) -> Result<()>;
}
