// VerifyJob (spec §4.8): iterates replicas oldest-first, issues FIND with
// checksum, reports differences between stored and observed replicas, and
// updates C4 with whatever was actually observed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::catalog::ReplicaStatus;
use crate::common::{ChunkNumber, DatabaseName, JobId, WorkerId};
use crate::controller::ControllerRequest;
use crate::core::Runtime;
use crate::error::Result;
use crate::jobs::{next_request_id, Job, JobContext, JobOutcome};
use crate::protocol::{ReplicaPayload, ReplicaRequestBody};

#[derive(Debug, Clone)]
pub struct ReplicaDiff {
    pub worker: WorkerId,
    pub database: DatabaseName,
    pub chunk: ChunkNumber,
    pub stored_status: ReplicaStatus,
    pub observed_status: ReplicaStatus,
}

pub struct VerifyJob {
    ctx: JobContext,
    limit: usize,
    pub diffs: Vec<ReplicaDiff>,
}

impl VerifyJob {
    pub fn new(id: JobId, limit: usize) -> Self {
        Self { ctx: JobContext::new(id), limit, diffs: Vec::new() }
    }
}

#[async_trait]
impl Job for VerifyJob {
    fn id(&self) -> JobId {
        self.ctx.id
    }

    fn name(&self) -> &'static str {
        "verify"
    }

    async fn run(&mut self, runtime: &Arc<Runtime>) -> Result<JobOutcome> {
        self.ctx.start();
        let retry_interval = Duration::from_secs(runtime.config().common.request_retry_interval_sec);

        let stored_replicas = runtime.replicas().oldest(self.limit).await?;
        for stored in stored_replicas {
            let mut req = ControllerRequest::new(
                next_request_id(),
                stored.worker.clone(),
                ReplicaRequestBody::Find { database: stored.database.clone(), chunk: stored.chunk, compute_checksum: true },
            );
            match req.execute(runtime.messenger(), None, retry_interval).await {
                Ok(ReplicaPayload::One(mut observed)) => {
                    observed.worker = stored.worker.clone();
                    observed.database = stored.database.clone();
                    if observed.status != stored.status {
                        self.diffs.push(ReplicaDiff {
                            worker: stored.worker.clone(),
                            database: stored.database.clone(),
                            chunk: stored.chunk,
                            stored_status: stored.status,
                            observed_status: observed.status,
                        });
                    }
                    runtime.replicas().upsert(observed).await?;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(worker = %stored.worker, chunk = stored.chunk, error = %e, "verify find failed");
                }
            }
        }

        Ok(self.ctx.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_with_no_diffs() {
        let job = VerifyJob::new(1, 100);
        assert!(job.diffs.is_empty());
    }
}
