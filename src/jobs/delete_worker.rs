// DeleteWorkerJob (spec §4.8): probes the worker; if responsive, drains its
// service and issues FIND_ALL to freshen state; disables the worker; runs a
// FindAllJob then ReplicateJob per family; computes orphan chunks (replicas
// that existed only on the deleted worker and could not be redistributed);
// if `permanent`, removes the worker entry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::catalog::ReplicaStatus;
use crate::common::{ChunkNumber, DatabaseName, JobId, WorkerId};
use crate::controller::ControllerRequest;
use crate::core::Runtime;
use crate::error::Result;
use crate::jobs::{next_request_id, FindAllJob, Job, JobContext, JobOutcome, ReplicateJob};
use crate::protocol::{Message, ReplicaRequestBody, ServiceRequestBody};

pub struct DeleteWorkerJob {
    ctx: JobContext,
    worker: WorkerId,
    permanent: bool,
    pub orphan_chunks: Vec<(DatabaseName, ChunkNumber)>,
}

impl DeleteWorkerJob {
    pub fn new(id: JobId, worker: WorkerId, permanent: bool) -> Self {
        Self { ctx: JobContext::new(id), worker, permanent, orphan_chunks: Vec::new() }
    }
}

#[async_trait]
impl Job for DeleteWorkerJob {
    fn id(&self) -> JobId {
        self.ctx.id
    }

    fn name(&self) -> &'static str {
        "delete_worker"
    }

    async fn run(&mut self, runtime: &Arc<Runtime>) -> Result<JobOutcome> {
        self.ctx.start();
        let retry_interval = Duration::from_secs(runtime.config().common.request_retry_interval_sec);

        let mut probe = ControllerRequest::new(next_request_id(), self.worker.clone(), ReplicaRequestBody::Echo { data: vec![] });
        let responsive = probe.execute(runtime.messenger(), None, retry_interval).await.is_ok();

        if responsive {
            let _ = runtime
                .messenger()
                .send(&self.worker, next_request_id(), Message::Service(ServiceRequestBody::Drain))
                .await;
        }

        runtime.catalog().set_enabled(&self.worker, false)?;

        let mut orphan_chunks = Vec::new();
        for family in runtime.catalog().list_families() {
            let mut find_all = FindAllJob::new(next_request_id(), family.name.clone());
            find_all.run(runtime).await?;

            for database in &find_all.databases {
                for &chunk in find_all.chunks.keys() {
                    let replicas = runtime.replicas().for_chunk_database(chunk, database.clone()).await?;
                    let complete_workers: Vec<WorkerId> = replicas
                        .iter()
                        .filter(|r| r.status == ReplicaStatus::Complete)
                        .map(|r| r.worker.clone())
                        .collect();
                    if complete_workers.len() == 1 && complete_workers[0] == self.worker {
                        orphan_chunks.push((database.clone(), chunk));
                    }
                }
            }

            let mut replicate_job = ReplicateJob::new(next_request_id(), family.name.clone(), None);
            replicate_job.run(runtime).await?;
        }
        self.orphan_chunks = orphan_chunks;

        if self.permanent {
            runtime.catalog().remove_worker(&self.worker)?;
        }
        // TODO: no automatic read-only reinstatement path when permanent is
        // false; the worker stays disabled until an operator re-enables it.

        Ok(self.ctx.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_with_no_orphans() {
        let job = DeleteWorkerJob::new(1, "w1".to_string(), false);
        assert!(job.orphan_chunks.is_empty());
    }
}
