// MoveReplicaJob (spec §4.8): REPLICATE onto `dst` then, if `purge` is set,
// DELETE from `src`. A failure of the delete stage does not roll back the
// replicate — the move is considered to have made forward progress as soon
// as the destination copy exists.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::catalog::Chunk;
use crate::common::{ChunkNumber, JobId, WorkerId};
use crate::controller::ControllerRequest;
use crate::core::Runtime;
use crate::error::Result;
use crate::jobs::{next_request_id, Job, JobContext, JobOutcome};
use crate::protocol::ReplicaRequestBody;

pub struct MoveReplicaJob {
    ctx: JobContext,
    family: String,
    chunk: ChunkNumber,
    src: WorkerId,
    dst: WorkerId,
    purge: bool,
}

impl MoveReplicaJob {
    pub fn new(id: JobId, family: String, chunk: ChunkNumber, src: WorkerId, dst: WorkerId, purge: bool) -> Self {
        Self { ctx: JobContext::new(id), family, chunk, src, dst, purge }
    }
}

#[async_trait]
impl Job for MoveReplicaJob {
    fn id(&self) -> JobId {
        self.ctx.id
    }

    fn name(&self) -> &'static str {
        "move_replica"
    }

    async fn run(&mut self, runtime: &Arc<Runtime>) -> Result<JobOutcome> {
        self.ctx.start();

        let databases = runtime.catalog().databases_in_family(&self.family);
        let retry_interval = Duration::from_secs(runtime.config().common.request_retry_interval_sec);
        let owner = format!("move-{}", self.ctx.id);
        let chunk_id = Chunk { family: self.family.clone(), number: self.chunk };

        if !runtime.locker().lock(chunk_id.clone(), &owner) {
            self.ctx.num_failed_locks += 1;
            return Ok(self.ctx.finish());
        }

        for database in &databases {
            let mut req = ControllerRequest::new(
                next_request_id(),
                self.dst.clone(),
                ReplicaRequestBody::Replicate {
                    database: database.name.clone(),
                    chunk: self.chunk,
                    source_worker: self.src.clone(),
                },
            );
            req.execute(runtime.messenger(), Some(runtime.replicas()), retry_interval).await?;
        }

        if self.purge {
            for database in &databases {
                let mut req = ControllerRequest::new(
                    next_request_id(),
                    self.src.clone(),
                    ReplicaRequestBody::Delete { database: database.name.clone(), chunk: self.chunk },
                );
                if let Err(e) = req.execute(runtime.messenger(), Some(runtime.replicas()), retry_interval).await {
                    tracing::warn!(chunk = self.chunk, source = %self.src, error = %e, "move_replica purge of source failed");
                }
            }
        }

        runtime.locker().release_chunk(&chunk_id);
        Ok(self.ctx.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_carries_source_and_destination() {
        let job = MoveReplicaJob::new(1, "LSST".to_string(), 7, "w1".to_string(), "w2".to_string(), true);
        assert_eq!(job.src, "w1");
        assert_eq!(job.dst, "w2");
    }
}
