// PurgeJob (spec §4.8): symmetric to FixUpJob for surplus replicas —
// deletes extra copies from the most-loaded eligible workers until the
// chunk's replica count matches the target level.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::catalog::{Chunk, ReplicaStatus};
use crate::common::JobId;
use crate::controller::ControllerRequest;
use crate::core::Runtime;
use crate::error::Result;
use crate::jobs::{next_request_id, FindAllJob, Job, JobContext, JobOutcome};
use crate::protocol::ReplicaRequestBody;

pub struct PurgeJob {
    ctx: JobContext,
    family: String,
    num_replicas: usize,
}

impl PurgeJob {
    pub fn new(id: JobId, family: String, num_replicas: usize) -> Self {
        Self { ctx: JobContext::new(id), family, num_replicas }
    }

    async fn most_loaded(runtime: &Runtime, candidates: &[String]) -> Result<Option<String>> {
        let mut best: Option<(String, usize)> = None;
        for worker in candidates {
            let count = runtime.replicas().for_worker(worker.clone(), None).await?.len();
            if best.as_ref().map(|(_, c)| count > *c).unwrap_or(true) {
                best = Some((worker.clone(), count));
            }
        }
        Ok(best.map(|(w, _)| w))
    }
}

#[async_trait]
impl Job for PurgeJob {
    fn id(&self) -> JobId {
        self.ctx.id
    }

    fn name(&self) -> &'static str {
        "purge"
    }

    async fn run(&mut self, runtime: &Arc<Runtime>) -> Result<JobOutcome> {
        self.ctx.start();

        let databases = runtime.catalog().databases_in_family(&self.family);
        if databases.is_empty() {
            return Ok(self.ctx.finish());
        }
        let representative = databases[0].name.clone();
        let retry_interval = Duration::from_secs(runtime.config().common.request_retry_interval_sec);
        let owner = format!("purge-{}", self.ctx.id);

        let mut find_all = FindAllJob::new(next_request_id(), self.family.clone());
        find_all.run(runtime).await?;

        for &chunk in find_all.chunks.keys() {
            let existing = runtime.replicas().for_chunk_database(chunk, representative.clone()).await?;
            let mut complete: Vec<String> = existing
                .iter()
                .filter(|r| r.status == ReplicaStatus::Complete)
                .map(|r| r.worker.clone())
                .collect();
            if complete.len() <= self.num_replicas {
                continue;
            }

            let chunk_id = Chunk { family: self.family.clone(), number: chunk };
            if !runtime.locker().lock(chunk_id.clone(), &owner) {
                self.ctx.num_failed_locks += 1;
                continue;
            }

            while complete.len() > self.num_replicas {
                let Some(victim) = Self::most_loaded(runtime, &complete).await? else { break };
                for database in &databases {
                    let mut req = ControllerRequest::new(
                        next_request_id(),
                        victim.clone(),
                        ReplicaRequestBody::Delete { database: database.name.clone(), chunk },
                    );
                    if let Err(e) = req.execute(runtime.messenger(), Some(runtime.replicas()), retry_interval).await {
                        tracing::warn!(chunk, worker = %victim, error = %e, "purge delete failed");
                    }
                }
                complete.retain(|w| w != &victim);
            }

            runtime.locker().release_chunk(&chunk_id);
        }

        Ok(self.ctx.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_targets_requested_replica_count() {
        let job = PurgeJob::new(1, "LSST".to_string(), 2);
        assert_eq!(job.num_replicas, 2);
    }
}
