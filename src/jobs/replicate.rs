// ReplicateJob (spec §4.8): raises replication level to `num_replicas`
// (defaulting to the family's configured minimum). Shares FixUpJob's
// lock-then-replicate loop, parameterized by the requested target instead
// of the family's floor.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::catalog::{Chunk, ReplicaStatus};
use crate::common::JobId;
use crate::controller::ControllerRequest;
use crate::core::Runtime;
use crate::error::Result;
use crate::jobs::fixup::least_loaded;
use crate::jobs::{next_request_id, FindAllJob, Job, JobContext, JobOutcome};
use crate::protocol::ReplicaRequestBody;

pub struct ReplicateJob {
    ctx: JobContext,
    family: String,
    num_replicas: Option<usize>,
}

impl ReplicateJob {
    pub fn new(id: JobId, family: String, num_replicas: Option<usize>) -> Self {
        Self { ctx: JobContext::new(id), family, num_replicas }
    }
}

#[async_trait]
impl Job for ReplicateJob {
    fn id(&self) -> JobId {
        self.ctx.id
    }

    fn name(&self) -> &'static str {
        "replicate"
    }

    async fn run(&mut self, runtime: &Arc<Runtime>) -> Result<JobOutcome> {
        self.ctx.start();

        let target = self
            .num_replicas
            .unwrap_or_else(|| runtime.config().min_replication_level(&self.family) as usize);
        let databases = runtime.catalog().databases_in_family(&self.family);
        let workers = runtime.catalog().list_enabled_workers();
        if databases.is_empty() || workers.is_empty() {
            return Ok(self.ctx.finish());
        }
        let representative = databases[0].name.clone();
        let retry_interval = Duration::from_secs(runtime.config().common.request_retry_interval_sec);
        let owner = format!("replicate-{}", self.ctx.id);

        let mut find_all = FindAllJob::new(next_request_id(), self.family.clone());
        find_all.run(runtime).await?;

        for &chunk in find_all.chunks.keys() {
            let existing = runtime.replicas().for_chunk_database(chunk, representative.clone()).await?;
            let complete: HashSet<String> = existing
                .iter()
                .filter(|r| r.status == ReplicaStatus::Complete)
                .map(|r| r.worker.clone())
                .collect();
            if complete.len() >= target {
                continue;
            }
            let Some(source) = complete.iter().next().cloned() else {
                continue;
            };

            let chunk_id = Chunk { family: self.family.clone(), number: chunk };
            if !runtime.locker().lock(chunk_id.clone(), &owner) {
                self.ctx.num_failed_locks += 1;
                continue;
            }

            let candidates: Vec<&crate::catalog::Worker> = workers.iter().filter(|w| !complete.contains(&w.name)).collect();
            let mut needed = target - complete.len();
            let mut pool = candidates;
            while needed > 0 {
                let Some(dest) = least_loaded(runtime, &pool).await? else { break };
                for database in &databases {
                    let mut req = ControllerRequest::new(
                        next_request_id(),
                        dest.name.clone(),
                        ReplicaRequestBody::Replicate {
                            database: database.name.clone(),
                            chunk,
                            source_worker: source.clone(),
                        },
                    );
                    if let Err(e) = req.execute(runtime.messenger(), Some(runtime.replicas()), retry_interval).await {
                        tracing::warn!(chunk, destination = %dest.name, error = %e, "replicate failed");
                    }
                }
                pool.retain(|w| w.name != dest.name);
                needed -= 1;
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
    fn default_target_is_none_until_resolved_against_config() {
        let job = ReplicateJob::new(1, "LSST".to_string(), None);
        assert!(job.num_replicas.is_none());
    }
}
