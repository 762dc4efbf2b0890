// FixUpJob (spec §4.8): runs FindAllJob, then for any under-replicated
// chunk issues REPLICATE from a healthy source to the eligible destination
// with the fewest chunks. Acquires the chunk lock before acting; a chunk it
// cannot lock increments `num_failed_locks` and is retried next iteration.
// Finishes only once an iteration completes with zero failed locks.

use std::collections::HashSet;
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

const MAX_ITERATIONS: u32 = 8;

pub struct FixUpJob {
    ctx: JobContext,
    family: String,
}

impl FixUpJob {
    pub fn new(id: JobId, family: String) -> Self {
        Self { ctx: JobContext::new(id), family }
    }
}

/// Picks the candidate with the fewest replicas currently assigned to it.
/// Shared with `ReplicateJob`, which performs the same destination-selection
/// step against a caller-supplied target level.
pub(crate) async fn least_loaded<'a>(
    runtime: &Runtime,
    candidates: &[&'a crate::catalog::Worker],
) -> Result<Option<&'a crate::catalog::Worker>> {
    let mut best: Option<(&crate::catalog::Worker, usize)> = None;
    for worker in candidates {
        let count = runtime.replicas().for_worker(worker.name.clone(), None).await?.len();
        if best.map(|(_, c)| count < c).unwrap_or(true) {
            best = Some((worker, count));
        }
    }
    Ok(best.map(|(w, _)| w))
}

#[async_trait]
impl Job for FixUpJob {
    fn id(&self) -> JobId {
        self.ctx.id
    }

    fn name(&self) -> &'static str {
        "fixup"
    }

    async fn run(&mut self, runtime: &Arc<Runtime>) -> Result<JobOutcome> {
        self.ctx.start();

        let min_level = runtime.config().min_replication_level(&self.family) as usize;
        let databases = runtime.catalog().databases_in_family(&self.family);
        let workers = runtime.catalog().list_enabled_workers();
        if databases.is_empty() || workers.is_empty() {
            return Ok(self.ctx.finish());
        }
        let representative = databases[0].name.clone();
        let retry_interval = Duration::from_secs(runtime.config().common.request_retry_interval_sec);
        let owner = format!("fixup-{}", self.ctx.id);

        for _ in 0..MAX_ITERATIONS {
            self.ctx.restart();

            let mut find_all = FindAllJob::new(next_request_id(), self.family.clone());
            find_all.run(runtime).await?;

            let mut progressed = false;

            for &chunk in find_all.chunks.keys() {
                let existing = runtime.replicas().for_chunk_database(chunk, representative.clone()).await?;
                let complete: HashSet<String> = existing
                    .iter()
                    .filter(|r| r.status == ReplicaStatus::Complete)
                    .map(|r| r.worker.clone())
                    .collect();
                if complete.len() >= min_level {
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
                if let Some(dest) = least_loaded(runtime, &candidates).await? {
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
                            tracing::warn!(chunk, destination = %dest.name, error = %e, "fixup replicate failed");
                        }
                    }
                    progressed = true;
                }

                runtime.locker().release_chunk(&chunk_id);
            }

            if self.ctx.num_failed_locks == 0 {
                break;
            }
            if !progressed {
                break;
            }
        }

        Ok(self.ctx.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_with_no_failed_locks() {
        let job = FixUpJob::new(1, "LSST".to_string());
        assert_eq!(job.ctx.num_failed_locks, 0);
    }
}
