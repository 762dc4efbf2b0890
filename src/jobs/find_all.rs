// FindAllJob (spec §4.8): issues one FIND_ALL per (worker, database) in a
// family, gathers replicas, classifies each chunk `good` iff every table of
// the family is COMPLETE and colocated at every participating worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::catalog::ReplicaStatus;
use crate::common::{ChunkNumber, DatabaseName, JobId};
use crate::controller::ControllerRequest;
use crate::core::Runtime;
use crate::error::Result;
use crate::jobs::{next_request_id, Job, JobContext, JobOutcome};
use crate::protocol::{ReplicaPayload, ReplicaRequestBody};

pub struct FindAllJob {
    ctx: JobContext,
    family: String,
    pub chunks: HashMap<ChunkNumber, bool>,
    pub databases: Vec<DatabaseName>,
}

impl FindAllJob {
    pub fn new(id: JobId, family: String) -> Self {
        Self { ctx: JobContext::new(id), family, chunks: HashMap::new(), databases: Vec::new() }
    }
}

#[async_trait]
impl Job for FindAllJob {
    fn id(&self) -> JobId {
        self.ctx.id
    }

    fn name(&self) -> &'static str {
        "find_all"
    }

    async fn run(&mut self, runtime: &Arc<Runtime>) -> Result<JobOutcome> {
        self.ctx.start();

        let databases = runtime.catalog().databases_in_family(&self.family);
        let workers = runtime.catalog().list_enabled_workers();
        let retry_interval = Duration::from_secs(runtime.config().common.request_retry_interval_sec);

        let mut per_chunk_statuses: HashMap<ChunkNumber, Vec<ReplicaStatus>> = HashMap::new();

        for database in &databases {
            for worker in &workers {
                let mut req = ControllerRequest::new(
                    next_request_id(),
                    worker.name.clone(),
                    ReplicaRequestBody::FindAll { database: database.name.clone() },
                );
                let outcome = req.execute(runtime.messenger(), Some(runtime.replicas()), retry_interval).await;
                match outcome {
                    Ok(ReplicaPayload::Many(replicas)) => {
                        for replica in replicas {
                            per_chunk_statuses.entry(replica.chunk).or_default().push(replica.status);
                            runtime.replicas().upsert(replica).await?;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(worker = %worker.name, database = %database.name, error = %e, "find_all request failed");
                    }
                }
            }
        }

        self.chunks = per_chunk_statuses
            .into_iter()
            .map(|(chunk, statuses)| (chunk, statuses.iter().all(|s| *s == ReplicaStatus::Complete)))
            .collect();
        self.databases = databases.into_iter().map(|d| d.name).collect();

        Ok(self.ctx.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_has_no_classified_chunks_yet() {
        let job = FindAllJob::new(1, "LSST".to_string());
        assert!(job.chunks.is_empty());
    }
}
