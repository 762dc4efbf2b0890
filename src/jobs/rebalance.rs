// RebalanceJob (spec §4.8): computes avg = totalGoodChunks / totalWorkers;
// for any worker more than `start_pct` above average, plans MOVE_REPLICA
// operations until no worker exceeds `stop_pct` above average. In
// `estimate_only` mode it only produces the plan and stops.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::common::{ChunkNumber, JobId, WorkerId};
use crate::core::Runtime;
use crate::error::Result;
use crate::jobs::move_replica::MoveReplicaJob;
use crate::jobs::{next_request_id, FindAllJob, Job, JobContext, JobOutcome};

/// One planned move: relocate `chunk` off `from` and onto `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub chunk: ChunkNumber,
    pub from: WorkerId,
    pub to: WorkerId,
}

pub struct RebalanceJob {
    ctx: JobContext,
    family: String,
    start_pct: f64,
    stop_pct: f64,
    estimate_only: bool,
    pub plan: Vec<PlannedMove>,
}

impl RebalanceJob {
    pub fn new(id: JobId, family: String, start_pct: f64, stop_pct: f64, estimate_only: bool) -> Self {
        Self { ctx: JobContext::new(id), family, start_pct, stop_pct, estimate_only, plan: Vec::new() }
    }
}

#[async_trait]
impl Job for RebalanceJob {
    fn id(&self) -> JobId {
        self.ctx.id
    }

    fn name(&self) -> &'static str {
        "rebalance"
    }

    async fn run(&mut self, runtime: &Arc<Runtime>) -> Result<JobOutcome> {
        self.ctx.start();

        let workers = runtime.catalog().list_enabled_workers();
        if workers.is_empty() {
            return Ok(self.ctx.finish());
        }

        let mut find_all = FindAllJob::new(next_request_id(), self.family.clone());
        find_all.run(runtime).await?;
        let representative = find_all.databases.first().cloned();
        let Some(representative) = representative else {
            return Ok(self.ctx.finish());
        };

        let mut counts: HashMap<WorkerId, Vec<ChunkNumber>> = workers.iter().map(|w| (w.name.clone(), Vec::new())).collect();
        for &chunk in find_all.chunks.keys() {
            for replica in runtime.replicas().for_chunk_database(chunk, representative.clone()).await? {
                if replica.status == crate::catalog::ReplicaStatus::Complete {
                    counts.entry(replica.worker).or_default().push(chunk);
                }
            }
        }

        let total_good: usize = find_all.chunks.values().filter(|good| **good).count();
        let avg = total_good as f64 / workers.len() as f64;
        let start_threshold = avg * (1.0 + self.start_pct / 100.0);
        let stop_threshold = avg * (1.0 + self.stop_pct / 100.0);

        let mut plan = Vec::new();
        loop {
            let Some((hottest, chunks)) = counts.iter().max_by_key(|(_, c)| c.len()).map(|(w, c)| (w.clone(), c.clone())) else {
                break;
            };
            if (chunks.len() as f64) <= start_threshold {
                break;
            }
            let Some((coolest, _)) = counts.iter().min_by_key(|(_, c)| c.len()).map(|(w, c)| (w.clone(), c.clone())) else {
                break;
            };
            if coolest == hottest {
                break;
            }
            let cool_len = counts.get(&coolest).map(|c| c.len()).unwrap_or(0) as f64;
            if cool_len + 1.0 > stop_threshold {
                break;
            }
            let Some(&chunk) = chunks.first() else { break };
            plan.push(PlannedMove { chunk, from: hottest.clone(), to: coolest.clone() });

            counts.get_mut(&hottest).unwrap().retain(|c| *c != chunk);
            counts.get_mut(&coolest).unwrap().push(chunk);
        }

        self.plan = plan.clone();

        if !self.estimate_only {
            for mv in plan {
                let mut move_job = MoveReplicaJob::new(
                    next_request_id(),
                    self.family.clone(),
                    mv.chunk,
                    mv.from.clone(),
                    mv.to.clone(),
                    true,
                );
                if move_job.run(runtime).await.is_err() {
                    self.ctx.num_failed_locks += 1;
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
    fn estimate_only_job_starts_with_empty_plan() {
        let job = RebalanceJob::new(1, "LSST".to_string(), 10.0, 5.0, true);
        assert!(job.plan.is_empty());
    }
}
