// # Job orchestrator (C8)
//
// Composite operations built from many C7 requests: iteration, chunk
// locking, partial-failure policy (spec §4.8). Every mutating job acquires
// chunks through C3 using its own job id as owner; chunks it could not lock
// are deferred to the job's next iteration via `restart()`.

pub mod delete_worker;
pub mod find_all;
pub mod fixup;
pub mod move_replica;
pub mod purge;
pub mod rebalance;
pub mod replicate;
pub mod verify;

use async_trait::async_trait;

use crate::common::{JobId, RequestId};
use crate::core::Runtime;
use crate::error::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Request ids handed out by jobs issuing C7 requests. Separate from any
/// query-session id space; uniqueness within a process lifetime is all the
/// Messenger requires (spec §3 invariant 3).
pub fn next_request_id() -> RequestId {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Job lifecycle (spec §4.8): `CREATED -> IN_PROGRESS -> FINISHED{...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    InProgress,
    Finished,
}

/// Terminal outcome once a job reaches `FINISHED` (spec §4.8, invariant 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failed,
    Cancelled,
    Expired,
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Shared bookkeeping every concrete job embeds: id, state, timestamps, and
/// the failed-lock counter that gates `SUCCESS` (spec §4.8: "a job is not
/// allowed to finish with SUCCESS while any numFailedLocks > 0").
pub struct JobContext {
    pub id: JobId,
    pub state: JobState,
    pub begin_time: i64,
    pub end_time: i64,
    pub num_failed_locks: u32,
}

impl JobContext {
    pub fn new(id: JobId) -> Self {
        Self { id, state: JobState::Created, begin_time: 0, end_time: 0, num_failed_locks: 0 }
    }

    pub fn start(&mut self) {
        self.state = JobState::InProgress;
        self.begin_time = now_ms();
    }

    /// Resets the failed-lock counter ahead of a re-run of the precursor
    /// FIND_ALL (spec §4.8 "restart()").
    pub fn restart(&mut self) {
        self.num_failed_locks = 0;
    }

    pub fn finish(&mut self) -> JobOutcome {
        self.state = JobState::Finished;
        self.end_time = now_ms();
        if self.num_failed_locks > 0 {
            JobOutcome::Failed
        } else {
            JobOutcome::Success
        }
    }
}

/// A typed state machine composed of requests and/or child jobs, with a
/// single outcome delivered on completion (spec §4.8).
#[async_trait]
pub trait Job: Send + Sync {
    fn id(&self) -> JobId;
    fn name(&self) -> &'static str;
    async fn run(&mut self, runtime: &Arc<Runtime>) -> Result<JobOutcome>;
}

pub use delete_worker::DeleteWorkerJob;
pub use find_all::FindAllJob;
pub use fixup::FixUpJob;
pub use move_replica::MoveReplicaJob;
pub use purge::PurgeJob;
pub use rebalance::RebalanceJob;
pub use replicate::ReplicateJob;
pub use verify::VerifyJob;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reports_failed_when_locks_were_contended() {
        let mut ctx = JobContext::new(1);
        ctx.start();
        ctx.num_failed_locks = 2;
        assert_eq!(ctx.finish(), JobOutcome::Failed);
    }

    #[test]
    fn finish_reports_success_with_no_failed_locks() {
        let mut ctx = JobContext::new(1);
        ctx.start();
        assert_eq!(ctx.finish(), JobOutcome::Success);
    }
}
