// # Worker request engine (C5)
//
// Per-worker queues (`new` / `in-progress` / `finished`) and the
// per-request state machine, ported from the original `WorkerRequest`'s
// `status2string`/`start`/`execute`/`cancel`/`rollback`/`stop`/`setStatus`
// semantics (spec §4.5), combined with the teacher's thread-pool/queue
// idiom: a fixed pool of tokio tasks pops the highest-priority pending
// request and drives it to completion.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::catalog::{Replica, ReplicaFile, ReplicaStatus, Worker};
use crate::common::{DatabaseName, RequestId, WorkerId};
use crate::error::{DbError, FsError, Result};
use crate::protocol::{
    ExtendedStatus, Performance as WirePerformance, ReplicaPayload, ReplicaRequestBody, ReplicationResponse, WorkerStatus,
};
use crate::worker::checksum::{checksum_file, DEFAULT_BLOCK_SIZE};
use crate::worker::replica_client;

/// Request lifecycle (spec §4.5). `rollback()` only ever returns to `None`
/// from `InProgress`, used to re-queue a request when the worker service is
/// drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    None,
    InProgress,
    IsCancelling,
    Succeeded,
    Failed,
    Cancelled,
}

/// Performance counters, backfilled the way `WorkerRequest::setStatus` does:
/// `start_time` is set on entry to `InProgress`, or backfilled at
/// cancellation time if a request never started; `finish_time` is set on
/// every terminal transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestPerformance {
    pub start_time: i64,
    pub finish_time: i64,
}

pub struct WorkerRequest {
    pub id: RequestId,
    pub priority: i32,
    pub body: ReplicaRequestBody,
    pub state: RequestState,
    pub performance: RequestPerformance,
}

impl WorkerRequest {
    fn new(id: RequestId, priority: i32, body: ReplicaRequestBody) -> Self {
        Self {
            id,
            priority,
            body,
            state: RequestState::None,
            performance: RequestPerformance::default(),
        }
    }

    fn now() -> i64 {
        // A worker-local logical clock would normally back this; process
        // monotonic time is enough for ordering performance counters.
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    /// `NONE -> IN_PROGRESS` only.
    fn start(&mut self) -> Result<()> {
        if self.state != RequestState::None {
            return Err(DbError::InvalidState(format!(
                "cannot start request {} from state {:?}",
                self.id, self.state
            )));
        }
        self.state = RequestState::InProgress;
        self.performance.start_time = Self::now();
        Ok(())
    }

    /// `IN_PROGRESS` stays; `IS_CANCELLING` -> `CANCELLED` and signals the
    /// caller to stop executing.
    fn check_cancelling(&mut self) -> Result<()> {
        match self.state {
            RequestState::InProgress => Ok(()),
            RequestState::IsCancelling => {
                self.finish(RequestState::Cancelled);
                Err(DbError::Cancelled)
            }
            other => Err(DbError::InvalidState(format!(
                "request {} executed from unexpected state {:?}",
                self.id, other
            ))),
        }
    }

    /// `NONE`/`CANCELLED` -> `CANCELLED`; `IN_PROGRESS`/`IS_CANCELLING` ->
    /// `IS_CANCELLING`; terminal states are a no-op.
    fn cancel(&mut self) {
        self.state = match self.state {
            RequestState::None | RequestState::Cancelled => {
                if self.performance.start_time == 0 {
                    self.performance.start_time = Self::now();
                }
                self.finish(RequestState::Cancelled);
                return;
            }
            RequestState::InProgress | RequestState::IsCancelling => RequestState::IsCancelling,
            terminal => terminal,
        };
    }

    /// `NONE`/`IN_PROGRESS` -> `NONE`; `IS_CANCELLING` -> `CANCELLED`.
    fn rollback(&mut self) -> Result<()> {
        match self.state {
            RequestState::None | RequestState::InProgress => {
                self.state = RequestState::None;
                Ok(())
            }
            RequestState::IsCancelling => {
                self.finish(RequestState::Cancelled);
                Err(DbError::Cancelled)
            }
            other => Err(DbError::InvalidState(format!(
                "cannot rollback request {} from state {:?}",
                self.id, other
            ))),
        }
    }

    fn finish(&mut self, state: RequestState) {
        self.state = state;
        if self.performance.finish_time == 0 {
            self.performance.finish_time = Self::now();
        }
    }
}

struct QueuedRequest(Arc<Mutex<WorkerRequest>>);

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.0.lock().id == other.0.lock().id
    }
}
impl Eq for QueuedRequest {}
impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.lock().priority.cmp(&other.0.lock().priority)
    }
}

/// Final outcome of one request, kept until a caller collects it via
/// `wait_for`/`await_response`.
struct FinishedRequest {
    state: RequestState,
    performance: RequestPerformance,
    outcome: Option<ReplicaOutcome>,
}

/// Per-worker request engine: owns the three queues and the filesystem data
/// directory this worker serves.
pub struct WorkerEngine {
    worker_name: WorkerId,
    data_dir: PathBuf,
    /// Other workers' network endpoints, used to resolve a REPLICATE
    /// request's `source_worker` to somewhere to actually dial.
    peers: HashMap<WorkerId, Worker>,
    new_queue: Mutex<BinaryHeap<QueuedRequest>>,
    in_progress: Mutex<Vec<Arc<Mutex<WorkerRequest>>>>,
    finished: Mutex<VecDeque<Arc<Mutex<WorkerRequest>>>>,
    finished_capacity: usize,
    results: Mutex<HashMap<RequestId, FinishedRequest>>,
    wake: Notify,
    completed: Notify,
}

impl WorkerEngine {
    pub fn new(worker_name: WorkerId, data_dir: PathBuf, finished_capacity: usize, peers: HashMap<WorkerId, Worker>) -> Self {
        Self {
            worker_name,
            data_dir,
            peers,
            new_queue: Mutex::new(BinaryHeap::new()),
            in_progress: Mutex::new(Vec::new()),
            finished: Mutex::new(VecDeque::new()),
            finished_capacity,
            results: Mutex::new(HashMap::new()),
            wake: Notify::new(),
            completed: Notify::new(),
        }
    }

    pub fn submit(&self, id: RequestId, priority: i32, body: ReplicaRequestBody) {
        let request = Arc::new(Mutex::new(WorkerRequest::new(id, priority, body)));
        self.new_queue.lock().push(QueuedRequest(request));
        self.wake.notify_one();
    }

    /// Mid-execution STOP (spec §4.5 `IS_CANCELLING`).
    pub fn cancel(&self, id: RequestId) {
        for req in self.in_progress.lock().iter() {
            let mut r = req.lock();
            if r.id == id {
                r.cancel();
                return;
            }
        }
        let mut new_queue = self.new_queue.lock();
        let remaining: Vec<_> = new_queue.drain().collect();
        for q in remaining {
            if q.0.lock().id == id {
                q.0.lock().cancel();
            }
            new_queue.push(q);
        }
    }

    /// Re-queues every in-progress request (used when the worker service is
    /// drained ahead of a `DeleteWorkerJob`).
    pub fn rollback_all(&self) {
        let mut in_progress = self.in_progress.lock();
        for req in in_progress.drain(..) {
            let mut r = req.lock();
            if r.rollback().is_ok() {
                drop(r);
                self.new_queue.lock().push(QueuedRequest(req));
            }
        }
        self.wake.notify_one();
    }

    /// Runs one worker pass: pop the highest-priority request, execute it
    /// to completion. Call this from N tasks to model a fixed thread pool.
    pub async fn run_one(&self) -> bool {
        let request = {
            let mut queue = self.new_queue.lock();
            match queue.pop() {
                Some(q) => q.0,
                None => return false,
            }
        };

        {
            let mut r = request.lock();
            if r.start().is_err() {
                return true;
            }
        }
        self.in_progress.lock().push(Arc::clone(&request));

        let body = request.lock().body.clone();
        let result = self.execute(&request, body).await;

        let mut outcome = None;
        {
            let mut r = request.lock();
            if r.check_cancelling().is_ok() {
                match result {
                    Ok(payload) => {
                        r.finish(RequestState::Succeeded);
                        outcome = Some(payload);
                    }
                    Err(_) => r.finish(RequestState::Failed),
                }
            }
        }
        self.store_result(&request, outcome);

        self.in_progress.lock().retain(|r| r.lock().id != request.lock().id);
        self.push_finished(request);
        true
    }

    /// Drives `run_one` forever, parking on `wake` between empty polls.
    /// Spawn one of these per pool task; the real pickup happens inside
    /// `run_one`, so any task can service any worker's pending request.
    pub async fn run_forever(&self) {
        loop {
            if !self.run_one().await {
                self.wake.notified().await;
            }
        }
    }

    /// Blocks until `id` reaches a terminal state and returns its outcome.
    async fn wait_for(&self, id: RequestId) -> FinishedRequest {
        loop {
            let notified = self.completed.notified();
            if let Some(finished) = self.results.lock().remove(&id) {
                return finished;
            }
            notified.await;
        }
    }

    /// The non-terminal or terminal state of `id`, without consuming its
    /// result (spec §4.7 `STATUS:*` polling).
    pub fn status(&self, id: RequestId) -> Option<RequestState> {
        if let Some(finished) = self.results.lock().get(&id) {
            return Some(finished.state);
        }
        for req in self.in_progress.lock().iter() {
            let r = req.lock();
            if r.id == id {
                return Some(r.state);
            }
        }
        for q in self.new_queue.lock().iter() {
            let r = q.0.lock();
            if r.id == id {
                return Some(r.state);
            }
        }
        None
    }

    /// Waits for `id` to finish and builds the wire-level response for it,
    /// filling each returned replica's `worker` field with this engine's own
    /// name (the worker never knows its own name otherwise).
    pub async fn await_response(&self, id: RequestId) -> ReplicationResponse {
        let finished = self.wait_for(id).await;
        self.build_response(finished)
    }

    fn build_response(&self, finished: FinishedRequest) -> ReplicationResponse {
        let status = match finished.state {
            RequestState::Succeeded => WorkerStatus::Success,
            RequestState::Failed => WorkerStatus::Failed,
            RequestState::Cancelled => WorkerStatus::Cancelled,
            RequestState::IsCancelling => WorkerStatus::IsCancelling,
            RequestState::InProgress => WorkerStatus::InProgress,
            RequestState::None => WorkerStatus::Queued,
        };
        let payload = match finished.outcome {
            Some(ReplicaOutcome::Echo(data)) => ReplicaPayload::Echo(data),
            Some(ReplicaOutcome::Replica(mut replica)) => {
                replica.worker = self.worker_name.clone();
                ReplicaPayload::One(replica)
            }
            Some(ReplicaOutcome::ReplicaList(list)) => ReplicaPayload::Many(
                list.into_iter()
                    .map(|mut replica| {
                        replica.worker = self.worker_name.clone();
                        replica
                    })
                    .collect(),
            ),
            None => ReplicaPayload::None,
        };
        ReplicationResponse {
            status,
            extended_status: ExtendedStatus::None,
            performance: WirePerformance {
                w_receive_time: finished.performance.start_time,
                w_start_time: finished.performance.start_time,
                w_finish_time: finished.performance.finish_time,
                ..Default::default()
            },
            payload,
        }
    }

    async fn execute(&self, request: &Arc<Mutex<WorkerRequest>>, body: ReplicaRequestBody) -> Result<ReplicaOutcome> {
        match body {
            ReplicaRequestBody::Echo { data } => Ok(ReplicaOutcome::Echo(data)),
            ReplicaRequestBody::Delete { database, chunk } => self.execute_delete(&database, chunk).await,
            ReplicaRequestBody::Find { database, chunk, compute_checksum } => {
                self.execute_find(&database, chunk, compute_checksum).await
            }
            ReplicaRequestBody::FindAll { database } => self.execute_find_all(&database).await,
            ReplicaRequestBody::Replicate { database, chunk, source_worker } => {
                let _ = request;
                self.execute_replicate(&database, chunk, &source_worker).await
            }
        }
    }

    /// Pulls `(database, chunk)` from `source_worker`'s file server, then
    /// reports the same status a local `Find` would (spec §4.5 REPLICATE).
    async fn execute_replicate(&self, database: &DatabaseName, chunk: u64, source_worker: &str) -> Result<ReplicaOutcome> {
        let source = self
            .peers
            .get(source_worker)
            .ok_or_else(|| DbError::InvalidArgument(format!("unknown source worker for replicate: {source_worker}")))?;
        let dest = self.chunk_dir(database, chunk);
        replica_client::fetch_chunk(source, database, chunk, &dest).await?;
        self.execute_find(database, chunk, true).await
    }

    async fn execute_delete(&self, database: &DatabaseName, chunk: u64) -> Result<ReplicaOutcome> {
        let dir = self.chunk_dir(database, chunk);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|_| DbError::Filesystem(FsError::FileDelete(dir.display().to_string())))?;
        }
        Ok(ReplicaOutcome::Replica(Replica {
            worker: String::new(),
            database: database.clone(),
            family: String::new(),
            chunk,
            status: ReplicaStatus::NotFound,
            verify_time: 0,
            files: vec![],
        }))
    }

    async fn execute_find(&self, database: &DatabaseName, chunk: u64, compute_checksum: bool) -> Result<ReplicaOutcome> {
        let dir = self.chunk_dir(database, chunk);
        let files = self.scan_chunk_files(&dir, compute_checksum).await?;
        let status = if files.is_empty() {
            ReplicaStatus::NotFound
        } else {
            ReplicaStatus::Incomplete
        };
        Ok(ReplicaOutcome::Replica(Replica {
            worker: String::new(),
            database: database.clone(),
            family: String::new(),
            chunk,
            status,
            verify_time: 0,
            files,
        }))
    }

    async fn execute_find_all(&self, database: &DatabaseName) -> Result<ReplicaOutcome> {
        let db_dir = self.data_dir.join(database);
        let mut replicas = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&db_dir).await {
            Ok(rd) => rd,
            Err(_) => return Ok(ReplicaOutcome::ReplicaList(replicas)),
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            if let Some(chunk) = entry
                .file_name()
                .to_str()
                .and_then(|s| crate::catalog::parse_chunk_number(s).ok())
            {
                let files = self.scan_chunk_files(&entry.path(), false).await?;
                replicas.push(Replica {
                    worker: String::new(),
                    database: database.clone(),
                    family: String::new(),
                    chunk,
                    status: if files.is_empty() {
                        ReplicaStatus::NotFound
                    } else {
                        ReplicaStatus::Incomplete
                    },
                    verify_time: 0,
                    files,
                });
            }
        }
        Ok(ReplicaOutcome::ReplicaList(replicas))
    }

    async fn scan_chunk_files(&self, dir: &std::path::Path, compute_checksum: bool) -> Result<Vec<ReplicaFile>> {
        let mut out = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(_) => return Ok(out),
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let metadata = entry
                .metadata()
                .await
                .map_err(|_| DbError::Filesystem(FsError::FileStat(entry.path().display().to_string())))?;
            let checksum = if compute_checksum {
                Some(checksum_file(&entry.path(), DEFAULT_BLOCK_SIZE).await?)
            } else {
                None
            };
            out.push(ReplicaFile {
                name: entry.file_name().to_string_lossy().to_string(),
                size: metadata.len(),
                mtime: metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0),
                checksum,
                begin_transfer_time: None,
                end_transfer_time: None,
            });
        }
        Ok(out)
    }

    fn chunk_dir(&self, database: &str, chunk: u64) -> PathBuf {
        self.data_dir.join(database).join(chunk.to_string())
    }

    fn store_result(&self, request: &Arc<Mutex<WorkerRequest>>, outcome: Option<ReplicaOutcome>) {
        let r = request.lock();
        self.results.lock().insert(
            r.id,
            FinishedRequest {
                state: r.state,
                performance: r.performance,
                outcome,
            },
        );
        drop(r);
        self.completed.notify_waiters();
    }

    fn push_finished(&self, request: Arc<Mutex<WorkerRequest>>) {
        let mut finished = self.finished.lock();
        finished.push_back(request);
        while finished.len() > self.finished_capacity {
            finished.pop_front();
        }
    }
}

#[derive(Clone)]
enum ReplicaOutcome {
    Echo(Vec<u8>),
    Replica(Replica),
    ReplicaList(Vec<Replica>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_request_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let engine = WorkerEngine::new("w1".to_string(), dir.path().to_path_buf(), 10, HashMap::new());
        engine.submit(1, 0, ReplicaRequestBody::Echo { data: vec![1, 2, 3] });
        assert!(engine.run_one().await);
        let finished = engine.finished.lock();
        let req = finished.front().unwrap().lock();
        assert_eq!(req.state, RequestState::Succeeded);
    }

    #[tokio::test]
    async fn find_all_on_missing_database_returns_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let engine = WorkerEngine::new("w1".to_string(), dir.path().to_path_buf(), 10, HashMap::new());
        engine.submit(1, 0, ReplicaRequestBody::FindAll { database: "nope".to_string() });
        assert!(engine.run_one().await);
    }

    #[tokio::test]
    async fn echo_result_is_collectable_via_await_response() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(WorkerEngine::new("w1".to_string(), dir.path().to_path_buf(), 10, HashMap::new()));
        engine.submit(9, 0, ReplicaRequestBody::Echo { data: vec![7] });
        let driver = Arc::clone(&engine);
        tokio::spawn(async move {
            driver.run_one().await;
        });
        let response = engine.await_response(9).await;
        assert_eq!(response.status, crate::protocol::WorkerStatus::Success);
        match response.payload {
            crate::protocol::ReplicaPayload::Echo(data) => assert_eq!(data, vec![7]),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn replicate_with_unknown_source_worker_fails() {
        let dir = tempfile::tempdir().unwrap();
        let engine = WorkerEngine::new("w1".to_string(), dir.path().to_path_buf(), 10, HashMap::new());
        engine.submit(
            1,
            0,
            ReplicaRequestBody::Replicate { database: "db".to_string(), chunk: 1, source_worker: "ghost".to_string() },
        );
        assert!(engine.run_one().await);
        let finished = engine.finished.lock();
        let req = finished.front().unwrap().lock();
        assert_eq!(req.state, RequestState::Failed);
    }

    #[test]
    fn cancel_before_start_marks_cancelled_with_backfilled_start_time() {
        let mut req = WorkerRequest::new(1, 0, ReplicaRequestBody::Echo { data: vec![] });
        req.cancel();
        assert_eq!(req.state, RequestState::Cancelled);
        assert_ne!(req.performance.start_time, 0);
        assert_ne!(req.performance.finish_time, 0);
    }

    #[test]
    fn cancel_in_progress_enters_is_cancelling_not_cancelled_directly() {
        let mut req = WorkerRequest::new(1, 0, ReplicaRequestBody::Echo { data: vec![] });
        req.start().unwrap();
        req.cancel();
        assert_eq!(req.state, RequestState::IsCancelling);
    }

    #[test]
    fn rollback_from_in_progress_returns_to_none() {
        let mut req = WorkerRequest::new(1, 0, ReplicaRequestBody::Echo { data: vec![] });
        req.start().unwrap();
        req.rollback().unwrap();
        assert_eq!(req.state, RequestState::None);
    }
}
