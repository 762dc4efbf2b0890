// # Controller request objects (C7)
//
// Coordinator-side mirror of the worker's C5 request types: submit through
// the Messenger, track retries while the worker reports it queued or
// running, persist the resulting replica facts through C4 on success.
// Mirrors the worker's `NONE -> IN_PROGRESS -> {terminal}` shape one level
// up, per spec §4.7.

use std::sync::Arc;
use std::time::Duration;

use crate::common::{RequestId, WorkerId};
use crate::error::{DbError, Result};
use crate::messenger::Messenger;
use crate::protocol::{
    ExtendedStatus, Message, Performance, ReplicaPayload, ReplicaRequestBody, RequestManagementBody, WorkerStatus,
};
use crate::replication::ReplicaStore;

/// Controller-side request lifecycle (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Created,
    InProgress,
    Finished,
}

/// Extended terminal/tracking state (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedState {
    None,
    Success,
    ClientError,
    ServerBad,
    ServerError,
    ServerQueued,
    ServerInProgress,
    ServerIsCancelling,
    ServerCancelled,
    Expired,
    Cancelled,
    TimeoutExpired,
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One mutating or observational request dispatched against a single worker.
pub struct ControllerRequest {
    pub id: RequestId,
    pub worker: WorkerId,
    pub body: ReplicaRequestBody,
    pub state: ControllerState,
    pub extended_state: ExtendedState,
    pub performance: Performance,
    /// Keep polling STATUS while the worker reports QUEUED/IN_PROGRESS/
    /// IS_CANCELLING instead of treating those as terminal.
    pub keep_tracking: bool,
    /// On a duplicate-id BAD response, switch to tracking the original
    /// request instead of failing (spec §4.7 step 6).
    pub allow_duplicate: bool,
}

impl ControllerRequest {
    pub fn new(id: RequestId, worker: WorkerId, body: ReplicaRequestBody) -> Self {
        Self {
            id,
            worker,
            body,
            state: ControllerState::Created,
            extended_state: ExtendedState::None,
            performance: Performance { c_create_time: now_ms(), ..Default::default() },
            keep_tracking: true,
            allow_duplicate: true,
        }
    }

    /// Runs the full execution contract: submit, await reply, retry on
    /// non-terminal worker status, persist on success (spec §4.7 steps 1-6).
    pub async fn execute(
        &mut self,
        messenger: &Messenger,
        store: Option<&ReplicaStore>,
        retry_interval: Duration,
    ) -> Result<ReplicaPayload> {
        self.state = ControllerState::InProgress;
        self.performance.c_start_time = now_ms();

        let mut message = Message::Replica(self.body.clone());
        loop {
            let receiver = messenger.send(&self.worker, self.id, message.clone()).await?;
            let reply = receiver
                .await
                .map_err(|_| DbError::Transport(crate::error::TransportError::PeerClosed))??;

            let response = match reply {
                Message::Response(r) => r,
                other => {
                    return Err(DbError::InvalidState(format!(
                        "worker returned non-response message for request {}: {other:?}",
                        self.id
                    )))
                }
            };

            self.performance.w_receive_time = response.performance.w_receive_time;
            self.performance.w_start_time = response.performance.w_start_time;
            self.performance.w_finish_time = response.performance.w_finish_time;

            match response.status {
                WorkerStatus::Success => {
                    self.finish(ExtendedState::Success);
                    if let (Some(store), Some(replica)) = (store, single_replica(&response.payload)) {
                        store.upsert(replica).await?;
                    }
                    return Ok(response.payload);
                }
                WorkerStatus::Bad if response.extended_status == ExtendedStatus::Duplicate && self.allow_duplicate && self.keep_tracking => {
                    message = Message::RequestControl(RequestManagementBody::Status { target_id: self.id });
                    tokio::time::sleep(retry_interval).await;
                    continue;
                }
                WorkerStatus::Bad => {
                    self.finish(ExtendedState::ServerBad);
                    return Err(DbError::InvalidArgument(format!("worker rejected request {}", self.id)));
                }
                WorkerStatus::Failed => {
                    self.finish(ExtendedState::ServerError);
                    return Err(DbError::InvalidState(format!("worker reports failure for request {}", self.id)));
                }
                WorkerStatus::Cancelled => {
                    self.finish(ExtendedState::ServerCancelled);
                    return Err(DbError::Cancelled);
                }
                WorkerStatus::Queued | WorkerStatus::InProgress | WorkerStatus::IsCancelling if self.keep_tracking => {
                    self.extended_state = match response.status {
                        WorkerStatus::Queued => ExtendedState::ServerQueued,
                        WorkerStatus::InProgress => ExtendedState::ServerInProgress,
                        _ => ExtendedState::ServerIsCancelling,
                    };
                    message = Message::RequestControl(RequestManagementBody::Status { target_id: self.id });
                    tokio::time::sleep(retry_interval).await;
                    continue;
                }
                other => {
                    self.finish(ExtendedState::ClientError);
                    return Err(DbError::InvalidState(format!("unexpected worker status {other:?} for request {}", self.id)));
                }
            }
        }
    }

    fn finish(&mut self, extended_state: ExtendedState) {
        self.state = ControllerState::Finished;
        self.extended_state = extended_state;
        self.performance.c_finish_time = now_ms();
    }
}

fn single_replica(payload: &ReplicaPayload) -> Option<crate::catalog::Replica> {
    match payload {
        ReplicaPayload::One(r) => Some(r.clone()),
        _ => None,
    }
}

/// Issues `STOP` for `request_id` on `worker`, best-effort (spec §4.8
/// cancellation cascade: late worker replies are suppressed this way).
pub async fn stop(messenger: &Arc<Messenger>, worker: &str, request_id: RequestId) -> Result<()> {
    let receiver = messenger
        .send(worker, request_id, Message::RequestControl(RequestManagementBody::Stop { target_id: request_id }))
        .await?;
    let _ = receiver.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_starts_created_with_create_time_set() {
        let req = ControllerRequest::new(1, "w1".to_string(), ReplicaRequestBody::Echo { data: vec![] });
        assert_eq!(req.state, ControllerState::Created);
        assert_ne!(req.performance.c_create_time, 0);
    }

    #[test]
    fn finish_sets_finished_state_and_finish_time() {
        let mut req = ControllerRequest::new(1, "w1".to_string(), ReplicaRequestBody::Echo { data: vec![] });
        req.finish(ExtendedState::Success);
        assert_eq!(req.state, ControllerState::Finished);
        assert_eq!(req.extended_state, ExtendedState::Success);
        assert_ne!(req.performance.c_finish_time, 0);
    }
}
