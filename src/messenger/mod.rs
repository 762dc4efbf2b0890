// # Messenger (C2)
//
// One Messenger per process holds a `worker -> connector` map (ported from
// the original `Messenger`'s `_workerConnector` map, which delegates every
// operation to the named connector and throws on an unknown worker — here,
// returns `DbError::NotFound`). Each `Connector` is the state machine
// described in spec §4.2: `Initial -> Connecting -> Communicating`, one
// request in flight at a time, fixed-interval reconnect on any I/O or
// resolution failure.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{oneshot, Mutex, Notify};

use crate::common::{RequestId, WorkerId};
use crate::error::{DbError, Result, TransportError};
use crate::protocol::Message;
use crate::transport::{TcpConfig, TcpConnection, TcpTransport};

/// Connector connection state (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectorState {
    Initial,
    Connecting,
    Communicating,
}

struct PendingRequest {
    id: RequestId,
    message: Message,
    on_finish: oneshot::Sender<Result<Message>>,
}

struct ConnectorInner {
    state: ConnectorState,
    queue: VecDeque<PendingRequest>,
    in_flight: Option<RequestId>,
    stopped: bool,
    /// Ids aborted by `cancel()` while in flight; `drive()` consults this
    /// before handing a reply to `on_finish` so a stale reply from a
    /// connection that was torn down mid-request is swallowed rather than
    /// delivered (spec §4.2).
    cancelled: HashSet<RequestId>,
}

/// One long-lived connection to a single worker.
pub struct Connector {
    worker: WorkerId,
    addr: SocketAddr,
    reconnect_interval: Duration,
    inner: Mutex<ConnectorInner>,
    wake: Notify,
    /// The live socket, shared so `cancel()` can close it out from under a
    /// `drive()` call blocked in `recv_message()`.
    conn: Mutex<Option<TcpConnection>>,
}

impl Connector {
    fn new(worker: WorkerId, addr: SocketAddr, reconnect_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            worker,
            addr,
            reconnect_interval,
            inner: Mutex::new(ConnectorInner {
                state: ConnectorState::Initial,
                queue: VecDeque::new(),
                in_flight: None,
                stopped: false,
                cancelled: HashSet::new(),
            }),
            wake: Notify::new(),
            conn: Mutex::new(None),
        })
    }

    fn spawn_driver(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.drive().await });
    }

    /// Rejects a second `send` on an already-registered id (spec §3
    /// invariant 3, §8 "Messenger duplicate-id").
    async fn send(&self, id: RequestId, message: Message, on_finish: oneshot::Sender<Result<Message>>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.in_flight == Some(id) || inner.queue.iter().any(|r| r.id == id) {
            return Err(DbError::InvalidState(format!(
                "request id {id} already registered on worker {}",
                self.worker
            )));
        }
        inner.queue.push_back(PendingRequest { id, message, on_finish });
        drop(inner);
        self.wake.notify_one();
        Ok(())
    }

    /// Removes a queued request silently, or aborts the in-flight one by
    /// tearing down the connection so a late reply cannot be delivered to a
    /// dead id (spec §4.2). No `on_finish` is invoked either way.
    async fn cancel(&self, id: RequestId) {
        let mut inner = self.inner.lock().await;
        if let Some(pos) = inner.queue.iter().position(|r| r.id == id) {
            inner.queue.remove(pos);
            return;
        }
        if inner.in_flight == Some(id) {
            inner.cancelled.insert(id);
            inner.state = ConnectorState::Initial;
            inner.in_flight = None;
            drop(inner);
            if let Some(conn) = self.conn.lock().await.take() {
                let _ = conn.close().await;
            }
            self.wake.notify_one();
        }
    }

    /// Delivers `result` to `request.on_finish` unless `cancel()` marked its
    /// id cancelled in the meantime, in which case the reply is discarded.
    async fn finish_request(&self, request: PendingRequest, result: Result<Message>) {
        let mut inner = self.inner.lock().await;
        let cancelled = inner.cancelled.remove(&request.id);
        drop(inner);
        if !cancelled {
            let _ = request.on_finish.send(result);
        }
    }

    async fn exists(&self, id: RequestId) -> bool {
        let inner = self.inner.lock().await;
        inner.in_flight == Some(id) || inner.queue.iter().any(|r| r.id == id)
    }

    async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.stopped = true;
        inner.queue.clear();
        inner.in_flight = None;
        drop(inner);
        if let Some(conn) = self.conn.lock().await.take() {
            let _ = conn.close().await;
        }
        self.wake.notify_one();
    }

    /// The connector's background loop: dequeue one request at a time,
    /// (re)connect as needed, send, await the matching reply.
    async fn drive(self: Arc<Self>) {
        let transport = TcpTransport::new(TcpConfig::default());

        loop {
            let next = {
                let mut inner = self.inner.lock().await;
                if inner.stopped {
                    return;
                }
                if inner.in_flight.is_some() {
                    None
                } else {
                    inner.queue.pop_front()
                }
            };

            let request = match next {
                Some(r) => r,
                None => {
                    self.wake.notified().await;
                    continue;
                }
            };

            {
                let mut inner = self.inner.lock().await;
                if inner.stopped {
                    let _ = request.on_finish.send(Err(DbError::Cancelled));
                    return;
                }
                inner.in_flight = Some(request.id);
                inner.state = ConnectorState::Connecting;
            }

            if self.conn.lock().await.is_none() {
                match transport.connect(self.addr).await {
                    Ok(c) => *self.conn.lock().await = Some(c),
                    Err(e) => {
                        tracing::warn!(worker = %self.worker, error = %e, "connect failed, will retry");
                        self.clear_in_flight().await;
                        self.finish_request(request, Err(e)).await;
                        tokio::time::sleep(self.reconnect_interval).await;
                        continue;
                    }
                }
            }

            {
                let mut inner = self.inner.lock().await;
                inner.state = ConnectorState::Communicating;
            }

            // Clone the handle so `cancel()` can take and close `self.conn`
            // out from under a blocking `recv_message()` below.
            let active = match self.conn.lock().await.clone() {
                Some(c) => c,
                None => {
                    // cancelled right after connect, before send.
                    self.clear_in_flight().await;
                    self.finish_request(request, Err(DbError::Cancelled)).await;
                    continue;
                }
            };

            let send_result = active.send_message(request.id, &request.message).await;
            if let Err(e) = send_result {
                tracing::warn!(worker = %self.worker, error = %e, "send failed, reconnecting");
                *self.conn.lock().await = None;
                self.clear_in_flight().await;
                self.finish_request(request, Err(e)).await;
                tokio::time::sleep(self.reconnect_interval).await;
                continue;
            }

            match active.recv_message().await {
                Ok((reply_id, reply)) if reply_id == request.id => {
                    self.clear_in_flight().await;
                    self.finish_request(request, Ok(reply)).await;
                }
                Ok((reply_id, _)) => {
                    tracing::warn!(
                        worker = %self.worker,
                        expected = request.id,
                        got = reply_id,
                        "protocol mismatch, restarting connector"
                    );
                    *self.conn.lock().await = None;
                    self.clear_in_flight().await;
                    self.finish_request(
                        request,
                        Err(DbError::Transport(TransportError::ProtocolMismatch {
                            expected: request.id,
                            actual: reply_id,
                        })),
                    )
                    .await;
                    tokio::time::sleep(self.reconnect_interval).await;
                }
                Err(e) => {
                    tracing::warn!(worker = %self.worker, error = %e, "recv failed, reconnecting");
                    *self.conn.lock().await = None;
                    self.clear_in_flight().await;
                    self.finish_request(request, Err(e)).await;
                    tokio::time::sleep(self.reconnect_interval).await;
                }
            }
        }
    }

    async fn clear_in_flight(&self) {
        let mut inner = self.inner.lock().await;
        inner.in_flight = None;
        inner.state = ConnectorState::Initial;
    }
}

/// Holds every worker's connector; the sole entry point jobs/controller
/// requests use to talk to workers.
pub struct Messenger {
    connectors: DashMap<WorkerId, Arc<Connector>>,
    reconnect_interval: Duration,
}

impl Messenger {
    pub fn new(reconnect_interval_sec: u64) -> Self {
        Self {
            connectors: DashMap::new(),
            reconnect_interval: Duration::from_secs(reconnect_interval_sec.max(1)),
        }
    }

    /// Registers (or replaces) the connector for `worker`, pointed at
    /// `addr`. Call once per worker at startup from the configured
    /// `svc_host:svc_port`.
    pub fn register_worker(&self, worker: WorkerId, addr: SocketAddr) {
        let connector = Connector::new(worker.clone(), addr, self.reconnect_interval);
        connector.spawn_driver();
        self.connectors.insert(worker, connector);
    }

    fn connector(&self, worker: &str) -> Result<Arc<Connector>> {
        self.connectors
            .get(worker)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DbError::InvalidArgument(format!("unknown worker: {worker}")))
    }

    pub async fn send(
        &self,
        worker: &str,
        id: RequestId,
        message: Message,
    ) -> Result<oneshot::Receiver<Result<Message>>> {
        let connector = self.connector(worker)?;
        let (tx, rx) = oneshot::channel();
        connector.send(id, message, tx).await?;
        Ok(rx)
    }

    pub async fn cancel(&self, worker: &str, id: RequestId) -> Result<()> {
        let connector = self.connector(worker)?;
        connector.cancel(id).await;
        Ok(())
    }

    pub async fn exists(&self, worker: &str, id: RequestId) -> Result<bool> {
        let connector = self.connector(worker)?;
        Ok(connector.exists(id).await)
    }

    /// Cancels every connector (spec §4.2 `stop()`).
    pub async fn stop(&self) {
        for entry in self.connectors.iter() {
            entry.value().stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_worker_is_rejected() {
        let messenger = Messenger::new(1);
        let result = messenger
            .send("ghost", 1, Message::Replica(crate::protocol::ReplicaRequestBody::Echo { data: vec![] }))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn duplicate_id_before_completion_fails() {
        let messenger = Messenger::new(1);
        messenger.register_worker("w1".to_string(), "127.0.0.1:1".parse().unwrap());
        let echo = || Message::Replica(crate::protocol::ReplicaRequestBody::Echo { data: vec![] });
        let _first = messenger.send("w1", 42, echo()).await.unwrap();
        let second = messenger.send("w1", 42, echo()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn exists_reflects_queued_request() {
        let messenger = Messenger::new(1);
        messenger.register_worker("w1".to_string(), "127.0.0.1:1".parse().unwrap());
        let echo = Message::Replica(crate::protocol::ReplicaRequestBody::Echo { data: vec![] });
        let _rx = messenger.send("w1", 7, echo).await.unwrap();
        assert!(messenger.exists("w1", 7).await.unwrap());
    }
}
