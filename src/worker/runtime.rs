// # Worker runtime
//
// Binds a `WorkerEngine` (C5) and a `FileServer` (C6) to a pair of
// `TcpTransport` listeners and dispatches inbound frames into them — the
// piece that makes a worker process actually reachable over the wire,
// rather than just a library of components a harness can call directly.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::Worker as WorkerInfo;
use crate::common::WorkerId;
use crate::error::Result;
use crate::protocol::{
    ExtendedStatus, Message, Performance, ReplicaPayload, RequestManagementBody, ReplicationResponse, ServiceRequestBody, WorkerStatus,
};
use crate::transport::{TcpConfig, TcpConnection, TcpTransport};
use crate::worker::engine::{RequestState, WorkerEngine};
use crate::worker::file_server::FileServer;

/// A running worker: owns the engine and file server and the two listeners
/// that feed them. `serve()` runs until the process is torn down.
pub struct WorkerRuntime {
    engine: Arc<WorkerEngine>,
    file_server: Arc<FileServer>,
    svc_transport: TcpTransport,
    fs_transport: TcpTransport,
    pool_size: usize,
}

impl WorkerRuntime {
    /// Binds both listeners. `peers` resolves other workers' `source_worker`
    /// names for REPLICATE; `known_databases` is the file server's allow-list.
    pub async fn bind(
        worker_name: WorkerId,
        svc_bind: SocketAddr,
        fs_bind: SocketAddr,
        data_dir: PathBuf,
        fs_buf_size: usize,
        known_databases: std::collections::HashSet<String>,
        peers: HashMap<WorkerId, WorkerInfo>,
    ) -> Result<Self> {
        let mut svc_config = TcpConfig::default();
        svc_config.bind_addr = svc_bind;
        let mut svc_transport = TcpTransport::new(svc_config);
        svc_transport.bind().await?;

        let mut fs_config = TcpConfig::default();
        fs_config.bind_addr = fs_bind;
        let mut fs_transport = TcpTransport::new(fs_config);
        fs_transport.bind().await?;

        let engine = Arc::new(WorkerEngine::new(worker_name, data_dir.clone(), 1024, peers));
        let file_server = Arc::new(FileServer::new(data_dir, fs_buf_size, known_databases));

        Ok(Self {
            engine,
            file_server,
            svc_transport,
            fs_transport,
            pool_size: num_cpus::get().max(1),
        })
    }

    pub fn svc_addr(&self) -> Result<SocketAddr> {
        self.svc_transport.local_addr()
    }

    pub fn fs_addr(&self) -> Result<SocketAddr> {
        self.fs_transport.local_addr()
    }

    pub fn engine(&self) -> &Arc<WorkerEngine> {
        &self.engine
    }

    /// Runs the engine's worker pool plus both accept loops until a
    /// connection error ends one of them. Callers that want a graceful
    /// shutdown should `tokio::select!` this against a signal and drop the
    /// runtime.
    pub async fn serve(self) -> Result<()> {
        for _ in 0..self.pool_size {
            let engine = Arc::clone(&self.engine);
            tokio::spawn(async move { engine.run_forever().await });
        }

        let engine = Arc::clone(&self.engine);
        let svc_transport = self.svc_transport;
        let svc_loop = tokio::spawn(async move {
            loop {
                match svc_transport.accept().await {
                    Ok(conn) => {
                        let engine = Arc::clone(&engine);
                        tokio::spawn(async move { serve_svc_connection(engine, conn).await });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "service listener accept failed, stopping");
                        return;
                    }
                }
            }
        });

        let file_server = Arc::clone(&self.file_server);
        let fs_transport = self.fs_transport;
        let fs_loop = tokio::spawn(async move {
            loop {
                match fs_transport.accept().await {
                    Ok(conn) => {
                        let file_server = Arc::clone(&file_server);
                        tokio::spawn(async move { serve_fs_connection(file_server, conn).await });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "file-server listener accept failed, stopping");
                        return;
                    }
                }
            }
        });

        let _ = tokio::join!(svc_loop, fs_loop);
        Ok(())
    }
}

async fn serve_svc_connection(engine: Arc<WorkerEngine>, conn: TcpConnection) {
    loop {
        let (request_id, message) = match conn.recv_message().await {
            Ok(m) => m,
            Err(_) => return,
        };

        let response = match message {
            Message::Replica(body) => {
                engine.submit(request_id, 0, body);
                engine.await_response(request_id).await
            }
            Message::RequestControl(RequestManagementBody::Status { target_id }) => status_response(&engine, target_id),
            Message::RequestControl(RequestManagementBody::Stop { target_id }) => {
                engine.cancel(target_id);
                terminal_response(WorkerStatus::Cancelled)
            }
            Message::Service(ServiceRequestBody::Drain) => {
                engine.rollback_all();
                terminal_response(WorkerStatus::Success)
            }
            Message::Service(_) => terminal_response(WorkerStatus::Success),
            Message::FileRequest(_) | Message::FileResponse(_) | Message::FileChunk(_) => return,
            Message::Response(_) => return,
        };

        if conn.send_message(request_id, &Message::Response(response)).await.is_err() {
            return;
        }
    }
}

fn status_response(engine: &WorkerEngine, target_id: crate::common::RequestId) -> ReplicationResponse {
    match engine.status(target_id) {
        Some(state) => {
            let status = match state {
                RequestState::None => WorkerStatus::Queued,
                RequestState::InProgress => WorkerStatus::InProgress,
                RequestState::IsCancelling => WorkerStatus::IsCancelling,
                RequestState::Succeeded => WorkerStatus::Success,
                RequestState::Failed => WorkerStatus::Failed,
                RequestState::Cancelled => WorkerStatus::Cancelled,
            };
            terminal_response(status)
        }
        None => ReplicationResponse {
            status: WorkerStatus::Bad,
            extended_status: ExtendedStatus::InvalidArgument,
            performance: Performance::default(),
            payload: ReplicaPayload::None,
        },
    }
}

fn terminal_response(status: WorkerStatus) -> ReplicationResponse {
    ReplicationResponse {
        status,
        extended_status: ExtendedStatus::None,
        performance: Performance::default(),
        payload: ReplicaPayload::None,
    }
}

async fn serve_fs_connection(file_server: Arc<FileServer>, conn: TcpConnection) {
    loop {
        let (request_id, message) = match conn.recv_message().await {
            Ok(m) => m,
            Err(_) => return,
        };
        let crate::protocol::FileRequestBody::Open { database, file } = match message {
            Message::FileRequest(body) => body,
            _ => return,
        };

        let response = match file_server.open(&database, &file).await {
            Ok(r) => r,
            Err(_) => return,
        };
        let available = response.available;
        if conn.send_message(request_id, &Message::FileResponse(response)).await.is_err() {
            return;
        }
        if available && file_server.stream(&database, &file, &conn, request_id).await.is_err() {
            return;
        }
    }
}
