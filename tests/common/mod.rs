// Shared fake-worker harness for integration tests that drive a job all the
// way through the Messenger against a real TCP listener, rather than just
// exercising pure job logic.

use std::net::SocketAddr;
use std::sync::Arc;

use qserv_rs::protocol::Message;
use qserv_rs::transport::{TcpConfig, TcpTransport};

/// Binds an ephemeral loopback listener and spawns a task that answers every
/// received request with `handler(request)`, replying with the same request
/// id so the Connector's one-in-flight invariant is satisfied. Returns the
/// address to register with the Messenger.
pub async fn spawn_fake_worker<F>(handler: F) -> SocketAddr
where
    F: Fn(Message) -> Message + Send + Sync + 'static,
{
    let mut config = TcpConfig::default();
    config.bind_addr = "127.0.0.1:0".parse().unwrap();
    let mut transport = TcpTransport::new(config);
    transport.bind().await.unwrap();
    let addr = transport.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        loop {
            let conn = match transport.accept().await {
                Ok(c) => c,
                Err(_) => return,
            };
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                loop {
                    let (request_id, message) = match conn.recv_message().await {
                        Ok(m) => m,
                        Err(_) => return,
                    };
                    let reply = handler(message);
                    if conn.send_message(request_id, &reply).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    addr
}
