// TCP transport substrate for the framed wire protocol (C1).
//
// Provides the stream-level primitives the Messenger's connectors and the
// file server build on: bind/accept, connect-with-retry, and frame-level
// send/recv built on `protocol::MessageCodec`. The connect-with-retry
// backoff here is the *initial dial* policy only — it is a different
// concern from the Messenger's post-connect reconnect policy, which is
// fixed-interval per spec §4.2 and lives in `messenger::Connector`.

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::error::{DbError, Result, TransportError};
use crate::protocol::{Message, MessageCodec, MessageHeader};

/// TCP transport configuration.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub bind_addr: SocketAddr,
    pub nodelay: bool,
    pub keepalive_interval: Option<Duration>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Attempts for the initial outbound dial only.
    pub max_dial_attempts: u32,
    pub dial_initial_backoff: Duration,
    pub dial_max_backoff: Duration,
    pub send_buffer_size: Option<usize>,
    pub recv_buffer_size: Option<usize>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:25000".parse().unwrap(),
            nodelay: true,
            keepalive_interval: Some(Duration::from_secs(60)),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            max_dial_attempts: 5,
            dial_initial_backoff: Duration::from_millis(100),
            dial_max_backoff: Duration::from_secs(30),
            send_buffer_size: Some(256 * 1024),
            recv_buffer_size: Some(256 * 1024),
        }
    }
}

/// A listening/dialing TCP endpoint producing `TcpConnection`s.
pub struct TcpTransport {
    config: TcpConfig,
    listener: Option<TcpListener>,
}

impl TcpTransport {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            listener: None,
        }
    }

    pub async fn bind(&mut self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(DbError::Io)?;
        tracing::info!(addr = %self.config.bind_addr, "tcp transport listening");
        self.listener = Some(listener);
        Ok(())
    }

    /// The address actually bound, useful when `bind_addr` requested an
    /// ephemeral port (`:0`).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .as_ref()
            .ok_or_else(|| DbError::InvalidState("tcp listener not bound".to_string()))?
            .local_addr()
            .map_err(DbError::Io)
    }

    pub async fn accept(&self) -> Result<TcpConnection> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| DbError::InvalidState("tcp listener not bound".to_string()))?;

        let (stream, peer_addr) = listener.accept().await.map_err(DbError::Io)?;
        self.configure_socket(&stream)?;
        tracing::debug!(peer = %peer_addr, "accepted tcp connection");

        Ok(TcpConnection::new(stream, peer_addr, self.config.clone()))
    }

    pub async fn connect(&self, addr: SocketAddr) -> Result<TcpConnection> {
        self.connect_with_retry(addr).await
    }

    /// Dials `addr`, retrying with exponential backoff up to
    /// `max_dial_attempts` times. This bounds the *first* connection only;
    /// once established, reconnects after a drop are the Messenger's job.
    async fn connect_with_retry(&self, addr: SocketAddr) -> Result<TcpConnection> {
        let mut attempt = 0;
        let mut backoff = self.config.dial_initial_backoff;

        loop {
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await
            {
                Ok(Ok(stream)) => {
                    self.configure_socket(&stream)?;
                    tracing::info!(%addr, attempt = attempt + 1, "connected");
                    return Ok(TcpConnection::new(stream, addr, self.config.clone()));
                }
                Ok(Err(e)) => {
                    attempt += 1;
                    if attempt >= self.config.max_dial_attempts {
                        return Err(DbError::Transport(TransportError::ConnectionRefused(
                            format!("{addr}: {e} (after {attempt} attempts)"),
                        )));
                    }
                    tracing::warn!(%addr, attempt, error = %e, backoff = ?backoff, "dial failed, retrying");
                    sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.config.dial_max_backoff);
                }
                Err(_) => {
                    attempt += 1;
                    if attempt >= self.config.max_dial_attempts {
                        return Err(DbError::Timeout(format!(
                            "connect to {addr} timed out after {attempt} attempts"
                        )));
                    }
                    tracing::warn!(%addr, attempt, backoff = ?backoff, "dial timed out, retrying");
                    sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.config.dial_max_backoff);
                }
            }
        }
    }

    fn configure_socket(&self, stream: &TcpStream) -> Result<()> {
        if self.config.nodelay {
            stream.set_nodelay(true).map_err(DbError::Io)?;
        }
        if let Some(keepalive) = self.config.keepalive_interval {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(keepalive)
                .with_interval(keepalive);
            socket.set_tcp_keepalive(&keepalive).map_err(DbError::Io)?;
        }
        Ok(())
    }
}

/// A connected socket plus the framing codec used to speak `Message`s over
/// it. One connection carries at most one in-flight request at a time
/// (spec §4.2 ordering guarantee); the mutex here just protects the
/// underlying stream from concurrent writers/readers, it does not itself
/// enforce that invariant — `messenger::Connector` does.
#[derive(Clone)]
pub struct TcpConnection {
    stream: Arc<Mutex<TcpStream>>,
    peer_addr: SocketAddr,
    config: TcpConfig,
    codec: MessageCodec,
}

impl TcpConnection {
    fn new(stream: TcpStream, peer_addr: SocketAddr, config: TcpConfig) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
            peer_addr,
            config,
            codec: MessageCodec::new(),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Sends a raw byte buffer (used by the file server's bulk streaming,
    /// which doesn't frame every chunk as a full `Message`).
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let mut stream = self.stream.lock().await;
        tokio::time::timeout(self.config.write_timeout, stream.write_all(data))
            .await
            .map_err(|_| DbError::Timeout("write timeout".to_string()))?
            .map_err(DbError::Io)?;
        stream.flush().await.map_err(DbError::Io)?;
        Ok(())
    }

    pub async fn recv_exact(&self, buf: &mut [u8]) -> Result<()> {
        let mut stream = self.stream.lock().await;
        tokio::time::timeout(self.config.read_timeout, stream.read_exact(buf))
            .await
            .map_err(|_| DbError::Timeout("read timeout".to_string()))?
            .map_err(DbError::Io)?;
        Ok(())
    }

    /// Encodes and sends one `Message` frame.
    pub async fn send_message(&self, request_id: u64, message: &Message) -> Result<()> {
        let frame = self.codec.encode(request_id, message)?;
        self.send(&frame).await
    }

    /// Reads one complete frame: the header, then exactly as many payload
    /// bytes as it declares (spec §4.1 — a frame arrives whole or errors).
    pub async fn recv_message(&self) -> Result<(u64, Message)> {
        let mut header_buf = [0u8; MessageHeader::SIZE];
        self.recv_exact(&mut header_buf).await?;
        let header = MessageHeader::decode(&header_buf)
            .map_err(|e| DbError::Transport(TransportError::Framing(e)))?;

        let mut rest = BytesMut::zeroed(header.payload_len() + 4);
        self.recv_exact(&mut rest).await?;

        let mut frame = BytesMut::with_capacity(MessageHeader::SIZE + rest.len());
        frame.extend_from_slice(&header_buf);
        frame.extend_from_slice(&rest);
        self.codec.decode(frame)
    }

    pub async fn close(&self) -> Result<()> {
        let mut stream = self.stream.lock().await;
        stream.shutdown().await.map_err(DbError::Io)?;
        Ok(())
    }

    pub async fn is_alive(&self) -> bool {
        self.stream.lock().await.peer_addr().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_config_default_has_sane_bounds() {
        let config = TcpConfig::default();
        assert!(config.nodelay);
        assert_eq!(config.max_dial_attempts, 5);
    }

    #[tokio::test]
    async fn bind_on_ephemeral_port_succeeds() {
        let mut config = TcpConfig::default();
        config.bind_addr = "127.0.0.1:0".parse().unwrap();
        let mut transport = TcpTransport::new(config);
        assert!(transport.bind().await.is_ok());
    }

    #[tokio::test]
    async fn accept_connect_round_trips_a_message() {
        use crate::protocol::ReplicaRequestBody;

        let mut config = TcpConfig::default();
        config.bind_addr = "127.0.0.1:0".parse().unwrap();
        let mut transport = TcpTransport::new(config.clone());
        transport.bind().await.unwrap();
        let local_addr = transport.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let conn = transport.accept().await.unwrap();
            conn.recv_message().await.unwrap()
        });

        let client = TcpTransport::new(config);
        let conn = client.connect(local_addr).await.unwrap();
        let message = Message::Replica(ReplicaRequestBody::Echo { data: vec![4, 2] });
        conn.send_message(55, &message).await.unwrap();

        let (request_id, received) = server.await.unwrap();
        assert_eq!(request_id, 55);
        match received {
            Message::Replica(ReplicaRequestBody::Echo { data }) => assert_eq!(data, vec![4, 2]),
            other => panic!("unexpected message: {other:?}"),
        }
    }

}
