//! Stream transport substrate (C1) used by the Messenger and file server.

pub mod tcp;

pub use tcp::{TcpConfig, TcpConnection, TcpTransport};
