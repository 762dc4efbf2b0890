//! Error taxonomy for the replication and query-dispatch core.
//!
//! Mirrors the kinds enumerated in the specification's error handling
//! design: transport errors recovered by the Messenger, server-reported
//! statuses that drive status polling instead of propagation, filesystem
//! errors from the worker request engine, SQL parse/unsupported errors from
//! the query session, and storage/logic errors from jobs and persistence.

use thiserror::Error;

/// Top-level error type returned by every fallible operation in this crate.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("server status error: {0}")]
    ServerStatus(#[from] ServerStatusError),

    #[error("filesystem error: {0}")]
    Filesystem(#[from] FsError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

/// Transport-layer failure kinds (§7: connection/framing/protocol failures
/// recovered by the Messenger's connector, never propagated raw to a user).
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("name resolution failed: {0}")]
    ResolveFail(String),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("protocol mismatch: expected request id {expected}, got {actual}")]
    ProtocolMismatch { expected: u64, actual: u64 },

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("unknown message type discriminator: {0}")]
    UnknownType(u8),
}

/// Statuses a worker can report back for a request that the controller must
/// react to without treating them as hard failures (§4.7 step 4, §7).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatusError {
    #[error("server reports malformed request")]
    Bad,
    #[error("server reports execution failure")]
    ServerError,
    #[error("server reports duplicate request id")]
    Duplicate,
}

/// Filesystem error kinds from the worker request engine (§4.5, §7).
#[derive(Error, Debug, Clone)]
pub enum FsError {
    #[error("failed to stat folder {0}")]
    FolderStat(String),
    #[error("folder does not exist: {0}")]
    NoFolder(String),
    #[error("failed to stat file {0}")]
    FileStat(String),
    #[error("unexpected file size for {0}")]
    FileSize(String),
    #[error("unexpected mtime for {0}")]
    FileMtime(String),
    #[error("failed to read file {0}")]
    FileRead(String),
    #[error("failed to create file {0}")]
    FileCreate(String),
    #[error("failed to rename file {0} -> {1}")]
    FileRename(String, String),
    #[error("failed to delete file {0}")]
    FileDelete(String),
    #[error("failed to copy file {0}")]
    FileCopy(String),
}

/// SQL parse/unsupported-construct error kinds (§7, §8 scenario 2).
#[derive(Error, Debug, Clone)]
pub enum ParseError {
    #[error("{0}")]
    Syntax(String),
    #[error("{0}")]
    Unsupported(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, DbError>;
