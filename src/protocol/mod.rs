//! Framed wire protocol (C1)
//!
//! Messages are sent as `u32` big-endian frame length followed by a 14-byte
//! sub-header then a `bincode`-serialized body (spec §4.1, §6):
//!
//! ```text
//! +--------+----------+------+--------------+----------+---------+
//! | Length | Category | Type | Request/Msg id | Reserved | Payload |
//! | 4 bytes| 1 byte   |1 byte| 8 bytes        | 4 bytes  | N bytes |
//! +--------+----------+------+--------------+----------+---------+
//! ```
//!
//! `Category` and `Type` together pick the `Message` variant expected on the
//! wire; a peer that sees an unrecognized `(category, type)` pair treats it
//! as a framing error and closes the stream (spec §4.1) rather than trying to
//! skip the frame.

pub mod codec;

pub use codec::MessageCodec;

use serde::{Deserialize, Serialize};

use crate::catalog::{Replica, ReplicaFile};
use crate::common::{ChunkNumber, DatabaseName, RequestId};

/// Maximum frame size accepted on any connection (includes sub-header).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Desired soft limit for a single `Result` batch (spec §9 Open Question 3,
/// matching upstream Qserv's `ProtoHeaderWrap` constants).
pub const PROTOBUF_DESIRED_LIMIT: usize = 4 * 1024 * 1024;

/// Hard cap for a single `Result` batch; exceeding it in one row fails the
/// query rather than being split further.
pub const PROTOBUF_HARD_LIMIT: usize = 64 * 1024 * 1024;

/// The five wire categories named in spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Category {
    Replica = 0,
    Request = 1,
    Service = 2,
    Response = 3,
    File = 4,
}

impl Category {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Category::Replica),
            1 => Some(Category::Request),
            2 => Some(Category::Service),
            3 => Some(Category::Response),
            4 => Some(Category::File),
            _ => None,
        }
    }
}

/// Frame header: `u32` big-endian length prefix (bytes remaining in the
/// frame after this field) followed by the 14-byte sub-header (spec §4.1,
/// §6): 1-byte category, 1-byte type discriminator, 8-byte request id,
/// 4-byte reserved.
#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
    /// Bytes remaining in the frame after the length field itself: the
    /// 14-byte sub-header, the payload, and the 4-byte checksum.
    pub length: u32,
    pub category: u8,
    pub msg_type: u8,
    pub request_id: RequestId,
}

impl MessageHeader {
    /// Size of the sub-header proper (excludes the 4-byte length prefix).
    pub const SUB_HEADER_SIZE: usize = 14;
    /// Size of length prefix + sub-header combined.
    pub const SIZE: usize = 4 + Self::SUB_HEADER_SIZE;

    pub fn new(category: Category, msg_type: u8, request_id: RequestId, payload_len: usize) -> Self {
        Self {
            length: (Self::SUB_HEADER_SIZE + payload_len + 4) as u32,
            category: category as u8,
            msg_type,
            request_id,
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4] = self.category;
        buf[5] = self.msg_type;
        buf[6..14].copy_from_slice(&self.request_id.to_be_bytes());
        // buf[14..18] reserved, left zeroed.
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, String> {
        if buf.len() < Self::SIZE {
            return Err("buffer too small for message header".to_string());
        }
        Ok(Self {
            length: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            category: buf[4],
            msg_type: buf[5],
            request_id: u64::from_be_bytes([
                buf[6], buf[7], buf[8], buf[9], buf[10], buf[11], buf[12], buf[13],
            ]),
        })
    }

    /// Number of payload bytes implied by `length`, after subtracting the
    /// sub-header and checksum that `length` also covers.
    pub fn payload_len(&self) -> usize {
        self.length as usize - Self::SUB_HEADER_SIZE - 4
    }
}

/// A replica-mutating or replica-observing operation submitted to a worker
/// (spec §3 Request types, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplicaRequestBody {
    Replicate {
        database: DatabaseName,
        chunk: ChunkNumber,
        source_worker: String,
    },
    Delete {
        database: DatabaseName,
        chunk: ChunkNumber,
    },
    Find {
        database: DatabaseName,
        chunk: ChunkNumber,
        compute_checksum: bool,
    },
    FindAll {
        database: DatabaseName,
    },
    Echo {
        data: Vec<u8>,
    },
}

/// Management requests against an already-submitted request id (`STATUS:*`,
/// `STOP:*`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum RequestManagementBody {
    Status { target_id: RequestId },
    Stop { target_id: RequestId },
}

/// Service-level controls (spec §3 `SUSPEND/RESUME/STATUS/REQUESTS/DRAIN`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ServiceRequestBody {
    Suspend,
    Resume,
    Status,
    Requests,
    Drain,
}

/// Status of a request as reported by a worker (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    Success,
    Queued,
    InProgress,
    IsCancelling,
    Bad,
    Failed,
    Cancelled,
}

/// Extended status accompanying a `Bad`/`Failed` worker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtendedStatus {
    None,
    Duplicate,
    InvalidArgument,
    InvalidState,
}

/// Performance counters carried on every response (spec §4.7).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Performance {
    pub c_create_time: i64,
    pub c_start_time: i64,
    pub w_receive_time: i64,
    pub w_start_time: i64,
    pub w_finish_time: i64,
    pub c_finish_time: i64,
}

/// Typed payload of a successful replica-category response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplicaPayload {
    One(Replica),
    Many(Vec<Replica>),
    Echo(Vec<u8>),
    None,
}

/// The response to any replica/request/service submission (spec §6
/// `ReplicationResponse{X}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationResponse {
    pub status: WorkerStatus,
    pub extended_status: ExtendedStatus,
    pub performance: Performance,
    pub payload: ReplicaPayload,
}

/// File-server request/response bodies (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FileRequestBody {
    Open { database: DatabaseName, file: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mtime: i64,
    pub checksum: Option<u32>,
    pub begin_transfer_time: Option<i64>,
    pub end_transfer_time: Option<i64>,
}

impl From<ReplicaFile> for FileInfo {
    fn from(f: ReplicaFile) -> Self {
        Self {
            name: f.name,
            size: f.size,
            mtime: f.mtime,
            checksum: f.checksum,
            begin_transfer_time: f.begin_transfer_time,
            end_transfer_time: f.end_transfer_time,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOpenResponse {
    pub available: bool,
    pub size: u64,
}

/// The full set of bodies carried across the wire, tagged by `Category`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Replica(ReplicaRequestBody),
    RequestControl(RequestManagementBody),
    Service(ServiceRequestBody),
    Response(ReplicationResponse),
    FileRequest(FileRequestBody),
    FileResponse(FileOpenResponse),
    FileChunk(Vec<u8>),
}

impl Message {
    pub fn category(&self) -> Category {
        match self {
            Message::Replica(_) => Category::Replica,
            Message::RequestControl(_) => Category::Request,
            Message::Service(_) => Category::Service,
            Message::Response(_) => Category::Response,
            Message::FileRequest(_) | Message::FileResponse(_) | Message::FileChunk(_) => {
                Category::File
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = MessageHeader::new(Category::Replica, 3, 42, 128);
        let encoded = header.encode();
        let decoded = MessageHeader::decode(&encoded).unwrap();
        assert_eq!(decoded.request_id, 42);
        assert_eq!(decoded.category, Category::Replica as u8);
        assert_eq!(decoded.msg_type, 3);
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert!(MessageHeader::decode(&[0u8; 4]).is_err());
    }

    #[test]
    fn category_from_unknown_byte_is_none() {
        assert!(Category::from_u8(99).is_none());
    }
}
