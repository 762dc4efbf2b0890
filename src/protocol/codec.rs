// Message encoding/decoding for the framed wire protocol (C1).
//
// Every frame is `MessageHeader::SIZE` bytes of sub-header, a bincode body,
// then a 4-byte crc32c checksum of the body. Peers that see a checksum
// mismatch or an unrecognized header treat it as a framing error (spec
// §4.1) and the connection is torn down by the caller.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{DbError, Result, TransportError};
use crate::protocol::{Category, Message, MessageHeader, MAX_MESSAGE_SIZE};

/// Encodes/decodes `Message` frames, enforcing a maximum frame size.
#[derive(Clone)]
pub struct MessageCodec {
    max_message_size: usize,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_message_size = max_size;
        self
    }

    /// Serializes `message` into a complete frame tagged with `request_id`.
    pub fn encode(&self, request_id: u64, message: &Message) -> Result<BytesMut> {
        let payload = bincode::serde::encode_to_vec(message, bincode::config::standard())
            .map_err(|e| DbError::Serialization(format!("failed to serialize message: {e}")))?;

        if payload.len() + MessageHeader::SIZE + 4 > self.max_message_size {
            return Err(DbError::Transport(TransportError::Framing(format!(
                "message too large: {} bytes (max {})",
                payload.len(),
                self.max_message_size
            ))));
        }

        let header = MessageHeader::new(message.category(), discriminator(message), request_id, payload.len());
        let checksum = crc32c::crc32c(&payload);

        let mut buf = BytesMut::with_capacity(MessageHeader::SIZE + payload.len() + 4);
        buf.put_slice(&header.encode());
        buf.put_slice(&payload);
        buf.put_u32(checksum);
        Ok(buf)
    }

    /// Parses a complete frame (header + payload + checksum) already
    /// isolated by the transport layer's length-prefix read.
    pub fn decode(&self, mut buf: BytesMut) -> Result<(u64, Message)> {
        if buf.len() < MessageHeader::SIZE {
            return Err(DbError::Transport(TransportError::Framing(
                "incomplete message header".to_string(),
            )));
        }

        let header = MessageHeader::decode(&buf[..MessageHeader::SIZE])
            .map_err(|e| DbError::Transport(TransportError::Framing(e)))?;

        if Category::from_u8(header.category).is_none() {
            return Err(DbError::Transport(TransportError::UnknownType(header.category)));
        }

        if header.length as usize > self.max_message_size {
            return Err(DbError::Transport(TransportError::Framing(format!(
                "message too large: {} bytes (max {})",
                header.length, self.max_message_size
            ))));
        }

        buf.advance(MessageHeader::SIZE);

        let payload_size = header.payload_len();
        if buf.len() < payload_size + 4 {
            return Err(DbError::Transport(TransportError::Framing(
                "incomplete message payload".to_string(),
            )));
        }

        let payload = buf.split_to(payload_size);
        let received_checksum = buf.get_u32();
        let computed_checksum = crc32c::crc32c(&payload);
        if received_checksum != computed_checksum {
            return Err(DbError::Transport(TransportError::Framing(format!(
                "checksum mismatch: expected {computed_checksum}, got {received_checksum}"
            ))));
        }

        let message: Message = bincode::serde::decode_from_slice(&payload, bincode::config::standard())
            .map(|(msg, _)| msg)
            .map_err(|e| DbError::Serialization(format!("failed to deserialize message: {e}")))?;

        Ok((header.request_id, message))
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-category type discriminator stored in the sub-header. Only used to
/// let a peer reject unrecognized variants before attempting to deserialize
/// the body; the body itself is self-describing via bincode.
fn discriminator(message: &Message) -> u8 {
    match message {
        Message::Replica(_) => 0,
        Message::RequestControl(_) => 1,
        Message::Service(_) => 2,
        Message::Response(_) => 3,
        Message::FileRequest(_) => 4,
        Message::FileResponse(_) => 5,
        Message::FileChunk(_) => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ReplicaRequestBody;

    #[test]
    fn encode_decode_round_trips() {
        let codec = MessageCodec::new();
        let message = Message::Replica(ReplicaRequestBody::Echo {
            data: vec![1, 2, 3],
        });

        let encoded = codec.encode(7, &message).unwrap();
        let (request_id, decoded) = codec.decode(encoded).unwrap();

        assert_eq!(request_id, 7);
        match decoded {
            Message::Replica(ReplicaRequestBody::Echo { data }) => assert_eq!(data, vec![1, 2, 3]),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let codec = MessageCodec::new();
        let message = Message::Replica(ReplicaRequestBody::Echo { data: vec![9] });
        let mut encoded = codec.encode(1, &message).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(codec.decode(encoded).is_err());
    }

    #[test]
    fn oversized_message_is_rejected_at_encode() {
        let codec = MessageCodec::new().with_max_size(32);
        let message = Message::Replica(ReplicaRequestBody::Echo {
            data: vec![0u8; 1000],
        });
        assert!(codec.encode(1, &message).is_err());
    }
}
