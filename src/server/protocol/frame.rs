//! Fanout Binary Protocol: Frame Types and Constants
//!
//! Request Frame (Total Header: 10 bytes):
//! [FrameType: 1 byte] [Opcode: 1 byte] [CorrelationID: 4 bytes (BE)] [PayloadLen: 4 bytes (BE)]
//! Payload: opcode specific, strings are [Len: 4 bytes (BE)][UTF-8]
//!
//! Response Frame (Total Header: 10 bytes):
//! [FrameType: 1 byte] [Status: 1 byte] [CorrelationID: 4 bytes (BE)] [PayloadLen: 4 bytes (BE)]
//! Payload: empty on OK, [Len: 4][Message] on ERR, raw bytes on DATA
//!
//! Push Frame (Total Header: 10 bytes, CorrelationID always 0):
//! [FrameType: 1 byte] [PushType: 1 byte] [0: 4 bytes] [PayloadLen: 4 bytes (BE)]
//! Payload (PUBSUB): [TopicLen: 4 bytes (BE)][Topic][Data...]

use bytes::Bytes;
use bytemuck::{Pod, Zeroable};

// ========================================
// FRAME TYPES
// ========================================
pub const TYPE_REQUEST: u8 = 0x01;
pub const TYPE_RESPONSE: u8 = 0x02;
pub const TYPE_PUSH: u8 = 0x03;

// ========================================
// PUSH TYPES
// ========================================
pub const PUSH_TYPE_PUBSUB: u8 = 0x01;

// ========================================
// RESPONSE STATUS
// ========================================
pub const STATUS_OK: u8 = 0x00;
pub const STATUS_ERR: u8 = 0x01;
pub const STATUS_DATA: u8 = 0x03;

// ========================================
// OPCODES
// ========================================
pub const OP_ECHO: u8 = 0x00;
pub const OP_PUB: u8 = 0x21;
pub const OP_SUB: u8 = 0x22;
pub const OP_UNSUB: u8 = 0x23;

/// Largest payload the decoder will buffer for a single frame.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

// ========================================
// FRAME HEADER
// ========================================

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameHeader {
    pub frame_type: u8,
    pub meta: u8,
    pub id: [u8; 4],
    pub payload_len: [u8; 4],
}

impl FrameHeader {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn request(opcode: u8, id: u32, payload_len: u32) -> Self {
        Self {
            frame_type: TYPE_REQUEST,
            meta: opcode,
            id: id.to_be_bytes(),
            payload_len: payload_len.to_be_bytes(),
        }
    }

    pub fn id(&self) -> u32 {
        u32::from_be_bytes(self.id)
    }

    pub fn payload_len(&self) -> u32 {
        u32::from_be_bytes(self.payload_len)
    }
}

// ========================================
// FRAMES
// ========================================

/// Decoded from the socket.
#[derive(Debug)]
pub struct InboundFrame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

/// Encoded to the socket.
#[derive(Debug)]
pub enum OutboundFrame {
    Response { id: u32, response: Response },
    Push { push_type: u8, payload: Bytes },
}

#[derive(Debug, PartialEq)]
pub enum Response {
    Ok,
    Data(Bytes),
    Error(String),
}
