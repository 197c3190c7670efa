use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::errors::ParseError;
use super::frame::{
    FrameHeader, InboundFrame, OutboundFrame, Response, MAX_PAYLOAD_LEN, STATUS_DATA, STATUS_ERR,
    STATUS_OK, TYPE_PUSH, TYPE_RESPONSE,
};

#[derive(Debug)]
pub struct FanoutCodec {
    max_payload_len: usize,
}

impl FanoutCodec {
    pub fn new() -> Self {
        Self {
            max_payload_len: MAX_PAYLOAD_LEN,
        }
    }

    pub fn with_max_payload(max_payload_len: usize) -> Self {
        Self { max_payload_len }
    }
}

impl Default for FanoutCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FanoutCodec {
    type Item = InboundFrame;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FrameHeader::SIZE {
            return Ok(None);
        }

        let header: FrameHeader = match bytemuck::try_from_bytes::<FrameHeader>(&src[..FrameHeader::SIZE]) {
            Ok(header) => *header,
            Err(_) => {
                return Err(ParseError::Invalid(
                    "Header alignment or size mismatch".to_string(),
                ))
            }
        };

        let payload_len = header.payload_len() as usize;
        if payload_len > self.max_payload_len {
            return Err(ParseError::TooLarge {
                len: payload_len,
                max: self.max_payload_len,
            });
        }

        let total_len = FrameHeader::SIZE + payload_len;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        let frame_bytes = src.split_to(total_len).freeze();
        let payload = frame_bytes.slice(FrameHeader::SIZE..);

        Ok(Some(InboundFrame { header, payload }))
    }
}

impl Encoder<OutboundFrame> for FanoutCodec {
    type Error = ParseError;

    fn encode(&mut self, item: OutboundFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (frame_type, meta, id, payload) = match item {
            OutboundFrame::Response { id, response } => {
                let (status, payload) = match response {
                    Response::Ok => (STATUS_OK, Bytes::new()),
                    Response::Data(data) => (STATUS_DATA, data),
                    Response::Error(msg) => {
                        let mut buf = BytesMut::with_capacity(4 + msg.len());
                        buf.put_u32(msg.len() as u32);
                        buf.put_slice(msg.as_bytes());
                        (STATUS_ERR, buf.freeze())
                    }
                };
                (TYPE_RESPONSE, status, id, payload)
            }
            OutboundFrame::Push { push_type, payload } => (TYPE_PUSH, push_type, 0, payload),
        };

        dst.reserve(FrameHeader::SIZE + payload.len());
        dst.put_u8(frame_type);
        dst.put_u8(meta);
        dst.put_u32(id);
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}
