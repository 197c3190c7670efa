use bytes::Bytes;

use crate::server::protocol::ParseError;

const SIZE_U8: usize = 1;
const SIZE_U32: usize = 4;

/// Sequential big-endian reader over a request payload.
pub struct PayloadCursor {
    data: Bytes,
    offset: usize,
}

impl PayloadCursor {
    pub fn new(data: Bytes) -> Self {
        Self { data, offset: 0 }
    }

    pub fn has_remaining(&self, len: usize) -> bool {
        self.offset + len <= self.data.len()
    }

    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        if !self.has_remaining(SIZE_U8) {
            return Err(ParseError::Invalid("Payload too short for u8".to_string()));
        }
        let val = self.data[self.offset];
        self.offset += SIZE_U8;
        Ok(val)
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        if !self.has_remaining(SIZE_U32) {
            return Err(ParseError::Invalid("Payload too short for u32".to_string()));
        }
        let mut raw = [0u8; SIZE_U32];
        raw.copy_from_slice(&self.data[self.offset..self.offset + SIZE_U32]);
        self.offset += SIZE_U32;
        Ok(u32::from_be_bytes(raw))
    }

    pub fn read_string(&mut self) -> Result<String, ParseError> {
        let len = self.read_u32()? as usize;
        if !self.has_remaining(len) {
            return Err(ParseError::Invalid(format!(
                "Incomplete string: expected {} bytes",
                len
            )));
        }
        let s = std::str::from_utf8(&self.data[self.offset..self.offset + len])
            .map_err(|e| ParseError::Invalid(format!("Invalid UTF-8 in string: {}", e)))?;
        self.offset += len;
        Ok(s.to_string())
    }

    pub fn read_remaining(&mut self) -> Bytes {
        let b = self.data.slice(self.offset..);
        self.offset = self.data.len();
        b
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
