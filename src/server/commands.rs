use bytes::Bytes;

use crate::server::payload_cursor::PayloadCursor;
use crate::server::protocol::{ParseError, OP_ECHO, OP_PUB, OP_SUB, OP_UNSUB};

#[derive(Debug, PartialEq)]
pub enum PubSubCommand {
    /// ECHO: [Data...]
    Echo { payload: Bytes },
    /// PUB: [TopicLen:4][Topic][Data...]
    Publish { topic: String, payload: Bytes },
    /// SUB: [PatternLen:4][Pattern]
    Subscribe { pattern: String },
    /// UNSUB: [PatternLen:4][Pattern]
    Unsubscribe { pattern: String },
}

impl PubSubCommand {
    pub fn parse(opcode: u8, cursor: &mut PayloadCursor) -> Result<Self, ParseError> {
        match opcode {
            OP_ECHO => Ok(Self::Echo {
                payload: cursor.read_remaining(),
            }),
            OP_PUB => {
                let topic = cursor.read_string()?;
                let payload = cursor.read_remaining();
                Ok(Self::Publish { topic, payload })
            }
            OP_SUB => {
                let pattern = cursor.read_string()?;
                Ok(Self::Subscribe { pattern })
            }
            OP_UNSUB => {
                let pattern = cursor.read_string()?;
                Ok(Self::Unsubscribe { pattern })
            }
            _ => Err(ParseError::Invalid(format!(
                "Unknown opcode: 0x{:02X}",
                opcode
            ))),
        }
    }
}
