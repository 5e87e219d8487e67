use crate::error::Result;
use crate::message::Message;

/// Turns messages into frame payloads and back.
///
/// Encoded payloads must not contain a NUL byte; the framing layer rejects
/// them.
pub trait MessageCodec: Send + Sync {
    fn encode(&self, message: &Message) -> Result<Vec<u8>>;
    fn decode(&self, payload: &[u8]) -> Result<Message>;
}

/// JSON encoding: `{"type": "...", "fields": {"name": "value", ...}}`.
///
/// JSON escapes every control character inside strings, so encoded payloads
/// never contain a raw NUL.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }

    fn decode(&self, payload: &[u8]) -> Result<Message> {
        Ok(serde_json::from_slice(payload)?)
    }
}
