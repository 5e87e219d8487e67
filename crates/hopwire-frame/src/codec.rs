use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Frame delimiter.
pub const DELIMITER: u8 = 0x00;

/// Default initial ring buffer size: 8 KiB.
pub const DEFAULT_INITIAL_BUFFER: usize = 8 * 1024;

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌─────────────────────────────┬──────┐
/// │ Payload (any length, no NUL)│ 0x00 │
/// └─────────────────────────────┴──────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if let Some(offset) = payload.iter().position(|&b| b == DELIMITER) {
        return Err(FrameError::EmbeddedDelimiter { offset });
    }
    dst.reserve(payload.len() + 1);
    dst.put_slice(payload);
    dst.put_u8(DELIMITER);
    Ok(())
}

/// Configuration for framed channels.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Initial ring buffer size in bytes. The buffer doubles as needed and
    /// never shrinks. Default: 8 KiB.
    pub initial_buffer_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            initial_buffer_size: DEFAULT_INITIAL_BUFFER,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
