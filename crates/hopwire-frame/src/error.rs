/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload contains the frame delimiter and cannot be framed.
    #[error("payload contains a NUL delimiter at offset {offset}")]
    EmbeddedDelimiter { offset: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// True when a configured read or write timeout expired.
    ///
    /// The stream is still usable; no data moved.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Io(err) if is_timeout_kind(err.kind()))
    }
}

pub(crate) fn is_timeout_kind(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

pub type Result<T> = std::result::Result<T, FrameError>;
