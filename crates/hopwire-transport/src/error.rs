use std::path::PathBuf;

/// Errors that can occur in byte-stream transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind a listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to a remote socket.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// Failed to create or open a named pipe.
    #[error("failed to open pipe {path}: {source}")]
    Pipe {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation is not supported by this kind of stream.
    #[error("{operation} is not supported on {kind} streams")]
    Unsupported {
        operation: &'static str,
        kind: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, TransportError>;
