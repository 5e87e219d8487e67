/// Errors that can occur in route and route-manager operations.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] hopwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] hopwire_frame::FrameError),

    /// Invalid construction parameters (file names, host, port).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed or unterminated route string.
    #[error("invalid route '{route}': {reason}")]
    InvalidRoute { route: String, reason: &'static str },

    /// Write attempted on a route whose channels are not both connected.
    #[error("route {0} is not up")]
    NotUp(String),

    /// `open()` called a second time.
    #[error("route {0} was already opened")]
    AlreadyOpened(String),

    /// No free route identifiers remain.
    #[error("route identifiers exhausted")]
    IdsExhausted,

    /// Message (de)serialization error.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RouteError>;
