//! Blocking byte-stream transports.
//!
//! Provides a unified stream type over the two physical transports a route
//! can use:
//! - TCP sockets (listening and connecting)
//! - Named pipes (a FIFO pair, one per direction; Unix only)
//!
//! This is the lowest layer of hopwire. Framing and routing build on top of
//! the [`ByteStream`] type provided here.

pub mod error;
#[cfg(unix)]
pub mod fifo;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::TcpSocket;
pub use traits::ByteStream;
