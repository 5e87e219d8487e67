//! NUL-delimited message framing over blocking byte streams.
//!
//! Every message on the wire is an arbitrary run of bytes followed by a
//! single 0x00 delimiter. There is no length prefix, so a payload must never
//! contain a NUL byte itself.
//!
//! The reader side keeps unconsumed bytes in a growable ring buffer
//! ([`RingBuffer`]) and hands out one complete frame at a time; callers never
//! see partial reads.

pub mod codec;
pub mod error;
pub mod reader;
pub mod ring;
pub mod state;
pub mod writer;

pub use codec::{encode_frame, FrameConfig, DEFAULT_INITIAL_BUFFER, DELIMITER};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use ring::RingBuffer;
pub use state::ChannelState;
pub use writer::FrameWriter;
