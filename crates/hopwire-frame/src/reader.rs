use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use hopwire_transport::ByteStream;
use tracing::trace;

use crate::codec::FrameConfig;
use crate::error::{FrameError, Result};
use crate::ring::RingBuffer;
use crate::state::ChannelState;

/// Reads NUL-delimited frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames,
/// in the order their bytes arrived. Each blocking read lands directly in
/// the free space of a [`RingBuffer`]; the buffer doubles when a frame
/// outgrows it.
pub struct FrameReader<T> {
    inner: T,
    ring: RingBuffer,
    scratch: BytesMut,
    state: ChannelState,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            ring: RingBuffer::with_capacity(config.initial_buffer_size),
            scratch: BytesMut::new(),
            state: ChannelState::Opened,
            config,
        }
    }

    /// Read the next complete frame (blocking), without its delimiter.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached. Any
    /// unterminated bytes still buffered at that point are discarded.
    pub fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Some(frame) = self.ring.next_frame(&mut self.scratch) {
                self.state = if self.ring.is_empty() {
                    ChannelState::WaitingForData
                } else {
                    ChannelState::DataAvailable
                };
                return Ok(frame);
            }

            if self.ring.is_full() {
                self.ring.grow();
                trace!(capacity = self.ring.capacity(), "grew frame buffer");
            }

            self.state = ChannelState::WaitingForData;
            let read = match self.inner.read(self.ring.writable()) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                self.state = ChannelState::Closed;
                return Err(FrameError::ConnectionClosed);
            }

            self.ring.commit(read);
            self.state = ChannelState::DataAvailable;
        }
    }

    /// Current channel state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Number of received bytes not yet returned as frames.
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// Current ring buffer capacity.
    pub fn buffer_capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<ByteStream> {
    /// Create a frame reader for `ByteStream` and apply read timeout from config.
    pub fn with_config_stream(inner: ByteStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: hopwire_transport::TransportError) -> FrameError {
    match err {
        hopwire_transport::TransportError::Io(io)
        | hopwire_transport::TransportError::Accept(io) => FrameError::Io(io),
        hopwire_transport::TransportError::Bind { source, .. }
        | hopwire_transport::TransportError::Connect { source, .. }
        | hopwire_transport::TransportError::Pipe { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
