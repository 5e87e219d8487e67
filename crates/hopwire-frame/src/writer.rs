use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use hopwire_transport::ByteStream;

use crate::codec::{encode_frame, FrameConfig};
use crate::error::{is_timeout_kind, FrameError, Result};
use crate::reader::transport_to_frame_error;
use crate::state::ChannelState;

/// Writes NUL-delimited frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    state: ChannelState,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(config.initial_buffer_size),
            state: ChannelState::Opened,
            config,
        }
    }

    /// Frame and send one payload (blocking).
    ///
    /// Fails with [`FrameError::EmbeddedDelimiter`] before writing anything
    /// if the payload contains a NUL byte.
    ///
    /// An expired write timeout is returned as an I/O error. If part of the
    /// frame already went out, the channel is marked `Closed`, since the
    /// peer would otherwise see the truncated frame merged with the next.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        encode_frame(payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => {
                    self.state = ChannelState::Closed;
                    return Err(FrameError::ConnectionClosed);
                }
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    if is_peer_gone(&err) || (offset > 0 && is_timeout_kind(err.kind())) {
                        self.state = ChannelState::Closed;
                    }
                    return Err(FrameError::Io(err));
                }
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Current channel state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<ByteStream> {
    /// Create a frame writer for `ByteStream` and apply write timeout from config.
    pub fn with_config_stream(inner: ByteStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

fn is_peer_gone(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}
