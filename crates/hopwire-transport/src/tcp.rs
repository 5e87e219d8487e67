use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::ByteStream;

/// Listening TCP socket.
///
/// Provides bind/accept for the server side and a blocking `connect` for
/// the client side. Every connected stream is handed out as a [`ByteStream`].
pub struct TcpSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpSocket {
    /// Bind and listen on `addr`.
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let display = addr.to_string();
        let listener = TcpListener::bind(&addr).map_err(|e| TransportError::Bind {
            addr: display.clone(),
            source: e,
        })?;
        let local_addr = listener.local_addr().map_err(|e| TransportError::Bind {
            addr: display,
            source: e,
        })?;

        info!(%local_addr, "listening on tcp socket");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<(ByteStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(peer = %addr, "accepted connection");
        Ok((ByteStream::from_tcp(stream), addr))
    }

    /// Connect to a listening socket (blocking).
    pub fn connect(host: &str, port: u16) -> Result<ByteStream> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect((host, port)).map_err(|e| TransportError::Connect {
            addr: addr.clone(),
            source: e,
        })?;
        // Frames are small; do not let Nagle hold them back.
        let _ = stream.set_nodelay(true);
        debug!(%addr, "connected to tcp socket");
        Ok(ByteStream::from_tcp(stream))
    }

    /// The address this socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl std::fmt::Debug for TcpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSocket")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}
