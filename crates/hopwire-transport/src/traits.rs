use std::fs::File;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use crate::error::{Result, TransportError};

/// A connected byte stream implementing `Read` and `Write`.
///
/// This is the fundamental I/O type returned by transport operations.
/// A TCP stream carries both directions; a named pipe end carries one
/// direction only, so a pipe route holds two of these.
pub struct ByteStream {
    inner: ByteStreamInner,
}

enum ByteStreamInner {
    Tcp(TcpStream),
    Fifo(File),
}

impl Read for ByteStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ByteStreamInner::Tcp(stream) => stream.read(buf),
            ByteStreamInner::Fifo(file) => file.read(buf),
        }
    }
}

impl Write for ByteStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ByteStreamInner::Tcp(stream) => stream.write(buf),
            ByteStreamInner::Fifo(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            ByteStreamInner::Tcp(stream) => stream.flush(),
            ByteStreamInner::Fifo(file) => file.flush(),
        }
    }
}

impl ByteStream {
    /// Wrap a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: ByteStreamInner::Tcp(stream),
        }
    }

    /// Wrap an opened named-pipe end.
    pub fn from_fifo(file: File) -> Self {
        Self {
            inner: ByteStreamInner::Fifo(file),
        }
    }

    /// Short name of the underlying stream kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.inner {
            ByteStreamInner::Tcp(_) => "tcp",
            ByteStreamInner::Fifo(_) => "fifo",
        }
    }

    /// Set read timeout on the underlying stream.
    ///
    /// Pipes only accept `None`.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            ByteStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            ByteStreamInner::Fifo(_) if timeout.is_none() => Ok(()),
            ByteStreamInner::Fifo(_) => Err(TransportError::Unsupported {
                operation: "read timeout",
                kind: "fifo",
            }),
        }
    }

    /// Set write timeout on the underlying stream.
    ///
    /// Pipes only accept `None`.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            ByteStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            ByteStreamInner::Fifo(_) if timeout.is_none() => Ok(()),
            ByteStreamInner::Fifo(_) => Err(TransportError::Unsupported {
                operation: "write timeout",
                kind: "fifo",
            }),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            ByteStreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
            ByteStreamInner::Fifo(file) => Ok(Self::from_fifo(file.try_clone()?)),
        }
    }

    /// Shut down both directions of a socket.
    ///
    /// Unblocks a reader parked in `read` on a clone of this stream. Pipe
    /// ends are closed by dropping them, so this is a no-op for them.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            ByteStreamInner::Tcp(stream) => match stream.shutdown(Shutdown::Both) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(err.into()),
            },
            ByteStreamInner::Fifo(_) => Ok(()),
        }
    }

    /// Address of the remote peer, for sockets.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            ByteStreamInner::Tcp(stream) => stream.peer_addr().ok(),
            ByteStreamInner::Fifo(_) => None,
        }
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("ByteStream");
        dbg.field("type", &self.kind());
        if let Some(addr) = self.peer_addr() {
            dbg.field("peer", &addr);
        }
        dbg.finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn tcp_stream_reads_and_writes() {
        let (client, server) = tcp_pair();
        let mut left = ByteStream::from_tcp(client);
        let mut right = ByteStream::from_tcp(server);

        left.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(left.kind(), "tcp");
        assert!(left.peer_addr().is_some());
    }

    #[test]
    fn shutdown_unblocks_cloned_reader() {
        let (client, _server) = tcp_pair();
        let stream = ByteStream::from_tcp(client);
        let mut reader = stream.try_clone().unwrap();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf).unwrap_or(0)
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        stream.shutdown().unwrap();
        assert_eq!(handle.join().unwrap(), 0);
    }

    #[test]
    fn fifo_rejects_timeouts() {
        let path = std::env::temp_dir().join(format!("hopwire-timeout-{}", std::process::id()));
        let file = File::create(&path).unwrap();
        let stream = ByteStream::from_fifo(file);

        assert!(stream.set_read_timeout(None).is_ok());
        assert!(matches!(
            stream.set_write_timeout(Some(std::time::Duration::from_millis(5))),
            Err(TransportError::Unsupported { .. })
        ));
        assert!(stream.peer_addr().is_none());
        let _ = std::fs::remove_file(&path);
    }
}
