use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use hopwire_transport::{ByteStream, TcpSocket};

use crate::error::{Result, RouteError};
use crate::sync::lock;

/// Where a route's bytes come from and go to.
///
/// Constructors validate their parameters up front; an endpoint that exists
/// is always well-formed.
pub enum Endpoint {
    /// A pair of named pipes, one per direction. Reopened whenever the peer
    /// closes them.
    Pipe { inbound: PathBuf, outbound: PathBuf },
    /// An outgoing TCP connection, made when the route is opened.
    Connect { host: String, port: u16 },
    /// A TCP connection handed over by an acceptor.
    Accepted {
        stream: Mutex<Option<ByteStream>>,
        peer: SocketAddr,
    },
}

impl Endpoint {
    /// Pipe endpoint reading from `inbound` and writing to `outbound`.
    pub fn pipe(inbound: impl Into<PathBuf>, outbound: impl Into<PathBuf>) -> Result<Self> {
        let inbound = inbound.into();
        let outbound = outbound.into();
        if inbound.as_os_str().is_empty() {
            return Err(RouteError::InvalidConfig(
                "missing inbound pipe file name".to_string(),
            ));
        }
        if outbound.as_os_str().is_empty() {
            return Err(RouteError::InvalidConfig(
                "missing outbound pipe file name".to_string(),
            ));
        }
        if inbound == outbound {
            return Err(RouteError::InvalidConfig(format!(
                "inbound and outbound pipe are the same file: {}",
                inbound.display()
            )));
        }
        Ok(Endpoint::Pipe { inbound, outbound })
    }

    /// Client socket endpoint. `port` must be in `1..=65535`.
    pub fn connect(host: impl Into<String>, port: u32) -> Result<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(RouteError::InvalidConfig("missing host name".to_string()));
        }
        let port = validate_port(port)?;
        Ok(Endpoint::Connect { host, port })
    }

    /// Endpoint over an already-connected socket.
    pub fn accepted(stream: ByteStream) -> Result<Self> {
        let peer = stream.peer_addr().ok_or_else(|| {
            RouteError::InvalidConfig(format!("{} stream is not a connected socket", stream.kind()))
        })?;
        Ok(Endpoint::Accepted {
            stream: Mutex::new(Some(stream)),
            peer,
        })
    }

    /// Transport flavor: `"pipe"` or `"socket"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Endpoint::Pipe { .. } => "pipe",
            Endpoint::Connect { .. } | Endpoint::Accepted { .. } => "socket",
        }
    }

    /// Whether the route reopens itself after the peer goes away.
    pub fn reopens(&self) -> bool {
        matches!(self, Endpoint::Pipe { .. })
    }

    /// Human-readable description used as the route label.
    pub fn describe(&self) -> String {
        match self {
            Endpoint::Pipe { inbound, outbound } => {
                format!("pipe:{}>{}", inbound.display(), outbound.display())
            }
            Endpoint::Connect { host, port } => format!("tcp:{host}:{port}"),
            Endpoint::Accepted { peer, .. } => format!("tcp:{peer}"),
        }
    }

    /// Produce the connected socket for a socket endpoint (blocking).
    ///
    /// An accepted stream can be taken only once.
    pub(crate) fn open_socket(&self) -> Result<ByteStream> {
        match self {
            Endpoint::Connect { host, port } => Ok(TcpSocket::connect(host, *port)?),
            Endpoint::Accepted { stream, .. } => lock(stream).take().ok_or_else(|| {
                RouteError::InvalidConfig("accepted socket was already consumed".to_string())
            }),
            Endpoint::Pipe { .. } => Err(RouteError::InvalidConfig(
                "pipe endpoint has no socket".to_string(),
            )),
        }
    }
}

/// Check a port number, as given on a command line or in a config.
pub fn validate_port(port: u32) -> Result<u16> {
    match u16::try_from(port) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(RouteError::InvalidConfig(format!(
            "port {port} out of range 1-65535"
        ))),
    }
}

#[cfg(unix)]
pub(crate) fn open_pipe_read(path: &Path) -> Result<ByteStream> {
    Ok(hopwire_transport::fifo::open_read(path)?)
}

#[cfg(unix)]
pub(crate) fn open_pipe_write(path: &Path) -> Result<ByteStream> {
    Ok(hopwire_transport::fifo::open_write(path)?)
}

#[cfg(not(unix))]
pub(crate) fn open_pipe_read(path: &Path) -> Result<ByteStream> {
    Err(unsupported_pipe(path))
}

#[cfg(not(unix))]
pub(crate) fn open_pipe_write(path: &Path) -> Result<ByteStream> {
    Err(unsupported_pipe(path))
}

#[cfg(not(unix))]
fn unsupported_pipe(path: &Path) -> RouteError {
    hopwire_transport::TransportError::Pipe {
        path: path.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "named pipe routes require a Unix platform",
        ),
    }
    .into()
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Endpoint").field(&self.describe()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_requires_both_files() {
        assert!(Endpoint::pipe("/tmp/in", "/tmp/out").is_ok());
        assert!(matches!(
            Endpoint::pipe("", "/tmp/out"),
            Err(RouteError::InvalidConfig(_))
        ));
        assert!(matches!(
            Endpoint::pipe("/tmp/in", ""),
            Err(RouteError::InvalidConfig(_))
        ));
        assert!(matches!(
            Endpoint::pipe("/tmp/same", "/tmp/same"),
            Err(RouteError::InvalidConfig(_))
        ));
    }

    #[test]
    fn connect_validates_host_and_port() {
        let endpoint = Endpoint::connect("localhost", 4000).unwrap();
        assert_eq!(endpoint.describe(), "tcp:localhost:4000");
        assert_eq!(endpoint.kind(), "socket");
        assert!(!endpoint.reopens());

        assert!(Endpoint::connect("", 4000).is_err());
        assert!(Endpoint::connect("localhost", 0).is_err());
        assert!(Endpoint::connect("localhost", 65536).is_err());
        assert!(Endpoint::connect("localhost", 65535).is_ok());
    }

    #[test]
    fn accepted_requires_connected_socket() {
        let path = std::env::temp_dir().join(format!("hopwire-endpoint-{}", std::process::id()));
        let file = std::fs::File::create(&path).unwrap();
        let result = Endpoint::accepted(ByteStream::from_fifo(file));
        assert!(matches!(result, Err(RouteError::InvalidConfig(_))));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn accepted_socket_is_taken_once() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let endpoint = Endpoint::accepted(ByteStream::from_tcp(client)).unwrap();

        assert!(endpoint.describe().starts_with("tcp:127.0.0.1:"));
        assert!(endpoint.open_socket().is_ok());
        assert!(endpoint.open_socket().is_err());
    }

    #[test]
    fn pipe_endpoint_reopens() {
        let endpoint = Endpoint::pipe("/tmp/a", "/tmp/b").unwrap();
        assert!(endpoint.reopens());
        assert_eq!(endpoint.kind(), "pipe");
        assert_eq!(endpoint.describe(), "pipe:/tmp/a>/tmp/b");
    }
}
