use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use hopwire_transport::{ByteStream, TcpSocket, TransportError};
use tracing::{debug, error, info, warn};

use crate::codec::JsonCodec;
use crate::endpoint::Endpoint;
use crate::error::{Result, RouteError};
use crate::manager::RouteManager;
use crate::route::{Route, RouteConfig, RouteEvent};

/// Default cap on simultaneously connected peers.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Acceptor behavior configuration.
#[derive(Debug, Clone)]
pub struct AcceptorConfig {
    /// Connections beyond this many live routes are closed on arrival.
    pub max_connections: usize,
    /// Configuration for every route the acceptor creates.
    pub route: RouteConfig,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            route: RouteConfig::default(),
        }
    }
}

/// Accepts TCP connections and turns each into a registered, opened route.
pub struct Acceptor {
    socket: TcpSocket,
    manager: RouteManager,
    config: AcceptorConfig,
    active: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
}

impl Acceptor {
    /// Bind a listening socket with default configuration.
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Display, manager: RouteManager) -> Result<Self> {
        Self::bind_with_config(addr, manager, AcceptorConfig::default())
    }

    /// Bind a listening socket.
    pub fn bind_with_config(
        addr: impl ToSocketAddrs + std::fmt::Display,
        manager: RouteManager,
        config: AcceptorConfig,
    ) -> Result<Self> {
        if config.max_connections == 0 {
            return Err(RouteError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        let socket = TcpSocket::bind(addr)?;
        info!(addr = %socket.local_addr(), max_connections = config.max_connections, "acceptor listening");
        Ok(Self {
            socket,
            manager,
            config,
            active: Arc::new(AtomicUsize::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    /// Routes created by this acceptor that have not disconnected yet.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Accept connections until stopped or the listening socket fails.
    pub fn run(&self) -> Result<()> {
        let result = loop {
            let accepted = self.socket.accept();
            if self.stop.load(Ordering::SeqCst) {
                break Ok(());
            }
            match accepted {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(TransportError::Accept(err)) if is_transient(err.kind()) => {
                    warn!(error = %err, "accept failed; continuing");
                }
                Err(err) => {
                    error!(error = %err, "accept loop terminated");
                    break Err(err.into());
                }
            }
        };
        info!(addr = %self.local_addr(), "acceptor stopped");
        result
    }

    /// Run the accept loop on its own thread.
    pub fn spawn(self) -> Result<AcceptorHandle> {
        let local_addr = self.local_addr();
        let stop = Arc::clone(&self.stop);
        let active = Arc::clone(&self.active);
        let thread = thread::Builder::new()
            .name("route-acceptor".to_string())
            .spawn(move || self.run())
            .map_err(|err| RouteError::Transport(err.into()))?;
        Ok(AcceptorHandle {
            local_addr,
            stop,
            active,
            thread: Some(thread),
        })
    }

    fn admit(&self, stream: ByteStream, peer: SocketAddr) {
        let active = self.active.fetch_add(1, Ordering::SeqCst);
        if active >= self.config.max_connections {
            self.active.fetch_sub(1, Ordering::SeqCst);
            warn!(%peer, max_connections = self.config.max_connections, "connection limit reached; closing");
            if let Err(err) = stream.shutdown() {
                debug!(%peer, error = %err, "shutdown of rejected connection failed");
            }
            return;
        }

        let manager = self.manager.clone();
        let config = self.config.route.clone();
        let counter = Arc::clone(&self.active);
        let spawned = thread::Builder::new()
            .name(format!("route-accept-{peer}"))
            .spawn(move || {
                if let Err(err) = setup_route(&manager, stream, config, &counter) {
                    counter.fetch_sub(1, Ordering::SeqCst);
                    error!(%peer, error = %err, "failed to set up accepted route");
                }
            });
        if let Err(err) = spawned {
            self.active.fetch_sub(1, Ordering::SeqCst);
            error!(%peer, error = %err, "failed to spawn route setup thread");
        }
    }
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor")
            .field("local_addr", &self.local_addr())
            .field("max_connections", &self.config.max_connections)
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

fn setup_route(
    manager: &RouteManager,
    stream: ByteStream,
    config: RouteConfig,
    counter: &Arc<AtomicUsize>,
) -> Result<()> {
    let code = manager.free_port_id()?;
    let route = Route::with_config(code, Endpoint::accepted(stream)?, config, Arc::new(JsonCodec));

    let counter = Arc::clone(counter);
    route.add_listener(Arc::new(move |_: &Arc<Route>, event: RouteEvent| {
        if event == RouteEvent::Disconnected {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }));
    manager.open_port(&route)?;
    debug!(route = %code, label = route.label(), "accepted route opened");
    Ok(())
}

fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}

/// Handle to an acceptor running on its own thread.
#[derive(Debug)]
pub struct AcceptorHandle {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl AcceptorHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop accepting and wait for the accept loop to exit. Routes already
    /// created stay open.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        // Wake the blocked accept() with a throwaway connection.
        let _ = TcpStream::connect(wake_addr(self.local_addr));
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|_| {
                Err(RouteError::InvalidConfig("acceptor thread panicked".to_string()))
            }),
            None => Ok(()),
        }
    }
}

fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::time::Duration;

    use super::*;
    use crate::manager::ManagerConfig;
    use crate::message::Message;
    use crate::route::tests::wait_until;

    #[test]
    fn accepted_connections_become_routes() {
        let manager = RouteManager::new(ManagerConfig::default());
        let handle = Acceptor::bind("127.0.0.1:0", manager.clone())
            .unwrap()
            .spawn()
            .unwrap();

        let _a = TcpStream::connect(handle.local_addr()).unwrap();
        let _b = TcpStream::connect(handle.local_addr()).unwrap();
        wait_until("two routes up", || {
            let routes = manager.routes();
            routes.len() == 2 && routes.iter().all(|route| route.is_up())
        });
        assert_eq!(handle.active_connections(), 2);
        assert!(manager
            .routes()
            .iter()
            .all(|route| route.endpoint_kind() == "socket"));

        handle.shutdown().unwrap();
        manager.shutdown();
    }

    #[test]
    fn disconnect_frees_a_connection_slot() {
        let manager = RouteManager::new(ManagerConfig::default());
        let handle = Acceptor::bind("127.0.0.1:0", manager.clone())
            .unwrap()
            .spawn()
            .unwrap();

        let client = TcpStream::connect(handle.local_addr()).unwrap();
        wait_until("route registered", || handle.active_connections() == 1);
        wait_until("route up", || manager.routes().iter().any(|r| r.is_up()));

        drop(client);
        wait_until("slot freed", || handle.active_connections() == 0);
        wait_until("route removed", || manager.routes().is_empty());
        handle.shutdown().unwrap();
    }

    #[test]
    fn connections_over_limit_are_closed() {
        let manager = RouteManager::new(ManagerConfig::default());
        let config = AcceptorConfig {
            max_connections: 1,
            ..AcceptorConfig::default()
        };
        let handle = Acceptor::bind_with_config("127.0.0.1:0", manager.clone(), config)
            .unwrap()
            .spawn()
            .unwrap();

        let first = TcpStream::connect(handle.local_addr()).unwrap();
        wait_until("first route up", || manager.routes().iter().any(|r| r.is_up()));

        let mut second = TcpStream::connect(handle.local_addr()).unwrap();
        second
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(second.read(&mut buf).unwrap(), 0);
        assert_eq!(manager.routes().len(), 1);

        drop(first);
        handle.shutdown().unwrap();
        manager.shutdown();
    }

    #[test]
    fn server_mode_acceptor_sends_identify_query() {
        let manager = RouteManager::new(ManagerConfig {
            server_mode: true,
            ..ManagerConfig::default()
        });
        let handle = Acceptor::bind("127.0.0.1:0", manager.clone())
            .unwrap()
            .spawn()
            .unwrap();

        let client = TcpStream::connect(handle.local_addr()).unwrap();
        let mut reader = hopwire_frame::FrameReader::new(client);
        let payload = reader.read_frame().unwrap();
        let query: Message = serde_json::from_slice(&payload).unwrap();
        assert_eq!(query.msg_type, crate::handshake::IDENTIFY_QUERY);

        handle.shutdown().unwrap();
        manager.shutdown();
    }

    #[test]
    fn zero_connection_limit_rejected() {
        let manager = RouteManager::new(ManagerConfig::default());
        let config = AcceptorConfig {
            max_connections: 0,
            ..AcceptorConfig::default()
        };
        assert!(matches!(
            Acceptor::bind_with_config("127.0.0.1:0", manager, config),
            Err(RouteError::InvalidConfig(_))
        ));
    }

    #[test]
    fn bind_failure_is_transport_error() {
        let manager = RouteManager::new(ManagerConfig::default());
        let first = Acceptor::bind("127.0.0.1:0", manager.clone()).unwrap();
        let err = Acceptor::bind(first.local_addr(), manager).unwrap_err();
        assert!(matches!(err, RouteError::Transport(_)));
    }

    #[test]
    fn debug_shows_address_and_limit() {
        let manager = RouteManager::new(ManagerConfig::default());
        let acceptor = Acceptor::bind("127.0.0.1:0", manager).unwrap();
        let rendered = format!("{acceptor:?}");
        assert!(rendered.contains(&acceptor.local_addr().to_string()), "{rendered}");
        assert!(rendered.contains("max_connections: 64"), "{rendered}");
    }

    #[test]
    fn wake_addr_maps_unspecified_to_loopback() {
        let addr: SocketAddr = "0.0.0.0:4000".parse().unwrap();
        assert_eq!(wake_addr(addr), "127.0.0.1:4000".parse().unwrap());
        let addr: SocketAddr = "[::]:4000".parse().unwrap();
        assert_eq!(wake_addr(addr), "[::1]:4000".parse().unwrap());
    }
}
