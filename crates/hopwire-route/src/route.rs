use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use hopwire_frame::{ChannelState, FrameConfig, FrameError, FrameReader, FrameWriter};
use hopwire_transport::ByteStream;
use tracing::{debug, error, info, trace, warn};

use crate::code::RouteCode;
use crate::codec::{JsonCodec, MessageCodec};
use crate::endpoint::{open_pipe_read, open_pipe_write, Endpoint};
use crate::error::{Result, RouteError};
use crate::message::{Message, RETURN_ROUTE_FIELD};
use crate::sync::lock;

/// Connection transition of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteEvent {
    /// Both directions are connected.
    Connected,
    /// At least one direction went away, or a socket route failed to open.
    Disconnected,
}

/// Observer for route connection transitions.
pub trait RouteListener: Send + Sync {
    fn on_route_event(&self, route: &Arc<Route>, event: RouteEvent);
}

impl<F> RouteListener for F
where
    F: Fn(&Arc<Route>, RouteEvent) + Send + Sync,
{
    fn on_route_event(&self, route: &Arc<Route>, event: RouteEvent) {
        self(route, event)
    }
}

/// Receiver for decoded inbound messages.
pub trait InboundHandler: Send + Sync {
    fn on_message(&self, route: &Arc<Route>, message: Message);
}

impl<F> InboundHandler for F
where
    F: Fn(&Arc<Route>, Message) + Send + Sync,
{
    fn on_message(&self, route: &Arc<Route>, message: Message) {
        self(route, message)
    }
}

/// Route behavior configuration.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    /// Framing configuration for both directions.
    pub frame: FrameConfig,
    /// Pause between failed pipe open attempts.
    pub reopen_delay: Duration,
    /// Consecutive read errors tolerated before the channel counts as closed.
    pub max_read_errors: usize,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            reopen_delay: Duration::from_millis(500),
            max_read_errors: 8,
        }
    }
}

#[derive(Debug, Default)]
struct LinkStatus {
    read: ChannelState,
    write: ChannelState,
}

impl LinkStatus {
    fn is_up(&self) -> bool {
        self.read.is_connected() && self.write.is_connected()
    }
}

/// A bidirectional message endpoint identified by a [`RouteCode`].
///
/// Owns one framed reader and one framed writer over its [`Endpoint`].
/// Opening, reading and pipe reopening all happen on dedicated threads;
/// callers of [`Route::open`] and [`Route::write`] never block on a peer
/// showing up.
pub struct Route {
    code: RouteCode,
    label: String,
    endpoint: Endpoint,
    config: RouteConfig,
    codec: Arc<dyn MessageCodec>,
    status: Mutex<LinkStatus>,
    /// Last up/down state reported to listeners. Held while notifying so
    /// events reach listeners in order.
    announced_up: Mutex<bool>,
    writer: Mutex<Option<FrameWriter<ByteStream>>>,
    socket: Mutex<Option<ByteStream>>,
    listeners: Mutex<Vec<Arc<dyn RouteListener>>>,
    handler: Mutex<Option<Arc<dyn InboundHandler>>>,
    writer_pending: AtomicBool,
    opened: AtomicBool,
    closed: AtomicBool,
}

impl Route {
    /// Create a route over a validated endpoint with default config and
    /// the JSON codec.
    pub fn new(code: RouteCode, endpoint: Endpoint) -> Arc<Self> {
        Self::with_config(code, endpoint, RouteConfig::default(), Arc::new(JsonCodec))
    }

    /// Create a route with explicit configuration and codec.
    pub fn with_config(
        code: RouteCode,
        endpoint: Endpoint,
        config: RouteConfig,
        codec: Arc<dyn MessageCodec>,
    ) -> Arc<Self> {
        Arc::new(Self {
            code,
            label: endpoint.describe(),
            endpoint,
            config,
            codec,
            status: Mutex::new(LinkStatus::default()),
            announced_up: Mutex::new(false),
            writer: Mutex::new(None),
            socket: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
            writer_pending: AtomicBool::new(false),
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Pipe route reading `inbound` and writing `outbound`.
    pub fn pipe(
        code: RouteCode,
        inbound: impl Into<PathBuf>,
        outbound: impl Into<PathBuf>,
    ) -> Result<Arc<Self>> {
        Ok(Self::new(code, Endpoint::pipe(inbound, outbound)?))
    }

    /// Socket route that connects to `host:port` when opened.
    pub fn connect(code: RouteCode, host: impl Into<String>, port: u32) -> Result<Arc<Self>> {
        Ok(Self::new(code, Endpoint::connect(host, port)?))
    }

    /// Socket route over an already-connected stream.
    pub fn accepted(code: RouteCode, stream: ByteStream) -> Result<Arc<Self>> {
        Ok(Self::new(code, Endpoint::accepted(stream)?))
    }

    pub fn code(&self) -> RouteCode {
        self.code
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// `"pipe"` or `"socket"`.
    pub fn endpoint_kind(&self) -> &'static str {
        self.endpoint.kind()
    }

    /// True iff both the read and the write channel are connected.
    pub fn is_up(&self) -> bool {
        lock(&self.status).is_up()
    }

    pub fn read_state(&self) -> ChannelState {
        lock(&self.status).read
    }

    pub fn write_state(&self) -> ChannelState {
        lock(&self.status).write
    }

    /// Register a connection-event listener.
    pub fn add_listener(&self, listener: Arc<dyn RouteListener>) {
        lock(&self.listeners).push(listener);
    }

    /// Install the receiver for inbound messages, replacing any previous one.
    pub fn set_handler(&self, handler: Arc<dyn InboundHandler>) {
        *lock(&self.handler) = Some(handler);
    }

    /// Start the transport. Call once; a second call fails.
    ///
    /// Returns as soon as the worker threads are spawned. Listeners hear
    /// [`RouteEvent::Connected`] once both directions are up.
    pub fn open(self: &Arc<Self>) -> Result<()> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Err(RouteError::AlreadyOpened(self.label.clone()));
        }

        match &self.endpoint {
            Endpoint::Pipe { inbound, .. } => {
                let inbound = inbound.clone();
                self.spawn("read", move |route| route.run_pipe_reader(inbound))?;
            }
            Endpoint::Connect { .. } | Endpoint::Accepted { .. } => {
                self.spawn("socket", |route| route.run_socket())?;
            }
        }

        debug!(route = %self.code, label = %self.label, "route opening");
        Ok(())
    }

    /// Send one already-encoded payload.
    ///
    /// Fails with [`RouteError::NotUp`] when the route is not connected.
    pub fn write(&self, payload: &[u8]) -> Result<()> {
        if !self.is_up() {
            return Err(RouteError::NotUp(self.label.clone()));
        }

        let mut guard = lock(&self.writer);
        let writer = guard
            .as_mut()
            .ok_or_else(|| RouteError::NotUp(self.label.clone()))?;

        match writer.send(payload) {
            Ok(()) => Ok(()),
            Err(err) => {
                if writer.state() == ChannelState::Closed {
                    *guard = None;
                    lock(&self.status).write = ChannelState::Closed;
                    warn!(route = %self.code, error = %err, "write channel closed by peer");
                }
                Err(err.into())
            }
        }
    }

    /// Encode and send a message.
    pub fn send(&self, message: &Message) -> Result<()> {
        let payload = self.codec.encode(message)?;
        self.write(&payload)
    }

    /// Shut the route down: close the socket or pipe ends and stop reopening.
    ///
    /// A pipe thread blocked waiting for its peer exits the next time it
    /// wakes up.
    pub fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(socket) = lock(&self.socket).take() {
            if let Err(err) = socket.shutdown() {
                debug!(route = %self.code, error = %err, "socket shutdown failed");
            }
        }
        *lock(&self.writer) = None;
        {
            let mut status = lock(&self.status);
            status.read = ChannelState::Closed;
            status.write = ChannelState::Closed;
        }
        self.sync_events();
        info!(route = %self.code, label = %self.label, "route closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn spawn<F>(self: &Arc<Self>, role: &str, body: F) -> Result<()>
    where
        F: FnOnce(Arc<Self>) + Send + 'static,
    {
        let route = Arc::clone(self);
        thread::Builder::new()
            .name(format!("route-{}-{role}", self.code))
            .spawn(move || body(route))
            .map(|_| ())
            .map_err(|err| RouteError::Transport(err.into()))
    }

    fn set_read_state(&self, state: ChannelState) {
        lock(&self.status).read = state;
    }

    fn set_write_state(&self, state: ChannelState) {
        lock(&self.status).write = state;
    }

    /// Tell listeners about an up/down change, if there was one.
    fn sync_events(self: &Arc<Self>) {
        let mut announced = lock(&self.announced_up);
        let up = self.is_up();
        if up == *announced {
            return;
        }
        *announced = up;

        let event = if up {
            info!(route = %self.code, label = %self.label, "route up");
            RouteEvent::Connected
        } else {
            info!(route = %self.code, label = %self.label, "route down");
            RouteEvent::Disconnected
        };

        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            listener.on_route_event(self, event);
        }
    }

    /// A socket route that never came up will not come up later either.
    /// Listeners get one `Disconnected` so they can release it.
    fn announce_open_failure(self: &Arc<Self>) {
        let _announced = lock(&self.announced_up);
        info!(route = %self.code, label = %self.label, "route failed to open");
        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            listener.on_route_event(self, RouteEvent::Disconnected);
        }
    }

    /// Long-lived inbound side of a pipe route. Each time the inbound pipe
    /// opens, the outbound side is opened on a helper thread; each time the
    /// peer closes it, the whole route goes down and the cycle starts over.
    fn run_pipe_reader(self: Arc<Self>, inbound: PathBuf) {
        while !self.is_closed() {
            self.set_read_state(ChannelState::Opening);
            let stream = match open_pipe_read(&inbound) {
                Ok(stream) => stream,
                Err(err) => {
                    error!(route = %self.code, error = %err, "failed to open inbound pipe");
                    self.set_read_state(ChannelState::Failed);
                    thread::sleep(self.config.reopen_delay);
                    continue;
                }
            };

            self.set_read_state(ChannelState::Opened);
            self.start_pipe_writer();
            self.sync_events();
            self.read_loop(stream);

            *lock(&self.writer) = None;
            {
                let mut status = lock(&self.status);
                status.read = ChannelState::Closed;
                status.write = ChannelState::Closed;
            }
            self.sync_events();

            if !self.is_closed() {
                info!(route = %self.code, "reopening pipe route");
            }
        }
        debug!(route = %self.code, "pipe reader exiting");
    }

    fn start_pipe_writer(self: &Arc<Self>) {
        let Endpoint::Pipe { outbound, .. } = &self.endpoint else {
            return;
        };
        if self.writer_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let outbound = outbound.clone();
        if let Err(err) = self.spawn("write", move |route| route.run_pipe_writer(outbound)) {
            error!(route = %self.code, error = %err, "failed to start pipe writer");
            self.writer_pending.store(false, Ordering::SeqCst);
            self.set_write_state(ChannelState::Failed);
        }
    }

    /// Open the outbound pipe; blocks until the peer opens its read end.
    fn run_pipe_writer(self: Arc<Self>, outbound: PathBuf) {
        while !self.is_closed() {
            self.set_write_state(ChannelState::Opening);
            let writer = open_pipe_write(&outbound).and_then(|stream| {
                Ok(FrameWriter::with_config_stream(
                    stream,
                    self.config.frame.clone(),
                )?)
            });

            match writer {
                Ok(writer) => {
                    *lock(&self.writer) = Some(writer);
                    self.set_write_state(ChannelState::Opened);
                    if self.is_closed() {
                        *lock(&self.writer) = None;
                        self.set_write_state(ChannelState::Closed);
                    }
                    break;
                }
                Err(err) => {
                    error!(route = %self.code, error = %err, "failed to open outbound pipe");
                    self.set_write_state(ChannelState::Failed);
                    thread::sleep(self.config.reopen_delay);
                }
            }
        }
        self.writer_pending.store(false, Ordering::SeqCst);
        self.sync_events();
    }

    fn run_socket(self: Arc<Self>) {
        {
            let mut status = lock(&self.status);
            status.read = ChannelState::Opening;
            status.write = ChannelState::Opening;
        }

        let reader_stream = match self.connect_socket() {
            Ok(stream) => stream,
            Err(err) => {
                error!(route = %self.code, label = %self.label, error = %err, "failed to open socket route");
                {
                    let mut status = lock(&self.status);
                    status.read = ChannelState::Failed;
                    status.write = ChannelState::Failed;
                }
                self.announce_open_failure();
                return;
            }
        };

        self.sync_events();
        self.read_loop(reader_stream);

        *lock(&self.writer) = None;
        if let Some(socket) = lock(&self.socket).take() {
            let _ = socket.shutdown();
        }
        {
            let mut status = lock(&self.status);
            status.read = ChannelState::Closed;
            status.write = ChannelState::Closed;
        }
        self.sync_events();
        debug!(route = %self.code, "socket reader exiting");
    }

    /// Connect (or take) the socket, install the writer, and return the
    /// stream the reader should use.
    fn connect_socket(&self) -> Result<ByteStream> {
        let stream = self.endpoint.open_socket()?;
        let reader_stream = stream.try_clone()?;
        let writer = FrameWriter::with_config_stream(stream.try_clone()?, self.config.frame.clone())?;

        if self.is_closed() {
            let _ = stream.shutdown();
            return Err(RouteError::NotUp(self.label.clone()));
        }
        *lock(&self.writer) = Some(writer);
        *lock(&self.socket) = Some(stream);

        let mut status = lock(&self.status);
        status.read = ChannelState::Opened;
        status.write = ChannelState::Opened;
        Ok(reader_stream)
    }

    /// Deliver frames until the stream closes.
    fn read_loop(self: &Arc<Self>, stream: ByteStream) {
        let mut reader = match FrameReader::with_config_stream(stream, self.config.frame.clone()) {
            Ok(reader) => reader,
            Err(err) => {
                error!(route = %self.code, error = %err, "failed to set up reader");
                return;
            }
        };

        let mut consecutive_errors = 0usize;
        loop {
            match reader.read_frame() {
                Ok(payload) => {
                    consecutive_errors = 0;
                    self.dispatch(&payload);
                }
                Err(FrameError::ConnectionClosed) => {
                    debug!(route = %self.code, "peer closed stream");
                    return;
                }
                Err(err) if err.is_timeout() => {
                    // Idle peer; partial frames stay buffered in the reader.
                    if self.is_closed() {
                        return;
                    }
                    trace!(route = %self.code, "read timed out; still waiting");
                }
                Err(err) => {
                    consecutive_errors += 1;
                    warn!(route = %self.code, error = %err, consecutive_errors, "read error");
                    if consecutive_errors >= self.config.max_read_errors {
                        error!(route = %self.code, "too many read errors; treating channel as closed");
                        return;
                    }
                }
            }
        }
    }

    fn dispatch(self: &Arc<Self>, payload: &[u8]) {
        let mut message = match self.codec.decode(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(route = %self.code, error = %err, size = payload.len(), "dropping undecodable message");
                return;
            }
        };
        self.preprocess(&mut message);

        let handler = lock(&self.handler).clone();
        match handler {
            Some(handler) => handler.on_message(self, message),
            None => debug!(route = %self.code, msg_type = %message.msg_type, "no inbound handler; message dropped"),
        }
    }

    /// Per-hop bookkeeping on every inbound message, before anything else
    /// sees it: record the receiving route and grow the return path by this
    /// route's code.
    fn preprocess(&self, message: &mut Message) {
        if let Some(return_route) = message.fields.get_mut(RETURN_ROUTE_FIELD) {
            return_route.insert_str(0, &self.code.encode());
        }
        message.meta.received_on = Some(self.code);
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = lock(&self.status);
        f.debug_struct("Route")
            .field("code", &self.code)
            .field("label", &self.label)
            .field("read", &status.read)
            .field("write", &status.write)
            .finish()
    }
}
