use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error, info, warn};

use crate::code::{chop, RouteCode, MAX_ROUTE_ID};
use crate::error::{Result, RouteError};
use crate::handshake::{
    identify_query, identify_reply, replied_id, suggested_id, IdAllocator, SequentialIdAllocator,
    IDENTIFY_QUERY, IDENTIFY_REPLY,
};
use crate::message::{Message, FORWARD_ROUTE_FIELD, HOP_COUNT_FIELD, ROUTE_FIELD};
use crate::route::{InboundHandler, Route, RouteEvent, RouteListener};
use crate::sync::lock;

/// Hop count given to broadcasts that arrive without one.
pub const DEFAULT_HOP_COUNT: u32 = 5;

/// Application callback for inbound messages the manager does not consume.
pub type MessageHandler = dyn Fn(&RouteManager, Message) + Send + Sync;

/// Route manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Send an identification query on every route that comes up.
    pub server_mode: bool,
    /// Hop count assumed for broadcasts without a `hop_count` field.
    pub default_hop_count: u32,
    /// Identifier this node answers identification queries with. When
    /// unset, the suggested identifier is accepted.
    pub node_id: Option<u32>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            server_mode: false,
            default_hop_count: DEFAULT_HOP_COUNT,
            node_id: None,
        }
    }
}

/// Registry of a node's routes and the single entry point for sending.
///
/// Cloning is cheap; clones share one registry.
#[derive(Clone)]
pub struct RouteManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ManagerConfig,
    registry: Mutex<Registry>,
    ids: Arc<dyn IdAllocator>,
    handler: Mutex<Option<Arc<MessageHandler>>>,
    peers: Mutex<HashMap<RouteCode, u32>>,
    /// Serializes `deliver`; the string is scratch space for route rewriting.
    deliver_scratch: Mutex<String>,
}

#[derive(Default)]
struct Registry {
    routes: HashMap<String, Arc<Route>>,
    next_id: u32,
}

impl RouteManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_allocator(config, Arc::new(SequentialIdAllocator::starting_at(1)))
    }

    /// Manager that takes peer identifiers from `ids`.
    pub fn with_allocator(config: ManagerConfig, ids: Arc<dyn IdAllocator>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry: Mutex::new(Registry::default()),
                ids,
                handler: Mutex::new(None),
                peers: Mutex::new(HashMap::new()),
                deliver_scratch: Mutex::new(String::new()),
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Install the application handler for inbound messages.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&RouteManager, Message) + Send + Sync + 'static,
    {
        *lock(&self.inner.handler) = Some(Arc::new(handler));
    }

    /// Reserve and return the next unused route id.
    pub fn free_port_id(&self) -> Result<RouteCode> {
        let mut registry = lock(&self.inner.registry);
        loop {
            if registry.next_id > MAX_ROUTE_ID {
                return Err(RouteError::IdsExhausted);
            }
            let candidate = RouteCode::new(registry.next_id)?;
            registry.next_id += 1;
            if !registry.routes.contains_key(&candidate.encode()) {
                return Ok(candidate);
            }
        }
    }

    /// Register `route` and wire its events and inbound messages to this
    /// manager.
    pub fn add_port(&self, route: &Arc<Route>) -> Result<()> {
        let code = route.code();
        {
            let mut registry = lock(&self.inner.registry);
            let key = code.encode();
            if registry.routes.contains_key(&key) {
                return Err(RouteError::InvalidConfig(format!(
                    "route id {code} is already registered"
                )));
            }
            registry.routes.insert(key, Arc::clone(route));
            if code.value() >= registry.next_id {
                registry.next_id = code.value() + 1;
            }
        }

        let link = Arc::new(ManagerLink {
            manager: Arc::downgrade(&self.inner),
        });
        route.add_listener(link.clone());
        route.set_handler(link);
        info!(route = %code, label = route.label(), kind = route.endpoint_kind(), "route registered");
        Ok(())
    }

    /// Register and open a route in one step.
    pub fn open_port(&self, route: &Arc<Route>) -> Result<()> {
        self.add_port(route)?;
        if let Err(err) = route.open() {
            self.remove_port(route);
            return Err(err);
        }
        Ok(())
    }

    /// Deregister `route`. Returns false if it was not registered.
    pub fn remove_port(&self, route: &Route) -> bool {
        let code = route.code();
        let removed = {
            let mut registry = lock(&self.inner.registry);
            let key = code.encode();
            match registry.routes.get(&key) {
                Some(existing) if std::ptr::eq(Arc::as_ptr(existing), route) => {
                    registry.routes.remove(&key);
                    true
                }
                _ => false,
            }
        };
        if removed {
            lock(&self.inner.peers).remove(&code);
            info!(route = %code, label = route.label(), "route deregistered");
        }
        removed
    }

    /// Look up a registered route.
    pub fn route(&self, code: RouteCode) -> Option<Arc<Route>> {
        lock(&self.inner.registry).routes.get(&code.encode()).cloned()
    }

    /// Snapshot of the registered routes, ordered by code.
    pub fn routes(&self) -> Vec<Arc<Route>> {
        let mut routes: Vec<_> = lock(&self.inner.registry).routes.values().cloned().collect();
        routes.sort_by_key(|route| route.code());
        routes
    }

    /// Identifier the peer on `code` reported in the identification exchange.
    pub fn peer_id(&self, code: RouteCode) -> Option<u32> {
        lock(&self.inner.peers).get(&code).copied()
    }

    /// Send `message` toward its destination.
    ///
    /// Never fails: problems are logged and reported through the return
    /// value, which mirrors `message.meta.sent`.
    pub fn deliver(&self, message: &mut Message) -> bool {
        let mut scratch = lock(&self.inner.deliver_scratch);
        message.meta.sent = false;

        if message.is_broadcast() {
            self.broadcast(message, &mut scratch);
        } else {
            self.unicast(message, &mut scratch);
        }
        message.meta.sent
    }

    fn broadcast(&self, message: &mut Message, scratch: &mut String) {
        let hops = match message.field(HOP_COUNT_FIELD).map(str::parse::<u32>) {
            Some(Ok(hops)) => hops,
            Some(Err(_)) | None => {
                warn!(
                    msg_type = %message.msg_type,
                    default = self.inner.config.default_hop_count,
                    "broadcast without a valid hop count; using default"
                );
                self.inner.config.default_hop_count
            }
        };
        if hops == 0 {
            debug!(msg_type = %message.msg_type, "broadcast hop count exhausted; dropped");
            return;
        }
        message.set_field(HOP_COUNT_FIELD, (hops - 1).to_string());

        let arrived_on = message.meta.received_on;
        let mut sent_any = false;
        for route in self.routes() {
            if Some(route.code()) == arrived_on {
                continue;
            }
            let mut copy = message.clone();
            extend_forward_route(&mut copy, route.code(), scratch);
            match route.send(&copy) {
                Ok(()) => sent_any = true,
                Err(err) => {
                    warn!(route = %route.code(), error = %err, "broadcast copy not sent");
                }
            }
        }
        message.meta.sent = sent_any;
    }

    fn unicast(&self, message: &mut Message, scratch: &mut String) {
        let Some(full_route) = message.route().map(str::to_owned) else {
            warn!(msg_type = %message.msg_type, "message has no route; dropped");
            return;
        };

        let (code, rest) =
            match RouteCode::decode(&full_route).and_then(|code| Ok((code, chop(&full_route)?))) {
                Ok(split) => split,
                Err(err) => {
                    warn!(msg_type = %message.msg_type, error = %err, "undeliverable route; dropped");
                    return;
                }
            };

        let Some(route) = self.route(code) else {
            warn!(route = %code, msg_type = %message.msg_type, "no route registered for hop; dropped");
            return;
        };

        scratch.clear();
        scratch.push_str(rest);
        message.set_field(ROUTE_FIELD, scratch.as_str());
        if message.meta.original_route.is_none() {
            message.meta.original_route = Some(full_route);
        }
        extend_forward_route(message, code, scratch);

        match route.send(message) {
            Ok(()) => {
                message.meta.sent = true;
                debug!(route = %code, msg_type = %message.msg_type, "message sent");
            }
            Err(err) => {
                error!(route = %code, msg_type = %message.msg_type, error = %err, "send failed");
            }
        }
    }

    /// Close and deregister every route.
    pub fn shutdown(&self) {
        let routes: Vec<_> = {
            let mut registry = lock(&self.inner.registry);
            registry.routes.drain().map(|(_, route)| route).collect()
        };
        lock(&self.inner.peers).clear();
        for route in &routes {
            route.close();
        }
        info!(count = routes.len(), "route manager shut down");
    }

    fn on_route_event(&self, route: &Arc<Route>, event: RouteEvent) {
        match event {
            RouteEvent::Connected => {
                if self.inner.config.server_mode {
                    self.send_identify_query(route);
                }
            }
            RouteEvent::Disconnected => {
                if route.endpoint().reopens() {
                    debug!(route = %route.code(), "route down; waiting for reopen");
                } else {
                    self.remove_port(route);
                }
            }
        }
    }

    fn send_identify_query(&self, route: &Arc<Route>) {
        let code = route.code();
        let suggested = if self.inner.ids.is_claimed(code.value()) {
            match self.inner.ids.allocate() {
                Ok(id) => id,
                Err(err) => {
                    error!(route = %code, error = %err, "no identifier left to suggest");
                    return;
                }
            }
        } else {
            code.value()
        };

        let mut query = identify_query(code, suggested);
        if self.deliver(&mut query) {
            debug!(route = %code, suggested, "identification query sent");
        } else {
            warn!(route = %code, "identification query not sent");
        }
    }

    fn on_inbound(&self, message: Message) {
        if message.is_local() && message.msg_type == IDENTIFY_QUERY {
            self.answer_identify_query(&message);
            return;
        }
        if message.is_local() && message.msg_type == IDENTIFY_REPLY {
            self.record_identity(&message);
            return;
        }

        let handler = lock(&self.inner.handler).clone();
        match handler {
            Some(handler) => handler(self, message),
            None => debug!(msg_type = %message.msg_type, "no message handler; dropped"),
        }
    }

    fn answer_identify_query(&self, query: &Message) {
        let Some(id) = self.inner.config.node_id.or_else(|| suggested_id(query)) else {
            warn!("identification query without a usable id; not answered");
            return;
        };
        let mut reply = identify_reply(query, id);
        if !self.deliver(&mut reply) {
            warn!(id, "identification reply not sent");
        }
    }

    fn record_identity(&self, reply: &Message) {
        let (Some(code), Some(id)) = (reply.meta.received_on, replied_id(reply)) else {
            warn!("malformed identification reply; dropped");
            return;
        };
        if !self.inner.config.server_mode {
            debug!(route = %code, id, "identification reply outside server mode; ignored");
            return;
        }
        self.inner.ids.claim(id);
        lock(&self.inner.peers).insert(code, id);
        info!(route = %code, peer_id = id, "peer identified");
    }
}

fn extend_forward_route(message: &mut Message, code: RouteCode, scratch: &mut String) {
    if let Some(forward) = message.field(FORWARD_ROUTE_FIELD) {
        scratch.clear();
        scratch.push_str(forward);
        code.encode_into(scratch);
        message.set_field(FORWARD_ROUTE_FIELD, scratch.as_str());
    }
}

impl fmt::Debug for RouteManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteManager")
            .field("config", &self.inner.config)
            .field("routes", &lock(&self.inner.registry).routes.len())
            .finish()
    }
}

/// Connects a route back to its manager without keeping the manager alive.
struct ManagerLink {
    manager: Weak<Inner>,
}

impl ManagerLink {
    fn manager(&self) -> Option<RouteManager> {
        self.manager.upgrade().map(|inner| RouteManager { inner })
    }
}

impl RouteListener for ManagerLink {
    fn on_route_event(&self, route: &Arc<Route>, event: RouteEvent) {
        if let Some(manager) = self.manager() {
            manager.on_route_event(route, event);
        }
    }
}

impl InboundHandler for ManagerLink {
    fn on_message(&self, _route: &Arc<Route>, message: Message) {
        if let Some(manager) = self.manager() {
            manager.on_inbound(message);
        }
    }
}
