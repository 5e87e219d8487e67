//! Routes and source routing over framed byte streams.
//!
//! A [`Route`] is one bidirectional endpoint (a named-pipe pair or a TCP
//! connection) identified by a [`RouteCode`]. The [`RouteManager`] keeps a
//! node's routes and sends each message along the path spelled out in its
//! `route` field, consuming one hop per node. Broadcasts flood to every
//! route but the one they arrived on, bounded by a hop count. An
//! [`Acceptor`] turns incoming TCP connections into routes.

pub mod acceptor;
pub mod code;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod manager;
pub mod message;
pub mod route;
mod sync;

pub use acceptor::{Acceptor, AcceptorConfig, AcceptorHandle, DEFAULT_MAX_CONNECTIONS};
pub use code::{chop, first_hop, RouteCode, MAX_ROUTE_ID};
pub use codec::{JsonCodec, MessageCodec};
pub use endpoint::{validate_port, Endpoint};
pub use error::{Result, RouteError};
pub use handshake::{IdAllocator, SequentialIdAllocator, IDENTIFY_QUERY, IDENTIFY_REPLY};
pub use manager::{ManagerConfig, MessageHandler, RouteManager, DEFAULT_HOP_COUNT};
pub use message::{
    Message, Metadata, BROADCAST_ROUTE, FORWARD_ROUTE_FIELD, HOP_COUNT_FIELD, RETURN_ROUTE_FIELD,
    ROUTE_FIELD,
};
pub use route::{InboundHandler, Route, RouteConfig, RouteEvent, RouteListener};
