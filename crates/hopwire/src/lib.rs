//! Framed message transport and source routing over named pipes and TCP.
//!
//! hopwire moves NUL-delimited messages between nodes. Each node owns a set
//! of routes; a message's `route` field lists the hops it still has to take,
//! and every node consumes one hop before passing it on.
//!
//! # Crate Structure
//!
//! - [`transport`]: blocking byte streams (TCP sockets, named pipes)
//! - [`frame`]: NUL-delimited framing over a growable ring buffer
//! - [`route`]: route codes, routes, the acceptor and the route manager

/// Re-export transport types.
pub mod transport {
    pub use hopwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use hopwire_frame::*;
}

/// Re-export routing types.
pub mod route {
    pub use hopwire_route::*;
}

pub use hopwire_route::{Acceptor, Message, Route, RouteCode, RouteError, RouteManager};
