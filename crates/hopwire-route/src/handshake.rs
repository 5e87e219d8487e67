use std::collections::HashSet;
use std::sync::Mutex;

use tracing::debug;

use crate::code::{RouteCode, MAX_ROUTE_ID};
use crate::error::{Result, RouteError};
use crate::message::{Message, RETURN_ROUTE_FIELD, ROUTE_FIELD};
use crate::sync::lock;

/// Message type a server-mode manager sends on every new route.
pub const IDENTIFY_QUERY: &str = "identify";
/// Message type of the answer to [`IDENTIFY_QUERY`].
pub const IDENTIFY_REPLY: &str = "identity";
/// Query field carrying the id the server proposes.
pub const SUGGESTED_ID_FIELD: &str = "suggested_id";
/// Reply field carrying the id the peer settled on.
pub const ID_FIELD: &str = "id";

/// Build the identification query for a freshly connected route.
///
/// The query travels one hop: its `route` is the route's own code, which
/// the sending manager consumes on the way out.
pub fn identify_query(route: RouteCode, suggested_id: u32) -> Message {
    Message::new(IDENTIFY_QUERY)
        .with_field(ROUTE_FIELD, route.encode())
        .with_field(RETURN_ROUTE_FIELD, "")
        .with_field(SUGGESTED_ID_FIELD, suggested_id.to_string())
}

/// Answer an identification query with `id`, addressed back along the
/// query's return route.
pub fn identify_reply(query: &Message, id: u32) -> Message {
    Message::new(IDENTIFY_REPLY)
        .with_field(ROUTE_FIELD, query.field(RETURN_ROUTE_FIELD).unwrap_or_default())
        .with_field(ID_FIELD, id.to_string())
}

/// The id a query proposes, if it carries a valid one.
pub fn suggested_id(query: &Message) -> Option<u32> {
    parse_id(query.field(SUGGESTED_ID_FIELD)?)
}

/// The id carried by an identification reply, if valid.
pub fn replied_id(reply: &Message) -> Option<u32> {
    parse_id(reply.field(ID_FIELD)?)
}

fn parse_id(raw: &str) -> Option<u32> {
    raw.trim().parse().ok()
}

/// Source of peer identifiers for the identification exchange.
pub trait IdAllocator: Send + Sync {
    /// Whether `id` already belongs to some peer.
    fn is_claimed(&self, id: u32) -> bool;
    /// Record `id` as in use. Claiming an already-claimed id is a no-op.
    fn claim(&self, id: u32);
    /// Hand out an unclaimed id and claim it.
    fn allocate(&self) -> Result<u32>;
}

/// Hands out ids in increasing order, skipping claimed ones.
#[derive(Debug, Default)]
pub struct SequentialIdAllocator {
    state: Mutex<AllocatorState>,
}

#[derive(Debug, Default)]
struct AllocatorState {
    next: u32,
    claimed: HashSet<u32>,
}

impl SequentialIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start handing out ids at `first`.
    pub fn starting_at(first: u32) -> Self {
        Self {
            state: Mutex::new(AllocatorState {
                next: first,
                claimed: HashSet::new(),
            }),
        }
    }
}

impl IdAllocator for SequentialIdAllocator {
    fn is_claimed(&self, id: u32) -> bool {
        lock(&self.state).claimed.contains(&id)
    }

    fn claim(&self, id: u32) {
        if lock(&self.state).claimed.insert(id) {
            debug!(id, "peer id claimed");
        }
    }

    fn allocate(&self) -> Result<u32> {
        let mut state = lock(&self.state);
        if state.claimed.len() > MAX_ROUTE_ID as usize {
            return Err(RouteError::IdsExhausted);
        }
        loop {
            let candidate = state.next;
            state.next = if candidate >= MAX_ROUTE_ID {
                0
            } else {
                candidate + 1
            };
            if state.claimed.insert(candidate) {
                return Ok(candidate);
            }
        }
    }
}
