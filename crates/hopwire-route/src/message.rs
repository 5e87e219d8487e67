use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::code::RouteCode;

/// Remaining path to the destination; one hop is consumed per route manager.
pub const ROUTE_FIELD: &str = "route";
/// Path taken so far; extended with each outgoing route's code.
pub const FORWARD_ROUTE_FIELD: &str = "fwd_route";
/// Path back to the sender; prefixed with each receiving route's code.
pub const RETURN_ROUTE_FIELD: &str = "ret_route";
/// Remaining broadcast hops.
pub const HOP_COUNT_FIELD: &str = "hop_count";
/// `route` value that marks a message as broadcast.
pub const BROADCAST_ROUTE: &str = "*";

/// A routed message.
///
/// The transport core only looks at the reserved route fields; every other
/// field passes through untouched. `meta` is local bookkeeping and never
/// goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(skip)]
    pub meta: Metadata,
}

/// Transport bookkeeping attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Set by `RouteManager::deliver` once the message went out on a route.
    pub sent: bool,
    /// Route the message arrived on, if it came from the network.
    pub received_on: Option<RouteCode>,
    /// Route field as it was before the first hop was consumed here.
    pub original_route: Option<String>,
}

impl Message {
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            fields: BTreeMap::new(),
            meta: Metadata::default(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn remove_field(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    pub fn route(&self) -> Option<&str> {
        self.field(ROUTE_FIELD)
    }

    pub fn is_broadcast(&self) -> bool {
        self.route() == Some(BROADCAST_ROUTE)
    }

    /// True when the message has arrived: no hops left to consume.
    pub fn is_local(&self) -> bool {
        self.route().is_none_or(str::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let msg = Message::new("note")
            .with_field(ROUTE_FIELD, "JCB")
            .with_field("pitch", "60");
        assert_eq!(msg.msg_type, "note");
        assert_eq!(msg.route(), Some("JCB"));
        assert_eq!(msg.field("pitch"), Some("60"));
        assert!(!msg.is_broadcast());
        assert!(!msg.is_local());
    }

    #[test]
    fn broadcast_and_local_detection() {
        let broadcast = Message::new("ping").with_field(ROUTE_FIELD, BROADCAST_ROUTE);
        assert!(broadcast.is_broadcast());

        assert!(Message::new("x").is_local());
        assert!(Message::new("x").with_field(ROUTE_FIELD, "").is_local());
    }

    #[test]
    fn metadata_defaults_to_unsent() {
        let mut msg = Message::new("x");
        assert!(!msg.meta.sent);
        assert!(msg.meta.received_on.is_none());
        msg.set_field("a", "1");
        assert_eq!(msg.remove_field("a").as_deref(), Some("1"));
    }
}
