//! Compact, self-delimiting route identifiers.
//!
//! A [`RouteCode`] is a 30-bit local route id. Its string form packs the
//! value into 3-bit groups, most significant first, one character per
//! group, drawn from a 16-letter alphabet:
//!
//! - `A`..=`H` encode a group and end the hop (terminal)
//! - `I`..=`P` encode a group and announce more to come (continuation)
//!
//! Every group but the last uses a continuation letter, so a hop is
//! self-terminating and a multi-hop route is simply the concatenation of
//! its hops: `"JCB"` is the two hops `"JC"` (10) and `"B"` (1).

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, RouteError};

/// Largest encodable route id, `2^30 - 1`.
pub const MAX_ROUTE_ID: u32 = (1 << 30) - 1;

const TERMINAL_BASE: u8 = b'A';
const CONTINUATION_BASE: u8 = b'I';
const GROUP_BITS: u32 = 3;
const GROUP_MASK: u32 = 0b111;
const MAX_GROUPS: usize = 10;

/// Identifier of a locally registered route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteCode(u32);

impl RouteCode {
    pub const MAX: RouteCode = RouteCode(MAX_ROUTE_ID);

    /// Create a route code, rejecting values above [`MAX_ROUTE_ID`].
    pub fn new(value: u32) -> Result<Self> {
        if value > MAX_ROUTE_ID {
            return Err(RouteError::InvalidConfig(format!(
                "route id {value} exceeds maximum {MAX_ROUTE_ID}"
            )));
        }
        Ok(Self(value))
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    /// Canonical string form.
    pub fn encode(self) -> String {
        let mut out = String::with_capacity(MAX_GROUPS);
        self.encode_into(&mut out);
        out
    }

    /// Append the canonical string form to `out`.
    pub fn encode_into(self, out: &mut String) {
        let mut groups = 1;
        while groups < MAX_GROUPS as u32 && self.0 >> (GROUP_BITS * groups) != 0 {
            groups += 1;
        }

        for index in (0..groups).rev() {
            let group = ((self.0 >> (GROUP_BITS * index)) & GROUP_MASK) as u8;
            let base = if index == 0 {
                TERMINAL_BASE
            } else {
                CONTINUATION_BASE
            };
            out.push(char::from(base + group));
        }
    }

    /// Decode the first hop of `route`; anything after it is ignored.
    pub fn decode(route: &str) -> Result<Self> {
        decode_hop(route).map(|(code, _)| code)
    }
}

/// The first hop of a route string.
pub fn first_hop(route: &str) -> Result<&str> {
    let (_, len) = decode_hop(route)?;
    Ok(&route[..len])
}

/// Everything after the first hop; empty when the route had one hop.
pub fn chop(route: &str) -> Result<&str> {
    let (_, len) = decode_hop(route)?;
    Ok(&route[len..])
}

/// Decode one hop, returning the code and the number of bytes it spans.
fn decode_hop(route: &str) -> Result<(RouteCode, usize)> {
    let invalid = |reason| RouteError::InvalidRoute {
        route: route.to_string(),
        reason,
    };

    let mut value = 0u32;
    for (index, byte) in route.bytes().enumerate() {
        if index >= MAX_GROUPS {
            return Err(invalid("hop longer than 30 bits"));
        }
        let (group, terminal) = match byte {
            b'A'..=b'H' => (byte - TERMINAL_BASE, true),
            b'I'..=b'P' => (byte - CONTINUATION_BASE, false),
            _ => return Err(invalid("character outside route alphabet")),
        };
        value = (value << GROUP_BITS) | u32::from(group);
        if terminal {
            return Ok((RouteCode(value), index + 1));
        }
    }

    Err(invalid("no terminal character"))
}

impl fmt::Display for RouteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Parses exactly one hop.
impl FromStr for RouteCode {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self> {
        let (code, len) = decode_hop(s)?;
        if len != s.len() {
            return Err(RouteError::InvalidRoute {
                route: s.to_string(),
                reason: "trailing characters after hop",
            });
        }
        Ok(code)
    }
}

impl TryFrom<u32> for RouteCode {
    type Error = RouteError;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}
