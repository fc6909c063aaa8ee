//! Composite cursor: the per-node SCAN cursors of a whole cluster packed
//! into one opaque token.
//!
//! Format: `host:port@cursor` entries joined by `||`. A cursor of `-1`
//! marks a node that has nothing left to scan.

use super::node::NodeScanState;
use crate::client::NodeAddr;
use crate::error::{KeyscopeError, Result};

/// Separator between node entries
pub const CURSOR_SEPARATOR: &str = "||";

/// Cursor written for finished nodes
pub const EXHAUSTED_CURSOR: i64 = -1;

/// One validated `host:port@cursor` entry
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Active(NodeAddr, u64),
    Exhausted(NodeAddr),
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':')
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_segment(segment: &str) -> Option<Segment> {
    let (addr, cursor) = segment.rsplit_once('@')?;
    let (host, port) = addr.rsplit_once(':')?;

    if host.is_empty() || !host.chars().all(is_host_char) || !is_number(port) {
        return None;
    }
    let node = NodeAddr::new(host, port.parse().ok()?);

    match cursor.strip_prefix('-') {
        Some(digits) if is_number(digits) => Some(Segment::Exhausted(node)),
        Some(_) => None,
        None if is_number(cursor) => Some(Segment::Active(node, cursor.parse().ok()?)),
        None => None,
    }
}

fn parse_segments(token: &str) -> Option<Vec<Segment>> {
    if token.is_empty() {
        return None;
    }
    token.split(CURSOR_SEPARATOR).map(parse_segment).collect()
}

/// True iff every entry of `token` is a well-formed `host:port@cursor`
pub fn is_valid(token: &str) -> bool {
    parse_segments(token).is_some()
}

/// Decode a token into the nodes that still need scanning.
///
/// Entries with a negative cursor are dropped, so an all-exhausted token
/// decodes to an empty list. Any malformed entry rejects the whole token.
pub fn decode(token: &str) -> Result<Vec<NodeScanState>> {
    let segments =
        parse_segments(token).ok_or_else(|| KeyscopeError::MalformedCursor(token.to_string()))?;

    Ok(segments
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Active(node, cursor) => Some(NodeScanState::resume(node, cursor)),
            Segment::Exhausted(_) => None,
        })
        .collect())
}

/// Encode every state, finished ones included as `-1`
pub fn encode(states: &[NodeScanState]) -> String {
    states
        .iter()
        .map(|state| {
            if state.is_finished() {
                format!("{}@{}", state.node, EXHAUSTED_CURSOR)
            } else {
                format!("{}@{}", state.node, state.cursor)
            }
        })
        .collect::<Vec<_>>()
        .join(CURSOR_SEPARATOR)
}
