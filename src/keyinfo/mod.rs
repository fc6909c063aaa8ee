//! Per-key metadata: type, TTL, cardinality and memory usage.

pub mod enricher;
pub mod strategy;

pub use enricher::{KeyEnricher, SizeMode};
pub use strategy::RedisDataType;

use crate::client::NodeAddr;
use bytes::Bytes;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// A key discovered on one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRef {
    pub name: Bytes,
    pub node: NodeAddr,
}

impl KeyRef {
    pub fn new(name: impl Into<Bytes>, node: NodeAddr) -> Self {
        Self {
            name: name.into(),
            node,
        }
    }
}

/// Outcome of the memory measurement of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySize {
    /// Bytes reported by `MEMORY USAGE`
    Measured(u64),
    /// Not measured because the key's cardinality is at or above the
    /// large-key threshold; serialized as `-1`
    TooLarge,
    /// `MEMORY USAGE` failed or answered nil; serialized as `null`
    Unavailable,
}

impl KeySize {
    pub fn bytes(&self) -> Option<u64> {
        match self {
            KeySize::Measured(bytes) => Some(*bytes),
            KeySize::TooLarge | KeySize::Unavailable => None,
        }
    }
}

impl Serialize for KeySize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            KeySize::Measured(bytes) => serializer.serialize_u64(*bytes),
            KeySize::TooLarge => serializer.serialize_i64(-1),
            KeySize::Unavailable => serializer.serialize_none(),
        }
    }
}

/// Why a single key could not be measured
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentError {
    #[error("MEMORY USAGE is not supported: {0}")]
    MemoryUsageUnsupported(String),

    #[error("{0}")]
    Reply(String),
}

impl From<EnrichmentError> for KeySize {
    fn from(_: EnrichmentError) -> Self {
        KeySize::Unavailable
    }
}

/// Metadata of one key.
///
/// `ttl` and `key_type` are absent only on name-only pages. `size` is
/// absent when it was not requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyInfo {
    #[serde(serialize_with = "serialize_name")]
    pub name: Bytes,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub key_type: Option<RedisDataType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<KeySize>,
    /// Node the key was read from
    #[serde(skip)]
    pub node: Option<NodeAddr>,
}

impl KeyInfo {
    /// Key reported without any enrichment
    pub fn name_only(name: Bytes, key_type: Option<RedisDataType>) -> Self {
        Self {
            name,
            key_type,
            ttl: None,
            length: None,
            size: None,
            node: None,
        }
    }

    pub fn with_node(mut self, node: NodeAddr) -> Self {
        self.node = Some(node);
        self
    }

    /// Lossy UTF-8 form of the name
    pub fn name_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    /// Measured memory in bytes, if any
    pub fn memory(&self) -> Option<u64> {
        self.size.as_ref().and_then(KeySize::bytes)
    }
}

pub(crate) fn serialize_name<S: Serializer>(name: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(name))
}
