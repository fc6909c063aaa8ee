use redis::Cmd;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Key type as reported by the `TYPE` command
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RedisDataType {
    String,
    Hash,
    List,
    Set,
    ZSet,
    Stream,
    Json,
    Graph,
    TimeSeries,
    /// The key does not exist (`TYPE` answered `none`)
    None,
    /// Module types this crate has no strategy for
    Unknown(String),
}

impl RedisDataType {
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "string" => RedisDataType::String,
            "hash" => RedisDataType::Hash,
            "list" => RedisDataType::List,
            "set" => RedisDataType::Set,
            "zset" => RedisDataType::ZSet,
            "stream" => RedisDataType::Stream,
            "ReJSON-RL" => RedisDataType::Json,
            "graphdata" => RedisDataType::Graph,
            "TSDB-TYPE" => RedisDataType::TimeSeries,
            "none" => RedisDataType::None,
            other => RedisDataType::Unknown(other.to_string()),
        }
    }

    /// Name used by `TYPE` replies and the `SCAN ... TYPE` option
    pub fn as_str(&self) -> &str {
        match self {
            RedisDataType::String => "string",
            RedisDataType::Hash => "hash",
            RedisDataType::List => "list",
            RedisDataType::Set => "set",
            RedisDataType::ZSet => "zset",
            RedisDataType::Stream => "stream",
            RedisDataType::Json => "ReJSON-RL",
            RedisDataType::Graph => "graphdata",
            RedisDataType::TimeSeries => "TSDB-TYPE",
            RedisDataType::None => "none",
            RedisDataType::Unknown(name) => name,
        }
    }

    /// Command that reports the cardinality of a key of this type.
    ///
    /// Types without one fall back to TTL and size only.
    pub fn length_command(&self, key: &[u8]) -> Option<Cmd> {
        let name = match self {
            RedisDataType::String => "STRLEN",
            RedisDataType::Hash => "HLEN",
            RedisDataType::List => "LLEN",
            RedisDataType::Set => "SCARD",
            RedisDataType::ZSet => "ZCARD",
            RedisDataType::Stream => "XLEN",
            RedisDataType::Json
            | RedisDataType::Graph
            | RedisDataType::TimeSeries
            | RedisDataType::None
            | RedisDataType::Unknown(_) => return None,
        };
        let mut command = redis::cmd(name);
        command.arg(key);
        Some(command)
    }
}

impl fmt::Display for RedisDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RedisDataType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_type_name(s))
    }
}

impl Serialize for RedisDataType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RedisDataType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_type_name(&name))
    }
}
