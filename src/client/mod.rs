//! Connections to individual Redis nodes.
//!
//! The scan core never talks to sockets directly: every node is reached
//! through the [`NodeClient`] trait, which exposes single commands and
//! pipelines. [`RedisNodeClient`] implements it on a multiplexed `redis`
//! connection; `MockNode` (tests and the `test-util` feature) is an
//! in-memory double.

pub mod connection;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod registry;
pub mod topology;

pub use connection::RedisNodeClient;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockKey, MockNode, SentCommand};
pub use registry::NodeRegistry;
pub use topology::{key_slot, ShardInfo, Topology, SLOT_COUNT};

use crate::error::{KeyscopeError, Result};
use async_trait::async_trait;
use redis::{Arg, Cmd, RedisError, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

/// One pipeline reply: the value, or the error message the server answered
pub type Reply = std::result::Result<Value, String>;

/// Address of one Redis node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddr {
    type Err = KeyscopeError;

    /// Parses `host:port`; the port follows the last `:` so IPv6 hosts work.
    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| KeyscopeError::InvalidArgument(format!("invalid address '{}'", s)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(KeyscopeError::InvalidArgument(format!(
                "invalid address '{}'",
                s
            )));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| KeyscopeError::InvalidArgument(format!("invalid port in '{}'", s)))?;
        Ok(Self::new(host, port))
    }
}

/// An already-connected handle to a single node.
///
/// A handle may be shared by concurrent requests; replies are matched to
/// the request that sent them even when a caller gives up early.
#[async_trait]
pub trait NodeClient: Send + Sync {
    fn addr(&self) -> &NodeAddr;

    /// Execute one command; an error reply becomes `KeyscopeError::Reply`.
    async fn send_command(&self, command: Cmd) -> Result<Value>;

    /// Execute commands in one round trip. Error replies are returned in
    /// place as `Err(message)`; only transport failures fail the call.
    async fn send_pipeline(&self, commands: Vec<Cmd>) -> Result<Vec<Reply>>;
}

/// Run a node call under an optional deadline.
pub async fn with_timeout<T, F>(node: &NodeAddr, limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| KeyscopeError::Timeout {
                node: node.clone(),
                after,
            })?,
        None => fut.await,
    }
}

/// Server error replies keep their text (`NOPERM ...`, `ERR ...`); anything
/// else is a transport or client failure.
pub(crate) fn from_redis_error(err: RedisError) -> KeyscopeError {
    match server_message(&err) {
        Some(message) => KeyscopeError::Reply(message),
        None => KeyscopeError::Redis(err),
    }
}

/// Text of an error reply, `None` for errors raised on the client side
pub(crate) fn server_message(err: &RedisError) -> Option<String> {
    if err.is_io_error() {
        return None;
    }
    let code = err.code()?;
    Some(match err.detail() {
        Some(detail) => format!("{} {}", code, detail),
        None => code.to_string(),
    })
}

/// Arguments of a command, name first
pub fn command_args(command: &Cmd) -> Vec<&[u8]> {
    command
        .args_iter()
        .filter_map(|arg| match arg {
            Arg::Simple(bytes) => Some(bytes),
            Arg::Cursor => None,
        })
        .collect()
}

/// Upper-cased command name, e.g. `SCAN` or `MEMORY`
pub fn command_name(command: &Cmd) -> String {
    command_args(command)
        .first()
        .map(|name| String::from_utf8_lossy(name).to_uppercase())
        .unwrap_or_default()
}

/// Space-separated form for logs
pub fn describe_command(command: &Cmd) -> String {
    command_args(command)
        .iter()
        .map(|arg| String::from_utf8_lossy(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_addr() {
        let addr: NodeAddr = "172.17.0.1:7001".parse().unwrap();
        assert_eq!(addr, NodeAddr::new("172.17.0.1", 7001));
        assert_eq!(addr.to_string(), "172.17.0.1:7001");
    }

    #[test]
    fn test_parse_ipv6_node_addr() {
        let addr: NodeAddr = "2001:db8::1:7001".parse().unwrap();
        assert_eq!(addr, NodeAddr::new("2001:db8::1", 7001));

        let bracketed: NodeAddr = "[::1]:6379".parse().unwrap();
        assert_eq!(bracketed, NodeAddr::new("::1", 6379));
    }

    #[test]
    fn test_parse_invalid_node_addr() {
        assert!("localhost".parse::<NodeAddr>().is_err());
        assert!("localhost:port".parse::<NodeAddr>().is_err());
        assert!(":6379".parse::<NodeAddr>().is_err());
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let node = NodeAddr::new("127.0.0.1", 7000);
        let result: Result<()> = with_timeout(&node, Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(KeyscopeError::Timeout { .. })));
    }

    #[test]
    fn test_command_helpers() {
        let mut command = redis::cmd("scan");
        command.arg(0).arg("MATCH").arg(&b"user:\xff"[..]);
        assert_eq!(command_name(&command), "SCAN");
        assert_eq!(command_args(&command)[3], &b"user:\xff"[..]);
        assert_eq!(describe_command(&redis::cmd("DBSIZE")), "DBSIZE");
    }

    #[test]
    fn test_error_replies_keep_their_text() {
        let reply = RedisError::from((
            redis::ErrorKind::ResponseError,
            "An error was signalled by the server",
            "unknown command 'MEMORY'".to_string(),
        ));
        let err = from_redis_error(reply);
        assert!(matches!(err, KeyscopeError::Reply(ref m) if m == "ERR unknown command 'MEMORY'"));

        let io = RedisError::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(matches!(from_redis_error(io), KeyscopeError::Redis(_)));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let node = NodeAddr::new("127.0.0.1", 7000);
        let value = with_timeout(&node, None, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
