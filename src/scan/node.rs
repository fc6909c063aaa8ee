use crate::client::{describe_command, NodeAddr, NodeClient};
use crate::error::{KeyscopeError, Result};
use crate::keyinfo::{KeyRef, RedisDataType};
use redis::Value;
use serde::Serialize;
use tracing::debug;

/// Scan progress of one node within a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeScanState {
    #[serde(flatten)]
    pub node: NodeAddr,
    pub cursor: u64,
    /// Set once a SCAN reply has been applied; a cursor of 0 after that is
    /// the server's end-of-iteration signal
    #[serde(skip)]
    pub started: bool,
    /// Sum of the COUNT hints sent to this node
    pub scanned: u64,
    /// Keys returned with metadata
    pub processed: u64,
    /// Keyspace size reported by the node
    pub total: u64,
    /// Keys discovered but not yet enriched
    #[serde(skip)]
    pub keys: Vec<KeyRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeScanState {
    /// A node that has not been scanned yet
    pub fn new(node: NodeAddr) -> Self {
        Self::resume(node, 0)
    }

    /// A node continuing from `cursor`; any non-zero cursor has started
    pub fn resume(node: NodeAddr, cursor: u64) -> Self {
        Self {
            node,
            cursor,
            started: cursor != 0,
            scanned: 0,
            processed: 0,
            total: 0,
            keys: Vec::new(),
            error: None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.started && self.cursor == 0
    }

    /// Exhausted or failed: no further SCAN is issued for this node
    pub fn is_finished(&self) -> bool {
        self.is_exhausted() || self.error.is_some()
    }

    pub fn mark_exhausted(&mut self) {
        self.started = true;
        self.cursor = 0;
    }

    /// Apply one SCAN reply sent with COUNT `count`
    pub fn advance(&mut self, page: NodeScanPage, count: u64) {
        self.started = true;
        self.cursor = page.next_cursor;
        self.scanned += count;
        self.keys.extend(page.keys);
    }
}

/// Reply of one SCAN call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeScanPage {
    pub next_cursor: u64,
    pub keys: Vec<KeyRef>,
}

impl NodeScanPage {
    /// Read a `[cursor, [key, ...]]` SCAN reply from `node`
    pub fn from_reply(node: &NodeAddr, reply: &Value) -> Result<Self> {
        let (next_cursor, names): (u64, Vec<Vec<u8>>) = redis::from_redis_value(reply)
            .map_err(|e| {
                KeyscopeError::Protocol(format!("unexpected SCAN reply from {}: {}", node, e))
            })?;

        let keys = names
            .into_iter()
            .map(|name| KeyRef::new(name, node.clone()))
            .collect();
        Ok(Self { next_cursor, keys })
    }
}

/// Issue `SCAN cursor MATCH pattern COUNT count [TYPE type]` on one node.
///
/// COUNT is only a hint: short or empty pages are returned as they are.
pub async fn scan_node(
    client: &dyn NodeClient,
    cursor: u64,
    count: u64,
    match_pattern: Option<&str>,
    key_type: Option<&RedisDataType>,
) -> Result<NodeScanPage> {
    let mut command = redis::cmd("SCAN");
    command
        .arg(cursor)
        .arg("MATCH")
        .arg(match_pattern.unwrap_or("*"))
        .arg("COUNT")
        .arg(count);
    if let Some(key_type) = key_type {
        command.arg("TYPE").arg(key_type.as_str());
    }

    debug!("{} on {}", describe_command(&command), client.addr());
    let reply = client.send_command(command).await?;
    NodeScanPage::from_reply(client.addr(), &reply)
}

/// Keyspace size of the node (`DBSIZE`)
pub async fn fetch_total(client: &dyn NodeClient) -> Result<u64> {
    let reply = client.send_command(redis::cmd("DBSIZE")).await?;
    redis::from_redis_value(&reply).map_err(|_| {
        KeyscopeError::Protocol(format!("unexpected DBSIZE reply from {}", client.addr()))
    })
}
