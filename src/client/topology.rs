//! Cluster topology: which nodes own which hash slots.
//!
//! Keys are routed with the Redis Cluster CRC16 algorithm so a single key
//! can be looked up on its owning shard without scanning.

use super::{NodeAddr, NodeClient};
use crate::error::{KeyscopeError, Result};
use serde::Serialize;
use tracing::debug;

/// Total number of slots in Redis Cluster (16384)
pub const SLOT_COUNT: u16 = 16384;

/// CRC16 lookup table for CCITT polynomial (0x1021)
const CRC16_TABLE: [u16; 256] = [
    0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50a5, 0x60c6, 0x70e7, 0x8108, 0x9129, 0xa14a, 0xb16b,
    0xc18c, 0xd1ad, 0xe1ce, 0xf1ef, 0x1231, 0x0210, 0x3273, 0x2252, 0x52b5, 0x4294, 0x72f7, 0x62d6,
    0x9339, 0x8318, 0xb37b, 0xa35a, 0xd3bd, 0xc39c, 0xf3ff, 0xe3de, 0x2462, 0x3443, 0x0420, 0x1401,
    0x64e6, 0x74c7, 0x44a4, 0x5485, 0xa56a, 0xb54b, 0x8528, 0x9509, 0xe5ee, 0xf5cf, 0xc5ac, 0xd58d,
    0x3653, 0x2672, 0x1611, 0x0630, 0x76d7, 0x66f6, 0x5695, 0x46b4, 0xb75b, 0xa77a, 0x9719, 0x8738,
    0xf7df, 0xe7fe, 0xd79d, 0xc7bc, 0x48c4, 0x58e5, 0x6886, 0x78a7, 0x0840, 0x1861, 0x2802, 0x3823,
    0xc9cc, 0xd9ed, 0xe98e, 0xf9af, 0x8948, 0x9969, 0xa90a, 0xb92b, 0x5af5, 0x4ad4, 0x7ab7, 0x6a96,
    0x1a71, 0x0a50, 0x3a33, 0x2a12, 0xdbfd, 0xcbdc, 0xfbbf, 0xeb9e, 0x9b79, 0x8b58, 0xbb3b, 0xab1a,
    0x6ca6, 0x7c87, 0x4ce4, 0x5cc5, 0x2c22, 0x3c03, 0x0c60, 0x1c41, 0xedae, 0xfd8f, 0xcdec, 0xddcd,
    0xad2a, 0xbd0b, 0x8d68, 0x9d49, 0x7e97, 0x6eb6, 0x5ed5, 0x4ef4, 0x3e13, 0x2e32, 0x1e51, 0x0e70,
    0xff9f, 0xefbe, 0xdfdd, 0xcffc, 0xbf1b, 0xaf3a, 0x9f59, 0x8f78, 0x9188, 0x81a9, 0xb1ca, 0xa1eb,
    0xd10c, 0xc12d, 0xf14e, 0xe16f, 0x1080, 0x00a1, 0x30c2, 0x20e3, 0x5004, 0x4025, 0x7046, 0x6067,
    0x83b9, 0x9398, 0xa3fb, 0xb3da, 0xc33d, 0xd31c, 0xe37f, 0xf35e, 0x02b1, 0x1290, 0x22f3, 0x32d2,
    0x4235, 0x5214, 0x6277, 0x7256, 0xb5ea, 0xa5cb, 0x95a8, 0x8589, 0xf56e, 0xe54f, 0xd52c, 0xc50d,
    0x34e2, 0x24c3, 0x14a0, 0x0481, 0x7466, 0x6447, 0x5424, 0x4405, 0xa7db, 0xb7fa, 0x8799, 0x97b8,
    0xe75f, 0xf77e, 0xc71d, 0xd73c, 0x26d3, 0x36f2, 0x0691, 0x16b0, 0x6657, 0x7676, 0x4615, 0x5634,
    0xd94c, 0xc96d, 0xf90e, 0xe92f, 0x99c8, 0x89e9, 0xb98a, 0xa9ab, 0x5844, 0x4865, 0x7806, 0x6827,
    0x18c0, 0x08e1, 0x3882, 0x28a3, 0xcb7d, 0xdb5c, 0xeb3f, 0xfb1e, 0x8bf9, 0x9bd8, 0xabbb, 0xbb9a,
    0x4a75, 0x5a54, 0x6a37, 0x7a16, 0x0af1, 0x1ad0, 0x2ab3, 0x3a92, 0xfd2e, 0xed0f, 0xdd6c, 0xcd4d,
    0xbdaa, 0xad8b, 0x9de8, 0x8dc9, 0x7c26, 0x6c07, 0x5c64, 0x4c45, 0x3ca2, 0x2c83, 0x1ce0, 0x0cc1,
    0xef1f, 0xff3e, 0xcf5d, 0xdf7c, 0xaf9b, 0xbfba, 0x8fd9, 0x9ff8, 0x6e17, 0x7e36, 0x4e55, 0x5e74,
    0x2e93, 0x3eb2, 0x0ed1, 0x1ef0,
];

/// Calculate the CRC16 hash of data using CCITT polynomial
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        let index = ((crc >> 8) as u8 ^ byte) as usize;
        crc = (crc << 8) ^ CRC16_TABLE[index];
    }
    crc
}

/// Extract the hash tag from a key.
///
/// Format: key{tag}suffix - only "tag" is used for hashing; an empty tag
/// is ignored and the whole key is hashed.
fn extract_hash_tag(key: &[u8]) -> Option<&[u8]> {
    let start = key.iter().position(|&b| b == b'{')?;
    let end = key[start + 1..].iter().position(|&b| b == b'}')?;

    if end > 0 {
        Some(&key[start + 1..start + 1 + end])
    } else {
        None
    }
}

/// Hash slot of a key (CRC16 mod 16384, honouring hash tags)
pub fn key_slot(key: &[u8]) -> u16 {
    let hash_key = extract_hash_tag(key).unwrap_or(key);
    crc16(hash_key) % SLOT_COUNT
}

/// One master node and the slot ranges it serves
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardInfo {
    pub addr: NodeAddr,
    /// Inclusive slot ranges
    pub slots: Vec<(u16, u16)>,
}

impl ShardInfo {
    pub fn new(addr: NodeAddr, slots: Vec<(u16, u16)>) -> Self {
        Self { addr, slots }
    }

    pub fn owns(&self, slot: u16) -> bool {
        self.slots
            .iter()
            .any(|&(start, end)| slot >= start && slot <= end)
    }
}

/// Shape of the deployment being scanned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// Standalone or sentinel-managed primary: one implicit node
    Standalone(NodeAddr),
    /// Cluster masters in enumeration order
    Cluster(Vec<ShardInfo>),
}

impl Topology {
    pub fn is_cluster(&self) -> bool {
        matches!(self, Topology::Cluster(_))
    }

    /// Node addresses in enumeration order
    pub fn nodes(&self) -> Vec<NodeAddr> {
        match self {
            Topology::Standalone(addr) => vec![addr.clone()],
            Topology::Cluster(shards) => shards.iter().map(|s| s.addr.clone()).collect(),
        }
    }

    /// Node serving `key`, if the slot map covers it
    pub fn owner_of(&self, key: &[u8]) -> Option<&NodeAddr> {
        match self {
            Topology::Standalone(addr) => Some(addr),
            Topology::Cluster(shards) => {
                let slot = key_slot(key);
                shards.iter().find(|s| s.owns(slot)).map(|s| &s.addr)
            }
        }
    }

    /// Ask `seed` for `CLUSTER NODES`; servers without cluster support are
    /// treated as standalone.
    pub async fn discover(seed: &dyn NodeClient) -> Result<Topology> {
        let mut command = redis::cmd("CLUSTER");
        command.arg("NODES");
        let reply = match seed.send_command(command).await {
            Ok(reply) => reply,
            Err(KeyscopeError::Reply(msg)) if msg.contains("cluster support disabled") => {
                debug!("{} is not a cluster node", seed.addr());
                return Ok(Topology::Standalone(seed.addr().clone()));
            }
            Err(e) => return Err(e),
        };

        let text: String = redis::from_redis_value(&reply).map_err(|_| {
            KeyscopeError::Protocol("unexpected CLUSTER NODES reply".to_string())
        })?;
        let shards = parse_cluster_nodes(&text, seed.addr())?;
        if shards.is_empty() {
            return Ok(Topology::Standalone(seed.addr().clone()));
        }
        Ok(Topology::Cluster(shards))
    }
}

/// Parse `CLUSTER NODES` output into healthy masters.
///
/// Replicas, failed masters, handshaking nodes and nodes without an
/// address are skipped. An empty host (a lone node reporting itself) is
/// replaced by the seed host.
pub fn parse_cluster_nodes(text: &str, seed: &NodeAddr) -> Result<Vec<ShardInfo>> {
    let mut shards = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            return Err(KeyscopeError::Protocol(format!(
                "malformed CLUSTER NODES line: {}",
                line
            )));
        }

        let flags: Vec<&str> = fields[2].split(',').collect();
        if !flags.contains(&"master")
            || flags
                .iter()
                .any(|f| matches!(*f, "fail" | "noaddr" | "handshake"))
        {
            continue;
        }

        // ip:port@cport[,hostname]
        let address = fields[1].split(',').next().unwrap_or_default();
        let address = address.split('@').next().unwrap_or_default();
        let mut addr: NodeAddr = match address.rsplit_once(':') {
            Some(("", port)) => NodeAddr::new(seed.host.clone(), parse_port(port, line)?),
            Some(_) => address.parse()?,
            None => continue,
        };
        if addr.port == 0 {
            continue;
        }
        if addr.host.is_empty() {
            addr.host = seed.host.clone();
        }

        let mut slots = Vec::new();
        for entry in &fields[8..] {
            // Migration markers look like [slot->-node] and are not owned yet
            if entry.starts_with('[') {
                continue;
            }
            let range = match entry.split_once('-') {
                Some((start, end)) => (parse_slot(start, line)?, parse_slot(end, line)?),
                None => {
                    let slot = parse_slot(entry, line)?;
                    (slot, slot)
                }
            };
            slots.push(range);
        }

        shards.push(ShardInfo::new(addr, slots));
    }

    Ok(shards)
}

fn parse_port(port: &str, line: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| KeyscopeError::Protocol(format!("invalid port in CLUSTER NODES line: {}", line)))
}

fn parse_slot(slot: &str, line: &str) -> Result<u16> {
    slot.parse::<u16>()
        .ok()
        .filter(|s| *s < SLOT_COUNT)
        .ok_or_else(|| KeyscopeError::Protocol(format!("invalid slot in CLUSTER NODES line: {}", line)))
}
