//! Cluster-aware Redis key scanning.
//!
//! Scans every master of a cluster (or a single standalone server) with
//! `SCAN`, enriches keys with type, TTL, length and memory, and packs the
//! per-node cursors into one resumable token.

pub mod analysis;
pub mod client;
pub mod config;
pub mod error;
pub mod keyinfo;
pub mod observability;
pub mod scan;

pub use analysis::{run_analysis, AnalysisReport, AnalysisRunner, ScanProgress};
pub use client::{NodeAddr, NodeClient, NodeRegistry, RedisNodeClient, Topology};
pub use config::{Config, ErrorMode, ScanConfig};
pub use error::{KeyscopeError, Result};
pub use keyinfo::{KeyInfo, KeySize, RedisDataType, SizeMode};
pub use scan::{CancelSignal, ClusterScanner, ScanFilter, ScanPage};
