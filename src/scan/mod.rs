//! Cluster-wide key scanning.
//!
//! A request walks every master with `SCAN` in rounds, stops once it has
//! enough keys or has walked its budget, and hands back a composite cursor
//! the caller uses to continue where it left off.

pub mod cursor;
pub mod filter;
pub mod node;
pub mod orchestrator;

pub use cursor::{decode, encode, is_valid, CURSOR_SEPARATOR, EXHAUSTED_CURSOR};
pub use filter::{is_glob_pattern, unescape_glob, ScanFilter};
pub use node::{fetch_total, scan_node, NodeScanPage, NodeScanState};
pub use orchestrator::{CancelSignal, ClusterScanner, NodeFailure, ScanPage};
