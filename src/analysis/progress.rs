use crate::scan::NodeScanState;
use serde::Serialize;

/// Counters summed over the nodes of a scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub scanned: u64,
    pub processed: u64,
    pub total: u64,
}

/// Recompute progress from scratch. Failed nodes are left out.
pub fn aggregate(states: &[NodeScanState]) -> ScanProgress {
    states
        .iter()
        .filter(|state| state.error.is_none())
        .fold(ScanProgress::default(), |acc, state| ScanProgress {
            scanned: acc.scanned + state.scanned,
            processed: acc.processed + state.processed,
            total: acc.total + state.total,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::NodeAddr;

    fn state(port: u16, scanned: u64, processed: u64, total: u64) -> NodeScanState {
        let mut state = NodeScanState::new(NodeAddr::new("127.0.0.1", port));
        state.scanned = scanned;
        state.processed = processed;
        state.total = total;
        state
    }

    #[test]
    fn test_aggregate_sums_nodes() {
        let states = vec![state(7000, 300, 3, 3000), state(7001, 200, 2, 2000)];
        assert_eq!(
            aggregate(&states),
            ScanProgress {
                scanned: 500,
                processed: 5,
                total: 5000,
            }
        );
    }

    #[test]
    fn test_aggregate_is_pure() {
        let states = vec![state(7000, 15, 1, 10), state(7001, 15, 0, 10)];
        assert_eq!(aggregate(&states), aggregate(&states));
    }

    #[test]
    fn test_failed_nodes_are_excluded() {
        let mut failed = state(7001, 100, 0, 1000);
        failed.error = Some("NOPERM".to_string());
        let states = vec![state(7000, 100, 4, 10), failed, state(7002, 100, 6, 20)];

        let progress = aggregate(&states);
        assert_eq!(progress.total, 30);
        assert_eq!(progress.processed, 10);
    }

    #[test]
    fn test_empty() {
        assert_eq!(aggregate(&[]), ScanProgress::default());
    }
}
