use super::cursor;
use super::filter::ScanFilter;
use super::node::{fetch_total, scan_node, NodeScanState};
use crate::analysis::{aggregate, ScanProgress};
use crate::client::{with_timeout, NodeAddr, NodeClient, NodeRegistry};
use crate::config::{ErrorMode, ScanConfig};
use crate::error::{KeyscopeError, Result};
use crate::keyinfo::{KeyEnricher, KeyInfo, KeyRef, SizeMode};
use crate::observability::ScanMetrics;
use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cooperative cancellation shared between a scan and its owner.
///
/// Checked between rounds; calls already in flight are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A node skipped in continue-on-error mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeFailure {
    pub node: NodeAddr,
    pub message: String,
    pub timed_out: bool,
}

/// Result of one scan request
#[derive(Debug, Clone, Serialize)]
pub struct ScanPage {
    /// Token to pass back to continue the scan
    pub cursor: String,
    /// Keys in node enumeration order
    pub keys: Vec<KeyInfo>,
    pub nodes: Vec<NodeScanState>,
    pub progress: ScanProgress,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<NodeFailure>,
    pub cancelled: bool,
    /// Every node has been walked to the end (or skipped)
    pub complete: bool,
}

impl ScanPage {
    /// Page answered for a token whose nodes are all exhausted
    fn finished(cursor: String) -> Self {
        Self {
            cursor,
            keys: Vec::new(),
            nodes: Vec::new(),
            progress: ScanProgress::default(),
            failures: Vec::new(),
            cancelled: false,
            complete: true,
        }
    }
}

/// Drives SCAN across every node of a registry and merges the results
pub struct ClusterScanner<'a> {
    registry: &'a NodeRegistry,
    config: ScanConfig,
    enricher: KeyEnricher,
    metrics: Option<Arc<ScanMetrics>>,
}

impl<'a> ClusterScanner<'a> {
    pub fn new(registry: &'a NodeRegistry, config: ScanConfig) -> Self {
        let enricher = KeyEnricher::from_config(&config);
        Self {
            registry,
            config,
            enricher,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ScanMetrics>) -> Self {
        self.enricher = self.enricher.with_metrics(Arc::clone(&metrics));
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Node states a request starts from.
    ///
    /// No token (or `"0"`) starts every node of the topology at cursor 0;
    /// otherwise the token is decoded and exhausted nodes are left out.
    pub fn initial_states(&self, token: Option<&str>) -> Result<Vec<NodeScanState>> {
        match token {
            None | Some("") | Some("0") => Ok(self
                .registry
                .nodes()
                .into_iter()
                .map(NodeScanState::new)
                .collect()),
            Some(token) => cursor::decode(token),
        }
    }

    /// Run one request: resume from `token`, scan until the page is full,
    /// the scan budget is spent, every node is done or `cancel` fires.
    pub async fn start_or_resume_scan(
        &self,
        token: Option<&str>,
        filter: &ScanFilter,
        cancel: &CancelSignal,
    ) -> Result<ScanPage> {
        let mut states = self.initial_states(token)?;
        if states.is_empty() {
            debug!("Cursor has no nodes left to scan");
            return Ok(ScanPage::finished(token.unwrap_or_default().to_string()));
        }

        let mut failures = Vec::new();
        self.load_totals(&mut states).await;

        let mut cancelled = false;
        let keys = match filter.exact_key() {
            Some(name) => {
                self.find_exact(&mut states, name, filter, &mut failures)
                    .await?
            }
            None => {
                let active: Vec<usize> = states
                    .iter()
                    .enumerate()
                    .filter(|(_, state)| !state.is_finished())
                    .map(|(i, _)| i)
                    .collect();

                cancelled = self
                    .scan_rounds(&mut states, filter, &mut failures, cancel)
                    .await?;
                let keys = self
                    .collect_keys(&mut states, filter, &mut failures)
                    .await?;

                if !active.is_empty() && active.iter().all(|&i| states[i].error.is_some()) {
                    warn!("All {} node(s) of the request failed", active.len());
                    return Err(KeyscopeError::AllNodesFailed { failures });
                }
                keys
            }
        };

        let cursor = cursor::encode(&states);
        let complete = states.iter().all(NodeScanState::is_finished);
        let progress = aggregate(&states);

        info!(
            "Scan page: {} keys from {} node(s), scanned {} of {}{}",
            keys.len(),
            states.len(),
            progress.scanned,
            progress.total,
            if cancelled { " (cancelled)" } else { "" }
        );

        Ok(ScanPage {
            cursor,
            keys,
            nodes: states,
            progress,
            failures,
            cancelled,
            complete,
        })
    }

    fn page_size(&self, filter: &ScanFilter) -> u64 {
        match filter.count {
            Some(count) if count > 0 => count,
            _ => self.config.count_default,
        }
    }

    /// Read `DBSIZE` of every node; empty nodes are finished without a SCAN
    async fn load_totals(&self, states: &mut [NodeScanState]) {
        let totals = join_all(states.iter().map(|state| {
            self.call_node(&state.node, |client| async move {
                fetch_total(client.as_ref()).await
            })
        }))
        .await;

        for (state, total) in states.iter_mut().zip(totals) {
            match total {
                Ok(0) => {
                    state.total = 0;
                    state.mark_exhausted();
                }
                Ok(total) => state.total = total,
                Err(e) => {
                    warn!("Could not read the key count of {}: {}", state.node, e);
                    state.total = 0;
                }
            }
        }
    }

    /// Scan rounds until a stop condition holds; returns whether the run
    /// was cancelled
    async fn scan_rounds(
        &self,
        states: &mut [NodeScanState],
        filter: &ScanFilter,
        failures: &mut Vec<NodeFailure>,
        cancel: &CancelSignal,
    ) -> Result<bool> {
        let count = self.page_size(filter);
        let per_call = self.config.count_per_call(count);
        let pattern = filter.pattern();
        let key_type = filter.key_type.as_ref();
        let mut found = 0u64;

        loop {
            if cancel.is_cancelled() {
                info!("Scan cancelled after {} keys", found);
                return Ok(true);
            }

            let active: Vec<usize> = states
                .iter()
                .enumerate()
                .filter(|(_, state)| !state.is_finished())
                .map(|(i, _)| i)
                .collect();
            if active.is_empty() {
                return Ok(false);
            }

            // One in-flight SCAN per node, all nodes at once
            let results = join_all(active.iter().map(|&i| {
                let cursor = states[i].cursor;
                self.call_node(&states[i].node, move |client| async move {
                    scan_node(client.as_ref(), cursor, per_call, Some(pattern), key_type).await
                })
            }))
            .await;

            if let Some(metrics) = &self.metrics {
                metrics.rounds.inc();
            }

            for (i, result) in active.into_iter().zip(results) {
                let state = &mut states[i];
                match result {
                    Ok(page) => {
                        if let Some(metrics) = &self.metrics {
                            metrics.record_scan(per_call);
                        }
                        found += page.keys.len() as u64;
                        state.advance(page, per_call);
                    }
                    Err(e) => self.node_failed(state, "SCAN", e, failures)?,
                }
            }

            let scanned: u64 = states.iter().map(|state| state.scanned).sum();
            if found >= count || scanned >= self.config.count_threshold {
                return Ok(false);
            }
        }
    }

    /// Turn the discovered key names into the page, one enrichment batch
    /// per node
    async fn collect_keys(
        &self,
        states: &mut [NodeScanState],
        filter: &ScanFilter,
        failures: &mut Vec<NodeFailure>,
    ) -> Result<Vec<KeyInfo>> {
        if !filter.keys_info {
            let mut keys = Vec::new();
            for state in states.iter_mut() {
                state.processed += state.keys.len() as u64;
                keys.extend(state.keys.drain(..).map(|key| {
                    KeyInfo::name_only(key.name, filter.key_type.clone()).with_node(key.node)
                }));
            }
            return Ok(keys);
        }

        let pending: Vec<usize> = states
            .iter()
            .enumerate()
            .filter(|(_, state)| !state.keys.is_empty())
            .map(|(i, _)| i)
            .collect();

        let batches = join_all(pending.iter().map(|&i| {
            let state = &states[i];
            self.call_node(&state.node, move |client| async move {
                self.enricher
                    .enrich_keys(
                        client.as_ref(),
                        &state.keys,
                        filter.key_type.as_ref(),
                        filter.size_mode,
                    )
                    .await
            })
        }))
        .await;

        let mut keys = Vec::new();
        for (i, batch) in pending.into_iter().zip(batches) {
            let state = &mut states[i];
            match batch {
                Ok(infos) => {
                    state.keys.clear();
                    state.processed += infos.len() as u64;
                    keys.extend(infos);
                }
                Err(e) => self.node_failed(state, "PIPELINE", e, failures)?,
            }
        }
        Ok(keys)
    }

    /// Look a single key up on the node that owns it instead of scanning.
    /// Without a slot map for the key every node is asked.
    async fn find_exact(
        &self,
        states: &mut [NodeScanState],
        name: Bytes,
        filter: &ScanFilter,
        failures: &mut Vec<NodeFailure>,
    ) -> Result<Vec<KeyInfo>> {
        for state in states.iter_mut() {
            state.scanned = state.total;
            state.mark_exhausted();
        }

        let candidates: Vec<NodeAddr> = match self.registry.topology().owner_of(&name) {
            Some(owner) => vec![owner.clone()],
            None => states.iter().map(|state| state.node.clone()).collect(),
        };
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            "Looking up key {} on {} node(s)",
            String::from_utf8_lossy(&name),
            candidates.len()
        );

        let mode = if filter.keys_info {
            filter.size_mode
        } else {
            SizeMode::Skip
        };
        let lookups = join_all(candidates.iter().map(|node| {
            let key = KeyRef::new(name.clone(), node.clone());
            self.call_node(node, move |client| {
                let key = key.clone();
                async move {
                    self.enricher
                        .enrich_keys(client.as_ref(), std::slice::from_ref(&key), None, mode)
                        .await
                }
            })
        }))
        .await;

        let mut keys = Vec::new();
        let mut failed = 0;
        for (node, lookup) in candidates.iter().zip(lookups) {
            let mut detached = NodeScanState::new(node.clone());
            let state = states
                .iter_mut()
                .find(|state| state.node == *node)
                .unwrap_or(&mut detached);

            match lookup {
                Ok(infos) => {
                    let found: Vec<KeyInfo> = infos
                        .into_iter()
                        .filter(|info| match &filter.key_type {
                            Some(wanted) => info.key_type.as_ref() == Some(wanted),
                            None => true,
                        })
                        .map(|info| {
                            if filter.keys_info {
                                info
                            } else {
                                KeyInfo::name_only(info.name, info.key_type)
                                    .with_node(node.clone())
                            }
                        })
                        .collect();
                    state.processed = found.len() as u64;
                    keys.extend(found);
                }
                Err(e) => {
                    failed += 1;
                    self.node_failed(state, "PIPELINE", e, failures)?;
                }
            }
        }

        if failed == candidates.len() {
            return Err(KeyscopeError::AllNodesFailed {
                failures: std::mem::take(failures),
            });
        }
        Ok(keys)
    }

    /// Call a node under the configured timeout, retrying failed attempts
    async fn call_node<T, F, Fut>(&self, node: &NodeAddr, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn NodeClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let client = self.registry.client(node)?;
        let mut attempt = 0;
        loop {
            match with_timeout(node, self.config.node_timeout(), op(Arc::clone(&client))).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.config.retries && e.is_node_failure() => {
                    attempt += 1;
                    debug!(
                        "Retrying {} ({}/{}) after: {}",
                        node, attempt, self.config.retries, e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply the error policy to a failed node
    fn node_failed(
        &self,
        state: &mut NodeScanState,
        command: &str,
        error: KeyscopeError,
        failures: &mut Vec<NodeFailure>,
    ) -> Result<()> {
        let timed_out = error.is_timeout();
        if let Some(metrics) = &self.metrics {
            metrics.record_failure(command, timed_out);
        }

        match self.config.error_mode {
            ErrorMode::Abort => Err(match error {
                e @ (KeyscopeError::Timeout { .. } | KeyscopeError::NodeScan { .. }) => e,
                other => KeyscopeError::NodeScan {
                    node: state.node.clone(),
                    message: other.to_string(),
                },
            }),
            ErrorMode::Continue => {
                let message = error.to_string();
                warn!("Skipping node {}: {}", state.node, message);
                state.keys.clear();
                state.error = Some(message.clone());
                failures.push(NodeFailure {
                    node: state.node.clone(),
                    message,
                    timed_out,
                });
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockKey, MockNode};
    use crate::keyinfo::{KeySize, RedisDataType};
    use std::time::Duration;

    fn keys(prefix: &str, n: usize) -> Vec<MockKey> {
        (0..n)
            .map(|i| MockKey::string(format!("{}:{}", prefix, i)))
            .collect()
    }

    fn cluster(nodes: &[Arc<MockNode>]) -> NodeRegistry {
        NodeRegistry::with_clients(
            nodes
                .iter()
                .map(|node| Arc::clone(node) as Arc<dyn NodeClient>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_scans_each_node_until_exhausted() {
        let nodes = [
            Arc::new(MockNode::new("172.1.0.1", 7000).with_keys(keys("a", 3))),
            Arc::new(MockNode::new("172.1.0.1", 7001).with_keys(keys("b", 2))),
            Arc::new(MockNode::new("172.1.0.1", 7002).with_keys(keys("c", 1))),
        ];
        let registry = cluster(&nodes);
        let config = ScanConfig {
            max_count_per_call: 1,
            ..ScanConfig::default()
        };
        let scanner = ClusterScanner::new(&registry, config);

        let page = scanner
            .start_or_resume_scan(None, &ScanFilter::new().with_count(15), &CancelSignal::new())
            .await
            .unwrap();

        let calls: Vec<usize> = nodes.iter().map(|n| n.command_count("SCAN")).collect();
        assert_eq!(calls, vec![3, 2, 1]);
        assert_eq!(page.keys.len(), 6);
        // Node enumeration order, not interleaved
        assert_eq!(page.keys[0].name_str(), "a:0");
        assert_eq!(page.keys[3].name_str(), "b:0");
        assert_eq!(page.keys[5].name_str(), "c:0");
        assert!(page.complete);
        assert_eq!(
            page.cursor,
            "172.1.0.1:7000@-1||172.1.0.1:7001@-1||172.1.0.1:7002@-1"
        );
        assert_eq!(
            page.progress,
            ScanProgress {
                scanned: 6,
                processed: 6,
                total: 6,
            }
        );
    }

    #[tokio::test]
    async fn test_stops_at_scan_threshold() {
        let node = Arc::new(MockNode::new("127.0.0.1", 6379).with_keys(keys("other", 20_000)));
        let registry = cluster(&[Arc::clone(&node)]);
        let scanner = ClusterScanner::new(&registry, ScanConfig::default());

        let filter = ScanFilter::new().with_match("user:*").with_count(100);
        let page = scanner
            .start_or_resume_scan(None, &filter, &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(node.command_count("SCAN"), 100);
        assert!(page.keys.is_empty());
        assert_eq!(page.progress.scanned, 10_000);
        assert_eq!(page.cursor, "127.0.0.1:6379@10000");
        assert!(!page.complete);
    }

    #[tokio::test]
    async fn test_empty_nodes_are_not_scanned() {
        let nodes = [
            Arc::new(MockNode::new("172.1.0.1", 7000)),
            Arc::new(MockNode::new("172.1.0.1", 7001)),
        ];
        let registry = cluster(&nodes);
        let scanner = ClusterScanner::new(&registry, ScanConfig::default());

        let page = scanner
            .start_or_resume_scan(None, &ScanFilter::new(), &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(nodes[0].command_count("SCAN"), 0);
        assert_eq!(nodes[1].command_count("SCAN"), 0);
        assert!(page.complete);
        assert_eq!(page.progress, ScanProgress::default());
    }

    #[tokio::test]
    async fn test_exhausted_token_is_returned_unchanged() {
        let node = Arc::new(MockNode::new("172.1.0.1", 7000).with_keys(keys("a", 3)));
        let registry = cluster(&[Arc::clone(&node)]);
        let scanner = ClusterScanner::new(&registry, ScanConfig::default());

        let token = "172.1.0.1:7000@-1||172.1.0.1:7001@-1";
        let page = scanner
            .start_or_resume_scan(Some(token), &ScanFilter::new(), &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(page.cursor, token);
        assert!(page.complete);
        assert!(node.commands().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_token() {
        let registry = cluster(&[Arc::new(MockNode::new("172.1.0.1", 7000))]);
        let scanner = ClusterScanner::new(&registry, ScanConfig::default());

        let err = scanner
            .start_or_resume_scan(
                Some("172.1.0.1asd00@0||172.1.0.1:7001@0"),
                &ScanFilter::new(),
                &CancelSignal::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KeyscopeError::MalformedCursor(_)));
    }

    #[tokio::test]
    async fn test_abort_mode_fails_whole_request() {
        let node = Arc::new(MockNode::new("172.1.0.1", 7000).with_keys(keys("a", 3)));
        node.fail_command("SCAN", "NOPERM this user has no permissions");
        let registry = cluster(&[Arc::clone(&node)]);
        let scanner = ClusterScanner::new(&registry, ScanConfig::default());

        let err = scanner
            .start_or_resume_scan(None, &ScanFilter::new(), &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, KeyscopeError::NodeScan { ref message, .. } if message.contains("NOPERM")));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_one_failure() {
        let node = Arc::new(MockNode::new("172.1.0.1", 7000).with_keys(keys("a", 3)));
        node.fail_command_times("SCAN", 1, "LOADING Redis is loading the dataset in memory");
        let registry = cluster(&[Arc::clone(&node)]);
        let config = ScanConfig {
            retries: 1,
            ..ScanConfig::default()
        };
        let scanner = ClusterScanner::new(&registry, config);

        let page = scanner
            .start_or_resume_scan(None, &ScanFilter::new(), &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(page.keys.len(), 3);
        assert_eq!(node.command_count("SCAN"), 2);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_node() {
        let slow = Arc::new(
            MockNode::new("172.1.0.1", 7001)
                .with_keys(keys("b", 2))
                .with_delay(Duration::from_millis(500)),
        );
        let fast = Arc::new(MockNode::new("172.1.0.1", 7000).with_keys(keys("a", 2)));
        let registry = cluster(&[Arc::clone(&fast), Arc::clone(&slow)]);
        let config = ScanConfig {
            node_timeout_ms: 50,
            ..ScanConfig::for_analysis()
        };
        let scanner = ClusterScanner::new(&registry, config);

        let page = scanner
            .start_or_resume_scan(None, &ScanFilter::new(), &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(page.keys.len(), 2);
        assert_eq!(page.failures.len(), 1);
        assert!(page.failures[0].timed_out);
        assert_eq!(page.cursor, "172.1.0.1:7000@-1||172.1.0.1:7001@-1");
    }

    #[tokio::test]
    async fn test_every_node_failing_is_fatal_in_continue_mode() {
        let nodes = [
            Arc::new(MockNode::new("172.1.0.1", 7000).with_keys(keys("a", 2))),
            Arc::new(MockNode::new("172.1.0.1", 7001).with_keys(keys("b", 2))),
            Arc::new(MockNode::new("172.1.0.1", 7002).with_keys(keys("c", 2))),
        ];
        nodes.iter().for_each(|node| node.disconnect());
        let registry = cluster(&nodes);
        let scanner = ClusterScanner::new(&registry, ScanConfig::for_analysis());

        let err = scanner
            .start_or_resume_scan(None, &ScanFilter::new(), &CancelSignal::new())
            .await
            .unwrap_err();
        match err {
            KeyscopeError::AllNodesFailed { failures } => {
                let failed: Vec<u16> = failures.iter().map(|f| f.node.port).collect();
                assert_eq!(failed, vec![7000, 7001, 7002]);
            }
            other => panic!("unexpected error: {}", other),
        }

        // An exact lookup whose only candidate is down fails the same way
        let single = cluster(&[Arc::clone(&nodes[0])]);
        let err = ClusterScanner::new(&single, ScanConfig::for_analysis())
            .start_or_resume_scan(None, &ScanFilter::new().with_match("a:1"), &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, KeyscopeError::AllNodesFailed { ref failures } if failures.len() == 1));
    }

    #[tokio::test]
    async fn test_exact_key_without_slot_map_asks_every_node() {
        let nodes = [
            Arc::new(MockNode::new("172.1.0.1", 7000).with_keys(keys("a", 2))),
            Arc::new(MockNode::new("172.1.0.1", 7001).with_keys(keys("b", 2))),
            Arc::new(
                MockNode::new("172.1.0.1", 7002)
                    .with_keys(vec![MockKey::new("foo", "set").with_length(4)]),
            ),
        ];
        let registry = cluster(&nodes);
        let scanner = ClusterScanner::new(&registry, ScanConfig::default());

        let page = scanner
            .start_or_resume_scan(None, &ScanFilter::new().with_match("foo"), &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(page.keys.len(), 1);
        assert_eq!(page.keys[0].length, Some(4));
        assert_eq!(page.keys[0].node, Some(NodeAddr::new("172.1.0.1", 7002)));
        assert!(nodes.iter().all(|n| n.command_count("SCAN") == 0));
        assert!(nodes.iter().all(|n| !n.pipelines().is_empty()));

        let processed: Vec<u64> = page.nodes.iter().map(|state| state.processed).collect();
        assert_eq!(processed, vec![0, 0, 1]);
        assert!(page.complete);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_round() {
        let node = Arc::new(MockNode::new("172.1.0.1", 7000).with_keys(keys("a", 3)));
        let registry = cluster(&[Arc::clone(&node)]);
        let scanner = ClusterScanner::new(&registry, ScanConfig::default());

        let cancel = CancelSignal::new();
        cancel.cancel();
        let page = scanner
            .start_or_resume_scan(None, &ScanFilter::new(), &cancel)
            .await
            .unwrap();

        assert!(page.cancelled);
        assert!(!page.complete);
        assert_eq!(page.cursor, "172.1.0.1:7000@0");
        assert_eq!(node.command_count("SCAN"), 0);
    }

    #[tokio::test]
    async fn test_names_only() {
        let node = Arc::new(MockNode::new("172.1.0.1", 7000).with_keys(keys("a", 3)));
        let registry = cluster(&[Arc::clone(&node)]);
        let scanner = ClusterScanner::new(&registry, ScanConfig::default());

        let filter = ScanFilter::new()
            .with_type(RedisDataType::String)
            .names_only();
        let page = scanner
            .start_or_resume_scan(None, &filter, &CancelSignal::new())
            .await
            .unwrap();

        assert!(node.pipelines().is_empty());
        assert_eq!(page.keys.len(), 3);
        assert_eq!(page.keys[0].key_type, Some(RedisDataType::String));
        assert_eq!(page.keys[0].ttl, None);
    }

    #[tokio::test]
    async fn test_exact_key_skips_scan() {
        let node = Arc::new(MockNode::new("127.0.0.1", 6379).with_keys(vec![
            MockKey::string("testString*").with_memory(Some(50)),
            MockKey::string("other"),
        ]));
        let registry = cluster(&[Arc::clone(&node)]);
        let scanner = ClusterScanner::new(&registry, ScanConfig::default());

        let filter = ScanFilter::new().with_match("testString\\*");
        let page = scanner
            .start_or_resume_scan(None, &filter, &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(node.command_count("SCAN"), 0);
        assert_eq!(page.keys.len(), 1);
        assert_eq!(page.keys[0].name_str(), "testString*");
        assert_eq!(page.keys[0].size, Some(KeySize::Measured(50)));
        assert_eq!(page.nodes[0].scanned, 2);
        assert_eq!(page.nodes[0].total, 2);
        assert!(page.complete);

        let wrong_type = ScanFilter::new()
            .with_match("testString\\*")
            .with_type(RedisDataType::Hash);
        let page = scanner
            .start_or_resume_scan(None, &wrong_type, &CancelSignal::new())
            .await
            .unwrap();
        assert!(page.keys.is_empty());
    }
}
