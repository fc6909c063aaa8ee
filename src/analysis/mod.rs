//! Whole-keyspace analysis built on top of the cluster scanner.
//!
//! [`AnalysisRunner`] pages through every node with continue-on-error,
//! keeps a per-node ledger of the counters and feeds the collected keys
//! to [`DatabaseAnalyzer`] and the recommendation engines.

pub mod analyzer;
pub mod progress;
pub mod recommendations;

pub use analyzer::{
    DatabaseAnalysis, DatabaseAnalyzer, ExpirationGroup, NamespaceSummary, SimpleSummary,
    TypeTotal,
};
pub use progress::{aggregate, ScanProgress};
pub use recommendations::{
    dedup_recommendations, KeyRecommendations, Recommendation, RecommendationEngine,
};

use crate::client::{NodeAddr, NodeRegistry};
use crate::config::{ErrorMode, ScanConfig};
use crate::error::{KeyscopeError, Result};
use crate::keyinfo::KeyInfo;
use crate::observability::ScanMetrics;
use crate::scan::{CancelSignal, ClusterScanner, NodeFailure, NodeScanState, ScanFilter};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_DELIMITER: &str = ":";

/// Outcome of an analysis run
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    #[serde(flatten)]
    pub analysis: DatabaseAnalysis,
    pub progress: ScanProgress,
    /// Counters accumulated per node over all pages
    pub nodes: Vec<NodeScanState>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<NodeFailure>,
    pub recommendations: Vec<Recommendation>,
    pub cancelled: bool,
}

pub struct AnalysisRunner<'a> {
    registry: &'a NodeRegistry,
    config: ScanConfig,
    delimiter: String,
    engines: Vec<Box<dyn RecommendationEngine>>,
    metrics: Option<Arc<ScanMetrics>>,
}

impl<'a> AnalysisRunner<'a> {
    /// Failed nodes never abort an analysis, whatever `config` says
    pub fn new(registry: &'a NodeRegistry, mut config: ScanConfig) -> Self {
        config.error_mode = ErrorMode::Continue;
        Self {
            registry,
            config,
            delimiter: DEFAULT_DELIMITER.to_string(),
            engines: vec![Box::new(KeyRecommendations)],
            metrics: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Add an engine; its recommendations follow the built-in ones
    pub fn with_engine(mut self, engine: Box<dyn RecommendationEngine>) -> Self {
        self.engines.push(engine);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ScanMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Scan every node to the end (or until `cancel` fires) and summarise
    pub async fn run(&self, filter: &ScanFilter, cancel: &CancelSignal) -> Result<AnalysisReport> {
        let mut scanner = ClusterScanner::new(self.registry, self.config.clone());
        if let Some(metrics) = &self.metrics {
            scanner = scanner.with_metrics(Arc::clone(metrics));
        }

        let mut token: Option<String> = None;
        let mut ledger: Vec<NodeScanState> = Vec::new();
        let mut keys: Vec<KeyInfo> = Vec::new();
        let mut failures = Vec::new();
        let mut cancelled = false;
        let mut pages = 0u64;

        loop {
            let page = match scanner
                .start_or_resume_scan(token.as_deref(), filter, cancel)
                .await
            {
                Ok(page) => page,
                // The nodes still being walked all went down on a later page
                Err(KeyscopeError::AllNodesFailed { failures: lost }) if pages > 0 => {
                    warn!("Every remaining node failed, finishing with partial results");
                    mark_failed(&mut ledger, &lost);
                    failures.extend(lost);
                    break;
                }
                Err(e) => return Err(e),
            };
            pages += 1;

            merge_into(&mut ledger, page.nodes);
            keys.extend(page.keys);
            failures.extend(page.failures);

            if page.cancelled {
                cancelled = true;
                break;
            }
            if page.complete {
                break;
            }
            token = Some(page.cursor);
        }

        // Keys of a node that failed later are dropped with its counters
        let failed: HashSet<&NodeAddr> = ledger
            .iter()
            .filter(|state| state.error.is_some())
            .map(|state| &state.node)
            .collect();
        keys.retain(|key| key.node.as_ref().map_or(true, |node| !failed.contains(node)));

        let progress = aggregate(&ledger);
        let analysis = DatabaseAnalyzer::new().analyze(&keys, &self.delimiter);
        let recommendations = dedup_recommendations(
            self.engines
                .iter()
                .flat_map(|engine| engine.recommend(&keys, progress.total)),
        );

        info!(
            "Analysis finished after {} page(s): {} keys, {} failed node(s), {} recommendation(s){}",
            pages,
            keys.len(),
            failures.len(),
            recommendations.len(),
            if cancelled { ", cancelled" } else { "" }
        );

        Ok(AnalysisReport {
            analysis,
            progress,
            nodes: ledger,
            failures,
            recommendations,
            cancelled,
        })
    }
}

/// Analyse with the default batch configuration
pub async fn run_analysis(
    registry: &NodeRegistry,
    filter: &ScanFilter,
    delimiter: &str,
    cancel: &CancelSignal,
) -> Result<AnalysisReport> {
    AnalysisRunner::new(registry, ScanConfig::for_analysis())
        .with_delimiter(delimiter)
        .run(filter, cancel)
        .await
}

/// Fold one page's node states into the running ledger. Counters add up,
/// the total is the latest reading and an error sticks.
fn merge_into(ledger: &mut Vec<NodeScanState>, page: Vec<NodeScanState>) {
    for state in page {
        match ledger.iter_mut().find(|entry| entry.node == state.node) {
            Some(entry) => {
                entry.cursor = state.cursor;
                entry.started = state.started;
                entry.scanned += state.scanned;
                entry.processed += state.processed;
                entry.total = state.total;
                if state.error.is_some() {
                    entry.error = state.error;
                }
            }
            None => ledger.push(state),
        }
    }
}

fn mark_failed(ledger: &mut [NodeScanState], failures: &[NodeFailure]) {
    for failure in failures {
        if let Some(entry) = ledger.iter_mut().find(|entry| entry.node == failure.node) {
            entry.error = Some(failure.message.clone());
        }
    }
}
