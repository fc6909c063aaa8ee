//! Scan statistics collection
//!
//! Counters are plain atomics shared by `Arc` between the orchestrator, the
//! enricher and whoever reports on a run.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Atomic counter for metrics
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Increment the counter by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the counter by a specific amount
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

/// Counters describing scan activity against the nodes
#[derive(Debug)]
pub struct ScanMetrics {
    /// Orchestrator rounds executed
    pub rounds: Counter,
    /// SCAN calls issued
    pub scan_calls: Counter,
    /// Pipelines sent by the enricher
    pub pipeline_calls: Counter,
    /// Sum of COUNT hints sent with SCAN
    pub keys_scanned: Counter,
    /// Keys returned with metadata
    pub keys_enriched: Counter,
    pub node_failures: Counter,
    pub timeouts: Counter,
    /// Node errors per command name
    errors_by_command: RwLock<BTreeMap<String, Counter>>,
    started: Instant,
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanMetrics {
    pub fn new() -> Self {
        Self {
            rounds: Counter::new(),
            scan_calls: Counter::new(),
            pipeline_calls: Counter::new(),
            keys_scanned: Counter::new(),
            keys_enriched: Counter::new(),
            node_failures: Counter::new(),
            timeouts: Counter::new(),
            errors_by_command: RwLock::new(BTreeMap::new()),
            started: Instant::now(),
        }
    }

    /// Record a SCAN call sent with the given COUNT hint
    pub fn record_scan(&self, count: u64) {
        self.scan_calls.inc();
        self.keys_scanned.inc_by(count);
    }

    /// Record a failed node call
    pub fn record_failure(&self, command: &str, timed_out: bool) {
        self.node_failures.inc();
        if timed_out {
            self.timeouts.inc();
        }

        let command_upper = command.to_uppercase();
        if let Ok(mut errors) = self.errors_by_command.write() {
            errors
                .entry(command_upper)
                .or_insert_with(Counter::new)
                .inc();
        }
    }

    pub fn errors_by_command(&self) -> BTreeMap<String, u64> {
        match self.errors_by_command.read() {
            Ok(errors) => errors.iter().map(|(k, v)| (k.clone(), v.get())).collect(),
            Err(_) => BTreeMap::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rounds: self.rounds.get(),
            scan_calls: self.scan_calls.get(),
            pipeline_calls: self.pipeline_calls.get(),
            keys_scanned: self.keys_scanned.get(),
            keys_enriched: self.keys_enriched.get(),
            node_failures: self.node_failures.get(),
            timeouts: self.timeouts.get(),
            errors_by_command: self.errors_by_command(),
            elapsed_ms: self.elapsed().as_millis() as u64,
        }
    }

    pub fn reset(&self) {
        self.rounds.reset();
        self.scan_calls.reset();
        self.pipeline_calls.reset();
        self.keys_scanned.reset();
        self.keys_enriched.reset();
        self.node_failures.reset();
        self.timeouts.reset();
        if let Ok(mut errors) = self.errors_by_command.write() {
            errors.clear();
        }
    }

    /// Export counters in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        let counters = [
            ("keyscope_rounds_total", "Orchestrator rounds", snapshot.rounds),
            ("keyscope_scan_calls_total", "SCAN calls", snapshot.scan_calls),
            ("keyscope_pipeline_calls_total", "Enrichment pipelines", snapshot.pipeline_calls),
            ("keyscope_keys_scanned_total", "Keys walked by SCAN", snapshot.keys_scanned),
            ("keyscope_keys_enriched_total", "Keys returned with metadata", snapshot.keys_enriched),
            ("keyscope_node_failures_total", "Failed node calls", snapshot.node_failures),
            ("keyscope_timeouts_total", "Timed out node calls", snapshot.timeouts),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, value));
        }

        if !snapshot.errors_by_command.is_empty() {
            output.push_str("# HELP keyscope_node_errors_total Failed node calls by command\n");
            output.push_str("# TYPE keyscope_node_errors_total counter\n");
            for (command, count) in &snapshot.errors_by_command {
                output.push_str(&format!(
                    "keyscope_node_errors_total{{command=\"{}\"}} {}\n",
                    command, count
                ));
            }
        }

        output
    }
}

/// Serializable copy of [`ScanMetrics`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub rounds: u64,
    pub scan_calls: u64,
    pub pipeline_calls: u64,
    pub keys_scanned: u64,
    pub keys_enriched: u64,
    pub node_failures: u64,
    pub timeouts: u64,
    pub errors_by_command: BTreeMap<String, u64>,
    pub elapsed_ms: u64,
}
