//! Batched, throttled merge of node and relationship writes.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{EventSink, PipelineEvent};
use crate::graph::{GraphStore, WriteSummary};
use crate::model::{NodeWrite, RelWrite};
use crate::reference::GraphWrites;
use crate::sequence::SequencePlan;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_PAUSE_EVERY: usize = 5000;
pub const DEFAULT_PAUSE_MS: u64 = 2000;

/// Batch sizing and throttling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Pause after every this many records; 0 disables pausing.
    pub pause_every: usize,
    pub pause_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            pause_every: DEFAULT_PAUSE_EVERY,
            pause_ms: DEFAULT_PAUSE_MS,
        }
    }
}

impl LoaderConfig {
    /// No throttling; used by tests and small loads.
    pub fn unthrottled(batch_size: usize) -> Self {
        Self {
            batch_size,
            pause_every: 0,
            pause_ms: 0,
        }
    }
}

/// Cumulative progress after one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadProgress {
    pub label: String,
    pub processed: usize,
    pub total: usize,
    pub percent: f64,
    pub elapsed_ms: u64,
    pub batch_ms: u64,
    /// Records per second for the last batch.
    pub batch_rate: f64,
    /// Records per second since the load started.
    pub avg_rate: f64,
    /// Remaining records over the average rate.
    pub eta_secs: Option<f64>,
}

impl LoadProgress {
    pub fn compute(
        label: &str,
        processed: usize,
        total: usize,
        batch_size: usize,
        batch_elapsed: Duration,
        elapsed: Duration,
    ) -> Self {
        let percent = if total == 0 {
            100.0
        } else {
            processed as f64 / total as f64 * 100.0
        };
        let rate = |n: usize, d: Duration| {
            let secs = d.as_secs_f64();
            if secs > 0.0 {
                n as f64 / secs
            } else {
                0.0
            }
        };
        let avg_rate = rate(processed, elapsed);
        let remaining = total.saturating_sub(processed);
        let eta_secs = if remaining == 0 {
            Some(0.0)
        } else if avg_rate > 0.0 {
            Some(remaining as f64 / avg_rate)
        } else {
            None
        };
        Self {
            label: label.to_string(),
            processed,
            total,
            percent,
            elapsed_ms: elapsed.as_millis() as u64,
            batch_ms: batch_elapsed.as_millis() as u64,
            batch_rate: rate(batch_size, batch_elapsed),
            avg_rate,
            eta_secs,
        }
    }
}

/// Summary of one load.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub label: String,
    pub total: usize,
    /// Records in batches the store accepted.
    pub written: usize,
    /// Records in batches the store rejected.
    pub discarded: usize,
    pub failed_batches: usize,
    pub created: usize,
    pub updated: usize,
    /// Relationships skipped because an endpoint is missing.
    pub unmatched: usize,
    pub duration_ms: u64,
    pub avg_rate: f64,
}

impl LoadReport {
    fn new(label: &str, total: usize) -> Self {
        Self {
            label: label.to_string(),
            total,
            ..Default::default()
        }
    }

    fn absorb(&mut self, summary: WriteSummary) {
        self.created += summary.created;
        self.updated += summary.updated;
        self.unmatched += summary.unmatched;
    }

    fn finish(&mut self, elapsed: Duration) {
        self.duration_ms = elapsed.as_millis() as u64;
        let secs = elapsed.as_secs_f64();
        self.avg_rate = if secs > 0.0 {
            self.written as f64 / secs
        } else {
            0.0
        };
    }

    pub fn is_clean(&self) -> bool {
        self.failed_batches == 0
    }
}

/// Reports of a workflow load.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SequenceLoad {
    pub nodes: LoadReport,
    pub relationships: LoadReport,
    pub links: LoadReport,
}

/// Writes batches into a [`GraphStore`], emitting progress as it goes.
///
/// A rejected batch is discarded and loading continues with the next one;
/// committed batches are never rolled back.
pub struct GraphLoader<'a, S: GraphStore + ?Sized> {
    store: &'a S,
    config: LoaderConfig,
    sink: &'a dyn EventSink,
}

impl<'a, S: GraphStore + ?Sized> GraphLoader<'a, S> {
    pub fn new(store: &'a S, config: LoaderConfig, sink: &'a dyn EventSink) -> Self {
        Self {
            store,
            config,
            sink,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn load_nodes(&self, label: &str, nodes: &[NodeWrite]) -> LoadReport {
        self.load_batches(label, nodes, |batch| self.store.upsert_nodes(batch))
    }

    pub fn load_relationships(&self, label: &str, rels: &[RelWrite]) -> LoadReport {
        self.load_batches(label, rels, |batch| self.store.upsert_relationships(batch))
    }

    /// Nodes first, then relationships, so every endpoint exists.
    pub fn load_writes(&self, label: &str, writes: &GraphWrites) -> (LoadReport, LoadReport) {
        let nodes = self.load_nodes(&format!("{label} nodes"), &writes.nodes);
        let rels =
            self.load_relationships(&format!("{label} relationships"), &writes.relationships);
        (nodes, rels)
    }

    /// Merge a reconstructed workflow: nodes, batched step links, then the
    /// cross-SFC links one by one.
    pub fn load_sequence(&self, plan: &SequencePlan) -> SequenceLoad {
        SequenceLoad {
            nodes: self.load_nodes("workflow nodes", &plan.nodes()),
            relationships: self.load_relationships("workflow steps", &plan.relationships()),
            links: self.link_each("workflow links", &plan.cross_sfc),
        }
    }

    /// Write relationships one call at a time. A failing write is reported
    /// and skipped.
    pub fn link_each(&self, label: &str, rels: &[RelWrite]) -> LoadReport {
        let start = Instant::now();
        let mut report = LoadReport::new(label, rels.len());
        for rel in rels {
            match self.store.upsert_relationships(std::slice::from_ref(rel)) {
                Ok(summary) => {
                    report.written += 1;
                    report.absorb(summary);
                }
                Err(e) => {
                    report.discarded += 1;
                    report.failed_batches += 1;
                    self.sink.emit(&PipelineEvent::LinkSkipped {
                        from: rel.from.to_string(),
                        to: rel.to.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report.finish(start.elapsed());
        if report.unmatched > 0 {
            warn!(
                "[{}] {} links skipped: endpoint not found",
                label, report.unmatched
            );
        }
        info!(
            "[{}] linked {}/{} ({} failed)",
            label, report.written, report.total, report.discarded
        );
        report
    }

    fn load_batches<T, F>(&self, label: &str, items: &[T], write: F) -> LoadReport
    where
        F: Fn(&[T]) -> Result<WriteSummary>,
    {
        let start = Instant::now();
        let total = items.len();
        let batch_size = self.config.batch_size.max(1);
        let mut report = LoadReport::new(label, total);
        let mut processed = 0usize;

        for (index, batch) in items.chunks(batch_size).enumerate() {
            let offset = index * batch_size;
            let batch_start = Instant::now();
            let result = write(batch);
            processed += batch.len();
            match result {
                Ok(summary) => {
                    report.written += batch.len();
                    report.absorb(summary);
                    debug!(
                        "[{}] batch {} wrote {} (+{} created, {} updated, {} unmatched)",
                        label,
                        index + 1,
                        batch.len(),
                        summary.created,
                        summary.updated,
                        summary.unmatched
                    );
                    self.sink
                        .emit(&PipelineEvent::BatchWritten(LoadProgress::compute(
                            label,
                            processed,
                            total,
                            batch.len(),
                            batch_start.elapsed(),
                            start.elapsed(),
                        )));
                }
                Err(e) => {
                    report.discarded += batch.len();
                    report.failed_batches += 1;
                    self.sink.emit(&PipelineEvent::BatchFailed {
                        label: label.to_string(),
                        offset,
                        size: batch.len(),
                        processed,
                        total,
                        error: e.to_string(),
                    });
                }
            }
            if self.should_pause(processed - batch.len(), processed, total) {
                self.sink.emit(&PipelineEvent::Paused {
                    label: label.to_string(),
                    processed,
                    pause_ms: self.config.pause_ms,
                });
                std::thread::sleep(Duration::from_millis(self.config.pause_ms));
            }
        }

        report.finish(start.elapsed());
        if report.unmatched > 0 {
            warn!(
                "[{}] {} relationships skipped: endpoint not found",
                label, report.unmatched
            );
        }
        info!(
            "[{}] loaded {}/{} in {:.1}s ({:.0}/s avg, {} created, {} updated, {} discarded in {} batches)",
            label,
            report.written,
            report.total,
            report.duration_ms as f64 / 1000.0,
            report.avg_rate,
            report.created,
            report.updated,
            report.discarded,
            report.failed_batches
        );
        report
    }

    /// True when this batch crossed a pause boundary and work remains.
    fn should_pause(&self, before: usize, after: usize, total: usize) -> bool {
        let every = self.config.pause_every;
        every > 0 && after < total && before / every != after / every
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LineageError;
    use crate::events::RecordingSink;
    use crate::graph::{
        ClearSummary, DeleteSummary, DuplicateGroup, MemoryGraph, NodeId,
    };
    use crate::model::{NodeKey, NodeKind, RelType};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Rejects the n-th node batch (1-based).
    struct FlakyStore {
        inner: MemoryGraph,
        fail_on: usize,
        calls: AtomicUsize,
    }

    impl GraphStore for FlakyStore {
        fn clear_all(&self) -> Result<ClearSummary> {
            self.inner.clear_all()
        }
        fn create_indexes(&self) -> Result<usize> {
            self.inner.create_indexes()
        }
        fn create_constraints(&self) -> Result<usize> {
            self.inner.create_constraints()
        }
        fn drop_constraints(&self) -> Result<usize> {
            self.inner.drop_constraints()
        }
        fn upsert_nodes(&self, batch: &[NodeWrite]) -> Result<WriteSummary> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_on {
                return Err(LineageError::store("connection reset"));
            }
            self.inner.upsert_nodes(batch)
        }
        fn upsert_relationships(&self, batch: &[RelWrite]) -> Result<WriteSummary> {
            if batch.iter().any(|r| r.to.key == "BROKEN") {
                return Err(LineageError::store("write timeout"));
            }
            self.inner.upsert_relationships(batch)
        }
        fn duplicate_groups(&self, kind: NodeKind) -> Result<Vec<DuplicateGroup>> {
            self.inner.duplicate_groups(kind)
        }
        fn delete_nodes(&self, ids: &[NodeId]) -> Result<DeleteSummary> {
            self.inner.delete_nodes(ids)
        }
        fn node_counts(&self) -> Result<BTreeMap<NodeKind, usize>> {
            self.inner.node_counts()
        }
        fn relationship_counts(&self) -> Result<BTreeMap<RelType, usize>> {
            self.inner.relationship_counts()
        }
        fn isolated_counts(&self) -> Result<BTreeMap<NodeKind, usize>> {
            self.inner.isolated_counts()
        }
        fn steps_per_sfc(&self) -> Result<Vec<(String, usize)>> {
            self.inner.steps_per_sfc()
        }
    }

    fn sfcs(n: usize) -> Vec<NodeWrite> {
        (0..n)
            .map(|i| NodeWrite::new(NodeKey::sfc(format!("S{i}"))))
            .collect()
    }

    #[test]
    fn test_batches_and_progress() {
        let graph = MemoryGraph::new();
        let sink = RecordingSink::new();
        let loader = GraphLoader::new(&graph, LoaderConfig::unthrottled(4), &sink);

        let report = loader.load_nodes("sfc", &sfcs(10));
        assert_eq!(report.written, 10);
        assert_eq!(report.created, 10);
        assert!(report.is_clean());

        let progress: Vec<LoadProgress> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::BatchWritten(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(progress.len(), 3);
        assert_eq!(progress[0].processed, 4);
        assert_eq!(progress[2].processed, 10);
        assert_eq!(progress[2].percent, 100.0);
        assert_eq!(progress[2].eta_secs, Some(0.0));
    }

    #[test]
    fn test_failed_batch_is_discarded_and_load_continues() {
        let store = FlakyStore {
            inner: MemoryGraph::new(),
            fail_on: 2,
            calls: AtomicUsize::new(0),
        };
        let sink = RecordingSink::new();
        let loader = GraphLoader::new(&store, LoaderConfig::unthrottled(3), &sink);

        let report = loader.load_nodes("sfc", &sfcs(9));
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.discarded, 3);
        assert_eq!(report.written, 6);
        assert_eq!(store.node_counts().unwrap()[&NodeKind::Sfc], 6);

        let failed = sink
            .events()
            .into_iter()
            .find_map(|e| match e {
                PipelineEvent::BatchFailed { offset, size, .. } => Some((offset, size)),
                _ => None,
            });
        assert_eq!(failed, Some((3, 3)));
    }

    #[test]
    fn test_reload_creates_nothing() {
        let graph = MemoryGraph::new();
        let sink = RecordingSink::new();
        let loader = GraphLoader::new(&graph, LoaderConfig::unthrottled(2), &sink);
        let nodes = sfcs(3);
        let rels = vec![RelWrite::new(
            RelType::SplitsTo,
            NodeKey::sfc("S0"),
            NodeKey::sfc("S1"),
        )];

        loader.load_nodes("n", &nodes);
        loader.load_relationships("r", &rels);
        let nodes_again = loader.load_nodes("n", &nodes);
        let rels_again = loader.load_relationships("r", &rels);

        assert_eq!(nodes_again.created, 0);
        assert_eq!(nodes_again.updated, 3);
        assert_eq!(rels_again.created, 0);
        assert_eq!(graph.relationship_counts().unwrap()[&RelType::SplitsTo], 1);
    }

    #[test]
    fn test_pause_boundaries() {
        let graph = MemoryGraph::new();
        let sink = RecordingSink::new();
        let config = LoaderConfig {
            batch_size: 2,
            pause_every: 4,
            pause_ms: 0,
        };
        GraphLoader::new(&graph, config, &sink).load_nodes("n", &sfcs(9));
        let pauses: Vec<usize> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::Paused { processed, .. } => Some(processed),
                _ => None,
            })
            .collect();
        assert_eq!(pauses, vec![4, 8]);
    }

    #[test]
    fn test_link_each_skips_failures() {
        let store = FlakyStore {
            inner: MemoryGraph::new(),
            fail_on: 0,
            calls: AtomicUsize::new(0),
        };
        let sink = RecordingSink::new();
        let loader = GraphLoader::new(&store, LoaderConfig::default(), &sink);
        loader.load_nodes("n", &sfcs(3));

        let rels = vec![
            RelWrite::new(RelType::SplitsTo, NodeKey::sfc("S0"), NodeKey::sfc("BROKEN")),
            RelWrite::new(RelType::SplitsTo, NodeKey::sfc("S1"), NodeKey::sfc("S2")),
        ];
        let report = loader.link_each("links", &rels);
        assert_eq!(report.written, 1);
        assert_eq!(report.discarded, 1);
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, PipelineEvent::LinkSkipped { to, .. } if to.contains("BROKEN"))));
    }

    #[test]
    fn test_progress_math() {
        let p = LoadProgress::compute(
            "x",
            500,
            2000,
            500,
            Duration::from_millis(250),
            Duration::from_secs(1),
        );
        assert_eq!(p.percent, 25.0);
        assert_eq!(p.batch_rate, 2000.0);
        assert_eq!(p.avg_rate, 500.0);
        assert_eq!(p.eta_secs, Some(3.0));
    }

    #[test]
    fn test_config_defaults() {
        let config: LoaderConfig = serde_json::from_str(r#"{"batch_size": 10}"#).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.pause_every, DEFAULT_PAUSE_EVERY);
        assert_eq!(config.pause_ms, DEFAULT_PAUSE_MS);
    }
}
