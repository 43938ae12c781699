//! Graph integrity: duplicate removal, verification counts, sequence repair.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};

use crate::error::{LineageError, Result};
use crate::events::{EventSink, PipelineEvent};
use crate::graph::GraphStore;
use crate::loader::{GraphLoader, LoadReport};
use crate::model::{NodeKind, RelType};
use crate::sequence::SequencePlan;

/// Duplicate keys listed per kind in reports.
const SAMPLE_KEYS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindDedup {
    pub kind: NodeKind,
    pub groups: usize,
    pub removed_nodes: usize,
    pub removed_relationships: usize,
    pub sample_keys: Vec<String>,
    /// Why this kind was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KindDedup {
    fn empty(kind: NodeKind) -> Self {
        Self {
            kind,
            groups: 0,
            removed_nodes: 0,
            removed_relationships: 0,
            sample_keys: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupReport {
    pub kinds: Vec<KindDedup>,
    pub constraints_dropped: usize,
    pub constraints_restored: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint_error: Option<String>,
    pub duration_ms: u64,
}

impl DedupReport {
    pub fn removed_nodes(&self) -> usize {
        self.kinds.iter().map(|k| k.removed_nodes).sum()
    }

    pub fn removed_relationships(&self) -> usize {
        self.kinds.iter().map(|k| k.removed_relationships).sum()
    }

    pub fn failed_kinds(&self) -> impl Iterator<Item = &KindDedup> {
        self.kinds.iter().filter(|k| k.error.is_some())
    }

    pub fn succeeded(&self) -> bool {
        self.failed_kinds().next().is_none() && self.constraint_error.is_none()
    }
}

/// Graph shape after a load.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerifyReport {
    pub nodes: BTreeMap<NodeKind, usize>,
    pub relationships: BTreeMap<RelType, usize>,
    pub isolated: BTreeMap<NodeKind, usize>,
}

impl VerifyReport {
    pub fn total_nodes(&self) -> usize {
        self.nodes.values().sum()
    }

    pub fn total_relationships(&self) -> usize {
        self.relationships.values().sum()
    }

    pub fn total_isolated(&self) -> usize {
        self.isolated.values().sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepairReport {
    pub relationships: LoadReport,
    pub links: LoadReport,
}

/// Finds and resolves integrity defects. Never invents relationships.
pub struct IntegrityAuditor<'a, S: GraphStore + ?Sized> {
    store: &'a S,
    sink: &'a dyn EventSink,
}

impl<'a, S: GraphStore + ?Sized> IntegrityAuditor<'a, S> {
    pub fn new(store: &'a S, sink: &'a dyn EventSink) -> Self {
        Self { store, sink }
    }

    /// Keep the first node of every duplicate-key group and delete the rest
    /// with their relationships.
    ///
    /// Constraints are lifted first and re-declared once the duplicates are
    /// gone. A kind that fails is recorded and skipped; the remaining kinds
    /// still run and constraints are always re-declared.
    pub fn dedup(&self) -> Result<DedupReport> {
        let start = Instant::now();
        self.sink.emit(&PipelineEvent::StageStarted {
            stage: "dedup".to_string(),
        });

        let mut report = DedupReport::default();
        match self.store.drop_constraints() {
            Ok(dropped) => report.constraints_dropped = dropped,
            Err(e) => {
                self.finish_dedup(&report, start, Some(e.to_string()));
                return Err(e);
            }
        }
        for kind in NodeKind::ALL {
            let entry = match self.dedup_kind(kind) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("{}: dedup failed: {}", kind, e);
                    KindDedup {
                        error: Some(e.to_string()),
                        ..KindDedup::empty(kind)
                    }
                }
            };
            report.kinds.push(entry);
        }
        match self.store.create_constraints() {
            Ok(restored) => report.constraints_restored = restored,
            Err(e) => {
                warn!("Constraints not restored after dedup: {}", e);
                report.constraint_error = Some(e.to_string());
            }
        }
        report.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Dedup removed {} nodes, {} relationships",
            report.removed_nodes(),
            report.removed_relationships()
        );
        let detail = (!report.succeeded()).then(|| {
            let mut failed: Vec<String> = report
                .failed_kinds()
                .map(|k| k.kind.to_string())
                .collect();
            if report.constraint_error.is_some() {
                failed.push("constraints".to_string());
            }
            format!("failed: {}", failed.join(", "))
        });
        self.finish_dedup(&report, start, detail);
        Ok(report)
    }

    fn dedup_kind(&self, kind: NodeKind) -> Result<KindDedup> {
        let groups = self.store.duplicate_groups(kind)?;
        let mut entry = KindDedup {
            groups: groups.len(),
            ..KindDedup::empty(kind)
        };
        if groups.is_empty() {
            return Ok(entry);
        }
        let doomed: Vec<_> = groups
            .iter()
            .flat_map(|g| g.ids.iter().skip(1).copied())
            .collect();
        let deleted = self.store.delete_nodes(&doomed)?;
        entry.removed_nodes = deleted.nodes;
        entry.removed_relationships = deleted.relationships;
        entry.sample_keys = groups
            .iter()
            .take(SAMPLE_KEYS)
            .map(|g| g.key.clone())
            .collect();
        warn!(
            "{}: {} duplicate keys, removed {} nodes and {} relationships (e.g. {})",
            kind,
            entry.groups,
            entry.removed_nodes,
            entry.removed_relationships,
            entry.sample_keys.join(", ")
        );
        Ok(entry)
    }

    fn finish_dedup(&self, report: &DedupReport, start: Instant, detail: Option<String>) {
        self.sink.emit(&PipelineEvent::StageFinished {
            stage: "dedup".to_string(),
            success: detail.is_none(),
            items: report.removed_nodes(),
            duration_ms: start.elapsed().as_millis() as u64,
            detail,
        });
    }

    /// Node and relationship counts plus the isolated-node scan.
    pub fn verify(&self) -> Result<VerifyReport> {
        let report = VerifyReport {
            nodes: self.store.node_counts()?,
            relationships: self.store.relationship_counts()?,
            isolated: self.store.isolated_counts()?,
        };
        for (kind, count) in &report.isolated {
            self.sink.emit(&PipelineEvent::QualityWarning {
                stage: "verify".to_string(),
                message: format!("{} isolated {} nodes", count, kind),
            });
        }
        info!(
            "Graph holds {} nodes, {} relationships, {} isolated",
            report.total_nodes(),
            report.total_relationships(),
            report.total_isolated()
        );
        Ok(report)
    }

    pub fn has_duplicates(&self, kind: NodeKind) -> Result<bool> {
        Ok(!self.store.duplicate_groups(kind)?.is_empty())
    }

    /// Re-merge the sequence relationships of `plan`.
    ///
    /// Refused while duplicate process step keys exist, since endpoints
    /// would be ambiguous.
    pub fn repair(&self, loader: &GraphLoader<'_, S>, plan: &SequencePlan) -> Result<RepairReport> {
        if self.has_duplicates(NodeKind::ProcessStep)? {
            return Err(LineageError::store(
                "duplicate ProcessStep keys present; run dedup before repair",
            ));
        }
        let report = RepairReport {
            relationships: loader.load_relationships("repair steps", &plan.relationships()),
            links: loader.link_each("repair links", &plan.cross_sfc),
        };
        info!(
            "Repair re-merged {} step links ({} new) and {} SFC links ({} new)",
            report.relationships.written,
            report.relationships.created,
            report.links.written,
            report.links.created
        );
        Ok(report)
    }
}
