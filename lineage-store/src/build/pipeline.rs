//! Rebuild pipeline implementation.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use lineage_core::events::{EventSink, PipelineEvent};
use lineage_core::reference::GraphWrites;
use lineage_core::{
    GraphLoader, GraphStore, IntegrityAuditor, LoadReport, LoaderConfig, SequencePlan, VerifyReport,
};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Rebuild stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    ClearAll,
    Index,
    Constrain,
    LoadNodes,
    LoadEdges,
    Verify,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::ClearAll,
        Stage::Index,
        Stage::Constrain,
        Stage::LoadNodes,
        Stage::LoadEdges,
        Stage::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ClearAll => "clear-all",
            Stage::Index => "index",
            Stage::Constrain => "constrain",
            Stage::LoadNodes => "load-nodes",
            Stage::LoadEdges => "load-edges",
            Stage::Verify => "verify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub success: bool,
    pub skipped: bool,
    pub items: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a rebuild merges into the graph.
#[derive(Debug, Clone, Default)]
pub struct RebuildInput {
    pub reference: GraphWrites,
    pub workflow: Option<SequencePlan>,
}

/// Result of a rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub stages: Vec<StageReport>,
    pub loads: Vec<LoadReport>,
    pub verify: Option<VerifyReport>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl RebuildReport {
    pub fn succeeded(&self) -> bool {
        self.stages.iter().all(|s| s.success)
    }

    pub fn failed_stages(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|s| !s.success)
            .map(|s| s.stage)
            .collect()
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Batches discarded across every load.
    pub fn failed_batches(&self) -> usize {
        self.loads.iter().map(|l| l.failed_batches).sum()
    }
}

/// Pipeline for rebuilding the lineage graph in a [`GraphStore`].
pub struct RebuildPipeline<'a, S: GraphStore + ?Sized> {
    store: &'a S,
    config: LoaderConfig,
    sink: &'a dyn EventSink,
    clear: bool,
}

impl<'a, S: GraphStore + ?Sized> RebuildPipeline<'a, S> {
    /// Create a full rebuild pipeline.
    pub fn new(store: &'a S, config: LoaderConfig, sink: &'a dyn EventSink) -> Self {
        Self {
            store,
            config,
            sink,
            clear: true,
        }
    }

    /// Keep existing graph contents; writes merge into them.
    pub fn without_clear(mut self) -> Self {
        self.clear = false;
        self
    }

    pub fn run(&self, input: &RebuildInput) -> RebuildReport {
        let start = Instant::now();
        let started_at = Utc::now();
        let loader = GraphLoader::new(self.store, self.config, self.sink);
        let auditor = IntegrityAuditor::new(self.store, self.sink);

        info!(
            "Starting rebuild: {} reference nodes, {} reference relationships{}",
            input.reference.nodes.len(),
            input.reference.relationships.len(),
            if self.clear { "" } else { " (no clear)" }
        );
        if input.reference.unmapped > 0 {
            self.sink.emit(&PipelineEvent::QualityWarning {
                stage: "rebuild".to_string(),
                message: format!(
                    "{} reference edges match no relationship type",
                    input.reference.unmapped
                ),
            });
        }

        let mut stages = Vec::with_capacity(Stage::ALL.len());
        let mut loads = Vec::new();
        let mut verify = None;

        if self.clear {
            stages.push(self.stage(Stage::ClearAll, || {
                let cleared = self.store.clear_all()?;
                Ok(cleared.nodes + cleared.relationships)
            }));
        } else {
            stages.push(StageReport {
                stage: Stage::ClearAll,
                success: true,
                skipped: true,
                items: 0,
                duration_ms: 0,
                error: None,
            });
        }

        stages.push(self.stage(Stage::Index, || Ok(self.store.create_indexes()?)));
        stages.push(self.stage(Stage::Constrain, || Ok(self.store.create_constraints()?)));

        stages.push(self.stage(Stage::LoadNodes, || {
            let mut batch = vec![loader.load_nodes("reference nodes", &input.reference.nodes)];
            if let Some(plan) = &input.workflow {
                batch.push(loader.load_nodes("workflow nodes", &plan.nodes()));
            }
            let written = settle(&mut loads, batch)?;
            Ok(written)
        }));

        stages.push(self.stage(Stage::LoadEdges, || {
            let mut batch = vec![loader.load_relationships(
                "reference relationships",
                &input.reference.relationships,
            )];
            if let Some(plan) = &input.workflow {
                batch.push(loader.load_relationships("workflow steps", &plan.relationships()));
                batch.push(loader.link_each("workflow links", &plan.cross_sfc));
            }
            let written = settle(&mut loads, batch)?;
            Ok(written)
        }));

        stages.push(self.stage(Stage::Verify, || {
            let report = auditor.verify()?;
            let total = report.total_nodes();
            verify = Some(report);
            Ok(total)
        }));

        let report = RebuildReport {
            stages,
            loads,
            verify,
            started_at,
            duration: start.elapsed(),
        };
        if report.succeeded() {
            info!("Rebuild finished in {:.2}s", report.duration.as_secs_f64());
        } else {
            warn!(
                "Rebuild finished in {:.2}s with failed stages: {}",
                report.duration.as_secs_f64(),
                report
                    .failed_stages()
                    .iter()
                    .map(Stage::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        report
    }

    fn stage(&self, stage: Stage, work: impl FnOnce() -> Result<usize>) -> StageReport {
        let start = Instant::now();
        self.sink.emit(&PipelineEvent::StageStarted {
            stage: stage.to_string(),
        });
        let result = work();
        let duration_ms = start.elapsed().as_millis() as u64;
        let report = match result {
            Ok(items) => StageReport {
                stage,
                success: true,
                skipped: false,
                items,
                duration_ms,
                error: None,
            },
            Err(e) => {
                warn!("Stage {} failed: {:#}", stage, e);
                StageReport {
                    stage,
                    success: false,
                    skipped: false,
                    items: 0,
                    duration_ms,
                    error: Some(format!("{:#}", e)),
                }
            }
        };
        self.sink.emit(&PipelineEvent::StageFinished {
            stage: stage.to_string(),
            success: report.success,
            items: report.items,
            duration_ms,
            detail: report.error.clone(),
        });
        report
    }
}

/// Keep the load reports; a load with discarded batches fails its stage.
fn settle(loads: &mut Vec<LoadReport>, batch: Vec<LoadReport>) -> Result<usize> {
    let written = batch.iter().map(|l| l.written).sum();
    let failed: Vec<String> = batch
        .iter()
        .filter(|l| !l.is_clean())
        .map(|l| format!("{} ({} discarded)", l.label, l.discarded))
        .collect();
    loads.extend(batch);
    if failed.is_empty() {
        Ok(written)
    } else {
        Err(anyhow!("batches discarded in {}", failed.join(", ")))
    }
}
