//! Rebuild and run commands - the full graph state machine.

use anyhow::{bail, Result};
use colored::Colorize;
use lineage_core::reference::graph_writes;
use lineage_store::{GraphBase, RebuildInput, RebuildPipeline, RebuildReport};
use serde::Serialize;
use tracing::warn;

use super::derive::{self, DeriveSummary};
use super::load::load_grid;
use super::{audit, workflow, Context};
use crate::output::{self, grid, TableDisplay};

#[derive(Debug, Serialize)]
pub struct RebuildSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derive: Option<DeriveSummary>,
    /// Why the workflow was left out, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_error: Option<String>,
    pub rebuild: RebuildReport,
}

impl TableDisplay for RebuildSummary {
    fn to_table(&self) -> String {
        let mut lines = Vec::new();
        if let Some(derive) = &self.derive {
            lines.push(derive.to_table());
        }
        if let Some(error) = &self.workflow_error {
            lines.push(format!("{} workflow skipped: {}", "WARNING:".yellow().bold(), error));
        }
        lines.push(grid(
            &["stage", "status", "items", "time"],
            self.rebuild.stages.iter().map(|s| {
                let status = if s.skipped {
                    "skipped".dimmed().to_string()
                } else if s.success {
                    "ok".green().to_string()
                } else {
                    format!("{} {}", "failed:".red(), s.error.as_deref().unwrap_or(""))
                };
                vec![
                    s.stage.to_string(),
                    status,
                    s.items.to_string(),
                    output::duration(s.duration_ms),
                ]
            }),
        ));
        if !self.rebuild.loads.is_empty() {
            lines.push(load_grid(&self.rebuild.loads));
        }
        if let Some(verify) = &self.rebuild.verify {
            lines.extend(audit::verify_lines(verify));
        }
        let headline = if self.rebuild.succeeded() {
            "Rebuild complete".green().bold()
        } else {
            "Rebuild finished with failures".red().bold()
        };
        lines.push(format!(
            "{} in {:.2}s",
            headline,
            self.rebuild.duration.as_secs_f64()
        ));
        lines.join("\n")
    }
}

fn finish(ctx: &Context, graph: &GraphBase, summary: RebuildSummary) -> Result<()> {
    if summary.rebuild.succeeded() {
        graph.record_rebuild(summary.rebuild.started_at)?;
    }
    output::print(&summary, ctx.format);
    let failed = summary.rebuild.failed_stages();
    if !failed.is_empty() {
        bail!(
            "Rebuild stages failed: {}",
            failed.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        );
    }
    Ok(())
}

/// Derive edges and, unless disabled, the workflow, then rebuild.
fn rebuild(ctx: &Context, clear: bool, with_workflow: bool, export: bool) -> Result<()> {
    let source = ctx.open_source()?;
    let graph = ctx.open_graph()?;

    let mut derivation = derive::derive(ctx, &source);
    if export {
        derivation.summary.exports = derive::export(ctx, &derivation.edges)?;
    }
    let (workflow, workflow_error) = if with_workflow {
        match workflow::plan(ctx, &source) {
            Ok((plan, _)) => (Some(plan), None),
            Err(e) => {
                warn!("Workflow left out of rebuild: {:#}", e);
                (None, Some(format!("{:#}", e)))
            }
        }
    } else {
        (None, None)
    };

    let input = RebuildInput {
        reference: graph_writes(&derivation.edges),
        workflow,
    };
    let pipeline = RebuildPipeline::new(&graph, ctx.config.loader, &ctx.sink);
    let pipeline = if clear { pipeline } else { pipeline.without_clear() };
    let report = pipeline.run(&input);

    finish(
        ctx,
        &graph,
        RebuildSummary {
            derive: Some(derivation.summary),
            workflow_error,
            rebuild: report,
        },
    )
}

/// Run the rebuild command: CLEAR-ALL through VERIFY.
pub fn run_rebuild(ctx: &Context, with_workflow: bool) -> Result<()> {
    rebuild(ctx, true, with_workflow, false)
}

/// Run the end-to-end command: derive with exports, then merge without clearing.
pub fn run_all(ctx: &Context, with_workflow: bool) -> Result<()> {
    rebuild(ctx, false, with_workflow, true)
}
