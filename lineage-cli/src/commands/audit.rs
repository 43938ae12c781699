//! Integrity commands: dedup, verify, repair.

use anyhow::{bail, Result};
use colored::Colorize;
use lineage_core::{DedupReport, IntegrityAuditor, RepairReport, VerifyReport};
use serde::Serialize;

use super::load::load_grid;
use super::{workflow, Context};
use crate::output::{self, count_table, grid, TableDisplay};

impl TableDisplay for DedupReport {
    fn to_table(&self) -> String {
        let mut lines = vec![grid(
            &["kind", "duplicate keys", "nodes removed", "relationships removed"],
            self.kinds.iter().map(|k| {
                vec![
                    k.kind.to_string(),
                    k.groups.to_string(),
                    k.removed_nodes.to_string(),
                    k.removed_relationships.to_string(),
                ]
            }),
        )];
        for kind in self.kinds.iter().filter(|k| !k.sample_keys.is_empty()) {
            lines.push(format!("  {} e.g. {}", kind.kind, kind.sample_keys.join(", ")));
        }
        for kind in self.failed_kinds() {
            lines.push(format!(
                "  {} {}: {}",
                "failed:".red(),
                kind.kind,
                kind.error.as_deref().unwrap_or("")
            ));
        }
        if let Some(error) = &self.constraint_error {
            lines.push(format!("  {} constraints: {}", "failed:".red(), error));
        }
        let headline = if !self.succeeded() {
            "Dedup finished with failures".red().bold()
        } else if self.removed_nodes() == 0 {
            "No duplicates found".green().bold()
        } else {
            "Duplicates removed".yellow().bold()
        };
        lines.push(format!(
            "{}: {} nodes, {} relationships ({} constraints restored)",
            headline,
            self.removed_nodes(),
            self.removed_relationships(),
            self.constraints_restored
        ));
        lines.join("\n")
    }
}

/// Verification counts as tables.
pub fn verify_lines(report: &VerifyReport) -> Vec<String> {
    let mut lines = vec![
        count_table("node kind", &report.nodes),
        count_table("relationship", &report.relationships),
    ];
    if report.isolated.is_empty() {
        lines.push(format!("{}", "No isolated nodes".green()));
    } else {
        lines.push(format!("{}", "Isolated nodes".yellow().bold()));
        lines.push(count_table("node kind", &report.isolated));
    }
    lines
}

impl TableDisplay for VerifyReport {
    fn to_table(&self) -> String {
        verify_lines(self).join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct RepairSummary {
    pub steps: usize,
    #[serde(flatten)]
    pub report: RepairReport,
}

impl TableDisplay for RepairSummary {
    fn to_table(&self) -> String {
        [
            format!(
                "{} sequence links for {} steps",
                "Re-merged".green().bold(),
                self.steps
            ),
            load_grid(&[self.report.relationships.clone(), self.report.links.clone()]),
        ]
        .join("\n")
    }
}

/// Run the dedup command.
pub fn run_dedup(ctx: &Context) -> Result<()> {
    let graph = ctx.open_graph()?;
    let report = IntegrityAuditor::new(&graph, &ctx.sink).dedup()?;
    output::print(&report, ctx.format);
    if !report.succeeded() {
        bail!("Dedup did not complete for every node kind");
    }
    Ok(())
}

/// Run the verify command.
pub fn run_verify(ctx: &Context) -> Result<()> {
    let graph = ctx.open_graph()?;
    let report = IntegrityAuditor::new(&graph, &ctx.sink).verify()?;
    output::print(&report, ctx.format);
    Ok(())
}

/// Run the repair command.
pub fn run_repair(ctx: &Context) -> Result<()> {
    let source = ctx.open_source()?;
    let graph = ctx.open_graph()?;
    let (plan, _) = workflow::plan(ctx, &source)?;
    let loader = ctx.loader(&graph);
    let report = IntegrityAuditor::new(&graph, &ctx.sink).repair(&loader, &plan)?;
    let failed = report.relationships.failed_batches + report.links.failed_batches;
    output::print(
        &RepairSummary {
            steps: plan.steps.len(),
            report,
        },
        ctx.format,
    );
    if failed > 0 {
        bail!("{} repair batches were discarded", failed);
    }
    Ok(())
}
