//! Workflow command - reconstruct process step sequences and merge them.

use anyhow::{bail, Result};
use colored::Colorize;
use lineage_core::clean::CleanReport;
use lineage_core::loader::SequenceLoad;
use lineage_core::{reconstruct, tables, SequencePlan};
use lineage_store::SourceDb;
use serde::Serialize;

use super::load::load_grid;
use super::Context;
use crate::output::{self, TableDisplay};

#[derive(Debug, Serialize)]
pub struct WorkflowSummary {
    pub cleaning: CleanReport,
    pub sfcs: usize,
    pub steps: usize,
    pub skipped_incomplete: usize,
    pub skipped_blank: usize,
    pub load: SequenceLoad,
}

impl TableDisplay for WorkflowSummary {
    fn to_table(&self) -> String {
        let mut lines = super::clean::filter_lines(&self.cleaning);
        lines.push(format!(
            "{} {} steps across {} SFCs ({} incomplete rows, {} without sfc_no skipped)",
            "Reconstructed".green().bold(),
            self.steps,
            self.sfcs,
            self.skipped_incomplete,
            self.skipped_blank
        ));
        lines.push(load_grid(&[
            self.load.nodes.clone(),
            self.load.relationships.clone(),
            self.load.links.clone(),
        ]));
        lines.join("\n")
    }
}

/// Clean the production log and rebuild its step sequences.
pub fn plan(ctx: &Context, source: &SourceDb) -> Result<(SequencePlan, CleanReport)> {
    let outcome = ctx.clean(source, tables::PRODUCTION_LOG)?;
    let plan = reconstruct(&outcome.table)?;
    Ok((plan, outcome.report))
}

/// Run the workflow command.
pub fn run(ctx: &Context) -> Result<()> {
    let source = ctx.open_source()?;
    let graph = ctx.open_graph()?;
    let (plan, cleaning) = plan(ctx, &source)?;
    let load = ctx.loader(&graph).load_sequence(&plan);

    let failed = load.nodes.failed_batches + load.relationships.failed_batches;
    let summary = WorkflowSummary {
        cleaning,
        sfcs: plan.sfcs.len(),
        steps: plan.steps.len(),
        skipped_incomplete: plan.skipped_incomplete,
        skipped_blank: plan.skipped_blank,
        load,
    };
    output::print(&summary, ctx.format);
    if failed > 0 {
        bail!("{} workflow batches were discarded", failed);
    }
    Ok(())
}
