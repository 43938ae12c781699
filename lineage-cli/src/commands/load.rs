//! Load command - merge reference edges into the graph.

use anyhow::{bail, Result};
use colored::Colorize;
use lineage_core::reference::graph_writes;
use lineage_core::{tables, LoadReport, ReferenceEdge};
use lineage_store::SourceDb;
use serde::Serialize;

use super::{derive, Context};
use crate::output::{self, grid, TableDisplay};

#[derive(Debug, Serialize)]
pub struct LoadSummary {
    /// `derived` or the reference table name.
    pub origin: String,
    pub edges: usize,
    /// Reference rows without a valid handle.
    pub skipped_rows: usize,
    /// Edges whose types and label map to no relationship.
    pub unmapped: usize,
    pub loads: Vec<LoadReport>,
}

impl LoadSummary {
    pub fn failed_batches(&self) -> usize {
        self.loads.iter().map(|l| l.failed_batches).sum()
    }
}

/// Load reports as one table.
pub fn load_grid(loads: &[LoadReport]) -> String {
    grid(
        &["load", "total", "written", "created", "updated", "unmatched", "discarded", "rate"],
        loads.iter().map(|l| {
            vec![
                l.label.clone(),
                l.total.to_string(),
                l.written.to_string(),
                l.created.to_string(),
                l.updated.to_string(),
                l.unmatched.to_string(),
                l.discarded.to_string(),
                format!("{:.0}/s", l.avg_rate),
            ]
        }),
    )
}

impl TableDisplay for LoadSummary {
    fn to_table(&self) -> String {
        let mut lines = vec![format!(
            "{} {} reference edges ({})",
            "Loaded".green().bold(),
            self.edges,
            self.origin
        )];
        if self.skipped_rows > 0 {
            lines.push(format!("  {} rows without a valid handle skipped", self.skipped_rows));
        }
        if self.unmapped > 0 {
            lines.push(format!(
                "  {} {} edges map to no relationship type",
                "WARNING:".yellow().bold(),
                self.unmapped
            ));
        }
        lines.push(load_grid(&self.loads));
        lines.join("\n")
    }
}

/// Edges read back from the reference table.
fn from_table(ctx: &Context, source: &SourceDb) -> Result<(Vec<ReferenceEdge>, usize)> {
    let outcome = ctx.clean(source, tables::REFERENCE)?;
    Ok(ReferenceEdge::from_table(&outcome.table)?)
}

/// Run the load command.
pub fn run(ctx: &Context, use_table: bool) -> Result<()> {
    let source = ctx.open_source()?;
    let graph = ctx.open_graph()?;

    let (origin, edges, skipped_rows) = if use_table {
        let (edges, skipped) = from_table(ctx, &source)?;
        (ctx.config.source.physical(tables::REFERENCE).to_string(), edges, skipped)
    } else {
        let derivation = derive::derive(ctx, &source);
        ("derived".to_string(), derivation.edges, 0)
    };

    let writes = graph_writes(&edges);
    let (nodes, relationships) = ctx.loader(&graph).load_writes("reference", &writes);
    let summary = LoadSummary {
        origin,
        edges: edges.len(),
        skipped_rows,
        unmapped: writes.unmapped,
        loads: vec![nodes, relationships],
    };
    output::print(&summary, ctx.format);
    if summary.failed_batches() > 0 {
        bail!("{} batches were discarded", summary.failed_batches());
    }
    Ok(())
}
