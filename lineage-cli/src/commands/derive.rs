//! Derive command - clean the MES sources and derive reference edges.

use anyhow::{bail, Result};
use colored::Colorize;
use lineage_core::clean::CleanReport;
use lineage_core::reference::{missing_sales_orders, HopOutcome, HopStatus};
use lineage_core::{tables, CleanedTables, ReferenceEdge, ReferenceEdgeBuilder};
use lineage_store::{ColumnarWriter, ExportedFile, SourceDb};
use serde::Serialize;
use std::time::Instant;
use tracing::warn;

use super::Context;
use crate::output::{self, grid, TableDisplay};

/// Missing sales order keys listed in reports.
const MISSING_SAMPLES: usize = 10;

#[derive(Debug, Serialize)]
pub struct TableFailure {
    pub table: String,
    pub error: String,
}

/// Reference edges plus everything learned while deriving them.
#[derive(Debug, Serialize)]
pub struct DeriveSummary {
    pub edges: usize,
    pub hops: Vec<HopOutcome>,
    pub cleaning: Vec<CleanReport>,
    pub failed_tables: Vec<TableFailure>,
    pub missing_sales_orders: usize,
    pub missing_samples: Vec<String>,
    pub exports: Vec<ExportedFile>,
    pub duration_ms: u64,
}

impl DeriveSummary {
    pub fn aborted(&self) -> usize {
        self.hops
            .iter()
            .filter(|h| matches!(h.status, HopStatus::Aborted { .. }))
            .count()
    }
}

impl TableDisplay for DeriveSummary {
    fn to_table(&self) -> String {
        let mut lines = Vec::new();
        for report in &self.cleaning {
            lines.push(format!(
                "  {} {} -> {} rows{}",
                report.table.cyan(),
                report.input_rows,
                report.output_rows,
                if report.dropped() > 0 {
                    format!(" ({} filtered)", report.dropped())
                } else {
                    String::new()
                }
            ));
        }
        for failure in &self.failed_tables {
            lines.push(format!("  {} {}: {}", "FAILED".red().bold(), failure.table, failure.error));
        }
        lines.push(grid(
            &["hop", "status", "edges", "duplicates"],
            self.hops.iter().map(|h| match &h.status {
                HopStatus::Derived {
                    edges,
                    duplicates_removed,
                    unscoped,
                } => vec![
                    h.hop.to_string(),
                    if *unscoped { "unscoped" } else { "ok" }.to_string(),
                    edges.to_string(),
                    duplicates_removed.to_string(),
                ],
                HopStatus::Aborted { reason } => vec![
                    h.hop.to_string(),
                    format!("aborted: {}", reason),
                    "-".to_string(),
                    "-".to_string(),
                ],
            }),
        ));
        lines.push(format!(
            "{} {} reference edges in {}",
            "Derived".green().bold(),
            self.edges,
            output::duration(self.duration_ms)
        ));
        if self.missing_sales_orders > 0 {
            lines.push(format!(
                "{} {} sales orders have no order_placed edge (e.g. {})",
                "NOTE:".yellow(),
                self.missing_sales_orders,
                self.missing_samples.join("; ")
            ));
        }
        for file in &self.exports {
            lines.push(format!(
                "{} {} ({} rows)",
                "Exported".green(),
                file.path.display(),
                file.rows
            ));
        }
        lines.join("\n")
    }
}

/// Derived edges together with their summary.
pub struct Derivation {
    pub edges: Vec<ReferenceEdge>,
    pub summary: DeriveSummary,
}

/// Clean every edge source and run the derivations.
///
/// A table that cannot be read or cleaned is left out; the hops needing it
/// abort and the rest still run.
pub fn derive(ctx: &Context, source: &SourceDb) -> Derivation {
    let start = Instant::now();
    let mut cleaned = CleanedTables::new();
    let mut cleaning = Vec::new();
    let mut failed_tables = Vec::new();
    for name in tables::EDGE_SOURCES {
        match ctx.clean(source, name) {
            Ok(outcome) => {
                cleaning.push(outcome.report);
                cleaned.insert(name, outcome.table);
            }
            Err(e) => {
                warn!("{}: {:#}", name, e);
                failed_tables.push(TableFailure {
                    table: name.to_string(),
                    error: format!("{:#}", e),
                });
            }
        }
    }

    let set = ReferenceEdgeBuilder::new(&ctx.sink).build(&cleaned);
    let missing = match cleaned.get(tables::SALES_ORDER_DETAIL) {
        Ok(orders) => missing_sales_orders(orders, &set.edges).unwrap_or_default(),
        Err(_) => Vec::new(),
    };

    let summary = DeriveSummary {
        edges: set.edges.len(),
        hops: set.hops,
        cleaning,
        failed_tables,
        missing_sales_orders: missing.len(),
        missing_samples: missing.into_iter().take(MISSING_SAMPLES).collect(),
        exports: Vec::new(),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    Derivation {
        edges: set.edges,
        summary,
    }
}

/// Write the reference CSV and parquet exports.
pub fn export(ctx: &Context, edges: &[ReferenceEdge]) -> Result<Vec<ExportedFile>> {
    let writer = ColumnarWriter::new(&ctx.config.export.directory)?;
    let csv = writer.write_reference_csv(edges, &ctx.config.export.reference_csv)?;
    let parquet = writer.write_parquet(&ReferenceEdge::to_table(tables::REFERENCE, edges))?;
    Ok(vec![csv, parquet])
}

/// Run the derive command.
pub fn run(ctx: &Context, export_files: bool, store_table: bool) -> Result<()> {
    let source = ctx.open_source()?;
    let mut derivation = derive(ctx, &source);
    if export_files {
        derivation.summary.exports = export(ctx, &derivation.edges)?;
    }
    if store_table {
        let physical = ctx.config.source.physical(tables::REFERENCE);
        source.write_table(
            physical,
            &ReferenceEdge::to_table(tables::REFERENCE, &derivation.edges),
        )?;
    }
    output::print(&derivation.summary, ctx.format);
    if derivation.summary.aborted() == derivation.summary.hops.len() {
        bail!("Every reference hop aborted");
    }
    Ok(())
}
