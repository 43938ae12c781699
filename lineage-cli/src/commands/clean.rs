//! Clean command - clean one source table and report every filter stage.

use anyhow::Result;
use colored::Colorize;
use lineage_core::clean::CleanReport;
use lineage_core::record::ColumnProfile;
use lineage_store::{ColumnarWriter, ExportedFile};
use serde::Serialize;

use super::Context;
use crate::output::{self, grid, TableDisplay};

#[derive(Debug, Serialize)]
pub struct CleanSummary {
    pub report: CleanReport,
    pub profile: Vec<ColumnProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportedFile>,
}

/// Filter stage table shared with the derive and workflow reports.
pub fn filter_lines(report: &CleanReport) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}: {} -> {} rows",
        "Cleaned".green().bold(),
        report.table.cyan(),
        report.input_rows,
        report.output_rows
    ));
    for (field, count) in &report.negative_drops {
        if *count > 0 {
            lines.push(format!("  negative {}: {} rows dropped", field, count));
        }
    }
    if !report.skipped_fields.is_empty() {
        lines.push(format!(
            "  {} {}",
            "skipped missing fields:".yellow(),
            report.skipped_fields.join(", ")
        ));
    }
    if !report.filters.is_empty() {
        lines.push(grid(
            &["filter", "before", "removed", "rate"],
            report.filters.iter().map(|f| {
                vec![
                    f.filter.to_string(),
                    f.before.to_string(),
                    f.removed.to_string(),
                    format!("{:.2}%", f.rate * 100.0),
                ]
            }),
        ));
    }
    for filter in &report.filters {
        for hit in &filter.pattern_hits {
            lines.push(format!(
                "  {}: {} (e.g. {})",
                hit.pattern,
                hit.count,
                hit.samples.join(", ")
            ));
        }
        if let Some(kept) = &filter.kept_lengths {
            lines.push(format!(
                "  kept identifier length: min {}, max {}, avg {:.1}",
                kept.min, kept.max, kept.average
            ));
        }
    }
    for warning in report.warnings() {
        lines.push(format!("  {} {}", "WARNING:".yellow().bold(), warning));
    }
    lines
}

impl TableDisplay for CleanSummary {
    fn to_table(&self) -> String {
        let mut lines = filter_lines(&self.report);
        lines.push(grid(
            &["column", "nulls", "max length"],
            self.profile.iter().map(|p| {
                vec![
                    p.column.clone(),
                    p.null_count.to_string(),
                    p.max_length.to_string(),
                ]
            }),
        ));
        if let Some(file) = &self.export {
            lines.push(format!("{} {}", "Exported".green(), file.path.display()));
        }
        lines.join("\n")
    }
}

/// Run the clean command.
pub fn run(ctx: &Context, table: &str, export: bool) -> Result<()> {
    let source = ctx.open_source()?;
    let outcome = ctx.clean(&source, table)?;
    let export = if export {
        let writer = ColumnarWriter::new(&ctx.config.export.directory)?;
        Some(writer.write_parquet(&outcome.table)?)
    } else {
        None
    };
    let summary = CleanSummary {
        profile: outcome.table.profile(),
        report: outcome.report,
        export,
    };
    output::print(&summary, ctx.format);
    Ok(())
}
