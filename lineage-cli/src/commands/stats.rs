//! Stats command - workflow length statistics.

use anyhow::Result;
use colored::Colorize;
use lineage_core::{GraphStore, WorkflowStats};
use serde::Serialize;

use super::{workflow, Context};
use crate::output::{self, grid, TableDisplay};

#[derive(Debug, Serialize)]
pub struct StatsSummary {
    /// `graph` or `source`.
    pub origin: String,
    #[serde(flatten)]
    pub stats: WorkflowStats,
}

impl TableDisplay for StatsSummary {
    fn to_table(&self) -> String {
        if self.stats.sfc_count == 0 {
            return format!("{}", "No workflows found.".dimmed());
        }
        let mut lines = vec![format!(
            "{} {} SFCs, {} steps, {:.2} steps per SFC ({})",
            "Workflows:".cyan().bold(),
            self.stats.sfc_count,
            self.stats.step_count,
            self.stats.average_steps,
            self.origin
        )];
        lines.push(grid(
            &["steps", "SFCs"],
            self.stats
                .distribution
                .iter()
                .map(|(steps, sfcs)| vec![steps.to_string(), sfcs.to_string()]),
        ));
        lines.push(grid(
            &["longest", "steps"],
            self.stats
                .longest
                .iter()
                .map(|(sfc, steps)| vec![sfc.clone(), steps.to_string()]),
        ));
        if !self.stats.samples.is_empty() {
            lines.push(format!("{}", "Sample paths:".cyan().bold()));
            lines.extend(self.stats.samples.iter().map(|p| format!("  {}", p)));
        }
        lines.join("\n")
    }
}

/// Run the stats command.
///
/// Sample paths need the step sequence itself, so they are only shown when
/// computing from the source tables.
pub fn run(ctx: &Context, top: usize, paths: usize, from_source: bool) -> Result<()> {
    let (origin, stats) = if from_source {
        let source = ctx.open_source()?;
        let (plan, _) = workflow::plan(ctx, &source)?;
        ("source", WorkflowStats::from_plan(&plan, top, paths))
    } else {
        let graph = ctx.open_graph()?;
        ("graph", WorkflowStats::from_counts(&graph.steps_per_sfc()?, top))
    };
    let summary = StatsSummary {
        origin: origin.to_string(),
        stats,
    };
    output::print(&summary, ctx.format);
    Ok(())
}
