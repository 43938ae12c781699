//! Status command - connectivity check and graph summary.
//!
//! Opens both sessions and reports what each can see. A session that cannot
//! be opened is an error, so scripts can use `lineage status` as a health
//! check.

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use lineage_core::tables;
use lineage_store::{GraphBase, GraphStats};
use serde::Serialize;
use std::time::Instant;

use super::Context;
use crate::config::CONFIG_FILE;
use crate::output::{self, TableDisplay};

#[derive(Debug, Clone, Serialize)]
pub struct TableStatus {
    pub logical: String,
    pub physical: String,
    pub present: bool,
}

/// Status information for a lineage workspace.
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub config_exists: bool,
    /// Source database path; `None` for a file-only source.
    pub source_database: Option<String>,
    pub tables: Vec<TableStatus>,
    pub store_path: String,
    /// Whether the graph database existed before this check.
    pub store_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<GraphStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_rebuild: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    pub duration_ms: u64,
}

impl TableDisplay for StatusInfo {
    fn to_table(&self) -> String {
        let mut lines = Vec::new();
        let ready = self.stats.map(|s| s.node_count > 0).unwrap_or(false);
        if ready {
            lines.push(format!("{}", "Lineage Status: Ready".green().bold()));
        } else {
            lines.push(format!("{}", "Lineage Status: Graph not built".yellow().bold()));
        }

        lines.push(format!(
            "  {}: {}",
            "Config".cyan(),
            if self.config_exists { "Yes" } else { "No" }
        ));
        lines.push(format!(
            "  {}: {}",
            "Source".cyan(),
            self.source_database.as_deref().unwrap_or("(files only)")
        ));
        for table in &self.tables {
            let mark = if table.present {
                "ok".green()
            } else {
                "missing".red()
            };
            if table.logical == table.physical {
                lines.push(format!("    {}: {}", table.logical, mark));
            } else {
                lines.push(format!("    {} ({}): {}", table.logical, table.physical, mark));
            }
        }

        lines.push(format!("  {}: {}", "Graph".cyan(), self.store_path));
        if let Some(stats) = &self.stats {
            lines.push(format!("    nodes: {}", stats.node_count));
            lines.push(format!("    relationships: {}", stats.relationship_count));
        }
        if let Some(at) = &self.last_rebuild {
            lines.push(format!("    last rebuild: {}", at.format("%Y-%m-%d %H:%M:%S UTC")));
        }

        if let Some(action) = &self.next_action {
            lines.push(String::new());
            lines.push(format!("{}: {}", "Next action".yellow(), action));
        }
        lines.push(format!("{}", format!("({} ms)", self.duration_ms).dimmed()));
        lines.join("\n")
    }
}

/// Run the status command.
pub fn run(ctx: &Context) -> Result<()> {
    let start = Instant::now();
    let source = ctx.open_source()?;
    let mut table_status = Vec::new();
    for logical in tables::ALL {
        let physical = ctx.config.source.physical(logical);
        table_status.push(TableStatus {
            logical: logical.to_string(),
            physical: physical.to_string(),
            present: source.has_table(physical)?,
        });
    }

    let store_path = &ctx.config.store.path;
    let store_exists = store_path.exists();
    let (stats, last_rebuild) = if store_exists {
        let graph: GraphBase = ctx.open_graph()?;
        (Some(graph.stats()?), graph.last_rebuild()?)
    } else {
        (None, None)
    };

    let missing = table_status.iter().filter(|t| !t.present).count();
    let next_action = if missing == table_status.len() {
        Some(format!("configure [source] in {}", CONFIG_FILE))
    } else if stats.map(|s| s.node_count == 0).unwrap_or(true) {
        Some("lineage rebuild".to_string())
    } else {
        None
    };

    let status = StatusInfo {
        config_exists: ctx.root.join(CONFIG_FILE).exists(),
        source_database: ctx
            .config
            .source
            .database
            .as_ref()
            .map(|p| p.display().to_string()),
        tables: table_status,
        store_path: store_path.display().to_string(),
        store_exists,
        stats,
        last_rebuild,
        next_action,
        duration_ms: start.elapsed().as_millis() as u64,
    };
    output::print(&status, ctx.format);
    Ok(())
}
