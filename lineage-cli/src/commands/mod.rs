//! Command implementations for the lineage CLI.
//!
//! Each command module provides a `run` function that executes the command
//! logic against the sessions opened by [`Context`].

pub mod audit;
pub mod clean;
pub mod derive;
pub mod load;
pub mod rebuild;
pub mod stats;
pub mod status;
pub mod workflow;

use anyhow::{anyhow, Context as _, Result};
use lineage_core::clean::presets::plan_for;
use lineage_core::clean::CleanOutcome;
use lineage_core::{FieldCleaner, GraphLoader, Table};
use lineage_store::{GraphBase, SourceDb};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::LineageConfig;
use crate::output::OutputFormat;
use crate::progress::ProgressSink;

/// Everything a command needs: configuration, output format, event sink.
pub struct Context {
    pub root: PathBuf,
    pub config: LineageConfig,
    pub format: OutputFormat,
    pub sink: ProgressSink,
}

impl Context {
    pub fn new(root: PathBuf, config: LineageConfig, format: OutputFormat, quiet: bool) -> Self {
        let sink = ProgressSink::new(!quiet && format == OutputFormat::Table);
        Self {
            root,
            config,
            format,
            sink,
        }
    }

    /// Open the relational source and register configured files.
    ///
    /// A source that does not answer is fatal before any stage runs.
    pub fn open_source(&self) -> Result<SourceDb> {
        let source = match &self.config.source.database {
            Some(path) => {
                if !path.exists() {
                    return Err(anyhow!("Source database not found: {}", path.display()));
                }
                SourceDb::open(path)?
            }
            None => SourceDb::open_in_memory()?,
        };
        for (name, path) in &self.config.source.files {
            source.register_file(name, path)?;
        }
        source.ping()?;
        debug!("Source session ready");
        Ok(source)
    }

    /// Open the graph store, creating it if needed.
    pub fn open_graph(&self) -> Result<GraphBase> {
        let graph = GraphBase::open(&self.config.store.path)?;
        graph.ping().with_context(|| {
            format!("Graph store {} is unreachable", self.config.store.path.display())
        })?;
        Ok(graph)
    }

    pub fn loader<'a>(&'a self, graph: &'a GraphBase) -> GraphLoader<'a, GraphBase> {
        GraphLoader::new(graph, self.config.loader, &self.sink)
    }

    /// Read a logical table through its configured physical name.
    pub fn fetch(&self, source: &SourceDb, logical: &str) -> Result<Table> {
        let physical = self.config.source.physical(logical);
        source
            .fetch(physical, logical)
            .with_context(|| format!("Failed to read {}", logical))
    }

    /// Fetch and clean a logical table with its built-in plan and overrides.
    pub fn clean(&self, source: &SourceDb, logical: &str) -> Result<CleanOutcome> {
        let plan = plan_for(logical).ok_or_else(|| {
            anyhow!(
                "No cleaning plan for table '{}' (known: {})",
                logical,
                lineage_core::tables::ALL.join(", ")
            )
        })?;
        let plan = self.config.cleaning.apply(logical, plan);
        let raw = self.fetch(source, logical)?;
        let outcome = FieldCleaner::new(&self.sink).clean(&plan, &raw)?;
        info!(
            "Cleaned {}: {} -> {} rows",
            logical, outcome.report.input_rows, outcome.report.output_rows
        );
        Ok(outcome)
    }
}
