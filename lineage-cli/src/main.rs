//! Lineage CLI - manufacturing traceability graph pipeline
//!
//! Cleans raw MES extracts, derives lot lineage edges, reconstructs process
//! sequences and merges everything into a deduplicated graph store.

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod output;
mod progress;

use commands::*;
use config::LineageConfig;
use output::OutputFormat;

/// Manufacturing traceability graph pipeline.
#[derive(Parser)]
#[command(name = "lineage")]
#[command(author, version)]
#[command(about = "Manufacturing traceability graph pipeline")]
#[command(propagate_version = true)]
#[command(after_help = "Quick Start:
  lineage status       Check source tables and graph store
  lineage rebuild      Clear and rebuild the whole graph
  lineage verify       Count nodes, relationships and isolated nodes

Every pipeline command has a numeric alias, e.g. `lineage 8` for rebuild.")]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Output format (overrides config default)
    #[arg(long, global = true, value_enum)]
    format: Option<OutputFormat>,

    /// Config file (defaults to .lineagerc.toml in the working directory)
    #[arg(long, global = true, env = "LINEAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Fail on config errors instead of silently using defaults
    #[arg(long, global = true)]
    strict: bool,
}

#[derive(Subcommand)]
enum Commands {
    // ==================== Pipeline ====================
    /// Clean one source table and print its filter report
    #[command(visible_alias = "1")]
    Clean {
        /// Logical table name (e.g. production_log, lot_history)
        table: String,

        /// Also write the cleaned table as parquet
        #[arg(short, long)]
        export: bool,
    },

    /// Clean sources and derive reference edges
    #[command(visible_alias = "2")]
    Derive {
        /// Skip the CSV and parquet exports
        #[arg(long)]
        no_export: bool,

        /// Also write the edges to the source's reference table
        #[arg(long)]
        store_table: bool,
    },

    /// Merge reference edges into the graph
    #[command(visible_alias = "3")]
    Load {
        /// Read edges from the source's reference table instead of deriving
        #[arg(long)]
        from_table: bool,
    },

    /// Reconstruct process sequences and merge them
    #[command(visible_alias = "4")]
    Workflow,

    // ==================== Integrity ====================
    /// Remove nodes sharing a natural key, keeping the first
    #[command(visible_alias = "5")]
    Dedup,

    /// Count nodes and relationships, scan for isolated nodes
    #[command(visible_alias = "6")]
    Verify,

    /// Re-merge process sequence relationships
    #[command(visible_alias = "7")]
    Repair,

    // ==================== Full runs ====================
    /// Clear the graph and rebuild it stage by stage
    #[command(visible_alias = "8")]
    Rebuild {
        /// Leave process sequences out
        #[arg(long)]
        no_workflow: bool,
    },

    /// Derive with exports, then merge into the graph without clearing
    #[command(visible_alias = "9")]
    Run {
        /// Leave process sequences out
        #[arg(long)]
        no_workflow: bool,
    },

    // ==================== Inspection ====================
    /// Process step statistics per SFC
    Stats {
        /// Number of longest SFCs to list
        #[arg(short = 'n', long, default_value = "10")]
        top: usize,

        /// Number of sample SFC → step → next SFC paths (with --source)
        #[arg(short, long, default_value = "3")]
        paths: usize,

        /// Compute from the source tables instead of the graph
        #[arg(long)]
        source: bool,
    },

    /// Show source and graph status
    #[command(visible_alias = "st")]
    Status,
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "lineage=info,lineage_core=info,lineage_store=info,warn"
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let root = std::env::current_dir()?;
    let config = if cli.strict {
        LineageConfig::load_strict(&root, cli.config.as_deref())?
    } else {
        LineageConfig::load(&root, cli.config.as_deref())
    };

    // Resolve output format: CLI flag > config default > Table
    let format = cli.format.unwrap_or_else(|| {
        config
            .default_format()
            .and_then(|f| f.parse().ok())
            .unwrap_or(OutputFormat::Table)
    });

    if let Some(use_color) = config.use_color() {
        colored::control::set_override(use_color);
    }

    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            let _ = Cli::command().print_help();
            println!();
            return Ok(());
        }
    };

    let ctx = Context::new(root, config, format, cli.quiet);

    match command {
        Commands::Clean { table, export } => clean::run(&ctx, &table, export),
        Commands::Derive {
            no_export,
            store_table,
        } => derive::run(&ctx, !no_export, store_table),
        Commands::Load { from_table } => load::run(&ctx, from_table),
        Commands::Workflow => workflow::run(&ctx),
        Commands::Dedup => audit::run_dedup(&ctx),
        Commands::Verify => audit::run_verify(&ctx),
        Commands::Repair => audit::run_repair(&ctx),
        Commands::Rebuild { no_workflow } => rebuild::run_rebuild(&ctx, !no_workflow),
        Commands::Run { no_workflow } => rebuild::run_all(&ctx, !no_workflow),
        Commands::Stats { top, paths, source } => stats::run(&ctx, top, paths, source),
        Commands::Status => status::run(&ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_numeric_aliases() {
        let cli = Cli::try_parse_from(["lineage", "8", "--no-workflow"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Rebuild { no_workflow: true })));

        let cli = Cli::try_parse_from(["lineage", "1", "sfc", "--export"]).unwrap();
        match cli.command {
            Some(Commands::Clean { table, export }) => {
                assert_eq!(table, "sfc");
                assert!(export);
            }
            _ => panic!("expected clean"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["lineage", "verify", "--format", "json", "--strict"]).unwrap();
        assert_eq!(cli.format, Some(OutputFormat::Json));
        assert!(cli.strict);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["lineage", "-q", "-v", "status"]).is_err());
    }
}
