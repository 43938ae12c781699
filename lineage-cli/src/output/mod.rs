//! Output formatting for the lineage CLI.
//!
//! Every command result is a serializable summary rendered either as a
//! colored, human-readable report or as JSON for machine consumption.

use clap::ValueEnum;
use serde::Serialize;
use std::str::FromStr;
use tabled::{builder::Builder, settings::Style};

mod json;

pub use self::json::JsonOutput;

/// Output format for CLI results
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable report (default)
    #[default]
    Table,
    /// JSON format for machine consumption
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: '{}'", s)),
        }
    }
}

/// Types that render as a human-readable report.
pub trait TableDisplay: Serialize {
    fn to_table(&self) -> String;
}

/// Render `data` in `format`.
pub fn render<T: TableDisplay>(data: &T, format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => data.to_table(),
        OutputFormat::Json => JsonOutput::format(data),
    }
}

/// Render and print to stdout.
pub fn print<T: TableDisplay>(data: &T, format: OutputFormat) {
    println!("{}", render(data, format));
}

/// Rounded table from a header and rows.
pub fn grid<I, R>(header: &[&str], rows: I) -> String
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = String>,
{
    let mut builder = Builder::default();
    builder.push_record(header.iter().map(|h| h.to_string()));
    for row in rows {
        builder.push_record(row);
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

/// Two-column count table, with a total row.
pub fn count_table<'a, K, I>(label: &str, counts: I) -> String
where
    K: std::fmt::Display + 'a,
    I: IntoIterator<Item = (&'a K, &'a usize)>,
{
    let mut total = 0;
    let mut rows: Vec<Vec<String>> = counts
        .into_iter()
        .map(|(k, n)| {
            total += n;
            vec![k.to_string(), n.to_string()]
        })
        .collect();
    rows.push(vec!["total".to_string(), total.to_string()]);
    grid(&[label, "count"], rows)
}

/// Format a millisecond duration for humans.
pub fn duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}
