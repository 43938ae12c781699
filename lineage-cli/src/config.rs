//! Lineage configuration loading from `.lineagerc.toml`.
//!
//! Configuration is optional; every section falls back to defaults.
//!
//! # Example Configuration
//!
//! ```toml
//! [source]
//! database = "mes.duckdb"
//!
//! [source.tables]
//! production_log = "mes_production_log"
//!
//! [source.files]
//! lot_history = "extracts/lot_history.snappy.parquet"
//!
//! [store]
//! path = ".lineage/graph.duckdb"
//!
//! [loader]
//! batch_size = 1000
//! pause_every = 5000
//! pause_ms = 2000
//!
//! [cleaning]
//! min_process_len = 5
//!
//! [cleaning.tables.production_log]
//! min_process_len = 3
//!
//! [export]
//! directory = "output"
//!
//! [output]
//! format = "table"
//! color = true
//! ```

use anyhow::{Context, Result};
use lineage_core::clean::CleaningPlan;
use lineage_core::LoaderConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".lineagerc.toml";

/// Root configuration structure loaded from `.lineagerc.toml`.
#[derive(Debug, Deserialize, Default)]
pub struct LineageConfig {
    /// Where raw MES tables come from.
    #[serde(default)]
    pub source: SourceConfig,

    /// Graph database location.
    #[serde(default)]
    pub store: StoreConfig,

    /// Batch sizing and throttling.
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Cleaning overrides.
    #[serde(default)]
    pub cleaning: CleaningConfig,

    /// Export locations.
    #[serde(default)]
    pub export: ExportConfig,

    /// Output formatting preferences.
    #[serde(default)]
    pub output: OutputSettings,
}

/// Relational source configuration.
#[derive(Debug, Deserialize, Default)]
pub struct SourceConfig {
    /// DuckDB database holding the MES tables. Without one the source is an
    /// in-memory session fed only by `files`.
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Logical table name → physical table name.
    #[serde(default)]
    pub tables: BTreeMap<String, String>,

    /// Logical table name → parquet or CSV file registered as a view.
    #[serde(default)]
    pub files: BTreeMap<String, PathBuf>,
}

impl SourceConfig {
    /// Physical name for a logical table; files register under the logical name.
    pub fn physical<'a>(&'a self, logical: &'a str) -> &'a str {
        if self.files.contains_key(logical) {
            return logical;
        }
        self.tables.get(logical).map(String::as_str).unwrap_or(logical)
    }
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".lineage").join("graph.duckdb")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Cleaning overrides, global and per logical table.
#[derive(Debug, Deserialize, Default)]
pub struct CleaningConfig {
    /// Identifiers this long or shorter are dropped.
    #[serde(default)]
    pub min_process_len: Option<usize>,

    #[serde(default)]
    pub tables: BTreeMap<String, TableOverrides>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct TableOverrides {
    #[serde(default)]
    pub min_process_len: Option<usize>,

    /// Set to `false` to keep rows with control characters or `@`.
    #[serde(default)]
    pub reject_control_chars: Option<bool>,
}

impl CleaningConfig {
    /// Apply the global and table-level overrides to a built-in plan.
    pub fn apply(&self, table: &str, mut plan: CleaningPlan) -> CleaningPlan {
        if let Some(len) = self.min_process_len {
            plan = plan.with_min_process_len(len);
        }
        if let Some(overrides) = self.tables.get(table) {
            if let Some(len) = overrides.min_process_len {
                plan = plan.with_min_process_len(len);
            }
            if let Some(reject) = overrides.reject_control_chars {
                plan.reject_control_chars = reject;
            }
        }
        plan
    }
}

#[derive(Debug, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub directory: PathBuf,

    /// File name of the reference edge CSV.
    #[serde(default = "default_reference_csv")]
    pub reference_csv: String,
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_reference_csv() -> String {
    "reference.csv".to_string()
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            directory: default_export_dir(),
            reference_csv: default_reference_csv(),
        }
    }
}

/// Output formatting preferences. Command-line flags override these.
#[derive(Debug, Deserialize, Default)]
pub struct OutputSettings {
    /// Valid values: `table`, `json`
    #[serde(default)]
    pub format: Option<String>,

    #[serde(default)]
    pub color: Option<bool>,
}

impl LineageConfig {
    /// Load configuration from `path`, or `.lineagerc.toml` in `root`.
    ///
    /// If the file doesn't exist or can't be parsed, returns defaults.
    /// Parse errors are logged as warnings but don't cause failures.
    pub fn load(root: &Path, path: Option<&Path>) -> Self {
        let config_path = config_path(root, path);
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match toml::from_str::<LineageConfig>(&content) {
                    Ok(config) => return config.rooted(root),
                    Err(e) => {
                        tracing::warn!("Failed to parse {}: {}", config_path.display(), e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", config_path.display(), e);
                }
            }
        }
        Self::default().rooted(root)
    }

    /// Like [`LineageConfig::load`], but a file that exists and fails to
    /// read or parse is an error.
    pub fn load_strict(root: &Path, path: Option<&Path>) -> Result<Self> {
        let config_path = config_path(root, path);
        if !config_path.exists() {
            return Ok(Self::default().rooted(root));
        }
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: LineageConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;
        Ok(config.rooted(root))
    }

    /// Resolve relative paths against `root`.
    fn rooted(mut self, root: &Path) -> Self {
        let resolve = |p: &PathBuf| if p.is_absolute() { p.clone() } else { root.join(p) };
        self.source.database = self.source.database.as_ref().map(resolve);
        for file in self.source.files.values_mut() {
            *file = resolve(&*file);
        }
        self.store.path = resolve(&self.store.path);
        self.export.directory = resolve(&self.export.directory);
        self
    }

    pub fn default_format(&self) -> Option<&str> {
        self.output.format.as_deref()
    }

    pub fn use_color(&self) -> Option<bool> {
        self.output.color
    }
}

fn config_path(root: &Path, path: Option<&Path>) -> PathBuf {
    match path {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => root.join(p),
        None => root.join(CONFIG_FILE),
    }
}
