//! Relational source session.
//!
//! MES extracts arrive either as tables in a DuckDB database or as parquet
//! and CSV files registered as views. Every value is read back as text;
//! typing is the cleaner's job.

use anyhow::{bail, Context, Result};
use duckdb::{appender_params_from_iter, params, Connection};
use lineage_core::{Cell, Record, Table};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Kinds of file the source can register as a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Parquet,
    Csv,
}

impl FileFormat {
    /// Detect from the file extension; `.snappy.parquet` counts as parquet.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "parquet" | "pq" => Some(FileFormat::Parquet),
            "csv" | "tsv" | "txt" => Some(FileFormat::Csv),
            _ => None,
        }
    }

    fn reader(&self, path: &str) -> String {
        match self {
            FileFormat::Parquet => format!("read_parquet('{}')", path),
            FileFormat::Csv => {
                format!("read_csv_auto('{}', header = true, all_varchar = true)", path)
            }
        }
    }
}

/// An open source database.
pub struct SourceDb {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SourceDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open source database: {:?}", path))?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Scratch source, typically populated from registered files.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory source")?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Fails fast when the source cannot answer a trivial query.
    pub fn ping(&self) -> Result<()> {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i32>(0))
            .context("Source database did not answer")?;
        Ok(())
    }

    /// Expose a parquet or CSV file as view `name`.
    pub fn register_file(&self, name: &str, path: &Path) -> Result<()> {
        let Some(format) = FileFormat::from_path(path) else {
            bail!("Unsupported source file type: {:?}", path);
        };
        if !path.exists() {
            bail!("Source file not found: {:?}", path);
        }
        let literal = escape_literal(&path.to_string_lossy());
        self.conn
            .execute_batch(&format!(
                "CREATE OR REPLACE VIEW {} AS SELECT * FROM {}",
                quote_ident(name),
                format.reader(&literal)
            ))
            .with_context(|| format!("Failed to register {:?} as {}", path, name))?;
        info!("Registered {:?} as source table {}", path, name);
        Ok(())
    }

    pub fn has_table(&self, name: &str) -> Result<bool> {
        let count: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn columns(&self, name: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT name FROM pragma_table_info('{}') ORDER BY cid",
            escape_literal(name)
        ))?;
        let mut rows = stmt.query([])?;
        let mut columns = Vec::new();
        while let Some(row) = rows.next()? {
            columns.push(row.get::<_, String>(0)?);
        }
        Ok(columns)
    }

    /// Read a whole table as text cells. `logical` names the result.
    pub fn fetch(&self, physical: &str, logical: &str) -> Result<Table> {
        if !self.has_table(physical)? {
            bail!("Source table not found: {}", physical);
        }
        let columns = self.columns(physical)?;
        if columns.is_empty() {
            return Ok(Table::new(logical, columns));
        }
        let select = columns
            .iter()
            .map(|c| format!("CAST({} AS VARCHAR)", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {} FROM {}", select, quote_ident(physical));
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("Failed to prepare read of {}", physical))?;
        let mut rows = stmt.query([])?;

        let mut table = Table::new(logical, columns.clone());
        while let Some(row) = rows.next()? {
            let mut record = Record::new();
            for (i, column) in columns.iter().enumerate() {
                let value: Option<String> = row.get(i)?;
                record.insert(column.as_str(), value.map(Cell::Text).unwrap_or(Cell::Null));
            }
            table.push(record);
        }
        debug!("Fetched {} rows from {}", table.len(), physical);
        Ok(table)
    }

    /// Replace table `name` with the contents of `table`, all columns text.
    pub fn write_table(&self, name: &str, table: &Table) -> Result<()> {
        let ident = quote_ident(name);
        let columns = table
            .columns
            .iter()
            .map(|c| format!("{} VARCHAR", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn
            .execute_batch(&format!(
                "CREATE OR REPLACE TABLE {ident} ({columns})"
            ))
            .with_context(|| format!("Failed to create source table {}", name))?;
        let mut appender = self.conn.appender(name)?;
        for row in &table.rows {
            let values = table.columns.iter().map(|c| match row.get(c) {
                None | Some(Cell::Null) => None,
                Some(cell) => Some(cell.to_text()),
            });
            appender.append_row(appender_params_from_iter(values))?;
        }
        appender.flush()?;
        Ok(())
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}
