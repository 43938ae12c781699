//! Columnar exports of cleaned and derived tables.
//!
//! Every export is named after its content hash, so an unchanged table maps
//! to the same file, and a `<name>_latest` copy always points at the newest
//! one.

use anyhow::{Context, Result};
use duckdb::types::Value;
use duckdb::{appender_params_from_iter, Connection};
use lineage_core::{Cell, ReferenceEdge, Table};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::source::{escape_literal, quote_ident};

const PARQUET_SUFFIX: &str = "snappy.parquet";
const HASH_CHARS: usize = 8;

/// A file written by [`ColumnarWriter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedFile {
    pub path: PathBuf,
    /// Stable alias, absent for one-off exports.
    pub latest: Option<PathBuf>,
    pub rows: usize,
    pub hash: String,
}

/// Short blake3 digest over column names and cell values.
pub fn content_hash(table: &Table) -> String {
    let mut hasher = blake3::Hasher::new();
    for column in &table.columns {
        hasher.update(column.as_bytes());
        hasher.update(&[0x1f]);
    }
    for row in &table.rows {
        hasher.update(&[0x1e]);
        for column in &table.columns {
            match row.get(column) {
                None | Some(Cell::Null) => hasher.update(&[0]),
                Some(Cell::Number(n)) => hasher.update(&n.to_le_bytes()),
                Some(Cell::Text(s)) => hasher.update(s.as_bytes()),
            };
            hasher.update(&[0x1f]);
        }
    }
    hasher.finalize().to_hex().as_str()[..HASH_CHARS].to_string()
}

/// Writes parquet and CSV files through an in-memory DuckDB.
pub struct ColumnarWriter {
    dir: PathBuf,
    conn: Connection,
}

impl ColumnarWriter {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create export directory: {:?}", dir))?;
        let conn = Connection::open_in_memory().context("Failed to open export session")?;
        Ok(Self { dir, conn })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `<name>_<hash>.snappy.parquet` and refresh `<name>_latest.snappy.parquet`.
    pub fn write_parquet(&self, table: &Table) -> Result<ExportedFile> {
        let hash = content_hash(table);
        let path = self
            .dir
            .join(format!("{}_{}.{}", table.name, hash, PARQUET_SUFFIX));
        let latest = self
            .dir
            .join(format!("{}_latest.{}", table.name, PARQUET_SUFFIX));

        self.stage(table)?;
        self.copy_out(&path, "FORMAT PARQUET, COMPRESSION SNAPPY")?;
        std::fs::copy(&path, &latest)
            .with_context(|| format!("Failed to refresh {:?}", latest))?;

        info!("Exported {} rows of {} to {:?}", table.len(), table.name, path);
        Ok(ExportedFile {
            path,
            latest: Some(latest),
            rows: table.len(),
            hash,
        })
    }

    /// Reference edges as CSV with a header, in export column order.
    pub fn write_reference_csv(
        &self,
        edges: &[ReferenceEdge],
        file_name: &str,
    ) -> Result<ExportedFile> {
        let table = ReferenceEdge::to_table("reference", edges);
        let path = self.dir.join(file_name);
        self.stage(&table)?;
        self.copy_out(&path, "FORMAT CSV, HEADER")?;
        info!("Exported {} reference edges to {:?}", edges.len(), path);
        Ok(ExportedFile {
            path,
            latest: None,
            rows: table.len(),
            hash: content_hash(&table),
        })
    }

    /// Load `table` into the scratch `export` table.
    fn stage(&self, table: &Table) -> Result<()> {
        let types: Vec<ColumnType> = table
            .columns
            .iter()
            .map(|c| ColumnType::infer(table, c))
            .collect();
        let columns = table
            .columns
            .iter()
            .zip(&types)
            .map(|(c, t)| format!("{} {}", quote_ident(c), t.sql()))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn
            .execute_batch(&format!("CREATE OR REPLACE TABLE export ({})", columns))
            .context("Failed to create export table")?;

        let mut appender = self.conn.appender("export")?;
        for row in &table.rows {
            let values = table
                .columns
                .iter()
                .zip(&types)
                .map(|(c, t)| t.value(row.get(c)));
            appender.append_row(appender_params_from_iter(values))?;
        }
        appender.flush()?;
        Ok(())
    }

    fn copy_out(&self, path: &Path, options: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!(
                "COPY export TO '{}' ({})",
                escape_literal(&path.to_string_lossy()),
                options
            ))
            .with_context(|| format!("Failed to write {:?}", path))
    }
}

/// Column typing: all-integral numbers become BIGINT, other all-number
/// columns DOUBLE, everything else VARCHAR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    BigInt,
    Double,
    Varchar,
}

impl ColumnType {
    fn infer(table: &Table, column: &str) -> Self {
        let mut seen = false;
        let mut integral = true;
        for row in &table.rows {
            match row.get(column) {
                Some(Cell::Number(n)) => {
                    seen = true;
                    integral &= n.fract() == 0.0 && n.abs() < 9.0e15;
                }
                None | Some(Cell::Null) => {}
                Some(Cell::Text(_)) => return ColumnType::Varchar,
            }
        }
        match (seen, integral) {
            (false, _) => ColumnType::Varchar,
            (true, true) => ColumnType::BigInt,
            (true, false) => ColumnType::Double,
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Varchar => "VARCHAR",
        }
    }

    fn value(&self, cell: Option<&Cell>) -> Value {
        match (cell, self) {
            (None | Some(Cell::Null), _) => Value::Null,
            (Some(Cell::Number(n)), ColumnType::BigInt) => Value::BigInt(*n as i64),
            (Some(Cell::Number(n)), ColumnType::Double) => Value::Double(*n),
            (Some(other), _) => Value::Text(other.to_text()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceDb;
    use lineage_core::Hop;
    use tempfile::tempdir;

    fn table() -> Table {
        Table::from_rows(
            "sfc",
            &["sfc_no", "weight"],
            vec![
                vec![Cell::text("S1"), Cell::Number(1.25)],
                vec![Cell::text("S2"), Cell::Null],
            ],
        )
    }

    #[test]
    fn test_hash_tracks_content() {
        let a = table();
        let mut b = table();
        assert_eq!(content_hash(&a), content_hash(&b));
        b.rows[0].insert("weight", Cell::Number(1.5));
        assert_ne!(content_hash(&a), content_hash(&b));
        assert_eq!(content_hash(&a).len(), HASH_CHARS);
    }

    #[test]
    fn test_parquet_export_and_latest_alias() {
        let dir = tempdir().unwrap();
        let writer = ColumnarWriter::new(dir.path().join("out")).unwrap();
        let file = writer.write_parquet(&table()).unwrap();

        let name = file.path.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name, format!("sfc_{}.snappy.parquet", file.hash));
        let latest = file.latest.clone().unwrap();
        assert!(latest.ends_with("sfc_latest.snappy.parquet"));

        let source = SourceDb::open_in_memory().unwrap();
        source.register_file("sfc", &latest).unwrap();
        let back = source.fetch("sfc", "sfc").unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.rows[0].text("weight"), "1.25");
    }

    #[test]
    fn test_reference_csv_header_order() {
        let dir = tempdir().unwrap();
        let writer = ColumnarWriter::new(dir.path()).unwrap();
        let edges = vec![ReferenceEdge::for_hop(
            1,
            Hop::SfcSplitMerge,
            "S1",
            "S2",
            Some("2024/01/01 10:00:00".to_string()),
            None,
        )];
        let file = writer.write_reference_csv(&edges, "reference.csv").unwrap();
        let text = std::fs::read_to_string(&file.path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("handle,from_node_type,from_node,from_node_time,to_node_type,to_node,to_node_time,description")
        );
        assert_eq!(
            lines.next(),
            Some("1,sfc,S1,2024/01/01 10:00:00,sfc,S2,,sfc_split_merge")
        );
    }
}
