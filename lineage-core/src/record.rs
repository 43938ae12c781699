//! Tabular rows exchanged between the relational source and the pipeline stages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{LineageError, Result};

/// A single field value.
///
/// Sources hand over text and numbers; the cleaner decides how each field is
/// interpreted, so no richer typing is carried here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    #[default]
    Null,
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Borrow the text of a `Text` cell.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Render the cell as text; null renders as the empty string.
    pub fn to_text(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Number(n) => format_number(*n),
            Cell::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "null"),
            other => write!(f, "{}", other.to_text()),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}

/// Integral values print without a fractional part so identifiers read back
/// unchanged.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// One row, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Cell>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from `(column, value)` pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Cell>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Cell> {
        self.fields.get(field)
    }

    /// Text of a `Text` field, or `""` for anything else.
    pub fn text(&self, field: &str) -> &str {
        self.fields
            .get(field)
            .and_then(Cell::as_text)
            .unwrap_or("")
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Cell>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Cell)> {
        self.fields.iter()
    }

    /// Compact `col=value` rendering used for drop samples in logs.
    pub fn summary(&self, columns: &[String]) -> String {
        columns
            .iter()
            .filter_map(|c| self.fields.get(c).map(|v| format!("{}={}", c, v)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Null and width profile of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnProfile {
    pub column: String,
    pub null_count: usize,
    pub max_length: usize,
}

/// A named, ordered collection of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Convenience constructor, mostly for tests and fixtures.
    pub fn from_rows(name: impl Into<String>, columns: &[&str], rows: Vec<Vec<Cell>>) -> Self {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let rows = rows
            .into_iter()
            .map(|values| Record::from_pairs(columns.iter().cloned().zip(values)))
            .collect();
        Self {
            name: name.into(),
            columns,
            rows,
        }
    }

    pub fn push(&mut self, record: Record) {
        self.rows.push(record);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Columns from `required` that this table lacks, in request order.
    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|c| !self.has_column(c))
            .map(|c| c.to_string())
            .collect()
    }

    /// Fail with [`LineageError::MissingColumns`] unless every column exists.
    pub fn require(&self, required: &[&str]) -> Result<()> {
        let missing = self.missing_columns(required);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(LineageError::MissingColumns {
                table: self.name.clone(),
                columns: missing,
            })
        }
    }

    /// Per-column null counts and maximum text length.
    pub fn profile(&self) -> Vec<ColumnProfile> {
        self.columns
            .iter()
            .map(|column| {
                let mut null_count = 0;
                let mut max_length = 0;
                for row in &self.rows {
                    match row.get(column) {
                        None | Some(Cell::Null) => null_count += 1,
                        Some(cell) => max_length = max_length.max(cell.to_text().chars().count()),
                    }
                }
                ColumnProfile {
                    column: column.clone(),
                    null_count,
                    max_length,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_text_rendering() {
        assert_eq!(Cell::Number(12345.0).to_text(), "12345");
        assert_eq!(Cell::Number(1.25).to_text(), "1.25");
        assert_eq!(Cell::Null.to_text(), "");
        assert_eq!(Cell::text("S1").to_text(), "S1");
        assert_eq!(Cell::Null.to_string(), "null");
    }

    #[test]
    fn test_cell_json_is_untagged() {
        let json = serde_json::to_string(&vec![Cell::Null, Cell::Number(2.5), Cell::text("x")])
            .unwrap();
        assert_eq!(json, r#"[null,2.5,"x"]"#);
    }

    #[test]
    fn test_require_lists_every_missing_column() {
        let table = Table::from_rows("sfc", &["primary_key"], vec![]);
        let err = table.require(&["primary_key", "sfc_code", "created_at"]).unwrap_err();
        match err {
            LineageError::MissingColumns { table, columns } => {
                assert_eq!(table, "sfc");
                assert_eq!(columns, vec!["sfc_code", "created_at"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_profile_counts_nulls_and_width() {
        let table = Table::from_rows(
            "t",
            &["a", "b"],
            vec![
                vec![Cell::text("abc"), Cell::Null],
                vec![Cell::Null, Cell::Number(10.0)],
                vec![Cell::text("工序"), Cell::Null],
            ],
        );
        let profile = table.profile();
        assert_eq!(profile[0].null_count, 1);
        assert_eq!(profile[0].max_length, 3);
        assert_eq!(profile[1].null_count, 2);
        assert_eq!(profile[1].max_length, 2);
    }

    #[test]
    fn test_record_text_defaults_to_empty() {
        let record = Record::from_pairs([("a", Cell::Number(1.0))]);
        assert_eq!(record.text("a"), "");
        assert_eq!(record.text("missing"), "");
    }
}
