//! Error types for lineage-core.

use thiserror::Error;

/// Result type alias for lineage-core operations.
pub type Result<T> = std::result::Result<T, LineageError>;

/// Errors that can occur while cleaning, deriving or loading lineage data.
///
/// Row-level defects never surface here: they drop the row and are counted in
/// the stage reports instead.
#[derive(Error, Debug)]
pub enum LineageError {
    /// A table lacks columns that a stage cannot work without.
    #[error("Table '{table}' is missing required columns: {}", .columns.join(", "))]
    MissingColumns {
        /// Logical table name.
        table: String,
        /// Every absent column, in the order they were requested.
        columns: Vec<String>,
    },

    /// A stage asked for a table that was never provided.
    #[error("Unknown source table: {name}")]
    UnknownTable {
        /// Logical table name.
        name: String,
    },

    /// The graph store rejected an operation.
    #[error("Graph store error: {message}")]
    Store {
        /// Description of the store failure.
        message: String,
    },

    /// The relational source could not be read.
    #[error("Source error: {message}")]
    Source {
        /// Description of the source failure.
        message: String,
    },

    /// IO error while reading or writing files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization of property bags.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LineageError {
    /// Wrap any displayable store failure.
    pub fn store(message: impl std::fmt::Display) -> Self {
        LineageError::Store {
            message: message.to_string(),
        }
    }

    /// Wrap any displayable source failure.
    pub fn source(message: impl std::fmt::Display) -> Self {
        LineageError::Source {
            message: message.to_string(),
        }
    }

    /// Whether the error aborts only the dependent derivation.
    pub fn is_column_missing(&self) -> bool {
        matches!(self, LineageError::MissingColumns { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LineageError::MissingColumns {
            table: "production_log".to_string(),
            columns: vec!["sfc_no".to_string(), "weight".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Table 'production_log' is missing required columns: sfc_no, weight"
        );

        let err = LineageError::store("batch rejected");
        assert_eq!(err.to_string(), "Graph store error: batch rejected");
    }

    #[test]
    fn test_column_missing_classification() {
        let err = LineageError::MissingColumns {
            table: "sfc".to_string(),
            columns: vec!["sfc_code".to_string()],
        };
        assert!(err.is_column_missing());
        assert!(!LineageError::source("offline").is_column_missing());
    }
}
