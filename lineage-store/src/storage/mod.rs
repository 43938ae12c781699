//! Storage layer for lineage.
//!
//! Provides DuckDB-based storage for the lineage graph with:
//! - Schema management
//! - Merge-by-natural-key node and relationship writes
//! - Index and uniqueness declaration
//! - Duplicate grouping, cascading delete and count queries

mod graphbase;
mod schema;

pub use graphbase::{GraphBase, GraphStats};
pub use schema::{SCHEMA_VERSION, UNIQUE_KEY_INDEX};
