//! Lineage store - DuckDB adapters for the lineage pipeline.
//!
//! - [`source::SourceDb`]: the relational source session, with parquet and
//!   CSV files registered as views
//! - [`storage::GraphBase`]: the graph store session, implementing
//!   [`lineage_core::GraphStore`]
//! - [`columnar::ColumnarWriter`]: content-hashed parquet and CSV exports
//! - [`build::RebuildPipeline`]: the full rebuild state machine

pub mod build;
pub mod columnar;
pub mod source;
pub mod storage;

pub use build::{RebuildInput, RebuildPipeline, RebuildReport, Stage};
pub use columnar::{content_hash, ColumnarWriter, ExportedFile};
pub use source::{FileFormat, SourceDb};
pub use storage::{GraphBase, GraphStats};
