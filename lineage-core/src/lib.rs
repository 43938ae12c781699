//! Lineage core - storage-agnostic traceability graph pipeline.
//!
//! This crate turns cleaned relational rows from a manufacturing execution
//! system into a typed lineage graph:
//!
//! - **Field cleaning**: declarative field mappings with datetime, numeric,
//!   string and placeholder normalization plus record-level filters
//! - **Reference edges**: join-based derivation of order → batch → inventory → SFC hops
//! - **Sequences**: per-SFC process step ordering and cross-SFC chaining
//! - **Loading**: batched merge-by-natural-key writes through [`graph::GraphStore`]
//! - **Auditing**: duplicate removal, isolated node scan, relationship counts
//!
//! Storage engines live outside this crate; they implement [`graph::GraphStore`]
//! and hand [`record::Table`] values to the stages.

pub mod audit;
pub mod clean;
pub mod error;
pub mod events;
pub mod graph;
pub mod keys;
pub mod loader;
pub mod model;
pub mod record;
pub mod reference;
pub mod sequence;
pub mod tables;

pub use audit::{DedupReport, IntegrityAuditor, RepairReport, VerifyReport};
pub use clean::{CleanReport, CleaningPlan, FieldCleaner};
pub use error::{LineageError, Result};
pub use events::{EventSink, PipelineEvent, RecordingSink, TracingSink};
pub use graph::{GraphStore, MemoryGraph};
pub use loader::{GraphLoader, LoadProgress, LoadReport, LoaderConfig};
pub use model::{Hop, NodeKey, NodeKind, NodeWrite, ReferenceEdge, RelType, RelWrite};
pub use record::{Cell, Record, Table};
pub use reference::{CleanedTables, ReferenceEdgeBuilder, ReferenceSet};
pub use sequence::{reconstruct, SequencePlan, WorkflowPath, WorkflowStats};
