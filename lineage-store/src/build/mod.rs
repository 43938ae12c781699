//! Full graph rebuild.
//!
//! Runs the stages in a fixed order:
//! 1. CLEAR-ALL: remove every node and relationship (skipped for incremental runs)
//! 2. INDEX: declare natural-key, type and endpoint indexes
//! 3. CONSTRAIN: declare natural-key uniqueness
//! 4. LOAD-NODES: merge reference and workflow nodes
//! 5. LOAD-EDGES: merge reference and workflow relationships
//! 6. VERIFY: counts and isolated-node scan
//!
//! A failed stage is reported and the remaining stages still run.

mod pipeline;

pub use pipeline::{RebuildInput, RebuildPipeline, RebuildReport, Stage, StageReport};
