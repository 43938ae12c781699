//! Graph store abstraction.
//!
//! Core stages talk to the graph through [`GraphStore`] only. Nodes are
//! merged by kind and natural key, relationships by type and endpoints, so
//! replaying the same writes never duplicates anything.

mod memory;

pub use memory::MemoryGraph;

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::model::{NodeKind, NodeWrite, RelType, RelWrite};

/// Store-assigned node identity. Increases with insertion order.
pub type NodeId = i64;

/// Outcome of one bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub created: usize,
    pub updated: usize,
    /// Relationships whose endpoints were not found; always 0 for nodes.
    pub unmatched: usize,
}

impl WriteSummary {
    pub fn written(&self) -> usize {
        self.created + self.updated
    }

    pub fn absorb(&mut self, other: WriteSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.unmatched += other.unmatched;
    }
}

/// Nodes sharing one natural key, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub key: String,
    pub ids: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub nodes: usize,
    pub relationships: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearSummary {
    pub nodes: usize,
    pub relationships: usize,
}

/// A lineage graph session.
///
/// Implementations own their connection; dropping the store releases it.
pub trait GraphStore {
    /// Remove every node and relationship. Indexes and constraints stay.
    fn clear_all(&self) -> Result<ClearSummary>;

    /// Declare natural-key, relationship-type and endpoint indexes.
    /// Returns the number of indexes declared.
    fn create_indexes(&self) -> Result<usize>;

    /// Declare a uniqueness constraint per node kind on its natural key.
    /// Fails while duplicate keys exist.
    fn create_constraints(&self) -> Result<usize>;

    /// Lift the uniqueness constraints. Returns how many were in place.
    fn drop_constraints(&self) -> Result<usize>;

    /// Merge nodes by kind and natural key; an existing node takes the
    /// written properties. Within one batch the last write for a key wins.
    fn upsert_nodes(&self, batch: &[NodeWrite]) -> Result<WriteSummary>;

    /// Merge relationships by type and endpoint keys. A write whose
    /// endpoints do not both exist is counted as unmatched.
    fn upsert_relationships(&self, batch: &[RelWrite]) -> Result<WriteSummary>;

    /// Groups of nodes of `kind` sharing a natural key.
    fn duplicate_groups(&self, kind: NodeKind) -> Result<Vec<DuplicateGroup>>;

    /// Delete nodes together with their incident relationships.
    fn delete_nodes(&self, ids: &[NodeId]) -> Result<DeleteSummary>;

    fn node_counts(&self) -> Result<BTreeMap<NodeKind, usize>>;

    fn relationship_counts(&self) -> Result<BTreeMap<RelType, usize>>;

    /// Nodes with no incident relationship, by kind.
    fn isolated_counts(&self) -> Result<BTreeMap<NodeKind, usize>>;

    /// Number of process steps per SFC, ordered by SFC key.
    fn steps_per_sfc(&self) -> Result<Vec<(String, usize)>>;
}

/// Collapse a batch so each key appears once, keeping the last write at the
/// position of the first.
pub fn collapse_last<T, K, F>(batch: &[T], key: F) -> Vec<&T>
where
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut positions: std::collections::HashMap<K, usize> = std::collections::HashMap::new();
    let mut out: Vec<&T> = Vec::with_capacity(batch.len());
    for item in batch {
        match positions.get(&key(item)) {
            Some(&pos) => out[pos] = item,
            None => {
                positions.insert(key(item), out.len());
                out.push(item);
            }
        }
    }
    out
}
