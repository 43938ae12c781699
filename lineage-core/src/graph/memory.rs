//! In-process graph store.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::{
    collapse_last, ClearSummary, DeleteSummary, DuplicateGroup, GraphStore, NodeId, WriteSummary,
};
use crate::error::{LineageError, Result};
use crate::model::{NodeKey, NodeKind, NodeWrite, RelType, RelWrite};

const INDEX_COUNT: usize = NodeKind::ALL.len() + 2;

#[derive(Debug, Clone)]
struct StoredNode {
    id: NodeId,
    key: NodeKey,
    properties: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct StoredRel {
    rel_type: RelType,
    from: NodeId,
    to: NodeId,
    properties: Map<String, Value>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: NodeId,
    nodes: Vec<StoredNode>,
    relationships: Vec<StoredRel>,
    indexed: bool,
    constrained: bool,
}

impl Inner {
    fn find(&self, key: &NodeKey) -> Option<usize> {
        self.nodes.iter().position(|n| &n.key == key)
    }

    fn push_node(&mut self, key: NodeKey, properties: Map<String, Value>) -> NodeId {
        self.next_id += 1;
        let id = self.next_id;
        self.nodes.push(StoredNode {
            id,
            key,
            properties,
        });
        id
    }

    fn duplicate_groups(&self, kind: NodeKind) -> Vec<DuplicateGroup> {
        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, Vec<NodeId>> = HashMap::new();
        for node in self.nodes.iter().filter(|n| n.key.kind == kind) {
            let ids = groups.entry(node.key.key.as_str()).or_insert_with(|| {
                order.push(node.key.key.as_str());
                Vec::new()
            });
            ids.push(node.id);
        }
        order
            .into_iter()
            .filter_map(|key| {
                let ids = groups.remove(key)?;
                (ids.len() > 1).then(|| DuplicateGroup {
                    key: key.to_string(),
                    ids,
                })
            })
            .collect()
    }
}

/// Graph store held entirely in memory.
///
/// Mirrors the merge and constraint semantics of the on-disk store so core
/// stages can be exercised without a database.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    inner: Mutex<Inner>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a node without merging, as an unconstrained import would.
    pub fn insert_unmerged(&self, write: &NodeWrite) -> Result<NodeId> {
        let mut inner = self.lock();
        if inner.constrained && inner.find(&write.key).is_some() {
            return Err(LineageError::store(format!(
                "uniqueness constraint violated for {}",
                write.key
            )));
        }
        Ok(inner.push_node(write.key.clone(), write.properties.clone()))
    }

    /// Properties of the first node with `key`.
    pub fn node(&self, key: &NodeKey) -> Option<Map<String, Value>> {
        let inner = self.lock();
        inner.find(key).map(|i| inner.nodes[i].properties.clone())
    }

    /// Properties of the relationship of `rel_type` between two keys.
    pub fn relationship(
        &self,
        rel_type: RelType,
        from: &NodeKey,
        to: &NodeKey,
    ) -> Option<Map<String, Value>> {
        let inner = self.lock();
        let from = inner.nodes[inner.find(from)?].id;
        let to = inner.nodes[inner.find(to)?].id;
        inner
            .relationships
            .iter()
            .find(|r| r.rel_type == rel_type && r.from == from && r.to == to)
            .map(|r| r.properties.clone())
    }

    pub fn is_constrained(&self) -> bool {
        self.lock().constrained
    }

    pub fn is_indexed(&self) -> bool {
        self.lock().indexed
    }
}

impl GraphStore for MemoryGraph {
    fn clear_all(&self) -> Result<ClearSummary> {
        let mut inner = self.lock();
        let summary = ClearSummary {
            nodes: inner.nodes.len(),
            relationships: inner.relationships.len(),
        };
        inner.nodes.clear();
        inner.relationships.clear();
        Ok(summary)
    }

    fn create_indexes(&self) -> Result<usize> {
        self.lock().indexed = true;
        Ok(INDEX_COUNT)
    }

    fn create_constraints(&self) -> Result<usize> {
        let mut inner = self.lock();
        for kind in NodeKind::ALL {
            if let Some(group) = inner.duplicate_groups(kind).first() {
                return Err(LineageError::store(format!(
                    "cannot declare uniqueness on {}: key '{}' appears {} times",
                    kind,
                    group.key,
                    group.ids.len()
                )));
            }
        }
        inner.constrained = true;
        Ok(NodeKind::ALL.len())
    }

    fn drop_constraints(&self) -> Result<usize> {
        let mut inner = self.lock();
        let dropped = if inner.constrained {
            NodeKind::ALL.len()
        } else {
            0
        };
        inner.constrained = false;
        Ok(dropped)
    }

    fn upsert_nodes(&self, batch: &[NodeWrite]) -> Result<WriteSummary> {
        let mut inner = self.lock();
        let mut summary = WriteSummary::default();
        for write in collapse_last(batch, |w| w.key.clone()) {
            match inner.find(&write.key) {
                Some(i) => {
                    inner.nodes[i].properties = write.properties.clone();
                    summary.updated += 1;
                }
                None => {
                    inner.push_node(write.key.clone(), write.properties.clone());
                    summary.created += 1;
                }
            }
        }
        Ok(summary)
    }

    fn upsert_relationships(&self, batch: &[RelWrite]) -> Result<WriteSummary> {
        let mut inner = self.lock();
        let mut summary = WriteSummary::default();
        for write in collapse_last(batch, |w| (w.rel_type, w.from.clone(), w.to.clone())) {
            let (from, to) = match (inner.find(&write.from), inner.find(&write.to)) {
                (Some(f), Some(t)) => (inner.nodes[f].id, inner.nodes[t].id),
                _ => {
                    summary.unmatched += 1;
                    continue;
                }
            };
            let existing = inner
                .relationships
                .iter()
                .position(|r| r.rel_type == write.rel_type && r.from == from && r.to == to);
            match existing {
                Some(i) => {
                    inner.relationships[i].properties = write.properties.clone();
                    summary.updated += 1;
                }
                None => {
                    inner.relationships.push(StoredRel {
                        rel_type: write.rel_type,
                        from,
                        to,
                        properties: write.properties.clone(),
                    });
                    summary.created += 1;
                }
            }
        }
        Ok(summary)
    }

    fn duplicate_groups(&self, kind: NodeKind) -> Result<Vec<DuplicateGroup>> {
        Ok(self.lock().duplicate_groups(kind))
    }

    fn delete_nodes(&self, ids: &[NodeId]) -> Result<DeleteSummary> {
        let doomed: HashSet<NodeId> = ids.iter().copied().collect();
        let mut inner = self.lock();
        let nodes_before = inner.nodes.len();
        let rels_before = inner.relationships.len();
        inner
            .relationships
            .retain(|r| !doomed.contains(&r.from) && !doomed.contains(&r.to));
        inner.nodes.retain(|n| !doomed.contains(&n.id));
        Ok(DeleteSummary {
            nodes: nodes_before - inner.nodes.len(),
            relationships: rels_before - inner.relationships.len(),
        })
    }

    fn node_counts(&self) -> Result<BTreeMap<NodeKind, usize>> {
        let inner = self.lock();
        let mut counts = BTreeMap::new();
        for node in &inner.nodes {
            *counts.entry(node.key.kind).or_default() += 1;
        }
        Ok(counts)
    }

    fn relationship_counts(&self) -> Result<BTreeMap<RelType, usize>> {
        let inner = self.lock();
        let mut counts = BTreeMap::new();
        for rel in &inner.relationships {
            *counts.entry(rel.rel_type).or_default() += 1;
        }
        Ok(counts)
    }

    fn isolated_counts(&self) -> Result<BTreeMap<NodeKind, usize>> {
        let inner = self.lock();
        let connected: HashSet<NodeId> = inner
            .relationships
            .iter()
            .flat_map(|r| [r.from, r.to])
            .collect();
        let mut counts = BTreeMap::new();
        for node in inner.nodes.iter().filter(|n| !connected.contains(&n.id)) {
            *counts.entry(node.key.kind).or_default() += 1;
        }
        Ok(counts)
    }

    fn steps_per_sfc(&self) -> Result<Vec<(String, usize)>> {
        let inner = self.lock();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for node in &inner.nodes {
            if let Some((sfc, _)) = node.key.step_parts() {
                *counts.entry(sfc.to_string()).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }
}
