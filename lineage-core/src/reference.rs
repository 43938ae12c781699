//! Reference edge derivation.
//!
//! Each hop is a join over cleaned tables. The chain
//! split → weighing → tally → order is scoped by its upstream hop (only
//! inventory that produced a split SFC, only batches that fed that inventory,
//! ...), while packaging stands alone, so the two run in parallel.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;
use tracing::{info, warn};

use crate::clean::{known_time, NULL_MARKER};
use crate::error::{LineageError, Result};
use crate::events::{EventSink, PipelineEvent};
use crate::keys::{LOT_TARGET, SALES_ORDER, SPLIT_SOURCE};
use crate::model::{Hop, NodeKey, NodeWrite, ReferenceEdge, RelWrite};
use crate::record::{Record, Table};
use crate::tables;

/// Cleaned tables addressed by logical name.
#[derive(Debug, Default, Clone)]
pub struct CleanedTables {
    tables: HashMap<String, Table>,
}

impl CleanedTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, table: Table) {
        self.tables.insert(name.to_string(), table);
    }

    pub fn get(&self, name: &str) -> Result<&Table> {
        self.tables.get(name).ok_or_else(|| LineageError::UnknownTable {
            name: name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Hop before handles are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Draft {
    from: String,
    to: String,
    from_time: Option<String>,
    to_time: Option<String>,
}

/// Outcome of one hop derivation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HopStatus {
    Derived {
        edges: usize,
        duplicates_removed: usize,
        /// Derived without the upstream scope because the upstream hop aborted.
        unscoped: bool,
    },
    Aborted {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HopOutcome {
    pub hop: Hop,
    #[serde(flatten)]
    pub status: HopStatus,
}

/// The union of all derived hops.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReferenceSet {
    pub edges: Vec<ReferenceEdge>,
    pub hops: Vec<HopOutcome>,
    pub duration_ms: u64,
}

impl ReferenceSet {
    pub fn count(&self, hop: Hop) -> usize {
        self.edges
            .iter()
            .filter(|e| e.description == hop.label())
            .count()
    }

    pub fn aborted(&self) -> impl Iterator<Item = &HopOutcome> {
        self.hops
            .iter()
            .filter(|h| matches!(h.status, HopStatus::Aborted { .. }))
    }
}

type HopResult = Result<(Vec<Draft>, usize)>;

/// Derives [`ReferenceEdge`]s from cleaned MES tables.
pub struct ReferenceEdgeBuilder<'a> {
    sink: &'a dyn EventSink,
}

impl<'a> ReferenceEdgeBuilder<'a> {
    pub fn new(sink: &'a dyn EventSink) -> Self {
        Self { sink }
    }

    /// Run every derivation and union the results.
    ///
    /// A hop that fails (typically a missing column) is reported as aborted;
    /// the others still run.
    pub fn build(&self, tables: &CleanedTables) -> ReferenceSet {
        let start = Instant::now();
        self.sink.emit(&PipelineEvent::StageStarted {
            stage: "derive".to_string(),
        });

        let (chain, packaging) = rayon::join(
            || derive_chain(tables),
            || dedup(derive_packaging(tables)),
        );

        let mut results: HashMap<Hop, (HopResult, bool)> = chain.into_iter().collect();
        results.insert(Hop::PackagingToInventory, (packaging, false));

        let mut set = ReferenceSet::default();
        let mut handle = 0u64;
        for hop in Hop::ALL {
            let Some((result, unscoped)) = results.remove(&hop) else {
                continue;
            };
            let status = match result {
                Ok((drafts, duplicates_removed)) => {
                    let edges = drafts.len();
                    for draft in drafts {
                        handle += 1;
                        set.edges.push(ReferenceEdge::for_hop(
                            handle,
                            hop,
                            draft.from,
                            draft.to,
                            draft.from_time,
                            draft.to_time,
                        ));
                    }
                    info!("{}: {} edges ({} duplicates removed)", hop, edges, duplicates_removed);
                    HopStatus::Derived {
                        edges,
                        duplicates_removed,
                        unscoped,
                    }
                }
                Err(e) => {
                    warn!("{}: derivation aborted: {}", hop, e);
                    self.sink.emit(&PipelineEvent::QualityWarning {
                        stage: "derive".to_string(),
                        message: format!("{} aborted: {}", hop, e),
                    });
                    HopStatus::Aborted {
                        reason: e.to_string(),
                    }
                }
            };
            set.hops.push(HopOutcome { hop, status });
        }

        set.duration_ms = start.elapsed().as_millis() as u64;
        let failed = set.aborted().count();
        self.sink.emit(&PipelineEvent::StageFinished {
            stage: "derive".to_string(),
            success: failed == 0,
            items: set.edges.len(),
            duration_ms: set.duration_ms,
            detail: (failed > 0).then(|| format!("{} hop(s) aborted", failed)),
        });
        set
    }
}

/// Split → weighing → tally → order, each scoped by the previous hop.
fn derive_chain(tables: &CleanedTables) -> Vec<(Hop, (HopResult, bool))> {
    let split = dedup(derive_split(tables));
    let split_sources = scope(&split, |d| &d.from);

    let weighing = dedup(derive_weighing(tables, split_sources.as_ref()));
    let inventory_ids = scope(&weighing, |d| &d.from);

    let tally = dedup(derive_tally(tables, inventory_ids.as_ref()));
    let batches = scope(&tally, |d| &d.from);

    let order = dedup(derive_order(tables, batches.as_ref()));

    let unscoped = |s: &Option<HashSet<String>>| s.is_none();
    vec![
        (Hop::WeighingToOutput, (weighing, unscoped(&split_sources))),
        (Hop::TallyToWeighing, (tally, unscoped(&inventory_ids))),
        (Hop::OrderPlaced, (order, unscoped(&batches))),
        (Hop::SfcSplitMerge, (split, false)),
    ]
}

/// Endpoint set of a successful upstream hop; `None` when it aborted.
fn scope(result: &HopResult, field: impl Fn(&Draft) -> &String) -> Option<HashSet<String>> {
    match result {
        Ok((drafts, _)) => Some(drafts.iter().map(|d| field(d).clone()).collect()),
        Err(_) => None,
    }
}

fn in_scope(scope: Option<&HashSet<String>>, key: &str) -> bool {
    scope.map_or(true, |s| s.contains(key))
}

/// Keep the first draft of every `(from, to)` pair.
fn dedup(drafts: Result<Vec<Draft>>) -> HopResult {
    let drafts = drafts?;
    let total = drafts.len();
    let mut seen = HashSet::new();
    let unique: Vec<Draft> = drafts
        .into_iter()
        .filter(|d| seen.insert((d.from.clone(), d.to.clone())))
        .collect();
    let removed = total - unique.len();
    Ok((unique, removed))
}

/// A timestamp usable on an edge; the unknown marker is dropped.
fn time(record: &Record, field: &str) -> Option<String> {
    known_time(record.get(field))
}

/// Index rows of `table` by the text of `column`.
fn index_by<'t>(table: &'t Table, column: &str) -> HashMap<&'t str, Vec<&'t Record>> {
    let mut index: HashMap<&str, Vec<&Record>> = HashMap::new();
    for row in &table.rows {
        index.entry(row.text(column)).or_default().push(row);
    }
    index
}

fn derive_split(tables: &CleanedTables) -> Result<Vec<Draft>> {
    let lots = tables.get(tables::LOT_HISTORY)?;
    lots.require(&["source_type", SPLIT_SOURCE.column, LOT_TARGET.column])?;

    Ok(lots
        .rows
        .iter()
        .filter(|row| row.text("source_type") == "SFC")
        .filter_map(|row| {
            let from = SPLIT_SOURCE.extract(row.text(SPLIT_SOURCE.column));
            let to = LOT_TARGET.extract(row.text(LOT_TARGET.column));
            // SPLITS_TO never self-loops
            (!from.is_empty() && !to.is_empty() && from != to).then(|| Draft {
                from: from.to_string(),
                to: to.to_string(),
                from_time: time(row, "created_at"),
                to_time: time(row, "created_at"),
            })
        })
        .collect())
}

fn derive_weighing(
    tables: &CleanedTables,
    split_sources: Option<&HashSet<String>>,
) -> Result<Vec<Draft>> {
    let inventory = tables.get(tables::INVENTORY)?;
    let assembly = tables.get(tables::ITEM_ASSEMBLY)?;
    let sfc = tables.get(tables::SFC)?;
    inventory.require(&["inventory_id"])?;
    assembly.require(&["inventory_id", "related_project", "related_project_type"])?;
    sfc.require(&["primary_key", "sfc_code"])?;

    let assembly_by_inventory = index_by(assembly, "inventory_id");
    let sfc_by_key = index_by(sfc, "primary_key");

    let mut drafts = Vec::new();
    for inv in &inventory.rows {
        let inventory_id = inv.text("inventory_id");
        let Some(assemblies) = assembly_by_inventory.get(inventory_id) else {
            continue;
        };
        for assy in assemblies
            .iter()
            .filter(|a| a.text("related_project_type") == "SFC")
        {
            let Some(sfcs) = sfc_by_key.get(assy.text("related_project")) else {
                continue;
            };
            for s in sfcs {
                let sfc_code = s.text("sfc_code");
                if sfc_code.is_empty() || !in_scope(split_sources, sfc_code) {
                    continue;
                }
                drafts.push(Draft {
                    from: inventory_id.to_string(),
                    to: sfc_code.to_string(),
                    from_time: time(inv, "created_at"),
                    to_time: time(s, "created_at"),
                });
            }
        }
    }
    Ok(drafts)
}

fn derive_tally(
    tables: &CleanedTables,
    inventory_ids: Option<&HashSet<String>>,
) -> Result<Vec<Draft>> {
    let inventory = tables.get(tables::INVENTORY)?;
    let orders = tables.get(tables::SALES_ORDER_DETAIL)?;
    inventory.require(&["inventory_id", "receiving_batch_number"])?;
    orders.require(&["receiving_batch_no"])?;

    let orders_by_batch = index_by(orders, "receiving_batch_no");
    let mut drafts = Vec::new();
    for inv in &inventory.rows {
        let inventory_id = inv.text("inventory_id");
        if inventory_id.is_empty() || !in_scope(inventory_ids, inventory_id) {
            continue;
        }
        let batch = inv.text("receiving_batch_number");
        if batch.is_empty() {
            continue;
        }
        for order in orders_by_batch.get(batch).into_iter().flatten() {
            drafts.push(Draft {
                from: batch.to_string(),
                to: inventory_id.to_string(),
                from_time: time(order, "created_at"),
                to_time: time(inv, "created_at"),
            });
        }
    }
    Ok(drafts)
}

fn derive_order(tables: &CleanedTables, batches: Option<&HashSet<String>>) -> Result<Vec<Draft>> {
    let orders = tables.get(tables::SALES_ORDER_DETAIL)?;
    orders.require(&[SALES_ORDER.column, "receiving_batch_no"])?;

    Ok(orders
        .rows
        .iter()
        .filter_map(|row| {
            let batch = row.text("receiving_batch_no");
            let order = SALES_ORDER.extract(row.text(SALES_ORDER.column));
            (!batch.is_empty() && !order.is_empty() && in_scope(batches, batch)).then(|| Draft {
                from: order.to_string(),
                to: batch.to_string(),
                from_time: time(row, "created_at"),
                to_time: time(row, "created_at"),
            })
        })
        .collect())
}

fn derive_packaging(tables: &CleanedTables) -> Result<Vec<Draft>> {
    let lots = tables.get(tables::LOT_HISTORY)?;
    let inventory = tables.get(tables::INVENTORY)?;
    lots.require(&[SPLIT_SOURCE.column, LOT_TARGET.column, "storage_location_idx"])?;
    inventory.require(&["inventory_id"])?;

    let inventory_by_id = index_by(inventory, "inventory_id");
    let mut drafts = Vec::new();
    for lot in &lots.rows {
        let location = lot.text("storage_location_idx");
        if location.is_empty() || location == NULL_MARKER || location == "None" {
            continue;
        }
        let sfc = SPLIT_SOURCE.extract(lot.text(SPLIT_SOURCE.column));
        let target = LOT_TARGET.extract(lot.text(LOT_TARGET.column));
        if sfc.is_empty() || target.is_empty() {
            continue;
        }
        for inv in inventory_by_id.get(target).into_iter().flatten() {
            drafts.push(Draft {
                from: sfc.to_string(),
                to: target.to_string(),
                from_time: time(lot, "created_at"),
                to_time: time(inv, "created_at"),
            });
        }
    }
    Ok(drafts)
}

/// Sales order keys with no `order_placed` edge.
pub fn missing_sales_orders(orders: &Table, edges: &[ReferenceEdge]) -> Result<Vec<String>> {
    orders.require(&[SALES_ORDER.column])?;
    let linked: HashSet<&str> = edges
        .iter()
        .filter(|e| e.description == Hop::OrderPlaced.label())
        .map(|e| e.from_node.as_str())
        .collect();
    let missing: BTreeSet<String> = orders
        .rows
        .iter()
        .map(|row| SALES_ORDER.extract(row.text(SALES_ORDER.column)))
        .filter(|key| !key.is_empty() && !linked.contains(key))
        .map(str::to_string)
        .collect();
    Ok(missing.into_iter().collect())
}

/// Node and relationship merge requests for a set of reference edges.
#[derive(Debug, Clone, Default)]
pub struct GraphWrites {
    pub nodes: Vec<NodeWrite>,
    pub relationships: Vec<RelWrite>,
    /// Edges whose types/label map to no relationship.
    pub unmapped: usize,
}

/// Translate reference edges into typed graph writes.
///
/// Nodes are emitted once per key in first-seen order.
pub fn graph_writes(edges: &[ReferenceEdge]) -> GraphWrites {
    let mut writes = GraphWrites::default();
    let mut seen: HashSet<NodeKey> = HashSet::new();
    for edge in edges {
        let Some(hop) = edge.hop() else {
            writes.unmapped += 1;
            continue;
        };
        let (from_kind, to_kind) = hop.endpoints();
        let from = NodeKey::new(from_kind, edge.from_node.as_str());
        let to = NodeKey::new(to_kind, edge.to_node.as_str());
        if hop == Hop::SfcSplitMerge && from == to {
            writes.unmapped += 1;
            continue;
        }
        for key in [&from, &to] {
            if seen.insert(key.clone()) {
                writes.nodes.push(NodeWrite::new(key.clone()));
            }
        }
        writes.relationships.push(
            RelWrite::new(hop.rel_type(), from, to)
                .described(&edge.description, edge.from_node_time.as_deref()),
        );
    }
    writes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use crate::model::NodeKind;
    use crate::record::Cell;

    fn text(values: &[&str]) -> Vec<Cell> {
        values.iter().map(|v| Cell::text(*v)).collect()
    }

    fn fixture() -> CleanedTables {
        let mut tables = CleanedTables::new();
        tables.insert(
            tables::LOT_HISTORY,
            Table::from_rows(
                tables::LOT_HISTORY,
                &[
                    "source_type",
                    "source_reference_value",
                    "target_value",
                    "storage_location_idx",
                    "created_at",
                ],
                vec![
                    text(&["SFC", "W1,SFC-A", "W1,SFC-B", "NULL", "2024/01/01 08:00:00"]),
                    text(&["SFC", "W1,SFC-A", "W1,SFC-B", "NULL", "2024/01/01 09:00:00"]),
                    text(&["SFC", "W1,SFC-C", "W1,SFC-C", "NULL", "2024/01/01 08:00:00"]),
                    text(&["INV", "W1,SFC-B", "W1,INV-9", "L-01", "2024/01/02 08:00:00"]),
                ],
            ),
        );
        tables.insert(
            tables::INVENTORY,
            Table::from_rows(
                tables::INVENTORY,
                &["inventory_id", "receiving_batch_number", "created_at"],
                vec![
                    text(&["INV-1", "RB-1", "2023/12/30 08:00:00"]),
                    text(&["INV-2", "RB-2", "2023/12/30 08:00:00"]),
                    text(&["INV-9", "RB-9", "unknown time"]),
                ],
            ),
        );
        tables.insert(
            tables::ITEM_ASSEMBLY,
            Table::from_rows(
                tables::ITEM_ASSEMBLY,
                &["inventory_id", "related_project", "related_project_type"],
                vec![
                    text(&["INV-1", "PK-A", "SFC"]),
                    text(&["INV-2", "PK-X", "SFC"]),
                    text(&["INV-1", "PK-A", "WO"]),
                ],
            ),
        );
        tables.insert(
            tables::SFC,
            Table::from_rows(
                tables::SFC,
                &["primary_key", "sfc_code"],
                vec![text(&["PK-A", "SFC-A"]), text(&["PK-X", "SFC-X"])],
            ),
        );
        tables.insert(
            tables::SALES_ORDER_DETAIL,
            Table::from_rows(
                tables::SALES_ORDER_DETAIL,
                &["primary_key", "receiving_batch_no"],
                vec![
                    text(&["P1,SO-1,CM-1", "RB-1"]),
                    text(&["P1,SO-2,CM-2", "RB-2"]),
                    text(&["P1,SO-3,CM-3", "RB-3"]),
                ],
            ),
        );
        tables
    }

    #[test]
    fn test_full_derivation() {
        let sink = RecordingSink::new();
        let set = ReferenceEdgeBuilder::new(&sink).build(&fixture());

        assert_eq!(set.count(Hop::SfcSplitMerge), 1);
        // SFC-X is never split, so INV-2 is out of scope
        assert_eq!(set.count(Hop::WeighingToOutput), 1);
        assert_eq!(set.count(Hop::TallyToWeighing), 1);
        assert_eq!(set.count(Hop::OrderPlaced), 1);
        assert_eq!(set.count(Hop::PackagingToInventory), 1);

        let order = &set.edges[0];
        assert_eq!(order.handle, 1);
        assert_eq!(order.description, "order_placed");
        assert_eq!(order.from_node, "SO-1,CM-1");
        assert_eq!(order.to_node, "RB-1");

        let handles: Vec<u64> = set.edges.iter().map(|e| e.handle).collect();
        assert_eq!(handles, (1..=set.edges.len() as u64).collect::<Vec<_>>());

        let split = set.edges.iter().find(|e| e.description == "sfc_split_merge").unwrap();
        assert_eq!((split.from_node.as_str(), split.to_node.as_str()), ("SFC-A", "SFC-B"));
        // first occurrence kept
        assert_eq!(split.from_node_time.as_deref(), Some("2024/01/01 08:00:00"));

        let packaging = set.edges.last().unwrap();
        assert_eq!(packaging.description, "packaging_to_inventory");
        assert_eq!(packaging.from_node, "SFC-B");
        assert_eq!(packaging.to_node, "INV-9");
        assert_eq!(packaging.to_node_time, None);
    }

    #[test]
    fn test_derivation_is_repeatable() {
        let sink = RecordingSink::new();
        let tables = fixture();
        let first = ReferenceEdgeBuilder::new(&sink).build(&tables);
        let second = ReferenceEdgeBuilder::new(&sink).build(&tables);
        assert_eq!(first.edges, second.edges);
    }

    #[test]
    fn test_missing_column_aborts_only_dependent_hops() {
        let sink = RecordingSink::new();
        let mut tables = fixture();
        tables.insert(
            tables::SFC,
            Table::from_rows(tables::SFC, &["primary_key"], vec![]),
        );
        let set = ReferenceEdgeBuilder::new(&sink).build(&tables);

        let weighing = set.hops.iter().find(|h| h.hop == Hop::WeighingToOutput).unwrap();
        assert!(matches!(weighing.status, HopStatus::Aborted { .. }));

        // tally runs unscoped: both batches with orders match
        let tally = set.hops.iter().find(|h| h.hop == Hop::TallyToWeighing).unwrap();
        assert!(matches!(tally.status, HopStatus::Derived { unscoped: true, .. }));
        assert_eq!(set.count(Hop::TallyToWeighing), 2);
        assert_eq!(set.count(Hop::SfcSplitMerge), 1);
        assert_eq!(set.count(Hop::PackagingToInventory), 1);
    }

    #[test]
    fn test_missing_sales_orders() {
        let sink = RecordingSink::new();
        let tables = fixture();
        let set = ReferenceEdgeBuilder::new(&sink).build(&tables);
        let orders = tables.get(tables::SALES_ORDER_DETAIL).unwrap();
        let missing = missing_sales_orders(orders, &set.edges).unwrap();
        assert_eq!(missing, vec!["SO-2,CM-2", "SO-3,CM-3"]);
    }

    #[test]
    fn test_graph_writes() {
        let edges = vec![
            ReferenceEdge::for_hop(1, Hop::OrderPlaced, "SO-1,CM-1", "RB-1", None, None),
            ReferenceEdge::for_hop(
                2,
                Hop::TallyToWeighing,
                "RB-1",
                "INV-1",
                Some("2024/01/01 00:00:00".into()),
                None,
            ),
            ReferenceEdge {
                description: "mystery".to_string(),
                ..ReferenceEdge::for_hop(3, Hop::OrderPlaced, "a", "b", None, None)
            },
        ];
        let writes = graph_writes(&edges);
        assert_eq!(writes.nodes.len(), 3);
        assert_eq!(writes.relationships.len(), 2);
        assert_eq!(writes.unmapped, 1);
        assert_eq!(writes.relationships[1].properties["created_at"], "2024/01/01 00:00:00");
        let kinds: Vec<NodeKind> = writes.nodes.iter().map(|n| n.key.kind).collect();
        assert_eq!(
            kinds,
            vec![NodeKind::SalesOrder, NodeKind::ReceivingBatch, NodeKind::Inventory]
        );
    }
}
