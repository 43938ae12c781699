//! Graph model: node kinds, relationship types, hop labels and write requests.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::clean::known_time;
use crate::error::Result;
use crate::record::{Cell, Record, Table};

/// Columns of a reference-shaped table, in export order.
pub const REFERENCE_COLUMNS: [&str; 8] = [
    "handle",
    "from_node_type",
    "from_node",
    "from_node_time",
    "to_node_type",
    "to_node",
    "to_node_time",
    "description",
];

/// Business entity kinds materialized as graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    SalesOrder,
    ReceivingBatch,
    Inventory,
    #[serde(rename = "SFC")]
    Sfc,
    ProcessStep,
}

impl NodeKind {
    pub const ALL: [NodeKind; 5] = [
        NodeKind::SalesOrder,
        NodeKind::ReceivingBatch,
        NodeKind::Inventory,
        NodeKind::Sfc,
        NodeKind::ProcessStep,
    ];

    /// Graph label.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::SalesOrder => "SalesOrder",
            NodeKind::ReceivingBatch => "ReceivingBatch",
            NodeKind::Inventory => "Inventory",
            NodeKind::Sfc => "SFC",
            NodeKind::ProcessStep => "ProcessStep",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        NodeKind::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Natural key property names. `ProcessStep` is the only composite key.
    pub fn key_properties(&self) -> &'static [&'static str] {
        match self {
            NodeKind::SalesOrder => &["order_id"],
            NodeKind::ReceivingBatch => &["batch_no"],
            NodeKind::Inventory => &["inventory_id"],
            NodeKind::Sfc => &["sfc_code"],
            NodeKind::ProcessStep => &["sfc_no", "step_order"],
        }
    }

    /// Entity type label used in reference edge rows.
    pub fn entity_label(&self) -> Option<&'static str> {
        match self {
            NodeKind::SalesOrder => Some("sales_order"),
            NodeKind::ReceivingBatch => Some("receiving_batch"),
            NodeKind::Inventory => Some("inventory"),
            NodeKind::Sfc => Some("sfc"),
            NodeKind::ProcessStep => None,
        }
    }

    pub fn from_entity_label(label: &str) -> Option<Self> {
        NodeKind::ALL
            .into_iter()
            .find(|k| k.entity_label() == Some(label))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Relationship types of the lineage graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelType {
    Orders,
    ReceivesToInventory,
    ProducesSfc,
    HasFirstStep,
    NextStep,
    LeadsToNextSfc,
    SplitsTo,
    PackagesToInventory,
}

impl RelType {
    pub const ALL: [RelType; 8] = [
        RelType::Orders,
        RelType::ReceivesToInventory,
        RelType::ProducesSfc,
        RelType::HasFirstStep,
        RelType::NextStep,
        RelType::LeadsToNextSfc,
        RelType::SplitsTo,
        RelType::PackagesToInventory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelType::Orders => "ORDERS",
            RelType::ReceivesToInventory => "RECEIVES_TO_INVENTORY",
            RelType::ProducesSfc => "PRODUCES_SFC",
            RelType::HasFirstStep => "HAS_FIRST_STEP",
            RelType::NextStep => "NEXT_STEP",
            RelType::LeadsToNextSfc => "LEADS_TO_NEXT_SFC",
            RelType::SplitsTo => "SPLITS_TO",
            RelType::PackagesToInventory => "PACKAGES_TO_INVENTORY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        RelType::ALL.into_iter().find(|r| r.as_str() == s)
    }

    /// Node kinds at the (source, target) ends.
    pub fn endpoints(&self) -> (NodeKind, NodeKind) {
        match self {
            RelType::Orders => (NodeKind::SalesOrder, NodeKind::ReceivingBatch),
            RelType::ReceivesToInventory => (NodeKind::ReceivingBatch, NodeKind::Inventory),
            RelType::ProducesSfc => (NodeKind::Inventory, NodeKind::Sfc),
            RelType::HasFirstStep => (NodeKind::Sfc, NodeKind::ProcessStep),
            RelType::NextStep => (NodeKind::ProcessStep, NodeKind::ProcessStep),
            RelType::LeadsToNextSfc => (NodeKind::ProcessStep, NodeKind::Sfc),
            RelType::SplitsTo => (NodeKind::Sfc, NodeKind::Sfc),
            RelType::PackagesToInventory => (NodeKind::Sfc, NodeKind::Inventory),
        }
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Semantic hop labels carried in `ReferenceEdge::description`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hop {
    OrderPlaced,
    TallyToWeighing,
    WeighingToOutput,
    SfcSplitMerge,
    PackagingToInventory,
}

impl Hop {
    /// Emission order of the union.
    pub const ALL: [Hop; 5] = [
        Hop::OrderPlaced,
        Hop::TallyToWeighing,
        Hop::WeighingToOutput,
        Hop::SfcSplitMerge,
        Hop::PackagingToInventory,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Hop::OrderPlaced => "order_placed",
            Hop::TallyToWeighing => "tally_to_weighing",
            Hop::WeighingToOutput => "weighing_to_output",
            Hop::SfcSplitMerge => "sfc_split_merge",
            Hop::PackagingToInventory => "packaging_to_inventory",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        Hop::ALL.into_iter().find(|h| h.label() == label)
    }

    pub fn rel_type(&self) -> RelType {
        match self {
            Hop::OrderPlaced => RelType::Orders,
            Hop::TallyToWeighing => RelType::ReceivesToInventory,
            Hop::WeighingToOutput => RelType::ProducesSfc,
            Hop::SfcSplitMerge => RelType::SplitsTo,
            Hop::PackagingToInventory => RelType::PackagesToInventory,
        }
    }

    pub fn endpoints(&self) -> (NodeKind, NodeKind) {
        self.rel_type().endpoints()
    }

    /// Resolve a reference row's types and label to its hop.
    ///
    /// Returns `None` when the label is unknown or the entity types do not
    /// match the hop's endpoints.
    pub fn classify(from_type: &str, to_type: &str, description: &str) -> Option<Self> {
        let hop = Hop::parse(description)?;
        let (from, to) = hop.endpoints();
        let matches = NodeKind::from_entity_label(from_type) == Some(from)
            && NodeKind::from_entity_label(to_type) == Some(to);
        matches.then_some(hop)
    }
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One lineage hop between two typed business entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEdge {
    pub handle: u64,
    pub from_node_type: String,
    pub from_node: String,
    pub from_node_time: Option<String>,
    pub to_node_type: String,
    pub to_node: String,
    pub to_node_time: Option<String>,
    pub description: String,
}

impl ReferenceEdge {
    /// Build an edge for a known hop.
    pub fn for_hop(
        handle: u64,
        hop: Hop,
        from_node: impl Into<String>,
        to_node: impl Into<String>,
        from_node_time: Option<String>,
        to_node_time: Option<String>,
    ) -> Self {
        let (from, to) = hop.endpoints();
        Self {
            handle,
            from_node_type: from.entity_label().unwrap_or_default().to_string(),
            from_node: from_node.into(),
            from_node_time,
            to_node_type: to.entity_label().unwrap_or_default().to_string(),
            to_node: to_node.into(),
            to_node_time,
            description: hop.label().to_string(),
        }
    }

    pub fn hop(&self) -> Option<Hop> {
        Hop::classify(&self.from_node_type, &self.to_node_type, &self.description)
    }

    /// Read a row of a reference-shaped table; `None` when the handle is not
    /// a positive integer.
    pub fn from_record(record: &Record) -> Option<Self> {
        let handle = match record.get("handle")? {
            Cell::Number(n) if *n >= 1.0 && n.fract() == 0.0 => *n as u64,
            Cell::Text(s) => s.trim().parse::<u64>().ok().filter(|h| *h >= 1)?,
            _ => return None,
        };
        Some(Self {
            handle,
            from_node_type: record.text("from_node_type").to_string(),
            from_node: record.text("from_node").to_string(),
            from_node_time: known_time(record.get("from_node_time")),
            to_node_type: record.text("to_node_type").to_string(),
            to_node: record.text("to_node").to_string(),
            to_node_time: known_time(record.get("to_node_time")),
            description: record.text("description").to_string(),
        })
    }

    /// Read every row of a reference-shaped table.
    ///
    /// Returns the edges and the number of rows skipped for an invalid handle.
    pub fn from_table(table: &Table) -> Result<(Vec<Self>, usize)> {
        table.require(&REFERENCE_COLUMNS)?;
        let mut edges = Vec::with_capacity(table.len());
        let mut skipped = 0;
        for record in &table.rows {
            match Self::from_record(record) {
                Some(edge) => edges.push(edge),
                None => skipped += 1,
            }
        }
        Ok((edges, skipped))
    }

    /// Reference-shaped table of `edges`; handles stay numeric and missing
    /// times stay null.
    pub fn to_table(name: &str, edges: &[ReferenceEdge]) -> Table {
        let rows = edges
            .iter()
            .map(|e| {
                vec![
                    Cell::Number(e.handle as f64),
                    Cell::text(e.from_node_type.as_str()),
                    Cell::text(e.from_node.as_str()),
                    Cell::from(e.from_node_time.clone()),
                    Cell::text(e.to_node_type.as_str()),
                    Cell::text(e.to_node.as_str()),
                    Cell::from(e.to_node_time.clone()),
                    Cell::text(e.description.as_str()),
                ]
            })
            .collect();
        Table::from_rows(name, &REFERENCE_COLUMNS, rows)
    }
}

/// Separator between the parts of a composite natural key.
const COMPOSITE_SEPARATOR: char = '#';

/// Identity of a node by kind and natural key.
///
/// Composite keys are encoded as `part#part`; the last part of a
/// `ProcessStep` key is always the numeric step order, so splitting on the
/// final separator recovers the parts unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub kind: NodeKind,
    pub key: String,
}

impl NodeKey {
    pub fn new(kind: NodeKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }

    pub fn sfc(code: impl Into<String>) -> Self {
        Self::new(NodeKind::Sfc, code)
    }

    pub fn process_step(sfc_no: &str, step_order: u32) -> Self {
        Self::new(
            NodeKind::ProcessStep,
            format!("{}{}{}", sfc_no, COMPOSITE_SEPARATOR, step_order),
        )
    }

    /// Split a `ProcessStep` key back into `(sfc_no, step_order)`.
    pub fn step_parts(&self) -> Option<(&str, u32)> {
        if self.kind != NodeKind::ProcessStep {
            return None;
        }
        let (sfc, order) = self.key.rsplit_once(COMPOSITE_SEPARATOR)?;
        Some((sfc, order.parse().ok()?))
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.key)
    }
}

/// Merge request for one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeWrite {
    pub key: NodeKey,
    pub properties: Map<String, Value>,
}

impl NodeWrite {
    /// A node carrying only its natural key properties.
    pub fn new(key: NodeKey) -> Self {
        let mut properties = Map::new();
        match key.step_parts() {
            Some((sfc_no, step_order)) => {
                properties.insert("sfc_no".into(), Value::from(sfc_no));
                properties.insert("step_order".into(), Value::from(step_order));
            }
            None => {
                let property = key.kind.key_properties()[0];
                properties.insert(property.into(), Value::from(key.key.as_str()));
            }
        }
        Self { key, properties }
    }

    pub fn with_property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }
}

/// Merge request for one relationship, keyed by type and endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelWrite {
    pub rel_type: RelType,
    pub from: NodeKey,
    pub to: NodeKey,
    pub properties: Map<String, Value>,
}

impl RelWrite {
    pub fn new(rel_type: RelType, from: NodeKey, to: NodeKey) -> Self {
        Self {
            rel_type,
            from,
            to,
            properties: Map::new(),
        }
    }

    /// Attach the `description` and `created_at` properties every lineage
    /// relationship carries.
    pub fn described(mut self, description: &str, created_at: Option<&str>) -> Self {
        self.properties
            .insert("description".into(), Value::from(description));
        self.properties.insert(
            "created_at".into(),
            created_at.map(Value::from).unwrap_or(Value::Null),
        );
        self
    }

    /// Merge identity: type plus both endpoints.
    pub fn identity(&self) -> (RelType, &NodeKey, &NodeKey) {
        (self.rel_type, &self.from, &self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_kind_roundtrip() {
        for kind in NodeKind::ALL {
            assert_eq!(NodeKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(NodeKind::parse("Unknown"), None);
        assert_eq!(NodeKind::from_entity_label("sfc"), Some(NodeKind::Sfc));
        assert_eq!(NodeKind::ProcessStep.entity_label(), None);
    }

    #[test]
    fn test_rel_type_roundtrip() {
        for rel in RelType::ALL {
            assert_eq!(RelType::parse(rel.as_str()), Some(rel));
        }
        assert_eq!(
            serde_json::to_string(&RelType::LeadsToNextSfc).unwrap(),
            "\"LEADS_TO_NEXT_SFC\""
        );
    }

    #[test]
    fn test_hop_classification() {
        assert_eq!(
            Hop::classify("sales_order", "receiving_batch", "order_placed"),
            Some(Hop::OrderPlaced)
        );
        assert_eq!(
            Hop::classify("sfc", "sfc", "sfc_split_merge"),
            Some(Hop::SfcSplitMerge)
        );
        // Label and types disagree
        assert_eq!(Hop::classify("sfc", "inventory", "sfc_split_merge"), None);
        assert_eq!(Hop::classify("sfc", "sfc", "unknown"), None);
    }

    #[test]
    fn test_process_step_key_parts() {
        let key = NodeKey::process_step("LOT#7", 12);
        assert_eq!(key.key, "LOT#7#12");
        assert_eq!(key.step_parts(), Some(("LOT#7", 12)));
        assert_eq!(NodeKey::sfc("S1").step_parts(), None);
    }

    #[test]
    fn test_node_write_key_properties() {
        let node = NodeWrite::new(NodeKey::process_step("S1", 2));
        assert_eq!(node.properties["sfc_no"], "S1");
        assert_eq!(node.properties["step_order"], 2);

        let node = NodeWrite::new(NodeKey::new(NodeKind::Inventory, "INV-1"));
        assert_eq!(node.properties["inventory_id"], "INV-1");
    }

    #[test]
    fn test_reference_edge_from_record() {
        let record = Record::from_pairs([
            ("handle", Cell::Number(3.0)),
            ("from_node_type", Cell::text("sfc")),
            ("from_node", Cell::text("S1")),
            ("from_node_time", Cell::Null),
            ("to_node_type", Cell::text("sfc")),
            ("to_node", Cell::text("S2")),
            ("to_node_time", Cell::text("2024/01/01 10:00:00")),
            ("description", Cell::text("sfc_split_merge")),
        ]);
        let edge = ReferenceEdge::from_record(&record).unwrap();
        assert_eq!(edge.handle, 3);
        assert_eq!(edge.from_node_time, None);
        assert_eq!(edge.to_node_time.as_deref(), Some("2024/01/01 10:00:00"));
        assert_eq!(edge.hop(), Some(Hop::SfcSplitMerge));

        let mut bad = record.clone();
        bad.insert("handle", Cell::text("abc"));
        assert!(ReferenceEdge::from_record(&bad).is_none());
    }

    #[test]
    fn test_reference_edge_unknown_time_reads_as_none() {
        let mut record = Record::from_pairs([
            ("handle", Cell::text("4")),
            ("from_node_type", Cell::text("inventory")),
            ("from_node", Cell::text("INV-1")),
            ("from_node_time", Cell::text(crate::clean::UNKNOWN_TIME)),
            ("to_node_type", Cell::text("sfc")),
            ("to_node", Cell::text("S1")),
            ("to_node_time", Cell::text("")),
            ("description", Cell::text("weighing_to_output")),
        ]);
        let edge = ReferenceEdge::from_record(&record).unwrap();
        assert_eq!(edge.from_node_time, None);
        assert_eq!(edge.to_node_time, None);

        record.insert("from_node_time", Cell::text("2024/01/01 10:00:00"));
        let edge = ReferenceEdge::from_record(&record).unwrap();
        assert_eq!(edge.from_node_time.as_deref(), Some("2024/01/01 10:00:00"));
    }

    #[test]
    fn test_reference_table_keeps_export_order() {
        let edge = ReferenceEdge::for_hop(7, Hop::PackagingToInventory, "S1", "INV-9", None, None);
        let table = ReferenceEdge::to_table("reference", &[edge.clone()]);
        assert_eq!(table.columns, REFERENCE_COLUMNS);
        assert_eq!(table.rows[0].get("handle"), Some(&Cell::Number(7.0)));
        assert!(table.rows[0].get("to_node_time").unwrap().is_null());

        let (edges, skipped) = ReferenceEdge::from_table(&table).unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(edges, vec![edge]);
    }
}
