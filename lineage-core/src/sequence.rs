//! Process step sequencing.
//!
//! Completed production-log rows are grouped per SFC and ordered by
//! timestamp. Rows sharing a timestamp keep their input order (the sort is
//! stable), and rows without a usable timestamp sort after all timestamped
//! rows of their SFC. SFCs are then chained in natural key order: the last
//! step of one SFC leads to the next SFC.

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::clean::{parse_cleaned, parse_datetime};
use crate::error::Result;
use crate::model::{NodeKey, NodeWrite, RelType, RelWrite};
use crate::record::{Cell, Record, Table};

/// Columns a production-log table must provide.
pub const PRODUCTION_LOG_COLUMNS: [&str; 9] = [
    "sfc_no",
    "processing_status",
    "process_step",
    "process_step_desc",
    "resource_code",
    "resource_desc",
    "weight",
    "created_at",
    "default_unit",
];

/// Only rows in this status become process steps.
pub const COMPLETE_STATUS: &str = "COMPLETE";

pub const FIRST_STEP_DESCRIPTION: &str = "first_step";
pub const NEXT_STEP_DESCRIPTION: &str = "step_sequence";
pub const NEXT_SFC_DESCRIPTION: &str = "step_complete_to_next_sfc";

/// One ordered step of an SFC's workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessStep {
    pub sfc_no: String,
    pub step_order: u32,
    pub step_desc: String,
    pub created_at: Option<String>,
    pub process_step: String,
    pub resource_code: String,
    pub resource_desc: String,
    pub weight: Option<f64>,
    pub default_unit: String,
}

impl ProcessStep {
    pub fn key(&self) -> NodeKey {
        NodeKey::process_step(&self.sfc_no, self.step_order)
    }

    fn node(&self) -> NodeWrite {
        NodeWrite::new(self.key())
            .with_property("step_desc", self.step_desc.as_str())
            .with_property(
                "created_at",
                self.created_at.as_deref().map(Value::from).unwrap_or(Value::Null),
            )
            .with_property("process_step", self.process_step.as_str())
            .with_property("resource_code", self.resource_code.as_str())
            .with_property("resource_desc", self.resource_desc.as_str())
            .with_property("weight", self.weight.map(Value::from).unwrap_or(Value::Null))
            .with_property("default_unit", self.default_unit.as_str())
    }
}

/// Everything the reconstructor materializes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SequencePlan {
    /// Steps grouped by SFC in natural key order, each group by step order.
    pub steps: Vec<ProcessStep>,
    /// SFC natural keys in chaining order.
    pub sfcs: Vec<String>,
    pub first_steps: Vec<RelWrite>,
    pub next_steps: Vec<RelWrite>,
    pub cross_sfc: Vec<RelWrite>,
    /// Rows skipped for a status other than complete.
    pub skipped_incomplete: usize,
    /// Rows skipped for an empty `sfc_no`.
    pub skipped_blank: usize,
}

impl SequencePlan {
    /// SFC and process step node writes.
    pub fn nodes(&self) -> Vec<NodeWrite> {
        self.sfcs
            .iter()
            .map(|sfc| NodeWrite::new(NodeKey::sfc(sfc.as_str())))
            .chain(self.steps.iter().map(ProcessStep::node))
            .collect()
    }

    /// Batched relationships: first-step and next-step links.
    ///
    /// Cross-SFC links are written one at a time and live in
    /// [`SequencePlan::cross_sfc`].
    pub fn relationships(&self) -> Vec<RelWrite> {
        self.first_steps
            .iter()
            .chain(self.next_steps.iter())
            .cloned()
            .collect()
    }

    /// Step count per SFC.
    pub fn step_counts(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for step in &self.steps {
            *counts.entry(step.sfc_no.as_str()).or_default() += 1;
        }
        counts.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    /// The first `limit` SFCs in chaining order with their ordered steps and
    /// the SFC their last step leads to.
    pub fn sample_paths(&self, limit: usize) -> Vec<WorkflowPath> {
        let mut paths: Vec<WorkflowPath> = Vec::new();
        for step in &self.steps {
            match paths.last() {
                Some(path) if path.sfc == step.sfc_no => {}
                _ if paths.len() == limit => break,
                _ => paths.push(WorkflowPath {
                    sfc: step.sfc_no.clone(),
                    steps: Vec::new(),
                    next_sfc: None,
                }),
            }
            if let Some(path) = paths.last_mut() {
                path.steps.push((step.step_order, step.step_desc.clone()));
            }
        }
        for path in &mut paths {
            let last = path
                .steps
                .last()
                .map(|(order, _)| NodeKey::process_step(&path.sfc, *order));
            path.next_sfc = self
                .cross_sfc
                .iter()
                .find(|link| Some(&link.from) == last.as_ref())
                .map(|link| link.to.key.clone());
        }
        paths
    }
}

/// One SFC's workflow: SFC → steps → next SFC.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowPath {
    pub sfc: String,
    /// `(step_order, step description)` in order.
    pub steps: Vec<(u32, String)>,
    pub next_sfc: Option<String>,
}

impl std::fmt::Display for WorkflowPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sfc)?;
        for (order, desc) in &self.steps {
            write!(f, " -> {}:{}", order, desc)?;
        }
        match &self.next_sfc {
            Some(next) => write!(f, " => {}", next),
            None => write!(f, " (end)"),
        }
    }
}

/// Build the sequence plan for a cleaned production log.
pub fn reconstruct(log: &Table) -> Result<SequencePlan> {
    log.require(&PRODUCTION_LOG_COLUMNS)?;

    let mut plan = SequencePlan::default();
    let mut groups: HashMap<&str, Vec<&Record>> = HashMap::new();
    for row in &log.rows {
        if row.text("processing_status") != COMPLETE_STATUS {
            plan.skipped_incomplete += 1;
            continue;
        }
        let sfc_no = row.text("sfc_no");
        if sfc_no.trim().is_empty() {
            plan.skipped_blank += 1;
            continue;
        }
        groups.entry(sfc_no).or_default().push(row);
    }

    let mut sfcs: Vec<&str> = groups.keys().copied().collect();
    sfcs.sort_unstable();

    let mut last_steps: Vec<usize> = Vec::with_capacity(sfcs.len());
    for sfc_no in &sfcs {
        let mut rows: Vec<(Option<NaiveDateTime>, &Record)> = groups[sfc_no]
            .iter()
            .map(|row| (row.get("created_at").and_then(parse_cleaned), *row))
            .collect();
        // Stable: equal timestamps keep input order; missing ones go last.
        rows.sort_by_key(|(ts, _)| (ts.is_none(), *ts));

        let first_index = plan.steps.len();
        for (index, (_, row)) in rows.into_iter().enumerate() {
            plan.steps.push(step_from_row(sfc_no, index as u32 + 1, row));
        }
        last_steps.push(plan.steps.len() - 1);
        let steps = &plan.steps[first_index..];

        let first = &steps[0];
        plan.first_steps.push(
            RelWrite::new(RelType::HasFirstStep, NodeKey::sfc(*sfc_no), first.key())
                .described(FIRST_STEP_DESCRIPTION, first.created_at.as_deref()),
        );
        for pair in steps.windows(2) {
            plan.next_steps.push(
                RelWrite::new(RelType::NextStep, pair[0].key(), pair[1].key())
                    .described(NEXT_STEP_DESCRIPTION, pair[1].created_at.as_deref()),
            );
        }
    }

    // Last step of each SFC leads to the next SFC in key order.
    let cross_sfc: Vec<RelWrite> = last_steps
        .windows(2)
        .map(|pair| {
            let (last, next) = (&plan.steps[pair[0]], &plan.steps[pair[1]]);
            RelWrite::new(
                RelType::LeadsToNextSfc,
                last.key(),
                NodeKey::sfc(next.sfc_no.as_str()),
            )
            .described(NEXT_SFC_DESCRIPTION, last.created_at.as_deref())
        })
        .collect();
    plan.cross_sfc = cross_sfc;
    plan.sfcs = sfcs.into_iter().map(str::to_string).collect();
    Ok(plan)
}

fn step_from_row(sfc_no: &str, step_order: u32, row: &Record) -> ProcessStep {
    let created_at = match row.get("created_at") {
        Some(Cell::Text(s)) if parse_datetime(s).is_some() => Some(s.clone()),
        _ => None,
    };
    ProcessStep {
        sfc_no: sfc_no.to_string(),
        step_order,
        step_desc: row.text("process_step_desc").to_string(),
        created_at,
        process_step: row.text("process_step").to_string(),
        resource_code: row.text("resource_code").to_string(),
        resource_desc: row.text("resource_desc").to_string(),
        weight: row.get("weight").and_then(Cell::as_number),
        default_unit: row.text("default_unit").to_string(),
    }
}

/// Shape of the reconstructed workflows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowStats {
    pub sfc_count: usize,
    pub step_count: usize,
    pub average_steps: f64,
    /// Steps per SFC → number of SFCs.
    pub distribution: BTreeMap<usize, usize>,
    /// Longest workflows, longest first.
    pub longest: Vec<(String, usize)>,
    /// Sample paths; only available when computed from a sequence plan.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<WorkflowPath>,
}

impl WorkflowStats {
    pub fn from_counts(counts: &[(String, usize)], top: usize) -> Self {
        let step_count: usize = counts.iter().map(|(_, n)| n).sum();
        let mut distribution = BTreeMap::new();
        for (_, n) in counts {
            *distribution.entry(*n).or_default() += 1;
        }
        let mut longest = counts.to_vec();
        longest.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        longest.truncate(top);
        Self {
            sfc_count: counts.len(),
            step_count,
            average_steps: if counts.is_empty() {
                0.0
            } else {
                step_count as f64 / counts.len() as f64
            },
            distribution,
            longest,
            samples: Vec::new(),
        }
    }

    /// Statistics of `plan`, with up to `samples` sample paths.
    pub fn from_plan(plan: &SequencePlan, top: usize, samples: usize) -> Self {
        Self {
            samples: plan.sample_paths(samples),
            ..Self::from_counts(&plan.step_counts(), top)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn log(rows: &[(&str, &str, &str, &str)]) -> Table {
        let rows = rows
            .iter()
            .map(|(sfc, status, desc, at)| {
                vec![
                    Cell::text(*sfc),
                    Cell::text(*status),
                    Cell::text("OP"),
                    Cell::text(*desc),
                    Cell::text("R1"),
                    Cell::text("press"),
                    Cell::Number(1.5),
                    if at.is_empty() { Cell::Null } else { Cell::text(*at) },
                    Cell::text("kg"),
                ]
            })
            .collect();
        Table::from_rows("production_log", &PRODUCTION_LOG_COLUMNS, rows)
    }

    #[test]
    fn test_two_steps_one_next_edge() {
        let plan = reconstruct(&log(&[
            ("S1", "COMPLETE", "weld", "2024/01/01 10:00:05"),
            ("S1", "COMPLETE", "cut", "2024/01/01 10:00:00"),
        ]))
        .unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].step_order, 1);
        assert_eq!(plan.steps[0].step_desc, "cut");
        assert_eq!(plan.steps[1].step_order, 2);
        assert_eq!(plan.next_steps.len(), 1);
        assert_eq!(plan.next_steps[0].from, NodeKey::process_step("S1", 1));
        assert_eq!(plan.next_steps[0].to, NodeKey::process_step("S1", 2));
        assert_eq!(plan.first_steps.len(), 1);
        assert!(plan.cross_sfc.is_empty());
    }

    #[test]
    fn test_equal_timestamps_keep_input_order() {
        let plan = reconstruct(&log(&[
            ("S1", "COMPLETE", "b", "2024/01/01 10:00:00"),
            ("S1", "COMPLETE", "a", "2024/01/01 10:00:00"),
            ("S1", "COMPLETE", "z", ""),
            ("S1", "COMPLETE", "first", "2024/01/01 09:00:00"),
        ]))
        .unwrap();
        let order: Vec<&str> = plan.steps.iter().map(|s| s.step_desc.as_str()).collect();
        assert_eq!(order, vec!["first", "b", "a", "z"]);
        assert_eq!(plan.steps[3].created_at, None);
    }

    #[test]
    fn test_incomplete_and_blank_rows_skipped() {
        let plan = reconstruct(&log(&[
            ("S1", "ACTIVE", "a", "2024/01/01 10:00:00"),
            ("", "COMPLETE", "a", "2024/01/01 10:00:00"),
            ("S2", "COMPLETE", "a", "2024/01/01 10:00:00"),
        ]))
        .unwrap();
        assert_eq!(plan.skipped_incomplete, 1);
        assert_eq!(plan.skipped_blank, 1);
        assert_eq!(plan.sfcs, vec!["S2"]);
    }

    #[test]
    fn test_cross_sfc_chain_follows_key_order() {
        let plan = reconstruct(&log(&[
            ("S3", "COMPLETE", "x", "2024/01/01 08:00:00"),
            ("S1", "COMPLETE", "x", "2024/01/01 09:00:00"),
            ("S1", "COMPLETE", "y", "2024/01/01 10:00:00"),
            ("S2", "COMPLETE", "x", "2024/01/01 07:00:00"),
        ]))
        .unwrap();
        assert_eq!(plan.sfcs, vec!["S1", "S2", "S3"]);
        let links: Vec<(String, String)> = plan
            .cross_sfc
            .iter()
            .map(|r| (r.from.key.clone(), r.to.key.clone()))
            .collect();
        assert_eq!(
            links,
            vec![
                ("S1#2".to_string(), "S2".to_string()),
                ("S2#1".to_string(), "S3".to_string()),
            ]
        );
        assert_eq!(plan.cross_sfc[0].properties["description"], NEXT_SFC_DESCRIPTION);
    }

    #[test]
    fn test_nodes_include_sfcs_and_steps() {
        let plan = reconstruct(&log(&[
            ("S1", "COMPLETE", "x", "2024/01/01 08:00:00"),
            ("S1", "COMPLETE", "y", "2024/01/01 09:00:00"),
        ]))
        .unwrap();
        let nodes = plan.nodes();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].key, NodeKey::sfc("S1"));
        assert_eq!(nodes[2].properties["step_desc"], "y");
        assert_eq!(nodes[2].properties["weight"], 1.5);
        assert_eq!(plan.relationships().len(), 2);
    }

    #[test]
    fn test_missing_columns() {
        let table = Table::from_rows("production_log", &["sfc_no"], vec![]);
        assert!(reconstruct(&table).unwrap_err().is_column_missing());
    }

    #[test]
    fn test_workflow_stats() {
        let counts = vec![
            ("S1".to_string(), 3),
            ("S2".to_string(), 1),
            ("S3".to_string(), 3),
        ];
        let stats = WorkflowStats::from_counts(&counts, 2);
        assert_eq!(stats.sfc_count, 3);
        assert_eq!(stats.step_count, 7);
        assert_eq!(stats.distribution.get(&3), Some(&2));
        assert_eq!(stats.longest, vec![("S1".to_string(), 3), ("S3".to_string(), 3)]);
    }

    #[test]
    fn test_sample_paths() {
        let plan = reconstruct(&log(&[
            ("S2", "COMPLETE", "pack", "2024/01/01 11:00:00"),
            ("S1", "COMPLETE", "weld", "2024/01/01 10:00:05"),
            ("S1", "COMPLETE", "cut", "2024/01/01 10:00:00"),
            ("S3", "COMPLETE", "ship", "2024/01/01 12:00:00"),
        ]))
        .unwrap();

        let paths = plan.sample_paths(2);
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].sfc, "S1");
        assert_eq!(
            paths[0].steps,
            vec![(1, "cut".to_string()), (2, "weld".to_string())]
        );
        assert_eq!(paths[0].next_sfc.as_deref(), Some("S2"));
        assert_eq!(paths[0].to_string(), "S1 -> 1:cut -> 2:weld => S2");
        assert_eq!(paths[1].next_sfc.as_deref(), Some("S3"));

        let all = plan.sample_paths(10);
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].to_string(), "S3 -> 1:ship (end)");

        let stats = WorkflowStats::from_plan(&plan, 5, 1);
        assert_eq!(stats.step_count, 4);
        assert_eq!(stats.samples, vec![paths[0].clone()]);
        assert!(plan.sample_paths(0).is_empty());
    }

    proptest! {
        #[test]
        fn prop_step_orders_are_contiguous(
            rows in proptest::collection::vec((0usize..4, 0u32..6), 1..40)
        ) {
            let rows: Vec<(String, String)> = rows
                .into_iter()
                .map(|(sfc, minute)| {
                    (format!("S{}", sfc), format!("2024/01/01 10:{:02}:00", minute))
                })
                .collect();
            let refs: Vec<(&str, &str, &str, &str)> = rows
                .iter()
                .map(|(sfc, at)| (sfc.as_str(), COMPLETE_STATUS, "op", at.as_str()))
                .collect();
            let plan = reconstruct(&log(&refs)).unwrap();

            for (sfc, n) in plan.step_counts() {
                let orders: Vec<u32> = plan
                    .steps
                    .iter()
                    .filter(|s| s.sfc_no == sfc)
                    .map(|s| s.step_order)
                    .collect();
                prop_assert_eq!(orders, (1..=n as u32).collect::<Vec<_>>());
                let expected = rows.iter().filter(|(s, _)| *s == sfc).count();
                prop_assert_eq!(n, expected);
            }
            prop_assert_eq!(plan.steps.len(), rows.len());
            prop_assert_eq!(plan.cross_sfc.len(), plan.sfcs.len() - 1);
        }
    }
}
