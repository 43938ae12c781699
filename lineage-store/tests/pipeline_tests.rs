//! End-to-end tests: CSV extracts → cleaning → derivation → DuckDB graph.

use lineage_core::clean::presets::plan_for;
use lineage_core::reference::graph_writes;
use lineage_core::{
    reconstruct, tables, CleanedTables, FieldCleaner, GraphStore, LoaderConfig, NodeKind,
    RecordingSink, ReferenceEdge, ReferenceEdgeBuilder, RelType,
};
use lineage_store::{ColumnarWriter, GraphBase, RebuildInput, RebuildPipeline, SourceDb, Stage};
use std::path::Path;
use tempfile::tempdir;

const LOT_HISTORY: &str = "\
source_type,source_reference_value,target_value,storage_location_idx,created_at
SFC,\"W1,SFC-0001\",\"W1,SFC-0002\",,2024-01-01 08:00:00
SFC,\"W1,SFC-0001\",\"W1,SFC-0002\",,2024-01-01 09:00:00
INV,\"W1,SFC-0002\",\"W1,INV-0009\",L-01,2024-01-02 08:00:00
";

const INVENTORY: &str = "\
inventory_id,receiving_batch_number,created_at
INV-0001,RB-0001,2023-12-30 08:00:00
INV-0009,RB-0009,not-a-date
";

const ITEM_ASSEMBLY: &str = "\
inventory_id,related_project,related_project_type
INV-0001,PK-A,SFC
";

const SFC: &str = "\
primary_key,sfc_code,created_at
PK-A,SFC-0001,2023-12-31 08:00:00
";

const SALES_ORDER_DETAIL: &str = "\
primary_key,receiving_batch_no,created_at
\"P1,SO-1,CM-1\",RB-0001,2023-12-01 08:00:00
\"P1,SO-2,CM-2\",RB-0404,2023-12-01 08:00:00
";

const PRODUCTION_LOG: &str = "\
sfc_no,processing_status,process_step,process_step_desc,resource_code,resource_desc,weight,created_at,default_unit
SFC-0001,COMPLETE,P10,Mixing,R1,Mixer,1.5,2024-01-01 10:00:00,kg
SFC-0001,COMPLETE,P20,Drying,R2,Dryer,1.4,2024-01-01 10:00:05,kg
SFC-0001,IN_WORK,P30,Packing,R3,Packer,1.4,2024-01-01 10:00:09,kg
SFC-0002,COMPLETE,P10,Mixing,R1,Mixer,-3.2,2024-01-01 11:00:00,kg
SFC-0002,COMPLETE,P10,Mixing,R1,Mixer,2.0,2024-01-01 11:00:00,kg
SFC-0003,COMPLETE,P10,Mixing,*,Mixer,2.0,2024-01-01 12:00:00,NULL
";

fn write_sources(dir: &Path) -> SourceDb {
    let source = SourceDb::open_in_memory().unwrap();
    for (name, body) in [
        (tables::LOT_HISTORY, LOT_HISTORY),
        (tables::INVENTORY, INVENTORY),
        (tables::ITEM_ASSEMBLY, ITEM_ASSEMBLY),
        (tables::SFC, SFC),
        (tables::SALES_ORDER_DETAIL, SALES_ORDER_DETAIL),
        (tables::PRODUCTION_LOG, PRODUCTION_LOG),
    ] {
        let path = dir.join(format!("{name}.csv"));
        std::fs::write(&path, body).unwrap();
        source.register_file(name, &path).unwrap();
    }
    source
}

fn clean_all(source: &SourceDb, sink: &RecordingSink) -> CleanedTables {
    let cleaner = FieldCleaner::new(sink);
    let mut cleaned = CleanedTables::new();
    for name in tables::EDGE_SOURCES {
        let raw = source.fetch(name, name).unwrap();
        let outcome = cleaner.clean(&plan_for(name).unwrap(), &raw).unwrap();
        cleaned.insert(name, outcome.table);
    }
    cleaned
}

fn derive(source: &SourceDb) -> Vec<ReferenceEdge> {
    let sink = RecordingSink::new();
    let cleaned = clean_all(source, &sink);
    ReferenceEdgeBuilder::new(&sink).build(&cleaned).edges
}

#[test]
fn test_derive_twice_gives_same_edges() {
    let dir = tempdir().unwrap();
    let source = write_sources(dir.path());

    let first = derive(&source);
    let second = derive(&source);
    assert_eq!(first.len(), 5);
    assert_eq!(first, second);

    let order = &first[0];
    assert_eq!(order.description, "order_placed");
    assert_eq!(order.from_node, "SO-1,CM-1");
    assert_eq!(order.to_node, "RB-0001");
}

#[test]
fn test_reload_adds_no_relationships() {
    let dir = tempdir().unwrap();
    let source = write_sources(dir.path());
    let graph = GraphBase::open(dir.path().join("graph.duckdb")).unwrap();
    let sink = RecordingSink::new();
    let input = RebuildInput {
        reference: graph_writes(&derive(&source)),
        workflow: None,
    };

    let first = RebuildPipeline::new(&graph, LoaderConfig::unthrottled(2), &sink).run(&input);
    assert!(first.succeeded(), "{:?}", first.failed_stages());
    let after_first = graph.stats().unwrap();

    let second = RebuildPipeline::new(&graph, LoaderConfig::unthrottled(2), &sink)
        .without_clear()
        .run(&input);
    assert!(second.succeeded());
    assert_eq!(graph.stats().unwrap(), after_first);
    let created: usize = second.loads.iter().map(|l| l.created).sum();
    assert_eq!(created, 0);

    let counts = graph.relationship_counts().unwrap();
    assert_eq!(counts[&RelType::Orders], 1);
    assert_eq!(counts[&RelType::SplitsTo], 1);
    assert_eq!(counts[&RelType::PackagesToInventory], 1);
}

#[test]
fn test_full_rebuild_with_workflow() {
    let dir = tempdir().unwrap();
    let source = write_sources(dir.path());
    let sink = RecordingSink::new();

    let raw_log = source
        .fetch(tables::PRODUCTION_LOG, tables::PRODUCTION_LOG)
        .unwrap();
    let cleaned_log = FieldCleaner::new(&sink)
        .clean(&plan_for(tables::PRODUCTION_LOG).unwrap(), &raw_log)
        .unwrap();
    assert_eq!(cleaned_log.report.negative_drops.get("weight"), Some(&1));
    let plan = reconstruct(&cleaned_log.table).unwrap();

    let graph = GraphBase::open_in_memory().unwrap();
    let input = RebuildInput {
        reference: graph_writes(&derive(&source)),
        workflow: Some(plan),
    };
    let report = RebuildPipeline::new(&graph, LoaderConfig::unthrottled(100), &sink).run(&input);
    assert!(report.succeeded());
    assert_eq!(report.stage(Stage::Index).unwrap().items, 5);
    assert!(graph.has_unique_constraint().unwrap());

    let verify = report.verify.unwrap();
    // SFC-0001: 2 complete steps, SFC-0002 and SFC-0003: 1 each
    assert_eq!(verify.nodes[&NodeKind::ProcessStep], 4);
    assert_eq!(verify.relationships[&RelType::HasFirstStep], 3);
    assert_eq!(verify.relationships[&RelType::NextStep], 1);
    assert_eq!(verify.relationships[&RelType::LeadsToNextSfc], 2);
    assert_eq!(
        graph.steps_per_sfc().unwrap(),
        vec![
            ("SFC-0001".to_string(), 2),
            ("SFC-0002".to_string(), 1),
            ("SFC-0003".to_string(), 1)
        ]
    );
}

#[test]
fn test_cleaned_tables_export_to_parquet() {
    let dir = tempdir().unwrap();
    let source = write_sources(dir.path());
    let sink = RecordingSink::new();
    let cleaned = clean_all(&source, &sink);
    let writer = ColumnarWriter::new(dir.path().join("export")).unwrap();

    let inventory = cleaned.get(tables::INVENTORY).unwrap();
    let file = writer.write_parquet(inventory).unwrap();
    let again = writer.write_parquet(inventory).unwrap();
    assert_eq!(file.path, again.path);

    source
        .register_file("inventory_export", file.latest.as_ref().unwrap())
        .unwrap();
    let back = source.fetch("inventory_export", "inventory").unwrap();
    assert_eq!(back.len(), 2);
    assert_eq!(back.rows[1].text("created_at"), "unknown time");
}
