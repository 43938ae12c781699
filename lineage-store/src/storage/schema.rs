//! DuckDB schema for the lineage graph.

/// Tables for nodes, relationships, batch staging and metadata.
///
/// Node identity comes from a sequence so ids follow insertion order; the
/// natural key is what writes merge on.
pub const SCHEMA_SQL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS node_ids START 1;

-- Nodes table: one row per business entity or process step
CREATE TABLE IF NOT EXISTS nodes (
    id BIGINT NOT NULL DEFAULT nextval('node_ids'),
    kind VARCHAR NOT NULL,
    natural_key VARCHAR NOT NULL,
    properties JSON
);

-- Relationships table: typed, directed links between node ids
CREATE TABLE IF NOT EXISTS relationships (
    rel_type VARCHAR NOT NULL,
    source_id BIGINT NOT NULL,
    target_id BIGINT NOT NULL,
    properties JSON
);

-- Staging tables: one batch at a time, emptied before each write
CREATE TABLE IF NOT EXISTS staged_nodes (
    seq BIGINT NOT NULL,
    kind VARCHAR NOT NULL,
    natural_key VARCHAR NOT NULL,
    properties VARCHAR
);

CREATE TABLE IF NOT EXISTS staged_relationships (
    seq BIGINT NOT NULL,
    rel_type VARCHAR NOT NULL,
    source_kind VARCHAR NOT NULL,
    source_key VARCHAR NOT NULL,
    target_kind VARCHAR NOT NULL,
    target_key VARCHAR NOT NULL,
    properties VARCHAR
);

CREATE TABLE IF NOT EXISTS resolved_relationships (
    seq BIGINT NOT NULL,
    rel_type VARCHAR NOT NULL,
    source_id BIGINT NOT NULL,
    target_id BIGINT NOT NULL,
    properties VARCHAR
);

CREATE TABLE IF NOT EXISTS doomed_nodes (
    id BIGINT NOT NULL
);

-- Metadata table: version, last rebuild
CREATE TABLE IF NOT EXISTS metadata (
    key VARCHAR PRIMARY KEY,
    value VARCHAR
);
"#;

/// Schema version for migrations
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Lookup indexes: natural key per kind, relationship type, endpoints.
pub const INDEXES: &[(&str, &str)] = &[
    ("idx_nodes_kind", "nodes(kind)"),
    ("idx_nodes_natural_key", "nodes(natural_key)"),
    ("idx_relationships_type", "relationships(rel_type)"),
    ("idx_relationships_source", "relationships(source_id)"),
    ("idx_relationships_target", "relationships(target_id)"),
];

/// Uniqueness on (kind, natural_key) covers every node kind, composite
/// process step keys included.
pub const UNIQUE_KEY_INDEX: &str = "uq_nodes_natural_key";

pub fn create_index_sql(name: &str, target: &str) -> String {
    format!("CREATE INDEX IF NOT EXISTS {} ON {}", name, target)
}

pub fn create_unique_key_sql() -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON nodes(kind, natural_key)",
        UNIQUE_KEY_INDEX
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_sql() {
        assert_eq!(
            create_index_sql("idx_nodes_kind", "nodes(kind)"),
            "CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(kind)"
        );
        assert!(create_unique_key_sql().contains("nodes(kind, natural_key)"));
    }
}
