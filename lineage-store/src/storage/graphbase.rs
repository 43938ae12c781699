//! GraphBase - DuckDB-based storage for the lineage graph.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use duckdb::{params, Connection, OptionalExt};
use lineage_core::graph::{
    collapse_last, ClearSummary, DeleteSummary, DuplicateGroup, GraphStore, NodeId, WriteSummary,
};
use lineage_core::{LineageError, NodeKey, NodeKind, NodeWrite, RelType, RelWrite};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::schema::{
    create_index_sql, create_unique_key_sql, INDEXES, SCHEMA_SQL, SCHEMA_VERSION, UNIQUE_KEY_INDEX,
};

type CoreResult<T> = lineage_core::Result<T>;

const LAST_REBUILD_KEY: &str = "last_rebuild";

/// GraphBase - DuckDB-based storage for the lineage graph.
///
/// One instance is one graph session; the connection closes when it drops.
pub struct GraphBase {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

/// Row counts for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub relationship_count: usize,
}

impl GraphBase {
    /// Open or create a graph database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open graph database: {:?}", path))?;
        Self::with_connection(conn, Some(path.to_path_buf()))
    }

    /// In-memory graph, gone when dropped.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory graph")?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        let base = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };
        base.init_schema()?;
        Ok(base)
    }

    /// Acquire the database connection lock, handling PoisonError gracefully.
    fn acquire_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        match self.conn.lock() {
            Ok(guard) => Ok(guard),
            Err(poisoned) => {
                warn!("Recovering from poisoned database mutex");
                Ok(poisoned.into_inner())
            }
        }
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.acquire_conn()?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize schema")?;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?)",
            params![SCHEMA_VERSION],
        )
        .context("Failed to set schema version")?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Round-trip a trivial query.
    pub fn ping(&self) -> Result<()> {
        let conn = self.acquire_conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0))
            .context("Graph store did not answer")?;
        Ok(())
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.acquire_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            params![key, value],
        )
        .with_context(|| format!("Failed to set metadata: {}", key))?;
        Ok(())
    }

    pub fn metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.acquire_conn()?;
        conn.query_row(
            "SELECT value FROM metadata WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to read metadata: {}", key))
    }

    /// Stamp the time of the last completed rebuild.
    pub fn record_rebuild(&self, at: DateTime<Utc>) -> Result<()> {
        self.set_metadata(LAST_REBUILD_KEY, &at.to_rfc3339())
    }

    pub fn last_rebuild(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .metadata(LAST_REBUILD_KEY)?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc)))
    }

    pub fn stats(&self) -> Result<GraphStats> {
        let conn = self.acquire_conn()?;
        let node_count: usize =
            conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        let relationship_count: usize =
            conn.query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?;
        Ok(GraphStats {
            node_count,
            relationship_count,
        })
    }

    /// Properties of the first node with `key`.
    pub fn node_properties(&self, key: &NodeKey) -> Result<Option<Map<String, Value>>> {
        let conn = self.acquire_conn()?;
        let raw: Option<Option<String>> = conn
            .query_row(
                "SELECT properties FROM nodes WHERE kind = ? AND natural_key = ? ORDER BY id LIMIT 1",
                params![key.kind.as_str(), key.key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|props| parse_properties(props.as_deref())).transpose()
    }

    /// Properties of the `rel_type` relationship between two keys.
    pub fn relationship_properties(
        &self,
        rel_type: RelType,
        from: &NodeKey,
        to: &NodeKey,
    ) -> Result<Option<Map<String, Value>>> {
        let conn = self.acquire_conn()?;
        let raw: Option<Option<String>> = conn
            .query_row(
                r#"SELECT r.properties FROM relationships r
                   JOIN nodes a ON a.id = r.source_id
                   JOIN nodes b ON b.id = r.target_id
                   WHERE r.rel_type = ?
                     AND a.kind = ? AND a.natural_key = ?
                     AND b.kind = ? AND b.natural_key = ?
                   LIMIT 1"#,
                params![
                    rel_type.as_str(),
                    from.kind.as_str(),
                    from.key,
                    to.kind.as_str(),
                    to.key
                ],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|props| parse_properties(props.as_deref())).transpose()
    }

    /// Insert a node without merging, as an unconstrained import would.
    pub fn insert_unmerged(&self, write: &NodeWrite) -> Result<NodeId> {
        let conn = self.acquire_conn()?;
        let properties = serde_json::to_string(&write.properties)?;
        conn.query_row(
            "INSERT INTO nodes (kind, natural_key, properties) VALUES (?, ?, ?) RETURNING id",
            params![write.key.kind.as_str(), write.key.key, properties],
            |row| row.get(0),
        )
        .with_context(|| format!("Failed to insert node: {}", write.key))
    }

    pub fn has_unique_constraint(&self) -> Result<bool> {
        let conn = self.acquire_conn()?;
        let count: usize = conn.query_row(
            "SELECT COUNT(*) FROM duckdb_indexes() WHERE index_name = ?",
            params![UNIQUE_KEY_INDEX],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn reset(&self) -> Result<ClearSummary> {
        let mut conn = self.acquire_conn()?;
        let tx = conn.transaction().context("Failed to begin clear")?;
        let relationships = tx.execute("DELETE FROM relationships", [])?;
        let nodes = tx.execute("DELETE FROM nodes", [])?;
        tx.commit().context("Failed to commit clear")?;
        Ok(ClearSummary {
            nodes,
            relationships,
        })
    }

    fn declare_indexes(&self) -> Result<usize> {
        let conn = self.acquire_conn()?;
        for (name, target) in INDEXES {
            conn.execute_batch(&create_index_sql(name, target))
                .with_context(|| format!("Failed to create index {}", name))?;
        }
        Ok(INDEXES.len())
    }

    fn declare_unique_key(&self) -> Result<usize> {
        let conn = self.acquire_conn()?;
        conn.execute_batch(&create_unique_key_sql())
            .context("Failed to declare natural key uniqueness")?;
        Ok(1)
    }

    fn lift_unique_key(&self) -> Result<usize> {
        let present = self.has_unique_constraint()?;
        let conn = self.acquire_conn()?;
        conn.execute_batch(&format!("DROP INDEX IF EXISTS {}", UNIQUE_KEY_INDEX))
            .context("Failed to lift natural key uniqueness")?;
        Ok(usize::from(present))
    }

    fn write_nodes(&self, batch: &[NodeWrite]) -> Result<WriteSummary> {
        let unique = collapse_last(batch, |w| w.key.clone());
        let mut conn = self.acquire_conn()?;
        let tx = conn.transaction().context("Failed to begin node batch")?;
        tx.execute("DELETE FROM staged_nodes", [])?;
        {
            let mut appender = tx
                .appender("staged_nodes")
                .context("Failed to create node appender")?;
            for (seq, write) in unique.iter().enumerate() {
                let properties = serde_json::to_string(&write.properties)?;
                appender.append_row(params![
                    seq as i64,
                    write.key.kind.as_str(),
                    write.key.key,
                    properties
                ])?;
            }
            appender.flush()?;
        }

        let updated: usize = tx.query_row(
            r#"SELECT COUNT(*) FROM staged_nodes s
               WHERE EXISTS (SELECT 1 FROM nodes n
                             WHERE n.kind = s.kind AND n.natural_key = s.natural_key)"#,
            [],
            |row| row.get(0),
        )?;
        tx.execute(
            r#"UPDATE nodes SET properties = CAST(s.properties AS JSON)
               FROM staged_nodes s
               WHERE nodes.kind = s.kind AND nodes.natural_key = s.natural_key"#,
            [],
        )
        .context("Failed to update existing nodes")?;
        let created = tx
            .execute(
                r#"INSERT INTO nodes (kind, natural_key, properties)
                   SELECT s.kind, s.natural_key, CAST(s.properties AS JSON)
                   FROM staged_nodes s
                   WHERE NOT EXISTS (SELECT 1 FROM nodes n
                                     WHERE n.kind = s.kind AND n.natural_key = s.natural_key)
                   ORDER BY s.seq"#,
                [],
            )
            .context("Failed to insert new nodes")?;
        tx.commit().context("Failed to commit node batch")?;

        debug!(
            "write_nodes: {} unique (from {}), {} created, {} updated",
            unique.len(),
            batch.len(),
            created,
            updated
        );
        Ok(WriteSummary {
            created,
            updated,
            unmatched: 0,
        })
    }

    fn write_relationships(&self, batch: &[RelWrite]) -> Result<WriteSummary> {
        let unique = collapse_last(batch, |w| (w.rel_type, w.from.clone(), w.to.clone()));
        let mut conn = self.acquire_conn()?;
        let tx = conn
            .transaction()
            .context("Failed to begin relationship batch")?;
        tx.execute("DELETE FROM staged_relationships", [])?;
        tx.execute("DELETE FROM resolved_relationships", [])?;
        {
            let mut appender = tx
                .appender("staged_relationships")
                .context("Failed to create relationship appender")?;
            for (seq, write) in unique.iter().enumerate() {
                let properties = serde_json::to_string(&write.properties)?;
                appender.append_row(params![
                    seq as i64,
                    write.rel_type.as_str(),
                    write.from.kind.as_str(),
                    write.from.key,
                    write.to.kind.as_str(),
                    write.to.key,
                    properties
                ])?;
            }
            appender.flush()?;
        }

        // Endpoints resolve to the first node holding the key.
        let resolved = tx
            .execute(
                r#"INSERT INTO resolved_relationships
                   SELECT s.seq, s.rel_type, a.id, b.id, s.properties
                   FROM staged_relationships s
                   JOIN (SELECT kind, natural_key, MIN(id) AS id
                         FROM nodes GROUP BY kind, natural_key) a
                     ON a.kind = s.source_kind AND a.natural_key = s.source_key
                   JOIN (SELECT kind, natural_key, MIN(id) AS id
                         FROM nodes GROUP BY kind, natural_key) b
                     ON b.kind = s.target_kind AND b.natural_key = s.target_key"#,
                [],
            )
            .context("Failed to resolve relationship endpoints")?;
        let updated: usize = tx.query_row(
            r#"SELECT COUNT(*) FROM resolved_relationships r
               WHERE EXISTS (SELECT 1 FROM relationships e
                             WHERE e.rel_type = r.rel_type
                               AND e.source_id = r.source_id
                               AND e.target_id = r.target_id)"#,
            [],
            |row| row.get(0),
        )?;
        tx.execute(
            r#"UPDATE relationships SET properties = CAST(r.properties AS JSON)
               FROM resolved_relationships r
               WHERE relationships.rel_type = r.rel_type
                 AND relationships.source_id = r.source_id
                 AND relationships.target_id = r.target_id"#,
            [],
        )
        .context("Failed to update existing relationships")?;
        let created = tx
            .execute(
                r#"INSERT INTO relationships (rel_type, source_id, target_id, properties)
                   SELECT r.rel_type, r.source_id, r.target_id, CAST(r.properties AS JSON)
                   FROM resolved_relationships r
                   WHERE NOT EXISTS (SELECT 1 FROM relationships e
                                     WHERE e.rel_type = r.rel_type
                                       AND e.source_id = r.source_id
                                       AND e.target_id = r.target_id)
                   ORDER BY r.seq"#,
                [],
            )
            .context("Failed to insert new relationships")?;
        tx.commit()
            .context("Failed to commit relationship batch")?;

        Ok(WriteSummary {
            created,
            updated,
            unmatched: unique.len() - resolved,
        })
    }

    fn find_duplicates(&self, kind: NodeKind) -> Result<Vec<DuplicateGroup>> {
        let conn = self.acquire_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT natural_key, id FROM nodes
               WHERE kind = ? AND natural_key IN (
                   SELECT natural_key FROM nodes WHERE kind = ?
                   GROUP BY natural_key HAVING COUNT(*) > 1)
               ORDER BY id"#,
        )?;
        let mut rows = stmt.query(params![kind.as_str(), kind.as_str()])?;
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<NodeId>> = HashMap::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let id: NodeId = row.get(1)?;
            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(id);
        }
        Ok(order
            .into_iter()
            .filter_map(|key| {
                let ids = groups.remove(&key)?;
                Some(DuplicateGroup { key, ids })
            })
            .collect())
    }

    fn remove_nodes(&self, ids: &[NodeId]) -> Result<DeleteSummary> {
        let mut conn = self.acquire_conn()?;
        let tx = conn.transaction().context("Failed to begin delete")?;
        tx.execute("DELETE FROM doomed_nodes", [])?;
        {
            let mut appender = tx.appender("doomed_nodes")?;
            for &id in ids {
                appender.append_row(params![id])?;
            }
            appender.flush()?;
        }
        let relationships = tx
            .execute(
                r#"DELETE FROM relationships
                   WHERE source_id IN (SELECT id FROM doomed_nodes)
                      OR target_id IN (SELECT id FROM doomed_nodes)"#,
                [],
            )
            .context("Failed to delete incident relationships")?;
        let nodes = tx
            .execute(
                "DELETE FROM nodes WHERE id IN (SELECT id FROM doomed_nodes)",
                [],
            )
            .context("Failed to delete nodes")?;
        tx.commit().context("Failed to commit delete")?;
        Ok(DeleteSummary {
            nodes,
            relationships,
        })
    }

    fn count_by<K: Ord>(
        &self,
        sql: &str,
        parse: impl Fn(&str) -> Option<K>,
    ) -> Result<BTreeMap<K, usize>> {
        let conn = self.acquire_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut counts = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let label: String = row.get(0)?;
            let count: usize = row.get(1)?;
            match parse(&label) {
                Some(key) => {
                    counts.insert(key, count);
                }
                None => warn!("Ignoring unknown graph label '{}' ({} rows)", label, count),
            }
        }
        Ok(counts)
    }

    fn step_counts(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.acquire_conn()?;
        let mut stmt = conn.prepare("SELECT natural_key FROM nodes WHERE kind = ?")?;
        let mut rows = stmt.query(params![NodeKind::ProcessStep.as_str()])?;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let key = NodeKey::new(NodeKind::ProcessStep, row.get::<_, String>(0)?);
            if let Some((sfc, _)) = key.step_parts() {
                *counts.entry(sfc.to_string()).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }
}

fn parse_properties(raw: Option<&str>) -> Result<Map<String, Value>> {
    match raw {
        Some(text) => serde_json::from_str(text).context("Corrupt property JSON"),
        None => Ok(Map::new()),
    }
}

fn store_error(e: anyhow::Error) -> LineageError {
    LineageError::store(format!("{:#}", e))
}

impl GraphStore for GraphBase {
    fn clear_all(&self) -> CoreResult<ClearSummary> {
        self.reset().map_err(store_error)
    }

    fn create_indexes(&self) -> CoreResult<usize> {
        self.declare_indexes().map_err(store_error)
    }

    fn create_constraints(&self) -> CoreResult<usize> {
        self.declare_unique_key().map_err(store_error)
    }

    fn drop_constraints(&self) -> CoreResult<usize> {
        self.lift_unique_key().map_err(store_error)
    }

    fn upsert_nodes(&self, batch: &[NodeWrite]) -> CoreResult<WriteSummary> {
        self.write_nodes(batch).map_err(store_error)
    }

    fn upsert_relationships(&self, batch: &[RelWrite]) -> CoreResult<WriteSummary> {
        self.write_relationships(batch).map_err(store_error)
    }

    fn duplicate_groups(&self, kind: NodeKind) -> CoreResult<Vec<DuplicateGroup>> {
        self.find_duplicates(kind).map_err(store_error)
    }

    fn delete_nodes(&self, ids: &[NodeId]) -> CoreResult<DeleteSummary> {
        self.remove_nodes(ids).map_err(store_error)
    }

    fn node_counts(&self) -> CoreResult<BTreeMap<NodeKind, usize>> {
        self.count_by(
            "SELECT kind, COUNT(*) FROM nodes GROUP BY kind",
            NodeKind::parse,
        )
        .map_err(store_error)
    }

    fn relationship_counts(&self) -> CoreResult<BTreeMap<RelType, usize>> {
        self.count_by(
            "SELECT rel_type, COUNT(*) FROM relationships GROUP BY rel_type",
            RelType::parse,
        )
        .map_err(store_error)
    }

    fn isolated_counts(&self) -> CoreResult<BTreeMap<NodeKind, usize>> {
        self.count_by(
            r#"SELECT n.kind, COUNT(*) FROM nodes n
               WHERE NOT EXISTS (SELECT 1 FROM relationships r
                                 WHERE r.source_id = n.id OR r.target_id = n.id)
               GROUP BY n.kind"#,
            NodeKind::parse,
        )
        .map_err(store_error)
    }

    fn steps_per_sfc(&self) -> CoreResult<Vec<(String, usize)>> {
        self.step_counts().map_err(store_error)
    }
}
