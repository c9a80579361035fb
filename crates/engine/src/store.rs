//! Document store
//!
//! [`SoupStore`] is the CRUD engine over one backing-store handle. It owns
//! the [`SoupRegistry`], the live-cursor table and the cursor id allocator.
//!
//! ## Reserved fields
//!
//! Every stored document carries `_soupEntryId` (assigned once at creation)
//! and `_soupLastModifiedDate` (epoch millis, advanced on every write). The
//! `created` timestamp lives only in its backing column.
//!
//! ## Transactions
//!
//! Each mutation runs in its own transaction. Operations called from inside
//! [`SoupStore::run_in_transaction`] (or `upsert_many`) join the outer
//! transaction as savepoints, so an error propagated out of the outer
//! closure rolls all of them back. A failed operation that the closure
//! swallows still rolls the batch back; the call then fails with
//! `TransactionAborted`.

use crate::cursor::{Cursor, CursorId};
use crate::database::Database;
use crate::query::{self, CompiledQuery};
use crate::soup::schema::{spec_column, CREATED_COL, ID_COL, LAST_MODIFIED_COL, SOUP_COL};
use crate::soup::SoupRegistry;
use dashmap::DashMap;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use serde_json::{Map, Value};
use soupstore_core::{
    project, EntryTimestamps, IndexSpec, IndexValue, QuerySpec, SoupEntryId, SoupError,
    SoupResult, SOUP_ENTRY_ID, SOUP_LAST_MODIFIED_DATE,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Current time in epoch millis
fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// SoupStore
// =============================================================================

/// JSON document store over one backing-store handle
pub struct SoupStore {
    db: Arc<Database>,
    registry: SoupRegistry,
    cursors: DashMap<CursorId, Cursor>,
    next_cursor_id: AtomicU64,
}

impl SoupStore {
    /// Create a store over an open handle
    pub fn new(db: Arc<Database>) -> SoupResult<Self> {
        let registry = SoupRegistry::new(Arc::clone(&db))?;
        Ok(SoupStore {
            db,
            registry,
            cursors: DashMap::new(),
            next_cursor_id: AtomicU64::new(1),
        })
    }

    /// In-memory store, lost on drop
    pub fn ephemeral() -> SoupResult<Self> {
        Self::new(Arc::new(Database::ephemeral()?))
    }

    /// Backing-store handle
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Soup registry
    pub fn registry(&self) -> &SoupRegistry {
        &self.registry
    }

    /// Size of the backing store in bytes
    pub fn database_size(&self) -> SoupResult<i64> {
        self.db.database_size()
    }

    // ========================================================================
    // Soup management
    // ========================================================================

    /// Register a soup; no-op when it already exists
    pub fn register_soup(&self, soup: &str, specs: &[IndexSpec]) -> SoupResult<()> {
        self.registry.register_soup(soup, specs)
    }

    /// Check if a soup is registered
    pub fn has_soup(&self, soup: &str) -> SoupResult<bool> {
        self.registry.has_soup(soup)
    }

    /// Backing table name of a soup
    pub fn get_soup_table_name(&self, soup: &str) -> SoupResult<Option<String>> {
        self.registry.soup_table_name(soup)
    }

    /// Index specs of a soup, in declaration order
    pub fn get_soup_index_specs(&self, soup: &str) -> SoupResult<Vec<IndexSpec>> {
        Ok(self.registry.index_specs(soup)?.as_ref().clone())
    }

    /// Names of all registered soups
    pub fn get_all_soup_names(&self) -> SoupResult<Vec<String>> {
        self.registry.soup_names()
    }

    /// Replace a soup's index specs, optionally re-projecting every document
    pub fn alter_soup(&self, soup: &str, specs: &[IndexSpec], re_index: bool) -> SoupResult<()> {
        self.registry.alter_soup(soup, specs, re_index)
    }

    /// Re-project the given indexed paths for every document
    pub fn re_index_soup(&self, soup: &str, paths: &[String]) -> SoupResult<()> {
        self.registry.re_index_soup(soup, paths)
    }

    /// Drop a soup with its documents; no-op when not registered
    pub fn drop_soup(&self, soup: &str) -> SoupResult<()> {
        self.registry.drop_soup(soup)
    }

    /// Drop every soup
    pub fn drop_all_soups(&self) -> SoupResult<()> {
        self.registry.drop_all_soups()
    }

    /// Delete every document of a soup, keeping its schema
    pub fn clear_soup(&self, soup: &str) -> SoupResult<()> {
        let table = self.registry.require_table(soup)?;
        let removed = self
            .db
            .transaction(|conn| Ok(conn.execute(&format!("DELETE FROM {}", table), [])?))?;
        info!(soup, removed, "cleared soup");
        Ok(())
    }

    // ========================================================================
    // CRUD
    // ========================================================================

    /// Insert a new document, returning it with the reserved fields set
    pub fn create(&self, soup: &str, doc: Value) -> SoupResult<Value> {
        let doc = into_object(doc)?;
        self.db.transaction(|conn| self.insert(conn, soup, doc))
    }

    /// Fetch documents by entry id
    ///
    /// Unknown ids are skipped; the result order is unspecified.
    pub fn retrieve(&self, soup: &str, ids: &[SoupEntryId]) -> SoupResult<Vec<Value>> {
        let table = self.registry.require_table(soup)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM {} WHERE {} IN ({})",
                SOUP_COL,
                table,
                ID_COL,
                placeholders(ids.len())
            ))?;
            let raws = stmt
                .query_map(params_from_iter(ids), |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            raws.iter()
                .map(|raw| serde_json::from_str(raw).map_err(SoupError::from))
                .collect()
        })
    }

    /// Overwrite an existing document
    ///
    /// Fails with `EntryNotFound` when no row has `entry_id`.
    pub fn update(&self, soup: &str, doc: Value, entry_id: SoupEntryId) -> SoupResult<Value> {
        let doc = into_object(doc)?;
        self.db
            .transaction(|conn| self.overwrite(conn, soup, doc, entry_id))
    }

    /// Update the document with the same entry id, or create it
    pub fn upsert(&self, soup: &str, doc: Value) -> SoupResult<Value> {
        self.upsert_with_external_id(soup, doc, SOUP_ENTRY_ID)
    }

    /// Update the single document sharing `doc`'s value at `external_id_path`,
    /// or create a new one when none does
    ///
    /// More than one match fails with `AmbiguousExternalId`.
    pub fn upsert_with_external_id(
        &self,
        soup: &str,
        doc: Value,
        external_id_path: &str,
    ) -> SoupResult<Value> {
        let doc = into_object(doc)?;
        self.db.transaction(|conn| {
            match self.lookup_existing(conn, soup, &doc, external_id_path)? {
                Some(entry_id) => self.overwrite(conn, soup, doc, entry_id),
                None => self.insert(conn, soup, doc),
            }
        })
    }

    /// Upsert a batch of documents, all or nothing
    pub fn upsert_many(
        &self,
        soup: &str,
        docs: Vec<Value>,
        external_id_path: &str,
    ) -> SoupResult<Vec<Value>> {
        self.registry.require_table(soup)?;
        let count = docs.len();
        let saved = self.db.transaction(|_| {
            docs.into_iter()
                .map(|doc| self.upsert_with_external_id(soup, doc, external_id_path))
                .collect::<SoupResult<Vec<_>>>()
        })?;
        debug!(soup, count, "upserted batch");
        Ok(saved)
    }

    /// Delete documents by entry id, returning how many rows went away
    pub fn delete(&self, soup: &str, ids: &[SoupEntryId]) -> SoupResult<usize> {
        let table = self.registry.require_table(soup)?;
        if ids.is_empty() {
            return Ok(0);
        }
        self.db.transaction(|conn| {
            Ok(conn.execute(
                &format!(
                    "DELETE FROM {} WHERE {} IN ({})",
                    table,
                    ID_COL,
                    placeholders(ids.len())
                ),
                params_from_iter(ids),
            )?)
        })
    }

    /// Delete every document a soup-scoped query matches, ignoring paging
    pub fn delete_by_query(&self, soup: &str, spec: &QuerySpec) -> SoupResult<usize> {
        let table = self.registry.require_table(soup)?;
        let compiled = query::compile(&self.registry, soup, spec)?;
        let ids = query::id_select_sql(&compiled)?;
        let removed = self.db.transaction(|conn| {
            Ok(conn.execute(
                &format!("DELETE FROM {} WHERE {} IN ({})", table, ID_COL, ids),
                params_from_iter(compiled.args()),
            )?)
        })?;
        debug!(soup, removed, "deleted by query");
        Ok(removed)
    }

    /// Creation and last-modified times of an entry
    pub fn entry_timestamps(
        &self,
        soup: &str,
        entry_id: SoupEntryId,
    ) -> SoupResult<Option<EntryTimestamps>> {
        let table = self.registry.require_table(soup)?;
        self.db.read(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {}, {} FROM {} WHERE {} = ?1",
                        CREATED_COL, LAST_MODIFIED_COL, table, ID_COL
                    ),
                    params![entry_id],
                    |row| {
                        Ok(EntryTimestamps {
                            created: row.get(0)?,
                            last_modified: row.get(1)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    /// Run several operations as one transaction
    ///
    /// Operations on this store called from `f` join the transaction. It
    /// commits only if `f` returns `Ok` and none of those operations failed.
    pub fn run_in_transaction<F, T>(&self, f: F) -> SoupResult<T>
    where
        F: FnOnce(&SoupStore) -> SoupResult<T>,
    {
        self.db.transaction(|_| f(self))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Parse a wire-form query spec, defaulting `pageSize` from the store config
    pub fn parse_query_spec(&self, json: &str) -> SoupResult<QuerySpec> {
        QuerySpec::from_json_with_default_page_size(json, self.db.config().default_page_size)
    }

    /// One page of a soup-scoped query
    pub fn query(&self, soup: &str, spec: &QuerySpec, page_index: usize) -> SoupResult<Vec<Value>> {
        let compiled = query::compile(&self.registry, soup, spec)?;
        self.db
            .read(|conn| query::fetch_page(conn, &compiled, page_index, spec.page_size))
    }

    /// One page of a smart query; each row is a JSON array
    pub fn smart_query(&self, spec: &QuerySpec, page_index: usize) -> SoupResult<Vec<Value>> {
        let compiled = query::compile_smart(&self.registry, spec)?;
        self.db
            .read(|conn| query::fetch_page(conn, &compiled, page_index, spec.page_size))
    }

    /// Number of documents a soup-scoped query matches
    pub fn count_query(&self, soup: &str, spec: &QuerySpec) -> SoupResult<usize> {
        let compiled = query::compile(&self.registry, soup, spec)?;
        self.db.read(|conn| query::count(conn, &compiled))
    }

    /// Number of rows a smart query returns
    pub fn count_smart_query(&self, spec: &QuerySpec) -> SoupResult<usize> {
        let compiled = query::compile_smart(&self.registry, spec)?;
        self.db.read(|conn| query::count(conn, &compiled))
    }

    // ========================================================================
    // Cursors
    // ========================================================================

    /// Open a cursor over a soup-scoped query, loaded at page 0
    pub fn open_cursor(&self, soup: &str, spec: &QuerySpec) -> SoupResult<Cursor> {
        let compiled = query::compile(&self.registry, soup, spec)?;
        self.register_cursor(Some(soup.to_string()), spec, &compiled)
    }

    /// Open a cursor over a smart query, loaded at page 0
    pub fn open_smart_cursor(&self, spec: &QuerySpec) -> SoupResult<Cursor> {
        let compiled = query::compile_smart(&self.registry, spec)?;
        self.register_cursor(None, spec, &compiled)
    }

    fn register_cursor(
        &self,
        soup: Option<String>,
        spec: &QuerySpec,
        compiled: &CompiledQuery,
    ) -> SoupResult<Cursor> {
        let (total, first_page) = self.db.read(|conn| {
            let total = query::count(conn, compiled)?;
            let page = query::fetch_page(conn, compiled, 0, spec.page_size)?;
            Ok((total, page))
        })?;
        let cursor_id = self.next_cursor_id.fetch_add(1, Ordering::Relaxed);
        let cursor = Cursor::new(cursor_id, soup, spec.clone(), total, first_page);
        self.cursors.insert(cursor_id, cursor.clone());
        debug!(cursor_id, total, pages = cursor.total_pages, "opened cursor");
        Ok(cursor)
    }

    /// Load another page into a cursor
    ///
    /// The index is clamped to the cursor's frozen page range and the query
    /// is re-run at the new offset.
    pub fn move_cursor_to_page(&self, cursor_id: CursorId, page_index: usize) -> SoupResult<Cursor> {
        let (soup, spec, page_index) = {
            let cursor = self
                .cursors
                .get(&cursor_id)
                .ok_or(SoupError::InvalidCursor { cursor_id })?;
            (
                cursor.soup.clone(),
                cursor.spec.clone(),
                cursor.clamp_page(page_index),
            )
        };

        let compiled = match &soup {
            Some(soup) => query::compile(&self.registry, soup, &spec)?,
            None => query::compile_smart(&self.registry, &spec)?,
        };
        let entries = self
            .db
            .read(|conn| query::fetch_page(conn, &compiled, page_index, spec.page_size))?;

        let mut cursor = self
            .cursors
            .get_mut(&cursor_id)
            .ok_or(SoupError::InvalidCursor { cursor_id })?;
        cursor.current_page_index = page_index;
        cursor.current_page_ordered_entries = entries;
        Ok(cursor.clone())
    }

    /// Close a cursor; its id is invalid afterwards
    pub fn close_cursor(&self, cursor_id: CursorId) -> SoupResult<()> {
        if self.cursors.remove(&cursor_id).is_none() {
            return Err(SoupError::InvalidCursor { cursor_id });
        }
        debug!(cursor_id, "closed cursor");
        Ok(())
    }

    /// Number of open cursors
    pub fn live_cursor_count(&self) -> usize {
        self.cursors.len()
    }

    // ========================================================================
    // Row writes
    // ========================================================================

    fn insert(&self, conn: &Connection, soup: &str, mut doc: Map<String, Value>) -> SoupResult<Value> {
        let table = self.registry.require_table(soup)?;
        let specs = self.registry.index_specs(soup)?;
        let now = now_millis();

        // The id is only known after the insert, so the document is written
        // in a second statement once the reserved fields are in place.
        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}) VALUES (NULL, ?1, ?2)",
                table, SOUP_COL, CREATED_COL, LAST_MODIFIED_COL
            ),
            params![now, now],
        )?;
        let entry_id = conn.last_insert_rowid();
        doc.insert(SOUP_ENTRY_ID.to_string(), Value::from(entry_id));
        doc.insert(SOUP_LAST_MODIFIED_DATE.to_string(), Value::from(now));
        let doc = Value::Object(doc);

        write_row(conn, &table, &specs, &doc, entry_id, now)?;
        Ok(doc)
    }

    fn overwrite(
        &self,
        conn: &Connection,
        soup: &str,
        mut doc: Map<String, Value>,
        entry_id: SoupEntryId,
    ) -> SoupResult<Value> {
        let table = self.registry.require_table(soup)?;
        let specs = self.registry.index_specs(soup)?;

        let previous: Option<i64> = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE {} = ?1",
                    LAST_MODIFIED_COL, table, ID_COL
                ),
                params![entry_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(previous) = previous else {
            return Err(SoupError::EntryNotFound {
                soup: soup.to_string(),
                entry_id,
            });
        };
        let now = now_millis().max(previous);

        doc.insert(SOUP_ENTRY_ID.to_string(), Value::from(entry_id));
        doc.insert(SOUP_LAST_MODIFIED_DATE.to_string(), Value::from(now));
        let doc = Value::Object(doc);

        write_row(conn, &table, &specs, &doc, entry_id, now)?;
        Ok(doc)
    }

    /// Entry id of the document `doc` should replace, if any
    fn lookup_existing(
        &self,
        conn: &Connection,
        soup: &str,
        doc: &Map<String, Value>,
        external_id_path: &str,
    ) -> SoupResult<Option<SoupEntryId>> {
        let table = self.registry.require_table(soup)?;
        if external_id_path == SOUP_ENTRY_ID {
            return Ok(doc.get(SOUP_ENTRY_ID).and_then(Value::as_i64));
        }

        let resolved = self.registry.column_for_path(soup, external_id_path)?;
        let doc_value = Value::Object(doc.clone());
        let key = match project(&doc_value, external_id_path) {
            Some(value) if !value.is_null() => IndexValue::for_query_key(value, resolved.index_type),
            _ => return Ok(None),
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            ID_COL, table, resolved.column
        ))?;
        let ids = stmt
            .query_map(params![key], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        match ids.as_slice() {
            [] => Ok(None),
            [id] => Ok(Some(*id)),
            _ => Err(SoupError::AmbiguousExternalId {
                soup: soup.to_string(),
                path: external_id_path.to_string(),
                matches: ids.len(),
            }),
        }
    }
}

impl std::fmt::Debug for SoupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoupStore")
            .field("db", &self.db)
            .field("live_cursors", &self.cursors.len())
            .finish()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn into_object(doc: Value) -> SoupResult<Map<String, Value>> {
    match doc {
        Value::Object(map) => Ok(map),
        other => Err(SoupError::invalid_input(format!(
            "documents must be JSON objects, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Write the raw document, last-modified time and every index column
fn write_row(
    conn: &Connection,
    table: &str,
    specs: &[IndexSpec],
    doc: &Value,
    entry_id: SoupEntryId,
    last_modified: i64,
) -> SoupResult<()> {
    let raw = serde_json::to_string(doc)?;
    let values: Vec<IndexValue> = specs
        .iter()
        .map(|spec| IndexValue::project(doc, &spec.path, spec.index_type))
        .collect();

    let mut assignments = vec![
        format!("{} = ?1", SOUP_COL),
        format!("{} = ?2", LAST_MODIFIED_COL),
    ];
    for (i, spec) in specs.iter().enumerate() {
        assignments.push(format!("{} = ?{}", spec_column(spec), i + 3));
    }

    let mut bound: Vec<&dyn ToSql> = vec![&raw, &last_modified];
    bound.extend(values.iter().map(|v| v as &dyn ToSql));
    bound.push(&entry_id);

    conn.execute(
        &format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            table,
            assignments.join(", "),
            ID_COL,
            specs.len() + 3
        ),
        params_from_iter(bound),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SoupStore {
        let store = SoupStore::ephemeral().unwrap();
        store
            .register_soup("people", &[IndexSpec::string("lastName"), IndexSpec::integer("age")])
            .unwrap();
        store
    }

    #[test]
    fn test_create_injects_reserved_fields() {
        let store = store();
        let doc = store.create("people", json!({"lastName": "Doe"})).unwrap();
        assert_eq!(doc[SOUP_ENTRY_ID], json!(1));
        assert!(doc[SOUP_LAST_MODIFIED_DATE].as_i64().unwrap() > 0);
        assert_eq!(doc["lastName"], json!("Doe"));
    }

    #[test]
    fn test_create_rejects_non_objects() {
        let store = store();
        assert!(matches!(
            store.create("people", json!([1, 2])),
            Err(SoupError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_unknown_soup() {
        let store = store();
        assert!(matches!(
            store.create("ghost", json!({})),
            Err(SoupError::SoupNotFound { .. })
        ));
        assert!(matches!(
            store.retrieve("ghost", &[1]),
            Err(SoupError::SoupNotFound { .. })
        ));
    }

    #[test]
    fn test_index_columns_follow_document() {
        let store = store();
        let doc = store
            .create("people", json!({"lastName": "Doe", "age": "41"}))
            .unwrap();
        let id = doc[SOUP_ENTRY_ID].as_i64().unwrap();
        let age: Option<i64> = store
            .database()
            .read(|conn| {
                Ok(conn.query_row("SELECT TABLE_1_1 FROM TABLE_1 WHERE id = ?1", [id], |r| {
                    r.get(0)
                })?)
            })
            .unwrap();
        assert_eq!(age, Some(41));
    }

    #[test]
    fn test_update_missing_entry() {
        let store = store();
        assert!(matches!(
            store.update("people", json!({"lastName": "X"}), 99),
            Err(SoupError::EntryNotFound { entry_id: 99, .. })
        ));
    }

    #[test]
    fn test_upsert_by_system_id() {
        let store = store();
        let created = store.upsert("people", json!({"lastName": "Doe"})).unwrap();
        let mut changed = created.clone();
        changed["lastName"] = json!("Roe");
        let updated = store.upsert("people", changed).unwrap();
        assert_eq!(updated[SOUP_ENTRY_ID], created[SOUP_ENTRY_ID]);
        assert_eq!(
            store.count_query("people", &QuerySpec::all("lastName", Default::default(), 10).unwrap())
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[test]
    fn test_cursor_unknown_id() {
        let store = store();
        assert!(matches!(
            store.move_cursor_to_page(42, 0),
            Err(SoupError::InvalidCursor { cursor_id: 42 })
        ));
        assert!(matches!(
            store.close_cursor(42),
            Err(SoupError::InvalidCursor { cursor_id: 42 })
        ));
    }
}
