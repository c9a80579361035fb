//! Soup registry: soup names, backing tables and index specs
//!
//! The registry owns all schema DDL. Lookups are memoized in a
//! [`RegistryCache`]; entries are filled lazily on a miss and invalidated by
//! drop and alter. The memo is only filled outside of transactions, so a
//! rolled-back registration can never leave a phantom soup behind.

use crate::database::Database;
use crate::soup::schema::{
    self, assign_columns, create_soup_table, drop_soup_indexes, insert_index_map, project_columns,
    read_index_map, spec_column, CREATED_COL, ID_COL, LAST_MODIFIED_COL, SOUP_COL,
    SOUP_INDEX_MAP_TABLE, SOUP_NAMES_TABLE,
};
use dashmap::DashMap;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use soupstore_core::{
    IndexSpec, IndexType, SoupError, SoupResult, SOUP_ENTRY_ID, SOUP_LAST_MODIFIED_DATE,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// RegistryCache
// =============================================================================

/// Memoized soup name → table name and soup name → index specs
#[derive(Debug, Default)]
pub struct RegistryCache {
    tables: DashMap<String, String>,
    specs: DashMap<String, Arc<Vec<IndexSpec>>>,
}

impl RegistryCache {
    fn table(&self, soup: &str) -> Option<String> {
        self.tables.get(soup).map(|t| t.value().clone())
    }

    fn specs(&self, soup: &str) -> Option<Arc<Vec<IndexSpec>>> {
        self.specs.get(soup).map(|s| Arc::clone(s.value()))
    }

    /// Forget everything about one soup
    pub fn invalidate(&self, soup: &str) {
        self.tables.remove(soup);
        self.specs.remove(soup);
    }

    /// Forget everything
    pub fn clear(&self) {
        self.tables.clear();
        self.specs.clear();
    }

    /// Number of soups with a memoized table name
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Check if nothing is memoized
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Backing column resolved for a query or upsert path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    /// Column name in the soup table
    pub column: String,
    /// Column type
    pub index_type: IndexType,
}

// =============================================================================
// SoupRegistry
// =============================================================================

/// Soup name → backing table and index spec registry
pub struct SoupRegistry {
    db: Arc<Database>,
    cache: RegistryCache,
}

impl SoupRegistry {
    /// Create the registry, creating its system tables if needed
    pub fn new(db: Arc<Database>) -> SoupResult<Self> {
        db.transaction(schema::create_system_tables)?;
        Ok(SoupRegistry {
            db,
            cache: RegistryCache::default(),
        })
    }

    /// Memo cache, exposed for invalidation hooks and inspection
    pub fn cache(&self) -> &RegistryCache {
        &self.cache
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Check if a soup is registered
    pub fn has_soup(&self, soup: &str) -> SoupResult<bool> {
        Ok(self.soup_table_name(soup)?.is_some())
    }

    /// Backing table name of a soup, `None` when not registered
    pub fn soup_table_name(&self, soup: &str) -> SoupResult<Option<String>> {
        if let Some(table) = self.cache.table(soup) {
            return Ok(Some(table));
        }
        // Memoize under the same lock as the lookup so a concurrent drop
        // cannot commit in between
        self.db.read_scoped(|conn, in_transaction| {
            let soup_id: Option<i64> = conn
                .query_row(
                    &format!("SELECT id FROM {} WHERE soupName = ?1", SOUP_NAMES_TABLE),
                    params![soup],
                    |row| row.get(0),
                )
                .optional()?;
            let table = soup_id.map(schema::table_name);
            if let Some(table) = &table {
                if !in_transaction {
                    self.cache.tables.insert(soup.to_string(), table.clone());
                }
            }
            Ok(table)
        })
    }

    /// Backing table name of a soup, failing if it is not registered
    pub fn require_table(&self, soup: &str) -> SoupResult<String> {
        self.soup_table_name(soup)?
            .ok_or_else(|| SoupError::soup_not_found(soup))
    }

    /// Index specs of a registered soup, with column names
    pub fn index_specs(&self, soup: &str) -> SoupResult<Arc<Vec<IndexSpec>>> {
        if let Some(specs) = self.cache.specs(soup) {
            return Ok(specs);
        }
        self.require_table(soup)?;
        self.db.read_scoped(|conn, in_transaction| {
            // Registered soups always have at least one spec; none means the
            // soup was dropped after the table lookup
            let specs = read_index_map(conn, soup)?;
            if specs.is_empty() {
                return Err(SoupError::soup_not_found(soup));
            }
            let specs = Arc::new(specs);
            if !in_transaction {
                self.cache.specs.insert(soup.to_string(), Arc::clone(&specs));
            }
            Ok(specs)
        })
    }

    /// Resolve a path to its backing column
    ///
    /// `_soupEntryId` and `_soupLastModifiedDate` resolve to the fixed columns
    /// without needing an index spec.
    pub fn column_for_path(&self, soup: &str, path: &str) -> SoupResult<ResolvedColumn> {
        if path == SOUP_ENTRY_ID {
            self.require_table(soup)?;
            return Ok(ResolvedColumn {
                column: ID_COL.to_string(),
                index_type: IndexType::Integer,
            });
        }
        if path == SOUP_LAST_MODIFIED_DATE {
            self.require_table(soup)?;
            return Ok(ResolvedColumn {
                column: LAST_MODIFIED_COL.to_string(),
                index_type: IndexType::Integer,
            });
        }
        self.index_specs(soup)?
            .iter()
            .find(|spec| spec.path == path)
            .map(|spec| ResolvedColumn {
                column: spec_column(spec).to_string(),
                index_type: spec.index_type,
            })
            .ok_or_else(|| SoupError::path_not_indexed(soup, path))
    }

    /// Names of every registered soup, in registration order
    pub fn soup_names(&self) -> SoupResult<Vec<String>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT soupName FROM {} ORDER BY id",
                SOUP_NAMES_TABLE
            ))?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
    }

    // ========================================================================
    // Schema changes
    // ========================================================================

    /// Register a soup; no-op when it already exists
    ///
    /// Table DDL, index creation and index map rows commit together.
    pub fn register_soup(&self, soup: &str, specs: &[IndexSpec]) -> SoupResult<()> {
        validate_declaration(soup, specs)?;
        if self.has_soup(soup)? {
            debug!(soup, "soup already registered");
            return Ok(());
        }

        self.db.transaction(|conn| {
            conn.execute(
                &format!("INSERT INTO {} (soupName) VALUES (?1)", SOUP_NAMES_TABLE),
                params![soup],
            )?;
            let table = schema::table_name(conn.last_insert_rowid());
            let specs = assign_columns(&table, specs);
            create_soup_table(conn, &table, &specs)?;
            insert_index_map(conn, soup, &specs)?;
            info!(soup, table = %table, indexes = specs.len(), "registered soup");
            Ok(())
        })
    }

    /// Replace a soup's index specs, keeping its documents
    ///
    /// The backing table is rebuilt under the same name inside one
    /// transaction. Columns whose path and type survive are copied over.
    /// With `re_index`, every new column is recomputed from the raw document;
    /// otherwise columns for newly declared paths start out NULL.
    pub fn alter_soup(&self, soup: &str, specs: &[IndexSpec], re_index: bool) -> SoupResult<()> {
        validate_declaration(soup, specs)?;
        let table = self.require_table(soup)?;
        let old_specs = self.index_specs(soup)?;
        self.cache.invalidate(soup);

        let result = self.db.transaction(|conn| {
            let new_specs = assign_columns(&table, specs);
            let old_table = format!("{}_old", table);
            let old_seq = sequence_of(conn, &table)?;

            drop_soup_indexes(conn, &table, &old_specs)?;
            conn.execute_batch(&format!("ALTER TABLE {} RENAME TO {}", table, old_table))?;
            create_soup_table(conn, &table, &new_specs)?;

            let mut new_cols = vec![
                ID_COL.to_string(),
                SOUP_COL.to_string(),
                CREATED_COL.to_string(),
                LAST_MODIFIED_COL.to_string(),
            ];
            let mut old_cols = new_cols.clone();
            if !re_index {
                for spec in &new_specs {
                    if let Some(old) = old_specs
                        .iter()
                        .find(|o| o.path == spec.path && o.index_type == spec.index_type)
                    {
                        new_cols.push(spec_column(spec).to_string());
                        old_cols.push(spec_column(old).to_string());
                    }
                }
            }
            let copied = conn.execute(
                &format!(
                    "INSERT INTO {} ({}) SELECT {} FROM {}",
                    table,
                    new_cols.join(", "),
                    old_cols.join(", "),
                    old_table
                ),
                [],
            )?;
            conn.execute_batch(&format!("DROP TABLE {}", old_table))?;
            restore_sequence(conn, &table, old_seq)?;

            if re_index {
                reproject_rows(conn, &table, &new_specs)?;
            }

            conn.execute(
                &format!("DELETE FROM {} WHERE soupName = ?1", SOUP_INDEX_MAP_TABLE),
                params![soup],
            )?;
            insert_index_map(conn, soup, &new_specs)?;
            info!(soup, rows = copied, re_index, "altered soup");
            Ok(())
        });
        self.cache.invalidate(soup);
        result
    }

    /// Recompute the columns for `paths` from every stored document
    pub fn re_index_soup(&self, soup: &str, paths: &[String]) -> SoupResult<()> {
        let table = self.require_table(soup)?;
        let specs = self.index_specs(soup)?;
        let mut selected = Vec::with_capacity(paths.len());
        for path in paths {
            let spec = specs
                .iter()
                .find(|spec| &spec.path == path)
                .ok_or_else(|| SoupError::path_not_indexed(soup, path.as_str()))?;
            selected.push(spec.clone());
        }
        if selected.is_empty() {
            return Ok(());
        }
        self.db.transaction(|conn| {
            let rows = reproject_rows(conn, &table, &selected)?;
            debug!(soup, rows, paths = selected.len(), "re-indexed soup");
            Ok(())
        })
    }

    /// Drop a soup's table and registry rows; no-op when not registered
    pub fn drop_soup(&self, soup: &str) -> SoupResult<()> {
        let Some(table) = self.soup_table_name(soup)? else {
            return Ok(());
        };
        let result = self.db.transaction(|conn| drop_soup_in(conn, soup, &table));
        self.cache.invalidate(soup);
        if result.is_ok() {
            info!(soup, table = %table, "dropped soup");
        }
        result
    }

    /// Drop every registered soup
    pub fn drop_all_soups(&self) -> SoupResult<()> {
        let soups = self.soup_names()?;
        let result = self.db.transaction(|conn| {
            for soup in &soups {
                let soup_id: i64 = conn.query_row(
                    &format!("SELECT id FROM {} WHERE soupName = ?1", SOUP_NAMES_TABLE),
                    params![soup],
                    |row| row.get(0),
                )?;
                drop_soup_in(conn, soup, &schema::table_name(soup_id))?;
            }
            Ok(())
        });
        self.cache.clear();
        if result.is_ok() {
            info!(count = soups.len(), "dropped all soups");
        }
        result
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn validate_declaration(soup: &str, specs: &[IndexSpec]) -> SoupResult<()> {
    if soup.is_empty() {
        return Err(SoupError::InvalidSoupName {
            reason: "soup name cannot be empty".to_string(),
        });
    }
    if specs.is_empty() {
        return Err(SoupError::EmptyIndexSpecs {
            soup: soup.to_string(),
        });
    }
    let mut seen = HashSet::new();
    for spec in specs {
        if spec.path.is_empty() {
            return Err(SoupError::invalid_input("index spec path cannot be empty"));
        }
        if spec.path == SOUP_ENTRY_ID || spec.path == SOUP_LAST_MODIFIED_DATE {
            return Err(SoupError::invalid_input(format!(
                "{} is a reserved path",
                spec.path
            )));
        }
        if !seen.insert(spec.path.as_str()) {
            return Err(SoupError::invalid_input(format!(
                "path {} is declared twice",
                spec.path
            )));
        }
    }
    Ok(())
}

fn drop_soup_in(conn: &Connection, soup: &str, table: &str) -> SoupResult<()> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", table))?;
    conn.execute(
        &format!("DELETE FROM {} WHERE soupName = ?1", SOUP_NAMES_TABLE),
        params![soup],
    )?;
    conn.execute(
        &format!("DELETE FROM {} WHERE soupName = ?1", SOUP_INDEX_MAP_TABLE),
        params![soup],
    )?;
    Ok(())
}

/// AUTOINCREMENT high-water mark of a table
fn sequence_of(conn: &Connection, table: &str) -> SoupResult<i64> {
    Ok(conn
        .query_row(
            "SELECT seq FROM sqlite_sequence WHERE name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0))
}

/// Keep entry ids monotonic across a table rebuild
fn restore_sequence(conn: &Connection, table: &str, seq: i64) -> SoupResult<()> {
    if seq <= sequence_of(conn, table)? {
        return Ok(());
    }
    let updated = conn.execute(
        "UPDATE sqlite_sequence SET seq = ?1 WHERE name = ?2",
        params![seq, table],
    )?;
    if updated == 0 {
        conn.execute(
            "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
            params![table, seq],
        )?;
    }
    Ok(())
}

/// Rewrite the given columns of every row from its raw document
pub(crate) fn reproject_rows(conn: &Connection, table: &str, specs: &[IndexSpec]) -> SoupResult<usize> {
    let rows: Vec<(i64, String)> = {
        let mut stmt = conn.prepare(&format!("SELECT {}, {} FROM {}", ID_COL, SOUP_COL, table))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let assignments: Vec<String> = specs
        .iter()
        .enumerate()
        .map(|(i, spec)| format!("{} = ?{}", spec_column(spec), i + 1))
        .collect();
    let mut stmt = conn.prepare(&format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        table,
        assignments.join(", "),
        ID_COL,
        specs.len() + 1
    ))?;

    for (id, raw) in &rows {
        let doc: serde_json::Value = serde_json::from_str(raw)?;
        let values = project_columns(&doc, specs);
        let mut bound: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
        bound.push(id);
        stmt.execute(params_from_iter(bound))?;
    }
    Ok(rows.len())
}
