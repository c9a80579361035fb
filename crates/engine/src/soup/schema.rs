//! Backing table layout
//!
//! Every soup gets one table named `TABLE_<n>` where `n` is the soup's row id
//! in `soup_names`. Its fixed columns are:
//!
//! | Column | Type | Contents |
//! |--------|------|----------|
//! | `id` | INTEGER PRIMARY KEY AUTOINCREMENT | soup entry id |
//! | `soup` | TEXT | raw JSON document including the injected fields |
//! | `created` | INTEGER | creation epoch millis, never changed |
//! | `lastModified` | INTEGER | last mutation epoch millis |
//!
//! followed by one column per index spec, `TABLE_<n>_<i>`, each with its own
//! index `TABLE_<n>_<i>_idx`.

use rusqlite::{params, Connection};
use serde_json::Value;
use soupstore_core::{IndexSpec, IndexType, IndexValue, SoupResult};

/// Soup name → table id registry
pub const SOUP_NAMES_TABLE: &str = "soup_names";

/// Soup name → (path, column, type) rows
pub const SOUP_INDEX_MAP_TABLE: &str = "soup_index_map";

/// Entry id column
pub const ID_COL: &str = "id";

/// Raw document column
pub const SOUP_COL: &str = "soup";

/// Creation timestamp column
pub const CREATED_COL: &str = "created";

/// Last-modified timestamp column
pub const LAST_MODIFIED_COL: &str = "lastModified";

/// Create the registry tables if they are missing
pub(crate) fn create_system_tables(conn: &Connection) -> SoupResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {names} (
            id       INTEGER PRIMARY KEY AUTOINCREMENT,
            soupName TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS {map} (
            soupName   TEXT NOT NULL,
            position   INTEGER NOT NULL,
            path       TEXT NOT NULL,
            columnName TEXT NOT NULL,
            columnType TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS {map}_0 ON {map} (soupName);",
        names = SOUP_NAMES_TABLE,
        map = SOUP_INDEX_MAP_TABLE,
    ))?;
    Ok(())
}

/// Backing table name for a soup row id
pub(crate) fn table_name(soup_id: i64) -> String {
    format!("TABLE_{}", soup_id)
}

/// Index column name for position `i` of `table`
pub(crate) fn column_name(table: &str, i: usize) -> String {
    format!("{}_{}", table, i)
}

/// Assign column names to a declaration list
pub(crate) fn assign_columns(table: &str, specs: &[IndexSpec]) -> Vec<IndexSpec> {
    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            IndexSpec::new(spec.path.clone(), spec.index_type).with_column(column_name(table, i))
        })
        .collect()
}

/// Create the backing table and its indexes
///
/// `specs` must already carry column names.
pub(crate) fn create_soup_table(conn: &Connection, table: &str, specs: &[IndexSpec]) -> SoupResult<()> {
    let mut columns = vec![
        format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", ID_COL),
        format!("{} TEXT", SOUP_COL),
        format!("{} INTEGER", CREATED_COL),
        format!("{} INTEGER", LAST_MODIFIED_COL),
    ];
    for spec in specs {
        columns.push(format!("{} {}", spec_column(spec), spec.index_type.column_type()));
    }
    conn.execute_batch(&format!("CREATE TABLE {} ({})", table, columns.join(", ")))?;
    create_soup_indexes(conn, table, specs)
}

fn create_soup_indexes(conn: &Connection, table: &str, specs: &[IndexSpec]) -> SoupResult<()> {
    let mut ddl = String::new();
    for spec in specs {
        let column = spec_column(spec);
        ddl.push_str(&format!(
            "CREATE INDEX {column}_idx ON {table} ({column});\n"
        ));
    }
    ddl.push_str(&format!(
        "CREATE INDEX {table}_created_idx ON {table} ({CREATED_COL});\n\
         CREATE INDEX {table}_lastModified_idx ON {table} ({LAST_MODIFIED_COL});"
    ));
    conn.execute_batch(&ddl)?;
    Ok(())
}

/// Drop the secondary indexes of a soup table (the table keeps its rows)
pub(crate) fn drop_soup_indexes(conn: &Connection, table: &str, specs: &[IndexSpec]) -> SoupResult<()> {
    let mut ddl = String::new();
    for spec in specs {
        ddl.push_str(&format!("DROP INDEX IF EXISTS {}_idx;\n", spec_column(spec)));
    }
    ddl.push_str(&format!(
        "DROP INDEX IF EXISTS {table}_created_idx;\n\
         DROP INDEX IF EXISTS {table}_lastModified_idx;"
    ));
    conn.execute_batch(&ddl)?;
    Ok(())
}

/// Write the index map rows for a soup
pub(crate) fn insert_index_map(conn: &Connection, soup: &str, specs: &[IndexSpec]) -> SoupResult<()> {
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {} (soupName, position, path, columnName, columnType) VALUES (?1, ?2, ?3, ?4, ?5)",
        SOUP_INDEX_MAP_TABLE
    ))?;
    for (i, spec) in specs.iter().enumerate() {
        stmt.execute(params![
            soup,
            i as i64,
            spec.path,
            spec_column(spec),
            spec.index_type.as_str()
        ])?;
    }
    Ok(())
}

/// Read the index map rows for a soup in declaration order
pub(crate) fn read_index_map(conn: &Connection, soup: &str) -> SoupResult<Vec<IndexSpec>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT path, columnName, columnType FROM {} WHERE soupName = ?1 ORDER BY position",
        SOUP_INDEX_MAP_TABLE
    ))?;
    let rows = stmt.query_map(params![soup], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut specs = Vec::new();
    for row in rows {
        let (path, column, column_type) = row?;
        specs.push(IndexSpec::new(path, IndexType::parse(&column_type)?).with_column(column));
    }
    Ok(specs)
}

/// Column name of a registered spec
pub(crate) fn spec_column(spec: &IndexSpec) -> &str {
    spec.column_name.as_deref().unwrap_or_default()
}

/// Project every index spec of a soup against a document
pub(crate) fn project_columns(doc: &Value, specs: &[IndexSpec]) -> Vec<IndexValue> {
    specs
        .iter()
        .map(|spec| IndexValue::project(doc, &spec.path, spec.index_type))
        .collect()
}
