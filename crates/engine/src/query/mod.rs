//! Query compilation and paged execution
//!
//! A [`QuerySpec`] is compiled into a [`CompiledQuery`]: the SQL selecting
//! every match in order, the SQL counting the matches, and the bound keys.
//! Pages are read by appending `LIMIT offset, page_size`, so fetching page
//! `k` returns the `k`th slice of the full ordered result.
//!
//! Soup-scoped queries select the raw document column and order by the
//! indexed column with the entry id as tie-breaker. Smart queries return one
//! JSON array per row, with any column named `soup` parsed back into a
//! document.

pub(crate) mod smart_sql;

use crate::soup::schema::{ID_COL, SOUP_COL};
use crate::soup::SoupRegistry;
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, Row};
use serde_json::Value;
use soupstore_core::{IndexType, IndexValue, QueryKind, QuerySpec, SoupError, SoupResult};
use tracing::debug;

// =============================================================================
// CompiledQuery
// =============================================================================

/// SQL ready to run against the backing store
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    select_sql: String,
    count_sql: String,
    id_sql: Option<String>,
    args: Vec<IndexValue>,
    smart: bool,
}

impl CompiledQuery {
    /// Full ordered SELECT, without paging
    pub fn select_sql(&self) -> &str {
        &self.select_sql
    }

    /// `SELECT count(*)` over the same predicate
    pub fn count_sql(&self) -> &str {
        &self.count_sql
    }

    /// Bound key values, in placeholder order
    pub fn args(&self) -> &[IndexValue] {
        &self.args
    }

    /// Check if rows come back as arrays rather than documents
    pub fn is_smart(&self) -> bool {
        self.smart
    }

    /// SELECT for one page
    ///
    /// Offsets and sizes past `i64::MAX` are clamped to it, the largest
    /// literal SQLite accepts in `LIMIT`; such pages are simply empty.
    pub fn page_sql(&self, page_index: usize, page_size: usize) -> String {
        let offset = clamp_to_sql(page_index.saturating_mul(page_size));
        let page_size = clamp_to_sql(page_size);
        if self.smart {
            format!(
                "SELECT * FROM ({}) LIMIT {}, {}",
                self.select_sql, offset, page_size
            )
        } else {
            format!("{} LIMIT {}, {}", self.select_sql, offset, page_size)
        }
    }
}

fn clamp_to_sql(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

// =============================================================================
// Compilation
// =============================================================================

/// Compile a soup-scoped (exact, range or like) query
pub(crate) fn compile(registry: &SoupRegistry, soup: &str, spec: &QuerySpec) -> SoupResult<CompiledQuery> {
    let table = registry.require_table(soup)?;
    let path = spec.path().ok_or_else(smart_in_soup_scope)?;
    let resolved = registry.column_for_path(soup, path)?;
    let column = resolved.column.as_str();

    let (predicate, args) = match &spec.kind {
        QueryKind::Exact { match_key, .. } => exact_predicate(column, match_key, resolved.index_type),
        QueryKind::Range {
            begin_key, end_key, ..
        } => range_predicate(
            column,
            begin_key.as_ref(),
            end_key.as_ref(),
            resolved.index_type,
        ),
        QueryKind::Like { like_key, .. } => (
            Some(format!("{} LIKE ?", column)),
            vec![IndexValue::Text(like_key.clone())],
        ),
        QueryKind::Smart { .. } => return Err(smart_in_soup_scope()),
    };
    let where_clause = predicate
        .map(|p| format!(" WHERE {}", p))
        .unwrap_or_default();
    let direction = spec.order.sql();

    Ok(CompiledQuery {
        select_sql: format!(
            "SELECT {soup_col} FROM {table}{where_clause} ORDER BY {col} {dir}, {id} {dir}",
            soup_col = SOUP_COL,
            col = resolved.column,
            dir = direction,
            id = ID_COL,
        ),
        count_sql: format!("SELECT count(*) FROM {}{}", table, where_clause),
        id_sql: Some(format!("SELECT {} FROM {}{}", ID_COL, table, where_clause)),
        args,
        smart: false,
    })
}

/// Compile a smart query
pub(crate) fn compile_smart(registry: &SoupRegistry, spec: &QuerySpec) -> SoupResult<CompiledQuery> {
    let QueryKind::Smart { sql } = &spec.kind else {
        return Err(SoupError::invalid_query(
            "only smart query specs can run as smart queries",
        ));
    };
    let converted = smart_sql::convert(registry, sql.trim().trim_end_matches(';'))?;
    Ok(CompiledQuery {
        count_sql: format!("SELECT count(*) FROM ({})", converted),
        select_sql: converted,
        id_sql: None,
        args: Vec::new(),
        smart: true,
    })
}

fn smart_in_soup_scope() -> SoupError {
    SoupError::invalid_query("smart queries are not scoped to a soup; use smart_query")
}

fn exact_predicate(
    column: &str,
    key: &Value,
    index_type: IndexType,
) -> (Option<String>, Vec<IndexValue>) {
    match IndexValue::for_query_key(key, index_type) {
        IndexValue::Null => (Some(format!("{} IS NULL", column)), Vec::new()),
        value => (Some(format!("{} = ?", column)), vec![value]),
    }
}

/// Range predicate; `None` bounds and JSON null bounds leave that end open
///
/// On a numeric column a bound that is not a number makes the predicate
/// false. SQLite sorts every number below every string, so comparing against
/// the raw text would match all or none of the rows depending on the side.
fn range_predicate(
    column: &str,
    begin: Option<&Value>,
    end: Option<&Value>,
    index_type: IndexType,
) -> (Option<String>, Vec<IndexValue>) {
    let mut clauses = Vec::new();
    let mut args = Vec::new();
    for (bound, op) in [(begin, ">="), (end, "<=")] {
        let Some(bound) = bound.filter(|v| !v.is_null()) else {
            continue;
        };
        let key = IndexValue::for_query_key(bound, index_type);
        if index_type != IndexType::String && matches!(key, IndexValue::Text(_)) {
            debug!(column, bound = %bound, "non-numeric range bound on numeric column");
            return (Some("0".to_string()), Vec::new());
        }
        clauses.push(format!("{} {} ?", column, op));
        args.push(key);
    }
    if clauses.is_empty() {
        (None, args)
    } else {
        (Some(clauses.join(" AND ")), args)
    }
}

// =============================================================================
// Execution
// =============================================================================

/// Number of rows the query matches
pub(crate) fn count(conn: &Connection, query: &CompiledQuery) -> SoupResult<usize> {
    let n: i64 = conn.query_row(query.count_sql(), params_from_iter(query.args()), |row| {
        row.get(0)
    })?;
    Ok(usize::try_from(n).unwrap_or_default())
}

/// Rows of one page, in query order
pub(crate) fn fetch_page(
    conn: &Connection,
    query: &CompiledQuery,
    page_index: usize,
    page_size: usize,
) -> SoupResult<Vec<Value>> {
    let mut stmt = conn.prepare(&query.page_sql(page_index, page_size))?;
    let names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut rows = stmt.query(params_from_iter(query.args()))?;
    let mut out = Vec::new();
    if query.is_smart() {
        while let Some(row) = rows.next()? {
            out.push(smart_row(row, &names)?);
        }
    } else {
        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            out.push(serde_json::from_str(&raw)?);
        }
    }
    Ok(out)
}

/// Entry ids the query matches, for delete-by-query
pub(crate) fn id_select_sql(query: &CompiledQuery) -> SoupResult<&str> {
    query
        .id_sql
        .as_deref()
        .ok_or_else(|| SoupError::invalid_query("smart queries cannot select entries to delete"))
}

fn smart_row(row: &Row<'_>, names: &[String]) -> SoupResult<Value> {
    let mut cells = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let cell = match row.get_ref(i)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(n) => Value::from(n),
            ValueRef::Real(f) => Value::from(f),
            ValueRef::Text(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                // Only a stored document is parsed back; an aliased scalar
                // named `soup` stays a string
                match serde_json::from_str::<Value>(&text) {
                    Ok(doc @ Value::Object(_)) if name == SOUP_COL => doc,
                    _ => Value::String(text.into_owned()),
                }
            }
            ValueRef::Blob(bytes) => Value::from(bytes.to_vec()),
        };
        cells.push(cell);
    }
    Ok(Value::Array(cells))
}

/// Page count for `total` entries at `page_size` per page
pub fn total_pages(total: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    (total + page_size - 1) / page_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use serde_json::json;
    use soupstore_core::{IndexSpec, Order};
    use std::sync::Arc;

    fn registry() -> SoupRegistry {
        let reg = SoupRegistry::new(Arc::new(Database::ephemeral().unwrap())).unwrap();
        reg.register_soup("people", &[IndexSpec::string("lastName"), IndexSpec::integer("age")])
            .unwrap();
        reg
    }

    #[test]
    fn test_compile_exact() {
        let reg = registry();
        let spec = QuerySpec::exact("lastName", "Doe", 10).unwrap();
        let q = compile(&reg, "people", &spec).unwrap();
        assert_eq!(
            q.select_sql(),
            "SELECT soup FROM TABLE_1 WHERE TABLE_1_0 = ? ORDER BY TABLE_1_0 ASC, id ASC"
        );
        assert_eq!(q.count_sql(), "SELECT count(*) FROM TABLE_1 WHERE TABLE_1_0 = ?");
        assert_eq!(q.args(), &[IndexValue::Text("Doe".into())]);
    }

    #[test]
    fn test_compile_exact_null_key() {
        let reg = registry();
        let spec = QuerySpec::exact("age", Value::Null, 10).unwrap();
        let q = compile(&reg, "people", &spec).unwrap();
        assert!(q.select_sql().contains("TABLE_1_1 IS NULL"));
        assert!(q.args().is_empty());
    }

    #[test]
    fn test_compile_range_bounds() {
        let reg = registry();
        let open = QuerySpec::all("age", Order::Descending, 5).unwrap();
        let q = compile(&reg, "people", &open).unwrap();
        assert_eq!(
            q.select_sql(),
            "SELECT soup FROM TABLE_1 ORDER BY TABLE_1_1 DESC, id DESC"
        );

        let bounded =
            QuerySpec::range("age", Some(json!(30)), Some(json!("40")), Order::Ascending, 5).unwrap();
        let q = compile(&reg, "people", &bounded).unwrap();
        assert!(q.select_sql().contains("TABLE_1_1 >= ? AND TABLE_1_1 <= ?"));
        assert_eq!(q.args(), &[IndexValue::Integer(30), IndexValue::Integer(40)]);
    }

    #[test]
    fn test_compile_like() {
        let reg = registry();
        let spec = QuerySpec::like("lastName", "Do%", Order::Ascending, 5).unwrap();
        let q = compile(&reg, "people", &spec).unwrap();
        assert!(q.select_sql().contains("TABLE_1_0 LIKE ?"));
    }

    #[test]
    fn test_compile_rejects_unknowns() {
        let reg = registry();
        let spec = QuerySpec::exact("title", "x", 5).unwrap();
        assert!(matches!(
            compile(&reg, "people", &spec),
            Err(SoupError::PathNotIndexed { .. })
        ));
        assert!(matches!(
            compile(&reg, "ghost", &spec),
            Err(SoupError::SoupNotFound { .. })
        ));
        let smart = QuerySpec::smart("select 1", 5).unwrap();
        assert!(matches!(
            compile(&reg, "people", &smart),
            Err(SoupError::InvalidQuery { .. })
        ));
    }

    #[test]
    fn test_compile_smart_wraps_for_paging() {
        let reg = registry();
        let spec = QuerySpec::smart("select {people:age} from {people};", 5).unwrap();
        let q = compile_smart(&reg, &spec).unwrap();
        assert_eq!(q.select_sql(), "select TABLE_1_1 from TABLE_1");
        assert_eq!(q.count_sql(), "SELECT count(*) FROM (select TABLE_1_1 from TABLE_1)");
        assert_eq!(
            q.page_sql(2, 5),
            "SELECT * FROM (select TABLE_1_1 from TABLE_1) LIMIT 10, 5"
        );
        assert!(id_select_sql(&q).is_err());
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(7, 1), 7);
    }

    #[test]
    fn test_non_numeric_range_bound_on_numeric_column() {
        for index_type in [IndexType::Integer, IndexType::Floating] {
            assert_eq!(
                range_predicate("c", None, Some(&json!("abc")), index_type),
                (Some("0".to_string()), Vec::new())
            );
            assert_eq!(
                range_predicate("c", Some(&json!(1)), Some(&json!("abc")), index_type),
                (Some("0".to_string()), Vec::new())
            );
        }
        let (predicate, args) = range_predicate("c", Some(&json!("a")), None, IndexType::String);
        assert_eq!(predicate.as_deref(), Some("c >= ?"));
        assert_eq!(args, vec![IndexValue::Text("a".into())]);
    }

    #[test]
    fn test_page_sql_clamps_huge_offsets() {
        let reg = registry();
        let spec = QuerySpec::exact("lastName", "Doe", 10).unwrap();
        let q = compile(&reg, "people", &spec).unwrap();
        assert!(q
            .page_sql(usize::MAX, 10)
            .ends_with(&format!("LIMIT {}, 10", i64::MAX)));
    }

    #[test]
    fn test_key_coercion_matches_column_type() {
        assert_eq!(
            exact_predicate("c", &json!("12"), IndexType::Integer).1,
            vec![IndexValue::Integer(12)]
        );
    }
}
