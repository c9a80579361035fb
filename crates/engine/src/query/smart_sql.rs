//! Smart SQL placeholder translation
//!
//! Smart queries are written against soups and paths instead of backing
//! tables and columns:
//!
//! | Placeholder | Becomes |
//! |-------------|---------|
//! | `{soup}` | the soup's table |
//! | `{soup:path}` | the column indexing `path` |
//! | `{soup:_soup}` | `TABLE_n.soup`, the raw document |
//! | `{soup:_soupEntryId}` | `TABLE_n.id` |
//! | `{soup:_soupLastModifiedDate}` | `TABLE_n.lastModified` |
//!
//! Braces inside single-quoted SQL literals are left alone.

use crate::soup::schema::{ID_COL, LAST_MODIFIED_COL, SOUP_COL};
use crate::soup::SoupRegistry;
use soupstore_core::{
    SoupError, SoupResult, SOUP_ENTRY_ID, SOUP_LAST_MODIFIED_DATE, SOUP_RAW_PATH,
};

/// Replace every placeholder in `sql` with its backing table or column
pub(crate) fn convert(registry: &SoupRegistry, sql: &str) -> SoupResult<String> {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars();
    let mut in_literal = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_literal = !in_literal;
                out.push(c);
            }
            '{' if !in_literal => {
                let mut placeholder = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    placeholder.push(inner);
                }
                if !closed {
                    return Err(SoupError::invalid_query(format!(
                        "unterminated placeholder {{{}",
                        placeholder
                    )));
                }
                out.push_str(&resolve(registry, &placeholder)?);
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

fn resolve(registry: &SoupRegistry, placeholder: &str) -> SoupResult<String> {
    let (soup, path) = match placeholder.split_once(':') {
        Some((soup, path)) => (soup.trim(), Some(path.trim())),
        None => (placeholder.trim(), None),
    };
    if soup.is_empty() {
        return Err(SoupError::invalid_query(format!(
            "placeholder {{{}}} names no soup",
            placeholder
        )));
    }
    let table = registry.require_table(soup)?;

    let Some(path) = path else {
        return Ok(table);
    };
    match path {
        SOUP_RAW_PATH => Ok(format!("{}.{}", table, SOUP_COL)),
        SOUP_ENTRY_ID => Ok(format!("{}.{}", table, ID_COL)),
        SOUP_LAST_MODIFIED_DATE => Ok(format!("{}.{}", table, LAST_MODIFIED_COL)),
        "" => Err(SoupError::invalid_query(format!(
            "placeholder {{{}}} names no path",
            placeholder
        ))),
        _ => Ok(registry.column_for_path(soup, path)?.column),
    }
}
