//! Query spec model
//!
//! A [`QuerySpec`] is one of four fixed query shapes plus ordering and a page
//! size. Each [`QueryKind`] variant carries only the parameters its shape uses:
//!
//! | Kind | Parameters | Predicate |
//! |------|------------|-----------|
//! | `Exact` | path, match key | `col = ?` |
//! | `Range` | path, optional begin/end keys | `col >= ? AND col <= ?` (open when absent) |
//! | `Like` | path, like pattern | `col LIKE ?` |
//! | `Smart` | engine-native SQL | used verbatim after `{soup:path}` substitution |
//!
//! Smart queries are not soup-scoped and must go through the store's smart
//! entry points; the soup-scoped entry points reject them.
//!
//! ## Wire form
//!
//! ```json
//! {"queryType": "range", "indexPath": "lastName", "beginKey": "J",
//!  "endKey": "W", "order": "ascending", "pageSize": 10}
//! ```

use crate::error::{SoupError, SoupResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Page size used when a wire-form spec omits `pageSize`
pub const DEFAULT_PAGE_SIZE: usize = 10;

// =============================================================================
// Order / QueryType
// =============================================================================

/// Result ordering by the indexed column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// Ascending
    #[default]
    Ascending,
    /// Descending
    Descending,
}

impl Order {
    /// SQL keyword
    pub fn sql(&self) -> &'static str {
        match self {
            Order::Ascending => "ASC",
            Order::Descending => "DESC",
        }
    }
}

/// Discriminant of [`QueryKind`], as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Exact match
    Exact,
    /// Range
    Range,
    /// LIKE pattern
    Like,
    /// Engine-native SQL
    Smart,
}

// =============================================================================
// QueryKind / QuerySpec
// =============================================================================

/// Query shape with the parameters it legally uses
#[derive(Debug, Clone, PartialEq)]
pub enum QueryKind {
    /// `path = match_key`
    Exact {
        /// Indexed path
        path: String,
        /// Value to match
        match_key: Value,
    },
    /// `begin_key <= path <= end_key`, either bound optional
    Range {
        /// Indexed path
        path: String,
        /// Inclusive lower bound
        begin_key: Option<Value>,
        /// Inclusive upper bound
        end_key: Option<Value>,
    },
    /// `path LIKE like_key`
    Like {
        /// Indexed path
        path: String,
        /// SQL LIKE pattern
        like_key: String,
    },
    /// Engine-native SQL with `{soup}` / `{soup:path}` placeholders
    Smart {
        /// Query text
        sql: String,
    },
}

/// Complete description of one query
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    /// Query shape
    pub kind: QueryKind,
    /// Ordering by the indexed column (ignored by smart queries)
    pub order: Order,
    /// Entries per page, always at least one
    pub page_size: usize,
}

impl QuerySpec {
    fn build(kind: QueryKind, order: Order, page_size: usize) -> SoupResult<Self> {
        if page_size == 0 {
            return Err(SoupError::invalid_query("page size must be at least 1"));
        }
        if i64::try_from(page_size).is_err() {
            return Err(SoupError::invalid_query(format!(
                "page size {} exceeds the largest supported limit",
                page_size
            )));
        }
        match &kind {
            QueryKind::Exact { path, .. }
            | QueryKind::Range { path, .. }
            | QueryKind::Like { path, .. } => {
                if path.is_empty() {
                    return Err(SoupError::invalid_query("index path cannot be empty"));
                }
            }
            QueryKind::Smart { sql } => {
                if sql.trim().is_empty() {
                    return Err(SoupError::invalid_query("smart query sql cannot be empty"));
                }
            }
        }
        Ok(QuerySpec {
            kind,
            order,
            page_size,
        })
    }

    /// Exact-match query
    pub fn exact(path: impl Into<String>, match_key: impl Into<Value>, page_size: usize) -> SoupResult<Self> {
        Self::build(
            QueryKind::Exact {
                path: path.into(),
                match_key: match_key.into(),
            },
            Order::Ascending,
            page_size,
        )
    }

    /// Range query; `None` leaves that end open
    pub fn range(
        path: impl Into<String>,
        begin_key: Option<Value>,
        end_key: Option<Value>,
        order: Order,
        page_size: usize,
    ) -> SoupResult<Self> {
        Self::build(
            QueryKind::Range {
                path: path.into(),
                begin_key,
                end_key,
            },
            order,
            page_size,
        )
    }

    /// Every entry ordered by `path`
    pub fn all(path: impl Into<String>, order: Order, page_size: usize) -> SoupResult<Self> {
        Self::range(path, None, None, order, page_size)
    }

    /// LIKE query
    pub fn like(
        path: impl Into<String>,
        like_key: impl Into<String>,
        order: Order,
        page_size: usize,
    ) -> SoupResult<Self> {
        Self::build(
            QueryKind::Like {
                path: path.into(),
                like_key: like_key.into(),
            },
            order,
            page_size,
        )
    }

    /// Smart (engine-native) query
    pub fn smart(sql: impl Into<String>, page_size: usize) -> SoupResult<Self> {
        Self::build(QueryKind::Smart { sql: sql.into() }, Order::Ascending, page_size)
    }

    /// Wire discriminant
    pub fn query_type(&self) -> QueryType {
        match self.kind {
            QueryKind::Exact { .. } => QueryType::Exact,
            QueryKind::Range { .. } => QueryType::Range,
            QueryKind::Like { .. } => QueryType::Like,
            QueryKind::Smart { .. } => QueryType::Smart,
        }
    }

    /// Indexed path, `None` for smart queries
    pub fn path(&self) -> Option<&str> {
        match &self.kind {
            QueryKind::Exact { path, .. }
            | QueryKind::Range { path, .. }
            | QueryKind::Like { path, .. } => Some(path),
            QueryKind::Smart { .. } => None,
        }
    }

    /// Check if this is a smart query
    pub fn is_smart(&self) -> bool {
        matches!(self.kind, QueryKind::Smart { .. })
    }

    /// Parse the wire form, rejecting malformed JSON and illegal combinations
    pub fn from_json(json: &str) -> SoupResult<Self> {
        Self::from_json_with_default_page_size(json, DEFAULT_PAGE_SIZE)
    }

    /// Parse the wire form, using `default_page_size` when `pageSize` is absent
    pub fn from_json_with_default_page_size(json: &str, default_page_size: usize) -> SoupResult<Self> {
        let wire: QuerySpecWire =
            serde_json::from_str(json).map_err(|e| SoupError::malformed_json(e.to_string()))?;
        wire.into_spec(default_page_size)
    }

    /// Wire form
    pub fn to_wire(&self) -> QuerySpecWire {
        let mut wire = QuerySpecWire {
            query_type: self.query_type(),
            index_path: None,
            match_key: None,
            begin_key: None,
            end_key: None,
            like_key: None,
            smart_sql: None,
            order: Some(self.order),
            page_size: Some(self.page_size),
        };
        match &self.kind {
            QueryKind::Exact { path, match_key } => {
                wire.index_path = Some(path.clone());
                wire.match_key = Some(match_key.clone());
            }
            QueryKind::Range {
                path,
                begin_key,
                end_key,
            } => {
                wire.index_path = Some(path.clone());
                wire.begin_key = begin_key.clone();
                wire.end_key = end_key.clone();
            }
            QueryKind::Like { path, like_key } => {
                wire.index_path = Some(path.clone());
                wire.like_key = Some(like_key.clone());
            }
            QueryKind::Smart { sql } => {
                wire.smart_sql = Some(sql.clone());
            }
        }
        wire
    }

    /// Wire form as a JSON string
    pub fn to_json(&self) -> SoupResult<String> {
        Ok(serde_json::to_string(&self.to_wire())?)
    }
}

// =============================================================================
// Wire form
// =============================================================================

/// Flat JSON representation of a [`QuerySpec`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpecWire {
    /// Query shape
    pub query_type: QueryType,
    /// Indexed path (exact/range/like)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_path: Option<String>,
    /// Exact match key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_key: Option<Value>,
    /// Range lower bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin_key: Option<Value>,
    /// Range upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_key: Option<Value>,
    /// LIKE pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_key: Option<String>,
    /// Smart query text
    #[serde(default, alias = "smartQueryString", skip_serializing_if = "Option::is_none")]
    pub smart_sql: Option<String>,
    /// Ordering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    /// Page size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
}

impl QuerySpecWire {
    /// Validate and convert into a [`QuerySpec`]
    pub fn into_spec(self, default_page_size: usize) -> SoupResult<QuerySpec> {
        let order = self.order.unwrap_or_default();
        let page_size = self.page_size.unwrap_or(default_page_size);
        let path = || {
            self.index_path
                .clone()
                .ok_or_else(|| SoupError::invalid_query("indexPath is required"))
        };
        match self.query_type {
            QueryType::Exact => {
                let match_key = self
                    .match_key
                    .clone()
                    .ok_or_else(|| SoupError::invalid_query("matchKey is required for exact queries"))?;
                let mut spec = QuerySpec::exact(path()?, match_key, page_size)?;
                spec.order = order;
                Ok(spec)
            }
            QueryType::Range => QuerySpec::range(
                path()?,
                self.begin_key.clone().filter(|v| !v.is_null()),
                self.end_key.clone().filter(|v| !v.is_null()),
                order,
                page_size,
            ),
            QueryType::Like => {
                let like_key = self
                    .like_key
                    .clone()
                    .ok_or_else(|| SoupError::invalid_query("likeKey is required for like queries"))?;
                QuerySpec::like(path()?, like_key, order, page_size)
            }
            QueryType::Smart => {
                let sql = self
                    .smart_sql
                    .clone()
                    .ok_or_else(|| SoupError::invalid_query("smartSql is required for smart queries"))?;
                QuerySpec::smart(sql, page_size)
            }
        }
    }
}
