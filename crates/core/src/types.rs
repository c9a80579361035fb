//! Soup and index declarations
//!
//! A soup is declared by an ordered list of [`IndexSpec`]s. Each spec names a
//! dot-delimited JSON path and the SQL affinity its projected value is stored
//! with. The registry fills in `column_name` once the backing column exists.

use crate::error::{SoupError, SoupResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Soup entry id, assigned once at creation
pub type SoupEntryId = i64;

/// Reserved document field holding the entry id
pub const SOUP_ENTRY_ID: &str = "_soupEntryId";

/// Reserved document field holding the last-modified epoch millis
pub const SOUP_LAST_MODIFIED_DATE: &str = "_soupLastModifiedDate";

/// Smart-SQL pseudo path selecting the raw document column
pub const SOUP_RAW_PATH: &str = "_soup";

// =============================================================================
// IndexType
// =============================================================================

/// Storage type of a projected index column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// TEXT column holding the stringified scalar
    String,
    /// INTEGER column
    Integer,
    /// REAL column
    Floating,
}

impl IndexType {
    /// SQL column type used in the backing table DDL
    pub fn column_type(&self) -> &'static str {
        match self {
            IndexType::String => "TEXT",
            IndexType::Integer => "INTEGER",
            IndexType::Floating => "REAL",
        }
    }

    /// Name stored in the index map
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::String => "string",
            IndexType::Integer => "integer",
            IndexType::Floating => "floating",
        }
    }

    /// Parse the index map name back into a type
    pub fn parse(s: &str) -> SoupResult<Self> {
        match s {
            "string" => Ok(IndexType::String),
            "integer" => Ok(IndexType::Integer),
            "floating" => Ok(IndexType::Floating),
            other => Err(SoupError::invalid_input(format!(
                "unknown index type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// IndexSpec
// =============================================================================

/// Declaration that a JSON path is projected into a typed backing column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Dot-delimited JSON path
    pub path: String,
    /// Column type
    #[serde(rename = "type")]
    pub index_type: IndexType,
    /// Backing column, set by the registry
    #[serde(
        rename = "columnName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub column_name: Option<String>,
}

impl IndexSpec {
    /// Declare an index on `path`
    pub fn new(path: impl Into<String>, index_type: IndexType) -> Self {
        IndexSpec {
            path: path.into(),
            index_type,
            column_name: None,
        }
    }

    /// String-typed index on `path`
    pub fn string(path: impl Into<String>) -> Self {
        Self::new(path, IndexType::String)
    }

    /// Integer-typed index on `path`
    pub fn integer(path: impl Into<String>) -> Self {
        Self::new(path, IndexType::Integer)
    }

    /// Floating-typed index on `path`
    pub fn floating(path: impl Into<String>) -> Self {
        Self::new(path, IndexType::Floating)
    }

    /// Same spec bound to a generated backing column
    pub fn with_column(mut self, column_name: impl Into<String>) -> Self {
        self.column_name = Some(column_name.into());
        self
    }

    /// Parse a registration descriptor: `[{"path": "...", "type": "string"}, ...]`
    ///
    /// Malformed JSON is rejected here, before anything reaches the engine.
    pub fn list_from_json(json: &str) -> SoupResult<Vec<IndexSpec>> {
        let specs: Vec<IndexSpec> =
            serde_json::from_str(json).map_err(|e| SoupError::malformed_json(e.to_string()))?;
        for spec in &specs {
            if spec.path.is_empty() {
                return Err(SoupError::invalid_input("index spec path cannot be empty"));
            }
        }
        Ok(specs)
    }
}

// =============================================================================
// EntryTimestamps
// =============================================================================

/// Row timestamps kept outside the raw document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryTimestamps {
    /// Set once at creation (epoch millis)
    pub created: i64,
    /// Advanced on every mutation (epoch millis)
    pub last_modified: i64,
}
