//! soupstore - embedded schema-on-write JSON document store
//!
//! Documents live in named *soups*. Each soup declares the JSON paths it
//! indexes; those paths are projected into typed columns on every write and
//! become queryable by exact match, range, LIKE pattern or raw "smart" SQL.
//!
//! # Quick Start
//!
//! ```ignore
//! use soupstore::{IndexSpec, Order, QuerySpec, SoupStore};
//! use serde_json::json;
//!
//! let store = SoupStore::ephemeral()?;
//! store.register_soup("people", &[IndexSpec::string("lastName")])?;
//! store.create("people", json!({"lastName": "Doe"}))?;
//!
//! let spec = QuerySpec::exact("lastName", "Doe", 10)?;
//! let cursor = store.open_cursor("people", &spec)?;
//! ```
//!
//! # Layout
//!
//! - [`soupstore_core`]: errors, index types, projection, query specs
//! - [`soupstore_engine`]: backing store, registry, document store, cursors
//! - [`soupstore_cache`]: cache policies and the two-tier record cache

pub use soupstore_cache::{
    need_to_reload_cache, need_to_reload_cache_at, CacheManager, CachePolicy, CachedRecords,
};
pub use soupstore_core::{
    get_at_path, parse_document, project, EntryTimestamps, IndexSpec, IndexType, IndexValue,
    JsonPath, Order, QueryKind, QuerySpec, QuerySpecWire, QueryType, SoupEntryId, SoupError,
    SoupResult, DEFAULT_PAGE_SIZE, SOUP_ENTRY_ID, SOUP_LAST_MODIFIED_DATE, SOUP_RAW_PATH,
};
pub use soupstore_engine::{
    Cursor, CursorId, Database, JournalMode, SoupRegistry, SoupStore, StoreConfig, StoreManager,
    StoreScope, SyncMode,
};
