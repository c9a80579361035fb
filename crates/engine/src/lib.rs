//! Document-store engine for soupstore
//!
//! This crate builds the store on top of SQLite:
//! - Database: backing-store handle, configuration, nested transactions
//! - Soup registry: soup tables, index columns and schema evolution
//! - SoupStore: document CRUD, upsert, queries and cursors
//! - StoreManager: one store per account/community scope
//!
//! The engine is the only component that issues SQL.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod cursor;
pub mod database;
pub mod query;
pub mod soup;
pub mod store;

pub use context::{StoreManager, StoreScope};
pub use cursor::{Cursor, CursorId};
pub use database::{Database, JournalMode, StoreConfig, SyncMode};
pub use query::CompiledQuery;
pub use soup::{RegistryCache, ResolvedColumn, SoupRegistry};
pub use store::SoupStore;
