//! Core types for soupstore
//!
//! This crate defines the foundational types used throughout the system:
//! - SoupError: Error taxonomy (schema, upsert, input, backing store)
//! - IndexSpec / IndexType: Soup index declarations
//! - JsonPath / IndexValue: Index projection and column coercion
//! - QuerySpec / QueryKind: The four query shapes and their wire form

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod json;
pub mod query;
pub mod types;

pub use error::{SoupError, SoupResult};
pub use json::{get_at_path, parse_document, project, IndexValue, JsonPath};
pub use query::{Order, QueryKind, QuerySpec, QuerySpecWire, QueryType, DEFAULT_PAGE_SIZE};
pub use types::{
    EntryTimestamps, IndexSpec, IndexType, SoupEntryId, SOUP_ENTRY_ID, SOUP_LAST_MODIFIED_DATE,
    SOUP_RAW_PATH,
};
