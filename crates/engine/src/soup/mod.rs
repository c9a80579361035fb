//! Soup schema management
//!
//! - `schema`: backing table layout and DDL helpers
//! - `registry`: soup name → table/index spec registry with memo cache

pub mod registry;
pub mod schema;

pub use registry::{RegistryCache, ResolvedColumn, SoupRegistry};
