//! Cache policies and two-tier record cache for soupstore
//!
//! - `policy`: the seven cache policies and the reload decision
//! - `manager`: in-process map in front of per-cache-type soups

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod policy;

pub use manager::{CacheManager, CachedRecords};
pub use policy::{need_to_reload_cache, need_to_reload_cache_at, CachePolicy};
