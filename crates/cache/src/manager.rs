//! Two-tier record cache
//!
//! Records are cached per `(cache_type, cache_key)`:
//! - an in-process map, dropped by [`CacheManager::soft_reset`]
//! - one soup per cache type, dropped by [`CacheManager::hard_reset`]
//!
//! Reads try the in-process tier first and repopulate it from the soup on a
//! hit there. Writes go to both tiers.
//!
//! Cache soups are tracked in a private master soup so a hard reset drops
//! exactly the soups this layer created and nothing else in the store. The
//! master soup is re-registered on the next write if something else in the
//! store dropped it; until then it counts as empty.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use soupstore_core::{IndexSpec, Order, QuerySpec, SoupError, SoupResult};
use soupstore_engine::SoupStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Soup listing every cache soup this layer owns
const MASTER_SOUP: &str = "__soupcache_master__";

/// Indexed field of the master soup
const MASTER_SOUP_NAME_PATH: &str = "soupName";

/// Prefix of every cache soup name
const CACHE_SOUP_PREFIX: &str = "__soupcache__";

/// Indexed field of a cache soup
const CACHE_KEY_PATH: &str = "cacheKey";

const RECORDS_FIELD: &str = "records";
const LAST_UPDATE_FIELD: &str = "lastUpdateTime";

/// Records cached under one key, with the time they were written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRecords {
    /// Cached records, in the order they were written
    pub records: Vec<Value>,
    /// Epoch millis of the write
    pub last_update_time: i64,
}

/// Cache layer over a [`SoupStore`]
pub struct CacheManager {
    store: Arc<SoupStore>,
    memory: DashMap<(String, String), CachedRecords>,
}

impl CacheManager {
    /// Create the manager, registering its master soup if needed
    pub fn new(store: Arc<SoupStore>) -> SoupResult<Self> {
        register_master_soup(&store)?;
        Ok(CacheManager {
            store,
            memory: DashMap::new(),
        })
    }

    /// Store the manager writes to
    pub fn store(&self) -> &Arc<SoupStore> {
        &self.store
    }

    /// Soup holding the records of `cache_type`
    pub fn cache_soup_name(cache_type: &str) -> String {
        format!("{}{}", CACHE_SOUP_PREFIX, cache_type)
    }

    /// Replace the records cached under `(cache_type, cache_key)`
    pub fn write_records(
        &self,
        cache_type: &str,
        cache_key: &str,
        records: Vec<Value>,
    ) -> SoupResult<CachedRecords> {
        check_names(cache_type, cache_key)?;
        let soup = Self::cache_soup_name(cache_type);
        let cached = CachedRecords {
            records,
            last_update_time: chrono::Utc::now().timestamp_millis(),
        };

        self.store.run_in_transaction(|store| {
            self.ensure_cache_soup(store, &soup)?;
            store.upsert_with_external_id(
                &soup,
                json!({
                    CACHE_KEY_PATH: cache_key,
                    RECORDS_FIELD: cached.records,
                    LAST_UPDATE_FIELD: cached.last_update_time,
                }),
                CACHE_KEY_PATH,
            )?;
            Ok(())
        })?;

        self.memory.insert(memory_key(cache_type, cache_key), cached.clone());
        debug!(cache_type, cache_key, records = cached.records.len(), "wrote cache records");
        Ok(cached)
    }

    /// Records cached under `(cache_type, cache_key)`, if any
    pub fn read_records(&self, cache_type: &str, cache_key: &str) -> SoupResult<Option<CachedRecords>> {
        check_names(cache_type, cache_key)?;
        let key = memory_key(cache_type, cache_key);
        if let Some(hit) = self.memory.get(&key) {
            return Ok(Some(hit.value().clone()));
        }

        let Some(doc) = self.find_entry(cache_type, cache_key)? else {
            return Ok(None);
        };
        let cached = CachedRecords {
            records: match doc.get(RECORDS_FIELD) {
                Some(Value::Array(records)) => records.clone(),
                _ => Vec::new(),
            },
            last_update_time: doc
                .get(LAST_UPDATE_FIELD)
                .and_then(Value::as_i64)
                .unwrap_or_default(),
        };
        self.memory.insert(key, cached.clone());
        Ok(Some(cached))
    }

    /// Time the records under `(cache_type, cache_key)` were written
    pub fn last_cache_update_time(&self, cache_type: &str, cache_key: &str) -> SoupResult<Option<i64>> {
        Ok(self
            .read_records(cache_type, cache_key)?
            .map(|cached| cached.last_update_time))
    }

    /// Drop the records under `(cache_type, cache_key)` from both tiers
    pub fn remove_cache(&self, cache_type: &str, cache_key: &str) -> SoupResult<()> {
        check_names(cache_type, cache_key)?;
        self.memory.remove(&memory_key(cache_type, cache_key));

        let soup = Self::cache_soup_name(cache_type);
        if self.store.has_soup(&soup)? {
            let spec = QuerySpec::exact(CACHE_KEY_PATH, cache_key, 1)?;
            self.store.delete_by_query(&soup, &spec)?;
        }
        Ok(())
    }

    /// Clear the in-process tier only
    pub fn soft_reset(&self) {
        self.memory.clear();
        info!("cache soft reset");
    }

    /// Drop every cache soup and clear both tiers
    ///
    /// Soups not listed in the master soup are left alone.
    pub fn hard_reset(&self) -> SoupResult<()> {
        let soups = self.owned_soups()?;
        self.store.run_in_transaction(|store| {
            for soup in &soups {
                store.drop_soup(soup)?;
            }
            if store.has_soup(MASTER_SOUP)? {
                store.clear_soup(MASTER_SOUP)?;
            }
            Ok(())
        })?;
        self.memory.clear();
        info!(dropped = soups.len(), "cache hard reset");
        Ok(())
    }

    /// Names of the cache soups this layer owns
    pub fn owned_soups(&self) -> SoupResult<Vec<String>> {
        if !self.store.has_soup(MASTER_SOUP)? {
            return Ok(Vec::new());
        }
        let spec = QuerySpec::all(MASTER_SOUP_NAME_PATH, Order::Ascending, 100)?;
        let total = self.store.count_query(MASTER_SOUP, &spec)?;
        let pages = (total + spec.page_size - 1) / spec.page_size;

        let mut names = Vec::with_capacity(total);
        for page in 0..pages {
            for doc in self.store.query(MASTER_SOUP, &spec, page)? {
                if let Some(name) = doc.get(MASTER_SOUP_NAME_PATH).and_then(Value::as_str) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    fn ensure_cache_soup(&self, store: &SoupStore, soup: &str) -> SoupResult<()> {
        let master_missing = !store.has_soup(MASTER_SOUP)?;
        if master_missing {
            register_master_soup(store)?;
        } else if store.has_soup(soup)? {
            return Ok(());
        }
        store.register_soup(soup, &[IndexSpec::string(CACHE_KEY_PATH)])?;
        store.upsert_with_external_id(
            MASTER_SOUP,
            json!({ MASTER_SOUP_NAME_PATH: soup }),
            MASTER_SOUP_NAME_PATH,
        )?;
        debug!(soup, "registered cache soup");
        Ok(())
    }

    fn find_entry(&self, cache_type: &str, cache_key: &str) -> SoupResult<Option<Value>> {
        let soup = Self::cache_soup_name(cache_type);
        if !self.store.has_soup(&soup)? {
            return Ok(None);
        }
        let spec = QuerySpec::exact(CACHE_KEY_PATH, cache_key, 1)?;
        Ok(self.store.query(&soup, &spec, 0)?.into_iter().next())
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("store", &self.store)
            .field("memory_entries", &self.memory.len())
            .finish()
    }
}

fn register_master_soup(store: &SoupStore) -> SoupResult<()> {
    store.register_soup(MASTER_SOUP, &[IndexSpec::string(MASTER_SOUP_NAME_PATH)])
}

fn memory_key(cache_type: &str, cache_key: &str) -> (String, String) {
    (cache_type.to_string(), cache_key.to_string())
}

fn check_names(cache_type: &str, cache_key: &str) -> SoupResult<()> {
    if cache_type.is_empty() {
        return Err(SoupError::invalid_input("cache type cannot be empty"));
    }
    if cache_key.is_empty() {
        return Err(SoupError::invalid_input("cache key cannot be empty"));
    }
    Ok(())
}
