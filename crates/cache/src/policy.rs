//! Cache freshness policies
//!
//! | Policy | Reload? | Serve cache? |
//! |--------|---------|--------------|
//! | `ignore_cache_data` | always | no |
//! | `reload_and_return_cache_on_failure` | always | only if the reload fails |
//! | `return_cache_data_dont_reload` | only when no cache exists | yes |
//! | `reload_and_return_cache_data` | always | yes |
//! | `reload_if_expired_and_return_cache_data` | when older than the max age | yes |
//! | `invalidate_cache_dont_reload` | only when no cache exists | no, cache is dropped |
//! | `invalidate_cache_and_reload` | always | no, cache is dropped |

use serde::{Deserialize, Serialize};
use soupstore_core::{SoupError, SoupResult};
use std::fmt;

/// How a cached read decides between stored data and a fresh load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Never read the cache
    IgnoreCacheData,
    /// Reload, falling back to the cache on failure
    ReloadAndReturnCacheOnFailure,
    /// Serve the cache without reloading
    ReturnCacheDataDontReload,
    /// Serve the cache and reload
    ReloadAndReturnCacheData,
    /// Serve the cache, reloading when it has expired
    ReloadIfExpiredAndReturnCacheData,
    /// Drop the cache without reloading
    InvalidateCacheDontReload,
    /// Drop the cache and reload
    InvalidateCacheAndReload,
}

impl CachePolicy {
    /// Every policy, in declaration order
    pub const ALL: [CachePolicy; 7] = [
        CachePolicy::IgnoreCacheData,
        CachePolicy::ReloadAndReturnCacheOnFailure,
        CachePolicy::ReturnCacheDataDontReload,
        CachePolicy::ReloadAndReturnCacheData,
        CachePolicy::ReloadIfExpiredAndReturnCacheData,
        CachePolicy::InvalidateCacheDontReload,
        CachePolicy::InvalidateCacheAndReload,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            CachePolicy::IgnoreCacheData => "ignore_cache_data",
            CachePolicy::ReloadAndReturnCacheOnFailure => "reload_and_return_cache_on_failure",
            CachePolicy::ReturnCacheDataDontReload => "return_cache_data_dont_reload",
            CachePolicy::ReloadAndReturnCacheData => "reload_and_return_cache_data",
            CachePolicy::ReloadIfExpiredAndReturnCacheData => {
                "reload_if_expired_and_return_cache_data"
            }
            CachePolicy::InvalidateCacheDontReload => "invalidate_cache_dont_reload",
            CachePolicy::InvalidateCacheAndReload => "invalidate_cache_and_reload",
        }
    }

    /// Parse a wire name
    pub fn parse(s: &str) -> SoupResult<Self> {
        Self::ALL
            .into_iter()
            .find(|policy| policy.as_str() == s)
            .ok_or_else(|| SoupError::invalid_input(format!("unknown cache policy '{}'", s)))
    }

    /// Check if the cached data must be dropped before use
    pub fn should_invalidate(&self) -> bool {
        matches!(
            self,
            CachePolicy::InvalidateCacheDontReload | CachePolicy::InvalidateCacheAndReload
        )
    }

    /// Check if cached data may be handed to the caller
    pub fn returns_cache_data(&self) -> bool {
        matches!(
            self,
            CachePolicy::ReloadAndReturnCacheOnFailure
                | CachePolicy::ReturnCacheDataDontReload
                | CachePolicy::ReloadAndReturnCacheData
                | CachePolicy::ReloadIfExpiredAndReturnCacheData
        )
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide whether data must be reloaded, using the current time
///
/// `last_cached_time` and `max_age_ms` are epoch millis and milliseconds;
/// either being zero or negative forces a reload under the expiry policy.
pub fn need_to_reload_cache(
    cache_exists: bool,
    policy: CachePolicy,
    last_cached_time: i64,
    max_age_ms: i64,
) -> bool {
    need_to_reload_cache_at(
        cache_exists,
        policy,
        last_cached_time,
        max_age_ms,
        chrono::Utc::now().timestamp_millis(),
    )
}

/// [`need_to_reload_cache`] with an explicit current time
pub fn need_to_reload_cache_at(
    cache_exists: bool,
    policy: CachePolicy,
    last_cached_time: i64,
    max_age_ms: i64,
    now_ms: i64,
) -> bool {
    if !cache_exists {
        return true;
    }
    match policy {
        CachePolicy::IgnoreCacheData
        | CachePolicy::ReloadAndReturnCacheOnFailure
        | CachePolicy::ReloadAndReturnCacheData
        | CachePolicy::InvalidateCacheAndReload => true,
        CachePolicy::ReturnCacheDataDontReload | CachePolicy::InvalidateCacheDontReload => false,
        CachePolicy::ReloadIfExpiredAndReturnCacheData => {
            if last_cached_time <= 0 || max_age_ms <= 0 {
                return true;
            }
            now_ms.saturating_sub(last_cached_time) > max_age_ms
        }
    }
}
