//! Store context: one open store per account/community scope
//!
//! The manager is an ordinary value passed to whoever needs stores; there is
//! no process-wide instance table. Opening the same scope twice returns the
//! same [`SoupStore`], so every caller shares its single connection.
//!
//! On disk each scope lives in `<root>/<account>` or
//! `<root>/<account>/<community>`.

use crate::database::Database;
use crate::store::SoupStore;
use parking_lot::Mutex;
use soupstore_core::{SoupError, SoupResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Account and optional community a store belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreScope {
    /// Account (user) identifier
    pub account: String,
    /// Community within the account, if any
    pub community: Option<String>,
}

impl StoreScope {
    /// Scope for an account without a community
    pub fn account(account: impl Into<String>) -> Self {
        StoreScope {
            account: account.into(),
            community: None,
        }
    }

    /// Scope for a community of an account
    pub fn community(account: impl Into<String>, community: impl Into<String>) -> Self {
        StoreScope {
            account: account.into(),
            community: Some(community.into()),
        }
    }

    fn validate(&self) -> SoupResult<()> {
        check_component("account", &self.account)?;
        if let Some(community) = &self.community {
            check_component("community", community)?;
        }
        Ok(())
    }

    /// Data directory of this scope under `root`
    pub fn data_dir(&self, root: &Path) -> PathBuf {
        let dir = root.join(&self.account);
        match &self.community {
            Some(community) => dir.join(community),
            None => dir,
        }
    }
}

impl std::fmt::Display for StoreScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.community {
            Some(community) => write!(f, "{}/{}", self.account, community),
            None => f.write_str(&self.account),
        }
    }
}

fn check_component(what: &str, value: &str) -> SoupResult<()> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(SoupError::invalid_input(format!(
            "{} '{}' is not a valid directory name",
            what, value
        )));
    }
    Ok(())
}

/// Registry of open stores, keyed by scope
#[derive(Debug)]
pub struct StoreManager {
    /// None keeps every store in memory
    root: Option<PathBuf>,
    stores: Mutex<HashMap<StoreScope, Arc<SoupStore>>>,
}

impl StoreManager {
    /// Manager whose stores live under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StoreManager {
            root: Some(root.into()),
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Manager whose stores are in-memory
    pub fn ephemeral() -> Self {
        StoreManager {
            root: None,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory, `None` for an ephemeral manager
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Return the open store for `scope`, opening it if needed
    pub fn open_store(&self, scope: &StoreScope) -> SoupResult<Arc<SoupStore>> {
        scope.validate()?;
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(scope) {
            return Ok(Arc::clone(store));
        }

        let db = match &self.root {
            Some(root) => Database::open(scope.data_dir(root))?,
            None => Database::ephemeral()?,
        };
        let store = Arc::new(SoupStore::new(Arc::new(db))?);
        stores.insert(scope.clone(), Arc::clone(&store));
        info!(scope = %scope, "opened soup store");
        Ok(store)
    }

    /// The open store for `scope`, if any
    pub fn get_store(&self, scope: &StoreScope) -> Option<Arc<SoupStore>> {
        self.stores.lock().get(scope).cloned()
    }

    /// Close and forget the store for `scope`; returns whether one was open
    ///
    /// Handles still held elsewhere fail with `StoreClosed` afterwards.
    pub fn close_store(&self, scope: &StoreScope) -> bool {
        match self.stores.lock().remove(scope) {
            Some(store) => {
                store.database().close();
                info!(scope = %scope, "closed soup store");
                true
            }
            None => false,
        }
    }

    /// Scopes with an open store, sorted
    pub fn open_scopes(&self) -> Vec<StoreScope> {
        let mut scopes: Vec<StoreScope> = self.stores.lock().keys().cloned().collect();
        scopes.sort();
        scopes
    }

    /// Close every open store
    pub fn close_all(&self) {
        let stores: Vec<(StoreScope, Arc<SoupStore>)> = self.stores.lock().drain().collect();
        for (scope, store) in stores {
            store.database().close();
            info!(scope = %scope, "closed soup store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soupstore_core::IndexSpec;
    use tempfile::TempDir;

    #[test]
    fn test_open_store_is_shared_per_scope() {
        let manager = StoreManager::ephemeral();
        let scope = StoreScope::account("user1");
        let a = manager.open_store(&scope).unwrap();
        let b = manager.open_store(&scope).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = manager
            .open_store(&StoreScope::community("user1", "c1"))
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(manager.open_scopes().len(), 2);
    }

    #[test]
    fn test_scopes_are_isolated() {
        let manager = StoreManager::ephemeral();
        let a = manager.open_store(&StoreScope::account("a")).unwrap();
        let b = manager.open_store(&StoreScope::account("b")).unwrap();
        a.register_soup("s", &[IndexSpec::string("k")]).unwrap();
        assert!(!b.has_soup("s").unwrap());
    }

    #[test]
    fn test_close_store() {
        let manager = StoreManager::ephemeral();
        let scope = StoreScope::account("user1");
        let store = manager.open_store(&scope).unwrap();
        assert!(manager.close_store(&scope));
        assert!(!manager.close_store(&scope));
        assert!(manager.get_store(&scope).is_none());
        assert!(matches!(store.has_soup("x"), Err(SoupError::StoreClosed)));
    }

    #[test]
    fn test_file_backed_scope_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let scope = StoreScope::community("user1", "c1");
        {
            let manager = StoreManager::new(temp_dir.path());
            let store = manager.open_store(&scope).unwrap();
            store.register_soup("s", &[IndexSpec::string("k")]).unwrap();
            manager.close_all();
        }
        assert!(temp_dir.path().join("user1").join("c1").exists());

        let manager = StoreManager::new(temp_dir.path());
        let store = manager.open_store(&scope).unwrap();
        assert!(store.has_soup("s").unwrap());
    }

    #[test]
    fn test_rejects_bad_scope_names() {
        let manager = StoreManager::ephemeral();
        assert!(manager.open_store(&StoreScope::account("")).is_err());
        assert!(manager.open_store(&StoreScope::account("../x")).is_err());
        assert!(manager
            .open_store(&StoreScope::community("a", ".."))
            .is_err());
    }
}
