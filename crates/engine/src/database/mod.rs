//! Backing-store handle and open/close logic
//!
//! This module provides the [`Database`] struct that owns the single SQLite
//! connection for one store scope:
//! - Data directory and `soupstore.toml` initialization
//! - Connection pragmas (journal mode, synchronous, busy timeout)
//! - Transaction API with nesting
//! - Explicit close
//!
//! ## Transaction API
//!
//! `db.transaction(|conn| { ... })` commits when the closure returns `Ok` and
//! rolls back when it returns `Err`. Calls made while a transaction is open
//! on the same handle (for example a store operation invoked inside a batch)
//! run as savepoints within it. If any of them fails, the outermost
//! transaction rolls back even when its closure swallows the error and
//! returns `Ok`; the call then fails with `TransactionAborted`.
//!
//! ## Keys
//!
//! The engine never handles encryption keys. A caller that needs a keyed
//! store opens and keys the connection itself, then hands it over through
//! [`Database::from_connection`].

pub mod config;
mod transactions;

pub use config::{JournalMode, StoreConfig, SyncMode, CONFIG_FILE_NAME, DATABASE_FILE_NAME};

use parking_lot::ReentrantMutex;
use rusqlite::Connection;
use soupstore_core::{SoupError, SoupResult};
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use transactions::TxnScope;

// ============================================================================
// Database Struct
// ============================================================================

/// Connection plus the current transaction depth and failed nested scopes
struct Backing {
    conn: Connection,
    depth: Cell<usize>,
    failed: Cell<usize>,
}

/// Backing-store handle for one store scope
///
/// Holds the only connection to the store file. Access is serialized through
/// a reentrant mutex: the thread running a transaction closure can keep
/// calling into the handle, other threads wait until it finishes.
///
/// # Example
///
/// ```text
/// use soupstore_engine::Database;
///
/// let db = Database::open("/path/to/store")?;
/// db.transaction(|conn| {
///     conn.execute("INSERT INTO ...", [])?;
///     Ok(())
/// })?;
/// ```
pub struct Database {
    /// Data directory path (None for ephemeral or adopted connections)
    data_dir: Option<PathBuf>,

    /// The connection, guarded for reentrant use
    backing: ReentrantMutex<Backing>,

    /// Effective configuration
    config: StoreConfig,

    /// Cleared by `close()`; operations after that fail with `StoreClosed`
    open: AtomicBool,
}

impl Database {
    /// Open a store in `data_dir`, creating the directory if needed
    ///
    /// Reads `soupstore.toml` from the data directory. If no config file
    /// exists, creates one with defaults.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> SoupResult<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;

        let config_path = data_dir.join(CONFIG_FILE_NAME);
        StoreConfig::write_default_if_missing(&config_path)?;
        let config = StoreConfig::from_file(&config_path)?;

        Self::open_dir(data_dir, config)
    }

    /// Open a store in `data_dir` with an explicit config
    ///
    /// The config file in the directory is neither read nor written.
    pub fn open_with_config<P: AsRef<Path>>(data_dir: P, config: StoreConfig) -> SoupResult<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        Self::open_dir(data_dir, config)
    }

    fn open_dir(data_dir: &Path, config: StoreConfig) -> SoupResult<Self> {
        let conn = Connection::open(data_dir.join(DATABASE_FILE_NAME))?;
        let db = Self::from_parts(Some(data_dir.to_path_buf()), conn, config)?;
        info!(path = %data_dir.display(), "opened store");
        Ok(db)
    }

    /// In-memory store, lost on drop
    pub fn ephemeral() -> SoupResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_parts(None, conn, StoreConfig::default())
    }

    /// Adopt an already opened (and, if needed, already keyed) connection
    pub fn from_connection(conn: Connection, config: StoreConfig) -> SoupResult<Self> {
        Self::from_parts(None, conn, config)
    }

    fn from_parts(data_dir: Option<PathBuf>, conn: Connection, config: StoreConfig) -> SoupResult<Self> {
        config.validate()?;
        Self::apply_pragmas(&conn, &config)?;
        Ok(Database {
            data_dir,
            backing: ReentrantMutex::new(Backing {
                conn,
                depth: Cell::new(0),
                failed: Cell::new(0),
            }),
            config,
            open: AtomicBool::new(true),
        })
    }

    fn apply_pragmas(conn: &Connection, config: &StoreConfig) -> SoupResult<()> {
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        let mode: String = conn.pragma_update_and_check(
            None,
            "journal_mode",
            config.journal_mode()?.pragma(),
            |row| row.get(0),
        )?;
        conn.pragma_update(None, "synchronous", config.sync_mode()?.pragma())?;
        debug!(journal_mode = %mode, "applied connection pragmas");
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Data directory, if the store lives on disk under one
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Effective configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Check if the handle still accepts operations
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Check if the calling thread is inside a transaction on this handle
    pub fn in_transaction(&self) -> bool {
        let guard = self.backing.lock();
        guard.depth.get() > 0
    }

    /// Size of the store file in bytes (`page_count * page_size`)
    pub fn database_size(&self) -> SoupResult<i64> {
        self.read(|conn| {
            let page_count: i64 = conn.pragma_query_value(None, "page_count", |r| r.get(0))?;
            let page_size: i64 = conn.pragma_query_value(None, "page_size", |r| r.get(0))?;
            Ok(page_count * page_size)
        })
    }

    // ========================================================================
    // Transaction API
    // ========================================================================

    /// Execute a closure within a transaction
    ///
    /// Commits on `Ok`, rolls back on `Err`. Nested calls become savepoints;
    /// a failed one also rolls back the outermost transaction.
    pub fn transaction<F, T>(&self, f: F) -> SoupResult<T>
    where
        F: FnOnce(&Connection) -> SoupResult<T>,
    {
        self.check_open()?;
        let guard = self.backing.lock();
        let scope = TxnScope::begin(&guard.conn, &guard.depth, &guard.failed)?;
        match f(&guard.conn) {
            Ok(value) => {
                scope.commit()?;
                Ok(value)
            }
            Err(e) => {
                scope.rollback();
                Err(e)
            }
        }
    }

    /// Execute a read-only closure against the connection
    pub fn read<F, T>(&self, f: F) -> SoupResult<T>
    where
        F: FnOnce(&Connection) -> SoupResult<T>,
    {
        self.check_open()?;
        let guard = self.backing.lock();
        f(&guard.conn)
    }

    /// Execute a read-only closure, also passing whether the calling thread
    /// is inside a transaction
    ///
    /// The handle stays locked for the whole closure, so no other thread can
    /// commit between the read and anything the closure does with its result.
    pub fn read_scoped<F, T>(&self, f: F) -> SoupResult<T>
    where
        F: FnOnce(&Connection, bool) -> SoupResult<T>,
    {
        self.check_open()?;
        let guard = self.backing.lock();
        f(&guard.conn, guard.depth.get() > 0)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Stop accepting operations
    ///
    /// The connection itself is released when the last reference drops.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            info!(path = ?self.data_dir, "closed store");
        }
    }

    fn check_open(&self) -> SoupResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(SoupError::StoreClosed)
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("data_dir", &self.data_dir)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn with_table(db: &Database) {
        db.transaction(|conn| {
            conn.execute_batch("CREATE TABLE t (v INTEGER)")?;
            Ok(())
        })
        .unwrap();
    }

    fn count(db: &Database) -> i64 {
        db.read(|conn| Ok(conn.query_row("SELECT count(*) FROM t", [], |r| r.get(0))?))
            .unwrap()
    }

    #[test]
    fn test_open_creates_config_and_file() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("store");
        let db = Database::open(&dir).unwrap();
        assert!(dir.join(CONFIG_FILE_NAME).exists());
        assert!(dir.join(DATABASE_FILE_NAME).exists());
        assert_eq!(db.data_dir(), Some(dir.as_path()));
    }

    #[test]
    fn test_open_rejects_bad_config() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(CONFIG_FILE_NAME),
            "journal_mode = \"bogus\"\n",
        )
        .unwrap();
        let err = Database::open(temp_dir.path()).unwrap_err();
        assert!(matches!(err, SoupError::Config { .. }));
    }

    #[test]
    fn test_transaction_commit_and_rollback() {
        let db = Database::ephemeral().unwrap();
        with_table(&db);

        db.transaction(|conn| {
            conn.execute("INSERT INTO t VALUES (1)", [])?;
            Ok(())
        })
        .unwrap();

        let result: SoupResult<()> = db.transaction(|conn| {
            conn.execute("INSERT INTO t VALUES (2)", [])?;
            Err(SoupError::invalid_input("abort"))
        });
        assert!(result.is_err());
        assert_eq!(count(&db), 1);
        assert!(!db.in_transaction());
    }

    #[test]
    fn test_nested_failure_propagated_rolls_back_everything() {
        let db = Database::ephemeral().unwrap();
        with_table(&db);

        let result: SoupResult<()> = db.transaction(|conn| {
            conn.execute("INSERT INTO t VALUES (1)", [])?;
            db.transaction(|inner| {
                inner.execute("INSERT INTO t VALUES (2)", [])?;
                Err(SoupError::invalid_input("inner failure"))
            })
        });
        assert!(result.is_err());
        assert_eq!(count(&db), 0);
    }

    #[test]
    fn test_nested_failure_swallowed_still_rolls_back() {
        let db = Database::ephemeral().unwrap();
        with_table(&db);

        let result = db.transaction(|conn| {
            conn.execute("INSERT INTO t VALUES (1)", [])?;
            let inner: SoupResult<()> = db.transaction(|inner| {
                inner.execute("INSERT INTO t VALUES (2)", [])?;
                Err(SoupError::invalid_input("inner failure"))
            });
            assert!(inner.is_err());
            Ok(())
        });
        assert!(matches!(result, Err(SoupError::TransactionAborted { failed: 1 })));
        assert_eq!(count(&db), 0);
        assert!(!db.in_transaction());

        // A later transaction is unaffected
        db.transaction(|conn| {
            conn.execute("INSERT INTO t VALUES (3)", [])?;
            Ok(())
        })
        .unwrap();
        assert_eq!(count(&db), 1);
    }

    #[test]
    fn test_closed_handle_rejects_operations() {
        let db = Database::ephemeral().unwrap();
        db.close();
        assert!(!db.is_open());
        assert!(matches!(db.read(|_| Ok(())), Err(SoupError::StoreClosed)));
        assert!(matches!(db.transaction(|_| Ok(())), Err(SoupError::StoreClosed)));
    }

    #[test]
    fn test_database_size_is_positive() {
        let db = Database::ephemeral().unwrap();
        with_table(&db);
        assert!(db.database_size().unwrap() > 0);
    }
}
