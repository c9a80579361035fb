//! Transaction scopes over the single backing connection
//!
//! The outermost scope runs `BEGIN IMMEDIATE` / `COMMIT`. Scopes opened while
//! another is active become savepoints: a nested failure rolls back its own
//! work and hands the error to the enclosing closure.
//!
//! Every nested rollback is counted. The outermost scope refuses to commit
//! when the count is non-zero, so a failure swallowed by an enclosing closure
//! still rolls back the whole transaction.

use rusqlite::Connection;
use soupstore_core::{SoupError, SoupResult};
use std::cell::Cell;
use tracing::warn;

/// Open transaction level on a connection
///
/// Dropping an unfinished scope (closure panicked) rolls it back.
pub(crate) struct TxnScope<'a> {
    conn: &'a Connection,
    depth: &'a Cell<usize>,
    failed: &'a Cell<usize>,
    level: usize,
    finished: bool,
}

impl<'a> TxnScope<'a> {
    /// Open a new level: transaction at depth 0, savepoint otherwise
    pub(crate) fn begin(
        conn: &'a Connection,
        depth: &'a Cell<usize>,
        failed: &'a Cell<usize>,
    ) -> SoupResult<Self> {
        let level = depth.get();
        if level == 0 {
            conn.execute_batch("BEGIN IMMEDIATE")?;
            failed.set(0);
        } else {
            conn.execute_batch(&format!("SAVEPOINT {}", savepoint_name(level)))?;
        }
        depth.set(level + 1);
        Ok(TxnScope {
            conn,
            depth,
            failed,
            level,
            finished: false,
        })
    }

    /// Commit this level
    ///
    /// The outermost level rolls back instead, with `TransactionAborted`, when
    /// any nested level inside it rolled back.
    pub(crate) fn commit(mut self) -> SoupResult<()> {
        self.finished = true;
        self.depth.set(self.level);
        if self.level == 0 && self.failed.get() > 0 {
            let failed = self.failed.replace(0);
            rollback_level(self.conn, 0);
            warn!(failed, "nested scope failed, rolled back transaction");
            return Err(SoupError::TransactionAborted { failed });
        }
        let sql = if self.level == 0 {
            "COMMIT".to_string()
        } else {
            format!("RELEASE {}", savepoint_name(self.level))
        };
        if let Err(e) = self.conn.execute_batch(&sql) {
            rollback_level(self.conn, self.level);
            return Err(e.into());
        }
        Ok(())
    }

    /// Roll back this level
    pub(crate) fn rollback(mut self) {
        self.finished = true;
        self.abort();
    }

    fn abort(&self) {
        self.depth.set(self.level);
        if self.level > 0 {
            self.failed.set(self.failed.get() + 1);
        }
        rollback_level(self.conn, self.level);
    }
}

impl Drop for TxnScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.abort();
        }
    }
}

fn savepoint_name(level: usize) -> String {
    format!("soupstore_sp_{}", level)
}

fn rollback_level(conn: &Connection, level: usize) {
    // SQLite may already have rolled back on its own (e.g. SQLITE_FULL)
    if level == 0 && conn.is_autocommit() {
        return;
    }
    let sql = if level == 0 {
        "ROLLBACK".to_string()
    } else {
        let name = savepoint_name(level);
        format!("ROLLBACK TO {name}; RELEASE {name}")
    };
    if let Err(e) = conn.execute_batch(&sql) {
        warn!(level, error = %e, "rollback failed");
    }
}
