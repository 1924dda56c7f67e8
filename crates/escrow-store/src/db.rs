// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SQLite database handle.
//
// Schema:
//   machines(id PK, hostname UNIQUE, first_seen)           -- identity anchor
//   passwords(machine_id UNIQUE FK, password, updated_at, actor)
//   bitlocker_keys(machine_id UNIQUE FK, key_text, updated_at, actor)
//   audit_logs(id PK, machine_id NULL, action, actor, remote_addr, timestamp)
//
// All timestamps are Unix seconds.  Each secret table holds at most one live
// row per machine; `audit_logs` is append-only.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use escrow_core::error::{EscrowError, Result};
use rusqlite::Connection;
use tracing::{debug, info, instrument};

/// Idle connections kept for reuse; extra connections are closed on return.
const MAX_IDLE_CONNECTIONS: usize = 8;

const SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS machines (
        id          INTEGER PRIMARY KEY,
        hostname    TEXT    UNIQUE NOT NULL,
        first_seen  INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS passwords (
        machine_id  INTEGER NOT NULL UNIQUE,
        password    TEXT    NOT NULL,
        updated_at  INTEGER NOT NULL,
        actor       TEXT    NOT NULL,
        FOREIGN KEY(machine_id) REFERENCES machines(id)
    );

    CREATE TABLE IF NOT EXISTS bitlocker_keys (
        machine_id  INTEGER NOT NULL UNIQUE,
        key_text    TEXT    NOT NULL,
        updated_at  INTEGER NOT NULL,
        actor       TEXT    NOT NULL,
        FOREIGN KEY(machine_id) REFERENCES machines(id)
    );

    CREATE TABLE IF NOT EXISTS audit_logs (
        id          INTEGER PRIMARY KEY,
        machine_id  INTEGER,
        action      TEXT    NOT NULL,
        actor       TEXT    NOT NULL,
        remote_addr TEXT    NOT NULL,
        timestamp   INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_audit_logs_machine
        ON audit_logs(machine_id);
"#;

/// Wrap a `rusqlite::Error` as a `StorageFault` with a short context prefix.
pub(crate) fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> EscrowError {
    move |e| EscrowError::StorageFault(format!("{context}: {e}"))
}

/// Handle to one escrow database file.
///
/// Connections are opened on demand and parked in a small idle list between
/// operations.  `rusqlite::Connection` is `Send` but not `Sync`, so a
/// connection is only ever used by the thread that checked it out.
pub struct Database {
    path: PathBuf,
    busy_timeout: Duration,
    idle: Mutex<Vec<Connection>>,
}

impl Database {
    /// Open (or create) the database at `path` and apply the schema.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let db = Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout,
            idle: Mutex::new(Vec::new()),
        };

        let conn = db.connect()?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(db_err("create schema"))?;
        db.release(conn);

        info!("escrow database opened");
        Ok(db)
    }

    /// Open a fresh, fully configured connection to the database file.
    ///
    /// WAL lets readers proceed while a writer holds the lock; the busy
    /// timeout bounds how long a writer waits for another to commit.
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(db_err("open"))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(db_err("busy timeout"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err("WAL pragma"))?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(db_err("foreign_keys pragma"))?;
        debug!("database connection opened");
        Ok(conn)
    }

    /// Check out a connection, reusing an idle one when available.
    pub fn connection(&self) -> Result<PooledConnection<'_>> {
        let parked = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        let conn = match parked {
            Some(conn) => conn,
            None => self.connect()?,
        };
        Ok(PooledConnection {
            db: self,
            conn: Some(conn),
        })
    }

    fn release(&self, conn: Connection) {
        let mut idle = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }
}

/// A connection borrowed from a `Database`, returned to it on drop.
pub struct PooledConnection<'a> {
    db: &'a Database,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // An open transaction here means the caller panicked mid-operation.
            if conn.is_autocommit() {
                self.db.release(conn);
            }
        }
    }
}
