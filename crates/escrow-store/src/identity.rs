// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Identity resolver: hostname -> stable machine id, created on first sight.

use chrono::{DateTime, Utc};
use escrow_core::error::{EscrowError, Result};
use escrow_core::types::{Machine, MachineId};
use escrow_core::validate::validate_hostname;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use tracing::{debug, info};

use crate::db::db_err;

/// Return the id of `hostname`, inserting a new machine row if it has none.
///
/// Two callers resolving the same new hostname may both miss the initial
/// lookup; the one whose insert hits the unique constraint re-reads the row
/// the other created.
pub fn resolve(conn: &Connection, hostname: &str, now: DateTime<Utc>) -> Result<MachineId> {
    validate_hostname(hostname)?;

    if let Some(id) = find_id(conn, hostname)? {
        return Ok(id);
    }
    create(conn, hostname, now)
}

fn create(conn: &Connection, hostname: &str, now: DateTime<Utc>) -> Result<MachineId> {
    match conn.execute(
        "INSERT INTO machines (hostname, first_seen) VALUES (?1, ?2)",
        params![hostname, now.timestamp()],
    ) {
        Ok(_) => {
            let id = MachineId(conn.last_insert_rowid());
            info!(machine_id = %id, hostname, "new machine registered");
            Ok(id)
        }
        Err(e) if is_unique_violation(&e) => {
            debug!(hostname, "machine created concurrently, re-reading");
            find_id(conn, hostname)?
                .ok_or_else(|| EscrowError::ConflictOnCreate(hostname.to_owned()))
        }
        Err(e) => Err(db_err("insert machine")(e)),
    }
}

fn find_id(conn: &Connection, hostname: &str) -> Result<Option<MachineId>> {
    conn.query_row(
        "SELECT id FROM machines WHERE hostname = ?1",
        params![hostname],
        |row| row.get(0).map(MachineId),
    )
    .optional()
    .map_err(db_err("query machine id"))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Look up a machine without creating it.
pub fn lookup(conn: &Connection, hostname: &str) -> Result<Option<Machine>> {
    let row = conn
        .query_row(
            "SELECT id, hostname, first_seen FROM machines WHERE hostname = ?1",
            params![hostname],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?)),
        )
        .optional()
        .map_err(db_err("query machine"))?;

    row.map(|(id, hostname, first_seen)| {
        let first_seen = DateTime::from_timestamp(first_seen, 0).ok_or_else(|| {
            EscrowError::StorageFault(format!("machine {id}: first_seen out of range"))
        })?;
        Ok(Machine {
            id: MachineId(id),
            hostname,
            first_seen,
        })
    })
    .transpose()
}

pub fn count(conn: &Connection) -> Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM machines", [], |row| row.get(0))
        .map_err(db_err("count machines"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::db::Database;

    fn open_temp() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("escrow.db"), Duration::from_secs(1)).unwrap();
        (dir, db)
    }

    #[test]
    fn first_resolution_creates_then_reuses() {
        let (_dir, db) = open_temp();
        let conn = db.connection().unwrap();
        let now = Utc::now();

        let first = resolve(&conn, "WEB01", now).unwrap();
        let second = resolve(&conn, "WEB01", now).unwrap();
        assert_eq!(first, second);
        assert_eq!(count(&conn).unwrap(), 1);
    }

    #[test]
    fn hostnames_are_case_sensitive() {
        let (_dir, db) = open_temp();
        let conn = db.connection().unwrap();
        let now = Utc::now();

        let upper = resolve(&conn, "WEB01", now).unwrap();
        let lower = resolve(&conn, "web01", now).unwrap();
        assert_ne!(upper, lower);
        assert_eq!(count(&conn).unwrap(), 2);
    }

    #[test]
    fn losing_an_insert_race_rereads_the_winner() {
        let (_dir, db) = open_temp();
        let conn = db.connection().unwrap();
        let now = Utc::now();

        let winner = resolve(&conn, "WEB01", now).unwrap();
        // Simulates the second caller: its lookup missed, so it inserts.
        let loser = create(&conn, "WEB01", now).unwrap();
        assert_eq!(winner, loser);
        assert_eq!(count(&conn).unwrap(), 1);
    }

    #[test]
    fn invalid_hostname_touches_nothing() {
        let (_dir, db) = open_temp();
        let conn = db.connection().unwrap();

        let err = resolve(&conn, "bad host", Utc::now()).unwrap_err();
        assert!(matches!(err, EscrowError::InvalidHostname(_)));
        assert_eq!(count(&conn).unwrap(), 0);
    }

    #[test]
    fn lookup_reports_first_seen() {
        let (_dir, db) = open_temp();
        let conn = db.connection().unwrap();
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        assert!(lookup(&conn, "WEB01").unwrap().is_none());
        let id = resolve(&conn, "WEB01", now).unwrap();
        let machine = lookup(&conn, "WEB01").unwrap().unwrap();
        assert_eq!(machine.id, id);
        assert_eq!(machine.hostname, "WEB01");
        assert_eq!(machine.first_seen, now);
    }
}
