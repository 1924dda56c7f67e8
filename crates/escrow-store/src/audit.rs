// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit trail: append-only log of every read and write of an escrowed secret.
//
// Rows are inserted and never updated or deleted.  `id` is assigned by SQLite
// and increases monotonically, so it doubles as the ordering key.

use chrono::{DateTime, Utc};
use escrow_core::error::Result;
use escrow_core::types::{AuditAction, AuditEntry, MachineId};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use tracing::debug;

use crate::db::db_err;

const SELECT_COLUMNS: &str = "SELECT id, machine_id, action, actor, remote_addr, timestamp FROM audit_logs";

/// Append one audit entry and return its id.
///
/// Any failure is a `StorageFault`; callers on the write path must let it
/// abort the enclosing transaction.
pub fn append(
    conn: &Connection,
    machine_id: Option<MachineId>,
    action: AuditAction,
    actor: &str,
    origin: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO audit_logs (machine_id, action, actor, remote_addr, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            machine_id.map(|id| id.0),
            action.as_str(),
            actor,
            origin,
            now.timestamp()
        ],
    )
    .map_err(db_err("insert audit entry"))?;

    let id = conn.last_insert_rowid();
    debug!(audit_id = id, %action, actor, "audit entry recorded");
    Ok(id)
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    let action: String = row.get(2)?;
    let action = action
        .parse::<AuditAction>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into()))?;
    let timestamp: i64 = row.get(5)?;
    let timestamp = DateTime::from_timestamp(timestamp, 0).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(5, Type::Integer, "timestamp out of range".into())
    })?;

    Ok(AuditEntry {
        id: row.get(0)?,
        machine_id: row.get::<_, Option<i64>>(1)?.map(MachineId),
        action,
        actor: row.get(3)?,
        origin: row.get(4)?,
        timestamp,
    })
}

/// All entries for one machine, oldest first.
pub fn entries_for_machine(conn: &Connection, machine_id: MachineId) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn
        .prepare(&format!("{SELECT_COLUMNS} WHERE machine_id = ?1 ORDER BY id ASC"))
        .map_err(db_err("prepare audit query"))?;

    let rows = stmt
        .query_map(params![machine_id.0], entry_from_row)
        .map_err(db_err("query audit entries"))?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err("read audit entry"))
}

/// The most recent `limit` entries, newest first.
pub fn recent_entries(conn: &Connection, limit: u32) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn
        .prepare(&format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?1"))
        .map_err(db_err("prepare audit query"))?;

    let rows = stmt
        .query_map(params![limit], entry_from_row)
        .map_err(db_err("query audit entries"))?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err("read audit entry"))
}

pub fn count(conn: &Connection) -> Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM audit_logs", [], |row| row.get(0))
        .map_err(db_err("count audit entries"))
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
    fn append_and_count() {
        let (_dir, db) = open_temp();
        let conn = db.connection().unwrap();
        assert_eq!(count(&conn).unwrap(), 0);

        let now = Utc::now();
        append(&conn, Some(MachineId(1)), AuditAction::RotatePassword, "alice", "10.0.0.1", now).unwrap();
        append(&conn, None, AuditAction::FetchPassword, "bob", "10.0.0.2", now).unwrap();

        assert_eq!(count(&conn).unwrap(), 2);
    }

    #[test]
    fn ids_increase_and_filter_by_machine() {
        let (_dir, db) = open_temp();
        let conn = db.connection().unwrap();
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let a = append(&conn, Some(MachineId(1)), AuditAction::UpdateKey, "carol", "::1", now).unwrap();
        let b = append(&conn, Some(MachineId(2)), AuditAction::UpdateKey, "carol", "::1", now).unwrap();
        let c = append(&conn, Some(MachineId(1)), AuditAction::FetchBdeKey, "dave", "::1", now).unwrap();
        assert!(a < b && b < c);

        let entries = entries_for_machine(&conn, MachineId(1)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::UpdateKey);
        assert_eq!(entries[1].action, AuditAction::FetchBdeKey);
        assert_eq!(entries[1].actor, "dave");
        assert_eq!(entries[1].origin, "::1");
        assert_eq!(entries[1].timestamp, now);
    }

    #[test]
    fn recent_entries_newest_first() {
        let (_dir, db) = open_temp();
        let conn = db.connection().unwrap();
        for i in 0..5 {
            append(&conn, Some(MachineId(i)), AuditAction::FetchPassword, "op", "origin", Utc::now())
                .unwrap();
        }

        let recent = recent_entries(&conn, 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].id > recent[1].id);
        assert!(recent[1].id > recent[2].id);
        assert_eq!(recent[0].machine_id, Some(MachineId(4)));
    }

    #[test]
    fn unknown_action_tag_is_a_storage_fault() {
        let (_dir, db) = open_temp();
        let conn = db.connection().unwrap();
        conn.execute(
            "INSERT INTO audit_logs (machine_id, action, actor, remote_addr, timestamp)
             VALUES (1, 'purge', 'mallory', 'x', 0)",
            [],
        )
        .unwrap();

        assert!(entries_for_machine(&conn, MachineId(1)).is_err());
    }
}
