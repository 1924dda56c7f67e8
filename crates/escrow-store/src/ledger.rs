// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Secret ledger: the single current value of each secret kind per machine.
// A write replaces the row wholesale; no value history is kept.

use chrono::{DateTime, Utc};
use escrow_core::error::{EscrowError, Result};
use escrow_core::types::{MachineId, SecretKind, SecretRecord};
use escrow_core::validate::validate_secret;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::db::db_err;

const UPSERT_PASSWORD_SQL: &str = "
    INSERT INTO passwords (machine_id, password, updated_at, actor)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(machine_id) DO UPDATE SET
        password   = excluded.password,
        updated_at = excluded.updated_at,
        actor      = excluded.actor";

const UPSERT_KEY_SQL: &str = "
    INSERT INTO bitlocker_keys (machine_id, key_text, updated_at, actor)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(machine_id) DO UPDATE SET
        key_text   = excluded.key_text,
        updated_at = excluded.updated_at,
        actor      = excluded.actor";

const SELECT_PASSWORD_SQL: &str = "
    SELECT p.password, p.updated_at, p.actor
    FROM passwords p
    JOIN machines m ON p.machine_id = m.id
    WHERE m.hostname = ?1";

const SELECT_KEY_SQL: &str = "
    SELECT k.key_text, k.updated_at, k.actor
    FROM bitlocker_keys k
    JOIN machines m ON k.machine_id = m.id
    WHERE m.hostname = ?1";

/// Store `value` as the current `kind` secret of `machine_id`.
pub fn put(
    conn: &Connection,
    machine_id: MachineId,
    kind: SecretKind,
    value: &str,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    validate_secret(kind, value)?;

    let sql = match kind {
        SecretKind::Password => UPSERT_PASSWORD_SQL,
        SecretKind::RecoveryKey => UPSERT_KEY_SQL,
    };
    conn.execute(sql, params![machine_id.0, value, now.timestamp(), actor])
        .map_err(db_err("upsert secret"))?;

    debug!(machine_id = %machine_id, %kind, "secret stored");
    Ok(())
}

/// Fetch the current `kind` secret of `hostname`.
///
/// Fails with `NotFound` when none has ever been stored.
pub fn get(conn: &Connection, hostname: &str, kind: SecretKind) -> Result<SecretRecord> {
    let sql = match kind {
        SecretKind::Password => SELECT_PASSWORD_SQL,
        SecretKind::RecoveryKey => SELECT_KEY_SQL,
    };

    let row = conn
        .query_row(sql, params![hostname], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .optional()
        .map_err(db_err("query secret"))?;

    let Some((value, updated_at, actor)) = row else {
        return Err(EscrowError::NotFound {
            host: hostname.to_owned(),
            kind,
        });
    };

    let updated_at = DateTime::from_timestamp(updated_at, 0).ok_or_else(|| {
        EscrowError::StorageFault(format!("{kind} for {hostname}: updated_at out of range"))
    })?;

    Ok(SecretRecord {
        kind,
        value,
        updated_at,
        actor,
    })
}

/// Number of machines holding a `kind` secret.
pub fn count(conn: &Connection, kind: SecretKind) -> Result<u64> {
    let sql = match kind {
        SecretKind::Password => "SELECT COUNT(*) FROM passwords",
        SecretKind::RecoveryKey => "SELECT COUNT(*) FROM bitlocker_keys",
    };
    conn.query_row(sql, [], |row| row.get(0))
        .map_err(db_err("count secrets"))
}
