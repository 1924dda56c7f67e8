// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Store facade: the four escrow operations, each coupled to an audit entry.
//
// Write path (rotate password, update key): identity resolution, ledger upsert
// and audit append run in one IMMEDIATE transaction.  Either all three land or
// none does: no mutation without audit, no audit of a mutation that did not
// happen.  Concurrent writers serialise on the SQLite write lock; the last
// commit wins and every attempt leaves its own audit entry.
//
// Read path (get password, get key): governed by `ReadAuditPolicy`.  Under
// `Strict` the fetch and its audit entry share a transaction and an audit
// failure fails the read.  Under `BestEffort` they are separate steps and an
// audit failure after a successful fetch is logged, not returned.
//
// A read that finds no secret still leaves the machine row it resolved.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use escrow_core::config::{ReadAuditPolicy, ServerConfig};
use escrow_core::error::{EscrowError, Result};
use escrow_core::types::{
    AuditEntry, Machine, PasswordInfo, RecoveryKeyInfo, SecretKind, SecretRecord,
    actor_or_unknown,
};
use escrow_core::validate::{validate_hostname, validate_secret};
use rusqlite::TransactionBehavior;
use tracing::{info, instrument, warn};

use crate::audit;
use crate::db::{Database, db_err};
use crate::identity;
use crate::ledger;

/// Options fixed when the store is opened.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub busy_timeout: Duration,
    pub read_audit: ReadAuditPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(10),
            read_audit: ReadAuditPolicy::Strict,
        }
    }
}

impl From<&ServerConfig> for StoreOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            read_audit: config.read_audit,
        }
    }
}

/// Escrow store for administrator passwords and recovery keys.
///
/// Holds no per-request state; safe to share behind an `Arc` across threads.
pub struct Store {
    db: Database,
    read_audit: ReadAuditPolicy,
}

impl Store {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let db = Database::open(path, options.busy_timeout)?;
        Ok(Self {
            db,
            read_audit: options.read_audit,
        })
    }

    pub fn open_with_config(config: &ServerConfig) -> Result<Self> {
        Self::open(&config.db_path, StoreOptions::from(config))
    }

    pub fn read_audit_policy(&self) -> ReadAuditPolicy {
        self.read_audit
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // -- Escrow operations ---------------------------------------------------

    /// Save a new administrator password for `host` and audit the rotation.
    #[instrument(skip(self, password))]
    pub fn rotate_password(&self, host: &str, password: &str, actor: &str, origin: &str) -> Result<()> {
        self.write_and_audit(SecretKind::Password, host, password, actor, origin)
    }

    /// Return the current administrator password for `host` and audit the access.
    #[instrument(skip(self))]
    pub fn get_password(&self, host: &str, actor: &str, origin: &str) -> Result<PasswordInfo> {
        self.read_and_audit(SecretKind::Password, host, actor, origin)
            .map(PasswordInfo::from)
    }

    /// Store or replace the recovery key for `host` and audit the update.
    #[instrument(skip(self, key))]
    pub fn update_bde_key(&self, host: &str, key: &str, actor: &str, origin: &str) -> Result<()> {
        self.write_and_audit(SecretKind::RecoveryKey, host, key, actor, origin)
    }

    /// Return the current recovery key for `host` and audit the access.
    #[instrument(skip(self))]
    pub fn get_bde_key(&self, host: &str, actor: &str, origin: &str) -> Result<RecoveryKeyInfo> {
        self.read_and_audit(SecretKind::RecoveryKey, host, actor, origin)
            .map(RecoveryKeyInfo::from)
    }

    fn write_and_audit(
        &self,
        kind: SecretKind,
        host: &str,
        value: &str,
        actor: &str,
        origin: &str,
    ) -> Result<()> {
        validate_hostname(host)?;
        validate_secret(kind, value)?;
        let actor = actor_or_unknown(actor);

        let mut conn = self.db.connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err("begin transaction"))?;

        let now = Utc::now();
        let machine_id = identity::resolve(&tx, host, now)?;
        ledger::put(&tx, machine_id, kind, value, actor, now)?;
        audit::append(&tx, Some(machine_id), kind.write_action(), actor, origin, now)?;
        tx.commit().map_err(db_err("commit transaction"))?;

        info!(machine_id = %machine_id, %kind, actor, "secret updated");
        Ok(())
    }

    fn read_and_audit(
        &self,
        kind: SecretKind,
        host: &str,
        actor: &str,
        origin: &str,
    ) -> Result<SecretRecord> {
        validate_hostname(host)?;
        let actor = actor_or_unknown(actor);

        match self.read_audit {
            ReadAuditPolicy::Strict => self.read_strict(kind, host, actor, origin),
            ReadAuditPolicy::BestEffort => self.read_best_effort(kind, host, actor, origin),
        }
    }

    fn read_strict(
        &self,
        kind: SecretKind,
        host: &str,
        actor: &str,
        origin: &str,
    ) -> Result<SecretRecord> {
        let mut conn = self.db.connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err("begin transaction"))?;

        let now = Utc::now();
        let machine_id = identity::resolve(&tx, host, now)?;
        let record = match ledger::get(&tx, host, kind) {
            Ok(record) => record,
            Err(not_found @ EscrowError::NotFound { .. }) => {
                // Keep the machine row: identity resolution is observable
                // even when there is nothing to return.
                tx.commit().map_err(db_err("commit transaction"))?;
                return Err(not_found);
            }
            Err(e) => return Err(e),
        };
        audit::append(&tx, Some(machine_id), kind.fetch_action(), actor, origin, now)?;
        tx.commit().map_err(db_err("commit transaction"))?;

        info!(machine_id = %machine_id, %kind, actor, "secret read");
        Ok(record)
    }

    fn read_best_effort(
        &self,
        kind: SecretKind,
        host: &str,
        actor: &str,
        origin: &str,
    ) -> Result<SecretRecord> {
        let conn = self.db.connection()?;

        let machine_id = identity::resolve(&conn, host, Utc::now())?;
        let record = ledger::get(&conn, host, kind)?;

        if let Err(e) = audit::append(&conn, Some(machine_id), kind.fetch_action(), actor, origin, Utc::now()) {
            warn!(
                machine_id = %machine_id,
                %kind,
                actor,
                error = %e,
                "secret returned but its audit entry could not be written"
            );
        } else {
            info!(machine_id = %machine_id, %kind, actor, "secret read");
        }
        Ok(record)
    }

    // -- Accountability queries (not themselves audited) -------------------

    /// Look up a machine without creating it.
    pub fn machine(&self, host: &str) -> Result<Option<Machine>> {
        let conn = self.db.connection()?;
        identity::lookup(&conn, host)
    }

    /// Audit history of `host`, oldest first. Unknown hosts have none.
    pub fn audit_entries_for_host(&self, host: &str) -> Result<Vec<AuditEntry>> {
        let conn = self.db.connection()?;
        match identity::lookup(&conn, host)? {
            Some(machine) => audit::entries_for_machine(&conn, machine.id),
            None => Ok(Vec::new()),
        }
    }

    /// The most recent `limit` audit entries, newest first.
    pub fn recent_audit_entries(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        let conn = self.db.connection()?;
        audit::recent_entries(&conn, limit)
    }

    pub fn audit_count(&self) -> Result<u64> {
        let conn = self.db.connection()?;
        audit::count(&conn)
    }

    pub fn machine_count(&self) -> Result<u64> {
        let conn = self.db.connection()?;
        identity::count(&conn)
    }

    /// Number of machines holding a `kind` secret.
    pub fn secret_count(&self, kind: SecretKind) -> Result<u64> {
        let conn = self.db.connection()?;
        ledger::count(&conn, kind)
    }
}

#[cfg(test)]
mod tests {
    use escrow_core::types::{ACTOR_UNKNOWN, AuditAction};

    use super::*;

    fn open_temp(read_audit: ReadAuditPolicy) -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions {
            busy_timeout: Duration::from_secs(5),
            read_audit,
        };
        let store = Store::open(dir.path().join("escrow.db"), options).unwrap();
        (dir, store)
    }

    #[test]
    fn empty_actor_is_recorded_as_unknown() {
        let (_dir, store) = open_temp(ReadAuditPolicy::Strict);
        store.rotate_password("WEB01", "pw", "", "10.0.0.1").unwrap();

        let info = store.get_password("WEB01", "", "10.0.0.1").unwrap();
        assert_eq!(info.actor, ACTOR_UNKNOWN);

        let entries = store.audit_entries_for_host("WEB01").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.actor == ACTOR_UNKNOWN));
    }

    #[test]
    fn not_found_read_writes_no_audit_entry() {
        for policy in [ReadAuditPolicy::Strict, ReadAuditPolicy::BestEffort] {
            let (_dir, store) = open_temp(policy);
            let err = store.get_bde_key("GHOST01", "alice", "::1").unwrap_err();
            assert!(matches!(err, EscrowError::NotFound { .. }));
            assert_eq!(store.audit_count().unwrap(), 0);
            assert!(store.machine("GHOST01").unwrap().is_some());
        }
    }

    #[test]
    fn rotation_audit_carries_origin() {
        let (_dir, store) = open_temp(ReadAuditPolicy::Strict);
        store.update_bde_key("WEB01", "123456-654321", "carol", "192.0.2.7").unwrap();

        let recent = store.recent_audit_entries(1).unwrap();
        assert_eq!(recent[0].action, AuditAction::UpdateKey);
        assert_eq!(recent[0].origin, "192.0.2.7");
        assert_eq!(recent[0].actor, "carol");
    }

    #[test]
    fn policy_comes_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            db_path: dir.path().join("escrow.db"),
            read_audit: ReadAuditPolicy::BestEffort,
            ..ServerConfig::default()
        };
        let store = Store::open_with_config(&config).unwrap();
        assert_eq!(store.read_audit_policy(), ReadAuditPolicy::BestEffort);
    }
}
