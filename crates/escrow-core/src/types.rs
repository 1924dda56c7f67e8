// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the escrow service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Actor recorded when the caller supplies no identity.
pub const ACTOR_UNKNOWN: &str = "unknown";

/// Maximum hostname length in bytes (RFC 1035 presentation form).
pub const MAX_HOSTNAME_LEN: usize = 253;

/// Stable internal identifier of a machine, assigned once on first reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MachineId(pub i64);

impl std::fmt::Display for MachineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A managed endpoint, identified by hostname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    pub hostname: String,
    pub first_seen: DateTime<Utc>,
}

/// The two categories of escrowed secret.
///
/// Each kind has its own single-current-value ledger per machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    /// Local administrator password.
    Password,
    /// Disk-encryption (BitLocker) recovery key.
    RecoveryKey,
}

impl SecretKind {
    /// Audit action recorded when this kind is read.
    pub fn fetch_action(self) -> AuditAction {
        match self {
            Self::Password => AuditAction::FetchPassword,
            Self::RecoveryKey => AuditAction::FetchBdeKey,
        }
    }

    /// Audit action recorded when this kind is written.
    pub fn write_action(self) -> AuditAction {
        match self {
            Self::Password => AuditAction::RotatePassword,
            Self::RecoveryKey => AuditAction::UpdateKey,
        }
    }
}

impl std::fmt::Display for SecretKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password => f.write_str("password"),
            Self::RecoveryKey => f.write_str("recovery key"),
        }
    }
}

/// Fixed set of actions written to the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    FetchPassword,
    RotatePassword,
    FetchBdeKey,
    UpdateKey,
}

impl AuditAction {
    /// Tag persisted in the `action` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FetchPassword => "fetch_password",
            Self::RotatePassword => "rotate_password",
            Self::FetchBdeKey => "fetch_bde_key",
            Self::UpdateKey => "update_key",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetch_password" => Ok(Self::FetchPassword),
            "rotate_password" => Ok(Self::RotatePassword),
            "fetch_bde_key" => Ok(Self::FetchBdeKey),
            "update_key" => Ok(Self::UpdateKey),
            other => Err(format!("unknown audit action: {other}")),
        }
    }
}

/// The single current value of one secret kind for one machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRecord {
    pub kind: SecretKind,
    pub value: String,
    pub updated_at: DateTime<Utc>,
    pub actor: String,
}

/// Current administrator password and its metadata, as served over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordInfo {
    pub password: String,
    pub rotated_at: DateTime<Utc>,
    pub actor: String,
}

impl From<SecretRecord> for PasswordInfo {
    fn from(record: SecretRecord) -> Self {
        Self {
            password: record.value,
            rotated_at: record.updated_at,
            actor: record.actor,
        }
    }
}

/// Current recovery key and its metadata, as served over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryKeyInfo {
    pub key: String,
    pub updated_at: DateTime<Utc>,
    pub actor: String,
}

impl From<SecretRecord> for RecoveryKeyInfo {
    fn from(record: SecretRecord) -> Self {
        Self {
            key: record.value,
            updated_at: record.updated_at,
            actor: record.actor,
        }
    }
}

/// One immutable row of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    /// Nullable: retained even if identity resolution later changes.
    pub machine_id: Option<MachineId>,
    pub action: AuditAction,
    pub actor: String,
    pub origin: String,
    pub timestamp: DateTime<Utc>,
}

/// Substitute the sentinel actor for an empty identity.
pub fn actor_or_unknown(actor: &str) -> &str {
    if actor.is_empty() { ACTOR_UNKNOWN } else { actor }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_action_tags_parse_back() {
        for action in [
            AuditAction::FetchPassword,
            AuditAction::RotatePassword,
            AuditAction::FetchBdeKey,
            AuditAction::UpdateKey,
        ] {
            assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), action);
        }
        assert!("delete_password".parse::<AuditAction>().is_err());
    }

    #[test]
    fn kinds_map_to_their_actions() {
        assert_eq!(SecretKind::Password.fetch_action(), AuditAction::FetchPassword);
        assert_eq!(SecretKind::Password.write_action(), AuditAction::RotatePassword);
        assert_eq!(SecretKind::RecoveryKey.fetch_action(), AuditAction::FetchBdeKey);
        assert_eq!(SecretKind::RecoveryKey.write_action(), AuditAction::UpdateKey);
    }

    #[test]
    fn empty_actor_becomes_sentinel() {
        assert_eq!(actor_or_unknown(""), ACTOR_UNKNOWN);
        assert_eq!(actor_or_unknown("alice"), "alice");
    }

    #[test]
    fn password_info_serializes_rfc3339() {
        let rotated_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let info = PasswordInfo {
            password: "Passw0rd!".into(),
            rotated_at,
            actor: "alice".into(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["password"], "Passw0rd!");
        assert_eq!(json["rotated_at"], "2023-11-14T22:13:20Z");
        assert_eq!(json["actor"], "alice");
    }
}
