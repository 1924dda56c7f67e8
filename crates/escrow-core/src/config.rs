// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Server configuration: built-in defaults, then an optional JSON file named by
// `ESCROW_CONFIG`, then individual `ESCROW_*` environment overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{EscrowError, Result};

/// Names the JSON config file to load before environment overrides.
pub const ENV_CONFIG: &str = "ESCROW_CONFIG";
pub const ENV_DB: &str = "ESCROW_DB";
pub const ENV_ADDR: &str = "ESCROW_ADDR";
pub const ENV_AUTH_USER: &str = "ESCROW_AUTH_USER";
pub const ENV_AUTH_PASS: &str = "ESCROW_AUTH_PASS";
pub const ENV_AUTH_PASS_SHA256: &str = "ESCROW_AUTH_PASS_SHA256";
pub const ENV_BUSY_TIMEOUT_MS: &str = "ESCROW_BUSY_TIMEOUT_MS";
pub const ENV_READ_AUDIT: &str = "ESCROW_READ_AUDIT";

/// How a read and its audit entry are coupled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadAuditPolicy {
    /// Fetch and audit append share one transaction; if the audit entry
    /// cannot be written the secret is not returned.
    #[default]
    Strict,
    /// Fetch, then append the audit entry separately; an audit failure is
    /// logged and the secret is still returned.
    BestEffort,
}

impl std::str::FromStr for ReadAuditPolicy {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "best-effort" | "best_effort" | "besteffort" => Ok(Self::BestEffort),
            other => Err(EscrowError::Config(format!(
                "unknown read audit policy {other:?} (expected strict or best-effort)"
            ))),
        }
    }
}

/// Persistent server settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Listen address; loop-back by default so the API is never exposed by accident.
    pub listen_addr: String,
    /// HTTP Basic auth user. Auth is enabled only with a password as well.
    pub auth_user: Option<String>,
    pub auth_pass: Option<String>,
    /// Hex SHA-256 of the password, used instead of `auth_pass` when set.
    pub auth_pass_sha256: Option<String>,
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    pub read_audit: ReadAuditPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/var/lib/escrow/escrow.db"),
            listen_addr: "127.0.0.1:8080".into(),
            auth_user: None,
            auth_pass: None,
            auth_pass_sha256: None,
            busy_timeout_ms: 10_000,
            read_audit: ReadAuditPolicy::Strict,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("db_path", &self.db_path)
            .field("listen_addr", &self.listen_addr)
            .field("auth_user", &self.auth_user)
            .field("auth_pass", &self.auth_pass.as_ref().map(|_| "<redacted>"))
            .field(
                "auth_pass_sha256",
                &self.auth_pass_sha256.as_ref().map(|_| "<redacted>"),
            )
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .field("read_audit", &self.read_audit)
            .finish()
    }
}

/// Expected Basic auth credentials; the password is held only as a digest.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuthCredentials {
    pub user: String,
    pub pass_sha256: [u8; 32],
}

impl std::fmt::Debug for BasicAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthCredentials")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// SHA-256 of a password, as compared by the Basic auth layer.
pub fn password_digest(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

impl ServerConfig {
    /// Resolve configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::load_from(|name| std::env::var(name).ok())
    }

    /// Resolve configuration using `lookup` in place of the environment.
    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base = match lookup(ENV_CONFIG).filter(|p| !p.is_empty()) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = base.with_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            EscrowError::Config(format!("read {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&data)?)
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(db) = get(ENV_DB) {
            self.db_path = PathBuf::from(db);
        }
        if let Some(addr) = get(ENV_ADDR) {
            self.listen_addr = addr;
        }
        if let Some(user) = get(ENV_AUTH_USER) {
            self.auth_user = Some(user);
        }
        if let Some(pass) = get(ENV_AUTH_PASS) {
            self.auth_pass = Some(pass);
        }
        if let Some(digest) = get(ENV_AUTH_PASS_SHA256) {
            self.auth_pass_sha256 = Some(digest);
        }
        if let Some(ms) = get(ENV_BUSY_TIMEOUT_MS) {
            self.busy_timeout_ms = ms.trim().parse().map_err(|e| {
                EscrowError::Config(format!("{ENV_BUSY_TIMEOUT_MS}={ms:?}: {e}"))
            })?;
        }
        if let Some(policy) = get(ENV_READ_AUDIT) {
            self.read_audit = policy.parse()?;
        }
        Ok(self)
    }

    /// Reject values that would only fail later, at bind or first request.
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        self.basic_auth()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr.parse().map_err(|e| {
            EscrowError::Config(format!("listen address {:?}: {e}", self.listen_addr))
        })
    }

    /// Credentials for Basic auth, or `None` when auth is disabled.
    pub fn basic_auth(&self) -> Result<Option<BasicAuthCredentials>> {
        let Some(user) = self.auth_user.as_ref().filter(|u| !u.is_empty()) else {
            return Ok(None);
        };

        let digest = if let Some(hex_digest) = &self.auth_pass_sha256 {
            let bytes = hex::decode(hex_digest.trim()).map_err(|e| {
                EscrowError::Config(format!("auth password digest is not hex: {e}"))
            })?;
            let digest: [u8; 32] = bytes.try_into().map_err(|_| {
                EscrowError::Config("auth password digest must be 32 bytes".into())
            })?;
            digest
        } else if let Some(pass) = self.auth_pass.as_ref().filter(|p| !p.is_empty()) {
            password_digest(pass)
        } else {
            return Ok(None);
        };

        Ok(Some(BasicAuthCredentials {
            user: user.clone(),
            pass_sha256: digest,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_bind_loopback() {
        let config = ServerConfig::load_from(env(&[])).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.busy_timeout_ms, 10_000);
        assert_eq!(config.read_audit, ReadAuditPolicy::Strict);
        assert!(config.basic_auth().unwrap().is_none());
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = ServerConfig::load_from(env(&[
            (ENV_DB, "/tmp/escrow-test.db"),
            (ENV_ADDR, "0.0.0.0:9090"),
            (ENV_BUSY_TIMEOUT_MS, "250"),
            (ENV_READ_AUDIT, "best-effort"),
        ]))
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/escrow-test.db"));
        assert_eq!(config.socket_addr().unwrap().port(), 9090);
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(config.read_audit, ReadAuditPolicy::BestEffort);
    }

    #[test]
    fn file_is_layered_under_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("escrow.json");
        std::fs::write(
            &path,
            r#"{"db_path": "/srv/escrow.db", "listen_addr": "127.0.0.1:7000"}"#,
        )
        .unwrap();

        let path_str = path.to_string_lossy().into_owned();
        let config = ServerConfig::load_from(env(&[
            (ENV_CONFIG, path_str.as_str()),
            (ENV_ADDR, "127.0.0.1:7001"),
        ]))
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/srv/escrow.db"));
        assert_eq!(config.listen_addr, "127.0.0.1:7001");
        assert_eq!(config.busy_timeout_ms, 10_000);
    }

    #[test]
    fn basic_auth_requires_user_and_password() {
        let only_user = ServerConfig::load_from(env(&[(ENV_AUTH_USER, "admin")])).unwrap();
        assert!(only_user.basic_auth().unwrap().is_none());

        let both = ServerConfig::load_from(env(&[
            (ENV_AUTH_USER, "admin"),
            (ENV_AUTH_PASS, "hunter2"),
        ]))
        .unwrap();
        let creds = both.basic_auth().unwrap().unwrap();
        assert_eq!(creds.user, "admin");
        assert_eq!(creds.pass_sha256, password_digest("hunter2"));
    }

    #[test]
    fn digest_matches_plaintext_password() {
        let hex_digest = hex::encode(password_digest("hunter2"));
        let config = ServerConfig::load_from(env(&[
            (ENV_AUTH_USER, "admin"),
            (ENV_AUTH_PASS_SHA256, hex_digest.as_str()),
        ]))
        .unwrap();
        let creds = config.basic_auth().unwrap().unwrap();
        assert_eq!(creds.pass_sha256, password_digest("hunter2"));
    }

    #[test]
    fn invalid_values_fail_startup() {
        assert!(ServerConfig::load_from(env(&[(ENV_ADDR, "not-an-address")])).is_err());
        assert!(ServerConfig::load_from(env(&[(ENV_READ_AUDIT, "sometimes")])).is_err());
        assert!(ServerConfig::load_from(env(&[(ENV_BUSY_TIMEOUT_MS, "-1")])).is_err());
        assert!(
            ServerConfig::load_from(env(&[
                (ENV_AUTH_USER, "admin"),
                (ENV_AUTH_PASS_SHA256, "abcd"),
            ]))
            .is_err()
        );
    }

    #[test]
    fn debug_output_redacts_password() {
        let config = ServerConfig {
            auth_pass: Some("hunter2".into()),
            ..ServerConfig::default()
        };
        let printed = format!("{config:?}");
        assert!(!printed.contains("hunter2"));
    }
}
