// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Input validation run before any storage call.

use crate::error::{EscrowError, Result};
use crate::types::{MAX_HOSTNAME_LEN, SecretKind};

/// Check that `hostname` is non-empty, at most 253 bytes, and free of whitespace.
///
/// Hostnames are compared case-sensitively; no normalisation is applied.
pub fn validate_hostname(hostname: &str) -> Result<()> {
    if hostname.is_empty() {
        return Err(EscrowError::InvalidHostname("hostname cannot be empty".into()));
    }
    if hostname.len() > MAX_HOSTNAME_LEN {
        return Err(EscrowError::InvalidHostname(format!(
            "hostname too long: {} bytes (maximum {MAX_HOSTNAME_LEN})",
            hostname.len()
        )));
    }
    if hostname.chars().any(char::is_whitespace) {
        return Err(EscrowError::InvalidHostname(
            "hostname contains whitespace".into(),
        ));
    }
    Ok(())
}

/// Secrets are never stored as empty strings.
pub fn validate_secret(kind: SecretKind, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(EscrowError::EmptyValue(kind));
    }
    Ok(())
}
