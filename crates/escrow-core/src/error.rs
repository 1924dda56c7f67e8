// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for the escrow service.

use thiserror::Error;

use crate::types::SecretKind;

/// Top-level error type for all escrow operations.
#[derive(Debug, Error)]
pub enum EscrowError {
    // -- Validation (detected before any storage call) --
    #[error("invalid hostname: {0}")]
    InvalidHostname(String),

    #[error("{0} cannot be empty")]
    EmptyValue(SecretKind),

    // -- Lookup --
    #[error("no {kind} found for host {host}")]
    NotFound { host: String, kind: SecretKind },

    // -- Storage / persistence --
    #[error("storage fault: {0}")]
    StorageFault(String),

    #[error("machine {0} was created concurrently but could not be re-read")]
    ConflictOnCreate(String),

    // -- Process surfaces --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EscrowError {
    /// True for errors raised by input validation rather than by storage.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidHostname(_) | Self::EmptyValue(_))
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, EscrowError>;
