// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Client-facing error messages.
//
// Every error that crosses the HTTP boundary is reduced to a disposition
// (which drives the status code) and a message that is safe to show a caller.
// Storage faults never carry SQL text or internal ids past this point.

use crate::error::EscrowError;

/// How the boundary should answer a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// No secret has been escrowed for the host.
    NotFound,
    /// The request itself was malformed (unparseable body, missing fields).
    Rejected,
    /// Validation or storage failure inside the store.
    Internal,
}

/// A disposition plus a human-readable message.
#[derive(Debug, Clone)]
pub struct HumanError {
    pub message: String,
    pub disposition: Disposition,
}

/// Reduce an `EscrowError` to what a caller is allowed to see.
pub fn humanize_error(err: &EscrowError) -> HumanError {
    match err {
        EscrowError::NotFound { .. } => HumanError {
            message: err.to_string(),
            disposition: Disposition::NotFound,
        },

        // Validation text only echoes what the caller sent.
        EscrowError::InvalidHostname(_) | EscrowError::EmptyValue(_) => HumanError {
            message: err.to_string(),
            disposition: Disposition::Internal,
        },

        EscrowError::Serialization(e) => HumanError {
            message: format!("invalid request body: {e}"),
            disposition: Disposition::Rejected,
        },

        EscrowError::StorageFault(_) | EscrowError::ConflictOnCreate(_) | EscrowError::Io(_) => {
            HumanError {
                message: "internal storage error".into(),
                disposition: Disposition::Internal,
            }
        }

        EscrowError::Config(_) | EscrowError::Http(_) => HumanError {
            message: "internal server error".into(),
            disposition: Disposition::Internal,
        },
    }
}
