// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Escrow: Core types, validation, and error definitions shared across all crates.

pub mod config;
pub mod error;
pub mod human_errors;
pub mod types;
pub mod validate;
pub mod wire;

pub use config::{BasicAuthCredentials, ReadAuditPolicy, ServerConfig};
pub use error::EscrowError;
pub use types::*;
