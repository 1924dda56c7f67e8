// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// escrow-cli: HTTP client and command-line front end for the escrow service.

pub mod client;
pub mod commands;

pub use client::EscrowClient;
pub use commands::{Cli, Command, execute};
