// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// escrow-server: HTTP front end over the escrow store.

pub mod api;
pub mod auth;
pub mod server;

pub use api::{router, router_with_timeout};
pub use server::EscrowServer;
