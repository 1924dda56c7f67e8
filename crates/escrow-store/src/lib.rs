// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Escrow Store: SQLite-backed identity resolver, secret ledger, and audit
// trail, composed by the `Store` facade into the four escrow operations.
//
// All methods are synchronous because `rusqlite` does not support async
// natively.  In an async context, wrap calls in `tokio::task::spawn_blocking`.

pub mod audit;
pub mod db;
pub mod identity;
pub mod ledger;
pub mod store;

pub use db::Database;
pub use store::{Store, StoreOptions};
