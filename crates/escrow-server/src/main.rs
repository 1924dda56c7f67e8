// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// escrowd: credential escrow daemon.

use std::process::ExitCode;
use std::sync::Arc;

use escrow_core::config::ServerConfig;
use escrow_core::error::Result;
use escrow_server::EscrowServer;
use escrow_server::server::shutdown_signal;
use escrow_store::Store;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "escrowd failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config = ServerConfig::load()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        db = %config.db_path.display(),
        addr = %config.listen_addr,
        read_audit = ?config.read_audit,
        "starting escrowd"
    );

    let store = Arc::new(Store::open_with_config(&config)?);
    let mut server = EscrowServer::from_config(&config, store)?;
    server.start().await?;

    shutdown_signal().await;
    server.stop().await
}
