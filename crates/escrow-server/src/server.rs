// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Server lifecycle: bind, serve on a background task, shut down gracefully.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use escrow_core::config::{BasicAuthCredentials, ServerConfig};
use escrow_core::error::{EscrowError, Result};
use escrow_store::Store;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api;

/// How long `stop` waits for in-flight connections before abandoning them.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The escrow HTTP server.
///
/// Created stopped; [`start`](Self::start) binds and begins accepting
/// connections, [`stop`](Self::stop) lets in-flight requests finish and
/// waits for the serving task to exit.
pub struct EscrowServer {
    addr: SocketAddr,
    store: Arc<Store>,
    auth: Option<BasicAuthCredentials>,
    /// Notification handle used to signal a graceful shutdown.
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
    /// Bound address once running (differs from `addr` when port 0 was asked for).
    local_addr: Option<SocketAddr>,
    shutdown_grace: Duration,
}

impl EscrowServer {
    pub fn new(addr: SocketAddr, store: Arc<Store>, auth: Option<BasicAuthCredentials>) -> Self {
        Self {
            addr,
            store,
            auth,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            local_addr: None,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn from_config(config: &ServerConfig, store: Arc<Store>) -> Result<Self> {
        Ok(Self::new(config.socket_addr()?, store, config.basic_auth()?))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Bind the listener and spawn the serving task.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is already in use or cannot be bound.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr.filter(|_| self.is_running()) {
            debug!(%addr, "server already running");
            return Ok(addr);
        }

        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| EscrowError::Http(format!("bind {}: {e}", self.addr)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| EscrowError::Http(format!("local address: {e}")))?;

        let app = api::router(Arc::clone(&self.store), self.auth.clone())
            .into_make_service_with_connect_info::<SocketAddr>();
        let shutdown = Arc::clone(&self.shutdown_signal);

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.notified().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "HTTP server terminated with an error");
            }
        });

        info!(
            addr = %local_addr,
            basic_auth = self.auth.is_some(),
            "escrow server listening"
        );
        self.task_handle = Some(handle);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Gracefully stop the server.
    ///
    /// Connections still open after the shutdown grace period (a client that
    /// never finishes its request, say) are abandoned and the serving task
    /// is aborted, so this always returns within the grace period.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut handle) = self.task_handle.take() else {
            return Ok(());
        };

        info!(grace_ms = self.shutdown_grace.as_millis() as u64, "stopping escrow server");
        self.shutdown_signal.notify_one();

        match tokio::time::timeout(self.shutdown_grace, &mut handle).await {
            Ok(joined) => {
                joined.map_err(|e| EscrowError::Http(format!("server task join: {e}")))?;
                info!("escrow server stopped");
            }
            Err(_) => {
                handle.abort();
                warn!(
                    grace_ms = self.shutdown_grace.as_millis() as u64,
                    "connections still open after shutdown grace period, server aborted"
                );
            }
        }
        Ok(())
    }
}

/// Resolve when the process receives SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
