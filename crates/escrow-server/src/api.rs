// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP routes.
//
//   GET  /healthz                  liveness probe
//   GET  /version                  build and service info
//   GET  /api/v1/password/{host}   current administrator password
//   POST /api/v1/rotate            {host, password, actor?}
//   GET  /api/v1/bde/{host}        current recovery key
//   POST /api/v1/update_key        {host, key, actor?}
//
// Handlers only translate between HTTP and the store: they pick out the actor
// and origin, run the store call on the blocking pool, and map the result.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use escrow_core::config::BasicAuthCredentials;
use escrow_core::error::{EscrowError, Result};
use escrow_core::human_errors::{Disposition, humanize_error};
use escrow_core::wire::{
    DEFAULT_API_ACTOR, ErrorBody, RotateRequest, UpdateKeyRequest, VersionInfo, WriteAck,
};
use escrow_store::Store;
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

use crate::auth::require_basic_auth;

/// Header a caller may set to name the actor on read requests.
pub const ACTOR_HEADER: &str = "x-actor";

pub const SERVICE_NAME: &str = "escrow";

/// Upper bound on handling one request, store call included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    store: Arc<Store>,
}

/// Build the full application router.
///
/// Basic auth, when configured, guards every route including `/healthz`.
pub fn router(store: Arc<Store>, auth: Option<BasicAuthCredentials>) -> Router {
    router_with_timeout(store, auth, REQUEST_TIMEOUT)
}

pub fn router_with_timeout(
    store: Arc<Store>,
    auth: Option<BasicAuthCredentials>,
    request_timeout: Duration,
) -> Router {
    let state = AppState { store };

    let mut app = Router::new()
        .route("/healthz", get(healthz))
        .route("/version", get(version))
        .route("/api/v1/password/{host}", get(get_password))
        .route("/api/v1/rotate", post(rotate))
        .route("/api/v1/bde/{host}", get(get_bde_key))
        .route("/api/v1/update_key", post(update_key))
        .with_state(state)
        .layer(middleware::from_fn_with_state(request_timeout, enforce_timeout));

    if let Some(credentials) = auth {
        app = app.layer(middleware::from_fn_with_state(
            Arc::new(credentials),
            require_basic_auth,
        ));
    }

    app.layer(middleware::from_fn(log_requests))
}

// ---------------------------------------------------------------------------
// Request metadata
// ---------------------------------------------------------------------------

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Address recorded in the audit trail: proxy headers first, then the peer.
pub fn origin(headers: &HeaderMap, peer: SocketAddr) -> String {
    header_str(headers, "x-forwarded-for")
        .or_else(|| header_str(headers, "x-real-ip"))
        .map(str::to_owned)
        .unwrap_or_else(|| peer.to_string())
}

/// Actor for a request: explicit body field, then `X-Actor`, then the API default.
pub fn actor(explicit: Option<&str>, headers: &HeaderMap) -> String {
    explicit
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .or_else(|| header_str(headers, ACTOR_HEADER))
        .unwrap_or(DEFAULT_API_ACTOR)
        .to_owned()
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn error_response(err: &EscrowError) -> Response {
    let human = humanize_error(err);
    let status = match human.disposition {
        Disposition::NotFound => StatusCode::NOT_FOUND,
        Disposition::Rejected => StatusCode::BAD_REQUEST,
        Disposition::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() && !err.is_validation() {
        error!(error = %err, "request failed");
    } else {
        warn!(status = status.as_u16(), error = %err, "request rejected");
    }

    (status, Json(ErrorBody { error: human.message })).into_response()
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    Ok(serde_json::from_slice(body)?)
}

/// Run a store call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EscrowError::Http(format!("store task failed: {e}")))?
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn healthz() -> &'static str {
    "ok"
}

async fn version() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION").into(),
        service: SERVICE_NAME.into(),
        status: "ready".into(),
    })
}

async fn get_password(
    State(state): State<AppState>,
    Path(host): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let actor = actor(None, &headers);
    let origin = origin(&headers, peer);
    let store = Arc::clone(&state.store);

    match blocking(move || store.get_password(&host, &actor, &origin)).await {
        Ok(info) => Json(info).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn get_bde_key(
    State(state): State<AppState>,
    Path(host): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let actor = actor(None, &headers);
    let origin = origin(&headers, peer);
    let store = Arc::clone(&state.store);

    match blocking(move || store.get_bde_key(&host, &actor, &origin)).await {
        Ok(info) => Json(info).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn rotate(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req: RotateRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(e) => return error_response(&e),
    };
    let actor = actor(req.actor.as_deref(), &headers);
    let origin = origin(&headers, peer);
    let store = Arc::clone(&state.store);

    let ack = WriteAck {
        status: WriteAck::ROTATED.into(),
        hostname: req.host.clone(),
        actor: actor.clone(),
    };
    match blocking(move || store.rotate_password(&req.host, &req.password, &actor, &origin)).await {
        Ok(()) => Json(ack).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn update_key(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req: UpdateKeyRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(e) => return error_response(&e),
    };
    let actor = actor(req.actor.as_deref(), &headers);
    let origin = origin(&headers, peer);
    let store = Arc::clone(&state.store);

    let ack = WriteAck {
        status: WriteAck::KEY_STORED.into(),
        hostname: req.host.clone(),
        actor: actor.clone(),
    };
    match blocking(move || store.update_bde_key(&req.host, &req.key, &actor, &origin)).await {
        Ok(()) => Json(ack).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Answer 503 when a request outlives `limit`.
///
/// A store call already running on the blocking pool still completes; only
/// the response is abandoned.
pub async fn enforce_timeout(State(limit): State<Duration>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_owned();
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(%path, limit_ms = limit.as_millis() as u64, "request timed out");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorBody {
                    error: "request timed out".into(),
                }),
            )
                .into_response()
        }
    }
}

/// Log method, path, status, and latency of every request.
async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let started = Instant::now();

    let response = next.run(req).await;

    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request handled"
    );
    response
}
