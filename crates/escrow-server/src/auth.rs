// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Optional HTTP Basic auth.
//
// Both the user name and the password are compared as SHA-256 digests with
// `subtle`, so the comparison time does not depend on where they differ.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use escrow_core::config::{BasicAuthCredentials, password_digest};
use subtle::ConstantTimeEq;
use tracing::warn;

const REALM: &str = "Basic realm=\"escrow\"";

/// Split an `Authorization: Basic ...` header into user and password.
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_owned(), pass.to_owned()))
}

/// Check a presented user/password pair against the configured credentials.
pub fn credentials_match(expected: &BasicAuthCredentials, user: &str, pass: &str) -> bool {
    let user_ok = password_digest(user)[..].ct_eq(&password_digest(&expected.user)[..]);
    let pass_ok = password_digest(pass)[..].ct_eq(&expected.pass_sha256[..]);
    bool::from(user_ok & pass_ok)
}

fn unauthorized() -> Response {
    let mut response = StatusCode::UNAUTHORIZED.into_response();
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static(REALM));
    response
}

/// Middleware rejecting requests without valid Basic credentials.
pub async fn require_basic_auth(
    State(expected): State<Arc<BasicAuthCredentials>>,
    req: Request,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic_auth);

    match presented {
        Some((user, pass)) if credentials_match(&expected, &user, &pass) => next.run(req).await,
        Some((user, _)) => {
            warn!(%user, path = %req.uri().path(), "basic auth rejected");
            unauthorized()
        }
        None => unauthorized(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected() -> BasicAuthCredentials {
        BasicAuthCredentials {
            user: "admin".into(),
            pass_sha256: password_digest("hunter2"),
        }
    }

    #[test]
    fn parses_standard_header() {
        let header = format!("Basic {}", STANDARD.encode("admin:hunter2"));
        assert_eq!(
            parse_basic_auth(&header),
            Some(("admin".into(), "hunter2".into()))
        );
    }

    #[test]
    fn password_may_contain_colons() {
        let header = format!("basic {}", STANDARD.encode("admin:a:b:c"));
        assert_eq!(
            parse_basic_auth(&header),
            Some(("admin".into(), "a:b:c".into()))
        );
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert_eq!(parse_basic_auth("Bearer abc"), None);
        assert_eq!(parse_basic_auth("Basic !!!"), None);
        assert_eq!(parse_basic_auth(&format!("Basic {}", STANDARD.encode("nocolon"))), None);
    }

    #[test]
    fn matches_only_exact_credentials() {
        let creds = expected();
        assert!(credentials_match(&creds, "admin", "hunter2"));
        assert!(!credentials_match(&creds, "admin", "hunter3"));
        assert!(!credentials_match(&creds, "Admin", "hunter2"));
        assert!(!credentials_match(&creds, "", ""));
    }

    #[test]
    fn unauthorized_carries_challenge() {
        let response = unauthorized();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], REALM);
    }
}
