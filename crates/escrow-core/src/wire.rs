// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// JSON bodies exchanged over the HTTP API (`/api/v1/...`).
//
// Successful reads return `PasswordInfo` / `RecoveryKeyInfo` from `types`.

use serde::{Deserialize, Serialize};

/// Actor attributed to API calls that name no one.
pub const DEFAULT_API_ACTOR: &str = "api-user";

/// `POST /api/v1/rotate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotateRequest {
    pub host: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

/// `POST /api/v1/update_key`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateKeyRequest {
    pub host: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

/// Success body of both write endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
    pub status: String,
    pub hostname: String,
    pub actor: String,
}

impl WriteAck {
    pub const ROTATED: &'static str = "rotated";
    pub const KEY_STORED: &'static str = "key stored";
}

/// Body of every non-2xx JSON response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// `GET /version`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub service: String,
    pub status: String,
}
