// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{Auth, Identity};

/// Identity of the caller, as derived from their bearer token.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserInfoResponse {
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    pub groups: Vec<String>,
    pub issuer: String,
    /// Token expiry (RFC 3339)
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<Identity> for UserInfoResponse {
    fn from(identity: Identity) -> Self {
        Self {
            expires_at: DateTime::from_timestamp(identity.expires_at, 0),
            user: identity.user,
            email: identity.email,
            preferred_username: identity.preferred_username,
            groups: identity.groups,
            issuer: identity.issuer,
        }
    }
}

/// Return the authenticated caller's identity.
#[utoipa::path(
    get,
    path = "/oauth2/userinfo",
    tag = "Auth",
    responses(
        (status = 200, description = "Caller identity", body = UserInfoResponse),
        (status = 401, description = "Missing, invalid or unauthorized token")
    ),
    security(("bearer_auth" = []))
)]
pub async fn userinfo(Auth(identity): Auth) -> Json<UserInfoResponse> {
    Json(identity.into())
}
