// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer token parsing and the Axum extractor for authenticated callers.
//!
//! Use the `Auth` extractor in handlers to require authentication:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(identity): Auth) -> impl IntoResponse {
//!     // identity passed verification and the access policy
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};

use super::{AuthError, Identity};
use crate::state::AppState;

/// Extract the bearer token from the `Authorization` header.
///
/// The scheme is matched case-insensitively (RFC 6750); the token itself
/// must be non-empty.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let auth_header = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    let (scheme, token) = auth_header
        .split_once(' ')
        .ok_or(AuthError::InvalidAuthHeader)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::InvalidAuthHeader);
    }
    Ok(token)
}

/// Verify the request's bearer token and apply the access policy.
pub async fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<Identity, AuthError> {
    let token = bearer_token(headers)?;
    let identity = state.verifier.verify(token).await?;
    state.policy.authorize(&identity)?;
    Ok(identity)
}

/// Extractor for authenticated callers.
///
/// Validates the JWT from the Authorization header, applies the access
/// policy and provides the resulting identity.
pub struct Auth(pub Identity);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // An earlier layer may already have authenticated the request
        if let Some(identity) = parts.extensions.get::<Identity>().cloned() {
            return Ok(Auth(identity));
        }

        let identity = match authenticate(&parts.headers, state).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::debug!(error_code = e.error_code(), "Authentication rejected");
                return Err(e);
            }
        };
        parts.extensions.insert(identity.clone());
        Ok(Auth(identity))
    }
}
