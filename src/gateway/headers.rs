// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity headers handed to the backend through the gateway.

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::auth::Identity;

pub const X_AUTH_REQUEST_USER: HeaderName = HeaderName::from_static("x-auth-request-user");
pub const X_AUTH_REQUEST_EMAIL: HeaderName = HeaderName::from_static("x-auth-request-email");
pub const X_AUTH_REQUEST_GROUPS: HeaderName = HeaderName::from_static("x-auth-request-groups");
pub const X_AUTH_REQUEST_PREFERRED_USERNAME: HeaderName =
    HeaderName::from_static("x-auth-request-preferred-username");
pub const X_AUTH_REQUEST_ACCESS_TOKEN: HeaderName =
    HeaderName::from_static("x-auth-request-access-token");

/// Build the `X-Auth-Request-*` headers for `identity`.
///
/// Absent fields produce no header. Values that cannot be carried in a
/// header (control characters, non-ASCII) are dropped with a warning.
pub fn identity_headers(identity: &Identity, access_token: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    insert(&mut headers, X_AUTH_REQUEST_USER, &identity.user);
    if let Some(email) = &identity.email {
        insert(&mut headers, X_AUTH_REQUEST_EMAIL, email);
    }
    if !identity.groups.is_empty() {
        insert(&mut headers, X_AUTH_REQUEST_GROUPS, &identity.groups.join(","));
    }
    if let Some(username) = &identity.preferred_username {
        insert(&mut headers, X_AUTH_REQUEST_PREFERRED_USERNAME, username);
    }
    if let Some(token) = access_token {
        insert(&mut headers, X_AUTH_REQUEST_ACCESS_TOKEN, token);
    }

    headers
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::warn!(header = %name, "Dropping identity header with invalid value"),
    }
}
