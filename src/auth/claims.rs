// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims and the caller identity derived from them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use super::error::AuthError;

/// Payload of a verified token.
///
/// Registered claims (`exp`, `iss`, `aud`, `sub`) are checked by the
/// verifier before this is built; everything else is kept as raw JSON so
/// that claim names stay configurable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct TokenClaims(Map<String, Value>);

impl TokenClaims {
    /// Look up a claim by name. Dots walk into nested objects, so
    /// `realm_access.roles` reads `{"realm_access": {"roles": [...]}}`.
    /// A literal top-level key containing dots wins over the nested path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.0.get(path) {
            return Some(value);
        }
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Claim as a string. Numbers are rendered, other types are ignored.
    pub fn get_string(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Claim as a list of strings: arrays keep their string members, a
    /// single string becomes a one-element list.
    pub fn get_string_list(&self, path: &str) -> Vec<String> {
        match self.get(path) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Boolean claim; some providers send `"true"`/`"false"` strings.
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        match self.get(path)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Expiration timestamp. NumericDate may carry a fraction, which is
    /// truncated to whole seconds.
    pub fn expires_at(&self) -> Option<i64> {
        let exp = self.get("exp")?;
        exp.as_i64()
            .or_else(|| exp.as_f64().map(|secs| secs.floor() as i64))
    }
}

impl From<Value> for TokenClaims {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

/// Which claims carry the identity fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimMapping {
    pub user_claim: String,
    pub email_claim: String,
    pub groups_claim: String,
}

impl Default for ClaimMapping {
    fn default() -> Self {
        Self {
            user_claim: "sub".to_string(),
            email_claim: "email".to_string(),
            groups_claim: "groups".to_string(),
        }
    }
}

impl ClaimMapping {
    /// Project verified claims onto an [`Identity`].
    pub fn identity(&self, claims: &TokenClaims) -> Result<Identity, AuthError> {
        let user = claims
            .get_string(&self.user_claim)
            .ok_or_else(|| AuthError::MissingClaim(self.user_claim.clone()))?;
        let expires_at = claims
            .expires_at()
            .ok_or_else(|| AuthError::MissingClaim("exp".to_string()))?;

        Ok(Identity {
            user,
            email: claims.get_string(&self.email_claim),
            email_verified: claims.get_bool("email_verified"),
            groups: claims.get_string_list(&self.groups_claim),
            preferred_username: claims.get_string("preferred_username"),
            issuer: claims.get_string("iss").unwrap_or_default(),
            expires_at,
        })
    }
}

/// Authenticated caller, derived from one verified token.
///
/// Lives for a single request and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    /// Canonical user identifier (the configured user claim, `sub` by default)
    pub user: String,

    /// Email address, if the token carries one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// `email_verified` claim, if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,

    /// Group memberships
    #[serde(default)]
    pub groups: Vec<String>,

    /// `preferred_username` claim, if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    /// Token issuer
    pub issuer: String,

    /// Token expiration (Unix timestamp)
    pub expires_at: i64,
}

impl Identity {
    /// Check group membership.
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Domain part of the email address, lowercased.
    pub fn email_domain(&self) -> Option<String> {
        let email = self.email.as_deref()?;
        let (_, domain) = email.rsplit_once('@')?;
        (!domain.is_empty()).then(|| domain.to_ascii_lowercase())
    }
}
