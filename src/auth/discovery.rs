// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OpenID Connect discovery.
//!
//! Resolves the JWKS endpoint from `{issuer}/.well-known/openid-configuration`
//! when it is not configured explicitly.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

/// Discovery document path, appended to the issuer.
const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// Timeout for the discovery request.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while discovering the provider.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Invalid issuer URL: {0}")]
    InvalidIssuer(String),

    #[error("Discovery request failed: {0}")]
    Http(String),

    #[error("Discovery endpoint returned HTTP {0}")]
    Status(u16),

    #[error("Discovery document issuer {found} does not match configured issuer {expected}")]
    IssuerMismatch { expected: String, found: String },

    #[error("Invalid jwks_uri in discovery document: {0}")]
    InvalidJwksUri(String),
}

/// The parts of the provider metadata we use.
#[derive(Debug, Clone, Deserialize)]
struct ProviderMetadata {
    issuer: String,
    jwks_uri: String,
    #[serde(default)]
    id_token_signing_alg_values_supported: Vec<String>,
}

/// Result of a successful discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredProvider {
    pub issuer: String,
    pub jwks_uri: Url,
    pub signing_algorithms: Vec<String>,
}

/// Build the discovery URL for `issuer`.
pub fn discovery_url(issuer: &str) -> Result<Url, DiscoveryError> {
    let base = issuer.trim_end_matches('/');
    Url::parse(&format!("{base}{WELL_KNOWN_PATH}"))
        .map_err(|e| DiscoveryError::InvalidIssuer(format!("{issuer}: {e}")))
}

/// Fetch provider metadata for `issuer`.
///
/// The document's `issuer` must match the configured one (ignoring a
/// trailing slash) and, unless `allow_http`, its `jwks_uri` must be HTTPS.
pub async fn discover(issuer: &str, allow_http: bool) -> Result<DiscoveredProvider, DiscoveryError> {
    let url = discovery_url(issuer)?;
    let client = reqwest::Client::builder()
        .timeout(DISCOVERY_TIMEOUT)
        .build()
        .map_err(|e| DiscoveryError::Http(e.to_string()))?;

    tracing::info!(url = %url, "Discovering OIDC provider");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| DiscoveryError::Http(e.to_string()))?;

    if !response.status().is_success() {
        return Err(DiscoveryError::Status(response.status().as_u16()));
    }

    let metadata: ProviderMetadata = response
        .json()
        .await
        .map_err(|e| DiscoveryError::Http(e.to_string()))?;

    if metadata.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
        return Err(DiscoveryError::IssuerMismatch {
            expected: issuer.to_string(),
            found: metadata.issuer,
        });
    }

    let jwks_uri = Url::parse(&metadata.jwks_uri)
        .map_err(|e| DiscoveryError::InvalidJwksUri(format!("{}: {e}", metadata.jwks_uri)))?;
    if jwks_uri.scheme() != "https" && !allow_http {
        return Err(DiscoveryError::InvalidJwksUri(format!(
            "{jwks_uri} is not HTTPS"
        )));
    }

    Ok(DiscoveredProvider {
        issuer: metadata.issuer,
        jwks_uri,
        signing_algorithms: metadata.id_token_signing_alg_values_supported,
    })
}
