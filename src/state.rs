// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::discovery::{self, DiscoveryError};
use crate::auth::{AccessPolicy, AuthError, JwksManager, TokenCache, TokenVerifier};
use crate::config::{Config, KeySourceConfig};
use crate::gateway::GatewaySettings;

#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<TokenVerifier>,
    pub policy: Arc<AccessPolicy>,
    pub gateway: Arc<GatewaySettings>,
}

impl AppState {
    pub fn new(verifier: TokenVerifier, policy: AccessPolicy) -> Self {
        Self {
            verifier: Arc::new(verifier),
            policy: Arc::new(policy),
            gateway: Arc::new(GatewaySettings::default()),
        }
    }

    pub fn with_gateway(mut self, gateway: GatewaySettings) -> Self {
        self.gateway = Arc::new(gateway);
        self
    }

    /// Assemble the state described by `config` around an existing key manager.
    pub fn from_config(config: &Config, keys: JwksManager) -> Self {
        let mut verifier = TokenVerifier::new(keys, config.verifier_settings());
        if let Some(capacity) = config.token_cache_size {
            verifier = verifier.with_token_cache(TokenCache::new(capacity, config.token_cache_ttl));
        }
        Self::new(verifier, config.access_policy()).with_gateway(config.gateway_settings())
    }
}

/// Errors raised while wiring up the key source.
#[derive(Debug, thiserror::Error)]
pub enum KeySetupError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Keys(#[from] AuthError),
}

/// Build the JWKS manager for `config`, running OIDC discovery if needed.
pub async fn key_manager(config: &Config) -> Result<JwksManager, KeySetupError> {
    let manager = match &config.key_source {
        KeySourceConfig::File(path) => {
            tracing::info!(path = %path.display(), "Using static JWKS file");
            return Ok(JwksManager::from_file(path)?);
        }
        KeySourceConfig::Url(url) => JwksManager::remote(url.clone())?,
        KeySourceConfig::Discover => {
            let provider = discovery::discover(&config.issuer, config.insecure_allow_http).await?;
            tracing::info!(
                issuer = %provider.issuer,
                algorithms = ?provider.signing_algorithms,
                "Discovered OIDC provider"
            );
            JwksManager::remote(provider.jwks_uri)?
        }
    };

    if let Some(url) = manager.jwks_url() {
        tracing::info!(jwks_url = %url, "Using remote JWKS");
    }
    Ok(manager
        .with_cache_ttl(config.jwks_cache_ttl)
        .with_min_refresh_interval(config.jwks_min_refresh_interval))
}
