// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer token verification.
//!
//! A token is trusted only when all of the following hold:
//!
//! 1. its `alg` is on the allow-list (asymmetric algorithms only)
//! 2. the signature verifies against a key from the issuer's JWKS
//! 3. `iss` equals the configured issuer
//! 4. `aud` contains the client id (or an extra audience)
//! 5. `exp` is in the future and `nbf`, if present, in the past
//!    (both within the clock skew leeway)

use jsonwebtoken::{decode, decode_header, Algorithm, Validation};

use super::claims::{ClaimMapping, Identity, TokenClaims};
use super::error::AuthError;
use super::jwks::JwksManager;
use super::token_cache::TokenCache;

/// Clock skew tolerance (60 seconds).
pub const DEFAULT_CLOCK_SKEW_LEEWAY: u64 = 60;

/// Algorithms accepted unless configured otherwise.
pub const DEFAULT_ALGORITHMS: [Algorithm; 8] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

/// Claims every accepted token must carry.
const REQUIRED_CLAIMS: [&str; 4] = ["exp", "iss", "aud", "sub"];

/// What a token has to satisfy.
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    /// Expected `iss`, compared verbatim
    pub issuer: String,
    /// Accepted `aud` values (client id first)
    pub audiences: Vec<String>,
    /// Accepted signing algorithms
    pub algorithms: Vec<Algorithm>,
    /// Leeway for `exp` / `nbf`, in seconds
    pub leeway: u64,
    /// Where identity fields live in the payload
    pub claims: ClaimMapping,
}

impl VerifierSettings {
    pub fn new(issuer: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audiences: vec![client_id.into()],
            algorithms: DEFAULT_ALGORITHMS.to_vec(),
            leeway: DEFAULT_CLOCK_SKEW_LEEWAY,
            claims: ClaimMapping::default(),
        }
    }
}

/// Verifies bearer tokens and turns them into identities.
pub struct TokenVerifier {
    keys: JwksManager,
    settings: VerifierSettings,
    cache: Option<TokenCache>,
}

impl TokenVerifier {
    pub fn new(keys: JwksManager, settings: VerifierSettings) -> Self {
        Self {
            keys,
            settings,
            cache: None,
        }
    }

    /// Remember verified tokens in `cache`.
    pub fn with_token_cache(mut self, cache: TokenCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn keys(&self) -> &JwksManager {
        &self.keys
    }

    pub fn token_cache(&self) -> Option<&TokenCache> {
        self.cache.as_ref()
    }

    /// Verify `token` and extract the caller identity.
    pub async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let now = chrono::Utc::now().timestamp();
        if let Some(identity) = self.cache.as_ref().and_then(|c| c.get(token, now)) {
            tracing::trace!(user = %identity.user, "Token cache hit");
            return Ok(identity);
        }

        // Decode header to get kid and alg
        let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;
        if !self.settings.algorithms.contains(&header.alg) {
            return Err(AuthError::AlgorithmNotAllowed(format!("{:?}", header.alg)));
        }

        let decoding_key = self
            .keys
            .get_decoding_key(header.kid.as_deref(), header.alg)
            .await?;

        let token_data = decode::<TokenClaims>(token, &decoding_key, &self.validation(header.alg))?;
        let identity = self.settings.claims.identity(&token_data.claims)?;

        if let Some(cache) = &self.cache {
            let valid_until = identity
                .expires_at
                .saturating_add(self.settings.leeway as i64);
            cache.insert(token, identity.clone(), valid_until);
        }

        Ok(identity)
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.leeway = self.settings.leeway;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.settings.issuer]);
        validation.set_audience(&self.settings.audiences);
        validation.set_required_spec_claims(&REQUIRED_CLAIMS);
        validation
    }
}
