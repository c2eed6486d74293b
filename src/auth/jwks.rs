// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! ## Behaviour
//!
//! - Keys come either from a remote JWKS endpoint or from a static set
//!   (local file, tests)
//! - Remote keys are cached with a configurable TTL
//! - An unknown `kid` forces one refresh so rotated keys are picked up,
//!   at most once per `min_refresh_interval`
//! - Stale cache is used on fetch failure (fail-open for availability)
//! - Concurrent refreshes are coalesced behind a single lock; while the
//!   endpoint is down and nothing is cached, the last error is returned
//!   without refetching until `min_refresh_interval` has passed

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{
    AlgorithmParameters, EllipticCurve, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse,
};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::error::AuthError;

/// Default JWKS cache TTL (5 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default minimum gap between two fetches triggered by cache misses.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Timeout for a single JWKS request.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Where signing keys come from.
enum KeySource {
    Remote { url: Url, client: reqwest::Client },
    Static(Arc<JwkSet>),
}

/// JWKS cache entry.
struct CacheEntry {
    jwks: Arc<JwkSet>,
    fetched_at: Instant,
}

/// Outcome of the most recent fetch.
struct FetchAttempt {
    at: Instant,
    error: Option<AuthError>,
}

/// JWKS manager with caching.
#[derive(Clone)]
pub struct JwksManager {
    source: Arc<KeySource>,
    /// Cache TTL
    cache_ttl: Duration,
    /// Minimum gap between fetch attempts once something is cached
    min_refresh_interval: Duration,
    /// Cached JWKS
    cache: Arc<RwLock<Option<CacheEntry>>>,
    /// Held while fetching; stores the last attempt and its error
    last_attempt: Arc<Mutex<Option<FetchAttempt>>>,
}

impl JwksManager {
    /// Create a manager that fetches keys from a remote JWKS endpoint.
    pub fn remote(jwks_url: Url) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| AuthError::InternalError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::from_source(KeySource::Remote {
            url: jwks_url,
            client,
        }))
    }

    /// Create a manager over a fixed key set.
    pub fn from_key_set(jwks: JwkSet) -> Self {
        Self::from_source(KeySource::Static(Arc::new(jwks)))
    }

    /// Load a fixed key set from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AuthError::InternalError(format!("Failed to read JWKS file {}: {e}", path.display()))
        })?;
        let jwks: JwkSet = serde_json::from_str(&raw).map_err(|e| {
            AuthError::InternalError(format!("Failed to parse JWKS file {}: {e}", path.display()))
        })?;
        Ok(Self::from_key_set(jwks))
    }

    fn from_source(source: KeySource) -> Self {
        Self {
            source: Arc::new(source),
            cache_ttl: DEFAULT_CACHE_TTL,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            cache: Arc::new(RwLock::new(None)),
            last_attempt: Arc::new(Mutex::new(None)),
        }
    }

    /// Create with custom cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Create with a custom minimum refresh interval.
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Get the JWKS URL (remote sources only).
    pub fn jwks_url(&self) -> Option<&Url> {
        match &*self.source {
            KeySource::Remote { url, .. } => Some(url),
            KeySource::Static(_) => None,
        }
    }

    /// Fetch JWKS (with caching).
    async fn get_jwks(&self) -> Result<Arc<JwkSet>, AuthError> {
        if let KeySource::Static(jwks) = &*self.source {
            return Ok(jwks.clone());
        }
        if let Some(jwks) = self.cached(true).await {
            return Ok(jwks);
        }
        self.reload().await
    }

    /// Cached key set; with `fresh_only` the entry must be within its TTL.
    async fn cached(&self, fresh_only: bool) -> Option<Arc<JwkSet>> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|entry| !fresh_only || entry.fetched_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.jwks.clone())
    }

    /// Fetch a new key set unless one was attempted recently.
    async fn reload(&self) -> Result<Arc<JwkSet>, AuthError> {
        let mut last_attempt = self.last_attempt.lock().await;

        // Another task may have fetched while we waited on the lock.
        if let Some(attempt) = last_attempt
            .as_ref()
            .filter(|attempt| attempt.at.elapsed() < self.min_refresh_interval)
        {
            if let Some(jwks) = self.cached(false).await {
                return Ok(jwks);
            }
            if let Some(e) = &attempt.error {
                return Err(e.clone());
            }
        }

        let result = self.fetch_jwks().await;
        *last_attempt = Some(FetchAttempt {
            at: Instant::now(),
            error: result.as_ref().err().cloned(),
        });
        match result {
            Ok(jwks) => Ok(self.store(jwks).await),
            Err(e) => match self.cached(false).await {
                Some(stale) => {
                    tracing::warn!(error = %e, "JWKS refresh failed, serving stale keys");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    async fn store(&self, jwks: JwkSet) -> Arc<JwkSet> {
        let jwks = Arc::new(jwks);
        let mut cache = self.cache.write().await;
        *cache = Some(CacheEntry {
            jwks: jwks.clone(),
            fetched_at: Instant::now(),
        });
        jwks
    }

    /// Fetch JWKS from the endpoint.
    async fn fetch_jwks(&self) -> Result<JwkSet, AuthError> {
        let KeySource::Remote { url, client } = &*self.source else {
            return Err(AuthError::InternalError("static key set cannot be fetched".into()));
        };

        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AuthError::JwksFetchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::JwksFetchError(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::JwksFetchError(e.to_string()))?;

        tracing::debug!(url = %url, keys = jwks.keys.len(), "Fetched JWKS");
        Ok(jwks)
    }

    /// Get a decoding key for a token signed with `alg`.
    ///
    /// With a `kid` the key is looked up by id and a miss triggers one
    /// refresh. Without a `kid` the set must hold exactly one signing key
    /// usable with `alg`.
    pub async fn get_decoding_key(
        &self,
        kid: Option<&str>,
        alg: Algorithm,
    ) -> Result<DecodingKey, AuthError> {
        let jwks = self.get_jwks().await?;
        if let Some(jwk) = select_key(&jwks, kid, alg) {
            return jwk_to_decoding_key(jwk, alg);
        }

        if matches!(&*self.source, KeySource::Static(_)) {
            return Err(AuthError::NoMatchingKey);
        }

        tracing::debug!(kid = ?kid, "No matching key in cached JWKS, refreshing");
        let jwks = self.reload().await?;
        let jwk = select_key(&jwks, kid, alg).ok_or(AuthError::NoMatchingKey)?;
        jwk_to_decoding_key(jwk, alg)
    }

    /// Force refresh the JWKS cache.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        if matches!(&*self.source, KeySource::Static(_)) {
            return Ok(());
        }
        let mut last_attempt = self.last_attempt.lock().await;
        let result = self.fetch_jwks().await;
        *last_attempt = Some(FetchAttempt {
            at: Instant::now(),
            error: result.as_ref().err().cloned(),
        });
        self.store(result?).await;
        Ok(())
    }

    /// Make sure usable keys are loaded, going through the cache and the
    /// rate-limited fetch path.
    pub async fn ensure_loaded(&self) -> Result<(), AuthError> {
        self.get_jwks().await.map(|_| ())
    }

    /// Check if JWKS is currently cached and valid.
    pub async fn is_cached(&self) -> bool {
        match &*self.source {
            KeySource::Static(_) => true,
            KeySource::Remote { .. } => self.cached(true).await.is_some(),
        }
    }

    /// Periodically refresh remote keys until `shutdown` fires.
    ///
    /// Returns `None` for static key sets.
    pub fn spawn_refresh(
        &self,
        every: Duration,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if matches!(&*self.source, KeySource::Static(_)) || every.is_zero() {
            return None;
        }

        let manager = self.clone();
        Some(tokio::spawn(async move {
            loop {
                if let Err(e) = manager.refresh().await {
                    tracing::warn!(error = %e, "Background JWKS refresh failed");
                }
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("JWKS refresher shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(every) => {}
                }
            }
        }))
    }
}

/// Pick the signing key for a token.
fn select_key<'a>(jwks: &'a JwkSet, kid: Option<&str>, alg: Algorithm) -> Option<&'a Jwk> {
    let mut signing = jwks.keys.iter().filter(|k| is_signing_key(k));
    match kid {
        Some(kid) => signing.find(|k| k.common.key_id.as_deref() == Some(kid)),
        None => {
            let mut usable = signing.filter(|k| supports(k, alg));
            let first = usable.next()?;
            // Ambiguous without a kid.
            usable.next().is_none().then_some(first)
        }
    }
}

fn is_signing_key(jwk: &Jwk) -> bool {
    matches!(
        jwk.common.public_key_use,
        None | Some(PublicKeyUse::Signature)
    )
}

/// Whether `jwk` can verify `alg`, judged by key type, curve and declared alg.
fn supports(jwk: &Jwk, alg: Algorithm) -> bool {
    if let Some(declared) = jwk.common.key_algorithm {
        if key_algorithm(declared) != Some(alg) {
            return false;
        }
    }
    match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => matches!(
            alg,
            Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512
        ),
        AlgorithmParameters::EllipticCurve(ec) => matches!(
            (&ec.curve, alg),
            (EllipticCurve::P256, Algorithm::ES256) | (EllipticCurve::P384, Algorithm::ES384)
        ),
        _ => false,
    }
}

fn key_algorithm(alg: KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        _ => None,
    }
}

/// Convert a JWK to a DecodingKey for `alg`.
fn jwk_to_decoding_key(jwk: &Jwk, alg: Algorithm) -> Result<DecodingKey, AuthError> {
    if !supports(jwk, alg) {
        return Err(AuthError::AlgorithmNotAllowed(format!(
            "{alg:?} does not match key {}",
            jwk.common.key_id.as_deref().unwrap_or("<no kid>")
        )));
    }

    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
            .map_err(|e| AuthError::InternalError(format!("Failed to create RSA key: {e}"))),
        AlgorithmParameters::EllipticCurve(ec) => DecodingKey::from_ec_components(&ec.x, &ec.y)
            .map_err(|e| AuthError::InternalError(format!("Failed to create EC key: {e}"))),
        _ => Err(AuthError::InternalError(
            "Unsupported key type in JWKS".to_string(),
        )),
    }
}
