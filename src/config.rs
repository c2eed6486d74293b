// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names, default values and the
//! [`Config`] loaded from the environment at startup. Invalid values stop
//! the process instead of falling back to defaults.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `AUTH_ISSUER_URL` | Expected JWT issuer claim; OIDC discovery base | Required |
//! | `AUTH_CLIENT_ID` | Expected JWT audience claim | Required |
//! | `AUTH_EXTRA_AUDIENCES` | Additional accepted audiences (comma list) | none |
//! | `AUTH_JWKS_URL` | JWKS endpoint (skips discovery) | discovered |
//! | `AUTH_JWKS_FILE` | Local JWKS file (no remote fetching) | unset |
//! | `AUTH_ALLOWED_GROUPS` | Group allow-list (comma list) | any group |
//! | `AUTH_EMAIL_DOMAINS` | Allowed email domains, `*` for any | `*` |
//! | `AUTH_ALLOW_UNVERIFIED_EMAIL` | Accept `email_verified: false` | `false` |
//! | `AUTH_USER_CLAIM` | Claim holding the user id | `sub` |
//! | `AUTH_EMAIL_CLAIM` | Claim holding the email | `email` |
//! | `AUTH_GROUPS_CLAIM` | Claim holding the groups | `groups` |
//! | `AUTH_ALLOWED_ALGORITHMS` | Accepted JWS algorithms | RS*, PS*, ES256, ES384 |
//! | `AUTH_CLOCK_SKEW_SECS` | Leeway for `exp` / `nbf` | `60` |
//! | `AUTH_JWKS_CACHE_TTL_SECS` | JWKS cache TTL | `300` |
//! | `AUTH_JWKS_MIN_REFRESH_SECS` | Minimum gap between JWKS fetches on cache miss | `30` |
//! | `AUTH_JWKS_REFRESH_INTERVAL_SECS` | Background JWKS refresh period, `0` disables | `240` |
//! | `AUTH_TOKEN_CACHE_SIZE` | Verified-token cache entries, `0` disables | `1024` |
//! | `AUTH_TOKEN_CACHE_TTL_SECS` | Max age of a verified-token cache entry | `60` |
//! | `AUTH_SET_XAUTHREQUEST` | Emit `X-Auth-Request-*` headers | `true` |
//! | `AUTH_PASS_ACCESS_TOKEN` | Emit `X-Auth-Request-Access-Token` | `false` |
//! | `AUTH_SKIP_ROUTES` | Unauthenticated routes, `[METHOD=]/prefix` comma list | none |
//! | `AUTH_EXTAUTH_PREFIX` | Path prefix of the ext-auth check route | `/extauth` |
//! | `AUTH_INSECURE_ALLOW_HTTP` | Allow plain HTTP issuer / JWKS URLs | `false` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use url::Url;

use crate::api::RESERVED_PREFIXES;
use crate::auth::verifier::{DEFAULT_ALGORITHMS, DEFAULT_CLOCK_SKEW_LEEWAY};
use crate::auth::{AccessPolicy, ClaimMapping, VerifierSettings};
use crate::gateway::{GatewaySettings, SkipRules, DEFAULT_EXTAUTH_PREFIX};
use crate::logging::LogFormat;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const ISSUER_URL_ENV: &str = "AUTH_ISSUER_URL";
pub const CLIENT_ID_ENV: &str = "AUTH_CLIENT_ID";
pub const EXTRA_AUDIENCES_ENV: &str = "AUTH_EXTRA_AUDIENCES";
pub const JWKS_URL_ENV: &str = "AUTH_JWKS_URL";
pub const JWKS_FILE_ENV: &str = "AUTH_JWKS_FILE";
pub const ALLOWED_GROUPS_ENV: &str = "AUTH_ALLOWED_GROUPS";
pub const EMAIL_DOMAINS_ENV: &str = "AUTH_EMAIL_DOMAINS";
pub const ALLOW_UNVERIFIED_EMAIL_ENV: &str = "AUTH_ALLOW_UNVERIFIED_EMAIL";
pub const USER_CLAIM_ENV: &str = "AUTH_USER_CLAIM";
pub const EMAIL_CLAIM_ENV: &str = "AUTH_EMAIL_CLAIM";
pub const GROUPS_CLAIM_ENV: &str = "AUTH_GROUPS_CLAIM";
pub const ALLOWED_ALGORITHMS_ENV: &str = "AUTH_ALLOWED_ALGORITHMS";
pub const CLOCK_SKEW_ENV: &str = "AUTH_CLOCK_SKEW_SECS";
pub const JWKS_CACHE_TTL_ENV: &str = "AUTH_JWKS_CACHE_TTL_SECS";
pub const JWKS_MIN_REFRESH_ENV: &str = "AUTH_JWKS_MIN_REFRESH_SECS";
pub const JWKS_REFRESH_INTERVAL_ENV: &str = "AUTH_JWKS_REFRESH_INTERVAL_SECS";
pub const TOKEN_CACHE_SIZE_ENV: &str = "AUTH_TOKEN_CACHE_SIZE";
pub const TOKEN_CACHE_TTL_ENV: &str = "AUTH_TOKEN_CACHE_TTL_SECS";
pub const SET_XAUTHREQUEST_ENV: &str = "AUTH_SET_XAUTHREQUEST";
pub const PASS_ACCESS_TOKEN_ENV: &str = "AUTH_PASS_ACCESS_TOKEN";
pub const SKIP_ROUTES_ENV: &str = "AUTH_SKIP_ROUTES";
pub const EXTAUTH_PREFIX_ENV: &str = "AUTH_EXTAUTH_PREFIX";
pub const INSECURE_ALLOW_HTTP_ENV: &str = "AUTH_INSECURE_ALLOW_HTTP";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_JWKS_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_JWKS_MIN_REFRESH_SECS: u64 = 30;
const DEFAULT_JWKS_REFRESH_INTERVAL_SECS: u64 = 240;
const DEFAULT_TOKEN_CACHE_SIZE: usize = 1024;
const DEFAULT_TOKEN_CACHE_TTL_SECS: u64 = 60;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

fn invalid(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.into(),
    }
}

/// Where signing keys come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySourceConfig {
    /// Local JWKS file
    File(PathBuf),
    /// Explicit JWKS endpoint
    Url(Url),
    /// Resolve `jwks_uri` through OIDC discovery on the issuer
    Discover,
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Expected issuer, verbatim (not normalized)
    pub issuer: String,
    /// Client id first, then extra audiences
    pub audiences: Vec<String>,
    pub key_source: KeySourceConfig,
    pub allowed_groups: Vec<String>,
    pub email_domains: Vec<String>,
    pub allow_unverified_email: bool,
    pub claims: ClaimMapping,
    pub algorithms: Vec<Algorithm>,
    pub clock_skew: u64,
    pub jwks_cache_ttl: Duration,
    pub jwks_min_refresh_interval: Duration,
    /// Zero disables the background refresher
    pub jwks_refresh_interval: Duration,
    /// `None` disables the verified-token cache
    pub token_cache_size: Option<NonZeroUsize>,
    pub token_cache_ttl: Duration,
    pub set_xauthrequest: bool,
    pub pass_access_token: bool,
    pub skip_rules: SkipRules,
    pub extauth_prefix: String,
    pub insecure_allow_http: bool,
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let insecure_allow_http = parse_bool(INSECURE_ALLOW_HTTP_ENV, get(INSECURE_ALLOW_HTTP_ENV), false)?;

        let issuer = get(ISSUER_URL_ENV).ok_or(ConfigError::Missing(ISSUER_URL_ENV))?;
        check_url(ISSUER_URL_ENV, &issuer, insecure_allow_http)?;

        let client_id = get(CLIENT_ID_ENV).ok_or(ConfigError::Missing(CLIENT_ID_ENV))?;
        let mut audiences = vec![client_id];
        for extra in parse_list(get(EXTRA_AUDIENCES_ENV)) {
            if !audiences.contains(&extra) {
                audiences.push(extra);
            }
        }

        let key_source = match (get(JWKS_FILE_ENV), get(JWKS_URL_ENV)) {
            (Some(path), _) => KeySourceConfig::File(PathBuf::from(path)),
            (None, Some(url)) => {
                KeySourceConfig::Url(check_url(JWKS_URL_ENV, &url, insecure_allow_http)?)
            }
            (None, None) => KeySourceConfig::Discover,
        };

        let algorithms = match get(ALLOWED_ALGORITHMS_ENV) {
            Some(list) => parse_algorithms(&list)?,
            None => DEFAULT_ALGORITHMS.to_vec(),
        };

        let token_cache_size = parse_number(
            TOKEN_CACHE_SIZE_ENV,
            get(TOKEN_CACHE_SIZE_ENV),
            DEFAULT_TOKEN_CACHE_SIZE,
        )?;

        let skip_rules = SkipRules::parse(&get(SKIP_ROUTES_ENV).unwrap_or_default())
            .map_err(|e| invalid(SKIP_ROUTES_ENV, e.to_string()))?;

        let extauth_prefix = get(EXTAUTH_PREFIX_ENV)
            .unwrap_or_else(|| DEFAULT_EXTAUTH_PREFIX.to_string())
            .trim_end_matches('/')
            .to_string();
        if !extauth_prefix.starts_with('/') || extauth_prefix.contains(['{', '}', '*']) {
            return Err(invalid(
                EXTAUTH_PREFIX_ENV,
                "must be a literal path starting with '/' and not '/' itself",
            ));
        }
        if let Some(reserved) = RESERVED_PREFIXES
            .iter()
            .find(|reserved| overlaps(&extauth_prefix, reserved))
        {
            return Err(invalid(EXTAUTH_PREFIX_ENV, format!("overlaps {reserved}")));
        }

        let log_format = match get(LOG_FORMAT_ENV) {
            Some(value) => value
                .parse()
                .map_err(|_| invalid(LOG_FORMAT_ENV, format!("'{value}' is not json or pretty")))?,
            None => LogFormat::default(),
        };

        Ok(Self {
            host: get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_number(PORT_ENV, get(PORT_ENV), DEFAULT_PORT)?,
            issuer,
            audiences,
            key_source,
            allowed_groups: parse_list(get(ALLOWED_GROUPS_ENV)),
            email_domains: match get(EMAIL_DOMAINS_ENV) {
                Some(list) => parse_list(Some(list)),
                None => vec!["*".to_string()],
            },
            allow_unverified_email: parse_bool(
                ALLOW_UNVERIFIED_EMAIL_ENV,
                get(ALLOW_UNVERIFIED_EMAIL_ENV),
                false,
            )?,
            claims: ClaimMapping {
                user_claim: get(USER_CLAIM_ENV).unwrap_or_else(|| "sub".to_string()),
                email_claim: get(EMAIL_CLAIM_ENV).unwrap_or_else(|| "email".to_string()),
                groups_claim: get(GROUPS_CLAIM_ENV).unwrap_or_else(|| "groups".to_string()),
            },
            algorithms,
            clock_skew: parse_number(CLOCK_SKEW_ENV, get(CLOCK_SKEW_ENV), DEFAULT_CLOCK_SKEW_LEEWAY)?,
            jwks_cache_ttl: parse_secs(
                JWKS_CACHE_TTL_ENV,
                get(JWKS_CACHE_TTL_ENV),
                DEFAULT_JWKS_CACHE_TTL_SECS,
            )?,
            jwks_min_refresh_interval: parse_secs(
                JWKS_MIN_REFRESH_ENV,
                get(JWKS_MIN_REFRESH_ENV),
                DEFAULT_JWKS_MIN_REFRESH_SECS,
            )?,
            jwks_refresh_interval: parse_secs(
                JWKS_REFRESH_INTERVAL_ENV,
                get(JWKS_REFRESH_INTERVAL_ENV),
                DEFAULT_JWKS_REFRESH_INTERVAL_SECS,
            )?,
            token_cache_size: NonZeroUsize::new(token_cache_size),
            token_cache_ttl: parse_secs(
                TOKEN_CACHE_TTL_ENV,
                get(TOKEN_CACHE_TTL_ENV),
                DEFAULT_TOKEN_CACHE_TTL_SECS,
            )?,
            set_xauthrequest: parse_bool(SET_XAUTHREQUEST_ENV, get(SET_XAUTHREQUEST_ENV), true)?,
            pass_access_token: parse_bool(PASS_ACCESS_TOKEN_ENV, get(PASS_ACCESS_TOKEN_ENV), false)?,
            skip_rules,
            extauth_prefix,
            insecure_allow_http,
            log_format,
        })
    }

    /// Bind address as `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn verifier_settings(&self) -> VerifierSettings {
        VerifierSettings {
            issuer: self.issuer.clone(),
            audiences: self.audiences.clone(),
            algorithms: self.algorithms.clone(),
            leeway: self.clock_skew,
            claims: self.claims.clone(),
        }
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::default()
            .with_allowed_groups(self.allowed_groups.iter().cloned())
            .with_email_domains(self.email_domains.iter().cloned())
            .with_allow_unverified_email(self.allow_unverified_email)
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            skip_rules: self.skip_rules.clone(),
            set_xauthrequest: self.set_xauthrequest,
            pass_access_token: self.pass_access_token,
            extauth_prefix: self.extauth_prefix.clone(),
        }
    }
}

fn parse_list(value: Option<String>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether one path is a segment-wise prefix of the other.
fn overlaps(a: &str, b: &str) -> bool {
    let within = |path: &str, prefix: &str| {
        path.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    };
    within(a, b) || within(b, a)
}

fn parse_bool(var: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, format!("'{value}' is not a boolean"))),
    }
}

fn parse_number<T: FromStr>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        Some(value) => value
            .parse()
            .map_err(|_| invalid(var, format!("'{value}' is not a valid number"))),
        None => Ok(default),
    }
}

fn parse_secs(var: &'static str, value: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    parse_number(var, value, default).map(Duration::from_secs)
}

fn check_url(var: &'static str, value: &str, allow_http: bool) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| invalid(var, e.to_string()))?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if allow_http => Ok(url),
        scheme => Err(invalid(var, format!("scheme '{scheme}' is not allowed (HTTPS required)"))),
    }
}

fn parse_algorithms(list: &str) -> Result<Vec<Algorithm>, ConfigError> {
    let mut algorithms = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let alg = Algorithm::from_str(&name.to_ascii_uppercase())
            .map_err(|_| invalid(ALLOWED_ALGORITHMS_ENV, format!("unknown algorithm '{name}'")))?;
        if !DEFAULT_ALGORITHMS.contains(&alg) {
            return Err(invalid(
                ALLOWED_ALGORITHMS_ENV,
                format!("{name} is not an asymmetric signature algorithm"),
            ));
        }
        if !algorithms.contains(&alg) {
            algorithms.push(alg);
        }
    }
    if algorithms.is_empty() {
        return Err(invalid(ALLOWED_ALGORITHMS_ENV, "at least one algorithm is required"));
    }
    Ok(algorithms)
}
