// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures for unit tests: signing keys, a matching JWKS and
//! helpers that mint real tokens.

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

use crate::auth::{AccessPolicy, JwksManager, TokenVerifier, VerifierSettings};
use crate::gateway::GatewaySettings;
use crate::state::AppState;

/// RSA key published in `JWKS_JSON` as `rsa-1`.
pub const RSA_PRIVATE_PEM: &str = include_str!("../testdata/rsa_private.pem");
/// RSA key that appears in no key set.
pub const RSA_UNTRUSTED_PEM: &str = include_str!("../testdata/rsa_untrusted.pem");
/// P-256 key published in `JWKS_JSON` as `ec-1`.
pub const EC_PRIVATE_PEM: &str = include_str!("../testdata/ec_private.pem");
pub const JWKS_JSON: &str = include_str!("../testdata/jwks.json");

pub const ISSUER: &str = "https://login.example.com/tenant/v2.0";
pub const CLIENT_ID: &str = "api://relational-gate";

pub fn test_key_set() -> JwkSet {
    serde_json::from_str(JWKS_JSON).expect("fixture JWKS parses")
}

/// Valid claims for `ISSUER` / `CLIENT_ID`, expiring in an hour.
pub fn base_claims() -> Value {
    let now = chrono::Utc::now().timestamp();
    json!({
        "sub": "user_123",
        "iss": ISSUER,
        "aud": CLIENT_ID,
        "iat": now,
        "exp": now + 3600,
        "email": "ada@example.com",
        "email_verified": true,
        "preferred_username": "ada",
        "groups": ["platform", "ops"],
    })
}

pub fn sign(pem: &str, alg: Algorithm, kid: Option<&str>, claims: &Value) -> String {
    let key = match alg {
        Algorithm::ES256 | Algorithm::ES384 => EncodingKey::from_ec_pem(pem.as_bytes()),
        _ => EncodingKey::from_rsa_pem(pem.as_bytes()),
    }
    .expect("fixture key parses");

    let mut header = Header::new(alg);
    header.kid = kid.map(str::to_string);
    encode(&header, claims, &key).expect("token encodes")
}

pub fn sign_rs256(claims: &Value, kid: Option<&str>) -> String {
    sign(RSA_PRIVATE_PEM, Algorithm::RS256, kid, claims)
}

pub fn sign_es256(claims: &Value, kid: Option<&str>) -> String {
    sign(EC_PRIVATE_PEM, Algorithm::ES256, kid, claims)
}

pub fn test_verifier() -> TokenVerifier {
    TokenVerifier::new(
        JwksManager::from_key_set(test_key_set()),
        VerifierSettings::new(ISSUER, CLIENT_ID),
    )
}

/// App state over the fixture keys with the given policy.
pub fn test_state(policy: AccessPolicy) -> AppState {
    AppState::new(test_verifier(), policy).with_gateway(GatewaySettings::default())
}
