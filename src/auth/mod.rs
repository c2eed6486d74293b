// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Verifies OIDC-issued bearer tokens and decides whether the caller may
//! reach the backend.
//!
//! ## Auth Flow
//!
//! 1. Client obtains a JWT from the identity provider
//! 2. Client sends `Authorization: Bearer <JWT>` through the gateway
//! 3. The gateway asks this service whether to let the request through:
//!    - Fetches the issuer's JWKS via HTTPS (discovered or configured)
//!    - Verifies JWT signature, expiry, issuer, audience
//!    - Extracts:
//!      - user claim (`sub` by default) → `Identity::user`
//!      - email and group claims
//!    - Applies the access policy (group allow-list, email domains)
//!
//! ## Security
//!
//! - Only asymmetric algorithms are accepted; `none` and HMAC never are
//! - JWKS is cached with TTL; unknown `kid` triggers a rate-limited refresh
//! - Clock skew tolerance is 60 seconds by default

pub mod claims;
pub mod discovery;
pub mod error;
pub mod extractor;
pub mod jwks;
pub mod policy;
pub mod token_cache;
pub mod verifier;

pub use claims::{ClaimMapping, Identity, TokenClaims};
pub use error::AuthError;
pub use extractor::{authenticate, bearer_token, Auth};
pub use jwks::JwksManager;
pub use policy::AccessPolicy;
pub use token_cache::TokenCache;
pub use verifier::{TokenVerifier, VerifierSettings};
