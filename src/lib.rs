// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Auth Gate - Bearer Token External Authorization
//!
//! Verifies OIDC-issued JWTs for an ingress gateway and forwards the
//! caller identity to backends as `X-Auth-Request-*` headers.
//!
//! ## Modules
//!
//! - `api` - HTTP router, health probes and OpenAPI docs (Axum)
//! - `auth` - Token verification, claims, access policy and JWKS caching
//! - `config` - Environment configuration
//! - `gateway` - External-authorization check endpoints
//! - `logging` - Tracing subscriber setup

pub mod api;
pub mod auth;
pub mod config;
pub mod gateway;
pub mod logging;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;
