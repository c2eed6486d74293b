// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Gateway Adapter
//!
//! External-authorization endpoints called by the ingress gateway before
//! it forwards a request to the backend.
//!
//! ## Contracts
//!
//! - **Path-prefix ext-auth** (`ANY {prefix}/{*path}`): the gateway replays
//!   the original method and path under a configured prefix and copies the
//!   original headers.
//! - **Subrequest auth** (`ANY /oauth2/auth`): the gateway issues a
//!   subrequest and passes the original request line in
//!   `X-Forwarded-Method` / `X-Forwarded-Uri` (or the `X-Original-*`
//!   variants). Without a forwarded method the subrequest's own method is
//!   checked.
//!
//! Both answer `200` with `X-Auth-Request-*` headers to allow the request,
//! or the `AuthError` response (usually `401`) to deny it.

pub mod headers;
pub mod skip;

use axum::{
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};

use crate::auth::{authenticate, bearer_token};
use crate::state::AppState;

pub use headers::identity_headers;
pub use skip::{SkipRule, SkipRules};

/// Default path prefix of the ext-auth route.
pub const DEFAULT_EXTAUTH_PREFIX: &str = "/extauth";

/// Subrequest check path.
pub const SUBREQUEST_PATH: &str = "/oauth2/auth";

const X_FORWARDED_METHOD: &str = "x-forwarded-method";
const X_ORIGINAL_METHOD: &str = "x-original-method";
const X_FORWARDED_URI: &str = "x-forwarded-uri";
const X_ORIGINAL_URI: &str = "x-original-uri";

/// Gateway-facing behaviour.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Routes that are let through without a token
    pub skip_rules: SkipRules,
    /// Emit `X-Auth-Request-*` identity headers
    pub set_xauthrequest: bool,
    /// Also emit `X-Auth-Request-Access-Token`
    pub pass_access_token: bool,
    /// Prefix under which the gateway replays requests
    pub extauth_prefix: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            skip_rules: SkipRules::default(),
            set_xauthrequest: true,
            pass_access_token: false,
            extauth_prefix: DEFAULT_EXTAUTH_PREFIX.to_string(),
        }
    }
}

/// Gateway check routes.
pub fn routes(extauth_prefix: &str) -> Router<AppState> {
    let prefix = extauth_prefix.trim_end_matches('/');
    Router::new()
        .route(SUBREQUEST_PATH, any(subrequest_check))
        .route(prefix, any(extauth_check))
        .route(&format!("{prefix}/"), any(extauth_check))
        .route(&format!("{prefix}/{{*path}}"), any(extauth_check))
}

/// Path-prefix external authorization check.
///
/// The original request path is whatever follows the prefix. Every HTTP
/// method is accepted and checked as the original method; the document
/// shows GET only. The prefix comes from `AUTH_EXTAUTH_PREFIX` and is
/// documented at its default, `/extauth`.
#[utoipa::path(
    get,
    path = "/extauth/{path}",
    tag = "Gateway",
    description = "Accepts any HTTP method, checked as the original request's method. \
        `/extauth` is the default of the configurable AUTH_EXTAUTH_PREFIX.",
    params(("path" = String, Path, description = "Original request path")),
    responses(
        (status = 200, description = "Request allowed; identity in X-Auth-Request-* headers"),
        (status = 401, description = "Missing, invalid or unauthorized token")
    )
)]
pub async fn extauth_check(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let prefix = state.gateway.extauth_prefix.trim_end_matches('/');
    let original_path = uri
        .path()
        .strip_prefix(prefix)
        .filter(|rest| !rest.is_empty())
        .unwrap_or("/");
    check(&state, &method, original_path, &headers).await
}

/// Subrequest-style external authorization check.
///
/// Accepts any HTTP method, like [`extauth_check`].
#[utoipa::path(
    get,
    path = "/oauth2/auth",
    tag = "Gateway",
    description = "Accepts any HTTP method. The original request line is read from \
        X-Forwarded-Method/X-Forwarded-Uri or X-Original-Method/X-Original-Uri; \
        without a forwarded method the subrequest's own method is used.",
    responses(
        (status = 200, description = "Request allowed; identity in X-Auth-Request-* headers"),
        (status = 401, description = "Missing, invalid or unauthorized token")
    )
)]
pub async fn subrequest_check(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let method = first_header(&headers, &[X_FORWARDED_METHOD, X_ORIGINAL_METHOD])
        .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
        .unwrap_or(method);
    let original_uri = first_header(&headers, &[X_FORWARDED_URI, X_ORIGINAL_URI]).unwrap_or("/");
    check(&state, &method, original_uri, &headers).await
}

fn first_header<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| headers.get(*name))
        .find_map(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// Decide one forwarded request.
pub async fn check(state: &AppState, method: &Method, path: &str, headers: &HeaderMap) -> Response {
    if state.gateway.skip_rules.matches(method, path) {
        tracing::debug!(%method, path, "Auth skipped for route");
        return StatusCode::OK.into_response();
    }

    match authenticate(headers, state).await {
        Ok(identity) => {
            tracing::debug!(%method, path, user = %identity.user, "Request authorized");
            if !state.gateway.set_xauthrequest {
                return StatusCode::OK.into_response();
            }
            let access_token = if state.gateway.pass_access_token {
                bearer_token(headers).ok()
            } else {
                None
            };
            (StatusCode::OK, identity_headers(&identity, access_token)).into_response()
        }
        Err(e) if e.is_policy_denial() => {
            tracing::info!(%method, path, error_code = e.error_code(), "Request denied by policy");
            e.into_response()
        }
        Err(e) => {
            if e.status_code().is_server_error() {
                tracing::error!(%method, path, error = %e, "Authentication failed");
            } else {
                tracing::debug!(%method, path, error_code = e.error_code(), "Authentication rejected");
            }
            e.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AccessPolicy;
    use crate::test_support::{base_claims, sign, sign_rs256, test_state, RSA_UNTRUSTED_PEM};
    use axum::body::Body;
    use axum::http::{header::AUTHORIZATION, Request};
    use super::headers::{
        X_AUTH_REQUEST_ACCESS_TOKEN, X_AUTH_REQUEST_EMAIL, X_AUTH_REQUEST_GROUPS, X_AUTH_REQUEST_USER,
    };
    use jsonwebtoken::Algorithm;
    use serde_json::json;
    use tower::ServiceExt;

    fn app(state: AppState) -> Router {
        let prefix = state.gateway.extauth_prefix.clone();
        routes(&prefix).with_state(state)
    }

    fn request(method: Method, uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn call(state: AppState, request: Request<Body>) -> Response {
        app(state).oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn valid_token_allowed_with_identity_headers() {
        let state = test_state(AccessPolicy::default().with_allowed_groups(["ops"]));
        let token = sign_rs256(&base_claims(), Some("rsa-1"));

        let response = call(state, request(Method::GET, "/extauth/api/orders", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_AUTH_REQUEST_USER], "user_123");
        assert_eq!(response.headers()[X_AUTH_REQUEST_EMAIL], "ada@example.com");
        assert_eq!(response.headers()[X_AUTH_REQUEST_GROUPS], "platform,ops");
        assert!(response.headers().get(X_AUTH_REQUEST_ACCESS_TOKEN).is_none());
    }

    #[tokio::test]
    async fn expired_token_gets_401() {
        let state = test_state(AccessPolicy::allow_all());
        let mut claims = base_claims();
        claims["exp"] = json!(chrono::Utc::now().timestamp() - 3600);
        let token = sign_rs256(&claims, Some("rsa-1"));

        let response = call(state, request(Method::GET, "/extauth/api", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(X_AUTH_REQUEST_USER).is_none());
    }

    #[tokio::test]
    async fn missing_header_gets_401() {
        let state = test_state(AccessPolicy::allow_all());
        let response = call(state, request(Method::POST, "/extauth/api", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn untrusted_key_gets_401() {
        let state = test_state(AccessPolicy::allow_all());
        let token = sign(RSA_UNTRUSTED_PEM, Algorithm::RS256, Some("rsa-1"), &base_claims());
        let response = call(state, request(Method::GET, "/extauth/api", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn disallowed_group_gets_401() {
        let state = test_state(AccessPolicy::default().with_allowed_groups(["admins"]));
        let token = sign_rs256(&base_claims(), Some("rsa-1"));
        let response = call(state, request(Method::GET, "/extauth/api", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn skip_rules_bypass_token_check() {
        let mut state = test_state(AccessPolicy::allow_all());
        state = state.with_gateway(GatewaySettings {
            skip_rules: SkipRules::parse("GET=/public").unwrap(),
            ..GatewaySettings::default()
        });

        let response = call(state.clone(), request(Method::GET, "/extauth/public/logo.png", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(X_AUTH_REQUEST_USER).is_none());

        let response = call(state, request(Method::POST, "/extauth/public/logo.png", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn traversal_out_of_skipped_route_needs_token() {
        let state = test_state(AccessPolicy::allow_all()).with_gateway(GatewaySettings {
            skip_rules: SkipRules::parse("GET=/public").unwrap(),
            ..GatewaySettings::default()
        });

        for uri in ["/extauth/public/../admin/secrets", "/extauth/public/%2e%2e/admin/secrets"] {
            let response = call(state.clone(), request(Method::GET, uri, None)).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }

        let response = call(state, request(Method::GET, "/extauth/public/logo%20x.png", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn bare_prefix_checks_root_path() {
        let state = test_state(AccessPolicy::allow_all()).with_gateway(GatewaySettings {
            skip_rules: SkipRules::parse("GET=/").unwrap(),
            ..GatewaySettings::default()
        });
        let response = call(state, request(Method::GET, "/extauth", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn access_token_passed_when_enabled() {
        let state = test_state(AccessPolicy::allow_all()).with_gateway(GatewaySettings {
            pass_access_token: true,
            ..GatewaySettings::default()
        });
        let token = sign_rs256(&base_claims(), Some("rsa-1"));

        let response = call(state, request(Method::GET, "/extauth/api", Some(&token))).await;
        assert_eq!(response.headers()[X_AUTH_REQUEST_ACCESS_TOKEN], token.as_str());
    }

    #[tokio::test]
    async fn identity_headers_can_be_disabled() {
        let state = test_state(AccessPolicy::allow_all()).with_gateway(GatewaySettings {
            set_xauthrequest: false,
            ..GatewaySettings::default()
        });
        let token = sign_rs256(&base_claims(), Some("rsa-1"));

        let response = call(state, request(Method::GET, "/extauth/api", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(X_AUTH_REQUEST_USER).is_none());
    }

    #[tokio::test]
    async fn custom_prefix() {
        let state = test_state(AccessPolicy::allow_all()).with_gateway(GatewaySettings {
            extauth_prefix: "/authz".to_string(),
            ..GatewaySettings::default()
        });
        let token = sign_rs256(&base_claims(), Some("rsa-1"));

        let response = call(state.clone(), request(Method::GET, "/authz/x", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = call(state, request(Method::GET, "/extauth/x", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn subrequest_uses_forwarded_request_line() {
        let state = test_state(AccessPolicy::allow_all()).with_gateway(GatewaySettings {
            skip_rules: SkipRules::parse("POST=/webhooks").unwrap(),
            ..GatewaySettings::default()
        });

        let skipped = Request::builder()
            .uri(SUBREQUEST_PATH)
            .header(X_FORWARDED_METHOD, "POST")
            .header(X_FORWARDED_URI, "/webhooks/github?delivery=1")
            .body(Body::empty())
            .unwrap();
        let response = call(state.clone(), skipped).await;
        assert_eq!(response.status(), StatusCode::OK);

        let not_skipped = Request::builder()
            .uri(SUBREQUEST_PATH)
            .header(X_ORIGINAL_METHOD, "GET")
            .header(X_ORIGINAL_URI, "/webhooks/github")
            .body(Body::empty())
            .unwrap();
        let response = call(state, not_skipped).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn subrequest_with_valid_token() {
        let state = test_state(AccessPolicy::allow_all());
        let token = sign_rs256(&base_claims(), Some("rsa-1"));
        let response = call(state, request(Method::GET, SUBREQUEST_PATH, Some(&token))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_AUTH_REQUEST_USER], "user_123");
    }

    #[tokio::test]
    async fn subrequest_accepts_any_method() {
        let state = test_state(AccessPolicy::allow_all());
        let token = sign_rs256(&base_claims(), Some("rsa-1"));
        let response = call(state, request(Method::POST, SUBREQUEST_PATH, Some(&token))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_AUTH_REQUEST_USER], "user_123");
    }

    #[tokio::test]
    async fn subrequest_without_forwarded_method_uses_own_method() {
        let state = test_state(AccessPolicy::allow_all()).with_gateway(GatewaySettings {
            skip_rules: SkipRules::parse("DELETE=/jobs").unwrap(),
            ..GatewaySettings::default()
        });
        let forwarded = |method: Method| {
            Request::builder()
                .method(method)
                .uri(SUBREQUEST_PATH)
                .header(X_FORWARDED_URI, "/jobs/7")
                .body(Body::empty())
                .unwrap()
        };

        let response = call(state.clone(), forwarded(Method::DELETE)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = call(state, forwarded(Method::GET)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn subrequest_traversal_out_of_skipped_route_needs_token() {
        let state = test_state(AccessPolicy::allow_all()).with_gateway(GatewaySettings {
            skip_rules: SkipRules::parse("GET=/public").unwrap(),
            ..GatewaySettings::default()
        });

        for uri in ["/public/../admin", "/public/%2e%2e/admin", "/public%2F..%2Fadmin"] {
            let subrequest = Request::builder()
                .uri(SUBREQUEST_PATH)
                .header(X_FORWARDED_METHOD, "GET")
                .header(X_FORWARDED_URI, uri)
                .body(Body::empty())
                .unwrap();
            let response = call(state.clone(), subrequest).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }
}
