// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::Request,
    http::HeaderName,
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{gateway, state::AppState};

pub mod health;
pub mod userinfo;

/// Paths served next to the gateway routes; the ext-auth prefix must not
/// overlap them.
pub const RESERVED_PREFIXES: [&str; 4] = ["/health", "/oauth2", "/docs", "/api-doc"];

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

pub fn router(state: AppState) -> Router {
    let extauth_prefix = state.gateway.extauth_prefix.clone();

    let routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/oauth2/userinfo", get(userinfo::userinfo))
        .merge(gateway::routes(&extauth_prefix))
        .with_state(state);

    // Outermost first: the id is assigned before the trace span opens.
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            let request_id = request
                .headers()
                .get(X_REQUEST_ID)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            tracing::info_span!(
                "request",
                method = %request.method(),
                path = %request.uri().path(),
                request_id = %request_id,
            )
        }))
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID));

    Router::new()
        .merge(routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(middleware)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        userinfo::userinfo,
        gateway::extauth_check,
        gateway::subrequest_check
    ),
    components(
        schemas(
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            userinfo::UserInfoResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Gateway", description = "External authorization checks for the ingress gateway"),
        (name = "Auth", description = "Caller identity")
    )
)]
struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AccessPolicy;
    use crate::gateway::headers::X_AUTH_REQUEST_USER;
    use crate::test_support::{base_claims, sign_rs256, test_state};
    use axum::{
        body::{to_bytes, Body},
        http::{header::AUTHORIZATION, Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn liveness_has_request_id() {
        let app = router(test_state(AccessPolicy::allow_all()));
        let response = app.oneshot(get_request("/health/live", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(X_REQUEST_ID));
    }

    #[tokio::test]
    async fn incoming_request_id_is_kept() {
        let app = router(test_state(AccessPolicy::allow_all()));
        let request = Request::builder()
            .uri("/health/live")
            .header(X_REQUEST_ID, "req-42")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.headers()[X_REQUEST_ID], "req-42");
    }

    #[tokio::test]
    async fn userinfo_returns_identity() {
        let app = router(test_state(AccessPolicy::allow_all()));
        let token = sign_rs256(&base_claims(), Some("rsa-1"));

        let response = app
            .oneshot(get_request("/oauth2/userinfo", Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["user"], "user_123");
        assert_eq!(body["email"], "ada@example.com");
        assert_eq!(body["groups"], serde_json::json!(["platform", "ops"]));
        assert!(body["expires_at"].is_string());
    }

    #[tokio::test]
    async fn userinfo_requires_token() {
        let app = router(test_state(AccessPolicy::allow_all()));
        let response = app.oneshot(get_request("/oauth2/userinfo", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("www-authenticate"));
    }

    #[tokio::test]
    async fn extauth_through_full_router() {
        let app = router(test_state(AccessPolicy::allow_all()));
        let token = sign_rs256(&base_claims(), Some("rsa-1"));
        let response = app
            .oneshot(get_request("/extauth/api/orders", Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_AUTH_REQUEST_USER], "user_123");
    }

    #[tokio::test]
    async fn openapi_document_served() {
        let app = router(test_state(AccessPolicy::allow_all()));
        let response = app
            .oneshot(get_request("/api-doc/openapi.json", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["paths"]["/oauth2/auth"].is_object());
        for path in ["/oauth2/auth", "/extauth/{path}"] {
            let description = body["paths"][path]["get"]["description"].as_str().unwrap();
            assert!(description.contains("any HTTP method"), "{path}: {description}");
        }
        let extauth = body["paths"]["/extauth/{path}"]["get"]["description"].as_str().unwrap();
        assert!(extauth.contains("AUTH_EXTAUTH_PREFIX"));
        assert!(body["components"]["securitySchemes"]["bearer_auth"].is_object());
    }
}
