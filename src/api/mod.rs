use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    Extension, Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa_swagger_ui::SwaggerUi;

use crate::mfa::FactorsState;

pub mod handlers;
mod openapi;

pub use handlers::health::Database;
pub use openapi::openapi;

/// Build the full application router.
///
/// # Errors
/// Returns an error if the frontend base URL is not a valid origin.
pub fn app(state: FactorsState, database: Database, frontend_base_url: &str) -> Result<Router> {
    let frontend_origin = frontend_origin(frontend_base_url)?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let (router, api) = openapi::api_router().split_for_parts();
    Ok(router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state))
                .layer(Extension(database)),
        ))
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    state: FactorsState,
    database: Database,
    frontend_base_url: &str,
) -> Result<()> {
    let app = app(state, database, frontend_base_url)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Gracefully shutdown");
            }
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mfa::{
        test_support::{Harness, StubProvider, VALID_CODE},
        FactorId, Principal,
    };
    use axum::{
        body::to_bytes,
        http::{Response, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router(harness: &Harness) -> Router {
        app(
            harness.state.clone(),
            Database::default(),
            "https://app.factorgate.dev",
        )
        .unwrap()
    }

    fn request(method: Method, uri: &str, principal: Option<&Principal>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(principal) = principal {
            builder = builder.header(
                AUTHORIZATION,
                format!("Bearer {}", principal.session_token.expose()),
            );
        }
        match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: Response<Body>) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    }

    #[test]
    fn frontend_origin_strips_path() -> Result<()> {
        let origin = frontend_origin("https://app.example.com:8443/login")?;
        assert_eq!(origin, "https://app.example.com:8443");
        assert!(frontend_origin("not a url").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn missing_session_is_unauthorized() -> Result<()> {
        let harness = Harness::new();
        let response = router(&harness)
            .oneshot(request(Method::GET, "/v1/me/factors", None, None))
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("x-request-id"));
        Ok(())
    }

    #[tokio::test]
    async fn enrollment_over_http() -> Result<()> {
        let harness = Harness::new();
        let principal = harness.sign_in("alice").await?;
        let app = router(&harness);

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/v1/me/factors/enroll",
                Some(&principal),
                Some(json!({ "provider_id": "stub" })),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert_eq!(body["step"], "challenge_required");
        let workflow_token = body["workflow_token"].as_str().unwrap().to_string();
        let challenge_id = body["challenge"]["challenge_id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/v1/me/high-security",
                Some(&principal),
                Some(json!({ "challenge_id": challenge_id, "proof": { "kind": "acknowledge" } })),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["continuation"]["kind"], "enrollment");
        assert_eq!(body["continuation"]["id"], workflow_token.as_str());

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/v1/me/factors/enroll",
                Some(&principal),
                Some(json!({
                    "workflow_token": workflow_token,
                    "confirmed": true,
                    "input": { "fields": { "code": "000000" } }
                })),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["fields"]["code"], "Invalid code");

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/v1/me/factors/enroll",
                Some(&principal),
                Some(json!({
                    "workflow_token": workflow_token,
                    "input": { "fields": { "code": VALID_CODE, "name": "Laptop" } }
                })),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["step"], "enrolled");
        assert_eq!(body["factor"]["name"], "Laptop");

        let response = app
            .oneshot(request(Method::GET, "/v1/me/factors", Some(&principal), None))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["factors"].as_array().map(Vec::len), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn no_providers_is_service_unavailable() -> Result<()> {
        let harness = Harness::with_providers(Vec::new());
        let principal = harness.sign_in("alice").await?;
        let app = router(&harness);
        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/v1/me/factors/enroll",
                Some(&principal),
                Some(json!({})),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let response = app
            .oneshot(request(
                Method::GET,
                "/v1/me/factors/providers",
                Some(&principal),
                None,
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        Ok(())
    }

    #[tokio::test]
    async fn provider_menu_lists_eligibility() -> Result<()> {
        let harness = Harness::with_providers(vec![
            StubProvider::new("stub"),
            StubProvider::new("full").with_eligible(false),
        ]);
        let principal = harness.sign_in("alice").await?;
        let response = router(&harness)
            .oneshot(request(
                Method::GET,
                "/v1/me/factors/providers",
                Some(&principal),
                None,
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["providers"][0]["id"], "full");
        assert_eq!(body["providers"][0]["eligible"], false);
        assert_eq!(body["providers"][1]["eligible"], true);
        Ok(())
    }

    #[tokio::test]
    async fn rename_and_delete_over_http() -> Result<()> {
        let harness = Harness::new();
        let principal = harness.sign_in("alice").await?;
        let factor = harness.seed_factor(principal.account_id, "stub", "Phone").await?;
        let app = router(&harness);
        let uri = format!("/v1/me/factors/{}", factor.id);

        let response = app
            .clone()
            .oneshot(request(
                Method::PATCH,
                &uri,
                Some(&principal),
                Some(json!({ "name": "   " })),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["fields"]["name"], "Required");

        let response = app
            .clone()
            .oneshot(request(
                Method::PATCH,
                &uri,
                Some(&principal),
                Some(json!({ "name": "Backup" })),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["name"], "Backup");
        assert_eq!(body["provider_name"], "Stub");

        let response = app
            .clone()
            .oneshot(request(
                Method::DELETE,
                &uri,
                Some(&principal),
                Some(json!({ "confirmed": true })),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["step"], "challenge_required");

        harness.elevate(&principal).await?;
        let response = app
            .clone()
            .oneshot(request(Method::DELETE, &uri, Some(&principal), None))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["step"], "confirmation_required");

        let response = app
            .clone()
            .oneshot(request(
                Method::DELETE,
                &uri,
                Some(&principal),
                Some(json!({ "confirmed": true })),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let missing = format!("/v1/me/factors/{}", FactorId::generate());
        let response = app
            .oneshot(request(
                Method::PATCH,
                &missing,
                Some(&principal),
                Some(json!({ "name": "Ghost" })),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_challenge_is_gone() -> Result<()> {
        let harness = Harness::new();
        let principal = harness.sign_in("alice").await?;
        let response = router(&harness)
            .oneshot(request(
                Method::POST,
                "/v1/me/high-security",
                Some(&principal),
                Some(json!({
                    "challenge_id": uuid::Uuid::new_v4(),
                    "proof": { "kind": "acknowledge" }
                })),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::GONE);
        Ok(())
    }

    #[tokio::test]
    async fn rate_limited_enrollment_is_429() -> Result<()> {
        let harness = Harness::with_limit(0);
        let principal = harness.sign_in("alice").await?;
        harness.elevate(&principal).await?;
        let response = router(&harness)
            .oneshot(request(
                Method::POST,
                "/v1/me/factors/enroll",
                Some(&principal),
                Some(json!({ "provider_id": "stub", "confirmed": true })),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        Ok(())
    }

    #[tokio::test]
    async fn leaving_high_security_is_no_content() -> Result<()> {
        let harness = Harness::new();
        let principal = harness.sign_in("alice").await?;
        harness.elevate(&principal).await?;
        let response = router(&harness)
            .oneshot(request(
                Method::DELETE,
                "/v1/me/high-security",
                Some(&principal),
                None,
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!harness.gate.is_elevated(&principal).await?);
        Ok(())
    }
}
