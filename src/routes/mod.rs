use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, Uri},
    response::Response,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::CredentialsUpdater;
use crate::error::ApiError;
use crate::http_client::{self, LocalApiClient};

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub updater: Arc<CredentialsUpdater>,
    pub local_api: Arc<LocalApiClient>,
}

/// Health check routes
pub fn health_routes() -> Router {
    Router::new().route("/_/health", get(health_handler))
}

/// Catch-all proxy to the local API
pub fn proxy_routes(state: AppState) -> Router {
    Router::new().fallback(proxy_handler).with_state(state)
}

/// GET /_/health - Liveness check
///
/// Answers without touching the gateway or the cloud.
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "pass",
        "message": "flux capacitor is fluxing",
        "version": VERSION
    }))
}

/// Any other path - forwarded to the local API with the current bearer token
async fn proxy_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    let upstream = state
        .local_api
        .forward(method, path_and_query, &headers, body)
        .await?;

    let status = upstream.status();
    let upstream_headers = http_client::response_headers(upstream.headers());

    let mut response = Response::builder()
        .status(status)
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Failed to build response: {}", e)))?;
    response.headers_mut().extend(upstream_headers);

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialsManager, RemoteApiConfig, UpdaterSettings};
    use axum::http::{Request, StatusCode};
    use mockito::Matcher;
    use tower::util::ServiceExt;

    async fn create_test_state(local_api_url: &str) -> AppState {
        let manager = CredentialsManager::new(RemoteApiConfig {
            url: "http://127.0.0.1:9".to_string(),
            username: None,
            password: None,
            serialno: None,
            jwt: Some("test-token".to_string()),
            timeout: 5,
        })
        .unwrap();

        let updater = Arc::new(
            CredentialsUpdater::start(Arc::new(manager), UpdaterSettings::default())
                .await
                .unwrap(),
        );
        let local_api = Arc::new(LocalApiClient::new(local_api_url, updater.clone(), 5).unwrap());

        AppState { updater, local_api }
    }

    fn create_test_app(state: AppState) -> Router {
        Router::new()
            .merge(health_routes())
            .merge(proxy_routes(state))
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_handler() {
        let value = health_handler().await.0;

        assert_eq!(value["status"], "pass");
        assert_eq!(value["message"], "flux capacitor is fluxing");
        assert_eq!(value["version"], VERSION);
    }

    #[tokio::test]
    async fn test_proxy_injects_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/production.json")
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"production": []}"#)
            .create_async()
            .await;

        let app = create_test_app(create_test_state(&server.url()).await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/production.json")
                    .header("authorization", "Bearer client-supplied")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert_eq!(body_string(response).await, r#"{"production": []}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_proxy_forwards_method_query_and_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/ivp/meters")
            .match_query(Matcher::UrlEncoded("eid".into(), "704643328".into()))
            .match_header("x-custom", "kept")
            .match_body(r#"{"state": "enabled"}"#)
            .with_status(201)
            .create_async()
            .await;

        let app = create_test_app(create_test_state(&server.url()).await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/ivp/meters?eid=704643328")
                    .header("x-custom", "kept")
                    .body(Body::from(r#"{"state": "enabled"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_proxy_passes_upstream_errors_through() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/production/inverters")
            .with_status(401)
            .with_body("Unauthorized")
            .create_async()
            .await;

        let app = create_test_app(create_test_state(&server.url()).await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/production/inverters")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_string(response).await, "Unauthorized");
    }

    #[tokio::test]
    async fn test_health_route_is_not_proxied() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let app = create_test_app(create_test_state(&server.url()).await);
        let response = app
            .oneshot(Request::builder().uri("/_/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        mock.assert_async().await;
    }
}
