//! Axum routes for the gateway: health, metrics, login and the three `/api`
//! route families (REST proxy, GraphQL, WebSocket relay).
use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, FromRequestParts, Path, Request, State, ws::WebSocketUpgrade},
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get, post},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::{
    adapters::{
        middleware::{
            CorsHeaders, MetricsContext, RequestId, cors_middleware, metrics_middleware,
            panic_response, request_id_middleware, request_timing_middleware,
        },
        websocket,
    },
    core::{ForwardRequest, Forwarder, GatewayError, GatewayService},
    ports::{http_client::HttpClient, metrics::MetricsRecorder},
};

/// HTTP handler for the Gatehouse API gateway. Cheap to clone; used as router state.
#[derive(Clone)]
pub struct HttpHandler {
    gateway: Arc<GatewayService>,
    forwarder: Forwarder,
    metrics: Arc<dyn MetricsRecorder>,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlRequest {
    query: String,
    #[serde(rename = "operationName", default)]
    operation_name: Option<String>,
    #[serde(default)]
    variables: Option<Map<String, Value>>,
}

impl GraphQlRequest {
    fn to_body(&self) -> Result<Vec<u8>, GatewayError> {
        let mut body = Map::new();
        body.insert("query".to_string(), Value::String(self.query.clone()));
        if let Some(name) = self.operation_name.as_ref().filter(|n| !n.is_empty()) {
            body.insert("operationName".to_string(), Value::String(name.clone()));
        }
        if let Some(vars) = self.variables.as_ref().filter(|v| !v.is_empty()) {
            body.insert("variables".to_string(), Value::Object(vars.clone()));
        }
        serde_json::to_vec(&body).map_err(|e| GatewayError::Internal(e.to_string()))
    }
}

impl HttpHandler {
    pub fn new(
        gateway: Arc<GatewayService>,
        http_client: Arc<dyn HttpClient>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            gateway,
            forwarder: Forwarder::new(http_client),
            metrics,
        }
    }

    pub fn gateway(&self) -> &Arc<GatewayService> {
        &self.gateway
    }

    /// Build the complete application router with all middleware attached.
    pub fn router(self) -> Router {
        let gateway = self.gateway.clone();
        let cors = Arc::new(CorsHeaders::from_config(&gateway.config().cors));
        let metrics_ctx = MetricsContext {
            gateway: gateway.clone(),
            recorder: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/auth/login", post(login_handler))
            .route("/api/graphql/{service}", post(graphql_handler))
            .route("/api/ws/{service}", get(websocket_handler))
            .route("/api/ws/{service}/{*path}", get(websocket_handler))
            .route("/api/{service}", any(proxy_handler))
            .route("/api/{service}/{*path}", any(proxy_handler))
            .fallback(not_found_handler)
            .with_state(self)
            .layer(middleware::from_fn_with_state(cors, cors_middleware))
            .layer(middleware::from_fn_with_state(metrics_ctx, metrics_middleware))
            .layer(middleware::from_fn(request_timing_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(middleware::from_fn(request_id_middleware))
    }
}

fn client_ip(req: &Request) -> Option<std::net::IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn service_param(params: &HashMap<String, String>) -> &str {
    params.get("service").map(String::as_str).unwrap_or_default()
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics_handler(State(handler): State<HttpHandler>) -> Response {
    match handler.metrics.render() {
        Ok(text) => (
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )],
            text,
        )
            .into_response(),
        Err(e) => GatewayError::Internal(format!("{e:#}")).into_response(),
    }
}

async fn not_found_handler() -> Response {
    GatewayError::ServiceNotFound.into_response()
}

async fn login_handler(State(handler): State<HttpHandler>, body: Bytes) -> Response {
    let login: LoginRequest = match serde_json::from_slice(&body) {
        Ok(login) => login,
        Err(_) => return GatewayError::BadRequest("invalid request".to_string()).into_response(),
    };
    if login.username.is_empty() || login.password.is_empty() {
        return GatewayError::BadRequest("username and password required".to_string())
            .into_response();
    }

    match handler
        .gateway
        .auth()
        .login(&login.username, &login.password)
    {
        Ok(issued) => {
            tracing::info!(user = %issued.user, "Issued token");
            (StatusCode::OK, Json(issued)).into_response()
        }
        Err(e) => {
            tracing::warn!(user = %login.username, error = %e, "Login rejected");
            GatewayError::from(e).into_response()
        }
    }
}

async fn proxy_handler(
    State(handler): State<HttpHandler>,
    Path(params): Path<HashMap<String, String>>,
    req: Request,
) -> Response {
    let service = service_param(&params);
    let admitted = match handler.gateway.admit(service, req.headers()) {
        Ok(admitted) => admitted,
        Err(e) => return e.into_response(),
    };

    let client_ip = client_ip(&req);
    let request_id = req.extensions().get::<RequestId>().map(|id| id.0.clone());
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let forward = ForwardRequest {
        method: parts.method,
        path_and_query,
        headers: parts.headers,
        body,
        client_ip,
        request_id,
        apply_transforms: true,
    };

    match handler
        .forwarder
        .forward(&admitted.descriptor, &admitted.breaker, forward)
        .await
    {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn graphql_handler(
    State(handler): State<HttpHandler>,
    Path(params): Path<HashMap<String, String>>,
    req: Request,
) -> Response {
    let service = service_param(&params);
    let admitted = match handler.gateway.admit(service, req.headers()) {
        Ok(admitted) => admitted,
        Err(e) => return e.into_response(),
    };

    let client_ip = client_ip(&req);
    let request_id = req.extensions().get::<RequestId>().map(|id| id.0.clone());
    let (parts, body) = req.into_parts();

    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => return GatewayError::BadRequest(e.to_string()).into_response(),
    };
    let body = match serde_json::from_slice::<GraphQlRequest>(&bytes)
        .map_err(|_| GatewayError::BadRequest("invalid GraphQL request".to_string()))
        .and_then(|request| request.to_body())
    {
        Ok(body) => body,
        Err(e) => return e.into_response(),
    };

    let mut headers = parts.headers;
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.remove(header::CONTENT_LENGTH);

    let forward = ForwardRequest {
        method: http::Method::POST,
        path_and_query: "/graphql".to_string(),
        headers,
        body: body.into(),
        client_ip,
        request_id,
        apply_transforms: false,
    };

    match handler
        .forwarder
        .forward(&admitted.descriptor, &admitted.breaker, forward)
        .await
    {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn websocket_handler(
    State(handler): State<HttpHandler>,
    Path(params): Path<HashMap<String, String>>,
    req: Request,
) -> Response {
    let service = service_param(&params);
    let admitted = match handler.gateway.admit(service, req.headers()) {
        Ok(admitted) => admitted,
        Err(e) => return e.into_response(),
    };
    let backend_url = match websocket::backend_ws_url(
        &admitted.descriptor,
        req.uri().path(),
        req.uri().query(),
    ) {
        Ok(url) => url,
        Err(e) => return GatewayError::Internal(e).into_response(),
    };

    let (mut parts, _body) = req.into_parts();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &handler).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::debug!(service = %service, "WebSocket upgrade rejected: {rejection}");
            return rejection.into_response();
        }
    };

    if !admitted.breaker.allow_request() {
        tracing::warn!(service = %service, "Circuit open, rejecting WebSocket upgrade");
        return GatewayError::CircuitOpen.into_response();
    }

    tracing::info!(
        service = %service,
        target = %backend_url,
        "WebSocket connection attempt"
    );

    let breaker = admitted.breaker.clone();
    let timeout = admitted.descriptor.timeout;
    let name = admitted.descriptor.name.clone();
    upgrade
        .on_failed_upgrade(|e| tracing::debug!("WebSocket upgrade failed: {e}"))
        .on_upgrade(move |socket| websocket::relay(socket, backend_url, timeout, breaker, name))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        adapters::HttpClientAdapter,
        config::models::{GatewayConfig, ServiceConfig},
        core::CircuitState,
        metrics::PrometheusMetrics,
        ports::{http_client::HttpClientResult, metrics::NoopMetrics},
    };

    struct PanickingClient;

    #[async_trait]
    impl HttpClient for PanickingClient {
        async fn send_request(&self, _req: Request) -> HttpClientResult<Response> {
            panic!("backend client exploded");
        }
    }

    fn build(
        config: GatewayConfig,
        client: Arc<dyn HttpClient>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Router {
        let gateway = Arc::new(GatewayService::new(Arc::new(config)).unwrap());
        HttpHandler::new(gateway, client, metrics).router()
    }

    fn app(config: GatewayConfig) -> Router {
        build(
            config,
            Arc::new(HttpClientAdapter::new().unwrap()),
            Arc::new(NoopMetrics),
        )
    }

    fn config() -> GatewayConfig {
        GatewayConfig::builder()
            .service("users", ServiceConfig::new("http://127.0.0.1:1"))
            .build()
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(config())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(json_body(response).await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_unknown_service_uniform_404() {
        let mut bodies = Vec::new();
        for (method, uri) in [
            ("GET", "/api/billing/invoices"),
            ("POST", "/api/graphql/billing"),
            ("GET", "/api/ws/billing/stream"),
        ] {
            let response = app(config())
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .body(Body::from("{\"query\":\"{ a }\"}"))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
            bodies.push(json_body(response).await);
        }
        assert!(bodies.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(bodies[0]["error"]["code"], "SERVICE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unknown_service_is_404_before_authentication() {
        let config = GatewayConfig::builder()
            .auth("secret")
            .service("users", ServiceConfig::new("http://127.0.0.1:1"))
            .build()
            .unwrap();
        let router = app(config);

        for (method, uri) in [
            ("GET", "/api/billing/invoices"),
            ("POST", "/api/graphql/billing"),
            ("GET", "/api/ws/billing/stream"),
        ] {
            let response = router
                .clone()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/users/me")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error_with_request_id() {
        let router = build(config(), Arc::new(PanickingClient), Arc::new(NoopMetrics));

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/users/profile")
                    .header("x-request-id", "req-boom")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["x-request-id"], "req-boom");
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body["error"]["message"], "internal server error");
    }

    #[tokio::test]
    async fn test_websocket_route_without_upgrade_does_not_probe_breaker() {
        let mut service = ServiceConfig::new("http://127.0.0.1:1");
        service.circuit_breaker.enabled = true;
        service.circuit_breaker.failure_threshold = 1;
        service.circuit_breaker.reset_timeout = "1ms".to_string();
        let config = GatewayConfig::builder()
            .service("chat", service)
            .build()
            .unwrap();
        let gateway = Arc::new(GatewayService::new(Arc::new(config)).unwrap());
        let breaker = gateway.breaker("chat").unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let router = HttpHandler::new(
            gateway,
            Arc::new(HttpClientAdapter::new().unwrap()),
            Arc::new(NoopMetrics),
        )
        .router();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/ws/chat/room")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_502() {
        let response = app(config())
            .oneshot(
                Request::builder()
                    .uri("/api/users/profile")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_login_requires_fields() {
        let response = app(config())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/login")
                    .body(Body::from(r#"{"username":"bob"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_exposes_counters() {
        let router = build(
            config(),
            Arc::new(HttpClientAdapter::new().unwrap()),
            Arc::new(PrometheusMetrics::new().unwrap()),
        );
        let _ = router
            .clone()
            .oneshot(Request::builder().uri("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let response = router
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = String::from_utf8(
            response.into_body().collect().await.unwrap().to_bytes().to_vec(),
        )
        .unwrap();
        let line = text
            .lines()
            .find(|l| l.starts_with("api_gateway_requests_total{"))
            .unwrap();
        assert!(line.contains(r#"service="unknown""#));
        assert!(line.contains(r#"status="404""#));
    }
}
