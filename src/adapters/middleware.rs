//! Axum middleware used by the gateway router.
//!
//! These are lightweight composable layers attached to the `Router`: request id
//! propagation, request logging, CORS, metrics recording and panic rendering.
//! Apart from reading shared, immutable gateway state they are stateless.
use std::{
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::Instrument;

use crate::{
    config::models::CorsConfig,
    core::{GatewayError, GatewayService, forwarder::X_REQUEST_ID, registry::ServiceRegistry},
    ports::metrics::MetricsRecorder,
};

/// Correlation id of the current request, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Reuse an inbound `X-Request-ID` or generate a UUIDv4; expose it via tracing,
/// request extensions and the response header.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(request_id.clone()));

    let span = tracing::info_span!("request", request_id = %request_id);
    let mut response = next.run(req).instrument(span).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID, header_value);
    }

    response
}

/// Log completion of every request with status, client ip and latency.
pub async fn request_timing_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string());

    let response = next.run(req).await;

    tracing::info!(
        status = response.status().as_u16(),
        %method,
        %path,
        ip = %client_ip,
        latency_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Request processed"
    );

    response
}

/// Precomputed CORS header values.
#[derive(Debug, Clone)]
pub struct CorsHeaders {
    any_origin: bool,
    origins: Vec<HeaderValue>,
    methods: HeaderValue,
    headers: HeaderValue,
}

impl CorsHeaders {
    pub fn from_config(config: &CorsConfig) -> Self {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        let join = |items: &[String]| {
            HeaderValue::from_str(&items.join(", ")).unwrap_or(HeaderValue::from_static(""))
        };
        Self {
            any_origin: config.allowed_origins.iter().any(|o| o == "*"),
            origins,
            methods: join(&config.allowed_methods),
            headers: join(&config.allowed_headers),
        }
    }

    fn allow_origin(&self, request_origin: Option<&HeaderValue>) -> Option<HeaderValue> {
        if self.any_origin {
            return Some(HeaderValue::from_static("*"));
        }
        match request_origin {
            Some(origin) if self.origins.contains(origin) => Some(origin.clone()),
            _ => self.origins.first().cloned(),
        }
    }
}

/// Apply configured CORS headers; `OPTIONS` pre-flight requests end here with 204.
pub async fn cors_middleware(
    State(cors): State<Arc<CorsHeaders>>,
    req: Request,
    next: Next,
) -> Response {
    let origin = cors.allow_origin(req.headers().get("origin"));

    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    if let Some(origin) = origin {
        headers.insert("Access-Control-Allow-Origin", origin);
    }
    headers.insert("Access-Control-Allow-Methods", cors.methods.clone());
    headers.insert("Access-Control-Allow-Headers", cors.headers.clone());

    response
}

/// State for [`metrics_middleware`].
#[derive(Clone)]
pub struct MetricsContext {
    pub gateway: Arc<GatewayService>,
    pub recorder: Arc<dyn MetricsRecorder>,
}

/// Service label for a request path: the registered service name addressed by any
/// `/api` route family, otherwise `"unknown"`.
pub fn service_label(path: &str, registry: &ServiceRegistry) -> String {
    let mut segments = match path.strip_prefix("/api/") {
        Some(rest) => rest.split('/'),
        None => return "unknown".to_string(),
    };
    let first = segments.next().unwrap_or_default();
    let candidate = match (first, segments.next()) {
        ("graphql" | "ws", Some(second)) if !second.is_empty() => second,
        _ => first,
    };
    match registry.resolve(candidate) {
        Ok(descriptor) => descriptor.name.clone(),
        Err(_) => "unknown".to_string(),
    }
}

/// Record one observation per request through the metrics port.
pub async fn metrics_middleware(
    State(ctx): State<MetricsContext>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let service = service_label(req.uri().path(), ctx.gateway.registry());

    let response = next.run(req).await;

    ctx.recorder.record_request(
        &service,
        &method,
        response.status().as_u16(),
        start.elapsed(),
    );
    response
}

/// Render a caught panic as the uniform 500 body.
pub fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| err.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(panic = %detail, "Request panic recovered");
    GatewayError::Internal(detail).into_response()
}
