//! Synchronous HTTP reverse proxying for one resolved service.
use std::{net::IpAddr, sync::Arc};

use axum::body::{Body, to_bytes};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, header};

use crate::{
    config::models::TransformConfig,
    core::{
        circuit_breaker::{CircuitBreaker, CircuitBreakerError},
        error::GatewayError,
        registry::ServiceDescriptor,
        transform,
    },
    ports::http_client::{HttpClient, HttpClientError},
};

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_GATEWAY_SERVICE: &str = "x-gateway-service";

/// Connection-scoped headers that must not cross the proxy.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Inbound request as seen by the forwarder.
pub struct ForwardRequest {
    pub method: Method,
    /// Path plus optional `?query`, appended verbatim to the service base url.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Body,
    pub client_ip: Option<IpAddr>,
    pub request_id: Option<String>,
    /// Apply the service's request/response transform rules.
    pub apply_transforms: bool,
}

/// Failures the breaker counts against a service.
enum UpstreamFailure {
    Transport(HttpClientError),
    Timeout,
    /// Backend answered with a 5xx; the response is still relayed to the client.
    Status(Response<Body>),
}

#[derive(Clone)]
pub struct Forwarder {
    client: Arc<dyn HttpClient>,
}

impl Forwarder {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    pub async fn forward(
        &self,
        service: &ServiceDescriptor,
        breaker: &CircuitBreaker,
        request: ForwardRequest,
    ) -> Result<Response<Body>, GatewayError> {
        let transform_enabled = request.apply_transforms;
        let outbound = self.build_outbound(service, request).await?;

        tracing::debug!(
            service = %service.name,
            method = %outbound.method(),
            uri = %outbound.uri(),
            "Proxying request"
        );

        let client = self.client.clone();
        let timeout = service.timeout;
        let result = breaker
            .execute(|| async move {
                let response = match tokio::time::timeout(timeout, client.send_request(outbound))
                    .await
                {
                    Err(_) => return Err(UpstreamFailure::Timeout),
                    Ok(Err(e)) => return Err(UpstreamFailure::Transport(e)),
                    Ok(Ok(response)) => response,
                };
                if response.status().is_server_error() {
                    Err(UpstreamFailure::Status(response))
                } else {
                    Ok(response)
                }
            })
            .await;

        let response = match result {
            Ok(response) => response,
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::warn!(service = %service.name, "Circuit open, rejecting request");
                return Err(GatewayError::CircuitOpen);
            }
            Err(CircuitBreakerError::Inner(UpstreamFailure::Status(response))) => {
                tracing::warn!(
                    service = %service.name,
                    status = response.status().as_u16(),
                    "Backend returned a server error"
                );
                response
            }
            Err(CircuitBreakerError::Inner(UpstreamFailure::Timeout)) => {
                tracing::error!(
                    service = %service.name,
                    timeout_secs = service.timeout.as_secs(),
                    "Backend request timed out"
                );
                return Err(GatewayError::BadGateway(format!(
                    "timed out after {:?}",
                    service.timeout
                )));
            }
            Err(CircuitBreakerError::Inner(UpstreamFailure::Transport(e))) => {
                tracing::error!(service = %service.name, error = %e, "Proxy error");
                return Err(GatewayError::BadGateway(e.to_string()));
            }
        };

        let rule = if transform_enabled {
            service.response_transform.as_ref()
        } else {
            None
        };
        self.build_client_response(service, response, rule).await
    }

    async fn build_outbound(
        &self,
        service: &ServiceDescriptor,
        request: ForwardRequest,
    ) -> Result<Request<Body>, GatewayError> {
        let ForwardRequest {
            method,
            path_and_query,
            mut headers,
            body,
            client_ip,
            request_id,
            apply_transforms,
        } = request;

        let uri = format!("{}{}", service.base(), path_and_query);

        let body = match service.request_transform.as_ref().filter(|_| apply_transforms) {
            Some(rule) => {
                let bytes = to_bytes(body, usize::MAX).await.map_err(|e| {
                    GatewayError::BadRequest(format!("failed to read request body: {e}"))
                })?;
                let rewritten = transform::transform_request(rule, &headers, bytes);
                headers.remove(header::CONTENT_LENGTH);
                Body::from(rewritten)
            }
            None => body,
        };

        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        if let Some(id) = request_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
            headers.insert(X_REQUEST_ID, id);
        }
        if let Some(ip) = client_ip {
            let forwarded = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) if !prior.is_empty() => format!("{prior}, {ip}"),
                _ => ip.to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }
        insert_service_header(&mut headers, &service.name);

        let mut outbound = Request::builder()
            .method(method)
            .uri(&uri)
            .body(body)
            .map_err(|e| GatewayError::Internal(format!("invalid outbound uri '{uri}': {e}")))?;
        *outbound.headers_mut() = headers;
        Ok(outbound)
    }

    async fn build_client_response(
        &self,
        service: &ServiceDescriptor,
        response: Response<Body>,
        rule: Option<&TransformConfig>,
    ) -> Result<Response<Body>, GatewayError> {
        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);

        let body = match rule {
            Some(rule) => {
                let bytes = to_bytes(body, usize::MAX).await.map_err(|e| {
                    GatewayError::BadGateway(format!("failed to read backend response: {e}"))
                })?;
                let transformed = transform::transform_response(rule, bytes);
                if transformed.rewritten {
                    parts.headers.remove(header::CONTENT_LENGTH);
                }
                for (name, value) in transformed.headers.iter() {
                    parts.headers.insert(name.clone(), value.clone());
                }
                Body::from(transformed.body)
            }
            None => body,
        };

        insert_service_header(&mut parts.headers, &service.name);
        tracing::debug!(
            service = %service.name,
            status = parts.status.as_u16(),
            "Received response"
        );
        Ok(Response::from_parts(parts, body))
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

fn insert_service_header(headers: &mut HeaderMap, service: &str) {
    if let Ok(value) = HeaderValue::from_str(service) {
        headers.insert(X_GATEWAY_SERVICE, value);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use async_trait::async_trait;
    use http_body_util::BodyExt;

    use http::StatusCode;

    use super::*;
    use crate::{
        config::models::{ServiceConfig, TransformationConfig},
        core::circuit_breaker::CircuitState,
        ports::http_client::HttpClientResult,
    };

    /// Captures the outbound request and replies with a canned response.
    struct StubClient {
        seen: Mutex<Option<(Method, String, HeaderMap, bytes::Bytes)>>,
        status: StatusCode,
        body: &'static str,
        fail: bool,
    }

    impl StubClient {
        fn replying(status: StatusCode, body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(None),
                status,
                body,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(None),
                status: StatusCode::OK,
                body: "",
                fail: true,
            })
        }
    }

    #[async_trait]
    impl HttpClient for StubClient {
        async fn send_request(&self, req: Request<Body>) -> HttpClientResult<Response<Body>> {
            if self.fail {
                return Err(HttpClientError::ConnectionError("connection refused".into()));
            }
            let (parts, body) = req.into_parts();
            let bytes = body.collect().await.unwrap().to_bytes();
            *self.seen.lock().unwrap() =
                Some((parts.method, parts.uri.to_string(), parts.headers, bytes));
            Ok(Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::CONNECTION, "keep-alive")
                .body(Body::from(self.body))
                .unwrap())
        }
    }

    fn descriptor(config: ServiceConfig) -> ServiceDescriptor {
        ServiceDescriptor::from_config("users", &config).unwrap()
    }

    fn request(body: &'static str) -> ForwardRequest {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("10.0.0.1"));
        ForwardRequest {
            method: Method::POST,
            path_and_query: "/api/users/profile?id=7".to_string(),
            headers,
            body: Body::from(body),
            client_ip: Some("192.168.1.20".parse().unwrap()),
            request_id: Some("req-1".to_string()),
            apply_transforms: true,
        }
    }

    #[tokio::test]
    async fn test_forward_sets_gateway_headers() {
        let stub = StubClient::replying(StatusCode::OK, r#"{"ok":true}"#);
        let forwarder = Forwarder::new(stub.clone());
        let service = descriptor(ServiceConfig::new("http://users:8081"));
        let breaker = CircuitBreaker::new("users", service.circuit_breaker.clone());

        let response = forwarder
            .forward(&service, &breaker, request(r#"{"a":1}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_GATEWAY_SERVICE], "users");
        assert!(response.headers().get(header::CONNECTION).is_none());

        let (method, uri, headers, body) = stub.seen.lock().unwrap().take().unwrap();
        assert_eq!(method, Method::POST);
        assert_eq!(uri, "http://users:8081/api/users/profile?id=7");
        assert_eq!(headers[X_REQUEST_ID], "req-1");
        assert_eq!(headers[X_FORWARDED_FOR], "10.0.0.1, 192.168.1.20");
        assert_eq!(headers[X_GATEWAY_SERVICE], "users");
        assert!(headers.get(header::CONNECTION).is_none());
        assert_eq!(&body[..], br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_forward_applies_transforms() {
        let stub = StubClient::replying(StatusCode::OK, r#"{"code":200,"data":"x"}"#);
        let forwarder = Forwarder::new(stub.clone());
        let mut config = ServiceConfig::new("http://users:8081");
        let mut request_rule = TransformConfig::default();
        request_rule.field_mapping.insert("a".into(), "b".into());
        let mut response_rule = TransformConfig::default();
        response_rule
            .body_to_header
            .insert("code".into(), "X-Code".into());
        config.transformations = Some(TransformationConfig {
            request: Some(request_rule),
            response: Some(response_rule),
        });
        let service = descriptor(config);
        let breaker = CircuitBreaker::new("users", service.circuit_breaker.clone());

        let response = forwarder
            .forward(&service, &breaker, request(r#"{"a":1}"#))
            .await
            .unwrap();
        assert_eq!(response.headers()["x-code"], "200");

        let (_, _, _, body) = stub.seen.lock().unwrap().take().unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(sent, serde_json::json!({"b": 1}));
    }

    #[tokio::test]
    async fn test_transport_failure_is_bad_gateway_and_trips_breaker() {
        let forwarder = Forwarder::new(StubClient::failing());
        let mut config = ServiceConfig::new("http://users:8081");
        config.circuit_breaker.enabled = true;
        config.circuit_breaker.failure_threshold = 2;
        config.circuit_breaker.reset_timeout = "1h".into();
        let service = descriptor(config);
        let breaker = CircuitBreaker::new("users", service.circuit_breaker.clone());

        for _ in 0..2 {
            let err = forwarder
                .forward(&service, &breaker, request("{}"))
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::BadGateway(_)));
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(
            forwarder
                .forward(&service, &breaker, request("{}"))
                .await
                .unwrap_err(),
            GatewayError::CircuitOpen
        );
    }

    #[tokio::test]
    async fn test_server_error_is_relayed_and_counted() {
        let stub = StubClient::replying(StatusCode::SERVICE_UNAVAILABLE, r#"{"down":true}"#);
        let forwarder = Forwarder::new(stub);
        let mut config = ServiceConfig::new("http://users:8081");
        config.circuit_breaker.enabled = true;
        let service = descriptor(config);
        let breaker = CircuitBreaker::new("users", service.circuit_breaker.clone());

        let response = forwarder
            .forward(&service, &breaker, request("{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(breaker.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_bad_gateway() {
        struct SlowClient;

        #[async_trait]
        impl HttpClient for SlowClient {
            async fn send_request(&self, _req: Request<Body>) -> HttpClientResult<Response<Body>> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Response::new(Body::empty()))
            }
        }

        let forwarder = Forwarder::new(Arc::new(SlowClient));
        let mut service = descriptor(ServiceConfig::new("http://users:8081"));
        service.timeout = Duration::from_millis(50);
        let breaker = CircuitBreaker::new("users", service.circuit_breaker.clone());

        let err = forwarder
            .forward(&service, &breaker, request("{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadGateway(_)));
    }
}
