use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;

use crate::{
    config::models::ProxySettings,
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
};

/// HTTP client adapter using Hyper with Rustls.
///
/// Responsibilities:
/// * Pools connections to backend services (idle timeout and size from `proxy.*`)
/// * Speaks plain `http` and `https` with native root certificates
/// * Sets the `Host` header from the outbound URI
/// * Converts between Hyper body and Axum body types
///
/// Timeouts, retries and circuit breaking live in the forwarder, not here.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    /// Create a client with default pool settings.
    pub fn new() -> Result<Self> {
        Self::with_settings(&ProxySettings::default())
    }

    pub fn with_settings(settings: &ProxySettings) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs
        http_connector.set_nodelay(true);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::debug!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(settings.idle_timeout))
            .pool_max_idle_per_host(settings.max_idle_per_host)
            .build::<_, AxumBody>(https_connector);

        tracing::info!(
            idle_timeout_secs = settings.idle_timeout,
            max_idle_per_host = settings.max_idle_per_host,
            "Created backend HTTP client"
        );
        Ok(Self { client })
    }

    fn host_header(req: &Request<AxumBody>) -> HttpClientResult<HeaderValue> {
        let host = req.uri().host().ok_or_else(|| {
            HttpClientError::InvalidRequest(format!("outgoing URI has no host: {}", req.uri()))
        })?;
        let value = match req.uri().port_u16() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        HeaderValue::from_str(&value).map_err(|e| HttpClientError::InvalidRequest(e.to_string()))
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let host = Self::host_header(&req)?;
        req.headers_mut().insert(header::HOST, host);

        let method = req.method().clone();
        let uri = req.uri().clone();
        tracing::debug!(%method, %uri, "Sending backend request");

        match self.client.request(req).await {
            Ok(response) => {
                let (mut parts, hyper_body) = response.into_parts();
                // Axum re-frames the streamed body.
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Err(e) => {
                tracing::error!(%method, %uri, error = %e, "Backend request failed");
                Err(HttpClientError::ConnectionError(format!(
                    "Request to {method} {uri} failed: {e}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_client_creation() {
        assert!(HttpClientAdapter::new().is_ok());
    }

    #[test]
    fn test_host_header_includes_port() {
        let req = Request::builder()
            .uri("http://users:8081/api/users")
            .body(AxumBody::empty())
            .unwrap();
        assert_eq!(HttpClientAdapter::host_header(&req).unwrap(), "users:8081");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_connection_error() {
        let client = HttpClientAdapter::new().unwrap();
        let req = Request::builder()
            .uri("http://127.0.0.1:1/")
            .body(AxumBody::empty())
            .unwrap();
        let err = client.send_request(req).await.unwrap_err();
        assert!(matches!(err, HttpClientError::ConnectionError(_)));
    }

    #[tokio::test]
    async fn test_relative_uri_rejected() {
        let client = HttpClientAdapter::new().unwrap();
        let req = Request::builder()
            .uri("/relative")
            .body(AxumBody::empty())
            .unwrap();
        let err = client.send_request(req).await.unwrap_err();
        assert!(matches!(err, HttpClientError::InvalidRequest(_)));
    }
}
