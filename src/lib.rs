//! Gatehouse - an API gateway for a fleet of named backend services.
//!
//! Gatehouse exposes three route families under `/api`: a REST proxy
//! (`/api/{service}/...`), a GraphQL forwarder (`/api/graphql/{service}`) and a
//! WebSocket relay (`/api/ws/{service}/...`). Every forwarded call passes the same
//! admission pipeline: optional bearer-token authentication, service resolution,
//! role-based authorization, a per-service token bucket and a per-service circuit
//! breaker. JSON request and response bodies can be rewritten on the way through.
//!
//! # Features
//! - HS256 token issuance (`POST /auth/login`) and verification
//! - Per-service rate limiting via `governor`
//! - Closed / open / half-open circuit breaking with a configurable cool-down
//! - Declarative JSON field renames and header <-> body copies
//! - Prometheus exposition at `/metrics` and structured tracing via `tracing`
//! - Uniform JSON error bodies, request-id propagation and CORS
//! - Graceful shutdown
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use gatehouse::{GatewayService, HttpClientAdapter, HttpHandler, PrometheusMetrics};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = gatehouse::config::load_config("gatehouse.yaml").await?;
//! let gateway = Arc::new(GatewayService::new(Arc::new(cfg))?);
//! let client = Arc::new(HttpClientAdapter::with_settings(&gateway.config().proxy)?);
//! let app = HttpHandler::new(gateway, client, Arc::new(PrometheusMetrics::new()?)).router();
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(
//!     listener,
//!     app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
//! )
//! .await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! the admission pipeline inside `core`. The outbound HTTP client and the metrics sink are
//! ports so tests can substitute them.
//!
//! # Error Handling
//! Startup paths return `eyre::Result<T>`. Request handling maps every failure onto
//! [`core::GatewayError`], which renders as `{"error": {"code", "message"}}`.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler},
    core::GatewayService,
    metrics::PrometheusMetrics,
    ports::{http_client::HttpClient, metrics::MetricsRecorder},
    utils::GracefulShutdown,
};
