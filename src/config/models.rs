//! Configuration data structures for Gatehouse.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files. They are
//! serde‑friendly and carry defaults so that minimal configs remain concise. The
//! builder is part of the public API so the gateway can be embedded and tested without
//! touching the filesystem.
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_rate_limit() -> u32 {
    100
}

/// Output format for the tracing subscriber.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Top level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
}

impl GatewayConfig {
    /// Create a new gateway configuration builder
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            server: ServerSettings::default(),
            cors: CorsConfig::default(),
            proxy: ProxySettings::default(),
            auth: AuthConfig::default(),
            services: HashMap::new(),
        }
    }
}

/// Listener settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Cross-origin settings applied to every response.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: ["Content-Type", "Authorization", "X-Request-ID"]
                .iter()
                .map(|h| h.to_string())
                .collect(),
        }
    }
}

/// Outbound connection pool settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProxySettings {
    /// Seconds an idle pooled backend connection is kept open
    pub idle_timeout: u64,
    /// Maximum idle connections kept per backend host
    pub max_idle_per_host: usize,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            idle_timeout: 90,
            max_idle_per_host: 32,
        }
    }
}

/// A statically configured login account.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserAccount {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Token authentication settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub jwt_secret: String,
    /// Token lifetime, parsed by humantime (e.g. "24h", "15m")
    pub expiration: String,
    pub issuer: String,
    /// Roles issued when `users` is empty and any credentials are accepted
    pub default_roles: Vec<String>,
    pub users: Vec<UserAccount>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jwt_secret: String::new(),
            expiration: "24h".to_string(),
            issuer: "gatehouse".to_string(),
            default_roles: vec!["user".to_string()],
            users: Vec::new(),
        }
    }
}

/// Per-service backend definition.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceConfig {
    pub url: String,
    /// Per-call response timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    /// Advisory only; the forwarder never retries
    #[serde(default)]
    pub retry_count: u32,
    /// Requests per second; the burst equals the rate
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default)]
    pub authentication: bool,
    #[serde(default)]
    pub authorization: AuthorizationConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub transformations: Option<TransformationConfig>,
}

impl ServiceConfig {
    /// A service with default settings pointing at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: default_timeout_secs(),
            retry_count: 0,
            rate_limit: default_rate_limit(),
            authentication: false,
            authorization: AuthorizationConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            transformations: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AuthorizationConfig {
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    /// Cool-down before a half-open probe, parsed by humantime (e.g. "30s")
    pub reset_timeout: String,
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: 5,
            reset_timeout: "30s".to_string(),
            half_open_success_threshold: 2,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TransformationConfig {
    #[serde(default)]
    pub request: Option<TransformConfig>,
    #[serde(default)]
    pub response: Option<TransformConfig>,
}

/// JSON body rewrite rules. Ordered maps keep rule application deterministic.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct TransformConfig {
    #[serde(default)]
    pub field_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub header_to_body: BTreeMap<String, String>,
    #[serde(default)]
    pub body_to_header: BTreeMap<String, String>,
}

/// Builder for GatewayConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Set the listen address
    pub fn address(mut self, addr: impl Into<String>) -> Self {
        self.config.server.address = addr.into();
        self
    }

    /// Enable token authentication with the given HMAC secret
    pub fn auth(mut self, secret: impl Into<String>) -> Self {
        self.config.auth.enabled = true;
        self.config.auth.jwt_secret = secret.into();
        self
    }

    /// Replace the whole auth section
    pub fn auth_config(mut self, auth: AuthConfig) -> Self {
        self.config.auth = auth;
        self
    }

    /// Add a service under `name`
    pub fn service(mut self, name: impl Into<String>, service: ServiceConfig) -> Self {
        self.config.services.insert(name.into(), service);
        self
    }

    /// Build the final GatewayConfig
    pub fn build(self) -> Result<GatewayConfig, String> {
        if self.config.services.is_empty() {
            return Err("At least one service must be configured".to_string());
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_defaults_from_minimal_entry() {
        let service: ServiceConfig =
            serde_json::from_str(r#"{"url": "http://users:8081"}"#).unwrap();
        assert_eq!(service.timeout, 30);
        assert_eq!(service.rate_limit, 100);
        assert_eq!(service.retry_count, 0);
        assert!(!service.circuit_breaker.enabled);
        assert!(service.transformations.is_none());
    }

    #[test]
    fn test_builder_requires_service() {
        assert!(GatewayConfig::builder().build().is_err());
        let cfg = GatewayConfig::builder()
            .address("0.0.0.0:9000")
            .service("users", ServiceConfig::new("http://localhost:8081"))
            .build()
            .unwrap();
        assert_eq!(cfg.server.address, "0.0.0.0:9000");
        assert!(cfg.services.contains_key("users"));
    }

    #[test]
    fn test_transform_config_from_json() {
        let cfg: TransformConfig = serde_json::from_str(
            r#"{"field_mapping": {"a": "b"}, "body_to_header": {"code": "X-Code"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.field_mapping.get("a").map(String::as_str), Some("b"));
        assert!(cfg.header_to_body.is_empty());
    }
}
