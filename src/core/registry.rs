//! Immutable service name to descriptor lookup built once at startup.
use std::{collections::HashMap, sync::Arc, time::Duration};

use eyre::{Result, WrapErr};
use url::Url;

use crate::{
    config::models::{GatewayConfig, ServiceConfig, TransformConfig},
    core::error::GatewayError,
};

/// Parsed circuit breaker settings for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_success_threshold: u32,
}

/// Everything the pipeline needs to know about one backend service.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub base_url: Url,
    pub timeout: Duration,
    /// Carried for visibility only; requests are never retried.
    pub retry_count: u32,
    pub rate_limit: u32,
    pub authentication: bool,
    pub required_roles: Vec<String>,
    pub circuit_breaker: BreakerSettings,
    pub request_transform: Option<TransformConfig>,
    pub response_transform: Option<TransformConfig>,
}

impl ServiceDescriptor {
    pub fn from_config(name: &str, config: &ServiceConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)
            .wrap_err_with(|| format!("service '{name}' has an invalid url '{}'", config.url))?;
        let reset_timeout = humantime::parse_duration(&config.circuit_breaker.reset_timeout)
            .wrap_err_with(|| {
                format!(
                    "service '{name}' has an invalid circuit_breaker.reset_timeout '{}'",
                    config.circuit_breaker.reset_timeout
                )
            })?;
        let (request_transform, response_transform) = match &config.transformations {
            Some(t) => (t.request.clone(), t.response.clone()),
            None => (None, None),
        };

        Ok(Self {
            name: name.to_string(),
            base_url,
            timeout: Duration::from_secs(config.timeout),
            retry_count: config.retry_count,
            rate_limit: config.rate_limit,
            authentication: config.authentication,
            required_roles: config.authorization.roles.clone(),
            circuit_breaker: BreakerSettings {
                enabled: config.circuit_breaker.enabled,
                failure_threshold: config.circuit_breaker.failure_threshold,
                reset_timeout,
                half_open_success_threshold: config.circuit_breaker.half_open_success_threshold,
            },
            request_transform,
            response_transform,
        })
    }

    /// Base url without a trailing slash, ready for a path to be appended.
    pub fn base(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<ServiceDescriptor>>,
}

impl ServiceRegistry {
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let services = config
            .services
            .iter()
            .map(|(name, svc)| {
                ServiceDescriptor::from_config(name, svc).map(|d| (name.clone(), Arc::new(d)))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self { services })
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<ServiceDescriptor>, GatewayError> {
        self.services
            .get(name)
            .cloned()
            .ok_or(GatewayError::ServiceNotFound)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServiceDescriptor>> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
