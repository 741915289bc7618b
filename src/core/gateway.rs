//! Core gateway orchestration service.
//!
//! The `GatewayService` aggregates the immutable configuration with the
//! per-service runtime state built from it at startup:
//! * the service registry (name -> descriptor)
//! * one rate limiter and one circuit breaker per service
//! * the auth gate
//!
//! This layer performs no I/O so it stays easy to test in isolation.
use std::sync::Arc;

use eyre::{Result, eyre};
use http::HeaderMap;

use crate::{
    config::GatewayConfig,
    core::{
        auth::{AuthGate, AuthenticatedUser},
        circuit_breaker::{CircuitBreaker, CircuitBreakerPool},
        error::GatewayError,
        rate_limiter::RateLimiterPool,
        registry::{ServiceDescriptor, ServiceRegistry},
    },
};

/// A service that passed admission, with its breaker and the verified caller.
pub struct AdmittedService {
    pub descriptor: Arc<ServiceDescriptor>,
    pub breaker: Arc<CircuitBreaker>,
    pub user: Option<AuthenticatedUser>,
}

/// Central orchestrator for service lookup, authorization and rate limiting.
///
/// Construct with [`GatewayService::new`]. Every limiter and breaker is created
/// here, once, and never replaced for the lifetime of the process.
pub struct GatewayService {
    config: Arc<GatewayConfig>,
    registry: ServiceRegistry,
    rate_limiters: RateLimiterPool,
    breakers: CircuitBreakerPool,
    auth: AuthGate,
}

impl GatewayService {
    pub fn new(config: Arc<GatewayConfig>) -> Result<Self> {
        let registry = ServiceRegistry::from_config(&config)?;
        let rate_limiters = RateLimiterPool::from_registry(&registry).map_err(|e| eyre!(e))?;
        let breakers = CircuitBreakerPool::from_registry(&registry);
        let auth = AuthGate::from_config(&config.auth)?;

        for service in registry.iter() {
            if service.retry_count > 0 {
                tracing::info!(
                    service = %service.name,
                    retry_count = service.retry_count,
                    "retry_count is advisory; requests are never retried"
                );
            }
        }

        Ok(Self {
            config,
            registry,
            rate_limiters,
            breakers,
            auth,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }

    pub fn rate_limiters(&self) -> &RateLimiterPool {
        &self.rate_limiters
    }

    pub fn breaker(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service)
    }

    /// Resolve, authenticate, authorize and rate limit a request for `service`.
    ///
    /// Resolution runs first so an unknown name is a 404 whether or not the
    /// caller holds a token. The circuit breaker is consulted by whoever
    /// performs the backend call.
    pub fn admit(
        &self,
        service: &str,
        headers: &HeaderMap,
    ) -> Result<AdmittedService, GatewayError> {
        let descriptor = self.registry.resolve(service)?;
        let user = self.auth.authenticate(headers).map_err(|e| {
            tracing::warn!(service = %descriptor.name, error = %e, "Authentication failed");
            GatewayError::from(e)
        })?;
        self.auth.authorize(&descriptor, user.as_ref())?;
        self.rate_limiters.check(&descriptor.name)?;
        let breaker = self
            .breakers
            .get(&descriptor.name)
            .ok_or_else(|| GatewayError::Internal(format!("no breaker for '{service}'")))?;
        Ok(AdmittedService {
            descriptor,
            breaker,
            user,
        })
    }
}
