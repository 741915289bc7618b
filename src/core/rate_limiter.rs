//! Per-service rate limiting built atop `governor`.
//!
//! Each service owns one direct (non-keyed) limiter whose burst equals its
//! configured rate. Governor's GCRA is equivalent to a token bucket refilling
//! continuously at `rate` tokens per second, capped at `rate`.
use std::{collections::HashMap, num::NonZeroU32, sync::Arc};

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};

use crate::core::{error::GatewayError, registry::ServiceRegistry};

pub type DirectRateLimiterImpl = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token bucket for a single service.
pub struct ServiceRateLimiter {
    limiter: DirectRateLimiterImpl,
    rate: NonZeroU32,
}

impl ServiceRateLimiter {
    /// Build a limiter admitting `rate` requests per second with a burst of `rate`.
    pub fn new(rate: u32) -> Result<Self, String> {
        let rate =
            NonZeroU32::new(rate).ok_or_else(|| "rate_limit must be greater than 0".to_string())?;
        let quota = Quota::per_second(rate).allow_burst(rate);
        Ok(Self {
            limiter: RateLimiter::direct(quota),
            rate,
        })
    }

    /// Non-blocking admission check.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    pub fn rate(&self) -> u32 {
        self.rate.get()
    }
}

/// One limiter per registered service, created once and never replaced.
#[derive(Clone, Default)]
pub struct RateLimiterPool {
    limiters: HashMap<String, Arc<ServiceRateLimiter>>,
}

impl RateLimiterPool {
    pub fn from_registry(registry: &ServiceRegistry) -> Result<Self, String> {
        let mut limiters = HashMap::with_capacity(registry.len());
        for descriptor in registry.iter() {
            let limiter = ServiceRateLimiter::new(descriptor.rate_limit)
                .map_err(|e| format!("service '{}': {e}", descriptor.name))?;
            tracing::info!(
                service = %descriptor.name,
                rate = descriptor.rate_limit,
                "Created rate limiter"
            );
            limiters.insert(descriptor.name.clone(), Arc::new(limiter));
        }
        Ok(Self { limiters })
    }

    /// Returns `false` when the service's bucket is empty. Unknown services are
    /// never admitted.
    pub fn try_acquire(&self, service: &str) -> bool {
        self.limiters
            .get(service)
            .is_some_and(|limiter| limiter.try_acquire())
    }

    /// Admission check mapped onto the gateway error taxonomy.
    pub fn check(&self, service: &str) -> Result<(), GatewayError> {
        if self.try_acquire(service) {
            Ok(())
        } else {
            tracing::warn!(service = %service, "Rate limit exceeded");
            Err(GatewayError::RateLimitExceeded)
        }
    }
}
