pub mod auth;
pub mod circuit_breaker;
pub mod error;
pub mod forwarder;
pub mod gateway;
pub mod rate_limiter;
pub mod registry;
pub mod transform;

pub use auth::{AuthGate, AuthenticatedUser, Claims};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use error::GatewayError;
pub use forwarder::{ForwardRequest, Forwarder};
pub use gateway::GatewayService;
pub use rate_limiter::RateLimiterPool;
pub use registry::{ServiceDescriptor, ServiceRegistry};
