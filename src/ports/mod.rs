//! Ports (interfaces) the core depends on; adapters provide the implementations.
pub mod http_client;
pub mod metrics;
