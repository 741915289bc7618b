use std::net::SocketAddr;

use eyre::Result;
use http::HeaderName;

use crate::config::models::{
    AuthConfig, CircuitBreakerConfig, GatewayConfig, ServiceConfig, TransformConfig,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration, collecting every problem found.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.server.address) {
            errors.push(e);
        }

        if config.services.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "services".to_string(),
            });
        } else {
            let mut names: Vec<_> = config.services.keys().collect();
            names.sort();
            for name in names {
                if let Err(mut service_errors) =
                    Self::validate_service(name, &config.services[name])
                {
                    errors.append(&mut service_errors);
                }
            }
        }

        if let Err(mut auth_errors) = Self::validate_auth(&config.auth) {
            errors.append(&mut auth_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_service(name: &str, service: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if name.is_empty() || name.contains('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("service name '{name}'"),
                message: "Service names must be non-empty and contain no '/'".to_string(),
            });
        }

        if let Err(e) = Self::validate_url(&service.url, &format!("service '{name}' url")) {
            errors.push(e);
        }

        if service.timeout == 0 {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{name}' timeout"),
                message: "Timeout must be greater than 0 seconds".to_string(),
            });
        }

        if service.rate_limit == 0 {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{name}' rate_limit"),
                message: "Rate limit must be greater than 0".to_string(),
            });
        }

        if let Err(mut cb_errors) = Self::validate_circuit_breaker(name, &service.circuit_breaker)
        {
            errors.append(&mut cb_errors);
        }

        if let Some(transforms) = &service.transformations {
            let rules = [
                ("request", transforms.request.as_ref()),
                ("response", transforms.response.as_ref()),
            ];
            for (direction, rule) in rules
                .into_iter()
                .filter_map(|(direction, rule)| rule.map(|rule| (direction, rule)))
            {
                if let Err(mut rule_errors) = Self::validate_transform(name, direction, rule) {
                    errors.append(&mut rule_errors);
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }
                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }
                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn validate_circuit_breaker(
        name: &str,
        config: &CircuitBreakerConfig,
    ) -> Result<(), Vec<ValidationError>> {
        if !config.enabled {
            return Ok(());
        }

        let mut errors = Vec::new();
        if config.failure_threshold == 0 {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{name}' circuit_breaker.failure_threshold"),
                message: "Must be greater than 0 when the circuit breaker is enabled".to_string(),
            });
        }
        if config.half_open_success_threshold == 0 {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{name}' circuit_breaker.half_open_success_threshold"),
                message: "Must be greater than 0 when the circuit breaker is enabled".to_string(),
            });
        }
        if let Err(e) = humantime::parse_duration(&config.reset_timeout) {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{name}' circuit_breaker.reset_timeout"),
                message: format!("Invalid duration '{}': {e}", config.reset_timeout),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_transform(
        name: &str,
        direction: &str,
        rule: &TransformConfig,
    ) -> Result<(), Vec<ValidationError>> {
        let header_names = rule
            .header_to_body
            .keys()
            .map(|h| ("header_to_body", h))
            .chain(rule.body_to_header.values().map(|h| ("body_to_header", h)));

        let errors: Vec<_> = header_names
            .filter(|(_, header)| HeaderName::from_bytes(header.as_bytes()).is_err())
            .map(|(section, header)| ValidationError::InvalidField {
                field: format!("service '{name}' transformations.{direction}.{section}"),
                message: format!("'{header}' is not a valid HTTP header name"),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_auth(config: &AuthConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if config.enabled && config.jwt_secret.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "auth.jwt_secret".to_string(),
            });
        }
        if let Err(e) = humantime::parse_duration(&config.expiration) {
            errors.push(ValidationError::InvalidField {
                field: "auth.expiration".to_string(),
                message: format!("Invalid duration '{}': {e}", config.expiration),
            });
        }
        for user in &config.users {
            if user.username.is_empty() || user.password.is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: "auth.users".to_string(),
                    message: "Every user needs a non-empty username and password".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        errors
            .iter()
            .enumerate()
            .map(|(i, e)| format!("  {}. {e}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{ServiceConfig, TransformationConfig};

    fn valid_config() -> GatewayConfig {
        GatewayConfig::builder()
            .address("127.0.0.1:8080")
            .service("users", ServiceConfig::new("http://localhost:8081"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(GatewayConfigValidator::validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_invalid_listen_address() {
        let mut config = valid_config();
        config.server.address = "not-an-address".to_string();
        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("not-an-address"));
    }

    #[test]
    fn test_bad_service_url_scheme() {
        let mut config = valid_config();
        config
            .services
            .insert("ws".to_string(), ServiceConfig::new("ftp://files:21"));
        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("service 'ws' url"));
    }

    #[test]
    fn test_zero_rate_and_timeout_collected() {
        let mut config = valid_config();
        let users = config.services.get_mut("users").unwrap();
        users.rate_limit = 0;
        users.timeout = 0;
        let message = GatewayConfigValidator::validate(&config)
            .unwrap_err()
            .to_string();
        assert!(message.contains("rate_limit"));
        assert!(message.contains("timeout"));
    }

    #[test]
    fn test_breaker_checked_only_when_enabled() {
        let mut config = valid_config();
        let users = config.services.get_mut("users").unwrap();
        users.circuit_breaker.reset_timeout = "soon".to_string();
        assert!(GatewayConfigValidator::validate(&config).is_ok());

        config
            .services
            .get_mut("users")
            .unwrap()
            .circuit_breaker
            .enabled = true;
        let message = GatewayConfigValidator::validate(&config)
            .unwrap_err()
            .to_string();
        assert!(message.contains("reset_timeout"));
    }

    #[test]
    fn test_auth_enabled_requires_secret() {
        let mut config = valid_config();
        config.auth.enabled = true;
        let message = GatewayConfigValidator::validate(&config)
            .unwrap_err()
            .to_string();
        assert!(message.contains("auth.jwt_secret"));
    }

    #[test]
    fn test_invalid_transform_header_name() {
        let mut config = valid_config();
        let mut rule = TransformConfig::default();
        rule.body_to_header
            .insert("code".to_string(), "X Code".to_string());
        config.services.get_mut("users").unwrap().transformations = Some(TransformationConfig {
            request: None,
            response: Some(rule),
        });
        let message = GatewayConfigValidator::validate(&config)
            .unwrap_err()
            .to_string();
        assert!(message.contains("body_to_header"));
    }
}
