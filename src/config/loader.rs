use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Prefix for environment overrides, e.g. `GATEHOUSE__AUTH__JWT_SECRET`.
pub const ENV_PREFIX: &str = "GATEHOUSE";

/// Load configuration from a file using the config crate, overlaid with
/// `GATEHOUSE__*` environment variables.
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub async fn load_config(config_path: &str) -> Result<GatewayConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<GatewayConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml, // Default to YAML
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let gateway_config: GatewayConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(gateway_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_yaml_config() {
        let yaml_content = r#"
log_level: debug
server:
  address: "127.0.0.1:3000"
auth:
  enabled: true
  jwt_secret: "s3cret"
  expiration: "1h"
services:
  users:
    url: "http://users:8081"
    timeout: 5
    retry_count: 3
    rate_limit: 10
    authentication: true
    authorization:
      roles: ["admin", "ops"]
    circuit_breaker:
      enabled: true
      failure_threshold: 3
      reset_timeout: "10s"
      half_open_success_threshold: 1
    transformations:
      request:
        field_mapping:
          user_name: username
        header_to_body:
          X-Tenant: tenant
      response:
        body_to_header:
          code: X-Code
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.server.address, "127.0.0.1:3000");
        assert_eq!(config.log_level, "debug");
        assert!(config.auth.enabled);

        let users = config.services.get("users").unwrap();
        assert_eq!(users.timeout, 5);
        assert_eq!(users.retry_count, 3);
        assert_eq!(users.authorization.roles, vec!["admin", "ops"]);
        assert_eq!(users.circuit_breaker.failure_threshold, 3);

        let transforms = users.transformations.as_ref().unwrap();
        let request = transforms.request.as_ref().unwrap();
        assert_eq!(
            request.field_mapping.get("user_name").map(String::as_str),
            Some("username")
        );
        assert_eq!(
            request.header_to_body.get("X-Tenant").map(String::as_str),
            Some("tenant")
        );
        let response = transforms.response.as_ref().unwrap();
        assert_eq!(
            response.body_to_header.get("code").map(String::as_str),
            Some("X-Code")
        );
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let json_content = r#"
{
  "server": { "address": "127.0.0.1:3000" },
  "services": {
    "orders": { "url": "http://orders:8083" }
  }
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.server.address, "127.0.0.1:3000");
        assert_eq!(config.services.len(), 1);
        assert!(!config.auth.enabled);
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let result = load_config("/definitely/not/here/gatehouse.yaml").await;
        assert!(result.is_err());
    }
}
