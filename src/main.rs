use std::{net::SocketAddr, path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use gatehouse::{
    GatewayService, HttpClientAdapter, HttpHandler, PrometheusMetrics,
    config::{GatewayConfigValidator, load_config},
    tracing_setup,
    utils::{GracefulShutdown, ShutdownReason},
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "gatehouse.yaml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "gatehouse.yaml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "gatehouse.yaml")]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "gatehouse.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let config = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    GatewayConfigValidator::validate(&config)
        .map_err(|e| eyre!("Invalid configuration in {config_path}:\n{e}"))?;

    tracing_setup::init_tracing(&config.log_level, config.log_format)
        .context("Failed to initialize tracing")?;

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::warn!(
            "CryptoProvider::install_default for aws-lc-rs reported an error: {:?}. \
            A provider was most likely installed already.",
            e
        );
    }

    let addr: SocketAddr = config
        .server
        .address
        .parse()
        .context("Failed to parse listen address")?;

    let gateway = Arc::new(
        GatewayService::new(Arc::new(config)).context("Failed to build gateway service")?,
    );
    let http_client = Arc::new(
        HttpClientAdapter::with_settings(&gateway.config().proxy)
            .context("Failed to create HTTP client adapter")?,
    );
    let metrics = Arc::new(PrometheusMetrics::new().context("Failed to create metrics registry")?);

    for descriptor in gateway.registry().iter() {
        tracing::info!(
            service = %descriptor.name,
            url = %descriptor.base_url,
            rate_limit = descriptor.rate_limit,
            authentication = descriptor.authentication,
            circuit_breaker = descriptor.circuit_breaker.enabled,
            "Configured service"
        );
    }

    let app = HttpHandler::new(gateway.clone(), http_client, metrics).router();

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        signal_handler_shutdown.run_signal_handler().await;
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    tracing::info!(
        "Gatehouse API gateway listening on {} (services: {}, auth: {})",
        addr,
        gateway.registry().len(),
        gateway.auth().is_enabled()
    );

    let drain_signal = graceful_shutdown.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        drain_signal.wait_for_shutdown_signal().await;
    });

    let mut server = std::pin::pin!(server.into_future());
    tokio::select! {
        result = &mut server => {
            result.context("Server error")?;
        }
        _ = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!(
                "Draining in-flight requests (timeout {:?})",
                graceful_shutdown.shutdown_timeout()
            );
            match tokio::time::timeout(graceful_shutdown.shutdown_timeout(), &mut server).await {
                Ok(result) => result.context("Server error")?,
                Err(_) => {
                    tracing::warn!(
                        reason = ?ShutdownReason::Force,
                        "Drain timeout exceeded, dropping remaining connections"
                    );
                }
            }
        }
    }

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match GatewayConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.server.address);
            println!("   • Services: {}", config.services.len());
            println!("   • Authentication: {}", config.auth.enabled);
            let mut names: Vec<_> = config.services.keys().collect();
            names.sort();
            for name in names {
                println!("     - {name} -> {}", config.services[name].url);
            }
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure all service URLs start with http:// or https://");
            println!("   • Verify listen address format (e.g., '127.0.0.1:8080')");
            println!("   • Use humantime durations such as '30s' or '24h'");
            println!("   • Set auth.jwt_secret when auth is enabled");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Gatehouse API Gateway Configuration
log_level: info
log_format: json

server:
  address: "127.0.0.1:8080"

auth:
  enabled: false
  # Override with GATEHOUSE__AUTH__JWT_SECRET
  jwt_secret: "change-me"
  expiration: "24h"
  users:
    - username: admin
      password: admin
      roles: ["admin"]

services:
  users:
    url: "http://localhost:8081"
    timeout: 30
    rate_limit: 100
    authentication: false
    circuit_breaker:
      enabled: true
      failure_threshold: 5
      reset_timeout: "30s"
      half_open_success_threshold: 2
  # orders:
  #   url: "http://localhost:8082"
  #   authentication: true
  #   authorization:
  #     roles: ["admin"]
  #   transformations:
  #     request:
  #       field_mapping:
  #         userName: user_name
  #     response:
  #       body_to_header:
  #         status: X-Order-Status
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'gatehouse serve --config {config_path}' to start the server");
    Ok(())
}
