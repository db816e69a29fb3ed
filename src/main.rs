//! Zentinel Deprecation Warnings - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_deprecation_warnings::server::WarningServer;
use zentinel_deprecation_warnings::settings::{Settings, SettingsRegistry};
use zentinel_deprecation_warnings::{WarningConfig, WarningPipeline};

#[derive(Parser, Debug)]
#[command(
    name = "zentinel-deprecation-warnings",
    about = "Request-scoped deprecation warnings for Zentinel",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "deprecation-warnings.yaml")]
    config: PathBuf,

    /// Path to a settings file served by the /_settings route
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long, default_value = "127.0.0.1:9200")]
    listen: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Enable metrics server
    #[arg(long)]
    metrics: bool,

    /// Metrics server port
    #[arg(long, default_value = "9090")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    // Load configuration
    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        WarningConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration");
        WarningConfig::default()
    };

    if args.validate {
        config.validate()?;
        println!("Configuration is valid");
        return Ok(());
    }

    let settings = match &args.settings {
        Some(path) => {
            info!(path = ?path, "Loading settings");
            Settings::from_yaml(&std::fs::read_to_string(path)?)?
        }
        None => Settings::new(),
    };
    let registry = SettingsRegistry::from_config(&config)?;
    let pipeline = Arc::new(WarningPipeline::new(config)?);

    if args.metrics {
        match pipeline.metrics() {
            Some(metrics) => {
                let metrics = Arc::clone(metrics);
                let address = SocketAddr::from(([0, 0, 0, 0], args.metrics_port));
                let listener = TcpListener::bind(address).await?;
                tokio::spawn(async move {
                    if let Err(e) = metrics.serve(listener).await {
                        error!(error = %e, "Metrics server stopped");
                    }
                });
            }
            None => warn!("--metrics given but metrics are disabled in configuration"),
        }
    }

    let listener = TcpListener::bind(args.listen).await?;
    info!(address = %args.listen, settings = settings.len(), "Serving deprecation warnings");

    let server = Arc::new(WarningServer::new(pipeline, settings, registry));
    tokio::select! {
        result = server.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
