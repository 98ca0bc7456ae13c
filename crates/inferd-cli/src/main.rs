//! inferd server binary.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use inferd_core::config::SystemConfig;
use inferd_http::bootstrap::{ServerConfig, bootstrap};
use inferd_http::routes::create_router;

#[derive(Debug, Parser)]
#[command(name = "inferd", about = "Multi-tenant LLM inference server", version)]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Bind port.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// YAML system configuration (agents, functions, settings).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for downloaded model files.
    #[arg(long, default_value = "./models")]
    models_dir: PathBuf,

    /// Idle seconds before an unused engine is unloaded.
    #[arg(long, default_value_t = 300)]
    idle_timeout_seconds: u64,

    /// Log filter; overrides the config's `system.log_level`.
    #[arg(long)]
    log_level: Option<String>,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Skip the first-boot auto-setup (default engine + agent index).
    #[arg(long)]
    no_auto_setup: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let system = match &args.config {
        Some(path) => SystemConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SystemConfig::default(),
    };

    let directive = args
        .log_level
        .clone()
        .unwrap_or_else(|| system.system.log_level.clone());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));
    match &args.log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    let config = ServerConfig {
        host: args.host.clone(),
        port: args.port,
        models_dir: args.models_dir,
        idle_timeout: Duration::from_secs(args.idle_timeout_seconds),
        system,
        run_auto_setup: !args.no_auto_setup,
    };

    let context = bootstrap(config).await.context("bootstrapping server")?;
    let router = create_router(context.clone());

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "inferd listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    context.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
