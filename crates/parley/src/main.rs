use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parley::config::Config;
use parley::responder;
use parley::runtime::{BotRuntime, RuntimeConfig};
use parley::server::{self, AppState};
use parley::store::FileCredentialStore;
use parley::transport::SubprocessTransport;

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Parser)]
#[command(name = "parley", version, about = "Chat transport bridge with debounced AI auto-replies")]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, default_value = "parley.yaml")]
    config: PathBuf,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// Do not start a session at startup; wait for POST /api/v1/session/initialize
    #[arg(long)]
    no_auto_init: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .await
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    let level = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if cli.no_auto_init {
        config.connection.auto_init = false;
    }

    let credentials = Arc::new(FileCredentialStore::new(&config.transport.session_dir));
    let transport = Arc::new(SubprocessTransport::new(
        config.transport.command.clone(),
        config.transport.args.clone(),
        config.transport.ack_timeout(),
    ));
    let responder = responder::build(&config.responder).context("building responder")?;

    let (bot, runtime_task) = BotRuntime::spawn(
        RuntimeConfig::from_config(&config),
        transport,
        credentials,
        responder,
    );

    if config.server.admin_token.is_none() {
        warn!("No admin token configured, control API is open");
    }
    let state = AppState {
        bot: bot.clone(),
        admin_token: config.server.admin_token.as_deref().map(Arc::from),
    };
    let app = server::build_app(state, config.server.request_timeout_seconds);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!(%addr, "Control API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("control API server exited")?;

    info!("Shutting down");
    if let Err(e) = bot.shutdown().await {
        warn!(error = %e, "Runtime already stopped");
    }
    if let Err(e) = runtime_task.await {
        warn!(error = %e, "Runtime task failed");
    }
    Ok(())
}

/// Completes on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
