// drivethru-server: count vehicles through the drive-through stations

use anyhow::Context;
use clap::Parser;
use drivethru_core::LoggingConfig;
use drivethru_eye::{build_detector, DefaultSourceOpener};
use drivethru_server::{create_router, AppConfig, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "drivethru-server")]
#[command(about = "Drive-through vehicle counter", version)]
struct Args {
    /// Configuration file (toml, yaml or json)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(long, short)]
    port: Option<u16>,

    /// Log filter, e.g. `info` or `drivethru_eye=debug,info`
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    /// Detector model file
    #[arg(long)]
    model: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json = true;
        }
        if let Some(model) = &self.model {
            config.vision.detector.model_path = model.clone();
        }
    }
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("invalid log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    let result = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    args.apply(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    init_tracing(&config.logging)?;
    info!("Starting drivethru-server {}", env!("CARGO_PKG_VERSION"));

    for name in config.unmatched_cameras() {
        warn!("Camera {} has no station; its presence events are dropped", name);
    }

    let detector = build_detector(&config.vision.detector).context("loading detector")?;
    let state = AppState::new(&config, detector, Arc::new(DefaultSourceOpener))?;
    let registered = state.start_cameras(&config.cameras).await;
    info!("{} of {} cameras registered", registered, config.cameras.len());
    info!("{}", state.ring.snapshot());

    let app = create_router(state.clone());
    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("HTTP server failed")?;

    state.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("SIGTERM handler unavailable: {}", e);
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
