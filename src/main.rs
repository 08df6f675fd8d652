//! pulsewire: binary entrypoint.
//! Loads config, starts the first worker generation and serves reloads until
//! SIGINT/SIGTERM. SIGHUP reloads the config.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use pulsewire::config::{self, DEFAULT_CONFIG_PATH, ENV_CONFIG_PATH};
use pulsewire::{telemetry, Supervisor};

#[derive(Debug, Parser)]
#[command(name = "pulsewire", version, about = "Poll sources, score and push relevant items")]
struct Cli {
    /// Path to the TOML config.
    #[arg(long, short, env = ENV_CONFIG_PATH, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; a missing file is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Read once up front so logging reflects the config before anything else runs.
    let cfg = config::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    telemetry::init_tracing(&cfg.logging).context("initializing tracing")?;
    if let Some(listen) = cfg.metrics.listen.as_deref().filter(|l| !l.trim().is_empty()) {
        telemetry::install_metrics_exporter(listen).context("starting metrics listener")?;
        info!(%listen, "prometheus listener up");
    }

    let supervisor = Supervisor::new(&cli.config);
    supervisor.start().context("starting workers")?;
    supervisor.run(shutdown_signal()).await;
    info!("bye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
