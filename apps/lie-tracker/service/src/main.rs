use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lie_tracker_service::build_router;
use lie_tracker_service::config::{Config, GapPolicyKind, LogFormat};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lie-tracker-service")]
#[command(about = "Shared lie counter with a per-user leaderboard")]
struct Cli {
    /// Listen address; overrides LIE_TRACKER_BIND_ADDR.
    #[arg(long)]
    bind_addr: Option<SocketAddr>,
    /// Static asset directory; overrides LIE_TRACKER_PUBLIC_DIR.
    #[arg(long)]
    public_dir: Option<PathBuf>,
    /// State file; overrides LIE_TRACKER_DATA_PATH.
    #[arg(long)]
    data_path: Option<PathBuf>,
    /// Gap policy; overrides LIE_TRACKER_GAP_POLICY. The workday window and zone
    /// still come from the environment.
    #[arg(long, value_enum)]
    gap_policy: Option<GapPolicyKind>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env().context("load configuration")?;
    apply_cli_overrides(&mut config, cli);

    init_tracing(&config)?;

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    let local_addr = listener.local_addr().context("resolve listen address")?;

    tracing::info!(
        target: "lie_tracker.http",
        addr = %local_addr,
        data_path = %config.data_path.display(),
        public_dir = %config.public_dir.display(),
        gap_policy = config.gap_policy().name(),
        "lie tracker listening",
    );

    axum::serve(listener, build_router(config))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve http")?;

    tracing::info!(target: "lie_tracker.http", "lie tracker stopped");
    Ok(())
}

fn apply_cli_overrides(config: &mut Config, cli: Cli) {
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(public_dir) = cli.public_dir {
        config.public_dir = public_dir;
    }
    if let Some(data_path) = cli.data_path {
        config.data_path = data_path;
    }
    if let Some(gap_policy_kind) = cli.gap_policy {
        config.gap_policy_kind = gap_policy_kind;
    }
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.log_filter)
        .with_context(|| format!("parse log filter '{}'", config.log_filter))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(target: "lie_tracker.http", error = %error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::warn!(target: "lie_tracker.http", error = %error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
