//! hangard - Hangar orchestrator daemon
//!
//! 起動の流れ:
//! 1. 設定を読み込む（デフォルト → ファイル → `HANGAR_` 環境変数 → CLI フラグ）
//! 2. tracing を初期化
//! 3. Orchestrator を構築（plan table が空なら起動しない）
//! 4. reconciler ループと HTTP サーバーを起動し、シグナルで graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use hangar_core::app::OrchestratorBuilder;
use hangar_core::impls::{DockerCli, InMemoryRuntime};
use hangar_core::ports::ContainerRuntime;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod error;
mod settings;

use settings::DaemonSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RuntimeChoice {
    /// `docker` CLI on the host
    Docker,
    /// In-process fake, nothing is started
    Memory,
}

#[derive(Parser)]
#[command(name = "hangard")]
#[command(about = "Hangar - multi-tenant app lifecycle orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HANGAR_CONFIG")]
    config: Option<String>,

    /// Listen address (overrides the config file)
    #[arg(short, long, env = "HANGAR_LISTEN_ADDR")]
    listen: Option<SocketAddr>,

    /// Container runtime backend
    #[arg(long, value_enum, env = "HANGAR_RUNTIME", default_value = "docker")]
    runtime: RuntimeChoice,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, env = "HANGAR_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "HANGAR_LOG_JSON")]
    json: bool,
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings =
        DaemonSettings::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(listen) = cli.listen {
        settings.server.listen_addr = listen;
    }
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }
    settings.logging.json |= cli.json;

    init_tracing(&settings.logging.level, settings.logging.json);

    let runtime: Arc<dyn ContainerRuntime> = match cli.runtime {
        RuntimeChoice::Docker => Arc::new(DockerCli::new()),
        RuntimeChoice::Memory => Arc::new(InMemoryRuntime::new()),
    };

    let orchestrator = OrchestratorBuilder::new(settings.orchestrator.clone())
        .runtime(runtime)
        .build()
        .context("refusing to start")?;
    let orchestrator = Arc::new(orchestrator);
    let loops = orchestrator.start();

    let addr = settings.server.listen_addr;
    let app = api::router(
        api::AppState::new(orchestrator.clone()),
        settings.server.max_body_bytes,
    );
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, runtime = ?cli.runtime, "hangard listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("hangard shutting down");
    loops.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received terminate signal"),
    }
}
