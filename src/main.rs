use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use xchain_router::build_daemon;

/// Cross-chain liquidity router daemon.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Options {
    /// Path to a config file (TOML/YAML/JSON, auto-detected by `config`).
    /// Overridden by `ROUTER__`-prefixed environment variables.
    #[arg(long, env = "ROUTER_CONFIG")]
    config: Option<PathBuf>,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_logging();

    if let Err(err) = run().await {
        tracing::error!("fatal error: {err:?}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

async fn run() -> eyre::Result<()> {
    let options = Options::parse();

    let config = xchain_router::config::load_config(options.config.as_deref())
        .map_err(|err| eyre::eyre!("configuration error: {err}"))?;

    let daemon = build_daemon(config)
        .await
        .map_err(|err| eyre::eyre!("failed to start daemon: {err}"))?;

    let admin_router = xchain_router::admin::router(daemon.admin_state.clone());
    let bind_address = daemon.admin_state.config.admin_bind_address.clone();
    daemon.shutdown.install_signal_handler();

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(%bind_address, "admin HTTP surface listening");

    axum::serve(listener, admin_router)
        .with_graceful_shutdown(async move {
            daemon.shutdown.await_shutdown_begin().await;
        })
        .await?;

    Ok(())
}
