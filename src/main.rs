// src/main.rs

use axum::serve;
use std::net::SocketAddr;
use tide_keypool::cli::{Cli, Commands};
use tide_keypool::{config, resolve_config_path, run, AppError};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!(signal = "Ctrl+C", "Received signal. Initiating graceful shutdown...") },
        () = terminate => { info!(signal = "Terminate", "Received signal. Initiating graceful shutdown...") },
    }
}

fn init_tracing(cli: &Cli) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);
    if cli.pretty_logs {
        registry.with(fmt::layer()).init();
    } else {
        registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(true))
            .init();
    }
}

fn check_config(file: Option<std::path::PathBuf>) -> Result<(), AppError> {
    let path = resolve_config_path(file);
    let config = config::load_config(&path)?;
    println!("Configuration OK: {}", path.display());
    for pool in &config.pools {
        println!(
            "  {}: {} keys, {} requests per key, {} ms cool-down",
            pool.name,
            pool.resolve_keys().len(),
            pool.max_requests_per_key,
            pool.cool_down_period_ms
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse_args();
    init_tracing(&cli);

    if let Some(Commands::CheckConfig { file }) = cli.command {
        return check_config(file.or(cli.config));
    }

    let (app, config) = run(cli.config.clone()).await.map_err(|e| {
        eprintln!("Application setup error: {e:?}");
        e
    })?;

    let port = cli.port.unwrap_or(config.server.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!(server.address = %addr, error = ?e, "Failed to bind to address. Exiting.");
        AppError::from(e)
    })?;
    info!(server.address = %addr, "Server listening");

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!(error = ?e, "Server run loop encountered an error. Exiting.");
            AppError::from(e)
        })?;

    info!("Server shut down gracefully.");
    Ok(())
}
