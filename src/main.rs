//! visitguard - adaptive per-IPv4 rate limiting in front of an HTTP service.

use axum::Router;
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use visitguard::config::{Config, ConfigError, LogFormat};
use visitguard::runtime::GuardRuntime;
use visitguard::{http, metrics};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Resolves on SIGINT, SIGTERM, or an admin exit request.
async fn shutdown_signal(admin_exit: Arc<Notify>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
        _ = admin_exit.notified() => info!("Admin exit requested, initiating graceful shutdown"),
    }
}

/// Stand-in for the fronted application.
async fn healthz() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "visitguard.toml".to_string());

    // A missing config file means all defaults.
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => {
            eprintln!("failed to load config {config_path}: {e}");
            return Err(e.into());
        }
    };

    init_tracing(config.log.format);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!(path = %config_path, error = %e, "Invalid configuration");
        }
        return Err(ConfigError::Invalid(errors).into());
    }

    if config.http.metrics {
        metrics::init();
        info!("Metrics initialized");
    }

    let runtime = GuardRuntime::start(&config)?;

    let app = Router::new().route("/healthz", get(healthz));
    let router = http::router(runtime.app_state(), app, config.http.metrics);

    let listener = TcpListener::bind(config.http.listen).await?;
    info!(listen = %config.http.listen, "visitguard listening");

    let served = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(runtime.shutdown_requested()))
    .await;

    if let Err(e) = &served {
        error!(error = %e, "HTTP server error");
    }

    let report = runtime.close().await;
    info!(
        completed = report.completed,
        aborted = report.aborted,
        "visitguard stopped"
    );

    served?;
    Ok(())
}
