use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use pinpoint_export_aws::PinpointEventsApi;
use pinpoint_export_core::config::Config;
use pinpoint_export_server::{app::build_app, state::AppState};

/// Upper bound on the final drain at shutdown.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// `pinpoint-export health`: liveness probe for container HEALTHCHECK.
///
/// Calls `GET http://localhost:$PINPOINT_EXPORT_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("PINPOINT_EXPORT_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{port}/health");
    match ureq::get(&url).timeout(Duration::from_secs(2)).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

/// JSON logs on stdout. `RUST_LOG` adds to the default `pinpoint_export=info`.
fn init_tracing() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("pinpoint_export=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler unavailable");
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
                warn!(error = %e, "SIGTERM handler unavailable");
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
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().nth(1).as_deref() == Some("health") {
        run_health_check();
    }
    init_tracing()?;

    // Missing credentials, region or application id stop startup here.
    let cfg = Config::from_env().context("invalid exporter configuration")?;
    info!(
        region = %cfg.aws_region,
        application_id = %cfg.application_id,
        upload_bytes = cfg.upload_bytes(),
        upload_seconds = cfg.upload_seconds,
        max_attempts = cfg.max_attempts,
        "Configuration loaded"
    );
    if !cfg.events_to_ignore.is_empty() {
        info!(events = ?cfg.events_to_ignore, "Ignoring configured events");
    }

    let api = PinpointEventsApi::connect(&cfg).await;
    let state = Arc::new(AppState::new(cfg.clone(), Arc::new(api)));

    let flush_loop = tokio::spawn(Arc::clone(&state).run_buffer_flush_loop());

    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(port = cfg.port, "pinpoint-export listening on {}", addr);

    axum::serve(listener, build_app(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // No interval flush may race the final drain.
    flush_loop.abort();
    info!("Shutting down, draining buffer");
    if tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, state.shutdown())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = SHUTDOWN_FLUSH_TIMEOUT.as_secs(),
            "Final flush did not complete before shutdown timeout"
        );
    }

    Ok(())
}
