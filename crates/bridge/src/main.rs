//! Bridge entry point.
//!
//! Startup ordering: configuration, logging, the key-refresh worker, and
//! only once the worker signals readiness are the HTTP servers brought
//! up. A fatal cold fetch or a shutdown signal during the wait exits the
//! process with a non-zero status.

use bridge::config::Config;
use bridge::routes::{self, HandlerConfig};
use bridge::tasks::KeyRefreshWorker;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Budget for draining in-flight requests after a termination signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "bridge={},tower_http=info",
                    config.log_level.to_lowercase()
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        port = config.port,
        api_url = %config.api_url,
        fetch_interval = ?config.fetch_interval,
        fetch_timeout = ?config.fetch_timeout,
        tenant_id_enforced = !config.tenant_id.is_empty(),
        "configuration loaded"
    );

    let shutdown_token = CancellationToken::new();
    tokio::spawn(handle_signals(shutdown_token.clone()));

    let worker = Arc::new(KeyRefreshWorker::new(&config));
    let worker_handle = worker.start();

    info!("key refresh worker is started, waiting for ready...");
    worker.wait_ready(&shutdown_token).await?;
    info!("key refresh worker is ready");

    let (check_connection_addr, _check_connection_handle) =
        routes::serve_check_connection_server().await?;
    info!(addr = %check_connection_addr, "check connection server listening");

    let app = routes::build_router(HandlerConfig {
        expected_tenant_id: config.tenant_id.clone(),
        keys: worker.clone(),
        middlewares: Vec::new(),
        check_connection_server_addr: check_connection_addr.to_string(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "bridge http server listening");

    let graceful_token = shutdown_token.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful_token.cancelled().await })
        .into_future();

    let budget_token = shutdown_token.clone();
    tokio::select! {
        result = server => result?,
        _ = async {
            budget_token.cancelled().await;
            tokio::time::sleep(SHUTDOWN_TIMEOUT).await;
        } => {
            warn!("graceful shutdown budget exceeded, exiting");
        }
    }

    worker.stop();
    if let Err(err) = worker_handle.await {
        error!(error = %err, "key refresh worker task error");
    }

    info!("bridge shutdown complete");
    Ok(())
}

/// Cancels `token` on SIGINT or SIGTERM.
async fn handle_signals(token: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("received SIGINT, starting graceful shutdown..."),
            Err(err) => error!(error = %err, "failed to listen for SIGINT"),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("received SIGTERM, starting graceful shutdown...");
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    token.cancel();
}
