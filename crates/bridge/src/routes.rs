//! HTTP routes for the bridge.
//!
//! The root mux exposes fixed liveness and discovery endpoints and mounts
//! the proxy endpoint behind the clock and auth middlewares. A separate
//! auxiliary listener on an ephemeral port answers any request with the
//! ready message; the control plane uses it to verify outbound
//! reachability and discovers its address through the root mux.

use crate::auth::KeySetProvider;
use crate::ctxtime;
use crate::middleware::auth::{self, AuthConfig};
use crate::middleware::{use_middlewares, Middleware};
use crate::proxy::{self, Proxy};
use axum::routing::get;
use axum::Router;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::error;

pub const OK_PATH: &str = "/ok";
pub const OK_MESSAGE: &str = "bridge is ready";
pub const PROXY_PATH: &str = "/htproxy";
pub const GET_CHECK_CONNECTION_SERVER_ADDR_PATH: &str = "/get_check_connection_server_addr";

/// Configuration for the root HTTP handler.
pub struct HandlerConfig {
    /// When non-empty, tokens whose tenant claim differs are rejected.
    pub expected_tenant_id: String,

    /// Source of the current public-key set.
    pub keys: Arc<dyn KeySetProvider>,

    /// Extra middlewares, run outside the clock and auth middlewares.
    pub middlewares: Vec<Middleware>,

    /// Externally observable address of the auxiliary listener.
    pub check_connection_server_addr: String,
}

/// Builds the root router.
pub fn build_router(config: HandlerConfig) -> Router {
    let auth_config = Arc::new(AuthConfig {
        expected_tenant_id: config.expected_tenant_id,
        keys: config.keys,
    });

    let mut middlewares = config.middlewares;
    middlewares.push(ctxtime::middleware());
    middlewares.push(auth::middleware(auth_config));
    let proxy_chain = use_middlewares(proxy::handler(Arc::new(Proxy::new())), middlewares);

    let check_connection_server_addr = config.check_connection_server_addr;

    Router::new()
        .route(OK_PATH, get(|| async { OK_MESSAGE }))
        .route(
            GET_CHECK_CONNECTION_SERVER_ADDR_PATH,
            get(move || {
                let addr = check_connection_server_addr.clone();
                async move { addr }
            }),
        )
        .route_service(PROXY_PATH, proxy_chain)
        .layer(TraceLayer::new_for_http())
}

/// Serves the auxiliary check-connection server on an ephemeral port.
///
/// The listener answers every request with the ready message and needs no
/// graceful shutdown; it exists only for reachability checks from the
/// control plane. Returns the bound address.
pub async fn serve_check_connection_server() -> io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", 0)).await?;
    let addr = listener.local_addr()?;

    let app = Router::new().fallback(|| async { OK_MESSAGE });
    let handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(
                target: "bridge.routes",
                error = %err,
                "check connection server failed"
            );
        }
    });

    Ok((addr, handle))
}
