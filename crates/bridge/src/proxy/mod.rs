//! Dual-mode reverse proxy.
//!
//! A single endpoint carries both HTTP and raw-TCP payloads: the target is
//! named by the `X-Bridge-Target-URL` header, and a `GET` with a `tcp://`
//! target is served as a WebSocket-handshake-framed byte tunnel while
//! everything else is reverse-proxied over HTTP.

pub mod conn;
pub mod http;
pub mod pipe;
pub mod tunnel;

use crate::errors::BridgeError;
use crate::middleware::BoxedHandler;
use axum::body::Body;
use axum::extract::Request;
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::service_fn;
use tower::util::BoxCloneSyncService;
use tracing::error;
use url::Url;

/// Header naming the absolute target URL of a proxied request. Deleted
/// from the outgoing copy.
pub const TARGET_URL_HEADER: &str = "X-Bridge-Target-URL";

/// Request-scoped cancellation, carried in request extensions.
///
/// The default token never fires; tests (and any front-end that can
/// observe client disconnects) seed and cancel it. A fired token maps the
/// HTTP forward to the 499 path and tears down a tunnel's copiers.
#[derive(Debug, Clone, Default)]
pub struct RequestCancellation(pub CancellationToken);

/// The dual-mode proxy: dispatches each request to the TCP tunnel or the
/// HTTP reverse proxy by method and target scheme.
pub struct Proxy {
    http: http::HttpProxy,
}

impl Proxy {
    pub fn new() -> Self {
        Self {
            http: http::HttpProxy::new(),
        }
    }

    pub async fn handle(&self, req: Request<Body>) -> Response {
        let raw_target = req
            .headers()
            .get(TARGET_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let target = match Url::parse(&raw_target) {
            Ok(target) => target,
            Err(err) => {
                error!(
                    target: "bridge.proxy",
                    error = %err,
                    target_url = %raw_target,
                    "unexpected target url format"
                );
                return BridgeError::BadGateway.into_response();
            }
        };

        // A GET with a tcp:// target is forwarded as a raw byte tunnel.
        if req.method() == Method::GET && target.scheme() == tunnel::TCP_SCHEME {
            return tunnel::serve(req, &target).await;
        }

        self.http.forward(req, target).await
    }
}

impl Default for Proxy {
    fn default() -> Self {
        Self::new()
    }
}

/// The proxy as a terminal handler for the middleware chain.
pub fn handler(proxy: Arc<Proxy>) -> BoxedHandler {
    BoxCloneSyncService::new(service_fn(move |req: Request<Body>| {
        let proxy = Arc::clone(&proxy);
        async move { Ok::<Response, Infallible>(proxy.handle(req).await) }
    }))
}
