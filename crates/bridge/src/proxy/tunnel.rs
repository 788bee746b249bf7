//! TCP-over-HTTP tunnel.
//!
//! Performs a one-shot WebSocket-style handshake and thereafter treats
//! the upgraded stream as an opaque bidirectional byte pipe. No WebSocket
//! framing is spoken; the handshake headers exist solely to traverse
//! intermediaries (notably Cloud Run) that only allow bidirectional
//! streaming under the WebSocket upgrade path.

use crate::errors::BridgeError;
use crate::proxy::{pipe, RequestCancellation};
use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{CONNECTION, UPGRADE};
use axum::http::{Method, Response as HttpResponse, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use ring::digest;
use tokio::net::TcpStream;
use tracing::{debug, error};
use url::Url;

/// URL scheme selecting the tunnel path.
pub const TCP_SCHEME: &str = "tcp";

pub const SEC_WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";
pub const SEC_WEBSOCKET_ACCEPT: &str = "Sec-WebSocket-Accept";

/// RFC 6455 §1.3 handshake GUID.
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The RFC 6455 accept transform:
/// `base64(SHA-1(client_key ∥ WEBSOCKET_GUID))`.
pub fn accept_key(client_key: &str) -> String {
    let mut input = String::with_capacity(client_key.len() + WEBSOCKET_GUID.len());
    input.push_str(client_key);
    input.push_str(WEBSOCKET_GUID);
    // SHA-1 is what RFC 6455 prescribes for the handshake; it carries no
    // security here, the value only proves the server saw the request.
    let hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, input.as_bytes());
    BASE64_STANDARD.encode(hash.as_ref())
}

/// Validates a tunnel request: method GET, target scheme `tcp`, and a
/// non-empty `Sec-WebSocket-Key`. Returns the client key.
fn validate(req: &Request<Body>, target: &Url) -> Result<String, BridgeError> {
    if req.method() != Method::GET {
        return Err(BridgeError::BadRequest);
    }
    if target.scheme() != TCP_SCHEME {
        return Err(BridgeError::BadRequest);
    }
    match req
        .headers()
        .get(SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
    {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(BridgeError::BadRequest),
    }
}

/// Serves a tunnel request: answers the handshake with 101, hijacks the
/// upgraded connection, dials the target, and pipes bytes until either
/// side finishes or the request is cancelled.
pub async fn serve(mut req: Request<Body>, target: &Url) -> Response {
    let client_key = match validate(&req, target) {
        Ok(key) => key,
        Err(err) => return err.into_response(),
    };

    let Some(host) = target.host_str() else {
        return BridgeError::BadRequest.into_response();
    };
    let addr = match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let cancel = req
        .extensions()
        .get::<RequestCancellation>()
        .cloned()
        .unwrap_or_default();

    let Some(on_upgrade) = req.extensions_mut().remove::<OnUpgrade>() else {
        error!(target: "bridge.proxy.tcp", "connection does not support protocol upgrade");
        return BridgeError::Internal.into_response();
    };

    let accept = accept_key(&client_key);

    tokio::spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(err) => {
                error!(target: "bridge.proxy.tcp", error = %err, "failed to hijack connection");
                return;
            }
        };
        // TokioIo drains bytes hyper already buffered past the handshake
        // before reading the raw socket.
        let client = TokioIo::new(upgraded);

        let server = match TcpStream::connect(&addr).await {
            Ok(server) => server,
            Err(err) => {
                error!(
                    target: "bridge.proxy.tcp",
                    error = %err,
                    addr = %addr,
                    "failed to dial target"
                );
                // Dropping the hijacked connection closes the client side.
                return;
            }
        };

        debug!(target: "bridge.proxy.tcp", addr = %addr, "tunnel established");
        pipe::pipe(client, server, cancel.0).await;
        debug!(target: "bridge.proxy.tcp", addr = %addr, "tunnel closed");
    });

    match HttpResponse::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(UPGRADE, "websocket")
        .header(CONNECTION, "Upgrade")
        .header(SEC_WEBSOCKET_ACCEPT, accept)
        .body(Body::empty())
    {
        Ok(response) => response,
        Err(err) => {
            error!(target: "bridge.proxy.tcp", error = %err, "failed to assemble handshake response");
            BridgeError::Internal.into_response()
        }
    }
}
