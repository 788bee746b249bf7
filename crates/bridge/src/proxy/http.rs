//! HTTP reverse proxy.
//!
//! Rewrites the incoming request to the header-specified upstream URL and
//! forwards it, streaming both bodies. A forward that fails after the
//! client already went away is reported as 499 rather than 502; the
//! connection is gone either way, so the code only matters for logs.

use crate::errors::BridgeError;
use crate::proxy::{RequestCancellation, TARGET_URL_HEADER};
use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{HeaderMap, HeaderValue, CONNECTION, HOST, TE, TRANSFER_ENCODING, UPGRADE, USER_AGENT};
use axum::http::Response as HttpResponse;
use axum::response::{IntoResponse, Response};
use tracing::error;
use url::Url;

/// Hop-by-hop headers, not forwarded in either direction.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
];

pub struct HttpProxy {
    client: reqwest::Client,
}

impl HttpProxy {
    pub fn new() -> Self {
        // A proxy relays redirects to its caller instead of following them.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(
                    target: "bridge.proxy.http",
                    error = %e,
                    "failed to build HTTP client with custom config, using defaults"
                );
                reqwest::Client::new()
            });
        Self { client }
    }

    /// Forwards `req` to `target` and relays the upstream response.
    pub async fn forward(&self, req: Request<Body>, target: Url) -> Response {
        let cancel = req
            .extensions()
            .get::<RequestCancellation>()
            .cloned()
            .unwrap_or_default();

        let (mut parts, body) = req.into_parts();
        sanitize_request_headers(&mut parts.headers);

        let outbound = self
            .client
            .request(parts.method.clone(), target)
            .headers(parts.headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .build();
        let outbound = match outbound {
            Ok(outbound) => outbound,
            Err(err) => {
                error!(target: "bridge.proxy.http", error = %err, "failed to build upstream request");
                return BridgeError::BadGateway.into_response();
            }
        };

        tokio::select! {
            _ = cancel.0.cancelled() => BridgeError::ClientClosedRequest.into_response(),
            result = self.client.execute(outbound) => match result {
                Ok(upstream) => relay_response(upstream),
                Err(err) if cancel.0.is_cancelled() => {
                    // The client closed the connection before the error
                    // surfaced; 499 keeps the log distinguishable.
                    tracing::debug!(target: "bridge.proxy.http", error = %err, "forward aborted by client");
                    BridgeError::ClientClosedRequest.into_response()
                }
                Err(err) => {
                    error!(target: "bridge.proxy.http", error = %err, "unhandled error");
                    BridgeError::BadGateway.into_response()
                }
            },
        }
    }
}

impl Default for HttpProxy {
    fn default() -> Self {
        Self::new()
    }
}

/// Prepares the outgoing header set: the bridge's routing header and
/// hop-by-hop headers are dropped, `Host` is left for the transport to
/// derive from the target URL, and a missing `User-Agent` is pinned to
/// empty so the transport cannot inject its default.
fn sanitize_request_headers(headers: &mut HeaderMap) {
    headers.remove(TARGET_URL_HEADER);
    headers.remove(HOST);
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
    if !headers.contains_key(USER_AGENT) {
        headers.insert(USER_AGENT, HeaderValue::from_static(""));
    }
}

/// Relays status, headers and body of the upstream response, minus
/// hop-by-hop headers (the body is re-framed by this server).
fn relay_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    headers.remove(CONNECTION);
    headers.remove(TRANSFER_ENCODING);
    headers.remove(TE);
    headers.remove(UPGRADE);

    let mut builder = HttpResponse::builder().status(status);
    if let Some(out_headers) = builder.headers_mut() {
        *out_headers = headers;
    }
    match builder.body(Body::from_stream(upstream.bytes_stream())) {
        Ok(response) => response,
        Err(err) => {
            error!(target: "bridge.proxy.http", error = %err, "failed to assemble upstream response");
            BridgeError::BadGateway.into_response()
        }
    }
}
