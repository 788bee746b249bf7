//! Request-scoped clock.
//!
//! Every proxied request carries a frozen "now" in its extensions so auth
//! validation is point-deterministic for the request and testable without
//! faking the global clock. Tests seed the value; the middleware stamps
//! the wall clock only when nothing is seeded.

use crate::middleware::{BoxedHandler, Middleware};
use axum::body::Body;
use axum::extract::Request;
use axum::http::Extensions;
use chrono::{DateTime, Utc};
use tower::util::BoxCloneSyncService;
use tower::{service_fn, ServiceExt};

/// The frozen request time, stored in request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTime(pub DateTime<Utc>);

/// Attaches `t` to the extensions as the frozen request time.
pub fn with_time(extensions: &mut Extensions, t: DateTime<Utc>) {
    extensions.insert(RequestTime(t));
}

/// Returns the frozen request time.
///
/// Panics when no time has been attached: the clock middleware runs ahead
/// of every consumer on the proxy endpoint, so absence is a wiring bug,
/// not a runtime condition.
pub fn now(extensions: &Extensions) -> DateTime<Utc> {
    match extensions.get::<RequestTime>() {
        Some(RequestTime(t)) => *t,
        None => panic!("request time missing: clock middleware must wrap this handler"),
    }
}

/// Middleware that freezes the request time.
///
/// A time already present on the incoming request (seeded by a test) is
/// preserved verbatim; otherwise the current wall-clock instant is
/// stamped in.
pub fn middleware() -> Middleware {
    Box::new(|next: BoxedHandler| {
        BoxCloneSyncService::new(service_fn(move |mut req: Request<Body>| {
            let next = next.clone();
            async move {
                if req.extensions().get::<RequestTime>().is_none() {
                    with_time(req.extensions_mut(), Utc::now());
                }
                next.oneshot(req).await
            }
        }))
    })
}
