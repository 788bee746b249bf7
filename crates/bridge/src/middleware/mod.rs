//! Middleware plumbing for the proxy endpoint.
//!
//! The proxy endpoint is a plain tower service wrapped by an ordered list
//! of decorators. `use_middlewares` composes them so the first listed
//! middleware runs outermost, on both the inbound and outbound side.

pub mod auth;

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use std::convert::Infallible;
use tower::util::BoxCloneSyncService;

/// A boxed request handler, cloneable so every in-flight request gets its
/// own copy of the chain.
pub type BoxedHandler = BoxCloneSyncService<Request<Body>, Response, Infallible>;

/// A middleware decorates a handler with pre- and post-processing.
pub type Middleware = Box<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync>;

/// Wraps `handler` with `middlewares` such that the first listed runs
/// outermost: `[m1, m2, m3]` produces `m1(m2(m3(handler)))`.
pub fn use_middlewares(handler: BoxedHandler, middlewares: Vec<Middleware>) -> BoxedHandler {
    middlewares
        .into_iter()
        .rev()
        .fold(handler, |handler, middleware| middleware(handler))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use std::sync::{Arc, Mutex};
    use tower::{service_fn, ServiceExt};

    fn recording_middleware(log: Arc<Mutex<String>>, tag: &'static str) -> Middleware {
        Box::new(move |next: BoxedHandler| {
            let log = log.clone();
            BoxCloneSyncService::new(service_fn(move |req: Request<Body>| {
                let log = log.clone();
                let next = next.clone();
                async move {
                    log.lock().unwrap().push_str(tag);
                    let response = next.oneshot(req).await;
                    log.lock().unwrap().push_str(tag);
                    response
                }
            }))
        })
    }

    #[tokio::test]
    async fn test_use_middlewares_order() {
        let log = Arc::new(Mutex::new(String::new()));

        let handler_log = log.clone();
        let handler: BoxedHandler = BoxCloneSyncService::new(service_fn(move |_req| {
            let log = handler_log.clone();
            async move {
                log.lock().unwrap().push_str("handler");
                Ok::<Response, Infallible>(().into_response())
            }
        }));

        let chain = use_middlewares(
            handler,
            vec![
                recording_middleware(log.clone(), "A"),
                recording_middleware(log.clone(), "B"),
                recording_middleware(log.clone(), "C"),
            ],
        );

        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        chain.oneshot(req).await.unwrap();

        assert_eq!(*log.lock().unwrap(), "ABChandlerCBA");
    }

    #[tokio::test]
    async fn test_use_middlewares_empty_list_is_identity() {
        let handler: BoxedHandler = BoxCloneSyncService::new(service_fn(|_req| async {
            Ok::<Response, Infallible>(().into_response())
        }));

        let chain = use_middlewares(handler, Vec::new());
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = chain.oneshot(req).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
