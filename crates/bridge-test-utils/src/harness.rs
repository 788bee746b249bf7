//! Test server harness.
//!
//! Spawns a real bridge server (root router plus auxiliary listener) on
//! ephemeral loopback ports so integration tests exercise the same wiring
//! as production.

use anyhow::Result;
use bridge::auth::KeySetProvider;
use bridge::routes::{self, HandlerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A running bridge instance for tests.
pub struct TestBridge {
    addr: SocketAddr,
    check_connection_addr: SocketAddr,
    server_handle: JoinHandle<()>,
    check_connection_handle: JoinHandle<()>,
}

impl TestBridge {
    /// Spawns a bridge with the given key set and tenant binding.
    pub async fn spawn(keys: Arc<dyn KeySetProvider>, expected_tenant_id: &str) -> Result<Self> {
        let (check_connection_addr, check_connection_handle) =
            routes::serve_check_connection_server().await?;

        let app = routes::build_router(HandlerConfig {
            expected_tenant_id: expected_tenant_id.to_string(),
            keys,
            middlewares: Vec::new(),
            check_connection_server_addr: check_connection_addr.to_string(),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let server_handle = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                tracing::error!(error = %err, "test bridge server failed");
            }
        });

        Ok(Self {
            addr,
            check_connection_addr,
            server_handle,
            check_connection_handle,
        })
    }

    /// Base URL of the bridge.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Address of the auxiliary check-connection listener.
    pub fn check_connection_addr(&self) -> SocketAddr {
        self.check_connection_addr
    }
}

impl Drop for TestBridge {
    fn drop(&mut self) {
        self.server_handle.abort();
        self.check_connection_handle.abort();
    }
}
