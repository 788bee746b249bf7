//! Bidirectional byte piping with half-close.
//!
//! Two copiers run concurrently. When one direction reaches EOF or fails,
//! the destination's write side is shut down (propagating FIN) and the
//! source's read half is released, while the opposite direction keeps
//! draining. The pipe returns once both directions have finished;
//! cancellation drops both halves, closing the underlying sockets.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Pipes bytes between `client` and `server` until both directions
/// complete or `cancel` fires.
pub async fn pipe<A, B>(client: A, server: B, cancel: CancellationToken)
where
    A: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    B: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut server_read, mut server_write) = tokio::io::split(server);

    let upstream = async {
        let copied = tokio::io::copy(&mut client_read, &mut server_write).await;
        let _ = server_write.shutdown().await;
        drop(client_read);
        if let Ok(bytes) = copied {
            debug!(target: "bridge.proxy.tcp", bytes, "client to server copy finished");
        }
    };

    let downstream = async {
        let copied = tokio::io::copy(&mut server_read, &mut client_write).await;
        let _ = client_write.shutdown().await;
        drop(server_read);
        if let Ok(bytes) = copied {
            debug!(target: "bridge.proxy.tcp", bytes, "server to client copy finished");
        }
    };

    tokio::select! {
        _ = async { tokio::join!(upstream, downstream) } => {}
        _ = cancel.cancelled() => {
            debug!(target: "bridge.proxy.tcp", "tunnel cancelled");
        }
    }
}
