//! Length-prefixed echo TCP server for tunnel tests.
//!
//! Frames are a one-byte length followed by that many bytes. Each frame
//! is echoed back verbatim; a frame containing `q` closes the connection
//! so EOF propagation can be observed.

use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Frame payload that makes the server close the connection.
pub const QUIT: &[u8] = b"q";

/// Spawns an echo server on an ephemeral loopback port.
pub async fn spawn_echo_server() -> io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        loop {
            let Ok((conn, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let _ = serve_echo(conn).await;
            });
        }
    });

    Ok((addr, handle))
}

async fn serve_echo(mut conn: TcpStream) -> io::Result<()> {
    loop {
        let mut size_buf = [0u8; 1];
        if conn.read_exact(&mut size_buf).await.is_err() {
            return Ok(()); // peer closed
        }

        let mut frame = vec![0u8; size_buf[0] as usize];
        conn.read_exact(&mut frame).await?;

        if frame == QUIT {
            return Ok(()); // dropping the connection closes it
        }

        conn.write_all(&frame).await?;
    }
}

/// Writes `payload` as a single frame.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(conn: &mut W, payload: &[u8]) -> io::Result<()> {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    conn.write_all(&frame).await
}
