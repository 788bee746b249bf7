//! TCP tunnel tests: handshake verification, echo round-trip, EOF
//! propagation, and scheme-based dispatch.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use bridge::proxy::tunnel::accept_key;
use bridge::proxy::TARGET_URL_HEADER;
use bridge_test_utils::echo::{spawn_echo_server, write_frame};
use bridge_test_utils::harness::TestBridge;
use bridge_test_utils::keyset::StaticKeySet;
use bridge_test_utils::token::{TestKeyPair, TokenBuilder};
use bridge_test_utils::tunnel::TunnelDialer;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

const AUTHORIZATION_HEADER: &str = "X-Bridge-Authorization";

struct TunnelSetup {
    bridge: TestBridge,
    token: String,
    echo_addr: String,
}

async fn setup() -> Result<TunnelSetup> {
    let (echo_addr, _echo_handle) = spawn_echo_server().await?;
    let key = TestKeyPair::from_seed(1, "test-kid");
    let token = TokenBuilder::new("tenant-t").sign(&key);
    let bridge = TestBridge::spawn(
        Arc::new(StaticKeySet::new(key.jwk_set())),
        "tenant-t",
    )
    .await?;

    Ok(TunnelSetup {
        bridge,
        token,
        echo_addr: echo_addr.to_string(),
    })
}

fn dialer(setup: &TunnelSetup) -> Result<TunnelDialer> {
    Ok(TunnelDialer::new(Url::parse(&setup.bridge.url())?)
        .with_authorization(&format!("Bearer {}", setup.token)))
}

#[tokio::test]
async fn test_tunnel_echo_round_trip() -> Result<()> {
    let setup = setup().await?;
    let mut conn = dialer(&setup)?.dial(&setup.echo_addr).await?;

    let want = b"hello, world";
    write_frame(&mut conn, want).await?;

    let mut got = [0u8; 12];
    conn.read_exact(&mut got).await?;
    assert_eq!(&got, want);
    Ok(())
}

#[tokio::test]
async fn test_tunnel_eof_propagation() -> Result<()> {
    let setup = setup().await?;
    let mut conn = dialer(&setup)?.dial(&setup.echo_addr).await?;

    // The quit frame makes the echo server close its side; the tunnel
    // must propagate that EOF to the client.
    write_frame(&mut conn, b"q").await?;

    let mut buf = [0u8; 1];
    let n = conn.read(&mut buf).await?;
    assert_eq!(n, 0);
    Ok(())
}

#[tokio::test]
async fn test_tunnel_half_close_allows_draining() -> Result<()> {
    let setup = setup().await?;
    let mut conn = dialer(&setup)?.dial(&setup.echo_addr).await?;

    // Send a frame, then half-close the client's write side before
    // reading the echo. The response must still arrive.
    let want = b"drain me";
    write_frame(&mut conn, want).await?;
    conn.shutdown().await?;

    let mut got = [0u8; 8];
    conn.read_exact(&mut got).await?;
    assert_eq!(&got, want);
    Ok(())
}

#[tokio::test]
async fn test_handshake_response_headers() -> Result<()> {
    let setup = setup().await?;
    let addr = setup.bridge.addr();

    let mut conn = TcpStream::connect(addr).await?;
    let nonce = "dGhlIHNhbXBsZSBub25jZQ==";
    let request = format!(
        "GET /htproxy HTTP/1.1\r\n\
         Host: {}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Key: {}\r\n\
         X-Bridge-Target-URL: tcp://{}\r\n\
         {}: Bearer {}\r\n\
         \r\n",
        addr, nonce, setup.echo_addr, AUTHORIZATION_HEADER, setup.token
    );
    conn.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = conn.read(&mut chunk).await?;
        anyhow::ensure!(n > 0, "connection closed before handshake completed");
        buf.extend_from_slice(&chunk[..n]);
    }
    let head = String::from_utf8_lossy(&buf).to_lowercase();

    assert!(head.starts_with("http/1.1 101"), "unexpected head: {head}");
    assert!(head.contains("upgrade: websocket"));
    assert!(head.contains("connection: upgrade"));
    assert!(head.contains(&format!(
        "sec-websocket-accept: {}",
        accept_key(nonce).to_lowercase()
    )));
    Ok(())
}

#[tokio::test]
async fn test_tunnel_requires_websocket_key() -> Result<()> {
    let setup = setup().await?;

    let response = reqwest::Client::new()
        .get(format!("{}/htproxy", setup.bridge.url()))
        .header(AUTHORIZATION_HEADER, format!("Bearer {}", setup.token))
        .header(TARGET_URL_HEADER, format!("tcp://{}", setup.echo_addr))
        .send()
        .await?;

    assert_eq!(response.status(), 400);
    Ok(())
}

#[tokio::test]
async fn test_http_target_with_websocket_key_uses_http_proxy() -> Result<()> {
    let setup = setup().await?;

    // Spawn a plain HTTP target; a GET with an http:// target goes to the
    // HTTP reverse proxy even when a Sec-WebSocket-Key is present.
    let app = axum::Router::new().fallback(|| async { "from http target" });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let target_addr = listener.local_addr()?;
    let target_handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let response = reqwest::Client::new()
        .get(format!("{}/htproxy", setup.bridge.url()))
        .header(AUTHORIZATION_HEADER, format!("Bearer {}", setup.token))
        .header(TARGET_URL_HEADER, format!("http://{}/", target_addr))
        .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await?, "from http target");

    target_handle.abort();
    Ok(())
}

#[tokio::test]
async fn test_tunnel_to_unreachable_target_closes_client() -> Result<()> {
    let setup = setup().await?;

    // Reserve a port and release it so the dial is refused.
    let unreachable = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?.to_string()
    };

    // The handshake still succeeds (101 before the dial); the client then
    // observes the connection closing without any payload.
    let mut conn = dialer(&setup)?.dial(&unreachable).await?;
    let mut buf = [0u8; 1];
    let n = conn.read(&mut buf).await?;
    assert_eq!(n, 0);
    Ok(())
}
