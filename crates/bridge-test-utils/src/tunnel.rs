//! Client side of the bridge tunnel handshake.
//!
//! Connects to a running bridge, issues the upgrade request for a
//! `tcp://` target, verifies the 101 response including the accept key,
//! and hands back a byte stream. The response head is read with explicit
//! buffering, so any payload bytes that arrived with it are replayed
//! through a [`PrefixedStream`] before the raw socket is read.

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bridge::proxy::conn::PrefixedStream;
use bridge::proxy::tunnel::accept_key;
use bridge::routes::PROXY_PATH;
use ring::rand::{SecureRandom, SystemRandom};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

/// Upper bound on the handshake response head.
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// Returns a fresh 16-byte base64 nonce for `Sec-WebSocket-Key`.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    SystemRandom::new()
        .fill(&mut bytes)
        .expect("system randomness should be available");
    BASE64_STANDARD.encode(bytes)
}

/// Dials TCP targets through a bridge.
pub struct TunnelDialer {
    bridge_url: Url,
    authorization: Option<String>,
}

impl TunnelDialer {
    pub fn new(bridge_url: Url) -> Self {
        Self {
            bridge_url,
            authorization: None,
        }
    }

    /// Sets the `X-Bridge-Authorization` header value, e.g. `Bearer <jwt>`.
    pub fn with_authorization(mut self, value: &str) -> Self {
        self.authorization = Some(value.to_string());
        self
    }

    /// Opens a tunnel to `target_addr` (a `host:port`) and returns the
    /// established byte stream.
    pub async fn dial(&self, target_addr: &str) -> Result<PrefixedStream<TcpStream>> {
        let host = self
            .bridge_url
            .host_str()
            .context("bridge URL has no host")?;
        let port = self
            .bridge_url
            .port_or_known_default()
            .context("bridge URL has no port")?;

        let mut stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("failed to connect to bridge at {}:{}", host, port))?;

        let nonce = generate_nonce();
        let mut request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}:{}\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Key: {}\r\n\
             X-Bridge-Target-URL: tcp://{}\r\n",
            PROXY_PATH, host, port, nonce, target_addr
        );
        if let Some(authorization) = &self.authorization {
            request.push_str(&format!("X-Bridge-Authorization: {}\r\n", authorization));
        }
        request.push_str("\r\n");

        stream.write_all(request.as_bytes()).await?;

        let (head, leftover) = read_response_head(&mut stream).await?;
        verify_handshake(&head, &nonce)?;

        Ok(PrefixedStream::new(leftover, stream))
    }
}

/// Reads up to and including the blank line ending the response head.
/// Returns the head text and any bytes read past it.
async fn read_response_head(stream: &mut TcpStream) -> Result<(String, Vec<u8>)> {
    let mut buf = Vec::with_capacity(1024);
    loop {
        if buf.len() > MAX_RESPONSE_HEAD {
            bail!("handshake response head exceeds {} bytes", MAX_RESPONSE_HEAD);
        }

        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            bail!("connection closed during handshake");
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = find_head_end(&buf) {
            let head = String::from_utf8(buf[..end].to_vec())
                .context("handshake response head is not UTF-8")?;
            let leftover = buf[end..].to_vec();
            return Ok((head, leftover));
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn verify_handshake(head: &str, nonce: &str) -> Result<()> {
    let mut lines = head.lines();
    let status_line = lines.next().context("empty handshake response")?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .context("malformed status line")?;
    if status != "101" {
        bail!("expected 101 Switching Protocols, got {:?}", status_line);
    }

    let header = |name: &str| -> Result<String> {
        lines
            .clone()
            .find_map(|line| {
                let (key, value) = line.split_once(':')?;
                key.trim()
                    .eq_ignore_ascii_case(name)
                    .then(|| value.trim().to_string())
            })
            .ok_or_else(|| anyhow!("missing {} header in handshake response", name))
    };

    if !header("Upgrade")?.eq_ignore_ascii_case("websocket") {
        bail!("unexpected Upgrade header");
    }
    if !header("Connection")?.eq_ignore_ascii_case("upgrade") {
        bail!("unexpected Connection header");
    }
    let accept = header("Sec-WebSocket-Accept")?;
    if accept != accept_key(nonce) {
        bail!("Sec-WebSocket-Accept mismatch");
    }
    Ok(())
}
