//! Test helpers for the egress bridge.
//!
//! Provides deterministic signing keys and token minting, a static
//! key-set provider, a length-prefixed echo TCP server, a tunnel dialer
//! speaking the client side of the handshake, and a harness that spawns a
//! real bridge server on an ephemeral port.

pub mod echo;
pub mod harness;
pub mod keyset;
pub mod token;
pub mod tunnel;
