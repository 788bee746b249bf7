//! Token claims model and the key-set seam used by request authentication.

pub mod verify;

pub use verify::{verify_token, VerifyError};

use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Issuer every accepted token must carry.
pub const ISSUER: &str = "basemachina.com";

/// Header carrying the bearer token on proxied requests. Deleted before
/// the request is handed to any upstream.
pub const X_BRIDGE_AUTHORIZATION: &str = "X-Bridge-Authorization";

/// Source of the current public-key set.
///
/// Implemented by the key-refresh worker; tests substitute a static set.
/// The returned snapshot stays valid for the caller even if the worker
/// swaps in a newer set concurrently.
pub trait KeySetProvider: Send + Sync {
    fn key_set(&self) -> Arc<JwkSet>;
}

/// The `user` custom claim carried by tokens minted by the authorising
/// API. Only the tenant identifier is used downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub tenant: Tenant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
}

/// Claims accepted by the bridge.
///
/// The `user` claim is kept raw so a token that verifies but carries a
/// missing or malformed `user` can be told apart from an invalid token
/// (the former is an upstream minting bug, not a client fault).
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub exp: i64,

    #[serde(default)]
    pub nbf: Option<i64>,

    #[serde(default)]
    pub iat: Option<i64>,

    #[serde(default)]
    user: Option<serde_json::Value>,
}

impl Claims {
    /// Returns the `user` claim, or `None` when it is absent or does not
    /// have the expected shape.
    pub fn user(&self) -> Option<User> {
        serde_json::from_value(self.user.clone()?).ok()
    }
}
