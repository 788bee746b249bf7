//! Static key-set provider for tests.

use bridge::auth::KeySetProvider;
use jsonwebtoken::jwk::JwkSet;
use std::sync::Arc;

/// A key-set provider that always returns the same set.
pub struct StaticKeySet(Arc<JwkSet>);

impl StaticKeySet {
    pub fn new(set: JwkSet) -> Self {
        Self(Arc::new(set))
    }
}

impl KeySetProvider for StaticKeySet {
    fn key_set(&self) -> Arc<JwkSet> {
        Arc::clone(&self.0)
    }
}
