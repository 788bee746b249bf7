//! Deterministic signing keys and token minting for tests.
//!
//! Keys are Ed25519, derived from a one-byte seed so the same seed always
//! produces the same key pair and tests stay reproducible.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bridge::auth::ISSUER;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde_json::json;

/// A deterministic Ed25519 key pair with a key ID.
pub struct TestKeyPair {
    kid: String,
    public_key: Vec<u8>,
    pkcs8: Vec<u8>,
}

impl TestKeyPair {
    /// Derives a key pair from `seed`; the same seed always yields the
    /// same key.
    pub fn from_seed(seed: u8, kid: &str) -> Self {
        let mut seed_bytes = [0u8; 32];
        seed_bytes[0] = seed;
        for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
            *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
        }

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
            .expect("seeded Ed25519 key generation cannot fail");

        Self {
            kid: kid.to_string(),
            public_key: key_pair.public_key().as_ref().to_vec(),
            pkcs8: pkcs8_from_seed(&seed_bytes),
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The public half as a JWK.
    pub fn jwk(&self) -> serde_json::Value {
        json!({
            "kty": "OKP",
            "kid": self.kid,
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(&self.public_key),
            "alg": "EdDSA",
            "use": "sig",
        })
    }

    /// A key set holding just this key.
    pub fn jwk_set(&self) -> JwkSet {
        serde_json::from_value(json!({ "keys": [self.jwk()] }))
            .expect("generated JWK should deserialize")
    }

    /// The key-set document as the key endpoint would serve it.
    pub fn jwks_body(&self) -> String {
        json!({ "keys": [self.jwk()] }).to_string()
    }

    pub fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_ed_der(&self.pkcs8)
    }
}

/// Assembles a PKCS#8 v1 document around an Ed25519 seed (RFC 5208 outer
/// SEQUENCE, Ed25519 OID 1.3.101.112, double OCTET STRING private key).
fn pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut doc = Vec::with_capacity(48);
    doc.extend_from_slice(&[0x30, 0x2e]); // SEQUENCE, 46 bytes
    doc.extend_from_slice(&[0x02, 0x01, 0x00]); // INTEGER 0 (version)
    doc.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]); // AlgorithmIdentifier: Ed25519
    doc.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]); // OCTET STRING wrapping OCTET STRING(32)
    doc.extend_from_slice(seed);
    doc
}

/// Builder for bridge tokens.
///
/// Defaults mirror what the authorising API mints: issuer
/// `basemachina.com`, expiry one hour out, not-before one hour back,
/// issued-at one minute back, and a `user.tenant.id` claim.
pub struct TokenBuilder {
    issuer: String,
    tenant_id: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    not_before: DateTime<Utc>,
    include_user: bool,
}

impl TokenBuilder {
    pub fn new(tenant_id: &str) -> Self {
        let now = Utc::now();
        Self {
            issuer: ISSUER.to_string(),
            tenant_id: tenant_id.to_string(),
            issued_at: now - Duration::minutes(1),
            expires_at: now + Duration::hours(1),
            not_before: now - Duration::hours(1),
            include_user: true,
        }
    }

    pub fn issuer(mut self, issuer: &str) -> Self {
        self.issuer = issuer.to_string();
        self
    }

    pub fn issued_at(mut self, t: DateTime<Utc>) -> Self {
        self.issued_at = t;
        self
    }

    pub fn expires_at(mut self, t: DateTime<Utc>) -> Self {
        self.expires_at = t;
        self
    }

    pub fn not_before(mut self, t: DateTime<Utc>) -> Self {
        self.not_before = t;
        self
    }

    /// Omits the `user` claim entirely, simulating a minting bug.
    pub fn without_user(mut self) -> Self {
        self.include_user = false;
        self
    }

    /// Signs the claims with `key` and returns the compact token.
    pub fn sign(&self, key: &TestKeyPair) -> String {
        let mut claims = json!({
            "iss": self.issuer,
            "exp": self.expires_at.timestamp(),
            "nbf": self.not_before.timestamp(),
            "iat": self.issued_at.timestamp(),
        });
        if self.include_user {
            claims["user"] = json!({ "tenant": { "id": self.tenant_id } });
        }

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(key.kid.clone());

        encode(&header, &claims, &key.encoding_key()).expect("test token signing cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_key() {
        let a = TestKeyPair::from_seed(7, "kid-a");
        let b = TestKeyPair::from_seed(7, "kid-b");
        assert_eq!(a.public_key, b.public_key);

        let c = TestKeyPair::from_seed(8, "kid-c");
        assert_ne!(a.public_key, c.public_key);
    }

    #[test]
    fn test_jwk_set_parses() {
        let key = TestKeyPair::from_seed(1, "test-kid");
        let set = key.jwk_set();
        assert_eq!(set.keys.len(), 1);
        assert!(set.find("test-kid").is_some());
    }

    #[test]
    fn test_token_has_three_segments() {
        let key = TestKeyPair::from_seed(1, "test-kid");
        let token = TokenBuilder::new("tenant-a").sign(&key);
        assert_eq!(token.split('.').count(), 3);
    }
}
