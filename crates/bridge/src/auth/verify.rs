//! JWT verification against the current public-key set.
//!
//! The verification key is selected from the key set by `kid`, and the
//! permitted signature algorithms are inferred from the matched key, so a
//! token can never downgrade the check to a weaker family than its key
//! supports. Unsigned and symmetric-key tokens are unrepresentable here.
//!
//! `exp` and `nbf` are evaluated against the frozen request time rather
//! than the system clock; the library's own wall-clock checks are
//! disabled to keep validation point-deterministic per request.

use crate::auth::{Claims, ISSUER};
use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("no verification key matches the token")]
    UnknownKey,

    #[error("unsupported key type in key set")]
    UnsupportedKey,

    #[error("token algorithm not permitted by the matched key")]
    AlgorithmMismatch,

    #[error("token is expired")]
    Expired,

    #[error("token is not yet valid")]
    NotYetValid,

    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Verifies `token` against `keys` at the frozen instant `now` and
/// returns its claims.
///
/// Checks, in order: key lookup by `kid`, algorithm family inferred from
/// the matched key, signature, issuer, then `exp`/`nbf` against `now`.
/// `exp == now` is rejected; `nbf == now` is accepted.
pub fn verify_token(
    token: &str,
    keys: &JwkSet,
    now: DateTime<Utc>,
) -> Result<Claims, VerifyError> {
    let header = decode_header(token)?;

    let jwk = find_key(keys, header.kid.as_deref()).ok_or(VerifyError::UnknownKey)?;
    let allowed = allowed_algorithms(jwk)?;
    if !allowed.contains(&header.alg) {
        return Err(VerifyError::AlgorithmMismatch);
    }

    let decoding_key = DecodingKey::from_jwk(jwk)?;

    let mut validation = Validation::new(header.alg);
    validation.algorithms = allowed;
    validation.set_issuer(&[ISSUER]);
    validation.set_required_spec_claims(&["iss", "exp"]);
    // exp/nbf are checked below against the frozen request time.
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;

    let data = decode::<Claims>(token, &decoding_key, &validation)?;
    let claims = data.claims;

    let ts = now.timestamp();
    if ts >= claims.exp {
        return Err(VerifyError::Expired);
    }
    if let Some(nbf) = claims.nbf {
        if nbf > ts {
            return Err(VerifyError::NotYetValid);
        }
    }

    Ok(claims)
}

/// Selects the verification key: by `kid` when the token names one,
/// otherwise the sole key of a single-key set.
fn find_key<'a>(keys: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => keys.find(kid),
        None if keys.keys.len() == 1 => keys.keys.first(),
        None => None,
    }
}

/// Signature algorithms the matched key permits.
///
/// A key that names its algorithm pins the check to exactly that one;
/// otherwise the family is derived from the key type. Symmetric keys are
/// rejected outright: a public-key document has no business carrying one,
/// and accepting it would open the classic key-confusion hole.
fn allowed_algorithms(jwk: &Jwk) -> Result<Vec<Algorithm>, VerifyError> {
    if let Some(key_alg) = &jwk.common.key_algorithm {
        let alg = match key_alg {
            KeyAlgorithm::RS256 => Algorithm::RS256,
            KeyAlgorithm::RS384 => Algorithm::RS384,
            KeyAlgorithm::RS512 => Algorithm::RS512,
            KeyAlgorithm::PS256 => Algorithm::PS256,
            KeyAlgorithm::PS384 => Algorithm::PS384,
            KeyAlgorithm::PS512 => Algorithm::PS512,
            KeyAlgorithm::ES256 => Algorithm::ES256,
            KeyAlgorithm::ES384 => Algorithm::ES384,
            KeyAlgorithm::EdDSA => Algorithm::EdDSA,
            _ => return Err(VerifyError::UnsupportedKey),
        };
        return Ok(vec![alg]);
    }

    match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => Ok(vec![
            Algorithm::RS256,
            Algorithm::RS384,
            Algorithm::RS512,
            Algorithm::PS256,
            Algorithm::PS384,
            Algorithm::PS512,
        ]),
        AlgorithmParameters::EllipticCurve(params) => match params.curve {
            EllipticCurve::P256 => Ok(vec![Algorithm::ES256]),
            EllipticCurve::P384 => Ok(vec![Algorithm::ES384]),
            _ => Err(VerifyError::UnsupportedKey),
        },
        AlgorithmParameters::OctetKeyPair(_) => Ok(vec![Algorithm::EdDSA]),
        AlgorithmParameters::OctetKey(_) => Err(VerifyError::UnsupportedKey),
    }
}
