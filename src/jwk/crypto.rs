use super::{JsonCurveType, JsonWebKey, JsonWebKeyType, SignatureVerificationError};
use crate::helpers::Base64UrlEncodedBytes;

use p256::ecdsa::signature::Verifier;
use rsa::traits::SignatureScheme;
use rsa::{BigUint, RsaPublicKey};

fn rsa_public_key(
    key: &JsonWebKey,
) -> Result<(&Base64UrlEncodedBytes, &Base64UrlEncodedBytes), String> {
    if *key.key_type() != JsonWebKeyType::RSA {
        Err("RSA key required".to_string())
    } else {
        let n = key
            .n
            .as_ref()
            .ok_or_else(|| "RSA modulus `n` is missing".to_string())?;
        let e = key
            .e
            .as_ref()
            .ok_or_else(|| "RSA exponent `e` is missing".to_string())?;
        Ok((n, e))
    }
}

fn ec_public_key(
    key: &JsonWebKey,
) -> Result<(&Base64UrlEncodedBytes, &Base64UrlEncodedBytes, &JsonCurveType), String> {
    if *key.key_type() != JsonWebKeyType::EllipticCurve {
        Err("EC key required".to_string())
    } else {
        let x = key
            .x
            .as_ref()
            .ok_or_else(|| "EC `x` part is missing".to_string())?;
        let y = key
            .y
            .as_ref()
            .ok_or_else(|| "EC `y` part is missing".to_string())?;
        let crv = key
            .crv
            .as_ref()
            .ok_or_else(|| "EC `crv` part is missing".to_string())?;
        Ok((x, y, crv))
    }
}

fn ed_public_key(key: &JsonWebKey) -> Result<(&Base64UrlEncodedBytes, &JsonCurveType), String> {
    if *key.key_type() != JsonWebKeyType::OctetKeyPair {
        Err("OKP key required".to_string())
    } else {
        let x = key
            .x
            .as_ref()
            .ok_or_else(|| "OKP `x` part is missing".to_string())?;
        let crv = key
            .crv
            .as_ref()
            .ok_or_else(|| "OKP `crv` part is missing".to_string())?;
        Ok((x, crv))
    }
}

// Uncompressed SEC1 encoding of an EC point, after checking each coordinate has the width the
// curve requires.
fn sec1_point(
    x: &Base64UrlEncodedBytes,
    y: &Base64UrlEncodedBytes,
    coordinate_len: usize,
) -> Result<Vec<u8>, SignatureVerificationError> {
    if x.len() != coordinate_len || y.len() != coordinate_len {
        return Err(SignatureVerificationError::InvalidKey(format!(
            "EC coordinates must be {} bytes long",
            coordinate_len
        )));
    }
    let mut point = Vec::with_capacity(1 + 2 * coordinate_len);
    point.push(0x04);
    point.extend_from_slice(x);
    point.extend_from_slice(y);
    Ok(point)
}

pub(crate) fn verify_rsa_signature<S>(
    key: &JsonWebKey,
    padding: S,
    msg: &[u8],
    signature: &[u8],
) -> Result<(), SignatureVerificationError>
where
    S: SignatureScheme,
{
    let (n, e) = rsa_public_key(key).map_err(SignatureVerificationError::InvalidKey)?;
    // `n` and `e` are unsigned big-endian integers and may carry leading zero octets.
    // See https://datatracker.ietf.org/doc/html/rfc7518#section-6.3.1.1.
    let public_key = RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
        .map_err(|e| SignatureVerificationError::InvalidKey(e.to_string()))?;

    public_key
        .verify(padding, msg, signature)
        .map_err(|_| SignatureVerificationError::CryptoError("bad signature".to_string()))
}

/// Verifies a fixed-length (`r || s`) ECDSA signature as used by JWS
/// ([RFC 7518, Section 3.4](https://tools.ietf.org/html/rfc7518#section-3.4)).
pub(crate) fn verify_ec_signature(
    key: &JsonWebKey,
    msg: &[u8],
    signature: &[u8],
) -> Result<(), SignatureVerificationError> {
    let (x, y, crv) = ec_public_key(key).map_err(SignatureVerificationError::InvalidKey)?;
    match *crv {
        JsonCurveType::P256 => {
            let point = sec1_point(x, y, 32)?;
            let public_key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&point).map_err(|_| {
                SignatureVerificationError::InvalidKey("invalid P-256 public key".to_string())
            })?;
            let signature = p256::ecdsa::Signature::from_slice(signature).map_err(|_| {
                SignatureVerificationError::CryptoError("malformed ECDSA signature".to_string())
            })?;
            public_key
                .verify(msg, &signature)
                .map_err(|_| SignatureVerificationError::CryptoError("bad signature".to_string()))
        }
        JsonCurveType::P384 => {
            let point = sec1_point(x, y, 48)?;
            let public_key = p384::ecdsa::VerifyingKey::from_sec1_bytes(&point).map_err(|_| {
                SignatureVerificationError::InvalidKey("invalid P-384 public key".to_string())
            })?;
            let signature = p384::ecdsa::Signature::from_slice(signature).map_err(|_| {
                SignatureVerificationError::CryptoError("malformed ECDSA signature".to_string())
            })?;
            public_key
                .verify(msg, &signature)
                .map_err(|_| SignatureVerificationError::CryptoError("bad signature".to_string()))
        }
        JsonCurveType::P521 => Err(SignatureVerificationError::UnsupportedAlg(
            "P521 isn't supported yet".to_string(),
        )),
        JsonCurveType::Ed25519 => Err(SignatureVerificationError::InvalidKey(
            "Ed25519 is not an ECDSA curve".to_string(),
        )),
    }
}

pub(crate) fn verify_ed_signature(
    key: &JsonWebKey,
    msg: &[u8],
    signature: &[u8],
) -> Result<(), SignatureVerificationError> {
    let (x, crv) = ed_public_key(key).map_err(SignatureVerificationError::InvalidKey)?;
    match *crv {
        JsonCurveType::Ed25519 => {
            let public_key_bytes: &[u8; ed25519_dalek::PUBLIC_KEY_LENGTH] =
                x.as_slice().try_into().map_err(|_| {
                    SignatureVerificationError::InvalidKey(
                        "Ed25519 public key must be 32 bytes long".to_string(),
                    )
                })?;
            let public_key =
                ed25519_dalek::VerifyingKey::from_bytes(public_key_bytes).map_err(|_| {
                    SignatureVerificationError::InvalidKey("invalid Ed25519 public key".to_string())
                })?;
            let signature = ed25519_dalek::Signature::from_slice(signature).map_err(|_| {
                SignatureVerificationError::CryptoError("malformed EdDSA signature".to_string())
            })?;
            public_key
                .verify_strict(msg, &signature)
                .map_err(|_| SignatureVerificationError::CryptoError("bad signature".to_string()))
        }
        _ => Err(SignatureVerificationError::InvalidKey(
            "unsupported OKP curve".to_string(),
        )),
    }
}
