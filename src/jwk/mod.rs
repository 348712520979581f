use crate::discovery::DiscoveryError;
use crate::helpers::{deserialize_option_or_none, Base64UrlEncodedBytes};
use crate::http_utils::{check_content_type, MIME_TYPE_JSON, MIME_TYPE_JWKS};
use crate::{AsyncHttpClient, HttpRequest, HttpResponse};

use http::header::{HeaderValue, ACCEPT};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, VecSkipError};
use sha2::Digest;
use thiserror::Error;

mod crypto;


new_string_type![
    /// Identifier of a JSON Web Key (the `kid` parameter).
    JsonWebKeyId
];

/// Error verifying a signature.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SignatureVerificationError {
    /// Invalid signature for the supplied message and signing key.
    #[error("Crypto error: {0}")]
    CryptoError(String),
    /// The supplied signature algorithm is disallowed by the verifier.
    #[error("Disallowed signature algorithm: {0}")]
    DisallowedAlg(String),
    /// The supplied key cannot be used in this context. This may occur if the key type does not
    /// match the signature type (e.g., an RSA key used to validate an ECDSA signature) or the
    /// JWK usage disallows signatures.
    #[error("Invalid cryptographic key: {0}")]
    InvalidKey(String),
    /// More than one key matches the supplied key constraints.
    #[error("Ambiguous key identification: {0}")]
    AmbiguousKeyId(String),
    /// Unsupported signature algorithm.
    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedAlg(String),
}

/// Signature algorithms from
/// [Section 3.1 of RFC 7518](https://tools.ietf.org/html/rfc7518#section-3.1) and
/// [RFC 8037](https://tools.ietf.org/html/rfc8037).
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[non_exhaustive]
pub enum JwsSigningAlgorithm {
    /// HMAC using SHA-256. Never accepted, since a resource server shares no secret with the
    /// identity provider.
    #[serde(rename = "HS256")]
    HmacSha256,
    /// HMAC using SHA-384. Never accepted.
    #[serde(rename = "HS384")]
    HmacSha384,
    /// HMAC using SHA-512. Never accepted.
    #[serde(rename = "HS512")]
    HmacSha512,
    /// RSA SSA PKCS#1 v1.5 using SHA-256.
    #[serde(rename = "RS256")]
    RsaSsaPkcs1V15Sha256,
    /// RSA SSA PKCS#1 v1.5 using SHA-384.
    #[serde(rename = "RS384")]
    RsaSsaPkcs1V15Sha384,
    /// RSA SSA PKCS#1 v1.5 using SHA-512.
    #[serde(rename = "RS512")]
    RsaSsaPkcs1V15Sha512,
    /// ECDSA using P-256 and SHA-256.
    #[serde(rename = "ES256")]
    EcdsaP256Sha256,
    /// ECDSA using P-384 and SHA-384.
    #[serde(rename = "ES384")]
    EcdsaP384Sha384,
    /// ECDSA using P-521 and SHA-512 (currently unsupported).
    #[serde(rename = "ES512")]
    EcdsaP521Sha512,
    /// RSA SSA-PSS using SHA-256 and MGF1 with SHA-256.
    #[serde(rename = "PS256")]
    RsaSsaPssSha256,
    /// RSA SSA-PSS using SHA-384 and MGF1 with SHA-384.
    #[serde(rename = "PS384")]
    RsaSsaPssSha384,
    /// RSA SSA-PSS using SHA-512 and MGF1 with SHA-512.
    #[serde(rename = "PS512")]
    RsaSsaPssSha512,
    /// EdDSA signature using the Ed25519 curve.
    #[serde(rename = "EdDSA")]
    EdDsa,
}
impl JwsSigningAlgorithm {
    /// Returns the type of key required to use this signature algorithm.
    pub fn key_type(&self) -> JsonWebKeyType {
        match *self {
            JwsSigningAlgorithm::HmacSha256
            | JwsSigningAlgorithm::HmacSha384
            | JwsSigningAlgorithm::HmacSha512 => JsonWebKeyType::Symmetric,
            JwsSigningAlgorithm::RsaSsaPkcs1V15Sha256
            | JwsSigningAlgorithm::RsaSsaPkcs1V15Sha384
            | JwsSigningAlgorithm::RsaSsaPkcs1V15Sha512
            | JwsSigningAlgorithm::RsaSsaPssSha256
            | JwsSigningAlgorithm::RsaSsaPssSha384
            | JwsSigningAlgorithm::RsaSsaPssSha512 => JsonWebKeyType::RSA,
            JwsSigningAlgorithm::EcdsaP256Sha256
            | JwsSigningAlgorithm::EcdsaP384Sha384
            | JwsSigningAlgorithm::EcdsaP521Sha512 => JsonWebKeyType::EllipticCurve,
            JwsSigningAlgorithm::EdDsa => JsonWebKeyType::OctetKeyPair,
        }
    }

    /// Returns true if the signature algorithm uses a shared secret (symmetric key).
    pub fn uses_shared_secret(&self) -> bool {
        self.key_type() == JsonWebKeyType::Symmetric
    }

    /// Returns the registered JWA name of the algorithm (e.g., `RS256`).
    pub fn name(&self) -> String {
        serde_plain::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// Key type (`kty`) of a JSON Web Key.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[non_exhaustive]
pub enum JsonWebKeyType {
    /// Elliptic curve.
    #[serde(rename = "EC")]
    EllipticCurve,
    /// RSA.
    #[serde(rename = "RSA")]
    RSA,
    /// Symmetric.
    #[serde(rename = "oct")]
    Symmetric,
    /// Octet key pair (RFC 8037).
    #[serde(rename = "OKP")]
    OctetKeyPair,
}

/// Curve (`crv`) of an elliptic curve or octet key pair JSON Web Key.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[non_exhaustive]
pub enum JsonCurveType {
    /// P-256 curve.
    #[serde(rename = "P-256")]
    P256,
    /// P-384 curve.
    #[serde(rename = "P-384")]
    P384,
    /// P-521 curve (currently unsupported).
    #[serde(rename = "P-521")]
    P521,
    /// Ed25519 curve.
    #[serde(rename = "Ed25519")]
    Ed25519,
}

// Other than the 'kty' (key type) parameter, which must be present in all JWKs, Section 4 of RFC
// 7517 states that "member names used for representing key parameters for different keys types
// need not be distinct." Fields we fail to understand are therefore read as None rather than
// failing the whole key.
/// Public key expressed as a JSON Web Key.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct JsonWebKey {
    pub(crate) kty: JsonWebKeyType,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub(crate) use_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) kid: Option<JsonWebKeyId>,
    /// The algorithm intended to be used with this key (see
    /// [RFC 7517](https://www.rfc-editor.org/rfc/rfc7517#section-4.4)).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) alg: Option<String>,
    /// X.509 certificate SHA-1 thumbprint, published by some providers next to `kid`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) x5t: Option<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_option_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) n: Option<Base64UrlEncodedBytes>,
    #[serde(
        default,
        deserialize_with = "deserialize_option_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) e: Option<Base64UrlEncodedBytes>,

    #[serde(
        default,
        deserialize_with = "deserialize_option_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) crv: Option<JsonCurveType>,
    #[serde(
        default,
        deserialize_with = "deserialize_option_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) x: Option<Base64UrlEncodedBytes>,
    #[serde(
        default,
        deserialize_with = "deserialize_option_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) y: Option<Base64UrlEncodedBytes>,
}
impl JsonWebKey {
    /// Instantiate a new RSA public key from the raw modulus (`n`) and public exponent (`e`),
    /// along with an optional (but recommended) key ID.
    pub fn new_rsa(n: Vec<u8>, e: Vec<u8>, kid: Option<JsonWebKeyId>) -> Self {
        Self {
            kty: JsonWebKeyType::RSA,
            use_: Some("sig".to_string()),
            kid,
            alg: None,
            x5t: None,
            n: Some(Base64UrlEncodedBytes::new(n)),
            e: Some(Base64UrlEncodedBytes::new(e)),
            crv: None,
            x: None,
            y: None,
        }
    }

    /// Instantiate a new EC public key from the raw `x` and `y` coordinates.
    pub fn new_ec(x: Vec<u8>, y: Vec<u8>, crv: JsonCurveType, kid: Option<JsonWebKeyId>) -> Self {
        Self {
            kty: JsonWebKeyType::EllipticCurve,
            use_: Some("sig".to_string()),
            kid,
            alg: None,
            x5t: None,
            n: None,
            e: None,
            crv: Some(crv),
            x: Some(Base64UrlEncodedBytes::new(x)),
            y: Some(Base64UrlEncodedBytes::new(y)),
        }
    }

    /// Instantiate a new Octet Key-Pair public key from the raw `x` value.
    pub fn new_okp(x: Vec<u8>, crv: JsonCurveType, kid: Option<JsonWebKeyId>) -> Self {
        Self {
            kty: JsonWebKeyType::OctetKeyPair,
            use_: Some("sig".to_string()),
            kid,
            alg: None,
            x5t: None,
            n: None,
            e: None,
            crv: Some(crv),
            x: Some(Base64UrlEncodedBytes::new(x)),
            y: None,
        }
    }

    /// Returns the key ID, if any.
    pub fn key_id(&self) -> Option<&JsonWebKeyId> {
        self.kid.as_ref()
    }

    /// Returns the key type.
    pub fn key_type(&self) -> &JsonWebKeyType {
        &self.kty
    }

    /// Returns the intended key use (`sig`, `enc`, ...), if specified.
    pub fn key_use(&self) -> Option<&str> {
        self.use_.as_deref()
    }

    /// Returns the X.509 certificate thumbprint, if published.
    pub fn thumbprint(&self) -> Option<&str> {
        self.x5t.as_deref()
    }

    /// Verifies `signature` over `message` using this key and `signature_alg`.
    pub fn verify_signature(
        &self,
        signature_alg: &JwsSigningAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), SignatureVerificationError> {
        check_key_compatibility(self, signature_alg)
            .map_err(|e| SignatureVerificationError::InvalidKey(e.to_owned()))?;

        match *signature_alg {
            JwsSigningAlgorithm::RsaSsaPkcs1V15Sha256 => crypto::verify_rsa_signature(
                self,
                rsa::Pkcs1v15Sign::new::<sha2::Sha256>(),
                &sha2::Sha256::digest(message),
                signature,
            ),
            JwsSigningAlgorithm::RsaSsaPkcs1V15Sha384 => crypto::verify_rsa_signature(
                self,
                rsa::Pkcs1v15Sign::new::<sha2::Sha384>(),
                &sha2::Sha384::digest(message),
                signature,
            ),
            JwsSigningAlgorithm::RsaSsaPkcs1V15Sha512 => crypto::verify_rsa_signature(
                self,
                rsa::Pkcs1v15Sign::new::<sha2::Sha512>(),
                &sha2::Sha512::digest(message),
                signature,
            ),
            JwsSigningAlgorithm::RsaSsaPssSha256 => crypto::verify_rsa_signature(
                self,
                rsa::Pss::new::<sha2::Sha256>(),
                &sha2::Sha256::digest(message),
                signature,
            ),
            JwsSigningAlgorithm::RsaSsaPssSha384 => crypto::verify_rsa_signature(
                self,
                rsa::Pss::new::<sha2::Sha384>(),
                &sha2::Sha384::digest(message),
                signature,
            ),
            JwsSigningAlgorithm::RsaSsaPssSha512 => crypto::verify_rsa_signature(
                self,
                rsa::Pss::new::<sha2::Sha512>(),
                &sha2::Sha512::digest(message),
                signature,
            ),
            JwsSigningAlgorithm::EcdsaP256Sha256 => {
                if matches!(self.crv, Some(JsonCurveType::P256)) {
                    crypto::verify_ec_signature(self, message, signature)
                } else {
                    Err(SignatureVerificationError::InvalidKey(
                        "Key uses different CRV than JWT".to_string(),
                    ))
                }
            }
            JwsSigningAlgorithm::EcdsaP384Sha384 => {
                if matches!(self.crv, Some(JsonCurveType::P384)) {
                    crypto::verify_ec_signature(self, message, signature)
                } else {
                    Err(SignatureVerificationError::InvalidKey(
                        "Key uses different CRV than JWT".to_string(),
                    ))
                }
            }
            JwsSigningAlgorithm::EdDsa => {
                if matches!(self.crv, Some(JsonCurveType::Ed25519)) {
                    crypto::verify_ed_signature(self, message, signature)
                } else {
                    Err(SignatureVerificationError::InvalidKey(
                        "Key uses different CRV than JWT".to_string(),
                    ))
                }
            }
            ref other => Err(SignatureVerificationError::UnsupportedAlg(other.name())),
        }
    }
}

/// Checks whether a JWK key can be used with a given signing algorithm.
pub(crate) fn check_key_compatibility(
    key: &JsonWebKey,
    signing_algorithm: &JwsSigningAlgorithm,
) -> Result<(), &'static str> {
    // if this key isn't suitable for signing
    if let Some(use_) = key.key_use() {
        if use_ != "sig" {
            return Err("key usage not permitted for digital signatures");
        }
    }

    // if this key doesn't have the right key type
    if signing_algorithm.key_type() != *key.key_type() {
        return Err("key type does not match signature algorithm");
    }

    // if no specific algorithm is mandated, any will do
    match key.alg.as_deref() {
        None => Ok(()),
        Some(key_alg) if key_alg == signing_algorithm.name() => Ok(()),
        Some(_) => Err("incompatible key algorithm"),
    }
}

/// JSON Web Key Set.
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct JsonWebKeySet {
    // Ignores invalid keys rather than failing. That way, callers can function using the keys that
    // they do understand, which is fine if they only ever get JWTs signed with those keys.
    #[serde_as(as = "VecSkipError<_>")]
    keys: Vec<JsonWebKey>,
}
impl JsonWebKeySet {
    /// Create a new JSON Web Key Set.
    pub fn new(keys: Vec<JsonWebKey>) -> Self {
        Self { keys }
    }

    /// Return the keys in this JSON Web Key Set.
    pub fn keys(&self) -> &Vec<JsonWebKey> {
        &self.keys
    }

    /// Returns true if any key carries the given key ID.
    pub fn contains_key_id(&self, key_id: &JsonWebKeyId) -> bool {
        self.keys.iter().any(|key| key.key_id() == Some(key_id))
    }

    /// Returns the keys carrying the given key ID.
    pub(crate) fn keys_with_id(&self, key_id: &JsonWebKeyId) -> Vec<&JsonWebKey> {
        self.keys
            .iter()
            .filter(|key| key.key_id() == Some(key_id))
            .collect()
    }

    /// Returns the keys carrying the given X.509 certificate thumbprint.
    pub(crate) fn keys_with_thumbprint(&self, thumbprint: &str) -> Vec<&JsonWebKey> {
        self.keys
            .iter()
            .filter(|key| key.thumbprint() == Some(thumbprint))
            .collect()
    }

    /// Return the keys compatible with a signature algorithm.
    pub(crate) fn keys_for_alg(&self, signature_alg: &JwsSigningAlgorithm) -> Vec<&JsonWebKey> {
        self.keys
            .iter()
            .filter(|key| check_key_compatibility(key, signature_alg).is_ok())
            .collect()
    }

    /// Fetch a remote JSON Web Key Set from the specified `url` using the given async
    /// `http_client`.
    pub async fn fetch_async<'c, C>(
        url: &url::Url,
        http_client: &'c C,
    ) -> Result<Self, DiscoveryError<<C as AsyncHttpClient<'c>>::Error>>
    where
        C: AsyncHttpClient<'c>,
    {
        let fetch_request = Self::fetch_request(url).map_err(|err| {
            DiscoveryError::Other(format!("failed to prepare request: {err}"))
        })?;

        http_client
            .call(fetch_request)
            .await
            .map_err(DiscoveryError::Request)
            .and_then(|http_response| Self::fetch_response(url, http_response))
    }

    fn fetch_request(url: &url::Url) -> Result<HttpRequest, http::Error> {
        http::Request::builder()
            .uri(url.to_string())
            .method(Method::GET)
            .header(ACCEPT, HeaderValue::from_static(MIME_TYPE_JSON))
            .body(Vec::new())
    }

    fn fetch_response<RE>(
        url: &url::Url,
        http_response: HttpResponse,
    ) -> Result<Self, DiscoveryError<RE>>
    where
        RE: std::error::Error + 'static,
    {
        if http_response.status() != StatusCode::OK {
            return Err(DiscoveryError::Response(
                http_response.status(),
                http_response.body().to_owned(),
                format!("HTTP status code {} at {}", http_response.status(), url),
            ));
        }

        check_content_type(http_response.headers(), MIME_TYPE_JSON)
            .or_else(|err| {
                check_content_type(http_response.headers(), MIME_TYPE_JWKS).map_err(|_| err)
            })
            .map_err(|err_msg| {
                DiscoveryError::Response(
                    http_response.status(),
                    http_response.body().to_owned(),
                    err_msg,
                )
            })?;

        serde_path_to_error::deserialize(&mut serde_json::Deserializer::from_slice(
            http_response.body(),
        ))
        .map_err(DiscoveryError::Parse)
    }
}
