use crate::helpers::{string_or_vec_claim, timestamp_claim};
use crate::identity::ValidatedIdentity;
use crate::issuer::AcceptableIssuers;
use crate::jwk::{
    check_key_compatibility, JsonWebKey, JsonWebKeySet, JwsSigningAlgorithm,
    SignatureVerificationError,
};
use crate::jwt::{JsonWebTokenAlgorithm, JsonWebTokenHeader, UnverifiedJsonWebToken};
use crate::key_source::KeySourceError;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde_json::Value;
use thiserror::Error;

use std::sync::Arc;
use std::time::Duration;


/// Tolerated difference between the issuer's clock and ours when checking `exp` and `nbf`.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

/// The class of a [`TokenValidationError`], without its detail.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[non_exhaustive]
pub enum RejectionKind {
    Malformed,
    UnknownSigningKey,
    InvalidSignature,
    InvalidIssuer,
    InvalidAudience,
    Expired,
    NotYetValid,
    KeySourceUnavailable,
}

/// Reason an access token was rejected.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TokenValidationError {
    /// The token is not a well-formed signed JWT with the claims we require.
    #[error("Malformed token: {0}")]
    Malformed(String),
    /// No key in the provider's key set matches the token's key ID.
    #[error("Unknown signing key: {0}")]
    UnknownSigningKey(String),
    /// The signature algorithm is not allowed, the matched key cannot verify it, or the signature
    /// does not match.
    #[error("Signature verification failed")]
    InvalidSignature(#[source] SignatureVerificationError),
    /// The issuer claim is missing or not acceptable.
    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),
    /// None of the token's audiences is accepted.
    #[error("Invalid audiences: {0}")]
    InvalidAudience(String),
    /// The token expired (beyond the clock skew allowance).
    #[error("Expired: {0}")]
    Expired(String),
    /// The token is not valid yet (beyond the clock skew allowance).
    #[error("Not yet valid: {0}")]
    NotYetValid(String),
    /// The provider's signing keys could not be obtained.
    #[error("Signing keys unavailable")]
    KeySourceUnavailable(#[from] KeySourceError),
}
impl TokenValidationError {
    pub fn kind(&self) -> RejectionKind {
        match self {
            TokenValidationError::Malformed(_) => RejectionKind::Malformed,
            TokenValidationError::UnknownSigningKey(_) => RejectionKind::UnknownSigningKey,
            TokenValidationError::InvalidSignature(_) => RejectionKind::InvalidSignature,
            TokenValidationError::InvalidIssuer(_) => RejectionKind::InvalidIssuer,
            TokenValidationError::InvalidAudience(_) => RejectionKind::InvalidAudience,
            TokenValidationError::Expired(_) => RejectionKind::Expired,
            TokenValidationError::NotYetValid(_) => RejectionKind::NotYetValid,
            TokenValidationError::KeySourceUnavailable(_) => RejectionKind::KeySourceUnavailable,
        }
    }

    /// Returns true if the failure lies with us or the identity provider rather than the token.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, TokenValidationError::KeySourceUnavailable(_))
    }
}

// Claims whose shape is checked before anything else.
struct TokenClaims {
    expiration: DateTime<Utc>,
    not_before: Option<DateTime<Utc>>,
    issuer: Option<String>,
    audiences: Option<Vec<String>>,
}
impl TokenClaims {
    fn from_token(token: &UnverifiedJsonWebToken) -> Result<Self, TokenValidationError> {
        let claims = token.unverified_claims();

        let expiration = timestamp_claim("exp", claims.get("exp"))
            .map_err(TokenValidationError::Malformed)?
            .ok_or_else(|| TokenValidationError::Malformed("missing `exp` claim".to_string()))?;
        let not_before =
            timestamp_claim("nbf", claims.get("nbf")).map_err(TokenValidationError::Malformed)?;
        let issuer = match claims.get("iss") {
            None | Some(Value::Null) => None,
            Some(Value::String(issuer)) => Some(issuer.clone()),
            Some(other) => {
                return Err(TokenValidationError::Malformed(format!(
                    "`iss` claim must be a string (found `{}`)",
                    other
                )))
            }
        };
        let audiences = string_or_vec_claim(claims.get("aud"))
            .map_err(|err| TokenValidationError::Malformed(format!("`aud` claim: {}", err)))?;

        Ok(Self {
            expiration,
            not_before,
            issuer,
            audiences,
        })
    }
}

/// Verifies access tokens against a key set and the tenant's issuer and audience policy.
///
/// Checks run in this order, and the first failure is returned:
///  1. structure and JOSE header;
///  2. `exp` and `nbf`, allowing for clock skew;
///  3. signature, using an allowed algorithm and the key named by `kid` (or `x5t`);
///  4. `iss` against the acceptable issuers;
///  5. `aud` against the accepted audiences.
#[derive(Clone)]
pub struct TokenVerifier {
    acceptable_issuers: AcceptableIssuers,
    allowed_algs: Vec<JwsSigningAlgorithm>,
    audiences: Vec<String>,
    clock_skew: Duration,
    issuer_check_enabled: bool,
    time_fn: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}
impl TokenVerifier {
    /// Creates a verifier accepting tokens from `acceptable_issuers` that name at least one of
    /// `audiences`. Only `RS256` signatures are accepted by default.
    pub fn new(acceptable_issuers: AcceptableIssuers, audiences: Vec<String>) -> Self {
        Self {
            acceptable_issuers,
            allowed_algs: vec![JwsSigningAlgorithm::RsaSsaPkcs1V15Sha256],
            audiences,
            clock_skew: DEFAULT_CLOCK_SKEW,
            issuer_check_enabled: true,
            time_fn: Arc::new(Utc::now),
        }
    }

    pub fn acceptable_issuers(&self) -> &AcceptableIssuers {
        &self.acceptable_issuers
    }

    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }

    /// Specifies the allowed clock skew when checking `exp` and `nbf`.
    pub fn set_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    /// Sets the allowed signature algorithms. HMAC algorithms are rejected even if listed.
    pub fn set_allowed_algs<I>(mut self, algs: I) -> Self
    where
        I: IntoIterator<Item = JwsSigningAlgorithm>,
    {
        self.allowed_algs = algs.into_iter().unique().collect();
        self
    }

    /// Specifies a function for returning the current time.
    pub fn set_time_fn<T>(mut self, time_fn: T) -> Self
    where
        T: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.time_fn = Arc::new(time_fn);
        self
    }

    /// Accepts tokens from any issuer.
    ///
    /// # Security Warning
    ///
    /// Any tenant of the identity provider can then mint tokens this verifier accepts, provided
    /// they name an accepted audience.
    pub fn insecure_disable_issuer_check(mut self) -> Self {
        log::warn!("issuer validation is disabled; tokens from any issuer will be accepted");
        self.issuer_check_enabled = false;
        self
    }

    pub(crate) fn set_acceptable_issuers(mut self, acceptable_issuers: AcceptableIssuers) -> Self {
        self.acceptable_issuers = acceptable_issuers;
        self
    }

    pub(crate) fn set_audiences(mut self, audiences: Vec<String>) -> Self {
        self.audiences = audiences;
        self
    }

    /// Validates `raw_token` against the signing keys in `jwks`.
    pub fn verify(
        &self,
        raw_token: &str,
        jwks: &JsonWebKeySet,
    ) -> Result<ValidatedIdentity, TokenValidationError> {
        let token = self.parse(raw_token)?;
        self.verify_parsed(&token, jwks)
    }

    /// Checks the token's structure, JOSE header and claim types. Needs no signing keys.
    pub(crate) fn parse(&self, raw_token: &str) -> Result<ParsedToken, TokenValidationError> {
        parse_token(raw_token).map_err(log_rejection)
    }

    /// Runs the remaining checks on a token returned by [`parse`](Self::parse).
    pub(crate) fn verify_parsed(
        &self,
        token: &ParsedToken,
        jwks: &JsonWebKeySet,
    ) -> Result<ValidatedIdentity, TokenValidationError> {
        self.verify_token(token, jwks).map_err(log_rejection)
    }

    fn verify_token(
        &self,
        parsed: &ParsedToken,
        jwks: &JsonWebKeySet,
    ) -> Result<ValidatedIdentity, TokenValidationError> {
        let ParsedToken { token, claims } = parsed;

        self.verify_lifetime(claims)?;

        let signature_alg = self.signature_alg(&token.header().alg)?;
        let key = signing_key(token.header(), jwks, &signature_alg)?;
        token
            .verify_signature(&signature_alg, key)
            .map_err(TokenValidationError::InvalidSignature)?;

        self.verify_issuer(claims)?;
        self.verify_audience(claims)?;

        Ok(ValidatedIdentity::new(
            token.unverified_claims().clone(),
            key.key_id().cloned(),
            signature_alg,
        ))
    }

    fn verify_lifetime(&self, claims: &TokenClaims) -> Result<(), TokenValidationError> {
        let now = (self.time_fn)();
        if exceeds(now, claims.expiration, self.clock_skew) {
            return Err(TokenValidationError::Expired(format!(
                "token expired at {} (current time is {})",
                claims.expiration, now
            )));
        }
        if let Some(not_before) = claims.not_before {
            if exceeds(not_before, now, self.clock_skew) {
                return Err(TokenValidationError::NotYetValid(format!(
                    "token is not valid before {} (current time is {})",
                    not_before, now
                )));
            }
        }
        Ok(())
    }

    // We must not trust `alg` beyond picking among the algorithms we allow.
    fn signature_alg(
        &self,
        alg: &JsonWebTokenAlgorithm,
    ) -> Result<JwsSigningAlgorithm, TokenValidationError> {
        let signature_alg = match alg {
            JsonWebTokenAlgorithm::Signature(signature_alg) => *signature_alg,
            JsonWebTokenAlgorithm::None => {
                return Err(TokenValidationError::InvalidSignature(
                    SignatureVerificationError::DisallowedAlg(
                        "unsigned tokens are not accepted".to_string(),
                    ),
                ))
            }
            JsonWebTokenAlgorithm::Unsupported(other) => {
                return Err(TokenValidationError::InvalidSignature(
                    SignatureVerificationError::UnsupportedAlg(other.clone()),
                ))
            }
        };

        if signature_alg.uses_shared_secret() {
            return Err(TokenValidationError::InvalidSignature(
                SignatureVerificationError::DisallowedAlg(format!(
                    "symmetric algorithm `{}` is not accepted",
                    signature_alg.name()
                )),
            ));
        }
        if !self.allowed_algs.contains(&signature_alg) {
            return Err(TokenValidationError::InvalidSignature(
                SignatureVerificationError::DisallowedAlg(format!(
                    "algorithm `{}` is not one of: {}",
                    signature_alg.name(),
                    self.allowed_algs.iter().map(|alg| alg.name()).join(", ")
                )),
            ));
        }
        Ok(signature_alg)
    }

    fn verify_issuer(&self, claims: &TokenClaims) -> Result<(), TokenValidationError> {
        if !self.issuer_check_enabled {
            return Ok(());
        }
        let issuer = claims.issuer.as_deref().ok_or_else(|| {
            TokenValidationError::InvalidIssuer("missing issuer claim".to_string())
        })?;
        if !self.acceptable_issuers.contains(issuer) {
            return Err(TokenValidationError::InvalidIssuer(format!(
                "`{}` is not one of: {}",
                issuer,
                self.acceptable_issuers
                    .iter()
                    .map(|issuer| format!("`{}`", issuer))
                    .join(", ")
            )));
        }
        Ok(())
    }

    fn verify_audience(&self, claims: &TokenClaims) -> Result<(), TokenValidationError> {
        let audiences = claims.audiences.as_ref().ok_or_else(|| {
            TokenValidationError::InvalidAudience("missing audiences claim".to_string())
        })?;
        let audience_matched = audiences
            .iter()
            .any(|audience| self.audiences.contains(audience));
        if !audience_matched {
            return Err(TokenValidationError::InvalidAudience(format!(
                "must contain one of {} (found audiences: {})",
                self.audiences
                    .iter()
                    .map(|audience| format!("`{}`", audience))
                    .join(", "),
                audiences
                    .iter()
                    .map(|audience| format!("`{}`", audience))
                    .join(", ")
            )));
        }
        Ok(())
    }
}

/// A token whose structure, header and claim types have been checked, but not its signature.
pub(crate) struct ParsedToken {
    token: UnverifiedJsonWebToken,
    claims: TokenClaims,
}

fn parse_token(raw_token: &str) -> Result<ParsedToken, TokenValidationError> {
    let token =
        UnverifiedJsonWebToken::parse(raw_token).map_err(TokenValidationError::Malformed)?;
    validate_jose_header(token.header())?;
    let claims = TokenClaims::from_token(&token)?;
    Ok(ParsedToken { token, claims })
}

fn log_rejection(err: TokenValidationError) -> TokenValidationError {
    log::debug!("rejected access token: {}", err);
    err
}

fn validate_jose_header(header: &JsonWebTokenHeader) -> Result<(), TokenValidationError> {
    // The 'typ' header is optional. Access tokens use either `JWT` or `at+jwt` (RFC 9068), and
    // RFC 7515 allows the `application/` prefix to be omitted.
    if let Some(ref jwt_type) = header.typ {
        let normalized = jwt_type.to_ascii_lowercase();
        let normalized = normalized
            .strip_prefix("application/")
            .unwrap_or(&normalized);
        if normalized != "jwt" && normalized != "at+jwt" {
            return Err(TokenValidationError::Malformed(format!(
                "unexpected or unsupported JWT type `{}`",
                jwt_type
            )));
        }
    }

    // 'cty' is only used for content other than JSON claims, such as nested JWTs.
    if let Some(ref content_type) = header.cty {
        if content_type.eq_ignore_ascii_case("JWT") {
            return Err(TokenValidationError::Malformed(
                "nested JWTs are not supported".to_string(),
            ));
        } else {
            return Err(TokenValidationError::Malformed(format!(
                "unexpected or unsupported JWT content type `{}`",
                content_type
            )));
        }
    }

    // We understand no extensions, so any critical header must be rejected.
    // See https://tools.ietf.org/html/rfc7515#section-4.1.11.
    if header.crit.is_some() {
        return Err(TokenValidationError::Malformed(
            "critical JWT header fields are unsupported".to_string(),
        ));
    }
    Ok(())
}

/// Finds the key named by the token header: by `kid`, then by `x5t`. A header naming neither
/// may use the only key compatible with the algorithm.
fn signing_key<'a>(
    header: &JsonWebTokenHeader,
    jwks: &'a JsonWebKeySet,
    signature_alg: &JwsSigningAlgorithm,
) -> Result<&'a JsonWebKey, TokenValidationError> {
    let mut candidates = header
        .kid
        .as_ref()
        .map(|kid| jwks.keys_with_id(kid))
        .unwrap_or_default();
    if candidates.is_empty() {
        if let Some(ref x5t) = header.x5t {
            candidates = jwks.keys_with_thumbprint(x5t);
        }
    }

    if candidates.is_empty() {
        return match (&header.kid, &header.x5t) {
            (Some(kid), _) => Err(TokenValidationError::UnknownSigningKey(format!(
                "no key with ID `{}`",
                kid.as_str()
            ))),
            (None, Some(x5t)) => Err(TokenValidationError::UnknownSigningKey(format!(
                "no key with thumbprint `{}`",
                x5t
            ))),
            (None, None) => unique_key(jwks.keys_for_alg(signature_alg), signature_alg),
        };
    }

    let compatible = candidates
        .iter()
        .copied()
        .filter(|key| check_key_compatibility(key, signature_alg).is_ok())
        .collect::<Vec<_>>();
    if compatible.is_empty() {
        // Verifying with the matched key reports why it cannot be used.
        Ok(candidates[0])
    } else {
        unique_key(compatible, signature_alg)
    }
}

fn unique_key<'a>(
    keys: Vec<&'a JsonWebKey>,
    signature_alg: &JwsSigningAlgorithm,
) -> Result<&'a JsonWebKey, TokenValidationError> {
    match keys.as_slice() {
        [] => Err(TokenValidationError::UnknownSigningKey(format!(
            "token names no key and no key supports `{}`",
            signature_alg.name()
        ))),
        [key] => Ok(*key),
        _ => Err(TokenValidationError::InvalidSignature(
            SignatureVerificationError::AmbiguousKeyId(format!(
                "JWK set must only contain one eligible public key, but found {} eligible keys: {}",
                keys.len(),
                keys.iter()
                    .map(|key| key
                        .key_id()
                        .map(|kid| format!("`{}`", kid.as_str()))
                        .unwrap_or_else(|| "null ID".to_string()))
                    .join(", ")
            )),
        )),
    }
}

// True if `later` is more than `skew` after `earlier`.
fn exceeds(later: DateTime<Utc>, earlier: DateTime<Utc>, skew: Duration) -> bool {
    (later - earlier)
        .to_std()
        .map(|difference| difference > skew)
        .unwrap_or(false)
}
