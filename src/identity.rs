use crate::helpers::{string_or_vec_claim, timestamp_claim};
use crate::jwk::{JsonWebKeyId, JwsSigningAlgorithm};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// The claims of an access token that passed every check.
///
/// The claim set is exactly the token payload; accessors are conveniences over it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedIdentity {
    claims: Map<String, Value>,
    key_id: Option<JsonWebKeyId>,
    algorithm: JwsSigningAlgorithm,
}
impl ValidatedIdentity {
    pub(crate) fn new(
        claims: Map<String, Value>,
        key_id: Option<JsonWebKeyId>,
        algorithm: JwsSigningAlgorithm,
    ) -> Self {
        Self {
            claims,
            key_id,
            algorithm,
        }
    }

    /// Returns every claim in the token payload.
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    pub fn into_claims(self) -> Map<String, Value> {
        self.claims
    }

    /// Returns a single claim by name.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// ID of the key that verified the signature, if the key set published one.
    pub fn key_id(&self) -> Option<&JsonWebKeyId> {
        self.key_id.as_ref()
    }

    pub fn algorithm(&self) -> JwsSigningAlgorithm {
        self.algorithm
    }

    /// Subject (`sub`) claim.
    pub fn subject(&self) -> Option<&str> {
        self.string_claim("sub")
    }

    /// Issuer (`iss`) claim.
    pub fn issuer(&self) -> Option<&str> {
        self.string_claim("iss")
    }

    /// Audiences (`aud`) claim, which may be a single string or an array in the token.
    pub fn audiences(&self) -> Vec<String> {
        string_or_vec_claim(self.claims.get("aud"))
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Directory tenant (`tid`) claim.
    pub fn tenant_id(&self) -> Option<&str> {
        self.string_claim("tid")
    }

    /// Directory object ID (`oid`) claim.
    pub fn object_id(&self) -> Option<&str> {
        self.string_claim("oid")
    }

    /// Application roles (`roles`) granted to the caller.
    pub fn roles(&self) -> Vec<String> {
        string_or_vec_claim(self.claims.get("roles"))
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Delegated scopes from the space-separated `scp` claim.
    pub fn scopes(&self) -> Vec<String> {
        self.string_claim("scp")
            .map(|scp| scp.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Expiration time (`exp`) claim.
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        timestamp_claim("exp", self.claims.get("exp")).ok().flatten()
    }

    fn string_claim(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }
}
