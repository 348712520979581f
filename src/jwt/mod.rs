use crate::jwk::{JsonWebKey, JsonWebKeyId, JwsSigningAlgorithm, SignatureVerificationError};

use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};


/// Value of the JOSE `alg` header parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum JsonWebTokenAlgorithm {
    /// A registered digital signature or MAC algorithm.
    Signature(JwsSigningAlgorithm),
    /// No digital signature or MAC performed.
    ///
    /// # Security Warning
    ///
    /// Unsecured tokens are never accepted. See
    /// [Critical vulnerabilities in JSON Web Token libraries](
    ///     https://auth0.com/blog/critical-vulnerabilities-in-json-web-token-libraries/).
    None,
    /// Any other value, such as a JWE key management algorithm.
    Unsupported(String),
}
impl JsonWebTokenAlgorithm {
    /// Returns the algorithm name as it appears in the JOSE header.
    pub fn name(&self) -> String {
        match self {
            JsonWebTokenAlgorithm::Signature(alg) => alg.name(),
            JsonWebTokenAlgorithm::None => "none".to_string(),
            JsonWebTokenAlgorithm::Unsupported(alg) => alg.clone(),
        }
    }
}
impl<'de> Deserialize<'de> for JsonWebTokenAlgorithm {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // NB: These comparisons are case-sensitive. Section 4.1.1 of RFC 7515 states: "The "alg"
        // value is a case-sensitive ASCII string containing a StringOrURI value."
        if s.is_empty() {
            Err(D::Error::custom("empty JSON Web Algorithm"))
        } else if s == "none" {
            Ok(JsonWebTokenAlgorithm::None)
        } else if let Ok(alg) = serde_plain::from_str::<JwsSigningAlgorithm>(&s) {
            Ok(JsonWebTokenAlgorithm::Signature(alg))
        } else {
            Ok(JsonWebTokenAlgorithm::Unsupported(s))
        }
    }
}
impl Serialize for JsonWebTokenAlgorithm {
    fn serialize<SE>(&self, serializer: SE) -> Result<SE::Ok, SE::Error>
    where
        SE: Serializer,
    {
        match self {
            JsonWebTokenAlgorithm::Signature(ref sig) => sig.serialize(serializer),
            JsonWebTokenAlgorithm::None => serializer.serialize_str("none"),
            JsonWebTokenAlgorithm::Unsupported(ref other) => serializer.serialize_str(other),
        }
    }
}

/// JOSE header of a signed JSON Web Token.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct JsonWebTokenHeader {
    pub alg: JsonWebTokenAlgorithm,
    // Additional critical header parameters that must be understood by this implementation. Since
    // we don't understand any such extensions, any JWT with this value present is rejected.
    // See https://tools.ietf.org/html/rfc7515#section-4.1.11.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crit: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<JsonWebKeyId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    /// X.509 certificate SHA-1 thumbprint. Older v1 access tokens carry it alongside `kid`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5t: Option<String>,
}

/// A compact-serialized JWS whose signature and claims have not been checked yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnverifiedJsonWebToken {
    header: JsonWebTokenHeader,
    claims: Map<String, Value>,
    signature: Vec<u8>,
    signing_input: String,
}
impl UnverifiedJsonWebToken {
    /// Splits and decodes a compact JWS.
    ///
    /// The error message never includes the token or payload contents, since callers may log
    /// it.
    pub fn parse(raw_token: &str) -> Result<Self, String> {
        let parts = raw_token.split('.').collect::<Vec<_>>();
        if parts.len() != 3 {
            return Err(format!(
                "invalid JSON web token: found {} parts (expected 3)",
                parts.len()
            ));
        }

        let header_json = BASE64_URL_SAFE_NO_PAD
            .decode(parts[0])
            .map_err(|err| format!("invalid base64url header encoding: {:?}", err))?;
        let header: JsonWebTokenHeader = serde_json::from_slice(&header_json)
            .map_err(|err| format!("failed to parse header JSON: {}", err))?;

        let raw_payload = BASE64_URL_SAFE_NO_PAD
            .decode(parts[1])
            .map_err(|err| format!("invalid base64url payload encoding: {:?}", err))?;
        let claims = match serde_json::from_slice::<Value>(&raw_payload)
            .map_err(|err| format!("failed to parse payload JSON: {}", err))?
        {
            Value::Object(claims) => claims,
            _ => return Err("payload must be a JSON object".to_string()),
        };

        let signature = BASE64_URL_SAFE_NO_PAD
            .decode(parts[2])
            .map_err(|err| format!("invalid base64url signature encoding: {:?}", err))?;

        Ok(Self {
            header,
            claims,
            signature,
            signing_input: format!("{}.{}", parts[0], parts[1]),
        })
    }

    pub fn header(&self) -> &JsonWebTokenHeader {
        &self.header
    }

    /// Returns the claims without any verification.
    pub fn unverified_claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    pub(crate) fn into_claims(self) -> Map<String, Value> {
        self.claims
    }

    /// Checks the signature over `header.payload` with `key`.
    pub fn verify_signature(
        &self,
        signature_alg: &JwsSigningAlgorithm,
        key: &JsonWebKey,
    ) -> Result<(), SignatureVerificationError> {
        key.verify_signature(
            signature_alg,
            self.signing_input.as_bytes(),
            &self.signature,
        )
    }
}
