use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{from_value, Value};

use std::error::Error;
use std::fmt::Write;

// Attempt to deserialize the value; if the value is null or an error occurs, return None.
// The fields in JWKs are not well defined; extensions could theoretically define their own
// field names that overload field names used by other JWK types.
pub(crate) fn deserialize_option_or_none<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: serde::de::DeserializeOwned,
    D: Deserializer<'de>,
{
    let value: Value = Deserialize::deserialize(deserializer)?;
    match from_value::<Option<T>>(value) {
        Ok(val) => Ok(val),
        Err(_) => Ok(None),
    }
}

/// Reads a claim that may hold either a single string or an array of strings (e.g., `aud`).
///
/// Returns `Ok(None)` if the claim is absent and `Err` with a description if it has any other
/// shape.
pub(crate) fn string_or_vec_claim(value: Option<&Value>) -> Result<Option<Vec<String>>, String> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(single)) => Ok(Some(vec![single.clone()])),
        Some(Value::Array(values)) => values
            .iter()
            .map(|value| match value {
                Value::String(s) => Ok(s.clone()),
                other => Err(format!("expected string array element, found `{}`", other)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(other) => Err(format!("expected string or string array, found `{}`", other)),
    }
}

/// Converts a numeric JWT timestamp (seconds since the epoch, possibly fractional) to UTC.
pub(crate) fn timestamp_to_utc(seconds: &serde_json::Number) -> Result<DateTime<Utc>, ()> {
    let (secs, nsecs) = if let Some(secs) = seconds.as_i64() {
        (secs, 0u32)
    } else {
        let secs_f64 = seconds.as_f64().ok_or(())?;
        if !secs_f64.is_finite() {
            return Err(());
        }
        let secs = secs_f64.floor();
        (
            secs as i64,
            ((secs_f64 - secs) * 1_000_000_000.).floor() as u32,
        )
    };
    Utc.timestamp_opt(secs, nsecs).single().ok_or(())
}

/// Reads an optional numeric date claim (`exp`, `nbf`, `iat`).
pub(crate) fn timestamp_claim(
    claim_name: &str,
    value: Option<&Value>,
) -> Result<Option<DateTime<Utc>>, String> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(seconds)) => timestamp_to_utc(seconds).map(Some).map_err(|_| {
            format!(
                "failed to parse `{}` claim `{}` as UTC datetime (in seconds)",
                claim_name, seconds
            )
        }),
        Some(other) => Err(format!(
            "`{}` claim must be a number of seconds (found `{}`)",
            claim_name, other
        )),
    }
}

/// Renders an error followed by each of its sources, separated by `: `.
pub(crate) fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        // Writing into a String cannot fail.
        let _ = write!(message, ": {}", cause);
        source = cause.source();
    }
    message
}

new_type![
    #[derive(Deserialize, Hash, Serialize)]
    pub(crate) Base64UrlEncodedBytes(
        #[serde(with = "serde_base64url_byte_array")]
        Vec<u8>
    )
];

impl AsRef<[u8]> for Base64UrlEncodedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

mod serde_base64url_byte_array {
    use super::*;

    use serde::de::Error;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Value = Deserialize::deserialize(deserializer)?;
        let base64_encoded: String = from_value(value).map_err(D::Error::custom)?;

        BASE64_URL_SAFE_NO_PAD
            .decode(&base64_encoded)
            .map_err(|err| {
                D::Error::custom(format!(
                    "invalid base64url encoding `{}`: {:?}",
                    base64_encoded, err
                ))
            })
    }

    pub fn serialize<S>(v: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let base64_encoded = BASE64_URL_SAFE_NO_PAD.encode(v);
        serializer.serialize_str(&base64_encoded)
    }
}
