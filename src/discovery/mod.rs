use crate::http_utils::{check_content_type, MIME_TYPE_JSON};
use crate::jwk::{JsonWebKeySet, JwsSigningAlgorithm};
use crate::{AsyncHttpClient, HttpRequest, HttpResponse};

use http::header::{HeaderValue, ACCEPT};
use http::method::Method;
use http::status::StatusCode;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none, VecSkipError};
use thiserror::Error;


const CONFIG_URL_SUFFIX: &str = ".well-known/openid-configuration";

/// The subset of [OpenID Connect Discovery](
/// https://openid.net/specs/openid-connect-discovery-1_0.html#ProviderMetadata) metadata needed
/// to verify tokens, together with the provider's signing keys.
///
/// A `ProviderMetadata` returned by [`ProviderMetadata::discover_async`] always carries the key
/// set fetched from its `jwks_uri`.
#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct ProviderMetadata {
    issuer: String,
    jwks_uri: url::Url,
    #[serde(default = "JsonWebKeySet::default", skip)]
    jwks: JsonWebKeySet,
    #[serde_as(as = "Option<VecSkipError<_>>")]
    id_token_signing_alg_values_supported: Option<Vec<JwsSigningAlgorithm>>,
}
impl ProviderMetadata {
    /// Instantiates new provider metadata with an empty key set.
    pub fn new(issuer: String, jwks_uri: url::Url) -> Self {
        Self {
            issuer,
            jwks_uri,
            jwks: JsonWebKeySet::default(),
            id_token_signing_alg_values_supported: None,
        }
    }

    /// Returns the `issuer` published in the discovery document.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn jwks_uri(&self) -> &url::Url {
        &self.jwks_uri
    }

    /// Returns the provider's signing keys.
    pub fn jwks(&self) -> &JsonWebKeySet {
        &self.jwks
    }

    /// Replaces the signing keys.
    pub fn set_jwks(mut self, jwks: JsonWebKeySet) -> Self {
        self.jwks = jwks;
        self
    }

    pub fn id_token_signing_alg_values_supported(&self) -> Option<&Vec<JwsSigningAlgorithm>> {
        self.id_token_signing_alg_values_supported.as_ref()
    }

    /// Asynchronously fetches the OpenID Connect Discovery document for `authority` and the JSON
    /// Web Key Set it points to.
    ///
    /// Either both documents are fetched and parsed successfully or an error is returned.
    pub async fn discover_async<'c, C>(
        authority: &url::Url,
        http_client: &'c C,
        options: ProviderMetadataDiscoveryOptions,
    ) -> Result<Self, DiscoveryError<<C as AsyncHttpClient<'c>>::Error>>
    where
        C: AsyncHttpClient<'c>,
    {
        let discovery_url = discovery_url(authority).map_err(DiscoveryError::UrlParse)?;
        log::debug!("fetching provider metadata from {}", discovery_url);

        let provider_metadata = http_client
            .call(
                Self::discovery_request(&discovery_url).map_err(|err| {
                    DiscoveryError::Other(format!("failed to prepare request: {err}"))
                })?,
            )
            .await
            .map_err(DiscoveryError::Request)
            .and_then(|http_response| {
                Self::discovery_response(authority, &discovery_url, http_response, &options)
            })?;

        log::debug!("fetching JSON Web Key Set from {}", provider_metadata.jwks_uri());
        let jwks = JsonWebKeySet::fetch_async(provider_metadata.jwks_uri(), http_client).await?;
        Ok(provider_metadata.set_jwks(jwks))
    }

    fn discovery_request(discovery_url: &url::Url) -> Result<HttpRequest, http::Error> {
        http::Request::builder()
            .uri(discovery_url.to_string())
            .method(Method::GET)
            .header(ACCEPT, HeaderValue::from_static(MIME_TYPE_JSON))
            .body(Vec::new())
    }

    fn discovery_response<RE>(
        authority: &url::Url,
        discovery_url: &url::Url,
        discovery_response: HttpResponse,
        options: &ProviderMetadataDiscoveryOptions,
    ) -> Result<Self, DiscoveryError<RE>>
    where
        RE: std::error::Error + 'static,
    {
        if discovery_response.status() != StatusCode::OK {
            return Err(DiscoveryError::Response(
                discovery_response.status(),
                discovery_response.body().to_owned(),
                format!(
                    "HTTP status code {} at {}",
                    discovery_response.status(),
                    discovery_url
                ),
            ));
        }

        check_content_type(discovery_response.headers(), MIME_TYPE_JSON).map_err(|err_msg| {
            DiscoveryError::Response(
                discovery_response.status(),
                discovery_response.body().to_owned(),
                err_msg,
            )
        })?;

        let provider_metadata = serde_path_to_error::deserialize::<_, Self>(
            &mut serde_json::Deserializer::from_slice(discovery_response.body()),
        )
        .map_err(DiscoveryError::Parse)?;

        if options.validate_issuer_url
            && provider_metadata.issuer().trim_end_matches('/')
                != authority.as_str().trim_end_matches('/')
        {
            Err(DiscoveryError::Validation(format!(
                "unexpected issuer URI `{}` (expected `{}`)",
                provider_metadata.issuer(),
                authority.as_str()
            )))
        } else {
            Ok(provider_metadata)
        }
    }
}

// `Url::join` replaces the last path segment unless the base ends with a slash, so
// `https://login.microsoftonline.com/{tenant}/v2.0` must become `.../v2.0/` first.
fn discovery_url(authority: &url::Url) -> Result<url::Url, url::ParseError> {
    if authority.path().ends_with('/') {
        authority.join(CONFIG_URL_SUFFIX)
    } else {
        let mut base = authority.clone();
        base.set_path(&format!("{}/", authority.path()));
        base.join(CONFIG_URL_SUFFIX)
    }
}

/// Options for [`ProviderMetadata::discover_async`].
#[derive(Clone, Debug, Default)]
pub struct ProviderMetadataDiscoveryOptions {
    validate_issuer_url: bool,
}

impl ProviderMetadataDiscoveryOptions {
    /// If the issuer in the discovered provider metadata should be checked against the
    /// authority used to fetch the provider metadata.
    ///
    /// Disabled by default: a tenant-name authority (e.g., `contoso.onmicrosoft.com`) publishes
    /// an issuer keyed by the tenant ID.
    pub fn validate_issuer_url(mut self, value: bool) -> Self {
        self.validate_issuer_url = value;
        self
    }
}

/// Error retrieving provider metadata or its key set.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError<RE>
where
    RE: std::error::Error + 'static,
{
    /// An unexpected error occurred.
    #[error("Other error: {0}")]
    Other(String),
    /// Failed to parse server response.
    #[error("Failed to parse server response")]
    Parse(#[source] serde_path_to_error::Error<serde_json::Error>),
    /// An error occurred while sending the request or receiving the response (e.g., network
    /// connectivity failed).
    #[error("Request failed")]
    Request(#[source] RE),
    /// Server returned an invalid response.
    #[error("Server returned invalid response: {2}")]
    Response(StatusCode, Vec<u8>, String),
    /// Failed to build the discovery URL from the authority.
    #[error("Failed to parse URL")]
    UrlParse(#[source] url::ParseError),
    /// Failed to validate provider metadata.
    #[error("Validation error: {0}")]
    Validation(String),
}
