//!
//! Relying-party validation of [OpenID Connect](https://openid.net/specs/openid-connect-core-1_0.html)
//! bearer access tokens issued by a directory tenant of the Microsoft identity platform (or any
//! provider publishing a discovery document and JSON Web Key Set).
//!
//! # Overview
//!
//! A resource server builds one [`ValidationService`] from its [`TenantConfig`] and calls
//! [`ValidationService::validate_access_token`] for every incoming request. The service:
//!
//!  * fetches `{authority}/.well-known/openid-configuration` and the key set at its `jwks_uri`,
//!    caching both in a [`SigningKeySource`] that refreshes them every 12 hours and keeps serving
//!    them for up to 48 hours while the provider is unreachable;
//!  * verifies each token with a [`TokenVerifier`]: JOSE header, `exp`/`nbf` (with 5 minutes of
//!    clock skew), signature (`RS256` by default), issuer against the tenant's
//!    [`AcceptableIssuers`], and audience against the configured audiences;
//!  * refreshes the key set once and retries when a token is signed by a key it has not seen
//!    yet, so key rotation is picked up without waiting for the next scheduled refresh.
//!
//! The result is either a [`ValidatedIdentity`] carrying the token's claims or a
//! [`TokenValidationError`] naming exactly why the token was rejected.
//!
//! # HTTP clients
//!
//! Signing keys are fetched through any [`AsyncHttpClient`]. With the default `reqwest` feature,
//! [`ValidationService::with_reqwest`] builds a `reqwest` client that does not follow redirects.
//! Closures of the form `Fn(HttpRequest) -> impl Future<Output = Result<HttpResponse, E>>` also
//! implement [`AsyncHttpClient`], which is convenient for tests.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "reqwest")]
//! # async fn handle(authorization: &str) -> Result<(), Box<dyn std::error::Error>> {
//! use bearer_token_validator::{
//!     bearer_token, IssuerPolicy, TenantConfig, ValidationService,
//! };
//!
//! let config = TenantConfig::new(
//!     "6e74172b-be56-4843-9ff4-e66a39bb12e3".to_string(),
//!     "contoso.onmicrosoft.com".to_string(),
//!     "dc17aef1-0000-4000-8000-000000000000".to_string(),
//!     vec!["api://6e74172b-be56-4843-9ff4-e66a39bb12e3".to_string()],
//! )?;
//! let service = ValidationService::with_reqwest(config)?
//!     .set_issuer_policy(IssuerPolicy::all_known_variants())
//!     .accept_client_id_audience(true);
//!
//! let token = bearer_token(authorization).ok_or("missing bearer token")?;
//! match service.validate_access_token(token).await {
//!     Ok(identity) => println!("roles: {:?}", identity.roles()),
//!     Err(err) if err.is_infrastructure() => eprintln!("cannot validate tokens: {}", err),
//!     Err(err) => println!("rejected token: {}", err),
//! }
//! # Ok(())
//! # }
//! ```
//!

pub use oauth2::{AsyncHttpClient, HttpRequest, HttpResponse};

/// Public re-exports of `reqwest`, which implements [`AsyncHttpClient`].
#[cfg(feature = "reqwest")]
pub use oauth2::reqwest;

#[macro_use]
mod macros;

mod config;
mod discovery;
mod helpers;
mod http_utils;
mod identity;
mod issuer;
mod jwk;
mod jwt;
mod key_source;
mod service;
mod verification;

pub use crate::config::{ConfigError, TenantConfig};
pub use crate::discovery::{DiscoveryError, ProviderMetadata, ProviderMetadataDiscoveryOptions};
pub use crate::http_utils::bearer_token;
pub use crate::identity::ValidatedIdentity;
pub use crate::issuer::{AcceptableIssuers, IssuerPolicy, V1_ISSUER_TEMPLATE, V2_ISSUER_TEMPLATE};
pub use crate::jwk::{
    JsonCurveType, JsonWebKey, JsonWebKeyId, JsonWebKeySet, JsonWebKeyType, JwsSigningAlgorithm,
    SignatureVerificationError,
};
pub use crate::jwt::{JsonWebTokenAlgorithm, JsonWebTokenHeader, UnverifiedJsonWebToken};
pub use crate::key_source::{
    KeySourceError, SigningKeySource, DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_STALENESS,
    DEFAULT_MIN_FORCED_REFRESH_INTERVAL, DEFAULT_MIN_RETRY_INTERVAL, DEFAULT_REFRESH_INTERVAL,
};
pub use crate::service::ValidationService;
pub use crate::verification::{
    RejectionKind, TokenValidationError, TokenVerifier, DEFAULT_CLOCK_SKEW,
};
