use crate::config::{ConfigError, TenantConfig};
use crate::discovery::ProviderMetadataDiscoveryOptions;
use crate::identity::ValidatedIdentity;
use crate::issuer::IssuerPolicy;
use crate::jwk::JwsSigningAlgorithm;
use crate::key_source::SigningKeySource;
use crate::verification::{TokenValidationError, TokenVerifier};
use crate::AsyncHttpClient;

use chrono::{DateTime, Utc};

use std::sync::Arc;
use std::time::Duration;


/// Validates bearer access tokens for one application in one directory tenant.
///
/// A service owns the signing key cache for its authority and is meant to be constructed once
/// and shared (e.g., behind an [`Arc`]) by every request handler.
///
/// # Example
///
/// ```no_run
/// # #[cfg(feature = "reqwest")]
/// # async fn validate(authorization: &str) -> Result<(), Box<dyn std::error::Error>> {
/// use bearer_token_validator::{bearer_token, TenantConfig, ValidationService};
///
/// let config = TenantConfig::new(
///     "6e74172b-be56-4843-9ff4-e66a39bb12e3".to_string(),
///     "contoso.onmicrosoft.com".to_string(),
///     "dc17aef1-0000-4000-8000-000000000000".to_string(),
///     vec!["https://app.example".to_string()],
/// )?;
/// let service = ValidationService::with_reqwest(config)?;
///
/// let token = bearer_token(authorization).ok_or("missing bearer token")?;
/// let identity = service.validate_access_token(token).await?;
/// println!("caller: {:?}", identity.object_id());
/// # Ok(())
/// # }
/// ```
pub struct ValidationService<C> {
    config: TenantConfig,
    issuer_policy: IssuerPolicy,
    key_source: SigningKeySource<C>,
    verifier: TokenVerifier,
    accept_client_id_audience: bool,
}
impl<C> ValidationService<C>
where
    C: for<'c> AsyncHttpClient<'c>,
{
    /// Creates a service fetching signing keys through `http_client`.
    ///
    /// Fails if `config` does not validate. No network access happens until the first token is
    /// validated.
    pub fn new(config: TenantConfig, http_client: C) -> Result<Self, ConfigError> {
        config.validate()?;
        let issuer_policy = IssuerPolicy::default();
        let verifier = TokenVerifier::new(
            issuer_policy.acceptable_issuers(config.tenant(), config.tenant_id()),
            config.valid_audiences().to_vec(),
        );
        Ok(Self {
            key_source: SigningKeySource::new(config.authority()?, http_client),
            config,
            issuer_policy,
            verifier,
            accept_client_id_audience: false,
        })
    }

    pub fn config(&self) -> &TenantConfig {
        &self.config
    }

    pub fn issuer_policy(&self) -> &IssuerPolicy {
        &self.issuer_policy
    }

    pub fn key_source(&self) -> &SigningKeySource<C> {
        &self.key_source
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Specifies the allowed clock skew when checking `exp` and `nbf` (defaults to 5 minutes).
    pub fn set_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.verifier = self.verifier.set_clock_skew(clock_skew);
        self
    }

    /// Sets the allowed signature algorithms (defaults to `RS256` only).
    pub fn set_allowed_algs<I>(mut self, algs: I) -> Self
    where
        I: IntoIterator<Item = JwsSigningAlgorithm>,
    {
        self.verifier = self.verifier.set_allowed_algs(algs);
        self
    }

    /// Replaces the issuer templates, e.g. with [`IssuerPolicy::all_known_variants`].
    pub fn set_issuer_policy(mut self, issuer_policy: IssuerPolicy) -> Self {
        self.verifier = self.verifier.set_acceptable_issuers(
            issuer_policy.acceptable_issuers(self.config.tenant(), self.config.tenant_id()),
        );
        self.issuer_policy = issuer_policy;
        self
    }

    /// Specifies how long fetched signing keys are used before refreshing (defaults to 12
    /// hours).
    pub fn set_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.key_source = self.key_source.set_refresh_interval(refresh_interval);
        self
    }

    /// Specifies the maximum age of signing keys served while the provider is unreachable
    /// (defaults to 48 hours).
    pub fn set_max_staleness(mut self, max_staleness: Duration) -> Self {
        self.key_source = self.key_source.set_max_staleness(max_staleness);
        self
    }

    /// Specifies the timeout for fetching the discovery document and key set (defaults to 10
    /// seconds).
    pub fn set_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.key_source = self.key_source.set_fetch_timeout(fetch_timeout);
        self
    }

    /// Specifies the minimum time between refreshes triggered by unknown key IDs (defaults to 5
    /// minutes).
    pub fn set_min_forced_refresh_interval(mut self, interval: Duration) -> Self {
        self.key_source = self.key_source.set_min_forced_refresh_interval(interval);
        self
    }

    /// Specifies how long after a failed refresh callers get the stale keys (or the failure)
    /// without another fetch (defaults to 30 seconds).
    pub fn set_min_retry_interval(mut self, interval: Duration) -> Self {
        self.key_source = self.key_source.set_min_retry_interval(interval);
        self
    }

    pub fn set_discovery_options(mut self, options: ProviderMetadataDiscoveryOptions) -> Self {
        self.key_source = self.key_source.set_discovery_options(options);
        self
    }

    /// Specifies a function for returning the current time, used both for token lifetimes and
    /// for the key cache.
    pub fn set_time_fn<T>(mut self, time_fn: T) -> Self
    where
        T: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        let time_fn = Arc::new(time_fn);
        let key_source_time_fn = time_fn.clone();
        self.key_source = self
            .key_source
            .set_time_fn(move || key_source_time_fn());
        self.verifier = self.verifier.set_time_fn(move || time_fn());
        self
    }

    /// Also accepts tokens whose audience is the client ID rather than one of the configured
    /// audiences (v2.0 tokens use the client ID as `aud`).
    pub fn accept_client_id_audience(mut self, accept: bool) -> Self {
        self.accept_client_id_audience = accept;
        let mut audiences = self.config.valid_audiences().to_vec();
        if accept && !audiences.iter().any(|aud| aud == self.config.client_id()) {
            audiences.push(self.config.client_id().to_string());
        }
        self.verifier = self.verifier.set_audiences(audiences);
        self
    }

    /// Accepts tokens from any issuer.
    ///
    /// # Security Warning
    ///
    /// Any tenant of the identity provider can then mint tokens this service accepts, provided
    /// they name an accepted audience.
    pub fn insecure_disable_issuer_check(mut self) -> Self {
        self.verifier = self.verifier.insecure_disable_issuer_check();
        self
    }

    /// Validates a raw access token (without the `Bearer ` prefix).
    ///
    /// Tokens that fail to parse are rejected as [`TokenValidationError::Malformed`] before any
    /// signing keys are fetched.
    ///
    /// A token signed by a key missing from the cached key set triggers one refresh of the key
    /// set and one more attempt.
    pub async fn validate_access_token(
        &self,
        raw_token: &str,
    ) -> Result<ValidatedIdentity, TokenValidationError> {
        let token = self.verifier.parse(raw_token)?;
        let metadata = self.key_source.current_keys().await?;
        match self.verifier.verify_parsed(&token, metadata.jwks()) {
            Err(TokenValidationError::UnknownSigningKey(detail)) => {
                log::debug!("{}; refreshing signing keys", detail);
                let refreshed = self.key_source.force_refresh(&metadata).await?;
                self.verifier.verify_parsed(&token, refreshed.jwks())
            }
            result => result,
        }
    }
}

#[cfg(feature = "reqwest")]
impl ValidationService<oauth2::reqwest::Client> {
    /// Creates a service using a `reqwest` client that does not follow redirects.
    pub fn with_reqwest(config: TenantConfig) -> Result<Self, ConfigError> {
        let http_client = oauth2::reqwest::ClientBuilder::new()
            // Following redirects opens the client up to SSRF vulnerabilities.
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;
        Self::new(config, http_client)
    }
}
