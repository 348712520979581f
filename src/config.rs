use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error validating a [`TenantConfig`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required value is empty.
    #[error("Missing required configuration value `{0}`")]
    MissingValue(&'static str),
    /// The authority is not a valid absolute `https` URL.
    #[error("Invalid authority `{0}`: {1}")]
    InvalidAuthority(String, String),
    /// The default HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Identifiers of the protected application and the directory tenant that issues its tokens.
///
/// Loading these values is left to the caller; any serde format works.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct TenantConfig {
    client_id: String,
    tenant: String,
    tenant_id: String,
    valid_audiences: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    authority: Option<String>,
}
impl TenantConfig {
    /// Creates a validated configuration.
    ///
    /// `tenant` is the tenant name (e.g., `contoso.onmicrosoft.com`) and `valid_audiences` the
    /// audiences a token must name at least one of, in order of preference.
    pub fn new(
        client_id: String,
        tenant: String,
        tenant_id: String,
        valid_audiences: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            client_id,
            tenant,
            tenant_id,
            valid_audiences,
            authority: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Overrides the discovery authority (defaults to `https://sts.windows.net/{tenant}/`).
    pub fn set_authority(mut self, authority: String) -> Result<Self, ConfigError> {
        self.authority = Some(authority);
        self.validate()?;
        Ok(self)
    }

    /// Checks that every identifier is present and the authority (if any) is usable.
    ///
    /// Deserialized configurations are not validated until this is called.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::MissingValue("client_id"));
        }
        if self.tenant.trim().is_empty() {
            return Err(ConfigError::MissingValue("tenant"));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(ConfigError::MissingValue("tenant_id"));
        }
        if self.valid_audiences.is_empty()
            || self
                .valid_audiences
                .iter()
                .any(|audience| audience.trim().is_empty())
        {
            return Err(ConfigError::MissingValue("valid_audiences"));
        }
        self.authority().map(|_| ())
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn valid_audiences(&self) -> &[String] {
        &self.valid_audiences
    }

    /// Returns the URL whose `.well-known/openid-configuration` describes the signing keys.
    pub fn authority(&self) -> Result<url::Url, ConfigError> {
        let authority = self
            .authority
            .clone()
            .unwrap_or_else(|| format!("https://sts.windows.net/{}/", self.tenant));
        let url = url::Url::parse(&authority)
            .map_err(|err| ConfigError::InvalidAuthority(authority.clone(), err.to_string()))?;
        if url.scheme() != "https" {
            return Err(ConfigError::InvalidAuthority(
                authority,
                "scheme must be `https`".to_string(),
            ));
        }
        Ok(url)
    }
}
