use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;

const TENANT_PLACEHOLDER: &str = "{tenant}";
const TENANT_ID_PLACEHOLDER: &str = "{tenantid}";

/// Issuer of v2.0 access tokens.
pub const V2_ISSUER_TEMPLATE: &str = "https://login.microsoftonline.com/{tenantid}/v2.0";
/// Issuer of v1.0 access tokens.
pub const V1_ISSUER_TEMPLATE: &str = "https://sts.windows.net/{tenantid}/";

new_type![
    /// Issuer strings a token's `iss` claim must match exactly.
    #[derive(Default)]
    pub AcceptableIssuers(BTreeSet<String>)
];
impl FromIterator<String> for AcceptableIssuers {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        AcceptableIssuers(iter.into_iter().collect())
    }
}

/// Templates from which the acceptable issuers of a tenant are derived.
///
/// `{tenant}` is replaced with the tenant name (e.g., `contoso.onmicrosoft.com`) and `{tenantid}`
/// with the tenant ID.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IssuerPolicy {
    templates: Vec<String>,
}
impl IssuerPolicy {
    pub fn new(templates: Vec<String>) -> Self {
        Self { templates }
    }

    /// Every issuer form the identity platform has been observed to emit, keyed by tenant name or
    /// tenant ID, v1.0 or v2.0, across `login.microsoftonline.com`, `sts.windows.net`,
    /// `login.windows.net` and `login.microsoft.com`.
    pub fn all_known_variants() -> Self {
        Self::new(
            [
                "https://login.microsoftonline.com/{tenant}/",
                "https://login.microsoftonline.com/{tenant}/v2.0",
                "https://login.microsoftonline.com/{tenantid}/",
                V2_ISSUER_TEMPLATE,
                "https://login.windows.net/{tenant}/",
                "https://login.microsoft.com/{tenant}/",
                V1_ISSUER_TEMPLATE,
            ]
            .iter()
            .map(|template| template.to_string())
            .collect(),
        )
    }

    pub fn add_template<T>(mut self, template: T) -> Self
    where
        T: Into<String>,
    {
        self.templates.push(template.into());
        self
    }

    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    /// Expands the templates for a tenant.
    pub fn acceptable_issuers(&self, tenant: &str, tenant_id: &str) -> AcceptableIssuers {
        self.templates
            .iter()
            .map(|template| {
                template
                    .replace(TENANT_ID_PLACEHOLDER, tenant_id)
                    .replace(TENANT_PLACEHOLDER, tenant)
            })
            .collect()
    }
}
impl Default for IssuerPolicy {
    /// The v2.0 and v1.0 issuers keyed by tenant ID.
    fn default() -> Self {
        Self::new(vec![
            V2_ISSUER_TEMPLATE.to_string(),
            V1_ISSUER_TEMPLATE.to_string(),
        ])
    }
}
