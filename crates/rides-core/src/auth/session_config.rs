use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::app_probe::{CompanionApp, SsoFlow};
use super::scope::{self, Scope, ScopeSet};

/// Regional deployment of the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointRegion {
    #[default]
    Default,
    China,
}

impl EndpointRegion {
    pub fn domain(self) -> &'static str {
        match self {
            EndpointRegion::Default => "uber.com",
            EndpointRegion::China => "uber.com.cn",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Production,
    Sandbox,
}

impl Environment {
    fn api_subdomain(self) -> &'static str {
        match self {
            Environment::Production => "api",
            Environment::Sandbox => "sandbox-api",
        }
    }
}

/// Details used to prefill the provider's sign-in form through a pushed
/// authorization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefillInfo {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(rename = "phone")]
    pub phone_number: String,
}

impl PrefillInfo {
    /// Base64 of the JSON document, as expected by the `login_hint` field.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(json))
    }
}

/// OpenID `prompt` value forwarded to the authorization endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prompt {
    /// Ask the user to sign in again and authorize.
    Login,
    /// Ask only for authorization.
    Consent,
}

impl Prompt {
    pub fn as_str(self) -> &'static str {
        match self {
            Prompt::Login => "login",
            Prompt::Consent => "consent",
        }
    }
}

/// Caller-supplied session settings carried through a whole login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub client_id: String,
    pub redirect_uri: Option<String>,
    pub scopes: ScopeSet,
    pub custom_scopes: BTreeSet<String>,
    pub server_token: Option<String>,
    pub endpoint_region: EndpointRegion,
    pub environment: Environment,
    pub prefill: Option<PrefillInfo>,
    pub prompt: Option<Prompt>,
}

impl SessionConfig {
    pub fn new<S: Into<String>>(client_id: S) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: None,
            scopes: ScopeSet::new(),
            custom_scopes: BTreeSet::new(),
            server_token: None,
            endpoint_region: EndpointRegion::Default,
            environment: Environment::Production,
            prefill: None,
            prompt: None,
        }
    }

    pub fn with_redirect_uri<S: Into<String>>(mut self, redirect_uri: S) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn with_scopes<I>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = Scope>,
    {
        self.scopes = scopes.into_iter().collect();
        self
    }

    pub fn with_custom_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.custom_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_region(mut self, region: EndpointRegion) -> Self {
        self.endpoint_region = region;
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_prefill(mut self, prefill: PrefillInfo) -> Self {
        self.prefill = Some(prefill);
        self
    }

    pub fn with_prompt(mut self, prompt: Prompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn has_scopes(&self) -> bool {
        !self.scopes.is_empty() || !self.custom_scopes.is_empty()
    }

    /// Standard and custom scopes merged into the request form.
    pub fn scope_string(&self) -> String {
        let standard = scope::to_space_delimited(&self.scopes);
        let custom = self.custom_scopes.iter().collect::<Vec<_>>();
        scope::merge_custom(&standard, &custom)
    }

    pub fn login_host(&self) -> String {
        format!("https://auth.{}", self.endpoint_region.domain())
    }

    pub fn api_host(&self) -> String {
        format!(
            "https://{}.{}",
            self.environment.api_subdomain(),
            self.endpoint_region.domain()
        )
    }
}

/// Per-orchestrator routing options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOptions {
    /// Fall back to the authorization-code web flow when privileged scopes are
    /// requested and no companion app qualifies.
    pub auth_code_fallback: bool,
    /// Companion apps to try for SSO, in order. Empty means the default order.
    pub product_priority: Vec<CompanionApp>,
    /// Deprecated switch from older integrations; flagged by the legacy guard.
    pub force_auth_code: bool,
    /// Attach a PKCE challenge to authorization-code requests.
    pub pkce: bool,
    /// How a companion app returns its result. The redirect variant needs a newer
    /// rider app and a redirect URI delivered to this host.
    pub sso_flow: SsoFlow,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            auth_code_fallback: false,
            product_priority: Vec::new(),
            force_auth_code: false,
            pkce: true,
            sso_flow: SsoFlow::Default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_string_merges_custom_scopes() {
        let config = SessionConfig::new("client")
            .with_scopes([Scope::Profile, Scope::History])
            .with_custom_scopes(["partner.accounts"]);
        assert_eq!(config.scope_string(), "history profile partner.accounts");
    }

    #[test]
    fn derived_config_leaves_original_untouched() {
        let base = SessionConfig::new("client").with_scopes([Scope::Profile]);
        let derived = base.clone().with_scopes([Scope::Request]);
        assert_eq!(base.scopes, ScopeSet::from([Scope::Profile]));
        assert_eq!(derived.scopes, ScopeSet::from([Scope::Request]));
    }

    #[test]
    fn hosts_follow_region_and_environment() {
        let config = SessionConfig::new("client")
            .with_region(EndpointRegion::China)
            .with_environment(Environment::Sandbox);
        assert_eq!(config.login_host(), "https://auth.uber.com.cn");
        assert_eq!(config.api_host(), "https://sandbox-api.uber.com.cn");
    }

    #[test]
    fn prefill_encodes_as_base64_json() {
        let prefill = PrefillInfo {
            email: "rider@example.com".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            phone_number: "5550100".into(),
        };
        let encoded = prefill.encode().unwrap();
        let decoded = STANDARD.decode(encoded).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(json["phone"], "5550100");
        assert_eq!(json["first_name"], "Ada");
    }
}
