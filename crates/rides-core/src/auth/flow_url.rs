//! Authorization URIs for every flow variant, and parsing of what the provider sends back.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use url::Url;

use super::app_probe::{SsoFlow, DEEPLINK_SCHEME};
use super::flow::ResponseType;
use super::pkce::CHALLENGE_METHOD;
use super::scope::{self, ScopeSet};
use super::{AuthError, AuthenticationError, Credential, SessionConfig};

/// Platform tag reported in the `sdk` parameter.
pub const SDK_PLATFORM: &str = "rust";
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

const SSO_HOST: &str = "connect";
const UNIVERSAL_AUTHORIZE_PATH: &str = "/oauth/v2/universal/authorize";
const PAR_PATH: &str = "/oauth/v2/par";
const SIGN_UP_PATH: &str = "/sign-up";

const KEY_ACCESS_TOKEN: &str = "access_token";
const KEY_REFRESH_TOKEN: &str = "refresh_token";
const KEY_TOKEN_TYPE: &str = "token_type";
const KEY_EXPIRES_IN: &str = "expires_in";
const KEY_SCOPE: &str = "scope";
const KEY_CODE: &str = "code";
const KEY_ERROR: &str = "error";

/// Deeplink handed to an installed companion app.
pub fn build_sso_uri(
    config: &SessionConfig,
    scopes: &ScopeSet,
    custom_scopes: &BTreeSet<String>,
    flow: SsoFlow,
) -> Result<Url, AuthError> {
    let custom = custom_scopes.iter().collect::<Vec<_>>();
    let scope = scope::merge_custom(&scope::to_space_delimited(scopes), &custom);

    let mut url = Url::parse(&format!("{DEEPLINK_SCHEME}://{SSO_HOST}"))?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("client_id", &config.client_id);
        pairs.append_pair("scope", &scope);
        pairs.append_pair("sdk", SDK_PLATFORM);
        pairs.append_pair("flow_type", flow.as_str());
        if let Some(redirect_uri) = &config.redirect_uri {
            pairs.append_pair("redirect_uri", redirect_uri);
        }
        pairs.append_pair("sdk_version", SDK_VERSION);
    }
    Ok(url)
}

/// Universal authorization endpoint for the web flows.
///
/// `request_uri` is the reference returned by a pushed authorization request; the
/// provider gives it precedence over the inline parameters.
pub fn build_web_auth_uri(
    flavor: ResponseType,
    config: &SessionConfig,
    code_challenge: Option<&str>,
    request_uri: Option<&str>,
) -> Result<Url, AuthError> {
    let redirect_uri = config
        .redirect_uri
        .as_deref()
        .ok_or(AuthError::MissingRedirectUri)?;

    let mut url = Url::parse(&format!("{}{UNIVERSAL_AUTHORIZE_PATH}", config.login_host()))?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("client_id", &config.client_id);
        pairs.append_pair("response_type", flavor.as_str());
        pairs.append_pair("sdk", SDK_PLATFORM);
        pairs.append_pair("redirect_uri", redirect_uri);
        pairs.append_pair("sdk_version", SDK_VERSION);
        pairs.append_pair("scope", &config.scope_string());
        if let Some(challenge) = code_challenge {
            pairs.append_pair("code_challenge", challenge);
            pairs.append_pair("code_challenge_method", CHALLENGE_METHOD);
        }
        if let Some(request_uri) = request_uri {
            pairs.append_pair("request_uri", request_uri);
        }
        if let Some(prompt) = config.prompt {
            pairs.append_pair("prompt", prompt.as_str());
        }
    }
    Ok(url)
}

/// Sign-up page shown when no companion app can complete the login.
pub fn build_install_uri(config: &SessionConfig) -> Result<Url, AuthError> {
    let mut url = Url::parse(&format!(
        "https://m.{}{SIGN_UP_PATH}",
        config.endpoint_region.domain()
    ))?;
    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair(
            "user-agent",
            &format!("rides-core-v{SDK_VERSION}-login_manager"),
        );
    Ok(url)
}

pub fn par_endpoint(config: &SessionConfig) -> Result<Url, AuthError> {
    Ok(Url::parse(&format!("{}{PAR_PATH}", config.login_host()))?)
}

/// Key/value pairs delivered with a callback, from a redirect URI or from deeplink extras.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackParams(BTreeMap<String, String>);

impl CallbackParams {
    pub fn from_query(url: &Url) -> Self {
        url.query_pairs().collect()
    }

    /// Fragment re-read as a query string.
    pub fn from_fragment(url: &Url) -> Self {
        url.fragment()
            .map(|fragment| url::form_urlencoded::parse(fragment.as_bytes()).collect())
            .unwrap_or_default()
    }

    /// Query parameters overlaid with fragment parameters.
    pub fn from_redirect(url: &Url) -> Self {
        let mut params = Self::from_query(url);
        params.0.extend(Self::from_fragment(url).0);
        params
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Value for `key`, treating an empty value as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for CallbackParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

pub fn parse_redirect_for_token(uri: &Url) -> Result<Credential, AuthenticationError> {
    token_from_params(&CallbackParams::from_redirect(uri))
}

pub fn token_from_params(params: &CallbackParams) -> Result<Credential, AuthenticationError> {
    let expires_in = params
        .get(KEY_EXPIRES_IN)
        .and_then(|value| value.trim().parse::<i64>().ok())
        .ok_or(AuthenticationError::InvalidResponse)?;
    let access_token = params
        .get(KEY_ACCESS_TOKEN)
        .ok_or(AuthenticationError::InvalidResponse)?;
    let scope = params
        .get(KEY_SCOPE)
        .ok_or(AuthenticationError::InvalidResponse)?;
    let token_type = params
        .get(KEY_TOKEN_TYPE)
        .ok_or(AuthenticationError::InvalidResponse)?;

    Ok(Credential::new(
        access_token,
        params.get(KEY_REFRESH_TOKEN).map(ToOwned::to_owned),
        token_type,
        expires_in,
        scope::parse_space_delimited(scope),
    ))
}

pub fn parse_redirect_for_code(uri: &Url) -> Result<String, AuthenticationError> {
    code_from_params(&CallbackParams::from_query(uri))
}

pub fn code_from_params(params: &CallbackParams) -> Result<String, AuthenticationError> {
    params
        .get(KEY_CODE)
        .map(ToOwned::to_owned)
        .ok_or(AuthenticationError::InvalidResponse)
}

/// Provider `error` parameter, if any. Implicit-grant callbacks carry it in the
/// fragment, which is checked before the query.
pub fn extract_provider_error(uri: &Url, flavor: ResponseType) -> Option<AuthenticationError> {
    let from_query = || error_from_params(&CallbackParams::from_query(uri));
    match flavor {
        ResponseType::Token => {
            error_from_params(&CallbackParams::from_fragment(uri)).or_else(from_query)
        }
        ResponseType::Code => from_query(),
    }
}

pub fn error_from_params(params: &CallbackParams) -> Option<AuthenticationError> {
    params.get(KEY_ERROR).map(AuthenticationError::from_code)
}
