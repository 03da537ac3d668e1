use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Routing decision for one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDecision {
    Sso,
    AuthCode,
    ImplicitGrant,
    InstallRedirect,
}

impl FlowDecision {
    /// Response type requested from the web authorization endpoint, if this is a web flow.
    pub fn web_flavor(self) -> Option<ResponseType> {
        match self {
            FlowDecision::AuthCode => Some(ResponseType::Code),
            FlowDecision::ImplicitGrant => Some(ResponseType::Token),
            FlowDecision::Sso | FlowDecision::InstallRedirect => None,
        }
    }
}

impl FromStr for FlowDecision {
    type Err = InvalidFlow;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sso" | "native" => Ok(FlowDecision::Sso),
            "auth-code" | "code" | "authorization-code" => Ok(FlowDecision::AuthCode),
            "implicit" | "token" | "implicit-grant" => Ok(FlowDecision::ImplicitGrant),
            "install" | "signup" => Ok(FlowDecision::InstallRedirect),
            other => Err(InvalidFlow(other.to_owned())),
        }
    }
}

impl fmt::Display for FlowDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            FlowDecision::Sso => "sso",
            FlowDecision::AuthCode => "auth-code",
            FlowDecision::ImplicitGrant => "implicit",
            FlowDecision::InstallRedirect => "install",
        };
        write!(f, "{value}")
    }
}

/// OAuth2 `response_type` of a web flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Code,
    Token,
}

impl ResponseType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseType::Code => "code",
            ResponseType::Token => "token",
        }
    }
}

/// Error reported when parsing an unsupported flow.
#[derive(Debug, thiserror::Error)]
#[error("invalid auth flow '{0}'")]
pub struct InvalidFlow(pub String);

/// How a desktop host presents authorization pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    Loopback,
    Manual,
}

/// Helper responsible for inferring which surface to start with.
#[derive(Debug)]
pub struct SurfacePreference {
    preferred: SurfaceKind,
    browser_available: bool,
}

impl SurfacePreference {
    /// Detect the preferred surface based on environment variables and display availability.
    pub fn detect() -> Self {
        if let Some(kind) = env::var("RIDES_SDK_SURFACE")
            .ok()
            .and_then(|value| value.parse::<SurfaceKind>().ok())
        {
            return Self {
                preferred: kind,
                browser_available: matches!(kind, SurfaceKind::Loopback),
            };
        }

        let browser_available = browser_available();
        let preferred = if browser_available {
            SurfaceKind::Loopback
        } else {
            SurfaceKind::Manual
        };
        Self {
            preferred,
            browser_available,
        }
    }

    pub fn preferred(&self) -> SurfaceKind {
        self.preferred
    }

    /// Whether we should attempt to spawn the system browser automatically.
    pub fn browser_available(&self) -> bool {
        self.browser_available
    }
}

fn browser_available() -> bool {
    if env::var_os("RIDES_SDK_NO_BROWSER").is_some() {
        return false;
    }

    if env::var_os("SSH_CONNECTION").is_some() && env::var_os("DISPLAY").is_none() {
        return false;
    }

    if env::var_os("DISPLAY").is_some() || env::var_os("WAYLAND_DISPLAY").is_some() {
        return true;
    }

    cfg!(target_os = "windows") || cfg!(target_os = "macos")
}

impl FromStr for SurfaceKind {
    type Err = InvalidFlow;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "browser" | "loopback" => Ok(SurfaceKind::Loopback),
            "manual" | "paste" => Ok(SurfaceKind::Manual),
            other => Err(InvalidFlow(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_flow_variants() {
        assert_eq!("sso".parse::<FlowDecision>().unwrap(), FlowDecision::Sso);
        assert_eq!("auth-code".parse::<FlowDecision>().unwrap(), FlowDecision::AuthCode);
        assert_eq!(
            "implicit".parse::<FlowDecision>().unwrap(),
            FlowDecision::ImplicitGrant
        );
        assert_eq!(
            "install".parse::<FlowDecision>().unwrap(),
            FlowDecision::InstallRedirect
        );
    }

    #[test]
    fn invalid_flow() {
        let err = "unknown".parse::<FlowDecision>().unwrap_err();
        assert_eq!(err.0, "unknown");
    }

    #[test]
    fn only_web_flows_have_a_flavor() {
        assert_eq!(FlowDecision::AuthCode.web_flavor(), Some(ResponseType::Code));
        assert_eq!(FlowDecision::ImplicitGrant.web_flavor(), Some(ResponseType::Token));
        assert_eq!(FlowDecision::Sso.web_flavor(), None);
        assert_eq!(FlowDecision::InstallRedirect.web_flavor(), None);
    }

    #[test]
    fn parse_surface_kinds() {
        assert_eq!("browser".parse::<SurfaceKind>().unwrap(), SurfaceKind::Loopback);
        assert_eq!("MANUAL".parse::<SurfaceKind>().unwrap(), SurfaceKind::Manual);
    }
}
