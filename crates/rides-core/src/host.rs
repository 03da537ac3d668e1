use std::collections::BTreeSet;
use std::env;
use std::fs;

use tracing::debug;

use crate::auth::signature_fingerprint;

const DEFAULT_PACKAGE: &str = "com.uber.sdk.rides";
const REDIRECT_SUFFIX: &str = ".uberauth://redirect";

/// Facts about the application embedding the SDK.
pub trait HostEnvironment: Send + Sync {
    fn package_name(&self) -> &str;

    /// Whether `redirect_uri` is routed to the host's own redirect receiver.
    fn is_redirect_registered(&self, redirect_uri: &str) -> bool;

    /// Fingerprint of the host's own signing identity, if it has one.
    fn signature_hash(&self) -> Option<String>;

    /// Debuggable builds surface configuration mistakes as hard failures.
    fn is_strict(&self) -> bool;

    /// Redirect URI generated from the package name.
    fn default_redirect_uri(&self) -> String {
        format!("{}{REDIRECT_SUFFIX}", self.package_name())
    }
}

/// Host running as a desktop process.
#[derive(Debug, Clone)]
pub struct DesktopHost {
    package_name: String,
    strict: bool,
    registered_redirects: BTreeSet<String>,
}

impl DesktopHost {
    /// Inspect environment variables and the build profile.
    pub fn detect() -> Self {
        let package_name = env::var("RIDES_SDK_PACKAGE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PACKAGE.to_owned());
        let strict = env::var("RIDES_SDK_STRICT")
            .ok()
            .and_then(|value| parse_flag(&value))
            .unwrap_or(cfg!(debug_assertions));
        debug!(%package_name, strict, "detected host environment");
        Self {
            package_name,
            strict,
            registered_redirects: BTreeSet::new(),
        }
    }

    /// Mark a redirect URI as delivered to this process (e.g. a loopback listener).
    pub fn with_registered_redirect(mut self, redirect_uri: impl Into<String>) -> Self {
        self.registered_redirects.insert(redirect_uri.into());
        self
    }
}

impl HostEnvironment for DesktopHost {
    fn package_name(&self) -> &str {
        &self.package_name
    }

    fn is_redirect_registered(&self, redirect_uri: &str) -> bool {
        self.registered_redirects.contains(redirect_uri)
    }

    fn signature_hash(&self) -> Option<String> {
        let exe = env::current_exe().ok()?;
        let bytes = fs::read(exe).ok()?;
        Some(signature_fingerprint(&bytes))
    }

    fn is_strict(&self) -> bool {
        self.strict
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Host with fixed answers, for embedding in other runtimes and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticHost {
    pub package_name: String,
    pub registered_redirects: BTreeSet<String>,
    pub signature_hash: Option<String>,
    pub strict: bool,
}

impl HostEnvironment for StaticHost {
    fn package_name(&self) -> &str {
        &self.package_name
    }

    fn is_redirect_registered(&self, redirect_uri: &str) -> bool {
        self.registered_redirects.contains(redirect_uri)
    }

    fn signature_hash(&self) -> Option<String> {
        self.signature_hash.clone()
    }

    fn is_strict(&self) -> bool {
        self.strict
    }
}
