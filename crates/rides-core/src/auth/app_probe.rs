use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, warn};

use super::AuthenticationError;

/// URI scheme the companion apps register for single sign-on.
pub const DEEPLINK_SCHEME: &str = "uber";

/// SHA-1 fingerprint of the rider app's production signing certificate.
pub const RIDER_PRODUCTION_SIGNATURE: &str = "411c40b31f6d01dac68d711df99b6eafeec8e73b";

const RIDER_PACKAGES: &[&str] = &[
    "com.ubercab",
    "com.ubercab.presidio.development",
    "com.ubercab.rider.internal",
];
const EATS_PACKAGES: &[&str] = &[
    "com.ubercab.eats",
    "com.ubercab.eats.debug",
    "com.ubercab.eats.internal",
];
const DEFAULT_PRIORITY: &[CompanionApp] = &[CompanionApp::Rider];

/// How the companion app hands the result back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SsoFlow {
    /// Result returned to the caller that launched the app.
    #[default]
    Default,
    /// Result delivered through the host's own redirect URI.
    RedirectToSdk,
}

impl SsoFlow {
    /// Value of the deeplink's `flow_type` parameter.
    pub fn as_str(self) -> &'static str {
        match self {
            SsoFlow::Default => "DEFAULT",
            SsoFlow::RedirectToSdk => "REDIRECT_TO_SDK",
        }
    }
}

/// Installed apps able to complete a native single sign-on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanionApp {
    Rider,
    Eats,
}

impl CompanionApp {
    pub fn package_aliases(self) -> &'static [&'static str] {
        match self {
            CompanionApp::Rider => RIDER_PACKAGES,
            CompanionApp::Eats => EATS_PACKAGES,
        }
    }

    /// Oldest version code that understands the SSO deeplink for `flow`.
    pub fn min_sso_version(self, flow: SsoFlow) -> u32 {
        match (self, flow) {
            (CompanionApp::Rider, SsoFlow::Default) => 31302,
            (CompanionApp::Rider, SsoFlow::RedirectToSdk) => 35757,
            (CompanionApp::Eats, _) => 2488,
        }
    }

    pub fn default_priority() -> &'static [CompanionApp] {
        DEFAULT_PRIORITY
    }
}

impl fmt::Display for CompanionApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            CompanionApp::Rider => "rider",
            CompanionApp::Eats => "eats",
        };
        write!(f, "{value}")
    }
}

impl FromStr for CompanionApp {
    type Err = UnknownApp;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rider" | "rides" | "uber" => Ok(CompanionApp::Rider),
            "eats" | "uber-eats" => Ok(CompanionApp::Eats),
            other => Err(UnknownApp(other.to_owned())),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown companion app '{0}'")]
pub struct UnknownApp(pub String);

/// Facts a package manager reports about one installed package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub name: String,
    pub version_code: u32,
    /// Raw signing certificates.
    pub signatures: Vec<Vec<u8>>,
}

/// Source of installation facts. Platform integrations implement this.
pub trait PackageInspector: Send + Sync {
    fn package(&self, name: &str) -> Option<InstalledPackage>;
}

/// Fixed package table, for hosts without a package manager.
#[derive(Debug, Clone, Default)]
pub struct StaticPackages {
    packages: HashMap<String, InstalledPackage>,
}

impl StaticPackages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, package: InstalledPackage) -> Self {
        self.packages.insert(package.name.clone(), package);
        self
    }
}

impl PackageInspector for StaticPackages {
    fn package(&self, name: &str) -> Option<InstalledPackage> {
        self.packages.get(name).cloned()
    }
}

/// Lower-case hex SHA-1 of a signing certificate.
pub fn signature_fingerprint(certificate: &[u8]) -> String {
    hex::encode(Sha1::digest(certificate))
}

/// Companion app chosen for SSO and the concrete package that will receive the deeplink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppMatch {
    pub app: CompanionApp,
    pub package_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProbeRejection {
    #[error("no package at a supported version is installed")]
    NotInstalled,
    #[error("installed package is not signed with an allowed certificate")]
    SignatureMismatch,
}

impl From<ProbeRejection> for AuthenticationError {
    fn from(rejection: ProbeRejection) -> Self {
        match rejection {
            ProbeRejection::NotInstalled => AuthenticationError::Unavailable,
            ProbeRejection::SignatureMismatch => AuthenticationError::InvalidAppSignature,
        }
    }
}

/// Decides whether a companion app can take over authentication.
pub trait AppLinkProbe: Send + Sync {
    fn is_installed(&self, app: CompanionApp, min_version: u32) -> bool;

    /// True when an installed alias of `app` is signed only with allowed certificates.
    fn validate_signature(&self, app: CompanionApp) -> bool;

    /// Full check for one app, naming the package that passed.
    fn evaluate(&self, app: CompanionApp, flow: SsoFlow) -> Result<AppMatch, ProbeRejection>;

    /// First app in `priority` that passes [`AppLinkProbe::evaluate`]. An empty
    /// priority list falls back to [`CompanionApp::default_priority`].
    fn select_best_app(&self, priority: &[CompanionApp], flow: SsoFlow) -> Option<AppMatch> {
        let order = if priority.is_empty() {
            CompanionApp::default_priority()
        } else {
            priority
        };
        order.iter().find_map(|app| match self.evaluate(*app, flow) {
            Ok(found) => Some(found),
            Err(rejection) => {
                debug!(%app, %rejection, "companion app rejected");
                None
            }
        })
    }
}

/// [`AppLinkProbe`] backed by a [`PackageInspector`] and a certificate allow-list.
#[derive(Debug, Clone)]
pub struct PackageAppProbe<I> {
    inspector: I,
    allowed_signatures: BTreeSet<String>,
}

impl<I: PackageInspector> PackageAppProbe<I> {
    pub fn new(inspector: I) -> Self {
        Self {
            inspector,
            allowed_signatures: BTreeSet::from([RIDER_PRODUCTION_SIGNATURE.to_owned()]),
        }
    }

    pub fn with_allowed_signatures<S, It>(mut self, fingerprints: It) -> Self
    where
        It: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_signatures = fingerprints
            .into_iter()
            .map(|value| value.into().to_ascii_lowercase())
            .collect();
        self
    }

    fn installed_aliases(&self, app: CompanionApp) -> impl Iterator<Item = InstalledPackage> + '_ {
        app.package_aliases()
            .iter()
            .filter_map(|name| self.inspector.package(name))
    }

    fn is_trusted(&self, package: &InstalledPackage) -> bool {
        !package.signatures.is_empty()
            && package.signatures.iter().all(|certificate| {
                self.allowed_signatures
                    .contains(&signature_fingerprint(certificate))
            })
    }
}

impl<I: PackageInspector> AppLinkProbe for PackageAppProbe<I> {
    fn is_installed(&self, app: CompanionApp, min_version: u32) -> bool {
        self.installed_aliases(app)
            .any(|package| package.version_code >= min_version)
    }

    fn validate_signature(&self, app: CompanionApp) -> bool {
        self.installed_aliases(app)
            .any(|package| self.is_trusted(&package))
    }

    fn evaluate(&self, app: CompanionApp, flow: SsoFlow) -> Result<AppMatch, ProbeRejection> {
        let mut rejection = ProbeRejection::NotInstalled;
        for package in self.installed_aliases(app) {
            if package.version_code < app.min_sso_version(flow) {
                continue;
            }
            if self.is_trusted(&package) {
                return Ok(AppMatch {
                    app,
                    package_name: package.name,
                });
            }
            warn!(package = %package.name, "companion app signature is not on the allow-list");
            rejection = ProbeRejection::SignatureMismatch;
        }
        Err(rejection)
    }
}
