mod app_probe;
mod browser;
mod cookies;
mod credential_store;
mod error;
mod flow;
pub mod flow_url;
pub mod legacy_guard;
mod manual;
mod orchestrator;
mod par;
mod pkce;
pub mod scope;
mod session;
mod session_config;
mod surface;

pub use app_probe::{
    signature_fingerprint, AppLinkProbe, AppMatch, CompanionApp, InstalledPackage,
    PackageAppProbe, PackageInspector, ProbeRejection, SsoFlow, StaticPackages, UnknownApp,
    DEEPLINK_SCHEME, RIDER_PRODUCTION_SIGNATURE,
};
pub use browser::{default_redirect_ports, LoopbackSurface};
pub use cookies::{CookieJarInvalidator, NoopInvalidator, WebSessionInvalidator};
pub use credential_store::{
    CredentialStore, CredentialStoreFactory, FileCredentialStore, FileCredentialStoreFactory,
    MemoryCredentialBackend, MemoryCredentialStore, DEFAULT_STORAGE_KEY,
};
pub use error::{AuthError, AuthenticationError};
pub use flow::{FlowDecision, InvalidFlow, ResponseType, SurfaceKind, SurfacePreference};
pub use flow_url::CallbackParams;
pub use legacy_guard::{GuardState, GuardVerdict, LegacyCompatibilityGuard, LegacyPrompt};
pub use manual::ManualSurface;
pub use orchestrator::{AuthOrchestrator, AuthOutcome, Collaborators, LoginState, PendingLogin};
pub use par::{ParClient, ParResponse};
pub use pkce::PkcePair;
pub use scope::{Scope, ScopeSet, ScopeTier};
pub use session::{Credential, Session};
pub use session_config::{
    EndpointRegion, Environment, LoginOptions, PrefillInfo, Prompt, SessionConfig,
};
pub use surface::{CallbackPayload, Completion, SurfaceRequest, SurfaceResult, UiSurface};
