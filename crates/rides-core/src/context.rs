use std::sync::Arc;

use tracing::debug;

use crate::auth::{
    AuthOrchestrator, Collaborators, CredentialStoreFactory, LoginOptions, SessionConfig,
    DEFAULT_STORAGE_KEY,
};

/// Explicitly initialised SDK defaults: the session configuration and collaborators
/// every orchestrator is built from. Dropping the context tears it down.
#[derive(Clone)]
pub struct SdkContext {
    config: SessionConfig,
    options: LoginOptions,
    stores: Arc<dyn CredentialStoreFactory>,
    collaborators: Collaborators,
}

impl SdkContext {
    pub fn new(
        config: SessionConfig,
        stores: Arc<dyn CredentialStoreFactory>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            options: LoginOptions::default(),
            stores,
            collaborators,
        }
    }

    pub fn with_options(mut self, options: LoginOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn options(&self) -> &LoginOptions {
        &self.options
    }

    /// Orchestrator for the default storage key.
    pub fn orchestrator(&self) -> AuthOrchestrator {
        self.orchestrator_for(DEFAULT_STORAGE_KEY)
    }

    pub fn orchestrator_for(&self, storage_key: &str) -> AuthOrchestrator {
        self.orchestrator_with(storage_key, self.config.clone())
    }

    /// Orchestrator using a derived configuration; the context's own configuration is untouched.
    pub fn orchestrator_with(&self, storage_key: &str, config: SessionConfig) -> AuthOrchestrator {
        debug!(storage_key, client_id = %config.client_id, "creating orchestrator");
        AuthOrchestrator::new(config, self.stores.open(storage_key), self.collaborators.clone())
            .with_options(self.options.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        Credential, LegacyCompatibilityGuard, MemoryCredentialBackend, NoopInvalidator,
        PackageAppProbe, Scope, ScopeSet, StaticPackages, SurfaceRequest, UiSurface, Completion,
    };
    use crate::host::StaticHost;

    struct NullSurface;

    impl UiSurface for NullSurface {
        fn dispatch(&self, _request: SurfaceRequest, _completion: Completion) {}
    }

    fn context() -> SdkContext {
        let collaborators = Collaborators {
            probe: Arc::new(PackageAppProbe::new(StaticPackages::new())),
            host: Arc::new(StaticHost::default()),
            surface: Arc::new(NullSurface),
            guard: LegacyCompatibilityGuard::new(),
            par: None,
        };
        SdkContext::new(
            SessionConfig::new("client").with_scopes([Scope::Profile]),
            Arc::new(MemoryCredentialBackend::new(Arc::new(NoopInvalidator))),
            collaborators,
        )
    }

    #[test]
    fn orchestrators_share_storage_per_key() {
        let context = context();
        let first = context.orchestrator_for("account-a");
        let again = context.orchestrator_for("account-a");
        let other = context.orchestrator();

        first
            .store()
            .set(&Credential::new("token", None, "bearer", 60, ScopeSet::new()))
            .unwrap();
        assert!(again.is_authenticated());
        assert!(!other.is_authenticated());
    }

    #[test]
    fn derived_config_does_not_leak_into_context() {
        let context = context();
        let derived = context.config().clone().with_scopes([Scope::Request]);
        let orchestrator = context.orchestrator_with("key", derived);
        assert_eq!(orchestrator.config().scopes, ScopeSet::from([Scope::Request]));
        assert_eq!(context.config().scopes, ScopeSet::from([Scope::Profile]));
    }

    #[test]
    fn options_flow_into_orchestrators() {
        let context = context().with_options(LoginOptions {
            auth_code_fallback: true,
            ..LoginOptions::default()
        });
        assert!(context.orchestrator().options().auth_code_fallback);
    }
}
