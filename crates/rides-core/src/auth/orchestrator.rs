use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::host::HostEnvironment;

use super::app_probe::{AppLinkProbe, AppMatch, SsoFlow};
use super::flow::{FlowDecision, ResponseType};
use super::flow_url::{self, CallbackParams};
use super::legacy_guard::LegacyCompatibilityGuard;
use super::par::ParClient;
use super::pkce::PkcePair;
use super::scope;
use super::surface::{CallbackPayload, Completion, SurfaceRequest, SurfaceResult, UiSurface};
use super::{
    AuthError, AuthenticationError, Credential, CredentialStore, LoginOptions, Session,
    SessionConfig,
};

/// Progress of the current login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Idle,
    Routing,
    SsoPending,
    WebPending,
    Succeeded,
    Cancelled,
    Failed,
}

impl LoginState {
    fn in_flight(self) -> bool {
        matches!(
            self,
            LoginState::Routing | LoginState::SsoPending | LoginState::WebPending
        )
    }
}

/// Terminal result of a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Credential obtained and persisted.
    Success(Credential),
    /// Authorization code to be redeemed by the caller's backend. `code_verifier` is set
    /// when the request carried a PKCE challenge.
    AuthorizationCode {
        code: String,
        code_verifier: Option<String>,
    },
    Cancelled,
    Error {
        error: AuthenticationError,
        diagnostic: Option<String>,
    },
}

impl AuthOutcome {
    pub fn error(error: AuthenticationError) -> Self {
        AuthOutcome::Error {
            error,
            diagnostic: None,
        }
    }

    fn terminal_state(&self) -> LoginState {
        match self {
            AuthOutcome::Success(_) | AuthOutcome::AuthorizationCode { .. } => {
                LoginState::Succeeded
            }
            AuthOutcome::Cancelled => LoginState::Cancelled,
            AuthOutcome::Error { .. } => LoginState::Failed,
        }
    }
}

/// Routing state that must survive until the surface reports back.
///
/// Small enough to persist if the host process can be recycled mid-flow; feed it back
/// through [`AuthOrchestrator::resume`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLogin {
    pub decision: FlowDecision,
    pub fallback_used: bool,
    pub code_verifier: Option<String>,
}

impl PendingLogin {
    fn new(decision: FlowDecision) -> Self {
        Self {
            decision,
            fallback_used: false,
            code_verifier: None,
        }
    }
}

/// Collaborators shared by every orchestrator a host creates.
#[derive(Clone)]
pub struct Collaborators {
    pub probe: Arc<dyn AppLinkProbe>,
    pub host: Arc<dyn HostEnvironment>,
    pub surface: Arc<dyn UiSurface>,
    pub guard: LegacyCompatibilityGuard,
    pub par: Option<ParClient>,
}

type PendingHook = Arc<dyn Fn(&PendingLogin) + Send + Sync>;

enum Step {
    Dispatch(SurfaceRequest),
    Done(AuthOutcome),
}

/// Chooses a flow, drives it through the UI surface, and reconciles the result.
///
/// At most one login runs per instance; a concurrent call fails with
/// [`AuthError::LoginInProgress`].
pub struct AuthOrchestrator<S = Arc<dyn CredentialStore>> {
    config: SessionConfig,
    options: LoginOptions,
    store: S,
    collaborators: Collaborators,
    on_pending: Option<PendingHook>,
    state: Mutex<LoginState>,
}

impl<S> fmt::Debug for AuthOrchestrator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthOrchestrator")
            .field("client_id", &self.config.client_id)
            .field("options", &self.options)
            .field("state", &*lock(&self.state))
            .finish_non_exhaustive()
    }
}

impl<S> AuthOrchestrator<S>
where
    S: CredentialStore,
{
    pub fn new(config: SessionConfig, store: S, collaborators: Collaborators) -> Self {
        Self {
            config,
            options: LoginOptions::default(),
            store,
            collaborators,
            on_pending: None,
            state: Mutex::new(LoginState::Idle),
        }
    }

    pub fn with_options(mut self, options: LoginOptions) -> Self {
        self.options = options;
        self
    }

    /// Called with the routing state each time a request is dispatched.
    pub fn with_pending_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PendingLogin) + Send + Sync + 'static,
    {
        self.on_pending = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn options(&self) -> &LoginOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn state(&self) -> LoginState {
        *lock(&self.state)
    }

    /// Run a complete login attempt.
    pub async fn login(&self) -> Result<AuthOutcome, AuthError> {
        if !self.config.has_scopes() {
            return Err(AuthError::MissingScopes);
        }
        let _attempt = self.begin(LoginState::Routing)?;

        let (mut pending, step) = self.route().await?;
        let outcome = self.drive(&mut pending, step).await?;
        Ok(self.finish(outcome))
    }

    /// Finish an attempt whose routing state outlived the original process.
    pub async fn resume(
        &self,
        mut pending: PendingLogin,
        result: SurfaceResult,
    ) -> Result<AuthOutcome, AuthError> {
        let _attempt = self.begin(pending_state(pending.decision))?;
        info!(decision = %pending.decision, "resuming login");
        let step = self.reconcile(&mut pending, result).await?;
        let outcome = self.drive(&mut pending, step).await?;
        Ok(self.finish(outcome))
    }

    /// Server token if configured, else the stored credential.
    pub fn session(&self) -> Option<Session> {
        if let Some(token) = &self.config.server_token {
            return Some(Session::ServerToken(token.clone()));
        }
        self.store.get().map(Session::AccessToken)
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_some()
    }

    pub fn logout(&self) -> Result<(), AuthError> {
        info!(storage_key = self.store.storage_key(), "logging out");
        self.store.clear()
    }

    /// React to an "unauthorized" signal from a later API request.
    pub fn invalidate_session(&self) -> Result<(), AuthError> {
        warn!(
            storage_key = self.store.storage_key(),
            "credential rejected by the API; clearing"
        );
        self.store.clear()
    }

    fn begin(&self, initial: LoginState) -> Result<Attempt<'_>, AuthError> {
        let mut state = lock(&self.state);
        if state.in_flight() {
            return Err(AuthError::LoginInProgress);
        }
        debug!(from = ?*state, to = ?initial, "login state");
        *state = initial;
        Ok(Attempt { state: &self.state })
    }

    fn transition(&self, to: LoginState) {
        let mut state = lock(&self.state);
        debug!(from = ?*state, to = ?to, "login state");
        *state = to;
    }

    fn finish(&self, outcome: AuthOutcome) -> AuthOutcome {
        self.transition(outcome.terminal_state());
        match &outcome {
            AuthOutcome::Error { error, .. } => warn!(%error, "login failed"),
            AuthOutcome::Cancelled => info!("login cancelled"),
            AuthOutcome::Success(_) | AuthOutcome::AuthorizationCode { .. } => {
                info!("login succeeded")
            }
        }
        outcome
    }

    /// Session config with the generated redirect filled in when the caller set none.
    fn effective_config(&self) -> SessionConfig {
        match self.config.redirect_uri {
            Some(_) => self.config.clone(),
            None => self
                .config
                .clone()
                .with_redirect_uri(self.collaborators.host.default_redirect_uri()),
        }
    }

    async fn route(&self) -> Result<(PendingLogin, Step), AuthError> {
        let host = self.collaborators.host.as_ref();
        let verdict = self.collaborators.guard.check(&self.config, &self.options, host);
        if !verdict.proceed {
            let error = verdict
                .state
                .as_error()
                .unwrap_or(AuthenticationError::InvalidParameters);
            let outcome = AuthOutcome::Error {
                error,
                diagnostic: verdict.message,
            };
            return Ok((PendingLogin::new(FlowDecision::InstallRedirect), Step::Done(outcome)));
        }

        let config = self.effective_config();
        if let Some(found) = self.sso_candidate(&config) {
            info!(app = %found.app, package = %found.package_name, "routing to single sign-on");
            let uri = flow_url::build_sso_uri(
                &config,
                &config.scopes,
                &config.custom_scopes,
                self.options.sso_flow,
            )?;
            let request = SurfaceRequest::Sso {
                uri,
                package: found.package_name,
            };
            return Ok((PendingLogin::new(FlowDecision::Sso), Step::Dispatch(request)));
        }

        let decision = if !scope::is_privilege_required(&config.scopes) {
            FlowDecision::ImplicitGrant
        } else if self.options.auth_code_fallback {
            FlowDecision::AuthCode
        } else {
            FlowDecision::InstallRedirect
        };
        info!(%decision, "no companion app qualifies");

        let mut pending = PendingLogin::new(decision);
        if decision == FlowDecision::InstallRedirect {
            let request = SurfaceRequest::Install {
                uri: flow_url::build_install_uri(&config)?,
            };
            self.transition(LoginState::WebPending);
            let (completion, _ignored) = Completion::channel();
            self.collaborators.surface.dispatch(request, completion);
            return Ok((pending, Step::Done(AuthOutcome::Cancelled)));
        }

        let step = self.web_step(&config, &mut pending).await?;
        Ok((pending, step))
    }

    fn sso_candidate(&self, config: &SessionConfig) -> Option<AppMatch> {
        let flow = self.options.sso_flow;
        if flow == SsoFlow::RedirectToSdk {
            let host = self.collaborators.host.as_ref();
            let redirect = config.redirect_uri.as_deref().unwrap_or_default();
            if redirect != host.default_redirect_uri() && !host.is_redirect_registered(redirect) {
                debug!(redirect, "redirect is not delivered to this host; skipping single sign-on");
                return None;
            }
        }
        self.collaborators
            .probe
            .select_best_app(&self.options.product_priority, flow)
    }

    async fn web_step(
        &self,
        config: &SessionConfig,
        pending: &mut PendingLogin,
    ) -> Result<Step, AuthError> {
        let Some(flavor) = pending.decision.web_flavor() else {
            return Ok(Step::Done(AuthOutcome::Cancelled));
        };

        let pkce = (flavor == ResponseType::Code && self.options.pkce).then(PkcePair::generate);
        pending.code_verifier = pkce.as_ref().map(|pair| pair.verifier().to_owned());

        let mut request_uri = None;
        if let (Some(prefill), Some(par)) = (&config.prefill, &self.collaborators.par) {
            match par.push(config, flavor, prefill).await {
                Ok(response) => request_uri = Some(response.request_uri),
                Err(error) => return Ok(Step::Done(AuthOutcome::error(error))),
            }
        }

        let uri = flow_url::build_web_auth_uri(
            flavor,
            config,
            pkce.as_ref().map(PkcePair::challenge),
            request_uri.as_deref(),
        )?;
        Ok(Step::Dispatch(SurfaceRequest::Web { uri, flavor }))
    }

    async fn drive(
        &self,
        pending: &mut PendingLogin,
        mut step: Step,
    ) -> Result<AuthOutcome, AuthError> {
        loop {
            let request = match step {
                Step::Done(outcome) => return Ok(outcome),
                Step::Dispatch(request) => request,
            };
            self.transition(pending_state(pending.decision));
            if let Some(hook) = &self.on_pending {
                hook(&*pending);
            }
            debug!(uri = %request.uri(), "dispatching to surface");
            let (completion, rx) = Completion::channel();
            self.collaborators.surface.dispatch(request, completion);
            let result = rx.await.map_err(|_| AuthError::ListenerClosed)?;
            step = self.reconcile(pending, result).await?;
        }
    }

    async fn reconcile(
        &self,
        pending: &mut PendingLogin,
        result: SurfaceResult,
    ) -> Result<Step, AuthError> {
        let (payload, completed) = match result {
            SurfaceResult::Cancelled(None) => return Ok(Step::Done(AuthOutcome::Cancelled)),
            SurfaceResult::Cancelled(Some(payload)) => (payload, false),
            SurfaceResult::Completed(payload) => (payload, true),
        };

        if let Some(error) = provider_error(pending.decision, &payload) {
            return self.on_provider_error(pending, error).await;
        }
        if !completed {
            return Ok(Step::Done(AuthOutcome::Cancelled));
        }
        if payload.is_empty() {
            return Ok(Step::Done(AuthOutcome::error(AuthenticationError::Unknown)));
        }
        Ok(Step::Done(self.on_payload(pending, payload)))
    }

    async fn on_provider_error(
        &self,
        pending: &mut PendingLogin,
        error: AuthenticationError,
    ) -> Result<Step, AuthError> {
        match error {
            AuthenticationError::Cancelled => Ok(Step::Done(AuthOutcome::Cancelled)),
            AuthenticationError::Unavailable => {
                let Some(next) = self.fallback_for(pending) else {
                    return Ok(Step::Done(AuthOutcome::error(error)));
                };
                info!(from = %pending.decision, to = %next, "flow unavailable; retrying once");
                pending.decision = next;
                pending.fallback_used = true;
                self.web_step(&self.effective_config(), pending).await
            }
            AuthenticationError::InvalidAppSignature => {
                let hash = self
                    .collaborators
                    .host
                    .signature_hash()
                    .unwrap_or_else(|| "unavailable".to_owned());
                error!(
                    signature_hash = %hash,
                    "companion app rejected this application's signature; register the hash with the provider"
                );
                Ok(Step::Done(AuthOutcome::Error {
                    error,
                    diagnostic: Some(hash),
                }))
            }
            other => Ok(Step::Done(AuthOutcome::error(other))),
        }
    }

    /// Alternate web flow for an UNAVAILABLE report, at most once per attempt.
    fn fallback_for(&self, pending: &PendingLogin) -> Option<FlowDecision> {
        if pending.fallback_used {
            return None;
        }
        if !scope::is_privilege_required(&self.config.scopes)
            && pending.decision != FlowDecision::ImplicitGrant
        {
            Some(FlowDecision::ImplicitGrant)
        } else if self.options.auth_code_fallback && pending.decision != FlowDecision::AuthCode {
            Some(FlowDecision::AuthCode)
        } else {
            None
        }
    }

    fn on_payload(&self, pending: &PendingLogin, payload: CallbackPayload) -> AuthOutcome {
        // Codes only ever travel in the query; tokens may use the fragment.
        let (params, code_params) = match &payload {
            CallbackPayload::Redirect(url) => {
                if !self.matches_redirect(url) {
                    warn!(redirect = %url, "redirect does not match the configured redirect URI");
                    return AuthOutcome::error(AuthenticationError::MismatchingRedirectUri);
                }
                (CallbackParams::from_redirect(url), CallbackParams::from_query(url))
            }
            CallbackPayload::Params(params) => (params.clone(), params.clone()),
        };

        let wants_code = match pending.decision {
            FlowDecision::AuthCode => true,
            FlowDecision::ImplicitGrant => false,
            FlowDecision::Sso => code_params.get("code").is_some(),
            FlowDecision::InstallRedirect => return AuthOutcome::Cancelled,
        };

        if wants_code {
            return match flow_url::code_from_params(&code_params) {
                Ok(code) => AuthOutcome::AuthorizationCode {
                    code,
                    code_verifier: pending.code_verifier.clone(),
                },
                Err(error) => AuthOutcome::error(error),
            };
        }

        let credential = match flow_url::token_from_params(&params) {
            Ok(credential) => credential,
            Err(error) => return AuthOutcome::error(error),
        };
        match self.store.set(&credential) {
            Ok(()) => AuthOutcome::Success(credential),
            Err(err) => {
                error!(
                    %err,
                    storage_key = self.store.storage_key(),
                    "unable to persist credential"
                );
                AuthOutcome::Error {
                    error: AuthenticationError::Unknown,
                    diagnostic: Some(err.to_string()),
                }
            }
        }
    }

    /// Same scheme, authority and path as the configured redirect; query and fragment may differ.
    fn matches_redirect(&self, url: &Url) -> bool {
        let Some(expected) = self.effective_config().redirect_uri else {
            return false;
        };
        let Ok(expected) = Url::parse(&expected) else {
            return false;
        };
        url.scheme() == expected.scheme()
            && url.host_str() == expected.host_str()
            && url.port_or_known_default() == expected.port_or_known_default()
            && url.username() == expected.username()
            && url.path().trim_end_matches('/') == expected.path().trim_end_matches('/')
    }
}

fn provider_error(
    decision: FlowDecision,
    payload: &CallbackPayload,
) -> Option<AuthenticationError> {
    match payload {
        CallbackPayload::Redirect(url) => {
            let flavor = decision.web_flavor().unwrap_or(ResponseType::Token);
            flow_url::extract_provider_error(url, flavor)
        }
        CallbackPayload::Params(params) => flow_url::error_from_params(params),
    }
}

fn pending_state(decision: FlowDecision) -> LoginState {
    match decision {
        FlowDecision::Sso => LoginState::SsoPending,
        _ => LoginState::WebPending,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns the orchestrator to `Idle` if an attempt ends without reaching a terminal state.
struct Attempt<'a> {
    state: &'a Mutex<LoginState>,
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        if state.in_flight() {
            *state = LoginState::Idle;
        }
    }
}
