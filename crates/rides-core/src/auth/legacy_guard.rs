use std::sync::Arc;

use tracing::{error, warn};

use crate::host::HostEnvironment;

use super::{AuthenticationError, LoginOptions, SessionConfig};

/// Outcome of the redirect configuration check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Ok,
    MisconfiguredAuthCodeFlow,
    MissingRedirect,
    MismatchingUri,
}

impl GuardState {
    /// Failure reported to the caller when this state blocks a login.
    pub fn as_error(self) -> Option<AuthenticationError> {
        match self {
            GuardState::Ok => None,
            GuardState::MissingRedirect => Some(AuthenticationError::InvalidRedirectUri),
            GuardState::MismatchingUri => Some(AuthenticationError::MismatchingRedirectUri),
            GuardState::MisconfiguredAuthCodeFlow => Some(AuthenticationError::InvalidFlowError),
        }
    }
}

/// Facts the guard decides over.
#[derive(Debug, Clone, Copy)]
pub struct GuardInput<'a> {
    pub redirect_uri: Option<&'a str>,
    pub generated_redirect_uri: &'a str,
    pub redirect_registered: bool,
    pub force_auth_code: bool,
}

/// Pure decision; the first matching rule wins.
pub fn evaluate(input: GuardInput<'_>) -> GuardState {
    if input.force_auth_code {
        return GuardState::MisconfiguredAuthCodeFlow;
    }
    match input.redirect_uri {
        None => GuardState::MissingRedirect,
        Some(uri) if uri != input.generated_redirect_uri && !input.redirect_registered => {
            GuardState::MismatchingUri
        }
        Some(_) => GuardState::Ok,
    }
}

/// Title and body of the developer-facing diagnostic for a non-OK state.
pub fn diagnostic(state: GuardState, input: GuardInput<'_>) -> Option<(&'static str, String)> {
    match state {
        GuardState::Ok => None,
        GuardState::MisconfiguredAuthCodeFlow => Some((
            "Misconfigured session configuration, see log.",
            "The authorization code flow now requires a redirect URI supplied to the \
             application. The deprecated force-authorization-code option indicates this \
             integration may not support that; enable the auth-code fallback option instead."
                .to_owned(),
        )),
        GuardState::MissingRedirect => Some((
            "Misconfigured session configuration, see log.",
            "Redirect URI must be set in the session configuration.".to_owned(),
        )),
        GuardState::MismatchingUri => Some((
            "Misconfigured redirect URI, see log.",
            format!(
                "Misconfigured redirect_uri. Either register {} as a redirect URI for the app \
                 in the developer dashboard and use it in the session configuration, or route \
                 the configured redirect URI ({}) to this application.",
                input.generated_redirect_uri,
                input.redirect_uri.unwrap_or_default()
            ),
        )),
    }
}

/// External "continue anyway?" decision, consulted only outside strict mode.
pub trait LegacyPrompt: Send + Sync {
    fn should_continue(&self, title: &str, message: &str) -> bool;
}

/// Result of running the guard before a login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardVerdict {
    pub state: GuardState,
    pub proceed: bool,
    pub message: Option<String>,
}

#[derive(Clone, Default)]
pub struct LegacyCompatibilityGuard {
    prompt: Option<Arc<dyn LegacyPrompt>>,
}

impl LegacyCompatibilityGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn LegacyPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn check(
        &self,
        config: &SessionConfig,
        options: &LoginOptions,
        host: &dyn HostEnvironment,
    ) -> GuardVerdict {
        let generated = host.default_redirect_uri();
        let redirect_uri = config.redirect_uri.as_deref();
        let input = GuardInput {
            redirect_uri,
            generated_redirect_uri: &generated,
            redirect_registered: redirect_uri
                .map(|uri| host.is_redirect_registered(uri))
                .unwrap_or(false),
            force_auth_code: options.force_auth_code,
        };
        let state = evaluate(input);
        let Some((title, message)) = diagnostic(state, input) else {
            return GuardVerdict {
                state,
                proceed: true,
                message: None,
            };
        };

        let proceed = if host.is_strict() {
            error!(?state, title, "{message}");
            false
        } else {
            warn!(?state, title, "{message}");
            self.prompt
                .as_ref()
                .map(|prompt| prompt.should_continue(title, &message))
                .unwrap_or(true)
        };
        GuardVerdict {
            state,
            proceed,
            message: Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Scope;
    use crate::host::StaticHost;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GENERATED: &str = "com.example.app.uberauth://redirect";

    fn input(redirect_uri: Option<&str>) -> GuardInput<'_> {
        GuardInput {
            redirect_uri,
            generated_redirect_uri: GENERATED,
            redirect_registered: false,
            force_auth_code: false,
        }
    }

    fn host(strict: bool) -> StaticHost {
        StaticHost {
            package_name: "com.example.app".into(),
            strict,
            ..StaticHost::default()
        }
    }

    struct CountingPrompt {
        answer: bool,
        calls: AtomicUsize,
    }

    impl LegacyPrompt for CountingPrompt {
        fn should_continue(&self, _title: &str, _message: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    #[test]
    fn force_auth_code_wins_over_everything() {
        let state = evaluate(GuardInput {
            force_auth_code: true,
            ..input(None)
        });
        assert_eq!(state, GuardState::MisconfiguredAuthCodeFlow);
    }

    #[test]
    fn redirect_rules() {
        assert_eq!(evaluate(input(None)), GuardState::MissingRedirect);
        assert_eq!(evaluate(input(Some(GENERATED))), GuardState::Ok);
        assert_eq!(
            evaluate(input(Some("https://example.com/cb"))),
            GuardState::MismatchingUri
        );
        assert_eq!(
            evaluate(GuardInput {
                redirect_registered: true,
                ..input(Some("https://example.com/cb"))
            }),
            GuardState::Ok
        );
    }

    #[test]
    fn states_map_to_errors() {
        assert_eq!(GuardState::Ok.as_error(), None);
        assert_eq!(
            GuardState::MissingRedirect.as_error(),
            Some(AuthenticationError::InvalidRedirectUri)
        );
        assert_eq!(
            GuardState::MismatchingUri.as_error(),
            Some(AuthenticationError::MismatchingRedirectUri)
        );
        assert_eq!(
            GuardState::MisconfiguredAuthCodeFlow.as_error(),
            Some(AuthenticationError::InvalidFlowError)
        );
    }

    #[test]
    fn strict_host_blocks_with_diagnostic() {
        let config = SessionConfig::new("client").with_scopes([Scope::Profile]);
        let verdict =
            LegacyCompatibilityGuard::new().check(&config, &LoginOptions::default(), &host(true));
        assert_eq!(verdict.state, GuardState::MissingRedirect);
        assert!(!verdict.proceed);
        assert!(verdict.message.unwrap().contains("Redirect URI must be set"));
    }

    #[test]
    fn relaxed_host_proceeds_without_prompt() {
        let config = SessionConfig::new("client");
        let verdict =
            LegacyCompatibilityGuard::new().check(&config, &LoginOptions::default(), &host(false));
        assert_eq!(verdict.state, GuardState::MissingRedirect);
        assert!(verdict.proceed);
    }

    #[test]
    fn relaxed_host_defers_to_prompt() {
        let prompt = Arc::new(CountingPrompt {
            answer: false,
            calls: AtomicUsize::new(0),
        });
        let guard = LegacyCompatibilityGuard::new().with_prompt(prompt.clone());
        let config = SessionConfig::new("client").with_redirect_uri("https://example.com/cb");
        let verdict = guard.check(&config, &LoginOptions::default(), &host(false));
        assert_eq!(verdict.state, GuardState::MismatchingUri);
        assert!(!verdict.proceed);
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn strict_host_never_prompts() {
        let prompt = Arc::new(CountingPrompt {
            answer: true,
            calls: AtomicUsize::new(0),
        });
        let guard = LegacyCompatibilityGuard::new().with_prompt(prompt.clone());
        let options = LoginOptions {
            force_auth_code: true,
            ..LoginOptions::default()
        };
        let config = SessionConfig::new("client").with_redirect_uri(GENERATED);
        let verdict = guard.check(&config, &options, &host(true));
        assert!(!verdict.proceed);
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn healthy_config_passes_silently() {
        let config = SessionConfig::new("client").with_redirect_uri(GENERATED);
        let verdict =
            LegacyCompatibilityGuard::new().check(&config, &LoginOptions::default(), &host(true));
        assert_eq!(verdict.state, GuardState::Ok);
        assert!(verdict.proceed);
        assert!(verdict.message.is_none());
    }
}
