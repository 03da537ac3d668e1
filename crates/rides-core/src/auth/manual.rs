use std::future::Future;
use std::sync::Arc;

use tracing::warn;
use url::Url;

use super::browser::unavailable;
use super::flow_url::CallbackParams;
use super::surface::{CallbackPayload, Completion, SurfaceRequest, SurfaceResult, UiSurface};
use super::AuthError;

type Notify = Arc<dyn Fn(&Url) + Send + Sync>;

/// Copy/paste surface: shows the URI and waits for the user to paste the redirect back.
pub struct ManualSurface<Input> {
    read_input: Arc<Input>,
    notify: Notify,
    open_browser: bool,
}

impl<Input, Fut> ManualSurface<Input>
where
    Input: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, AuthError>> + Send + 'static,
{
    pub fn new<N>(notify: N, read_input: Input) -> Self
    where
        N: Fn(&Url) + Send + Sync + 'static,
    {
        Self {
            read_input: Arc::new(read_input),
            notify: Arc::new(notify),
            open_browser: false,
        }
    }

    pub fn with_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    fn present(&self, uri: &Url) {
        (self.notify)(uri);
        if self.open_browser {
            if let Err(err) = open::that(uri.as_str()) {
                warn!(error = %AuthError::BrowserLaunch(err.to_string()), "open the URL manually");
            }
        }
    }
}

impl<Input, Fut> UiSurface for ManualSurface<Input>
where
    Input: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, AuthError>> + Send + 'static,
{
    fn dispatch(&self, request: SurfaceRequest, completion: Completion) {
        match request {
            SurfaceRequest::Sso { .. } => completion.complete(unavailable()),
            SurfaceRequest::Install { uri } => {
                self.present(&uri);
                completion.complete(SurfaceResult::Cancelled(None));
            }
            SurfaceRequest::Web { uri, .. } => {
                self.present(&uri);
                let read_input = self.read_input.clone();
                tokio::spawn(async move {
                    let result = match read_input().await {
                        Ok(raw) => match parse_manual_input(raw.trim()) {
                            Some(payload) => SurfaceResult::Completed(payload),
                            None => SurfaceResult::Cancelled(None),
                        },
                        Err(err) => {
                            warn!(%err, "unable to read authorization response");
                            SurfaceResult::Cancelled(None)
                        }
                    };
                    completion.complete(result);
                });
            }
        }
    }
}

/// Interpret pasted text: a full redirect URL, a bare `key=value&...` string, or a raw code.
/// Empty input means the user gave up.
fn parse_manual_input(input: &str) -> Option<CallbackPayload> {
    if input.is_empty() {
        return None;
    }

    if let Ok(url) = Url::parse(input) {
        return Some(CallbackPayload::Redirect(url));
    }

    let trimmed = input.trim_start_matches(&['?', '#'][..]);
    let params: CallbackParams = if trimmed.contains('=') {
        url::form_urlencoded::parse(trimmed.as_bytes()).collect()
    } else {
        [("code", input)].into_iter().collect()
    };
    Some(CallbackPayload::Params(params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ResponseType;
    use std::sync::Mutex;

    #[test]
    fn parse_input_handles_raw_code() {
        let Some(CallbackPayload::Params(params)) = parse_manual_input("code123") else {
            panic!("expected params");
        };
        assert_eq!(params.get("code"), Some("code123"));
    }

    #[test]
    fn parse_input_handles_url() {
        let payload = parse_manual_input("https://example.com/callback?code=abc").unwrap();
        assert_eq!(
            payload,
            CallbackPayload::Redirect(Url::parse("https://example.com/callback?code=abc").unwrap())
        );
    }

    #[test]
    fn parse_input_handles_bare_fragment() {
        let Some(CallbackPayload::Params(params)) =
            parse_manual_input("#access_token=T&expires_in=60&scope=profile&token_type=bearer")
        else {
            panic!("expected params");
        };
        assert_eq!(params.get("access_token"), Some("T"));
        assert_eq!(params.get("expires_in"), Some("60"));
    }

    #[test]
    fn empty_input_is_cancel() {
        assert!(parse_manual_input("").is_none());
    }

    #[tokio::test]
    async fn manual_surface_completes_with_pasted_redirect() {
        let shown = Arc::new(Mutex::new(None::<String>));
        let surface = ManualSurface::new(
            {
                let shown = shown.clone();
                move |url: &Url| *shown.lock().unwrap() = Some(url.to_string())
            },
            || async { Ok("https://example.com/callback?code=manual-code".to_string()) },
        );

        let (completion, rx) = Completion::channel();
        surface.dispatch(
            SurfaceRequest::Web {
                uri: Url::parse("https://auth.uber.com/oauth/v2/universal/authorize").unwrap(),
                flavor: ResponseType::Code,
            },
            completion,
        );

        let result = rx.await.unwrap();
        assert_eq!(
            result,
            SurfaceResult::Completed(CallbackPayload::Redirect(
                Url::parse("https://example.com/callback?code=manual-code").unwrap()
            ))
        );
        assert!(shown.lock().unwrap().as_deref().unwrap().starts_with("https://auth.uber.com"));
    }

    #[tokio::test]
    async fn blank_paste_cancels() {
        let surface = ManualSurface::new(|_: &Url| {}, || async { Ok("   ".to_string()) });
        let (completion, rx) = Completion::channel();
        surface.dispatch(
            SurfaceRequest::Web {
                uri: Url::parse("https://auth.uber.com/oauth/v2/universal/authorize").unwrap(),
                flavor: ResponseType::Token,
            },
            completion,
        );
        assert_eq!(rx.await.unwrap(), SurfaceResult::Cancelled(None));
    }
}
