use std::ops::RangeInclusive;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};
use url::Url;

use super::flow_url::CallbackParams;
use super::surface::{CallbackPayload, Completion, SurfaceRequest, SurfaceResult, UiSurface};
use super::AuthError;

pub const DEFAULT_REDIRECT_HOST: &str = "127.0.0.1";
pub const DEFAULT_REDIRECT_PATH: &str = "/callback";
pub const DEFAULT_REDIRECT_PORT_START: u16 = 9000;
pub const DEFAULT_REDIRECT_PORT_END: u16 = 9999;

pub fn default_redirect_ports() -> RangeInclusive<u16> {
    DEFAULT_REDIRECT_PORT_START..=DEFAULT_REDIRECT_PORT_END
}

const SUCCESS_HTML: &str = r#"<html><body><h1>Authentication complete</h1><p>You may close this window and return to the terminal.</p></body></html>"#;
const ERROR_HTML: &str = r#"<html><body><h1>Authentication failed</h1><p>Please return to the terminal for details.</p></body></html>"#;
// Implicit-grant tokens arrive in the fragment, which browsers never send to the server.
const RELAY_HTML: &str = r#"<html><body><script>window.location.replace(window.location.pathname + "?" + window.location.hash.substring(1));</script><noscript>Enable JavaScript to finish signing in.</noscript></body></html>"#;

type Notify = Arc<dyn Fn(&Url) + Send + Sync>;

/// Presents web flows in the system browser and captures the redirect on a loopback listener.
pub struct LoopbackSurface {
    listener: Arc<TcpListener>,
    redirect_uri: Url,
    open_browser: bool,
    notify: Notify,
}

impl LoopbackSurface {
    /// Bind the first free port in `ports` on the loopback interface.
    pub async fn bind<I>(ports: I) -> Result<Self, AuthError>
    where
        I: IntoIterator<Item = u16>,
    {
        let mut last_error = None;
        for port in ports {
            match TcpListener::bind((DEFAULT_REDIRECT_HOST, port)).await {
                Ok(listener) => return Self::from_listener(listener),
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error
            .map(AuthError::Io)
            .unwrap_or(AuthError::ListenerClosed))
    }

    fn from_listener(listener: TcpListener) -> Result<Self, AuthError> {
        let port = listener.local_addr()?.port();
        let redirect_uri = Url::parse(&format!(
            "http://{DEFAULT_REDIRECT_HOST}:{port}{DEFAULT_REDIRECT_PATH}"
        ))?;
        debug!(%redirect_uri, "loopback listener ready");
        Ok(Self {
            listener: Arc::new(listener),
            redirect_uri,
            open_browser: true,
            notify: Arc::new(|_| {}),
        })
    }

    pub fn with_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    /// Called with every URI before it is opened.
    pub fn with_notify<F>(mut self, notify: F) -> Self
    where
        F: Fn(&Url) + Send + Sync + 'static,
    {
        self.notify = Arc::new(notify);
        self
    }

    /// Redirect URI to configure in the session and register with the provider.
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
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

impl UiSurface for LoopbackSurface {
    fn dispatch(&self, request: SurfaceRequest, completion: Completion) {
        match request {
            SurfaceRequest::Sso { package, .. } => {
                debug!(%package, "companion apps cannot be launched from a desktop host");
                completion.complete(unavailable());
            }
            SurfaceRequest::Install { uri } => {
                self.present(&uri);
                completion.complete(SurfaceResult::Cancelled(None));
            }
            SurfaceRequest::Web { uri, .. } => {
                self.present(&uri);
                let listener = self.listener.clone();
                let redirect_uri = self.redirect_uri.clone();
                tokio::spawn(async move {
                    let result = match accept_redirect(&listener, &redirect_uri).await {
                        Ok(url) => SurfaceResult::Completed(CallbackPayload::Redirect(url)),
                        Err(err) => {
                            warn!(%err, "loopback listener failed");
                            SurfaceResult::Cancelled(None)
                        }
                    };
                    completion.complete(result);
                });
            }
        }
    }
}

pub(crate) fn unavailable() -> SurfaceResult {
    let params: CallbackParams = [("error", "unavailable")].into_iter().collect();
    SurfaceResult::Cancelled(Some(CallbackPayload::Params(params)))
}

async fn accept_redirect(listener: &TcpListener, redirect_uri: &Url) -> Result<Url, AuthError> {
    loop {
        let (mut stream, _addr) = listener.accept().await?;
        let mut buffer = [0u8; 4096];
        let n = stream.read(&mut buffer).await?;
        let request = String::from_utf8_lossy(&buffer[..n]);
        let path = parse_request_path(&request)?;

        if !path.starts_with(redirect_uri.path()) {
            respond(&mut stream, 404, ERROR_HTML).await?;
            continue;
        }
        if !path.contains('?') {
            respond(&mut stream, 200, RELAY_HTML).await?;
            continue;
        }

        let url = redirect_uri.join(path)?;
        let failed = url.query_pairs().any(|(key, _)| key == "error");
        let (status, body) = if failed { (400, ERROR_HTML) } else { (200, SUCCESS_HTML) };
        respond(&mut stream, status, body).await?;
        let _ = stream.shutdown().await;
        return Ok(url);
    }
}

fn parse_request_path(request: &str) -> Result<&str, AuthError> {
    let mut lines = request.lines();
    let first_line = lines
        .next()
        .ok_or_else(|| AuthError::InvalidAuthorizationResponse("missing request line".into()))?;
    let mut parts = first_line.split_whitespace();
    let _method = parts
        .next()
        .ok_or_else(|| AuthError::InvalidAuthorizationResponse("missing method".into()))?;
    let path = parts
        .next()
        .ok_or_else(|| AuthError::InvalidAuthorizationResponse("missing path".into()))?;
    Ok(path)
}

async fn respond(stream: &mut TcpStream, status: u16, body: &str) -> Result<(), AuthError> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let response = format!(
        "{status_line}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ResponseType;
    use std::sync::Mutex;

    async fn get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect((DEFAULT_REDIRECT_HOST, port)).await.unwrap();
        let request = format!(
            "GET {path} HTTP/1.1\r\nHost: {DEFAULT_REDIRECT_HOST}:{port}\r\nConnection: close\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        let _ = stream.read_to_string(&mut response).await;
        response
    }

    fn web_request() -> SurfaceRequest {
        SurfaceRequest::Web {
            uri: Url::parse("https://auth.uber.com/oauth/v2/universal/authorize").unwrap(),
            flavor: ResponseType::Code,
        }
    }

    #[tokio::test]
    async fn loopback_captures_code_redirect() {
        let notified = Arc::new(Mutex::new(Vec::new()));
        let surface = LoopbackSurface::bind([0]).await.unwrap().with_browser(false).with_notify({
            let notified = notified.clone();
            move |url: &Url| notified.lock().unwrap().push(url.to_string())
        });
        let port = surface.redirect_uri().port().unwrap();

        let (completion, rx) = Completion::channel();
        surface.dispatch(web_request(), completion);
        let response = get(port, "/callback?code=test-code").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));

        let result = rx.await.unwrap();
        let SurfaceResult::Completed(CallbackPayload::Redirect(url)) = result else {
            panic!("unexpected result: {result:?}");
        };
        assert_eq!(url.as_str(), format!("http://127.0.0.1:{port}/callback?code=test-code"));
        assert_eq!(notified.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fragment_redirect_is_relayed() {
        let surface = LoopbackSurface::bind([0]).await.unwrap().with_browser(false);
        let port = surface.redirect_uri().port().unwrap();

        let (completion, rx) = Completion::channel();
        surface.dispatch(web_request(), completion);

        let relay = get(port, "/callback").await;
        assert!(relay.contains("window.location.hash"));
        let ignored = get(port, "/favicon.ico").await;
        assert!(ignored.starts_with("HTTP/1.1 404"));
        get(port, "/callback?access_token=T&expires_in=60&scope=profile&token_type=bearer").await;

        let SurfaceResult::Completed(CallbackPayload::Redirect(url)) = rx.await.unwrap() else {
            panic!("expected redirect");
        };
        assert!(url.query().unwrap().contains("access_token=T"));
    }

    #[tokio::test]
    async fn sso_is_unavailable_on_desktop() {
        let surface = LoopbackSurface::bind([0]).await.unwrap().with_browser(false);
        let (completion, rx) = Completion::channel();
        surface.dispatch(
            SurfaceRequest::Sso {
                uri: Url::parse("uber://connect?client_id=client").unwrap(),
                package: "com.ubercab".into(),
            },
            completion,
        );
        assert_eq!(rx.await.unwrap(), unavailable());
    }

    #[tokio::test]
    async fn install_completes_cancelled() {
        let surface = LoopbackSurface::bind([0]).await.unwrap().with_browser(false);
        let (completion, rx) = Completion::channel();
        surface.dispatch(
            SurfaceRequest::Install {
                uri: Url::parse("https://m.uber.com/sign-up").unwrap(),
            },
            completion,
        );
        assert_eq!(rx.await.unwrap(), SurfaceResult::Cancelled(None));
    }

    #[test]
    fn request_path_parsing() {
        assert_eq!(
            parse_request_path("GET /callback?code=1 HTTP/1.1\r\n").unwrap(),
            "/callback?code=1"
        );
        assert!(parse_request_path("").is_err());
    }
}
