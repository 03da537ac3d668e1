use tokio::sync::oneshot;
use tracing::debug;
use url::Url;

use super::flow::ResponseType;
use super::flow_url::CallbackParams;

/// Request handed to the UI surface that presents a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceRequest {
    /// Open the deeplink in the named companion package.
    Sso { uri: Url, package: String },
    Web { uri: Url, flavor: ResponseType },
    /// Informational page; no credential can result.
    Install { uri: Url },
}

impl SurfaceRequest {
    pub fn uri(&self) -> &Url {
        match self {
            SurfaceRequest::Sso { uri, .. }
            | SurfaceRequest::Web { uri, .. }
            | SurfaceRequest::Install { uri } => uri,
        }
    }
}

/// What the provider handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackPayload {
    Redirect(Url),
    /// Deeplink extras delivered without a redirect URI.
    Params(CallbackParams),
}

impl CallbackPayload {
    pub fn is_empty(&self) -> bool {
        matches!(self, CallbackPayload::Params(params) if params.is_empty())
    }
}

/// Single result reported by a UI surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceResult {
    Completed(CallbackPayload),
    Cancelled(Option<CallbackPayload>),
}

/// One-shot completion target for a dispatched request.
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<SurfaceResult>,
}

impl Completion {
    pub fn channel() -> (Self, oneshot::Receiver<SurfaceResult>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Deliver the result. Consuming `self` makes a second completion impossible.
    pub fn complete(self, result: SurfaceResult) {
        if self.tx.send(result).is_err() {
            debug!("login attempt dropped before the surface completed");
        }
    }
}

/// Presents a flow to the user and reports back exactly once.
///
/// `dispatch` must return promptly; the result may arrive later from any task or thread.
pub trait UiSurface: Send + Sync {
    fn dispatch(&self, request: SurfaceRequest, completion: Completion);
}
