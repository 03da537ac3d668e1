use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// Terminal, user-visible classification of a failed authentication attempt.
///
/// Provider error codes map onto these variants case-insensitively; anything the
/// provider sends that is not listed here degrades to [`AuthenticationError::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationError {
    #[error("authentication cancelled")]
    Cancelled,
    #[error("connectivity issue")]
    ConnectivityIssue,
    #[error("invalid client id")]
    InvalidClientId,
    #[error("invalid parameters")]
    InvalidParameters,
    #[error("invalid redirect uri")]
    InvalidRedirectUri,
    #[error("invalid response")]
    InvalidResponse,
    #[error("invalid scope")]
    InvalidScope,
    #[error("mismatching redirect uri")]
    MismatchingRedirectUri,
    #[error("server error")]
    ServerError,
    #[error("temporarily unavailable")]
    TemporarilyUnavailable,
    #[error("unknown error")]
    Unknown,
    #[error("internal server error")]
    InternalServerError,
    #[error("expired jwt")]
    ExpiredJwt,
    #[error("invalid nonce")]
    InvalidNonce,
    #[error("invalid user id")]
    InvalidUserId,
    #[error("invalid app signature")]
    InvalidAppSignature,
    #[error("invalid auth code")]
    InvalidAuthCode,
    #[error("invalid jwt signature")]
    InvalidJwtSignature,
    #[error("invalid flow")]
    InvalidFlowError,
    #[error("malformed request")]
    MalformedRequest,
    #[error("invalid jwt")]
    InvalidJwt,
    #[error("access denied")]
    AccessDenied,
    #[error("invalid sdk")]
    InvalidSdk,
    #[error("invalid sdk version")]
    InvalidSdkVersion,
    #[error("invalid package")]
    InvalidPackage,
    #[error("invalid uri")]
    InvalidUri,
    #[error("invalid response type")]
    InvalidResponseType,
    #[error("unavailable")]
    Unavailable,
}

const ALL_ERRORS: [AuthenticationError; 28] = [
    AuthenticationError::Cancelled,
    AuthenticationError::ConnectivityIssue,
    AuthenticationError::InvalidClientId,
    AuthenticationError::InvalidParameters,
    AuthenticationError::InvalidRedirectUri,
    AuthenticationError::InvalidResponse,
    AuthenticationError::InvalidScope,
    AuthenticationError::MismatchingRedirectUri,
    AuthenticationError::ServerError,
    AuthenticationError::TemporarilyUnavailable,
    AuthenticationError::Unknown,
    AuthenticationError::InternalServerError,
    AuthenticationError::ExpiredJwt,
    AuthenticationError::InvalidNonce,
    AuthenticationError::InvalidUserId,
    AuthenticationError::InvalidAppSignature,
    AuthenticationError::InvalidAuthCode,
    AuthenticationError::InvalidJwtSignature,
    AuthenticationError::InvalidFlowError,
    AuthenticationError::MalformedRequest,
    AuthenticationError::InvalidJwt,
    AuthenticationError::AccessDenied,
    AuthenticationError::InvalidSdk,
    AuthenticationError::InvalidSdkVersion,
    AuthenticationError::InvalidPackage,
    AuthenticationError::InvalidUri,
    AuthenticationError::InvalidResponseType,
    AuthenticationError::Unavailable,
];

impl AuthenticationError {
    /// Wire representation used in `error=` callback parameters.
    pub fn as_code(self) -> &'static str {
        match self {
            AuthenticationError::Cancelled => "cancelled",
            AuthenticationError::ConnectivityIssue => "connectivity_issue",
            AuthenticationError::InvalidClientId => "invalid_client_id",
            AuthenticationError::InvalidParameters => "invalid_parameters",
            AuthenticationError::InvalidRedirectUri => "invalid_redirect_uri",
            AuthenticationError::InvalidResponse => "invalid_response",
            AuthenticationError::InvalidScope => "invalid_scope",
            AuthenticationError::MismatchingRedirectUri => "mismatching_redirect_uri",
            AuthenticationError::ServerError => "server_error",
            AuthenticationError::TemporarilyUnavailable => "temporarily_unavailable",
            AuthenticationError::Unknown => "unknown",
            AuthenticationError::InternalServerError => "internal_server_error",
            AuthenticationError::ExpiredJwt => "expired_jwt",
            AuthenticationError::InvalidNonce => "invalid_nonce",
            AuthenticationError::InvalidUserId => "invalid_user_id",
            AuthenticationError::InvalidAppSignature => "invalid_app_signature",
            AuthenticationError::InvalidAuthCode => "invalid_auth_code",
            AuthenticationError::InvalidJwtSignature => "invalid_jwt_signature",
            AuthenticationError::InvalidFlowError => "invalid_flow_error",
            AuthenticationError::MalformedRequest => "malformed_request",
            AuthenticationError::InvalidJwt => "invalid_jwt",
            AuthenticationError::AccessDenied => "access_denied",
            AuthenticationError::InvalidSdk => "invalid_sdk",
            AuthenticationError::InvalidSdkVersion => "invalid_sdk_version",
            AuthenticationError::InvalidPackage => "invalid_package",
            AuthenticationError::InvalidUri => "invalid_uri",
            AuthenticationError::InvalidResponseType => "invalid_response_type",
            AuthenticationError::Unavailable => "unavailable",
        }
    }

    /// Map a provider error code onto the taxonomy. Never fails.
    pub fn from_code(code: &str) -> Self {
        let normalized = code.trim().to_ascii_lowercase();
        ALL_ERRORS
            .iter()
            .copied()
            .find(|candidate| candidate.as_code() == normalized)
            .unwrap_or(AuthenticationError::Unknown)
    }
}

/// Errors surfaced by authentication plumbing that are not login outcomes.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("endpoint error {status}: {body}")]
    Endpoint { status: StatusCode, body: String },
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("a login attempt is already in progress")]
    LoginInProgress,
    #[error("scopes must be set in the session configuration")]
    MissingScopes,
    #[error("redirect URI must be set in the session configuration")]
    MissingRedirectUri,
    #[error("authorization listener terminated before receiving redirect")]
    ListenerClosed,
    #[error("failed to launch system browser: {0}")]
    BrowserLaunch(String),
    #[error("invalid authorization response: {0}")]
    InvalidAuthorizationResponse(String),
}
