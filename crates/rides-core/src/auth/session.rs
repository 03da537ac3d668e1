use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::scope::ScopeSet;

/// Access credential issued by the identity provider.
///
/// Values are immutable once built; a refreshed credential is a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    access_token: String,
    refresh_token: Option<String>,
    token_type: String,
    expires_in: i64,
    scopes: ScopeSet,
    #[serde(default = "default_issued_at")]
    issued_at: DateTime<Utc>,
}

fn default_issued_at() -> DateTime<Utc> {
    Utc::now()
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        token_type: impl Into<String>,
        expires_in: i64,
        scopes: ScopeSet,
    ) -> Self {
        Self::issued(
            access_token,
            refresh_token,
            token_type,
            expires_in,
            scopes,
            Utc::now(),
        )
    }

    pub(crate) fn issued(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        token_type: impl Into<String>,
        expires_in: i64,
        scopes: ScopeSet,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            token_type: token_type.into(),
            expires_in,
            scopes,
            issued_at,
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn expires_in(&self) -> i64 {
        self.expires_in
    }

    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + Duration::seconds(self.expires_in)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }

    pub fn will_expire_within(&self, window: Duration) -> bool {
        Utc::now() + window >= self.expires_at()
    }

    /// Value for an `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Credentials an API client can authenticate with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    /// Server token configured by the caller; takes precedence over a user credential.
    ServerToken(String),
    AccessToken(Credential),
}

impl Session {
    pub fn authorization_header(&self) -> String {
        match self {
            Session::ServerToken(token) => format!("Token {token}"),
            Session::AccessToken(credential) => credential.authorization_header(),
        }
    }
}
