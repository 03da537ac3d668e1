use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::flow::ResponseType;
use super::flow_url;
use super::{AuthError, AuthenticationError, PrefillInfo, SessionConfig};

const DEFAULT_PAR_SCOPE: &str = "profile";

/// Reference returned by the pushed authorization request endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParResponse {
    pub request_uri: String,
    pub expires_in: i64,
}

/// Pushes prefill details to the provider ahead of the web authorization request.
#[derive(Debug, Clone)]
pub struct ParClient {
    http: Client,
    endpoint: Option<Url>,
}

impl ParClient {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            endpoint: None,
        }
    }

    /// Override the endpoint derived from the session's region.
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Push the request, classifying failures into the outcome taxonomy.
    pub async fn push(
        &self,
        config: &SessionConfig,
        response_type: ResponseType,
        prefill: &PrefillInfo,
    ) -> Result<ParResponse, AuthenticationError> {
        match self.send(config, response_type, prefill).await {
            Ok(response) => {
                debug!(expires_in = response.expires_in, "pushed authorization request accepted");
                Ok(response)
            }
            Err(err) => {
                warn!(%err, "pushed authorization request failed");
                Err(classify(&err))
            }
        }
    }

    async fn send(
        &self,
        config: &SessionConfig,
        response_type: ResponseType,
        prefill: &PrefillInfo,
    ) -> Result<ParResponse, AuthError> {
        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => flow_url::par_endpoint(config)?,
        };
        let scope = if config.has_scopes() {
            config.scope_string()
        } else {
            DEFAULT_PAR_SCOPE.to_owned()
        };
        let form = vec![
            ("client_id".to_string(), config.client_id.clone()),
            ("response_type".to_string(), response_type.as_str().to_string()),
            ("login_hint".to_string(), prefill.encode()?),
            ("scope".to_string(), scope),
        ];

        let response = self.http.post(endpoint).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "".into());
            return Err(AuthError::Endpoint { status, body });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn classify(err: &AuthError) -> AuthenticationError {
    match err {
        AuthError::Endpoint { .. } => AuthenticationError::ServerError,
        AuthError::Serde(_) => AuthenticationError::InvalidResponse,
        AuthError::Http(_) | AuthError::Io(_) => AuthenticationError::ConnectivityIssue,
        _ => AuthenticationError::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Scope;
    use httpmock::prelude::*;

    fn prefill() -> PrefillInfo {
        PrefillInfo {
            email: "rider@example.com".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            phone_number: "5550100".into(),
        }
    }

    fn client(server: &MockServer) -> ParClient {
        let endpoint = Url::parse(&server.url("/oauth/v2/par")).unwrap();
        ParClient::new(Client::new()).with_endpoint(endpoint)
    }

    #[tokio::test]
    async fn push_success() {
        let server = MockServer::start();
        let login_hint = prefill().encode().unwrap();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth/v2/par")
                .header("content-type", "application/x-www-form-urlencoded")
                .x_www_form_urlencoded_tuple("client_id", "client")
                .x_www_form_urlencoded_tuple("response_type", "code")
                .x_www_form_urlencoded_tuple("scope", "profile")
                .x_www_form_urlencoded_tuple("login_hint", &login_hint);
            then.status(201).json_body_obj(&serde_json::json!({
                "request_uri": "urn:uber:request:abc",
                "expires_in": 60
            }));
        });

        let config = SessionConfig::new("client");
        let response = client(&server)
            .push(&config, ResponseType::Code, &prefill())
            .await
            .unwrap();
        mock.assert();
        assert_eq!(response.request_uri, "urn:uber:request:abc");
        assert_eq!(response.expires_in, 60);
    }

    #[tokio::test]
    async fn push_sends_configured_scopes() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth/v2/par")
                .x_www_form_urlencoded_tuple("scope", "history request");
            then.status(200).json_body_obj(&serde_json::json!({
                "request_uri": "urn:uber:request:def",
                "expires_in": 30
            }));
        });

        let config = SessionConfig::new("client").with_scopes([Scope::Request, Scope::History]);
        client(&server)
            .push(&config, ResponseType::Token, &prefill())
            .await
            .unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn non_success_status_is_server_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/oauth/v2/par");
            then.status(500).body("boom");
        });

        let err = client(&server)
            .push(&SessionConfig::new("client"), ResponseType::Code, &prefill())
            .await
            .unwrap_err();
        assert_eq!(err, AuthenticationError::ServerError);
    }

    #[tokio::test]
    async fn undecodable_body_is_invalid_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/oauth/v2/par");
            then.status(200).body("not json");
        });

        let err = client(&server)
            .push(&SessionConfig::new("client"), ResponseType::Code, &prefill())
            .await
            .unwrap_err();
        assert_eq!(err, AuthenticationError::InvalidResponse);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_connectivity_issue() {
        let client = ParClient::new(Client::new())
            .with_endpoint(Url::parse("http://127.0.0.1:9/oauth/v2/par").unwrap());
        let err = client
            .push(&SessionConfig::new("client"), ResponseType::Code, &prefill())
            .await
            .unwrap_err();
        assert_eq!(err, AuthenticationError::ConnectivityIssue);
    }
}
