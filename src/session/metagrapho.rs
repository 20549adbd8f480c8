//! HTTP client for the Transkribus processing API ("metagrapho").
//!
//! | Operation        | Request                                   | Success |
//! |------------------|-------------------------------------------|---------|
//! | authenticate     | `POST {auth}/token` (password grant)      | 200     |
//! | refresh          | `POST {auth}/token` (refresh-token grant) | 200     |
//! | submit           | `POST {api}/processes`                    | 200     |
//! | poll_status      | `GET  {api}/processes/{id}`               | 200     |
//! | fetch_result     | `GET  {api}/processes/{id}/page`          | 200     |
//! | teardown         | `POST {auth}/logout`                      | 204     |
//!
//! Every call is a single request: no retries. Refreshing the token is an
//! explicit call the orchestrator makes after a rejection.

use crate::config::ServiceConfig;
use crate::error::{HtrError, SessionError};
use crate::manifest::JobId;
use crate::session::{ProcessRequest, Session, SessionClient};
use async_trait::async_trait;
use reqwest::{header, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// [`SessionClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct MetagraphoClient {
    http: reqwest::Client,
    config: ServiceConfig,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    process_id: serde_json::Value,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: Option<String>,
}

impl MetagraphoClient {
    pub fn new(config: ServiceConfig) -> Result<Self, HtrError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| HtrError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn auth(&self, path: &str) -> String {
        format!("{}/{}", self.config.auth_url.trim_end_matches('/'), path)
    }
}

/// Map a non-success status to a [`SessionError`].
async fn check(response: Response, what: &str) -> Result<Response, SessionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SessionError::Unauthorized {
            status: status.as_u16(),
        },
        StatusCode::NOT_FOUND => SessionError::NotFound {
            what: what.to_string(),
        },
        _ => SessionError::Status {
            status: status.as_u16(),
            body,
        },
    })
}

/// The API reports process ids as JSON numbers; older deployments used strings.
fn process_id_string(value: &serde_json::Value) -> Result<String, SessionError> {
    match value {
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::String(s) if JobId::is_usable_key(s) => Ok(s.clone()),
        other => Err(SessionError::Decode(format!("processId {other} is not an id"))),
    }
}

#[async_trait]
impl SessionClient for MetagraphoClient {
    async fn authenticate(&self) -> Result<Session, SessionError> {
        let creds = &self.config.credentials;
        let response = self
            .http
            .post(self.auth("token"))
            .form(&[
                ("grant_type", "password"),
                ("username", creds.username.as_str()),
                ("password", creds.password.as_str()),
                ("client_id", self.config.client_id.as_str()),
            ])
            .send()
            .await?;
        let token: TokenResponse = check(response, "token endpoint").await?.json().await?;

        info!("Authenticated as {}", creds.username);
        Ok(Session::new(token.access_token, token.refresh_token))
    }

    async fn refresh(&self, session: &Session) -> Result<Session, SessionError> {
        let refresh_token = session
            .refresh_token()
            .ok_or(SessionError::NoRefreshToken)?;
        let response = self
            .http
            .post(self.auth("token"))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
            ])
            .send()
            .await?;
        let token: TokenResponse = check(response, "token endpoint").await?.json().await?;

        debug!("Refreshed access token");
        // Keycloak may rotate the refresh token; keep the old one otherwise.
        let refresh_token = token
            .refresh_token
            .or_else(|| Some(refresh_token.to_string()));
        Ok(Session::new(token.access_token, refresh_token))
    }

    async fn submit(
        &self,
        session: &Session,
        request: &ProcessRequest,
    ) -> Result<String, SessionError> {
        let response = self
            .http
            .post(self.api("processes"))
            .bearer_auth(session.access_token())
            .header(header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await?;
        let body: SubmitResponse = check(response, "processes").await?.json().await?;
        let id = process_id_string(&body.process_id)?;

        info!("Submitted process {}", id);
        Ok(id)
    }

    async fn poll_status(
        &self,
        session: &Session,
        process_id: &str,
    ) -> Result<String, SessionError> {
        let response = self
            .http
            .get(self.api(&format!("processes/{process_id}")))
            .bearer_auth(session.access_token())
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        let body: StatusResponse = check(response, &format!("process {process_id}"))
            .await?
            .json()
            .await?;
        let status = body
            .status
            .ok_or_else(|| SessionError::Decode("status missing from response".into()))?;

        debug!("Process {} status: {}", process_id, status);
        Ok(status)
    }

    async fn fetch_result(
        &self,
        session: &Session,
        process_id: &str,
    ) -> Result<Vec<u8>, SessionError> {
        let response = self
            .http
            .get(self.api(&format!("processes/{process_id}/page")))
            .bearer_auth(session.access_token())
            .header(header::ACCEPT, "application/xml")
            .send()
            .await?;
        let bytes = check(response, &format!("result of process {process_id}"))
            .await?
            .bytes()
            .await?;

        debug!("Process {}: {} result bytes", process_id, bytes.len());
        Ok(bytes.to_vec())
    }

    async fn teardown(&self, session: Session) -> Result<(), SessionError> {
        let Some(refresh_token) = session.refresh_token() else {
            warn!("Session has no refresh token; nothing to log out");
            return Ok(());
        };
        let response = self
            .http
            .post(self.auth("logout"))
            .form(&[
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
            ])
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            info!("Logged out");
            return Ok(());
        }
        // Any other 2xx still means the token is gone, but flag it.
        let response = check(response, "logout endpoint").await?;
        warn!("Logout answered {} instead of 204", response.status());
        Ok(())
    }
}
