//! The narrow interface the orchestrator uses to talk to the processing
//! service.
//!
//! Everything remote goes through [`SessionClient`]. Authentication produces
//! an explicit [`Session`] value that is passed by reference to every call and
//! handed back to [`SessionClient::teardown`] at the end, so token lifetime is
//! visible in the types instead of living in shared mutable state.
//!
//! [`metagrapho::MetagraphoClient`] is the HTTP implementation; tests drive
//! the orchestrator with in-memory fakes.

pub mod metagrapho;

use crate::error::SessionError;
use crate::models::ModelId;
use crate::pipeline::layout::LayoutHint;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

pub use metagrapho::MetagraphoClient;

/// Tokens of an authenticated session.
#[derive(Clone)]
pub struct Session {
    access_token: String,
    refresh_token: Option<String>,
}

impl Session {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Remote operations needed to run and collect a batch.
///
/// Implementations report failures as [`SessionError`]; the orchestrator
/// turns them into per-job records and never retries on its own.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Acquire a session. No other call is made if this fails.
    async fn authenticate(&self) -> Result<Session, SessionError>;

    /// Exchange the session's refresh token for a fresh session.
    async fn refresh(&self, session: &Session) -> Result<Session, SessionError>;

    /// Submit one image; returns the service's process id.
    async fn submit(
        &self,
        session: &Session,
        request: &ProcessRequest,
    ) -> Result<String, SessionError>;

    /// Current status string of a process (`CREATED`, `FINISHED`, ...).
    async fn poll_status(&self, session: &Session, process_id: &str)
        -> Result<String, SessionError>;

    /// PAGE-XML result of a finished process.
    async fn fetch_result(
        &self,
        session: &Session,
        process_id: &str,
    ) -> Result<Vec<u8>, SessionError>;

    /// Invalidate the session.
    async fn teardown(&self, session: Session) -> Result<(), SessionError>;
}

/// Replace `session` with a refreshed one after the service rejected it.
///
/// The call that was rejected is not repeated; only later calls use the
/// new token. If the refresh fails the old session is kept.
pub(crate) async fn renew<C>(client: &C, session: &mut Session)
where
    C: SessionClient + ?Sized,
{
    match client.refresh(session).await {
        Ok(fresh) => {
            info!("Access token refreshed");
            *session = fresh;
        }
        Err(e) => warn!("Token refresh failed: {}", e),
    }
}

// ── Wire format of a submission ──────────────────────────────────────────

/// Body of `POST /processes`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessRequest {
    pub config: ProcessConfig,
    pub image: ImagePayload,
    /// Layout hint; when present the service skips line detection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<LayoutHint>,
}

impl ProcessRequest {
    /// Build a request. Line detection is configured only when there is no
    /// layout hint to take its place.
    pub fn new(
        htr_model: ModelId,
        image: ImagePayload,
        layout: Option<LayoutHint>,
        line_detection_model: ModelId,
    ) -> Self {
        let line_detection = match layout {
            Some(_) => None,
            None => Some(LineDetection {
                model_id: line_detection_model,
            }),
        };
        Self {
            config: ProcessConfig {
                text_recognition: TextRecognition { htr_id: htr_model },
                line_detection,
            },
            image,
            content: layout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfig {
    pub text_recognition: TextRecognition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_detection: Option<LineDetection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRecognition {
    pub htr_id: ModelId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineDetection {
    pub model_id: ModelId,
}

/// The image, inline or by reference.
#[derive(Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ImagePayload {
    /// `{"base64": "..."}`
    Base64(String),
    /// `{"imageUrl": "..."}`
    ImageUrl(String),
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImagePayload::Base64(b) => write!(f, "Base64(<{} bytes>)", b.len()),
            ImagePayload::ImageUrl(u) => f.debug_tuple("ImageUrl").field(u).finish(),
        }
    }
}
