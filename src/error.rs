//! Error types for the htr-batch library.
//!
//! Failures fall into four groups:
//!
//! * [`HtrError`]: **Fatal**: the run cannot start or cannot finish
//!   (unknown model name, unreadable manifest, authentication refused).
//!   Returned as `Err(HtrError)` from the top-level `submit_*` / `retrieve_*`
//!   functions, always before any further remote interaction.
//!
//! * [`JobError`]: **Non-fatal**: one image or one job failed. Stored on the
//!   [`crate::manifest::JobRecord`] or the [`crate::output::RetrievalEntry`]
//!   it belongs to so the remaining items carry on.
//!
//! * [`LayoutError`]: what the PAGE-XML transcoder reports. Folded into
//!   [`JobError::Layout`] by the orchestrator.
//!
//! * [`SessionError`]: what a [`crate::session::SessionClient`] reports for a
//!   single remote call.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the htr-batch library.
#[derive(Debug, Error)]
pub enum HtrError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Image file or directory was not found at the given path.
    #[error("Source not found: '{path}'\nCheck the path exists and is readable.")]
    SourceNotFound { path: PathBuf },

    /// A directory could not be listed while discovering images.
    #[error("Cannot read '{path}': {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The input string is neither an existing path nor an HTTP/HTTPS URL.
    #[error("Invalid source '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidSource { input: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// A model name is not part of the catalog.
    #[error("Unknown {kind} model '{name}'. Known models: {known}")]
    UnknownModel {
        kind: &'static str,
        name: String,
        known: String,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Session errors ────────────────────────────────────────────────────
    /// No usable session could be acquired; nothing was submitted.
    #[error("Authentication failed: {detail}")]
    AuthenticationFailed { detail: String },

    // ── Manifest errors ───────────────────────────────────────────────────
    /// The manifest file could not be read or written.
    #[error("Manifest I/O failed for '{path}': {source}")]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manifest does not have the expected keyed-record shape.
    #[error("Manifest '{path}' is malformed: {detail}")]
    ManifestFormat { path: PathBuf, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create the output directory or write a result file.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single image or job.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobError {
    /// The image itself could not be read.
    #[error("{input}: could not read image: {detail}")]
    Source { input: String, detail: String },

    /// The layout document exists but could not be used as a hint.
    #[error("{layout}: layout rejected: {detail}")]
    Layout { layout: PathBuf, detail: String },

    /// The service refused the submission or the request never arrived.
    #[error("submission failed: {detail}")]
    Submission { detail: String },

    /// Status query failed.
    #[error("job {job_id}: status check failed: {detail}")]
    Poll { job_id: String, detail: String },

    /// Result retrieval failed.
    #[error("job {job_id}: result download failed: {detail}")]
    Fetch { job_id: String, detail: String },

    /// The original image could not be downloaded from its URL.
    #[error("{url}: image download failed: {detail}")]
    ImageDownload { url: String, detail: String },
}

/// Failure while transcoding a PAGE-XML layout document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// Not parseable as a PAGE document.
    #[error("malformed layout document: {detail}")]
    Malformed { detail: String },

    /// A region or line is missing one of its required geometries.
    #[error("{element} '{id}' has no {geometry} points")]
    MissingGeometry {
        element: &'static str,
        id: String,
        geometry: &'static str,
    },
}

/// Failure of a single call against the remote processing service.
#[derive(Debug, Error)]
pub enum SessionError {
    /// HTTP 401/403: the token was rejected or has expired.
    #[error("unauthorized (HTTP {status}): check credentials or re-authenticate")]
    Unauthorized { status: u16 },

    /// HTTP 404: unknown job, or the result is not materialised yet.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Any other non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection, TLS or timeout failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// The session carries no refresh token, so it cannot be renewed.
    #[error("session has no refresh token")]
    NoRefreshToken,
}

impl SessionError {
    /// Whether the service rejected the access token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SessionError::Unauthorized { .. })
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SessionError::Decode(e.to_string())
        } else {
            SessionError::Transport(e.to_string())
        }
    }
}
