//! Configuration types for batch submission and retrieval.
//!
//! Two structs split the knobs by who consumes them:
//!
//! * [`ServiceConfig`]: endpoints, credentials and timeouts for the HTTP
//!   [`crate::session::MetagraphoClient`].
//! * [`BatchConfig`]: what the orchestrator does with each image (models,
//!   layout lookup, checkpointing, image downloads, progress events).
//!
//! Model names are resolved in [`BatchConfigBuilder::build`], so an unknown
//! name fails before any remote call is made.

use crate::error::HtrError;
use crate::models::{
    resolve_htr_model, resolve_line_detection_model, ModelId, DEFAULT_HTR_MODEL,
    DEFAULT_LINE_DETECTION_MODEL,
};
use crate::pipeline::input::{LayoutResolver, SiblingXmlResolver};
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Processing API base URL.
pub const DEFAULT_API_URL: &str = "https://transkribus.eu/processing/v1";

/// OpenID Connect realm used for password and refresh-token grants.
pub const DEFAULT_AUTH_URL: &str =
    "https://account.readcoop.eu/auth/realms/readcoop/protocol/openid-connect";

/// OAuth client id registered for the processing API.
pub const DEFAULT_CLIENT_ID: &str = "processing-api-client";

// ── Service ──────────────────────────────────────────────────────────────

/// Username/password pair for the password grant.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection settings for the processing service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub credentials: Credentials,

    /// Processing API base URL, without trailing slash. Default: [`DEFAULT_API_URL`].
    pub api_url: String,

    /// Token endpoint base (`{auth_url}/token`, `{auth_url}/logout`).
    pub auth_url: String,

    pub client_id: String,

    /// Per-request timeout in seconds. Default: 120.
    ///
    /// Base64 submissions of large scans are the slowest requests.
    pub request_timeout_secs: u64,
}

impl ServiceConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            api_url: DEFAULT_API_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            request_timeout_secs: 120,
        }
    }

    /// Check that endpoints are HTTP(S) URLs and credentials are present.
    pub fn validate(&self) -> Result<(), HtrError> {
        for (name, url) in [("api_url", &self.api_url), ("auth_url", &self.auth_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(HtrError::InvalidConfig(format!(
                    "{name} must be an HTTP(S) URL, got '{url}'"
                )));
            }
        }
        if self.credentials.username.is_empty() {
            return Err(HtrError::InvalidConfig("username must not be empty".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(HtrError::InvalidConfig("request timeout must be ≥ 1s".into()));
        }
        Ok(())
    }
}

// ── Batch ────────────────────────────────────────────────────────────────

/// Configuration for a submission or retrieval run.
///
/// Built via [`BatchConfig::builder()`].
///
/// # Example
/// ```rust
/// use htr_batch::BatchConfig;
///
/// let config = BatchConfig::builder()
///     .htr_model("Text Titan")
///     .checkpoint_path("jobs/run.json")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Recognition model every image is submitted with.
    pub htr_model: ModelId,

    /// Line-detection model used for images without a layout hint.
    pub line_detection_model: ModelId,

    /// Finds the PAGE-XML layout for each image. Default: [`SiblingXmlResolver`].
    pub layout_resolver: Arc<dyn LayoutResolver>,

    /// If set, the manifest is persisted here after every image, so a killed
    /// run still leaves a loadable manifest of what was submitted.
    pub checkpoint_path: Option<PathBuf>,

    /// On retrieval, also download the original image of URL-sourced jobs.
    pub save_images: bool,

    /// Timeout for image downloads in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-job progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("htr_model", &self.htr_model)
            .field("line_detection_model", &self.line_detection_model)
            .field("layout_resolver", &"<dyn LayoutResolver>")
            .field("checkpoint_path", &self.checkpoint_path)
            .field("save_images", &self.save_images)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            htr_model: DEFAULT_HTR_MODEL.to_string(),
            line_detection_model: DEFAULT_LINE_DETECTION_MODEL.to_string(),
            layout_resolver: Arc::new(SiblingXmlResolver),
            checkpoint_path: None,
            save_images: false,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

/// Builder for [`BatchConfig`]; models are given by catalog name.
pub struct BatchConfigBuilder {
    htr_model: String,
    line_detection_model: String,
    layout_resolver: Arc<dyn LayoutResolver>,
    checkpoint_path: Option<PathBuf>,
    save_images: bool,
    download_timeout_secs: u64,
    progress_callback: Option<ProgressCallback>,
}

impl BatchConfigBuilder {
    pub fn htr_model(mut self, name: impl Into<String>) -> Self {
        self.htr_model = name.into();
        self
    }

    pub fn line_detection_model(mut self, name: impl Into<String>) -> Self {
        self.line_detection_model = name.into();
        self
    }

    pub fn layout_resolver(mut self, resolver: Arc<dyn LayoutResolver>) -> Self {
        self.layout_resolver = resolver;
        self
    }

    pub fn checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn save_images(mut self, v: bool) -> Self {
        self.save_images = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress_callback = Some(cb);
        self
    }

    /// Resolve model names and validate.
    pub fn build(self) -> Result<BatchConfig, HtrError> {
        let htr_model = resolve_htr_model(&self.htr_model)?;
        let line_detection_model = resolve_line_detection_model(&self.line_detection_model)?;
        if self.download_timeout_secs == 0 {
            return Err(HtrError::InvalidConfig(
                "download timeout must be ≥ 1s".into(),
            ));
        }
        Ok(BatchConfig {
            htr_model,
            line_detection_model,
            layout_resolver: self.layout_resolver,
            checkpoint_path: self.checkpoint_path,
            save_images: self.save_images,
            download_timeout_secs: self.download_timeout_secs,
            progress_callback: self.progress_callback,
        })
    }
}
