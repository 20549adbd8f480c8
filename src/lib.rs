//! # htr-batch
//!
//! Run batches of handwritten-text-recognition (HTR) jobs against the
//! Transkribus processing API and collect the results later.
//!
//! Recognition is asynchronous on the service side: a submission returns a
//! process id immediately and the PAGE-XML result becomes available minutes
//! or hours later. This crate therefore works in two phases joined by a
//! manifest file.
//!
//! ## Phases
//!
//! ```text
//! images / URLs
//!  │
//!  ├─ submit    per image: find layout → transcode → encode → POST → poll once
//!  │             └─▶ jobs/<name>_<timestamp>.json   (Manifest)
//!  │
//!  └─ retrieve  per manifest entry: poll again → FINISHED? fetch PAGE-XML
//!                └─▶ results/<job id>.xml          (RetrievalReport)
//! ```
//!
//! Per-image failures (unreadable file, rejected layout, refused submission,
//! failed fetch) are recorded and never stop a batch. Only configuration
//! errors and a failed login abort a run, always before the first job is
//! touched.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use htr_batch::{
//!     resolve_sources, submit_batch, BatchConfig, Credentials, MetagraphoClient, ServiceConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = MetagraphoClient::new(ServiceConfig::new(Credentials::new("me", "secret")))?;
//!     let config = BatchConfig::builder().htr_model("Text Titan").build()?;
//!
//!     let sources = resolve_sources("images/")?;
//!     let output = submit_batch(&client, &sources, &config).await?;
//!     output.manifest.persist("jobs/run.json")?;
//!     eprintln!("{}/{} submitted", output.stats.submitted, output.stats.total);
//!     Ok(())
//! }
//! ```
//!
//! ## Layout hints
//!
//! An image `images/0001.jpg` with a PAGE-XML file at `images/xml/0001.xml`
//! is submitted with that layout as a hint and the service skips line
//! detection. Without one, the configured line-detection model is requested.
//! Swap the lookup with [`BatchConfigBuilder::layout_resolver`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `htr-batch` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod manifest;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod retrieve;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{run_batch, submit_batch};
pub use config::{BatchConfig, BatchConfigBuilder, Credentials, ServiceConfig};
pub use error::{HtrError, JobError, LayoutError, SessionError};
pub use manifest::{JobId, JobRecord, JobState, Manifest};
pub use models::ModelId;
pub use output::{
    BatchOutput, BatchStats, ImageOutcome, RetrievalEntry, RetrievalOutcome, RetrievalReport,
    SkipReason,
};
pub use pipeline::input::{
    resolve_sources, ImageSource, LayoutResolver, NoLayout, SiblingXmlResolver,
};
pub use pipeline::layout::{transcode, LayoutHint};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use retrieve::{retrieve_batch, retrieve_results};
pub use session::{MetagraphoClient, ProcessRequest, Session, SessionClient};
