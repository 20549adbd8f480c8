//! Progress-callback trait for per-job batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive events
//! as the orchestrator submits or retrieves each job.
//!
//! # Example
//!
//! ```rust
//! use htr_batch::{BatchConfig, BatchProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     submitted: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_job_submitted(&self, index: usize, total: usize, job_id: &str, status: &str) {
//!         self.submitted.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("[{}/{}] {} → {}", index + 1, total, job_id, status);
//!     }
//! }
//!
//! let config = BatchConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { submitted: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the orchestrator as it works through a batch.
///
/// `index` is zero-based; `total` is the number of sources (submission) or
/// manifest entries (retrieval). All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first source is submitted.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called before a source is processed.
    fn on_job_start(&self, index: usize, total: usize, source: &str) {
        let _ = (index, total, source);
    }

    /// Called after a successful submission and its status check.
    fn on_job_submitted(&self, index: usize, total: usize, job_id: &str, status: &str) {
        let _ = (index, total, job_id, status);
    }

    /// Called when a source or a job fails (layout, submission, poll, fetch).
    fn on_job_failed(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after every source has been attempted.
    fn on_batch_complete(&self, total: usize, submitted: usize) {
        let _ = (total, submitted);
    }

    /// Called once before the first manifest entry is re-polled.
    fn on_retrieval_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when a finished job's result was written to disk.
    fn on_job_retrieved(&self, index: usize, total: usize, job_id: &str, path: &Path) {
        let _ = (index, total, job_id, path);
    }

    /// Called when a job has no result to fetch yet (or was never submitted).
    fn on_job_skipped(&self, index: usize, total: usize, job_id: &str, status: &str) {
        let _ = (index, total, job_id, status);
    }

    /// Called once after every manifest entry has been handled.
    fn on_retrieval_complete(&self, total: usize, retrieved: usize) {
        let _ = (total, retrieved);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
