//! Results returned by the submission and retrieval phases.

use crate::error::JobError;
use crate::manifest::{JobState, Manifest};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result of a submission run.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// One entry per attempted source, in submission order.
    pub manifest: Manifest,
    pub stats: BatchStats,
}

/// Counters for a submission run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Sources attempted.
    pub total: usize,
    /// Sources that received a process id.
    pub submitted: usize,
    /// Sources recorded as `NOT_SUBMITTED`.
    pub failed: usize,
    /// Submissions that carried a layout hint.
    pub with_layout: usize,
    /// Submitted jobs whose first status check failed.
    pub status_unknown: usize,
    pub duration_ms: u64,
}

/// Outcome of a retrieval run, one entry per manifest record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalReport {
    pub entries: Vec<RetrievalEntry>,
    pub duration_ms: u64,
}

impl RetrievalReport {
    pub fn retrieved(&self) -> usize {
        self.count(|o| matches!(o, RetrievalOutcome::Retrieved { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, RetrievalOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RetrievalOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&RetrievalOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }
}

/// What happened to one manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalEntry {
    /// Manifest key.
    pub job_id: String,
    /// Freshly polled state (or the stored one if polling was impossible).
    pub state: JobState,
    pub outcome: RetrievalOutcome,
    /// Download of the original image, when requested and available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetrievalOutcome {
    /// Result written to `path`.
    Retrieved { path: PathBuf },
    /// Nothing to fetch (not finished, or never submitted). Not an error.
    Skipped { reason: SkipReason },
    /// Poll or fetch failed.
    Failed { error: JobError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The manifest entry never reached the service.
    NotSubmitted,
    /// The job is pending, running or failed remotely.
    NotFinished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ImageOutcome {
    Saved { path: PathBuf },
    Failed { error: JobError },
}
