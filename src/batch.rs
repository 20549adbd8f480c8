//! Submission phase: push every source to the service and record the outcome.
//!
//! Each source moves through
//!
//! ```text
//! DISCOVERED ─┬─ LAYOUT_RESOLVED ─┬─ SUBMITTED ── STATUS_CHECKED
//!             └─ LAYOUT_ABSENT ───┴─ SUBMIT_FAILED
//! ```
//!
//! and always ends up in the manifest, failures included. A failure on one
//! source never stops the batch. After a successful submission the job is
//! polled exactly once: recognition runs asynchronously on the service and
//! is collected later by [`crate::retrieve`].
//!
//! When the service rejects the access token, that source is recorded as
//! failed and the session is refreshed before the next one.

use crate::config::BatchConfig;
use crate::error::{HtrError, JobError};
use crate::manifest::{JobId, JobRecord, JobState, Manifest};
use crate::output::{BatchOutput, BatchStats};
use crate::pipeline::input::ImageSource;
use crate::pipeline::{encode, layout};
use crate::session::{renew, ProcessRequest, Session, SessionClient};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Authenticate, run the batch, and always log out again.
///
/// # Errors
/// Only [`HtrError::AuthenticationFailed`]: without a session nothing is
/// submitted. Per-source failures are recorded in the returned manifest.
pub async fn submit_batch<C>(
    client: &C,
    sources: &[ImageSource],
    config: &BatchConfig,
) -> Result<BatchOutput, HtrError>
where
    C: SessionClient + ?Sized,
{
    let mut session = client
        .authenticate()
        .await
        .map_err(|e| HtrError::AuthenticationFailed {
            detail: e.to_string(),
        })?;

    let output = run_batch(client, &mut session, sources, config).await;

    if let Err(e) = client.teardown(session).await {
        warn!("Logout failed: {}", e);
    }
    Ok(output)
}

/// Submit `sources` in order within an existing session.
///
/// `session` is replaced when it has to be refreshed mid-batch.
pub async fn run_batch<C>(
    client: &C,
    session: &mut Session,
    sources: &[ImageSource],
    config: &BatchConfig,
) -> BatchOutput
where
    C: SessionClient + ?Sized,
{
    let start = Instant::now();
    let total = sources.len();
    info!("Submitting {} images", total);

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    let mut manifest = Manifest::new();
    let mut stats = BatchStats {
        total,
        ..Default::default()
    };

    for (ordinal, source) in sources.iter().enumerate() {
        if let Some(ref cb) = config.progress_callback {
            cb.on_job_start(ordinal, total, &source.to_string());
        }

        let (job_id, record, rejected) =
            submit_source(client, session, ordinal, source, config).await;

        match (&job_id, &record.error) {
            (JobId::Remote(id), error) => {
                stats.submitted += 1;
                if record.layout_xml.is_some() {
                    stats.with_layout += 1;
                }
                if let Some(e) = error {
                    stats.status_unknown += 1;
                    warn!("{}: {}", source, e);
                }
                if let Some(ref cb) = config.progress_callback {
                    cb.on_job_submitted(ordinal, total, id, &record.status.to_string());
                }
            }
            (JobId::Unsubmitted { .. }, error) => {
                stats.failed += 1;
                let msg = error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "not submitted".to_string());
                warn!("{}: {}", source, msg);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_job_failed(ordinal, total, &msg);
                }
            }
        }

        manifest.record_submission(job_id, record);

        if rejected {
            renew(client, session).await;
        }

        if let Some(ref path) = config.checkpoint_path {
            if let Err(e) = manifest.persist(path) {
                warn!("Checkpoint failed: {}", e);
            }
        }
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Batch complete: {}/{} submitted, {} failed, {}ms",
        stats.submitted, total, stats.failed, stats.duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(total, stats.submitted);
    }

    BatchOutput { manifest, stats }
}

/// Take one source from DISCOVERED to a terminal state.
///
/// The flag is set when the service rejected the access token.
async fn submit_source<C>(
    client: &C,
    session: &Session,
    ordinal: usize,
    source: &ImageSource,
    config: &BatchConfig,
) -> (JobId, JobRecord, bool)
where
    C: SessionClient + ?Sized,
{
    let unsubmitted = JobId::Unsubmitted { ordinal };
    let layout_xml = config.layout_resolver.resolve(source);
    let mut record = JobRecord {
        status: JobState::NotSubmitted,
        source: source.clone(),
        htr_model: config.htr_model.clone(),
        layout_xml: layout_xml.clone(),
        line_detection_model: None,
        error: None,
    };

    // ── Layout ───────────────────────────────────────────────────────────
    let hint = match layout_xml {
        Some(ref path) => match load_hint(path).await {
            Ok(hint) => {
                debug!("{}: layout with {} lines", source, hint.line_count());
                Some(hint)
            }
            Err(e) => {
                record.error = Some(e);
                return (unsubmitted, record, false);
            }
        },
        None => {
            debug!("{}: no layout, using line detection", source);
            record.line_detection_model = Some(config.line_detection_model.clone());
            None
        }
    };

    // ── Image ────────────────────────────────────────────────────────────
    let image = match encode::image_payload(source).await {
        Ok(image) => image,
        Err(e) => {
            record.error = Some(e);
            return (unsubmitted, record, false);
        }
    };

    // ── Submit ───────────────────────────────────────────────────────────
    let request = ProcessRequest::new(
        config.htr_model.clone(),
        image,
        hint,
        config.line_detection_model.clone(),
    );
    let process_id = match client.submit(session, &request).await {
        Ok(id) => id,
        Err(e) => {
            record.error = Some(JobError::Submission {
                detail: e.to_string(),
            });
            return (unsubmitted, record, e.is_unauthorized());
        }
    };

    // ── One status check ─────────────────────────────────────────────────
    let mut rejected = false;
    match client.poll_status(session, &process_id).await {
        Ok(status) => record.status = JobState::Reported(status),
        Err(e) => {
            rejected = e.is_unauthorized();
            record.status = JobState::Unknown;
            record.error = Some(JobError::Poll {
                job_id: process_id.clone(),
                detail: e.to_string(),
            });
        }
    }

    (JobId::Remote(process_id), record, rejected)
}

/// Read and transcode a layout document.
async fn load_hint(path: &Path) -> Result<layout::LayoutHint, JobError> {
    let layout_err = |detail: String| JobError::Layout {
        layout: path.to_path_buf(),
        detail,
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| layout_err(e.to_string()))?;
    layout::transcode(&raw).map_err(|e| layout_err(e.to_string()))
}
