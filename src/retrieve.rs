//! Retrieval phase: re-poll every job in a manifest and download finished
//! results.
//!
//! The state stored in the manifest is only what the service reported at
//! submission time, so every remote job is polled again before anything is
//! decided. Only a fresh `FINISHED` leads to a download; every other state is
//! a skip, not a failure. Poll and fetch failures are recorded per entry and
//! the run continues with the next one; a rejected access token is refreshed
//! before the next entry.

use crate::config::BatchConfig;
use crate::error::{HtrError, JobError};
use crate::manifest::{JobId, JobRecord, JobState, Manifest};
use crate::output::{ImageOutcome, RetrievalEntry, RetrievalOutcome, RetrievalReport, SkipReason};
use crate::pipeline::download::{download_image, IMAGES_DIR};
use crate::pipeline::input::ImageSource;
use crate::session::{renew, Session, SessionClient};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Authenticate, retrieve, and always log out again.
///
/// # Errors
/// [`HtrError::AuthenticationFailed`] before anything is polled, or any
/// fatal error from [`retrieve_results`].
pub async fn retrieve_batch<C>(
    client: &C,
    manifest: &Manifest,
    output_dir: &Path,
    config: &BatchConfig,
) -> Result<RetrievalReport, HtrError>
where
    C: SessionClient + ?Sized,
{
    let mut session = client
        .authenticate()
        .await
        .map_err(|e| HtrError::AuthenticationFailed {
            detail: e.to_string(),
        })?;

    let report = retrieve_results(client, &mut session, manifest, output_dir, config).await;

    if let Err(e) = client.teardown(session).await {
        warn!("Logout failed: {}", e);
    }
    report
}

/// Walk `manifest` in stored order and collect what is ready.
///
/// Results land in `<output_dir>/<job id>.xml`; with
/// [`BatchConfig::save_images`] set, URL-sourced images are downloaded to
/// `<output_dir>/images/`.
///
/// # Errors
/// Only when `output_dir` cannot be created, or the download client cannot
/// be built. Everything per entry is reported in the [`RetrievalReport`].
pub async fn retrieve_results<C>(
    client: &C,
    session: &mut Session,
    manifest: &Manifest,
    output_dir: &Path,
    config: &BatchConfig,
) -> Result<RetrievalReport, HtrError>
where
    C: SessionClient + ?Sized,
{
    let start = Instant::now();
    let total = manifest.len();

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|source| HtrError::OutputWriteFailed {
            path: output_dir.to_path_buf(),
            source,
        })?;

    let http = if config.save_images {
        Some(
            reqwest::Client::builder()
                .timeout(Duration::from_secs(config.download_timeout_secs))
                .build()
                .map_err(|e| HtrError::Internal(format!("HTTP client: {e}")))?,
        )
    } else {
        None
    };

    info!("Retrieving {} jobs into {}", total, output_dir.display());
    if let Some(ref cb) = config.progress_callback {
        cb.on_retrieval_start(total);
    }

    let mut entries = Vec::with_capacity(total);
    for (index, (job_id, record)) in manifest.iter().enumerate() {
        let key = job_id.key();

        let image = match (&http, &record.source) {
            (Some(http), ImageSource::Url(url)) => {
                let dir = output_dir.join(IMAGES_DIR);
                Some(match download_image(http, url, &dir, &key).await {
                    Ok(path) => ImageOutcome::Saved { path },
                    Err(error) => {
                        warn!("{}", error);
                        ImageOutcome::Failed { error }
                    }
                })
            }
            _ => None,
        };

        let (state, outcome, rejected) =
            retrieve_one(client, session, job_id, record, output_dir).await;
        if rejected {
            renew(client, session).await;
        }

        if let Some(ref cb) = config.progress_callback {
            match &outcome {
                RetrievalOutcome::Retrieved { path } => {
                    cb.on_job_retrieved(index, total, &key, path)
                }
                RetrievalOutcome::Skipped { .. } => {
                    cb.on_job_skipped(index, total, &key, &state.to_string())
                }
                RetrievalOutcome::Failed { error } => {
                    cb.on_job_failed(index, total, &error.to_string())
                }
            }
        }

        entries.push(RetrievalEntry {
            job_id: key,
            state,
            outcome,
            image,
        });
    }

    let report = RetrievalReport {
        entries,
        duration_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        "Retrieval complete: {} retrieved, {} skipped, {} failed, {}ms",
        report.retrieved(),
        report.skipped(),
        report.failed(),
        report.duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_retrieval_complete(total, report.retrieved());
    }
    Ok(report)
}

/// Poll one entry and fetch its result if it is finished.
///
/// The flag is set when the service rejected the access token.
async fn retrieve_one<C>(
    client: &C,
    session: &Session,
    job_id: &JobId,
    record: &JobRecord,
    output_dir: &Path,
) -> (JobState, RetrievalOutcome, bool)
where
    C: SessionClient + ?Sized,
{
    let Some(process_id) = job_id.remote() else {
        debug!("{}: never submitted, skipping", job_id);
        let skipped = RetrievalOutcome::Skipped {
            reason: SkipReason::NotSubmitted,
        };
        return (record.status.clone(), skipped, false);
    };

    let state = match client.poll_status(session, process_id).await {
        Ok(status) => JobState::Reported(status),
        Err(e) => {
            let error = JobError::Poll {
                job_id: process_id.to_string(),
                detail: e.to_string(),
            };
            warn!("{}", error);
            let failed = RetrievalOutcome::Failed { error };
            return (record.status.clone(), failed, e.is_unauthorized());
        }
    };

    if !state.is_finished() {
        debug!("Job {} is {}, skipping", process_id, state);
        let skipped = RetrievalOutcome::Skipped {
            reason: SkipReason::NotFinished,
        };
        return (state, skipped, false);
    }

    let fetch_err = |detail: String| JobError::Fetch {
        job_id: process_id.to_string(),
        detail,
    };
    let bytes = match client.fetch_result(session, process_id).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let error = fetch_err(e.to_string());
            warn!("{}", error);
            return (state, RetrievalOutcome::Failed { error }, e.is_unauthorized());
        }
    };

    let path = output_dir.join(format!("{process_id}.xml"));
    let outcome = match tokio::fs::write(&path, &bytes).await {
        Ok(()) => {
            info!("Result of job {} saved to {}", process_id, path.display());
            RetrievalOutcome::Retrieved { path }
        }
        Err(e) => {
            let error = fetch_err(format!("cannot write {}: {e}", path.display()));
            warn!("{}", error);
            RetrievalOutcome::Failed { error }
        }
    };
    (state, outcome, false)
}
