//! Download the original image of a URL-sourced job next to its result.

use crate::error::JobError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory below the output directory that receives downloaded images.
pub const IMAGES_DIR: &str = "images";

/// Fetch `url` into `dir` as `<job_key>_<last URL path segment>`.
///
/// The key prefix keeps images apart whose URLs end alike (IIIF URLs all end
/// in `default.jpg`). Any non-success status is an error; nothing is
/// written in that case.
pub async fn download_image(
    http: &reqwest::Client,
    url: &str,
    dir: &Path,
    job_key: &str,
) -> Result<PathBuf, JobError> {
    let fail = |detail: String| JobError::ImageDownload {
        url: url.to_string(),
        detail,
    };

    info!("Downloading image from: {}", url);
    let response = http.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            fail("timed out".to_string())
        } else {
            fail(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(fail(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| fail(e.to_string()))?;

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| fail(format!("cannot create {}: {e}", dir.display())))?;
    let path = dir.join(image_file_name(job_key, url));
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| fail(format!("cannot write {}: {e}", path.display())))?;

    debug!("Saved {} bytes to {}", bytes.len(), path.display());
    Ok(path)
}

/// File name for the image of job `job_key` downloaded from `url`.
pub fn image_file_name(job_key: &str, url: &str) -> String {
    match extract_filename(url) {
        Some(name) => format!("{job_key}_{name}"),
        None => format!("{job_key}.img"),
    }
}

/// Last non-empty path segment of `url`, if it looks like a file name.
fn extract_filename(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() || last == "." || last == ".." {
        return None;
    }
    Some(last.to_string())
}
