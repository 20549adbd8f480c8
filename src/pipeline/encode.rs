//! Image payloads: local file → base64 string, URL → passed through.
//!
//! The processing API accepts the image either inline (`image.base64`) or as
//! a URL it fetches itself (`image.imageUrl`). Local files are read whole and
//! encoded with the standard alphabet; no decoding or re-encoding of the
//! image happens here, the bytes go out exactly as they are on disk.

use crate::error::JobError;
use crate::pipeline::input::ImageSource;
use crate::session::ImagePayload;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use tracing::debug;

/// Build the `image` part of a submission for `source`.
pub async fn image_payload(source: &ImageSource) -> Result<ImagePayload, JobError> {
    match source {
        ImageSource::Url(url) => Ok(ImagePayload::ImageUrl(url.clone())),
        ImageSource::Path(path) => encode_file(path).await.map(ImagePayload::Base64),
    }
}

/// Read `path` and return its bytes base64-encoded.
pub async fn encode_file(path: &Path) -> Result<String, JobError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| JobError::Source {
        input: path.display().to_string(),
        detail: e.to_string(),
    })?;

    let b64 = STANDARD.encode(&bytes);
    debug!("Encoded {} → {} bytes base64", path.display(), b64.len());
    Ok(b64)
}
