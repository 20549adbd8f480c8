//! Job manifest: the durable record of every submission attempt.
//!
//! On disk the manifest is a single JSON object whose keys are job ids and
//! whose values are [`JobRecord`]s, in submission order:
//!
//! ```json
//! {
//!   "8812345": {
//!     "process_id": "8812345",
//!     "status": "CREATED",
//!     "image_path": "images/0001_p001.jpg",
//!     "htr_model": 309593,
//!     "layout_xml": "images/xml/0001_p001.xml"
//!   },
//!   "unsubmitted-1": {
//!     "process_id": null,
//!     "status": "NOT_SUBMITTED",
//!     "image_path": "images/0002_p001.jpg",
//!     "htr_model": 309593,
//!     "line_detection_model": 51962,
//!     "error": { "kind": "submission", "detail": "HTTP 500: ..." }
//!   }
//! }
//! ```
//!
//! Failed submissions get a key derived from their position in the batch, so
//! several failures in one run never overwrite each other.
//!
//! Writes go to a temp file in the destination directory that is then renamed
//! over the target, so a crash mid-write leaves the previous manifest intact.

use crate::error::{HtrError, JobError};
use crate::models::ModelId;
use crate::pipeline::input::ImageSource;
use chrono::{DateTime, TimeZone};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Key prefix for attempts that never reached the service.
const UNSUBMITTED_PREFIX: &str = "unsubmitted-";

/// Sentinel id older manifests used for every failed submission.
const LEGACY_SENTINEL: &str = "-1";

/// `<jobs_dir>/<job_name>_<YYYYmmdd_HHMMSS>.json`
pub fn timestamped_path<Tz>(jobs_dir: &Path, job_name: &str, at: &DateTime<Tz>) -> PathBuf
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    jobs_dir.join(format!("{job_name}_{}.json", at.format("%Y%m%d_%H%M%S")))
}

// ── Job identity ─────────────────────────────────────────────────────────

/// Identity of one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobId {
    /// Process id issued by the service.
    Remote(String),
    /// The submission never produced a process id. `ordinal` is the
    /// zero-based position of the source in its batch.
    Unsubmitted { ordinal: usize },
}

impl JobId {
    /// Canonical manifest key.
    pub fn key(&self) -> String {
        match self {
            JobId::Remote(id) => id.clone(),
            JobId::Unsubmitted { ordinal } => format!("{UNSUBMITTED_PREFIX}{ordinal}"),
        }
    }

    /// Parse a manifest key. `position` is used for legacy `-1` keys.
    pub fn from_key(key: &str, position: usize) -> Self {
        if key == LEGACY_SENTINEL {
            return JobId::Unsubmitted { ordinal: position };
        }
        match key
            .strip_prefix(UNSUBMITTED_PREFIX)
            .and_then(|n| n.parse().ok())
        {
            Some(ordinal) => JobId::Unsubmitted { ordinal },
            None => JobId::Remote(key.to_string()),
        }
    }

    /// Whether `key` can name a result file inside an output directory.
    pub fn is_usable_key(key: &str) -> bool {
        !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains(['/', '\\', '\0'])
    }

    /// The remote process id, if the job was submitted.
    pub fn remote(&self) -> Option<&str> {
        match self {
            JobId::Remote(id) => Some(id),
            JobId::Unsubmitted { .. } => None,
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

// ── Job state ────────────────────────────────────────────────────────────

/// Last known state of a job.
///
/// Stored states are a cache: anything that acts on a job re-polls first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Submission failed; there is no remote job.
    NotSubmitted,
    /// Status string reported by the service (`CREATED`, `RUNNING`, ...).
    Reported(String),
    /// The job exists but its status could not be queried.
    Unknown,
}

impl JobState {
    /// Serialized form of [`JobState::NotSubmitted`].
    pub const NOT_SUBMITTED: &'static str = "NOT_SUBMITTED";

    /// Terminal-success status: the result is ready to download.
    pub const FINISHED: &'static str = "FINISHED";

    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Reported(s) if s == Self::FINISHED)
    }

    fn as_wire(&self) -> Option<&str> {
        match self {
            JobState::NotSubmitted => Some(Self::NOT_SUBMITTED),
            JobState::Reported(s) => Some(s),
            JobState::Unknown => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire().unwrap_or("UNKNOWN"))
    }
}

impl Serialize for JobState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for JobState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<String>::deserialize(deserializer)? {
            None => JobState::Unknown,
            Some(s) if s == Self::NOT_SUBMITTED => JobState::NotSubmitted,
            Some(s) => JobState::Reported(s),
        })
    }
}

// ── Job record ───────────────────────────────────────────────────────────

/// Everything tracked about one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobState,

    /// Where the image came from: `image_path` or `image_url` on disk.
    #[serde(flatten)]
    pub source: ImageSource,

    /// Recognition model the job was submitted with.
    pub htr_model: ModelId,

    /// Layout document used as a hint, if one was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_xml: Option<PathBuf>,

    /// Line-detection model, set when the service segments the page itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_detection_model: Option<ModelId>,

    /// Why the attempt (or its first status check) failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

/// On-disk shape of a record: `process_id` is derived from the key.
#[derive(Serialize)]
struct StoredRecord<'a> {
    process_id: Option<&'a str>,
    #[serde(flatten)]
    record: &'a JobRecord,
}

// ── Manifest ─────────────────────────────────────────────────────────────

/// Ordered, keyed set of job records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<(JobId, JobRecord)>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert the record for `job_id`, or overwrite it in place.
    ///
    /// Overwriting keeps the entry's original position (last write wins).
    pub fn record_submission(&mut self, job_id: JobId, record: JobRecord) {
        let key = job_id.key();
        match self.entries.iter_mut().find(|(id, _)| id.key() == key) {
            Some(slot) => {
                debug!("Overwriting manifest entry {}", key);
                slot.1 = record;
            }
            None => self.entries.push((job_id, record)),
        }
    }

    pub fn get(&self, job_id: &JobId) -> Option<&JobRecord> {
        let key = job_id.key();
        self.entries
            .iter()
            .find(|(id, _)| id.key() == key)
            .map(|(_, r)| r)
    }

    /// Entries in submission order.
    pub fn iter(&self) -> impl Iterator<Item = (&JobId, &JobRecord)> {
        self.entries.iter().map(|(id, r)| (id, r))
    }

    /// Write the manifest atomically (temp file + rename).
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<(), HtrError> {
        let path = path.as_ref();
        let io_err = |source| HtrError::ManifestIo {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;

        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| HtrError::Internal(format!("manifest serialisation: {e}")))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;

        info!("Manifest with {} entries written to {}", self.len(), path.display());
        Ok(())
    }

    /// Read a manifest written by [`Manifest::persist`] (or by older tools
    /// using numeric process ids and a shared `-1` failure key).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HtrError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| HtrError::ManifestIo {
            path: path.to_path_buf(),
            source,
        })?;

        let manifest: Manifest =
            serde_json::from_str(&raw).map_err(|e| HtrError::ManifestFormat {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;

        debug!("Loaded {} manifest entries from {}", manifest.len(), path.display());
        Ok(manifest)
    }
}

impl Serialize for Manifest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, record) in &self.entries {
            map.serialize_entry(
                &id.key(),
                &StoredRecord {
                    process_id: id.remote(),
                    record,
                },
            )?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Manifest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ManifestVisitor;

        impl<'de> Visitor<'de> for ManifestVisitor {
            type Value = Manifest;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object mapping job ids to job records")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Manifest, A::Error> {
                let mut manifest = Manifest::new();
                while let Some(key) = access.next_key::<String>()? {
                    if !JobId::is_usable_key(&key) {
                        return Err(<A::Error as de::Error>::custom(format!(
                            "job id '{key}' cannot be used as a file name"
                        )));
                    }
                    let record: JobRecord = access
                        .next_value()
                        .map_err(|e| <A::Error as de::Error>::custom(format!("entry '{key}': {e}")))?;
                    let id = JobId::from_key(&key, manifest.len());
                    manifest.record_submission(id, record);
                }
                Ok(manifest)
            }
        }

        deserializer.deserialize_map(ManifestVisitor)
    }
}
