//! Per-image stages used by the orchestrator.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ layout ──▶ encode ──▶ (submit)      ...      (fetch) ──▶ download
//! (path/URL) (PAGE→hint) (base64)                                   (image_url)
//! ```
//!
//! 1. [`input`]: turn a path, directory or URL into [`input::ImageSource`]s
//!    and locate each image's layout document
//! 2. [`layout`]: transcode a PAGE-XML layout into the submission hint
//! 3. [`encode`]: build the `image` part of a submission
//! 4. [`download`]: on retrieval, optionally save the original image of a
//!    URL-sourced job
//!
//! None of these stages talk to the processing service; that is
//! [`crate::session`]'s job.

pub mod download;
pub mod encode;
pub mod input;
pub mod layout;
