//! Source resolution: turn a user-supplied path or URL into image sources,
//! and find the layout document that belongs to each one.
//!
//! A directory is scanned recursively for `jpg`/`jpeg`/`png` files and the
//! result is sorted by path, so two runs over an unchanged directory submit
//! the same images in the same order and produce diffable manifests.

use crate::error::HtrError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File extensions (lower-case) picked up by directory discovery.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Name of the directory, next to the images, holding PAGE-XML layouts.
pub const LAYOUT_DIR: &str = "xml";

/// One image to submit.
///
/// Serialised flattened into [`crate::manifest::JobRecord`] as either
/// `"image_path": ...` or `"image_url": ...`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSource {
    /// Local file, shipped to the service base64-encoded.
    #[serde(rename = "image_path")]
    Path(PathBuf),
    /// Publicly reachable URL the service downloads itself.
    #[serde(rename = "image_url")]
    Url(String),
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Path(p) => write!(f, "{}", p.display()),
            ImageSource::Url(u) => f.write_str(u),
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a CLI-style input to a sorted list of sources.
///
/// * URL → that URL
/// * file → that file (no extension check: the user named it explicitly)
/// * directory → every image below it, sorted by path
pub fn resolve_sources(input: &str) -> Result<Vec<ImageSource>, HtrError> {
    if is_url(input) {
        return Ok(vec![ImageSource::Url(input.to_string())]);
    }
    if input.contains("://") {
        return Err(HtrError::InvalidSource {
            input: input.to_string(),
        });
    }

    let path = PathBuf::from(input);
    if !path.exists() {
        return Err(HtrError::SourceNotFound { path });
    }
    if path.is_dir() {
        discover_images(&path)
    } else {
        debug!("Resolved single image: {}", path.display());
        Ok(vec![ImageSource::Path(path)])
    }
}

/// Recursively list image files under `dir`, sorted lexicographically by path.
pub fn discover_images(dir: &Path) -> Result<Vec<ImageSource>, HtrError> {
    let mut found = Vec::new();
    walk(dir, &mut found)?;
    found.sort();
    info!("Found {} images in {}", found.len(), dir.display());
    Ok(found.into_iter().map(ImageSource::Path).collect())
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), HtrError> {
    let unreadable = |source| HtrError::SourceUnreadable {
        path: dir.to_path_buf(),
        source,
    };
    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let path = entry.path();
        // Symlinked directories are not followed: a link back up the tree
        // would list the same images again on every level.
        if entry.file_type().map_err(unreadable)?.is_dir() {
            walk(&path, found)?;
        } else if has_image_extension(&path) {
            found.push(path);
        }
    }
    Ok(())
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

// ── Layout lookup ────────────────────────────────────────────────────────

/// Maps an image source to the PAGE-XML document describing its layout.
///
/// Returning `None` is normal: most images have no precomputed layout and
/// the service segments them itself.
pub trait LayoutResolver: Send + Sync {
    fn resolve(&self, source: &ImageSource) -> Option<PathBuf>;
}

/// `images/0001.jpg` → `images/xml/0001.xml`, if that file exists.
///
/// URL sources never have a layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct SiblingXmlResolver;

impl SiblingXmlResolver {
    /// Where the layout for `image` would live, whether or not it exists.
    pub fn layout_path(image: &Path) -> Option<PathBuf> {
        let stem = image.file_stem()?;
        let parent = image.parent().unwrap_or_else(|| Path::new(""));
        let mut name = stem.to_os_string();
        name.push(".xml");
        Some(parent.join(LAYOUT_DIR).join(name))
    }
}

impl LayoutResolver for SiblingXmlResolver {
    fn resolve(&self, source: &ImageSource) -> Option<PathBuf> {
        match source {
            ImageSource::Path(p) => Self::layout_path(p).filter(|x| x.is_file()),
            ImageSource::Url(_) => None,
        }
    }
}

/// Never supplies a layout; every image is segmented by the service.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLayout;

impl LayoutResolver for NoLayout {
    fn resolve(&self, _source: &ImageSource) -> Option<PathBuf> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/a.png"));
        assert!(is_url("http://example.com/a.png"));
        assert!(!is_url("/tmp/a.png"));
        assert!(!is_url("a.png"));
        assert!(!is_url(""));
    }

    #[test]
    fn discovery_is_recursive_filtered_and_sorted() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for name in ["b.jpg", "a.PNG", "notes.txt", "sub/c.jpeg", "sub/d.tif", "0.png"] {
            touch(&root.join(name));
        }

        let names: Vec<_> = discover_images(root)
            .unwrap()
            .into_iter()
            .map(|s| match s {
                ImageSource::Path(p) => p.strip_prefix(root).unwrap().to_path_buf(),
                ImageSource::Url(_) => unreachable!(),
            })
            .collect();

        assert_eq!(
            names,
            vec![
                PathBuf::from("0.png"),
                PathBuf::from("a.PNG"),
                PathBuf::from("b.jpg"),
                PathBuf::from("sub/c.jpeg"),
            ]
        );
    }

    #[test]
    fn discovery_is_deterministic() {
        let dir = TempDir::new().unwrap();
        for name in ["z.jpg", "m.jpg", "a.jpg"] {
            touch(&dir.path().join(name));
        }
        assert_eq!(
            discover_images(dir.path()).unwrap(),
            discover_images(dir.path()).unwrap()
        );
    }

    #[test]
    fn resolve_sources_handles_each_input_kind() {
        let dir = TempDir::new().unwrap();
        let img = dir.path().join("p.jpg");
        touch(&img);

        assert_eq!(
            resolve_sources("https://example.org/p.png").unwrap(),
            vec![ImageSource::Url("https://example.org/p.png".into())]
        );
        assert_eq!(
            resolve_sources(img.to_str().unwrap()).unwrap(),
            vec![ImageSource::Path(img.clone())]
        );
        assert_eq!(resolve_sources(dir.path().to_str().unwrap()).unwrap().len(), 1);
        assert!(matches!(
            resolve_sources("/definitely/not/here"),
            Err(HtrError::SourceNotFound { .. })
        ));
        assert!(matches!(
            resolve_sources("ftp://example.org/p.png"),
            Err(HtrError::InvalidSource { .. })
        ));
    }

    #[test]
    fn sibling_resolver_finds_existing_layout_only() {
        let dir = TempDir::new().unwrap();
        let with = dir.path().join("0001_p001.jpg");
        let without = dir.path().join("0002_p001.jpg");
        touch(&with);
        touch(&without);
        touch(&dir.path().join("xml/0001_p001.xml"));

        let r = SiblingXmlResolver;
        assert_eq!(
            r.resolve(&ImageSource::Path(with)),
            Some(dir.path().join("xml/0001_p001.xml"))
        );
        assert_eq!(r.resolve(&ImageSource::Path(without)), None);
        assert_eq!(
            r.resolve(&ImageSource::Url("https://example.org/0001_p001.jpg".into())),
            None
        );
        assert_eq!(NoLayout.resolve(&ImageSource::Path(dir.path().join("x.jpg"))), None);
    }

    #[cfg(unix)]
    #[test]
    fn discovery_does_not_follow_symlinked_directories() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("a.jpg"));
        touch(&dir.path().join("sub/b.jpg"));
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("sub"), dir.path().join("alias")).unwrap();

        let found = discover_images(dir.path()).unwrap();

        assert_eq!(
            found,
            vec![
                ImageSource::Path(dir.path().join("a.jpg")),
                ImageSource::Path(dir.path().join("sub/b.jpg")),
            ]
        );
    }
}
