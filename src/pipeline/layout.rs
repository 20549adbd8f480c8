//! PAGE-XML → layout hint transcoding.
//!
//! The processing service can skip its own segmentation when a submission
//! carries a `content` object describing regions, lines and baselines. This
//! module re-projects a PAGE document into that shape, nothing more: polygon
//! strings are copied verbatim (trimmed) and never reparsed, and document
//! order is preserved at both levels because the service pairs lines by
//! position.
//!
//! ```text
//! PcGts
//!  └─ Page
//!      └─ TextRegion  (any depth)      → regions[i]   {id, coords}
//!          ├─ Coords/@points
//!          └─ TextLine (direct child)  → lines[j]     {id, coords, baseline}
//!              ├─ Coords/@points
//!              └─ Baseline/@points
//! ```
//!
//! An element missing a required geometry fails the whole document: the
//! service interprets the hint structurally, so silently dropping a line
//! would shift every following line.

use crate::error::LayoutError;
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

/// Namespace prefix shared by every published PAGE schema version.
const PAGE_NS_PREFIX: &str = "http://schema.primaresearch.org/PAGE/gts/pagecontent/";

/// Layout hint attached to a submission as its `content` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutHint {
    pub regions: Vec<RegionHint>,
}

/// One text region and its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionHint {
    pub id: String,
    pub coords: Points,
    pub lines: Vec<LineHint>,
}

/// One text line with its polygon and baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineHint {
    pub id: String,
    pub coords: Points,
    pub baseline: Points,
}

/// A point list in PAGE notation, e.g. `"0,0 10,0 10,10 0,10"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Points {
    pub points: String,
}

impl Points {
    fn from_attr(raw: &str) -> Self {
        Self {
            points: raw.trim().to_string(),
        }
    }
}

impl LayoutHint {
    /// Total number of lines across all regions.
    pub fn line_count(&self) -> usize {
        self.regions.iter().map(|r| r.lines.len()).sum()
    }
}

/// Transcode a PAGE-XML document into a [`LayoutHint`].
///
/// # Errors
/// - [`LayoutError::Malformed`] if the input is not XML, has no PAGE `Page`
///   element, or a region/line has no `id`.
/// - [`LayoutError::MissingGeometry`] if a region lacks `Coords/@points`, or
///   a line lacks `Coords/@points` or `Baseline/@points`.
pub fn transcode(raw: &str) -> Result<LayoutHint, LayoutError> {
    let doc = Document::parse(raw).map_err(|e| LayoutError::Malformed {
        detail: e.to_string(),
    })?;

    let page = doc
        .root_element()
        .children()
        .find(|n| is_page_element(n, "Page"))
        .ok_or_else(|| LayoutError::Malformed {
            detail: "no PAGE <Page> element under the root".to_string(),
        })?;

    let regions = page
        .descendants()
        .filter(|n| is_page_element(n, "TextRegion"))
        .map(transcode_region)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(LayoutHint { regions })
}

fn transcode_region(region: Node<'_, '_>) -> Result<RegionHint, LayoutError> {
    let id = element_id(region, "TextRegion")?;
    let coords = child_points(region, "Coords").ok_or_else(|| LayoutError::MissingGeometry {
        element: "region",
        id: id.clone(),
        geometry: "coords",
    })?;

    let lines = region
        .children()
        .filter(|n| is_page_element(n, "TextLine"))
        .map(transcode_line)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RegionHint { id, coords, lines })
}

fn transcode_line(line: Node<'_, '_>) -> Result<LineHint, LayoutError> {
    let id = element_id(line, "TextLine")?;
    let missing = |geometry| LayoutError::MissingGeometry {
        element: "line",
        id: id.clone(),
        geometry,
    };

    let coords = child_points(line, "Coords").ok_or_else(|| missing("coords"))?;
    let baseline = child_points(line, "Baseline").ok_or_else(|| missing("baseline"))?;

    Ok(LineHint {
        id,
        coords,
        baseline,
    })
}

fn is_page_element(node: &Node<'_, '_>, local_name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local_name
        && node
            .tag_name()
            .namespace()
            .is_some_and(|ns| ns.starts_with(PAGE_NS_PREFIX))
}

fn element_id(node: Node<'_, '_>, tag: &str) -> Result<String, LayoutError> {
    node.attribute("id")
        .map(str::to_string)
        .ok_or_else(|| LayoutError::Malformed {
            detail: format!("<{tag}> without an id attribute"),
        })
}

/// `points` attribute of the first direct child named `tag`.
fn child_points(parent: Node<'_, '_>, tag: &str) -> Option<Points> {
    parent
        .children()
        .find(|n| is_page_element(n, tag))
        .and_then(|n| n.attribute("points"))
        .map(Points::from_attr)
}
