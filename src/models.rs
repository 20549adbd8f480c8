//! Recognition and line-detection model catalog.
//!
//! The processing service identifies models by opaque ids: usually numeric,
//! but private models are addressed by a string token. Users pick models by
//! human-readable name; names are resolved here, before any remote call, so a
//! typo fails the run instead of producing a manifest full of rejections.

use crate::error::HtrError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote model identifier, serialised exactly as the API expects it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelId {
    /// Public model with a numeric id.
    Numeric(u64),
    /// Private model or opaque token (e.g. `"private"`).
    Named(String),
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelId::Numeric(n) => write!(f, "{n}"),
            ModelId::Named(s) => f.write_str(s),
        }
    }
}

/// Built-in HTR (text recognition) models.
pub const HTR_MODELS: &[(&str, ModelRef)] = &[
    ("Text Titan", ModelRef::Numeric(309593)),
    ("Bullinger", ModelRef::Named("private")),
    ("German Giant", ModelRef::Numeric(50870)),
];

/// Built-in line-detection models.
pub const LINE_DETECTION_MODELS: &[(&str, ModelRef)] = &[("default", ModelRef::Numeric(51962))];

/// HTR model used when none is named.
pub const DEFAULT_HTR_MODEL: &str = "Bullinger";

/// Name of the line-detection model used when no layout hint is supplied.
pub const DEFAULT_LINE_DETECTION_MODEL: &str = "default";

/// `const`-friendly form of [`ModelId`] used by the static tables.
#[derive(Debug, Clone, Copy)]
pub enum ModelRef {
    Numeric(u64),
    Named(&'static str),
}

impl From<ModelRef> for ModelId {
    fn from(r: ModelRef) -> Self {
        match r {
            ModelRef::Numeric(n) => ModelId::Numeric(n),
            ModelRef::Named(s) => ModelId::Named(s.to_string()),
        }
    }
}

/// Resolve an HTR model name to its remote id.
pub fn resolve_htr_model(name: &str) -> Result<ModelId, HtrError> {
    lookup("HTR", HTR_MODELS, name)
}

/// Resolve a line-detection model name to its remote id.
pub fn resolve_line_detection_model(name: &str) -> Result<ModelId, HtrError> {
    lookup("line detection", LINE_DETECTION_MODELS, name)
}

fn lookup(
    kind: &'static str,
    table: &[(&str, ModelRef)],
    name: &str,
) -> Result<ModelId, HtrError> {
    table
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, id)| ModelId::from(*id))
        .ok_or_else(|| HtrError::UnknownModel {
            kind,
            name: name.to_string(),
            known: table
                .iter()
                .map(|(n, _)| *n)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_builtin_models() {
        assert_eq!(
            resolve_htr_model("Text Titan").unwrap(),
            ModelId::Numeric(309593)
        );
        assert_eq!(
            resolve_htr_model("Bullinger").unwrap(),
            ModelId::Named("private".into())
        );
        assert_eq!(
            resolve_line_detection_model(DEFAULT_LINE_DETECTION_MODEL).unwrap(),
            ModelId::Numeric(51962)
        );
    }

    #[test]
    fn unknown_name_fails_fast() {
        let err = resolve_htr_model("text titan").unwrap_err();
        match err {
            HtrError::UnknownModel { kind, name, known } => {
                assert_eq!(kind, "HTR");
                assert_eq!(name, "text titan");
                assert!(known.contains("Text Titan"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn model_id_serialises_untagged() {
        assert_eq!(
            serde_json::to_string(&ModelId::Numeric(50870)).unwrap(),
            "50870"
        );
        assert_eq!(
            serde_json::to_string(&ModelId::Named("private".into())).unwrap(),
            "\"private\""
        );
        let id: ModelId = serde_json::from_str("309593").unwrap();
        assert_eq!(id, ModelId::Numeric(309593));
    }
}
