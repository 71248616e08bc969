//! Annotations: labelled spans or instants on a layer.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::anchor::AnchorId;
use super::confidence::{Change, Confidence};

/// Identifier of an annotation, unique within one graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(String);

impl AnnotationId {
    /// Create an annotation id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AnnotationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AnnotationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A labelled span between two anchors.
///
/// `parent` is `None` for annotations on layers whose parent is the graph
/// root. An annotation whose start and end anchor are the same anchor is an
/// instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Identifier.
    pub id: AnnotationId,
    /// Layer the annotation belongs to.
    pub layer_id: String,
    /// Label text.
    #[serde(default)]
    pub label: String,
    /// Start anchor.
    pub start: AnchorId,
    /// End anchor.
    pub end: AnchorId,
    /// Parent annotation.
    #[serde(default)]
    pub parent: Option<AnnotationId>,
    /// 1-based position among live same-layer siblings.
    #[serde(default)]
    pub ordinal: u32,
    /// Confidence in the label.
    #[serde(default)]
    pub confidence: Option<Confidence>,
    /// Pending change state.
    #[serde(skip)]
    pub change: Change,
}

impl Annotation {
    /// Create an annotation with no parent and ordinal 0 (assigned on insert).
    pub fn new(
        id: impl Into<AnnotationId>,
        layer_id: impl Into<String>,
        label: impl Into<String>,
        start: impl Into<AnchorId>,
        end: impl Into<AnchorId>,
    ) -> Self {
        Self {
            id: id.into(),
            layer_id: layer_id.into(),
            label: label.into(),
            start: start.into(),
            end: end.into(),
            parent: None,
            ordinal: 0,
            confidence: None,
            change: Change::NoChange,
        }
    }

    /// Builder: set the parent.
    pub fn with_parent(mut self, parent: impl Into<AnnotationId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Builder: set the label confidence.
    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Builder: set the ordinal.
    pub fn with_ordinal(mut self, ordinal: u32) -> Self {
        self.ordinal = ordinal;
        self
    }

    /// Whether start and end are the same anchor.
    pub fn is_instant(&self) -> bool {
        self.start == self.end
    }

    /// Whether the annotation has been marked for removal.
    pub fn is_destroyed(&self) -> bool {
        self.change == Change::Destroy
    }

    /// Label confidence, or `default` when unrated.
    pub fn confidence_or(&self, default: Confidence) -> Confidence {
        self.confidence.unwrap_or(default)
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]{}#{}({}-{})",
            self.id, self.ordinal, self.label, self.start, self.end
        )
    }
}
