//! Anchors: shared points on the time (or character) axis.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::confidence::{Change, Confidence};

/// Identifier of an anchor, unique within one graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorId(String);

impl AnchorId {
    /// Create an anchor id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AnchorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A point that annotations start or end at.
///
/// Anchors are not owned by any single annotation: a word's end is usually
/// the next word's start, and the same anchor may bound a turn, an utterance
/// and a word at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// Identifier.
    pub id: AnchorId,
    /// Offset in seconds (or characters), if known.
    #[serde(default)]
    pub offset: Option<f64>,
    /// Confidence in the offset, if rated.
    #[serde(default)]
    pub confidence: Option<Confidence>,
    /// Pending change state.
    #[serde(skip)]
    pub change: Change,
}

impl Anchor {
    /// Create an anchor.
    pub fn new(id: impl Into<AnchorId>, offset: Option<f64>, confidence: Option<Confidence>) -> Self {
        Self {
            id: id.into(),
            offset,
            confidence,
            change: Change::NoChange,
        }
    }

    /// Confidence, or `default` when unrated.
    pub fn confidence_or(&self, default: Confidence) -> Confidence {
        self.confidence.unwrap_or(default)
    }

    /// Whether the anchor has been marked for removal.
    pub fn is_destroyed(&self) -> bool {
        self.change == Change::Destroy
    }
}

impl From<String> for AnchorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "[{}]{}", self.id, offset),
            None => write!(f, "[{}]?", self.id),
        }
    }
}
