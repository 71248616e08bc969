//! Layer definitions.

use serde::{Deserialize, Serialize};

/// How annotations on a layer relate to the time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    /// Tags: annotations share their parent's anchors.
    #[default]
    None,
    /// Points in time.
    Instant,
    /// Spans with distinct start and end.
    Interval,
}

impl Alignment {
    /// Whether annotations are independently placed on the time axis.
    pub fn is_aligned(self) -> bool {
        self != Self::None
    }
}

/// Schema node describing one annotation type and its structural constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    /// Layer identifier.
    pub id: String,
    /// Parent layer identifier (`None` only for the root).
    pub parent_id: Option<String>,
    /// Relationship to the time axis.
    #[serde(default)]
    pub alignment: Alignment,
    /// Whether a parent may have more than one child on this layer.
    #[serde(default = "default_true")]
    pub peers: bool,
    /// Whether siblings may overlap in time.
    #[serde(default)]
    pub peers_overlap: bool,
    /// Whether children must lie within their parent.
    #[serde(default = "default_true")]
    pub parent_includes: bool,
    /// Whether children must tile their parent without gaps.
    #[serde(default)]
    pub saturated: bool,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
}

fn default_true() -> bool {
    true
}

impl Layer {
    /// Create a layer with default flags: unaligned, peers, parent-including.
    pub fn new(id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: Some(parent_id.into()),
            alignment: Alignment::None,
            peers: true,
            peers_overlap: false,
            parent_includes: true,
            saturated: false,
            description: String::new(),
        }
    }

    /// Create the root layer.
    pub fn root(id: impl Into<String>) -> Self {
        Self {
            parent_id: None,
            peers: false,
            ..Self::new(id, "")
        }
    }

    /// Builder: set the alignment.
    pub fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }

    /// Builder: set whether peers are allowed.
    pub fn with_peers(mut self, peers: bool) -> Self {
        self.peers = peers;
        self
    }

    /// Builder: set whether peers may overlap.
    pub fn with_peers_overlap(mut self, peers_overlap: bool) -> Self {
        self.peers_overlap = peers_overlap;
        self
    }

    /// Builder: set whether children must lie inside their parent.
    pub fn with_parent_includes(mut self, parent_includes: bool) -> Self {
        self.parent_includes = parent_includes;
        self
    }

    /// Builder: set whether children tile their parent.
    pub fn with_saturated(mut self, saturated: bool) -> Self {
        self.saturated = saturated;
        self
    }

    /// Builder: set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether annotations on this layer have their own position in time.
    pub fn is_aligned(&self) -> bool {
        self.alignment.is_aligned()
    }

    /// Parent layer id, or the empty string for the root.
    pub fn parent(&self) -> &str {
        self.parent_id.as_deref().unwrap_or("")
    }
}
