//! Pre-mutation snapshots for change tracking and revert.

use std::collections::BTreeMap;

use crate::types::{AnchorId, AnnotationId, Confidence};

/// Original state of an anchor before its first tracked mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorSnapshot {
    /// Offset before the change.
    pub offset: Option<f64>,
    /// Confidence before the change.
    pub confidence: Option<Confidence>,
}

/// Original state of an annotation before its first tracked mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationSnapshot {
    /// Label before the change.
    pub label: String,
    /// Start anchor before the change.
    pub start: AnchorId,
    /// End anchor before the change.
    pub end: AnchorId,
    /// Parent before the change.
    pub parent: Option<AnnotationId>,
    /// Ordinal before the change.
    pub ordinal: u32,
    /// Confidence before the change.
    pub confidence: Option<Confidence>,
}

/// Snapshots of every entity updated since the last commit.
///
/// Created entities have no snapshot: reverting them means removing them.
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    pub(crate) anchors: BTreeMap<AnchorId, AnchorSnapshot>,
    pub(crate) annotations: BTreeMap<AnnotationId, AnnotationSnapshot>,
}

impl ChangeTracker {
    /// Snapshot of an updated anchor.
    pub fn anchor(&self, id: &AnchorId) -> Option<&AnchorSnapshot> {
        self.anchors.get(id)
    }

    /// Snapshot of an updated annotation.
    pub fn annotation(&self, id: &AnnotationId) -> Option<&AnnotationSnapshot> {
        self.annotations.get(id)
    }

    /// Whether nothing has been snapshotted.
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty() && self.annotations.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.anchors.clear();
        self.annotations.clear();
    }
}
