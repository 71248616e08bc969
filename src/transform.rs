//! The transformer contract and its error type.

use crate::graph::Graph;
use crate::types::{AnchorId, AnnotationId};

/// Error type for graph transformations.
///
/// Only conditions that make the whole transform meaningless are raised;
/// recoverable problems are collected by the transformer and exposed
/// through [`GraphTransformer::errors`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    /// A configured or referenced layer is absent from the schema.
    #[error("Layer not found: {0}")]
    LayerNotFound(String),
    /// A referenced annotation doesn't exist.
    #[error("Annotation not found: {0}")]
    AnnotationNotFound(AnnotationId),
    /// A referenced anchor doesn't exist.
    #[error("Anchor not found: {0}")]
    AnchorNotFound(AnchorId),
    /// Interpolation found no anchor with a usable offset before a run.
    #[error("Could not determine bounds: no offset before {0}")]
    UnboundedChain(AnchorId),
    /// Offset generation finished with linked anchors still unset.
    #[error("Could not determine offsets for {count} anchor(s), e.g. {first}")]
    UnresolvedOffsets {
        /// Number of unresolved anchors.
        count: usize,
        /// The first unresolved anchor.
        first: AnchorId,
    },
    /// A nested transform failed; accumulated diagnostics are attached.
    #[error("{message} ({} diagnostic(s))", errors.len())]
    Aborted {
        /// What failed.
        message: String,
        /// Diagnostics collected before the failure.
        errors: Vec<String>,
    },
}

impl TransformError {
    /// Wrap an error with the diagnostics gathered so far.
    pub fn with_diagnostics(self, errors: Vec<String>) -> Self {
        match self {
            Self::Aborted { message, errors: mut inner } => {
                inner.extend(errors);
                Self::Aborted { message, errors: inner }
            }
            other => Self::Aborted {
                message: other.to_string(),
                errors,
            },
        }
    }
}

/// Something that rewrites a graph in place.
pub trait GraphTransformer {
    /// Apply the transform.
    fn transform(&mut self, graph: &mut Graph) -> Result<(), TransformError>;

    /// Non-fatal problems found by the last call to [`transform`](Self::transform).
    fn errors(&self) -> &[String] {
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_diagnostics_accumulates() {
        let err = TransformError::UnboundedChain("n_1".into())
            .with_diagnostics(vec!["first".to_string()])
            .with_diagnostics(vec!["second".to_string()]);
        match err {
            TransformError::Aborted { message, errors } => {
                assert!(message.contains("n_1"));
                assert_eq!(errors, vec!["first", "second"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
