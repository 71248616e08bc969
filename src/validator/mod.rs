//! Structural validation and repair.
//!
//! The validator takes a graph with arbitrary pending changes and repairs it
//! until every layer's constraints hold again. Phases run in a fixed order,
//! each relying on what the previous one established:
//!
//! 1. label length enforcement
//! 2. reversed anchor correction ([`reversed`])
//! 3. orphan reconciliation ([`orphans`])
//! 4. vertical hierarchy validation ([`hierarchy`])
//! 5. default offset generation
//!
//! A cheap pre-check skips the pipeline entirely when no pending change can
//! affect structure. Problems that can't be repaired are collected in
//! [`Validator::errors`]; only a failure of offset generation aborts.

pub mod hierarchy;
pub mod orphans;
pub mod reversed;

use crate::config::ValidatorConfig;
use crate::graph::Graph;
use crate::offsets::DefaultOffsetGenerator;
use crate::transform::{GraphTransformer, TransformError};
use crate::types::{Change, Confidence};

/// Repairs structural invariants after edits.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidatorConfig,
    errors: Vec<String>,
}

impl Validator {
    /// Create a validator.
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            errors: Vec::new(),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub(crate) fn default_confidence(&self) -> Confidence {
        self.config.default_anchor_confidence
    }

    pub(crate) fn error(&mut self, message: String) {
        tracing::warn!(%message, "Validation problem");
        self.errors.push(message);
    }

    /// Whether any pending change could break a structural invariant.
    fn needs_validation(&self, graph: &Graph) -> bool {
        if self.config.full_validation {
            return true;
        }
        let schema = graph.schema();
        for annotation in graph.annotations() {
            let aligned = schema.layer(&annotation.layer_id).map_or(false, |l| l.is_aligned());
            if annotation.parent.is_none() && !schema.is_top_level(&annotation.layer_id) {
                tracing::debug!(annotation = %annotation.id, "Annotation has no parent");
                return true;
            }
            let interesting = match annotation.change {
                Change::NoChange => false,
                Change::Destroy => graph.has_children(&annotation.id),
                Change::Create => {
                    self.config.max_label_length.is_some() || aligned || graph.has_children(&annotation.id)
                }
                Change::Update => {
                    let relabelled = graph
                        .tracker()
                        .annotation(&annotation.id)
                        .map_or(false, |s| s.label != annotation.label);
                    (self.config.max_label_length.is_some() && relabelled)
                        || aligned
                        || graph.has_children(&annotation.id)
                }
            };
            if interesting {
                tracing::debug!(annotation = %annotation.id, change = ?annotation.change, "Change needs validation");
                return true;
            }
        }
        graph.anchors().any(|a| a.change != Change::NoChange)
    }

    /// Truncate labels longer than the configured maximum.
    fn check_labels(&mut self, graph: &mut Graph) {
        let Some(max) = self.config.max_label_length else {
            return;
        };
        let long: Vec<_> = graph
            .annotations()
            .filter(|a| !a.is_destroyed() && a.label.chars().count() > max)
            .map(|a| (a.id.clone(), a.layer_id.clone(), a.label.clone()))
            .collect();
        for (id, layer_id, label) in long {
            self.error(format!("Label too long (>{max}) for {layer_id}: [{id}]#{label}"));
            let truncated: String = label.chars().take(max).collect();
            graph.set_label(&id, truncated);
        }
    }

    fn generate_offsets(&mut self, graph: &mut Graph) -> Result<(), TransformError> {
        if self.config.default_offset_threshold.is_none() {
            return Ok(());
        }
        let anchors_changed = graph
            .anchors()
            .any(|a| matches!(a.change, Change::Create | Change::Update));
        if !self.config.full_validation && !anchors_changed {
            tracing::debug!("Skipping default offset generation");
            return Ok(());
        }
        let mut generator = DefaultOffsetGenerator::new(self.config.offset_generator());
        let result = generator.transform(graph);
        self.errors.extend(generator.errors().iter().cloned());
        result.map_err(|e| e.with_diagnostics(self.errors.clone()))
    }
}

impl GraphTransformer for Validator {
    fn transform(&mut self, graph: &mut Graph) -> Result<(), TransformError> {
        let _span = tracing::debug_span!("validator", graph = %graph.id).entered();
        self.errors.clear();
        if !self.needs_validation(graph) {
            tracing::debug!("No changes require validation");
            return Ok(());
        }
        self.check_labels(graph);
        self.correct_reversed_anchors(graph);
        self.reconcile_orphans(graph);
        self.validate_hierarchy(graph);
        self.generate_offsets(graph)
    }

    fn errors(&self) -> &[String] {
        &self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Anchor, Annotation, Schema};

    fn committed() -> Graph {
        let mut g = Graph::new("g", Schema::transcript());
        for (id, off) in [("a0", 0.0), ("a1", 1.0), ("a2", 2.0)] {
            g.add_anchor(Anchor::new(id, Some(off), Some(Confidence::MANUAL))).unwrap();
        }
        g.add_annotation(Annotation::new("p", "participant", "ann", "a0", "a2")).unwrap();
        g.add_annotation(Annotation::new("t", "turn", "ann", "a0", "a2").with_parent("p")).unwrap();
        g.add_annotation(Annotation::new("u", "utterance", "", "a0", "a2").with_parent("t")).unwrap();
        g.add_annotation(Annotation::new("w1", "word", "a-very-long-word", "a0", "a1").with_parent("t")).unwrap();
        g.add_annotation(Annotation::new("w2", "word", "b", "a1", "a2").with_parent("t")).unwrap();
        g.commit();
        g
    }

    #[test]
    fn test_unchanged_graph_is_skipped() {
        let mut g = committed();
        let mut validator = Validator::new(ValidatorConfig::default().with_max_label_length(Some(3)));
        validator.transform(&mut g).unwrap();
        // nothing pending, so the long label is not even looked at
        assert_eq!(g.annotation(&"w1".into()).unwrap().label, "a-very-long-word");
        assert!(validator.errors().is_empty());
    }

    #[test]
    fn test_long_labels_truncated_with_error() {
        let mut g = committed();
        let mut validator = Validator::new(
            ValidatorConfig::default()
                .with_max_label_length(Some(3))
                .with_full_validation(true),
        );
        validator.transform(&mut g).unwrap();
        assert_eq!(g.annotation(&"w1".into()).unwrap().label, "a-v");
        assert_eq!(validator.errors().len(), 1);
        assert!(validator.errors()[0].contains("Label too long"));
    }

    #[test]
    fn test_offset_failure_carries_diagnostics() {
        let mut g = committed();
        let x = g.create_anchor(None, None);
        let y = g.create_anchor(None, None);
        let orphan = Annotation::new("x", "participant", "who", x, y);
        g.add_annotation(orphan).unwrap();
        let mut validator = Validator::default();
        let err = validator.transform(&mut g).unwrap_err();
        assert!(matches!(err, TransformError::Aborted { .. }));
    }
}
