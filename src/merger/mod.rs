//! Merging an edited graph into its original.
//!
//! The edited graph may be a partial, restructured copy: identifiers need
//! not match, so annotations are paired by content. The original is then
//! rewritten to reflect the edits, trusting each side according to its
//! confidence.
//!
//! ## Phases
//!
//! 1. **Mapping** ([`mapping`]): per layer, a minimum edit path pairs
//!    original annotations with edited ones.
//! 2. **Create/destroy** ([`reconcile`]): unpaired originals are destroyed,
//!    unpaired edited annotations are created in the original.
//! 3. **Labels**: edited labels are adopted when at least as trusted.
//! 4. **Anchors** ([`anchors`]): offsets, confidences and anchor sharing are
//!    brought in line with the edited graph, bottom-up.
//! 5. **Hierarchy** ([`hierarchy`]): parents and children are checked
//!    against each other top-down.
//! 6. **Validation**: the full [`Validator`] runs.
//!
//! Whatever happens, the pairing is dropped, stand-in anchors are removed
//! and a fragment's outer offsets are put back before `merge` returns.

mod anchors;
mod counterparts;
mod hierarchy;
mod mapping;
mod reconcile;

use std::collections::HashSet;

pub use counterparts::Counterparts;
pub use mapping::{label_distance, NO_WAY};

use crate::config::MergerConfig;
use crate::graph::Graph;
use crate::transform::{GraphTransformer, TransformError};
use crate::types::{Anchor, AnchorId, AnnotationId, Change, Confidence, LayerOrder};
use crate::validator::Validator;

/// Merges edited graphs into originals.
#[derive(Debug, Clone, Default)]
pub struct Merger {
    config: MergerConfig,
    errors: Vec<String>,
}

impl Merger {
    /// Create a merger.
    pub fn new(config: MergerConfig) -> Self {
        Self {
            config,
            errors: Vec::new(),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &MergerConfig {
        &self.config
    }

    /// Problems found by the last merge, including the validator's.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Rewrite `original` to reflect `edited`.
    ///
    /// Recoverable problems end up in [`errors`](Self::errors); an error is
    /// returned only when validation of the result fails outright.
    pub fn merge(&mut self, original: &mut Graph, edited: &Graph) -> Result<(), TransformError> {
        let _span = tracing::info_span!("merge", original = %original.id, edited = %edited.id).entered();
        let mut run = Run::new(&self.config, edited);
        run.bounds = FragmentBounds::capture(original);
        run.add_dummy_anchors(original);
        let result = run.execute(original);

        run.remove_dummy_anchors(original);
        run.counterparts.clear();
        run.bounds.restore(original);
        let errors = std::mem::take(&mut run.errors);
        self.errors = errors;
        match result {
            Ok(()) => {
                tracing::info!(problems = self.errors.len(), "Merge finished");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Merge failed");
                Err(e.with_diagnostics(self.errors.clone()))
            }
        }
    }
}

/// One outer edge of a fragment: its offset and confidence before the
/// merge, the anchors sitting there and the annotations hanging off them.
#[derive(Debug, Clone)]
struct Bound {
    offset: f64,
    confidence: Option<Confidence>,
    anchors: Vec<AnchorId>,
    annotations: Vec<AnnotationId>,
}

/// Outer edges of a fragment, which a merge must not move.
#[derive(Debug, Clone, Default)]
struct FragmentBounds {
    start: Option<Bound>,
    end: Option<Bound>,
}

impl FragmentBounds {
    fn capture(graph: &Graph) -> Self {
        if !graph.is_fragment() {
            return Self::default();
        }
        let ordered = graph.anchors_ordered_by_structure();
        let bound = |id: Option<&AnchorId>, at_start: bool| -> Option<Bound> {
            let id = id?;
            let offset = graph.offset(id)?;
            let anchors: Vec<AnchorId> = graph
                .anchors()
                .filter(|a| a.offset.map(f64::to_bits) == Some(offset.to_bits()))
                .map(|a| a.id.clone())
                .collect();
            let annotations = anchors
                .iter()
                .flat_map(|a| if at_start { graph.starting_at(a) } else { graph.ending_at(a) })
                .collect();
            Some(Bound {
                offset,
                confidence: graph.anchor(id).and_then(|a| a.confidence),
                anchors,
                annotations,
            })
        };
        Self {
            start: bound(ordered.first(), true),
            end: bound(ordered.last(), false),
        }
    }

    /// Put the outer offsets back, on the captured anchors and on whatever
    /// anchors their annotations were relinked to.
    fn restore(&self, graph: &mut Graph) {
        for (bound, at_start) in [(&self.start, true), (&self.end, false)] {
            let Some(bound) = bound else { continue };
            let mut targets = bound.anchors.clone();
            for id in &bound.annotations {
                let Some(a) = graph.annotation(id).filter(|a| !a.is_destroyed()) else {
                    continue;
                };
                let anchor = if at_start { a.start.clone() } else { a.end.clone() };
                if !targets.contains(&anchor) {
                    targets.push(anchor);
                }
            }
            for id in &targets {
                let Some(anchor) = graph.anchor(id) else { continue };
                if anchor.offset.map(f64::to_bits) != Some(bound.offset.to_bits()) {
                    tracing::debug!(anchor = %id, offset = bound.offset, "Restoring fragment bound");
                    graph.set_offset(id, Some(bound.offset));
                    if bound.confidence.is_some() {
                        graph.set_anchor_confidence(id, bound.confidence);
                    }
                }
            }
        }
    }
}

/// State of one merge call.
struct Run<'a> {
    config: &'a MergerConfig,
    edited: &'a Graph,
    counterparts: Counterparts,
    /// Original annotations created by this merge.
    created: HashSet<AnnotationId>,
    /// Anchors added to stand in for missing references.
    dummies: Vec<AnchorId>,
    /// Outer edges of a fragment, empty for whole graphs.
    bounds: FragmentBounds,
    /// Original annotations whose anchors have been reconciled.
    processed: HashSet<AnnotationId>,
    errors: Vec<String>,
}

impl<'a> Run<'a> {
    fn new(config: &'a MergerConfig, edited: &'a Graph) -> Self {
        Self {
            config,
            edited,
            counterparts: Counterparts::default(),
            created: HashSet::new(),
            dummies: Vec::new(),
            bounds: FragmentBounds::default(),
            processed: HashSet::new(),
            errors: Vec::new(),
        }
    }

    fn error(&mut self, message: String) {
        tracing::warn!(%message, "Merge problem");
        self.errors.push(message);
    }

    fn execute(&mut self, graph: &mut Graph) -> Result<(), TransformError> {
        let layers = self.shared_layers(graph);

        tracing::debug!("Phase 1: mapping");
        self.map_counterparts(graph, &layers);
        tracing::debug!(pairs = self.counterparts.len(), "Mapping finished");

        tracing::debug!("Phase 2: create and destroy");
        for layer_id in layers.iter().filter(|l| !self.config.no_change_layers.contains(*l)) {
            self.create_and_destroy(graph, layer_id);
        }

        tracing::debug!("Phase 3: labels");
        for layer_id in layers.iter().filter(|l| !self.config.no_change_layers.contains(*l)) {
            self.adopt_labels(graph, layer_id);
        }

        tracing::debug!("Phase 4: anchors");
        self.compute_anchor_deltas(graph, &layers);

        tracing::debug!("Phase 5: hierarchy");
        self.check_hierarchy(graph);

        self.remove_dummy_anchors(graph);
        self.bounds.restore(graph);

        tracing::debug!("Phase 6: validation");
        let mut validator = Validator::new(self.config.validator.clone());
        let result = validator.transform(graph);
        self.errors.extend(validator.errors().iter().cloned());
        self.prune_created_anchors(graph);
        result
    }

    /// Layers of the original, top-down, that the edited graph also has.
    fn shared_layers(&self, graph: &Graph) -> Vec<String> {
        graph
            .schema()
            .traverse(LayerOrder::TopDown)
            .into_iter()
            .filter(|l| self.edited.schema().layer(&l.id).is_some())
            .map(|l| l.id.clone())
            .collect()
    }

    /// Give annotations whose anchors don't exist something to point at.
    fn add_dummy_anchors(&mut self, graph: &mut Graph) {
        let missing: Vec<AnchorId> = graph
            .annotations()
            .flat_map(|a| [a.start.clone(), a.end.clone()])
            .filter(|id| graph.anchor(id).is_none())
            .collect();
        for id in missing {
            if graph.anchor(&id).is_some() {
                continue;
            }
            if graph.add_anchor(Anchor::new(id.clone(), None, Some(Confidence::NONE))).is_ok() {
                tracing::debug!(anchor = %id, "Adding stand-in anchor");
                self.dummies.push(id);
            }
        }
    }

    /// Stand-in anchors that are still referenced stay, without an offset.
    fn remove_dummy_anchors(&mut self, graph: &mut Graph) {
        self.dummies.retain(|id| !graph.remove_anchor(id) && graph.anchor(id).is_some());
    }

    fn is_dummy(&self, anchor: &AnchorId) -> bool {
        self.dummies.contains(anchor)
    }

    /// Drop anchors created during the merge that nothing refers to.
    fn prune_created_anchors(&self, graph: &mut Graph) {
        let orphaned: Vec<AnchorId> = graph
            .anchors()
            .filter(|a| a.change == Change::Create)
            .map(|a| a.id.clone())
            .filter(|id| !graph.is_referenced(id))
            .collect();
        for id in &orphaned {
            graph.remove_anchor(id);
        }
        if !orphaned.is_empty() {
            tracing::debug!(count = orphaned.len(), "Pruned unused anchors");
        }
    }

    fn edited_of(&self, original: &AnnotationId) -> Option<AnnotationId> {
        self.counterparts.edited_of(original).cloned()
    }

    fn original_of(&self, edited: &AnnotationId) -> Option<AnnotationId> {
        self.counterparts.original_of(edited).cloned()
    }

    /// Finest granularity either graph cares about.
    fn granularity(&self, graph: &Graph) -> Option<f64> {
        match (graph.offset_granularity(), self.edited.offset_granularity()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Whether two offsets are known and equal, to within the granularity.
    fn same_offset(&self, graph: &Graph, a: Option<f64>, b: Option<f64>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => match self.granularity(graph) {
                Some(g) => (a - b).abs() < g,
                None => a == b,
            },
            _ => false,
        }
    }
}

/// How far an anchor's offset can be trusted: `NONE` without an offset,
/// otherwise its confidence, `MANUAL` when unset.
pub(crate) fn anchor_confidence(graph: &Graph, anchor: &AnchorId) -> Confidence {
    match graph.anchor(anchor) {
        Some(a) if a.offset.is_some() => a.confidence_or(Confidence::MANUAL),
        _ => Confidence::NONE,
    }
}

/// Confidence of an annotation's label, `MANUAL` when unset.
pub(crate) fn label_confidence(graph: &Graph, id: &AnnotationId) -> Confidence {
    graph
        .annotation(id)
        .map_or(Confidence::NONE, |a| a.confidence_or(Confidence::MANUAL))
}

fn is_live(graph: &Graph, id: &AnnotationId) -> bool {
    graph.annotation(id).map_or(false, |a| !a.is_destroyed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Annotation, Schema};

    pub(super) fn words(id: &str, words: &[(&str, f64, f64, Confidence, Confidence)]) -> Graph {
        let mut g = Graph::new(id, Schema::transcript());
        let first = words.first().map_or(0.0, |w| w.1);
        let last = words.last().map_or(0.0, |w| w.2);
        g.add_anchor(Anchor::new("t0", Some(first), Some(Confidence::MANUAL))).unwrap();
        g.add_anchor(Anchor::new("t1", Some(last), Some(Confidence::MANUAL))).unwrap();
        g.add_annotation(Annotation::new("p", "participant", "John", "t0", "t1")).unwrap();
        g.add_annotation(Annotation::new("t", "turn", "John", "t0", "t1").with_parent("p")).unwrap();
        for (i, (label, start, end, offset_confidence, label_confidence)) in words.iter().enumerate() {
            let s = format!("w{i}s");
            let e = format!("w{i}e");
            g.add_anchor(Anchor::new(s.as_str(), Some(*start), Some(*offset_confidence))).unwrap();
            g.add_anchor(Anchor::new(e.as_str(), Some(*end), Some(*offset_confidence))).unwrap();
            let word = Annotation::new(format!("w{i}"), "word", *label, s, e)
                .with_parent("t")
                .with_confidence(*label_confidence);
            g.add_annotation(word).unwrap();
        }
        g.commit();
        g
    }

    const M: Confidence = Confidence::MANUAL;
    const A: Confidence = Confidence::AUTOMATIC;

    #[test]
    fn test_higher_confidence_label_is_adopted() {
        let mut original = words("o", &[("I", 0.0, 1.0, M, M), ("saw", 1.0, 2.0, M, M), ("teh", 2.0, 3.0, M, A)]);
        let edited = words("e", &[("I", 0.0, 1.0, M, M), ("saw", 1.0, 2.0, M, M), ("the", 2.0, 3.0, M, M)]);
        let mut merger = Merger::default();
        merger.merge(&mut original, &edited).unwrap();
        let w2 = original.annotation(&"w2".into()).unwrap();
        assert_eq!(w2.label, "the");
        assert!(!w2.is_destroyed());
        assert_eq!(original.all("word").len(), 3);
    }

    #[test]
    fn test_lower_confidence_label_is_ignored() {
        let mut original = words("o", &[("dog", 0.0, 1.0, M, M)]);
        let edited = words("e", &[("dig", 0.0, 1.0, M, A)]);
        Merger::default().merge(&mut original, &edited).unwrap();
        assert_eq!(original.annotation(&"w0".into()).unwrap().label, "dog");
    }

    #[test]
    fn test_lower_confidence_offset_is_ignored() {
        let mut original = words("o", &[("so", 2.0, 3.0, M, M), ("fast", 3.0, 4.0, M, M)]);
        let mut edited = words("e", &[("so", 2.0, 3.0, M, M), ("fast", 3.0, 4.0, M, M)]);
        edited.set_offset(&"w1s".into(), Some(3.5));
        edited.set_anchor_confidence(&"w1s".into(), Some(A));
        Merger::default().merge(&mut original, &edited).unwrap();
        let fast = original.annotation(&"w1".into()).unwrap();
        assert_eq!(original.offset(&fast.start), Some(3.0));
    }

    #[test]
    fn test_higher_confidence_offset_is_adopted() {
        let mut original = words("o", &[("so", 2.0, 3.0, A, M), ("fast", 3.0, 4.0, A, M)]);
        let mut edited = words("e", &[("so", 2.0, 3.0, A, M), ("fast", 3.0, 4.0, A, M)]);
        edited.set_offset(&"w0e".into(), Some(2.8));
        edited.set_anchor_confidence(&"w0e".into(), Some(M));
        Merger::default().merge(&mut original, &edited).unwrap();
        let so = original.annotation(&"w0".into()).unwrap();
        assert_eq!(original.offset(&so.end), Some(2.8));
        assert_eq!(original.anchor(&so.end).unwrap().confidence, Some(M));
    }

    #[test]
    fn test_inserted_and_deleted_words() {
        let mut original = words("o", &[("a", 0.0, 1.0, M, M), ("b", 1.0, 2.0, M, M), ("c", 2.0, 3.0, M, M)]);
        let edited = words("e", &[("a", 0.0, 1.0, M, M), ("c", 2.0, 3.0, M, M), ("d", 3.0, 4.0, M, M)]);
        let mut merger = Merger::default();
        merger.merge(&mut original, &edited).unwrap();
        let labels: Vec<String> = original
            .all("word")
            .iter()
            .map(|id| original.annotation(id).unwrap().label.clone())
            .collect();
        assert_eq!(labels, vec!["a", "c", "d"]);
        assert!(original.annotation(&"w1".into()).unwrap().is_destroyed());
    }

    #[test]
    fn test_fragment_bounds_survive() {
        let mut original = words("o", &[("a", 1.0, 2.0, M, M), ("b", 2.0, 3.0, M, M)]).as_fragment();
        let mut edited = words("e", &[("a", 1.0, 2.0, M, M), ("b", 2.0, 3.0, M, M)]);
        edited.set_offset(&"t0".into(), Some(0.5));
        edited.set_offset(&"w0s".into(), Some(0.5));
        edited.set_offset(&"t1".into(), Some(3.5));
        edited.set_offset(&"w1e".into(), Some(3.5));
        Merger::default().merge(&mut original, &edited).unwrap();
        let ordered = original.anchors_ordered_by_structure();
        assert_eq!(original.offset(ordered.first().unwrap()), Some(1.0));
        assert_eq!(original.offset(ordered.last().unwrap()), Some(3.0));
    }

    #[test]
    fn test_fragment_bounds_follow_relinked_anchors() {
        let mut original = words("o", &[("a", 1.0, 2.0, M, M), ("b", 2.0, 3.0, M, M)]).as_fragment();
        let mut edited = words("e", &[("a", 1.0, 2.0, M, M), ("b", 2.0, 3.0, M, M)]);
        // the edit shares the turn's outer anchors with its words and moves them
        edited.set_start(&"w0".into(), &"t0".into());
        edited.set_end(&"w1".into(), &"t1".into());
        edited.set_offset(&"t0".into(), Some(0.5));
        edited.set_offset(&"t1".into(), Some(3.5));
        Merger::default().merge(&mut original, &edited).unwrap();
        for id in ["t", "w0"] {
            let a = original.annotation(&id.into()).unwrap();
            assert_eq!(original.offset(&a.start).map(f64::to_bits), Some(1.0f64.to_bits()), "{id}");
        }
        for id in ["t", "w1"] {
            let a = original.annotation(&id.into()).unwrap();
            assert_eq!(original.offset(&a.end).map(f64::to_bits), Some(3.0f64.to_bits()), "{id}");
        }
    }

    #[test]
    fn test_no_stand_in_anchors_or_pairs_survive() {
        let mut original = words("o", &[("a", 0.0, 1.0, M, M)]);
        let edited = words("e", &[("a", 0.0, 1.0, M, M), ("b", 1.0, 2.0, M, M)]);
        let anchors_before: usize = original.anchors().count();
        Merger::default().merge(&mut original, &edited).unwrap();
        for a in original.anchors() {
            assert!(original.is_referenced(&a.id), "unreferenced anchor {}", a.id);
        }
        assert!(original.anchors().count() > anchors_before);
    }

    #[test]
    fn test_failed_merge_leaves_no_unused_anchors() {
        let mut original = words("o", &[("a", 0.0, 1.0, M, M)]);
        let mut edited = words("e", &[("a", 0.0, 1.0, M, M)]);
        // an utterance on its own anchors, which validation ties to the turn's
        edited.add_anchor(Anchor::new("u0s", Some(0.0), Some(M))).unwrap();
        edited.add_anchor(Anchor::new("u0e", Some(1.0), Some(M))).unwrap();
        edited.add_annotation(Annotation::new("u0", "utterance", "John", "u0s", "u0e").with_parent("t")).unwrap();
        // a participant nothing can give offsets to
        edited.add_anchor(Anchor::new("x0", None, None)).unwrap();
        edited.add_anchor(Anchor::new("x1", None, None)).unwrap();
        edited.add_annotation(Annotation::new("x", "participant", "Nobody", "x0", "x1")).unwrap();

        let mut merger = Merger::default();
        let err = merger.merge(&mut original, &edited).unwrap_err();
        assert!(matches!(err, TransformError::Aborted { .. }));
        for a in original.anchors().filter(|a| a.change == Change::Create) {
            assert!(original.is_referenced(&a.id), "unreferenced anchor {}", a.id);
        }
        assert_eq!(original.all("utterance").len(), 1);
    }

    #[test]
    fn test_same_offset_uses_granularity() {
        let config = MergerConfig::default();
        let edited = Graph::new("e", Schema::transcript()).with_offset_granularity(0.01);
        let original = Graph::new("o", Schema::transcript());
        let run = Run::new(&config, &edited);
        assert!(run.same_offset(&original, Some(1.0), Some(1.005)));
        assert!(!run.same_offset(&original, Some(1.0), Some(1.02)));
        assert!(!run.same_offset(&original, None, None));
    }
}
