//! Reversed anchor correction.
//!
//! Within each annotation on the topmost aligned layers, the anchors of its
//! descendants are laid out in document order (start, children depth-first,
//! end). Any anchor whose offset is earlier than the last offset seen is out
//! of order. The run on one side of the inversion is then cleared (offset
//! removed, confidence `NONE`) so that offset generation can fill it in
//! again. The side holding higher-confidence offsets is kept.

use std::collections::HashSet;
use std::cmp::Ordering;

use super::Validator;
use crate::graph::Graph;
use crate::types::{AnchorId, AnnotationId, Confidence, Layer, LayerOrder};

/// One entry of the stack of offsets already passed.
enum Seen {
    /// Lower bound from the enclosing annotation's start.
    Floor(f64),
    Anchor(AnchorId),
}

impl Validator {
    /// Clear offsets that run backwards within each top-level aligned
    /// annotation.
    pub(crate) fn correct_reversed_anchors(&mut self, graph: &mut Graph) {
        let _span = tracing::debug_span!("reversed_anchors").entered();
        for layer_id in topmost_aligned_layers(graph) {
            for id in graph.all(&layer_id) {
                let child_layers: Vec<String> = graph
                    .schema()
                    .children_of(&layer_id)
                    .into_iter()
                    .map(|l| l.id.clone())
                    .collect();
                for child_layer in child_layers {
                    let anchors = document_order(graph, &id, &child_layer);
                    let floor = graph
                        .annotation(&id)
                        .and_then(|a| graph.offset_min(&a.start))
                        .unwrap_or(0.0);
                    self.correct_sequence(graph, &anchors, floor);
                }
            }
        }
    }

    fn correct_sequence(&mut self, graph: &mut Graph, anchors: &[AnchorId], floor: f64) {
        let default = self.default_confidence();
        let confidence = |graph: &Graph, id: &AnchorId| {
            graph.anchor(id).map_or(default, |a| a.confidence_or(default))
        };
        let mut seen = vec![Seen::Floor(floor)];
        let top = |graph: &Graph, seen: &[Seen]| match seen.last() {
            Some(Seen::Anchor(id)) => graph.offset(id),
            Some(Seen::Floor(offset)) => Some(*offset),
            None => None,
        };

        for (i, anchor) in anchors.iter().enumerate() {
            let (Some(offset), Some(last)) = (graph.offset(anchor), top(graph, &seen)) else {
                continue;
            };
            if graph.compare_offsets(offset, last) == Ordering::Less {
                tracing::debug!(anchor = %anchor, offset, last, "Anchors out of order");
                let own = confidence(graph, anchor);

                // nearest first, back to the first offset before this one
                let mut prior = Vec::new();
                let mut higher_prior = false;
                for other in anchors[..i].iter().rev() {
                    if let Some(o) = graph.offset(other) {
                        if o < offset {
                            break;
                        }
                        higher_prior |= confidence(graph, other) > own;
                    }
                    prior.push(other.clone());
                }

                let mut following = vec![anchor.clone()];
                let mut higher_following = false;
                for other in &anchors[i + 1..] {
                    if let Some(o) = graph.offset(other) {
                        if o > last {
                            break;
                        }
                        higher_following |= confidence(graph, other) > own;
                    }
                    following.push(other.clone());
                }

                let reset = match (higher_prior, higher_following) {
                    (true, false) => following,
                    (false, true) => prior,
                    (true, true) => interleave(graph, prior, following, own, &confidence),
                    (false, false) if prior.len() > following.len() => following,
                    (false, false) => prior,
                };
                for other in &reset {
                    tracing::debug!(anchor = %other, "Resetting reversed anchor");
                    graph.set_offset(other, None);
                    graph.set_anchor_confidence(other, Some(Confidence::NONE));
                }
            }
            if graph.offset(anchor).is_some() {
                seen.push(Seen::Anchor(anchor.clone()));
            }
            while seen.len() > 1 && top(graph, &seen).is_none() {
                seen.pop();
            }
        }
    }
}

/// With higher confidences on both sides, take anchors from the prior and
/// following runs (starting with the prior one) while they still cross,
/// switching to the lower-confidence side whenever a more trusted anchor
/// comes up.
fn interleave<C>(
    graph: &Graph,
    mut prior: Vec<AnchorId>,
    mut following: Vec<AnchorId>,
    own: Confidence,
    confidence: &C,
) -> Vec<AnchorId>
where
    C: Fn(&Graph, &AnchorId) -> Confidence,
{
    let mut reset = Vec::new();
    let mut from_prior = true;
    let mut current = own;
    loop {
        let (Some(p), Some(f)) = (prior.first(), following.first()) else {
            break;
        };
        let crossing = match (graph.offset(p), graph.offset(f)) {
            (Some(po), Some(fo)) => po >= fo,
            _ => true,
        };
        if !crossing {
            break;
        }
        let head = if from_prior { p } else { f };
        if graph.offset(head).is_some() && confidence(graph, head) > current {
            from_prior = confidence(graph, p) < confidence(graph, f);
            let head = if from_prior { p } else { f };
            current = confidence(graph, head);
        }
        let list = if from_prior { &mut prior } else { &mut following };
        reset.push(list.remove(0));
    }
    reset
}

/// Aligned layers none of whose ancestors are aligned.
fn topmost_aligned_layers(graph: &Graph) -> Vec<String> {
    let schema = graph.schema();
    schema
        .traverse(LayerOrder::TopDown)
        .into_iter()
        .filter(|layer| layer.is_aligned())
        .filter(|layer| !schema.ancestors(&layer.id).iter().any(|a| a.is_aligned()))
        .map(|layer| layer.id.clone())
        .collect()
}

fn counts(layer: Option<&Layer>) -> bool {
    layer.map_or(false, |l| l.is_aligned() && l.parent_includes && !l.peers_overlap)
}

/// Anchors of `id` and its descendants on `child_layer`, deduplicated, in
/// document order.
fn document_order(graph: &Graph, id: &AnnotationId, child_layer: &str) -> Vec<AnchorId> {
    let mut ordered = Vec::new();
    let mut seen = HashSet::new();
    let mut add = |anchor: &AnchorId, ordered: &mut Vec<AnchorId>| {
        if seen.insert(anchor.clone()) {
            ordered.push(anchor.clone());
        }
    };
    let Some(annotation) = graph.annotation(id) else {
        return ordered;
    };
    add(&annotation.start, &mut ordered);
    for child in graph.children(id, child_layer) {
        visit(graph, &child, &mut |a| add(a, &mut ordered));
    }
    add(&annotation.end, &mut ordered);
    ordered
}

fn visit<F: FnMut(&AnchorId)>(graph: &Graph, id: &AnnotationId, add: &mut F) {
    let Some(annotation) = graph.annotation(id) else {
        return;
    };
    let included = counts(graph.schema().layer(&annotation.layer_id));
    if included {
        add(&annotation.start);
    }
    let layers: Vec<String> = graph
        .schema()
        .children_of(&annotation.layer_id)
        .into_iter()
        .map(|l| l.id.clone())
        .collect();
    for layer in layers {
        for child in graph.children(id, &layer) {
            visit(graph, &child, add);
        }
    }
    if included {
        add(&annotation.end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Anchor, Annotation, Schema};

    fn turn(offsets: &[(f64, Confidence)]) -> Graph {
        let mut g = Graph::new("g", Schema::transcript());
        for (i, (off, conf)) in offsets.iter().enumerate() {
            g.add_anchor(Anchor::new(format!("a{i}").as_str(), Some(*off), Some(*conf))).unwrap();
        }
        let last = format!("a{}", offsets.len() - 1);
        g.add_annotation(Annotation::new("p", "participant", "", "a0", last.as_str())).unwrap();
        g.add_annotation(Annotation::new("t", "turn", "", "a0", last.as_str()).with_parent("p")).unwrap();
        for i in 0..offsets.len() - 1 {
            let w = Annotation::new(format!("w{i}"), "word", "", format!("a{i}"), format!("a{}", i + 1));
            g.add_annotation(w.with_parent("t")).unwrap();
        }
        g
    }

    const M: Confidence = Confidence::MANUAL;
    const D: Confidence = Confidence::DEFAULT;

    #[test]
    fn test_topmost_aligned_is_turn() {
        let g = turn(&[(0.0, M), (1.0, M)]);
        assert_eq!(topmost_aligned_layers(&g), vec!["turn"]);
    }

    #[test]
    fn test_low_confidence_inversion_is_cleared() {
        // a2 at 1.0 falls before a1 at 2.0; a1 is only a default guess
        let mut g = turn(&[(0.0, M), (2.0, D), (1.0, M), (3.0, M)]);
        Validator::default().correct_reversed_anchors(&mut g);
        assert_eq!(g.offset(&"a1".into()), None);
        assert_eq!(g.anchor(&"a1".into()).unwrap().confidence, Some(Confidence::NONE));
        assert_eq!(g.offset(&"a2".into()), Some(1.0));
    }

    #[test]
    fn test_trusted_prior_resets_following() {
        let mut g = turn(&[(0.0, M), (2.0, M), (1.0, D), (3.0, M)]);
        Validator::default().correct_reversed_anchors(&mut g);
        assert_eq!(g.offset(&"a1".into()), Some(2.0));
        assert_eq!(g.offset(&"a2".into()), None);
    }

    #[test]
    fn test_ordered_anchors_untouched() {
        let mut g = turn(&[(0.0, M), (1.0, D), (2.0, D), (3.0, M)]);
        Validator::default().correct_reversed_anchors(&mut g);
        for (i, off) in [0.0, 1.0, 2.0, 3.0].into_iter().enumerate() {
            assert_eq!(g.offset(&AnchorId::new(format!("a{i}"))), Some(off));
        }
    }
}
