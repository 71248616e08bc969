//! Orphan reconciliation.
//!
//! An annotation on a parent-including layer needs a live parent on the
//! parent layer that (on aligned layers) actually covers it. When that isn't
//! so, low-confidence children are simply destroyed; trusted ones are moved
//! to the most plausible other parent.

use std::collections::BTreeSet;
use std::fmt;

use super::Validator;
use crate::graph::Graph;
use crate::ordering::sort_by_anchor;
use crate::types::{AnnotationId, Change, Confidence, LayerOrder};

/// Why a child's current parent is unacceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanReason {
    /// No parent, or the parent id doesn't resolve.
    Missing,
    /// The parent has been destroyed.
    Deleted,
    /// The parent doesn't cover the child in time.
    NotIncluding,
    /// The parent is on a layer other than the child layer's parent.
    WrongLayer,
}

impl fmt::Display for OrphanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Missing => "missing",
            Self::Deleted => "deleted",
            Self::NotIncluding => "not including",
            Self::WrongLayer => "wrong layer",
        };
        f.write_str(text)
    }
}

impl Validator {
    /// Reparent or destroy annotations whose parent is missing, destroyed,
    /// on the wrong layer or not covering them.
    pub(crate) fn reconcile_orphans(&mut self, graph: &mut Graph) {
        let _span = tracing::debug_span!("orphans").entered();
        let layers: Vec<(String, String)> = graph
            .schema()
            .traverse(LayerOrder::TopDown)
            .into_iter()
            .filter(|l| l.parent_includes && !graph.schema().is_top_level(&l.id))
            .map(|l| (l.id.clone(), l.parent().to_string()))
            .collect();
        for (layer_id, parent_layer_id) in layers {
            self.reconcile_layer(graph, &layer_id, &parent_layer_id);
        }
    }

    fn reconcile_layer(&mut self, graph: &mut Graph, layer_id: &str, parent_layer_id: &str) {
        for child_id in graph.layer_ids(layer_id) {
            let Some(reason) = self.orphan_reason(graph, &child_id, parent_layer_id) else {
                continue;
            };
            let Some(child) = graph.annotation(&child_id).cloned() else {
                continue;
            };
            if child.confidence_or(Confidence::MANUAL) <= Confidence::AUTOMATIC {
                tracing::debug!(annotation = %child_id, %reason, "Deleting orphan");
                graph.destroy(&child_id);
                continue;
            }
            match find_best_parent(graph, &child_id, parent_layer_id) {
                Some(parent) => {
                    tracing::debug!(annotation = %child_id, parent = %parent, %reason, "Reparenting orphan");
                    graph.set_parent(&child_id, Some(&parent), true);
                }
                None => {
                    let old = child
                        .parent
                        .as_ref()
                        .and_then(|p| graph.annotation(p))
                        .map_or_else(|| "none".to_string(), |p| p.to_string());
                    self.error(format!(
                        "No new parent available for {child} ({layer_id}) but {parent_layer_id} {old} {reason}"
                    ));
                }
            }
        }
    }

    fn orphan_reason(&self, graph: &Graph, child_id: &AnnotationId, parent_layer_id: &str) -> Option<OrphanReason> {
        let child = graph.annotation(child_id)?;
        if child.is_destroyed() {
            return None;
        }
        let parent = graph.parent_of(child_id);
        if !self.config().full_validation
            && child.change == Change::NoChange
            && parent.map_or(false, |p| p.change == Change::NoChange)
        {
            return None;
        }
        let Some(parent) = parent else {
            return Some(OrphanReason::Missing);
        };
        if parent.layer_id != parent_layer_id {
            return Some(OrphanReason::WrongLayer);
        }
        if parent.is_destroyed() {
            return Some(OrphanReason::Deleted);
        }
        let aligned = graph.schema().layer(&child.layer_id).map_or(false, |l| l.is_aligned());
        if aligned && graph.is_anchored(child) && graph.is_anchored(parent) {
            let zero_length_at_end = graph.duration(child).map_or(false, |d| d <= 0.0)
                && graph.offset(&child.start) == graph.offset(&parent.end);
            if !graph.includes_midpoint_of(parent, child)
                && !zero_length_at_end
                && child.start != parent.start
                && child.end != parent.end
            {
                return Some(OrphanReason::NotIncluding);
            }
        }
        None
    }
}

/// Most plausible parent on `parent_layer_id` for `child_id`.
///
/// Candidates are gathered in decreasing order of plausibility: annotations
/// sharing both anchors, including the child, including its midpoint,
/// linked by one anchor, and finally the old parent's neighbours. Among
/// them, one with the same parent as the old parent wins outright;
/// otherwise the last one sharing any ancestor, otherwise the nearest.
pub fn find_best_parent(graph: &Graph, child_id: &AnnotationId, parent_layer_id: &str) -> Option<AnnotationId> {
    let child = graph.annotation(child_id)?;
    let mut candidates = graph.tags_on(child_id, parent_layer_id);
    if candidates.is_empty() {
        candidates = graph.including_on(child_id, parent_layer_id);
    }
    if candidates.is_empty() {
        candidates = graph.midpoint_including_on(child_id, parent_layer_id);
    }
    if candidates.is_empty() {
        let mut seen = BTreeSet::new();
        let linked = graph
            .starting_on(&child.start, parent_layer_id)
            .into_iter()
            .chain(graph.ending_on(&child.end, parent_layer_id))
            .chain(graph.ending_on(&child.start, parent_layer_id))
            .chain(graph.starting_on(&child.end, parent_layer_id));
        candidates = linked.filter(|c| seen.insert(c.clone())).collect();
    }
    if candidates.is_empty() {
        candidates = old_parent_neighbours(graph, child_id);
    }

    let grandparent = graph.parent_of(child_id).and_then(|p| p.parent.clone());
    let mut best = None;
    let mut nearest: Option<AnnotationId> = None;
    for candidate_id in &candidates {
        let Some(candidate) = graph.annotation(candidate_id) else {
            continue;
        };
        if grandparent.is_some() && candidate.parent == grandparent {
            return Some(candidate_id.clone());
        }
        if graph.first_common_ancestor(child_id, candidate_id).is_some() {
            best = Some(candidate_id.clone());
        }
        let closer = match nearest.as_ref().and_then(|n| graph.annotation(n)) {
            None => true,
            Some(current) => match (graph.distance(child, candidate), graph.distance(child, current)) {
                (Some(d), Some(current)) => d < current,
                _ => false,
            },
        };
        if closer {
            nearest = Some(candidate_id.clone());
        }
    }
    best.or(nearest)
}

/// Live siblings immediately before and after the child's old parent.
fn old_parent_neighbours(graph: &Graph, child_id: &AnnotationId) -> Vec<AnnotationId> {
    let Some(old) = graph.parent_of(child_id) else {
        return Vec::new();
    };
    if !old.is_destroyed() {
        return graph.previous(&old.id).into_iter().chain(graph.next(&old.id)).collect();
    }
    // a destroyed parent has no ordinal among live siblings; place it by anchor
    let mut siblings: Vec<AnnotationId> = match &old.parent {
        Some(grandparent) => graph.children(grandparent, &old.layer_id),
        None => graph
            .all(&old.layer_id)
            .into_iter()
            .filter(|id| graph.annotation(id).map_or(false, |a| a.parent.is_none()))
            .collect(),
    };
    siblings.push(old.id.clone());
    sort_by_anchor(graph, &mut siblings);
    let Some(position) = siblings.iter().position(|s| s == &old.id) else {
        return Vec::new();
    };
    let mut neighbours = Vec::new();
    if position > 0 {
        neighbours.push(siblings[position - 1].clone());
    }
    if let Some(next) = siblings.get(position + 1) {
        neighbours.push(next.clone());
    }
    neighbours
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::GraphTransformer;
    use crate::types::{Anchor, Annotation, Schema};

    fn two_turns() -> Graph {
        let mut g = Graph::new("g", Schema::transcript());
        for (id, off) in [("a0", 0.0), ("a1", 1.0), ("a2", 2.0), ("a3", 3.0), ("a4", 4.0)] {
            g.add_anchor(Anchor::new(id, Some(off), Some(Confidence::MANUAL))).unwrap();
        }
        g.add_annotation(Annotation::new("p", "participant", "ann", "a0", "a4")).unwrap();
        g.add_annotation(Annotation::new("t1", "turn", "", "a0", "a2").with_parent("p")).unwrap();
        g.add_annotation(Annotation::new("t2", "turn", "", "a2", "a4").with_parent("p")).unwrap();
        g.add_annotation(Annotation::new("w1", "word", "a", "a0", "a1").with_parent("t1")).unwrap();
        g.add_annotation(Annotation::new("w2", "word", "b", "a1", "a2").with_parent("t1")).unwrap();
        g.add_annotation(Annotation::new("w3", "word", "c", "a2", "a3").with_parent("t2")).unwrap();
        g.add_annotation(Annotation::new("w4", "word", "d", "a3", "a4").with_parent("t2")).unwrap();
        g.commit();
        g
    }

    #[test]
    fn test_words_of_deleted_turn_move_to_neighbour() {
        let mut g = two_turns();
        g.destroy(&"t2".into());
        Validator::default().reconcile_orphans(&mut g);
        let w3 = g.annotation(&"w3".into()).unwrap();
        assert_eq!(w3.parent, Some("t1".into()));
        assert!(!w3.is_destroyed());
        assert_eq!(g.children(&"t1".into(), "word").len(), 4);
    }

    #[test]
    fn test_automatic_orphans_are_destroyed() {
        let mut g = two_turns();
        g.set_confidence(&"w3".into(), Some(Confidence::AUTOMATIC));
        g.destroy(&"t2".into());
        Validator::default().reconcile_orphans(&mut g);
        assert!(g.annotation(&"w3".into()).unwrap().is_destroyed());
        assert_eq!(g.annotation(&"w4".into()).unwrap().parent, Some("t1".into()));
    }

    #[test]
    fn test_word_outside_its_turn_finds_including_turn() {
        let mut g = two_turns();
        // w1 now spans 3..4, inside t2
        g.set_start(&"w1".into(), &"a3".into());
        g.set_end(&"w1".into(), &"a4".into());
        let mut validator = Validator::default();
        validator.reconcile_orphans(&mut g);
        assert_eq!(g.annotation(&"w1".into()).unwrap().parent, Some("t2".into()));
        assert!(validator.errors().is_empty());
    }

    #[test]
    fn test_best_parent_prefers_same_grandparent() {
        let g = two_turns();
        assert_eq!(find_best_parent(&g, &"w3".into(), "turn"), Some("t2".into()));
    }
}
