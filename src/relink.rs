//! Moving annotation boundaries together with the annotations that share
//! them.
//!
//! When an annotation's start (or end) moves to another anchor, the
//! annotations that shared the old anchor are brought along:
//!
//! - *Parallel* annotations on other layers that start (end) at the old
//!   anchor move too, except across a sparse parent/child boundary, where
//!   only the annotation's own parent or children are moved and only if the
//!   child layer is saturated.
//! - *Adjacent* annotations on the same layer that end (start) at the old
//!   anchor are moved recursively, provided they have the same parent and
//!   the move wouldn't turn them into instants.
//!
//! Layers in the exclusion set are never touched; each layer is recursed
//! into at most once, which bounds the cascade.

use std::collections::BTreeSet;

use crate::graph::Graph;
use crate::types::{AnchorId, Annotation, AnnotationId, Layer};

/// Move the start of `id` to `anchor`, propagating to annotations that
/// shared its old start. Returns every annotation that was moved.
pub fn change_start_with_related(
    graph: &mut Graph,
    id: &AnnotationId,
    anchor: &AnchorId,
    excluded_layers: &BTreeSet<String>,
) -> BTreeSet<AnnotationId> {
    let mut exclude = excluded_layers.clone();
    let mut touched = BTreeSet::new();
    move_start(graph, id, anchor, &mut exclude, &mut touched);
    touched
}

/// Move the end of `id` to `anchor`, propagating to annotations that shared
/// its old end. Returns every annotation that was moved.
pub fn change_end_with_related(
    graph: &mut Graph,
    id: &AnnotationId,
    anchor: &AnchorId,
    excluded_layers: &BTreeSet<String>,
) -> BTreeSet<AnnotationId> {
    let mut exclude = excluded_layers.clone();
    let mut touched = BTreeSet::new();
    move_end(graph, id, anchor, &mut exclude, &mut touched);
    touched
}

/// Whether `other` may follow `annotation` across a layer boundary.
fn shares_boundary(layer: Option<&Layer>, other_layer: Option<&Layer>, annotation: &Annotation, other: &Annotation) -> bool {
    let (Some(layer), Some(other_layer)) = (layer, other_layer) else {
        return true;
    };
    if layer.parent() == other_layer.id {
        layer.saturated && annotation.parent.as_ref() == Some(&other.id)
    } else if other_layer.parent() == layer.id {
        other_layer.saturated && other.parent.as_ref() == Some(&annotation.id)
    } else {
        true
    }
}

/// Point one side of an annotation at `anchor`; instants keep both sides
/// together.
fn reanchor(graph: &mut Graph, id: &AnnotationId, anchor: &AnchorId, start: bool, touched: &mut BTreeSet<AnnotationId>) {
    let instant = graph.annotation(id).map_or(false, Annotation::is_instant);
    let mut moved = if start { graph.set_start(id, anchor) } else { graph.set_end(id, anchor) };
    if instant {
        moved |= if start { graph.set_end(id, anchor) } else { graph.set_start(id, anchor) };
    }
    if moved {
        touched.insert(id.clone());
    }
}

fn move_parallel(
    graph: &mut Graph,
    annotation: &Annotation,
    old: &AnchorId,
    anchor: &AnchorId,
    start: bool,
    exclude: &BTreeSet<String>,
    touched: &mut BTreeSet<AnnotationId>,
) {
    let layer = graph.schema().layer(&annotation.layer_id).cloned();
    let parallel = if start { graph.starting_at(old) } else { graph.ending_at(old) };
    for other_id in parallel {
        let Some(other) = graph.annotation(&other_id).cloned() else { continue };
        if other.layer_id == annotation.layer_id || exclude.contains(&other.layer_id) {
            continue;
        }
        let other_layer = graph.schema().layer(&other.layer_id).cloned();
        if !shares_boundary(layer.as_ref(), other_layer.as_ref(), annotation, &other) {
            continue;
        }
        tracing::trace!(related = %other_id, anchor = %anchor, start, "Moving parallel annotation");
        reanchor(graph, &other_id, anchor, start, touched);
    }
}

fn move_start(
    graph: &mut Graph,
    id: &AnnotationId,
    anchor: &AnchorId,
    exclude: &mut BTreeSet<String>,
    touched: &mut BTreeSet<AnnotationId>,
) {
    let Some(annotation) = graph.annotation(id).cloned() else {
        return;
    };
    let old = annotation.start.clone();
    reanchor(graph, id, anchor, true, touched);
    move_parallel(graph, &annotation, &old, anchor, true, exclude, touched);

    if !exclude.insert(annotation.layer_id.clone()) {
        return;
    }
    for previous in graph.ending_on(&old, &annotation.layer_id) {
        let Some(p) = graph.annotation(&previous) else { continue };
        if !p.is_instant() && &p.start == anchor {
            tracing::trace!(related = %previous, "Not moving end: would create an instant");
            continue;
        }
        if p.parent.is_none() || p.parent != annotation.parent {
            continue;
        }
        move_end(graph, &previous, anchor, exclude, touched);
    }
}

fn move_end(
    graph: &mut Graph,
    id: &AnnotationId,
    anchor: &AnchorId,
    exclude: &mut BTreeSet<String>,
    touched: &mut BTreeSet<AnnotationId>,
) {
    let Some(annotation) = graph.annotation(id).cloned() else {
        return;
    };
    let old = annotation.end.clone();
    reanchor(graph, id, anchor, false, touched);
    move_parallel(graph, &annotation, &old, anchor, false, exclude, touched);

    if !exclude.insert(annotation.layer_id.clone()) {
        return;
    }
    let following = graph.starting_on_any(&old, &annotation.layer_id);
    if following.is_empty() {
        return;
    }
    let live: Vec<AnnotationId> = following
        .into_iter()
        .filter(|n| graph.annotation(n).map_or(false, |a| !a.is_destroyed()))
        .collect();
    if live.is_empty() {
        // the next annotation on this layer is gone; one survivor on another
        // layer brings the rest of the starting annotations along
        let survivor = graph
            .starting_at(&old)
            .into_iter()
            .find(|n| graph.annotation(n).map_or(false, |a| !exclude.contains(&a.layer_id)));
        if let Some(next) = survivor {
            move_start(graph, &next, anchor, exclude, touched);
        }
        return;
    }
    for next in live {
        let Some(n) = graph.annotation(&next) else { continue };
        if !n.is_instant() && &n.end == anchor {
            tracing::trace!(related = %next, "Not moving start: would create an instant");
            continue;
        }
        move_start(graph, &next, anchor, exclude, touched);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Anchor, Confidence, Schema};

    fn graph() -> Graph {
        let mut g = Graph::new("g", Schema::transcript());
        for (id, off) in [("a0", 0.0), ("a1", 1.0), ("a2", 2.0), ("n", 0.5)] {
            g.add_anchor(Anchor::new(id, Some(off), Some(Confidence::MANUAL))).unwrap();
        }
        g.add_annotation(Annotation::new("t", "turn", "", "a0", "a2")).unwrap();
        g.add_annotation(Annotation::new("u1", "utterance", "", "a0", "a1").with_parent("t")).unwrap();
        g.add_annotation(Annotation::new("u2", "utterance", "", "a1", "a2").with_parent("t")).unwrap();
        g.add_annotation(Annotation::new("w1", "word", "", "a0", "a1").with_parent("t")).unwrap();
        g.add_annotation(Annotation::new("w2", "word", "", "a1", "a2").with_parent("t")).unwrap();
        g.commit();
        g
    }

    fn ids(set: &BTreeSet<AnnotationId>) -> Vec<&str> {
        set.iter().map(|a| a.as_str()).collect()
    }

    #[test]
    fn test_end_change_moves_next_sibling_and_parallel() {
        let mut g = graph();
        let touched = change_end_with_related(&mut g, &"w1".into(), &"n".into(), &BTreeSet::new());
        assert_eq!(ids(&touched), vec!["u1", "u2", "w1", "w2"]);
        assert_eq!(g.annotation(&"w2".into()).unwrap().start, AnchorId::from("n"));
        assert_eq!(g.annotation(&"u2".into()).unwrap().start, AnchorId::from("n"));
    }

    #[test]
    fn test_excluded_layer_is_untouched() {
        let mut g = graph();
        let exclude = BTreeSet::from(["utterance".to_string()]);
        let touched = change_end_with_related(&mut g, &"w1".into(), &"n".into(), &exclude);
        assert_eq!(ids(&touched), vec!["w1", "w2"]);
        assert_eq!(g.annotation(&"u1".into()).unwrap().end, AnchorId::from("a1"));
    }

    #[test]
    fn test_saturated_child_moves_parent_but_sparse_child_does_not() {
        let mut g = graph();
        let touched = change_start_with_related(&mut g, &"u1".into(), &"n".into(), &BTreeSet::new());
        // utterances tile the turn, so the turn follows; words are sparse
        assert!(touched.contains(&AnnotationId::from("t")));
        let mut g = graph();
        let touched = change_start_with_related(&mut g, &"w1".into(), &"n".into(), &BTreeSet::new());
        assert!(!touched.contains(&AnnotationId::from("t")));
        assert!(touched.contains(&AnnotationId::from("u1")));
    }

    #[test]
    fn test_no_new_instant() {
        let mut g = graph();
        // moving w2's start onto w1's start would collapse w1
        let touched = change_start_with_related(&mut g, &"w2".into(), &"a0".into(), &BTreeSet::from(["utterance".to_string()]));
        assert_eq!(ids(&touched), vec!["w2"]);
        assert_eq!(g.annotation(&"w1".into()).unwrap().end, AnchorId::from("a1"));
    }
}
