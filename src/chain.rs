//! Anchor chains.
//!
//! A chain is the run of anchors reached by stepping from an anchor across
//! the annotations that start (forward) or end (backward) there. Each step
//! takes the first usable annotation on a preferred layer, falling back to
//! any layer in id order. Destroyed annotations, instants and annotations
//! rejected by the follow predicate are never stepped across.
//!
//! The starting anchor is not part of the chain; the anchor that satisfies
//! the boundary predicate is.

use std::collections::HashSet;

use crate::graph::Graph;
use crate::types::{AnchorId, Annotation, AnnotationId};

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

fn step<F>(graph: &Graph, from: &AnchorId, preferred: &[String], direction: Direction, follow: &mut F) -> Option<AnchorId>
where
    F: FnMut(&Annotation) -> bool,
{
    let links = |layer: Option<&str>| -> Vec<AnnotationId> {
        match (direction, layer) {
            (Direction::Forward, Some(l)) => graph.starting_on(from, l),
            (Direction::Backward, Some(l)) => graph.ending_on(from, l),
            (Direction::Forward, None) => graph.starting_at(from),
            (Direction::Backward, None) => graph.ending_at(from),
        }
    };
    let mut across = |ids: Vec<AnnotationId>| -> Option<AnchorId> {
        ids.iter()
            .filter_map(|id| graph.annotation(id))
            .filter(|a| !a.is_instant())
            .find(|a| follow(a))
            .map(|a| match direction {
                Direction::Forward => a.end.clone(),
                Direction::Backward => a.start.clone(),
            })
    };

    for layer in preferred {
        if let Some(next) = across(links(Some(layer))) {
            return Some(next);
        }
    }
    let mut any = links(None);
    any.sort_by(|x, y| {
        let layer = |id: &AnnotationId| graph.annotation(id).map(|a| a.layer_id.clone());
        layer(x).cmp(&layer(y)).then_with(|| x.cmp(y))
    });
    across(any)
}

fn walk<F, B>(
    graph: &Graph,
    start: &AnchorId,
    preferred: &[String],
    direction: Direction,
    mut follow: F,
    mut boundary: B,
) -> Vec<AnchorId>
where
    F: FnMut(&Annotation) -> bool,
    B: FnMut(&AnchorId) -> bool,
{
    let mut chain = Vec::new();
    let mut visited = HashSet::from([start.clone()]);
    let mut current = start.clone();
    while let Some(next) = step(graph, &current, preferred, direction, &mut follow) {
        // a cycle means the links are inconsistent; stop rather than loop
        if !visited.insert(next.clone()) {
            break;
        }
        chain.push(next.clone());
        if boundary(&next) {
            break;
        }
        current = next;
    }
    if matches!(direction, Direction::Backward) {
        chain.reverse();
    }
    chain
}

/// Anchors reached stepping forward from `start`, in order, until one
/// satisfies `boundary` or no step is possible.
pub fn chain_forward<F, B>(graph: &Graph, start: &AnchorId, preferred: &[String], follow: F, boundary: B) -> Vec<AnchorId>
where
    F: FnMut(&Annotation) -> bool,
    B: FnMut(&AnchorId) -> bool,
{
    walk(graph, start, preferred, Direction::Forward, follow, boundary)
}

/// Anchors reached stepping backward from `start`, earliest first, until
/// one satisfies `boundary` or no step is possible.
pub fn chain_backward<F, B>(graph: &Graph, start: &AnchorId, preferred: &[String], follow: F, boundary: B) -> Vec<AnchorId>
where
    F: FnMut(&Annotation) -> bool,
    B: FnMut(&AnchorId) -> bool,
{
    walk(graph, start, preferred, Direction::Backward, follow, boundary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Anchor, Schema};

    fn ids(chain: &[AnchorId]) -> Vec<&str> {
        chain.iter().map(|a| a.as_str()).collect()
    }

    fn words() -> Graph {
        let mut g = Graph::new("g", Schema::transcript());
        for (id, off) in [("a0", Some(0.0)), ("a1", None), ("a2", None), ("a3", Some(3.0))] {
            g.add_anchor(Anchor::new(id, off, None)).unwrap();
        }
        g.add_annotation(Annotation::new("t", "turn", "", "a0", "a3")).unwrap();
        g.add_annotation(Annotation::new("w1", "word", "", "a0", "a1")).unwrap();
        g.add_annotation(Annotation::new("w2", "word", "", "a1", "a2")).unwrap();
        g.add_annotation(Annotation::new("w3", "word", "", "a2", "a3")).unwrap();
        g.add_annotation(Annotation::new("i", "word", "", "a1", "a1")).unwrap();
        g
    }

    #[test]
    fn test_forward_prefers_layer_and_stops_at_boundary() {
        let g = words();
        let preferred = vec!["word".to_string()];
        let chain = chain_forward(&g, &"a0".into(), &preferred, |_| true, |a| g.offset(a).is_some());
        assert_eq!(ids(&chain), vec!["a1", "a2", "a3"]);
    }

    #[test]
    fn test_without_preference_falls_back_by_layer_id() {
        let g = words();
        // "turn" sorts before "word", so the turn is crossed first
        let chain = chain_forward(&g, &"a0".into(), &[], |_| true, |_| false);
        assert_eq!(ids(&chain), vec!["a3"]);
    }

    #[test]
    fn test_backward_is_earliest_first() {
        let g = words();
        let preferred = vec!["word".to_string()];
        let chain = chain_backward(&g, &"a2".into(), &preferred, |_| true, |_| false);
        assert_eq!(ids(&chain), vec!["a0", "a1"]);
    }

    #[test]
    fn test_follow_predicate_and_destroyed_block_steps() {
        let mut g = words();
        let preferred = vec!["word".to_string()];
        let chain = chain_forward(&g, &"a0".into(), &preferred, |a| a.id.as_str() != "w2", |_| false);
        assert_eq!(ids(&chain), vec!["a1"]);
        g.destroy(&"w1".into());
        g.destroy(&"t".into());
        assert!(chain_forward(&g, &"a0".into(), &preferred, |_| true, |_| false).is_empty());
    }
}
