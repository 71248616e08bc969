//! Canonical ordering of annotations by their anchors.
//!
//! ## Order
//!
//! 1. start offset ascending
//! 2. instants before spans starting at the same offset
//! 3. end offset descending (wider spans first, so parents precede children)
//! 4. `a.end == b.start` ⇒ `a < b`
//! 5. layer id, ordinal, annotation id
//!
//! Offsets are only consulted while they are present on both sides; as soon
//! as one is missing the comparison falls through to the structural rules.
//! With partially anchored input the relation is not transitive, so
//! [`sort_by_anchor`] uses a merge sort that tolerates inconsistent
//! comparisons instead of `slice::sort_by`, which may panic on them.

use std::cmp::Ordering;

use crate::graph::Graph;
use crate::types::{Annotation, AnnotationId};

/// Compare two annotations by anchor offset, then structure.
pub fn compare_by_anchor(graph: &Graph, a: &Annotation, b: &Annotation) -> Ordering {
    if a.id == b.id {
        return Ordering::Equal;
    }
    if let Some(ordering) = compare_offsets(graph, a, b) {
        return ordering;
    }
    if a.end == b.start {
        return Ordering::Less;
    }
    if a.start == b.end {
        return Ordering::Greater;
    }
    a.layer_id
        .cmp(&b.layer_id)
        .then(a.ordinal.cmp(&b.ordinal))
        .then_with(|| a.id.cmp(&b.id))
}

fn compare_offsets(graph: &Graph, a: &Annotation, b: &Annotation) -> Option<Ordering> {
    let a_start = graph.offset(&a.start)?;
    let b_start = graph.offset(&b.start)?;
    if a_start < b_start {
        return Some(Ordering::Less);
    }
    if a_start > b_start {
        return Some(Ordering::Greater);
    }
    let a_end = graph.offset(&a.end)?;
    let b_end = graph.offset(&b.end)?;
    let a_instant = a_start == a_end;
    let b_instant = b_start == b_end;
    if a_instant && !b_instant {
        return Some(Ordering::Less);
    }
    if b_instant && !a_instant {
        return Some(Ordering::Greater);
    }
    if a_end < b_end {
        return Some(Ordering::Greater);
    }
    if a_end > b_end {
        return Some(Ordering::Less);
    }
    None
}

/// Sort annotation ids in place by [`compare_by_anchor`].
///
/// Ids the graph doesn't know sort last, by id.
pub fn sort_by_anchor(graph: &Graph, ids: &mut Vec<AnnotationId>) {
    merge_sort_by(ids, &mut |x, y| match (graph.annotation(x), graph.annotation(y)) {
        (Some(a), Some(b)) => compare_by_anchor(graph, a, b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => x.cmp(y),
    });
}

/// Stable top-down merge sort.
///
/// Never panics, whatever the comparator returns.
pub fn merge_sort_by<T: Clone, F>(items: &mut Vec<T>, cmp: &mut F)
where
    F: FnMut(&T, &T) -> Ordering,
{
    if items.len() < 2 {
        return;
    }
    let right = items.split_off(items.len() / 2);
    let mut left = std::mem::take(items);
    let mut right = right;
    merge_sort_by(&mut left, cmp);
    merge_sort_by(&mut right, cmp);

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut l = left.into_iter().peekable();
    let mut r = right.into_iter().peekable();
    loop {
        let take_left = match (l.peek(), r.peek()) {
            (Some(a), Some(b)) => cmp(b, a) != Ordering::Less,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { l.next() } else { r.next() };
        if let Some(item) = next {
            merged.push(item);
        }
    }
    *items = merged;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Anchor, Confidence, Schema};

    fn graph() -> Graph {
        let mut g = Graph::new("g", Schema::transcript());
        for (id, off) in [("a0", Some(0.0)), ("a1", Some(1.0)), ("a2", Some(2.0)), ("u", None)] {
            g.add_anchor(Anchor::new(id, off, Some(Confidence::MANUAL))).unwrap();
        }
        g.add_annotation(Annotation::new("t", "turn", "j", "a0", "a2")).unwrap();
        g.add_annotation(Annotation::new("w2", "word", "b", "a1", "a2")).unwrap();
        g.add_annotation(Annotation::new("w1", "word", "a", "a0", "a1")).unwrap();
        g.add_annotation(Annotation::new("i", "word", "", "a1", "a1")).unwrap();
        g.add_annotation(Annotation::new("x", "word", "c", "a2", "u")).unwrap();
        g
    }

    #[test]
    fn test_wider_span_first_and_instants_first() {
        let g = graph();
        let mut ids: Vec<AnnotationId> = ["x", "w2", "i", "w1", "t"].iter().map(|s| (*s).into()).collect();
        sort_by_anchor(&g, &mut ids);
        let order: Vec<&str> = ids.iter().map(|i| i.as_str()).collect();
        assert_eq!(order, vec!["t", "w1", "i", "w2", "x"]);
    }

    #[test]
    fn test_linkage_rule_without_offsets() {
        let mut g = Graph::new("g", Schema::transcript());
        for id in ["a", "b", "c"] {
            g.add_anchor(Anchor::new(id, None, None)).unwrap();
        }
        g.add_annotation(Annotation::new("z", "word", "", "a", "b")).unwrap();
        g.add_annotation(Annotation::new("y", "word", "", "b", "c")).unwrap();
        let z = g.annotation(&"z".into()).unwrap();
        let y = g.annotation(&"y".into()).unwrap();
        assert_eq!(compare_by_anchor(&g, z, y), Ordering::Less);
        assert_eq!(compare_by_anchor(&g, y, z), Ordering::Greater);
    }

    #[test]
    fn test_merge_sort_is_stable() {
        let mut v = vec![(1, 'a'), (0, 'b'), (1, 'c'), (0, 'd')];
        merge_sort_by(&mut v, &mut |x, y| x.0.cmp(&y.0));
        assert_eq!(v, vec![(0, 'b'), (0, 'd'), (1, 'a'), (1, 'c')]);
    }
}
