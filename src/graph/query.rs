//! Structural queries over a [`Graph`].
//!
//! Queries return ids rather than references so callers can collect what
//! they need and then mutate the graph.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};

use super::Graph;
use crate::ordering::sort_by_anchor;
use crate::types::{AnchorId, Annotation, AnnotationId};

impl Graph {
    // ─────────────────────────────────────────────────────────────────────
    // Anchor links
    // ─────────────────────────────────────────────────────────────────────

    fn live_in(&self, ids: Option<&BTreeSet<AnnotationId>>, layer_id: Option<&str>) -> Vec<AnnotationId> {
        ids.map(|set| {
            set.iter()
                .filter_map(|id| self.annotation(id))
                .filter(|a| !a.is_destroyed())
                .filter(|a| layer_id.map_or(true, |l| a.layer_id == l))
                .map(|a| a.id.clone())
                .collect()
        })
        .unwrap_or_default()
    }

    /// Live annotations starting at an anchor.
    pub fn starting_at(&self, anchor: &AnchorId) -> Vec<AnnotationId> {
        self.live_in(self.starts.get(anchor), None)
    }

    /// Live annotations ending at an anchor.
    pub fn ending_at(&self, anchor: &AnchorId) -> Vec<AnnotationId> {
        self.live_in(self.ends.get(anchor), None)
    }

    /// Live annotations on `layer_id` starting at an anchor.
    pub fn starting_on(&self, anchor: &AnchorId, layer_id: &str) -> Vec<AnnotationId> {
        self.live_in(self.starts.get(anchor), Some(layer_id))
    }

    /// Live annotations on `layer_id` ending at an anchor.
    pub fn ending_on(&self, anchor: &AnchorId, layer_id: &str) -> Vec<AnnotationId> {
        self.live_in(self.ends.get(anchor), Some(layer_id))
    }

    /// Annotations on `layer_id` starting at an anchor, destroyed ones included.
    pub fn starting_on_any(&self, anchor: &AnchorId, layer_id: &str) -> Vec<AnnotationId> {
        self.starts
            .get(anchor)
            .map(|set| {
                set.iter()
                    .filter(|id| self.annotation(id).map_or(false, |a| a.layer_id == layer_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a live annotation starts or ends at the anchor.
    pub fn is_linked(&self, anchor: &AnchorId) -> bool {
        !self.starting_at(anchor).is_empty() || !self.ending_at(anchor).is_empty()
    }

    /// First live annotation (by id) from `start` to `end`, optionally on one layer.
    pub fn annotation_between(
        &self,
        start: &AnchorId,
        end: &AnchorId,
        layer_id: Option<&str>,
    ) -> Option<AnnotationId> {
        self.live_in(self.starts.get(start), layer_id)
            .into_iter()
            .find(|id| self.annotation(id).map_or(false, |a| &a.end == end))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Hierarchy
    // ─────────────────────────────────────────────────────────────────────

    /// Live children of `parent` on `layer_id`, in ordinal order.
    pub fn children(&self, parent: &AnnotationId, layer_id: &str) -> Vec<AnnotationId> {
        let mut kids: Vec<&Annotation> = self
            .children
            .get(parent)
            .map(|set| set.iter().filter_map(|id| self.annotation(id)).collect())
            .unwrap_or_default();
        kids.retain(|a| a.layer_id == layer_id && !a.is_destroyed());
        kids.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.id.cmp(&b.id)));
        kids.into_iter().map(|a| a.id.clone()).collect()
    }

    /// Live children of `parent` on `layer_id`, in anchor order.
    pub fn children_by_anchor(&self, parent: &AnnotationId, layer_id: &str) -> Vec<AnnotationId> {
        let mut kids = self.children(parent, layer_id);
        sort_by_anchor(self, &mut kids);
        kids
    }

    /// Layers on which `parent` has live children.
    pub fn child_layers(&self, parent: &AnnotationId) -> BTreeSet<String> {
        self.children
            .get(parent)
            .map(|set| {
                set.iter()
                    .filter_map(|id| self.annotation(id))
                    .filter(|a| !a.is_destroyed())
                    .map(|a| a.layer_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `parent` has any child, live or destroyed.
    pub fn has_children(&self, parent: &AnnotationId) -> bool {
        self.children.get(parent).map_or(false, |set| !set.is_empty())
    }

    /// Whether `parent` has any live child.
    pub fn has_live_children(&self, parent: &AnnotationId) -> bool {
        !self.child_layers(parent).is_empty()
    }

    /// Live annotations on a layer, grouped by parent in hierarchy order and
    /// then by ordinal; annotations without a valid parent come last.
    pub fn all(&self, layer_id: &str) -> Vec<AnnotationId> {
        self.all_with_destroyed(layer_id)
            .into_iter()
            .filter(|id| self.annotation(id).map_or(false, |a| !a.is_destroyed()))
            .collect()
    }

    fn all_with_destroyed(&self, layer_id: &str) -> Vec<AnnotationId> {
        let Some(layer) = self.schema.layer(layer_id) else {
            return Vec::new();
        };
        let by_ordinal = |ids: &mut Vec<&Annotation>| {
            ids.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.id.cmp(&b.id)))
        };
        let on_layer: Vec<&Annotation> = self
            .by_layer
            .get(layer_id)
            .map(|set| set.iter().filter_map(|id| self.annotation(id)).collect())
            .unwrap_or_default();
        if layer.parent() == self.schema.root_id() || layer.parent_id.is_none() {
            let mut list = on_layer;
            list.sort_by(|a, b| {
                a.parent
                    .is_some()
                    .cmp(&b.parent.is_some())
                    .then(a.ordinal.cmp(&b.ordinal))
                    .then_with(|| a.id.cmp(&b.id))
            });
            return list.into_iter().map(|a| a.id.clone()).collect();
        }
        let mut result = Vec::with_capacity(on_layer.len());
        let mut seen = HashSet::new();
        for parent in self.all_with_destroyed(layer.parent()) {
            let mut kids: Vec<&Annotation> = self
                .children
                .get(&parent)
                .map(|set| set.iter().filter_map(|id| self.annotation(id)).collect())
                .unwrap_or_default();
            kids.retain(|a| a.layer_id == layer_id);
            by_ordinal(&mut kids);
            for kid in kids {
                seen.insert(kid.id.clone());
                result.push(kid.id.clone());
            }
        }
        for a in on_layer {
            if !seen.contains(&a.id) {
                result.push(a.id.clone());
            }
        }
        result
    }

    /// Parent annotation, if it exists.
    pub fn parent_of(&self, id: &AnnotationId) -> Option<&Annotation> {
        self.annotation(id)
            .and_then(|a| a.parent.as_ref())
            .and_then(|p| self.annotation(p))
    }

    /// Ancestors of an annotation, nearest first.
    pub fn ancestors(&self, id: &AnnotationId) -> Vec<AnnotationId> {
        let mut ancestors = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.parent_of(id);
        while let Some(a) = current {
            if !seen.insert(a.id.clone()) {
                break;
            }
            ancestors.push(a.id.clone());
            current = self.parent_of(&a.id);
        }
        ancestors
    }

    /// Nearest ancestor on `layer_id`.
    pub fn ancestor_on(&self, id: &AnnotationId, layer_id: &str) -> Option<AnnotationId> {
        self.ancestors(id)
            .into_iter()
            .find(|a| self.annotation(a).map_or(false, |x| x.layer_id == layer_id))
    }

    /// Closest annotation that is `a` or an ancestor of `a`, and is also `b`
    /// or an ancestor of `b`.
    pub fn first_common_ancestor(&self, a: &AnnotationId, b: &AnnotationId) -> Option<AnnotationId> {
        let mut ours: HashSet<AnnotationId> = self.ancestors(a).into_iter().collect();
        ours.insert(a.clone());
        std::iter::once(b.clone())
            .chain(self.ancestors(b))
            .find(|x| ours.contains(x))
    }

    fn sibling_offset(&self, id: &AnnotationId, delta: isize) -> Option<AnnotationId> {
        let a = self.annotation(id)?;
        let siblings = match &a.parent {
            Some(p) => self.children(p, &a.layer_id),
            None => return None,
        };
        let index = siblings.iter().position(|s| s == id)? as isize + delta;
        if index < 0 {
            return None;
        }
        siblings.get(index as usize).cloned()
    }

    /// Previous live sibling by ordinal.
    pub fn previous(&self, id: &AnnotationId) -> Option<AnnotationId> {
        self.sibling_offset(id, -1)
    }

    /// Next live sibling by ordinal.
    pub fn next(&self, id: &AnnotationId) -> Option<AnnotationId> {
        self.sibling_offset(id, 1)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Temporal relations
    // ─────────────────────────────────────────────────────────────────────

    /// Start and end offsets, when both are known.
    pub fn span(&self, a: &Annotation) -> Option<(f64, f64)> {
        Some((self.offset(&a.start)?, self.offset(&a.end)?))
    }

    /// Whether both anchors have offsets.
    pub fn is_anchored(&self, a: &Annotation) -> bool {
        self.span(a).is_some()
    }

    /// End minus start.
    pub fn duration(&self, a: &Annotation) -> Option<f64> {
        self.span(a).map(|(s, e)| e - s)
    }

    /// Halfway between start and end.
    pub fn midpoint(&self, a: &Annotation) -> Option<f64> {
        self.span(a).map(|(s, e)| s + (e - s) / 2.0)
    }

    /// Whether `start <= offset < end`.
    pub fn includes_offset(&self, a: &Annotation, offset: Option<f64>) -> bool {
        match (offset, self.span(a)) {
            (Some(o), Some((s, e))) => s <= o && e > o,
            _ => false,
        }
    }

    /// Whether `other` lies within `a`.
    pub fn includes(&self, a: &Annotation, other: &Annotation) -> bool {
        let other_end = self.offset_max(&other.end);
        self.includes_offset(a, self.offset_min(&other.start))
            && (self.includes_offset(a, other_end)
                || (other_end.is_some() && self.offset(&a.end) == other_end))
    }

    /// Whether `a` includes the midpoint of `other`, or both span the same anchors.
    pub fn includes_midpoint_of(&self, a: &Annotation, other: &Annotation) -> bool {
        self.includes_offset(a, self.midpoint(other)) || (a.start == other.start && a.end == other.end)
    }

    /// Gap between two annotations; negative when they overlap or nest.
    pub fn distance(&self, a: &Annotation, other: &Annotation) -> Option<f64> {
        let (start, end) = self.span(a)?;
        let (other_start, other_end) = self.span(other)?;
        if self.includes(a, other) {
            return Some(-(other_end - other_start));
        }
        if self.includes(other, a) {
            return Some(-(end - start));
        }
        let difference = (start - other_end).abs().min((end - other_start).abs());
        if start < other_end && end > other_start {
            Some(-difference)
        } else {
            Some(difference)
        }
    }

    /// Largest of the start-start and end-end differences; negative when the
    /// spans overlap.
    pub fn max_paired_distance(&self, a: &Annotation, other: &Annotation) -> Option<f64> {
        let (start, end) = self.span(a)?;
        let (other_start, other_end) = self.span(other)?;
        let difference = (start - other_start).abs().max((end - other_end).abs());
        if start < other_end && end > other_start {
            Some(-difference)
        } else {
            Some(difference)
        }
    }

    /// Live annotations on `layer_id` sharing both anchors with `id`.
    pub fn tags_on(&self, id: &AnnotationId, layer_id: &str) -> Vec<AnnotationId> {
        let Some(a) = self.annotation(id) else {
            return Vec::new();
        };
        self.starting_on(&a.start, layer_id)
            .into_iter()
            .filter(|other| other != id)
            .filter(|other| self.annotation(other).map_or(false, |o| o.end == a.end))
            .collect()
    }

    /// Live annotations on `layer_id` that include `id`.
    pub fn including_on(&self, id: &AnnotationId, layer_id: &str) -> Vec<AnnotationId> {
        let Some(a) = self.annotation(id) else {
            return Vec::new();
        };
        if !self.is_anchored(a) {
            return Vec::new();
        }
        self.all(layer_id)
            .into_iter()
            .filter(|other| other != id)
            .filter(|other| self.annotation(other).map_or(false, |o| self.includes(o, a)))
            .collect()
    }

    /// Live annotations on `layer_id` that include the midpoint of `id`.
    pub fn midpoint_including_on(&self, id: &AnnotationId, layer_id: &str) -> Vec<AnnotationId> {
        let Some(a) = self.annotation(id) else {
            return Vec::new();
        };
        if !self.is_anchored(a) {
            return Vec::new();
        }
        self.all(layer_id)
            .into_iter()
            .filter(|other| other != id)
            .filter(|other| {
                self.annotation(other)
                    .map_or(false, |o| self.includes_midpoint_of(o, a))
            })
            .collect()
    }

    /// Anchored live annotations on `layer_id` overlapping `(start, end)`.
    pub fn overlapping(&self, start: f64, end: f64, layer_id: &str) -> Vec<AnnotationId> {
        self.all(layer_id)
            .into_iter()
            .filter(|id| {
                self.annotation(id)
                    .and_then(|a| self.span(a))
                    .map_or(false, |(s, e)| e > start && s < end)
            })
            .collect()
    }

    fn extreme_descendant(&self, id: &AnnotationId, earliest: bool) -> Option<(AnnotationId, f64)> {
        let mut best: Option<(AnnotationId, f64)> = None;
        let better = |candidate: f64, best: &Option<(AnnotationId, f64)>| match best {
            None => true,
            Some((_, current)) if earliest => candidate < *current,
            Some((_, current)) => candidate > *current,
        };
        for layer_id in self.child_layers(id) {
            let counts = self
                .schema
                .layer(&layer_id)
                .map_or(false, |l| l.is_aligned() && l.parent_includes);
            for child in self.children(id, &layer_id) {
                if counts {
                    if let Some(a) = self.annotation(&child) {
                        let anchor = if earliest { &a.start } else { &a.end };
                        if let Some(offset) = self.offset(anchor) {
                            if better(offset, &best) {
                                best = Some((child.clone(), offset));
                            }
                        }
                    }
                }
                if let Some((descendant, offset)) = self.extreme_descendant(&child, earliest) {
                    if better(offset, &best) {
                        best = Some((descendant, offset));
                    }
                }
            }
        }
        best
    }

    /// Share the words of each turn out among its utterances by offset.
    ///
    /// Words go to the current utterance until one starts at or after the
    /// next utterance's start.
    pub fn words_by_utterance(&self, turn_layer: &str, utterance_layer: &str, word_layer: &str) -> BTreeMap<AnnotationId, Vec<AnnotationId>> {
        let mut assigned: BTreeMap<AnnotationId, Vec<AnnotationId>> = BTreeMap::new();
        for turn in self.all(turn_layer) {
            let mut utterances = self
                .children_by_anchor(&turn, utterance_layer)
                .into_iter()
                .filter(|u| self.annotation(u).map_or(false, |a| self.offset(&a.start).is_some()));
            let Some(mut current) = utterances.next() else {
                continue;
            };
            let mut next = utterances.next();
            for word in self.children(&turn, word_layer) {
                let Some(w) = self.annotation(&word) else { continue };
                let next_start = next
                    .as_ref()
                    .and_then(|n| self.annotation(n))
                    .and_then(|n| self.offset(&n.start));
                let moves_on = match (self.offset(&w.start), self.offset(&w.end), next_start) {
                    (Some(start), _, Some(boundary)) => start >= boundary,
                    (None, Some(end), Some(boundary)) => end > boundary,
                    _ => false,
                };
                if moves_on {
                    if let Some(n) = next.take() {
                        current = n;
                        next = utterances.next();
                    }
                }
                assigned.entry(current.clone()).or_default().push(word);
            }
        }
        assigned
    }

    /// Descendant (on aligned parent-including layers) with the earliest start.
    pub fn earliest_descendant(&self, id: &AnnotationId) -> Option<AnnotationId> {
        self.extreme_descendant(id, true).map(|(d, _)| d)
    }

    /// Descendant (on aligned parent-including layers) with the latest end.
    pub fn latest_descendant(&self, id: &AnnotationId) -> Option<AnnotationId> {
        self.extreme_descendant(id, false).map(|(d, _)| d)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Offsets
    // ─────────────────────────────────────────────────────────────────────

    /// Compare offsets, treating differences below the granularity as equal.
    pub fn compare_offsets(&self, a: f64, b: f64) -> Ordering {
        if let Some(granularity) = self.offset_granularity {
            if (a - b).abs() < granularity {
                return Ordering::Equal;
            }
        }
        a.partial_cmp(&b).unwrap_or(Ordering::Equal)
    }

    /// Offset, or the greatest known offset reachable backwards through
    /// ending spans.
    pub fn offset_min(&self, anchor: &AnchorId) -> Option<f64> {
        self.offset_bound(anchor, true, &mut HashMap::new())
    }

    /// Offset, or the least known offset reachable forwards through
    /// starting spans.
    pub fn offset_max(&self, anchor: &AnchorId) -> Option<f64> {
        self.offset_bound(anchor, false, &mut HashMap::new())
    }

    fn offset_bound(
        &self,
        anchor: &AnchorId,
        backward: bool,
        memo: &mut HashMap<AnchorId, Option<f64>>,
    ) -> Option<f64> {
        if let Some(offset) = self.offset(anchor) {
            return Some(offset);
        }
        if let Some(known) = memo.get(anchor) {
            return *known;
        }
        // guards against cycles while the value is being computed
        memo.insert(anchor.clone(), None);
        let links = if backward { self.ending_at(anchor) } else { self.starting_at(anchor) };
        let mut bound: Option<f64> = None;
        for id in links {
            let Some(a) = self.annotation(&id) else { continue };
            if a.is_instant() {
                continue;
            }
            let next = if backward { a.start.clone() } else { a.end.clone() };
            if let Some(candidate) = self.offset_bound(&next, backward, memo) {
                bound = Some(match bound {
                    None => candidate,
                    Some(b) if backward => b.max(candidate),
                    Some(b) => b.min(candidate),
                });
            }
        }
        memo.insert(anchor.clone(), bound);
        bound
    }

    /// Every anchor, ordered so that each annotation's start comes before its
    /// end, and otherwise by (estimated) offset and id.
    pub fn anchors_ordered_by_structure(&self) -> Vec<AnchorId> {
        let mut memo = HashMap::new();
        let keys: HashMap<AnchorId, f64> = self
            .anchors
            .keys()
            .map(|id| {
                let key = self.offset_bound(id, true, &mut memo).unwrap_or(f64::NEG_INFINITY);
                (id.clone(), key)
            })
            .collect();
        let mut in_degree: HashMap<&AnchorId, usize> = self.anchors.keys().map(|id| (id, 0)).collect();
        let mut edges: HashMap<&AnchorId, Vec<&AnchorId>> = HashMap::new();
        for a in self.annotations.values() {
            if a.is_destroyed() || a.is_instant() {
                continue;
            }
            if let (Some((start, _)), Some((end, _))) = (
                self.anchors.get_key_value(&a.start),
                self.anchors.get_key_value(&a.end),
            ) {
                edges.entry(start).or_default().push(end);
                if let Some(d) = in_degree.get_mut(end) {
                    *d += 1;
                }
            }
        }
        let mut ready: BinaryHeap<Reverse<Ready>> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| Reverse(Ready::new(keys[*id], (*id).clone())))
            .collect();
        let mut ordered = Vec::with_capacity(self.anchors.len());
        let mut placed = HashSet::new();
        while let Some(Reverse(next)) = ready.pop() {
            if let Some(targets) = edges.get(&next.id) {
                for target in targets {
                    if let Some(d) = in_degree.get_mut(*target) {
                        *d -= 1;
                        if *d == 0 {
                            ready.push(Reverse(Ready::new(keys[*target], (*target).clone())));
                        }
                    }
                }
            }
            placed.insert(next.id.clone());
            ordered.push(next.id);
        }
        if ordered.len() < self.anchors.len() {
            // anchors on a cycle: fall back to offset order
            let mut rest: Vec<Ready> = self
                .anchors
                .keys()
                .filter(|id| !placed.contains(*id))
                .map(|id| Ready::new(keys[id], id.clone()))
                .collect();
            rest.sort();
            ordered.extend(rest.into_iter().map(|r| r.id));
        }
        ordered
    }
}

/// Anchor awaiting placement in structural order.
#[derive(Debug, Clone, PartialEq)]
struct Ready {
    key: f64,
    id: AnchorId,
}

impl Ready {
    fn new(key: f64, id: AnchorId) -> Self {
        Self { key, id }
    }
}

impl Eq for Ready {}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.total_cmp(&other.key).then_with(|| self.id.cmp(&other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Anchor, Confidence, Schema};

    fn sample() -> Graph {
        let mut g = Graph::new("g", Schema::transcript());
        for (id, off) in [("a0", Some(0.0)), ("a1", None), ("a2", Some(2.0)), ("a3", Some(4.0))] {
            g.add_anchor(Anchor::new(id, off, Some(Confidence::MANUAL))).unwrap();
        }
        g.add_annotation(Annotation::new("p", "participant", "ann", "a0", "a3")).unwrap();
        g.add_annotation(Annotation::new("t", "turn", "ann", "a0", "a3").with_parent("p")).unwrap();
        g.add_annotation(Annotation::new("w1", "word", "a", "a0", "a1").with_parent("t")).unwrap();
        g.add_annotation(Annotation::new("w2", "word", "b", "a1", "a2").with_parent("t")).unwrap();
        g.add_annotation(Annotation::new("w3", "word", "c", "a2", "a3").with_parent("t")).unwrap();
        g
    }

    #[test]
    fn test_offset_min_and_max_follow_links() {
        let g = sample();
        assert_eq!(g.offset_min(&"a1".into()), Some(0.0));
        assert_eq!(g.offset_max(&"a1".into()), Some(2.0));
    }

    #[test]
    fn test_structural_order_respects_links() {
        let g = sample();
        let order: Vec<String> = g
            .anchors_ordered_by_structure()
            .into_iter()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(order, vec!["a0", "a1", "a2", "a3"]);
    }

    #[test]
    fn test_includes_and_distance() {
        let g = sample();
        let t = g.annotation(&"t".into()).unwrap();
        let w3 = g.annotation(&"w3".into()).unwrap();
        assert!(g.includes(t, w3));
        assert_eq!(g.distance(t, w3), Some(-2.0));
        assert_eq!(g.max_paired_distance(t, w3), Some(-2.0));
    }

    #[test]
    fn test_hierarchy_queries() {
        let g = sample();
        assert_eq!(g.all("word").len(), 3);
        assert_eq!(g.ancestor_on(&"w2".into(), "participant"), Some("p".into()));
        assert_eq!(g.first_common_ancestor(&"w1".into(), &"w3".into()), Some("t".into()));
        assert_eq!(g.previous(&"w2".into()), Some("w1".into()));
        assert_eq!(g.next(&"w3".into()), None);
        assert_eq!(g.earliest_descendant(&"t".into()), Some("w1".into()));
        assert_eq!(g.latest_descendant(&"p".into()), Some("t".into()));
    }

    #[test]
    fn test_compare_offsets_with_granularity() {
        let g = sample().with_offset_granularity(0.01);
        assert_eq!(g.compare_offsets(1.0, 1.005), Ordering::Equal);
        assert_eq!(g.compare_offsets(1.0, 1.02), Ordering::Less);
    }
}
