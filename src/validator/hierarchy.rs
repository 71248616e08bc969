//! Vertical hierarchy validation.
//!
//! Layers are visited bottom-up (aligned layers before tags), and for every
//! parent the children on the layer are checked in ordinal order:
//!
//! - layers without peers keep only their first child
//! - ordinals follow anchor order
//! - siblings that mustn't overlap are pulled apart, by narrowing one or
//!   both of them or, when descendants are in the way, by teasing them
//!   apart around a fresh midpoint
//! - children of saturated layers share anchors end to start, and the first
//!   and last share the parent's bounds
//! - parents are widened to include their children, and tags share their
//!   parent's anchors
//! - annotations on instant layers have zero duration

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

use super::Validator;
use crate::graph::Graph;
use crate::relink::{change_end_with_related, change_start_with_related};
use crate::types::{
    default_peer_order, Alignment, AnchorId, AnnotationId, Change, Confidence, Layer, LayerOrder, Schema,
};

/// Layers in the order hierarchy validation visits them: children before
/// parents, aligned layers before tags.
pub fn hierarchy_order(schema: &Schema) -> Vec<String> {
    let bottom_up = schema.traverse_by(LayerOrder::BottomUp, |s, a, b| default_peer_order(s, a, b).reverse());
    let (aligned, tags): (Vec<&Layer>, Vec<&Layer>) = bottom_up.into_iter().partition(|l| l.is_aligned());
    aligned
        .into_iter()
        .chain(tags)
        .filter(|l| !schema.is_top_level(&l.id))
        .map(|l| l.id.clone())
        .collect()
}

fn set_default_offset(graph: &mut Graph, anchor: &AnchorId, offset: f64) {
    graph.set_offset(anchor, Some(offset));
    graph.set_anchor_confidence(anchor, Some(Confidence::DEFAULT));
}

fn excluding(layers: &[&str]) -> BTreeSet<String> {
    layers.iter().map(|l| l.to_string()).collect()
}

impl Validator {
    /// Check every non-top-level layer against its parent layer.
    pub(crate) fn validate_hierarchy(&mut self, graph: &mut Graph) {
        let _span = tracing::debug_span!("hierarchy").entered();
        for layer_id in hierarchy_order(graph.schema()) {
            self.validate_layer(graph, &layer_id);
        }
    }

    /// Check the children on one layer against their parents.
    ///
    /// Unless full validation is configured, layers with no pending change
    /// are skipped.
    pub(crate) fn validate_layer(&mut self, graph: &mut Graph, layer_id: &str) {
        let Some(layer) = graph.schema().layer(layer_id).cloned() else {
            return;
        };
        if layer.parent_id.is_none() || graph.schema().is_top_level(layer_id) {
            return;
        }
        let changed = graph
            .layer_ids(layer_id)
            .iter()
            .any(|id| graph.annotation(id).map_or(false, |a| a.change != Change::NoChange));
        if !self.config().full_validation && !changed {
            return;
        }
        tracing::debug!(layer = layer_id, "Validating layer");
        let parents = graph.all(layer.parent());

        if !layer.peers {
            for parent in &parents {
                for extra in graph.children(parent, layer_id).into_iter().skip(1) {
                    tracing::debug!(annotation = %extra, "Deleting extra child");
                    graph.destroy(&extra);
                }
            }
        }
        if layer.peers && layer.is_aligned() && layer.parent_includes {
            for parent in &parents {
                for (i, child) in graph.children_by_anchor(parent, layer_id).iter().enumerate() {
                    graph.set_ordinal(child, i as u32 + 1);
                }
            }
        }
        for parent in &parents {
            if graph.annotation(parent).map_or(true, |p| p.is_destroyed()) {
                continue;
            }
            self.validate_children(graph, &layer, parent);
        }
        if layer.alignment == Alignment::Instant {
            for id in graph.all(layer_id) {
                let Some(start) = graph.annotation(&id).map(|a| a.start.clone()) else {
                    continue;
                };
                if graph.set_end(&id, &start) {
                    tracing::debug!(annotation = %id, "Forced instant");
                }
            }
        }
    }

    fn validate_children(&mut self, graph: &mut Graph, layer: &Layer, parent_id: &AnnotationId) {
        let sequential = !layer.peers_overlap && layer.is_aligned();
        let mut last_offset = 0.0;
        let mut last_child: Option<AnnotationId> = None;
        let mut last_anchored: Option<AnnotationId> = None;

        for child_id in graph.children(parent_id, &layer.id) {
            match graph.annotation(&child_id) {
                Some(c) if !c.is_destroyed() && c.parent.as_ref() == Some(parent_id) => {}
                _ => continue,
            }
            if sequential {
                self.split_shared_start(graph, &child_id);
                let start = graph.annotation(&child_id).and_then(|c| graph.offset(&c.start));
                if let Some(start) = start {
                    if graph.compare_offsets(start, last_offset) == Ordering::Less {
                        match &last_anchored {
                            None => self.error(format!(
                                "CANNOT CORRECT SEQUENTIALITY OF {} last offset: {last_offset}",
                                describe(graph, &child_id)
                            )),
                            Some(previous) => {
                                self.resolve_overlap(graph, layer, previous, &child_id, last_offset);
                            }
                        }
                    } else if layer.saturated {
                        self.close_gap_before(graph, layer, parent_id, last_child.as_ref(), &child_id);
                    }
                }
                if let Some(end) = graph.annotation(&child_id).and_then(|c| graph.offset(&c.end)) {
                    last_offset = end;
                }
            }
            if layer.parent_includes {
                self.include_child(graph, layer, parent_id, &child_id);
            }
            if graph.annotation(&child_id).map_or(false, |c| graph.is_anchored(c)) {
                last_anchored = Some(child_id.clone());
            }
            last_child = Some(child_id);
        }

        if layer.saturated {
            if let Some(last) = last_child {
                self.close_gap_after(graph, parent_id, &last);
            }
        }
    }

    /// Give `child` its own start anchor if a same-layer annotation shares it.
    fn split_shared_start(&mut self, graph: &mut Graph, child_id: &AnnotationId) {
        let Some(child) = graph.annotation(child_id).cloned() else {
            return;
        };
        let shared = graph
            .starting_on(&child.start, &child.layer_id)
            .into_iter()
            .any(|other| &other != child_id);
        if !shared {
            return;
        }
        if let Some(copy) = graph.copy_anchor(&child.start) {
            tracing::debug!(annotation = %child_id, anchor = %copy, "Split start anchor");
            change_start_with_related(graph, child_id, &copy, &BTreeSet::new());
        }
    }

    fn resolve_overlap(
        &mut self,
        graph: &mut Graph,
        layer: &Layer,
        previous_id: &AnnotationId,
        child_id: &AnnotationId,
        last_offset: f64,
    ) {
        let (Some(previous), Some(child)) = (graph.annotation(previous_id).cloned(), graph.annotation(child_id).cloned()) else {
            return;
        };
        let (Some(previous_start), Some(child_start)) = (graph.offset(&previous.start), graph.offset(&child.start)) else {
            return;
        };
        let mut midpoint = child_start + (last_offset - child_start) / 2.0;
        if midpoint <= previous_start {
            midpoint = previous_start + (last_offset - previous_start) / 2.0;
        }
        let earliest = graph
            .earliest_descendant(child_id)
            .and_then(|d| graph.annotation(&d))
            .and_then(|d| graph.offset(&d.start));
        let latest = graph
            .latest_descendant(previous_id)
            .and_then(|d| graph.annotation(&d))
            .and_then(|d| graph.offset(&d.end));

        let blocks_both = earliest.map_or(false, |e| e < midpoint) || latest.map_or(false, |l| l > midpoint);
        if !blocks_both {
            tracing::debug!(first = %previous_id, second = %child_id, midpoint, "Overlap: narrowed both");
            if layer.saturated {
                change_start_with_related(graph, child_id, &previous.end, &BTreeSet::new());
                set_default_offset(graph, &previous.end, midpoint);
            } else {
                set_default_offset(graph, &previous.end, midpoint);
                set_default_offset(graph, &child.start, midpoint);
            }
            if let Some(child) = graph.annotation(child_id).cloned() {
                let collapsed = match (graph.offset(&child.start), graph.offset(&child.end)) {
                    (Some(s), Some(e)) => e <= s,
                    _ => true,
                };
                if collapsed {
                    set_default_offset(graph, &child.end, last_offset);
                }
            }
            return;
        }

        let previous_end = graph.offset(&previous.end);
        let child_end = graph.offset(&child.end);
        let blocks_second = match (earliest, previous_end) {
            (Some(e), Some(p)) => e < p,
            _ => false,
        };
        if !blocks_second {
            if let (Some(p), Some(c)) = (previous_end, child_end) {
                if p < c {
                    tracing::debug!(first = %previous_id, second = %child_id, "Overlap: narrowed second");
                    if layer.saturated {
                        change_start_with_related(graph, child_id, &previous.end, &BTreeSet::new());
                    } else {
                        set_default_offset(graph, &child.start, p);
                    }
                    return;
                }
            }
        }

        let blocks_first = latest.map_or(false, |l| l > child_start);
        if !blocks_first && child_start > previous_start {
            tracing::debug!(first = %previous_id, second = %child_id, "Overlap: narrowed first");
            if layer.saturated {
                change_end_with_related(graph, previous_id, &child.start, &BTreeSet::new());
            } else {
                set_default_offset(graph, &previous.end, child_start);
            }
            return;
        }

        tracing::debug!(first = %previous_id, second = %child_id, "Overlap: teasing apart");
        if let Err(reason) = tease_apart(graph, previous_id, child_id, layer.saturated) {
            self.error(format!(
                "Overlapping annotations: {} and {} (CANNOT CORRECT: {reason})",
                describe(graph, previous_id),
                describe(graph, child_id)
            ));
        }
    }

    /// Saturated layers: the first child starts with its parent, later
    /// children start where the previous one ends.
    fn close_gap_before(
        &mut self,
        graph: &mut Graph,
        layer: &Layer,
        parent_id: &AnnotationId,
        last_child: Option<&AnnotationId>,
        child_id: &AnnotationId,
    ) {
        let (Some(parent), Some(child)) = (graph.annotation(parent_id).cloned(), graph.annotation(child_id).cloned()) else {
            return;
        };
        match last_child {
            None => {
                let later = match (graph.offset(&parent.start), graph.offset(&child.start)) {
                    (None, _) => true,
                    (Some(p), Some(c)) => graph.compare_offsets(c, p) == Ordering::Greater,
                    (Some(_), None) => false,
                };
                if later {
                    let mut exclude = excluding(&[&parent.layer_id]);
                    if layer.peers_overlap {
                        exclude.insert(layer.id.clone());
                    }
                    tracing::debug!(parent = %parent_id, child = %child_id, "Narrowed parent to remove gap before first child");
                    change_start_with_related(graph, parent_id, &child.start, &exclude);
                } else if child.start != parent.start {
                    tracing::debug!(parent = %parent_id, child = %child_id, "First child shares parent start");
                    change_start_with_related(graph, child_id, &parent.start, &BTreeSet::new());
                }
            }
            Some(previous_id) => {
                let Some(previous) = graph.annotation(previous_id) else {
                    return;
                };
                if previous.end != child.start {
                    tracing::debug!(previous = %previous_id, child = %child_id, "Widened to close gap");
                    change_end_with_related(graph, previous_id, &child.start, &excluding(&[&layer.id]));
                }
            }
        }
    }

    /// Saturated layers: the parent ends with its last child.
    fn close_gap_after(&mut self, graph: &mut Graph, parent_id: &AnnotationId, last_id: &AnnotationId) {
        let (Some(parent), Some(last)) = (graph.annotation(parent_id).cloned(), graph.annotation(last_id).cloned()) else {
            return;
        };
        let Some(last_end) = graph.offset(&last.end) else {
            return;
        };
        let narrow = graph
            .offset(&parent.end)
            .map_or(true, |p| graph.compare_offsets(p, last_end) == Ordering::Greater);
        if narrow {
            tracing::debug!(parent = %parent_id, child = %last_id, "Narrowed parent to close gap after last child");
            let following = graph.starting_on(&parent.end, &parent.layer_id);
            change_end_with_related(graph, parent_id, &last.end, &excluding(&[&last.layer_id]));
            for next in following {
                change_start_with_related(graph, &next, &last.end, &BTreeSet::new());
            }
        } else if parent.end != last.end {
            tracing::debug!(parent = %parent_id, child = %last_id, "Last child shares parent end");
            graph.set_end(last_id, &parent.end);
        }
    }

    /// Make the parent include the child (tags simply share its anchors).
    fn include_child(&mut self, graph: &mut Graph, layer: &Layer, parent_id: &AnnotationId, child_id: &AnnotationId) {
        let (Some(parent), Some(child)) = (graph.annotation(parent_id).cloned(), graph.annotation(child_id).cloned()) else {
            return;
        };
        if !layer.is_aligned() {
            if child.start != parent.start {
                graph.set_start(child_id, &parent.start);
            }
            if child.end != parent.end {
                graph.set_end(child_id, &parent.end);
            }
            return;
        }
        let exclude = if layer.peers_overlap { BTreeSet::new() } else { excluding(&[&layer.id]) };

        // a parent bound cleared by reversed-anchor correction takes the child's offset
        if graph.offset(&parent.start).is_none() {
            adopt_offset(graph, &parent.start, &child.start);
        }
        if graph.offset(&parent.end).is_none() {
            adopt_offset(graph, &parent.end, &child.end);
        }
        if let (Some(p), Some(c)) = (graph.offset(&parent.start), graph.offset(&child.start)) {
            if graph.compare_offsets(p, c) == Ordering::Greater {
                let anchor = if layer.saturated { Some(child.start.clone()) } else { graph.copy_anchor(&child.start) };
                if let Some(anchor) = anchor {
                    tracing::debug!(parent = %parent_id, child = %child_id, offset = c, "Widened parent start");
                    change_start_with_related(graph, parent_id, &anchor, &exclude);
                }
            }
        }
        let parent_end = graph.annotation(parent_id).and_then(|p| graph.offset(&p.end));
        if let (Some(p), Some(c)) = (parent_end, graph.offset(&child.end)) {
            if graph.compare_offsets(p, c) == Ordering::Less {
                let anchor = if layer.saturated { Some(child.end.clone()) } else { graph.copy_anchor(&child.end) };
                if let Some(anchor) = anchor {
                    tracing::debug!(parent = %parent_id, child = %child_id, offset = c, "Widened parent end");
                    change_end_with_related(graph, parent_id, &anchor, &exclude);
                }
            }
        }
    }
}

fn adopt_offset(graph: &mut Graph, bound: &AnchorId, from: &AnchorId) {
    let Some((offset, confidence)) = graph.anchor(from).and_then(|a| a.offset.map(|o| (o, a.confidence))) else {
        return;
    };
    tracing::debug!(anchor = %bound, offset, "Parent bound takes child offset");
    graph.set_offset(bound, Some(offset));
    graph.set_anchor_confidence(bound, confidence);
}

fn describe(graph: &Graph, id: &AnnotationId) -> String {
    graph.annotation(id).map_or_else(|| id.to_string(), |a| a.to_string())
}

/// Separate two overlapping siblings whose descendants prevent simply
/// narrowing either of them.
///
/// The four boundary offsets are sorted; the first annotation keeps the
/// earliest and the second the latest, and they meet halfway between the
/// inner two, at one shared new anchor when `share` is set or two new
/// anchors otherwise. Annotations that shared a boundary anchor move with
/// it. Descendant anchors left outside their ancestor are cleared for offset
/// generation, and saturated descendants are re-tied to their parent's
/// bounds.
pub fn tease_apart(graph: &mut Graph, first_id: &AnnotationId, last_id: &AnnotationId, share: bool) -> Result<(), String> {
    let first = graph.annotation(first_id).cloned().ok_or("first annotation missing")?;
    let last = graph.annotation(last_id).cloned().ok_or("second annotation missing")?;
    let offset = |g: &Graph, a: &AnchorId| g.offset(a).ok_or_else(|| format!("anchor {a} has no offset"));
    let first_start = offset(graph, &first.start)?;

    let mut bystanders: HashSet<AnnotationId> = graph.ancestors(first_id).into_iter().collect();
    bystanders.extend(graph.ancestors(last_id));
    bystanders.insert(first_id.clone());
    bystanders.insert(last_id.clone());
    let parallel = |ids: Vec<AnnotationId>| -> Vec<AnnotationId> {
        ids.into_iter().filter(|id| !bystanders.contains(id)).collect()
    };
    let start_first = parallel(graph.starting_at(&first.start));
    let end_first = parallel(graph.ending_at(&first.end));
    let start_last = parallel(graph.starting_at(&last.start));
    let end_last = parallel(graph.ending_at(&last.end));

    let mut bounds = vec![first.start.clone(), first.end.clone()];
    bounds.push(match graph.offset(&last.start) {
        Some(o) if o >= first_start => last.start.clone(),
        _ => first.start.clone(),
    });
    bounds.push(match graph.offset(&last.end) {
        Some(o) if o >= first_start => last.end.clone(),
        _ => first.end.clone(),
    });
    let mut sorted = Vec::with_capacity(4);
    for anchor in bounds {
        sorted.push((offset(graph, &anchor)?, anchor));
    }
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    let (almost_earliest, almost_latest) = (sorted[1].0, sorted[2].0);
    let earliest = graph.copy_anchor(&sorted[0].1).ok_or("earliest anchor missing")?;
    let latest = graph.copy_anchor(&sorted[3].1).ok_or("latest anchor missing")?;
    let midpoint = almost_earliest + (almost_latest - almost_earliest) / 2.0;
    let middle_first = graph.create_anchor(Some(midpoint), Some(Confidence::DEFAULT));
    let middle_last = if share {
        middle_first.clone()
    } else {
        graph.create_anchor(Some(midpoint), Some(Confidence::DEFAULT))
    };

    let none = BTreeSet::new();
    change_start_with_related(graph, first_id, &earliest, &none);
    move_all(graph, &start_first, &earliest, true);
    change_end_with_related(graph, first_id, &middle_first, &none);
    move_all(graph, &end_first, &middle_first, false);
    change_start_with_related(graph, last_id, &middle_last, &none);
    move_all(graph, &start_last, &middle_last, true);
    change_end_with_related(graph, last_id, &latest, &none);
    move_all(graph, &end_last, &latest, false);
    tracing::debug!(first = %first_id, second = %last_id, midpoint, "Teased apart");

    let lower = graph.offset(&earliest).unwrap_or(sorted[0].0);
    let upper = graph.offset(&latest).unwrap_or(sorted[3].0);
    reset_descendants_outside(graph, first_id, lower, midpoint);
    reset_descendants_outside(graph, last_id, midpoint, upper);
    Ok(())
}

fn move_all(graph: &mut Graph, ids: &[AnnotationId], anchor: &AnchorId, start: bool) {
    for id in ids {
        let instant = graph.annotation(id).map_or(false, |a| a.is_instant());
        if start || instant {
            graph.set_start(id, anchor);
        }
        if !start || instant {
            graph.set_end(id, anchor);
        }
    }
}

/// Clear descendant anchors lying outside `[lower, upper]` and re-tie
/// saturated child layers to the parent's bounds.
fn reset_descendants_outside(graph: &mut Graph, parent_id: &AnnotationId, lower: f64, upper: f64) {
    let Some(parent) = graph.annotation(parent_id).cloned() else {
        return;
    };
    let layers: Vec<Layer> = graph
        .schema()
        .children_of(&parent.layer_id)
        .into_iter()
        .filter(|l| l.is_aligned() && l.parent_includes)
        .cloned()
        .collect();
    for layer in layers {
        let children = graph.children(parent_id, &layer.id);
        for child_id in &children {
            let Some(child) = graph.annotation(child_id).cloned() else { continue };
            for anchor in [&child.start, &child.end] {
                if *anchor == parent.start || *anchor == parent.end {
                    continue;
                }
                let outside = graph.offset(anchor).map_or(false, |o| {
                    graph.compare_offsets(o, lower) == Ordering::Less
                        || graph.compare_offsets(o, upper) == Ordering::Greater
                });
                if outside {
                    tracing::debug!(anchor = %anchor, "Resetting anchor outside teased parent");
                    graph.set_offset(anchor, None);
                    graph.set_anchor_confidence(anchor, Some(Confidence::NONE));
                }
            }
            reset_descendants_outside(graph, child_id, lower, upper);
        }
        if layer.saturated {
            if let Some(first) = children.first() {
                graph.set_start(first, &parent.start);
            }
            if let Some(last) = children.last() {
                graph.set_end(last, &parent.end);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Anchor, Annotation};

    fn graph(anchors: &[(&str, f64)]) -> Graph {
        let mut g = Graph::new("g", Schema::transcript());
        for (id, off) in anchors {
            g.add_anchor(Anchor::new(*id, Some(*off), Some(Confidence::MANUAL))).unwrap();
        }
        g
    }

    #[test]
    fn test_order_is_bottom_up_aligned_first() {
        let schema = Schema::transcript().with_layer(Layer::new("pos", "word"));
        let order = hierarchy_order(&schema);
        let pos = |id: &str| order.iter().position(|l| l == id).unwrap();
        assert!(pos("word") < pos("turn"));
        assert!(pos("utterance") < pos("turn"));
        assert_eq!(order.last().map(String::as_str), Some("pos"));
        assert!(!order.contains(&"participant".to_string()));
    }

    #[test]
    fn test_ordinals_follow_anchor_order() {
        let mut g = graph(&[("a0", 0.0), ("a1", 1.0), ("a2", 2.0)]);
        g.add_annotation(Annotation::new("p", "participant", "", "a0", "a2")).unwrap();
        g.add_annotation(Annotation::new("t", "turn", "", "a0", "a2").with_parent("p")).unwrap();
        g.add_annotation(Annotation::new("late", "word", "", "a1", "a2").with_parent("t")).unwrap();
        g.add_annotation(Annotation::new("early", "word", "", "a0", "a1").with_parent("t")).unwrap();
        let mut validator = Validator::default();
        validator.validate_hierarchy(&mut g);
        assert_eq!(g.annotation(&"early".into()).unwrap().ordinal, 1);
        assert_eq!(g.annotation(&"late".into()).unwrap().ordinal, 2);
    }

    #[test]
    fn test_parent_widened_to_include_child() {
        let mut g = graph(&[("a0", 0.0), ("a1", 1.0), ("a2", 2.0), ("a3", 3.0)]);
        g.add_annotation(Annotation::new("p", "participant", "", "a0", "a3")).unwrap();
        g.add_annotation(Annotation::new("t", "turn", "", "a0", "a2").with_parent("p")).unwrap();
        g.add_annotation(Annotation::new("w", "word", "", "a1", "a3").with_parent("t")).unwrap();
        Validator::default().validate_hierarchy(&mut g);
        let t = g.annotation(&"t".into()).unwrap().clone();
        assert_eq!(g.offset(&t.end), Some(3.0));
        // a copy, so the word keeps its own anchor
        assert_ne!(t.end, AnchorId::from("a3"));
    }

    #[test]
    fn test_cleared_parent_end_takes_child_end() {
        let mut g = graph(&[("t0", 0.0), ("w0s", 0.0), ("w0e", 1.6), ("w1s", 1.6), ("w1e", 1.7)]);
        g.add_anchor(Anchor::new("t1", None, Some(Confidence::NONE))).unwrap();
        g.add_annotation(Annotation::new("p", "participant", "", "t0", "t1")).unwrap();
        g.add_annotation(Annotation::new("t", "turn", "", "t0", "t1").with_parent("p")).unwrap();
        g.add_annotation(Annotation::new("w0", "word", "", "w0s", "w0e").with_parent("t")).unwrap();
        g.add_annotation(Annotation::new("w1", "word", "", "w1s", "w1e").with_parent("t")).unwrap();
        Validator::default().validate_hierarchy(&mut g);

        let t = g.annotation(&"t".into()).unwrap().clone();
        let p = g.annotation(&"p".into()).unwrap().clone();
        assert_eq!(g.offset(&t.end), Some(1.7));
        assert_eq!(g.offset(&p.end), Some(1.7));
        assert_eq!(g.anchor(&t.end).unwrap().confidence, Some(Confidence::MANUAL));
    }

    #[test]
    fn test_overlapping_words_narrowed_to_midpoint() {
        let mut g = graph(&[("a0", 0.0), ("a1", 1.0), ("a2", 2.0), ("a3", 3.0), ("a4", 4.0)]);
        g.add_annotation(Annotation::new("p", "participant", "", "a0", "a4")).unwrap();
        g.add_annotation(Annotation::new("t", "turn", "", "a0", "a4").with_parent("p")).unwrap();
        g.add_annotation(Annotation::new("w1", "word", "", "a0", "a2").with_parent("t")).unwrap();
        g.add_annotation(Annotation::new("w2", "word", "", "a1", "a4").with_parent("t")).unwrap();
        Validator::default().validate_hierarchy(&mut g);
        assert_eq!(g.offset(&"a2".into()), Some(1.5));
        assert_eq!(g.offset(&"a1".into()), Some(1.5));
        assert_eq!(g.anchor(&"a1".into()).unwrap().confidence, Some(Confidence::DEFAULT));
    }

    #[test]
    fn test_saturated_children_share_boundaries() {
        let mut g = graph(&[("a0", 0.0), ("a1", 1.0), ("b1", 1.5), ("a2", 2.0)]);
        g.add_annotation(Annotation::new("p", "participant", "", "a0", "a2")).unwrap();
        g.add_annotation(Annotation::new("t", "turn", "", "a0", "a2").with_parent("p")).unwrap();
        g.add_annotation(Annotation::new("u1", "utterance", "", "a0", "a1").with_parent("t")).unwrap();
        g.add_annotation(Annotation::new("u2", "utterance", "", "b1", "a2").with_parent("t")).unwrap();
        Validator::default().validate_hierarchy(&mut g);
        let u1 = g.annotation(&"u1".into()).unwrap();
        let u2 = g.annotation(&"u2".into()).unwrap();
        assert_eq!(u1.end, u2.start);
        assert_eq!(u2.end, AnchorId::from("a2"));
    }

    #[test]
    fn test_tease_apart_overlapping_turns() {
        let mut g = graph(&[("a0", 0.0), ("a2", 2.0), ("a4", 4.0), ("a6", 6.0), ("a7", 7.0), ("a10", 10.0)]);
        g.add_annotation(Annotation::new("p", "participant", "", "a0", "a10")).unwrap();
        g.add_annotation(Annotation::new("t1", "turn", "", "a0", "a6").with_parent("p")).unwrap();
        g.add_annotation(Annotation::new("t2", "turn", "", "a4", "a10").with_parent("p")).unwrap();
        g.add_annotation(Annotation::new("w1", "word", "", "a0", "a2").with_parent("t1")).unwrap();
        g.add_annotation(Annotation::new("w2", "word", "", "a2", "a6").with_parent("t1")).unwrap();
        g.add_annotation(Annotation::new("w3", "word", "", "a4", "a7").with_parent("t2")).unwrap();
        g.add_annotation(Annotation::new("w4", "word", "", "a7", "a10").with_parent("t2")).unwrap();
        Validator::default().validate_hierarchy(&mut g);

        let t1 = g.annotation(&"t1".into()).unwrap().clone();
        let t2 = g.annotation(&"t2".into()).unwrap().clone();
        assert_eq!(g.offset(&t1.end), Some(5.0));
        assert_eq!(g.offset(&t2.start), Some(5.0));
        assert_eq!(g.anchor(&t1.end).unwrap().confidence, Some(Confidence::DEFAULT));
        assert_eq!(g.offset(&t1.start), Some(0.0));
        assert_eq!(g.offset(&t2.end), Some(10.0));
        // words on the old boundaries follow the turns
        assert_eq!(g.annotation(&"w2".into()).unwrap().end, t1.end);
        assert_eq!(g.annotation(&"w3".into()).unwrap().start, t2.start);
    }
}
