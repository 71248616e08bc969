//! Reconciling anchors with the edited graph.
//!
//! Layers are visited bottom-up, parents before leaves, so that by the time
//! a layer is reached the anchors of the layers below it have settled and
//! can be shared. For each paired annotation the start and then the end are
//! checked:
//!
//! - sharing with parallel annotations is made to match the edited graph
//! - the edited offset is taken when it is more trusted, or equally trusted
//!   and different, preferring an already-merged anchor over a new offset
//! - an end left before its start is pulled back when the start is soft
//!
//! Changes that would only raise an anchor's confidence are held back and
//! applied only if the layer saw at least one confident offset change.

use std::collections::BTreeSet;

use super::{anchor_confidence, is_live, Run};
use crate::graph::Graph;
use crate::relink::{change_end_with_related, change_start_with_related};
use crate::types::{AnchorId, Annotation, AnnotationId, Confidence, Layer};

/// A confidence-only change waiting on the rest of the layer.
#[derive(Debug)]
enum Deferred {
    Start {
        original: AnnotationId,
        edited: AnnotationId,
        confidence: Confidence,
    },
    End {
        original: AnnotationId,
        confidence: Confidence,
    },
}

/// State carried across one layer.
#[derive(Debug, Default)]
struct LayerPass {
    confident_changes: bool,
    deferred: Vec<Deferred>,
    last: Option<AnnotationId>,
}

fn start_of(graph: &Graph, id: &AnnotationId) -> Option<AnchorId> {
    graph.annotation(id).map(|a| a.start.clone())
}

fn end_of(graph: &Graph, id: &AnnotationId) -> Option<AnchorId> {
    graph.annotation(id).map(|a| a.end.clone())
}

/// Layers whose boundaries travel with a parallel annotation's layer.
fn related_to(graph: &Graph, layer: &Layer, include_self: bool) -> BTreeSet<String> {
    let mut related: BTreeSet<String> = graph
        .schema()
        .children_of(&layer.id)
        .into_iter()
        .map(|l| l.id.clone())
        .collect();
    related.insert(layer.parent().to_string());
    if include_self {
        related.insert(layer.id.clone());
    }
    related
}

impl Run<'_> {
    /// Phase 4: bring offsets, confidences and anchor sharing in line with
    /// the edited graph.
    pub(super) fn compute_anchor_deltas(&mut self, graph: &mut Graph, layers: &[String]) {
        let schema = self.edited.schema();
        let has_children = |id: &String| !schema.children_of(id).is_empty();
        let order: Vec<String> = layers
            .iter()
            .rev()
            .filter(|l| has_children(*l))
            .chain(layers.iter().rev().filter(|l| !has_children(*l)))
            .cloned()
            .collect();
        for layer_id in order {
            let Some(layer) = graph.schema().layer(&layer_id).cloned() else {
                continue;
            };
            if layer.is_aligned() {
                self.reconcile_layer_anchors(graph, &layer);
            }
        }
        self.processed.clear();
    }

    fn reconcile_layer_anchors(&mut self, graph: &mut Graph, layer: &Layer) {
        let _span = tracing::debug_span!("anchors", layer = %layer.id).entered();
        let edited = self.edited;
        let mut pass = LayerPass::default();
        for edited_id in edited.all(&layer.id) {
            let Some(theirs) = edited.annotation(&edited_id) else {
                continue;
            };
            let Some(ours) = self.original_of(&edited_id).filter(|o| is_live(graph, o)) else {
                continue;
            };
            if start_of(graph, &ours).map_or(false, |s| !self.is_dummy(&s)) {
                self.reconcile_start(graph, layer, &ours, theirs, &mut pass);
            }
            if end_of(graph, &ours).map_or(false, |e| !self.is_dummy(&e)) {
                self.reconcile_end(graph, layer, &ours, theirs, &mut pass);
            }
            self.processed.insert(ours.clone());
            pass.last = Some(ours);
        }
        if pass.confident_changes {
            for change in pass.deferred {
                self.apply_deferred(graph, change);
            }
        }
    }

    fn apply_deferred(&mut self, graph: &mut Graph, change: Deferred) {
        let edited = self.edited;
        match change {
            Deferred::Start {
                original,
                edited: edited_id,
                confidence,
            } => {
                if let Some(theirs) = edited.annotation(&edited_id) {
                    self.relink_start(graph, &original, theirs);
                }
                if let Some(start) = start_of(graph, &original) {
                    tracing::debug!(annotation = %original, %confidence, "Raising start confidence");
                    graph.set_anchor_confidence(&start, Some(confidence));
                }
            }
            Deferred::End { original, confidence } => {
                if let Some(end) = end_of(graph, &original) {
                    tracing::debug!(annotation = %original, %confidence, "Raising end confidence");
                    graph.set_anchor_confidence(&end, Some(confidence));
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Start anchors
    // ─────────────────────────────────────────────────────────────────────

    fn reconcile_start(
        &mut self,
        graph: &mut Graph,
        layer: &Layer,
        ours: &AnnotationId,
        theirs: &Annotation,
        pass: &mut LayerPass,
    ) {
        let edited = self.edited;
        let Some(our_start) = start_of(graph, ours) else {
            return;
        };
        let mut check = true;

        // share with a parallel annotation that has already been reconciled
        let our_confidence = anchor_confidence(graph, &our_start);
        let linked = edited
            .starting_at(&theirs.start)
            .into_iter()
            .filter(|a| a != &theirs.id)
            .filter_map(|a| self.original_of(&a))
            .filter(|a| self.processed.contains(a))
            .filter_map(|a| start_of(graph, &a))
            .find(|anchor| {
                anchor != &our_start
                    && our_confidence <= anchor_confidence(graph, anchor)
                    && (layer.saturated || graph.starting_on(anchor, layer.parent()).is_empty())
            });
        let mut changed = false;
        if let Some(anchor) = linked {
            tracing::debug!(annotation = %ours, anchor = %anchor, "Sharing start with parallel");
            if theirs.is_instant() {
                graph.set_end(ours, &anchor);
            }
            graph.set_start(ours, &anchor);
            changed = true;
        }

        if !changed {
            let parallels: Vec<AnnotationId> = graph
                .starting_at(&our_start)
                .into_iter()
                .filter(|a| a != ours)
                .filter(|a| graph.annotation(a).map_or(false, |a| a.layer_id != layer.id))
                .filter(|a| self.counterparts.has_edited(a))
                .collect();
            for parallel in parallels {
                let Some(their_parallel) = self.edited_of(&parallel).and_then(|e| edited.annotation(&e)) else {
                    continue;
                };
                if theirs.start == their_parallel.start
                    || anchor_confidence(edited, &theirs.start) == Confidence::NONE
                    || anchor_confidence(edited, &their_parallel.start) == Confidence::NONE
                {
                    continue;
                }
                let Some(parallel_layer) = graph.schema().layer(&their_parallel.layer_id).cloned() else {
                    continue;
                };
                let from_parent = layer.parent() == parallel_layer.id && layer.saturated;
                let from_child = parallel_layer.parent() == layer.id && parallel_layer.saturated;
                if from_parent || from_child {
                    if layer.parent() != parallel_layer.id {
                        tracing::debug!(annotation = %ours, parallel = %parallel, "Trusting start of saturated child");
                        check = false;
                        break;
                    }
                    continue;
                }
                let Some(fresh) = graph.copy_anchor(&our_start) else {
                    break;
                };
                tracing::debug!(annotation = %ours, parallel = %parallel, "Unsharing start from parallel");
                if theirs.is_instant() {
                    change_end_with_related(graph, ours, &fresh, &BTreeSet::new());
                }
                let exclude = related_to(graph, &parallel_layer, true);
                change_start_with_related(graph, ours, &fresh, &exclude);
                break;
            }
        }

        if check {
            self.check_start_offset(graph, layer, ours, theirs, pass);
        }
        self.link_to_last(graph, ours, theirs, pass.last.as_ref());
    }

    fn check_start_offset(
        &mut self,
        graph: &mut Graph,
        layer: &Layer,
        ours: &AnnotationId,
        theirs: &Annotation,
        pass: &mut LayerPass,
    ) {
        let edited = self.edited;
        let Some(our_start) = start_of(graph, ours) else {
            return;
        };
        let their_confidence = anchor_confidence(edited, &theirs.start);
        let our_confidence = anchor_confidence(graph, &our_start);
        let different = !self.same_offset(graph, edited.offset(&theirs.start), graph.offset(&our_start));
        let higher = their_confidence > our_confidence;
        let same_or_higher = their_confidence >= our_confidence;
        if different && same_or_higher {
            pass.confident_changes = true;
        }
        if !(self.config.ignore_offset_confidence || higher || (different && same_or_higher)) {
            return;
        }

        if let Some(anchor) = self.matching_start(graph, layer, ours, theirs) {
            let movers: Vec<AnnotationId> = graph
                .starting_at(&our_start)
                .into_iter()
                .filter(|a| a != ours)
                .filter(|a| {
                    let Some(other) = graph.annotation(a) else {
                        return false;
                    };
                    let Some(other_layer) = graph.schema().layer(&other.layer_id) else {
                        return false;
                    };
                    if layer.parent() == other_layer.id || other_layer.parent() == layer.id {
                        return true;
                    }
                    if edited.schema().layer(&other.layer_id).is_none() {
                        return true;
                    }
                    self.edited_of(a)
                        .and_then(|e| edited.annotation(&e))
                        .map_or(false, |e| e.start == theirs.start)
                })
                .collect();
            for mover in movers {
                tracing::debug!(annotation = %mover, anchor = %anchor, "Moving parallel start too");
                if graph.annotation(&mover).map_or(false, Annotation::is_instant) {
                    graph.set_end(&mover, &anchor);
                }
                graph.set_start(&mover, &anchor);
            }
            tracing::debug!(annotation = %ours, anchor = %anchor, "Using merged start anchor");
            graph.set_start(ours, &anchor);
            return;
        }

        if edited.anchor(&theirs.start).is_none() {
            self.relink_start(graph, ours, theirs);
        } else if different {
            self.relink_start(graph, ours, theirs);
            if let Some(start) = start_of(graph, ours) {
                let offset = edited.offset(&theirs.start);
                tracing::debug!(annotation = %ours, ?offset, "Changing start offset");
                graph.set_anchor_confidence(&start, Some(their_confidence));
                graph.set_offset(&start, offset);
            }
        } else {
            pass.deferred.push(Deferred::Start {
                original: ours.clone(),
                edited: theirs.id.clone(),
                confidence: their_confidence,
            });
        }
    }

    /// An anchor already in the original that the edited start corresponds
    /// to: the end of the previous annotation, or the start of a parallel.
    fn matching_start(&self, graph: &Graph, layer: &Layer, ours: &AnnotationId, theirs: &Annotation) -> Option<AnchorId> {
        let edited = self.edited;
        let our_start = start_of(graph, ours)?;
        let their_offset = edited.offset(&theirs.start);
        let previous_end = edited
            .ending_on(&theirs.start, &layer.id)
            .into_iter()
            .filter(|a| a != &theirs.id)
            .filter_map(|a| self.original_of(&a))
            .filter(|previous| {
                !intervening_sibling(graph, previous, ours)
                    && !intervening_parent(graph, previous, ours)
                    && !self.bridged(graph, previous, ours)
            })
            .filter_map(|previous| end_of(graph, &previous))
            .find(|end| self.same_offset(graph, graph.offset(end), their_offset));
        if previous_end.is_some() {
            return previous_end;
        }

        let threshold = anchor_confidence(edited, &theirs.start);
        edited
            .starting_at(&theirs.start)
            .into_iter()
            .filter(|a| a != &theirs.id)
            .filter(|a| edited.annotation(a).map_or(false, |a| a.layer_id != theirs.layer_id))
            .filter_map(|a| self.original_of(&a))
            .filter_map(|a| start_of(graph, &a))
            .filter(|start| start != &our_start)
            .find(|start| {
                let moved = !self.same_offset(graph, graph.offset(start), their_offset);
                !(moved && threshold >= Confidence::AUTOMATIC && anchor_confidence(graph, start) <= threshold)
            })
    }

    /// Detach annotations sharing our start that the edited graph keeps
    /// apart from it.
    fn relink_start(&mut self, graph: &mut Graph, ours: &AnnotationId, theirs: &Annotation) {
        self.unshare_ends(graph, ours, theirs);

        let edited = self.edited;
        let Some(our_start) = start_of(graph, ours) else {
            return;
        };
        let our_parent = graph.annotation(ours).and_then(|a| a.parent.clone());
        let apart: Vec<(AnnotationId, AnchorId)> = graph
            .starting_at(&our_start)
            .into_iter()
            .filter(|a| a != ours && Some(a) != our_parent.as_ref())
            .filter_map(|a| {
                let their_start = self.edited_of(&a).and_then(|e| edited.annotation(&e))?.start.clone();
                (their_start != theirs.start).then_some((a, their_start))
            })
            .collect();
        if apart.is_empty() {
            return;
        }
        let linked = apart.iter().find_map(|(_, their_start)| {
            edited
                .starting_at(their_start)
                .into_iter()
                .filter_map(|e| self.original_of(&e))
                .filter_map(|o| start_of(graph, &o))
                .find(|s| s != &our_start)
        });
        let Some(target) = linked.or_else(|| graph.copy_anchor(&our_start)) else {
            return;
        };
        for (parallel, _) in apart {
            tracing::debug!(annotation = %parallel, anchor = %target, "New start for unlinked parallel");
            graph.set_start(&parallel, &target);
        }
    }

    /// Give annotations ending at our start a different end, when the edited
    /// graph doesn't link them to us.
    fn unshare_ends(&mut self, graph: &mut Graph, ours: &AnnotationId, theirs: &Annotation) {
        let edited = self.edited;
        let Some(our_start) = start_of(graph, ours) else {
            return;
        };
        let apart: Vec<(AnnotationId, AnchorId)> = graph
            .ending_at(&our_start)
            .into_iter()
            .filter(|a| a != ours)
            .filter_map(|a| {
                let their_end = self.edited_of(&a).and_then(|e| edited.annotation(&e))?.end.clone();
                (their_end != theirs.start).then_some((a, their_end))
            })
            .collect();
        if apart.is_empty() {
            return;
        }
        let linked = apart.iter().find_map(|(_, their_end)| {
            edited
                .ending_at(their_end)
                .into_iter()
                .filter_map(|e| self.original_of(&e))
                .filter_map(|o| end_of(graph, &o))
                .find(|e| e != &our_start)
        });
        let Some(target) = linked.or_else(|| graph.copy_anchor(&our_start)) else {
            return;
        };
        for (previous, _) in apart {
            tracing::debug!(annotation = %previous, anchor = %target, "New end for unlinked previous");
            change_end_with_related(graph, &previous, &target, &BTreeSet::new());
        }
    }

    /// Join the previous annotation's end to our start, or split them, as
    /// the edited graph does.
    fn link_to_last(&mut self, graph: &mut Graph, ours: &AnnotationId, theirs: &Annotation, last: Option<&AnnotationId>) {
        let Some(last) = last else {
            return;
        };
        let (Some(last_end), Some(our_start)) = (end_of(graph, last), start_of(graph, ours)) else {
            return;
        };
        if !self.same_offset(graph, graph.offset(&last_end), graph.offset(&our_start)) {
            return;
        }
        let Some(their_last) = self.edited_of(last).and_then(|e| self.edited.annotation(&e)) else {
            return;
        };
        if their_last.end == theirs.start && last_end != our_start {
            let intervening = intervening_sibling(graph, last, ours)
                || intervening_parent_sibling(graph, last, ours)
                || self.bridged(graph, last, ours);
            if !intervening {
                tracing::debug!(last = %last, annotation = %ours, "Sharing anchor with last");
                change_end_with_related(graph, last, &our_start, &BTreeSet::new());
            }
        } else if their_last.end != theirs.start && last_end == our_start {
            tracing::debug!(last = %last, annotation = %ours, "Unsharing anchor with last");
            self.unshare_ends(graph, ours, theirs);
        }
    }

    /// Whether something on a layer the edited graph lacks spans the gap
    /// from `previous`'s end to `ours`'s start.
    fn bridged(&self, graph: &Graph, previous: &AnnotationId, ours: &AnnotationId) -> bool {
        let (Some(previous_end), Some(our_start)) = (end_of(graph, previous), start_of(graph, ours)) else {
            return false;
        };
        graph.ending_at(&our_start).into_iter().any(|a| {
            graph.annotation(&a).map_or(false, |a| {
                a.start == previous_end && self.edited.schema().layer(&a.layer_id).is_none()
            })
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // End anchors
    // ─────────────────────────────────────────────────────────────────────

    fn reconcile_end(
        &mut self,
        graph: &mut Graph,
        layer: &Layer,
        ours: &AnnotationId,
        theirs: &Annotation,
        pass: &mut LayerPass,
    ) {
        let edited = self.edited;
        if theirs.is_instant() {
            if let Some(start) = graph.annotation(ours).filter(|a| !a.is_instant()).map(|a| a.start.clone()) {
                tracing::debug!(annotation = %ours, "Forcing instant");
                graph.set_end(ours, &start);
            }
            return;
        }
        let Some(our_end) = end_of(graph, ours) else {
            return;
        };
        let mut check = true;

        let our_confidence = anchor_confidence(graph, &our_end);
        let linked = edited
            .ending_at(&theirs.end)
            .into_iter()
            .filter(|a| a != &theirs.id)
            .filter_map(|a| self.original_of(&a))
            .filter(|a| self.processed.contains(a))
            .filter_map(|a| end_of(graph, &a))
            .find(|anchor| {
                anchor != &our_end
                    && our_confidence <= anchor_confidence(graph, anchor)
                    && (layer.saturated || graph.ending_on(anchor, layer.parent()).is_empty())
            });
        let mut changed = false;
        if let Some(anchor) = linked {
            tracing::debug!(annotation = %ours, anchor = %anchor, "Sharing end with parallel");
            graph.set_end(ours, &anchor);
            changed = true;
        }

        if !changed && edited.anchor(&theirs.end).is_some() {
            let parallels: Vec<AnnotationId> = graph
                .ending_at(&our_end)
                .into_iter()
                .filter(|a| a != ours)
                .filter(|a| graph.annotation(a).map_or(false, |a| a.layer_id != layer.id))
                .filter(|a| self.counterparts.has_edited(a))
                .collect();
            for parallel in parallels {
                let Some(their_parallel) = self.edited_of(&parallel).and_then(|e| edited.annotation(&e)) else {
                    continue;
                };
                if theirs.end == their_parallel.end {
                    continue;
                }
                let Some(parallel_layer) = graph.schema().layer(&their_parallel.layer_id).cloned() else {
                    continue;
                };
                let from_parent = layer.parent() == parallel_layer.id && layer.saturated;
                let from_child = parallel_layer.parent() == layer.id && parallel_layer.saturated;
                if from_parent || from_child {
                    if layer.parent() != parallel_layer.id {
                        tracing::debug!(annotation = %ours, parallel = %parallel, "Trusting end of saturated child");
                        check = false;
                    }
                    continue;
                }
                let Some(fresh) = graph.copy_anchor(&our_end) else {
                    break;
                };
                tracing::debug!(annotation = %ours, parallel = %parallel, "Unsharing end from parallel");
                let exclude = related_to(graph, &parallel_layer, false);
                change_end_with_related(graph, ours, &fresh, &exclude);
                check = true;
                break;
            }
        }

        if check {
            self.check_end_offset(graph, layer, ours, theirs, pass);
        }
        self.fix_reversed(graph, ours, pass.last.as_ref());
    }

    fn check_end_offset(
        &mut self,
        graph: &mut Graph,
        layer: &Layer,
        ours: &AnnotationId,
        theirs: &Annotation,
        pass: &mut LayerPass,
    ) {
        let edited = self.edited;
        let Some(our_end) = end_of(graph, ours) else {
            return;
        };
        let their_confidence = anchor_confidence(edited, &theirs.end);
        let our_confidence = anchor_confidence(graph, &our_end);
        let their_offset = edited.offset(&theirs.end);
        let different = !self.same_offset(graph, their_offset, graph.offset(&our_end));
        let higher = their_confidence > our_confidence;
        let same_or_higher = their_confidence >= our_confidence;
        if different && same_or_higher {
            pass.confident_changes = true;
        }
        if !(self.config.ignore_offset_confidence || higher || (different && same_or_higher)) {
            return;
        }

        let matching = edited
            .ending_at(&theirs.end)
            .into_iter()
            .filter(|a| a != &theirs.id)
            .filter(|a| edited.annotation(a).map_or(false, |a| a.layer_id != theirs.layer_id))
            .filter_map(|a| self.original_of(&a))
            .filter_map(|a| end_of(graph, &a))
            .filter(|end| end != &our_end)
            .find(|end| {
                self.same_offset(graph, graph.offset(end), their_offset)
                    || their_confidence < Confidence::AUTOMATIC
                    || anchor_confidence(graph, end) > their_confidence
            });
        if let Some(anchor) = matching {
            let movers: Vec<AnnotationId> = graph
                .ending_at(&our_end)
                .into_iter()
                .filter(|a| a != ours)
                .filter(|a| {
                    graph.annotation(a).map_or(false, |other| {
                        other.layer_id != layer.parent()
                            && graph.schema().layer(&other.layer_id).map_or(false, |l| l.parent() == layer.id)
                    })
                })
                .collect();
            for mover in movers {
                tracing::debug!(annotation = %mover, anchor = %anchor, "Moving child end too");
                if graph.annotation(&mover).map_or(false, Annotation::is_instant) {
                    graph.set_start(&mover, &anchor);
                }
                graph.set_end(&mover, &anchor);
            }
            tracing::debug!(annotation = %ours, anchor = %anchor, "Using merged end anchor");
            graph.set_end(ours, &anchor);
            return;
        }

        if edited.anchor(&theirs.end).is_none() {
            return;
        }
        let split_from_following = graph.starting_on(&our_end, &layer.id).into_iter().any(|next| {
            self.edited_of(&next)
                .and_then(|e| edited.annotation(&e))
                .map_or(false, |e| e.start != theirs.end)
        });
        if split_from_following {
            let fresh = graph.create_anchor(their_offset, Some(their_confidence));
            let mut exclude = BTreeSet::new();
            if layer.saturated {
                exclude.insert(layer.id.clone());
            }
            tracing::debug!(annotation = %ours, offset = ?their_offset, "New end anchor");
            change_end_with_related(graph, ours, &fresh, &exclude);
        } else if different {
            tracing::debug!(annotation = %ours, offset = ?their_offset, "Changing end offset");
            graph.set_anchor_confidence(&our_end, Some(their_confidence));
            graph.set_offset(&our_end, their_offset);
        } else {
            pass.deferred.push(Deferred::End {
                original: ours.clone(),
                confidence: their_confidence,
            });
        }
    }

    /// Pull a soft start back before the end it has overtaken.
    fn fix_reversed(&mut self, graph: &mut Graph, ours: &AnnotationId, last: Option<&AnnotationId>) {
        let Some(annotation) = graph.annotation(ours) else {
            return;
        };
        let start = annotation.start.clone();
        let Some((start_offset, end_offset)) = graph.span(annotation) else {
            return;
        };
        if end_offset >= start_offset || anchor_confidence(graph, &start) != Confidence::NONE {
            return;
        }
        let last_start = last
            .and_then(|l| start_of(graph, l))
            .and_then(|s| graph.offset(&s));
        let offset = match last_start {
            Some(previous) => previous + (end_offset - previous) / 2.0,
            None => end_offset - self.config.smidgin,
        };
        tracing::debug!(annotation = %ours, offset, "Reversed anchors; moving soft start before end");
        graph.set_offset(&start, Some(offset));
        graph.set_anchor_confidence(&start, Some(Confidence::NONE));
    }
}

/// Whether a live sibling sits between `previous` and `ours`.
fn intervening_sibling(graph: &Graph, previous: &AnnotationId, ours: &AnnotationId) -> bool {
    match (graph.next(previous), graph.previous(ours)) {
        (Some(after), Some(before)) => after == before,
        _ => false,
    }
}

/// Whether our parent has a live previous sibling that isn't `previous`'s
/// parent.
pub(super) fn intervening_parent(graph: &Graph, previous: &AnnotationId, ours: &AnnotationId) -> bool {
    let previous_parent = graph.annotation(previous).and_then(|a| a.parent.clone());
    let Some(our_parent) = graph.annotation(ours).and_then(|a| a.parent.clone()) else {
        return false;
    };
    if previous_parent.as_ref() == Some(&our_parent) {
        return false;
    }
    match graph.previous(&our_parent) {
        Some(before) => Some(before) != previous_parent,
        None => false,
    }
}

/// Whether a live annotation sits between the two parents.
fn intervening_parent_sibling(graph: &Graph, last: &AnnotationId, ours: &AnnotationId) -> bool {
    let (Some(last_parent), Some(our_parent)) = (
        graph.annotation(last).and_then(|a| a.parent.clone()),
        graph.annotation(ours).and_then(|a| a.parent.clone()),
    ) else {
        return false;
    };
    last_parent != our_parent && intervening_sibling(graph, &last_parent, &our_parent)
}

#[cfg(test)]
mod tests {
    use super::super::tests::words;
    use super::super::Merger;
    use crate::config::MergerConfig;
    use crate::graph::Graph;
    use crate::types::{Anchor, Annotation, Confidence, Schema};

    const M: Confidence = Confidence::MANUAL;
    const A: Confidence = Confidence::AUTOMATIC;

    /// Words sharing anchors end to start.
    fn chain(id: &str, labels: &[&str], offsets: &[f64]) -> Graph {
        let mut g = Graph::new(id, Schema::transcript());
        for (i, off) in offsets.iter().enumerate() {
            g.add_anchor(Anchor::new(format!("a{i}").as_str(), Some(*off), Some(M))).unwrap();
        }
        let last = format!("a{}", offsets.len() - 1);
        g.add_annotation(Annotation::new("p", "participant", "Ana", "a0", last.as_str())).unwrap();
        g.add_annotation(Annotation::new("t", "turn", "Ana", "a0", last.as_str()).with_parent("p")).unwrap();
        for (i, label) in labels.iter().enumerate() {
            g.add_annotation(
                Annotation::new(format!("w{i}"), "word", *label, format!("a{i}"), format!("a{}", i + 1)).with_parent("t"),
            )
            .unwrap();
        }
        g.commit();
        g
    }

    #[test]
    fn test_words_split_apart_when_edited_apart() {
        let mut original = chain("o", &["x", "y"], &[0.0, 1.0, 2.0]);
        let mut edited = chain("e", &["x", "y"], &[0.0, 1.0, 2.0]);
        edited.add_anchor(Anchor::new("b1", Some(1.2), Some(M))).unwrap();
        edited.set_start(&"w1".into(), &"b1".into());
        Merger::default().merge(&mut original, &edited).unwrap();

        let x = original.annotation(&"w0".into()).unwrap().clone();
        let y = original.annotation(&"w1".into()).unwrap().clone();
        assert_ne!(x.end, y.start);
        assert_eq!(original.offset(&x.end), Some(1.0));
        assert_eq!(original.offset(&y.start), Some(1.2));
    }

    #[test]
    fn test_ignore_offset_confidence() {
        let mut original = words("o", &[("so", 2.0, 3.0, M, M), ("fast", 3.0, 4.0, M, M)]);
        let mut edited = words("e", &[("so", 2.0, 3.0, M, M), ("fast", 3.0, 4.0, M, M)]);
        edited.set_offset(&"w1s".into(), Some(3.5));
        edited.set_anchor_confidence(&"w1s".into(), Some(A));
        let mut merger = Merger::new(MergerConfig::default().with_ignore_offset_confidence(true));
        merger.merge(&mut original, &edited).unwrap();
        let fast = original.annotation(&"w1".into()).unwrap();
        assert_eq!(original.offset(&fast.start), Some(3.5));
        assert_eq!(original.anchor(&fast.start).unwrap().confidence, Some(A));
    }

    #[test]
    fn test_confidence_only_changes_need_a_confident_move() {
        let mut original = words("o", &[("a", 0.0, 1.0, A, M)]);
        let edited = words("e", &[("a", 0.0, 1.0, M, M)]);
        Merger::default().merge(&mut original, &edited).unwrap();
        assert_eq!(original.anchor(&"w0s".into()).unwrap().confidence, Some(A));
        assert_eq!(original.anchor(&"w0e".into()).unwrap().confidence, Some(A));
    }

    #[test]
    fn test_confidence_only_changes_follow_a_confident_move() {
        let mut original = words("o", &[("a", 0.0, 1.0, A, M)]);
        let mut edited = words("e", &[("a", 0.0, 1.0, M, M)]);
        // the turn ends with its last word, so both move
        edited.set_offset(&"w0e".into(), Some(1.5));
        edited.set_offset(&"t1".into(), Some(1.5));
        Merger::default().merge(&mut original, &edited).unwrap();
        assert_eq!(original.offset(&"w0e".into()), Some(1.5));
        assert_eq!(original.offset(&"t1".into()), Some(1.5));
        assert_eq!(original.anchor(&"w0e".into()).unwrap().confidence, Some(M));
        assert_eq!(original.anchor(&"w0s".into()).unwrap().confidence, Some(M));
    }

    #[test]
    fn test_edited_instant_replaces_interval() {
        let mut original = chain("o", &["uh"], &[0.0, 1.0]);
        let mut edited = chain("e", &["uh"], &[0.0, 1.0]);
        edited.set_end(&"w0".into(), &"a0".into());
        Merger::default().merge(&mut original, &edited).unwrap();

        // an instant never pairs with an interval, so the word is replaced
        assert!(original.annotation(&"w0".into()).unwrap().is_destroyed());
        let live = original.all("word");
        assert_eq!(live.len(), 1);
        let uh = original.annotation(&live[0]).unwrap();
        assert_eq!(uh.label, "uh");
        assert!(uh.is_instant());
        assert_eq!(original.offset(&uh.start), Some(0.0));
        assert_eq!(uh.parent, Some("t".into()));
    }
}
