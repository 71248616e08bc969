//! Default offset generation.
//!
//! Anchors whose offset is missing, or whose confidence is at or below the
//! configured threshold, are given offsets by linear interpolation between
//! the nearest trustworthy anchors along their chains.
//!
//! ## Passes
//!
//! 1. **Priming** (needs turn, utterance and word layers): the words of each
//!    turn are shared out among its utterances, and each utterance's anchor
//!    sequence is spread evenly between the utterance bounds.
//! 2. **General**: every remaining anchor that needs an offset is chained
//!    backward and forward to bounding anchors, widened to the parent's
//!    bounds when the chain runs out at a first or last child, and
//!    interpolated.
//! 3. Any linked anchor still without an offset is a fatal error.
//!
//! Anchors given an offset in this run bound later chains, so one pass never
//! drifts values set by an earlier one.

use std::collections::HashSet;

use crate::chain::{chain_backward, chain_forward};
use crate::config::OffsetGeneratorConfig;
use crate::graph::Graph;
use crate::transform::{GraphTransformer, TransformError};
use crate::types::{AnchorId, Annotation, Confidence};

/// One element of an interpolation sequence.
#[derive(Debug, Clone, PartialEq)]
enum Slot {
    /// A graph anchor.
    Anchor(AnchorId),
    /// An immovable bound that isn't part of the graph.
    Sentinel(f64),
}

/// Fills in missing or untrusted anchor offsets.
#[derive(Debug, Clone, Default)]
pub struct DefaultOffsetGenerator {
    config: OffsetGeneratorConfig,
    errors: Vec<String>,
    generated: HashSet<AnchorId>,
}

impl DefaultOffsetGenerator {
    /// Create a generator.
    pub fn new(config: OffsetGeneratorConfig) -> Self {
        Self {
            config,
            errors: Vec::new(),
            generated: HashSet::new(),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &OffsetGeneratorConfig {
        &self.config
    }

    fn confidence(&self, graph: &Graph, anchor: &AnchorId) -> Confidence {
        graph
            .anchor(anchor)
            .map_or(self.config.default_anchor_confidence, |a| {
                a.confidence_or(self.config.default_anchor_confidence)
            })
    }

    /// Whether the anchor's offset can be relied on as is.
    fn is_set(&self, graph: &Graph, anchor: &AnchorId) -> bool {
        match graph.offset(anchor) {
            None => false,
            Some(_) => match self.config.offset_threshold {
                Some(threshold) => self.confidence(graph, anchor) > threshold,
                None => true,
            },
        }
    }

    fn is_bounding(&self, graph: &Graph, anchor: &AnchorId) -> bool {
        self.is_set(graph, anchor) || self.generated.contains(anchor)
    }

    fn slot_is_set(&self, graph: &Graph, slot: &Slot) -> bool {
        match slot {
            Slot::Sentinel(_) => true,
            Slot::Anchor(id) => self.is_set(graph, id),
        }
    }

    fn slot_offset(graph: &Graph, slot: &Slot) -> Option<f64> {
        match slot {
            Slot::Sentinel(offset) => Some(*offset),
            Slot::Anchor(id) => graph.offset(id),
        }
    }

    fn linked(graph: &Graph, from: &Slot, to: &Slot) -> bool {
        match (from, to) {
            (Slot::Anchor(a), Slot::Anchor(b)) => graph.annotation_between(a, b, None).is_some(),
            _ => false,
        }
    }

    fn place(&self, graph: &mut Graph, slot: &Slot, offset: Option<f64>) {
        if let Slot::Anchor(id) = slot {
            graph.set_offset(id, offset);
            graph.set_anchor_confidence(id, Some(self.config.generated_confidence));
        }
    }

    fn name(slot: &Slot) -> AnchorId {
        match slot {
            Slot::Anchor(id) => id.clone(),
            Slot::Sentinel(offset) => AnchorId::new(format!("<{offset}>")),
        }
    }

    /// Spread each run of unset anchors evenly between the set anchors on
    /// either side of it.
    fn interpolate(&self, graph: &mut Graph, sequence: &[Slot]) -> Result<(), TransformError> {
        let mut last_set: Option<Slot> = None;
        let mut i = 0;
        while i < sequence.len() {
            let slot = &sequence[i];
            if self.slot_is_set(graph, slot) {
                last_set = Some(slot.clone());
                i += 1;
                continue;
            }
            let Some(mut previous) = last_set.clone() else {
                return Err(TransformError::UnboundedChain(Self::name(&sequence[0])));
            };

            let run_start = i;
            while i < sequence.len() && !self.slot_is_set(graph, &sequence[i]) {
                i += 1;
            }
            let Some(bound) = sequence.get(i).cloned() else {
                let after = sequence.last().map(Self::name).unwrap_or_else(|| Self::name(slot));
                return Err(TransformError::UnboundedChain(after));
            };
            let mut next = bound.clone();
            let mut unset: Vec<Slot> = sequence[run_start..i].to_vec();

            // an unset anchor not joined to its bound by an annotation collapses onto it
            if let Some(first) = unset.first().cloned() {
                if !Self::linked(graph, &previous, &first) {
                    self.place(graph, &first, Self::slot_offset(graph, &previous));
                    unset.remove(0);
                    previous = first;
                }
            }
            if let Some(last) = unset.last().cloned() {
                if !Self::linked(graph, &last, &next) {
                    self.place(graph, &last, Self::slot_offset(graph, &next));
                    unset.pop();
                    next = last;
                }
            }

            if !unset.is_empty() {
                if let (Some(start), Some(end)) = (Self::slot_offset(graph, &previous), Self::slot_offset(graph, &next)) {
                    let duration = end - start;
                    let increment = duration / (unset.len() + 1) as f64;
                    if duration < 0.0 {
                        tracing::error!(
                            from = %Self::name(&previous),
                            to = %Self::name(&next),
                            duration,
                            "Negative duration, anchors left as they are"
                        );
                    } else {
                        for (n, anchor) in unset.iter().enumerate() {
                            let offset = start + (n + 1) as f64 * increment;
                            let needs_change = match anchor {
                                Slot::Anchor(id) => {
                                    graph.offset(id) != Some(offset)
                                        || self.confidence(graph, id) < self.config.generated_confidence
                                }
                                Slot::Sentinel(_) => false,
                            };
                            if needs_change {
                                tracing::trace!(anchor = %Self::name(anchor), offset, "Interpolated");
                                self.place(graph, anchor, Some(offset));
                            }
                        }
                    }
                }
            }
            // the next run is bounded by the set anchor, not by what collapsed onto it
            last_set = Some(bound);
            i += 1;
        }
        Ok(())
    }

    fn mark_generated(&mut self, sequence: &[Slot]) {
        for slot in sequence {
            if let Slot::Anchor(id) = slot {
                self.generated.insert(id.clone());
            }
        }
    }

    fn preferred_layers(graph: &Graph) -> Vec<String> {
        let schema = graph.schema();
        let mut preferred: Vec<String> = schema.word_child_layers().iter().map(|l| l.id.clone()).collect();
        if let Some(word) = &schema.word_layer_id {
            preferred.push(word.clone());
        }
        preferred
    }

    fn prime(&mut self, graph: &mut Graph, preferred: &[String]) -> Result<(), TransformError> {
        let schema = graph.schema();
        let (Some(turn_layer), Some(utterance_layer), Some(word_layer)) = (
            schema.turn_layer_id.clone(),
            schema.utterance_layer_id.clone(),
            schema.word_layer_id.clone(),
        ) else {
            return Ok(());
        };
        if schema.layer(&turn_layer).is_none() || schema.layer(&utterance_layer).is_none() || schema.layer(&word_layer).is_none() {
            return Ok(());
        }

        let mut assigned = graph.words_by_utterance(&turn_layer, &utterance_layer, &word_layer);
        for utterance in graph.all(&utterance_layer) {
            let Some(u) = graph.annotation(&utterance).cloned() else { continue };
            let (Some(u_start), Some(u_end)) = (graph.offset(&u.start), graph.offset(&u.end)) else {
                continue;
            };
            let Some(words) = assigned.remove(&utterance) else {
                continue;
            };
            let turn = graph.ancestor_on(&utterance, &turn_layer);
            let same_turn = |g: &Graph, a: &Annotation| {
                !g.schema().is_ancestor(&a.layer_id, &turn_layer)
                    || g.ancestor_on(&a.id, &turn_layer) == turn
            };

            let mut sequence = vec![Slot::Sentinel(u_start), Slot::Anchor(u.start.clone())];
            let mut seen: HashSet<AnchorId> = HashSet::from([u.start.clone()]);
            let mut push = |sequence: &mut Vec<Slot>, id: AnchorId| {
                if seen.insert(id.clone()) {
                    sequence.push(Slot::Anchor(id));
                }
            };
            let mut first_word = true;
            for word in words {
                let Some(w) = graph.annotation(&word).cloned() else { continue };
                if w.is_destroyed() {
                    continue;
                }
                if first_word {
                    let g: &Graph = graph;
                    let mut before = chain_backward(
                        g,
                        &w.start,
                        preferred,
                        |a| same_turn(g, a),
                        |a| g.offset(a).map_or(false, |o| o <= u_start),
                    );
                    if before.first().and_then(|a| g.offset(a)).map_or(false, |o| o < u_start) {
                        before.remove(0);
                    }
                    for anchor in before {
                        push(&mut sequence, anchor);
                    }
                    first_word = false;
                }
                push(&mut sequence, w.start.clone());
                let g: &Graph = graph;
                let mut after = chain_forward(
                    g,
                    &w.start,
                    preferred,
                    |a| same_turn(g, a),
                    |a| *a == w.end || g.offset(a).map_or(false, |o| o >= u_end),
                );
                if after.last().and_then(|a| g.offset(a)).map_or(false, |o| o > u_end) {
                    after.pop();
                }
                for anchor in after {
                    push(&mut sequence, anchor);
                }
            }
            push(&mut sequence, u.end.clone());
            sequence.push(Slot::Sentinel(u_end));

            tracing::debug!(utterance = %utterance, anchors = sequence.len(), "Priming utterance");
            self.interpolate(graph, &sequence)?;
            self.mark_generated(&sequence);
        }
        Ok(())
    }

    /// Parent bound to extend an unbound chain end with, when the chain stops
    /// at the first (or last) child of its parent.
    fn parent_bound(graph: &Graph, anchor: &AnchorId, at_start: bool) -> Option<AnchorId> {
        let links = if at_start { graph.starting_at(anchor) } else { graph.ending_at(anchor) };
        links.iter().find_map(|id| {
            let a = graph.annotation(id)?;
            let parent = graph.parent_of(id)?;
            let siblings = graph.children(&parent.id, &a.layer_id);
            let edge = if at_start { siblings.first() } else { siblings.last() };
            let bound = if at_start { &parent.start } else { &parent.end };
            (edge == Some(id) && bound != anchor).then(|| bound.clone())
        })
    }

    fn general(&mut self, graph: &mut Graph, preferred: &[String]) -> Result<(), TransformError> {
        for anchor in graph.anchors_ordered_by_structure() {
            if !graph.is_linked(&anchor) || self.is_bounding(graph, &anchor) {
                continue;
            }
            let mut chain = {
                let g: &Graph = graph;
                let mut chain = chain_backward(g, &anchor, preferred, |_| true, |a| self.is_bounding(g, a));
                chain.push(anchor.clone());
                chain.extend(chain_forward(g, &anchor, preferred, |_| true, |a| self.is_bounding(g, a)));
                chain
            };
            if let Some(first) = chain.first().cloned() {
                if !self.is_bounding(graph, &first) {
                    if let Some(bound) = Self::parent_bound(graph, &first, true) {
                        chain.insert(0, bound);
                    }
                }
            }
            if let Some(last) = chain.last().cloned() {
                if !self.is_bounding(graph, &last) {
                    if let Some(bound) = Self::parent_bound(graph, &last, false) {
                        chain.push(bound);
                    }
                }
            }
            if chain.len() < 2 {
                continue;
            }
            let start = chain.iter().find_map(|a| graph.offset(a));
            let end = chain.iter().rev().find_map(|a| graph.offset(a));
            let (Some(start), Some(end)) = (start, end) else {
                continue;
            };
            let mut sequence = Vec::with_capacity(chain.len() + 2);
            sequence.push(Slot::Sentinel(start));
            sequence.extend(chain.into_iter().map(Slot::Anchor));
            sequence.push(Slot::Sentinel(end));
            self.interpolate(graph, &sequence)?;
            self.mark_generated(&sequence);
        }
        Ok(())
    }

    fn run(&mut self, graph: &mut Graph) -> Result<(), TransformError> {
        let preferred = Self::preferred_layers(graph);
        self.prime(graph, &preferred)?;
        self.general(graph, &preferred)?;

        let unset: Vec<AnchorId> = graph
            .anchors()
            .filter(|a| !a.is_destroyed() && a.offset.is_none())
            .filter(|a| graph.is_linked(&a.id))
            .map(|a| a.id.clone())
            .collect();
        if let Some(first) = unset.first() {
            let err = TransformError::UnresolvedOffsets {
                count: unset.len(),
                first: first.clone(),
            };
            self.errors.push(err.to_string());
            return Err(err);
        }
        Ok(())
    }
}

impl GraphTransformer for DefaultOffsetGenerator {
    fn transform(&mut self, graph: &mut Graph) -> Result<(), TransformError> {
        let _span = tracing::debug_span!("offset_generator", graph = %graph.id).entered();
        self.errors.clear();
        self.generated.clear();
        let result = self.run(graph);
        self.generated.clear();
        result
    }

    fn errors(&self) -> &[String] {
        &self.errors
    }
}
