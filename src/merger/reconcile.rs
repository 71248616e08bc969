//! Creating, destroying and relabelling annotations.

use std::collections::BTreeSet;

use super::{anchor_confidence, is_live, label_confidence, Run};
use crate::graph::Graph;
use crate::relink::{change_end_with_related, change_start_with_related};
use crate::types::{Alignment, AnchorId, Annotation, AnnotationId, Confidence, Layer};

/// Where a new annotation's boundary comes from.
enum Boundary {
    /// An anchor already in the original graph.
    Shared(AnchorId),
    /// A new anchor with this offset and confidence.
    Fresh(Option<f64>, Confidence),
}

impl Boundary {
    fn from_edited(edited: &Graph, anchor: &AnchorId) -> Self {
        let confidence = anchor_confidence(edited, anchor);
        let confidence = if confidence < Confidence::AUTOMATIC {
            Confidence::NONE
        } else {
            confidence
        };
        Self::Fresh(edited.offset(anchor), confidence)
    }

    fn materialize(self, graph: &mut Graph) -> AnchorId {
        match self {
            Self::Shared(id) => id,
            Self::Fresh(offset, confidence) => graph.create_anchor(offset, Some(confidence)),
        }
    }
}

fn layers(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

/// Offset before the current run of changes.
fn original_offset(graph: &Graph, anchor: &AnchorId) -> Option<f64> {
    match graph.tracker().anchor(anchor) {
        Some(snapshot) => snapshot.offset,
        None => graph.offset(anchor),
    }
}

impl Run<'_> {
    /// Phase 2 for one layer: destroy unpaired originals, create
    /// counterparts for unpaired edited annotations and bring anchor
    /// sharing between neighbours in line with the edited graph.
    pub(super) fn create_and_destroy(&mut self, graph: &mut Graph, layer_id: &str) {
        let _span = tracing::debug_span!("create_destroy", layer = layer_id).entered();
        let Some(layer) = graph.schema().layer(layer_id).cloned() else {
            return;
        };
        for id in graph.all(layer_id) {
            if !self.counterparts.has_edited(&id) {
                tracing::debug!(annotation = %id, "Deleting");
                graph.destroy(&id);
            }
        }

        let edited = self.edited;
        let mut last: Option<AnnotationId> = None;
        for edited_id in edited.all(layer_id) {
            let Some(theirs) = edited.annotation(&edited_id) else {
                continue;
            };
            let ours = match self.original_of(&edited_id) {
                Some(ours) => {
                    self.align_with_previous(graph, &layer, &ours, theirs, last.as_ref());
                    ours
                }
                None => match self.create_counterpart(graph, &layer, theirs) {
                    Some(ours) => ours,
                    None => continue,
                },
            };
            if graph.annotation(&ours).map_or(false, |a| a.ordinal != theirs.ordinal) {
                tracing::debug!(annotation = %ours, ordinal = theirs.ordinal, "Changing ordinal");
                graph.set_ordinal(&ours, theirs.ordinal);
            }
            last = Some(ours);
        }
    }

    /// Add an original-side copy of an edited annotation.
    fn create_counterpart(&mut self, graph: &mut Graph, layer: &Layer, theirs: &Annotation) -> Option<AnnotationId> {
        let edited = self.edited;
        let mut start = Boundary::from_edited(edited, &theirs.start);
        let mut end = Boundary::from_edited(edited, &theirs.end);
        if !theirs.is_instant() {
            // share with annotations the edited graph shares with
            let parallel = |anchors: Vec<AnnotationId>, start: bool| {
                anchors
                    .into_iter()
                    .filter(|a| a != &theirs.id)
                    .filter_map(|a| self.original_of(&a))
                    .find_map(|o| graph.annotation(&o).map(|o| if start { o.start.clone() } else { o.end.clone() }))
            };
            if let Some(anchor) = parallel(edited.starting_at(&theirs.start), true) {
                start = Boundary::Shared(anchor);
            }
            if let Some(anchor) = parallel(edited.ending_at(&theirs.end), false) {
                end = Boundary::Shared(anchor);
            }
        }
        let start = start.materialize(graph);
        let end = if theirs.is_instant() { start.clone() } else { end.materialize(graph) };

        let their_parent = theirs.parent.as_ref().and_then(|p| self.original_of(p));
        let parent = their_parent.clone().or_else(|| self.participant_named(graph, layer, &theirs.label));

        if layer.alignment == Alignment::Interval {
            self.link_previous(graph, layer, theirs, their_parent.as_ref(), &start, &end);
        }

        let mut annotation = Annotation::new("", layer.id.as_str(), theirs.label.as_str(), start, end);
        annotation.parent = parent;
        annotation.confidence = theirs.confidence;
        match graph.add_annotation(annotation) {
            Ok(id) => {
                tracing::debug!(annotation = %id, edited = %theirs.id, label = %theirs.label, "Adding");
                self.counterparts.link(&id, &theirs.id);
                self.created.insert(id.clone());
                Some(id)
            }
            Err(e) => {
                self.error(format!("Could not add counterpart of {theirs}: {e}"));
                None
            }
        }
    }

    /// The participant a new turn belongs to, found by label.
    fn participant_named(&self, graph: &Graph, layer: &Layer, label: &str) -> Option<AnnotationId> {
        let schema = graph.schema();
        if schema.turn_layer_id.as_deref() != Some(layer.id.as_str()) {
            return None;
        }
        let participants = schema.participant_layer_id.as_deref()?;
        graph
            .all(participants)
            .into_iter()
            .find(|p| graph.annotation(p).map_or(false, |p| p.label == label))
    }

    /// Join a new annotation's start to the end of the annotation before it,
    /// taking that end's offset when it is more trusted.
    fn link_previous(
        &mut self,
        graph: &mut Graph,
        layer: &Layer,
        theirs: &Annotation,
        our_parent: Option<&AnnotationId>,
        start: &AnchorId,
        end: &AnchorId,
    ) {
        let edited = self.edited;
        let previous = edited
            .ending_on(&theirs.start, &layer.id)
            .into_iter()
            .filter(|a| a != &theirs.id)
            .filter_map(|a| self.original_of(&a))
            .find(|previous| {
                let Some(previous_parent) = graph.annotation(previous).and_then(|p| p.parent.clone()) else {
                    return true;
                };
                let Some(our_parent) = our_parent else {
                    return true;
                };
                if &previous_parent == our_parent {
                    return true;
                }
                // don't reach across a parent in between
                match graph.previous(our_parent) {
                    Some(before) => before == previous_parent,
                    None => true,
                }
            });
        let Some(previous) = previous else {
            return;
        };
        let Some(previous_end) = graph.annotation(&previous).map(|p| p.end.clone()) else {
            return;
        };

        let previous_offset = graph.offset(&previous_end);
        let start_confidence = anchor_confidence(graph, start);
        let previous_confidence = anchor_confidence(graph, &previous_end);
        let start_offset = graph.offset(start);
        if previous_confidence > start_confidence && previous_offset.is_some() && start_offset != previous_offset {
            let prior_end = graph
                .tracker()
                .annotation(&previous)
                .map_or(previous_end.clone(), |s| s.end.clone());
            let prior = anchor_confidence(graph, &prior_end);
            let mut confidence = prior.min(start_confidence);
            if confidence <= Confidence::DEFAULT {
                confidence = prior.max(start_confidence);
            }
            let end_offset = graph.offset(end);
            if anchor_confidence(graph, end) > Confidence::DEFAULT
                && matches!((end_offset, previous_offset), (Some(e), Some(p)) if e <= p)
            {
                confidence = Confidence::NONE;
            }
            tracing::debug!(anchor = %start, offset = ?previous_offset, "Using offset of previous end");
            graph.set_offset(start, previous_offset);
            graph.set_anchor_confidence(start, Some(confidence));
        }
        if &previous_end != start {
            let mut exclude = layers(&[&layer.id]);
            if layer.saturated {
                exclude.insert(layer.parent().to_string());
            }
            tracing::debug!(previous = %previous, anchor = %start, "Sharing anchor with previous");
            change_end_with_related(graph, &previous, start, &exclude);
        }
    }

    /// Make an existing annotation's start agree with the edited graph
    /// about what it shares with the annotation before it.
    fn align_with_previous(
        &mut self,
        graph: &mut Graph,
        layer: &Layer,
        ours: &AnnotationId,
        theirs: &Annotation,
        last: Option<&AnnotationId>,
    ) {
        let Some(our_start) = graph.annotation(ours).map(|a| a.start.clone()) else {
            return;
        };
        let this_layer = layers(&[&layer.id]);
        let saturated_parent: BTreeSet<String> = if layer.saturated {
            layers(&[layer.parent()])
        } else {
            BTreeSet::new()
        };

        // unshare from priors that the edited graph keeps apart
        let priors: Vec<AnnotationId> = graph
            .ending_on(&our_start, &layer.id)
            .into_iter()
            .filter(|p| is_live(graph, p))
            .filter(|p| {
                self.edited_of(p)
                    .and_then(|e| self.edited.annotation(&e))
                    .map_or(false, |e| e.end != theirs.start)
            })
            .collect();
        for prior in priors {
            if let Some(anchor) = graph.copy_anchor(&our_start) {
                tracing::debug!(prior = %prior, annotation = %ours, "Unsharing end of prior");
                change_end_with_related(graph, &prior, &anchor, &this_layer);
            }
        }

        let Some(last) = last.filter(|l| self.created.contains(*l)) else {
            return;
        };
        let Some(their_last) = self.edited_of(last).and_then(|e| self.edited.annotation(&e)) else {
            return;
        };
        let (Some(ours_now), Some(last_now)) = (graph.annotation(ours).cloned(), graph.annotation(last).cloned()) else {
            return;
        };
        if their_last.end != theirs.start || last_now.end == ours_now.start {
            return;
        }
        let their_parent_start = self.edited.parent_of(&theirs.id).map(|p| p.start.clone());
        let our_parent_start = graph.parent_of(ours).map(|p| p.start.clone());
        let from_parent_edge =
            their_parent_start.as_ref() == Some(&theirs.start) || our_parent_start.as_ref() != Some(&ours_now.start);
        if last_now.start != ours_now.start && from_parent_edge {
            self.keep_positive_length(graph, &last_now, &ours_now);
            tracing::debug!(last = %last, annotation = %ours, "Sharing anchor with next");
            change_end_with_related(graph, last, &ours_now.start, &saturated_parent);
            if last_now.is_instant() {
                change_start_with_related(graph, last, &ours_now.start, &BTreeSet::new());
            }
        } else {
            tracing::debug!(last = %last, annotation = %ours, "Sharing anchor with previous");
            change_start_with_related(graph, ours, &last_now.end, &saturated_parent);
        }
    }

    /// Before a new annotation's end is joined to the following start, nudge
    /// whichever start is less trusted so the new annotation keeps a
    /// positive length.
    fn keep_positive_length(&mut self, graph: &mut Graph, last: &Annotation, ours: &Annotation) {
        if last.is_instant() {
            return;
        }
        let (Some(last_was), Some(ours_was)) = (original_offset(graph, &last.start), original_offset(graph, &ours.start))
        else {
            return;
        };
        if last_was < ours_was {
            return;
        }
        let Some(ours_offset) = graph.offset(&ours.start) else {
            return;
        };
        let smidgin = self.config.smidgin;
        let last_confidence = anchor_confidence(graph, &last.start);
        let our_confidence = anchor_confidence(graph, &ours.start);
        let parent_start = graph.parent_of(&last.id).and_then(|p| graph.offset(&p.start));
        if last_confidence < our_confidence && parent_start.map_or(false, |p| p <= ours_offset - smidgin) {
            tracing::debug!(annotation = %last.id, "Moving start back to avoid non-positive length");
            graph.set_offset(&last.start, Some(ours_offset - smidgin));
            graph.set_anchor_confidence(&last.start, Some(Confidence::NONE));
        } else if last_confidence > our_confidence || our_confidence <= Confidence::DEFAULT {
            tracing::debug!(annotation = %ours.id, "Moving start on to avoid non-positive length");
            graph.set_offset(&ours.start, Some(ours_offset + smidgin));
            graph.set_anchor_confidence(&ours.start, Some(Confidence::NONE));
        } else {
            tracing::debug!(annotation = %last.id, "Both starts trusted; leaving non-positive length");
        }
    }

    /// Phase 3 for one layer: take edited labels that are at least as
    /// trusted as ours.
    pub(super) fn adopt_labels(&mut self, graph: &mut Graph, layer_id: &str) {
        for ours in graph.all(layer_id) {
            let Some(theirs) = self.edited_of(&ours).and_then(|e| self.edited.annotation(&e)) else {
                continue;
            };
            let our_confidence = label_confidence(graph, &ours);
            let their_confidence = theirs.confidence_or(Confidence::MANUAL);
            if !self.config.ignore_label_confidence && their_confidence < our_confidence {
                continue;
            }
            if graph.set_label(&ours, theirs.label.as_str()) {
                tracing::debug!(annotation = %ours, label = %theirs.label, "Relabelling");
            }
            if their_confidence > our_confidence {
                graph.set_confidence(&ours, Some(their_confidence));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::Merger;
    use crate::config::MergerConfig;
    use crate::graph::Graph;
    use crate::types::{Anchor, Annotation, Confidence, Schema};

    fn graph(id: &str, labels: &[(&str, Confidence)], offsets: &[f64]) -> Graph {
        let mut g = Graph::new(id, Schema::transcript());
        for (i, off) in offsets.iter().enumerate() {
            g.add_anchor(Anchor::new(format!("a{i}").as_str(), Some(*off), Some(Confidence::MANUAL)))
                .unwrap();
        }
        let last = format!("a{}", offsets.len() - 1);
        g.add_annotation(Annotation::new("p", "participant", "Kim", "a0", last.as_str())).unwrap();
        g.add_annotation(Annotation::new("t", "turn", "Kim", "a0", last.as_str()).with_parent("p")).unwrap();
        for (i, (label, confidence)) in labels.iter().enumerate() {
            let w = Annotation::new(format!("w{i}"), "word", *label, format!("a{i}"), format!("a{}", i + 1))
                .with_parent("t")
                .with_confidence(*confidence);
            g.add_annotation(w).unwrap();
        }
        g.commit();
        g
    }

    const M: Confidence = Confidence::MANUAL;
    const A: Confidence = Confidence::AUTOMATIC;

    #[test]
    fn test_new_word_shares_anchors_with_neighbours() {
        let mut original = graph("o", &[("one", M), ("three", M)], &[0.0, 1.0, 2.0]);
        let edited = graph("e", &[("one", M), ("two", M), ("three", M)], &[0.0, 1.0, 1.5, 2.0]);
        Merger::default().merge(&mut original, &edited).unwrap();
        let words = original.all("word");
        assert_eq!(words.len(), 3);
        let get = |i: usize| original.annotation(&words[i]).unwrap().clone();
        assert_eq!(get(1).label, "two");
        assert_eq!(get(0).end, get(1).start);
        assert_eq!(get(1).end, get(2).start);
        assert_eq!(get(1).parent, Some("t".into()));
        assert_eq!(original.offset(&get(1).end), Some(1.5));
    }

    #[test]
    fn test_new_turn_finds_participant_by_label() {
        let mut original = graph("o", &[("hi", M)], &[0.0, 1.0]);
        let mut edited = graph("e", &[("hi", M)], &[0.0, 1.0]);
        edited.add_anchor(Anchor::new("b0", Some(2.0), Some(M))).unwrap();
        edited.add_anchor(Anchor::new("b1", Some(3.0), Some(M))).unwrap();
        edited.set_end(&"p".into(), &"b1".into());
        edited
            .add_annotation(Annotation::new("t2", "turn", "Kim", "b0", "b1").with_parent("p"))
            .unwrap();
        edited
            .add_annotation(Annotation::new("w9", "word", "bye", "b0", "b1").with_parent("t2"))
            .unwrap();
        let mut merger = Merger::default();
        merger.merge(&mut original, &edited).unwrap();
        let turns = original.all("turn");
        assert_eq!(turns.len(), 2);
        let new_turn = original.annotation(&turns[1]).unwrap();
        assert_eq!(new_turn.parent, Some("p".into()));
        let words = original.children(&turns[1], "word");
        assert_eq!(words.len(), 1);
        assert_eq!(original.annotation(&words[0]).unwrap().label, "bye");
    }

    #[test]
    fn test_ignore_label_confidence() {
        let mut original = graph("o", &[("colour", M)], &[0.0, 1.0]);
        let edited = graph("e", &[("color", A)], &[0.0, 1.0]);
        let mut merger = Merger::new(MergerConfig::default().with_ignore_label_confidence(true));
        merger.merge(&mut original, &edited).unwrap();
        let w = original.annotation(&"w0".into()).unwrap();
        assert_eq!(w.label, "color");
        assert_eq!(w.confidence, Some(M));
    }

    #[test]
    fn test_no_change_layer_is_left_alone() {
        let mut original = graph("o", &[("a", M), ("b", M)], &[0.0, 1.0, 2.0]);
        let edited = graph("e", &[("a", M)], &[0.0, 1.0]);
        let mut merger = Merger::new(MergerConfig::default().with_no_change_layer("word"));
        merger.merge(&mut original, &edited).unwrap();
        assert!(!original.annotation(&"w1".into()).unwrap().is_destroyed());
    }
}
