//! Pairing original annotations with edited ones.
//!
//! Each layer's annotations are aligned with a minimum edit path whose
//! substitution cost reflects how different two annotations are: label
//! distance, plus disagreement of their anchors weighted by how much those
//! anchors are trusted. Long lists are aligned in overlapping windows.
//!
//! When participants, turns, utterances and words are all defined and
//! aligned, mapping is partitioned: participants first, then turns per
//! participant, utterances per turn and finally words per utterance, each
//! level only if the one above paired up completely.

use std::collections::{BTreeMap, BTreeSet};

use super::{anchor_confidence, Counterparts, Run};
use crate::edit_path::{collapse, collapse_ties, levenshtein_with, minimum_edit_path, EditComparator, EditOperation, EditStep, UniformCosts};
use crate::graph::Graph;
use crate::types::{Alignment, Annotation, AnnotationId, Confidence};

/// Cost that rules a pairing out.
pub const NO_WAY: u32 = 200;

/// Cost of turning one label into another.
///
/// Labels are compared lowercased with everything but letters and digits
/// stripped, unless that leaves nothing. Substitutions in labels of two
/// characters or fewer cost double, and the whole distance triples.
pub fn label_distance(a: &str, b: &str) -> u32 {
    if a == b {
        return 0;
    }
    let normalize = |s: &str| -> String { s.chars().filter(|c| c.is_alphanumeric()).flat_map(char::to_lowercase).collect() };
    let (mut x, mut y) = (normalize(a), normalize(b));
    if x.is_empty() || y.is_empty() {
        x = a.to_string();
        y = b.to_string();
    }
    let short = x.chars().count() <= 2 || y.chars().count() <= 2;
    let distance = if short {
        let costs = UniformCosts {
            insert: 1,
            delete: 1,
            change: 2,
        };
        levenshtein_with(&x, &y, costs) * 3
    } else {
        levenshtein_with(&x, &y, UniformCosts::default())
    };
    u32::try_from(distance).unwrap_or(u32::MAX)
}

/// Whether `b` lies within `a`.
fn span_includes(a: (f64, f64), b: (f64, f64)) -> bool {
    let within = |o: f64| a.0 <= o && o < a.1;
    within(b.0) && (within(b.1) || b.1 == a.1)
}

/// Gap between two spans; negative when they overlap or nest.
fn span_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    if span_includes(a, b) {
        return -(b.1 - b.0);
    }
    if span_includes(b, a) {
        return -(a.1 - a.0);
    }
    let difference = (a.0 - b.1).abs().min((a.1 - b.0).abs());
    if a.0 < b.1 && a.1 > b.0 {
        -difference
    } else {
        difference
    }
}

/// Largest of the start-start and end-end differences; negative when the
/// spans overlap.
fn paired_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let difference = (a.0 - b.0).abs().max((a.1 - b.1).abs());
    if a.0 < b.1 && a.1 > b.0 {
        -difference
    } else {
        difference
    }
}

/// Substitution costs between annotations of the original and edited
/// graphs.
pub(super) struct AnnotationCosts<'g> {
    pub(super) original: &'g Graph,
    pub(super) edited: &'g Graph,
    pub(super) counterparts: &'g Counterparts,
}

impl AnnotationCosts<'_> {
    /// Extra cost for anchors that disagree.
    fn anchor_cost(&self, o: &Annotation, e: &Annotation) -> u32 {
        if o.is_instant() != e.is_instant() {
            return NO_WAY;
        }
        let (Some(ours), Some(theirs)) = (self.original.span(o), self.edited.span(e)) else {
            return 0;
        };
        let schema = self.original.schema();
        let sum = |g: &Graph, a: &Annotation| {
            f64::from(anchor_confidence(g, &a.start).value()) + f64::from(anchor_confidence(g, &a.end).value())
        };
        let mut importance =
            sum(self.original, o).min(sum(self.edited, e)) / (f64::from(Confidence::MANUAL.value()) * 2.0);
        let word_layer = schema.word_layer_id.as_deref();
        let word_like = word_layer == Some(o.layer_id.as_str())
            || schema.layer(&o.layer_id).map_or(false, |l| {
                Some(l.parent()) == word_layer && l.alignment == Alignment::Interval
            });
        if word_like {
            importance = 0.0;
        }
        if o.is_instant() {
            importance *= 2.0;
        }

        let distance = paired_distance(ours, theirs);
        if distance == 0.0 {
            return 0;
        }
        if importance > 0.0 {
            if distance > 0.0 {
                (distance * importance * 2.0) as u32
            } else {
                let mean_duration = ((ours.1 - ours.0) + (theirs.1 - theirs.0)) / 2.0;
                let magnitude = span_distance(ours, theirs).abs() / mean_duration * 3.0;
                (-distance * importance / magnitude).abs().min(f64::from(NO_WAY)) as u32
            }
        } else if distance > 0.0 {
            let durations_differ = ((ours.1 - ours.0) - (theirs.1 - theirs.0)).abs() > 10.0;
            if distance > 30.0 || durations_differ {
                NO_WAY
            } else {
                0
            }
        } else if -distance > 10.0 {
            NO_WAY
        } else {
            0
        }
    }
}

impl EditComparator<AnnotationId, AnnotationId> for AnnotationCosts<'_> {
    fn compare(&mut self, from: &AnnotationId, to: &AnnotationId) -> (u32, EditOperation) {
        let (Some(o), Some(e)) = (self.original.annotation(from), self.edited.annotation(to)) else {
            return (NO_WAY, EditOperation::Change);
        };
        let operation = if o.label == e.label {
            EditOperation::None
        } else {
            EditOperation::Change
        };
        let ours = self.counterparts.edited_of(from);
        let theirs = self.counterparts.original_of(to);
        if ours.is_some() || theirs.is_some() {
            let cost = if ours == Some(to) { 0 } else { NO_WAY };
            return (cost, operation);
        }

        let mut cost = label_distance(&o.label, &e.label);
        let schema = self.original.schema();
        let aligned_lineage = schema.layer(&o.layer_id).map_or(false, |l| l.is_aligned())
            || schema.ancestors(&o.layer_id).iter().any(|l| l.is_aligned());
        if aligned_lineage {
            cost = cost.saturating_add(self.anchor_cost(o, e));
        }
        (cost, operation)
    }
}

/// Split a list into `chunks` windows, each overlapping the next by half.
fn overlapping_chunks(list: &[AnnotationId], chunks: usize) -> Vec<Vec<AnnotationId>> {
    let half = list.len() as f64 / chunks.max(1) as f64 / 2.0;
    let mut windows: Vec<Vec<AnnotationId>> = vec![Vec::new()];
    let mut current = 0;
    let mut next: Option<usize> = None;
    for (i, id) in list.iter().enumerate() {
        if i as f64 > windows.len() as f64 * half {
            if let Some(n) = next {
                current = n;
            }
            windows.push(Vec::new());
            next = Some(windows.len() - 1);
        }
        windows[current].push(id.clone());
        if let Some(n) = next {
            windows[n].push(id.clone());
        }
    }
    // the last window is only half full
    windows.pop();
    windows
}

/// Drop everything up to and including the last element already mapped.
fn remove_leading_mapped<F: Fn(&AnnotationId) -> bool>(list: &mut Vec<AnnotationId>, mapped: F) {
    if let Some(last) = list.iter().rposition(|id| mapped(id)) {
        list.drain(..=last);
    }
}

impl Run<'_> {
    /// Phase 1: pair up annotations on every shared layer.
    pub(super) fn map_counterparts(&mut self, graph: &Graph, layers: &[String]) {
        let mut mapped = BTreeSet::new();
        self.map_partitioned(graph, &mut mapped);
        let turn_layer = graph.schema().turn_layer_id.clone();
        for layer_id in layers {
            if mapped.contains(layer_id) {
                continue;
            }
            let Some(layer) = graph.schema().layer(layer_id) else {
                continue;
            };
            let parent = layer.parent().to_string();
            if turn_layer.as_deref() == Some(parent.as_str()) || graph.schema().is_top_level(layer_id) {
                let ours = graph.all(layer_id);
                let theirs = self.edited.all(layer_id);
                self.map_lists(graph, layer_id, ours, theirs);
            } else {
                self.map_by_parents(graph, layer_id);
            }
        }
    }

    /// Participant, turn, utterance and word mapping, level by level.
    fn map_partitioned(&mut self, graph: &Graph, mapped: &mut BTreeSet<String>) {
        let schema = graph.schema();
        let (Some(participant), Some(turn), Some(utterance), Some(word)) = (
            schema.participant_layer_id.clone(),
            schema.turn_layer_id.clone(),
            schema.utterance_layer_id.clone(),
            schema.word_layer_id.clone(),
        ) else {
            return;
        };
        let everywhere = |l: &str| schema.layer(l).is_some() && self.edited.schema().layer(l).is_some();
        if ![&participant, &turn, &utterance, &word].iter().all(|l| everywhere(l.as_str())) {
            return;
        }
        let semi_anchored = |g: &Graph| {
            g.all(&word).iter().filter_map(|id| g.annotation(id)).any(|w| g.offset(&w.start).is_some() || g.offset(&w.end).is_some())
        };
        if !semi_anchored(graph) || !semi_anchored(self.edited) {
            return;
        }

        for layer in [&participant, &turn, &utterance] {
            self.map_by_parents(graph, layer);
            mapped.insert(layer.clone());
            if !self.fully_mapped(graph, layer) {
                tracing::debug!(layer = %layer, "Partial mapping; remaining layers mapped separately");
                return;
            }
        }

        let ours = graph.words_by_utterance(&turn, &utterance, &word);
        let theirs = self.edited.words_by_utterance(&turn, &utterance, &word);
        let mut any = false;
        for utterance_id in graph.all(&utterance) {
            let Some(our_words) = ours.get(&utterance_id) else {
                continue;
            };
            let Some(their_words) = self.edited_of(&utterance_id).and_then(|e| theirs.get(&e)) else {
                continue;
            };
            self.map_lists(graph, &word, our_words.clone(), their_words.clone());
            any = true;
        }
        if any {
            tracing::debug!("Words mapped by utterance");
            mapped.insert(word.clone());
            self.map_stragglers(graph, &word);
        }
    }

    /// Whether every annotation on the layer, on both sides, is paired.
    fn fully_mapped(&self, graph: &Graph, layer_id: &str) -> bool {
        graph.all(layer_id).iter().all(|id| self.counterparts.has_edited(id))
            && self.edited.all(layer_id).iter().all(|id| self.counterparts.has_original(id))
    }

    /// Pair words left over by the per-utterance mapping with the edited
    /// word next to the counterpart of their neighbour, if labels match.
    fn map_stragglers(&mut self, graph: &Graph, word_layer: &str) {
        let edited = self.edited;
        for word in graph.all(word_layer) {
            if self.counterparts.has_edited(&word) {
                continue;
            }
            let Some(label) = graph.annotation(&word).map(|w| w.label.clone()) else {
                continue;
            };
            let candidate = |neighbour: Option<AnnotationId>, forward: bool| {
                let their_neighbour = self.edited_of(&neighbour?)?;
                let candidate = if forward {
                    edited.next(&their_neighbour)
                } else {
                    edited.previous(&their_neighbour)
                }?;
                let matches = edited.annotation(&candidate).map_or(false, |c| c.label == label);
                (matches && !self.counterparts.has_original(&candidate)).then_some(candidate)
            };
            let found = candidate(graph.previous(&word), true).or_else(|| candidate(graph.next(&word), false));
            if let Some(theirs) = found {
                tracing::debug!(original = %word, edited = %theirs, "Pairing word by neighbour");
                self.counterparts.link(&word, &theirs);
            }
        }
    }

    /// Map the children of each paired parent against the children of its
    /// counterpart.
    fn map_by_parents(&mut self, graph: &Graph, layer_id: &str) {
        let Some(layer) = graph.schema().layer(layer_id) else {
            return;
        };
        if graph.schema().is_top_level(layer_id) {
            let ours = graph.all(layer_id);
            let theirs = self.edited.all(layer_id);
            self.map_lists(graph, layer_id, ours, theirs);
            return;
        }
        let parent_layer = layer.parent().to_string();
        for parent in graph.all(&parent_layer) {
            let Some(their_parent) = self.edited_of(&parent) else {
                continue;
            };
            let ours = graph.children(&parent, layer_id);
            let theirs = self.edited.children(&their_parent, layer_id);
            self.map_lists(graph, layer_id, ours, theirs);
        }
    }

    /// Align two lists of annotations from one layer and pair them up.
    fn map_lists(&mut self, graph: &Graph, layer_id: &str, ours: Vec<AnnotationId>, theirs: Vec<AnnotationId>) {
        let schema = graph.schema();
        let Some(layer) = schema.layer(layer_id) else {
            return;
        };
        let turn_layer = schema.turn_layer_id.as_deref();
        let by_participant = turn_layer.map_or(false, |turn| {
            turn == layer_id || (self.edited.schema().layer(turn).is_some() && schema.is_ancestor(layer_id, turn))
        });
        let groups: Vec<(Vec<AnnotationId>, Vec<AnnotationId>)> = match turn_layer {
            Some(turn) if by_participant => {
                let speaker = |g: &Graph, id: &AnnotationId| -> String {
                    let turn_id = if layer_id == turn { Some(id.clone()) } else { g.ancestor_on(id, turn) };
                    turn_id.and_then(|t| g.annotation(&t)).map(|t| t.label.clone()).unwrap_or_default()
                };
                let mut split: BTreeMap<String, (Vec<AnnotationId>, Vec<AnnotationId>)> = BTreeMap::new();
                for id in ours {
                    split.entry(speaker(graph, &id)).or_default().0.push(id);
                }
                for id in theirs {
                    split.entry(speaker(self.edited, &id)).or_default().1.push(id);
                }
                split.into_values().collect()
            }
            _ => vec![(ours, theirs)],
        };

        let sort_by_label = schema.is_top_level(layer_id) && !layer.is_aligned();
        let collapsing = self.config.no_change_layers.contains(layer_id)
            || schema.word_layer_id.as_deref() == Some(layer.parent());
        let limit = self.config.chunk_size_limit;

        for (mut ours, mut theirs) in groups {
            if sort_by_label {
                let by_label = |g: &Graph, ids: &mut Vec<AnnotationId>| {
                    ids.sort_by(|a, b| {
                        let (a, b) = (g.annotation(a), g.annotation(b));
                        let key = |x: Option<&Annotation>| x.map(|x| (x.label.clone(), x.ordinal, x.id.clone()));
                        key(a).cmp(&key(b))
                    })
                };
                by_label(graph, &mut ours);
                by_label(self.edited, &mut theirs);
            }
            let chunked = limit > 0 && ours.len() > limit && theirs.len() > limit;
            let windows: Vec<(Vec<AnnotationId>, Vec<AnnotationId>)> = if chunked {
                let count = ours.len().div_ceil(limit).max(theirs.len().div_ceil(limit));
                tracing::debug!(layer = layer_id, ours = ours.len(), theirs = theirs.len(), count, "Mapping in windows");
                overlapping_chunks(&ours, count)
                    .into_iter()
                    .zip(overlapping_chunks(&theirs, count))
                    .collect()
            } else {
                vec![(ours, theirs)]
            };
            for (mut ours, mut theirs) in windows {
                if chunked {
                    remove_leading_mapped(&mut ours, |id| self.counterparts.has_edited(id));
                    remove_leading_mapped(&mut theirs, |id| self.counterparts.has_original(id));
                }
                let path = self.edit_path(graph, &ours, &theirs, collapsing);
                for step in path.iter().filter(|s| s.is_pairing()) {
                    if let (Some(f), Some(t)) = (step.from, step.to) {
                        tracing::trace!(original = %ours[f], edited = %theirs[t], op = ?step.operation, cost = step.distance, "Pair");
                        self.counterparts.link(&ours[f], &theirs[t]);
                    }
                }
            }
        }
    }

    fn edit_path(&self, graph: &Graph, ours: &[AnnotationId], theirs: &[AnnotationId], collapsing: bool) -> Vec<EditStep> {
        let mut costs = AnnotationCosts {
            original: graph,
            edited: self.edited,
            counterparts: &self.counterparts,
        };
        let path = minimum_edit_path(ours, theirs, &mut costs);
        if collapsing {
            collapse(path, ours, theirs, &mut costs)
        } else {
            // relabelling an annotation must not cost its identity
            collapse_ties(path, ours, theirs, &mut costs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergerConfig;
    use crate::types::{Anchor, Schema};

    fn ids(n: usize) -> Vec<AnnotationId> {
        (0..n).map(|i| AnnotationId::new(format!("a{i}"))).collect()
    }

    #[test]
    fn test_label_distance() {
        assert_eq!(label_distance("cat", "cat"), 0);
        assert_eq!(label_distance("Cat.", "cat"), 0);
        assert_eq!(label_distance("cats", "cat"), 1);
        // short labels: substitution costs 2, then times 3
        assert_eq!(label_distance("a", "b"), 6);
        assert_eq!(label_distance("?", "!"), 6);
    }

    #[test]
    fn test_span_distances() {
        assert_eq!(paired_distance((0.0, 1.0), (2.0, 4.0)), 3.0);
        assert_eq!(paired_distance((0.0, 2.0), (1.0, 3.0)), -1.0);
        assert_eq!(span_distance((0.0, 4.0), (1.0, 2.0)), -1.0);
        assert_eq!(span_distance((0.0, 1.0), (3.0, 4.0)), 2.0);
    }

    #[test]
    fn test_overlapping_chunks() {
        let list = ids(8);
        let chunks = overlapping_chunks(&list, 2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].first(), Some(&list[0]));
        assert_eq!(chunks[2].last(), Some(&list[7]));
        // neighbouring windows share elements
        assert!(chunks[0].iter().any(|id| chunks[1].contains(id)));
    }

    #[test]
    fn test_remove_leading_mapped() {
        let mut list = ids(5);
        let mapped: BTreeSet<AnnotationId> = [AnnotationId::new("a0"), AnnotationId::new("a2")].into();
        remove_leading_mapped(&mut list, |id| mapped.contains(id));
        assert_eq!(list, vec![AnnotationId::new("a3"), AnnotationId::new("a4")]);
        let mut untouched = ids(2);
        remove_leading_mapped(&mut untouched, |_| false);
        assert_eq!(untouched.len(), 2);
    }

    fn turn_of_words(id: &str, labels: &[&str], shift: f64) -> Graph {
        let mut g = Graph::new(id, Schema::transcript());
        let n = labels.len();
        for i in 0..=n {
            g.add_anchor(Anchor::new(format!("a{i}").as_str(), Some(i as f64 + shift), Some(Confidence::MANUAL)))
                .unwrap();
        }
        let last = format!("a{n}");
        g.add_annotation(Annotation::new("p", "participant", "Ann", "a0", last.as_str())).unwrap();
        g.add_annotation(Annotation::new("t", "turn", "Ann", "a0", last.as_str()).with_parent("p")).unwrap();
        for (i, label) in labels.iter().enumerate() {
            let w = Annotation::new(format!("w{i}"), "word", *label, format!("a{i}"), format!("a{}", i + 1));
            g.add_annotation(w.with_parent("t")).unwrap();
        }
        g.commit();
        g
    }

    #[test]
    fn test_words_pair_by_content() {
        let original = turn_of_words("o", &["the", "quick", "fox"], 0.0);
        let edited = turn_of_words("e", &["the", "quick", "brown", "fox"], 0.0);
        let config = MergerConfig::default();
        let mut run = Run::new(&config, &edited);
        let layers: Vec<String> = ["participant", "turn", "utterance", "word"].map(String::from).to_vec();
        run.map_counterparts(&original, &layers);
        assert_eq!(run.edited_of(&"t".into()), Some("t".into()));
        assert_eq!(run.edited_of(&"w0".into()), Some("w0".into()));
        assert_eq!(run.edited_of(&"w1".into()), Some("w1".into()));
        assert_eq!(run.edited_of(&"w2".into()), Some("w3".into()));
        assert!(!run.counterparts.has_original(&"w2".into()));
    }

    #[test]
    fn test_distant_words_do_not_pair() {
        let config = MergerConfig::default();
        let original = turn_of_words("o", &["yes"], 0.0);
        let edited = turn_of_words("e", &["yes"], 100.0);
        let run = Run::new(&config, &edited);
        let mut costs = AnnotationCosts {
            original: &original,
            edited: &edited,
            counterparts: &run.counterparts,
        };
        let (cost, op) = costs.compare(&"w0".into(), &"w0".into());
        assert_eq!(op, EditOperation::None);
        assert_eq!(cost, NO_WAY);
        let (cost, _) = costs.compare(&"t".into(), &"t".into());
        assert!(cost >= NO_WAY);
    }

    #[test]
    fn test_chunked_mapping_matches_unchunked() {
        let labels: Vec<String> = (0..12).map(|i| format!("word{i}")).collect();
        let refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let original = turn_of_words("o", &refs, 0.0);
        let edited = turn_of_words("e", &refs, 0.0);
        let config = MergerConfig::default().with_chunk_size_limit(4);
        let mut run = Run::new(&config, &edited);
        run.map_lists(&original, "word", original.all("word"), edited.all("word"));
        for i in 0..12 {
            let id = AnnotationId::new(format!("w{i}"));
            assert_eq!(run.edited_of(&id), Some(id.clone()), "word {i}");
        }
    }

    #[test]
    fn test_windows_pair_each_word_once() {
        let words = [
            "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliet", "kilo", "lima",
        ];
        let mut edited_words = words.to_vec();
        edited_words.insert(6, "zulu");
        edited_words.retain(|w| *w != "juliet");
        let original = turn_of_words("o", &words, 0.0);
        let edited = turn_of_words("e", &edited_words, 0.0);
        let config = MergerConfig::default().with_chunk_size_limit(4);
        let mut run = Run::new(&config, &edited);
        run.map_lists(&original, "word", original.all("word"), edited.all("word"));

        let mut seen = BTreeSet::new();
        let mut last_edited: Option<usize> = None;
        for (i, id) in original.all("word").iter().enumerate() {
            let label = &original.annotation(id).unwrap().label;
            let Some(theirs) = run.edited_of(id) else {
                assert_eq!(label, "juliet", "word {i} unpaired");
                continue;
            };
            assert_eq!(run.original_of(&theirs).as_ref(), Some(id));
            assert!(seen.insert(theirs.clone()), "{theirs} paired twice");
            assert_eq!(&edited.annotation(&theirs).unwrap().label, label);
            // pairs never cross
            let position = edited.all("word").iter().position(|e| e == &theirs).unwrap();
            assert!(last_edited.map_or(true, |l| l < position));
            last_edited = Some(position);
        }
        assert_eq!(run.counterparts.len(), words.len() - 1);
        assert!(!run.counterparts.has_original(&"w6".into()));
    }

    #[test]
    fn test_relabelled_word_keeps_its_counterpart() {
        let original = turn_of_words("o", &["I", "saw", "teh"], 0.0);
        let edited = turn_of_words("e", &["I", "saw", "the"], 0.0);
        assert_eq!(label_distance("teh", "the"), 2);
        let config = MergerConfig::default();
        let mut run = Run::new(&config, &edited);
        run.map_lists(&original, "word", original.all("word"), edited.all("word"));
        assert_eq!(run.edited_of(&"w2".into()), Some("w2".into()));
        assert_eq!(run.counterparts.len(), 3);
    }
}
