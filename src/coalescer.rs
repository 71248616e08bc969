//! Merging neighbouring annotations on one layer.
//!
//! Within each parent, peers are ordered by anchor and walked from the end.
//! A pair is merged when the two share an anchor, when they touch or
//! overlap, or when the pause between them is no longer than the configured
//! minimum and nothing else on the layer falls inside it. The preceding
//! annotation absorbs the following one: it takes the later end, adopts the
//! children, and the following annotation is destroyed.

use std::collections::BTreeMap;

use crate::config::CoalescerConfig;
use crate::graph::Graph;
use crate::ordering::sort_by_anchor;
use crate::transform::{GraphTransformer, TransformError};
use crate::types::AnnotationId;

/// Merges adjacent annotations on a layer.
#[derive(Debug, Clone, Default)]
pub struct Coalescer {
    config: CoalescerConfig,
}

impl Coalescer {
    /// Create a coalescer.
    pub fn new(config: CoalescerConfig) -> Self {
        Self { config }
    }

    /// Current configuration.
    pub fn config(&self) -> &CoalescerConfig {
        &self.config
    }

    /// Peer groups in anchor order.
    fn peer_groups(&self, graph: &Graph) -> Vec<Vec<AnnotationId>> {
        let layer_id = self.config.layer_id.as_str();
        let schema = graph.schema();
        let mut groups: Vec<Vec<AnnotationId>> = if schema.is_top_level(layer_id) {
            vec![graph.all(layer_id)]
        } else {
            let parent_layer = schema.layer(layer_id).map(|l| l.parent().to_string()).unwrap_or_default();
            graph
                .all(&parent_layer)
                .iter()
                .map(|parent| graph.children(parent, layer_id))
                .collect()
        };
        for group in &mut groups {
            sort_by_anchor(graph, group);
        }
        if !self.config.match_labels {
            return groups;
        }
        let mut by_label = Vec::new();
        for group in groups {
            let mut split: BTreeMap<String, Vec<AnnotationId>> = BTreeMap::new();
            for id in group {
                let label = graph.annotation(&id).map(|a| a.label.clone()).unwrap_or_default();
                split.entry(label).or_default().push(id);
            }
            by_label.extend(split.into_values());
        }
        by_label
    }

    fn should_merge(&self, graph: &Graph, preceding: &AnnotationId, following: &AnnotationId) -> bool {
        let (Some(p), Some(f)) = (graph.annotation(preceding), graph.annotation(following)) else {
            return false;
        };
        if graph.anchor(&f.end).is_none() {
            return false;
        }
        if p.end == f.start {
            return true;
        }
        let (Some(end), Some(start)) = (graph.offset(&p.end), graph.offset(&f.start)) else {
            return false;
        };
        if end >= start {
            return true;
        }
        let pause = self.config.minimum_pause_length;
        pause > 0.0 && end + pause >= start && graph.overlapping(end, start, &self.config.layer_id).is_empty()
    }

    fn merge_pair(&self, graph: &mut Graph, preceding: &AnnotationId, following: &AnnotationId) {
        let (Some(p), Some(f)) = (graph.annotation(preceding).cloned(), graph.annotation(following).cloned()) else {
            return;
        };
        tracing::debug!(preceding = %p, following = %f, "Coalescing");
        let extend = match (graph.offset(&p.end), graph.offset(&f.end)) {
            (Some(ours), Some(theirs)) => ours < theirs,
            _ => true,
        };
        if extend {
            graph.set_end(preceding, &f.end);
        }
        if let Some(separator) = &self.config.label_separator {
            graph.set_label(preceding, format!("{}{separator}{}", p.label, f.label));
        }

        for child_layer in graph.child_layers(following) {
            for child in graph.children(following, &child_layer) {
                graph.set_parent(&child, Some(preceding), true);
            }
            let saturated = graph.schema().layer(&child_layer).map_or(false, |l| l.saturated);
            if !saturated {
                continue;
            }
            // close the gap the merge left between the children
            let ending: Vec<AnnotationId> = graph
                .ending_on(&p.end, &child_layer)
                .into_iter()
                .filter(|c| graph.annotation(c).map_or(false, |c| c.parent.as_ref() == Some(preceding)))
                .collect();
            if ending.is_empty() {
                continue;
            }
            for child in ending {
                graph.set_end(&child, &f.start);
            }
            let others: Vec<AnnotationId> = graph
                .ending_at(&p.end)
                .into_iter()
                .filter(|a| {
                    graph
                        .annotation(a)
                        .map_or(false, |a| a.layer_id != self.config.layer_id && a.layer_id != child_layer)
                })
                .collect();
            for other in others {
                graph.set_end(&other, &f.start);
            }
        }
        graph.destroy(following);
    }
}

impl GraphTransformer for Coalescer {
    fn transform(&mut self, graph: &mut Graph) -> Result<(), TransformError> {
        let layer_id = self.config.layer_id.clone();
        let _span = tracing::debug_span!("coalescer", graph = %graph.id, layer = %layer_id).entered();
        if graph.schema().layer(&layer_id).is_none() {
            return Err(TransformError::LayerNotFound(layer_id));
        }
        let mut merged = 0usize;
        for peers in self.peer_groups(graph) {
            for i in (0..peers.len().saturating_sub(1)).rev() {
                let (preceding, following) = (&peers[i], &peers[i + 1]);
                if self.should_merge(graph, preceding, following) {
                    self.merge_pair(graph, preceding, following);
                    merged += 1;
                }
            }
        }
        tracing::debug!(merged, "Coalescing finished");
        Ok(())
    }
}
