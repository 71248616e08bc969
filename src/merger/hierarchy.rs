//! Parent/child consistency after a merge.

use super::Run;
use crate::graph::Graph;
use crate::transform::GraphTransformer;
use crate::types::{Alignment, AnnotationId, LayerOrder};
use crate::validator::Validator;

impl Run<'_> {
    /// Phase 5: move tags to the counterparts of their edited parents, then
    /// check each layer against its parent layer, top-down.
    pub(super) fn check_hierarchy(&mut self, graph: &mut Graph) {
        let layers: Vec<String> = graph
            .schema()
            .traverse(LayerOrder::TopDown)
            .into_iter()
            .map(|l| l.id.clone())
            .collect();
        let mut validator = Validator::new(self.config.validator.clone());
        for layer_id in layers {
            self.reparent_tags(graph, &layer_id);
            validator.validate_layer(graph, &layer_id);
        }
        self.errors.extend(validator.errors().iter().cloned());
    }

    fn reparent_tags(&mut self, graph: &mut Graph, layer_id: &str) {
        let schema = graph.schema();
        let Some(layer) = schema.layer(layer_id) else {
            return;
        };
        if layer.alignment != Alignment::None || schema.is_top_level(layer_id) {
            return;
        }
        let edited = self.edited;
        if edited.schema().layer(layer_id).is_none() || edited.schema().layer(layer.parent()).is_none() {
            return;
        }
        let moves: Vec<(AnnotationId, AnnotationId)> = graph
            .all(layer_id)
            .into_iter()
            .filter_map(|tag| {
                let their_parent = self.edited_of(&tag).and_then(|e| edited.annotation(&e))?.parent.clone()?;
                let parent = self.original_of(&their_parent)?;
                let current = graph.annotation(&tag)?.parent.clone();
                (current.as_ref() != Some(&parent)).then_some((tag, parent))
            })
            .collect();
        for (tag, parent) in moves {
            tracing::debug!(annotation = %tag, parent = %parent, "Reparenting tag");
            graph.set_parent(&tag, Some(&parent), true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::Merger;
    use crate::graph::Graph;
    use crate::types::{Anchor, Annotation, Confidence, Layer, Schema};

    fn graph(id: &str, topic_parent: &str) -> Graph {
        let schema = Schema::transcript().with_layer(Layer::new("topic", "turn"));
        let mut g = Graph::new(id, schema);
        for (i, off) in [0.0, 0.2, 0.4].iter().enumerate() {
            g.add_anchor(Anchor::new(format!("a{i}").as_str(), Some(*off), Some(Confidence::MANUAL)))
                .unwrap();
        }
        g.add_annotation(Annotation::new("p", "participant", "Lee", "a0", "a2")).unwrap();
        g.add_annotation(Annotation::new("t0", "turn", "Lee", "a0", "a1").with_parent("p")).unwrap();
        g.add_annotation(Annotation::new("t1", "turn", "Lee", "a1", "a2").with_parent("p")).unwrap();
        g.add_annotation(Annotation::new("w0", "word", "run", "a0", "a1").with_parent("t0")).unwrap();
        g.add_annotation(Annotation::new("w1", "word", "fast", "a1", "a2").with_parent("t1")).unwrap();
        g.add_annotation(Annotation::new("x", "topic", "sport", "a0", "a1").with_parent(topic_parent))
            .unwrap();
        g.commit();
        g
    }

    #[test]
    fn test_tag_follows_edited_parent() {
        let mut original = graph("o", "t0");
        let edited = graph("e", "t1");
        Merger::default().merge(&mut original, &edited).unwrap();
        let tag = original.annotation(&"x".into()).unwrap();
        assert!(!tag.is_destroyed());
        assert_eq!(tag.parent, Some("t1".into()));
        assert_eq!(tag.start, "a1".into());
        assert_eq!(tag.end, "a2".into());
    }
}
