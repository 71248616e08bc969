//! Layer hierarchy and the traversal utility every transform uses.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::layer::{Alignment, Layer};

/// Identifier of the root layer.
pub const ROOT_LAYER_ID: &str = "graph";

/// Direction of a layer traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerOrder {
    /// Parents before their children.
    TopDown,
    /// Children before their parents.
    BottomUp,
}

/// The tree of layers of a graph, plus the ids of well-known layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    root: Layer,
    layers: BTreeMap<String, Layer>,
    /// Layer of speaker annotations.
    #[serde(default)]
    pub participant_layer_id: Option<String>,
    /// Layer of speaker turns.
    #[serde(default)]
    pub turn_layer_id: Option<String>,
    /// Layer of utterance (line) annotations.
    #[serde(default)]
    pub utterance_layer_id: Option<String>,
    /// Layer of word tokens.
    #[serde(default)]
    pub word_layer_id: Option<String>,
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema {
    /// Create a schema holding only the root layer.
    pub fn new() -> Self {
        Self {
            root: Layer::root(ROOT_LAYER_ID).with_alignment(Alignment::Interval),
            layers: BTreeMap::new(),
            participant_layer_id: None,
            turn_layer_id: None,
            utterance_layer_id: None,
            word_layer_id: None,
        }
    }

    /// The usual transcript hierarchy:
    ///
    /// ```text
    /// graph
    /// └── participant          (tags, peers overlap)
    ///     └── turn             (interval)
    ///         ├── utterance    (interval, saturated)
    ///         └── word         (interval)
    /// ```
    pub fn transcript() -> Self {
        let mut schema = Self::new();
        schema.add_layer(
            Layer::new("participant", ROOT_LAYER_ID)
                .with_peers_overlap(true)
                .with_description("Speakers"),
        );
        schema.add_layer(
            Layer::new("turn", "participant")
                .with_alignment(Alignment::Interval)
                .with_description("Speaker turns"),
        );
        schema.add_layer(
            Layer::new("utterance", "turn")
                .with_alignment(Alignment::Interval)
                .with_saturated(true)
                .with_description("Lines"),
        );
        schema.add_layer(
            Layer::new("word", "turn")
                .with_alignment(Alignment::Interval)
                .with_description("Word tokens"),
        );
        schema.participant_layer_id = Some("participant".to_string());
        schema.turn_layer_id = Some("turn".to_string());
        schema.utterance_layer_id = Some("utterance".to_string());
        schema.word_layer_id = Some("word".to_string());
        schema
    }

    /// Builder: add a layer.
    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.add_layer(layer);
        self
    }

    /// Add a layer. A layer without a parent is attached to the root.
    /// Returns `false` if a layer with that id already exists.
    pub fn add_layer(&mut self, mut layer: Layer) -> bool {
        if layer.id == self.root.id || self.layers.contains_key(&layer.id) {
            return false;
        }
        if layer.parent_id.as_deref().map_or(true, str::is_empty) {
            layer.parent_id = Some(self.root.id.clone());
        }
        self.layers.insert(layer.id.clone(), layer);
        true
    }

    /// The root layer.
    pub fn root(&self) -> &Layer {
        &self.root
    }

    /// Id of the root layer.
    pub fn root_id(&self) -> &str {
        &self.root.id
    }

    /// Look up a layer, including the root.
    pub fn layer(&self, id: &str) -> Option<&Layer> {
        if id == self.root.id {
            Some(&self.root)
        } else {
            self.layers.get(id)
        }
    }

    /// All non-root layers, ordered by id.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    /// Whether the layer's parent is the root.
    pub fn is_top_level(&self, id: &str) -> bool {
        self.layers
            .get(id)
            .map_or(false, |layer| layer.parent() == self.root.id)
    }

    /// Parent of a layer (the root for top-level layers), `None` for the root.
    pub fn parent_of(&self, id: &str) -> Option<&Layer> {
        let layer = self.layers.get(id)?;
        self.layer(layer.parent())
    }

    /// Direct child layers, ordered by [`default_peer_order`].
    pub fn children_of(&self, id: &str) -> Vec<&Layer> {
        let mut children: Vec<&Layer> = self
            .layers
            .values()
            .filter(|layer| layer.parent() == id)
            .collect();
        children.sort_by(|a, b| default_peer_order(self, a, b));
        children
    }

    /// Whether `ancestor_id` lies on the path from `id` to the root.
    pub fn is_ancestor(&self, id: &str, ancestor_id: &str) -> bool {
        let mut current = self.layers.get(id).map(|layer| layer.parent().to_string());
        while let Some(parent) = current {
            if parent == ancestor_id {
                return true;
            }
            current = self.layers.get(&parent).map(|layer| layer.parent().to_string());
        }
        false
    }

    /// Ancestor layers of `id`, nearest first, excluding the root.
    pub fn ancestors(&self, id: &str) -> Vec<&Layer> {
        let mut ancestors = Vec::new();
        let mut current = self.layers.get(id);
        while let Some(layer) = current {
            current = self.layers.get(layer.parent());
            if let Some(parent) = current {
                ancestors.push(parent);
            }
        }
        ancestors
    }

    /// Aligned child layers of the word layer.
    pub fn word_child_layers(&self) -> Vec<&Layer> {
        match &self.word_layer_id {
            Some(word) => self
                .children_of(word)
                .into_iter()
                .filter(|layer| layer.is_aligned())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Whether `id` names the word layer or one of its children.
    pub fn is_word_or_word_child(&self, id: &str) -> bool {
        match &self.word_layer_id {
            Some(word) => id == word || self.parent_of(id).map_or(false, |p| &p.id == word),
            None => false,
        }
    }

    /// All non-root layers in depth-first order using the default peer order.
    pub fn traverse(&self, order: LayerOrder) -> Vec<&Layer> {
        self.traverse_by(order, default_peer_order)
    }

    /// All non-root layers in depth-first order, siblings ordered by `cmp`.
    ///
    /// Top-down lists each layer before its descendants; bottom-up lists each
    /// layer after them.
    pub fn traverse_by<F>(&self, order: LayerOrder, cmp: F) -> Vec<&Layer>
    where
        F: Fn(&Schema, &Layer, &Layer) -> Ordering,
    {
        let mut result = Vec::with_capacity(self.layers.len());
        self.visit(self.root_id(), order, &cmp, &mut result);
        result
    }

    fn visit<'a, F>(&'a self, id: &str, order: LayerOrder, cmp: &F, out: &mut Vec<&'a Layer>)
    where
        F: Fn(&Schema, &Layer, &Layer) -> Ordering,
    {
        let mut children: Vec<&Layer> = self
            .layers
            .values()
            .filter(|layer| layer.parent() == id)
            .collect();
        children.sort_by(|a, b| cmp(self, a, b));
        for child in children {
            if order == LayerOrder::TopDown {
                out.push(child);
            }
            self.visit(&child.id, order, cmp, out);
            if order == LayerOrder::BottomUp {
                out.push(child);
            }
        }
    }
}

/// Default ordering of sibling layers.
///
/// Layers that don't include their children come first, then lower alignment,
/// non-peer layers, layers with fewer children, saturated layers, and
/// overlapping layers; ids break ties.
pub fn default_peer_order(schema: &Schema, a: &Layer, b: &Layer) -> Ordering {
    let child_count = |layer: &Layer| schema.layers().filter(|l| l.parent() == layer.id).count();
    a.parent_includes
        .cmp(&b.parent_includes)
        .then(a.alignment.cmp(&b.alignment))
        .then(a.peers.cmp(&b.peers))
        .then_with(|| child_count(a).cmp(&child_count(b)))
        .then(b.saturated.cmp(&a.saturated))
        .then(b.peers_overlap.cmp(&a.peers_overlap))
        .then_with(|| a.id.cmp(&b.id))
}
