//! In-memory annotation graph.
//!
//! The graph owns every anchor and annotation and keeps the indexes the
//! consistency algorithms query constantly:
//!
//! - annotations by layer
//! - annotations starting / ending at each anchor
//! - children of each annotation
//!
//! Every mutation goes through a `Graph` method so the indexes and the change
//! tracker stay in step. Maps are BTree-based so iteration order is
//! deterministic.

pub mod query;
pub mod tracker;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::types::{
    Anchor, AnchorId, Annotation, AnnotationId, Change, Confidence, Schema,
};
use tracker::{AnchorSnapshot, AnnotationSnapshot, ChangeTracker};

/// Error type for graph construction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// Annotation refers to a layer the schema doesn't define.
    #[error("Layer not found: {0}")]
    LayerNotFound(String),
    /// Annotation refers to an anchor that doesn't exist.
    #[error("Anchor not found: {0}")]
    AnchorNotFound(AnchorId),
    /// Annotation refers to a parent that doesn't exist.
    #[error("Parent annotation not found: {0}")]
    ParentNotFound(AnnotationId),
    /// Id already in use.
    #[error("Duplicate id: {0}")]
    DuplicateId(String),
}

/// An annotation graph: schema, anchors, annotations and their indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "GraphData", into = "GraphData")]
pub struct Graph {
    /// Graph identifier (usually the transcript name).
    pub id: String,
    schema: Schema,
    anchors: BTreeMap<AnchorId, Anchor>,
    annotations: BTreeMap<AnnotationId, Annotation>,
    by_layer: BTreeMap<String, BTreeSet<AnnotationId>>,
    starts: HashMap<AnchorId, BTreeSet<AnnotationId>>,
    ends: HashMap<AnchorId, BTreeSet<AnnotationId>>,
    children: HashMap<AnnotationId, BTreeSet<AnnotationId>>,
    offset_granularity: Option<f64>,
    fragment: bool,
    tracker: ChangeTracker,
    next_id: u64,
}

/// Flat serialized form of a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphData {
    id: String,
    schema: Schema,
    #[serde(default)]
    offset_granularity: Option<f64>,
    #[serde(default)]
    fragment: bool,
    anchors: Vec<Anchor>,
    annotations: Vec<Annotation>,
}

impl From<GraphData> for Graph {
    fn from(data: GraphData) -> Self {
        let mut graph = Graph::new(data.id, data.schema);
        graph.offset_granularity = data.offset_granularity;
        graph.fragment = data.fragment;
        for anchor in data.anchors {
            graph.insert_anchor_unchecked(anchor);
        }
        let mut groups = BTreeSet::new();
        for annotation in data.annotations {
            groups.insert((annotation.parent.clone(), annotation.layer_id.clone()));
            graph.insert_annotation_unchecked(annotation);
        }
        for (parent, layer_id) in groups {
            graph.renumber(parent.as_ref(), &layer_id);
        }
        graph.commit();
        graph
    }
}

impl From<Graph> for GraphData {
    fn from(graph: Graph) -> Self {
        GraphData {
            id: graph.id,
            schema: graph.schema,
            offset_granularity: graph.offset_granularity,
            fragment: graph.fragment,
            anchors: graph.anchors.into_values().collect(),
            annotations: graph.annotations.into_values().collect(),
        }
    }
}

impl Graph {
    /// Create an empty graph.
    pub fn new(id: impl Into<String>, schema: Schema) -> Self {
        Self {
            id: id.into(),
            schema,
            anchors: BTreeMap::new(),
            annotations: BTreeMap::new(),
            by_layer: BTreeMap::new(),
            starts: HashMap::new(),
            ends: HashMap::new(),
            children: HashMap::new(),
            offset_granularity: None,
            fragment: false,
            tracker: ChangeTracker::default(),
            next_id: 1,
        }
    }

    /// Builder: set the offset granularity.
    pub fn with_offset_granularity(mut self, granularity: f64) -> Self {
        self.offset_granularity = Some(granularity);
        self
    }

    /// Builder: mark the graph as a fragment of a larger graph.
    pub fn as_fragment(mut self) -> Self {
        self.fragment = true;
        self
    }

    /// The schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Minimum meaningful offset difference, if any.
    pub fn offset_granularity(&self) -> Option<f64> {
        self.offset_granularity
    }

    /// Whether this graph is a fragment whose outer anchors must not move.
    pub fn is_fragment(&self) -> bool {
        self.fragment
    }

    /// Change tracker holding pre-mutation snapshots.
    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────

    /// Look up an anchor.
    pub fn anchor(&self, id: &AnchorId) -> Option<&Anchor> {
        self.anchors.get(id)
    }

    /// Look up an annotation (including destroyed ones).
    pub fn annotation(&self, id: &AnnotationId) -> Option<&Annotation> {
        self.annotations.get(id)
    }

    /// Offset of an anchor, if both anchor and offset exist.
    pub fn offset(&self, id: &AnchorId) -> Option<f64> {
        self.anchors.get(id).and_then(|a| a.offset)
    }

    /// All anchors, ordered by id.
    pub fn anchors(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.values()
    }

    /// All annotations including destroyed ones, ordered by id.
    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.values()
    }

    /// Ids of every annotation on a layer, including destroyed ones.
    pub fn layer_ids(&self, layer_id: &str) -> Vec<AnnotationId> {
        self.by_layer
            .get(layer_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live annotations.
    pub fn live_annotation_count(&self) -> usize {
        self.annotations.values().filter(|a| !a.is_destroyed()).count()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Creation
    // ─────────────────────────────────────────────────────────────────────

    fn fresh_id(&mut self, prefix: &str) -> String {
        loop {
            let candidate = format!("{}_{}", prefix, self.next_id);
            self.next_id += 1;
            let taken = if prefix == "n" {
                self.anchors.contains_key(&AnchorId::new(candidate.clone()))
            } else {
                self.annotations.contains_key(&AnnotationId::new(candidate.clone()))
            };
            if !taken {
                return candidate;
            }
        }
    }

    fn insert_anchor_unchecked(&mut self, anchor: Anchor) {
        self.anchors.insert(anchor.id.clone(), anchor);
    }

    fn insert_annotation_unchecked(&mut self, annotation: Annotation) {
        let id = annotation.id.clone();
        self.by_layer
            .entry(annotation.layer_id.clone())
            .or_default()
            .insert(id.clone());
        self.starts.entry(annotation.start.clone()).or_default().insert(id.clone());
        self.ends.entry(annotation.end.clone()).or_default().insert(id.clone());
        if let Some(parent) = &annotation.parent {
            self.children.entry(parent.clone()).or_default().insert(id.clone());
        }
        self.annotations.insert(id, annotation);
    }

    /// Add an anchor. An empty id is replaced with a fresh one.
    pub fn add_anchor(&mut self, mut anchor: Anchor) -> Result<AnchorId, GraphError> {
        if anchor.id.as_str().is_empty() {
            anchor.id = AnchorId::new(self.fresh_id("n"));
        } else if self.anchors.contains_key(&anchor.id) {
            return Err(GraphError::DuplicateId(anchor.id.to_string()));
        }
        anchor.change = Change::Create;
        let id = anchor.id.clone();
        self.insert_anchor_unchecked(anchor);
        Ok(id)
    }

    /// Create an anchor with a fresh id.
    pub fn create_anchor(&mut self, offset: Option<f64>, confidence: Option<Confidence>) -> AnchorId {
        let id = AnchorId::new(self.fresh_id("n"));
        let mut anchor = Anchor::new(id.clone(), offset, confidence);
        anchor.change = Change::Create;
        self.insert_anchor_unchecked(anchor);
        id
    }

    /// Create a new anchor with the same offset and confidence as `id`.
    pub fn copy_anchor(&mut self, id: &AnchorId) -> Option<AnchorId> {
        let (offset, confidence) = {
            let anchor = self.anchors.get(id)?;
            (anchor.offset, anchor.confidence)
        };
        Some(self.create_anchor(offset, confidence))
    }

    /// Add an annotation.
    ///
    /// Its anchors, layer and parent must exist. Tags (annotations on
    /// unaligned layers) adopt their parent's anchors. An ordinal of 0 appends
    /// the annotation after its live siblings; any other ordinal inserts it at
    /// that position.
    pub fn add_annotation(&mut self, mut annotation: Annotation) -> Result<AnnotationId, GraphError> {
        let aligned = self
            .schema
            .layer(&annotation.layer_id)
            .ok_or_else(|| GraphError::LayerNotFound(annotation.layer_id.clone()))?
            .is_aligned();
        if annotation.id.as_str().is_empty() {
            annotation.id = AnnotationId::new(self.fresh_id("e"));
        } else if self.annotations.contains_key(&annotation.id) {
            return Err(GraphError::DuplicateId(annotation.id.to_string()));
        }
        if let Some(parent_id) = &annotation.parent {
            let parent = self
                .annotations
                .get(parent_id)
                .ok_or_else(|| GraphError::ParentNotFound(parent_id.clone()))?;
            if !aligned {
                annotation.start = parent.start.clone();
                annotation.end = parent.end.clone();
            }
        }
        for anchor in [&annotation.start, &annotation.end] {
            if !self.anchors.contains_key(anchor) {
                return Err(GraphError::AnchorNotFound(anchor.clone()));
            }
        }
        annotation.change = Change::Create;
        let requested_ordinal = annotation.ordinal;
        annotation.ordinal = 0;
        let id = annotation.id.clone();
        let parent = annotation.parent.clone();
        let layer_id = annotation.layer_id.clone();
        self.insert_annotation_unchecked(annotation);
        self.place_among_siblings(&id, parent.as_ref(), &layer_id, requested_ordinal);
        Ok(id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Anchor mutation
    // ─────────────────────────────────────────────────────────────────────

    fn snapshot_anchor(&mut self, id: &AnchorId) {
        if let Some(anchor) = self.anchors.get(id) {
            if anchor.change == Change::NoChange && !self.tracker.anchors.contains_key(id) {
                self.tracker.anchors.insert(
                    id.clone(),
                    AnchorSnapshot {
                        offset: anchor.offset,
                        confidence: anchor.confidence,
                    },
                );
            }
        }
    }

    fn settle_anchor(&mut self, id: &AnchorId) {
        let Some(anchor) = self.anchors.get_mut(id) else {
            return;
        };
        if matches!(anchor.change, Change::Create | Change::Destroy) {
            return;
        }
        match self.tracker.anchors.get(id) {
            Some(snapshot)
                if snapshot.offset == anchor.offset && snapshot.confidence == anchor.confidence =>
            {
                self.tracker.anchors.remove(id);
                anchor.change = Change::NoChange;
            }
            Some(_) => anchor.change = Change::Update,
            None => {}
        }
    }

    /// Set an anchor's offset. Returns whether anything changed.
    pub fn set_offset(&mut self, id: &AnchorId, offset: Option<f64>) -> bool {
        match self.anchors.get(id) {
            Some(anchor) if anchor.offset != offset => {}
            _ => return false,
        }
        self.snapshot_anchor(id);
        if let Some(anchor) = self.anchors.get_mut(id) {
            anchor.offset = offset;
        }
        self.settle_anchor(id);
        true
    }

    /// Set an anchor's confidence. Returns whether anything changed.
    pub fn set_anchor_confidence(&mut self, id: &AnchorId, confidence: Option<Confidence>) -> bool {
        match self.anchors.get(id) {
            Some(anchor) if anchor.confidence != confidence => {}
            _ => return false,
        }
        self.snapshot_anchor(id);
        if let Some(anchor) = self.anchors.get_mut(id) {
            anchor.confidence = confidence;
        }
        self.settle_anchor(id);
        true
    }

    /// Restore an anchor's offset and confidence to their pre-change values.
    pub fn revert_anchor(&mut self, id: &AnchorId) -> bool {
        let Some(snapshot) = self.tracker.anchors.remove(id) else {
            return false;
        };
        if let Some(anchor) = self.anchors.get_mut(id) {
            anchor.offset = snapshot.offset;
            anchor.confidence = snapshot.confidence;
            anchor.change = Change::NoChange;
        }
        true
    }

    /// Remove an anchor outright, provided no annotation references it.
    pub fn remove_anchor(&mut self, id: &AnchorId) -> bool {
        if self.is_referenced(id) {
            return false;
        }
        self.starts.remove(id);
        self.ends.remove(id);
        self.tracker.anchors.remove(id);
        self.anchors.remove(id).is_some()
    }

    /// Whether any annotation, live or destroyed, starts or ends at the anchor.
    pub fn is_referenced(&self, id: &AnchorId) -> bool {
        self.starts.get(id).map_or(false, |s| !s.is_empty())
            || self.ends.get(id).map_or(false, |s| !s.is_empty())
    }

    /// Remove every anchor that no annotation refers to. Returns how many
    /// were removed.
    pub fn prune_anchors(&mut self) -> usize {
        let unreferenced: Vec<AnchorId> = self
            .anchors
            .keys()
            .filter(|id| !self.is_referenced(id))
            .cloned()
            .collect();
        for id in &unreferenced {
            self.remove_anchor(id);
        }
        unreferenced.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Annotation mutation
    // ─────────────────────────────────────────────────────────────────────

    fn snapshot_annotation(&mut self, id: &AnnotationId) {
        if let Some(a) = self.annotations.get(id) {
            if a.change == Change::NoChange && !self.tracker.annotations.contains_key(id) {
                self.tracker.annotations.insert(
                    id.clone(),
                    AnnotationSnapshot {
                        label: a.label.clone(),
                        start: a.start.clone(),
                        end: a.end.clone(),
                        parent: a.parent.clone(),
                        ordinal: a.ordinal,
                        confidence: a.confidence,
                    },
                );
            }
        }
    }

    fn settle_annotation(&mut self, id: &AnnotationId) {
        let Some(a) = self.annotations.get_mut(id) else {
            return;
        };
        if matches!(a.change, Change::Create | Change::Destroy) {
            return;
        }
        match self.tracker.annotations.get(id) {
            Some(s)
                if s.label == a.label
                    && s.start == a.start
                    && s.end == a.end
                    && s.parent == a.parent
                    && s.ordinal == a.ordinal
                    && s.confidence == a.confidence =>
            {
                self.tracker.annotations.remove(id);
                a.change = Change::NoChange;
            }
            Some(_) => a.change = Change::Update,
            None => {}
        }
    }

    fn update_annotation<F: FnOnce(&mut Annotation)>(&mut self, id: &AnnotationId, f: F) {
        self.snapshot_annotation(id);
        if let Some(a) = self.annotations.get_mut(id) {
            f(a);
        }
        self.settle_annotation(id);
    }

    /// Set an annotation's label. Returns whether anything changed.
    pub fn set_label(&mut self, id: &AnnotationId, label: impl Into<String>) -> bool {
        let label = label.into();
        match self.annotations.get(id) {
            Some(a) if a.label != label => {}
            _ => return false,
        }
        self.update_annotation(id, |a| a.label = label);
        true
    }

    /// Set an annotation's label confidence. Returns whether anything changed.
    pub fn set_confidence(&mut self, id: &AnnotationId, confidence: Option<Confidence>) -> bool {
        match self.annotations.get(id) {
            Some(a) if a.confidence != confidence => {}
            _ => return false,
        }
        self.update_annotation(id, |a| a.confidence = confidence);
        true
    }

    /// Move an annotation's start to another anchor.
    ///
    /// Tags on the annotation follow it.
    pub fn set_start(&mut self, id: &AnnotationId, anchor: &AnchorId) -> bool {
        let old = match self.annotations.get(id) {
            Some(a) if &a.start != anchor && self.anchors.contains_key(anchor) => a.start.clone(),
            _ => return false,
        };
        if let Some(set) = self.starts.get_mut(&old) {
            set.remove(id);
        }
        self.starts.entry(anchor.clone()).or_default().insert(id.clone());
        let new = anchor.clone();
        self.update_annotation(id, |a| a.start = new);
        for tag in self.tag_children(id) {
            self.set_start(&tag, anchor);
        }
        true
    }

    /// Move an annotation's end to another anchor.
    ///
    /// Tags on the annotation follow it.
    pub fn set_end(&mut self, id: &AnnotationId, anchor: &AnchorId) -> bool {
        let old = match self.annotations.get(id) {
            Some(a) if &a.end != anchor && self.anchors.contains_key(anchor) => a.end.clone(),
            _ => return false,
        };
        if let Some(set) = self.ends.get_mut(&old) {
            set.remove(id);
        }
        self.ends.entry(anchor.clone()).or_default().insert(id.clone());
        let new = anchor.clone();
        self.update_annotation(id, |a| a.end = new);
        for tag in self.tag_children(id) {
            self.set_end(&tag, anchor);
        }
        true
    }

    fn tag_children(&self, id: &AnnotationId) -> Vec<AnnotationId> {
        self.children
            .get(id)
            .map(|kids| {
                kids.iter()
                    .filter(|kid| {
                        self.annotations
                            .get(*kid)
                            .and_then(|a| self.schema.layer(&a.layer_id))
                            .map_or(false, |layer| !layer.is_aligned())
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Attach an annotation to a new parent (or detach it with `None`).
    ///
    /// With `append`, the annotation becomes the last of its new siblings;
    /// otherwise its current ordinal is kept as the insertion position.
    /// Ordinals of old and new siblings are renumbered contiguously.
    pub fn set_parent(&mut self, id: &AnnotationId, parent: Option<&AnnotationId>, append: bool) -> bool {
        let (old_parent, layer_id, ordinal) = match self.annotations.get(id) {
            Some(a) if a.parent.as_ref() != parent => (a.parent.clone(), a.layer_id.clone(), a.ordinal),
            _ => return false,
        };
        if let Some(p) = parent {
            if !self.annotations.contains_key(p) {
                return false;
            }
        }
        if let Some(old) = &old_parent {
            if let Some(kids) = self.children.get_mut(old) {
                kids.remove(id);
            }
        }
        if let Some(p) = parent {
            self.children.entry(p.clone()).or_default().insert(id.clone());
        }
        let new_parent = parent.cloned();
        self.update_annotation(id, |a| a.parent = new_parent);
        self.renumber(old_parent.as_ref(), &layer_id);
        let position = if append { 0 } else { ordinal };
        self.place_among_siblings(id, parent, &layer_id, position);

        // tags take their parent's anchors
        let tag = self.schema.layer(&layer_id).map_or(false, |l| !l.is_aligned());
        if tag {
            if let Some((start, end)) = parent
                .and_then(|p| self.annotations.get(p))
                .map(|p| (p.start.clone(), p.end.clone()))
            {
                self.set_start(id, &start);
                self.set_end(id, &end);
            }
        }
        true
    }

    /// Move an annotation to position `ordinal` (1-based) among its live
    /// siblings, renumbering the others.
    pub fn set_ordinal(&mut self, id: &AnnotationId, ordinal: u32) -> bool {
        let (parent, layer_id, current) = match self.annotations.get(id) {
            Some(a) => (a.parent.clone(), a.layer_id.clone(), a.ordinal),
            None => return false,
        };
        if current == ordinal {
            return false;
        }
        self.place_among_siblings(id, parent.as_ref(), &layer_id, ordinal.max(1));
        true
    }

    /// Mark an annotation as destroyed and renumber its live siblings.
    ///
    /// Children are left in place; the validator reparents or destroys them.
    pub fn destroy(&mut self, id: &AnnotationId) -> bool {
        let (parent, layer_id) = match self.annotations.get(id) {
            Some(a) if !a.is_destroyed() => (a.parent.clone(), a.layer_id.clone()),
            _ => return false,
        };
        self.snapshot_annotation(id);
        if let Some(a) = self.annotations.get_mut(id) {
            a.change = Change::Destroy;
        }
        self.renumber(parent.as_ref(), &layer_id);
        true
    }

    /// Live siblings in ordinal order, unnumbered ones last.
    fn ordered_siblings(&self, parent: Option<&AnnotationId>, layer_id: &str) -> Vec<AnnotationId> {
        let mut siblings: Vec<&Annotation> = match parent {
            Some(p) => self
                .children
                .get(p)
                .map(|kids| kids.iter().filter_map(|k| self.annotations.get(k)).collect())
                .unwrap_or_default(),
            None => self
                .by_layer
                .get(layer_id)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|k| self.annotations.get(k))
                        .filter(|a| a.parent.is_none())
                        .collect()
                })
                .unwrap_or_default(),
        };
        siblings.retain(|a| a.layer_id == layer_id && !a.is_destroyed());
        siblings.sort_by(|a, b| {
            let key = |x: &Annotation| if x.ordinal == 0 { u32::MAX } else { x.ordinal };
            key(a).cmp(&key(b)).then_with(|| a.id.cmp(&b.id))
        });
        siblings.into_iter().map(|a| a.id.clone()).collect()
    }

    fn write_ordinals(&mut self, ordered: &[AnnotationId]) {
        for (i, sibling) in ordered.iter().enumerate() {
            let ordinal = i as u32 + 1;
            if self.annotations.get(sibling).map_or(false, |a| a.ordinal != ordinal) {
                self.update_annotation(sibling, |a| a.ordinal = ordinal);
            }
        }
    }

    fn renumber(&mut self, parent: Option<&AnnotationId>, layer_id: &str) {
        let ordered = self.ordered_siblings(parent, layer_id);
        self.write_ordinals(&ordered);
    }

    /// Put `id` at `position` (1-based, 0 = last) among its siblings.
    fn place_among_siblings(
        &mut self,
        id: &AnnotationId,
        parent: Option<&AnnotationId>,
        layer_id: &str,
        position: u32,
    ) {
        let mut ordered = self.ordered_siblings(parent, layer_id);
        ordered.retain(|s| s != id);
        if self.annotations.get(id).map_or(false, |a| !a.is_destroyed()) {
            let index = if position == 0 {
                ordered.len()
            } else {
                (position as usize - 1).min(ordered.len())
            };
            ordered.insert(index, id.clone());
        }
        self.write_ordinals(&ordered);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Commit / rollback
    // ─────────────────────────────────────────────────────────────────────

    /// Accept all pending changes.
    ///
    /// Destroyed annotations are removed, then anchors no annotation refers
    /// to, and every remaining entity returns to [`Change::NoChange`].
    pub fn commit(&mut self) {
        let destroyed: Vec<AnnotationId> = self
            .annotations
            .values()
            .filter(|a| a.is_destroyed())
            .map(|a| a.id.clone())
            .collect();
        for id in &destroyed {
            self.unlink_annotation(id);
        }
        let unreferenced: Vec<AnchorId> = self
            .anchors
            .keys()
            .filter(|id| !self.is_referenced(id) && self.anchors[*id].change == Change::Destroy)
            .cloned()
            .collect();
        for id in unreferenced {
            self.anchors.remove(&id);
        }
        for anchor in self.anchors.values_mut() {
            anchor.change = Change::NoChange;
        }
        for annotation in self.annotations.values_mut() {
            annotation.change = Change::NoChange;
        }
        self.tracker.clear();
    }

    /// Discard all pending changes: created entities are removed, updated
    /// and destroyed ones get their snapshot values back.
    pub fn rollback(&mut self) {
        let created_anchors: BTreeSet<AnchorId> = self
            .anchors
            .values()
            .filter(|a| a.change == Change::Create)
            .map(|a| a.id.clone())
            .collect();
        let created: Vec<AnnotationId> = self
            .annotations
            .values()
            .filter(|a| a.change == Change::Create)
            .map(|a| a.id.clone())
            .collect();
        for id in &created {
            self.unlink_annotation(id);
        }
        let snapshots = std::mem::take(&mut self.tracker.annotations);
        for (id, snapshot) in snapshots {
            let Some(current) = self.annotations.get(&id).cloned() else {
                continue;
            };
            self.starts.entry(current.start.clone()).or_default().remove(&id);
            self.ends.entry(current.end.clone()).or_default().remove(&id);
            if let Some(p) = &current.parent {
                if let Some(kids) = self.children.get_mut(p) {
                    kids.remove(&id);
                }
            }
            self.starts.entry(snapshot.start.clone()).or_default().insert(id.clone());
            self.ends.entry(snapshot.end.clone()).or_default().insert(id.clone());
            if let Some(p) = &snapshot.parent {
                self.children.entry(p.clone()).or_default().insert(id.clone());
            }
            if let Some(a) = self.annotations.get_mut(&id) {
                a.label = snapshot.label;
                a.start = snapshot.start;
                a.end = snapshot.end;
                a.parent = snapshot.parent;
                a.ordinal = snapshot.ordinal;
                a.confidence = snapshot.confidence;
            }
        }
        let anchor_snapshots = std::mem::take(&mut self.tracker.anchors);
        for (id, snapshot) in anchor_snapshots {
            if let Some(anchor) = self.anchors.get_mut(&id) {
                anchor.offset = snapshot.offset;
                anchor.confidence = snapshot.confidence;
            }
        }
        for id in &created_anchors {
            self.starts.remove(id);
            self.ends.remove(id);
            self.anchors.remove(id);
        }
        for anchor in self.anchors.values_mut() {
            anchor.change = Change::NoChange;
        }
        for annotation in self.annotations.values_mut() {
            annotation.change = Change::NoChange;
        }
    }

    fn unlink_annotation(&mut self, id: &AnnotationId) {
        let Some(annotation) = self.annotations.remove(id) else {
            return;
        };
        if let Some(set) = self.by_layer.get_mut(&annotation.layer_id) {
            set.remove(id);
        }
        if let Some(set) = self.starts.get_mut(&annotation.start) {
            set.remove(id);
        }
        if let Some(set) = self.ends.get_mut(&annotation.end) {
            set.remove(id);
        }
        if let Some(p) = &annotation.parent {
            if let Some(kids) = self.children.get_mut(p) {
                kids.remove(id);
            }
        }
        for anchor in [&annotation.start, &annotation.end] {
            if !self.is_referenced(anchor) {
                if let Some(a) = self.anchors.get_mut(anchor) {
                    a.change = Change::Destroy;
                }
            }
        }
        self.tracker.annotations.remove(id);
    }

    /// Anchors created or updated since the last commit.
    pub fn changed_anchors(&self) -> Vec<AnchorId> {
        self.anchors
            .values()
            .filter(|a| a.change.is_pending())
            .map(|a| a.id.clone())
            .collect()
    }

    /// Annotations created, updated or destroyed since the last commit.
    pub fn changed_annotations(&self) -> Vec<AnnotationId> {
        self.annotations
            .values()
            .filter(|a| a.change.is_pending())
            .map(|a| a.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Schema;

    fn two_words() -> Graph {
        let mut g = Graph::new("t", Schema::transcript());
        for (id, off) in [("a0", 0.0), ("a1", 1.0), ("a2", 2.0)] {
            g.add_anchor(Anchor::new(id, Some(off), Some(Confidence::MANUAL))).unwrap();
        }
        g.add_annotation(Annotation::new("p", "participant", "john", "a0", "a2")).unwrap();
        g.add_annotation(Annotation::new("t", "turn", "john", "a0", "a2").with_parent("p")).unwrap();
        g.add_annotation(Annotation::new("w1", "word", "the", "a0", "a1").with_parent("t")).unwrap();
        g.add_annotation(Annotation::new("w2", "word", "cat", "a1", "a2").with_parent("t")).unwrap();
        g.commit();
        g
    }

    #[test]
    fn test_ordinals_assigned_on_insert() {
        let g = two_words();
        assert_eq!(g.annotation(&"w1".into()).unwrap().ordinal, 1);
        assert_eq!(g.annotation(&"w2".into()).unwrap().ordinal, 2);
    }

    #[test]
    fn test_insert_at_position_renumbers() {
        let mut g = two_words();
        let w0 = Annotation::new("w0", "word", "oh", "a0", "a0")
            .with_parent("t")
            .with_ordinal(1);
        g.add_annotation(w0).unwrap();
        assert_eq!(g.annotation(&"w0".into()).unwrap().ordinal, 1);
        assert_eq!(g.annotation(&"w1".into()).unwrap().ordinal, 2);
        assert_eq!(g.annotation(&"w2".into()).unwrap().ordinal, 3);
        assert_eq!(g.annotation(&"w2".into()).unwrap().change, Change::Update);
    }

    #[test]
    fn test_destroy_renumbers_live_siblings() {
        let mut g = two_words();
        g.destroy(&"w1".into());
        assert_eq!(g.annotation(&"w2".into()).unwrap().ordinal, 1);
        g.commit();
        assert!(g.annotation(&"w1".into()).is_none());
        // a0 is still the turn's start, so it survives
        assert!(g.anchor(&"a0".into()).is_some());
    }

    #[test]
    fn test_setting_original_value_clears_change() {
        let mut g = two_words();
        let a1 = AnchorId::from("a1");
        assert!(g.set_offset(&a1, Some(1.5)));
        assert_eq!(g.anchor(&a1).unwrap().change, Change::Update);
        assert!(g.set_offset(&a1, Some(1.0)));
        assert_eq!(g.anchor(&a1).unwrap().change, Change::NoChange);
        assert!(g.changed_anchors().is_empty());
    }

    #[test]
    fn test_revert_anchor_restores_snapshot() {
        let mut g = two_words();
        let a1 = AnchorId::from("a1");
        g.set_offset(&a1, None);
        g.set_anchor_confidence(&a1, Some(Confidence::NONE));
        assert!(g.revert_anchor(&a1));
        assert_eq!(g.offset(&a1), Some(1.0));
        assert_eq!(g.anchor(&a1).unwrap().confidence, Some(Confidence::MANUAL));
    }

    #[test]
    fn test_rollback_discards_everything() {
        let mut g = two_words();
        let n = g.create_anchor(Some(1.5), None);
        g.set_end(&"w1".into(), &n);
        g.set_label(&"w2".into(), "dog");
        g.destroy(&"w2".into());
        g.rollback();
        assert!(g.anchor(&n).is_none());
        let w1 = g.annotation(&"w1".into()).unwrap();
        assert_eq!(w1.end, AnchorId::from("a1"));
        let w2 = g.annotation(&"w2".into()).unwrap();
        assert_eq!(w2.label, "cat");
        assert!(!w2.is_destroyed());
        assert_eq!(g.ending_at(&"a1".into()), vec![AnnotationId::from("w1")]);
    }

    #[test]
    fn test_tags_follow_parent_anchors() {
        let schema = Schema::transcript().with_layer(crate::types::Layer::new("pos", "word"));
        let mut g = Graph::new("t", schema);
        g.add_anchor(Anchor::new("a0", Some(0.0), None)).unwrap();
        g.add_anchor(Anchor::new("a1", Some(1.0), None)).unwrap();
        g.add_anchor(Anchor::new("a2", Some(2.0), None)).unwrap();
        g.add_annotation(Annotation::new("w", "word", "cat", "a0", "a1")).unwrap();
        g.add_annotation(Annotation::new("pos", "pos", "N", "a0", "a0").with_parent("w")).unwrap();
        assert_eq!(g.annotation(&"pos".into()).unwrap().end, AnchorId::from("a1"));
        g.set_end(&"w".into(), &"a2".into());
        assert_eq!(g.annotation(&"pos".into()).unwrap().end, AnchorId::from("a2"));
    }

    #[test]
    fn test_json_round_trip_keeps_indexes() {
        let g = two_words();
        let json = serde_json::to_string(&g).unwrap();
        let back: Graph = serde_json::from_str(&json).unwrap();
        assert_eq!(back.children(&"t".into(), "word").len(), 2);
        assert_eq!(back.starting_at(&"a1".into()), vec![AnnotationId::from("w2")]);
        assert!(back.changed_annotations().is_empty());
    }

    #[test]
    fn test_prune_removes_only_unreferenced() {
        let mut g = two_words();
        let spare = g.create_anchor(Some(5.0), None);
        assert_eq!(g.prune_anchors(), 1);
        assert!(g.anchor(&spare).is_none());
        assert!(g.anchor(&"a1".into()).is_some());
    }

    #[test]
    fn test_add_annotation_rejects_unknown_anchor() {
        let mut g = two_words();
        let err = g.add_annotation(Annotation::new("x", "word", "x", "zz", "a1")).unwrap_err();
        assert_eq!(err, GraphError::AnchorNotFound("zz".into()));
    }
}
