//! Canonical serialization and graph fingerprints.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: Struct fields serialize in declaration order
//! - Stable Vec order: Vectors serialize in index order
//! - No HashMap allowed: Use BTreeMap for maps in hashed data
//! - Fingerprints cover live state only, so a destroyed-then-committed
//!   annotation and one never created hash the same

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

use crate::graph::Graph;
use crate::types::Confidence;

/// Serialize a value to canonical JSON bytes for hashing.
///
/// Values that cannot be represented as JSON (maps with non-string keys)
/// hash as the empty byte string.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

/// Compute canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    let bytes = to_canonical_bytes(value);
    xxh64(&bytes, 0)
}

/// Compute canonical hash and return as hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}

#[derive(Serialize)]
struct AnchorState<'a> {
    id: &'a str,
    offset: Option<u64>,
    confidence: Option<Confidence>,
}

#[derive(Serialize)]
struct AnnotationState<'a> {
    id: &'a str,
    layer: &'a str,
    label: &'a str,
    start: &'a str,
    end: &'a str,
    parent: Option<&'a str>,
    ordinal: u32,
    confidence: Option<Confidence>,
}

#[derive(Serialize)]
struct GraphState<'a> {
    version: &'static str,
    anchors: Vec<AnchorState<'a>>,
    annotations: Vec<AnnotationState<'a>>,
}

/// Fingerprint of the live content of a graph.
///
/// Offsets are hashed bit-exactly; anchors no live annotation uses are left
/// out. The serialized format version is part of the hash.
pub fn graph_fingerprint(graph: &Graph) -> String {
    let state = GraphState {
        version: crate::GRAPH_SCHEMA_VERSION,
        anchors: graph
            .anchors()
            .filter(|a| graph.is_linked(&a.id))
            .map(|a| AnchorState {
                id: a.id.as_str(),
                offset: a.offset.map(f64::to_bits),
                confidence: a.confidence,
            })
            .collect(),
        annotations: graph
            .annotations()
            .filter(|a| !a.is_destroyed())
            .map(|a| AnnotationState {
                id: a.id.as_str(),
                layer: &a.layer_id,
                label: &a.label,
                start: a.start.as_str(),
                end: a.end.as_str(),
                parent: a.parent.as_ref().map(|p| p.as_str()),
                ordinal: a.ordinal,
                confidence: a.confidence,
            })
            .collect(),
    };
    canonical_hash_hex(&state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Anchor, Annotation, Schema};

    #[derive(Serialize)]
    struct TestStruct {
        name: String,
        value: i32,
    }

    #[test]
    fn test_determinism() {
        let s = TestStruct {
            name: "test".to_string(),
            value: 42,
        };

        let h1 = canonical_hash(&s);
        let h2 = canonical_hash(&s);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_fingerprint_tracks_offsets() {
        let mut g = Graph::new("g", Schema::transcript());
        g.add_anchor(Anchor::new("a", Some(0.0), None)).unwrap();
        g.add_anchor(Anchor::new("b", Some(1.0), None)).unwrap();
        g.add_annotation(Annotation::new("w", "word", "hi", "a", "b")).unwrap();
        let before = graph_fingerprint(&g);
        assert_eq!(before, graph_fingerprint(&g.clone()));
        g.set_offset(&"b".into(), Some(1.5));
        assert_ne!(before, graph_fingerprint(&g));
    }
}
