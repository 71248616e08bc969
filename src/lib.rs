//! # ag-kernel
//!
//! Consistency engine for annotation graphs.
//!
//! An annotation graph represents a transcript as labelled annotations on a
//! hierarchy of layers (speakers, turns, utterances, words, ...), each
//! annotation spanning two anchors that carry optional, confidence-rated
//! time offsets. Annotations share anchors wherever their boundaries
//! coincide.
//!
//! ## Core Contract
//!
//! 1. **Merge** an edited copy of a graph into its original, trusting each
//!    side according to its confidence ([`Merger`])
//! 2. **Validate** structural invariants after arbitrary edits and repair
//!    what breaks them ([`Validator`])
//! 3. **Interpolate** missing offsets from the anchors that have them
//!    ([`DefaultOffsetGenerator`])
//!
//! ## Architecture
//!
//! ```text
//! edited graph ─┐
//!               ├→ Merger → Validator → DefaultOffsetGenerator → graph
//! original ─────┘     ↑          ↑
//!                  relink     relink
//! ```
//!
//! Every transform takes `&mut Graph` and implements [`GraphTransformer`]
//! (the merger takes the edited graph as a second argument). Recoverable
//! problems are collected as messages; only conditions that make the result
//! meaningless are returned as [`TransformError`].
//!
//! ## Determinism Guarantees
//!
//! - Same graph + same configuration → same result, and the same
//!   [`graph_fingerprint`]
//! - Validating an already valid graph changes nothing

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
pub mod chain;
pub mod coalescer;
pub mod config;
pub mod edit_path;
pub mod graph;
pub mod logging;
pub mod merger;
pub mod offsets;
pub mod ordering;
pub mod relink;
pub mod transform;
pub mod types;
pub mod validator;

// Re-exports
pub use canonical::{canonical_hash, canonical_hash_hex, graph_fingerprint, to_canonical_bytes};
pub use coalescer::Coalescer;
pub use config::{CoalescerConfig, MergerConfig, OffsetGeneratorConfig, ValidatorConfig};
pub use graph::{Graph, GraphError};
pub use merger::{Counterparts, Merger};
pub use offsets::DefaultOffsetGenerator;
pub use ordering::{compare_by_anchor, sort_by_anchor};
pub use relink::{change_end_with_related, change_start_with_related};
pub use transform::{GraphTransformer, TransformError};
pub use types::{
    Alignment, Anchor, AnchorId, Annotation, AnnotationId, Change, Confidence, Layer, LayerOrder, Schema,
    ROOT_LAYER_ID,
};
pub use validator::Validator;

/// Version of the serialized graph format.
/// Increment on breaking changes to any serialized type.
pub const GRAPH_SCHEMA_VERSION: &str = "1.0.0";
