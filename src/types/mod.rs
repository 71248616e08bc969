//! Core types for annotation graphs.

pub mod anchor;
pub mod annotation;
pub mod confidence;
pub mod layer;
pub mod schema;

pub use anchor::{Anchor, AnchorId};
pub use annotation::{Annotation, AnnotationId};
pub use confidence::{Change, Confidence};
pub use layer::{Alignment, Layer};
pub use schema::{default_peer_order, LayerOrder, Schema, ROOT_LAYER_ID};
