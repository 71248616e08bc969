//! Typed configuration for each transformer.
//!
//! ## Float Normalization for Deterministic Hashing
//!
//! Floats are quantized to integers before hashing (multiply by 1e6 and round
//! to i64) so `params_hash` is stable across platforms and serde_json
//! versions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::canonical::canonical_hash_hex;
use crate::types::Confidence;

/// Quantization factor for float normalization.
const FLOAT_QUANTIZATION_FACTOR: f64 = 1_000_000.0;

fn quantize_float(value: f64) -> i64 {
    (value * FLOAT_QUANTIZATION_FACTOR).round() as i64
}

/// Settings for the default offset generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetGeneratorConfig {
    /// Confidence assumed for anchors that carry none.
    pub default_anchor_confidence: Confidence,
    /// Anchors at or below this confidence are recomputed. `None` means only
    /// anchors without an offset are.
    pub offset_threshold: Option<Confidence>,
    /// Confidence given to computed offsets.
    pub generated_confidence: Confidence,
}

impl Default for OffsetGeneratorConfig {
    fn default() -> Self {
        Self {
            default_anchor_confidence: Confidence::MANUAL,
            offset_threshold: Some(Confidence::DEFAULT),
            generated_confidence: Confidence::DEFAULT,
        }
    }
}

impl OffsetGeneratorConfig {
    /// Builder: set the threshold.
    pub fn with_offset_threshold(mut self, threshold: Option<Confidence>) -> Self {
        self.offset_threshold = threshold;
        self
    }

    /// Builder: set the confidence of generated offsets.
    pub fn with_generated_confidence(mut self, confidence: Confidence) -> Self {
        self.generated_confidence = confidence;
        self
    }

    /// Builder: set the confidence assumed for unrated anchors.
    pub fn with_default_anchor_confidence(mut self, confidence: Confidence) -> Self {
        self.default_anchor_confidence = confidence;
        self
    }

    /// Hash of the parameters.
    pub fn params_hash(&self) -> String {
        canonical_hash_hex(self)
    }
}

/// Settings for the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Confidence assumed for anchors and annotations that carry none.
    pub default_anchor_confidence: Confidence,
    /// Threshold handed to the offset generator; `None` skips generation.
    pub default_offset_threshold: Option<Confidence>,
    /// Confidence given to generated offsets.
    pub generated_confidence: Confidence,
    /// Validate every layer even if nothing on it changed.
    pub full_validation: bool,
    /// Labels longer than this many characters are truncated.
    pub max_label_length: Option<usize>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            default_anchor_confidence: Confidence::MANUAL,
            default_offset_threshold: Some(Confidence::DEFAULT),
            generated_confidence: Confidence::DEFAULT,
            full_validation: false,
            max_label_length: None,
        }
    }
}

impl ValidatorConfig {
    /// Builder: validate every layer.
    pub fn with_full_validation(mut self, full: bool) -> Self {
        self.full_validation = full;
        self
    }

    /// Builder: set the label length limit.
    pub fn with_max_label_length(mut self, max: Option<usize>) -> Self {
        self.max_label_length = max;
        self
    }

    /// Builder: set the offset generation threshold.
    pub fn with_default_offset_threshold(mut self, threshold: Option<Confidence>) -> Self {
        self.default_offset_threshold = threshold;
        self
    }

    /// Builder: set the confidence assumed for unrated entities.
    pub fn with_default_anchor_confidence(mut self, confidence: Confidence) -> Self {
        self.default_anchor_confidence = confidence;
        self
    }

    /// Offset generator settings derived from these.
    pub fn offset_generator(&self) -> OffsetGeneratorConfig {
        OffsetGeneratorConfig {
            default_anchor_confidence: self.default_anchor_confidence,
            offset_threshold: self.default_offset_threshold,
            generated_confidence: self.generated_confidence,
        }
    }

    /// Hash of the parameters.
    pub fn params_hash(&self) -> String {
        canonical_hash_hex(self)
    }
}

/// Settings for the merger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergerConfig {
    /// Longest per-layer annotation list matched in one edit-path pass;
    /// longer lists are matched in overlapping windows.
    pub chunk_size_limit: usize,
    /// Offset nudge used to keep re-chained siblings in order.
    pub smidgin: f64,
    /// Adopt edited labels regardless of confidence.
    pub ignore_label_confidence: bool,
    /// Adopt edited offsets regardless of confidence.
    pub ignore_offset_confidence: bool,
    /// Layers whose annotations may be mapped but never changed.
    pub no_change_layers: BTreeSet<String>,
    /// Validator run at the end of the merge.
    pub validator: ValidatorConfig,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            chunk_size_limit: 500,
            smidgin: 0.00001,
            ignore_label_confidence: false,
            ignore_offset_confidence: false,
            no_change_layers: BTreeSet::new(),
            validator: ValidatorConfig::default(),
        }
    }
}

impl MergerConfig {
    /// Builder: set the chunk size limit.
    pub fn with_chunk_size_limit(mut self, limit: usize) -> Self {
        self.chunk_size_limit = limit.max(2);
        self
    }

    /// Builder: ignore label confidence.
    pub fn with_ignore_label_confidence(mut self, ignore: bool) -> Self {
        self.ignore_label_confidence = ignore;
        self
    }

    /// Builder: ignore offset confidence.
    pub fn with_ignore_offset_confidence(mut self, ignore: bool) -> Self {
        self.ignore_offset_confidence = ignore;
        self
    }

    /// Builder: protect a layer from changes.
    pub fn with_no_change_layer(mut self, layer_id: impl Into<String>) -> Self {
        self.no_change_layers.insert(layer_id.into());
        self
    }

    /// Builder: set the validator settings.
    pub fn with_validator(mut self, validator: ValidatorConfig) -> Self {
        self.validator = validator;
        self
    }

    /// Hash of the parameters, with floats quantized.
    pub fn params_hash(&self) -> String {
        #[derive(Serialize)]
        struct Quantized<'a> {
            chunk_size_limit: usize,
            smidgin: i64,
            ignore_label_confidence: bool,
            ignore_offset_confidence: bool,
            no_change_layers: &'a BTreeSet<String>,
            validator: &'a ValidatorConfig,
        }
        canonical_hash_hex(&Quantized {
            chunk_size_limit: self.chunk_size_limit,
            smidgin: quantize_float(self.smidgin),
            ignore_label_confidence: self.ignore_label_confidence,
            ignore_offset_confidence: self.ignore_offset_confidence,
            no_change_layers: &self.no_change_layers,
            validator: &self.validator,
        })
    }
}

/// Settings for the coalescer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalescerConfig {
    /// Layer whose annotations are merged.
    pub layer_id: String,
    /// Gaps up to this long are bridged when nothing else on the layer falls
    /// inside them.
    pub minimum_pause_length: f64,
    /// Only merge neighbours with identical labels.
    pub match_labels: bool,
    /// Join merged labels with this separator; `None` keeps the first label.
    pub label_separator: Option<String>,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            layer_id: "turn".to_string(),
            minimum_pause_length: 0.0,
            match_labels: false,
            label_separator: None,
        }
    }
}

impl CoalescerConfig {
    /// Configuration for a layer, otherwise default.
    pub fn for_layer(layer_id: impl Into<String>) -> Self {
        Self {
            layer_id: layer_id.into(),
            ..Self::default()
        }
    }

    /// Builder: set the minimum pause length.
    pub fn with_minimum_pause_length(mut self, seconds: f64) -> Self {
        self.minimum_pause_length = seconds.max(0.0);
        self
    }

    /// Builder: merge only identical labels.
    pub fn with_match_labels(mut self, match_labels: bool) -> Self {
        self.match_labels = match_labels;
        self
    }

    /// Builder: concatenate labels with a separator.
    pub fn with_label_separator(mut self, separator: impl Into<String>) -> Self {
        self.label_separator = Some(separator.into());
        self
    }

    /// Hash of the parameters, with floats quantized.
    pub fn params_hash(&self) -> String {
        canonical_hash_hex(&(
            &self.layer_id,
            quantize_float(self.minimum_pause_length),
            self.match_labels,
            &self.label_separator,
        ))
    }
}
