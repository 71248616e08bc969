//! Confidence ratings and change states shared by anchors and annotations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Trust rating attached to an anchor offset or an annotation label.
///
/// Higher values win conflicts. The well-known levels are spaced so that
/// intermediate ratings supplied by external tools still order sensibly.
/// They order by value: `NONE` (0) < `DEFAULT` (10) < `AUTOMATIC` (50) <
/// `MANUAL` (100), so an interpolated offset ranks below an aligner's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Confidence(pub u8);

impl Confidence {
    /// No information at all; the value is a placeholder.
    pub const NONE: Self = Self(0);
    /// Value produced by a default heuristic such as interpolation.
    pub const DEFAULT: Self = Self(10);
    /// Value produced by an automatic process (aligner, tagger, ...).
    pub const AUTOMATIC: Self = Self(50);
    /// Value set or checked by a person.
    pub const MANUAL: Self = Self(100);

    /// Raw rating.
    pub fn value(self) -> u8 {
        self.0
    }

    /// Symbolic name of a well-known level, if this is one.
    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::NONE => Some("none"),
            Self::DEFAULT => Some("default"),
            Self::AUTOMATIC => Some("automatic"),
            Self::MANUAL => Some("manual"),
            _ => None,
        }
    }

    /// Parse a symbolic level name or a number.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Some(Self::NONE),
            "default" => Some(Self::DEFAULT),
            "automatic" => Some(Self::AUTOMATIC),
            "manual" => Some(Self::MANUAL),
            other => other.parse::<u8>().ok().map(Self),
        }
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Pending change state of a graph entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Change {
    /// Unchanged since the last commit.
    #[default]
    NoChange,
    /// Created since the last commit.
    Create,
    /// Modified since the last commit.
    Update,
    /// Marked for removal.
    Destroy,
}

impl Change {
    /// Whether the entity has any pending change.
    pub fn is_pending(self) -> bool {
        self != Self::NoChange
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(Confidence::NONE < Confidence::DEFAULT);
        assert!(Confidence::DEFAULT < Confidence::AUTOMATIC);
        assert!(Confidence::AUTOMATIC < Confidence::MANUAL);
    }

    #[test]
    fn test_parse_names_and_numbers() {
        assert_eq!(Confidence::parse("Manual"), Some(Confidence::MANUAL));
        assert_eq!(Confidence::parse("30"), Some(Confidence(30)));
        assert_eq!(Confidence::parse("bogus"), None);
        assert_eq!(Confidence(30).to_string(), "30");
        assert_eq!(Confidence::AUTOMATIC.to_string(), "automatic");
    }
}
