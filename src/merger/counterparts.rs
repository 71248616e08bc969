//! Bidirectional mapping between original and edited annotations.

use std::collections::HashMap;

use crate::types::AnnotationId;

/// One-to-one pairing of original annotations with edited ones.
///
/// Linking either side again drops its previous partner, so the map stays
/// bijective.
#[derive(Debug, Clone, Default)]
pub struct Counterparts {
    to_edited: HashMap<AnnotationId, AnnotationId>,
    to_original: HashMap<AnnotationId, AnnotationId>,
}

impl Counterparts {
    /// Pair `original` with `edited`.
    pub fn link(&mut self, original: &AnnotationId, edited: &AnnotationId) {
        if let Some(old) = self.to_edited.remove(original) {
            self.to_original.remove(&old);
        }
        if let Some(old) = self.to_original.remove(edited) {
            self.to_edited.remove(&old);
        }
        self.to_edited.insert(original.clone(), edited.clone());
        self.to_original.insert(edited.clone(), original.clone());
    }

    /// Edited counterpart of an original annotation.
    pub fn edited_of(&self, original: &AnnotationId) -> Option<&AnnotationId> {
        self.to_edited.get(original)
    }

    /// Original counterpart of an edited annotation.
    pub fn original_of(&self, edited: &AnnotationId) -> Option<&AnnotationId> {
        self.to_original.get(edited)
    }

    /// Whether an original annotation has a counterpart.
    pub fn has_edited(&self, original: &AnnotationId) -> bool {
        self.to_edited.contains_key(original)
    }

    /// Whether an edited annotation has a counterpart.
    pub fn has_original(&self, edited: &AnnotationId) -> bool {
        self.to_original.contains_key(edited)
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.to_edited.len()
    }

    /// Whether nothing is paired.
    pub fn is_empty(&self) -> bool {
        self.to_edited.is_empty()
    }

    /// Drop every pairing.
    pub fn clear(&mut self) {
        self.to_edited.clear();
        self.to_original.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relinking_drops_old_partners() {
        let mut map = Counterparts::default();
        map.link(&"o1".into(), &"e1".into());
        map.link(&"o2".into(), &"e1".into());
        assert_eq!(map.original_of(&"e1".into()), Some(&"o2".into()));
        assert!(!map.has_edited(&"o1".into()));
        assert_eq!(map.len(), 1);

        map.link(&"o2".into(), &"e2".into());
        assert!(!map.has_original(&"e1".into()));
        assert_eq!(map.edited_of(&"o2".into()), Some(&"e2".into()));
    }

    #[test]
    fn test_clear() {
        let mut map = Counterparts::default();
        map.link(&"o".into(), &"e".into());
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.original_of(&"e".into()), None);
    }
}
