use std::collections::HashMap;

use serde::Serialize;

use crate::model::{Override, OverrideField};

/// Manual per-record corrections, keyed by row index.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct OverrideStore {
    patches: HashMap<usize, Override>,
}

impl OverrideStore {
    pub fn set(&mut self, index: usize, field: OverrideField, value: impl Into<String>) {
        self.patches
            .entry(index)
            .or_default()
            .set(field, value.into());
    }

    /// The patch for `index`, empty when none exists.
    pub fn get(&self, index: usize) -> Override {
        self.patches.get(&index).cloned().unwrap_or_default()
    }

    pub fn has(&self, index: usize) -> bool {
        self.patches.contains_key(&index)
    }

    pub fn reset(&mut self, index: usize) {
        self.patches.remove(&index);
    }

    pub fn clear(&mut self) {
        self.patches.clear();
    }

    /// Drops the patch of a deleted row and shifts later patches down by one.
    pub fn remove_row(&mut self, index: usize) {
        self.patches = std::mem::take(&mut self.patches)
            .into_iter()
            .filter(|(i, _)| *i != index)
            .map(|(i, patch)| if i > index { (i - 1, patch) } else { (i, patch) })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_merges_into_patch() {
        let mut store = OverrideStore::default();
        store.set(1, OverrideField::Subject, "s");
        store.set(1, OverrideField::Cc, "");
        let patch = store.get(1);
        assert_eq!(patch.subject.as_deref(), Some("s"));
        assert_eq!(patch.cc.as_deref(), Some(""));
        assert_eq!(patch.to, None);
        assert!(!store.has(0));
        assert_eq!(store.get(0), Override::default());
    }

    #[test]
    fn test_reset_removes_whole_patch() {
        let mut store = OverrideStore::default();
        store.set(0, OverrideField::To, "x@y.com");
        store.set(2, OverrideField::Body, "b");
        store.reset(0);
        assert!(!store.has(0));
        assert!(store.has(2));
    }

    #[test]
    fn test_remove_row_shifts_later_patches() {
        let mut store = OverrideStore::default();
        store.set(0, OverrideField::Subject, "zero");
        store.set(1, OverrideField::Subject, "one");
        store.set(3, OverrideField::Subject, "three");
        store.remove_row(1);
        assert_eq!(store.get(0).subject.as_deref(), Some("zero"));
        assert!(!store.has(1));
        assert_eq!(store.get(2).subject.as_deref(), Some("three"));
        assert!(!store.has(3));
    }
}
