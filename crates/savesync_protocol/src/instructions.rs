//! Ordered field-path → value mappings.

use crate::canonical::to_canonical_bytes;
use crate::hash::SaveHash;
use crate::value::InstructionValue;
use serde::{Deserialize, Serialize};
use std::collections::{btree_map, BTreeMap, BTreeSet};

/// The save instructions of a batch: an ordered mapping from field path
/// (e.g. `"inventory.gold"`) to the field's new value.
///
/// The engine owns batching policy; producers own the meaning of paths
/// and values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instructions(BTreeMap<String, InstructionValue>);

impl Instructions {
    /// Creates an empty instruction set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `path` to `value`, returning the previous value.
    pub fn insert(
        &mut self,
        path: impl Into<String>,
        value: impl Into<InstructionValue>,
    ) -> Option<InstructionValue> {
        self.0.insert(path.into(), value.into())
    }

    /// Returns the value for `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&InstructionValue> {
        self.0.get(path)
    }

    /// Returns true if `path` is set.
    #[must_use]
    pub fn contains_key(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    /// Iterates over field paths in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Iterates over `(path, value)` pairs in order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, InstructionValue> {
        self.0.iter()
    }

    /// Returns the number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the field paths set by both `self` and `other`.
    #[must_use]
    pub fn overlapping_keys(&self, other: &Self) -> BTreeSet<String> {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .0
            .keys()
            .filter(|k| large.0.contains_key(k.as_str()))
            .cloned()
            .collect()
    }

    /// Returns true if no field path is set by both `self` and `other`.
    #[must_use]
    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.overlapping_keys(other).is_empty()
    }

    /// Returns the canonical CBOR encoding of these instructions.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        to_canonical_bytes(self)
    }

    /// Returns the content hash of these instructions.
    #[must_use]
    pub fn save_hash(&self) -> SaveHash {
        SaveHash::compute(&self.canonical_bytes())
    }
}

impl<K, V> FromIterator<(K, V)> for Instructions
where
    K: Into<String>,
    V: Into<InstructionValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl IntoIterator for Instructions {
    type Item = (String, InstructionValue);
    type IntoIter = btree_map::IntoIter<String, InstructionValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Instructions {
    type Item = (&'a String, &'a InstructionValue);
    type IntoIter = btree_map::Iter<'a, String, InstructionValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
