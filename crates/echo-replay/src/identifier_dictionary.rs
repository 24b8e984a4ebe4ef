// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identity-keyed dictionary used by every inflate-map category.
use std::hash::Hash;

use rustc_hash::FxHashMap;

use crate::ident::{ContextTag, PtrId};
use crate::inflate_map::{InflateCategory, InflateError};

/// Key type accepted by an [`IdentifierDictionary`].
pub trait IdentityKey: Copy + Eq + Hash {
    /// Raw value, used only for error reporting.
    fn raw(self) -> u64;
}

impl IdentityKey for PtrId {
    fn raw(self) -> u64 {
        self.0
    }
}

impl IdentityKey for ContextTag {
    fn raw(self) -> u64 {
        self.0
    }
}

/// Map from a recorded identity to the live value inflated for it.
///
/// Writes are checked: adding an identity twice is a
/// [`InflateError::DuplicateIdentity`] even when the value is the same.
/// Reads of an absent identity are [`InflateError::MissingIdentity`]; use
/// [`IdentifierDictionary::contains`] when presence is data-dependent.
#[derive(Debug, Clone)]
pub struct IdentifierDictionary<K, V> {
    category: InflateCategory,
    entries: FxHashMap<K, V>,
}

impl<K: IdentityKey, V> IdentifierDictionary<K, V> {
    /// Creates an empty dictionary for `category`.
    #[must_use]
    pub fn new(category: InflateCategory) -> Self {
        Self::with_capacity(category, 0)
    }

    /// Creates an empty dictionary sized for `capacity` identities.
    #[must_use]
    pub fn with_capacity(category: InflateCategory, capacity: usize) -> Self {
        let mut entries = FxHashMap::default();
        entries.reserve(capacity);
        Self { category, entries }
    }

    /// Category this dictionary reports in its errors.
    #[must_use]
    pub fn category(&self) -> InflateCategory {
        self.category
    }

    /// Inserts `value` under `key`.
    ///
    /// # Errors
    /// [`InflateError::DuplicateIdentity`] if `key` is already present; the
    /// existing entry is left untouched.
    pub fn add(&mut self, key: K, value: V) -> Result<(), InflateError> {
        if self.entries.contains_key(&key) {
            return Err(InflateError::DuplicateIdentity {
                category: self.category,
                id: key.raw(),
            });
        }
        self.entries.insert(key, value);
        Ok(())
    }

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    /// [`InflateError::MissingIdentity`] if `key` was never added.
    pub fn lookup(&self, key: K) -> Result<&V, InflateError> {
        self.entries
            .get(&key)
            .ok_or_else(|| InflateError::MissingIdentity {
                category: self.category,
                id: key.raw(),
            })
    }

    /// Returns the value stored under `key`, if any.
    #[must_use]
    pub fn get(&self, key: K) -> Option<&V> {
        self.entries.get(&key)
    }

    /// `true` if `key` has been added.
    #[must_use]
    pub fn contains(&self, key: K) -> bool {
        self.entries.contains_key(&key)
    }

    /// Number of identities stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry, keeping the allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn handler_scenario() {
        let mut handlers = IdentifierDictionary::new(InflateCategory::Handler);
        handlers.add(PtrId(101), "H").unwrap();
        assert_eq!(*handlers.lookup(PtrId(101)).unwrap(), "H");
        assert_eq!(
            handlers.lookup(PtrId(202)),
            Err(InflateError::MissingIdentity {
                category: InflateCategory::Handler,
                id: 202
            })
        );
    }

    #[test]
    fn duplicate_add_keeps_first_value() {
        let mut objects = IdentifierDictionary::new(InflateCategory::Object);
        objects.add(PtrId(1), 10).unwrap();
        let err = objects.add(PtrId(1), 10).unwrap_err();
        assert_eq!(
            err,
            InflateError::DuplicateIdentity {
                category: InflateCategory::Object,
                id: 1
            }
        );
        assert_eq!(*objects.lookup(PtrId(1)).unwrap(), 10);
        assert_eq!(objects.len(), 1);
    }

    #[test]
    fn contexts_use_their_own_key_type() {
        let mut contexts = IdentifierDictionary::new(InflateCategory::Context);
        contexts.add(ContextTag(7), ()).unwrap();
        assert!(contexts.contains(ContextTag(7)));
        assert!(!contexts.contains(ContextTag(8)));
    }
}
