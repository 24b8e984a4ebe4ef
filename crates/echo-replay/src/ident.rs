// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Stable identities recorded in snapshots and action logs.
use std::fmt;

use serde::{Deserialize, Serialize};

/// Recorded identity of a heap entity.
///
/// A `PtrId` is the address (or any other unique token) the entity had when
/// it was recorded. It is only meaningful within one recording: the replay
/// side never dereferences it, it only uses it as a dictionary key.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
pub struct PtrId(pub u64);

impl PtrId {
    /// Returns the raw identity value.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PtrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ptr:{:#x}", self.0)
    }
}

/// Recorded identity of a script context.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
pub struct ContextTag(pub u64);

impl ContextTag {
    /// Returns the raw tag value.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx:{:#x}", self.0)
    }
}

/// Host property identifier (interned property name).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
pub struct PropertyId(pub u32);

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms_are_distinct_per_category() {
        assert_eq!(PtrId(0x2a).to_string(), "ptr:0x2a");
        assert_eq!(ContextTag(1).to_string(), "ctx:0x1");
        assert_eq!(PropertyId(7).to_string(), "pid:7");
    }
}
