// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bulk allocator for variable-length action payloads.
//!
//! Records keep only a [`PayloadRef`] to their argument vectors, strings and
//! byte buffers. Payloads can be released one by one (a record being evicted
//! from the log) or all at once; freed slots are recycled and a generation
//! counter makes stale references detectable instead of aliasing a newer
//! payload.
use thiserror::Error;

use crate::logged_var::LoggedVar;

/// Errors from payload access.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    /// The reference points at a released (or recycled) slot.
    #[error("payload {index} was released")]
    Released {
        /// Slot index.
        index: u32,
    },
    /// The payload exists but holds a different kind.
    #[error("payload is not {expected}")]
    KindMismatch {
        /// Kind the caller asked for.
        expected: &'static str,
    },
    /// The record has not been given a payload yet.
    #[error("payload reference is unset")]
    Unset,
    /// Every slot below the arena's limit holds a live payload.
    #[error("payload arena is full ({limit} slots)")]
    Full {
        /// Slot limit of the arena.
        limit: u32,
    },
}

/// Generation-checked reference into a [`PayloadArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadRef {
    index: u32,
    generation: u32,
}

impl PayloadRef {
    /// Placeholder held by a record between header decode and body parse.
    pub const UNSET: Self = Self {
        index: u32::MAX,
        generation: 0,
    };

    /// `true` for [`PayloadRef::UNSET`].
    #[must_use]
    pub fn is_unset(self) -> bool {
        self == Self::UNSET
    }
}

impl Default for PayloadRef {
    fn default() -> Self {
        Self::UNSET
    }
}

/// One variable-length payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Logged argument vector.
    Vars(Vec<LoggedVar>),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    payload: Option<Payload>,
}

/// Most slots an arena can hold. Index `u32::MAX` is [`PayloadRef::UNSET`].
pub const MAX_PAYLOAD_SLOTS: u32 = u32::MAX;

/// Slab of payloads with a free list.
#[derive(Debug)]
pub struct PayloadArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    limit: u32,
}

impl Default for PayloadArena {
    fn default() -> Self {
        Self::with_slot_limit(MAX_PAYLOAD_SLOTS)
    }
}

impl PayloadArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty arena holding at most `limit` payloads at once,
    /// capped at [`MAX_PAYLOAD_SLOTS`].
    #[must_use]
    pub fn with_slot_limit(limit: u32) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            limit: limit.min(MAX_PAYLOAD_SLOTS),
        }
    }

    /// Stores `payload` and returns its reference. Released slots are
    /// recycled before new ones are added.
    ///
    /// # Errors
    /// [`PayloadError::Full`] once every slot below the limit is live.
    pub fn alloc(&mut self, payload: Payload) -> Result<PayloadRef, PayloadError> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.payload = Some(payload);
            self.live += 1;
            return Ok(PayloadRef {
                index,
                generation: slot.generation,
            });
        }
        let index = u32::try_from(self.slots.len())
            .ok()
            .filter(|index| *index < self.limit)
            .ok_or(PayloadError::Full { limit: self.limit })?;
        self.slots.push(Slot {
            generation: 0,
            payload: Some(payload),
        });
        self.live += 1;
        Ok(PayloadRef {
            index,
            generation: 0,
        })
    }

    /// Stores a logged argument vector.
    ///
    /// # Errors
    /// See [`PayloadArena::alloc`].
    pub fn alloc_vars(&mut self, vars: Vec<LoggedVar>) -> Result<PayloadRef, PayloadError> {
        self.alloc(Payload::Vars(vars))
    }

    /// Stores raw bytes.
    ///
    /// # Errors
    /// See [`PayloadArena::alloc`].
    pub fn alloc_bytes(&mut self, bytes: Vec<u8>) -> Result<PayloadRef, PayloadError> {
        self.alloc(Payload::Bytes(bytes))
    }

    /// Stores text.
    ///
    /// # Errors
    /// See [`PayloadArena::alloc`].
    pub fn alloc_text(&mut self, text: String) -> Result<PayloadRef, PayloadError> {
        self.alloc(Payload::Text(text))
    }

    /// Payload behind `r`.
    ///
    /// # Errors
    /// [`PayloadError::Unset`] or [`PayloadError::Released`].
    pub fn get(&self, r: PayloadRef) -> Result<&Payload, PayloadError> {
        if r.is_unset() {
            return Err(PayloadError::Unset);
        }
        self.slots
            .get(r.index as usize)
            .filter(|slot| slot.generation == r.generation)
            .and_then(|slot| slot.payload.as_ref())
            .ok_or(PayloadError::Released { index: r.index })
    }

    /// Argument vector behind `r`.
    ///
    /// # Errors
    /// As [`PayloadArena::get`], or [`PayloadError::KindMismatch`].
    pub fn vars(&self, r: PayloadRef) -> Result<&[LoggedVar], PayloadError> {
        match self.get(r)? {
            Payload::Vars(v) => Ok(v),
            _ => Err(PayloadError::KindMismatch { expected: "vars" }),
        }
    }

    /// Bytes behind `r`.
    ///
    /// # Errors
    /// As [`PayloadArena::get`], or [`PayloadError::KindMismatch`].
    pub fn bytes(&self, r: PayloadRef) -> Result<&[u8], PayloadError> {
        match self.get(r)? {
            Payload::Bytes(b) => Ok(b),
            _ => Err(PayloadError::KindMismatch { expected: "bytes" }),
        }
    }

    /// Text behind `r`.
    ///
    /// # Errors
    /// As [`PayloadArena::get`], or [`PayloadError::KindMismatch`].
    pub fn text(&self, r: PayloadRef) -> Result<&str, PayloadError> {
        match self.get(r)? {
            Payload::Text(t) => Ok(t),
            _ => Err(PayloadError::KindMismatch { expected: "text" }),
        }
    }

    /// Releases one payload; its slot is recycled with a new generation.
    ///
    /// # Errors
    /// [`PayloadError::Released`] on double release, [`PayloadError::Unset`]
    /// for the placeholder.
    pub fn release(&mut self, r: PayloadRef) -> Result<Payload, PayloadError> {
        if r.is_unset() {
            return Err(PayloadError::Unset);
        }
        let slot = self
            .slots
            .get_mut(r.index as usize)
            .filter(|slot| slot.generation == r.generation)
            .ok_or(PayloadError::Released { index: r.index })?;
        let payload = slot
            .payload
            .take()
            .ok_or(PayloadError::Released { index: r.index })?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(r.index);
        self.live -= 1;
        Ok(payload)
    }

    /// Drops every payload at once.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.live = 0;
    }

    /// Number of payloads currently stored.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn released_refs_do_not_alias_recycled_slots() {
        let mut arena = PayloadArena::new();
        let first = arena.alloc_text("a".into()).unwrap();
        arena.release(first).unwrap();
        let second = arena.alloc_text("b".into()).unwrap();
        assert_eq!(arena.text(second).unwrap(), "b");
        assert_eq!(
            arena.text(first),
            Err(PayloadError::Released { index: 0 })
        );
        assert_eq!(arena.live_count(), 1);
    }

    #[test]
    fn double_release_is_an_error() {
        let mut arena = PayloadArena::new();
        let r = arena.alloc_bytes(vec![1, 2]).unwrap();
        assert_eq!(arena.release(r).unwrap(), Payload::Bytes(vec![1, 2]));
        assert!(arena.release(r).is_err());
    }

    #[test]
    fn individual_release_leaves_neighbours_intact() {
        let mut arena = PayloadArena::new();
        let a = arena.alloc_bytes(vec![1]).unwrap();
        let b = arena.alloc_bytes(vec![2]).unwrap();
        arena.release(a).unwrap();
        assert_eq!(arena.bytes(b).unwrap(), &[2]);
    }

    #[test]
    fn full_arena_refuses_instead_of_aliasing() {
        let mut arena = PayloadArena::with_slot_limit(2);
        let a = arena.alloc_text("a".into()).unwrap();
        let b = arena.alloc_text("b".into()).unwrap();
        assert_eq!(
            arena.alloc_text("c".into()),
            Err(PayloadError::Full { limit: 2 })
        );
        assert_eq!(arena.live_count(), 2);
        assert_eq!(arena.text(a).unwrap(), "a");
        assert_eq!(arena.text(b).unwrap(), "b");

        arena.release(a).unwrap();
        let c = arena.alloc_text("c".into()).unwrap();
        assert_eq!(arena.text(c).unwrap(), "c");
        assert!(arena.text(a).is_err());
    }

    #[test]
    fn kind_is_checked() {
        let mut arena = PayloadArena::new();
        let r = arena.alloc_bytes(vec![]).unwrap();
        assert_eq!(
            arena.text(r),
            Err(PayloadError::KindMismatch { expected: "text" })
        );
        assert_eq!(arena.get(PayloadRef::UNSET), Err(PayloadError::Unset));
    }
}
