// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-pass identity maps used while inflating a snapshot and replaying.
//!
//! One [`IdentifierDictionary`] per entity category maps recorded identities
//! to live host handles. Every added handle is also pushed onto that
//! category's [`PinSet`] so partially wired graphs stay reachable until the
//! pass is finished.
//!
//! Lifecycle:
//!
//! 1. [`InflateMap::prep_for_initial_inflate`] once per opened log.
//! 2. [`InflateMap::prep_for_reinflate`] before every later pass. The current
//!    object and function-body maps become the *previous generation*: still
//!    pinned, offered for reuse via `find_reusable_*`.
//! 3. [`InflateMap::cleanup_after_inflate`] exactly once per pass. It drops
//!    the previous generation and is safe after an aborted pass.
use std::any::Any;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tracing::debug;

use crate::config::InflateSizes;
use crate::host::HostTypes;
use crate::ident::{ContextTag, PropertyId, PtrId};
use crate::identifier_dictionary::{IdentifierDictionary, IdentityKey};
use crate::logged_var::LoggedVar;

/// Entity category of an inflate-map dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InflateCategory {
    /// Type handlers.
    Handler,
    /// Types.
    Type,
    /// Script contexts.
    Context,
    /// Objects and primitive heap values.
    Object,
    /// Function bodies.
    FunctionBody,
    /// Closure environments.
    Environment,
    /// Slot arrays.
    SlotArray,
    /// Opaque promise metadata.
    PromiseInfo,
}

impl fmt::Display for InflateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Handler => "handler",
            Self::Type => "type",
            Self::Context => "context",
            Self::Object => "object",
            Self::FunctionBody => "function body",
            Self::Environment => "environment",
            Self::SlotArray => "slot array",
            Self::PromiseInfo => "promise info",
        })
    }
}

/// Identity errors raised by the inflate map.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InflateError {
    /// An identity was added twice in one generation.
    #[error("duplicate {category} identity {id:#x}")]
    DuplicateIdentity {
        /// Category of the dictionary.
        category: InflateCategory,
        /// Raw identity.
        id: u64,
    },
    /// An identity was looked up before being added.
    #[error("missing {category} identity {id:#x}")]
    MissingIdentity {
        /// Category of the dictionary.
        category: InflateCategory,
        /// Raw identity.
        id: u64,
    },
    /// A pass started before `prep_for_initial_inflate`.
    #[error("inflate map used before prep_for_initial_inflate")]
    NotPrepared,
    /// `prep_for_initial_inflate` called twice.
    #[error("prep_for_initial_inflate called twice")]
    AlreadyPrepared,
    /// Promise metadata looked up with a different type than it was stored with.
    #[error("promise info {id} requested with the wrong type")]
    PromiseInfoTypeMismatch {
        /// Identity of the metadata.
        id: PtrId,
    },
}

/// Strong handles kept alive for the duration of one generation.
#[derive(Debug, Clone)]
pub struct PinSet<V> {
    pinned: Vec<V>,
}

impl<V> Default for PinSet<V> {
    fn default() -> Self {
        Self { pinned: Vec::new() }
    }
}

impl<V> PinSet<V> {
    /// Creates an empty pin set sized for `capacity` handles.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pinned: Vec::with_capacity(capacity),
        }
    }

    /// Keeps `value` alive until the set is released.
    pub fn pin(&mut self, value: V) {
        self.pinned.push(value);
    }

    /// Number of pinned handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pinned.len()
    }

    /// `true` when nothing is pinned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pinned.is_empty()
    }

    /// Drops every pinned handle.
    pub fn release_all(&mut self) {
        self.pinned.clear();
    }
}

/// A dictionary plus the pin set that keeps its values alive.
#[derive(Debug, Clone)]
struct Pinned<K, V> {
    map: IdentifierDictionary<K, V>,
    pins: PinSet<V>,
}

impl<K: IdentityKey, V: Clone> Pinned<K, V> {
    fn new(category: InflateCategory, capacity: usize) -> Self {
        Self {
            map: IdentifierDictionary::with_capacity(category, capacity),
            pins: PinSet::with_capacity(capacity),
        }
    }

    fn add(&mut self, key: K, value: V) -> Result<(), InflateError> {
        self.map.add(key, value.clone())?;
        self.pins.pin(value);
        Ok(())
    }
}

struct PreviousGeneration<H: HostTypes> {
    objects: Pinned<PtrId, H::Value>,
    function_bodies: Pinned<PtrId, H::FunctionBody>,
}

/// Identity maps and pins for one inflation generation.
pub struct InflateMap<H: HostTypes> {
    prepared: bool,
    handlers: Pinned<PtrId, H::Handler>,
    types: Pinned<PtrId, H::Type>,
    contexts: Pinned<ContextTag, H::Context>,
    objects: Pinned<PtrId, H::Value>,
    function_bodies: Pinned<PtrId, H::FunctionBody>,
    environments: Pinned<PtrId, H::Environment>,
    slot_arrays: Pinned<PtrId, H::SlotArray>,
    promise_info: FxHashMap<PtrId, Box<dyn Any>>,
    previous: Option<PreviousGeneration<H>>,
    property_reset: FxHashSet<PropertyId>,
}

impl<H: HostTypes> fmt::Debug for InflateMap<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InflateMap")
            .field("prepared", &self.prepared)
            .field("handlers", &self.handlers.map.len())
            .field("types", &self.types.map.len())
            .field("contexts", &self.contexts.map.len())
            .field("objects", &self.objects.map.len())
            .field("function_bodies", &self.function_bodies.map.len())
            .field("environments", &self.environments.map.len())
            .field("slot_arrays", &self.slot_arrays.map.len())
            .field("promise_info", &self.promise_info.len())
            .field("has_previous", &self.previous.is_some())
            .finish_non_exhaustive()
    }
}

impl<H: HostTypes> Default for InflateMap<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: HostTypes> InflateMap<H> {
    /// Creates an unprepared map.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sizes(InflateSizes::default(), false)
    }

    fn with_sizes(sizes: InflateSizes, prepared: bool) -> Self {
        Self {
            prepared,
            handlers: Pinned::new(InflateCategory::Handler, sizes.handlers),
            types: Pinned::new(InflateCategory::Type, sizes.types),
            contexts: Pinned::new(InflateCategory::Context, sizes.contexts),
            objects: Pinned::new(InflateCategory::Object, sizes.objects),
            function_bodies: Pinned::new(InflateCategory::FunctionBody, sizes.function_bodies),
            environments: Pinned::new(InflateCategory::Environment, sizes.environments),
            slot_arrays: Pinned::new(InflateCategory::SlotArray, sizes.slot_arrays),
            promise_info: FxHashMap::default(),
            previous: None,
            property_reset: FxHashSet::default(),
        }
    }

    /// `true` once `prep_for_initial_inflate` has run.
    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Allocates every category for the first pass after opening a log.
    ///
    /// # Errors
    /// [`InflateError::AlreadyPrepared`] on a second call.
    pub fn prep_for_initial_inflate(&mut self, sizes: InflateSizes) -> Result<(), InflateError> {
        if self.prepared {
            return Err(InflateError::AlreadyPrepared);
        }
        *self = Self::with_sizes(sizes, true);
        debug!(?sizes, "inflate map prepared for initial inflate");
        Ok(())
    }

    /// Starts a new generation.
    ///
    /// Objects and function bodies of the current generation move, still
    /// pinned, into the previous generation where they may be reused. Every
    /// other category starts empty.
    ///
    /// # Errors
    /// [`InflateError::NotPrepared`] before the initial prep.
    pub fn prep_for_reinflate(&mut self, sizes: InflateSizes) -> Result<(), InflateError> {
        if !self.prepared {
            return Err(InflateError::NotPrepared);
        }
        let previous = PreviousGeneration {
            objects: std::mem::replace(
                &mut self.objects,
                Pinned::new(InflateCategory::Object, 0),
            ),
            function_bodies: std::mem::replace(
                &mut self.function_bodies,
                Pinned::new(InflateCategory::FunctionBody, 0),
            ),
        };
        let carried = previous.objects.map.len() + previous.function_bodies.map.len();
        *self = Self::with_sizes(sizes, true);
        self.previous = Some(previous);
        debug!(?sizes, carried, "inflate map prepared for reinflate");
        Ok(())
    }

    /// Ends the current pass: releases the previous generation and the
    /// property-reset set. Idempotent, and safe after a partial or aborted
    /// pass.
    ///
    /// Promise metadata belongs to the generation and stays readable until
    /// the next prep.
    pub fn cleanup_after_inflate(&mut self) {
        if let Some(mut previous) = self.previous.take() {
            previous.objects.pins.release_all();
            previous.function_bodies.pins.release_all();
        }
        self.property_reset.clear();
        debug!(objects = self.objects.map.len(), "inflate map cleaned up");
    }

    fn guard(&self) -> Result<(), InflateError> {
        if self.prepared {
            Ok(())
        } else {
            Err(InflateError::NotPrepared)
        }
    }

    /// Registers a type handler.
    ///
    /// # Errors
    /// Duplicate identity or unprepared map.
    pub fn add_handler(&mut self, id: PtrId, value: H::Handler) -> Result<(), InflateError> {
        self.guard()?;
        self.handlers.add(id, value)
    }

    /// Registers a type.
    ///
    /// # Errors
    /// Duplicate identity or unprepared map.
    pub fn add_type(&mut self, id: PtrId, value: H::Type) -> Result<(), InflateError> {
        self.guard()?;
        self.types.add(id, value)
    }

    /// Registers a script context.
    ///
    /// # Errors
    /// Duplicate identity or unprepared map.
    pub fn add_context(&mut self, tag: ContextTag, value: H::Context) -> Result<(), InflateError> {
        self.guard()?;
        self.contexts.add(tag, value)
    }

    /// Registers an object or primitive heap value.
    ///
    /// # Errors
    /// Duplicate identity or unprepared map.
    pub fn add_object(&mut self, id: PtrId, value: H::Value) -> Result<(), InflateError> {
        self.guard()?;
        self.objects.add(id, value)
    }

    /// Registers a function body.
    ///
    /// # Errors
    /// Duplicate identity or unprepared map.
    pub fn add_function_body(
        &mut self,
        id: PtrId,
        value: H::FunctionBody,
    ) -> Result<(), InflateError> {
        self.guard()?;
        self.function_bodies.add(id, value)
    }

    /// Registers a closure environment.
    ///
    /// # Errors
    /// Duplicate identity or unprepared map.
    pub fn add_environment(
        &mut self,
        id: PtrId,
        value: H::Environment,
    ) -> Result<(), InflateError> {
        self.guard()?;
        self.environments.add(id, value)
    }

    /// Registers a slot array.
    ///
    /// # Errors
    /// Duplicate identity or unprepared map.
    pub fn add_slot_array(&mut self, id: PtrId, value: H::SlotArray) -> Result<(), InflateError> {
        self.guard()?;
        self.slot_arrays.add(id, value)
    }

    /// Live handler for `id`.
    ///
    /// # Errors
    /// [`InflateError::MissingIdentity`] if not added this generation.
    pub fn lookup_handler(&self, id: PtrId) -> Result<&H::Handler, InflateError> {
        self.handlers.map.lookup(id)
    }

    /// Live type for `id`.
    ///
    /// # Errors
    /// [`InflateError::MissingIdentity`] if not added this generation.
    pub fn lookup_type(&self, id: PtrId) -> Result<&H::Type, InflateError> {
        self.types.map.lookup(id)
    }

    /// Live context for `tag`.
    ///
    /// # Errors
    /// [`InflateError::MissingIdentity`] if not added this generation.
    pub fn lookup_context(&self, tag: ContextTag) -> Result<&H::Context, InflateError> {
        self.contexts.map.lookup(tag)
    }

    /// Live object for `id`.
    ///
    /// # Errors
    /// [`InflateError::MissingIdentity`] if not added this generation.
    pub fn lookup_object(&self, id: PtrId) -> Result<&H::Value, InflateError> {
        self.objects.map.lookup(id)
    }

    /// Live function body for `id`.
    ///
    /// # Errors
    /// [`InflateError::MissingIdentity`] if not added this generation.
    pub fn lookup_function_body(&self, id: PtrId) -> Result<&H::FunctionBody, InflateError> {
        self.function_bodies.map.lookup(id)
    }

    /// Live environment for `id`.
    ///
    /// # Errors
    /// [`InflateError::MissingIdentity`] if not added this generation.
    pub fn lookup_environment(&self, id: PtrId) -> Result<&H::Environment, InflateError> {
        self.environments.map.lookup(id)
    }

    /// Live slot array for `id`.
    ///
    /// # Errors
    /// [`InflateError::MissingIdentity`] if not added this generation.
    pub fn lookup_slot_array(&self, id: PtrId) -> Result<&H::SlotArray, InflateError> {
        self.slot_arrays.map.lookup(id)
    }

    /// `true` if a handler was added for `id`.
    #[must_use]
    pub fn is_handler_inflated(&self, id: PtrId) -> bool {
        self.handlers.map.contains(id)
    }

    /// `true` if a type was added for `id`.
    #[must_use]
    pub fn is_type_inflated(&self, id: PtrId) -> bool {
        self.types.map.contains(id)
    }

    /// `true` if a context was added for `tag`.
    #[must_use]
    pub fn is_context_inflated(&self, tag: ContextTag) -> bool {
        self.contexts.map.contains(tag)
    }

    /// `true` if an object was added for `id`.
    #[must_use]
    pub fn is_object_inflated(&self, id: PtrId) -> bool {
        self.objects.map.contains(id)
    }

    /// `true` if a function body was added for `id`.
    #[must_use]
    pub fn is_function_body_inflated(&self, id: PtrId) -> bool {
        self.function_bodies.map.contains(id)
    }

    /// `true` if an environment was added for `id`.
    #[must_use]
    pub fn is_environment_inflated(&self, id: PtrId) -> bool {
        self.environments.map.contains(id)
    }

    /// `true` if a slot array was added for `id`.
    #[must_use]
    pub fn is_slot_array_inflated(&self, id: PtrId) -> bool {
        self.slot_arrays.map.contains(id)
    }

    /// Previous-generation object recorded under `id`, if any.
    #[must_use]
    pub fn find_reusable_object(&self, id: PtrId) -> Option<H::Value> {
        self.previous
            .as_ref()
            .and_then(|p| p.objects.map.get(id))
            .cloned()
    }

    /// Previous-generation function body recorded under `id`, if any.
    #[must_use]
    pub fn find_reusable_function_body(&self, id: PtrId) -> Option<H::FunctionBody> {
        self.previous
            .as_ref()
            .and_then(|p| p.function_bodies.map.get(id))
            .cloned()
    }

    /// Resolves a logged value: inline values directly, identities through
    /// the object map. Returns `None` for [`LoggedVar::Absent`].
    ///
    /// # Errors
    /// [`InflateError::MissingIdentity`] for an unknown identity.
    pub fn inflate_logged_var(&self, var: LoggedVar) -> Result<Option<H::Value>, InflateError> {
        match var {
            LoggedVar::Absent => Ok(None),
            LoggedVar::Inline(inline) => Ok(Some(H::inline_value(inline))),
            LoggedVar::Ptr(id) => self.lookup_object(id).cloned().map(Some),
        }
    }

    /// Property ids collected this pass.
    #[must_use]
    pub fn property_reset(&self) -> &FxHashSet<PropertyId> {
        &self.property_reset
    }

    /// Mutable access for collecting property ids this pass.
    pub fn property_reset_mut(&mut self) -> &mut FxHashSet<PropertyId> {
        &mut self.property_reset
    }

    /// Takes and clears the property-reset set.
    pub fn take_property_reset(&mut self) -> FxHashSet<PropertyId> {
        std::mem::take(&mut self.property_reset)
    }

    /// `true` if promise metadata of any type is stored under `id`.
    #[must_use]
    pub fn is_promise_info_defined(&self, id: PtrId) -> bool {
        self.promise_info.contains_key(&id)
    }

    /// Stores promise metadata under `id`.
    ///
    /// # Errors
    /// [`InflateError::DuplicateIdentity`] if `id` already has metadata.
    pub fn add_promise_info<T: Any>(&mut self, id: PtrId, info: T) -> Result<(), InflateError> {
        self.guard()?;
        if self.promise_info.contains_key(&id) {
            return Err(InflateError::DuplicateIdentity {
                category: InflateCategory::PromiseInfo,
                id: id.raw(),
            });
        }
        self.promise_info.insert(id, Box::new(info));
        Ok(())
    }

    /// Promise metadata stored under `id`, read as `T`.
    ///
    /// # Errors
    /// [`InflateError::MissingIdentity`] if absent,
    /// [`InflateError::PromiseInfoTypeMismatch`] if stored as another type.
    pub fn lookup_promise_info<T: Any>(&self, id: PtrId) -> Result<&T, InflateError> {
        self.promise_info
            .get(&id)
            .ok_or_else(|| InflateError::MissingIdentity {
                category: InflateCategory::PromiseInfo,
                id: id.raw(),
            })?
            .downcast_ref::<T>()
            .ok_or(InflateError::PromiseInfoTypeMismatch { id })
    }

    /// Number of live objects in the current generation.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.map.len()
    }

    /// Handles pinned across the current and previous generation.
    #[must_use]
    pub fn pinned_count(&self) -> usize {
        let current = self.handlers.pins.len()
            + self.types.pins.len()
            + self.contexts.pins.len()
            + self.objects.pins.len()
            + self.function_bodies.pins.len()
            + self.environments.pins.len()
            + self.slot_arrays.pins.len();
        let previous = self
            .previous
            .as_ref()
            .map_or(0, |p| p.objects.pins.len() + p.function_bodies.pins.len());
        current + previous
    }

    /// `true` between `prep_for_reinflate` and `cleanup_after_inflate`.
    #[must_use]
    pub fn has_previous_generation(&self) -> bool {
        self.previous.is_some()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::logged_var::InlineValue;

    /// Minimal host whose values are reference-counted so pins are visible.
    struct RcHost;

    impl HostTypes for RcHost {
        type Value = Rc<i64>;
        type Handler = Rc<i64>;
        type Type = Rc<i64>;
        type Context = Rc<i64>;
        type FunctionBody = Rc<i64>;
        type Environment = Rc<i64>;
        type SlotArray = Rc<i64>;

        fn inline_value(value: InlineValue) -> Self::Value {
            Rc::new(match value {
                InlineValue::Int(n) => i64::from(n),
                InlineValue::Bool(b) => i64::from(b),
                InlineValue::Null | InlineValue::Undefined => 0,
            })
        }

        fn as_inline(_: &Self::Value) -> Option<InlineValue> {
            None
        }

        fn same_value(a: &Self::Value, b: &Self::Value) -> bool {
            Rc::ptr_eq(a, b)
        }
    }

    fn prepared() -> InflateMap<RcHost> {
        let mut map = InflateMap::new();
        map.prep_for_initial_inflate(InflateSizes::default()).unwrap();
        map
    }

    #[test]
    fn add_before_prep_is_rejected() {
        let mut map = InflateMap::<RcHost>::new();
        assert_eq!(
            map.add_object(PtrId(1), Rc::new(1)),
            Err(InflateError::NotPrepared)
        );
    }

    #[test]
    fn initial_prep_is_once_per_log() {
        let mut map = prepared();
        assert_eq!(
            map.prep_for_initial_inflate(InflateSizes::default()),
            Err(InflateError::AlreadyPrepared)
        );
    }

    #[test]
    fn added_values_are_pinned() {
        let mut map = prepared();
        let value = Rc::new(9);
        map.add_object(PtrId(1), Rc::clone(&value)).unwrap();
        assert_eq!(Rc::strong_count(&value), 3);
        assert_eq!(map.pinned_count(), 1);
    }

    #[test]
    fn reinflate_offers_previous_objects_until_cleanup() {
        let mut map = prepared();
        let value = Rc::new(5);
        let weak = Rc::downgrade(&value);
        map.add_object(PtrId(5), value).unwrap();
        map.add_handler(PtrId(6), Rc::new(6)).unwrap();

        map.prep_for_reinflate(InflateSizes::default()).unwrap();
        assert!(!map.is_object_inflated(PtrId(5)));
        assert!(!map.is_handler_inflated(PtrId(6)));
        let candidate = map.find_reusable_object(PtrId(5)).unwrap();
        assert!(Rc::ptr_eq(&candidate, &weak.upgrade().unwrap()));
        drop(candidate);

        map.cleanup_after_inflate();
        assert!(map.find_reusable_object(PtrId(5)).is_none());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn cleanup_is_idempotent() {
        let mut map = prepared();
        map.prep_for_reinflate(InflateSizes::default()).unwrap();
        map.cleanup_after_inflate();
        map.cleanup_after_inflate();
        assert!(!map.has_previous_generation());
    }

    #[test]
    fn inflate_logged_var_resolves_inline_and_ptr() {
        let mut map = prepared();
        let obj = Rc::new(77);
        map.add_object(PtrId(3), Rc::clone(&obj)).unwrap();
        assert!(map.inflate_logged_var(LoggedVar::Absent).unwrap().is_none());
        assert_eq!(
            *map.inflate_logged_var(LoggedVar::Inline(InlineValue::Int(4)))
                .unwrap()
                .unwrap(),
            4
        );
        let resolved = map.inflate_logged_var(LoggedVar::Ptr(PtrId(3))).unwrap().unwrap();
        assert!(Rc::ptr_eq(&resolved, &obj));
        assert!(matches!(
            map.inflate_logged_var(LoggedVar::Ptr(PtrId(4))),
            Err(InflateError::MissingIdentity {
                category: InflateCategory::Object,
                id: 4
            })
        ));
    }

    #[test]
    fn promise_info_is_type_checked() {
        let mut map = prepared();
        map.add_promise_info(PtrId(8), vec![1u32, 2]).unwrap();
        assert!(map.is_promise_info_defined(PtrId(8)));
        assert_eq!(map.lookup_promise_info::<Vec<u32>>(PtrId(8)).unwrap(), &vec![1, 2]);
        assert_eq!(
            map.lookup_promise_info::<String>(PtrId(8)),
            Err(InflateError::PromiseInfoTypeMismatch { id: PtrId(8) })
        );
        assert!(map.add_promise_info(PtrId(8), 0u8).is_err());
    }

    #[test]
    fn promise_info_outlives_cleanup_until_next_prep() {
        let mut map = prepared();
        map.add_promise_info(PtrId(8), 3u32).unwrap();
        map.property_reset_mut().insert(PropertyId(2));

        map.cleanup_after_inflate();
        assert!(map.property_reset().is_empty());
        assert_eq!(map.lookup_promise_info::<u32>(PtrId(8)).unwrap(), &3);

        map.prep_for_reinflate(InflateSizes::default()).unwrap();
        assert!(!map.is_promise_info_defined(PtrId(8)));
    }

    #[test]
    fn property_reset_is_taken_once() {
        let mut map = prepared();
        map.property_reset_mut().insert(PropertyId(2));
        assert_eq!(map.take_property_reset().len(), 1);
        assert!(map.property_reset().is_empty());
    }
}
