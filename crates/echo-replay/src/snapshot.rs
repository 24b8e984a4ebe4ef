// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Category-partitioned heap snapshots.
//!
//! A [`HeapSnapshot`] is an immutable dump of the reachable heap at one log
//! time. Every entity is keyed by its recorded [`PtrId`] and cross-references
//! other entities only by identity, so the snapshot can be inflated into a
//! fresh host or compared against another snapshot without any live state.
//!
//! Partitions are `BTreeMap`s so iteration, and therefore inflation order and
//! the CBOR encoding, is deterministic.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::LoadFlags;
use crate::config::InflateSizes;
use crate::ident::{ContextTag, PropertyId, PtrId};
use crate::logged_var::LoggedVar;

/// Errors from snapshot (de)serialization.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// CBOR encoding failed.
    #[error("snapshot encode failed: {0}")]
    Encode(String),
    /// CBOR decoding failed.
    #[error("snapshot decode failed: {0}")]
    Decode(String),
}

/// Primitive heap value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SnapPrimitive {
    /// Boxed number.
    Number(f64),
    /// String.
    String(String),
    /// Symbol with an optional description.
    Symbol {
        /// Description text.
        description: Option<String>,
    },
}

impl SnapPrimitive {
    /// Value equality; numbers compare by bit pattern so `NaN` matches itself.
    #[must_use]
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Symbol { description: a }, Self::Symbol { description: b }) => a == b,
            _ => false,
        }
    }
}

/// Primitive value plus the context that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapPrimitiveValue {
    /// Owning context.
    pub context: ContextTag,
    /// The value.
    pub value: SnapPrimitive,
}

/// One property slot of a type handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapPropertyEntry {
    /// Property id.
    pub pid: PropertyId,
    /// Attribute bits (writable/enumerable/configurable/accessor).
    pub attributes: u8,
}

/// Type handler: the ordered property layout shared by a set of objects.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapHandler {
    /// Property layout.
    pub properties: Vec<SnapPropertyEntry>,
    /// Whether new properties can be added.
    pub extensible: bool,
}

/// Object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapType {
    /// Owning context.
    pub context: ContextTag,
    /// Handler, when the type has one.
    pub handler: Option<PtrId>,
    /// Prototype (absent or null for root types).
    pub prototype: LoggedVar,
}

/// Named slot of a captured-variable array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapSlot {
    /// Variable name.
    pub pid: PropertyId,
    /// Captured value.
    pub value: LoggedVar,
}

/// Captured-variable slot array.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SlotArrayInfo {
    /// Function body that declared the slots.
    pub function_body: Option<PtrId>,
    /// Slots in declaration order.
    pub slots: Vec<SnapSlot>,
}

/// Kind of one entry in a closure scope chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKind {
    /// Slot array.
    SlotArray,
    /// Activation object.
    ActivationObject,
    /// Object of a `with` statement.
    WithObject,
}

/// One entry of a scope chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapScope {
    /// Kind of the referenced entity.
    pub kind: ScopeKind,
    /// Slot array or object identity.
    pub id: PtrId,
}

/// Closure environment descriptor (innermost scope first).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionScopeInfo {
    /// Scope chain.
    pub scopes: Vec<SnapScope>,
}

/// Entry point that produced a top-level function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopLevelKind {
    /// Script load.
    Load,
    /// `new Function(...)`.
    New,
    /// `eval(...)`.
    Eval,
}

/// Top-level function descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopLevelFunction {
    /// Body counter id assigned at record time; stable across runs.
    pub body_counter_id: u32,
    /// Owning context.
    pub context: ContextTag,
    /// Source text.
    pub source: String,
    /// Script uri (loads only).
    pub uri: String,
    /// Host document id (loads only).
    pub document_id: u64,
    /// Load flags (loads only).
    pub load_flags: LoadFlags,
    /// Strict-mode eval (evals only).
    pub is_strict: bool,
}

/// Nested function body descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionBodyInfo {
    /// Display name.
    pub name: String,
    /// Enclosing body (top-level or nested).
    pub parent: PtrId,
    /// Zero-based line of the definition.
    pub line: u32,
    /// Zero-based column of the definition.
    pub column: u32,
}

/// Named own property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapPropertyValue {
    /// Property id.
    pub pid: PropertyId,
    /// Value.
    pub value: LoggedVar,
}

/// Settlement state of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromiseStatus {
    /// Not settled.
    Pending,
    /// Fulfilled.
    Fulfilled,
    /// Rejected.
    Rejected,
}

/// Kind-specific part of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapObjectKind {
    /// Ordinary object.
    Plain,
    /// Embedder-owned object.
    External,
    /// Array with its elements.
    Array {
        /// Elements; absent entries are holes.
        elements: Vec<LoggedVar>,
    },
    /// Array buffer with its contents.
    ArrayBuffer {
        /// Contents.
        bytes: Vec<u8>,
    },
    /// Script function.
    ScriptFunction {
        /// Function body.
        body: PtrId,
        /// Closure environment.
        scope: Option<PtrId>,
    },
    /// Host function.
    ExternalFunction {
        /// Function name value.
        name: LoggedVar,
    },
    /// Promise.
    Promise {
        /// Settlement state.
        status: PromiseStatus,
        /// Fulfillment value or rejection reason.
        result: LoggedVar,
        /// Pending reactions.
        reactions: Vec<PtrId>,
    },
}

/// General object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapObject {
    /// Type identity.
    pub type_id: PtrId,
    /// Own property values.
    pub properties: Vec<SnapPropertyValue>,
    /// Kind-specific part.
    pub kind: SnapObjectKind,
}

/// Promise reaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapPromiseReaction {
    /// Reaction handler.
    pub handler: LoggedVar,
    /// Derived promise capability.
    pub capability: LoggedVar,
}

/// Script context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapContext {
    /// Context tag.
    pub tag: ContextTag,
    /// Global object.
    pub global_object: PtrId,
}

/// Full heap snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HeapSnapshot {
    /// Event time the snapshot restores.
    pub restore_time: i64,
    /// Script contexts.
    pub contexts: Vec<SnapContext>,
    /// Embedder roots, in registration order.
    pub roots: Vec<PtrId>,
    /// Type handlers.
    pub handlers: BTreeMap<PtrId, SnapHandler>,
    /// Types.
    pub types: BTreeMap<PtrId, SnapType>,
    /// Primitive heap values.
    pub primitives: BTreeMap<PtrId, SnapPrimitiveValue>,
    /// Slot arrays.
    pub slot_arrays: BTreeMap<PtrId, SlotArrayInfo>,
    /// Closure scope descriptors.
    pub scope_infos: BTreeMap<PtrId, FunctionScopeInfo>,
    /// Top-level functions from script loads.
    pub top_level_load: BTreeMap<PtrId, TopLevelFunction>,
    /// Top-level functions from `new Function`.
    pub top_level_new: BTreeMap<PtrId, TopLevelFunction>,
    /// Top-level functions from `eval`.
    pub top_level_eval: BTreeMap<PtrId, TopLevelFunction>,
    /// Nested function bodies.
    pub function_bodies: BTreeMap<PtrId, FunctionBodyInfo>,
    /// General objects.
    pub objects: BTreeMap<PtrId, SnapObject>,
    /// Promise reaction records.
    pub promise_reactions: BTreeMap<PtrId, SnapPromiseReaction>,
}

impl HeapSnapshot {
    /// Capacity hints for inflating this snapshot.
    #[must_use]
    pub fn inflate_sizes(&self) -> InflateSizes {
        InflateSizes {
            handlers: self.handlers.len(),
            types: self.types.len(),
            contexts: self.contexts.len(),
            objects: self.objects.len() + self.primitives.len() + self.contexts.len(),
            function_bodies: self.top_level_load.len()
                + self.top_level_new.len()
                + self.top_level_eval.len()
                + self.function_bodies.len(),
            environments: self.scope_infos.len(),
            slot_arrays: self.slot_arrays.len(),
        }
    }

    /// Top-level descriptor for `id` in any of the three partitions.
    #[must_use]
    pub fn top_level(&self, id: PtrId) -> Option<(TopLevelKind, &TopLevelFunction)> {
        self.top_level_load
            .get(&id)
            .map(|f| (TopLevelKind::Load, f))
            .or_else(|| self.top_level_new.get(&id).map(|f| (TopLevelKind::New, f)))
            .or_else(|| self.top_level_eval.get(&id).map(|f| (TopLevelKind::Eval, f)))
    }

    /// All top-level descriptors, loads first, then `new`, then `eval`.
    pub fn top_level_functions(
        &self,
    ) -> impl Iterator<Item = (PtrId, TopLevelKind, &TopLevelFunction)> {
        self.top_level_load
            .iter()
            .map(|(id, f)| (*id, TopLevelKind::Load, f))
            .chain(
                self.top_level_new
                    .iter()
                    .map(|(id, f)| (*id, TopLevelKind::New, f)),
            )
            .chain(
                self.top_level_eval
                    .iter()
                    .map(|(id, f)| (*id, TopLevelKind::Eval, f)),
            )
    }

    /// Encodes the snapshot as CBOR.
    ///
    /// # Errors
    /// [`SnapshotError::Encode`] if serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, SnapshotError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| SnapshotError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes a snapshot written by [`HeapSnapshot::to_cbor`].
    ///
    /// # Errors
    /// [`SnapshotError::Decode`] on malformed input.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, SnapshotError> {
        ciborium::from_reader(bytes).map_err(|e| SnapshotError::Decode(e.to_string()))
    }

    /// BLAKE3 digest of the CBOR encoding.
    ///
    /// # Errors
    /// [`SnapshotError::Encode`] if serialization fails.
    pub fn digest(&self) -> Result<[u8; 32], SnapshotError> {
        Ok(*blake3::hash(&self.to_cbor()?).as_bytes())
    }
}
