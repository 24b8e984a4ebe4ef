// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Host capability surface.
//!
//! The replay core never inspects the host's object model. It creates,
//! converts, wires and invokes host values exclusively through the traits in
//! this module:
//!
//! - [`HostTypes`] names the host's handle types and the three value helpers
//!   the core needs without a runtime (inline conversion and identity).
//! - [`HostRuntime`] is what action records execute against.
//! - [`InflationHost`] is what the snapshot inflater drives.
//!
//! A single host type usually implements all three.
use std::fmt;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::abort::AbortRequest;
use crate::action::{Conversion, LoadFlags};
use crate::ident::{PropertyId, PtrId};
use crate::logged_var::InlineValue;
use crate::snapshot::{
    FunctionBodyInfo, PromiseStatus, SnapContext, SnapHandler, SnapObject, SnapPrimitive,
    SnapPromiseReaction, SnapType, TopLevelFunction, TopLevelKind,
};

/// Abnormal completion of a host capability.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HostFault {
    /// Script code threw; the exception is pending on the host until
    /// [`HostRuntime::take_script_exception`] retrieves it.
    #[error("script exception pending")]
    ScriptException,
    /// Script execution was forcibly terminated.
    #[error("script execution terminated")]
    Terminated,
    /// The debugger asked replay to stop.
    #[error("debugger abort requested at {}", .0.target_time)]
    DebuggerAbort(AbortRequest),
    /// The host could not allocate.
    #[error("host out of memory")]
    OutOfMemory,
}

/// Result type returned by host capabilities.
pub type HostResult<T> = Result<T, HostFault>;

/// Source position reported by the host for debugger queries.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Event time of the enclosing top-level call.
    pub top_level_time: i64,
    /// Event time at which the position was observed.
    pub event_time: i64,
    /// Zero-based line.
    pub line: u32,
    /// Zero-based column.
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} (t={}/{})",
            self.line, self.column, self.top_level_time, self.event_time
        )
    }
}

/// Handle types of a host runtime.
pub trait HostTypes {
    /// Any script value.
    type Value: Clone + fmt::Debug;
    /// Type handler (property layout descriptor).
    type Handler: Clone;
    /// Object type (handler plus prototype).
    type Type: Clone;
    /// Script/global execution context.
    type Context: Clone;
    /// Compiled function body.
    type FunctionBody: Clone;
    /// Closure environment.
    type Environment: Clone;
    /// Captured-variable slot array.
    type SlotArray: Clone;

    /// Materializes an inline logged value.
    fn inline_value(value: InlineValue) -> Self::Value;

    /// Inline form of `value`, if it has one.
    fn as_inline(value: &Self::Value) -> Option<InlineValue>;

    /// Identity comparison (same heap entity, or equal inline value).
    fn same_value(a: &Self::Value, b: &Self::Value) -> bool;
}

/// Arguments of a script load.
#[derive(Debug, Clone, Copy)]
pub struct ScriptLoad<'a> {
    /// Host document id.
    pub document_id: u64,
    /// Script uri.
    pub uri: &'a str,
    /// Source text.
    pub source: &'a str,
    /// Load flags.
    pub load_flags: LoadFlags,
    /// Body counter id assigned at record time.
    pub body_counter_id: u32,
}

/// Capabilities action records execute against.
pub trait HostRuntime: HostTypes {
    /// Creates a number.
    fn create_number(&mut self, value: f64) -> HostResult<Self::Value>;
    /// Creates a string.
    fn create_string(&mut self, text: &str) -> HostResult<Self::Value>;
    /// Creates a symbol with the given description value.
    fn create_symbol(&mut self, description: &Self::Value) -> HostResult<Self::Value>;
    /// Applies a type conversion.
    fn convert(&mut self, to: Conversion, value: &Self::Value) -> HostResult<Self::Value>;

    /// Registers `value` as an embedder root.
    fn add_root_ref(&mut self, id: PtrId, value: &Self::Value) -> HostResult<()>;
    /// Releases an embedder root.
    fn remove_root_ref(&mut self, id: PtrId, value: &Self::Value) -> HostResult<()>;

    /// Allocates an ordinary or external object.
    fn allocate_object(&mut self, external: bool) -> HostResult<Self::Value>;
    /// Allocates an array of `length` holes.
    fn allocate_array(&mut self, length: u32) -> HostResult<Self::Value>;
    /// Allocates a zeroed array buffer.
    fn allocate_array_buffer(&mut self, length: u32) -> HostResult<Self::Value>;
    /// Allocates an array buffer over a copy of `bytes`.
    fn allocate_external_array_buffer(&mut self, bytes: &[u8]) -> HostResult<Self::Value>;
    /// Allocates a host function, optionally named.
    fn allocate_function(&mut self, name: Option<&Self::Value>) -> HostResult<Self::Value>;

    /// Reads a named property.
    fn get_property(&mut self, object: &Self::Value, pid: PropertyId) -> HostResult<Self::Value>;
    /// Reads an indexed element.
    fn get_index(&mut self, object: &Self::Value, index: &Self::Value) -> HostResult<Self::Value>;
    /// Reads an own property descriptor.
    fn get_own_property_info(
        &mut self,
        object: &Self::Value,
        pid: PropertyId,
    ) -> HostResult<Self::Value>;
    /// Enumerates own property names, or own symbols when `symbols` is set.
    fn get_own_property_keys(
        &mut self,
        object: &Self::Value,
        symbols: bool,
    ) -> HostResult<Self::Value>;
    /// Defines a property from a descriptor object.
    fn define_property(
        &mut self,
        object: &Self::Value,
        pid: PropertyId,
        descriptor: &Self::Value,
    ) -> HostResult<Self::Value>;
    /// Deletes a property.
    fn delete_property(
        &mut self,
        object: &Self::Value,
        pid: PropertyId,
        strict: bool,
    ) -> HostResult<Self::Value>;
    /// Replaces the prototype.
    fn set_prototype(&mut self, object: &Self::Value, prototype: &Self::Value) -> HostResult<()>;
    /// Writes a named property.
    fn set_property(
        &mut self,
        object: &Self::Value,
        pid: PropertyId,
        value: &Self::Value,
        strict: bool,
    ) -> HostResult<()>;
    /// Writes an indexed element.
    fn set_index(
        &mut self,
        object: &Self::Value,
        index: &Self::Value,
        value: &Self::Value,
    ) -> HostResult<()>;
    /// Buffer backing a typed array.
    fn typed_array_buffer(&mut self, object: &Self::Value) -> HostResult<Self::Value>;

    /// Invokes `callee` as a constructor.
    fn construct(&mut self, callee: &Self::Value, args: &[Self::Value]) -> HostResult<Self::Value>;
    /// Invokes `callee` as an ordinary function.
    fn call_function(
        &mut self,
        callee: &Self::Value,
        args: &[Self::Value],
    ) -> HostResult<Self::Value>;
    /// Resets call-stack bookkeeping before a top-level call.
    fn reset_call_stack_for_top_level_call(
        &mut self,
        top_level_callback_event_time: i64,
        host_callback_id: i64,
    );

    /// Retrieves and clears the pending script exception.
    fn take_script_exception(&mut self) -> Option<Self::Value>;
    /// Error object standing in for a forced termination.
    fn pending_termination_error(&mut self) -> Self::Value;

    /// Compiles and returns the top-level function for a script.
    fn load_script(&mut self, load: &ScriptLoad<'_>) -> HostResult<Self::Value>;

    /// Current debugger position.
    fn current_source_location(&mut self) -> SourceLocation;
    /// Position of the last executed statement, if any.
    fn last_executed_location(&mut self) -> Option<SourceLocation>;
}

/// One scope of a closure environment, resolved to live handles.
pub enum ScopeBinding<'a, H: HostTypes + ?Sized> {
    /// Captured-variable slots.
    Slots(&'a H::SlotArray),
    /// Activation or `with` object.
    Object(&'a H::Value),
}

impl<H: HostTypes + ?Sized> fmt::Debug for ScopeBinding<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slots(_) => f.write_str("Slots(..)"),
            Self::Object(v) => f.debug_tuple("Object").field(v).finish(),
        }
    }
}

/// Top-level function source handed to [`InflationHost::load_top_level_body`].
#[derive(Debug, Clone, Copy)]
pub struct TopLevelSource<'a> {
    /// Which entry point produced the function.
    pub kind: TopLevelKind,
    /// Snapshot descriptor.
    pub function: &'a TopLevelFunction,
}

/// Capabilities the snapshot inflater drives.
pub trait InflationHost: HostTypes {
    /// Host-side promise reaction record.
    type PromiseReaction: Clone + 'static;

    /// Returns the context for a recorded tag and its global object.
    fn context_for_tag(
        &mut self,
        context: &SnapContext,
    ) -> HostResult<(Self::Context, Self::Value)>;
    /// Creates a type handler.
    fn create_handler(&mut self, handler: &SnapHandler) -> HostResult<Self::Handler>;
    /// Creates a type; its prototype is wired later.
    fn create_type(
        &mut self,
        context: &Self::Context,
        handler: Option<&Self::Handler>,
        ty: &SnapType,
    ) -> HostResult<Self::Type>;
    /// Wires a type's prototype.
    fn set_type_prototype(&mut self, ty: &Self::Type, prototype: &Self::Value) -> HostResult<()>;

    /// Compiles (or fetches) a top-level function body.
    fn load_top_level_body(
        &mut self,
        context: &Self::Context,
        source: TopLevelSource<'_>,
    ) -> HostResult<Self::FunctionBody>;
    /// Resolves a nested body inside an already inflated parent.
    fn resolve_nested_body(
        &mut self,
        parent: &Self::FunctionBody,
        info: &FunctionBodyInfo,
    ) -> HostResult<Self::FunctionBody>;

    /// Creates a primitive heap value.
    fn create_primitive(
        &mut self,
        context: &Self::Context,
        value: &SnapPrimitive,
    ) -> HostResult<Self::Value>;
    /// Creates an unwired slot array.
    fn create_slot_array(
        &mut self,
        body: Option<&Self::FunctionBody>,
        len: usize,
    ) -> HostResult<Self::SlotArray>;
    /// Writes one slot.
    fn set_slot(&mut self, slots: &Self::SlotArray, index: usize, value: &Self::Value)
        -> HostResult<()>;
    /// Creates a closure environment from resolved scopes.
    fn create_environment(
        &mut self,
        scopes: &[ScopeBinding<'_, Self>],
    ) -> HostResult<Self::Environment>;

    /// Allocates an object shell of type `ty`; fields are wired later.
    fn allocate_object(
        &mut self,
        ty: &Self::Type,
        object: &SnapObject,
        body: Option<&Self::FunctionBody>,
    ) -> HostResult<Self::Value>;
    /// `true` if `candidate` from the previous pass can stand in for `object`.
    fn can_reuse_object(&mut self, candidate: &Self::Value, object: &SnapObject) -> bool;
    /// Resets a reused object to type `ty`, returning the property ids it
    /// dropped.
    fn reset_object_for_reuse(
        &mut self,
        candidate: &Self::Value,
        ty: &Self::Type,
    ) -> HostResult<Vec<PropertyId>>;
    /// Attaches a closure environment to a script function.
    fn set_function_environment(
        &mut self,
        function: &Self::Value,
        environment: &Self::Environment,
    ) -> HostResult<()>;
    /// Writes an own data property without running setters.
    fn set_property_value(
        &mut self,
        object: &Self::Value,
        pid: PropertyId,
        value: &Self::Value,
    ) -> HostResult<()>;
    /// Writes an array element.
    fn set_element(&mut self, array: &Self::Value, index: u32, value: &Self::Value)
        -> HostResult<()>;

    /// Creates a promise reaction record.
    fn create_promise_reaction(
        &mut self,
        reaction: &SnapPromiseReaction,
        handler: &Self::Value,
        capability: &Self::Value,
    ) -> HostResult<Self::PromiseReaction>;
    /// Restores a promise's state and pending reactions.
    fn set_promise_state(
        &mut self,
        promise: &Self::Value,
        status: PromiseStatus,
        result: &Self::Value,
        reactions: &[Self::PromiseReaction],
    ) -> HostResult<()>;

    /// Marks a root so it survives until the embedder releases it.
    fn retain_root(&mut self, id: PtrId, value: &Self::Value) -> HostResult<()>;
    /// Drops property caches keyed by the given ids.
    fn invalidate_property_caches(&mut self, pids: &FxHashSet<PropertyId>);
}
