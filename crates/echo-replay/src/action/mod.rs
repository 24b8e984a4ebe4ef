// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Action records.
//!
//! Every loggable external-API operation is one variant of [`Action`]. A
//! record supports four operations, each a single `match` over the variant:
//!
//! - `execute` re-performs the operation against a [`HostRuntime`] and tags
//!   its live result back into the inflate map;
//! - `write_header` / `emit` serialize the fixed fields and the
//!   variable-length body;
//! - `read_header` / `parse` invert them, allocating the body from a
//!   [`PayloadArena`];
//! - `unload` releases the body through the arena's individual-release path.
//!
//! [`HostRuntime`]: crate::host::HostRuntime
//! [`PayloadArena`]: crate::payload::PayloadArena
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::host::SourceLocation;
use crate::ident::PropertyId;
use crate::logged_var::LoggedVar;
use crate::payload::PayloadRef;

mod execute;
mod log;
mod serial;

pub use execute::ExecuteError;
pub(crate) use execute::undefined;
pub use log::{ActionLog, LOG_MAGIC, LOG_VERSION};
pub use serial::LogError;

/// Wire tag of an action kind.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Snapshot marker.
    Snapshot = 0,
    /// Create a small integer.
    CreateInteger = 1,
    /// Create a number.
    CreateNumber = 2,
    /// Create a boolean.
    CreateBoolean = 3,
    /// Create a string.
    CreateString = 4,
    /// Create a symbol.
    CreateSymbol = 5,
    /// Type conversion.
    Convert = 6,
    /// Register an embedder root.
    AddRootRef = 7,
    /// Release an embedder root.
    RemoveRootRef = 8,
    /// Allocate an ordinary or external object.
    AllocateObject = 9,
    /// Allocate an array.
    AllocateArray = 10,
    /// Allocate an array buffer.
    AllocateArrayBuffer = 11,
    /// Allocate an array buffer over embedder bytes.
    AllocateExternalArrayBuffer = 12,
    /// Allocate a host function.
    AllocateFunction = 13,
    /// Retrieve and clear the recorded exception.
    GetAndClearException = 14,
    /// Read a named property.
    GetProperty = 15,
    /// Read an indexed element.
    GetIndex = 16,
    /// Read an own property descriptor.
    GetOwnPropertyInfo = 17,
    /// Enumerate own property names or symbols.
    GetOwnPropertyKeys = 18,
    /// Define a property.
    DefineProperty = 19,
    /// Delete a property.
    DeleteProperty = 20,
    /// Replace a prototype.
    SetPrototype = 21,
    /// Write a named property.
    SetProperty = 22,
    /// Write an indexed element.
    SetIndex = 23,
    /// Read a typed array's buffer.
    GetTypedArrayInfo = 24,
    /// Constructor call.
    ConstructCall = 25,
    /// Callback registration or cancellation.
    CallbackOp = 26,
    /// Script load.
    CodeParse = 27,
    /// Ordinary call.
    CallExistingFunction = 28,
}

impl ActionKind {
    /// Decodes a wire tag.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        use ActionKind::{
            AddRootRef, AllocateArray, AllocateArrayBuffer, AllocateExternalArrayBuffer,
            AllocateFunction, AllocateObject, CallExistingFunction, CallbackOp, CodeParse,
            ConstructCall, Convert, CreateBoolean, CreateInteger, CreateNumber, CreateString,
            CreateSymbol, DefineProperty, DeleteProperty, GetAndClearException, GetIndex,
            GetOwnPropertyInfo, GetOwnPropertyKeys, GetProperty, GetTypedArrayInfo,
            RemoveRootRef, SetIndex, SetProperty, SetPrototype, Snapshot,
        };
        const ALL: [ActionKind; 29] = [
            Snapshot,
            CreateInteger,
            CreateNumber,
            CreateBoolean,
            CreateString,
            CreateSymbol,
            Convert,
            AddRootRef,
            RemoveRootRef,
            AllocateObject,
            AllocateArray,
            AllocateArrayBuffer,
            AllocateExternalArrayBuffer,
            AllocateFunction,
            GetAndClearException,
            GetProperty,
            GetIndex,
            GetOwnPropertyInfo,
            GetOwnPropertyKeys,
            DefineProperty,
            DeleteProperty,
            SetPrototype,
            SetProperty,
            SetIndex,
            GetTypedArrayInfo,
            ConstructCall,
            CallbackOp,
            CodeParse,
            CallExistingFunction,
        ];
        ALL.get(usize::from(tag)).copied()
    }

    /// Wire tag.
    #[must_use]
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Target of a type conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Conversion {
    /// `ToNumber`.
    ToNumber,
    /// `ToBoolean`.
    ToBoolean,
    /// `ToString`.
    ToString,
    /// `ToObject`.
    ToObject,
}

impl Conversion {
    pub(crate) fn tag(self) -> u8 {
        match self {
            Self::ToNumber => 0,
            Self::ToBoolean => 1,
            Self::ToString => 2,
            Self::ToObject => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::ToNumber),
            1 => Some(Self::ToBoolean),
            2 => Some(Self::ToString),
            3 => Some(Self::ToObject),
            _ => None,
        }
    }
}

/// Script load flags.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LoadFlags(pub u32);

impl LoadFlags {
    /// Plain script.
    pub const NONE: Self = Self(0);
    /// Global code (not a module or function body).
    pub const GLOBAL_CODE: Self = Self(0x1);
    /// Source was supplied as UTF-8 bytes.
    pub const UTF8_SOURCE: Self = Self(0x2);
    /// Source is owned by the embedder.
    pub const EXTERNAL_SOURCE: Self = Self(0x4);

    /// `true` if every bit of `other` is set.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for LoadFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Constructor call. `args[0]` is the callee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructCallAction {
    /// Logged argument count, callee included.
    pub arg_count: u32,
    /// Callee followed by the user arguments.
    pub args: PayloadRef,
    /// Logged result.
    pub result: LoggedVar,
}

/// Ordinary call. `args[0]` is the callee.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFunctionAction {
    /// Nesting depth; `0` marks a root call.
    pub callback_depth: u32,
    /// Logged argument count, callee included.
    pub arg_count: u32,
    /// Callee followed by the user arguments.
    pub args: PayloadRef,
    /// Logged result.
    pub result: LoggedVar,
    /// Wall-clock start at record time.
    pub begin_time: f64,
    /// Wall-clock end at record time.
    pub end_time: f64,
    /// Event time of the call.
    pub call_event_time: i64,
    /// Host callback that triggered the call, or `-1`.
    pub host_callback_id: i64,
    /// Event time of the enclosing top-level callback.
    pub top_level_callback_event_time: i64,
    /// The call ended with a script exception at record time.
    pub has_script_exception: bool,
    /// The call ended with forced termination at record time.
    pub has_terminating_exception: bool,
    /// Last executed position after a replayed root call.
    pub last_executed_location: Option<SourceLocation>,
}

/// Callback registration or cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackAction {
    /// Registers a new callback.
    pub is_create: bool,
    /// Cancels a callback.
    pub is_cancel: bool,
    /// Callback repeats (interval rather than timeout).
    pub is_repeating: bool,
    /// Callback executing when the operation happened.
    pub current_callback_id: i64,
    /// Callback created or cancelled.
    pub new_callback_id: i64,
    /// Source position of the registration, captured on first replay.
    pub register_location: Option<SourceLocation>,
}

/// Script load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeParseAction {
    /// Logged result (the top-level function).
    pub result: LoggedVar,
    /// Host document id.
    pub document_id: u64,
    /// Load flags.
    pub load_flags: LoadFlags,
    /// Body counter id assigned at record time.
    pub body_counter_id: u32,
    /// Directory the source store files this script under.
    pub source_directory: String,
    /// Script uri.
    pub uri: String,
    /// Source text.
    pub source: PayloadRef,
    /// Source length in bytes.
    pub source_len: u32,
    /// BLAKE3 digest of the source text.
    pub source_digest: [u8; 32],
}

/// One loggable external operation.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Action {
    /// Marker for a heap snapshot restoring `restore_time`.
    Snapshot { restore_time: i64 },
    /// Create a small integer.
    CreateInteger { value: i32, result: LoggedVar },
    /// Create a number.
    CreateNumber { value: f64, result: LoggedVar },
    /// Create a boolean.
    CreateBoolean { value: bool, result: LoggedVar },
    /// Create a string from `text`.
    CreateString { text: PayloadRef, result: LoggedVar },
    /// Create a symbol.
    CreateSymbol { description: LoggedVar, result: LoggedVar },
    /// Convert `value`.
    Convert { to: Conversion, value: LoggedVar, result: LoggedVar },
    /// Register an embedder root.
    AddRootRef { value: LoggedVar },
    /// Release an embedder root.
    RemoveRootRef { value: LoggedVar },
    /// Allocate an ordinary or external object.
    AllocateObject { external: bool, result: LoggedVar },
    /// Allocate an array.
    AllocateArray { length: u32, result: LoggedVar },
    /// Allocate a zeroed array buffer.
    AllocateArrayBuffer { length: u32, result: LoggedVar },
    /// Allocate an array buffer over a copy of `bytes`.
    AllocateExternalArrayBuffer { bytes: PayloadRef, result: LoggedVar },
    /// Host function; anonymous when `name` is absent.
    AllocateFunction { name: LoggedVar, result: LoggedVar },
    /// Retrieve and clear the recorded exception.
    GetAndClearException { result: LoggedVar },
    /// Read a named property.
    GetProperty { object: LoggedVar, pid: PropertyId, result: LoggedVar },
    /// Read an indexed element.
    GetIndex { object: LoggedVar, index: LoggedVar, result: LoggedVar },
    /// Read an own property descriptor.
    GetOwnPropertyInfo { object: LoggedVar, pid: PropertyId, result: LoggedVar },
    /// Own names, or own symbols when `symbols` is set.
    GetOwnPropertyKeys { object: LoggedVar, symbols: bool, result: LoggedVar },
    /// Define a property from a descriptor.
    DefineProperty {
        object: LoggedVar,
        pid: PropertyId,
        descriptor: LoggedVar,
        result: LoggedVar,
    },
    /// Delete a property.
    DeleteProperty {
        object: LoggedVar,
        pid: PropertyId,
        strict: bool,
        result: LoggedVar,
    },
    /// Replace a prototype.
    SetPrototype { object: LoggedVar, prototype: LoggedVar },
    /// Write a named property.
    SetProperty {
        object: LoggedVar,
        pid: PropertyId,
        value: LoggedVar,
        strict: bool,
    },
    /// Write an indexed element.
    SetIndex { object: LoggedVar, index: LoggedVar, value: LoggedVar },
    /// Read a typed array's buffer.
    GetTypedArrayInfo { object: LoggedVar, result: LoggedVar },
    /// Constructor call.
    ConstructCall(ConstructCallAction),
    /// Callback registration or cancellation.
    CallbackOp(CallbackAction),
    /// Script load.
    CodeParse(CodeParseAction),
    /// Ordinary call.
    CallExistingFunction(CallFunctionAction),
}

impl Action {
    /// Wire kind.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Snapshot { .. } => ActionKind::Snapshot,
            Self::CreateInteger { .. } => ActionKind::CreateInteger,
            Self::CreateNumber { .. } => ActionKind::CreateNumber,
            Self::CreateBoolean { .. } => ActionKind::CreateBoolean,
            Self::CreateString { .. } => ActionKind::CreateString,
            Self::CreateSymbol { .. } => ActionKind::CreateSymbol,
            Self::Convert { .. } => ActionKind::Convert,
            Self::AddRootRef { .. } => ActionKind::AddRootRef,
            Self::RemoveRootRef { .. } => ActionKind::RemoveRootRef,
            Self::AllocateObject { .. } => ActionKind::AllocateObject,
            Self::AllocateArray { .. } => ActionKind::AllocateArray,
            Self::AllocateArrayBuffer { .. } => ActionKind::AllocateArrayBuffer,
            Self::AllocateExternalArrayBuffer { .. } => ActionKind::AllocateExternalArrayBuffer,
            Self::AllocateFunction { .. } => ActionKind::AllocateFunction,
            Self::GetAndClearException { .. } => ActionKind::GetAndClearException,
            Self::GetProperty { .. } => ActionKind::GetProperty,
            Self::GetIndex { .. } => ActionKind::GetIndex,
            Self::GetOwnPropertyInfo { .. } => ActionKind::GetOwnPropertyInfo,
            Self::GetOwnPropertyKeys { .. } => ActionKind::GetOwnPropertyKeys,
            Self::DefineProperty { .. } => ActionKind::DefineProperty,
            Self::DeleteProperty { .. } => ActionKind::DeleteProperty,
            Self::SetPrototype { .. } => ActionKind::SetPrototype,
            Self::SetProperty { .. } => ActionKind::SetProperty,
            Self::SetIndex { .. } => ActionKind::SetIndex,
            Self::GetTypedArrayInfo { .. } => ActionKind::GetTypedArrayInfo,
            Self::ConstructCall(_) => ActionKind::ConstructCall,
            Self::CallbackOp(_) => ActionKind::CallbackOp,
            Self::CodeParse(_) => ActionKind::CodeParse,
            Self::CallExistingFunction(_) => ActionKind::CallExistingFunction,
        }
    }

    /// Logged result, for kinds that produce one.
    #[must_use]
    pub fn result(&self) -> Option<LoggedVar> {
        match self {
            Self::CreateInteger { result, .. }
            | Self::CreateNumber { result, .. }
            | Self::CreateBoolean { result, .. }
            | Self::CreateString { result, .. }
            | Self::CreateSymbol { result, .. }
            | Self::Convert { result, .. }
            | Self::AllocateObject { result, .. }
            | Self::AllocateArray { result, .. }
            | Self::AllocateArrayBuffer { result, .. }
            | Self::AllocateExternalArrayBuffer { result, .. }
            | Self::AllocateFunction { result, .. }
            | Self::GetAndClearException { result }
            | Self::GetProperty { result, .. }
            | Self::GetIndex { result, .. }
            | Self::GetOwnPropertyInfo { result, .. }
            | Self::GetOwnPropertyKeys { result, .. }
            | Self::DefineProperty { result, .. }
            | Self::DeleteProperty { result, .. }
            | Self::GetTypedArrayInfo { result, .. }
            | Self::ConstructCall(ConstructCallAction { result, .. })
            | Self::CodeParse(CodeParseAction { result, .. })
            | Self::CallExistingFunction(CallFunctionAction { result, .. }) => Some(*result),
            Self::Snapshot { .. }
            | Self::AddRootRef { .. }
            | Self::RemoveRootRef { .. }
            | Self::SetPrototype { .. }
            | Self::SetProperty { .. }
            | Self::SetIndex { .. }
            | Self::CallbackOp(_) => None,
        }
    }
}

/// One action together with its event time.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    /// Position in the log's event timeline.
    pub event_time: i64,
    /// The operation.
    pub action: Action,
}

impl ActionRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(event_time: i64, action: Action) -> Self {
        Self { event_time, action }
    }

    /// Wire kind.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }

    /// `true` for a call entered from the host with no script on the stack.
    #[must_use]
    pub fn is_root_call(&self) -> bool {
        matches!(
            &self.action,
            Action::CallExistingFunction(call) if call.callback_depth == 0
        )
    }

    /// Restore time of a snapshot marker or call time of a root call.
    #[must_use]
    pub fn time_of_root_call_or_snapshot(&self) -> Option<i64> {
        match &self.action {
            Action::Snapshot { restore_time } => Some(*restore_time),
            Action::CallExistingFunction(call) if call.callback_depth == 0 => {
                Some(call.call_event_time)
            }
            _ => None,
        }
    }

    /// Length of the argument buffer handed to the host for a call, which
    /// excludes the callee.
    #[must_use]
    pub fn exec_args_len(&self) -> Option<usize> {
        match &self.action {
            Action::ConstructCall(ConstructCallAction { arg_count, .. })
            | Action::CallExistingFunction(CallFunctionAction { arg_count, .. }) => {
                Some((*arg_count as usize).saturating_sub(1))
            }
            _ => None,
        }
    }

    /// `false` for kinds whose host exceptions are not captured into the
    /// recorded-exception slot.
    #[must_use]
    pub fn is_executed_in_script_wrapper(&self) -> bool {
        !matches!(
            self.action,
            Action::GetAndClearException { .. } | Action::Snapshot { .. }
        )
    }

    /// Registration position of a callback op, once replayed.
    #[must_use]
    pub fn register_location(&self) -> Option<SourceLocation> {
        match &self.action {
            Action::CallbackOp(cb) => cb.register_location,
            _ => None,
        }
    }

    /// Last executed position after a replayed root call.
    #[must_use]
    pub fn last_executed_location(&self) -> Option<SourceLocation> {
        match &self.action {
            Action::CallExistingFunction(call) => call.last_executed_location,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::PtrId;

    fn call(depth: u32) -> ActionRecord {
        ActionRecord::new(
            9,
            Action::CallExistingFunction(CallFunctionAction {
                callback_depth: depth,
                arg_count: 1,
                args: PayloadRef::UNSET,
                result: LoggedVar::Ptr(PtrId(1)),
                begin_time: 0.0,
                end_time: 0.0,
                call_event_time: 7,
                host_callback_id: -1,
                top_level_callback_event_time: 7,
                has_script_exception: false,
                has_terminating_exception: false,
                last_executed_location: None,
            }),
        )
    }

    #[test]
    fn tags_round_trip_through_from_tag() {
        for tag in 0..=28u8 {
            assert_eq!(ActionKind::from_tag(tag).map(ActionKind::tag), Some(tag));
        }
        assert_eq!(ActionKind::from_tag(29), None);
    }

    #[test]
    fn only_depth_zero_calls_are_root_calls() {
        assert!(call(0).is_root_call());
        assert_eq!(call(0).time_of_root_call_or_snapshot(), Some(7));
        assert!(!call(2).is_root_call());
        assert_eq!(call(2).time_of_root_call_or_snapshot(), None);
    }

    #[test]
    fn snapshot_markers_report_restore_time() {
        let marker = ActionRecord::new(3, Action::Snapshot { restore_time: 2 });
        assert_eq!(marker.time_of_root_call_or_snapshot(), Some(2));
        assert!(!marker.is_executed_in_script_wrapper());
    }

    #[test]
    fn exception_retrieval_runs_outside_the_script_wrapper() {
        let get = ActionRecord::new(
            1,
            Action::GetAndClearException {
                result: LoggedVar::Absent,
            },
        );
        assert!(!get.is_executed_in_script_wrapper());
        assert!(call(0).is_executed_in_script_wrapper());
    }

    #[test]
    fn a_call_with_only_a_callee_has_no_exec_args() {
        assert_eq!(call(0).exec_args_len(), Some(0));
    }
}
