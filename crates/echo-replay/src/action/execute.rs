// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Record execution against a live host.
use thiserror::Error;
use tracing::trace;

use super::{
    Action, ActionKind, ActionRecord, CallFunctionAction, CodeParseAction, ConstructCallAction,
};
use crate::abort::{AbortReason, AbortRequest};
use crate::host::{HostRuntime, HostTypes, ScriptLoad};
use crate::inflate_map::InflateError;
use crate::logged_var::{InlineValue, LoggedVar};
use crate::payload::{PayloadArena, PayloadError, PayloadRef};
use crate::replay::{ReplayError, ReplaySession};

/// Outcome of executing a record other than success.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The debugger asked to stop. Not a failure.
    #[error("replay interrupted at t={}: {}", .0.target_time, .0.reason)]
    Interrupted(AbortRequest),
    /// The replay pass cannot continue.
    #[error(transparent)]
    Fatal(#[from] ReplayError),
}

impl From<InflateError> for ExecuteError {
    fn from(err: InflateError) -> Self {
        Self::Fatal(err.into())
    }
}

impl From<PayloadError> for ExecuteError {
    fn from(err: PayloadError) -> Self {
        Self::Fatal(err.into())
    }
}

/// Splits a logged argument vector into the resolved callee and the
/// arguments handed to the host.
fn resolve_call<H: HostRuntime>(
    session: &ReplaySession<H>,
    arena: &PayloadArena,
    args: PayloadRef,
    event_time: i64,
) -> Result<(H::Value, Vec<H::Value>), ExecuteError> {
    let vars = arena.vars(args)?;
    let (callee, rest) = vars
        .split_first()
        .ok_or(ReplayError::InvalidCallee { event_time })?;
    if callee.is_absent() {
        return Err(ReplayError::InvalidCallee { event_time }.into());
    }
    let callee = session.resolve(*callee)?;
    let exec_args = rest
        .iter()
        .map(|var| session.resolve(*var))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((callee, exec_args))
}

impl ActionRecord {
    /// Re-performs this action against `host`.
    ///
    /// Every logged operand is resolved through the session's inflate map.
    /// A live result is tagged back under the record's logged result so later
    /// records resolve it identically. Script exceptions and forced
    /// termination are moved into the session's recorded-exception slot; a
    /// debugger abort comes back as [`ExecuteError::Interrupted`].
    ///
    /// Returns the logged result when the action produced a live value.
    ///
    /// # Errors
    /// [`ExecuteError::Interrupted`] for debugger aborts,
    /// [`ExecuteError::Fatal`] for identity errors, result divergence and
    /// host out-of-memory.
    pub fn execute<H: HostRuntime>(
        &mut self,
        arena: &PayloadArena,
        session: &mut ReplaySession<H>,
        host: &mut H,
    ) -> Result<Option<LoggedVar>, ExecuteError> {
        let event_time = self.event_time;
        let kind = self.kind();
        trace!(event_time, %kind, "execute");

        let live: Option<H::Value> = match &mut self.action {
            Action::Snapshot { .. } => None,
            Action::CreateInteger { value, .. } => Some(H::inline_value(InlineValue::Int(*value))),
            Action::CreateBoolean { value, .. } => {
                Some(H::inline_value(InlineValue::Bool(*value)))
            }
            Action::CreateNumber { value, .. } => {
                let r = host.create_number(*value);
                session.absorb(host, kind, event_time, r)?
            }
            Action::CreateString { text, .. } => {
                let r = host.create_string(arena.text(*text)?);
                session.absorb(host, kind, event_time, r)?
            }
            Action::CreateSymbol { description, .. } => {
                let description = session.resolve(*description)?;
                let r = host.create_symbol(&description);
                session.absorb(host, kind, event_time, r)?
            }
            Action::Convert { to, value, .. } => {
                let value = session.resolve(*value)?;
                let r = host.convert(*to, &value);
                session.absorb(host, kind, event_time, r)?
            }
            Action::AddRootRef { value } | Action::RemoveRootRef { value } => {
                if let LoggedVar::Ptr(id) = *value {
                    let live = session.resolve(*value)?;
                    let r = if kind == ActionKind::AddRootRef {
                        host.add_root_ref(id, &live)
                    } else {
                        host.remove_root_ref(id, &live)
                    };
                    session.absorb(host, kind, event_time, r)?;
                }
                None
            }
            Action::AllocateObject { external, .. } => {
                let r = host.allocate_object(*external);
                session.absorb(host, kind, event_time, r)?
            }
            Action::AllocateArray { length, .. } => {
                let r = host.allocate_array(*length);
                session.absorb(host, kind, event_time, r)?
            }
            Action::AllocateArrayBuffer { length, .. } => {
                let r = host.allocate_array_buffer(*length);
                session.absorb(host, kind, event_time, r)?
            }
            Action::AllocateExternalArrayBuffer { bytes, .. } => {
                let r = host.allocate_external_array_buffer(arena.bytes(*bytes)?);
                session.absorb(host, kind, event_time, r)?
            }
            Action::AllocateFunction { name, .. } => {
                let name = session.inflate(*name)?;
                let r = host.allocate_function(name.as_ref());
                session.absorb(host, kind, event_time, r)?
            }
            // Reads the slot directly; nothing here can raise a script
            // exception.
            Action::GetAndClearException { .. } => session.take_recorded_exception(),
            Action::GetProperty { object, pid, .. } => {
                let object = session.resolve(*object)?;
                let r = host.get_property(&object, *pid);
                session.absorb(host, kind, event_time, r)?
            }
            Action::GetIndex { object, index, .. } => {
                let object = session.resolve(*object)?;
                let index = session.resolve(*index)?;
                let r = host.get_index(&object, &index);
                session.absorb(host, kind, event_time, r)?
            }
            Action::GetOwnPropertyInfo { object, pid, .. } => {
                let object = session.resolve(*object)?;
                let r = host.get_own_property_info(&object, *pid);
                session.absorb(host, kind, event_time, r)?
            }
            Action::GetOwnPropertyKeys {
                object, symbols, ..
            } => {
                let object = session.resolve(*object)?;
                let r = host.get_own_property_keys(&object, *symbols);
                session.absorb(host, kind, event_time, r)?
            }
            Action::DefineProperty {
                object,
                pid,
                descriptor,
                ..
            } => {
                let object = session.resolve(*object)?;
                let descriptor = session.resolve(*descriptor)?;
                let r = host.define_property(&object, *pid, &descriptor);
                session.absorb(host, kind, event_time, r)?
            }
            Action::DeleteProperty {
                object,
                pid,
                strict,
                ..
            } => {
                let object = session.resolve(*object)?;
                let r = host.delete_property(&object, *pid, *strict);
                session.absorb(host, kind, event_time, r)?
            }
            Action::SetPrototype { object, prototype } => {
                let object = session.resolve(*object)?;
                let prototype = session.resolve(*prototype)?;
                let r = host.set_prototype(&object, &prototype);
                session.absorb(host, kind, event_time, r)?;
                None
            }
            Action::SetProperty {
                object,
                pid,
                value,
                strict,
            } => {
                let object = session.resolve(*object)?;
                let value = session.resolve(*value)?;
                let r = host.set_property(&object, *pid, &value, *strict);
                session.absorb(host, kind, event_time, r)?;
                None
            }
            Action::SetIndex {
                object,
                index,
                value,
            } => {
                let object = session.resolve(*object)?;
                let index = session.resolve(*index)?;
                let value = session.resolve(*value)?;
                let r = host.set_index(&object, &index, &value);
                session.absorb(host, kind, event_time, r)?;
                None
            }
            Action::GetTypedArrayInfo { object, .. } => {
                let object = session.resolve(*object)?;
                let r = host.typed_array_buffer(&object);
                session.absorb(host, kind, event_time, r)?
            }
            Action::ConstructCall(ConstructCallAction { args, .. }) => {
                let (callee, exec_args) = resolve_call(session, arena, *args, event_time)?;
                let r = host.construct(&callee, &exec_args);
                session.absorb(host, kind, event_time, r)?
            }
            Action::CallbackOp(cb) => {
                if cb.register_location.is_none() {
                    cb.register_location = Some(host.current_source_location());
                }
                None
            }
            Action::CodeParse(CodeParseAction {
                document_id,
                load_flags,
                body_counter_id,
                uri,
                source,
                ..
            }) => {
                let load = ScriptLoad {
                    document_id: *document_id,
                    uri: uri.as_str(),
                    source: arena.text(*source)?,
                    load_flags: *load_flags,
                    body_counter_id: *body_counter_id,
                };
                let r = host.load_script(&load);
                session.absorb(host, kind, event_time, r)?
            }
            Action::CallExistingFunction(call) => {
                execute_call(call, arena, session, host, event_time)?
            }
        };

        let Some(live) = live else {
            return Ok(None);
        };
        match self.action.result() {
            Some(recorded) => {
                session.tag_result(event_time, recorded, &live)?;
                Ok(Some(recorded))
            }
            None => Ok(None),
        }
    }
}

fn execute_call<H: HostRuntime>(
    call: &mut CallFunctionAction,
    arena: &PayloadArena,
    session: &mut ReplaySession<H>,
    host: &mut H,
    event_time: i64,
) -> Result<Option<H::Value>, ExecuteError> {
    let (callee, exec_args) = resolve_call(session, arena, call.args, event_time)?;
    let root = call.callback_depth == 0;
    if root {
        host.reset_call_stack_for_top_level_call(
            call.top_level_callback_event_time,
            call.host_callback_id,
        );
    }
    let r = host.call_function(&callee, &exec_args);
    let live = session.absorb(host, ActionKind::CallExistingFunction, event_time, r)?;
    if root {
        call.last_executed_location = host.last_executed_location();
        let recorded_uncaught = call.has_script_exception || call.has_terminating_exception;
        if recorded_uncaught && session.config().break_on_uncaught_exception {
            return Err(ExecuteError::Interrupted(AbortRequest::new(
                event_time,
                AbortReason::UncaughtException,
            )));
        }
    }
    Ok(live)
}

/// Value used where a logged operand is absent.
pub(crate) fn undefined<H: HostTypes>() -> H::Value {
    H::inline_value(InlineValue::Undefined)
}
