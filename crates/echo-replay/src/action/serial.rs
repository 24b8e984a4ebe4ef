// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Record header and body serialization.
//!
//! A record is written as a header (kind tag, event time, then the kind's
//! fixed inline fields including its logged result) followed by the body
//! produced by [`ActionRecord::emit`], which carries only variable-length
//! data: argument vectors, strings, byte buffers and code-parse metadata.
use std::io;

use thiserror::Error;

use super::{
    Action, ActionKind, ActionRecord, CallFunctionAction, CallbackAction, CodeParseAction,
    ConstructCallAction, Conversion, LoadFlags,
};
use crate::codec::{CodecError, Decode, Encode, Reader, Writer};
use crate::config::ReplayConfig;
use crate::ident::PropertyId;
use crate::logged_var::LoggedVar;
use crate::payload::{PayloadArena, PayloadError, PayloadRef};
use crate::source_store::{SourceKey, SourceStore, SourceStoreError};

/// Errors reading or writing an action log.
#[derive(Debug, Error)]
pub enum LogError {
    /// Low-level encoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// Payload missing or of the wrong kind.
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),
    /// Source store failure.
    #[error("source store error: {0}")]
    Source(#[from] SourceStoreError),
    /// Stream failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The stream does not start with the log magic.
    #[error("bad action log magic")]
    BadMagic,
    /// Version other than the one this crate writes.
    #[error("unsupported action log version {0}")]
    UnsupportedVersion(u16),
    /// Non-zero flags or reserved bytes.
    #[error("action log header flags and reserved bytes must be zero")]
    NonZeroReserved,
    /// A frame exceeds the configured bound.
    #[error("frame of {len} bytes exceeds limit {max}")]
    FrameTooLarge {
        /// Frame length.
        len: usize,
        /// Configured limit.
        max: usize,
    },
    /// The stream ended inside a frame length prefix.
    #[error("log truncated: {read} of 4 length-prefix bytes present")]
    TruncatedLengthPrefix {
        /// Bytes of the prefix that were present.
        read: usize,
    },
    /// A record's event time leaves no room for a following record.
    #[error("record event time {event_time} is out of range")]
    EventTimeOverflow {
        /// Offending event time.
        event_time: i64,
    },
    /// Unknown kind tag.
    #[error("unknown action tag {0}")]
    UnknownActionTag(u8),
    /// A frame has bytes after its record.
    #[error("record at t={event_time} left {remaining} trailing bytes")]
    TrailingBytes {
        /// Event time of the record.
        event_time: i64,
        /// Unread bytes.
        remaining: usize,
    },
    /// Persisted source length differs from the logged length.
    #[error("source for document {document} has {actual} bytes, log says {expected}")]
    SourceLengthMismatch {
        /// Document key.
        document: String,
        /// Logged length.
        expected: usize,
        /// Persisted length.
        actual: usize,
    },
    /// Persisted source does not match the logged digest.
    #[error("source for document {document} does not match its logged digest")]
    SourceDigestMismatch {
        /// Document key.
        document: String,
    },
}

fn write_var(w: &mut Writer, var: LoggedVar) -> Result<(), CodecError> {
    var.encode(w)
}

fn read_var(r: &mut Reader<'_>) -> Result<LoggedVar, CodecError> {
    LoggedVar::decode(r)
}

fn read_pid(r: &mut Reader<'_>) -> Result<PropertyId, CodecError> {
    Ok(PropertyId(r.read_u32_le()?))
}

fn write_args(
    w: &mut Writer,
    arena: &PayloadArena,
    args: PayloadRef,
    arg_count: u32,
) -> Result<(), LogError> {
    let vars = arena.vars(args)?;
    if vars.len() != arg_count as usize {
        return Err(CodecError::LengthTooLarge.into());
    }
    w.write_u32_le(arg_count);
    for var in vars {
        write_var(w, *var)?;
    }
    Ok(())
}

fn read_args(
    r: &mut Reader<'_>,
    arena: &mut PayloadArena,
    max: usize,
) -> Result<(u32, PayloadRef), LogError> {
    let arg_count = r.read_u32_le()?;
    if arg_count as usize > max {
        return Err(CodecError::LengthTooLarge.into());
    }
    let vars = (0..arg_count)
        .map(|_| read_var(r))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((arg_count, arena.alloc_vars(vars)?))
}

fn release(arena: &mut PayloadArena, slot: &mut PayloadRef) -> Result<(), PayloadError> {
    if slot.is_unset() {
        return Ok(());
    }
    arena.release(*slot)?;
    *slot = PayloadRef::UNSET;
    Ok(())
}

impl ActionRecord {
    /// Writes the kind tag, event time and fixed inline fields.
    ///
    /// # Errors
    /// Codec failures.
    pub fn write_header(&self, w: &mut Writer) -> Result<(), LogError> {
        w.write_u8(self.kind().tag());
        w.write_i64_le(self.event_time);
        match &self.action {
            Action::Snapshot { restore_time } => w.write_i64_le(*restore_time),
            Action::CreateInteger { value, result } => {
                w.write_i32_le(*value);
                write_var(w, *result)?;
            }
            Action::CreateNumber { value, result } => {
                w.write_f64_le(*value);
                write_var(w, *result)?;
            }
            Action::CreateBoolean { value, result } => {
                w.write_bool(*value);
                write_var(w, *result)?;
            }
            Action::CreateString { result, .. }
            | Action::AllocateExternalArrayBuffer { result, .. }
            | Action::GetAndClearException { result }
            | Action::ConstructCall(ConstructCallAction { result, .. }) => {
                write_var(w, *result)?;
            }
            Action::CreateSymbol {
                description: value,
                result,
            }
            | Action::AllocateFunction {
                name: value,
                result,
            }
            | Action::GetTypedArrayInfo {
                object: value,
                result,
            } => {
                write_var(w, *value)?;
                write_var(w, *result)?;
            }
            Action::Convert { to, value, result } => {
                w.write_u8(to.tag());
                write_var(w, *value)?;
                write_var(w, *result)?;
            }
            Action::AddRootRef { value } | Action::RemoveRootRef { value } => {
                write_var(w, *value)?;
            }
            Action::AllocateObject { external, result } => {
                w.write_bool(*external);
                write_var(w, *result)?;
            }
            Action::AllocateArray { length, result }
            | Action::AllocateArrayBuffer { length, result } => {
                w.write_u32_le(*length);
                write_var(w, *result)?;
            }
            Action::GetProperty {
                object,
                pid,
                result,
            }
            | Action::GetOwnPropertyInfo {
                object,
                pid,
                result,
            } => {
                write_var(w, *object)?;
                w.write_u32_le(pid.0);
                write_var(w, *result)?;
            }
            Action::GetIndex {
                object,
                index,
                result,
            } => {
                write_var(w, *object)?;
                write_var(w, *index)?;
                write_var(w, *result)?;
            }
            Action::GetOwnPropertyKeys {
                object,
                symbols,
                result,
            } => {
                write_var(w, *object)?;
                w.write_bool(*symbols);
                write_var(w, *result)?;
            }
            Action::DefineProperty {
                object,
                pid,
                descriptor,
                result,
            } => {
                write_var(w, *object)?;
                w.write_u32_le(pid.0);
                write_var(w, *descriptor)?;
                write_var(w, *result)?;
            }
            Action::DeleteProperty {
                object,
                pid,
                strict,
                result,
            } => {
                write_var(w, *object)?;
                w.write_u32_le(pid.0);
                w.write_bool(*strict);
                write_var(w, *result)?;
            }
            Action::SetPrototype { object, prototype } => {
                write_var(w, *object)?;
                write_var(w, *prototype)?;
            }
            Action::SetProperty {
                object,
                pid,
                value,
                strict,
            } => {
                write_var(w, *object)?;
                w.write_u32_le(pid.0);
                write_var(w, *value)?;
                w.write_bool(*strict);
            }
            Action::SetIndex {
                object,
                index,
                value,
            } => {
                write_var(w, *object)?;
                write_var(w, *index)?;
                write_var(w, *value)?;
            }
            Action::CallbackOp(cb) => {
                w.write_bool(cb.is_create);
                w.write_bool(cb.is_cancel);
                w.write_bool(cb.is_repeating);
                w.write_i64_le(cb.current_callback_id);
                w.write_i64_le(cb.new_callback_id);
            }
            Action::CodeParse(cp) => {
                write_var(w, cp.result)?;
                w.write_u64_le(cp.document_id);
                w.write_u32_le(cp.load_flags.0);
                w.write_u32_le(cp.body_counter_id);
            }
            Action::CallExistingFunction(call) => {
                write_var(w, call.result)?;
                w.write_u32_le(call.callback_depth);
                w.write_f64_le(call.begin_time);
                w.write_f64_le(call.end_time);
                w.write_i64_le(call.call_event_time);
                w.write_i64_le(call.host_callback_id);
                w.write_i64_le(call.top_level_callback_event_time);
                w.write_bool(call.has_script_exception);
                w.write_bool(call.has_terminating_exception);
            }
        }
        Ok(())
    }

    /// Writes the variable-length body. Code-parse records persist their
    /// source text to `sources` instead of the log.
    ///
    /// # Errors
    /// Released payloads, oversized strings, or source-store failures.
    pub fn emit(
        &self,
        w: &mut Writer,
        arena: &PayloadArena,
        sources: &mut dyn SourceStore,
        config: &ReplayConfig,
    ) -> Result<(), LogError> {
        match &self.action {
            Action::CreateString { text, .. } => {
                w.write_string(arena.text(*text)?, config.max_string_len)?;
            }
            Action::AllocateExternalArrayBuffer { bytes, .. } => {
                let bytes = arena.bytes(*bytes)?;
                if bytes.len() > config.max_string_len {
                    return Err(CodecError::LengthTooLarge.into());
                }
                w.write_len_prefixed_bytes(bytes)?;
            }
            Action::ConstructCall(cc) => write_args(w, arena, cc.args, cc.arg_count)?,
            Action::CallExistingFunction(call) => {
                write_args(w, arena, call.args, call.arg_count)?;
            }
            Action::CodeParse(cp) => {
                w.write_string(&cp.source_directory, config.max_string_len)?;
                w.write_string(&cp.uri, config.max_string_len)?;
                w.write_u32_le(cp.source_len);
                w.write_digest(&cp.source_digest);
                let key = SourceKey::for_document(&cp.source_directory, cp.document_id, &cp.uri);
                sources.write_source(&key, arena.text(cp.source)?)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Reads a header written by [`ActionRecord::write_header`]. Payload
    /// references are left unset until [`ActionRecord::parse`] runs.
    ///
    /// # Errors
    /// Codec failures or an unknown kind tag.
    pub fn read_header(r: &mut Reader<'_>) -> Result<Self, LogError> {
        let tag = r.read_u8()?;
        let kind = ActionKind::from_tag(tag).ok_or(LogError::UnknownActionTag(tag))?;
        let event_time = r.read_i64_le()?;
        let action = match kind {
            ActionKind::Snapshot => Action::Snapshot {
                restore_time: r.read_i64_le()?,
            },
            ActionKind::CreateInteger => Action::CreateInteger {
                value: r.read_i32_le()?,
                result: read_var(r)?,
            },
            ActionKind::CreateNumber => Action::CreateNumber {
                value: r.read_f64_le()?,
                result: read_var(r)?,
            },
            ActionKind::CreateBoolean => Action::CreateBoolean {
                value: r.read_bool()?,
                result: read_var(r)?,
            },
            ActionKind::CreateString => Action::CreateString {
                text: PayloadRef::UNSET,
                result: read_var(r)?,
            },
            ActionKind::CreateSymbol => Action::CreateSymbol {
                description: read_var(r)?,
                result: read_var(r)?,
            },
            ActionKind::Convert => {
                let tag = r.read_u8()?;
                Action::Convert {
                    to: Conversion::from_tag(tag).ok_or(CodecError::InvalidEnum)?,
                    value: read_var(r)?,
                    result: read_var(r)?,
                }
            }
            ActionKind::AddRootRef => Action::AddRootRef {
                value: read_var(r)?,
            },
            ActionKind::RemoveRootRef => Action::RemoveRootRef {
                value: read_var(r)?,
            },
            ActionKind::AllocateObject => Action::AllocateObject {
                external: r.read_bool()?,
                result: read_var(r)?,
            },
            ActionKind::AllocateArray => Action::AllocateArray {
                length: r.read_u32_le()?,
                result: read_var(r)?,
            },
            ActionKind::AllocateArrayBuffer => Action::AllocateArrayBuffer {
                length: r.read_u32_le()?,
                result: read_var(r)?,
            },
            ActionKind::AllocateExternalArrayBuffer => Action::AllocateExternalArrayBuffer {
                bytes: PayloadRef::UNSET,
                result: read_var(r)?,
            },
            ActionKind::AllocateFunction => Action::AllocateFunction {
                name: read_var(r)?,
                result: read_var(r)?,
            },
            ActionKind::GetAndClearException => Action::GetAndClearException {
                result: read_var(r)?,
            },
            ActionKind::GetProperty => Action::GetProperty {
                object: read_var(r)?,
                pid: read_pid(r)?,
                result: read_var(r)?,
            },
            ActionKind::GetIndex => Action::GetIndex {
                object: read_var(r)?,
                index: read_var(r)?,
                result: read_var(r)?,
            },
            ActionKind::GetOwnPropertyInfo => Action::GetOwnPropertyInfo {
                object: read_var(r)?,
                pid: read_pid(r)?,
                result: read_var(r)?,
            },
            ActionKind::GetOwnPropertyKeys => Action::GetOwnPropertyKeys {
                object: read_var(r)?,
                symbols: r.read_bool()?,
                result: read_var(r)?,
            },
            ActionKind::DefineProperty => Action::DefineProperty {
                object: read_var(r)?,
                pid: read_pid(r)?,
                descriptor: read_var(r)?,
                result: read_var(r)?,
            },
            ActionKind::DeleteProperty => Action::DeleteProperty {
                object: read_var(r)?,
                pid: read_pid(r)?,
                strict: r.read_bool()?,
                result: read_var(r)?,
            },
            ActionKind::SetPrototype => Action::SetPrototype {
                object: read_var(r)?,
                prototype: read_var(r)?,
            },
            ActionKind::SetProperty => Action::SetProperty {
                object: read_var(r)?,
                pid: read_pid(r)?,
                value: read_var(r)?,
                strict: r.read_bool()?,
            },
            ActionKind::SetIndex => Action::SetIndex {
                object: read_var(r)?,
                index: read_var(r)?,
                value: read_var(r)?,
            },
            ActionKind::GetTypedArrayInfo => Action::GetTypedArrayInfo {
                object: read_var(r)?,
                result: read_var(r)?,
            },
            ActionKind::ConstructCall => Action::ConstructCall(ConstructCallAction {
                arg_count: 0,
                args: PayloadRef::UNSET,
                result: read_var(r)?,
            }),
            ActionKind::CallbackOp => Action::CallbackOp(CallbackAction {
                is_create: r.read_bool()?,
                is_cancel: r.read_bool()?,
                is_repeating: r.read_bool()?,
                current_callback_id: r.read_i64_le()?,
                new_callback_id: r.read_i64_le()?,
                register_location: None,
            }),
            ActionKind::CodeParse => Action::CodeParse(CodeParseAction {
                result: read_var(r)?,
                document_id: r.read_u64_le()?,
                load_flags: LoadFlags(r.read_u32_le()?),
                body_counter_id: r.read_u32_le()?,
                source_directory: String::new(),
                uri: String::new(),
                source: PayloadRef::UNSET,
                source_len: 0,
                source_digest: [0; 32],
            }),
            ActionKind::CallExistingFunction => Action::CallExistingFunction(CallFunctionAction {
                result: read_var(r)?,
                callback_depth: r.read_u32_le()?,
                begin_time: r.read_f64_le()?,
                end_time: r.read_f64_le()?,
                call_event_time: r.read_i64_le()?,
                host_callback_id: r.read_i64_le()?,
                top_level_callback_event_time: r.read_i64_le()?,
                has_script_exception: r.read_bool()?,
                has_terminating_exception: r.read_bool()?,
                arg_count: 0,
                args: PayloadRef::UNSET,
                last_executed_location: None,
            }),
        };
        Ok(Self { event_time, action })
    }

    /// Reads the body written by [`ActionRecord::emit`], allocating payloads
    /// from `arena`. Fields only known at execute time are cleared.
    ///
    /// # Errors
    /// Codec failures, missing source text, or a source that does not match
    /// its logged length or digest.
    pub fn parse(
        &mut self,
        r: &mut Reader<'_>,
        arena: &mut PayloadArena,
        sources: &dyn SourceStore,
        config: &ReplayConfig,
    ) -> Result<(), LogError> {
        let max = config.max_string_len;
        match &mut self.action {
            Action::CreateString { text, .. } => {
                *text = arena.alloc_text(r.read_string(max)?)?;
            }
            Action::AllocateExternalArrayBuffer { bytes, .. } => {
                *bytes = arena.alloc_bytes(r.read_len_prefixed_bytes(max)?.to_vec())?;
            }
            Action::ConstructCall(cc) => {
                (cc.arg_count, cc.args) = read_args(r, arena, max)?;
            }
            Action::CallExistingFunction(call) => {
                (call.arg_count, call.args) = read_args(r, arena, max)?;
                call.last_executed_location = None;
            }
            Action::CallbackOp(cb) => cb.register_location = None,
            Action::CodeParse(cp) => {
                cp.source_directory = r.read_string(max)?;
                cp.uri = r.read_string(max)?;
                cp.source_len = r.read_u32_le()?;
                cp.source_digest = r.read_digest()?;
                let key = SourceKey::for_document(&cp.source_directory, cp.document_id, &cp.uri);
                let text = sources.read_source(&key)?;
                if text.len() != cp.source_len as usize {
                    return Err(LogError::SourceLengthMismatch {
                        document: key.document,
                        expected: cp.source_len as usize,
                        actual: text.len(),
                    });
                }
                if config.verify_source_digest
                    && *blake3::hash(text.as_bytes()).as_bytes() != cp.source_digest
                {
                    return Err(LogError::SourceDigestMismatch {
                        document: key.document,
                    });
                }
                cp.source = arena.alloc_text(text)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Releases this record's payload and clears lazily captured state.
    ///
    /// # Errors
    /// [`PayloadError::Released`] if the payload was already released through
    /// another path.
    pub fn unload(&mut self, arena: &mut PayloadArena) -> Result<(), PayloadError> {
        match &mut self.action {
            Action::CreateString { text: slot, .. }
            | Action::AllocateExternalArrayBuffer { bytes: slot, .. }
            | Action::ConstructCall(ConstructCallAction { args: slot, .. })
            | Action::CodeParse(CodeParseAction { source: slot, .. }) => release(arena, slot),
            Action::CallExistingFunction(call) => {
                call.last_executed_location = None;
                release(arena, &mut call.args)
            }
            Action::CallbackOp(cb) => {
                cb.register_location = None;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::host::SourceLocation;
    use crate::ident::PtrId;
    use crate::logged_var::InlineValue;
    use crate::source_store::MemorySourceStore;

    fn construct_call(arena: &mut PayloadArena) -> ActionRecord {
        let args = arena.alloc_vars(vec![
            LoggedVar::Ptr(PtrId(100)),
            LoggedVar::Inline(InlineValue::Int(1)),
            LoggedVar::Ptr(PtrId(101)),
        ])
        .unwrap();
        ActionRecord::new(
            4,
            Action::ConstructCall(ConstructCallAction {
                arg_count: 3,
                args,
                result: LoggedVar::Ptr(PtrId(200)),
            }),
        )
    }

    #[test]
    fn construct_call_body_is_count_then_three_vars() {
        let mut arena = PayloadArena::new();
        let record = construct_call(&mut arena);
        let mut w = Writer::default();
        record
            .emit(
                &mut w,
                &arena,
                &mut MemorySourceStore::new(),
                &ReplayConfig::default(),
            )
            .unwrap();
        let body = w.into_vec();

        let mut r = Reader::new(&body);
        assert_eq!(r.read_u32_le().unwrap(), 3);
        let vars: Vec<_> = (0..3).map(|_| read_var(&mut r).unwrap()).collect();
        assert_eq!(vars[0], LoggedVar::Ptr(PtrId(100)));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn construct_call_parse_restores_count_and_exec_args() {
        let mut arena = PayloadArena::new();
        let record = construct_call(&mut arena);
        let mut w = Writer::default();
        let config = ReplayConfig::default();
        let mut sources = MemorySourceStore::new();
        record.write_header(&mut w).unwrap();
        record.emit(&mut w, &arena, &mut sources, &config).unwrap();
        let bytes = w.into_vec();

        let mut parse_arena = PayloadArena::new();
        let mut r = Reader::new(&bytes);
        let mut parsed = ActionRecord::read_header(&mut r).unwrap();
        assert_eq!(parsed.exec_args_len(), Some(0));
        parsed.parse(&mut r, &mut parse_arena, &sources, &config).unwrap();

        let Action::ConstructCall(cc) = &parsed.action else {
            unreachable!("kind changed during parse")
        };
        assert_eq!(cc.arg_count, 3);
        assert_eq!(parsed.exec_args_len(), Some(2));
        assert_eq!(parse_arena.vars(cc.args).unwrap().len(), 3);
        assert_eq!(cc.result, LoggedVar::Ptr(PtrId(200)));
    }

    #[test]
    fn code_parse_source_goes_to_the_store() {
        let mut arena = PayloadArena::new();
        let text = "function f() {}";
        let record = ActionRecord::new(
            1,
            Action::CodeParse(CodeParseAction {
                result: LoggedVar::Ptr(PtrId(9)),
                document_id: 3,
                load_flags: LoadFlags::GLOBAL_CODE,
                body_counter_id: 1,
                source_directory: "srcdir".into(),
                uri: "main.js".into(),
                source: arena.alloc_text(text.into()).unwrap(),
                source_len: 15,
                source_digest: *blake3::hash(text.as_bytes()).as_bytes(),
            }),
        );
        let mut sources = MemorySourceStore::new();
        let config = ReplayConfig::default();
        let mut w = Writer::default();
        record.emit(&mut w, &arena, &mut sources, &config).unwrap();
        let body = w.into_vec();
        assert!(!body.windows(text.len()).any(|win| win == text.as_bytes()));
        assert_eq!(
            sources
                .read_source(&SourceKey::for_document("srcdir", 3, "main.js"))
                .unwrap(),
            text
        );
    }

    #[test]
    fn tampered_source_fails_digest_check() {
        let mut arena = PayloadArena::new();
        let record = ActionRecord::new(
            1,
            Action::CodeParse(CodeParseAction {
                result: LoggedVar::Absent,
                document_id: 5,
                load_flags: LoadFlags::NONE,
                body_counter_id: 0,
                source_directory: String::new(),
                uri: "a.js".into(),
                source: arena.alloc_text("abc".into()).unwrap(),
                source_len: 3,
                source_digest: *blake3::hash(b"abc").as_bytes(),
            }),
        );
        let mut sources = MemorySourceStore::new();
        let config = ReplayConfig::default();
        let mut w = Writer::default();
        record.write_header(&mut w).unwrap();
        record.emit(&mut w, &arena, &mut sources, &config).unwrap();
        sources
            .write_source(&SourceKey::for_document("", 5, "a.js"), "xyz")
            .unwrap();
        let bytes = w.into_vec();

        let mut r = Reader::new(&bytes);
        let mut parsed = ActionRecord::read_header(&mut r).unwrap();
        let err = parsed
            .parse(&mut r, &mut PayloadArena::new(), &sources, &config)
            .unwrap_err();
        assert!(matches!(err, LogError::SourceDigestMismatch { .. }));

        let lenient = config.with_verify_source_digest(false);
        let mut r = Reader::new(&bytes);
        let mut parsed = ActionRecord::read_header(&mut r).unwrap();
        parsed
            .parse(&mut r, &mut PayloadArena::new(), &sources, &lenient)
            .unwrap();
    }

    #[test]
    fn unload_releases_payload_and_clears_register_location() {
        let mut arena = PayloadArena::new();
        let mut record = construct_call(&mut arena);
        record.unload(&mut arena).unwrap();
        assert_eq!(arena.live_count(), 0);
        record.unload(&mut arena).unwrap();

        let mut cb = ActionRecord::new(
            2,
            Action::CallbackOp(CallbackAction {
                is_create: true,
                is_cancel: false,
                is_repeating: false,
                current_callback_id: -1,
                new_callback_id: 4,
                register_location: Some(SourceLocation::default()),
            }),
        );
        cb.unload(&mut arena).unwrap();
        assert_eq!(cb.register_location(), None);
    }

    #[test]
    fn unknown_tag_is_reported() {
        let mut r = Reader::new(&[200, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            ActionRecord::read_header(&mut r),
            Err(LogError::UnknownActionTag(200))
        ));
    }
}
