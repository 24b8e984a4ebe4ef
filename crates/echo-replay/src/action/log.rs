// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The action log and its framed binary format.
//!
//! Format (v1):
//! Header (16 bytes):
//! - Magic: "TTLG" (4 bytes)
//! - Version: u16 LE = 1
//! - Flags: u16 LE = 0
//! - Reserved: [u8; 8] = 0
//!
//! Frames (repeated until EOF):
//! - Length: u32 LE
//! - Record: header then body, see [`ActionRecord::write_header`] and
//!   [`ActionRecord::emit`]
use std::io::{self, Read, Write};

use tracing::debug;

use super::serial::LogError;
use super::{
    Action, ActionRecord, CallFunctionAction, CodeParseAction, ConstructCallAction, LoadFlags,
};
use crate::codec::{Reader, Writer};
use crate::config::ReplayConfig;
use crate::logged_var::LoggedVar;
use crate::payload::{PayloadArena, PayloadError};
use crate::source_store::SourceStore;

/// Magic bytes identifying an action log: "TTLG".
pub const LOG_MAGIC: [u8; 4] = *b"TTLG";
/// Current action log format version.
pub const LOG_VERSION: u16 = 1;

/// Append-only sequence of action records plus the arena backing their
/// variable-length payloads.
#[derive(Debug, Default)]
pub struct ActionLog {
    records: Vec<ActionRecord>,
    arena: PayloadArena,
    next_event_time: i64,
    last_root_time: i64,
}

impl ActionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` when the log has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in log order.
    #[must_use]
    pub fn records(&self) -> &[ActionRecord] {
        &self.records
    }

    /// Payload arena.
    #[must_use]
    pub fn arena(&self) -> &PayloadArena {
        &self.arena
    }

    /// Mutable payload arena, for building records by hand.
    pub fn arena_mut(&mut self) -> &mut PayloadArena {
        &mut self.arena
    }

    /// Event time the next appended record will get.
    #[must_use]
    pub fn next_event_time(&self) -> i64 {
        self.next_event_time
    }

    pub(crate) fn split_mut(&mut self) -> (&mut [ActionRecord], &PayloadArena) {
        (&mut self.records, &self.arena)
    }

    /// Most recent record, for adjusting fields after a push.
    pub fn last_mut(&mut self) -> Option<&mut ActionRecord> {
        self.records.last_mut()
    }

    /// Appends `action` at the next event time and returns that time.
    pub fn push(&mut self, action: Action) -> i64 {
        let event_time = self.next_event_time;
        self.next_event_time += 1;
        self.records.push(ActionRecord::new(event_time, action));
        event_time
    }

    /// Appends a snapshot marker restoring the current time.
    pub fn push_snapshot_marker(&mut self) -> i64 {
        let restore_time = self.next_event_time;
        self.push(Action::Snapshot { restore_time })
    }

    /// Appends a string creation.
    ///
    /// # Errors
    /// [`PayloadError::Full`] when the arena has no free slot.
    pub fn push_create_string(
        &mut self,
        text: &str,
        result: LoggedVar,
    ) -> Result<i64, PayloadError> {
        let text = self.arena.alloc_text(text.to_owned())?;
        Ok(self.push(Action::CreateString { text, result }))
    }

    /// Appends an external array buffer allocation.
    ///
    /// # Errors
    /// [`PayloadError::Full`] when the arena has no free slot.
    pub fn push_external_array_buffer(
        &mut self,
        bytes: &[u8],
        result: LoggedVar,
    ) -> Result<i64, PayloadError> {
        let bytes = self.arena.alloc_bytes(bytes.to_vec())?;
        Ok(self.push(Action::AllocateExternalArrayBuffer { bytes, result }))
    }

    /// Appends a constructor call; `args[0]` is the callee.
    ///
    /// # Errors
    /// [`PayloadError::Full`] when the arena has no free slot.
    pub fn push_construct_call(
        &mut self,
        args: Vec<LoggedVar>,
        result: LoggedVar,
    ) -> Result<i64, PayloadError> {
        let arg_count = u32::try_from(args.len()).unwrap_or(u32::MAX);
        let args = self.arena.alloc_vars(args)?;
        Ok(self.push(Action::ConstructCall(ConstructCallAction {
            arg_count,
            args,
            result,
        })))
    }

    /// Appends an ordinary call; `args[0]` is the callee. Depth-zero calls
    /// open a new top-level callback.
    ///
    /// # Errors
    /// [`PayloadError::Full`] when the arena has no free slot.
    pub fn push_call(
        &mut self,
        callback_depth: u32,
        args: Vec<LoggedVar>,
        result: LoggedVar,
        host_callback_id: i64,
    ) -> Result<i64, PayloadError> {
        let arg_count = u32::try_from(args.len()).unwrap_or(u32::MAX);
        let args = self.arena.alloc_vars(args)?;
        let event_time = self.next_event_time;
        if callback_depth == 0 {
            self.last_root_time = event_time;
        }
        Ok(self.push(Action::CallExistingFunction(CallFunctionAction {
            callback_depth,
            arg_count,
            args,
            result,
            begin_time: 0.0,
            end_time: 0.0,
            call_event_time: event_time,
            host_callback_id,
            top_level_callback_event_time: self.last_root_time,
            has_script_exception: false,
            has_terminating_exception: false,
            last_executed_location: None,
        })))
    }

    /// Appends a script load.
    ///
    /// # Errors
    /// [`PayloadError::Full`] when the arena has no free slot.
    pub fn push_code_parse(
        &mut self,
        document_id: u64,
        uri: &str,
        source_directory: &str,
        source: &str,
        result: LoggedVar,
    ) -> Result<i64, PayloadError> {
        let source_len = u32::try_from(source.len()).unwrap_or(u32::MAX);
        let source_digest = *blake3::hash(source.as_bytes()).as_bytes();
        let body_counter_id = u32::try_from(self.records.len()).unwrap_or(u32::MAX);
        let source = self.arena.alloc_text(source.to_owned())?;
        Ok(self.push(Action::CodeParse(CodeParseAction {
            result,
            document_id,
            load_flags: LoadFlags::GLOBAL_CODE,
            body_counter_id,
            source_directory: source_directory.to_owned(),
            uri: uri.to_owned(),
            source,
            source_len,
            source_digest,
        })))
    }

    /// Index of the last snapshot marker restoring a time at or before
    /// `target_time`.
    #[must_use]
    pub fn snapshot_marker_before(&self, target_time: i64) -> Option<(usize, i64)> {
        self.records
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, record)| match record.action {
                Action::Snapshot { restore_time } if restore_time <= target_time => {
                    Some((index, restore_time))
                }
                _ => None,
            })
    }

    /// Releases the payload of one record without touching the rest of the
    /// log. Returns `false` if `index` is out of range.
    ///
    /// # Errors
    /// [`PayloadError::Released`] if the payload was already released.
    pub fn unload_record(&mut self, index: usize) -> Result<bool, PayloadError> {
        match self.records.get_mut(index) {
            Some(record) => {
                record.unload(&mut self.arena)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Writes the log, persisting code-parse sources to `sources`.
    ///
    /// # Errors
    /// Encoding, oversized frames, source-store or stream failures.
    pub fn write_to<W: Write>(
        &self,
        out: &mut W,
        sources: &mut dyn SourceStore,
        config: &ReplayConfig,
    ) -> Result<(), LogError> {
        out.write_all(&LOG_MAGIC)?;
        out.write_all(&LOG_VERSION.to_le_bytes())?;
        out.write_all(&0u16.to_le_bytes())?;
        out.write_all(&[0u8; 8])?;
        for record in &self.records {
            let mut w = Writer::default();
            record.write_header(&mut w)?;
            record.emit(&mut w, &self.arena, sources, config)?;
            if w.len() > config.max_frame_len {
                return Err(LogError::FrameTooLarge {
                    len: w.len(),
                    max: config.max_frame_len,
                });
            }
            let len = u32::try_from(w.len()).map_err(|_| LogError::FrameTooLarge {
                len: w.len(),
                max: config.max_frame_len,
            })?;
            out.write_all(&len.to_le_bytes())?;
            out.write_all(&w.into_vec())?;
        }
        debug!(records = self.records.len(), "action log written");
        Ok(())
    }

    /// Reads a log written by [`ActionLog::write_to`].
    ///
    /// # Errors
    /// Bad header, oversized or malformed frames, missing or mismatched
    /// source text, or stream failures.
    pub fn read_from<R: Read>(
        input: &mut R,
        sources: &dyn SourceStore,
        config: &ReplayConfig,
    ) -> Result<Self, LogError> {
        let mut header = [0u8; 16];
        input.read_exact(&mut header)?;
        if header[..4] != LOG_MAGIC {
            return Err(LogError::BadMagic);
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != LOG_VERSION {
            return Err(LogError::UnsupportedVersion(version));
        }
        if header[6..].iter().any(|b| *b != 0) {
            return Err(LogError::NonZeroReserved);
        }

        let mut log = Self::new();
        loop {
            let mut len_bytes = [0u8; 4];
            match read_prefix(input, &mut len_bytes)? {
                0 => break,
                4 => {}
                read => return Err(LogError::TruncatedLengthPrefix { read }),
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            if len > config.max_frame_len {
                return Err(LogError::FrameTooLarge {
                    len,
                    max: config.max_frame_len,
                });
            }
            let mut frame = vec![0u8; len];
            input.read_exact(&mut frame)?;

            let mut reader = Reader::new(&frame);
            let mut record = ActionRecord::read_header(&mut reader)?;
            record.parse(&mut reader, &mut log.arena, sources, config)?;
            if reader.remaining() != 0 {
                return Err(LogError::TrailingBytes {
                    event_time: record.event_time,
                    remaining: reader.remaining(),
                });
            }
            if record.is_root_call() {
                log.last_root_time = record.event_time;
            }
            let after = record
                .event_time
                .checked_add(1)
                .ok_or(LogError::EventTimeOverflow {
                    event_time: record.event_time,
                })?;
            log.next_event_time = log.next_event_time.max(after);
            log.records.push(record);
        }
        debug!(records = log.records.len(), "action log read");
        Ok(log)
    }

    /// Writes the log into a byte vector.
    ///
    /// # Errors
    /// As [`ActionLog::write_to`].
    pub fn to_bytes(
        &self,
        sources: &mut dyn SourceStore,
        config: &ReplayConfig,
    ) -> Result<Vec<u8>, LogError> {
        let mut out = Vec::new();
        self.write_to(&mut out, sources, config)?;
        Ok(out)
    }

    /// Reads a log from a byte slice.
    ///
    /// # Errors
    /// As [`ActionLog::read_from`].
    pub fn from_bytes(
        mut bytes: &[u8],
        sources: &dyn SourceStore,
        config: &ReplayConfig,
    ) -> Result<Self, LogError> {
        Self::read_from(&mut bytes, sources, config)
    }
}

/// Fills `buf` as far as the stream allows and returns the bytes read.
/// Fewer than `buf.len()` means the stream ended.
fn read_prefix<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<usize, LogError> {
    let mut read = 0;
    while read < buf.len() {
        match input.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(read)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ident::PtrId;
    use crate::logged_var::InlineValue;
    use crate::source_store::MemorySourceStore;

    #[test]
    fn bad_magic_is_rejected() {
        let bytes = *b"NOPE\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00";
        let err = ActionLog::from_bytes(&bytes, &MemorySourceStore::new(), &ReplayConfig::default())
            .unwrap_err();
        assert!(matches!(err, LogError::BadMagic));
    }

    #[test]
    fn oversized_frame_is_rejected_before_allocation() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&LOG_MAGIC);
        bytes.extend_from_slice(&LOG_VERSION.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 10]);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        let config = ReplayConfig::default().with_max_frame_len(64);
        let err = ActionLog::from_bytes(&bytes, &MemorySourceStore::new(), &config).unwrap_err();
        assert!(matches!(err, LogError::FrameTooLarge { max: 64, .. }));
    }

    #[test]
    fn written_log_reads_back_record_for_record() {
        let mut log = ActionLog::new();
        log.push_snapshot_marker();
        log.push_create_string("hi", LoggedVar::Ptr(PtrId(1))).unwrap();
        log.push_call(
            0,
            vec![LoggedVar::Ptr(PtrId(2)), LoggedVar::Inline(InlineValue::Null)],
            LoggedVar::Inline(InlineValue::Int(3)),
            -1,
        )
        .unwrap();
        log.push_code_parse(4, "a.js", "dir", "var a;", LoggedVar::Ptr(PtrId(5))).unwrap();

        let mut sources = MemorySourceStore::new();
        let config = ReplayConfig::default();
        let bytes = log.to_bytes(&mut sources, &config).unwrap();
        let back = ActionLog::from_bytes(&bytes, &sources, &config).unwrap();

        assert_eq!(back.len(), 4);
        assert_eq!(back.next_event_time(), 4);
        for (a, b) in log.records().iter().zip(back.records()) {
            assert_eq!(a.kind(), b.kind());
            assert_eq!(a.event_time, b.event_time);
            assert_eq!(a.action.result(), b.action.result());
        }
        let Action::CreateString { text, .. } = back.records()[1].action else {
            unreachable!("record kinds are preserved")
        };
        assert_eq!(back.arena().text(text).unwrap(), "hi");
        assert_eq!(back.snapshot_marker_before(10), Some((0, 0)));
    }

    #[test]
    fn unload_record_touches_only_that_record() {
        let mut log = ActionLog::new();
        log.push_create_string("a", LoggedVar::Absent).unwrap();
        log.push_create_string("b", LoggedVar::Absent).unwrap();
        assert!(log.unload_record(0).unwrap());
        assert!(!log.unload_record(9).unwrap());
        assert_eq!(log.arena().live_count(), 1);
        let Action::CreateString { text, .. } = log.records()[1].action else {
            unreachable!("record kinds are preserved")
        };
        assert_eq!(log.arena().text(text).unwrap(), "b");
    }
}
