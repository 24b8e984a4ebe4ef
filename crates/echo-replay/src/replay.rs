// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Replay driver.
//!
//! A [`ReplaySession`] owns the inflate map, the recorded-exception slot and
//! the abort token for one replay of one log. It inflates snapshots, runs
//! records in time order, and seeks to an arbitrary event time by inflating
//! the nearest earlier snapshot and replaying forward.
use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

use crate::abort::{AbortRequest, AbortToken};
use crate::action::{ActionKind, ActionLog, ExecuteError};
use crate::config::ReplayConfig;
use crate::host::{HostFault, HostResult, HostRuntime, HostTypes, InflationHost};
use crate::inflate::{self, InflateStats, InflationError};
use crate::inflate_map::{InflateError, InflateMap};
use crate::logged_var::LoggedVar;
use crate::payload::PayloadError;
use crate::snapshot::HeapSnapshot;

/// Fatal replay failures.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Identity error from the inflate map.
    #[error(transparent)]
    Inflate(#[from] InflateError),
    /// Snapshot inflation failed.
    #[error(transparent)]
    Inflation(#[from] InflationError),
    /// A record's payload was released or has the wrong shape.
    #[error(transparent)]
    Payload(#[from] PayloadError),
    /// The host produced a different value than the one recorded.
    #[error("result diverged from the log at t={event_time}: expected {expected:?}")]
    ResultDivergence {
        /// Event time of the diverging record.
        event_time: i64,
        /// Logged result.
        expected: LoggedVar,
    },
    /// The host ran out of memory while executing a record.
    #[error("host out of memory executing {kind} at t={event_time}")]
    OutOfMemory {
        /// Kind of the failing record.
        kind: ActionKind,
        /// Event time of the failing record.
        event_time: i64,
    },
    /// A call record has no callee.
    #[error("call at t={event_time} has no callee")]
    InvalidCallee {
        /// Event time of the call record.
        event_time: i64,
    },
    /// No snapshot marker at or before the seek target has a snapshot.
    #[error("no snapshot available at or before t={target}")]
    NoSnapshotBefore {
        /// Requested event time.
        target: i64,
    },
}

/// Why a replay pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStop {
    /// Every record ran.
    Completed,
    /// The next record lies after the requested time.
    ReachedTime(i64),
    /// The debugger asked to stop.
    Interrupted(AbortRequest),
}

/// Outcome of a replay pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReport {
    /// Records executed.
    pub executed: usize,
    /// Logged results of records that produced a live value, by event time.
    pub results: Vec<(i64, LoggedVar)>,
    /// Why the pass stopped.
    pub stop: ReplayStop,
    /// Inflation counters when the pass started from a snapshot.
    pub inflated: Option<InflateStats>,
}

/// State carried across records and inflations while replaying one log.
pub struct ReplaySession<H: HostTypes> {
    map: InflateMap<H>,
    recorded_exception: Option<H::Value>,
    abort: AbortToken,
    config: ReplayConfig,
}

impl<H: HostTypes> std::fmt::Debug for ReplaySession<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplaySession")
            .field("map", &self.map)
            .field("recorded_exception", &self.recorded_exception)
            .field("abort", &self.abort)
            .field("config", &self.config)
            .finish()
    }
}

impl<H: HostTypes> ReplaySession<H> {
    /// Creates a session with an unprepared inflate map.
    #[must_use]
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            map: InflateMap::new(),
            recorded_exception: None,
            abort: AbortToken::new(),
            config,
        }
    }

    /// Uses `abort` instead of a private token.
    #[must_use]
    pub fn with_abort_token(mut self, abort: AbortToken) -> Self {
        self.abort = abort;
        self
    }

    /// Token the debugger uses to interrupt this session.
    #[must_use]
    pub fn abort_token(&self) -> AbortToken {
        self.abort.clone()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Identity maps of the current generation.
    #[must_use]
    pub fn inflate_map(&self) -> &InflateMap<H> {
        &self.map
    }

    /// Exception captured from the last failing script call, if any.
    #[must_use]
    pub fn recorded_exception(&self) -> Option<&H::Value> {
        self.recorded_exception.as_ref()
    }

    /// `true` while an exception is waiting to be cleared.
    #[must_use]
    pub fn has_recorded_exception(&self) -> bool {
        self.recorded_exception.is_some()
    }

    pub(crate) fn take_recorded_exception(&mut self) -> Option<H::Value> {
        self.recorded_exception.take()
    }

    /// Resolves a logged operand, mapping `Absent` to `undefined`.
    pub(crate) fn resolve(&self, var: LoggedVar) -> Result<H::Value, InflateError> {
        Ok(self
            .map
            .inflate_logged_var(var)?
            .unwrap_or_else(crate::action::undefined::<H>))
    }

    /// Resolves a logged operand, keeping `Absent` as `None`.
    pub(crate) fn inflate(&self, var: LoggedVar) -> Result<Option<H::Value>, InflateError> {
        self.map.inflate_logged_var(var)
    }

    /// Registers a live result under its logged identity, or checks it
    /// against the value already registered there.
    pub(crate) fn tag_result(
        &mut self,
        event_time: i64,
        recorded: LoggedVar,
        live: &H::Value,
    ) -> Result<(), ReplayError> {
        let matches = match recorded {
            LoggedVar::Absent => true,
            LoggedVar::Inline(expected) => H::as_inline(live) == Some(expected),
            LoggedVar::Ptr(id) => {
                if self.map.is_object_inflated(id) {
                    H::same_value(self.map.lookup_object(id)?, live)
                } else {
                    self.map.add_object(id, live.clone())?;
                    true
                }
            }
        };
        if matches {
            Ok(())
        } else {
            warn!(event_time, ?recorded, "replay result diverged from log");
            Err(ReplayError::ResultDivergence {
                event_time,
                expected: recorded,
            })
        }
    }

    fn ensure_prepared(&mut self) -> Result<(), InflateError> {
        if self.map.is_prepared() {
            Ok(())
        } else {
            self.map.prep_for_initial_inflate(Default::default())
        }
    }
}

impl<H: HostRuntime> ReplaySession<H> {
    /// Turns a host result into a live value, moving script exceptions and
    /// termination into the recorded-exception slot.
    pub(crate) fn absorb<T>(
        &mut self,
        host: &mut H,
        kind: ActionKind,
        event_time: i64,
        result: HostResult<T>,
    ) -> Result<Option<T>, ExecuteError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(HostFault::ScriptException) => {
                self.recorded_exception = host.take_script_exception();
                trace!(event_time, %kind, "script exception recorded");
                Ok(None)
            }
            Err(HostFault::Terminated) => {
                self.recorded_exception = Some(host.pending_termination_error());
                debug!(event_time, %kind, "termination recorded");
                Ok(None)
            }
            Err(HostFault::DebuggerAbort(request)) => Err(ExecuteError::Interrupted(request)),
            Err(HostFault::OutOfMemory) => {
                Err(ReplayError::OutOfMemory { kind, event_time }.into())
            }
        }
    }

    /// Executes every record of `log` in order, stopping before the first
    /// record whose event time exceeds `until`.
    ///
    /// # Errors
    /// Any fatal [`ReplayError`]. Debugger interruptions are reported through
    /// [`ReplayReport::stop`].
    #[instrument(skip_all, fields(records = log.len(), ?until))]
    pub fn replay(
        &mut self,
        log: &mut ActionLog,
        host: &mut H,
        until: Option<i64>,
    ) -> Result<ReplayReport, ReplayError> {
        self.ensure_prepared()?;
        self.replay_from(log, 0, host, until)
    }

    fn replay_from(
        &mut self,
        log: &mut ActionLog,
        start: usize,
        host: &mut H,
        until: Option<i64>,
    ) -> Result<ReplayReport, ReplayError> {
        let (records, arena) = log.split_mut();
        let mut report = ReplayReport {
            executed: 0,
            results: Vec::new(),
            stop: ReplayStop::Completed,
            inflated: None,
        };
        for record in records.iter_mut().skip(start) {
            if let Some(limit) = until {
                if record.event_time > limit {
                    report.stop = ReplayStop::ReachedTime(limit);
                    break;
                }
            }
            if let Some(request) = self.abort.take() {
                info!(event_time = record.event_time, reason = %request.reason, "replay aborted");
                report.stop = ReplayStop::Interrupted(request);
                break;
            }
            match record.execute(arena, self, host) {
                Ok(result) => {
                    report.executed += 1;
                    if let Some(var) = result {
                        report.results.push((record.event_time, var));
                    }
                }
                Err(ExecuteError::Interrupted(request)) => {
                    report.executed += 1;
                    info!(event_time = record.event_time, reason = %request.reason, "replay interrupted");
                    report.stop = ReplayStop::Interrupted(request);
                    break;
                }
                Err(ExecuteError::Fatal(err)) => return Err(err),
            }
        }
        debug!(executed = report.executed, stop = ?report.stop, "replay pass finished");
        Ok(report)
    }
}

impl<H: HostRuntime + InflationHost> ReplaySession<H> {
    /// Rebuilds the heap from `snapshot`, starting a new generation when one
    /// already exists. The pass is always cleaned up, even when it fails.
    ///
    /// # Errors
    /// Identity errors, host faults, or a cyclic body parent chain.
    pub fn inflate_snapshot(
        &mut self,
        snapshot: &HeapSnapshot,
        host: &mut H,
    ) -> Result<InflateStats, ReplayError> {
        let sizes = snapshot.inflate_sizes();
        if self.map.is_prepared() {
            self.map.prep_for_reinflate(sizes)?;
        } else {
            self.map.prep_for_initial_inflate(sizes)?;
        }
        let result = inflate::inflate_snapshot(&mut self.map, snapshot, host);
        self.map.cleanup_after_inflate();
        self.recorded_exception = None;
        let stats = result?;
        info!(restore_time = snapshot.restore_time, ?stats, "snapshot inflated");
        Ok(stats)
    }

    /// Moves to `target`: inflates the snapshot of the latest marker at or
    /// before it and replays the records that follow, up to `target`.
    ///
    /// # Errors
    /// [`ReplayError::NoSnapshotBefore`] when no usable marker exists, or any
    /// inflation or replay failure.
    #[instrument(skip_all, fields(target))]
    pub fn seek(
        &mut self,
        log: &mut ActionLog,
        snapshots: &BTreeMap<i64, HeapSnapshot>,
        host: &mut H,
        target: i64,
    ) -> Result<ReplayReport, ReplayError> {
        let marker = log
            .records()
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, record)| match record.action {
                crate::action::Action::Snapshot { restore_time } if restore_time <= target => {
                    snapshots.get(&restore_time).map(|snap| (index, snap))
                }
                _ => None,
            });
        let (index, snapshot) = marker.ok_or(ReplayError::NoSnapshotBefore { target })?;
        let stats = self.inflate_snapshot(snapshot, host)?;
        let mut report = self.replay_from(log, index + 1, host, Some(target))?;
        report.inflated = Some(stats);
        Ok(report)
    }
}
