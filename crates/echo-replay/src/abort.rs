// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Debugger abort signalling.
//!
//! An abort is a value, never an error: hosts surface it as
//! [`HostFault::DebuggerAbort`](crate::host::HostFault::DebuggerAbort) from any
//! capability, and debugger front ends can also post one on an
//! [`AbortToken`] that the replay driver polls between records.
use std::fmt;
use std::sync::{Arc, Mutex};

/// Why replay was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// A breakpoint was hit.
    Breakpoint,
    /// A root call completed with an uncaught exception.
    UncaughtException,
    /// The user asked to stop.
    User,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Breakpoint => "breakpoint",
            Self::UncaughtException => "uncaught exception",
            Self::User => "user request",
        })
    }
}

/// Request to stop replay at a given log time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbortRequest {
    /// Event time the debugger wants to land on.
    pub target_time: i64,
    /// Why the stop was requested.
    pub reason: AbortReason,
}

impl AbortRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(target_time: i64, reason: AbortReason) -> Self {
        Self {
            target_time,
            reason,
        }
    }
}

/// Shared, clonable stop flag polled by the replay driver.
#[derive(Debug, Clone, Default)]
pub struct AbortToken {
    inner: Arc<Mutex<Option<AbortRequest>>>,
}

impl AbortToken {
    /// Creates an idle token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Posts a request. A later request replaces an earlier one that has not
    /// been observed yet.
    pub fn request(&self, request: AbortRequest) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = Some(request);
    }

    /// Takes the pending request, leaving the token idle.
    pub fn take(&self) -> Option<AbortRequest> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// `true` if a request is pending.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}
