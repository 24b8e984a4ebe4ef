// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Replay configuration.
use serde::{Deserialize, Serialize};

/// Default upper bound on a single log frame (10 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

/// Default upper bound on an inline string or byte payload (1 MiB).
pub const DEFAULT_MAX_STRING_LEN: usize = 1024 * 1024;

/// Knobs shared by log parsing and the replay driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Largest frame the log reader accepts.
    pub max_frame_len: usize,
    /// Largest string, byte buffer or argument vector the log reader accepts.
    pub max_string_len: usize,
    /// Stop replay after a root call whose record carries an uncaught script
    /// or terminating exception.
    pub break_on_uncaught_exception: bool,
    /// Check persisted source text against the digest carried in the log.
    pub verify_source_digest: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_string_len: DEFAULT_MAX_STRING_LEN,
            break_on_uncaught_exception: false,
            verify_source_digest: true,
        }
    }
}

impl ReplayConfig {
    /// Sets [`ReplayConfig::max_frame_len`].
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Sets [`ReplayConfig::max_string_len`].
    pub fn with_max_string_len(mut self, max_string_len: usize) -> Self {
        self.max_string_len = max_string_len;
        self
    }

    /// Sets [`ReplayConfig::break_on_uncaught_exception`].
    pub fn with_break_on_uncaught_exception(mut self, enabled: bool) -> Self {
        self.break_on_uncaught_exception = enabled;
        self
    }

    /// Sets [`ReplayConfig::verify_source_digest`].
    pub fn with_verify_source_digest(mut self, enabled: bool) -> Self {
        self.verify_source_digest = enabled;
        self
    }
}

/// Capacity hints for one inflation pass, one per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InflateSizes {
    /// Type handlers.
    pub handlers: usize,
    /// Types.
    pub types: usize,
    /// Contexts.
    pub contexts: usize,
    /// Objects and primitive heap values.
    pub objects: usize,
    /// Function bodies (top-level and nested).
    pub function_bodies: usize,
    /// Closure environments.
    pub environments: usize,
    /// Slot arrays.
    pub slot_arrays: usize,
}
