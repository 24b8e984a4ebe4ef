// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! echo-replay: deterministic record/replay core for a managed runtime.
//!
//! A recorded execution is an append-only [`ActionLog`] of external-API
//! actions interleaved with periodic [`snapshot::HeapSnapshot`]s. Replay
//! rebuilds the live heap from a snapshot through the [`InflateMap`] and then
//! re-executes the log in time order against a host runtime that implements
//! [`host::HostRuntime`] and [`host::InflationHost`].
//!
//! The crate never touches the host's object model directly: everything goes
//! through the capability traits in [`host`], and every cross-reference is a
//! [`PtrId`] rather than a live pointer.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::multiple_crate_versions
)]

mod abort;
/// Tagged action records and the action log.
pub mod action;
/// Deterministic little-endian codec used by the action log.
pub mod codec;
mod config;
/// Host capability surface consumed by the replay core.
pub mod host;
mod ident;
mod identifier_dictionary;
mod inflate;
mod inflate_map;
mod logged_var;
mod payload;
mod replay;
/// Category-partitioned heap snapshots.
pub mod snapshot;
mod source_store;

/// Debugger abort requests and the token the replay driver polls.
pub use abort::{AbortReason, AbortRequest, AbortToken};
/// Action records, kinds, and the serialized log.
pub use action::{
    Action, ActionKind, ActionLog, ActionRecord, CallFunctionAction, CallbackAction,
    CodeParseAction, ConstructCallAction, Conversion, ExecuteError, LogError, LoadFlags,
};
/// Replay configuration and inflation capacity hints.
pub use config::{InflateSizes, ReplayConfig};
/// Source position reported by the host.
pub use host::SourceLocation;
/// Stable identities for heap entities, contexts, and properties.
pub use ident::{ContextTag, PropertyId, PtrId};
/// Identity-keyed dictionary with duplicate-insert detection.
pub use identifier_dictionary::{IdentifierDictionary, IdentityKey};
/// Snapshot-driven heap reconstruction.
pub use inflate::{inflate_snapshot, InflateStats, InflationError};
/// Per-pass identity maps, pin sets, and generation handling.
pub use inflate_map::{InflateCategory, InflateError, InflateMap, PinSet};
/// Logged value references.
pub use logged_var::{InlineValue, LoggedVar};
/// Bulk allocator for variable-length action payloads.
pub use payload::{Payload, PayloadArena, PayloadError, PayloadRef, MAX_PAYLOAD_SLOTS};
/// Replay driver and session state.
pub use replay::{ReplayError, ReplayReport, ReplaySession, ReplayStop};
/// Persisted source text keyed by (directory, document, uri).
pub use source_store::{
    FsSourceStore, MemorySourceStore, SourceKey, SourceStore, SourceStoreError,
};
