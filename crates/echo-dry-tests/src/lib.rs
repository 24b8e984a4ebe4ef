// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for Echo replay crates.
#![forbid(unsafe_code)]
//!
//! This crate provides a small in-memory host runtime and snapshot fixtures so
//! replay and comparator tests don't each grow their own.
//!
//! # Modules
//!
//! - [`runtime`] - Reference-counted fake host implementing every host trait
//! - [`snapshots`] - [`HeapSnapshot`](echo_replay::snapshot::HeapSnapshot) builder

pub mod runtime;
pub mod snapshots;

// Re-export commonly used items at crate root for convenience
pub use runtime::{Behaviour, FakeKind, FakeObject, FakeRuntime, FakeValue};
pub use snapshots::{ptr, SnapshotBuilder};
