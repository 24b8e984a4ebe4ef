// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Time-Travel Debugger snapshot comparator for Echo.
//!
//! This crate checks that two heap snapshots describe the same object graph,
//! typically one captured live and one captured after replaying the log.
//!
//! # Architecture
//!
//! The comparator never needs the two snapshots to share pointer identities:
//! - Contexts are matched by tag, roots by position, and top-level functions
//!   by body counter id
//! - Every other correspondence is discovered breadth-first by following
//!   identity-valued fields from already matched pairs
//! - The first inconsistency is reported as a structured [`Divergence`]
//!
//! # Modules
//!
//! - [`compare`]: Compare map, worklist, and per-category equivalence

#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::cargo)]
#![allow(clippy::module_name_repetitions)]

pub mod compare;

pub use compare::{
    compare_snapshots, CompareError, CompareMap, CompareReport, CompareTag, Divergence,
    DivergenceCode, Side,
};
