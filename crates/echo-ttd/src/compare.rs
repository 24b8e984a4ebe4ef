// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Structural equivalence of two heap snapshots.
//!
//! The two snapshots (`h1`, `h2`) are independent graphs: a [`PtrId`] in one
//! means nothing in the other until the comparator pairs it with a
//! correspondent. [`CompareMap`] records that correspondence and the
//! worklist of pairs still to expand.
//!
//! # Traversal
//!
//! 1. **Seeding**: contexts are paired by tag (their globals become the first
//!    pairs), roots by position, and top-level functions by kind and body
//!    counter id.
//! 2. **Expansion**: each dequeued pair is classified by the `h1` partition
//!    holding its id and compared field by field. Identity-valued fields call
//!    [`CompareMap::check_consistent_and_add_mapping`], which enqueues pairs it
//!    has not seen.
//! 3. **Result**: the first inconsistency stops the pass and is reported as a
//!    [`Divergence`] rooted at the pair being expanded.
//!
//! Primitive values are compared by value, never paired.
//!
//! # Example
//!
//! ```
//! use echo_replay::PtrId;
//! use echo_replay::snapshot::HeapSnapshot;
//! use echo_ttd::compare::{CompareMap, DivergenceCode};
//!
//! let (h1, h2) = (HeapSnapshot::default(), HeapSnapshot::default());
//! let mut map = CompareMap::new(&h1, &h2);
//!
//! assert!(map.check_consistent_and_add_mapping(PtrId(5), PtrId(50)).is_ok());
//! let conflict = map
//!     .check_consistent_and_add_mapping(PtrId(5), PtrId(51))
//!     .unwrap_err();
//! assert_eq!(conflict.code, DivergenceCode::MappingConflict);
//! ```

use std::collections::{BTreeMap, VecDeque};

use echo_replay::snapshot::{
    FunctionBodyInfo, FunctionScopeInfo, HeapSnapshot, SlotArrayInfo, SnapObject, SnapObjectKind,
    TopLevelFunction, TopLevelKind,
};
use echo_replay::{LoggedVar, PtrId};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

/// Which of the two snapshots an id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The reference snapshot.
    H1,
    /// The snapshot checked against it.
    H2,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::H1 => write!(f, "h1"),
            Self::H2 => write!(f, "h2"),
        }
    }
}

/// Partition a dequeued pair was found in.
///
/// Variants are listed in classification precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareTag {
    /// Captured-variable slot array.
    SlotArray,
    /// Closure scope descriptor.
    FunctionScopeInfo,
    /// Top-level function from a script load.
    TopLevelLoad,
    /// Top-level function from `new Function`.
    TopLevelNew,
    /// Top-level function from `eval`.
    TopLevelEval,
    /// Nested function body.
    FunctionBody,
    /// General object.
    Object,
}

impl std::fmt::Display for CompareTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SlotArray => "SLOT_ARRAY",
            Self::FunctionScopeInfo => "FUNCTION_SCOPE_INFO",
            Self::TopLevelLoad => "TOP_LEVEL_LOAD",
            Self::TopLevelNew => "TOP_LEVEL_NEW",
            Self::TopLevelEval => "TOP_LEVEL_EVAL",
            Self::FunctionBody => "FUNCTION_BODY",
            Self::Object => "OBJECT",
        };
        write!(f, "{s}")
    }
}

/// Classification of snapshot divergences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DivergenceCode {
    /// An `h1` id already corresponds to a different `h2` id.
    MappingConflict,
    /// Paired ids live in different partitions.
    CategoryMismatch,
    /// Primitive or inline values differ.
    ValueMismatch,
    /// Object kinds or scope kinds differ.
    KindMismatch,
    /// Property, slot, element or scope lists differ in length.
    LengthMismatch,
    /// A scalar field (name, position, property id, flags) differs.
    FieldMismatch,
    /// Object types differ in context or handler layout.
    TypeMismatch,
    /// A context tag exists on only one side.
    MissingContext,
    /// A top-level function exists on only one side.
    MissingTopLevel,
    /// Root lists differ in length.
    RootCountMismatch,
}

impl std::fmt::Display for DivergenceCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MappingConflict => "MAPPING_CONFLICT",
            Self::CategoryMismatch => "CATEGORY_MISMATCH",
            Self::ValueMismatch => "VALUE_MISMATCH",
            Self::KindMismatch => "KIND_MISMATCH",
            Self::LengthMismatch => "LENGTH_MISMATCH",
            Self::FieldMismatch => "FIELD_MISMATCH",
            Self::TypeMismatch => "TYPE_MISMATCH",
            Self::MissingContext => "MISSING_CONTEXT",
            Self::MissingTopLevel => "MISSING_TOP_LEVEL",
            Self::RootCountMismatch => "ROOT_COUNT_MISMATCH",
        };
        write!(f, "{s}")
    }
}

/// First inconsistency found between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// Classification code.
    pub code: DivergenceCode,
    /// `h1` id of the pair being expanded, when there is one.
    pub h1: Option<PtrId>,
    /// `h2` id of the pair being expanded, when there is one.
    pub h2: Option<PtrId>,
    /// Field path inside the root pair (`properties[2]`, `type.prototype`).
    pub path: String,
    /// Human-readable description.
    pub message: String,
}

impl Divergence {
    /// Creates a divergence with no root and an empty path.
    #[must_use]
    pub fn new(code: DivergenceCode, message: impl Into<String>) -> Self {
        Self {
            code,
            h1: None,
            h2: None,
            path: String::new(),
            message: message.into(),
        }
    }

    /// Attaches the root pair.
    #[must_use]
    pub fn with_root(mut self, h1: PtrId, h2: PtrId) -> Self {
        self.h1 = Some(h1);
        self.h2 = Some(h2);
        self
    }

    /// Attaches a field path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

impl std::fmt::Display for Divergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code)?;
        if let (Some(h1), Some(h2)) = (self.h1, self.h2) {
            write!(f, " {h1} ~ {h2}")?;
        }
        if !self.path.is_empty() {
            write!(f, " at {}", self.path)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Fatal comparator failures: the snapshots are malformed, not merely
/// different.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompareError {
    /// A referenced id has no entry in the partition it must live in.
    #[error("{side} snapshot has no {category} entry for {id}")]
    MissingIdentity {
        /// Snapshot missing the entry.
        side: Side,
        /// Partition searched.
        category: &'static str,
        /// Missing id.
        id: PtrId,
    },
}

/// Outcome of [`compare_snapshots`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareReport {
    /// First divergence, or `None` when the snapshots are equivalent.
    pub divergence: Option<Divergence>,
    /// Correspondence built before the pass stopped.
    pub mapping: BTreeMap<PtrId, PtrId>,
    /// Pairs expanded.
    pub compared: usize,
}

impl CompareReport {
    /// `true` when no divergence was found.
    #[must_use]
    pub fn is_equivalent(&self) -> bool {
        self.divergence.is_none()
    }
}

enum Halt {
    Diverged(Divergence),
    Fatal(CompareError),
}

impl From<Divergence> for Halt {
    fn from(d: Divergence) -> Self {
        Self::Diverged(d)
    }
}

impl From<CompareError> for Halt {
    fn from(e: CompareError) -> Self {
        Self::Fatal(e)
    }
}

fn pair_in<'s, T>(
    h1: &'s BTreeMap<PtrId, T>,
    h2: &'s BTreeMap<PtrId, T>,
    category: &'static str,
    a: PtrId,
    b: PtrId,
) -> Result<(&'s T, &'s T), CompareError> {
    let x = h1.get(&a).ok_or(CompareError::MissingIdentity {
        side: Side::H1,
        category,
        id: a,
    })?;
    let y = h2.get(&b).ok_or(CompareError::MissingIdentity {
        side: Side::H2,
        category,
        id: b,
    })?;
    Ok((x, y))
}

fn classify(snapshot: &HeapSnapshot, id: PtrId) -> Option<CompareTag> {
    if snapshot.slot_arrays.contains_key(&id) {
        Some(CompareTag::SlotArray)
    } else if snapshot.scope_infos.contains_key(&id) {
        Some(CompareTag::FunctionScopeInfo)
    } else if snapshot.top_level_load.contains_key(&id) {
        Some(CompareTag::TopLevelLoad)
    } else if snapshot.top_level_new.contains_key(&id) {
        Some(CompareTag::TopLevelNew)
    } else if snapshot.top_level_eval.contains_key(&id) {
        Some(CompareTag::TopLevelEval)
    } else if snapshot.function_bodies.contains_key(&id) {
        Some(CompareTag::FunctionBody)
    } else if snapshot.objects.contains_key(&id) {
        Some(CompareTag::Object)
    } else {
        None
    }
}

/// Correspondence and worklist for one comparison pass.
#[derive(Debug)]
pub struct CompareMap<'a> {
    h1: &'a HeapSnapshot,
    h2: &'a HeapSnapshot,
    mapping: FxHashMap<PtrId, PtrId>,
    worklist: VecDeque<(PtrId, PtrId)>,
    current: Option<(PtrId, PtrId)>,
    compared: usize,
}

impl<'a> CompareMap<'a> {
    /// Creates an empty map over two snapshots.
    #[must_use]
    pub fn new(h1: &'a HeapSnapshot, h2: &'a HeapSnapshot) -> Self {
        Self {
            h1,
            h2,
            mapping: FxHashMap::default(),
            worklist: VecDeque::new(),
            current: None,
            compared: 0,
        }
    }

    /// Records `h1_id -> h2_id` and queues the pair for expansion.
    ///
    /// A pair that is already recorded is a no-op.
    ///
    /// # Errors
    /// [`DivergenceCode::MappingConflict`] if `h1_id` already corresponds to
    /// a different id.
    pub fn check_consistent_and_add_mapping(
        &mut self,
        h1_id: PtrId,
        h2_id: PtrId,
    ) -> Result<(), Divergence> {
        match self.mapping.get(&h1_id) {
            Some(existing) if *existing == h2_id => Ok(()),
            Some(existing) => Err(self.diverge_at(
                DivergenceCode::MappingConflict,
                (h1_id, h2_id),
                format!("{h1_id} already corresponds to {existing}, not {h2_id}"),
            )),
            None => {
                self.mapping.insert(h1_id, h2_id);
                self.worklist.push_back((h1_id, h2_id));
                Ok(())
            }
        }
    }

    /// Recorded correspondent of `h1_id`.
    #[must_use]
    pub fn correspondent(&self, h1_id: PtrId) -> Option<PtrId> {
        self.mapping.get(&h1_id).copied()
    }

    /// Number of recorded pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// `true` before any pair is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Dequeues the next pair and classifies it by its `h1` partition.
    /// Returns `None` once the worklist is empty.
    ///
    /// Globals that only appear as context entries are skipped; they were
    /// matched by tag.
    ///
    /// # Errors
    /// [`CompareError::MissingIdentity`] if `h1` has no entry for the id.
    pub fn get_next_compare_info(
        &mut self,
    ) -> Result<Option<(CompareTag, PtrId, PtrId)>, CompareError> {
        while let Some((a, b)) = self.worklist.pop_front() {
            if let Some(tag) = classify(self.h1, a) {
                self.current = Some((a, b));
                self.compared += 1;
                return Ok(Some((tag, a, b)));
            }
            if !self.h1.contexts.iter().any(|c| c.global_object == a) {
                return Err(CompareError::MissingIdentity {
                    side: Side::H1,
                    category: "entity",
                    id: a,
                });
            }
        }
        self.current = None;
        Ok(None)
    }

    /// Slot arrays of a pair.
    ///
    /// # Errors
    /// [`CompareError::MissingIdentity`] if either side lacks the entry.
    pub fn slot_array_values(
        &self,
        a: PtrId,
        b: PtrId,
    ) -> Result<(&'a SlotArrayInfo, &'a SlotArrayInfo), CompareError> {
        let (h1, h2): (&'a HeapSnapshot, &'a HeapSnapshot) = (self.h1, self.h2);
        pair_in(&h1.slot_arrays, &h2.slot_arrays, "slot array", a, b)
    }

    /// Closure scope descriptors of a pair.
    ///
    /// # Errors
    /// [`CompareError::MissingIdentity`] if either side lacks the entry.
    pub fn scope_info_values(
        &self,
        a: PtrId,
        b: PtrId,
    ) -> Result<(&'a FunctionScopeInfo, &'a FunctionScopeInfo), CompareError> {
        let (h1, h2): (&'a HeapSnapshot, &'a HeapSnapshot) = (self.h1, self.h2);
        pair_in(&h1.scope_infos, &h2.scope_infos, "scope info", a, b)
    }

    /// Top-level function descriptors of a pair, from the partition named by
    /// `kind`.
    ///
    /// # Errors
    /// [`CompareError::MissingIdentity`] if either side lacks the entry.
    pub fn top_level_values(
        &self,
        kind: TopLevelKind,
        a: PtrId,
        b: PtrId,
    ) -> Result<(&'a TopLevelFunction, &'a TopLevelFunction), CompareError> {
        let (h1, h2): (&'a HeapSnapshot, &'a HeapSnapshot) = (self.h1, self.h2);
        match kind {
            TopLevelKind::Load => pair_in(&h1.top_level_load, &h2.top_level_load, "load", a, b),
            TopLevelKind::New => pair_in(&h1.top_level_new, &h2.top_level_new, "new", a, b),
            TopLevelKind::Eval => pair_in(&h1.top_level_eval, &h2.top_level_eval, "eval", a, b),
        }
    }

    /// Nested function bodies of a pair.
    ///
    /// # Errors
    /// [`CompareError::MissingIdentity`] if either side lacks the entry.
    pub fn function_body_values(
        &self,
        a: PtrId,
        b: PtrId,
    ) -> Result<(&'a FunctionBodyInfo, &'a FunctionBodyInfo), CompareError> {
        let (h1, h2): (&'a HeapSnapshot, &'a HeapSnapshot) = (self.h1, self.h2);
        pair_in(&h1.function_bodies, &h2.function_bodies, "function body", a, b)
    }

    /// Objects of a pair.
    ///
    /// # Errors
    /// [`CompareError::MissingIdentity`] if either side lacks the entry.
    pub fn object_values(
        &self,
        a: PtrId,
        b: PtrId,
    ) -> Result<(&'a SnapObject, &'a SnapObject), CompareError> {
        let (h1, h2): (&'a HeapSnapshot, &'a HeapSnapshot) = (self.h1, self.h2);
        pair_in(&h1.objects, &h2.objects, "object", a, b)
    }

    fn diverge(&self, code: DivergenceCode, message: impl Into<String>) -> Divergence {
        let d = Divergence::new(code, message);
        match self.current {
            Some((a, b)) => d.with_root(a, b),
            None => d,
        }
    }

    fn diverge_at(
        &self,
        code: DivergenceCode,
        pair: (PtrId, PtrId),
        message: impl Into<String>,
    ) -> Divergence {
        let (a, b) = self.current.unwrap_or(pair);
        Divergence::new(code, message).with_root(a, b)
    }

    fn run(&mut self) -> Result<(), Halt> {
        self.seed()?;
        while let Some((tag, a, b)) = self.get_next_compare_info()? {
            if classify(self.h2, b) != Some(tag) {
                return Err(self
                    .diverge(
                        DivergenceCode::CategoryMismatch,
                        format!("{a} is a {tag} entry but {b} is not"),
                    )
                    .into());
            }
            match tag {
                CompareTag::SlotArray => self.compare_slot_array(a, b)?,
                CompareTag::FunctionScopeInfo => self.compare_scope_info(a, b)?,
                CompareTag::TopLevelLoad => self.compare_top_level(TopLevelKind::Load, a, b)?,
                CompareTag::TopLevelNew => self.compare_top_level(TopLevelKind::New, a, b)?,
                CompareTag::TopLevelEval => self.compare_top_level(TopLevelKind::Eval, a, b)?,
                CompareTag::FunctionBody => self.compare_function_body(a, b)?,
                CompareTag::Object => self.compare_object(a, b)?,
            }
        }
        Ok(())
    }

    fn seed(&mut self) -> Result<(), Halt> {
        let (h1, h2): (&'a HeapSnapshot, &'a HeapSnapshot) = (self.h1, self.h2);

        for c1 in &h1.contexts {
            let Some(c2) = h2.contexts.iter().find(|c| c.tag == c1.tag) else {
                return Err(Divergence::new(
                    DivergenceCode::MissingContext,
                    format!("context {} is missing from h2", c1.tag),
                )
                .into());
            };
            self.check_consistent_and_add_mapping(c1.global_object, c2.global_object)?;
        }
        if h1.contexts.len() != h2.contexts.len() {
            return Err(Divergence::new(
                DivergenceCode::MissingContext,
                format!(
                    "h1 has {} contexts, h2 has {}",
                    h1.contexts.len(),
                    h2.contexts.len()
                ),
            )
            .into());
        }

        if h1.roots.len() != h2.roots.len() {
            return Err(Divergence::new(
                DivergenceCode::RootCountMismatch,
                format!("h1 has {} roots, h2 has {}", h1.roots.len(), h2.roots.len()),
            )
            .into());
        }
        for (i, (r1, r2)) in h1.roots.iter().zip(&h2.roots).enumerate() {
            self.compare_var(
                LoggedVar::Ptr(*r1),
                LoggedVar::Ptr(*r2),
                &format!("roots[{i}]"),
            )?;
        }

        for (id1, kind, f1) in h1.top_level_functions() {
            let matched = h2
                .top_level_functions()
                .find(|(_, k, f2)| *k == kind && f2.body_counter_id == f1.body_counter_id);
            let Some((id2, _, _)) = matched else {
                return Err(Divergence::new(
                    DivergenceCode::MissingTopLevel,
                    format!(
                        "top-level function with body counter {} is missing from h2",
                        f1.body_counter_id
                    ),
                )
                .with_root(id1, id1)
                .into());
            };
            self.check_consistent_and_add_mapping(id1, id2)?;
        }
        Ok(())
    }

    fn compare_var(&mut self, a: LoggedVar, b: LoggedVar, path: &str) -> Result<(), Halt> {
        let (h1, h2): (&'a HeapSnapshot, &'a HeapSnapshot) = (self.h1, self.h2);
        match (a, b) {
            (LoggedVar::Ptr(x), LoggedVar::Ptr(y)) => {
                match (h1.primitives.get(&x), h2.primitives.get(&y)) {
                    (Some(p), Some(q)) if p.value.same_value(&q.value) => Ok(()),
                    (Some(p), Some(q)) => Err(self
                        .diverge_at(
                            DivergenceCode::ValueMismatch,
                            (x, y),
                            format!("{:?} != {:?}", p.value, q.value),
                        )
                        .with_path(path)
                        .into()),
                    (None, None) => self
                        .check_consistent_and_add_mapping(x, y)
                        .map_err(|d| d.with_path(path).into()),
                    _ => Err(self
                        .diverge_at(
                            DivergenceCode::CategoryMismatch,
                            (x, y),
                            format!("only one of {x} and {y} is a primitive"),
                        )
                        .with_path(path)
                        .into()),
                }
            }
            _ if a == b => Ok(()),
            _ => Err(self
                .diverge(DivergenceCode::ValueMismatch, format!("{a:?} != {b:?}"))
                .with_path(path)
                .into()),
        }
    }

    fn compare_opt_ptr(
        &mut self,
        a: Option<PtrId>,
        b: Option<PtrId>,
        path: &str,
    ) -> Result<(), Halt> {
        match (a, b) {
            (None, None) => Ok(()),
            (Some(x), Some(y)) => self
                .check_consistent_and_add_mapping(x, y)
                .map_err(|d| d.with_path(path).into()),
            _ => Err(self
                .diverge(
                    DivergenceCode::FieldMismatch,
                    format!("{a:?} vs {b:?}"),
                )
                .with_path(path)
                .into()),
        }
    }

    fn check_len(&self, a: usize, b: usize, path: &str) -> Result<(), Halt> {
        if a == b {
            Ok(())
        } else {
            Err(self
                .diverge(DivergenceCode::LengthMismatch, format!("{a} != {b}"))
                .with_path(path)
                .into())
        }
    }

    fn check_field<T: PartialEq + std::fmt::Debug>(
        &self,
        a: &T,
        b: &T,
        path: &str,
    ) -> Result<(), Halt> {
        if a == b {
            Ok(())
        } else {
            Err(self
                .diverge(DivergenceCode::FieldMismatch, format!("{a:?} != {b:?}"))
                .with_path(path)
                .into())
        }
    }

    fn compare_slot_array(&mut self, a: PtrId, b: PtrId) -> Result<(), Halt> {
        let (x, y) = self.slot_array_values(a, b)?;
        self.compare_opt_ptr(x.function_body, y.function_body, "function_body")?;
        self.check_len(x.slots.len(), y.slots.len(), "slots")?;
        for (i, (s, t)) in x.slots.iter().zip(&y.slots).enumerate() {
            self.check_field(&s.pid, &t.pid, &format!("slots[{i}].pid"))?;
            self.compare_var(s.value, t.value, &format!("slots[{i}]"))?;
        }
        Ok(())
    }

    fn compare_scope_info(&mut self, a: PtrId, b: PtrId) -> Result<(), Halt> {
        let (x, y) = self.scope_info_values(a, b)?;
        self.check_len(x.scopes.len(), y.scopes.len(), "scopes")?;
        for (i, (s, t)) in x.scopes.iter().zip(&y.scopes).enumerate() {
            let path = format!("scopes[{i}]");
            if s.kind != t.kind {
                return Err(self
                    .diverge(
                        DivergenceCode::KindMismatch,
                        format!("{:?} != {:?}", s.kind, t.kind),
                    )
                    .with_path(path)
                    .into());
            }
            self.check_consistent_and_add_mapping(s.id, t.id)
                .map_err(|d| d.with_path(path))?;
        }
        Ok(())
    }

    fn compare_top_level(&self, kind: TopLevelKind, a: PtrId, b: PtrId) -> Result<(), Halt> {
        let (x, y) = self.top_level_values(kind, a, b)?;
        self.check_field(&x.body_counter_id, &y.body_counter_id, "body_counter_id")?;
        self.check_field(&x.context, &y.context, "context")?;
        self.check_field(&x.uri, &y.uri, "uri")?;
        self.check_field(&x.load_flags, &y.load_flags, "load_flags")?;
        self.check_field(&x.is_strict, &y.is_strict, "is_strict")?;
        if x.source != y.source {
            return Err(self
                .diverge(DivergenceCode::FieldMismatch, "source text differs")
                .with_path("source")
                .into());
        }
        Ok(())
    }

    fn compare_function_body(&mut self, a: PtrId, b: PtrId) -> Result<(), Halt> {
        let (x, y) = self.function_body_values(a, b)?;
        self.check_field(&x.name, &y.name, "name")?;
        self.check_field(&x.line, &y.line, "line")?;
        self.check_field(&x.column, &y.column, "column")?;
        self.check_consistent_and_add_mapping(x.parent, y.parent)
            .map_err(|d| d.with_path("parent"))?;
        Ok(())
    }

    fn compare_object(&mut self, a: PtrId, b: PtrId) -> Result<(), Halt> {
        let (x, y) = self.object_values(a, b)?;
        self.compare_type(x.type_id, y.type_id)?;

        self.check_len(x.properties.len(), y.properties.len(), "properties")?;
        for (i, (p, q)) in x.properties.iter().zip(&y.properties).enumerate() {
            self.check_field(&p.pid, &q.pid, &format!("properties[{i}].pid"))?;
            self.compare_var(p.value, q.value, &format!("properties[{i}]"))?;
        }

        match (&x.kind, &y.kind) {
            (SnapObjectKind::Plain, SnapObjectKind::Plain)
            | (SnapObjectKind::External, SnapObjectKind::External) => Ok(()),
            (SnapObjectKind::Array { elements: e1 }, SnapObjectKind::Array { elements: e2 }) => {
                self.check_len(e1.len(), e2.len(), "elements")?;
                for (i, (u, v)) in e1.iter().zip(e2).enumerate() {
                    self.compare_var(*u, *v, &format!("elements[{i}]"))?;
                }
                Ok(())
            }
            (
                SnapObjectKind::ArrayBuffer { bytes: b1 },
                SnapObjectKind::ArrayBuffer { bytes: b2 },
            ) => {
                if b1 == b2 {
                    Ok(())
                } else {
                    Err(self
                        .diverge(DivergenceCode::ValueMismatch, "buffer contents differ")
                        .with_path("bytes")
                        .into())
                }
            }
            (
                SnapObjectKind::ScriptFunction {
                    body: b1,
                    scope: s1,
                },
                SnapObjectKind::ScriptFunction {
                    body: b2,
                    scope: s2,
                },
            ) => {
                self.check_consistent_and_add_mapping(*b1, *b2)
                    .map_err(|d| d.with_path("body"))?;
                self.compare_opt_ptr(*s1, *s2, "scope")
            }
            (
                SnapObjectKind::ExternalFunction { name: n1 },
                SnapObjectKind::ExternalFunction { name: n2 },
            ) => self.compare_var(*n1, *n2, "name"),
            (
                SnapObjectKind::Promise {
                    status: st1,
                    result: r1,
                    reactions: rs1,
                },
                SnapObjectKind::Promise {
                    status: st2,
                    result: r2,
                    reactions: rs2,
                },
            ) => {
                self.check_field(st1, st2, "status")?;
                self.compare_var(*r1, *r2, "result")?;
                self.check_len(rs1.len(), rs2.len(), "reactions")?;
                let (h1, h2): (&'a HeapSnapshot, &'a HeapSnapshot) = (self.h1, self.h2);
                for (i, (u, v)) in rs1.iter().zip(rs2).enumerate() {
                    let (ru, rv) =
                        pair_in(&h1.promise_reactions, &h2.promise_reactions, "reaction", *u, *v)?;
                    self.compare_var(ru.handler, rv.handler, &format!("reactions[{i}].handler"))?;
                    self.compare_var(
                        ru.capability,
                        rv.capability,
                        &format!("reactions[{i}].capability"),
                    )?;
                }
                Ok(())
            }
            _ => Err(self
                .diverge(
                    DivergenceCode::KindMismatch,
                    "objects are of different kinds",
                )
                .with_path("kind")
                .into()),
        }
    }

    fn compare_type(&mut self, a: PtrId, b: PtrId) -> Result<(), Halt> {
        let (h1, h2): (&'a HeapSnapshot, &'a HeapSnapshot) = (self.h1, self.h2);
        let (t1, t2) = pair_in(&h1.types, &h2.types, "type", a, b)?;
        if t1.context != t2.context {
            return Err(self
                .diverge(
                    DivergenceCode::TypeMismatch,
                    format!("{} != {}", t1.context, t2.context),
                )
                .with_path("type.context")
                .into());
        }
        let same_layout = match (t1.handler, t2.handler) {
            (None, None) => true,
            (Some(x), Some(y)) => {
                let (l1, l2) = pair_in(&h1.handlers, &h2.handlers, "handler", x, y)?;
                l1 == l2
            }
            _ => false,
        };
        if !same_layout {
            return Err(self
                .diverge(DivergenceCode::TypeMismatch, "handler layouts differ")
                .with_path("type.handler")
                .into());
        }
        self.compare_var(t1.prototype, t2.prototype, "type.prototype")
    }
}

/// Compares `h1` against `h2` and reports the first divergence.
///
/// # Errors
/// [`CompareError::MissingIdentity`] when either snapshot references an id it
/// does not contain.
pub fn compare_snapshots(
    h1: &HeapSnapshot,
    h2: &HeapSnapshot,
) -> Result<CompareReport, CompareError> {
    let mut map = CompareMap::new(h1, h2);
    let divergence = match map.run() {
        Ok(()) => None,
        Err(Halt::Diverged(d)) => Some(d),
        Err(Halt::Fatal(e)) => return Err(e),
    };
    debug!(
        compared = map.compared,
        mapped = map.mapping.len(),
        diverged = divergence.is_some(),
        "snapshot comparison finished"
    );
    Ok(CompareReport {
        divergence,
        mapping: map.mapping.into_iter().collect(),
        compared: map.compared,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn repeated_mapping_is_a_no_op() {
        let (h1, h2) = (HeapSnapshot::default(), HeapSnapshot::default());
        let mut map = CompareMap::new(&h1, &h2);
        map.check_consistent_and_add_mapping(PtrId(5), PtrId(50))
            .unwrap();
        map.check_consistent_and_add_mapping(PtrId(5), PtrId(50))
            .unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.correspondent(PtrId(5)), Some(PtrId(50)));
    }

    #[test]
    fn conflicting_mapping_diverges() {
        let (h1, h2) = (HeapSnapshot::default(), HeapSnapshot::default());
        let mut map = CompareMap::new(&h1, &h2);
        map.check_consistent_and_add_mapping(PtrId(5), PtrId(50))
            .unwrap();
        let d = map
            .check_consistent_and_add_mapping(PtrId(5), PtrId(51))
            .unwrap_err();
        assert_eq!(d.code, DivergenceCode::MappingConflict);
        assert_eq!(map.correspondent(PtrId(5)), Some(PtrId(50)));
    }

    #[test]
    fn mapping_need_not_be_injective() {
        let (h1, h2) = (HeapSnapshot::default(), HeapSnapshot::default());
        let mut map = CompareMap::new(&h1, &h2);
        map.check_consistent_and_add_mapping(PtrId(1), PtrId(9))
            .unwrap();
        map.check_consistent_and_add_mapping(PtrId(2), PtrId(9))
            .unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn unknown_h1_id_is_fatal() {
        let (h1, h2) = (HeapSnapshot::default(), HeapSnapshot::default());
        let mut map = CompareMap::new(&h1, &h2);
        map.check_consistent_and_add_mapping(PtrId(7), PtrId(7))
            .unwrap();
        let err = map.get_next_compare_info().unwrap_err();
        assert_eq!(
            err,
            CompareError::MissingIdentity {
                side: Side::H1,
                category: "entity",
                id: PtrId(7)
            }
        );
    }

    #[test]
    fn empty_snapshots_are_equivalent() {
        let report = compare_snapshots(&HeapSnapshot::default(), &HeapSnapshot::default()).unwrap();
        assert!(report.is_equivalent());
        assert_eq!(report.compared, 0);
    }

    #[test]
    fn divergence_display() {
        let d = Divergence::new(DivergenceCode::ValueMismatch, "1 != 2")
            .with_root(PtrId(3), PtrId(4))
            .with_path("properties[0]");
        let s = format!("{d}");
        assert!(s.contains("VALUE_MISMATCH"));
        assert!(s.contains("properties[0]"));
        assert!(s.contains("1 != 2"));
    }
}
