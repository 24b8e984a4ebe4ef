// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Snapshot inflation.
//!
//! [`inflate_snapshot`] rebuilds a live heap from a [`HeapSnapshot`] in
//! phases. Shells (handlers, types, bodies, primitives, slot arrays, objects,
//! environments) are created and registered first; only then are fields
//! wired, so cyclic references always find their target in the map.
use thiserror::Error;
use tracing::debug;

use crate::host::{HostFault, InflationHost, ScopeBinding, TopLevelSource};
use crate::ident::PtrId;
use crate::inflate_map::{InflateCategory, InflateError, InflateMap};
use crate::logged_var::{InlineValue, LoggedVar};
use crate::snapshot::{HeapSnapshot, ScopeKind, SnapObjectKind};

/// Errors raised while inflating a snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InflationError {
    /// Identity error from the inflate map.
    #[error(transparent)]
    Inflate(#[from] InflateError),
    /// A host capability failed.
    #[error("host failure during inflation: {0}")]
    Host(#[from] HostFault),
    /// Nested function bodies form a parent cycle.
    #[error("function body {id} is its own ancestor")]
    ParentCycle {
        /// A body on the cycle.
        id: PtrId,
    },
}

/// Counters reported by one inflation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InflateStats {
    /// Contexts registered.
    pub contexts: usize,
    /// Function bodies registered (top-level and nested).
    pub function_bodies: usize,
    /// Function bodies taken from the previous generation.
    pub reused_function_bodies: usize,
    /// Objects and primitives registered (globals excluded).
    pub objects: usize,
    /// Objects taken from the previous generation.
    pub reused_objects: usize,
    /// Closure environments registered.
    pub environments: usize,
}

/// Inflates `snapshot` into `map` through `host`.
///
/// The map must already be prepared for this pass. On error the map holds a
/// partially inflated generation; callers still run
/// [`InflateMap::cleanup_after_inflate`].
///
/// # Errors
/// Identity errors from the map, host faults, or a cyclic body parent chain.
pub fn inflate_snapshot<I: InflationHost>(
    map: &mut InflateMap<I>,
    snapshot: &HeapSnapshot,
    host: &mut I,
) -> Result<InflateStats, InflationError> {
    let mut stats = InflateStats::default();

    for ctx in &snapshot.contexts {
        let (context, global) = host.context_for_tag(ctx)?;
        map.add_context(ctx.tag, context)?;
        map.add_object(ctx.global_object, global)?;
        stats.contexts += 1;
    }

    for (id, handler) in &snapshot.handlers {
        let live = host.create_handler(handler)?;
        map.add_handler(*id, live)?;
    }

    for (id, ty) in &snapshot.types {
        let context = map.lookup_context(ty.context)?.clone();
        let handler = ty
            .handler
            .map(|h| map.lookup_handler(h).cloned())
            .transpose()?;
        let live = host.create_type(&context, handler.as_ref(), ty)?;
        map.add_type(*id, live)?;
    }
    debug!(
        contexts = stats.contexts,
        handlers = snapshot.handlers.len(),
        types = snapshot.types.len(),
        "inflated contexts, handlers and types"
    );

    inflate_function_bodies(map, snapshot, host, &mut stats)?;

    for (id, prim) in &snapshot.primitives {
        let context = map.lookup_context(prim.context)?.clone();
        let live = host.create_primitive(&context, &prim.value)?;
        map.add_object(*id, live)?;
        stats.objects += 1;
    }

    for (id, info) in &snapshot.slot_arrays {
        let body = info
            .function_body
            .map(|b| map.lookup_function_body(b).cloned())
            .transpose()?;
        let live = host.create_slot_array(body.as_ref(), info.slots.len())?;
        map.add_slot_array(*id, live)?;
    }

    inflate_object_shells(map, snapshot, host, &mut stats)?;

    for (id, info) in &snapshot.scope_infos {
        let environment = {
            let bindings = info
                .scopes
                .iter()
                .map(|scope| match scope.kind {
                    ScopeKind::SlotArray => map.lookup_slot_array(scope.id).map(ScopeBinding::Slots),
                    ScopeKind::ActivationObject | ScopeKind::WithObject => {
                        map.lookup_object(scope.id).map(ScopeBinding::Object)
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            host.create_environment(&bindings)?
        };
        map.add_environment(*id, environment)?;
        stats.environments += 1;
    }
    debug!(
        objects = stats.objects,
        reused = stats.reused_objects,
        environments = stats.environments,
        "inflated shells"
    );

    wire(map, snapshot, host)?;

    for root in &snapshot.roots {
        host.retain_root(*root, map.lookup_object(*root)?)?;
    }

    let reset = map.take_property_reset();
    if !reset.is_empty() {
        debug!(count = reset.len(), "invalidating property caches");
        host.invalidate_property_caches(&reset);
    }
    Ok(stats)
}

fn inflate_function_bodies<I: InflationHost>(
    map: &mut InflateMap<I>,
    snapshot: &HeapSnapshot,
    host: &mut I,
    stats: &mut InflateStats,
) -> Result<(), InflationError> {
    for (id, kind, function) in snapshot.top_level_functions() {
        let body = if let Some(body) = map.find_reusable_function_body(id) {
            stats.reused_function_bodies += 1;
            body
        } else {
            let context = map.lookup_context(function.context)?.clone();
            host.load_top_level_body(&context, TopLevelSource { kind, function })?
        };
        map.add_function_body(id, body)?;
        stats.function_bodies += 1;
    }
    for id in snapshot.function_bodies.keys() {
        inflate_nested_body(map, snapshot, host, *id, 0, stats)?;
    }
    Ok(())
}

/// Inflates `id` after its parent chain, gated on what is already present.
fn inflate_nested_body<I: InflationHost>(
    map: &mut InflateMap<I>,
    snapshot: &HeapSnapshot,
    host: &mut I,
    id: PtrId,
    depth: usize,
    stats: &mut InflateStats,
) -> Result<(), InflationError> {
    if map.is_function_body_inflated(id) {
        return Ok(());
    }
    if depth > snapshot.function_bodies.len() {
        return Err(InflationError::ParentCycle { id });
    }
    let info = snapshot
        .function_bodies
        .get(&id)
        .ok_or_else(|| InflateError::MissingIdentity {
            category: InflateCategory::FunctionBody,
            id: id.raw(),
        })?;
    inflate_nested_body(map, snapshot, host, info.parent, depth + 1, stats)?;

    let body = if let Some(body) = map.find_reusable_function_body(id) {
        stats.reused_function_bodies += 1;
        body
    } else {
        let parent = map.lookup_function_body(info.parent)?.clone();
        host.resolve_nested_body(&parent, info)?
    };
    map.add_function_body(id, body)?;
    stats.function_bodies += 1;
    Ok(())
}

fn inflate_object_shells<I: InflationHost>(
    map: &mut InflateMap<I>,
    snapshot: &HeapSnapshot,
    host: &mut I,
    stats: &mut InflateStats,
) -> Result<(), InflationError> {
    for (id, object) in &snapshot.objects {
        // Globals arrive with their context.
        if map.is_object_inflated(*id) {
            continue;
        }
        let ty = map.lookup_type(object.type_id)?.clone();
        let reused = match map.find_reusable_object(*id) {
            Some(candidate) if host.can_reuse_object(&candidate, object) => {
                let dropped = host.reset_object_for_reuse(&candidate, &ty)?;
                map.property_reset_mut().extend(dropped);
                stats.reused_objects += 1;
                Some(candidate)
            }
            _ => None,
        };
        let live = if let Some(live) = reused {
            live
        } else {
            let body = match &object.kind {
                SnapObjectKind::ScriptFunction { body, .. } => {
                    Some(map.lookup_function_body(*body)?.clone())
                }
                _ => None,
            };
            host.allocate_object(&ty, object, body.as_ref())?
        };
        map.add_object(*id, live)?;
        stats.objects += 1;
    }
    Ok(())
}

fn resolve_or_undefined<I: InflationHost>(
    map: &InflateMap<I>,
    var: LoggedVar,
) -> Result<I::Value, InflateError> {
    Ok(map
        .inflate_logged_var(var)?
        .unwrap_or_else(|| I::inline_value(InlineValue::Undefined)))
}

fn wire<I: InflationHost>(
    map: &mut InflateMap<I>,
    snapshot: &HeapSnapshot,
    host: &mut I,
) -> Result<(), InflationError> {
    for (id, ty) in &snapshot.types {
        if let Some(prototype) = map.inflate_logged_var(ty.prototype)? {
            host.set_type_prototype(map.lookup_type(*id)?, &prototype)?;
        }
    }

    for (id, info) in &snapshot.slot_arrays {
        let slots = map.lookup_slot_array(*id)?;
        for (index, slot) in info.slots.iter().enumerate() {
            if let Some(value) = map.inflate_logged_var(slot.value)? {
                host.set_slot(slots, index, &value)?;
            }
        }
    }

    for (id, object) in &snapshot.objects {
        let live = map.lookup_object(*id)?.clone();
        for prop in &object.properties {
            if let Some(value) = map.inflate_logged_var(prop.value)? {
                host.set_property_value(&live, prop.pid, &value)?;
            }
        }
        match &object.kind {
            SnapObjectKind::Array { elements } => {
                for (index, element) in (0u32..).zip(elements) {
                    if let Some(value) = map.inflate_logged_var(*element)? {
                        host.set_element(&live, index, &value)?;
                    }
                }
            }
            SnapObjectKind::ScriptFunction {
                scope: Some(scope), ..
            } => {
                host.set_function_environment(&live, map.lookup_environment(*scope)?)?;
            }
            SnapObjectKind::Promise {
                status,
                result,
                reactions,
            } => {
                let mut live_reactions = Vec::with_capacity(reactions.len());
                for reaction_id in reactions {
                    if !map.is_promise_info_defined(*reaction_id) {
                        let reaction =
                            snapshot.promise_reactions.get(reaction_id).ok_or_else(|| {
                                InflateError::MissingIdentity {
                                    category: InflateCategory::PromiseInfo,
                                    id: reaction_id.raw(),
                                }
                            })?;
                        let handler = resolve_or_undefined(map, reaction.handler)?;
                        let capability = resolve_or_undefined(map, reaction.capability)?;
                        let record = host.create_promise_reaction(reaction, &handler, &capability)?;
                        map.add_promise_info(*reaction_id, record)?;
                    }
                    live_reactions
                        .push(map.lookup_promise_info::<I::PromiseReaction>(*reaction_id)?.clone());
                }
                let result = resolve_or_undefined(map, *result)?;
                host.set_promise_state(&live, *status, &result, &live_reactions)?;
            }
            SnapObjectKind::Plain
            | SnapObjectKind::External
            | SnapObjectKind::ArrayBuffer { .. }
            | SnapObjectKind::ScriptFunction { scope: None, .. }
            | SnapObjectKind::ExternalFunction { .. } => {}
        }
    }
    Ok(())
}
