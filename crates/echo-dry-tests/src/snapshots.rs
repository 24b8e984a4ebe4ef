// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! HeapSnapshot builder for tests.

use echo_replay::snapshot::{
    FunctionBodyInfo, FunctionScopeInfo, HeapSnapshot, PromiseStatus, ScopeKind, SlotArrayInfo,
    SnapContext, SnapHandler, SnapObject, SnapObjectKind, SnapPrimitive, SnapPrimitiveValue,
    SnapPromiseReaction, SnapPropertyEntry, SnapPropertyValue, SnapScope, SnapSlot, SnapType,
    TopLevelFunction,
};
use echo_replay::{ContextTag, LoadFlags, LoggedVar, PropertyId, PtrId};

/// Logged reference to the entity `id`.
pub fn ptr(id: u64) -> LoggedVar {
    LoggedVar::Ptr(PtrId(id))
}

fn props(properties: &[(u32, LoggedVar)]) -> Vec<SnapPropertyValue> {
    properties
        .iter()
        .map(|(pid, value)| SnapPropertyValue {
            pid: PropertyId(*pid),
            value: *value,
        })
        .collect()
}

/// Builder for [`HeapSnapshot`] fixtures.
///
/// Ids are raw integers so fixtures read like the snapshots they describe.
///
/// # Example
///
/// ```
/// use echo_dry_tests::{ptr, SnapshotBuilder};
/// use echo_replay::LoggedVar;
///
/// let snapshot = SnapshotBuilder::new()
///     .ty(10, 1, None, LoggedVar::Absent)
///     .context(1, 100, 10)
///     .object(200, 10, &[(7, ptr(100))])
///     .root(200)
///     .build();
/// assert_eq!(snapshot.objects.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    snapshot: HeapSnapshot,
}

impl SnapshotBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the event time the snapshot restores.
    pub fn restore_time(mut self, time: i64) -> Self {
        self.snapshot.restore_time = time;
        self
    }

    /// Adds a context and its plain global object of type `global_type`.
    pub fn context(mut self, tag: u64, global: u64, global_type: u64) -> Self {
        self.snapshot.contexts.push(SnapContext {
            tag: ContextTag(tag),
            global_object: PtrId(global),
        });
        self.object(global, global_type, &[])
    }

    /// Adds an embedder root.
    pub fn root(mut self, id: u64) -> Self {
        self.snapshot.roots.push(PtrId(id));
        self
    }

    /// Adds a type handler laying out `pids`.
    pub fn handler(mut self, id: u64, pids: &[u32]) -> Self {
        self.snapshot.handlers.insert(
            PtrId(id),
            SnapHandler {
                properties: pids
                    .iter()
                    .map(|pid| SnapPropertyEntry {
                        pid: PropertyId(*pid),
                        attributes: 0,
                    })
                    .collect(),
                extensible: true,
            },
        );
        self
    }

    /// Adds a type.
    pub fn ty(mut self, id: u64, context: u64, handler: Option<u64>, prototype: LoggedVar) -> Self {
        self.snapshot.types.insert(
            PtrId(id),
            SnapType {
                context: ContextTag(context),
                handler: handler.map(PtrId),
                prototype,
            },
        );
        self
    }

    /// Adds a boxed number.
    pub fn number(self, id: u64, context: u64, value: f64) -> Self {
        self.primitive(id, context, SnapPrimitive::Number(value))
    }

    /// Adds a string.
    pub fn string(self, id: u64, context: u64, value: &str) -> Self {
        self.primitive(id, context, SnapPrimitive::String(value.to_owned()))
    }

    fn primitive(mut self, id: u64, context: u64, value: SnapPrimitive) -> Self {
        self.snapshot.primitives.insert(
            PtrId(id),
            SnapPrimitiveValue {
                context: ContextTag(context),
                value,
            },
        );
        self
    }

    /// Adds a plain object with the given own properties.
    pub fn object(self, id: u64, ty: u64, properties: &[(u32, LoggedVar)]) -> Self {
        self.object_of_kind(id, ty, properties, SnapObjectKind::Plain)
    }

    /// Adds an array.
    pub fn array(self, id: u64, ty: u64, elements: &[LoggedVar]) -> Self {
        self.object_of_kind(
            id,
            ty,
            &[],
            SnapObjectKind::Array {
                elements: elements.to_vec(),
            },
        )
    }

    /// Adds a script function over `body`, optionally closing over `scope`.
    pub fn function(self, id: u64, ty: u64, body: u64, scope: Option<u64>) -> Self {
        self.object_of_kind(
            id,
            ty,
            &[],
            SnapObjectKind::ScriptFunction {
                body: PtrId(body),
                scope: scope.map(PtrId),
            },
        )
    }

    /// Adds a promise with the given reaction records.
    pub fn promise(
        self,
        id: u64,
        ty: u64,
        status: PromiseStatus,
        result: LoggedVar,
        reactions: &[u64],
    ) -> Self {
        self.object_of_kind(
            id,
            ty,
            &[],
            SnapObjectKind::Promise {
                status,
                result,
                reactions: reactions.iter().copied().map(PtrId).collect(),
            },
        )
    }

    /// Adds an object of any kind.
    pub fn object_of_kind(
        mut self,
        id: u64,
        ty: u64,
        properties: &[(u32, LoggedVar)],
        kind: SnapObjectKind,
    ) -> Self {
        self.snapshot.objects.insert(
            PtrId(id),
            SnapObject {
                type_id: PtrId(ty),
                properties: props(properties),
                kind,
            },
        );
        self
    }

    /// Adds a promise reaction record.
    pub fn reaction(mut self, id: u64, handler: LoggedVar, capability: LoggedVar) -> Self {
        self.snapshot
            .promise_reactions
            .insert(PtrId(id), SnapPromiseReaction { handler, capability });
        self
    }

    /// Adds a slot array.
    pub fn slot_array(mut self, id: u64, body: Option<u64>, slots: &[(u32, LoggedVar)]) -> Self {
        self.snapshot.slot_arrays.insert(
            PtrId(id),
            SlotArrayInfo {
                function_body: body.map(PtrId),
                slots: slots
                    .iter()
                    .map(|(pid, value)| SnapSlot {
                        pid: PropertyId(*pid),
                        value: *value,
                    })
                    .collect(),
            },
        );
        self
    }

    /// Adds a closure scope descriptor, innermost scope first.
    pub fn scope(mut self, id: u64, scopes: &[(ScopeKind, u64)]) -> Self {
        self.snapshot.scope_infos.insert(
            PtrId(id),
            FunctionScopeInfo {
                scopes: scopes
                    .iter()
                    .map(|(kind, id)| SnapScope {
                        kind: *kind,
                        id: PtrId(*id),
                    })
                    .collect(),
            },
        );
        self
    }

    /// Adds a top-level function produced by a script load.
    pub fn top_level_load(mut self, id: u64, body_counter_id: u32, context: u64, source: &str) -> Self {
        self.snapshot.top_level_load.insert(
            PtrId(id),
            TopLevelFunction {
                body_counter_id,
                context: ContextTag(context),
                source: source.to_owned(),
                uri: format!("script{body_counter_id}.js"),
                document_id: u64::from(body_counter_id),
                load_flags: LoadFlags::GLOBAL_CODE,
                is_strict: false,
            },
        );
        self
    }

    /// Adds a nested function body.
    pub fn function_body(mut self, id: u64, name: &str, parent: u64) -> Self {
        self.snapshot.function_bodies.insert(
            PtrId(id),
            FunctionBodyInfo {
                name: name.to_owned(),
                parent: PtrId(parent),
                line: 0,
                column: 0,
            },
        );
        self
    }

    /// Finishes the snapshot.
    pub fn build(self) -> HeapSnapshot {
        self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_adds_its_global_object() {
        let snapshot = SnapshotBuilder::new()
            .ty(10, 1, None, LoggedVar::Absent)
            .context(1, 100, 10)
            .build();
        assert_eq!(snapshot.contexts.len(), 1);
        assert!(snapshot.objects.contains_key(&PtrId(100)));
    }
}
