// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory host runtime fake.
//!
//! Values are `Rc<RefCell<_>>` objects and every allocation is tracked by a
//! weak reference, so tests can observe whether the inflate map's pins kept
//! something alive. Script functions don't run code: each one follows a
//! [`Behaviour`] looked up by function name.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use echo_replay::host::{
    HostFault, HostResult, HostRuntime, HostTypes, InflationHost, ScopeBinding, ScriptLoad,
    TopLevelSource,
};
use echo_replay::snapshot::{
    FunctionBodyInfo, PromiseStatus, SnapContext, SnapHandler, SnapObject, SnapObjectKind,
    SnapPrimitive, SnapPromiseReaction, SnapType,
};
use echo_replay::{
    AbortRequest, ContextTag, Conversion, InlineValue, PropertyId, PtrId, SourceLocation,
};
use rustc_hash::{FxHashMap, FxHashSet};

/// Property id descriptors keep their `value` under.
pub const VALUE_PID: PropertyId = PropertyId(0);

/// Shared handle to a fake heap object.
pub type ObjectRef = Rc<RefCell<FakeObject>>;

/// Script value of the fake host.
#[derive(Clone)]
pub enum FakeValue {
    /// `undefined`.
    Undefined,
    /// `null`.
    Null,
    /// Boolean.
    Bool(bool),
    /// Small integer.
    Int(i32),
    /// Heap object.
    Ref(ObjectRef),
}

impl FakeValue {
    /// Heap object behind this value, if any.
    pub fn object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Ref(obj) => Some(obj),
            _ => None,
        }
    }

    /// Allocation serial of the heap object, if any.
    pub fn serial(&self) -> Option<u64> {
        self.object().map(|obj| obj.borrow().serial)
    }

    /// Kind of the heap object, if any.
    pub fn kind(&self) -> Option<FakeKind> {
        self.object().map(|obj| obj.borrow().kind.clone())
    }

    /// Own property of the heap object.
    pub fn property(&self, pid: PropertyId) -> Option<FakeValue> {
        self.object()
            .and_then(|obj| obj.borrow().properties.get(&pid).cloned())
    }

    fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Ref(_) => true,
        }
    }
}

impl fmt::Debug for FakeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(i) => write!(f, "Int({i})"),
            Self::Ref(obj) => {
                let borrowed = obj.try_borrow();
                if let Ok(o) = borrowed {
                    write!(f, "Ref(#{} {:?})", o.serial, o.kind)
                } else {
                    f.write_str("Ref(<borrowed>)")
                }
            }
        }
    }
}

/// What a fake heap object is.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeKind {
    /// Ordinary object.
    Plain,
    /// Embedder-owned object.
    External,
    /// Global object of a context.
    Global(ContextTag),
    /// Boxed number.
    Number(f64),
    /// String.
    String(String),
    /// Symbol.
    Symbol(Option<String>),
    /// Array; elements live in [`FakeObject::elements`].
    Array,
    /// Array buffer.
    ArrayBuffer(Vec<u8>),
    /// Function, named for [`Behaviour`] lookup.
    Function {
        /// Function name.
        name: Option<String>,
    },
    /// Promise; state lives in [`FakeObject::promise`].
    Promise,
    /// Error object carrying a message.
    Error(String),
}

impl FakeKind {
    fn reusable_as(&self, snap: &SnapObjectKind) -> bool {
        matches!(
            (self, snap),
            (Self::Plain, SnapObjectKind::Plain)
                | (Self::External, SnapObjectKind::External)
                | (Self::Array, SnapObjectKind::Array { .. })
                | (Self::ArrayBuffer(_), SnapObjectKind::ArrayBuffer { .. })
        )
    }
}

/// Object type of the fake host.
#[derive(Debug)]
pub struct FakeType {
    /// Owning context.
    pub context: ContextTag,
    /// Property layout.
    pub handler: Option<Rc<SnapHandler>>,
    /// Prototype, once wired.
    pub prototype: RefCell<Option<FakeValue>>,
}

/// Context of the fake host.
#[derive(Debug)]
pub struct FakeContext {
    /// Context tag.
    pub tag: ContextTag,
    /// Global object.
    pub global: FakeValue,
}

/// Function body of the fake host.
#[derive(Debug, PartialEq)]
pub struct FakeBody {
    /// Body name (the uri for top-level bodies).
    pub name: String,
    /// Body counter id of top-level bodies.
    pub body_counter_id: Option<u32>,
    /// Enclosing body.
    pub parent: Option<Rc<FakeBody>>,
}

/// Captured-variable slots of the fake host.
pub type FakeSlots = Rc<RefCell<Vec<FakeValue>>>;

/// One scope of a fake closure environment.
#[derive(Debug, Clone)]
pub enum FakeScope {
    /// Slot array.
    Slots(FakeSlots),
    /// Activation or `with` object.
    Object(FakeValue),
}

/// Promise reaction of the fake host.
#[derive(Debug)]
pub struct FakeReaction {
    /// Reaction handler.
    pub handler: FakeValue,
    /// Derived promise capability.
    pub capability: FakeValue,
}

/// Settled or pending promise state.
#[derive(Debug, Clone)]
pub struct FakePromise {
    /// Settlement state.
    pub status: PromiseStatus,
    /// Value or reason.
    pub result: FakeValue,
    /// Pending reactions.
    pub reactions: Vec<Rc<FakeReaction>>,
}

/// Heap object of the fake host.
#[derive(Debug)]
pub struct FakeObject {
    /// Allocation serial, unique per runtime.
    pub serial: u64,
    /// What the object is.
    pub kind: FakeKind,
    /// Own properties.
    pub properties: BTreeMap<PropertyId, FakeValue>,
    /// Array elements.
    pub elements: Vec<FakeValue>,
    /// Prototype.
    pub prototype: Option<FakeValue>,
    /// Object type set by inflation.
    pub ty: Option<Rc<FakeType>>,
    /// Function body of script functions.
    pub body: Option<Rc<FakeBody>>,
    /// Closure environment of script functions.
    pub environment: Option<Rc<Vec<FakeScope>>>,
    /// Promise state.
    pub promise: Option<FakePromise>,
}

impl FakeObject {
    fn new(serial: u64, kind: FakeKind) -> Self {
        Self {
            serial,
            kind,
            properties: BTreeMap::new(),
            elements: Vec::new(),
            prototype: None,
            ty: None,
            body: None,
            environment: None,
            promise: None,
        }
    }

    fn function_name(&self) -> Option<String> {
        match &self.kind {
            FakeKind::Function { name } => Some(name.clone().unwrap_or_default()),
            _ => None,
        }
    }
}

/// What a fake function does when called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Returns `undefined`.
    Undefined,
    /// Returns a fixed integer.
    Int(i32),
    /// Returns its first argument.
    FirstArg,
    /// Returns a fresh plain object.
    NewObject,
    /// Throws an error object.
    Throw,
    /// Terminates script execution.
    Terminate,
    /// Signals a debugger abort.
    Abort(AbortRequest),
    /// Fails to allocate.
    OutOfMemory,
}

/// In-memory host runtime.
#[derive(Default)]
pub struct FakeRuntime {
    next_serial: u64,
    tracked: Vec<Weak<RefCell<FakeObject>>>,
    contexts: FxHashMap<ContextTag, Rc<FakeContext>>,
    behaviours: FxHashMap<String, Behaviour>,
    pending_exception: Option<FakeValue>,
    roots: FxHashMap<PtrId, FakeValue>,
    out_of_memory: bool,
    top_level_time: i64,
    steps: u32,
    last_location: Option<SourceLocation>,
    /// `(top-level event time, host callback id)` of every call-stack reset.
    pub resets: Vec<(i64, i64)>,
    /// Number of function invocations.
    pub calls: usize,
    /// Source text of every compiled top-level body.
    pub loaded_sources: Vec<String>,
    /// Property ids whose caches were invalidated.
    pub invalidated: usize,
}

impl FakeRuntime {
    /// Creates an empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets what functions named `name` do.
    pub fn set_behaviour(&mut self, name: &str, behaviour: Behaviour) {
        self.behaviours.insert(name.to_owned(), behaviour);
    }

    /// Makes every allocation fail with [`HostFault::OutOfMemory`].
    pub fn set_out_of_memory(&mut self, enabled: bool) {
        self.out_of_memory = enabled;
    }

    /// Objects allocated by this runtime that are still reachable.
    pub fn live_objects(&self) -> usize {
        self.tracked.iter().filter(|w| w.strong_count() > 0).count()
    }

    /// Value retained under `id`.
    pub fn root(&self, id: PtrId) -> Option<&FakeValue> {
        self.roots.get(&id)
    }

    /// Pending script exception, without clearing it.
    pub fn pending_exception(&self) -> Option<&FakeValue> {
        self.pending_exception.as_ref()
    }

    /// Allocates a string value outside any action.
    pub fn string(&mut self, text: &str) -> FakeValue {
        self.alloc(FakeKind::String(text.to_owned()))
    }

    /// Allocates a named function outside any action.
    pub fn function(&mut self, name: &str) -> FakeValue {
        self.alloc(FakeKind::Function {
            name: Some(name.to_owned()),
        })
    }

    fn alloc(&mut self, kind: FakeKind) -> FakeValue {
        self.next_serial += 1;
        let obj = Rc::new(RefCell::new(FakeObject::new(self.next_serial, kind)));
        self.tracked.push(Rc::downgrade(&obj));
        FakeValue::Ref(obj)
    }

    fn allocate(&mut self, kind: FakeKind) -> HostResult<FakeValue> {
        if self.out_of_memory {
            return Err(HostFault::OutOfMemory);
        }
        Ok(self.alloc(kind))
    }

    fn throw(&mut self, message: impl Into<String>) -> HostFault {
        let error = self.alloc(FakeKind::Error(message.into()));
        self.pending_exception = Some(error);
        HostFault::ScriptException
    }

    fn object_of(&mut self, value: &FakeValue) -> HostResult<ObjectRef> {
        match value {
            FakeValue::Ref(obj) => Ok(Rc::clone(obj)),
            _ => Err(self.throw("not an object")),
        }
    }

    fn location(&self) -> SourceLocation {
        SourceLocation {
            top_level_time: self.top_level_time,
            event_time: self.top_level_time,
            line: self.steps,
            column: 0,
        }
    }

    fn invoke(
        &mut self,
        callee: &FakeValue,
        args: &[FakeValue],
        construct: bool,
    ) -> HostResult<FakeValue> {
        let name = callee
            .object()
            .and_then(|obj| obj.borrow().function_name());
        let Some(name) = name else {
            return Err(self.throw("callee is not a function"));
        };
        self.calls += 1;
        self.steps += 1;
        self.last_location = Some(self.location());
        let default = if construct {
            Behaviour::NewObject
        } else {
            Behaviour::Undefined
        };
        match self.behaviours.get(&name).copied().unwrap_or(default) {
            Behaviour::Undefined => Ok(FakeValue::Undefined),
            Behaviour::Int(i) => Ok(FakeValue::Int(i)),
            Behaviour::FirstArg => Ok(args.first().cloned().unwrap_or(FakeValue::Undefined)),
            Behaviour::NewObject => self.allocate(FakeKind::Plain),
            Behaviour::Throw => Err(self.throw(format!("{name} threw"))),
            Behaviour::Terminate => Err(HostFault::Terminated),
            Behaviour::Abort(request) => Err(HostFault::DebuggerAbort(request)),
            Behaviour::OutOfMemory => Err(HostFault::OutOfMemory),
        }
    }

    fn text_of(value: &FakeValue) -> Option<String> {
        let obj = value.object()?;
        let o = obj.borrow();
        if let FakeKind::String(s) = &o.kind {
            Some(s.clone())
        } else {
            None
        }
    }
}

impl HostTypes for FakeRuntime {
    type Value = FakeValue;
    type Handler = Rc<SnapHandler>;
    type Type = Rc<FakeType>;
    type Context = Rc<FakeContext>;
    type FunctionBody = Rc<FakeBody>;
    type Environment = Rc<Vec<FakeScope>>;
    type SlotArray = FakeSlots;

    fn inline_value(value: InlineValue) -> FakeValue {
        match value {
            InlineValue::Undefined => FakeValue::Undefined,
            InlineValue::Null => FakeValue::Null,
            InlineValue::Bool(b) => FakeValue::Bool(b),
            InlineValue::Int(i) => FakeValue::Int(i),
        }
    }

    fn as_inline(value: &FakeValue) -> Option<InlineValue> {
        match value {
            FakeValue::Undefined => Some(InlineValue::Undefined),
            FakeValue::Null => Some(InlineValue::Null),
            FakeValue::Bool(b) => Some(InlineValue::Bool(*b)),
            FakeValue::Int(i) => Some(InlineValue::Int(*i)),
            FakeValue::Ref(_) => None,
        }
    }

    fn same_value(a: &FakeValue, b: &FakeValue) -> bool {
        match (a, b) {
            (FakeValue::Ref(x), FakeValue::Ref(y)) => Rc::ptr_eq(x, y),
            (FakeValue::Ref(_), _) | (_, FakeValue::Ref(_)) => false,
            _ => Self::as_inline(a) == Self::as_inline(b),
        }
    }
}

impl HostRuntime for FakeRuntime {
    fn create_number(&mut self, value: f64) -> HostResult<FakeValue> {
        self.allocate(FakeKind::Number(value))
    }

    fn create_string(&mut self, text: &str) -> HostResult<FakeValue> {
        self.allocate(FakeKind::String(text.to_owned()))
    }

    fn create_symbol(&mut self, description: &FakeValue) -> HostResult<FakeValue> {
        let description = Self::text_of(description);
        self.allocate(FakeKind::Symbol(description))
    }

    fn convert(&mut self, to: Conversion, value: &FakeValue) -> HostResult<FakeValue> {
        match to {
            Conversion::ToBoolean => Ok(FakeValue::Bool(value.truthy())),
            Conversion::ToNumber => match value {
                FakeValue::Int(_) => Ok(value.clone()),
                FakeValue::Bool(b) => Ok(FakeValue::Int(i32::from(*b))),
                FakeValue::Null => Ok(FakeValue::Int(0)),
                FakeValue::Ref(_) if matches!(value.kind(), Some(FakeKind::Number(_))) => {
                    Ok(value.clone())
                }
                _ => self.allocate(FakeKind::Number(f64::NAN)),
            },
            Conversion::ToString => {
                let text = Self::text_of(value).unwrap_or_else(|| format!("{value:?}"));
                self.allocate(FakeKind::String(text))
            }
            Conversion::ToObject => match value {
                FakeValue::Ref(_) => Ok(value.clone()),
                FakeValue::Undefined | FakeValue::Null => {
                    Err(self.throw("cannot convert undefined or null to object"))
                }
                _ => self.allocate(FakeKind::Plain),
            },
        }
    }

    fn add_root_ref(&mut self, id: PtrId, value: &FakeValue) -> HostResult<()> {
        self.roots.insert(id, value.clone());
        Ok(())
    }

    fn remove_root_ref(&mut self, id: PtrId, _value: &FakeValue) -> HostResult<()> {
        self.roots.remove(&id);
        Ok(())
    }

    fn allocate_object(&mut self, external: bool) -> HostResult<FakeValue> {
        self.allocate(if external {
            FakeKind::External
        } else {
            FakeKind::Plain
        })
    }

    fn allocate_array(&mut self, length: u32) -> HostResult<FakeValue> {
        let len = usize::try_from(length).map_err(|_| HostFault::OutOfMemory)?;
        let array = self.allocate(FakeKind::Array)?;
        if let Some(obj) = array.object() {
            obj.borrow_mut().elements = vec![FakeValue::Undefined; len];
        }
        Ok(array)
    }

    fn allocate_array_buffer(&mut self, length: u32) -> HostResult<FakeValue> {
        let len = usize::try_from(length).map_err(|_| HostFault::OutOfMemory)?;
        self.allocate(FakeKind::ArrayBuffer(vec![0; len]))
    }

    fn allocate_external_array_buffer(&mut self, bytes: &[u8]) -> HostResult<FakeValue> {
        self.allocate(FakeKind::ArrayBuffer(bytes.to_vec()))
    }

    fn allocate_function(&mut self, name: Option<&FakeValue>) -> HostResult<FakeValue> {
        let name = name.and_then(Self::text_of);
        self.allocate(FakeKind::Function { name })
    }

    fn get_property(&mut self, object: &FakeValue, pid: PropertyId) -> HostResult<FakeValue> {
        let mut current = FakeValue::Ref(self.object_of(object)?);
        loop {
            let FakeValue::Ref(obj) = current else {
                return Ok(FakeValue::Undefined);
            };
            let next = {
                let o = obj.borrow();
                if let Some(value) = o.properties.get(&pid) {
                    return Ok(value.clone());
                }
                o.prototype.clone()
            };
            current = next.unwrap_or(FakeValue::Undefined);
        }
    }

    fn get_index(&mut self, object: &FakeValue, index: &FakeValue) -> HostResult<FakeValue> {
        let obj = self.object_of(object)?;
        let index = match index {
            FakeValue::Int(i) => usize::try_from(*i).ok(),
            _ => None,
        };
        let o = obj.borrow();
        Ok(index
            .and_then(|i| o.elements.get(i).cloned())
            .unwrap_or(FakeValue::Undefined))
    }

    fn get_own_property_info(
        &mut self,
        object: &FakeValue,
        pid: PropertyId,
    ) -> HostResult<FakeValue> {
        let obj = self.object_of(object)?;
        let value = obj.borrow().properties.get(&pid).cloned();
        let Some(value) = value else {
            return Ok(FakeValue::Undefined);
        };
        let descriptor = self.allocate(FakeKind::Plain)?;
        if let Some(d) = descriptor.object() {
            d.borrow_mut().properties.insert(VALUE_PID, value);
        }
        Ok(descriptor)
    }

    fn get_own_property_keys(&mut self, object: &FakeValue, symbols: bool) -> HostResult<FakeValue> {
        let obj = self.object_of(object)?;
        let keys: Vec<PropertyId> = if symbols {
            Vec::new()
        } else {
            obj.borrow().properties.keys().copied().collect()
        };
        let array = self.allocate(FakeKind::Array)?;
        let mut elements = Vec::with_capacity(keys.len());
        for pid in keys {
            elements.push(self.allocate(FakeKind::String(pid.0.to_string()))?);
        }
        if let Some(a) = array.object() {
            a.borrow_mut().elements = elements;
        }
        Ok(array)
    }

    fn define_property(
        &mut self,
        object: &FakeValue,
        pid: PropertyId,
        descriptor: &FakeValue,
    ) -> HostResult<FakeValue> {
        let obj = self.object_of(object)?;
        let value = descriptor
            .property(VALUE_PID)
            .unwrap_or(FakeValue::Undefined);
        obj.borrow_mut().properties.insert(pid, value);
        Ok(FakeValue::Bool(true))
    }

    fn delete_property(
        &mut self,
        object: &FakeValue,
        pid: PropertyId,
        _strict: bool,
    ) -> HostResult<FakeValue> {
        let obj = self.object_of(object)?;
        let removed = obj.borrow_mut().properties.remove(&pid).is_some();
        Ok(FakeValue::Bool(removed))
    }

    fn set_prototype(&mut self, object: &FakeValue, prototype: &FakeValue) -> HostResult<()> {
        let obj = self.object_of(object)?;
        obj.borrow_mut().prototype = Some(prototype.clone());
        Ok(())
    }

    fn set_property(
        &mut self,
        object: &FakeValue,
        pid: PropertyId,
        value: &FakeValue,
        _strict: bool,
    ) -> HostResult<()> {
        let obj = self.object_of(object)?;
        obj.borrow_mut().properties.insert(pid, value.clone());
        Ok(())
    }

    fn set_index(
        &mut self,
        object: &FakeValue,
        index: &FakeValue,
        value: &FakeValue,
    ) -> HostResult<()> {
        let obj = self.object_of(object)?;
        let Some(index) = (match index {
            FakeValue::Int(i) => usize::try_from(*i).ok(),
            _ => None,
        }) else {
            return Err(self.throw("invalid index"));
        };
        let mut o = obj.borrow_mut();
        if o.elements.len() <= index {
            o.elements.resize(index + 1, FakeValue::Undefined);
        }
        o.elements[index] = value.clone();
        Ok(())
    }

    fn typed_array_buffer(&mut self, object: &FakeValue) -> HostResult<FakeValue> {
        if matches!(object.kind(), Some(FakeKind::ArrayBuffer(_))) {
            Ok(object.clone())
        } else {
            Err(self.throw("not a typed array"))
        }
    }

    fn construct(&mut self, callee: &FakeValue, args: &[FakeValue]) -> HostResult<FakeValue> {
        self.invoke(callee, args, true)
    }

    fn call_function(&mut self, callee: &FakeValue, args: &[FakeValue]) -> HostResult<FakeValue> {
        self.invoke(callee, args, false)
    }

    fn reset_call_stack_for_top_level_call(
        &mut self,
        top_level_callback_event_time: i64,
        host_callback_id: i64,
    ) {
        self.resets
            .push((top_level_callback_event_time, host_callback_id));
        self.top_level_time = top_level_callback_event_time;
        self.steps = 0;
    }

    fn take_script_exception(&mut self) -> Option<FakeValue> {
        self.pending_exception.take()
    }

    fn pending_termination_error(&mut self) -> FakeValue {
        self.alloc(FakeKind::Error("terminated".to_owned()))
    }

    fn load_script(&mut self, load: &ScriptLoad<'_>) -> HostResult<FakeValue> {
        let function = self.allocate(FakeKind::Function {
            name: Some(load.uri.to_owned()),
        })?;
        if let Some(obj) = function.object() {
            obj.borrow_mut().body = Some(Rc::new(FakeBody {
                name: load.uri.to_owned(),
                body_counter_id: Some(load.body_counter_id),
                parent: None,
            }));
        }
        self.loaded_sources.push(load.source.to_owned());
        Ok(function)
    }

    fn current_source_location(&mut self) -> SourceLocation {
        self.location()
    }

    fn last_executed_location(&mut self) -> Option<SourceLocation> {
        self.last_location
    }
}

impl InflationHost for FakeRuntime {
    type PromiseReaction = Rc<FakeReaction>;

    fn context_for_tag(
        &mut self,
        context: &SnapContext,
    ) -> HostResult<(Rc<FakeContext>, FakeValue)> {
        if let Some(existing) = self.contexts.get(&context.tag) {
            return Ok((Rc::clone(existing), existing.global.clone()));
        }
        let global = self.allocate(FakeKind::Global(context.tag))?;
        let created = Rc::new(FakeContext {
            tag: context.tag,
            global: global.clone(),
        });
        self.contexts.insert(context.tag, Rc::clone(&created));
        Ok((created, global))
    }

    fn create_handler(&mut self, handler: &SnapHandler) -> HostResult<Rc<SnapHandler>> {
        Ok(Rc::new(handler.clone()))
    }

    fn create_type(
        &mut self,
        context: &Rc<FakeContext>,
        handler: Option<&Rc<SnapHandler>>,
        _ty: &SnapType,
    ) -> HostResult<Rc<FakeType>> {
        Ok(Rc::new(FakeType {
            context: context.tag,
            handler: handler.cloned(),
            prototype: RefCell::new(None),
        }))
    }

    fn set_type_prototype(&mut self, ty: &Rc<FakeType>, prototype: &FakeValue) -> HostResult<()> {
        *ty.prototype.borrow_mut() = Some(prototype.clone());
        Ok(())
    }

    fn load_top_level_body(
        &mut self,
        _context: &Rc<FakeContext>,
        source: TopLevelSource<'_>,
    ) -> HostResult<Rc<FakeBody>> {
        self.loaded_sources.push(source.function.source.clone());
        Ok(Rc::new(FakeBody {
            name: source.function.uri.clone(),
            body_counter_id: Some(source.function.body_counter_id),
            parent: None,
        }))
    }

    fn resolve_nested_body(
        &mut self,
        parent: &Rc<FakeBody>,
        info: &FunctionBodyInfo,
    ) -> HostResult<Rc<FakeBody>> {
        Ok(Rc::new(FakeBody {
            name: info.name.clone(),
            body_counter_id: None,
            parent: Some(Rc::clone(parent)),
        }))
    }

    fn create_primitive(
        &mut self,
        _context: &Rc<FakeContext>,
        value: &SnapPrimitive,
    ) -> HostResult<FakeValue> {
        self.allocate(match value {
            SnapPrimitive::Number(n) => FakeKind::Number(*n),
            SnapPrimitive::String(s) => FakeKind::String(s.clone()),
            SnapPrimitive::Symbol { description } => FakeKind::Symbol(description.clone()),
        })
    }

    fn create_slot_array(
        &mut self,
        _body: Option<&Rc<FakeBody>>,
        len: usize,
    ) -> HostResult<FakeSlots> {
        Ok(Rc::new(RefCell::new(vec![FakeValue::Undefined; len])))
    }

    fn set_slot(&mut self, slots: &FakeSlots, index: usize, value: &FakeValue) -> HostResult<()> {
        let mut slots = slots.borrow_mut();
        if let Some(slot) = slots.get_mut(index) {
            *slot = value.clone();
        }
        Ok(())
    }

    fn create_environment(
        &mut self,
        scopes: &[ScopeBinding<'_, Self>],
    ) -> HostResult<Rc<Vec<FakeScope>>> {
        Ok(Rc::new(
            scopes
                .iter()
                .map(|scope| match scope {
                    ScopeBinding::Slots(slots) => FakeScope::Slots(Rc::clone(slots)),
                    ScopeBinding::Object(value) => FakeScope::Object((*value).clone()),
                })
                .collect(),
        ))
    }

    fn allocate_object(
        &mut self,
        ty: &Rc<FakeType>,
        object: &SnapObject,
        body: Option<&Rc<FakeBody>>,
    ) -> HostResult<FakeValue> {
        let (kind, len) = match &object.kind {
            SnapObjectKind::Plain => (FakeKind::Plain, 0),
            SnapObjectKind::External => (FakeKind::External, 0),
            SnapObjectKind::Array { elements } => (FakeKind::Array, elements.len()),
            SnapObjectKind::ArrayBuffer { bytes } => (FakeKind::ArrayBuffer(bytes.clone()), 0),
            SnapObjectKind::ScriptFunction { .. } => (
                FakeKind::Function {
                    name: body.map(|b| b.name.clone()),
                },
                0,
            ),
            SnapObjectKind::ExternalFunction { .. } => (FakeKind::Function { name: None }, 0),
            SnapObjectKind::Promise { .. } => (FakeKind::Promise, 0),
        };
        let value = self.allocate(kind)?;
        if let Some(obj) = value.object() {
            let mut o = obj.borrow_mut();
            o.elements = vec![FakeValue::Undefined; len];
            o.ty = Some(Rc::clone(ty));
            o.body = body.cloned();
        }
        Ok(value)
    }

    fn can_reuse_object(&mut self, candidate: &FakeValue, object: &SnapObject) -> bool {
        candidate
            .kind()
            .is_some_and(|kind| kind.reusable_as(&object.kind))
    }

    fn reset_object_for_reuse(
        &mut self,
        candidate: &FakeValue,
        ty: &Rc<FakeType>,
    ) -> HostResult<Vec<PropertyId>> {
        let obj = self.object_of(candidate)?;
        let mut o = obj.borrow_mut();
        let dropped = o.properties.keys().copied().collect();
        o.properties.clear();
        o.elements.clear();
        o.prototype = None;
        o.ty = Some(Rc::clone(ty));
        Ok(dropped)
    }

    fn set_function_environment(
        &mut self,
        function: &FakeValue,
        environment: &Rc<Vec<FakeScope>>,
    ) -> HostResult<()> {
        let obj = self.object_of(function)?;
        obj.borrow_mut().environment = Some(Rc::clone(environment));
        Ok(())
    }

    fn set_property_value(
        &mut self,
        object: &FakeValue,
        pid: PropertyId,
        value: &FakeValue,
    ) -> HostResult<()> {
        let obj = self.object_of(object)?;
        obj.borrow_mut().properties.insert(pid, value.clone());
        Ok(())
    }

    fn set_element(&mut self, array: &FakeValue, index: u32, value: &FakeValue) -> HostResult<()> {
        let index = usize::try_from(index).map_err(|_| HostFault::OutOfMemory)?;
        let obj = self.object_of(array)?;
        let mut o = obj.borrow_mut();
        if o.elements.len() <= index {
            o.elements.resize(index + 1, FakeValue::Undefined);
        }
        o.elements[index] = value.clone();
        Ok(())
    }

    fn create_promise_reaction(
        &mut self,
        _reaction: &SnapPromiseReaction,
        handler: &FakeValue,
        capability: &FakeValue,
    ) -> HostResult<Rc<FakeReaction>> {
        Ok(Rc::new(FakeReaction {
            handler: handler.clone(),
            capability: capability.clone(),
        }))
    }

    fn set_promise_state(
        &mut self,
        promise: &FakeValue,
        status: PromiseStatus,
        result: &FakeValue,
        reactions: &[Rc<FakeReaction>],
    ) -> HostResult<()> {
        let obj = self.object_of(promise)?;
        obj.borrow_mut().promise = Some(FakePromise {
            status,
            result: result.clone(),
            reactions: reactions.to_vec(),
        });
        Ok(())
    }

    fn retain_root(&mut self, id: PtrId, value: &FakeValue) -> HostResult<()> {
        self.roots.insert(id, value.clone());
        Ok(())
    }

    fn invalidate_property_caches(&mut self, pids: &FxHashSet<PropertyId>) {
        self.invalidated += pids.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_value_is_identity_for_objects() {
        let mut rt = FakeRuntime::new();
        let a = rt.string("x");
        let b = rt.string("x");
        assert!(FakeRuntime::same_value(&a, &a.clone()));
        assert!(!FakeRuntime::same_value(&a, &b));
        assert!(FakeRuntime::same_value(&FakeValue::Int(3), &FakeValue::Int(3)));
    }

    #[test]
    fn throwing_function_leaves_pending_exception() {
        let mut rt = FakeRuntime::new();
        rt.set_behaviour("boom", Behaviour::Throw);
        let f = rt.function("boom");
        let err = rt.call_function(&f, &[]).err();
        assert_eq!(err, Some(HostFault::ScriptException));
        assert!(rt.pending_exception().is_some());
        assert!(rt.take_script_exception().is_some());
        assert!(rt.pending_exception().is_none());
    }

    #[test]
    fn live_objects_follow_strong_references() {
        let mut rt = FakeRuntime::new();
        let kept = rt.string("kept");
        drop(rt.string("dropped"));
        assert_eq!(rt.live_objects(), 1);
        drop(kept);
        assert_eq!(rt.live_objects(), 0);
    }
}
