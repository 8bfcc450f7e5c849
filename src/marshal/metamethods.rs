//! Metatable handlers backing the scripted object model.
//!
//! Three metatables are installed per engine instance: one for host objects,
//! one for imported type tokens and one for the binding userdata captured as
//! a closure upvalue when a member group is read. All userdata carry a single
//! 8-byte handle into the process-wide pin table; the `__gc` finalizer is the
//! sole releaser of that handle.
//!
//! Every handler runs host code behind `catch_unwind` and converts failures
//! into ordinary engine errors. Owned values are dropped before the error is
//! raised, since raising does not return.

use crate::descriptor::{
    self, EventDescriptor, MemberSet, MethodDescriptor, Operator, TypeDescriptor, resolver,
};
use crate::error::{LuaError, LuaResult};
use crate::marshal::handles::{self, Handle, Pinned};
use crate::marshal::{Marshal, of_state};
use crate::types::value::{HostObject, Value};
use luahost_sys as ffi;
use std::any::TypeId;
use std::ffi::{CStr, CString};
use std::os::raw::c_int;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

const OBJECT_MT: &CStr = c"luahost.object";
const TYPE_MT: &CStr = c"luahost.type";
const BINDING_MT: &CStr = c"luahost.binding";

const MAX_ANCESTRY: usize = 64;

/// A member group captured when a script reads a callable member. Pinned in
/// the handle table and referenced by the closure's upvalue userdata.
pub enum Binding {
    /// A method overload group, optionally bound to a receiver.
    Methods {
        receiver: Option<HostObject>,
        type_id: TypeId,
        name: String,
    },
    /// An event; calling the closure with a function subscribes it.
    Event {
        receiver: HostObject,
        event: EventDescriptor,
    },
}

/// Install the metatables and the `import` bootstrap into a fresh state.
///
/// # Safety
///
/// `state` must be a freshly created main state.
pub(crate) unsafe fn install(state: *mut ffi::lua_State) {
    unsafe {
        ffi::luaL_newmetatable(state, OBJECT_MT.as_ptr());
        set_handler(state, c"__index", object_index_entry);
        set_handler(state, c"__newindex", object_newindex_entry);
        set_handler(state, c"__add", object_add_entry);
        set_handler(state, c"__sub", object_sub_entry);
        set_handler(state, c"__mul", object_mul_entry);
        set_handler(state, c"__div", object_div_entry);
        set_handler(state, c"__gc", finalize_entry);
        set_handler(state, c"__tostring", object_tostring_entry);
        ffi::lua_pop(state, 1);

        ffi::luaL_newmetatable(state, TYPE_MT.as_ptr());
        set_handler(state, c"__call", type_call_entry);
        set_handler(state, c"__index", type_index_entry);
        set_handler(state, c"__newindex", type_newindex_entry);
        set_handler(state, c"__gc", finalize_entry);
        set_handler(state, c"__tostring", type_tostring_entry);
        ffi::lua_pop(state, 1);

        ffi::luaL_newmetatable(state, BINDING_MT.as_ptr());
        set_handler(state, c"__gc", finalize_entry);
        ffi::lua_pop(state, 1);

        ffi::lua_pushcfunction(state, import_entry);
        ffi::lua_setglobal(state, c"import".as_ptr());
    }
}

unsafe fn set_handler(state: *mut ffi::lua_State, name: &CStr, handler: ffi::lua_CFunction) {
    unsafe {
        ffi::lua_pushcfunction(state, handler);
        ffi::lua_setfield(state, -2, name.as_ptr());
    }
}

// ---------------------------------------------------------------------------
// Userdata plumbing.
// ---------------------------------------------------------------------------

unsafe fn push_handle(state: *mut ffi::lua_State, handle: Handle, metatable: &CStr) {
    unsafe {
        let slot = ffi::lua_newuserdatauv(state, size_of::<Handle>(), 0) as *mut Handle;
        slot.write(handle);
        ffi::luaL_setmetatable(state, metatable.as_ptr());
    }
}

/// Pin `object` and push it as opaque userdata.
///
/// # Safety
///
/// `state` must be live with room for one slot.
pub(crate) unsafe fn push_object(state: *mut ffi::lua_State, object: HostObject) {
    let handle = handles::pin(Pinned::Object(object));
    unsafe { push_handle(state, handle, OBJECT_MT) }
}

/// Pin a type descriptor and push it as a constructible type token.
///
/// # Safety
///
/// As for [`push_object`].
pub(crate) unsafe fn push_type(state: *mut ffi::lua_State, descriptor: Arc<TypeDescriptor>) {
    let handle = handles::pin(Pinned::Type(descriptor));
    unsafe { push_handle(state, handle, TYPE_MT) }
}

unsafe fn push_binding(state: *mut ffi::lua_State, binding: Binding) {
    let handle = handles::pin(Pinned::Binding(Arc::new(binding)));
    unsafe { push_handle(state, handle, BINDING_MT) }
}

/// Read the pin-table handle out of a userdata slot, verifying the userdata
/// carries one of this layer's metatables first.
///
/// # Safety
///
/// `state` must be live; `idx` must hold a full userdata.
pub(crate) unsafe fn read_handle(state: *mut ffi::lua_State, idx: c_int) -> Option<Handle> {
    unsafe {
        if ffi::lua_getmetatable(state, idx) == 0 {
            return None;
        }
        let mut ours = false;
        for name in [OBJECT_MT, TYPE_MT, BINDING_MT] {
            ffi::luaL_getmetatable(state, name.as_ptr());
            let matches = ffi::lua_rawequal(state, -1, -2) != 0;
            ffi::lua_pop(state, 1);
            if matches {
                ours = true;
                break;
            }
        }
        ffi::lua_pop(state, 1);
        if !ours {
            return None;
        }
        let slot = ffi::lua_touserdata(state, idx) as *const Handle;
        Some(slot.read())
    }
}

// ---------------------------------------------------------------------------
// Handler scaffolding.
// ---------------------------------------------------------------------------

/// Run `body` for a C entry point: recover the owning marshal, contain
/// panics, and turn any failure into an engine error after all owned values
/// have been dropped.
fn dispatch<F>(state: *mut ffi::lua_State, body: F) -> c_int
where
    F: FnOnce(&Arc<Marshal>) -> LuaResult<c_int>,
{
    let outcome = match catch_unwind(AssertUnwindSafe(|| -> LuaResult<c_int> {
        let marshal = unsafe { of_state(state) }.ok_or(LuaError::Closed)?;
        body(&marshal)
    })) {
        Ok(Ok(results)) => Ok(results),
        Ok(Err(error)) => Err(error.to_string()),
        Err(_) => Err("host callback panicked".to_owned()),
    };
    match outcome {
        Ok(results) => results,
        Err(message) => unsafe { raise(state, message) },
    }
}

/// Raise `message` as an engine error. Does not return: the engine unwinds
/// with a longjmp, so the message is pushed and dropped first.
unsafe fn raise(state: *mut ffi::lua_State, message: String) -> c_int {
    unsafe {
        ffi::lua_pushlstring(state, message.as_ptr() as *const _, message.len());
        drop(message);
        ffi::lua_error(state)
    }
}

unsafe fn expect_object(
    marshal: &Arc<Marshal>,
    state: *mut ffi::lua_State,
    idx: c_int,
) -> LuaResult<HostObject> {
    match unsafe { marshal.get(state, idx) }? {
        Value::Object(object) => Ok(object),
        other => Err(LuaError::Conversion(format!(
            "expected a host object, got {}",
            other.kind_name()
        ))),
    }
}

unsafe fn expect_token(
    marshal: &Arc<Marshal>,
    state: *mut ffi::lua_State,
    idx: c_int,
) -> LuaResult<Arc<TypeDescriptor>> {
    match unsafe { marshal.get(state, idx) }? {
        Value::TypeToken(descriptor) => Ok(descriptor),
        other => Err(LuaError::Conversion(format!(
            "expected a host type, got {}",
            other.kind_name()
        ))),
    }
}

unsafe fn member_name(
    marshal: &Arc<Marshal>,
    state: *mut ffi::lua_State,
    idx: c_int,
) -> LuaResult<String> {
    match unsafe { marshal.get(state, idx) }? {
        Value::String(name) => Ok(name),
        other => Err(LuaError::Conversion(format!(
            "member name must be a string, got {}",
            other.kind_name()
        ))),
    }
}

/// Find `name` on `start` or an ancestor, returning the declaring descriptor
/// together with the member set.
fn lookup_member(
    start: &Arc<TypeDescriptor>,
    name: &str,
    statics: bool,
) -> Option<(Arc<TypeDescriptor>, MemberSet)> {
    let mut current = Arc::clone(start);
    for _ in 0..MAX_ANCESTRY {
        let found = if statics {
            current.static_member(name)
        } else {
            current.instance_member(name)
        };
        if let Some(set) = found {
            return Some((Arc::clone(&current), set.clone()));
        }
        match current.parent().and_then(descriptor::find) {
            Some(parent) => current = parent,
            None => return None,
        }
    }
    None
}

fn descriptor_of(object: &HostObject) -> LuaResult<Arc<TypeDescriptor>> {
    descriptor::find(object.type_id()).ok_or_else(|| {
        LuaError::Conversion(format!(
            "host type '{}' has not been registered",
            object.type_name()
        ))
    })
}

fn ambiguity_check(owner: &TypeDescriptor, name: &str, set: &MemberSet) -> LuaResult<()> {
    if set.categories() > 1 {
        return Err(LuaError::AmbiguousMember {
            type_name: owner.name(),
            name: name.to_owned(),
        });
    }
    Ok(())
}

/// Push the member `name` of `owner` for reading. Shared by the object and
/// type token `__index` paths.
unsafe fn push_member(
    marshal: &Arc<Marshal>,
    state: *mut ffi::lua_State,
    owner: &Arc<TypeDescriptor>,
    set: &MemberSet,
    receiver: Option<&HostObject>,
    name: &str,
) -> LuaResult<c_int> {
    ambiguity_check(owner, name, set)?;

    if let Some(field) = &set.field {
        let value = (field.get)(receiver)?;
        unsafe { marshal.push(state, &value) }?;
        return Ok(1);
    }
    if let Some(property) = &set.property {
        if property.indexer {
            return Err(LuaError::Conversion(format!(
                "indexer '{name}' on '{}' requires call syntax",
                owner.name()
            )));
        }
        let getter = property.get.as_ref().ok_or_else(|| {
            LuaError::Conversion(format!("property '{name}' on '{}' is write-only", owner.name()))
        })?;
        let value = getter(receiver)?;
        unsafe { marshal.push(state, &value) }?;
        return Ok(1);
    }
    if !set.methods.is_empty() {
        let binding = Binding::Methods {
            receiver: receiver.cloned(),
            type_id: owner.type_id(),
            name: name.to_owned(),
        };
        unsafe {
            push_binding(state, binding);
            ffi::lua_pushcclosure(state, binding_call_entry, 1);
        }
        return Ok(1);
    }
    if let Some(nested) = set.nested {
        unsafe { push_type(state, nested()) };
        return Ok(1);
    }
    if let Some(event) = &set.event {
        let receiver = receiver.ok_or_else(|| {
            LuaError::Conversion(format!("event '{name}' requires an instance receiver"))
        })?;
        let binding = Binding::Event {
            receiver: receiver.clone(),
            event: event.clone(),
        };
        unsafe {
            push_binding(state, binding);
            ffi::lua_pushcclosure(state, binding_call_entry, 1);
        }
        return Ok(1);
    }
    Err(LuaError::InvalidMember {
        type_name: owner.name(),
        name: name.to_owned(),
    })
}

/// Assign `value` to the member `name`. Shared by both `__newindex` paths.
fn set_member(
    owner: &TypeDescriptor,
    set: &MemberSet,
    receiver: Option<&HostObject>,
    name: &str,
    value: Value,
) -> LuaResult<()> {
    ambiguity_check(owner, name, set)?;

    if let Some(field) = &set.field {
        let setter = field.set.as_ref().ok_or_else(|| {
            LuaError::Conversion(format!("field '{name}' on '{}' is read-only", owner.name()))
        })?;
        return setter(receiver, value);
    }
    if let Some(property) = &set.property {
        if property.indexer {
            return Err(LuaError::Conversion(format!(
                "indexer '{name}' on '{}' requires call syntax",
                owner.name()
            )));
        }
        let setter = property.set.as_ref().ok_or_else(|| {
            LuaError::Conversion(format!("property '{name}' on '{}' is read-only", owner.name()))
        })?;
        return setter(receiver, value);
    }
    Err(LuaError::Conversion(format!(
        "member '{name}' on '{}' cannot be assigned",
        owner.name()
    )))
}

// ---------------------------------------------------------------------------
// Object metatable.
// ---------------------------------------------------------------------------

unsafe extern "C" fn object_index_entry(state: *mut ffi::lua_State) -> c_int {
    dispatch(state, |marshal| unsafe {
        let object = expect_object(marshal, state, 1)?;
        let name = member_name(marshal, state, 2)?;
        let descriptor = descriptor_of(&object)?;
        let (owner, set) = lookup_member(&descriptor, &name, false).ok_or_else(|| {
            LuaError::InvalidMember {
                type_name: descriptor.name(),
                name: name.clone(),
            }
        })?;
        push_member(marshal, state, &owner, &set, Some(&object), &name)
    })
}

unsafe extern "C" fn object_newindex_entry(state: *mut ffi::lua_State) -> c_int {
    dispatch(state, |marshal| unsafe {
        let object = expect_object(marshal, state, 1)?;
        let name = member_name(marshal, state, 2)?;
        let value = marshal.get(state, 3)?;
        let descriptor = descriptor_of(&object)?;
        let (owner, set) = lookup_member(&descriptor, &name, false).ok_or_else(|| {
            LuaError::InvalidMember {
                type_name: descriptor.name(),
                name: name.clone(),
            }
        })?;
        set_member(&owner, &set, Some(&object), &name, value)?;
        Ok(0)
    })
}

unsafe extern "C" fn object_add_entry(state: *mut ffi::lua_State) -> c_int {
    dispatch(state, |marshal| unsafe { arith(marshal, state, Operator::Add) })
}

unsafe extern "C" fn object_sub_entry(state: *mut ffi::lua_State) -> c_int {
    dispatch(state, |marshal| unsafe { arith(marshal, state, Operator::Sub) })
}

unsafe extern "C" fn object_mul_entry(state: *mut ffi::lua_State) -> c_int {
    dispatch(state, |marshal| unsafe { arith(marshal, state, Operator::Mul) })
}

unsafe extern "C" fn object_div_entry(state: *mut ffi::lua_State) -> c_int {
    dispatch(state, |marshal| unsafe { arith(marshal, state, Operator::Div) })
}

/// Resolve a binary operator over the overloads declared by both operand
/// types and invoke the winner.
unsafe fn arith(
    marshal: &Arc<Marshal>,
    state: *mut ffi::lua_State,
    op: Operator,
) -> LuaResult<c_int> {
    let lhs = unsafe { marshal.get(state, 1) }?;
    let rhs = unsafe { marshal.get(state, 2) }?;

    let mut candidates: Vec<MethodDescriptor> = Vec::new();
    let mut seen: Option<TypeId> = None;
    for operand in [&lhs, &rhs] {
        if let Value::Object(object) = operand {
            if seen == Some(object.type_id()) {
                continue;
            }
            seen = Some(object.type_id());
            collect_operators(object.type_id(), op, &mut candidates);
        }
    }
    if candidates.is_empty() {
        return Err(LuaError::Resolution(format!(
            "no '{}' operator between {} and {}",
            op.symbol(),
            lhs.kind_name(),
            rhs.kind_name()
        )));
    }

    let (index, converted) = resolver::resolve(&candidates, &[lhs, rhs])?;
    let results = (candidates[index].invoke)(None, &converted)?;
    unsafe { marshal.push_many(state, &results) }?;
    Ok(results.len() as c_int)
}

fn collect_operators(type_id: TypeId, op: Operator, out: &mut Vec<MethodDescriptor>) {
    let mut current = descriptor::find(type_id);
    for _ in 0..MAX_ANCESTRY {
        match current {
            Some(descriptor) => {
                out.extend_from_slice(descriptor.operators(op));
                current = descriptor.parent().and_then(descriptor::find);
            }
            None => break,
        }
    }
}

unsafe extern "C" fn object_tostring_entry(state: *mut ffi::lua_State) -> c_int {
    dispatch(state, |marshal| unsafe {
        let object = expect_object(marshal, state, 1)?;
        let rendered = match stringifier(&object) {
            Some(render) => render(&object)?,
            None => {
                let handle = read_handle(state, 1).unwrap_or_default();
                format!("{}: 0x{handle:x}", object.type_name())
            }
        };
        marshal.push(state, &Value::String(rendered))?;
        Ok(1)
    })
}

fn stringifier(object: &HostObject) -> Option<descriptor::StringifyFn> {
    let mut current = descriptor::find(object.type_id());
    for _ in 0..MAX_ANCESTRY {
        match current {
            Some(descriptor) => {
                if let Some(render) = descriptor.stringify() {
                    return Some(render.clone());
                }
                current = descriptor.parent().and_then(descriptor::find);
            }
            None => break,
        }
    }
    None
}

unsafe extern "C" fn finalize_entry(state: *mut ffi::lua_State) -> c_int {
    // The finalizer is the single release point for the userdata's handle.
    unsafe {
        let slot = ffi::lua_touserdata(state, 1) as *const Handle;
        if !slot.is_null() {
            handles::release(slot.read());
        }
    }
    0
}

// ---------------------------------------------------------------------------
// Type token metatable.
// ---------------------------------------------------------------------------

unsafe extern "C" fn type_call_entry(state: *mut ffi::lua_State) -> c_int {
    dispatch(state, |marshal| unsafe {
        let descriptor = expect_token(marshal, state, 1)?;
        if descriptor.constructors().is_empty() {
            return Err(LuaError::Resolution(format!(
                "type '{}' has no constructors",
                descriptor.name()
            )));
        }
        let top = ffi::lua_gettop(state);
        let args = marshal.get_range(state, 2, top)?;
        let (index, converted) = resolver::resolve(descriptor.constructors(), &args)?;
        let results = (descriptor.constructors()[index].invoke)(None, &converted)?;
        marshal.push_many(state, &results)?;
        Ok(results.len() as c_int)
    })
}

unsafe extern "C" fn type_index_entry(state: *mut ffi::lua_State) -> c_int {
    dispatch(state, |marshal| unsafe {
        let descriptor = expect_token(marshal, state, 1)?;
        let name = member_name(marshal, state, 2)?;
        let (owner, set) = lookup_member(&descriptor, &name, true).ok_or_else(|| {
            LuaError::InvalidMember {
                type_name: descriptor.name(),
                name: name.clone(),
            }
        })?;
        push_member(marshal, state, &owner, &set, None, &name)
    })
}

unsafe extern "C" fn type_newindex_entry(state: *mut ffi::lua_State) -> c_int {
    dispatch(state, |marshal| unsafe {
        let descriptor = expect_token(marshal, state, 1)?;
        let name = member_name(marshal, state, 2)?;
        let value = marshal.get(state, 3)?;
        let (owner, set) = lookup_member(&descriptor, &name, true).ok_or_else(|| {
            LuaError::InvalidMember {
                type_name: descriptor.name(),
                name: name.clone(),
            }
        })?;
        set_member(&owner, &set, None, &name, value)?;
        Ok(0)
    })
}

unsafe extern "C" fn type_tostring_entry(state: *mut ffi::lua_State) -> c_int {
    dispatch(state, |marshal| unsafe {
        let descriptor = expect_token(marshal, state, 1)?;
        let rendered = format!("type '{}'", descriptor.name());
        marshal.push(state, &Value::String(rendered))?;
        Ok(1)
    })
}

// ---------------------------------------------------------------------------
// Binding invocation.
// ---------------------------------------------------------------------------

unsafe extern "C" fn binding_call_entry(state: *mut ffi::lua_State) -> c_int {
    dispatch(state, |marshal| unsafe { binding_call(marshal, state) })
}

unsafe fn binding_call(marshal: &Arc<Marshal>, state: *mut ffi::lua_State) -> LuaResult<c_int> {
    let binding = unsafe {
        let slot = ffi::lua_touserdata(state, ffi::lua_upvalueindex(1)) as *const Handle;
        match handles::resolve(slot.read()) {
            Pinned::Binding(binding) => binding,
            _ => {
                return Err(LuaError::Conversion(
                    "callable upvalue does not hold a member binding".into(),
                ));
            }
        }
    };

    match &*binding {
        Binding::Methods {
            receiver,
            type_id,
            name,
        } => {
            let descriptor = descriptor::find(*type_id).ok_or_else(|| {
                LuaError::Conversion(format!("host type for member '{name}' is gone"))
            })?;
            let (_, set) = lookup_member(&descriptor, name, receiver.is_none()).ok_or_else(
                || LuaError::InvalidMember {
                    type_name: descriptor.name(),
                    name: name.clone(),
                },
            )?;
            // Bound calls use colon syntax: slot 1 repeats the receiver.
            let first = if receiver.is_some() { 2 } else { 1 };
            let top = unsafe { ffi::lua_gettop(state) };
            let args = unsafe { marshal.get_range(state, first, top) }?;
            let (index, converted) = resolver::resolve(&set.methods, &args)?;
            let results = (set.methods[index].invoke)(receiver.as_ref(), &converted)?;
            unsafe { marshal.push_many(state, &results) }?;
            Ok(results.len() as c_int)
        }
        Binding::Event { receiver, event } => {
            let top = unsafe { ffi::lua_gettop(state) };
            // Accept both dot and colon subscription syntax.
            let mut first = 1;
            if top >= 1 && unsafe { ffi::lua_type(state, 1) } == ffi::LUA_TUSERDATA {
                if let Ok(Value::Object(candidate)) = unsafe { marshal.get(state, 1) } {
                    if HostObject::ptr_eq(&candidate, receiver) {
                        first = 2;
                    }
                }
            }
            let handler = unsafe { marshal.get(state, first) }?;
            if !matches!(handler, Value::Function(_)) {
                return Err(LuaError::Conversion(format!(
                    "event subscription expects a function, got {}",
                    handler.kind_name()
                )));
            }
            (event.subscribe)(receiver, handler)?;
            Ok(0)
        }
    }
}

// ---------------------------------------------------------------------------
// The `import` bootstrap.
// ---------------------------------------------------------------------------

unsafe extern "C" fn import_entry(state: *mut ffi::lua_State) -> c_int {
    dispatch(state, |marshal| unsafe {
        let name = match marshal.get(state, 1)? {
            Value::String(name) => name,
            other => {
                return Err(LuaError::Conversion(format!(
                    "import expects a type name, got {}",
                    other.kind_name()
                )));
            }
        };
        let descriptor = descriptor::find_by_name(&name).ok_or_else(|| {
            LuaError::Resolution(format!("no host type named '{name}' is registered"))
        })?;
        let global = CString::new(descriptor.name())?;
        push_type(state, descriptor);
        ffi::lua_pushvalue(state, -1);
        ffi::lua_setglobal(state, global.as_ptr());
        Ok(1)
    })
}
