//! The stack dispatcher: moves [`Value`]s across the native boundary.
//!
//! One [`Marshal`] exists per engine instance. It owns the converter
//! registry, the closed flag consulted by proxy finalizers, and the identity
//! of the coroutine currently being resumed. A process-wide pool maps a main
//! state pointer back to its marshal so C entry points invoked by the engine
//! can recover the owning instance from nothing but a `lua_State`.

pub mod handles;
pub mod metamethods;

use crate::core::LuaRef;
use crate::core::coroutine::LuaCoroutine;
use crate::core::function::LuaFunction;
use crate::core::table::LuaTable;
use crate::descriptor::{self, UserType};
use crate::error::{LuaError, LuaResult};
use crate::marshal::handles::Pinned;
use crate::types::enums::LuaType;
use crate::types::value::{HostObject, Value};
use luahost_sys as ffi;
use rustc_hash::FxHashMap;
use std::any::TypeId;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Custom push-side representation for one host type.
///
/// A registered converter overrides the opaque userdata default when an
/// object of its type (or a descendant, when no closer converter exists) is
/// pushed. `push` must leave exactly one value on the stack on success.
pub trait Converter: Send + Sync {
    /// # Safety
    ///
    /// `state` must be a live thread belonging to `marshal`'s engine
    /// instance and must not be mutated concurrently.
    unsafe fn push(
        &self,
        marshal: &Arc<Marshal>,
        state: *mut ffi::lua_State,
        object: &HostObject,
    ) -> LuaResult<()>;
}

pub struct Marshal {
    state: *mut ffi::lua_State,
    closed: AtomicBool,
    /// Thread pointer of the coroutine currently inside a native resume, or
    /// zero when none is.
    active_thread: AtomicUsize,
    converters: RwLock<FxHashMap<TypeId, Arc<dyn Converter>>>,
}

// The raw state pointer makes this `!Send` by default. The owning context
// guarantees all engine access happens from one thread at a time; the marshal
// itself only hands the pointer back to callers already bound by that rule.
unsafe impl Send for Marshal {}
unsafe impl Sync for Marshal {}

impl Marshal {
    pub(crate) fn new(state: *mut ffi::lua_State) -> Arc<Marshal> {
        Arc::new(Marshal {
            state,
            closed: AtomicBool::new(false),
            active_thread: AtomicUsize::new(0),
            converters: RwLock::new(FxHashMap::default()),
        })
    }

    pub(crate) fn state(&self) -> *mut ffi::lua_State {
        self.state
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn set_active_thread(&self, thread: *mut ffi::lua_State) {
        self.active_thread.store(thread as usize, Ordering::Release);
    }

    pub(crate) fn clear_active_thread(&self) {
        self.active_thread.store(0, Ordering::Release);
    }

    pub(crate) fn is_active_thread(&self, thread: *mut ffi::lua_State) -> bool {
        self.active_thread.load(Ordering::Acquire) == thread as usize
    }

    /// Install a custom converter for `T`, replacing any earlier one.
    pub fn register_converter<T: UserType>(&self, converter: Arc<dyn Converter>) {
        self.converters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<T>(), converter);
    }

    /// Find the converter for a type: exact registration first, then one
    /// bounded walk up the declared ancestry chain.
    fn converter_for(&self, type_id: TypeId) -> Option<Arc<dyn Converter>> {
        let map = self.converters.read().unwrap_or_else(PoisonError::into_inner);
        if map.is_empty() {
            return None;
        }
        const MAX_DEPTH: usize = 64;
        let mut current = type_id;
        for _ in 0..MAX_DEPTH {
            if let Some(found) = map.get(&current) {
                return Some(Arc::clone(found));
            }
            current = descriptor::find(current).and_then(|d| d.parent())?;
        }
        None
    }

    /// Read the value at `idx` without popping it.
    ///
    /// # Safety
    ///
    /// `state` must be a live thread of this marshal's engine instance.
    pub unsafe fn get(
        self: &Arc<Self>,
        state: *mut ffi::lua_State,
        idx: c_int,
    ) -> LuaResult<Value> {
        unsafe {
            match LuaType::from(ffi::lua_type(state, idx)) {
                LuaType::None | LuaType::Nil => Ok(Value::Nil),
                LuaType::Boolean => Ok(Value::Boolean(ffi::lua_toboolean(state, idx) != 0)),
                LuaType::Number => {
                    if ffi::lua_isinteger(state, idx) != 0 {
                        Ok(Value::Integer(ffi::lua_tointeger(state, idx)))
                    } else {
                        Ok(Value::Number(ffi::lua_tonumber(state, idx)))
                    }
                }
                LuaType::String => Ok(Value::String(read_string(state, idx)?)),
                LuaType::Table => Ok(Value::Table(LuaTable::from_ref(LuaRef::capture(
                    self, state, idx,
                )))),
                LuaType::Function => Ok(Value::Function(LuaFunction::from_ref(LuaRef::capture(
                    self, state, idx,
                )))),
                LuaType::Thread => {
                    let thread = ffi::lua_tothread(state, idx);
                    Ok(Value::Coroutine(LuaCoroutine::from_ref(
                        LuaRef::capture(self, state, idx),
                        thread,
                    )))
                }
                LuaType::Userdata => match metamethods::read_handle(state, idx) {
                    Some(handle) => match handles::resolve(handle) {
                        Pinned::Object(object) => Ok(Value::Object(object)),
                        Pinned::Type(descriptor) => Ok(Value::TypeToken(descriptor)),
                        Pinned::Binding(_) => Err(LuaError::Conversion(
                            "a bound member group is not a readable value".into(),
                        )),
                    },
                    None => Err(LuaError::Conversion(
                        "userdata does not belong to this interop layer".into(),
                    )),
                },
                LuaType::LightUserdata => Err(LuaError::Conversion(
                    "light userdata cannot cross the boundary".into(),
                )),
            }
        }
    }

    /// Read the inclusive slot range `start..=end`. An empty or inverted
    /// range yields an empty vector.
    ///
    /// # Safety
    ///
    /// As for [`Marshal::get`].
    pub unsafe fn get_range(
        self: &Arc<Self>,
        state: *mut ffi::lua_State,
        start: c_int,
        end: c_int,
    ) -> LuaResult<Vec<Value>> {
        if start > end || end < 1 {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity((end - start + 1) as usize);
        for idx in start..=end {
            out.push(unsafe { self.get(state, idx) }?);
        }
        Ok(out)
    }

    /// Push one value, leaving it on top of the stack.
    ///
    /// # Safety
    ///
    /// As for [`Marshal::get`].
    pub unsafe fn push(
        self: &Arc<Self>,
        state: *mut ffi::lua_State,
        value: &Value,
    ) -> LuaResult<()> {
        unsafe {
            if ffi::lua_checkstack(state, 2) == 0 {
                return Err(LuaError::StackCapacity { needed: 2 });
            }
            match value {
                Value::Nil => ffi::lua_pushnil(state),
                Value::Boolean(b) => ffi::lua_pushboolean(state, c_int::from(*b)),
                Value::Integer(i) => ffi::lua_pushinteger(state, *i),
                Value::Number(n) => ffi::lua_pushnumber(state, *n),
                Value::String(s) => {
                    // Length-explicit push: embedded nuls survive.
                    ffi::lua_pushlstring(state, s.as_ptr() as *const _, s.len());
                }
                Value::Array(items) => {
                    ffi::lua_createtable(state, items.len() as c_int, 0);
                    for (i, item) in items.iter().enumerate() {
                        self.push(state, item)?;
                        ffi::lua_rawseti(state, -2, (i + 1) as ffi::lua_Integer);
                    }
                }
                Value::Table(table) => table.as_ref_handle().push(state)?,
                Value::Function(function) => function.as_ref_handle().push(state)?,
                Value::Coroutine(coroutine) => coroutine.as_ref_handle().push(state)?,
                Value::Object(object) => self.push_object(state, object)?,
                Value::TypeToken(descriptor) => {
                    metamethods::push_type(state, Arc::clone(descriptor))
                }
            }
            Ok(())
        }
    }

    /// Push each value of `values` in order.
    ///
    /// # Safety
    ///
    /// As for [`Marshal::get`].
    pub unsafe fn push_many(
        self: &Arc<Self>,
        state: *mut ffi::lua_State,
        values: &[Value],
    ) -> LuaResult<()> {
        let needed = values.len() as c_int;
        if unsafe { ffi::lua_checkstack(state, needed) } == 0 {
            return Err(LuaError::StackCapacity {
                needed: values.len(),
            });
        }
        for value in values {
            unsafe { self.push(state, value) }?;
        }
        Ok(())
    }

    unsafe fn push_object(
        self: &Arc<Self>,
        state: *mut ffi::lua_State,
        object: &HostObject,
    ) -> LuaResult<()> {
        if let Some(converter) = self.converter_for(object.type_id()) {
            return unsafe { converter.push(self, state, object) };
        }
        unsafe { metamethods::push_object(state, object.clone()) };
        Ok(())
    }
}

/// Copy the string at `idx` out of the engine. Only called on string slots,
/// so `lua_tolstring` performs no coercion.
unsafe fn read_string(state: *mut ffi::lua_State, idx: c_int) -> LuaResult<String> {
    unsafe {
        let mut len = 0usize;
        let ptr = ffi::lua_tolstring(state, idx, &mut len);
        if ptr.is_null() {
            return Err(LuaError::Conversion("string slot yielded no bytes".into()));
        }
        let bytes = std::slice::from_raw_parts(ptr as *const u8, len).to_vec();
        Ok(String::from_utf8(bytes)?)
    }
}

// ---------------------------------------------------------------------------
// Instance pool.
// ---------------------------------------------------------------------------

static POOL: OnceLock<RwLock<FxHashMap<usize, Arc<Marshal>>>> = OnceLock::new();

fn pool() -> &'static RwLock<FxHashMap<usize, Arc<Marshal>>> {
    POOL.get_or_init(Default::default)
}

pub(crate) fn register(marshal: &Arc<Marshal>) {
    pool()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(marshal.state() as usize, Arc::clone(marshal));
}

pub(crate) fn unregister(state: *mut ffi::lua_State) {
    pool()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&(state as usize));
}

/// Recover the marshal owning `state`. Coroutine threads normalize to their
/// main state first, so every thread of an instance maps to the same marshal.
///
/// # Safety
///
/// `state` must be a live Lua thread.
pub(crate) unsafe fn of_state(state: *mut ffi::lua_State) -> Option<Arc<Marshal>> {
    let main = unsafe { main_state(state) };
    pool()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&(main as usize))
        .cloned()
}

/// Resolve any thread of an instance to the instance's main state.
///
/// # Safety
///
/// `state` must be a live Lua thread with room for one stack slot.
pub(crate) unsafe fn main_state(state: *mut ffi::lua_State) -> *mut ffi::lua_State {
    unsafe {
        ffi::lua_rawgeti(state, ffi::LUA_REGISTRYINDEX, ffi::LUA_RIDX_MAINTHREAD);
        let main = ffi::lua_tothread(state, -1);
        ffi::lua_pop(state, 1);
        main
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_and_empty_ranges_read_as_empty() {
        unsafe {
            let state = ffi::luaL_newstate();
            assert!(!state.is_null());
            let marshal = Marshal::new(state);
            ffi::lua_pushinteger(state, 1);
            ffi::lua_pushinteger(state, 2);

            assert!(marshal.get_range(state, 5, 2).unwrap().is_empty());
            assert!(marshal.get_range(state, 1, 0).unwrap().is_empty());
            assert!(marshal.get_range(state, 3, -1).unwrap().is_empty());

            let all = marshal.get_range(state, 1, 2).unwrap();
            assert_eq!(all.len(), 2);

            ffi::lua_close(state);
        }
    }
}
