//! Host-facing handles: the engine context and the proxy types scripts and
//! hosts exchange.

pub mod context;
pub mod coroutine;
pub mod function;
pub mod table;

use crate::error::{LuaError, LuaResult};
use crate::marshal::Marshal;
use crate::types::value::Value;
use luahost_sys as ffi;
use std::os::raw::c_int;
use std::sync::Arc;

/// A durable registry reference into one engine instance. Dropping the last
/// clone releases the registry slot, unless the instance is already closed.
pub(crate) struct LuaRef {
    marshal: Arc<Marshal>,
    key: c_int,
}

impl LuaRef {
    /// Capture the value at `idx` into the registry without popping it.
    ///
    /// # Safety
    ///
    /// `state` must be a live thread of `marshal`'s engine instance.
    pub(crate) unsafe fn capture(
        marshal: &Arc<Marshal>,
        state: *mut ffi::lua_State,
        idx: c_int,
    ) -> Arc<LuaRef> {
        unsafe {
            ffi::lua_pushvalue(state, idx);
            let key = ffi::luaL_ref(state, ffi::LUA_REGISTRYINDEX);
            Arc::new(LuaRef {
                marshal: Arc::clone(marshal),
                key,
            })
        }
    }

    pub(crate) fn marshal(&self) -> &Arc<Marshal> {
        &self.marshal
    }

    /// Push the referenced value.
    ///
    /// # Safety
    ///
    /// `state` must be a live thread of the owning engine instance.
    pub(crate) unsafe fn push(&self, state: *mut ffi::lua_State) -> LuaResult<()> {
        if self.marshal.is_closed() {
            return Err(LuaError::Closed);
        }
        unsafe {
            ffi::lua_rawgeti(
                state,
                ffi::LUA_REGISTRYINDEX,
                self.key as ffi::lua_Integer,
            );
        }
        Ok(())
    }
}

impl Drop for LuaRef {
    fn drop(&mut self) {
        if !self.marshal.is_closed() {
            unsafe {
                ffi::luaL_unref(self.marshal.state(), ffi::LUA_REGISTRYINDEX, self.key);
            }
        }
    }
}

impl std::fmt::Debug for LuaRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaRef").field("key", &self.key).finish()
    }
}

/// Run `body` and restore the stack top afterwards, success or failure.
///
/// # Safety
///
/// `state` must be a live thread; `body` must not pop below the entry top.
pub(crate) unsafe fn with_stack<T>(
    state: *mut ffi::lua_State,
    body: impl FnOnce() -> LuaResult<T>,
) -> LuaResult<T> {
    let base = unsafe { ffi::lua_gettop(state) };
    let out = body();
    unsafe { ffi::lua_settop(state, base) };
    out
}

/// Pop the error value a failed protected call left on top and render it.
///
/// # Safety
///
/// `state` must be a live thread with the error value on top.
pub(crate) unsafe fn pop_error_message(marshal: &Arc<Marshal>, state: *mut ffi::lua_State) -> String {
    let message = match unsafe { marshal.get(state, -1) } {
        Ok(Value::String(text)) => text,
        Ok(other) => format!("(error object is a {})", other.kind_name()),
        Err(_) => "(unreadable error object)".to_owned(),
    };
    unsafe { ffi::lua_pop(state, 1) };
    message
}
