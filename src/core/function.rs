//! Proxy over an engine-side function.

use crate::core::{LuaRef, pop_error_message};
use crate::error::{LuaError, LuaResult};
use crate::types::enums::ThreadStatus;
use crate::types::value::Value;
use luahost_sys as ffi;
use std::os::raw::c_int;
use std::sync::Arc;

/// A callable living inside the engine, addressed by registry reference.
#[derive(Clone, Debug)]
pub struct LuaFunction {
    r: Arc<LuaRef>,
}

impl LuaFunction {
    pub(crate) fn from_ref(r: Arc<LuaRef>) -> Self {
        LuaFunction { r }
    }

    pub(crate) fn as_ref_handle(&self) -> &LuaRef {
        &self.r
    }

    /// Call the function in protected mode with `args`, returning every
    /// result it produced.
    pub fn call(&self, args: &[Value]) -> LuaResult<Vec<Value>> {
        let marshal = self.r.marshal();
        if marshal.is_closed() {
            return Err(LuaError::Closed);
        }
        let state = marshal.state();
        unsafe {
            let needed = args.len() + 2;
            if ffi::lua_checkstack(state, needed as c_int) == 0 {
                return Err(LuaError::StackCapacity { needed });
            }
            let base = ffi::lua_gettop(state);
            let outcome = (|| -> LuaResult<Vec<Value>> {
                self.r.push(state)?;
                marshal.push_many(state, args)?;
                let rc = ffi::lua_pcall(state, args.len() as c_int, ffi::LUA_MULTRET, 0);
                if rc != ffi::LUA_OK {
                    let message = pop_error_message(marshal, state);
                    return Err(LuaError::NativeCall {
                        status: ThreadStatus::from(rc),
                        message,
                    });
                }
                marshal.get_range(state, base + 1, ffi::lua_gettop(state))
            })();
            ffi::lua_settop(state, base);
            outcome
        }
    }
}
