//! Proxy over an engine-side coroutine thread.

use crate::core::{LuaRef, pop_error_message};
use crate::error::{LuaError, LuaResult};
use crate::types::enums::ThreadStatus;
use crate::types::value::Value;
use luahost_sys as ffi;
use std::os::raw::c_int;
use std::sync::Arc;

/// Observable coroutine lifecycle states, mirroring `coroutine.status`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CoroutineStatus {
    /// Not started yet, or parked at a yield point.
    Suspended,
    /// Currently inside a host-initiated resume.
    Running,
    /// Alive but resumed another coroutine that has not finished.
    Normal,
    /// Finished or failed; can never run again.
    Dead,
}

/// A coroutine living inside the engine. The registry reference keeps the
/// thread alive; `thread` is its own stack.
#[derive(Clone, Debug)]
pub struct LuaCoroutine {
    r: Arc<LuaRef>,
    thread: *mut ffi::lua_State,
}

// The thread pointer is only dereferenced under the owning context's
// single-thread access rule, same as the marshal's main state pointer.
unsafe impl Send for LuaCoroutine {}
unsafe impl Sync for LuaCoroutine {}

impl LuaCoroutine {
    pub(crate) fn from_ref(r: Arc<LuaRef>, thread: *mut ffi::lua_State) -> Self {
        LuaCoroutine { r, thread }
    }

    pub(crate) fn as_ref_handle(&self) -> &LuaRef {
        &self.r
    }

    /// The coroutine's current lifecycle state.
    pub fn status(&self) -> LuaResult<CoroutineStatus> {
        let marshal = self.r.marshal();
        if marshal.is_closed() {
            return Err(LuaError::Closed);
        }
        if marshal.is_active_thread(self.thread) {
            return Ok(CoroutineStatus::Running);
        }
        unsafe {
            match ffi::lua_status(self.thread) {
                ffi::LUA_YIELD => Ok(CoroutineStatus::Suspended),
                ffi::LUA_OK => {
                    let mut frame = ffi::lua_Debug::zeroed();
                    if ffi::lua_getstack(self.thread, 0, &mut frame) != 0 {
                        // An activation record while not yielded means it
                        // resumed someone else.
                        Ok(CoroutineStatus::Normal)
                    } else if ffi::lua_gettop(self.thread) == 0 {
                        Ok(CoroutineStatus::Dead)
                    } else {
                        Ok(CoroutineStatus::Suspended)
                    }
                }
                _ => Ok(CoroutineStatus::Dead),
            }
        }
    }

    /// Resume the coroutine with `args`. Returns the values it yielded or
    /// returned. Resuming anything but a suspended coroutine fails without
    /// touching the thread.
    pub fn resume(&self, args: &[Value]) -> LuaResult<Vec<Value>> {
        let marshal = self.r.marshal();
        match self.status()? {
            CoroutineStatus::Suspended => {}
            CoroutineStatus::Dead => {
                return Err(LuaError::CoroutineState(
                    "cannot resume a dead coroutine".into(),
                ));
            }
            CoroutineStatus::Running => {
                return Err(LuaError::CoroutineState(
                    "cannot resume a running coroutine".into(),
                ));
            }
            CoroutineStatus::Normal => {
                return Err(LuaError::CoroutineState(
                    "cannot resume a coroutine that is resuming another".into(),
                ));
            }
        }

        unsafe {
            let needed = args.len() + 1;
            if ffi::lua_checkstack(self.thread, needed as c_int) == 0 {
                return Err(LuaError::StackCapacity { needed });
            }
            let base = ffi::lua_gettop(self.thread);
            if let Err(error) = marshal.push_many(self.thread, args) {
                ffi::lua_settop(self.thread, base);
                return Err(error);
            }

            marshal.set_active_thread(self.thread);
            let mut nres: c_int = 0;
            let rc = ffi::lua_resume(self.thread, marshal.state(), args.len() as c_int, &mut nres);
            marshal.clear_active_thread();

            match rc {
                ffi::LUA_OK | ffi::LUA_YIELD => {
                    let top = ffi::lua_gettop(self.thread);
                    let out = marshal.get_range(self.thread, top - nres + 1, top)?;
                    ffi::lua_pop(self.thread, nres);
                    Ok(out)
                }
                status => {
                    let message = pop_error_message(marshal, self.thread);
                    Err(LuaError::NativeCall {
                        status: ThreadStatus::from(status),
                        message,
                    })
                }
            }
        }
    }
}
