//! The engine context: owns one Lua state and everything scoped to it.

use crate::core::coroutine::LuaCoroutine;
use crate::core::function::LuaFunction;
use crate::core::table::LuaTable;
use crate::core::{LuaRef, pop_error_message, with_stack};
use crate::descriptor::{self, TypeDescriptor, UserType};
use crate::error::{LuaError, LuaResult};
use crate::marshal::{self, Converter, Marshal, metamethods};
use crate::types::convert::IntoValue;
use crate::types::enums::ThreadStatus;
use crate::types::value::Value;
use luahost_sys as ffi;
use std::ffi::CString;
use std::sync::Arc;

/// One embedded engine instance with the standard libraries open and the
/// interop metatables installed.
///
/// The context is the single owner of the underlying state: dropping it
/// closes the state, and proxies that outlive it fail with
/// [`LuaError::Closed`] instead of touching freed memory. All methods must be
/// called from one thread at a time.
pub struct LuaContext {
    marshal: Arc<Marshal>,
}

impl LuaContext {
    pub fn new() -> LuaResult<Self> {
        unsafe {
            let state = ffi::luaL_newstate();
            if state.is_null() {
                return Err(LuaError::FailedToCreateState);
            }
            ffi::luaL_openlibs(state);
            let marshal = Marshal::new(state);
            marshal::register(&marshal);
            metamethods::install(state);
            Ok(LuaContext { marshal })
        }
    }

    /// Compile and run `chunk` in protected mode, returning every value the
    /// chunk produced.
    pub fn eval(&self, chunk: &str) -> LuaResult<Vec<Value>> {
        let state = self.marshal.state();
        unsafe {
            let base = ffi::lua_gettop(state);
            let outcome = (|| -> LuaResult<Vec<Value>> {
                let rc = ffi::luaL_loadbufferx(
                    state,
                    chunk.as_ptr() as *const _,
                    chunk.len(),
                    c"=eval".as_ptr(),
                    std::ptr::null(),
                );
                if rc != ffi::LUA_OK {
                    let message = pop_error_message(&self.marshal, state);
                    return Err(LuaError::NativeCall {
                        status: ThreadStatus::from(rc),
                        message,
                    });
                }
                let rc = ffi::lua_pcall(state, 0, ffi::LUA_MULTRET, 0);
                if rc != ffi::LUA_OK {
                    let message = pop_error_message(&self.marshal, state);
                    return Err(LuaError::NativeCall {
                        status: ThreadStatus::from(rc),
                        message,
                    });
                }
                self.marshal.get_range(state, base + 1, ffi::lua_gettop(state))
            })();
            ffi::lua_settop(state, base);
            outcome
        }
    }

    pub fn get_global(&self, name: &str) -> LuaResult<Value> {
        let cname = CString::new(name)?;
        let state = self.marshal.state();
        unsafe {
            with_stack(state, || {
                if ffi::lua_checkstack(state, 2) == 0 {
                    return Err(LuaError::StackCapacity { needed: 2 });
                }
                ffi::lua_getglobal(state, cname.as_ptr());
                self.marshal.get(state, -1)
            })
        }
    }

    pub fn set_global(&self, name: &str, value: impl IntoValue) -> LuaResult<()> {
        let cname = CString::new(name)?;
        let state = self.marshal.state();
        unsafe {
            if ffi::lua_checkstack(state, 2) == 0 {
                return Err(LuaError::StackCapacity { needed: 2 });
            }
            self.marshal.push(state, &value.into_value())?;
            ffi::lua_setglobal(state, cname.as_ptr());
        }
        Ok(())
    }

    /// Register `T` with the process-wide descriptor cache, making it
    /// reachable from scripts through `import`.
    pub fn register_type<T: UserType>(&self) -> Arc<TypeDescriptor> {
        descriptor::of::<T>()
    }

    /// Register `T` and bind its type token to a global of the same name,
    /// returning the token.
    pub fn import_type<T: UserType>(&self) -> LuaResult<Value> {
        let descriptor = descriptor::of::<T>();
        let cname = CString::new(descriptor.name())?;
        let state = self.marshal.state();
        unsafe {
            if ffi::lua_checkstack(state, 1) == 0 {
                return Err(LuaError::StackCapacity { needed: 1 });
            }
            metamethods::push_type(state, Arc::clone(&descriptor));
            ffi::lua_setglobal(state, cname.as_ptr());
        }
        Ok(Value::TypeToken(descriptor))
    }

    /// Install a custom push-side converter for `T` on this instance.
    pub fn register_converter<T: UserType>(&self, converter: Arc<dyn Converter>) {
        self.marshal.register_converter::<T>(converter);
    }

    /// Create a fresh empty table inside the engine.
    pub fn new_table(&self) -> LuaResult<LuaTable> {
        let state = self.marshal.state();
        unsafe {
            with_stack(state, || {
                if ffi::lua_checkstack(state, 1) == 0 {
                    return Err(LuaError::StackCapacity { needed: 1 });
                }
                ffi::lua_createtable(state, 0, 0);
                Ok(LuaTable::from_ref(LuaRef::capture(
                    &self.marshal,
                    state,
                    -1,
                )))
            })
        }
    }

    /// Spawn a coroutine running `function`. The coroutine starts suspended.
    pub fn create_coroutine(&self, function: &LuaFunction) -> LuaResult<LuaCoroutine> {
        let state = self.marshal.state();
        unsafe {
            with_stack(state, || {
                if ffi::lua_checkstack(state, 2) == 0 {
                    return Err(LuaError::StackCapacity { needed: 2 });
                }
                let thread = ffi::lua_newthread(state);
                if ffi::lua_checkstack(thread, 1) == 0 {
                    return Err(LuaError::StackCapacity { needed: 1 });
                }
                function.as_ref_handle().push(state)?;
                ffi::lua_xmove(state, thread, 1);
                Ok(LuaCoroutine::from_ref(
                    LuaRef::capture(&self.marshal, state, -1),
                    thread,
                ))
            })
        }
    }
}

impl Drop for LuaContext {
    fn drop(&mut self) {
        marshal::unregister(self.marshal.state());
        // Proxies observe the flag before touching the registry; after this
        // point their drops are no-ops.
        self.marshal.mark_closed();
        unsafe { ffi::lua_close(self.marshal.state()) }
    }
}
