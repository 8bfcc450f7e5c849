//! Proxy over an engine-side table.

use crate::core::{LuaRef, with_stack};
use crate::error::{LuaError, LuaResult};
use crate::types::convert::IntoValue;
use crate::types::value::Value;
use luahost_sys as ffi;
use std::sync::Arc;

/// A table living inside the engine, addressed by registry reference. Clones
/// share the reference; the table itself stays engine-owned.
#[derive(Clone, Debug)]
pub struct LuaTable {
    r: Arc<LuaRef>,
}

impl LuaTable {
    pub(crate) fn from_ref(r: Arc<LuaRef>) -> Self {
        LuaTable { r }
    }

    pub(crate) fn as_ref_handle(&self) -> &LuaRef {
        &self.r
    }

    fn ensure_open(&self) -> LuaResult<()> {
        if self.r.marshal().is_closed() {
            return Err(LuaError::Closed);
        }
        Ok(())
    }

    /// Read `table[key]`, observing metatables.
    pub fn get(&self, key: impl IntoValue) -> LuaResult<Value> {
        self.ensure_open()?;
        let marshal = self.r.marshal();
        let state = marshal.state();
        unsafe {
            with_stack(state, || {
                if ffi::lua_checkstack(state, 3) == 0 {
                    return Err(LuaError::StackCapacity { needed: 3 });
                }
                self.r.push(state)?;
                marshal.push(state, &key.into_value())?;
                ffi::lua_gettable(state, -2);
                marshal.get(state, -1)
            })
        }
    }

    /// Write `table[key] = value`, observing metatables.
    pub fn set(&self, key: impl IntoValue, value: impl IntoValue) -> LuaResult<()> {
        self.ensure_open()?;
        let marshal = self.r.marshal();
        let state = marshal.state();
        unsafe {
            with_stack(state, || {
                if ffi::lua_checkstack(state, 4) == 0 {
                    return Err(LuaError::StackCapacity { needed: 4 });
                }
                self.r.push(state)?;
                marshal.push(state, &key.into_value())?;
                marshal.push(state, &value.into_value())?;
                ffi::lua_settable(state, -3);
                Ok(())
            })
        }
    }

    /// The raw sequence length, ignoring metatables.
    pub fn len(&self) -> LuaResult<usize> {
        self.ensure_open()?;
        let marshal = self.r.marshal();
        let state = marshal.state();
        unsafe {
            with_stack(state, || {
                if ffi::lua_checkstack(state, 1) == 0 {
                    return Err(LuaError::StackCapacity { needed: 1 });
                }
                self.r.push(state)?;
                Ok(ffi::lua_rawlen(state, -1) as usize)
            })
        }
    }

    pub fn is_empty(&self) -> LuaResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Copy out the sequence part `t[1..=#t]`, in order.
    pub fn to_values(&self) -> LuaResult<Vec<Value>> {
        self.ensure_open()?;
        let marshal = self.r.marshal();
        let state = marshal.state();
        unsafe {
            with_stack(state, || {
                if ffi::lua_checkstack(state, 3) == 0 {
                    return Err(LuaError::StackCapacity { needed: 3 });
                }
                self.r.push(state)?;
                let len = ffi::lua_rawlen(state, -1);
                let mut out = Vec::with_capacity(len as usize);
                for i in 1..=len as ffi::lua_Integer {
                    ffi::lua_rawgeti(state, -1, i);
                    let value = marshal.get(state, -1)?;
                    ffi::lua_pop(state, 1);
                    out.push(value);
                }
                Ok(out)
            })
        }
    }

    /// Copy out every key/value pair, in engine iteration order.
    pub fn pairs(&self) -> LuaResult<Vec<(Value, Value)>> {
        self.ensure_open()?;
        let marshal = self.r.marshal();
        let state = marshal.state();
        unsafe {
            with_stack(state, || {
                if ffi::lua_checkstack(state, 4) == 0 {
                    return Err(LuaError::StackCapacity { needed: 4 });
                }
                self.r.push(state)?;
                let mut out = Vec::new();
                ffi::lua_pushnil(state);
                while ffi::lua_next(state, -2) != 0 {
                    let key = marshal.get(state, -2)?;
                    let value = marshal.get(state, -1)?;
                    out.push((key, value));
                    // Keep the key for the next iteration step.
                    ffi::lua_pop(state, 1);
                }
                Ok(out)
            })
        }
    }
}
