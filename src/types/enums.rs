use num_enum::FromPrimitive;

/// Protocol status codes returned by the engine's load/call/resume
/// primitives. Everything that is neither [`Ok`](ThreadStatus::Ok) nor
/// [`Yield`](ThreadStatus::Yield) is a call failure with an error value left
/// on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(i32)]
pub enum ThreadStatus {
    Ok = luahost_sys::LUA_OK,
    Yield = luahost_sys::LUA_YIELD,
    RuntimeError = luahost_sys::LUA_ERRRUN,
    SyntaxError = luahost_sys::LUA_ERRSYNTAX,
    MemoryError = luahost_sys::LUA_ERRMEM,
    #[num_enum(default)]
    MessageHandlerError = luahost_sys::LUA_ERRERR,
}

impl ThreadStatus {
    pub fn is_failure(self) -> bool {
        !matches!(self, ThreadStatus::Ok | ThreadStatus::Yield)
    }
}

/// Type tag of a stack slot as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(i32)]
pub enum LuaType {
    #[num_enum(default)]
    None = luahost_sys::LUA_TNONE,
    Nil = luahost_sys::LUA_TNIL,
    Boolean = luahost_sys::LUA_TBOOLEAN,
    LightUserdata = luahost_sys::LUA_TLIGHTUSERDATA,
    Number = luahost_sys::LUA_TNUMBER,
    String = luahost_sys::LUA_TSTRING,
    Table = luahost_sys::LUA_TTABLE,
    Function = luahost_sys::LUA_TFUNCTION,
    Userdata = luahost_sys::LUA_TUSERDATA,
    Thread = luahost_sys::LUA_TTHREAD,
}
