//! Embedding layer between a host application and Lua 5.4.
//!
//! The crate owns the raw state behind [`LuaContext`] and moves data across
//! the stack boundary through a per-instance marshal. Host types opt in via
//! [`UserType`], which produces a cached [`descriptor::TypeDescriptor`]; the
//! installed metatables then give scripts construction, member access,
//! operators and events over opaque userdata, with overloads resolved by a
//! deterministic scoring pass.
//!
//! ```no_run
//! use luahost::{LuaContext, Value};
//!
//! let lua = LuaContext::new()?;
//! lua.set_global("greeting", "hello")?;
//! let results = lua.eval("return greeting .. ', world'")?;
//! assert!(matches!(&results[0], Value::String(s) if s == "hello, world"));
//! # Ok::<(), luahost::LuaError>(())
//! ```

pub mod core;
pub mod descriptor;
pub mod error;
pub mod marshal;
pub mod types;

pub use crate::core::context::LuaContext;
pub use crate::core::coroutine::{CoroutineStatus, LuaCoroutine};
pub use crate::core::function::LuaFunction;
pub use crate::core::table::LuaTable;
pub use crate::descriptor::{Operator, Param, ParamKind, TypeBuilder, UserType};
pub use crate::error::{LuaError, LuaResult};
pub use crate::marshal::Converter;
pub use crate::types::{FromValue, HostObject, IntoValue, LuaType, ThreadStatus, Value};

/// Raw engine bindings, re-exported for hosts that need to drop below the
/// safe surface.
pub use luahost_sys as ffi;
