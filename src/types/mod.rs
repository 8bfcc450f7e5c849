pub mod convert;
pub mod enums;
pub mod value;

pub use convert::{FromValue, IntoValue};
pub use enums::{LuaType, ThreadStatus};
pub use value::{HostObject, Value};
