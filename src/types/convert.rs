//! Conversion traits between host types and boundary [`Value`]s.
//!
//! [`FromValue`] extracts a concrete host value from a boundary value;
//! [`IntoValue`] produces one. Numeric narrowing follows native `as` cast
//! semantics rather than checked truncation, matching the engine's own
//! numeric conversions.

use crate::core::coroutine::LuaCoroutine;
use crate::core::function::LuaFunction;
use crate::core::table::LuaTable;
use crate::error::{LuaError, LuaResult};
use crate::types::value::{HostObject, Value};

/// Extract a host value from a boundary value.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> LuaResult<Self>;
}

/// Convert a host value into a boundary value.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

fn mismatch(expected: &str, got: &Value) -> LuaError {
    LuaError::Conversion(format!("expected {expected}, got {}", got.kind_name()))
}

impl FromValue for Value {
    fn from_value(value: Value) -> LuaResult<Self> {
        Ok(value)
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl FromValue for () {
    fn from_value(_: Value) -> LuaResult<Self> {
        Ok(())
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::Nil
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> LuaResult<Self> {
        match value {
            Value::Boolean(b) => Ok(b),
            other => Err(mismatch("boolean", &other)),
        }
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Boolean(self)
    }
}

macro_rules! impl_value_int {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> LuaResult<Self> {
                    match value {
                        Value::Integer(v) => Ok(v as $ty),
                        other => Err(mismatch("integer", &other)),
                    }
                }
            }

            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::Integer(self as i64)
                }
            }
        )*
    };
}

impl_value_int!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);

macro_rules! impl_value_float {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> LuaResult<Self> {
                    match value {
                        Value::Number(v) => Ok(v as $ty),
                        // Integral slots widen implicitly.
                        Value::Integer(v) => Ok(v as $ty),
                        other => Err(mismatch("number", &other)),
                    }
                }
            }

            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::Number(self as f64)
                }
            }
        )*
    };
}

impl_value_float!(f32, f64);

impl FromValue for String {
    fn from_value(value: Value) -> LuaResult<Self> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::String(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::String(self.to_owned())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> LuaResult<Self> {
        match value {
            Value::Array(items) => items.into_iter().map(T::from_value).collect(),
            Value::Table(table) => table
                .to_values()?
                .into_iter()
                .map(T::from_value)
                .collect(),
            other => Err(mismatch("array", &other)),
        }
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::Array(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> LuaResult<Self> {
        match value {
            Value::Nil => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Nil,
        }
    }
}

macro_rules! impl_value_proxy {
    ($($ty:ty => ($variant:ident, $name:literal)),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> LuaResult<Self> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(mismatch($name, &other)),
                    }
                }
            }

            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::$variant(self)
                }
            }
        )*
    };
}

impl_value_proxy!(
    LuaTable => (Table, "table"),
    LuaFunction => (Function, "function"),
    LuaCoroutine => (Coroutine, "coroutine"),
    HostObject => (Object, "host object")
);
