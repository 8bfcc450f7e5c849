use crate::core::coroutine::LuaCoroutine;
use crate::core::function::LuaFunction;
use crate::core::table::LuaTable;
use crate::descriptor::TypeDescriptor;
use crate::error::{LuaError, LuaResult};
use std::any::{Any, TypeId};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

/// A value crossing the stack boundary, in either direction.
///
/// `Nil`, `Boolean`, `Integer`, `Number`, `String` and `Array` are carried by
/// copy. `Table`, `Function` and `Coroutine` are proxies holding a durable
/// registry reference into the engine. `Object` is an opaque host object and
/// `TypeToken` an imported host type, both of which round-trip through the
/// handle table when pushed.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Table(LuaTable),
    Function(LuaFunction),
    Coroutine(LuaCoroutine),
    Object(HostObject),
    TypeToken(Arc<TypeDescriptor>),
}

impl Value {
    /// Human-readable tag for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
            Value::Coroutine(_) => "coroutine",
            Value::Object(_) => "object",
            Value::TypeToken(_) => "type",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

/// An opaque host object pinned across the boundary.
///
/// The payload lives behind `Arc<RwLock<T>>` so scripted member access can
/// borrow it mutably while the wrapper itself stays cheaply cloneable and
/// identity-preserving (two clones compare equal under [`ptr_eq`]).
///
/// Borrows never block: a member handler can call back into the engine while
/// holding a guard, so a script that re-enters the same object from such a
/// callback gets an error instead of a deadlock.
///
/// [`ptr_eq`]: HostObject::ptr_eq
#[derive(Clone)]
pub struct HostObject {
    type_id: TypeId,
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl HostObject {
    pub fn new<T>(type_name: &'static str, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        HostObject {
            type_id: TypeId::of::<T>(),
            type_name,
            inner: Arc::new(RwLock::new(value)),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Reference identity: true when both wrappers pin the same object.
    pub fn ptr_eq(a: &HostObject, b: &HostObject) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Borrow the payload immutably, failing if the object is of a different
    /// concrete type or already borrowed mutably.
    pub fn borrow<T: Any>(&self) -> LuaResult<RwLockReadGuard<'_, T>> {
        let lock = self
            .inner
            .downcast_ref::<RwLock<T>>()
            .ok_or_else(|| self.downcast_error::<T>())?;
        match lock.try_read() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(self.borrow_error()),
        }
    }

    /// Borrow the payload mutably, failing if any borrow is outstanding.
    pub fn borrow_mut<T: Any>(&self) -> LuaResult<RwLockWriteGuard<'_, T>> {
        let lock = self
            .inner
            .downcast_ref::<RwLock<T>>()
            .ok_or_else(|| self.downcast_error::<T>())?;
        match lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(self.borrow_error()),
        }
    }

    /// True if the payload is of concrete type `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    fn borrow_error(&self) -> LuaError {
        LuaError::callback_msg(format!(
            "host object '{}' is already borrowed",
            self.type_name
        ))
    }

    fn downcast_error<T>(&self) -> LuaError {
        LuaError::Conversion(format!(
            "host object is a '{}', not a '{}'",
            self.type_name,
            std::any::type_name::<T>()
        ))
    }
}

impl std::fmt::Debug for HostObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostObject")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}
