//! Cached member descriptors for host types exposed to scripts.
//!
//! Rust has no runtime reflection, so host types declare their scripted
//! surface once through [`UserType::describe`]. The resulting
//! [`TypeDescriptor`] is the analogue of cached reflection metadata: a
//! partition of the type's members into constructors, instance members,
//! static members and operator overloads, computed once per type and
//! memoized for the process lifetime (host type metadata is immutable).

pub mod resolver;

use crate::error::{LuaError, LuaResult};
use crate::types::value::{HostObject, Value};
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// A host type that can be imported into the scripting namespace.
pub trait UserType: Any + Send + Sync + Sized {
    /// The name scripts see, also used for the `import` bootstrap.
    fn type_name() -> &'static str;

    /// Declare constructors, members and operators.
    fn describe(builder: &mut TypeBuilder<Self>);
}

/// Parameter categories used by overload resolution.
#[derive(Clone, Debug)]
pub enum ParamKind {
    Boolean,
    Integer,
    Number,
    Str,
    /// A host array; scripting tables convert element-wise.
    Array(Box<ParamKind>),
    Table,
    Function,
    /// An opaque host object, exact or ancestry-assignable.
    Object {
        type_id: TypeId,
        type_name: &'static str,
    },
    /// An imported host type token.
    Type,
    Any,
}

/// One declared parameter of a constructor, method or operator.
#[derive(Clone, Debug)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    pub optional: bool,
    pub default: Option<Value>,
    pub variadic: bool,
}

impl Param {
    fn new(name: &'static str, kind: ParamKind) -> Self {
        Param {
            name,
            kind,
            optional: false,
            default: None,
            variadic: false,
        }
    }

    pub fn boolean(name: &'static str) -> Self {
        Self::new(name, ParamKind::Boolean)
    }

    pub fn integer(name: &'static str) -> Self {
        Self::new(name, ParamKind::Integer)
    }

    pub fn number(name: &'static str) -> Self {
        Self::new(name, ParamKind::Number)
    }

    pub fn string(name: &'static str) -> Self {
        Self::new(name, ParamKind::Str)
    }

    pub fn array(name: &'static str, element: ParamKind) -> Self {
        Self::new(name, ParamKind::Array(Box::new(element)))
    }

    pub fn table(name: &'static str) -> Self {
        Self::new(name, ParamKind::Table)
    }

    pub fn function(name: &'static str) -> Self {
        Self::new(name, ParamKind::Function)
    }

    pub fn object<T: UserType>(name: &'static str) -> Self {
        Self::new(
            name,
            ParamKind::Object {
                type_id: TypeId::of::<T>(),
                type_name: T::type_name(),
            },
        )
    }

    pub fn type_token(name: &'static str) -> Self {
        Self::new(name, ParamKind::Type)
    }

    pub fn any(name: &'static str) -> Self {
        Self::new(name, ParamKind::Any)
    }

    /// Mark the parameter optional with a default taken when no argument is
    /// supplied (or an explicit nil is).
    pub fn optional(mut self, default: Value) -> Self {
        self.optional = true;
        self.default = Some(default);
        self
    }

    /// Mark a trailing parameter variadic: it greedily collects all remaining
    /// arguments, converted individually to `element`, into one array.
    pub fn variadic(name: &'static str, element: ParamKind) -> Self {
        let mut p = Self::array(name, element);
        p.variadic = true;
        p
    }
}

/// Binary operators dispatchable through the engine's metatable mechanism.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
        }
    }
}

pub type MethodFn = Arc<dyn Fn(Option<&HostObject>, &[Value]) -> LuaResult<Vec<Value>> + Send + Sync>;
pub type GetterFn = Arc<dyn Fn(Option<&HostObject>) -> LuaResult<Value> + Send + Sync>;
pub type SetterFn = Arc<dyn Fn(Option<&HostObject>, Value) -> LuaResult<()> + Send + Sync>;
pub type SubscribeFn = Arc<dyn Fn(&HostObject, Value) -> LuaResult<()> + Send + Sync>;
pub type StringifyFn = Arc<dyn Fn(&HostObject) -> LuaResult<String> + Send + Sync>;

/// A constructor, method or operator overload.
#[derive(Clone)]
pub struct MethodDescriptor {
    pub params: Vec<Param>,
    /// Leading generic type parameters, satisfied by type-token arguments
    /// before ordinary resolution proceeds on the rest.
    pub type_params: usize,
    pub invoke: MethodFn,
}

#[derive(Clone)]
pub struct FieldDescriptor {
    pub get: GetterFn,
    pub set: Option<SetterFn>,
}

#[derive(Clone)]
pub struct PropertyDescriptor {
    pub get: Option<GetterFn>,
    pub set: Option<SetterFn>,
    /// Indexers are resolved through call syntax, never plain member access.
    pub indexer: bool,
}

#[derive(Clone)]
pub struct EventDescriptor {
    pub subscribe: SubscribeFn,
}

pub type NestedThunk = fn() -> Arc<TypeDescriptor>;

/// All same-name members of one receiver category. More than one populated
/// category under a single name is structurally ambiguous.
#[derive(Clone, Default)]
pub struct MemberSet {
    pub field: Option<FieldDescriptor>,
    pub property: Option<PropertyDescriptor>,
    pub methods: Vec<MethodDescriptor>,
    pub nested: Option<NestedThunk>,
    pub event: Option<EventDescriptor>,
}

impl MemberSet {
    pub fn categories(&self) -> usize {
        usize::from(self.field.is_some())
            + usize::from(self.property.is_some())
            + usize::from(!self.methods.is_empty())
            + usize::from(self.nested.is_some())
            + usize::from(self.event.is_some())
    }
}

/// Cached interop metadata for one host type.
pub struct TypeDescriptor {
    name: &'static str,
    type_id: TypeId,
    parent: Option<TypeId>,
    constructors: Vec<MethodDescriptor>,
    instance: FxHashMap<&'static str, MemberSet>,
    statics: FxHashMap<&'static str, MemberSet>,
    operators: FxHashMap<Operator, Vec<MethodDescriptor>>,
    stringify: Option<StringifyFn>,
}

impl TypeDescriptor {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn parent(&self) -> Option<TypeId> {
        self.parent
    }

    pub fn constructors(&self) -> &[MethodDescriptor] {
        &self.constructors
    }

    pub fn instance_member(&self, name: &str) -> Option<&MemberSet> {
        self.instance.get(name)
    }

    pub fn static_member(&self, name: &str) -> Option<&MemberSet> {
        self.statics.get(name)
    }

    pub fn operators(&self, op: Operator) -> &[MethodDescriptor] {
        self.operators.get(&op).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn stringify(&self) -> Option<&StringifyFn> {
        self.stringify.as_ref()
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Declarative builder passed to [`UserType::describe`].
pub struct TypeBuilder<T: UserType> {
    parent: Option<TypeId>,
    constructors: Vec<MethodDescriptor>,
    instance: FxHashMap<&'static str, MemberSet>,
    statics: FxHashMap<&'static str, MemberSet>,
    operators: FxHashMap<Operator, Vec<MethodDescriptor>>,
    stringify: Option<StringifyFn>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

fn no_receiver() -> LuaError {
    LuaError::callback_msg("instance member accessed without a receiver")
}

impl<T: UserType> TypeBuilder<T> {
    fn new() -> Self {
        TypeBuilder {
            parent: None,
            constructors: Vec::new(),
            instance: FxHashMap::default(),
            statics: FxHashMap::default(),
            operators: FxHashMap::default(),
            stringify: None,
            _marker: std::marker::PhantomData,
        }
    }

    /// Declare an ancestor type. Converter lookups and object parameter
    /// matching walk this chain.
    pub fn extends<P: UserType>(&mut self) -> &mut Self {
        // Make sure the parent's descriptor exists before anything walks to it.
        of::<P>();
        self.parent = Some(TypeId::of::<P>());
        self
    }

    pub fn constructor<F>(&mut self, params: Vec<Param>, build: F) -> &mut Self
    where
        F: Fn(&[Value]) -> LuaResult<T> + Send + Sync + 'static,
    {
        let name = T::type_name();
        self.constructors.push(MethodDescriptor {
            params,
            type_params: 0,
            invoke: Arc::new(move |_, args| {
                Ok(vec![Value::Object(HostObject::new(name, build(args)?))])
            }),
        });
        self
    }

    /// An instance method with a single (possibly nil) result.
    pub fn method<F>(&mut self, name: &'static str, params: Vec<Param>, body: F) -> &mut Self
    where
        F: Fn(&T, &[Value]) -> LuaResult<Value> + Send + Sync + 'static,
    {
        self.push_method(
            name,
            params,
            0,
            Arc::new(move |recv, args| {
                let recv = recv.ok_or_else(no_receiver)?;
                let guard = recv.borrow::<T>()?;
                let out = body(&guard, args)?;
                Ok(if out.is_nil() { Vec::new() } else { vec![out] })
            }),
        )
    }

    /// An instance method that mutates the receiver.
    pub fn method_mut<F>(&mut self, name: &'static str, params: Vec<Param>, body: F) -> &mut Self
    where
        F: Fn(&mut T, &[Value]) -> LuaResult<Value> + Send + Sync + 'static,
    {
        self.push_method(
            name,
            params,
            0,
            Arc::new(move |recv, args| {
                let recv = recv.ok_or_else(no_receiver)?;
                let mut guard = recv.borrow_mut::<T>()?;
                let out = body(&mut guard, args)?;
                Ok(if out.is_nil() { Vec::new() } else { vec![out] })
            }),
        )
    }

    /// An instance method returning multiple values, Lua style.
    pub fn method_multi<F>(&mut self, name: &'static str, params: Vec<Param>, body: F) -> &mut Self
    where
        F: Fn(&T, &[Value]) -> LuaResult<Vec<Value>> + Send + Sync + 'static,
    {
        self.push_method(
            name,
            params,
            0,
            Arc::new(move |recv, args| {
                let recv = recv.ok_or_else(no_receiver)?;
                let guard = recv.borrow::<T>()?;
                body(&guard, args)
            }),
        )
    }

    pub fn static_method<F>(&mut self, name: &'static str, params: Vec<Param>, body: F) -> &mut Self
    where
        F: Fn(&[Value]) -> LuaResult<Value> + Send + Sync + 'static,
    {
        self.push_static_method(name, params, 0, body)
    }

    /// A static method with leading generic type parameters. Call sites must
    /// pass that many type tokens first; `body` receives the full argument
    /// vector, tokens included.
    pub fn static_method_generic<F>(
        &mut self,
        name: &'static str,
        type_params: usize,
        params: Vec<Param>,
        body: F,
    ) -> &mut Self
    where
        F: Fn(&[Value]) -> LuaResult<Value> + Send + Sync + 'static,
    {
        self.push_static_method(name, params, type_params, body)
    }

    pub fn field<G, S>(&mut self, name: &'static str, get: G, set: S) -> &mut Self
    where
        G: Fn(&T) -> Value + Send + Sync + 'static,
        S: Fn(&mut T, Value) -> LuaResult<()> + Send + Sync + 'static,
    {
        let descriptor = FieldDescriptor {
            get: Arc::new(move |recv| {
                let recv = recv.ok_or_else(no_receiver)?;
                let guard = recv.borrow::<T>()?;
                Ok(get(&guard))
            }),
            set: Some(Arc::new(move |recv, value| {
                let recv = recv.ok_or_else(no_receiver)?;
                let mut guard = recv.borrow_mut::<T>()?;
                set(&mut guard, value)
            })),
        };
        self.instance.entry(name).or_default().field = Some(descriptor);
        self
    }

    /// A read-only property.
    pub fn property<G>(&mut self, name: &'static str, get: G) -> &mut Self
    where
        G: Fn(&T) -> LuaResult<Value> + Send + Sync + 'static,
    {
        let descriptor = PropertyDescriptor {
            get: Some(Arc::new(move |recv| {
                let recv = recv.ok_or_else(no_receiver)?;
                let guard = recv.borrow::<T>()?;
                get(&guard)
            })),
            set: None,
            indexer: false,
        };
        self.instance.entry(name).or_default().property = Some(descriptor);
        self
    }

    pub fn property_rw<G, S>(&mut self, name: &'static str, get: G, set: S) -> &mut Self
    where
        G: Fn(&T) -> LuaResult<Value> + Send + Sync + 'static,
        S: Fn(&mut T, Value) -> LuaResult<()> + Send + Sync + 'static,
    {
        let descriptor = PropertyDescriptor {
            get: Some(Arc::new(move |recv| {
                let recv = recv.ok_or_else(no_receiver)?;
                let guard = recv.borrow::<T>()?;
                get(&guard)
            })),
            set: Some(Arc::new(move |recv, value| {
                let recv = recv.ok_or_else(no_receiver)?;
                let mut guard = recv.borrow_mut::<T>()?;
                set(&mut guard, value)
            })),
            indexer: false,
        };
        self.instance.entry(name).or_default().property = Some(descriptor);
        self
    }

    /// An indexer placeholder: plain member reads and assignments reject it.
    pub fn indexer(&mut self, name: &'static str) -> &mut Self {
        self.instance.entry(name).or_default().property = Some(PropertyDescriptor {
            get: None,
            set: None,
            indexer: true,
        });
        self
    }

    pub fn static_field<G, S>(&mut self, name: &'static str, get: G, set: S) -> &mut Self
    where
        G: Fn() -> Value + Send + Sync + 'static,
        S: Fn(Value) -> LuaResult<()> + Send + Sync + 'static,
    {
        let descriptor = FieldDescriptor {
            get: Arc::new(move |_| Ok(get())),
            set: Some(Arc::new(move |_, value| set(value))),
        };
        self.statics.entry(name).or_default().field = Some(descriptor);
        self
    }

    /// An event: reading the member from a script yields a callable that
    /// registers a scripting-side handler through `subscribe`.
    pub fn event<F>(&mut self, name: &'static str, subscribe: F) -> &mut Self
    where
        F: Fn(&mut T, Value) -> LuaResult<()> + Send + Sync + 'static,
    {
        let descriptor = EventDescriptor {
            subscribe: Arc::new(move |recv, handler| {
                let mut guard = recv.borrow_mut::<T>()?;
                subscribe(&mut guard, handler)
            }),
        };
        self.instance.entry(name).or_default().event = Some(descriptor);
        self
    }

    /// Expose another registered type as a nested type member.
    pub fn nested_type<N: UserType>(&mut self, name: &'static str) -> &mut Self {
        self.statics.entry(name).or_default().nested = Some(of::<N>);
        self
    }

    /// A binary operator overload, invoked statically with the two operands
    /// as the argument vector.
    pub fn operator<F>(&mut self, op: Operator, params: Vec<Param>, body: F) -> &mut Self
    where
        F: Fn(&[Value]) -> LuaResult<Value> + Send + Sync + 'static,
    {
        self.operators.entry(op).or_default().push(MethodDescriptor {
            params,
            type_params: 0,
            invoke: Arc::new(move |_, args| Ok(vec![body(args)?])),
        });
        self
    }

    /// Override the textual representation seen by the engine's `tostring`.
    pub fn on_tostring<F>(&mut self, render: F) -> &mut Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        self.stringify = Some(Arc::new(move |obj| {
            let guard = obj.borrow::<T>()?;
            Ok(render(&guard))
        }));
        self
    }

    fn push_method(
        &mut self,
        name: &'static str,
        params: Vec<Param>,
        type_params: usize,
        invoke: MethodFn,
    ) -> &mut Self {
        self.instance.entry(name).or_default().methods.push(MethodDescriptor {
            params,
            type_params,
            invoke,
        });
        self
    }

    fn push_static_method<F>(
        &mut self,
        name: &'static str,
        params: Vec<Param>,
        type_params: usize,
        body: F,
    ) -> &mut Self
    where
        F: Fn(&[Value]) -> LuaResult<Value> + Send + Sync + 'static,
    {
        self.statics.entry(name).or_default().methods.push(MethodDescriptor {
            params,
            type_params,
            invoke: Arc::new(move |_, args| {
                let out = body(args)?;
                Ok(if out.is_nil() { Vec::new() } else { vec![out] })
            }),
        });
        self
    }

    fn finish(self) -> TypeDescriptor {
        TypeDescriptor {
            name: T::type_name(),
            type_id: TypeId::of::<T>(),
            parent: self.parent,
            constructors: self.constructors,
            instance: self.instance,
            statics: self.statics,
            operators: self.operators,
            stringify: self.stringify,
        }
    }
}

static CACHE: OnceLock<RwLock<FxHashMap<TypeId, Arc<TypeDescriptor>>>> = OnceLock::new();
static BY_NAME: OnceLock<RwLock<FxHashMap<&'static str, TypeId>>> = OnceLock::new();

fn cache() -> &'static RwLock<FxHashMap<TypeId, Arc<TypeDescriptor>>> {
    CACHE.get_or_init(Default::default)
}

fn by_name() -> &'static RwLock<FxHashMap<&'static str, TypeId>> {
    BY_NAME.get_or_init(Default::default)
}

/// Get-or-compute the descriptor for `T`. The first computation wins; every
/// later call observes the same memoized descriptor.
pub fn of<T: UserType>() -> Arc<TypeDescriptor> {
    let type_id = TypeId::of::<T>();
    if let Some(found) = cache()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&type_id)
    {
        return Arc::clone(found);
    }

    // Built outside the lock: describe() may recursively register parents or
    // nested types.
    let mut builder = TypeBuilder::<T>::new();
    T::describe(&mut builder);
    let built = Arc::new(builder.finish());

    let mut map = cache().write().unwrap_or_else(PoisonError::into_inner);
    let descriptor = Arc::clone(map.entry(type_id).or_insert(built));
    drop(map);

    by_name()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(descriptor.name(), type_id);
    descriptor
}

/// Look up an already-computed descriptor by type identity.
pub fn find(type_id: TypeId) -> Option<Arc<TypeDescriptor>> {
    cache()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&type_id)
        .cloned()
}

/// Look up a descriptor by its scripting-visible name.
pub fn find_by_name(name: &str) -> Option<Arc<TypeDescriptor>> {
    let type_id = *by_name()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)?;
    find(type_id)
}

/// True when `from` is `to` or declares `to` somewhere on its ancestry
/// chain. The walk is bounded by the chain depth and cannot loop.
pub fn is_assignable(from: TypeId, to: TypeId) -> bool {
    const MAX_DEPTH: usize = 64;
    let mut current = from;
    for _ in 0..MAX_DEPTH {
        if current == to {
            return true;
        }
        match find(current).and_then(|d| d.parent()) {
            Some(parent) => current = parent,
            None => return false,
        }
    }
    false
}
