use luahost::{
    Converter, FromValue, HostObject, LuaContext, LuaError, LuaResult, Operator, Param, TypeBuilder,
    UserType, Value,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

struct Vector {
    x: f64,
    y: f64,
}

impl UserType for Vector {
    fn type_name() -> &'static str {
        "Vector"
    }

    fn describe(builder: &mut TypeBuilder<Self>) {
        builder
            .constructor(vec![Param::number("x"), Param::number("y")], |args| {
                Ok(Vector {
                    x: f64::from_value(args[0].clone())?,
                    y: f64::from_value(args[1].clone())?,
                })
            })
            .field(
                "x",
                |v| Value::Number(v.x),
                |v, value| {
                    v.x = f64::from_value(value)?;
                    Ok(())
                },
            )
            .field(
                "y",
                |v| Value::Number(v.y),
                |v, value| {
                    v.y = f64::from_value(value)?;
                    Ok(())
                },
            )
            .method("length", Vec::new(), |v, _| {
                Ok(Value::Number((v.x * v.x + v.y * v.y).sqrt()))
            })
            .method_mut("scale", vec![Param::number("factor")], |v, args| {
                let factor = f64::from_value(args[0].clone())?;
                v.x *= factor;
                v.y *= factor;
                Ok(Value::Nil)
            })
            .method_multi("parts", Vec::new(), |v, _| {
                Ok(vec![Value::Number(v.x), Value::Number(v.y)])
            })
            .property("magnitude", |v| {
                Ok(Value::Number((v.x * v.x + v.y * v.y).sqrt()))
            })
            .operator(
                Operator::Add,
                vec![Param::object::<Vector>("a"), Param::object::<Vector>("b")],
                |args| {
                    let (a, b) = match (&args[0], &args[1]) {
                        (Value::Object(a), Value::Object(b)) => {
                            (a.borrow::<Vector>()?, b.borrow::<Vector>()?)
                        }
                        _ => return Err(LuaError::Conversion("expected two vectors".into())),
                    };
                    Ok(Value::Object(HostObject::new(
                        "Vector",
                        Vector {
                            x: a.x + b.x,
                            y: a.y + b.y,
                        },
                    )))
                },
            )
            .on_tostring(|v| format!("({}, {})", v.x, v.y));
    }
}

fn vector_context() -> LuaContext {
    let lua = LuaContext::new().unwrap();
    lua.import_type::<Vector>().unwrap();
    lua
}

#[test]
fn constructor_and_field_access() {
    let lua = vector_context();
    let results = lua.eval("local v = Vector(3, 4) return v.x, v.y").unwrap();
    assert!(matches!(results[0], Value::Number(x) if x == 3.0));
    assert!(matches!(results[1], Value::Number(y) if y == 4.0));
}

#[test]
fn field_assignment_mutates_the_host_object() {
    let lua = vector_context();
    let results = lua
        .eval("local v = Vector(1, 1) v.x = 9 return v.x, v:length()")
        .unwrap();
    assert!(matches!(results[0], Value::Number(x) if x == 9.0));
    assert!(matches!(results[1], Value::Number(l) if l == (82.0f64).sqrt()));
}

#[test]
fn bound_methods_use_colon_syntax() {
    let lua = vector_context();
    let results = lua.eval("return Vector(3, 4):length()").unwrap();
    assert!(matches!(results[0], Value::Number(l) if l == 5.0));
}

#[test]
fn mutating_methods_write_through_the_proxy() {
    let lua = vector_context();
    let results = lua
        .eval("local v = Vector(1, 2) v:scale(3) return v.x, v.y")
        .unwrap();
    assert!(matches!(results[0], Value::Number(x) if x == 3.0));
    assert!(matches!(results[1], Value::Number(y) if y == 6.0));
}

#[test]
fn multi_valued_methods_return_every_value() {
    let lua = vector_context();
    let results = lua.eval("return Vector(1, 2):parts()").unwrap();
    assert_eq!(results.len(), 2);
    assert!(matches!(results[0], Value::Number(x) if x == 1.0));
    assert!(matches!(results[1], Value::Number(y) if y == 2.0));
}

#[test]
fn read_only_properties_reject_assignment() {
    let lua = vector_context();
    let results = lua
        .eval(
            "local v = Vector(3, 4)\n\
             local ok, err = pcall(function() v.magnitude = 1 end)\n\
             return v.magnitude, ok, err",
        )
        .unwrap();
    assert!(matches!(results[0], Value::Number(m) if m == 5.0));
    assert!(matches!(results[1], Value::Boolean(false)));
    assert!(matches!(&results[2], Value::String(s) if s.contains("read-only")));
}

#[test]
fn operator_overloads_dispatch_through_metatables() {
    let lua = vector_context();
    let results = lua
        .eval("local s = Vector(1, 2) + Vector(3, 4) return s.x, s.y")
        .unwrap();
    assert!(matches!(results[0], Value::Number(x) if x == 4.0));
    assert!(matches!(results[1], Value::Number(y) if y == 6.0));
}

#[test]
fn tostring_uses_the_declared_renderer() {
    let lua = vector_context();
    let results = lua.eval("return tostring(Vector(1, 2))").unwrap();
    assert!(matches!(&results[0], Value::String(s) if s == "(1, 2)"));
}

#[test]
fn type_tokens_render_their_name() {
    let lua = vector_context();
    let results = lua.eval("return tostring(Vector)").unwrap();
    assert!(matches!(&results[0], Value::String(s) if s == "type 'Vector'"));
}

#[test]
fn import_binds_a_registered_type_by_name() {
    let lua = LuaContext::new().unwrap();
    lua.register_type::<Vector>();
    let results = lua
        .eval("local V = import('Vector') return V(3, 4):length()")
        .unwrap();
    assert!(matches!(results[0], Value::Number(l) if l == 5.0));
    // import also binds the global as a side effect.
    let results = lua.eval("return Vector(0, 1):length()").unwrap();
    assert!(matches!(results[0], Value::Number(l) if l == 1.0));
}

#[test]
fn importing_an_unknown_type_fails() {
    let lua = LuaContext::new().unwrap();
    let results = lua
        .eval("local ok, err = pcall(import, 'NoSuchType') return ok, err")
        .unwrap();
    assert!(matches!(results[0], Value::Boolean(false)));
    assert!(matches!(&results[1], Value::String(s) if s.contains("NoSuchType")));
}

#[test]
fn unknown_members_raise_descriptive_errors() {
    let lua = vector_context();
    let results = lua
        .eval("local ok, err = pcall(function() return Vector(1, 1).z end) return ok, err")
        .unwrap();
    assert!(matches!(results[0], Value::Boolean(false)));
    assert!(matches!(&results[1], Value::String(s) if s.contains("z")));
}

#[test]
fn host_objects_round_trip_by_identity() {
    let lua = vector_context();
    lua.set_global("v", HostObject::new("Vector", Vector { x: 5.0, y: 12.0 }))
        .unwrap();
    let results = lua.eval("return v:length()").unwrap();
    assert!(matches!(results[0], Value::Number(l) if l == 13.0));

    let object = match lua.get_global("v").unwrap() {
        Value::Object(o) => o,
        other => panic!("expected object, got {other:?}"),
    };
    assert_eq!(object.type_name(), "Vector");
    assert_eq!(object.borrow::<Vector>().unwrap().x, 5.0);
}

// ---------------------------------------------------------------------------
// Overload resolution through the scripting surface.
// ---------------------------------------------------------------------------

struct Calc;

impl UserType for Calc {
    fn type_name() -> &'static str {
        "Calc"
    }

    fn describe(builder: &mut TypeBuilder<Self>) {
        builder
            .static_method("pick", vec![Param::integer("a")], |_| {
                Ok(Value::String("one".into()))
            })
            .static_method(
                "pick",
                vec![Param::integer("a"), Param::integer("b")],
                |_| Ok(Value::String("two".into())),
            )
            .static_method(
                "pick",
                vec![Param::variadic("rest", luahost::ParamKind::Integer)],
                |args| match &args[0] {
                    Value::Array(items) => Ok(Value::String(format!("many:{}", items.len()))),
                    other => Err(LuaError::Conversion(format!(
                        "expected collected array, got {}",
                        other.kind_name()
                    ))),
                },
            )
            .static_method(
                "halve",
                vec![Param::integer("n"), Param::integer("by").optional(Value::Integer(2))],
                |args| match (&args[0], &args[1]) {
                    (Value::Integer(n), Value::Integer(by)) => Ok(Value::Integer(n / by)),
                    _ => Err(LuaError::Conversion("expected integers".into())),
                },
            );
    }
}

#[test]
fn best_scoring_overload_wins() {
    let lua = LuaContext::new().unwrap();
    lua.import_type::<Calc>().unwrap();
    let results = lua.eval("return Calc.pick(1, 2)").unwrap();
    assert!(matches!(&results[0], Value::String(s) if s == "two"));
}

#[test]
fn ties_prefer_the_first_declared_overload() {
    let lua = LuaContext::new().unwrap();
    lua.import_type::<Calc>().unwrap();
    // Both pick(a) and the variadic form score 1.0 for one integer.
    let results = lua.eval("return Calc.pick(1)").unwrap();
    assert!(matches!(&results[0], Value::String(s) if s == "one"));
}

#[test]
fn variadic_overload_catches_the_rest() {
    let lua = LuaContext::new().unwrap();
    lua.import_type::<Calc>().unwrap();
    let results = lua.eval("return Calc.pick(1, 2, 3, 4)").unwrap();
    assert!(matches!(&results[0], Value::String(s) if s == "many:4"));
}

#[test]
fn optional_parameters_take_their_default() {
    let lua = LuaContext::new().unwrap();
    lua.import_type::<Calc>().unwrap();
    let results = lua.eval("return Calc.halve(10), Calc.halve(10, 5)").unwrap();
    assert!(matches!(results[0], Value::Integer(5)));
    assert!(matches!(results[1], Value::Integer(2)));
}

#[test]
fn no_viable_overload_raises() {
    let lua = LuaContext::new().unwrap();
    lua.import_type::<Calc>().unwrap();
    let results = lua
        .eval("local ok, err = pcall(function() return Calc.pick('nope') end) return ok, err")
        .unwrap();
    assert!(matches!(results[0], Value::Boolean(false)));
    assert!(matches!(&results[1], Value::String(s) if s.contains("overload")));
}

// ---------------------------------------------------------------------------
// Ambiguity and host failures.
// ---------------------------------------------------------------------------

struct Gauge {
    level: i64,
}

impl UserType for Gauge {
    fn type_name() -> &'static str {
        "Gauge"
    }

    fn describe(builder: &mut TypeBuilder<Self>) {
        builder
            .constructor(Vec::new(), |_| Ok(Gauge { level: 0 }))
            .field(
                "level",
                |g| Value::Integer(g.level),
                |g, value| {
                    g.level = i64::from_value(value)?;
                    Ok(())
                },
            )
            // Same name, different category: structurally ambiguous.
            .method("level", Vec::new(), |g, _| Ok(Value::Integer(g.level)))
            .method("fail", Vec::new(), |_, _| {
                Err(LuaError::callback_msg("gauge exploded"))
            });
    }
}

#[test]
fn ambiguous_members_raise_instead_of_guessing() {
    let lua = LuaContext::new().unwrap();
    lua.import_type::<Gauge>().unwrap();
    let results = lua
        .eval("local ok, err = pcall(function() return Gauge().level end) return ok, err")
        .unwrap();
    assert!(matches!(results[0], Value::Boolean(false)));
    assert!(matches!(&results[1], Value::String(s) if s.contains("ambiguous")));
}

#[test]
fn host_errors_become_catchable_script_errors() {
    let lua = LuaContext::new().unwrap();
    lua.import_type::<Gauge>().unwrap();
    let results = lua
        .eval("local ok, err = pcall(function() local g = Gauge() g:fail() end) return ok, err")
        .unwrap();
    assert!(matches!(results[0], Value::Boolean(false)));
    assert!(matches!(&results[1], Value::String(s) if s.contains("gauge exploded")));
}

// ---------------------------------------------------------------------------
// Statics, nesting and generic methods.
// ---------------------------------------------------------------------------

static TALLY: AtomicI64 = AtomicI64::new(0);

struct Tally;

impl UserType for Tally {
    fn type_name() -> &'static str {
        "Tally"
    }

    fn describe(builder: &mut TypeBuilder<Self>) {
        builder
            .static_field(
                "total",
                || Value::Integer(TALLY.load(Ordering::SeqCst)),
                |value| {
                    TALLY.store(i64::from_value(value)?, Ordering::SeqCst);
                    Ok(())
                },
            )
            .nested_type::<Gauge>("Gauge");
    }
}

#[test]
fn static_fields_read_and_write_through_the_token() {
    let lua = LuaContext::new().unwrap();
    lua.import_type::<Tally>().unwrap();
    let results = lua.eval("Tally.total = 7 return Tally.total").unwrap();
    assert!(matches!(results[0], Value::Integer(7)));
}

#[test]
fn nested_types_construct_through_their_owner() {
    let lua = LuaContext::new().unwrap();
    lua.import_type::<Tally>().unwrap();
    let results = lua.eval("local g = Tally.Gauge() g.fail = nil").unwrap_err();
    // Assigning a method slot is rejected, proving the nested token resolved.
    assert!(results.to_string().contains("cannot be assigned"));
}

struct Factory;

impl UserType for Factory {
    fn type_name() -> &'static str {
        "Factory"
    }

    fn describe(builder: &mut TypeBuilder<Self>) {
        builder.static_method_generic("make", 1, vec![Param::integer("count")], |args| {
            let Value::TypeToken(token) = &args[0] else {
                return Err(LuaError::Conversion("expected a type token".into()));
            };
            let Value::Integer(count) = &args[1] else {
                return Err(LuaError::Conversion("expected a count".into()));
            };
            Ok(Value::String(format!("{}x{count}", token.name())))
        });
    }
}

#[test]
fn generic_methods_consume_leading_type_tokens() {
    let lua = LuaContext::new().unwrap();
    lua.import_type::<Factory>().unwrap();
    lua.import_type::<Vector>().unwrap();
    let results = lua.eval("return Factory.make(Vector, 3)").unwrap();
    assert!(matches!(&results[0], Value::String(s) if s == "Vectorx3"));

    let results = lua
        .eval("local ok = pcall(function() return Factory.make(3) end) return ok")
        .unwrap();
    assert!(matches!(results[0], Value::Boolean(false)));
}

// ---------------------------------------------------------------------------
// Events.
// ---------------------------------------------------------------------------

struct Button {
    label: String,
    handlers: Vec<Value>,
}

impl UserType for Button {
    fn type_name() -> &'static str {
        "Button"
    }

    fn describe(builder: &mut TypeBuilder<Self>) {
        builder
            .constructor(vec![Param::string("label")], |args| {
                Ok(Button {
                    label: String::from_value(args[0].clone())?,
                    handlers: Vec::new(),
                })
            })
            .event("on_click", |button, handler| {
                button.handlers.push(handler);
                Ok(())
            })
            .method("click", Vec::new(), |button, _| {
                for handler in &button.handlers {
                    if let Value::Function(f) = handler {
                        f.call(&[Value::String(button.label.clone())])?;
                    }
                }
                Ok(Value::Nil)
            });
    }
}

#[test]
fn events_subscribe_script_handlers() {
    let lua = LuaContext::new().unwrap();
    lua.import_type::<Button>().unwrap();
    lua.eval(
        "local b = Button('go')\n\
         b.on_click(function(label) seen = label end)\n\
         b:click()",
    )
    .unwrap();
    assert!(matches!(lua.get_global("seen").unwrap(), Value::String(s) if s == "go"));
}

struct Counter {
    n: i64,
    handlers: Vec<Value>,
}

impl UserType for Counter {
    fn type_name() -> &'static str {
        "Counter"
    }

    fn describe(builder: &mut TypeBuilder<Self>) {
        builder
            .constructor(Vec::new(), |_| {
                Ok(Counter {
                    n: 0,
                    handlers: Vec::new(),
                })
            })
            .field(
                "n",
                |c| Value::Integer(c.n),
                |c, value| {
                    c.n = i64::from_value(value)?;
                    Ok(())
                },
            )
            .event("on_tick", |c, handler| {
                c.handlers.push(handler);
                Ok(())
            })
            .method("tick", Vec::new(), |c, _| {
                for handler in &c.handlers {
                    if let Value::Function(f) = handler {
                        f.call(&[])?;
                    }
                }
                Ok(Value::Integer(c.n))
            });
    }
}

#[test]
fn reentrant_writes_during_a_method_raise_instead_of_blocking() {
    let lua = LuaContext::new().unwrap();
    lua.import_type::<Counter>().unwrap();
    // The handler runs while tick() still holds the receiver's borrow; the
    // write must surface as a catchable error, never hang the call.
    let results = lua
        .eval(
            "local c = Counter()\n\
             c.on_tick(function() c.n = c.n + 1 end)\n\
             local ok, err = pcall(function() return c:tick() end)\n\
             return ok, err, c.n",
        )
        .unwrap();
    assert!(matches!(results[0], Value::Boolean(false)));
    assert!(matches!(&results[1], Value::String(s) if s.contains("already borrowed")));
    assert!(matches!(results[2], Value::Integer(0)));
}

#[test]
fn event_subscription_requires_a_function() {
    let lua = LuaContext::new().unwrap();
    lua.import_type::<Button>().unwrap();
    let results = lua
        .eval("local b = Button('x') local ok = pcall(function() b.on_click(42) end) return ok")
        .unwrap();
    assert!(matches!(results[0], Value::Boolean(false)));
}

// ---------------------------------------------------------------------------
// Converter overrides and ancestry.
// ---------------------------------------------------------------------------

struct Celsius {
    degrees: f64,
}

impl UserType for Celsius {
    fn type_name() -> &'static str {
        "Celsius"
    }

    fn describe(_: &mut TypeBuilder<Self>) {}
}

struct Kelvin {
    degrees: f64,
}

impl UserType for Kelvin {
    fn type_name() -> &'static str {
        "Kelvin"
    }

    fn describe(builder: &mut TypeBuilder<Self>) {
        builder.extends::<Celsius>();
    }
}

struct DegreesConverter;

impl Converter for DegreesConverter {
    unsafe fn push(
        &self,
        marshal: &Arc<luahost::marshal::Marshal>,
        state: *mut luahost::ffi::lua_State,
        object: &HostObject,
    ) -> LuaResult<()> {
        let degrees = if let Ok(c) = object.borrow::<Celsius>() {
            c.degrees
        } else {
            object.borrow::<Kelvin>()?.degrees
        };
        unsafe { marshal.push(state, &Value::Number(degrees)) }
    }
}

#[test]
fn registered_converters_replace_the_opaque_default() {
    let lua = LuaContext::new().unwrap();
    lua.register_type::<Celsius>();
    lua.register_converter::<Celsius>(Arc::new(DegreesConverter));
    lua.set_global("c", HostObject::new("Celsius", Celsius { degrees: 21.5 }))
        .unwrap();
    let results = lua.eval("return type(c), c").unwrap();
    assert!(matches!(&results[0], Value::String(s) if s == "number"));
    assert!(matches!(results[1], Value::Number(d) if d == 21.5));
}

#[test]
fn converter_lookup_walks_the_ancestry_chain() {
    let lua = LuaContext::new().unwrap();
    lua.register_type::<Kelvin>();
    lua.register_converter::<Celsius>(Arc::new(DegreesConverter));
    lua.set_global("k", HostObject::new("Kelvin", Kelvin { degrees: 300.0 }))
        .unwrap();
    let results = lua.eval("return type(k), k").unwrap();
    assert!(matches!(&results[0], Value::String(s) if s == "number"));
    assert!(matches!(results[1], Value::Number(d) if d == 300.0));
}

#[test]
fn without_a_converter_objects_stay_opaque() {
    let lua = LuaContext::new().unwrap();
    lua.register_type::<Celsius>();
    lua.set_global("c", HostObject::new("Celsius", Celsius { degrees: 0.0 }))
        .unwrap();
    let results = lua.eval("return type(c)").unwrap();
    assert!(matches!(&results[0], Value::String(s) if s == "userdata"));
}

// ---------------------------------------------------------------------------
// Ancestry-aware parameter matching.
// ---------------------------------------------------------------------------

struct Thermo;

impl UserType for Thermo {
    fn type_name() -> &'static str {
        "Thermo"
    }

    fn describe(builder: &mut TypeBuilder<Self>) {
        builder.static_method("label", vec![Param::object::<Celsius>("t")], |args| {
            match &args[0] {
                Value::Object(o) => Ok(Value::String(o.type_name().to_owned())),
                other => Err(LuaError::Conversion(format!(
                    "expected an object, got {}",
                    other.kind_name()
                ))),
            }
        });
    }
}

#[test]
fn descendant_objects_satisfy_ancestor_parameters() {
    let lua = LuaContext::new().unwrap();
    lua.register_type::<Kelvin>();
    lua.import_type::<Thermo>().unwrap();
    lua.set_global("k", HostObject::new("Kelvin", Kelvin { degrees: 1.0 }))
        .unwrap();
    let results = lua.eval("return Thermo.label(k)").unwrap();
    assert!(matches!(&results[0], Value::String(s) if s == "Kelvin"));
}
