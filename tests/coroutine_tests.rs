use luahost::{CoroutineStatus, LuaContext, LuaError, LuaFunction, Value};

fn global_function(lua: &LuaContext, name: &str) -> LuaFunction {
    match lua.get_global(name).unwrap() {
        Value::Function(f) => f,
        other => panic!("expected function, got {other:?}"),
    }
}

#[test]
fn coroutines_start_suspended() {
    let lua = LuaContext::new().unwrap();
    lua.eval("function gen() return 1 end").unwrap();
    let co = lua.create_coroutine(&global_function(&lua, "gen")).unwrap();
    assert_eq!(co.status().unwrap(), CoroutineStatus::Suspended);
}

#[test]
fn resume_collects_yields_then_the_final_return() {
    let lua = LuaContext::new().unwrap();
    lua.eval("function gen() coroutine.yield(1) coroutine.yield(2) return 3 end")
        .unwrap();
    let co = lua.create_coroutine(&global_function(&lua, "gen")).unwrap();

    for expected in [1i64, 2, 3] {
        let results = co.resume(&[]).unwrap();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Value::Integer(i) if i == expected));
    }
    assert_eq!(co.status().unwrap(), CoroutineStatus::Dead);
}

#[test]
fn resume_arguments_flow_through_yield() {
    let lua = LuaContext::new().unwrap();
    lua.eval("function echo(a) local b = coroutine.yield(a + 1) return b * 2 end")
        .unwrap();
    let co = lua.create_coroutine(&global_function(&lua, "echo")).unwrap();

    let results = co.resume(&[Value::Integer(5)]).unwrap();
    assert!(matches!(results[0], Value::Integer(6)));
    assert_eq!(co.status().unwrap(), CoroutineStatus::Suspended);

    let results = co.resume(&[Value::Integer(10)]).unwrap();
    assert!(matches!(results[0], Value::Integer(20)));
    assert_eq!(co.status().unwrap(), CoroutineStatus::Dead);
}

#[test]
fn yields_carry_multiple_values() {
    let lua = LuaContext::new().unwrap();
    lua.eval("function multi() coroutine.yield(1, 'two', true) end").unwrap();
    let co = lua.create_coroutine(&global_function(&lua, "multi")).unwrap();

    let results = co.resume(&[]).unwrap();
    assert_eq!(results.len(), 3);
    assert!(matches!(results[0], Value::Integer(1)));
    assert!(matches!(&results[1], Value::String(s) if s == "two"));
    assert!(matches!(results[2], Value::Boolean(true)));

    // The bare end returns nothing.
    assert!(co.resume(&[]).unwrap().is_empty());
    assert_eq!(co.status().unwrap(), CoroutineStatus::Dead);
}

#[test]
fn resuming_a_dead_coroutine_fails_without_touching_it() {
    let lua = LuaContext::new().unwrap();
    lua.eval("function once() return 1, 2, 3 end").unwrap();
    let co = lua.create_coroutine(&global_function(&lua, "once")).unwrap();

    let results = co.resume(&[]).unwrap();
    assert_eq!(results.len(), 3);
    assert!(matches!(results[2], Value::Integer(3)));
    assert_eq!(co.status().unwrap(), CoroutineStatus::Dead);
    match co.resume(&[]).unwrap_err() {
        LuaError::CoroutineState(message) => assert!(message.contains("dead")),
        other => panic!("expected a coroutine state error, got {other:?}"),
    }
    assert_eq!(co.status().unwrap(), CoroutineStatus::Dead);
}

#[test]
fn a_failing_coroutine_reports_the_error_and_dies() {
    let lua = LuaContext::new().unwrap();
    lua.eval("function bad() coroutine.yield(1) error('mid-flight') end")
        .unwrap();
    let co = lua.create_coroutine(&global_function(&lua, "bad")).unwrap();

    co.resume(&[]).unwrap();
    match co.resume(&[]).unwrap_err() {
        LuaError::NativeCall { status, message } => {
            assert!(status.is_failure());
            assert!(message.contains("mid-flight"));
        }
        other => panic!("expected a native call error, got {other:?}"),
    }
    assert_eq!(co.status().unwrap(), CoroutineStatus::Dead);
}

#[test]
fn coroutines_created_by_scripts_cross_to_the_host() {
    let lua = LuaContext::new().unwrap();
    let results = lua
        .eval("return coroutine.create(function() coroutine.yield(7) end)")
        .unwrap();
    let co = match &results[0] {
        Value::Coroutine(co) => co.clone(),
        other => panic!("expected coroutine, got {other:?}"),
    };
    assert_eq!(co.status().unwrap(), CoroutineStatus::Suspended);
    let results = co.resume(&[]).unwrap();
    assert!(matches!(results[0], Value::Integer(7)));
}

#[test]
fn independent_coroutines_interleave() {
    let lua = LuaContext::new().unwrap();
    lua.eval("function counter(start) local n = start while true do coroutine.yield(n) n = n + 1 end end")
        .unwrap();
    let f = global_function(&lua, "counter");
    let a = lua.create_coroutine(&f).unwrap();
    let b = lua.create_coroutine(&f).unwrap();

    assert!(matches!(a.resume(&[Value::Integer(0)]).unwrap()[0], Value::Integer(0)));
    assert!(matches!(b.resume(&[Value::Integer(100)]).unwrap()[0], Value::Integer(100)));
    assert!(matches!(a.resume(&[]).unwrap()[0], Value::Integer(1)));
    assert!(matches!(b.resume(&[]).unwrap()[0], Value::Integer(101)));
}
