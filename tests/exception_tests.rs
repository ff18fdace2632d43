use std::sync::Arc;

use kiln::bytecode::{builder::FunctionBuilder, op_code::OpCode};
use kiln::runtime::{
    closure::Closure,
    error::ErrorKind,
    registry::Registry,
    value::Value,
    vm::Vm,
};

fn new_vm() -> Vm {
    let vm = Vm::new(Registry::new());
    vm.registry().define_global("log", Value::array(Vec::new()));
    vm
}

fn log(b: &mut FunctionBuilder, entry: &str) {
    b.get_global("log")
        .load_const(Value::string(entry))
        .invoke("push", 1)
        .op(OpCode::Pop);
}

fn logged(vm: &Vm) -> String {
    vm.registry()
        .global_named("log")
        .map(|log| log.to_string())
        .unwrap_or_default()
}

/// `try { throw "boom" } catch { <catch_body> } finally { log("finally") }`
fn try_catch_finally(vm: &Vm, catch_body: impl FnOnce(&mut FunctionBuilder)) -> FunctionBuilder {
    let mut b = FunctionBuilder::new(vm.registry(), "main");
    let finally_from = b.here();
    let try_from = b.here();
    b.load_const(Value::string("boom")).op(OpCode::Throw);
    let try_to = b.here();
    let handler = b.here();
    b.op(OpCode::Pop);
    catch_body(&mut b);
    b.op(OpCode::EnterFinally);
    let finally_to = b.here();
    let finally = b.here();
    log(&mut b, "finally");
    b.op(OpCode::EndFinally)
        .get_global("log")
        .op(OpCode::Return);
    b.catch(try_from, try_to, handler)
        .finally(finally_from, finally_to, finally);
    b
}

#[test]
fn finally_runs_once_after_the_catch_body() {
    let mut vm = new_vm();
    let b = try_catch_finally(&vm, |b| log(b, "catch"));

    vm.run(b.build_arc().unwrap(), &[]).unwrap();

    assert_eq!(logged(&vm), r#"["catch", "finally"]"#);
}

#[test]
fn finally_runs_once_when_the_catch_body_throws() {
    let mut vm = new_vm();
    let b = try_catch_finally(&vm, |b| {
        log(b, "catch");
        b.load_const(Value::string("again")).op(OpCode::Throw);
    });

    let err = vm.run(b.build_arc().unwrap(), &[]).unwrap_err();

    assert_eq!(err.thrown(), Some(&Value::string("again")));
    assert_eq!(logged(&vm), r#"["catch", "finally"]"#);
    assert!(vm.is_idle());
}

#[test]
fn errors_from_native_callbacks_are_catchable() {
    let mut vm = new_vm();
    let mut main = FunctionBuilder::new(vm.registry(), "main");
    let mut explode = main.child("explode");
    explode
        .params(["x"])
        .get_local(1)
        .load_const(Value::Int(0))
        .op(OpCode::Div)
        .op(OpCode::Return);
    let explode = explode.build_arc().unwrap();

    let from = main.here();
    main.load_const(Value::Int(1))
        .array(1)
        .closure(explode, &[])
        .invoke("map", 1)
        .op(OpCode::Return);
    let to = main.here();
    let handler = main.here();
    main.invoke("kind", 0).op(OpCode::Return);
    main.catch(from, to, handler);

    let result = vm.run(main.build_arc().unwrap(), &[]).unwrap();

    assert_eq!(result, Value::string("ArithmeticError"));
    assert!(vm.is_idle());
}

#[test]
fn user_errors_render_with_their_message() {
    let mut vm = new_vm();
    let mut b = FunctionBuilder::new(vm.registry(), "main");
    b.get_global("Error")
        .load_const(Value::string("bad input"))
        .call(1)
        .op(OpCode::Throw);

    let err = vm.run(b.build_arc().unwrap(), &[]).unwrap_err();

    assert_eq!(err.error_kind(), Some(ErrorKind::User));
    assert!(err.to_string().starts_with("uncaught Error: bad input\nStack trace:"));
}

#[test]
fn host_calls_surface_errors_with_a_trace() {
    let mut vm = new_vm();
    let mut b = FunctionBuilder::new(vm.registry(), "fail");
    b.file("lib.kn")
        .line(12)
        .get_global("nowhere")
        .op(OpCode::Return);
    let fail = Value::Closure(Arc::new(Closure::new(b.build_arc().unwrap(), Vec::new())));

    let err = vm.call_value(&fail, &[]).unwrap_err();

    insta::assert_snapshot!(err.to_string(), @r"
    uncaught NameError: undefined global 'nowhere'
    Stack trace:
      at fail (lib.kn:12) tail-calls=0
    ");
}

#[test]
fn mutex_misuse_is_a_catchable_resource_error() {
    let mut vm = new_vm();
    let mut b = FunctionBuilder::new(vm.registry(), "main");
    let from = b.here();
    b.get_global("Mutex")
        .call(0)
        .invoke("unlock", 0)
        .op(OpCode::Return);
    let to = b.here();
    let handler = b.here();
    b.invoke("kind", 0).op(OpCode::Return);
    b.catch(from, to, handler);

    let result = vm.run(b.build_arc().unwrap(), &[]).unwrap();

    assert_eq!(result, Value::string("ResourceError"));
}
