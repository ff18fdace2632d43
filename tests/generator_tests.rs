use std::sync::Arc;

use kiln::bytecode::{builder::FunctionBuilder, function::BytecodeFunction, op_code::OpCode};
use kiln::runtime::{
    error::ErrorKind,
    generator::{Generator, GeneratorStatus},
    registry::Registry,
    value::Value,
    vm::Vm,
};

fn new_vm() -> Vm {
    Vm::new(Registry::new())
}

/// Generator yielding `"a"`, `"b"`, `"c"` and returning `"end"`.
fn letters(vm: &Vm) -> Arc<BytecodeFunction> {
    let mut b = FunctionBuilder::new(vm.registry(), "letters");
    b.generator();
    for letter in ["a", "b", "c"] {
        b.load_const(Value::string(letter)).op(OpCode::Yield);
    }
    b.load_const(Value::string("end")).op(OpCode::Return);
    b.build_arc().unwrap()
}

fn start(vm: &mut Vm, function: Arc<BytecodeFunction>) -> Arc<Generator> {
    match vm.run(function, &[]).unwrap() {
        Value::Generator(generator) => generator,
        other => panic!("expected a generator, got {other:?}"),
    }
}

#[test]
fn yields_in_order_then_signals_completion() {
    let mut vm = new_vm();
    let function = letters(&vm);
    let generator = start(&mut vm, function);

    let mut seen = Vec::new();
    while let Some(value) = vm.generator_next(&generator).unwrap() {
        seen.push(value);
    }

    assert_eq!(
        seen,
        vec![Value::string("a"), Value::string("b"), Value::string("c")]
    );
    assert_eq!(vm.generator_next(&generator).unwrap(), None);
    assert_eq!(generator.status(), GeneratorStatus::Completed);
}

#[test]
fn reset_replays_from_the_first_value() {
    let mut vm = new_vm();
    let function = letters(&vm);
    let generator = start(&mut vm, function);
    while vm.generator_next(&generator).unwrap().is_some() {}

    vm.generator_reset(&generator).unwrap();

    assert_eq!(
        vm.generator_next(&generator).unwrap(),
        Some(Value::string("a"))
    );
}

#[test]
fn next_from_bytecode_raises_stop_iteration_when_done() {
    let mut vm = new_vm();
    let function = letters(&vm);
    let generator = start(&mut vm, function);
    vm.registry()
        .define_global("g", Value::Generator(generator.clone()));
    let mut b = FunctionBuilder::new(vm.registry(), "drain");
    for _ in 0..4 {
        b.get_global("g").invoke("next", 0).op(OpCode::Pop);
    }
    b.op(OpCode::ReturnNil);

    let err = vm.run(b.build_arc().unwrap(), &[]).unwrap_err();

    assert_eq!(err.error_kind(), Some(ErrorKind::StopIteration));
}

#[test]
fn status_is_visible_to_bytecode() {
    let mut vm = new_vm();
    let function = letters(&vm);
    let generator = start(&mut vm, function);
    vm.generator_next(&generator).unwrap();

    let status = vm
        .invoke(&Value::Generator(generator), "status", &[])
        .unwrap();

    assert_eq!(status, Value::string("suspended"));
}

#[test]
fn generators_can_be_resumed_from_another_vm() {
    let mut vm = new_vm();
    let function = letters(&vm);
    let generator = start(&mut vm, function);
    assert_eq!(
        vm.generator_next(&generator).unwrap(),
        Some(Value::string("a"))
    );

    let mut other = vm.fork();

    assert_eq!(
        other.generator_next(&generator).unwrap(),
        Some(Value::string("b"))
    );
    assert_eq!(
        vm.generator_next(&generator).unwrap(),
        Some(Value::string("c"))
    );
}

#[test]
fn custom_reset_entries_skip_the_prologue() {
    let mut vm = new_vm();
    let mut b = FunctionBuilder::new(vm.registry(), "counted");
    b.generator()
        .get_global("runs")
        .load_const(Value::Int(1))
        .op(OpCode::Add)
        .set_global("runs");
    let body = b.here();
    b.get_global("runs").op(OpCode::Yield).op(OpCode::ReturnNil);
    b.reset_entry(body);
    vm.registry().define_global("runs", Value::Int(0));
    let generator = start(&mut vm, b.build_arc().unwrap());

    assert_eq!(vm.generator_next(&generator).unwrap(), Some(Value::Int(1)));
    vm.generator_reset(&generator).unwrap();

    assert_eq!(vm.generator_next(&generator).unwrap(), Some(Value::Int(1)));
    assert_eq!(vm.registry().global_named("runs"), Some(Value::Int(1)));
}

#[test]
fn a_throwing_body_fails_the_generator() {
    let mut vm = new_vm();
    let mut b = FunctionBuilder::new(vm.registry(), "broken");
    b.generator()
        .load_const(Value::Int(1))
        .load_const(Value::Int(0))
        .op(OpCode::Div)
        .op(OpCode::Yield)
        .op(OpCode::ReturnNil);
    let generator = start(&mut vm, b.build_arc().unwrap());

    let err = vm.generator_next(&generator).unwrap_err();

    assert_eq!(err.error_kind(), Some(ErrorKind::Arithmetic));
    assert_eq!(generator.status(), GeneratorStatus::Failed);
    assert!(vm.is_idle());
}
