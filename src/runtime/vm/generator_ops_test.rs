use std::sync::Arc;

use crate::{
    bytecode::{
        builder::FunctionBuilder,
        disassembler::Capture,
        function::BytecodeFunction,
        op_code::OpCode,
    },
    runtime::{
        error::ErrorKind,
        generator::{Generator, GeneratorStatus, GeneratorStep},
        registry::Registry,
        value::Value,
        vm::Vm,
    },
};

fn new_vm() -> Vm {
    Vm::new(Registry::new())
}

fn start(vm: &mut Vm, function: Arc<BytecodeFunction>, args: &[Value]) -> Arc<Generator> {
    match vm.run(function, args).unwrap() {
        Value::Generator(generator) => generator,
        other => panic!("expected a generator, got {other:?}"),
    }
}

/// `count(limit)`: yields 0, 1, ... up to `limit - 1`.
fn count(vm: &Vm) -> Arc<BytecodeFunction> {
    let mut b = FunctionBuilder::new(vm.registry(), "count");
    b.generator()
        .params(["limit"])
        .locals(3)
        .load_const(Value::Int(0))
        .set_local(2);
    let top = b.here();
    let done = b.label();
    b.get_local(2)
        .get_local(1)
        .op(OpCode::Less)
        .jump_if_false(done)
        .get_local(2)
        .op(OpCode::Yield)
        .get_local(2)
        .load_const(Value::Int(1))
        .op(OpCode::Add)
        .set_local(2)
        .jump(top);
    b.bind(done).op(OpCode::ReturnNil);
    b.build_arc().unwrap()
}

#[test]
fn calling_a_generator_function_binds_arguments_only() {
    let mut vm = new_vm();
    let function = count(&vm);
    let generator = start(&mut vm, function, &[Value::Int(2)]);

    assert_eq!(generator.status(), GeneratorStatus::Initial);
    assert!(vm.is_idle());
}

#[test]
fn yields_until_it_returns() {
    let mut vm = new_vm();
    let function = count(&vm);
    let generator = start(&mut vm, function, &[Value::Int(3)]);

    let mut steps = Vec::new();
    for _ in 0..5 {
        steps.push(vm.generator_step(&generator).unwrap());
    }

    assert_eq!(
        steps,
        vec![
            GeneratorStep::Yielded(Value::Int(0)),
            GeneratorStep::Yielded(Value::Int(1)),
            GeneratorStep::Yielded(Value::Int(2)),
            GeneratorStep::Returned(Value::Nil),
            GeneratorStep::Exhausted,
        ]
    );
    assert_eq!(generator.status(), GeneratorStatus::Completed);
    assert!(vm.is_idle());
}

#[test]
fn suspended_between_steps() {
    let mut vm = new_vm();
    let function = count(&vm);
    let generator = start(&mut vm, function, &[Value::Int(3)]);

    assert_eq!(vm.generator_next(&generator).unwrap(), Some(Value::Int(0)));

    assert_eq!(generator.status(), GeneratorStatus::Suspended);
    assert_eq!(vm.stack_pointer(), 0);
}

#[test]
fn reset_rewinds_to_the_bound_arguments() {
    let mut vm = new_vm();
    let function = count(&vm);
    let generator = start(&mut vm, function, &[Value::Int(3)]);
    vm.generator_next(&generator).unwrap();
    vm.generator_next(&generator).unwrap();

    vm.generator_reset(&generator).unwrap();

    assert_eq!(generator.status(), GeneratorStatus::Initial);
    assert_eq!(vm.generator_next(&generator).unwrap(), Some(Value::Int(0)));
}

#[test]
fn failed_generators_refuse_to_resume_until_reset() {
    let mut vm = new_vm();
    let mut b = FunctionBuilder::new(vm.registry(), "boom");
    b.generator()
        .load_const(Value::Int(1))
        .op(OpCode::Yield)
        .load_const(Value::string("bad"))
        .op(OpCode::Throw);
    let generator = start(&mut vm, b.build_arc().unwrap(), &[]);

    assert_eq!(vm.generator_next(&generator).unwrap(), Some(Value::Int(1)));
    let err = vm.generator_next(&generator).unwrap_err();
    assert_eq!(err.thrown(), Some(&Value::string("bad")));
    assert_eq!(generator.status(), GeneratorStatus::Failed);

    let err = vm.generator_next(&generator).unwrap_err();
    assert_eq!(err.error_kind(), Some(ErrorKind::Generator));

    vm.generator_reset(&generator).unwrap();
    assert_eq!(vm.generator_next(&generator).unwrap(), Some(Value::Int(1)));
}

#[test]
fn resuming_a_running_generator_raises() {
    let mut vm = new_vm();
    let mut b = FunctionBuilder::new(vm.registry(), "selfish");
    b.generator()
        .get_global("g")
        .invoke("next", 0)
        .op(OpCode::Yield)
        .op(OpCode::ReturnNil);
    let generator = start(&mut vm, b.build_arc().unwrap(), &[]);
    vm.registry()
        .define_global("g", Value::Generator(generator.clone()));

    let err = vm.generator_next(&generator).unwrap_err();

    assert_eq!(err.error_kind(), Some(ErrorKind::Generator));
    assert!(err.message().contains("generator selfish is already running"));
    assert_eq!(generator.status(), GeneratorStatus::Failed);
}

#[test]
fn iter_next_drives_a_generator_from_bytecode() {
    let mut vm = new_vm();
    let mut main = FunctionBuilder::new(vm.registry(), "main");
    let mut numbers = main.child("numbers");
    numbers
        .generator()
        .load_const(Value::Int(1))
        .op(OpCode::Yield)
        .load_const(Value::Int(2))
        .op(OpCode::Yield)
        .load_const(Value::Int(3))
        .op(OpCode::Yield)
        .op(OpCode::ReturnNil);
    let numbers = numbers.build_arc().unwrap();

    main.locals(2)
        .load_const(Value::Int(0))
        .set_local(1)
        .closure(numbers, &[])
        .call(0);
    let top = main.here();
    let done = main.label();
    main.iter_next(done)
        .get_local(1)
        .op(OpCode::Add)
        .set_local(1)
        .jump(top);
    main.bind(done).get_local(1).op(OpCode::Return);

    assert_eq!(vm.run(main.build_arc().unwrap(), &[]).unwrap(), Value::Int(6));
    assert!(vm.is_idle());
}

#[test]
fn captured_locals_survive_suspension() {
    let mut vm = new_vm();
    let mut cell = FunctionBuilder::new(vm.registry(), "cell");
    let mut getter = cell.child("getter");
    getter.upvalues(1).get_upvalue(0).op(OpCode::Return);
    let getter = getter.build_arc().unwrap();

    cell.generator()
        .locals(2)
        .load_const(Value::Int(10))
        .set_local(1)
        .closure(
            getter,
            &[Capture {
                local: true,
                index: 1,
            }],
        )
        .op(OpCode::Yield)
        .load_const(Value::Int(20))
        .set_local(1)
        .get_local(1)
        .op(OpCode::Yield)
        .op(OpCode::ReturnNil);
    let generator = start(&mut vm, cell.build_arc().unwrap(), &[]);

    let read = vm.generator_next(&generator).unwrap().unwrap();
    assert_eq!(vm.call_value(&read, &[]).unwrap(), Value::Int(10));

    assert_eq!(vm.generator_next(&generator).unwrap(), Some(Value::Int(20)));
    assert_eq!(vm.call_value(&read, &[]).unwrap(), Value::Int(20));
    assert_eq!(vm.open_upvalue_count(), 0);
}
