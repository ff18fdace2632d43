use std::sync::Arc;

use crate::{
    bytecode::{builder::FunctionBuilder, op_code::OpCode},
    runtime::{
        closure::Closure,
        error::ErrorKind,
        registry::Registry,
        value::Value,
        vm::Vm,
    },
};

use super::array_ops::{array_each, array_get, array_len, array_map, array_pop, array_push};

fn new_vm() -> Vm {
    Vm::new(Registry::new())
}

fn ints(values: &[i64]) -> Value {
    Value::array(values.iter().copied().map(Value::Int).collect())
}

#[test]
fn len_counts_elements() {
    let mut vm = new_vm();
    let result = array_len(&mut vm, &[ints(&[1, 2, 3])]).unwrap();
    assert_eq!(result, Value::Int(3));
}

#[test]
fn push_appends_in_place_and_returns_the_receiver() {
    let mut vm = new_vm();
    let array = ints(&[1]);

    let result = array_push(&mut vm, &[array.clone(), Value::Int(2)]).unwrap();

    assert_eq!(result, array);
    assert_eq!(array.to_string(), "[1, 2]");
}

#[test]
fn pop_on_empty_returns_nil() {
    let mut vm = new_vm();
    assert_eq!(array_pop(&mut vm, &[ints(&[])]).unwrap(), Value::Nil);
    assert_eq!(array_pop(&mut vm, &[ints(&[4])]).unwrap(), Value::Int(4));
}

#[test]
fn get_counts_negative_indices_from_the_end() {
    let mut vm = new_vm();
    let array = ints(&[10, 20, 30]);

    assert_eq!(array_get(&mut vm, &[array.clone(), Value::Int(0)]).unwrap(), Value::Int(10));
    assert_eq!(array_get(&mut vm, &[array, Value::Int(-1)]).unwrap(), Value::Int(30));
}

#[test]
fn get_out_of_range_raises_value_error() {
    let mut vm = new_vm();
    let err = array_get(&mut vm, &[ints(&[1]), Value::Int(3)]).unwrap_err();

    assert_eq!(err.error_kind(), Some(ErrorKind::Value));
    assert_eq!(
        err.to_string(),
        "uncaught ValueError: index 3 out of range for array of length 1"
    );
}

#[test]
fn non_array_receiver_is_a_type_error() {
    let mut vm = new_vm();
    let err = array_len(&mut vm, &[Value::Int(1)]).unwrap_err();
    assert_eq!(err.error_kind(), Some(ErrorKind::Type));
}

fn doubler(vm: &Vm) -> Value {
    let mut b = FunctionBuilder::new(vm.registry(), "double");
    b.params(["x"])
        .get_local(1)
        .load_const(Value::Int(2))
        .op(OpCode::Mul)
        .op(OpCode::Return);
    Value::Closure(Arc::new(Closure::new(b.build_arc().unwrap(), Vec::new())))
}

#[test]
fn map_calls_back_into_the_vm() {
    let mut vm = new_vm();
    let callback = doubler(&vm);

    let result = array_map(&mut vm, &[ints(&[1, 2, 3]), callback]).unwrap();

    assert_eq!(result.to_string(), "[2, 4, 6]");
    assert!(vm.is_idle());
}

#[test]
fn each_iterates_a_snapshot() {
    let mut vm = new_vm();
    let array = ints(&[1, 2]);
    vm.registry().define_global("target", array.clone());
    let mut b = FunctionBuilder::new(vm.registry(), "grow");
    b.params(["x"])
        .get_global("target")
        .get_local(1)
        .invoke("push", 1)
        .op(OpCode::Return);
    let grow = Value::Closure(Arc::new(Closure::new(b.build_arc().unwrap(), Vec::new())));

    array_each(&mut vm, &[array.clone(), grow]).unwrap();

    assert_eq!(array.to_string(), "[1, 2, 1, 2]");
}

#[test]
fn callback_errors_propagate() {
    let mut vm = new_vm();
    let err = array_map(&mut vm, &[ints(&[1]), Value::Int(5)]).unwrap_err();
    assert_eq!(err.error_kind(), Some(ErrorKind::Type));
}
