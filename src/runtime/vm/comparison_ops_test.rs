use std::sync::Arc;

use crate::{
    bytecode::{builder::FunctionBuilder, op_code::OpCode},
    runtime::{
        class::{Class, Instance},
        closure::Closure,
        error::ErrorKind,
        registry::Registry,
        value::Value,
        vm::Vm,
    },
};

fn new_vm() -> Vm {
    Vm::new(Registry::new())
}

fn compare(vm: &mut Vm, left: Value, right: Value, op: OpCode) -> Value {
    vm.push(left).unwrap();
    vm.push(right).unwrap();
    vm.execute_comparison(op).unwrap();
    vm.pop().unwrap()
}

#[test]
fn integers_order() {
    let mut vm = new_vm();
    assert_eq!(compare(&mut vm, Value::Int(1), Value::Int(2), OpCode::Less), Value::Bool(true));
    assert_eq!(compare(&mut vm, Value::Int(2), Value::Int(2), OpCode::LessEqual), Value::Bool(true));
    assert_eq!(compare(&mut vm, Value::Int(2), Value::Int(2), OpCode::Greater), Value::Bool(false));
}

#[test]
fn mixed_numbers_compare_numerically() {
    let mut vm = new_vm();
    assert_eq!(compare(&mut vm, Value::Int(3), Value::Float(3.0), OpCode::Equal), Value::Bool(true));
    assert_eq!(
        compare(&mut vm, Value::Float(2.5), Value::Int(3), OpCode::GreaterEqual),
        Value::Bool(false)
    );
}

#[test]
fn nan_compares_false() {
    let mut vm = new_vm();
    assert_eq!(compare(&mut vm, Value::Float(f64::NAN), Value::Int(1), OpCode::Less), Value::Bool(false));
    assert_eq!(
        compare(&mut vm, Value::Float(f64::NAN), Value::Float(f64::NAN), OpCode::GreaterEqual),
        Value::Bool(false)
    );
}

#[test]
fn strings_compare_lexicographically() {
    let mut vm = new_vm();
    assert_eq!(
        compare(&mut vm, Value::string("apple"), Value::string("banana"), OpCode::Less),
        Value::Bool(true)
    );
    assert_eq!(
        compare(&mut vm, Value::string("a"), Value::string("a"), OpCode::NotEqual),
        Value::Bool(false)
    );
}

#[test]
fn equality_of_unrelated_types_is_false() {
    let mut vm = new_vm();
    assert_eq!(compare(&mut vm, Value::Nil, Value::Bool(false), OpCode::Equal), Value::Bool(false));
    assert_eq!(compare(&mut vm, Value::string("1"), Value::Int(1), OpCode::NotEqual), Value::Bool(true));
}

#[test]
fn ordering_unrelated_types_raises() {
    let mut vm = new_vm();
    vm.push(Value::string("a")).unwrap();
    vm.push(Value::Int(1)).unwrap();

    let err = vm.execute_comparison(OpCode::Greater).unwrap_err();

    assert_eq!(err.error_kind(), Some(ErrorKind::Type));
}

/// Instances of `Version` compare through the class methods `<` and `==`,
/// both of which compare the `major` field with the argument.
fn version(vm: &Vm, major: i64) -> Value {
    let registry = vm.registry().clone();
    let method = |name: &str, op: OpCode| {
        let mut b = FunctionBuilder::new(&registry, name);
        b.params(["other"])
            .op(OpCode::GetSelf)
            .get_field("major")
            .get_local(1)
            .op(op)
            .op(OpCode::Return);
        Value::Closure(Arc::new(Closure::new(b.build_arc().unwrap(), Vec::new())))
    };

    let class = Arc::new(Class::new(registry.intern("Version"), "Version", None));
    class.define_method(registry.intern("<"), method("<", OpCode::Less)).unwrap();
    class.define_method(registry.intern("=="), method("==", OpCode::Equal)).unwrap();
    let instance = Instance::new(class);
    instance.set_field(registry.intern("major"), Value::Int(major));
    Value::Instance(Arc::new(instance))
}

#[test]
fn instances_use_operator_methods() {
    let mut vm = new_vm();
    let v2 = version(&vm, 2);
    assert_eq!(compare(&mut vm, v2.clone(), Value::Int(3), OpCode::Less), Value::Bool(true));
    assert_eq!(compare(&mut vm, v2.clone(), Value::Int(2), OpCode::Equal), Value::Bool(true));
    assert_eq!(compare(&mut vm, v2, Value::Int(2), OpCode::NotEqual), Value::Bool(false));
}

#[test]
fn instances_without_equality_method_compare_by_identity() {
    let mut vm = new_vm();
    let class = Arc::new(Class::new(vm.registry().intern("Plain"), "Plain", None));
    let a = Value::Instance(Arc::new(Instance::new(class.clone())));
    let b = Value::Instance(Arc::new(Instance::new(class)));
    assert_eq!(compare(&mut vm, a.clone(), a.clone(), OpCode::Equal), Value::Bool(true));
    assert_eq!(compare(&mut vm, a, b, OpCode::Equal), Value::Bool(false));
}
