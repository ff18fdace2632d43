use crate::runtime::{error::Fault, value::Value, vm::Vm};

use super::helpers::{arg, arg_int, arg_str, type_error};

/// Length in characters.
pub(super) fn string_len(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let text = arg_str(args, 0, "len", "receiver")?;
    Ok(Value::Int(text.chars().count() as i64))
}

pub(super) fn range_contains(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let Value::Range(range) = arg(args, 0, "contains")? else {
        return Err(type_error("contains", "receiver", "Range", &args[0]));
    };
    let value = arg_int(args, 1, "contains", "value")?;
    Ok(Value::Bool(range.contains(value)))
}

pub(super) fn range_len(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let Value::Range(range) = arg(args, 0, "len")? else {
        return Err(type_error("len", "receiver", "Range", &args[0]));
    };
    Ok(Value::Int(range.len() as i64))
}

pub(super) fn regex_is_match(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let Value::Regex(regex) = arg(args, 0, "is_match")? else {
        return Err(type_error("is_match", "receiver", "Regex", &args[0]));
    };
    let text = arg_str(args, 1, "is_match", "text")?;
    Ok(Value::Bool(regex.is_match(text)))
}

/// `callable.call(args...)`: a re-entrant call through the native boundary.
pub(super) fn callable_call(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let callee = arg(args, 0, "call")?;
    vm.call(callee, &args[1..])
}
