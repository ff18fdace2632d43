use crate::runtime::{
    error::{ErrorKind, Fault},
    value::Value,
    vm::Vm,
};

use super::helpers::{arg, arg_array, arg_callable, arg_int};

pub(super) fn array_len(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let elements = arg_array(args, 0, "len", "receiver")?;
    let len = elements.lock().len();
    Ok(Value::Int(len as i64))
}

/// Appends in place and returns the receiver.
pub(super) fn array_push(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let elements = arg_array(args, 0, "push", "receiver")?;
    let value = arg(args, 1, "push")?.clone();
    elements.lock().push(value);
    Ok(args[0].clone())
}

pub(super) fn array_pop(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let elements = arg_array(args, 0, "pop", "receiver")?;
    let last = elements.lock().pop();
    Ok(last.unwrap_or(Value::Nil))
}

/// Negative indices count from the end.
pub(super) fn array_get(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let elements = arg_array(args, 0, "get", "receiver")?;
    let index = arg_int(args, 1, "get", "index")?;
    let elements = elements.lock();
    let len = elements.len() as i64;
    let position = if index < 0 { len + index } else { index };
    if !(0..len).contains(&position) {
        return Err(Fault::raise(
            ErrorKind::Value,
            format!("index {index} out of range for array of length {len}"),
        ));
    }
    Ok(elements[position as usize].clone())
}

/// Calls the callback once per element, re-entering the VM each time.
pub(super) fn array_each(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let elements = arg_array(args, 0, "each", "receiver")?;
    let callback = arg_callable(args, 1, "each", "callback")?;
    // Snapshot so the callback may mutate the array.
    let snapshot = elements.lock().clone();
    for element in snapshot {
        vm.call(callback, &[element])?;
    }
    Ok(args[0].clone())
}

pub(super) fn array_map(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let elements = arg_array(args, 0, "map", "receiver")?;
    let callback = arg_callable(args, 1, "map", "callback")?;
    let snapshot = elements.lock().clone();
    let mut mapped = Vec::with_capacity(snapshot.len());
    for element in snapshot {
        mapped.push(vm.call(callback, &[element])?);
    }
    Ok(Value::array(mapped))
}
