use std::sync::Arc;

use parking_lot::Mutex;

use crate::runtime::{
    error::{ErrorObject, Fault},
    generator::Generator,
    value::Value,
};

pub(super) fn type_error(name: &str, label: &str, expected: &str, got: &Value) -> Fault {
    Fault::type_error(format!(
        "{name} expected {label} to be {expected}, got {}",
        got.describe_type()
    ))
}

/// Argument `index` of a native call; index 0 is the receiver.
pub(super) fn arg<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a Value, Fault> {
    args.get(index).ok_or_else(|| {
        Fault::Internal(format!(
            "{name} called with {} arguments, needs argument {index}",
            args.len().saturating_sub(1)
        ))
    })
}

pub(super) fn arg_int(args: &[Value], index: usize, name: &str, label: &str) -> Result<i64, Fault> {
    match arg(args, index, name)? {
        Value::Int(value) => Ok(*value),
        other => Err(type_error(name, label, "Int", other)),
    }
}

pub(super) fn arg_str<'a>(
    args: &'a [Value],
    index: usize,
    name: &str,
    label: &str,
) -> Result<&'a str, Fault> {
    match arg(args, index, name)? {
        Value::Str(text) => Ok(text),
        other => Err(type_error(name, label, "String", other)),
    }
}

pub(super) fn arg_array(
    args: &[Value],
    index: usize,
    name: &str,
    label: &str,
) -> Result<Arc<Mutex<Vec<Value>>>, Fault> {
    match arg(args, index, name)? {
        Value::Array(elements) => Ok(elements.clone()),
        other => Err(type_error(name, label, "Array", other)),
    }
}

pub(super) fn arg_generator(
    args: &[Value],
    index: usize,
    name: &str,
) -> Result<Arc<Generator>, Fault> {
    match arg(args, index, name)? {
        Value::Generator(generator) => Ok(generator.clone()),
        other => Err(type_error(name, "receiver", "Generator", other)),
    }
}

pub(super) fn arg_error(args: &[Value], index: usize, name: &str) -> Result<Arc<ErrorObject>, Fault> {
    match arg(args, index, name)? {
        Value::Error(error) => Ok(error.clone()),
        other => Err(type_error(name, "receiver", "Error", other)),
    }
}

/// Whether `value` can be passed to `Vm::call`.
pub(super) fn is_callable(value: &Value) -> bool {
    matches!(
        value,
        Value::Closure(_) | Value::Function(_) | Value::Native(_) | Value::Class(_)
    )
}

pub(super) fn arg_callable<'a>(
    args: &'a [Value],
    index: usize,
    name: &str,
    label: &str,
) -> Result<&'a Value, Fault> {
    let value = arg(args, index, name)?;
    if is_callable(value) {
        Ok(value)
    } else {
        Err(type_error(name, label, "callable", value))
    }
}
