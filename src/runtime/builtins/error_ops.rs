use std::sync::Arc;

use crate::runtime::{
    error::{ErrorKind, ErrorObject, Fault},
    value::Value,
    vm::Vm,
};

use super::helpers::{arg, arg_error};

/// `Error(message)` builds a user error object; `Throw` raises it.
pub(super) fn native_error(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let message = match arg(args, 1, "Error")? {
        Value::Str(text) => text.to_string(),
        other => other.to_string(),
    };
    Ok(Value::Error(Arc::new(ErrorObject {
        kind: ErrorKind::User,
        message,
    })))
}

pub(super) fn error_message(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let error = arg_error(args, 0, "message")?;
    Ok(Value::string(error.message.as_str()))
}

pub(super) fn error_kind(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let error = arg_error(args, 0, "kind")?;
    Ok(Value::string(error.kind.label()))
}
