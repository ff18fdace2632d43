use std::io::Write;

use crate::runtime::{error::Fault, value::Value, vm::Vm};

use super::helpers::arg;

/// Prints the arguments separated by spaces; strings print raw.
pub(super) fn native_print(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let line = args
        .iter()
        .skip(1)
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}").map_err(|err| Fault::Internal(format!("print: {err}")))?;
    Ok(Value::Nil)
}

pub(super) fn native_type_of(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::string(arg(args, 1, "type_of")?.describe_type()))
}
