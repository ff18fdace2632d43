use crate::runtime::{
    error::Fault,
    generator::{GeneratorStatus, GeneratorStep},
    value::Value,
    vm::Vm,
};

use super::helpers::arg_generator;

/// Resumes the receiver once. Raises `StopIteration` once it has finished.
pub(super) fn generator_next(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let generator = arg_generator(args, 0, "next")?;
    match vm.resume_generator(&generator)? {
        GeneratorStep::Yielded(value) => Ok(value),
        GeneratorStep::Returned(_) | GeneratorStep::Exhausted => Err(Fault::stop_iteration()),
    }
}

pub(super) fn generator_reset(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let generator = arg_generator(args, 0, "reset")?;
    generator.rewind()?;
    Ok(args[0].clone())
}

pub(super) fn generator_status(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    let generator = arg_generator(args, 0, "status")?;
    let label = match generator.status() {
        GeneratorStatus::Initial => "initial",
        GeneratorStatus::Suspended => "suspended",
        GeneratorStatus::Running => "running",
        GeneratorStatus::Completed => "completed",
        GeneratorStatus::Failed => "failed",
    };
    Ok(Value::string(label))
}
