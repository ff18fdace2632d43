use std::cmp::Ordering;

use crate::{
    bytecode::op_code::OpCode,
    runtime::{error::Fault, value::Value},
};

use super::{Vm, binary_ops::operator_symbol};

impl Vm {
    pub(super) fn execute_comparison(&mut self, op: OpCode) -> Result<(), Fault> {
        let right = self.pop()?;
        let left = self.pop()?;

        let result = match op {
            OpCode::Equal | OpCode::NotEqual => {
                let equal = self.values_equal(&left, &right)?;
                Value::Bool(equal == (op == OpCode::Equal))
            }
            _ => match ordering(&left, &right) {
                Some(ordering) => Value::Bool(match op {
                    OpCode::Less => ordering == Ordering::Less,
                    OpCode::LessEqual => ordering != Ordering::Greater,
                    OpCode::Greater => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }),
                None if matches!(left, Value::Instance(_)) => {
                    self.operator_method(op, &left, &right)?
                }
                // NaN on either side.
                None if is_number(&left) && is_number(&right) => Value::Bool(false),
                None => {
                    return Err(Fault::type_error(format!(
                        "unsupported operand types for {}: {} and {}",
                        operator_symbol(op),
                        left.describe_type(),
                        right.describe_type()
                    )));
                }
            },
        };
        self.push(result)
    }

    /// Instances defining `==` decide equality themselves; everything else
    /// uses value equality.
    fn values_equal(&mut self, left: &Value, right: &Value) -> Result<bool, Fault> {
        if let Value::Instance(instance) = left {
            let name = self.registry.intern("==");
            if let Some(method) = instance.class.find_method(name) {
                let result =
                    self.call_with_receiver(&method, Some(left.clone()), std::slice::from_ref(right))?;
                return Ok(result.is_truthy());
            }
        }
        Ok(left == right)
    }
}

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_))
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(l), Value::Int(r)) => Some(l.cmp(r)),
        (Value::Float(l), Value::Float(r)) => l.partial_cmp(r),
        (Value::Int(l), Value::Float(r)) => (*l as f64).partial_cmp(r),
        (Value::Float(l), Value::Int(r)) => l.partial_cmp(&(*r as f64)),
        (Value::Str(l), Value::Str(r)) => Some(l.cmp(r)),
        (Value::Char(l), Value::Char(r)) => Some(l.cmp(r)),
        _ => None,
    }
}
