use crate::{
    bytecode::op_code::OpCode,
    runtime::{error::Fault, value::Value},
};

use super::Vm;

pub(super) fn operator_symbol(op: OpCode) -> &'static str {
    match op {
        OpCode::Add => "+",
        OpCode::Sub => "-",
        OpCode::Mul => "*",
        OpCode::Div => "/",
        OpCode::Mod => "%",
        OpCode::Less => "<",
        OpCode::LessEqual => "<=",
        OpCode::Greater => ">",
        OpCode::GreaterEqual => ">=",
        OpCode::Equal | OpCode::NotEqual => "==",
        _ => "?",
    }
}

impl Vm {
    pub(super) fn execute_binary_operation(&mut self, op: OpCode) -> Result<(), Fault> {
        let right = self.pop()?;
        let left = self.pop()?;

        let result = match (&left, &right) {
            (Value::Int(l), Value::Int(r)) => Value::Int(integer_op(op, *l, *r)?),
            (Value::Float(l), Value::Float(r)) => Value::Float(float_op(op, *l, *r)),
            (Value::Int(l), Value::Float(r)) => Value::Float(float_op(op, *l as f64, *r)),
            (Value::Float(l), Value::Int(r)) => Value::Float(float_op(op, *l, *r as f64)),
            (Value::Str(l), Value::Str(r)) if op == OpCode::Add => {
                Value::string(format!("{l}{r}"))
            }
            (Value::Array(l), Value::Array(r)) if op == OpCode::Add => {
                // Lock each side on its own so `a + a` cannot self-deadlock.
                let mut elements = l.lock().clone();
                elements.extend(r.lock().iter().cloned());
                Value::array(elements)
            }
            (Value::Instance(_), _) => self.operator_method(op, &left, &right)?,
            _ => {
                return Err(Fault::type_error(format!(
                    "unsupported operand types for {}: {} and {}",
                    operator_symbol(op),
                    left.describe_type(),
                    right.describe_type()
                )));
            }
        };
        self.push(result)
    }

    pub(super) fn execute_negation(&mut self) -> Result<(), Fault> {
        let operand = self.pop()?;
        let result = match &operand {
            Value::Int(v) => Value::Int(
                v.checked_neg()
                    .ok_or_else(|| Fault::arithmetic("integer overflow"))?,
            ),
            Value::Float(v) => Value::Float(-v),
            Value::Instance(instance) => {
                let name = self.registry.intern("neg");
                let method = instance.class.find_method(name).ok_or_else(|| {
                    Fault::type_error(format!(
                        "unsupported operand type for unary -: {}",
                        instance.class.name()
                    ))
                })?;
                self.call_with_receiver(&method, Some(operand.clone()), &[])?
            }
            other => {
                return Err(Fault::type_error(format!(
                    "unsupported operand type for unary -: {}",
                    other.describe_type()
                )));
            }
        };
        self.push(result)
    }

    /// Dispatches an operator on an instance to its class method named after
    /// the operator (`+`, `<`, ...), called re-entrantly.
    pub(super) fn operator_method(
        &mut self,
        op: OpCode,
        left: &Value,
        right: &Value,
    ) -> Result<Value, Fault> {
        let Value::Instance(instance) = left else {
            return Err(Fault::Internal("operator method on a non-instance".to_string()));
        };
        let name = self.registry.intern(operator_symbol(op));
        let method = instance.class.find_method(name).ok_or_else(|| {
            Fault::type_error(format!(
                "unsupported operand types for {}: {} and {}",
                operator_symbol(op),
                left.describe_type(),
                right.describe_type()
            ))
        })?;
        self.call_with_receiver(&method, Some(left.clone()), std::slice::from_ref(right))
    }
}

fn integer_op(op: OpCode, l: i64, r: i64) -> Result<i64, Fault> {
    if r == 0 && matches!(op, OpCode::Div | OpCode::Mod) {
        return Err(Fault::arithmetic("division by zero"));
    }
    let result = match op {
        OpCode::Add => l.checked_add(r),
        OpCode::Sub => l.checked_sub(r),
        OpCode::Mul => l.checked_mul(r),
        OpCode::Div => l.checked_div(r),
        OpCode::Mod => l.checked_rem(r),
        _ => return Err(Fault::Internal(format!("unknown integer operator: {op}"))),
    };
    result.ok_or_else(|| Fault::arithmetic("integer overflow"))
}

fn float_op(op: OpCode, l: f64, r: f64) -> f64 {
    match op {
        OpCode::Add => l + r,
        OpCode::Sub => l - r,
        OpCode::Mul => l * r,
        OpCode::Div => l / r,
        _ => l % r,
    }
}
