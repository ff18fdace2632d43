use crate::runtime::value::Value;

/// Constant pool under construction. Scalar constants are deduplicated by
/// exact variant and bits; every other constant gets its own slot.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    constants: Vec<Value>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: Value) -> usize {
        if is_scalar(&value) {
            if let Some(index) = self
                .constants
                .iter()
                .position(|existing| same_scalar(existing, &value))
            {
                return index;
            }
        }
        self.constants.push(value);
        self.constants.len() - 1
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.constants
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Nil
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Symbol(_)
            | Value::Char(_)
    )
}

fn same_scalar(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::Symbol(a), Value::Symbol(b)) => a == b,
        (Value::Char(a), Value::Char(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_are_shared() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.add(Value::Int(7)), 0);
        assert_eq!(pool.add(Value::Float(7.0)), 1);
        assert_eq!(pool.add(Value::Int(7)), 0);
        assert_eq!(pool.add(Value::Nil), 2);
        assert_eq!(pool.add(Value::Nil), 2);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn strings_get_their_own_slot() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.add(Value::string("a")), 0);
        assert_eq!(pool.add(Value::string("a")), 1);
    }
}
