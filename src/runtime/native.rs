use std::fmt;

use crate::runtime::{error::Fault, value::Value, vm::Vm};

/// Host function callable from bytecode.
///
/// `args[0]` is the receiver (`Nil` for free functions); the call arguments
/// follow. A native may re-enter the VM through [`Vm::call`].
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, Fault>;

#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    /// Argument count excluding the receiver; `None` accepts any count.
    pub arity: Option<usize>,
    pub func: NativeFn,
}

impl NativeFunction {
    pub const fn new(name: &'static str, arity: Option<usize>, func: NativeFn) -> Self {
        Self { name, arity, func }
    }

    pub fn check_arity(&self, got: usize) -> Result<(), Fault> {
        match self.arity {
            Some(want) if want != got => Err(Fault::arity(want, got)),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

impl PartialEq for NativeFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
