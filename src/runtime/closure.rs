use std::sync::Arc;

use crate::{
    bytecode::function::BytecodeFunction,
    runtime::{upvalue::Upvalue, value::Value},
};

#[derive(Debug)]
pub struct Closure {
    pub function: Arc<BytecodeFunction>,
    /// Bound `self`; `Nil` for free functions.
    pub receiver: Value,
    pub upvalues: Vec<Arc<Upvalue>>,
}

impl Closure {
    pub fn new(function: Arc<BytecodeFunction>, upvalues: Vec<Arc<Upvalue>>) -> Self {
        Self {
            function,
            receiver: Value::Nil,
            upvalues,
        }
    }

    pub fn with_receiver(mut self, receiver: Value) -> Self {
        self.receiver = receiver;
        self
    }

    /// Same function and upvalues, different receiver.
    pub fn bind(&self, receiver: Value) -> Closure {
        Closure {
            function: self.function.clone(),
            receiver,
            upvalues: self.upvalues.clone(),
        }
    }
}
