use std::sync::Arc;

use crate::{
    bytecode::{
        disassembler::DecodeError,
        function::BytecodeFunction,
        op_code::{
            CAPTURE_LOCAL, CAPTURE_WIDE, CLASS_HAS_SUPERCLASS, OpCode, OperandLayout,
            RANGE_INCLUSIVE, REGEX_CASE_INSENSITIVE, REGEX_DOT_ALL, REGEX_MULTI_LINE,
            read_operand, read_u8, read_u16,
        },
    },
    runtime::{
        class::Class,
        closure::Closure,
        error::{ErrorKind, Fault},
        symbol::Symbol,
        value::{RangeValue, Value},
    },
};

use super::{RunExit, Vm};

/// What the run loop does after an instruction.
pub(super) enum Flow {
    /// Keep executing the current frame.
    Next,
    /// The frame on top changed; reload it.
    Switch,
    Exit(RunExit),
}

impl Vm {
    /// Executes frames until the frame count drops back to `entry_depth`
    /// (return) or the generator frame at `entry_depth` yields.
    ///
    /// Language-level faults are matched against catch tables frame by frame;
    /// any other fault pops every frame above `entry_depth` and propagates.
    pub(super) fn run_until(&mut self, entry_depth: usize) -> Result<RunExit, Fault> {
        loop {
            let fault = match self.execute_frame(entry_depth) {
                Ok(Some(exit)) => return Ok(exit),
                Ok(None) => continue,
                Err(fault) => fault,
            };
            match fault {
                Fault::Raise(error) => match self.unwind(error.clone(), entry_depth) {
                    Ok(true) => {}
                    Ok(false) => return Err(Fault::Raise(error)),
                    Err(fatal) => {
                        self.abort_frames(entry_depth);
                        return Err(fatal);
                    }
                },
                fatal => {
                    self.abort_frames(entry_depth);
                    return Err(fatal);
                }
            }
        }
    }

    fn execute_frame(&mut self, entry_depth: usize) -> Result<Option<RunExit>, Fault> {
        let top = self.frames.len() - 1;
        let function = self.frames[top].closure.function.clone();

        loop {
            let frame = &mut self.frames[top];
            if frame.stop {
                return Err(Fault::Halted);
            }
            let ip = frame.ip;
            frame.current = ip;

            let Some(&byte) = function.instructions.get(ip) else {
                // Running off the end of the body returns nil.
                return match self.return_from_frame(Value::Nil, entry_depth)? {
                    Flow::Exit(exit) => Ok(Some(exit)),
                    _ => Ok(None),
                };
            };
            let op = OpCode::from_byte(byte).ok_or(DecodeError::UnknownOpcode { byte, offset: ip })?;
            if self.config.trace {
                self.trace_instruction(&function, ip);
            }

            match self.dispatch_instruction(&function, top, ip, op, entry_depth)? {
                Flow::Next => {}
                Flow::Switch => return Ok(None),
                Flow::Exit(exit) => return Ok(Some(exit)),
            }
        }
    }

    pub(super) fn dispatch_instruction(
        &mut self,
        function: &Arc<BytecodeFunction>,
        top: usize,
        ip: usize,
        op: OpCode,
        entry_depth: usize,
    ) -> Result<Flow, Fault> {
        let code = &function.instructions;
        let truncated = |needed: usize| DecodeError::Truncated {
            op,
            offset: ip,
            needed,
            available: code.len() - ip,
        };

        let (a, b, next) = match op.layout() {
            OperandLayout::None => (0, 0, ip + 1),
            OperandLayout::Numeric(width)
            | OperandLayout::Constant(width)
            | OperandLayout::Closure(width) => {
                let a = read_operand(code, ip + 1, width)
                    .ok_or_else(|| truncated(1 + width.bytes()))?;
                (a, 0, ip + 1 + width.bytes())
            }
            OperandLayout::ConstantCount(width) | OperandLayout::ConstantFlags(width) => {
                let needed = 2 + width.bytes();
                let a = read_operand(code, ip + 1, width).ok_or_else(|| truncated(needed))?;
                let b = read_u8(code, ip + 1 + width.bytes()).ok_or_else(|| truncated(needed))?;
                (a, b as usize, ip + needed)
            }
            OperandLayout::RangeFlag => {
                let flag = read_u8(code, ip + 1).ok_or_else(|| truncated(2))?;
                (flag as usize, 0, ip + 2)
            }
        };
        self.frames[top].ip = next;

        use OpCode::*;
        match op {
            Const8 | Const16 | Const32 => {
                let value = constant(function, a, ip)?.clone();
                self.push(value)?;
            }
            Nil => self.push(Value::Nil)?,
            True => self.push(Value::Bool(true))?,
            False => self.push(Value::Bool(false))?,
            Pop => {
                self.pop()?;
            }
            Dup => {
                let value = self.peek(0)?.clone();
                self.push(value)?;
            }
            GetLocal8 | GetLocal16 | GetLocal32 => {
                let slot = self.local_slot(top, a)?;
                let value = self.stack[slot].clone();
                if value.is_undefined() {
                    return Err(Fault::name(format!(
                        "local slot {a} read before initialisation"
                    )));
                }
                self.push(value)?;
            }
            SetLocal8 | SetLocal16 | SetLocal32 => {
                let slot = self.local_slot(top, a)?;
                let value = self.pop()?;
                self.stack[slot] = value;
            }
            GetUpvalue8 | GetUpvalue16 | GetUpvalue32 => {
                let upvalue = self.frame_upvalue(top, a)?;
                let value = upvalue.get(self.id, &self.stack)?;
                self.push(value)?;
            }
            SetUpvalue8 | SetUpvalue16 | SetUpvalue32 => {
                let value = self.pop()?;
                let upvalue = self.frame_upvalue(top, a)?;
                upvalue.set(self.id, &mut self.stack, value)?;
            }
            CloseUpvalues8 | CloseUpvalues16 | CloseUpvalues32 => {
                let slot = self.local_slot(top, a)?;
                self.close_upvalues(slot);
            }
            GetGlobal8 | GetGlobal16 | GetGlobal32 => {
                let name = symbol_constant(function, a, ip)?;
                let value = self.registry.global(name).ok_or_else(|| {
                    Fault::name(format!(
                        "undefined global '{}'",
                        self.registry.symbol_name(name)
                    ))
                })?;
                self.push(value)?;
            }
            SetGlobal8 | SetGlobal16 | SetGlobal32 => {
                let name = symbol_constant(function, a, ip)?;
                let value = self.pop()?;
                self.registry.set_global(name, value);
            }
            GetField8 | GetField16 | GetField32 => {
                let name = symbol_constant(function, a, ip)?;
                let object = self.pop()?;
                let value = self.get_field(&object, name)?;
                self.push(value)?;
            }
            SetField8 | SetField16 | SetField32 => {
                let name = symbol_constant(function, a, ip)?;
                let value = self.pop()?;
                let object = self.pop()?;
                self.set_field(&object, name, value.clone())?;
                self.push(value)?;
            }
            GetSelf => {
                let receiver = self.stack[self.frames[top].base].clone();
                self.push(receiver)?;
            }
            Add | Sub | Mul | Div | Mod => self.execute_binary_operation(op)?,
            Negate => self.execute_negation()?,
            Not => {
                let value = self.pop()?;
                self.push(Value::Bool(!value.is_truthy()))?;
            }
            Equal | NotEqual | Less | LessEqual | Greater | GreaterEqual => {
                self.execute_comparison(op)?
            }
            Jump8 | Jump16 | Jump32 => return self.jump_to(top, a),
            JumpIfFalse8 | JumpIfFalse16 | JumpIfFalse32 => {
                if !self.pop()?.is_truthy() {
                    return self.jump_to(top, a);
                }
            }
            JumpIfTrue8 | JumpIfTrue16 | JumpIfTrue32 => {
                if self.pop()?.is_truthy() {
                    return self.jump_to(top, a);
                }
            }
            IterNext8 | IterNext16 | IterNext32 => return self.iter_next(top, a),
            Call => return self.execute_call(a),
            TailCall => return self.execute_tail_call(top, a),
            Invoke8 | Invoke16 | Invoke32 => {
                let name = symbol_constant(function, a, ip)?;
                return self.execute_invoke(name, b);
            }
            Instantiate8 | Instantiate16 | Instantiate32 => {
                let name = symbol_constant(function, a, ip)?;
                return self.execute_instantiate(name, b);
            }
            Return => {
                let value = self.pop()?;
                return self.execute_return(top, value, entry_depth);
            }
            ReturnNil => return self.execute_return(top, Value::Nil, entry_depth),
            Closure8 | Closure16 | Closure32 => self.push_closure(function, top, op, ip, a, next)?,
            Array => {
                let array = self.build_array(a)?;
                self.push(array)?;
            }
            Range => {
                let end = self.pop()?;
                let start = self.pop()?;
                let (Value::Int(start), Value::Int(end)) = (&start, &end) else {
                    return Err(Fault::type_error(format!(
                        "range bounds must be Int, got {} and {}",
                        start.describe_type(),
                        end.describe_type()
                    )));
                };
                self.push(Value::Range(Arc::new(RangeValue {
                    start: *start,
                    end: *end,
                    inclusive: a as u8 & RANGE_INCLUSIVE != 0,
                })))?;
            }
            Regex8 | Regex16 | Regex32 => {
                let regex = compile_regex(function, a, b as u8, ip)?;
                self.push(regex)?;
            }
            DefClass8 | DefClass16 | DefClass32 => {
                let name = symbol_constant(function, a, ip)?;
                let superclass = if b as u8 & CLASS_HAS_SUPERCLASS != 0 {
                    match self.pop()? {
                        Value::Class(parent) => Some(parent),
                        other => {
                            return Err(Fault::type_error(format!(
                                "superclass must be a class, got {}",
                                other.describe_type()
                            )));
                        }
                    }
                } else {
                    None
                };
                let class = Arc::new(Class::new(
                    name,
                    self.registry.symbol_name(name),
                    superclass,
                ));
                self.registry.set_global(name, Value::Class(class.clone()));
                self.push(Value::Class(class))?;
            }
            DefMethod8 | DefMethod16 | DefMethod32 => {
                let name = symbol_constant(function, a, ip)?;
                let method = self.pop()?;
                let Value::Class(class) = self.peek(0)? else {
                    return Err(Fault::Internal(format!(
                        "DefMethod at {ip} expects a class on the stack"
                    )));
                };
                class.define_method(name, method).map_err(Fault::type_error)?;
            }
            Throw => {
                let error = self.pop()?;
                return Err(Fault::Raise(error));
            }
            Yield => {
                let value = self.pop()?;
                return self.execute_yield(top, value, entry_depth);
            }
            EnterFinally => self.enter_finally(top, ip)?,
            EndFinally => return self.end_finally(top, entry_depth),
        }

        Ok(Flow::Next)
    }

    fn local_slot(&self, top: usize, index: usize) -> Result<usize, Fault> {
        let frame = &self.frames[top];
        if index >= frame.local_count {
            return Err(Fault::Internal(format!(
                "local slot {index} outside frame of {} slots",
                frame.local_count
            )));
        }
        Ok(frame.base + index)
    }

    fn frame_upvalue(
        &self,
        top: usize,
        index: usize,
    ) -> Result<Arc<crate::runtime::upvalue::Upvalue>, Fault> {
        self.frames[top]
            .closure
            .upvalues
            .get(index)
            .cloned()
            .ok_or_else(|| Fault::Internal(format!("upvalue index {index} out of range")))
    }

    /// Builds a closure over the capture descriptors that follow the
    /// instruction's constant operand, advancing the frame past them.
    fn push_closure(
        &mut self,
        function: &BytecodeFunction,
        top: usize,
        op: OpCode,
        ip: usize,
        index: usize,
        operands_end: usize,
    ) -> Result<(), Fault> {
        let target = match constant(function, index, ip)? {
            Value::Function(target) => target.clone(),
            _ => return Err(DecodeError::NotAFunction { index, offset: ip }.into()),
        };
        let code = &function.instructions;
        let truncated = |needed: usize| DecodeError::Truncated {
            op,
            offset: ip,
            needed,
            available: code.len() - ip,
        };

        let (base, local_count) = {
            let frame = &self.frames[top];
            (frame.base, frame.local_count)
        };
        let mut pos = operands_end;
        let mut upvalues = Vec::with_capacity(target.upvalue_count);
        for _ in 0..target.upvalue_count {
            let flags = read_u8(code, pos).ok_or_else(|| truncated(pos + 2 - ip))?;
            let (slot, width) = if flags & CAPTURE_WIDE != 0 {
                let slot = read_u16(code, pos + 1).ok_or_else(|| truncated(pos + 3 - ip))?;
                (slot as usize, 2)
            } else {
                let slot = read_u8(code, pos + 1).ok_or_else(|| truncated(pos + 2 - ip))?;
                (slot as usize, 1)
            };
            pos += 1 + width;

            if flags & CAPTURE_LOCAL != 0 {
                if slot >= local_count {
                    return Err(Fault::Internal(format!(
                        "capture of local {slot} outside frame of {local_count} slots"
                    )));
                }
                upvalues.push(self.capture_upvalue(base + slot));
            } else {
                upvalues.push(self.frame_upvalue(top, slot)?);
            }
        }
        self.frames[top].ip = pos;

        let receiver = self.stack[base].clone();
        self.push(Value::Closure(Arc::new(Closure {
            function: target,
            receiver,
            upvalues,
        })))
    }

    fn get_field(&self, object: &Value, name: Symbol) -> Result<Value, Fault> {
        match object {
            Value::Instance(instance) => {
                if let Some(value) = instance.field(name) {
                    return Ok(value);
                }
                match instance.class.find_method(name) {
                    Some(Value::Closure(method)) => {
                        Ok(Value::Closure(Arc::new(method.bind(object.clone()))))
                    }
                    Some(method) => Ok(method),
                    None => Err(Fault::name(format!(
                        "undefined field '{}' on {} instance",
                        self.registry.symbol_name(name),
                        instance.class.name()
                    ))),
                }
            }
            Value::Error(error) if &*self.registry.symbol_name(name) == "message" => {
                Ok(Value::string(error.message.as_str()))
            }
            other => Err(Fault::type_error(format!(
                "cannot read field '{}' of {}",
                self.registry.symbol_name(name),
                other.describe_type()
            ))),
        }
    }

    fn set_field(&self, object: &Value, name: Symbol, value: Value) -> Result<(), Fault> {
        match object {
            Value::Instance(instance) => {
                instance.set_field(name, value);
                Ok(())
            }
            other => Err(Fault::type_error(format!(
                "cannot set field '{}' on {}",
                self.registry.symbol_name(name),
                other.describe_type()
            ))),
        }
    }
}

fn constant(function: &BytecodeFunction, index: usize, offset: usize) -> Result<&Value, Fault> {
    function.constants.get(index).ok_or_else(|| {
        DecodeError::ConstantOutOfBounds {
            index,
            len: function.constants.len(),
            offset,
        }
        .into()
    })
}

fn symbol_constant(function: &BytecodeFunction, index: usize, offset: usize) -> Result<Symbol, Fault> {
    match constant(function, index, offset)? {
        Value::Symbol(symbol) => Ok(*symbol),
        other => Err(Fault::Internal(format!(
            "constant {index} at offset {offset} must be a symbol, found {}",
            other.type_name()
        ))),
    }
}

fn compile_regex(
    function: &BytecodeFunction,
    index: usize,
    flags: u8,
    offset: usize,
) -> Result<Value, Fault> {
    let Value::Str(pattern) = constant(function, index, offset)? else {
        return Err(Fault::Internal(format!(
            "regex constant {index} at offset {offset} must be a string"
        )));
    };
    let regex = regex::RegexBuilder::new(pattern)
        .case_insensitive(flags & REGEX_CASE_INSENSITIVE != 0)
        .multi_line(flags & REGEX_MULTI_LINE != 0)
        .dot_matches_new_line(flags & REGEX_DOT_ALL != 0)
        .build()
        .map_err(|err| Fault::raise(ErrorKind::Value, err.to_string()))?;
    Ok(Value::Regex(Arc::new(regex)))
}
