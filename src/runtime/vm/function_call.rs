use std::sync::Arc;

use crate::{
    bytecode::function::BytecodeFunction,
    runtime::{
        class::{Class, Instance},
        closure::Closure,
        error::Fault,
        frame::Frame,
        generator::Generator,
        native::NativeFunction,
        symbol::Symbol,
        value::Value,
    },
};

use super::{RunExit, Vm, dispatch::Flow};

/// Whether a call pushed a frame the loop must switch to, or finished
/// immediately with its result on the stack.
pub(super) enum CallOutcome {
    Pushed,
    Done,
}

impl From<CallOutcome> for Flow {
    fn from(outcome: CallOutcome) -> Self {
        match outcome {
            CallOutcome::Pushed => Flow::Switch,
            CallOutcome::Done => Flow::Next,
        }
    }
}

impl Vm {
    pub(super) fn execute_call(&mut self, argc: usize) -> Result<Flow, Fault> {
        Ok(self.call_value_at(argc, None)?.into())
    }

    /// Calls the value sitting below `argc` arguments. Its slot becomes slot
    /// 0 (the receiver) of the new frame.
    pub(super) fn call_value_at(
        &mut self,
        argc: usize,
        receiver: Option<Value>,
    ) -> Result<CallOutcome, Fault> {
        let callee_idx = self.callee_index(argc)?;
        match self.stack[callee_idx].clone() {
            Value::Closure(closure) => self.call_closure(closure, callee_idx, argc, receiver),
            Value::Function(function) => {
                let closure = Arc::new(Closure::new(function, Vec::new()));
                self.call_closure(closure, callee_idx, argc, receiver)
            }
            Value::Native(native) => {
                self.call_native(&native, callee_idx, argc, receiver.unwrap_or(Value::Nil))
            }
            Value::Class(class) => self.instantiate(class, callee_idx, argc),
            other => Err(Fault::type_error(format!(
                "not a function: {}",
                other.describe_type()
            ))),
        }
    }

    fn callee_index(&self, argc: usize) -> Result<usize, Fault> {
        self.sp
            .checked_sub(argc + 1)
            .ok_or_else(|| Fault::Internal("stack underflow".to_string()))
    }

    pub(super) fn call_closure(
        &mut self,
        closure: Arc<Closure>,
        base: usize,
        argc: usize,
        receiver: Option<Value>,
    ) -> Result<CallOutcome, Fault> {
        check_arity(&closure.function, argc)?;
        self.bind_arguments(&closure.function, base, argc)?;
        self.stack[base] = receiver.unwrap_or_else(|| closure.receiver.clone());

        if closure.function.generator {
            let segment = self.take_segment(base);
            tracing::trace!(function = closure.function.name(), "generator created");
            self.push(Value::Generator(Arc::new(Generator::new(closure, segment))))?;
            return Ok(CallOutcome::Done);
        }

        self.push_frame(Frame::new(closure, base))?;
        Ok(CallOutcome::Pushed)
    }

    /// Moves the `argc` arguments above `base` into parameter slots:
    /// required, optional (missing ones are `Nil`), the positional rest
    /// array, post-rest parameters taken from the end of the list, and the
    /// named rest slot. Remaining locals become `Undefined`.
    pub(super) fn bind_arguments(
        &mut self,
        function: &BytecodeFunction,
        base: usize,
        argc: usize,
    ) -> Result<(), Fault> {
        let params = &function.parameters;
        let frame_top = base + function.num_locals;
        if frame_top.max(base + argc + 1) > self.stack.len() {
            return Err(Fault::ValueStackOverflow {
                limit: self.stack.len(),
            });
        }

        let mut front: Vec<Value> = self.stack[base + 1..base + 1 + argc]
            .iter_mut()
            .map(std::mem::take)
            .collect();
        let post_rest = if params.has_rest() {
            front.split_off(argc - params.post_rest_count())
        } else {
            Vec::new()
        };

        let mut slots = Vec::with_capacity(params.count());
        let mut front = front.into_iter();
        slots.extend(front.by_ref().take(params.required()));
        for _ in 0..params.optional {
            slots.push(front.next().unwrap_or(Value::Nil));
        }
        if params.has_rest() {
            slots.push(Value::array(front.collect()));
            slots.extend(post_rest);
        }
        if params.named_rest {
            slots.push(Value::Nil);
        }

        let locals_start = base + 1 + slots.len();
        for (i, value) in slots.into_iter().enumerate() {
            self.stack[base + 1 + i] = value;
        }
        for slot in &mut self.stack[locals_start..frame_top] {
            *slot = Value::Undefined;
        }
        if self.sp > frame_top {
            self.truncate_stack(frame_top);
        } else {
            self.sp = frame_top;
        }
        Ok(())
    }

    pub(super) fn call_native(
        &mut self,
        native: &NativeFunction,
        callee_idx: usize,
        argc: usize,
        receiver: Value,
    ) -> Result<CallOutcome, Fault> {
        native.check_arity(argc)?;
        let mut args = Vec::with_capacity(argc + 1);
        args.push(receiver);
        args.extend(
            self.stack[callee_idx + 1..self.sp]
                .iter_mut()
                .map(std::mem::take),
        );
        self.truncate_stack(callee_idx);

        let result = (native.func)(self, &args)?;
        self.push(result.defined_or_nil())?;
        Ok(CallOutcome::Done)
    }

    /// Reuses the current frame when a function tail-calls itself outside any
    /// protected range; any other tail call is an ordinary call.
    pub(super) fn execute_tail_call(&mut self, top: usize, argc: usize) -> Result<Flow, Fault> {
        let callee_idx = self.callee_index(argc)?;
        let closure = match &self.stack[callee_idx] {
            Value::Closure(closure) => closure.clone(),
            Value::Function(function) => Arc::new(Closure::new(function.clone(), Vec::new())),
            _ => return self.execute_call(argc),
        };

        let frame = &self.frames[top];
        let reusable = Arc::ptr_eq(&closure.function, &frame.closure.function)
            && !closure.function.generator
            && frame.generator.is_none()
            && !frame.returns_receiver
            && frame.completions.is_empty()
            && closure.function.handler_for(frame.current).is_none();
        if !reusable {
            return self.execute_call(argc);
        }

        check_arity(&closure.function, argc)?;
        let base = frame.base;
        self.close_upvalues(base);
        for i in 0..=argc {
            self.stack[base + i] = std::mem::take(&mut self.stack[callee_idx + i]);
        }
        self.truncate_stack(base + argc + 1);
        self.bind_arguments(&closure.function, base, argc)?;
        self.stack[base] = closure.receiver.clone();

        let frame = &mut self.frames[top];
        frame.closure = closure;
        frame.ip = 0;
        frame.tail_calls += 1;
        self.poll_stop()?;
        Ok(Flow::Switch)
    }

    pub(super) fn execute_invoke(&mut self, name: Symbol, argc: usize) -> Result<Flow, Fault> {
        let receiver_idx = self.callee_index(argc)?;
        let receiver = self.stack[receiver_idx].clone();
        Ok(self.invoke_at(receiver_idx, receiver, name, argc)?.into())
    }

    /// Method lookup order: callable instance field, class chain, then the
    /// native method table of the receiver's type.
    fn invoke_at(
        &mut self,
        receiver_idx: usize,
        receiver: Value,
        name: Symbol,
        argc: usize,
    ) -> Result<CallOutcome, Fault> {
        if let Value::Instance(instance) = &receiver {
            if let Some(field) = instance.field(name) {
                self.stack[receiver_idx] = field;
                return self.call_value_at(argc, None);
            }
            if let Some(method) = instance.class.find_method(name) {
                return self.call_method_at(method, receiver_idx, argc, receiver);
            }
        }
        if let Some(native) = self.registry.native_method(receiver.type_tag(), name) {
            return self.call_native(&native, receiver_idx, argc, receiver);
        }
        Err(Fault::name(format!(
            "undefined method '{}' for {}",
            self.registry.symbol_name(name),
            receiver.describe_type()
        )))
    }

    fn call_method_at(
        &mut self,
        method: Value,
        receiver_idx: usize,
        argc: usize,
        receiver: Value,
    ) -> Result<CallOutcome, Fault> {
        match method {
            Value::Closure(closure) => self.call_closure(closure, receiver_idx, argc, Some(receiver)),
            Value::Function(function) => {
                let closure = Arc::new(Closure::new(function, Vec::new()));
                self.call_closure(closure, receiver_idx, argc, Some(receiver))
            }
            Value::Native(native) => self.call_native(&native, receiver_idx, argc, receiver),
            other => Err(Fault::type_error(format!(
                "method is not callable: {}",
                other.describe_type()
            ))),
        }
    }

    pub(super) fn execute_instantiate(&mut self, name: Symbol, argc: usize) -> Result<Flow, Fault> {
        let class = match self.registry.global(name) {
            Some(Value::Class(class)) => class,
            Some(other) => {
                return Err(Fault::type_error(format!(
                    "cannot instantiate {}",
                    other.describe_type()
                )));
            }
            None => {
                return Err(Fault::name(format!(
                    "undefined class '{}'",
                    self.registry.symbol_name(name)
                )));
            }
        };

        // Slide the arguments up one slot to make room for the class.
        let start = self
            .sp
            .checked_sub(argc)
            .ok_or_else(|| Fault::Internal("stack underflow".to_string()))?;
        self.push(Value::Nil)?;
        for i in (start..start + argc).rev() {
            self.stack[i + 1] = std::mem::take(&mut self.stack[i]);
        }
        self.stack[start] = Value::Class(class.clone());
        Ok(self.instantiate(class, start, argc)?.into())
    }

    /// Creates an instance and runs `init` on it. The constructor frame
    /// returns the instance regardless of what `init` returns.
    pub(super) fn instantiate(
        &mut self,
        class: Arc<Class>,
        callee_idx: usize,
        argc: usize,
    ) -> Result<CallOutcome, Fault> {
        let instance = Value::Instance(Arc::new(Instance::new(class.clone())));
        match class.find_method(self.init_symbol) {
            Some(Value::Closure(init)) => {
                let outcome = self.call_closure(init, callee_idx, argc, Some(instance))?;
                if let (CallOutcome::Pushed, Some(frame)) = (&outcome, self.frames.last_mut()) {
                    frame.returns_receiver = true;
                }
                Ok(outcome)
            }
            Some(Value::Native(init)) => {
                self.call_native(&init, callee_idx, argc, instance.clone())?;
                self.pop()?;
                self.push(instance)?;
                Ok(CallOutcome::Done)
            }
            Some(other) => Err(Fault::type_error(format!(
                "init of {} is not callable: {}",
                class.name(),
                other.describe_type()
            ))),
            None => {
                if argc != 0 {
                    return Err(Fault::arity(0, argc));
                }
                self.truncate_stack(callee_idx);
                self.push(instance)?;
                Ok(CallOutcome::Done)
            }
        }
    }

    /// Returns from the top frame, unless a finally block covering the
    /// return has to run first.
    pub(super) fn execute_return(
        &mut self,
        top: usize,
        value: Value,
        entry_depth: usize,
    ) -> Result<Flow, Fault> {
        if self.defer_to_finally(top, value.clone())? {
            return Ok(Flow::Next);
        }
        self.return_from_frame(value, entry_depth)
    }

    pub(super) fn return_from_frame(
        &mut self,
        value: Value,
        entry_depth: usize,
    ) -> Result<Flow, Fault> {
        if self.frames.len() <= 1 {
            return Err(Fault::Internal("return from the sentinel frame".to_string()));
        }
        let Some(frame) = self.frames.pop() else {
            return Err(Fault::Internal("empty call stack".to_string()));
        };
        self.close_upvalues(frame.base);
        let value = if frame.returns_receiver {
            self.stack[frame.base].clone()
        } else {
            value.defined_or_nil()
        };
        self.truncate_stack(frame.base);

        if self.frames.len() <= entry_depth {
            return Ok(Flow::Exit(RunExit::Return(value)));
        }
        self.push(value)?;
        Ok(Flow::Switch)
    }

    /// Runs `callee` to completion in a nested dispatch loop. Every nested
    /// call counts against the re-entrancy limit.
    pub(super) fn call_with_receiver(
        &mut self,
        callee: &Value,
        receiver: Option<Value>,
        args: &[Value],
    ) -> Result<Value, Fault> {
        let entry_sp = self.sp;
        let result = self.nested(|vm, entry_depth| {
            vm.push(callee.clone())?;
            for arg in args {
                vm.push(arg.clone())?;
            }
            match vm.call_value_at(args.len(), receiver)? {
                CallOutcome::Done => vm.pop(),
                CallOutcome::Pushed => vm.finish_nested(entry_depth),
            }
        });
        if result.is_err() {
            self.truncate_stack(entry_sp);
        }
        result
    }

    pub(super) fn invoke_nested(
        &mut self,
        receiver: &Value,
        name: Symbol,
        args: &[Value],
    ) -> Result<Value, Fault> {
        let entry_sp = self.sp;
        let result = self.nested(|vm, entry_depth| {
            let receiver_idx = vm.sp;
            vm.push(receiver.clone())?;
            for arg in args {
                vm.push(arg.clone())?;
            }
            match vm.invoke_at(receiver_idx, receiver.clone(), name, args.len())? {
                CallOutcome::Done => vm.pop(),
                CallOutcome::Pushed => vm.finish_nested(entry_depth),
            }
        });
        if result.is_err() {
            self.truncate_stack(entry_sp);
        }
        result
    }

    pub(super) fn nested<T>(
        &mut self,
        body: impl FnOnce(&mut Self, usize) -> Result<T, Fault>,
    ) -> Result<T, Fault> {
        if self.reentrancy >= self.config.max_reentrancy {
            return Err(Fault::ReentrancyLimit {
                limit: self.config.max_reentrancy,
            });
        }
        let entry_depth = self.frames.len();
        self.reentrancy += 1;
        let result = body(self, entry_depth);
        self.reentrancy -= 1;
        result
    }

    fn finish_nested(&mut self, entry_depth: usize) -> Result<Value, Fault> {
        match self.run_until(entry_depth)? {
            RunExit::Return(value) => Ok(value),
            RunExit::Yield(_) => Err(Fault::Internal(
                "yield escaped its generator frame".to_string(),
            )),
        }
    }
}

pub(super) fn check_arity(function: &BytecodeFunction, argc: usize) -> Result<(), Fault> {
    let params = &function.parameters;
    let min = params.min_args();
    match params.max_args() {
        Some(max) if argc < min || argc > max => {
            if min == max {
                Err(Fault::arity(min, argc))
            } else {
                Err(Fault::arity(format!("{min}..{max}"), argc))
            }
        }
        None if argc < min => Err(Fault::arity(format!("{min}+"), argc)),
        _ => Ok(()),
    }
}
