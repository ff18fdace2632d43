use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use crate::{
    bytecode::function::BytecodeFunction,
    runtime::{
        closure::Closure,
        config::{ConfigError, VmConfig},
        error::{Fault, RuntimeError, StackTrace, TraceEntry},
        frame::Frame,
        generator::{Generator, GeneratorStep},
        registry::Registry,
        symbol::Symbol,
        upvalue::{Upvalue, VmId},
        value::Value,
    },
};

mod binary_ops;
mod comparison_ops;
mod dispatch;
mod function_call;
mod generator_ops;
mod trace;
mod unwind;
mod upvalues;

static NEXT_VM_ID: AtomicU64 = AtomicU64::new(1);

/// How a dispatch loop started by `run_until` ended.
#[derive(Debug)]
pub(crate) enum RunExit {
    Return(Value),
    Yield(Value),
}

/// Cross-thread request to stop a running VM. The VM checks it on calls and
/// backward jumps and then fails with [`Fault::Halted`].
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One bytecode interpreter instance: a pre-sized value stack, a pre-sized
/// call stack whose frame 0 is a sentinel, and the open upvalues aliasing
/// slots of that value stack.
///
/// A VM is single-threaded. Run independent work on other threads with
/// [`Vm::fork`] or the [`crate::runtime::pool::ThreadPool`].
pub struct Vm {
    id: VmId,
    config: VmConfig,
    registry: Arc<Registry>,
    stack: Vec<Value>,
    sp: usize,
    frames: Vec<Frame>,
    frame_capacity: usize,
    /// Sorted by slot index.
    open_upvalues: Vec<(usize, Arc<Upvalue>)>,
    reentrancy: usize,
    pending_trace: Vec<TraceEntry>,
    stop_requested: Arc<AtomicBool>,
    init_symbol: Symbol,
}

impl Vm {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::build(registry, VmConfig::default())
    }

    pub fn with_config(registry: Arc<Registry>, config: VmConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(registry, config))
    }

    fn build(registry: Arc<Registry>, config: VmConfig) -> Self {
        let frame_capacity = config.frame_capacity();
        let mut frames = Vec::with_capacity(frame_capacity);
        frames.push(Frame::sentinel());
        let init_symbol = registry.intern("init");
        Self {
            id: NEXT_VM_ID.fetch_add(1, Ordering::Relaxed),
            stack: vec![Value::Undefined; config.value_stack_slots],
            sp: 0,
            frames,
            frame_capacity,
            open_upvalues: Vec::new(),
            reentrancy: 0,
            pending_trace: Vec::new(),
            stop_requested: Arc::new(AtomicBool::new(false)),
            init_symbol,
            registry,
            config,
        }
    }

    /// A new independent VM sharing this one's registry and configuration.
    ///
    /// Stack offsets are plain indices, so a fork of an idle VM needs no
    /// rebasing; live stack contents are not carried over because open
    /// upvalues alias slots of this instance only.
    pub fn fork(&self) -> Vm {
        Self::build(self.registry.clone(), self.config.clone())
    }

    pub fn id(&self) -> VmId {
        self.id
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop_requested.clone())
    }

    /// Stops the innermost executing frame before its next instruction.
    /// Meant for natives; hosts on other threads use [`Vm::stop_handle`].
    pub fn halt(&mut self) {
        if self.frames.len() > 1 {
            if let Some(frame) = self.frames.last_mut() {
                frame.stop = true;
            }
        }
    }

    /// Number of live frames, the sentinel excluded.
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }

    pub fn stack_pointer(&self) -> usize {
        self.sp
    }

    /// Tail calls absorbed by the innermost frame.
    pub fn current_tail_calls(&self) -> usize {
        self.frames.last().map_or(0, |frame| frame.tail_calls)
    }

    pub fn open_upvalue_count(&self) -> usize {
        self.open_upvalues.len()
    }

    pub fn is_idle(&self) -> bool {
        self.frames.len() == 1 && self.sp == 0 && self.reentrancy == 0
    }

    /// Runs a top-level function with `args`.
    pub fn run(
        &mut self,
        function: Arc<BytecodeFunction>,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        if function.upvalue_count > 0 {
            return Err(RuntimeError::new(
                Fault::Internal(format!(
                    "top-level function {} declares {} upvalues",
                    function.name(),
                    function.upvalue_count
                )),
                StackTrace::default(),
            ));
        }
        let callee = Value::Closure(Arc::new(Closure::new(function, Vec::new())));
        self.call_value(&callee, args)
    }

    /// Host entry point: calls any callable value.
    pub fn call_value(&mut self, callee: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
        self.host_boundary(|vm| vm.call(callee, args))
    }

    /// Host entry point: invokes method `name` on `receiver`.
    pub fn invoke(
        &mut self,
        receiver: &Value,
        name: &str,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        self.host_boundary(|vm| vm.call_method(receiver, name, args))
    }

    /// Host entry point: resumes `generator` once. `None` once it finishes.
    pub fn generator_next(
        &mut self,
        generator: &Arc<Generator>,
    ) -> Result<Option<Value>, RuntimeError> {
        self.host_boundary(|vm| match vm.resume_generator(generator)? {
            GeneratorStep::Yielded(value) => Ok(Some(value)),
            GeneratorStep::Returned(_) | GeneratorStep::Exhausted => Ok(None),
        })
    }

    pub fn generator_step(
        &mut self,
        generator: &Arc<Generator>,
    ) -> Result<GeneratorStep, RuntimeError> {
        self.host_boundary(|vm| vm.resume_generator(generator))
    }

    pub fn generator_reset(&mut self, generator: &Arc<Generator>) -> Result<(), RuntimeError> {
        self.host_boundary(|_| generator.rewind())
    }

    /// Re-entrant call for natives: runs `callee` to completion in a nested
    /// dispatch loop on the same stacks.
    pub fn call(&mut self, callee: &Value, args: &[Value]) -> Result<Value, Fault> {
        self.call_with_receiver(callee, None, args)
    }

    /// Re-entrant method invocation for natives.
    pub fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: &[Value],
    ) -> Result<Value, Fault> {
        let symbol = self.registry.intern(name);
        self.invoke_nested(receiver, symbol, args)
    }

    /// Converts a fault escaping to the host into a [`RuntimeError`] and, at
    /// the outermost level, returns the VM to idle so it stays usable.
    fn host_boundary<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<T, Fault>,
    ) -> Result<T, RuntimeError> {
        let outermost = self.reentrancy == 0;
        if outermost {
            self.pending_trace.clear();
        }
        match body(self) {
            Ok(value) => Ok(value),
            Err(fault) => {
                let trace = StackTrace::new(std::mem::take(&mut self.pending_trace));
                tracing::debug!(vm = self.id, error = %fault, frames = trace.entries.len(), "execution failed");
                if outermost {
                    self.reset_to_idle();
                }
                Err(RuntimeError::new(fault, trace))
            }
        }
    }

    fn reset_to_idle(&mut self) {
        self.close_upvalues(0);
        self.frames.truncate(1);
        if let Some(sentinel) = self.frames.first_mut() {
            sentinel.stop = false;
        }
        self.truncate_stack(0);
        self.reentrancy = 0;
        self.stop_requested.store(false, Ordering::Release);
    }

    fn poll_stop(&mut self) -> Result<(), Fault> {
        if self.stop_requested.swap(false, Ordering::AcqRel) {
            return Err(Fault::Halted);
        }
        Ok(())
    }

    fn push_frame(&mut self, frame: Frame) -> Result<(), Fault> {
        if self.frames.len() >= self.frame_capacity {
            return Err(Fault::CallStackOverflow {
                limit: self.frame_capacity,
            });
        }
        self.poll_stop()?;
        self.frames.push(frame);
        Ok(())
    }

    #[inline(always)]
    fn push(&mut self, value: Value) -> Result<(), Fault> {
        match self.stack.get_mut(self.sp) {
            Some(slot) => {
                *slot = value;
                self.sp += 1;
                Ok(())
            }
            None => Err(Fault::ValueStackOverflow {
                limit: self.stack.len(),
            }),
        }
    }

    #[inline(always)]
    fn pop(&mut self) -> Result<Value, Fault> {
        if self.sp == 0 {
            return Err(Fault::Internal("stack underflow".to_string()));
        }
        self.sp -= 1;
        Ok(std::mem::take(&mut self.stack[self.sp]))
    }

    fn peek(&self, back: usize) -> Result<&Value, Fault> {
        if back >= self.sp {
            return Err(Fault::Internal("stack underflow".to_string()));
        }
        Ok(&self.stack[self.sp - 1 - back])
    }

    /// Lowers the stack pointer to `new_sp`, clearing the vacated slots.
    fn truncate_stack(&mut self, new_sp: usize) {
        if new_sp >= self.sp {
            return;
        }
        for slot in &mut self.stack[new_sp..self.sp] {
            *slot = Value::Undefined;
        }
        self.sp = new_sp;
    }

    /// Moves `[base, sp)` out of the stack and lowers the stack pointer.
    fn take_segment(&mut self, base: usize) -> Vec<Value> {
        let segment = self.stack[base..self.sp]
            .iter_mut()
            .map(std::mem::take)
            .collect();
        self.sp = base;
        segment
    }

    fn build_array(&mut self, count: usize) -> Result<Value, Fault> {
        let start = self
            .sp
            .checked_sub(count)
            .ok_or_else(|| Fault::Internal("stack underflow".to_string()))?;
        Ok(Value::array(self.take_segment(start)))
    }
}

#[cfg(test)]
mod comparison_ops_test;
#[cfg(test)]
mod generator_ops_test;
