use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::runtime::{
    closure::Closure,
    error::Fault,
    frame::Completion,
    upvalue::Upvalue,
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorStatus {
    /// Arguments bound, body not started.
    Initial,
    Suspended,
    Running,
    Completed,
    /// An error escaped the body. Only `reset` can revive it.
    Failed,
}

/// Result of resuming a generator once.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorStep {
    Yielded(Value),
    Returned(Value),
    /// The generator had already completed.
    Exhausted,
}

#[derive(Debug)]
pub(crate) struct GeneratorState {
    pub status: GeneratorStatus,
    pub cursor: usize,
    /// Live frame slots `[base, sp)` at the last suspension.
    pub segment: Vec<Value>,
    /// Bound arguments and uninitialised locals, kept for `reset`.
    pub initial: Vec<Value>,
    /// Upvalues of the generator's own locals, closed while suspended,
    /// keyed by slot offset from the frame base.
    pub parked: Vec<(usize, Arc<Upvalue>)>,
    pub completions: Vec<Completion>,
    pub tail_calls: usize,
}

/// A suspended invocation that owns a private copy of its frame slots.
#[derive(Debug)]
pub struct Generator {
    pub closure: Arc<Closure>,
    state: Mutex<GeneratorState>,
}

impl Generator {
    pub(crate) fn new(closure: Arc<Closure>, segment: Vec<Value>) -> Self {
        Self {
            closure,
            state: Mutex::new(GeneratorState {
                status: GeneratorStatus::Initial,
                cursor: 0,
                initial: segment.clone(),
                segment,
                parked: Vec::new(),
                completions: Vec::new(),
                tail_calls: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.closure.function.name()
    }

    pub fn status(&self) -> GeneratorStatus {
        self.state.lock().status
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, GeneratorState> {
        self.state.lock()
    }

    /// Rewinds to the function's reset target with the originally bound
    /// arguments. Side effects of earlier runs are not undone.
    pub fn rewind(&self) -> Result<(), Fault> {
        let target = self.closure.function.reset_target().ok_or_else(|| {
            Fault::generator(format!(
                "generator {} has no reset entry in its catch table",
                self.name()
            ))
        })?;
        let mut state = self.state.lock();
        if state.status == GeneratorStatus::Running {
            return Err(Fault::generator(format!(
                "cannot reset generator {} while it is running",
                self.name()
            )));
        }
        state.segment = state.initial.clone();
        state.cursor = target;
        state.parked.clear();
        state.completions.clear();
        state.tail_calls = 0;
        state.status = GeneratorStatus::Initial;
        Ok(())
    }
}
