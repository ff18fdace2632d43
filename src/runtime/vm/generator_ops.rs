use std::sync::Arc;

use crate::runtime::{
    error::Fault,
    frame::Frame,
    generator::{Generator, GeneratorStatus, GeneratorStep},
    upvalue::Upvalue,
    value::Value,
};

use super::{RunExit, Vm, dispatch::Flow};

impl Vm {
    /// Resumes `generator` on top of the current stack and runs it until it
    /// yields, returns or fails.
    pub fn resume_generator(&mut self, generator: &Arc<Generator>) -> Result<GeneratorStep, Fault> {
        let (segment, cursor, parked, completions, tail_calls) = {
            let mut state = generator.state();
            match state.status {
                GeneratorStatus::Running => {
                    return Err(Fault::generator(format!(
                        "generator {} is already running",
                        generator.name()
                    )));
                }
                GeneratorStatus::Completed => return Ok(GeneratorStep::Exhausted),
                GeneratorStatus::Failed => {
                    return Err(Fault::generator(format!(
                        "generator {} failed; reset it before resuming",
                        generator.name()
                    )));
                }
                GeneratorStatus::Initial | GeneratorStatus::Suspended => {}
            }
            state.status = GeneratorStatus::Running;
            (
                std::mem::take(&mut state.segment),
                state.cursor,
                std::mem::take(&mut state.parked),
                std::mem::take(&mut state.completions),
                state.tail_calls,
            )
        };
        tracing::trace!(generator = generator.name(), cursor, "resume");

        let base = self.sp;
        let result = self.nested(|vm, entry_depth| {
            vm.restore_generator_frame(generator, base, segment, parked)?;
            let mut frame = Frame::new(generator.closure.clone(), base);
            frame.ip = cursor;
            frame.completions = completions;
            frame.tail_calls = tail_calls;
            frame.generator = Some(generator.clone());
            vm.push_frame(frame)?;
            match vm.run_until(entry_depth)? {
                RunExit::Yield(value) => Ok(GeneratorStep::Yielded(value)),
                RunExit::Return(value) => Ok(GeneratorStep::Returned(value)),
            }
        });

        let mut state = generator.state();
        match &result {
            Ok(GeneratorStep::Yielded(_)) => {}
            Ok(_) => {
                state.status = GeneratorStatus::Completed;
                state.segment.clear();
                state.parked.clear();
                tracing::trace!(generator = generator.name(), "completed");
            }
            Err(fault) => {
                state.status = GeneratorStatus::Failed;
                tracing::debug!(generator = generator.name(), error = %fault, "generator failed");
            }
        }
        drop(state);
        if result.is_err() {
            self.close_upvalues(base);
            self.truncate_stack(base);
        }
        result
    }

    /// Copies the saved segment onto the stack at `base` and re-opens the
    /// upvalues parked at the last suspension.
    fn restore_generator_frame(
        &mut self,
        generator: &Generator,
        base: usize,
        segment: Vec<Value>,
        parked: Vec<(usize, Arc<Upvalue>)>,
    ) -> Result<(), Fault> {
        let needed = segment.len().max(generator.closure.function.num_locals);
        if base + needed > self.stack.len() {
            return Err(Fault::ValueStackOverflow {
                limit: self.stack.len(),
            });
        }
        for value in segment {
            self.push(value)?;
        }
        for (offset, upvalue) in parked {
            upvalue.reopen(self.id, base + offset, &mut self.stack);
            self.open_upvalues.push((base + offset, upvalue));
        }
        Ok(())
    }

    /// Saves the generator frame's live slots, cursor and completions into
    /// its generator and hands `value` to the resumer.
    pub(super) fn execute_yield(
        &mut self,
        top: usize,
        value: Value,
        entry_depth: usize,
    ) -> Result<Flow, Fault> {
        let generator = self.frames[top]
            .generator
            .clone()
            .ok_or_else(|| Fault::Internal("yield outside of a generator frame".to_string()))?;
        if top != entry_depth {
            return Err(Fault::Internal(
                "yielding generator frame is not the resumption entry".to_string(),
            ));
        }
        let Some(frame) = self.frames.pop() else {
            return Err(Fault::Internal("empty call stack".to_string()));
        };
        let parked = self.park_upvalues(frame.base);
        let segment = self.take_segment(frame.base);

        let mut state = generator.state();
        state.segment = segment;
        state.cursor = frame.ip;
        state.parked = parked;
        state.completions = frame.completions;
        state.tail_calls = frame.tail_calls;
        state.status = GeneratorStatus::Suspended;
        Ok(Flow::Exit(RunExit::Yield(value)))
    }

    /// Advances the generator beneath the top of the stack: pushes the
    /// yielded value, or pops the generator and jumps to `target` once it is
    /// done.
    pub(super) fn iter_next(&mut self, top: usize, target: usize) -> Result<Flow, Fault> {
        let generator = match self.peek(0)? {
            Value::Generator(generator) => generator.clone(),
            other => {
                return Err(Fault::type_error(format!(
                    "{} is not iterable",
                    other.describe_type()
                )));
            }
        };
        match self.resume_generator(&generator)? {
            GeneratorStep::Yielded(value) => {
                self.push(value)?;
                Ok(Flow::Next)
            }
            GeneratorStep::Returned(_) | GeneratorStep::Exhausted => {
                self.pop()?;
                self.jump_to(top, target)
            }
        }
    }
}
