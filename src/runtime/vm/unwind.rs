//! Catch tables and finally completions.
//!
//! A catch entry receives the error value on the stack. A finally entry
//! instead records a pending [`Completion`] on the frame; `EndFinally`
//! resumes it once the block has run. A fault raised while a completion is
//! pending replaces it unless the new handler sits inside that finally block.

use crate::runtime::{
    error::Fault,
    frame::{Completion, CompletionKind},
    value::Value,
};

use super::{Vm, dispatch::Flow};

impl Vm {
    /// Searches the frames above `entry_depth` for a handler of `error`,
    /// popping (and tracing) every frame without one. Returns `false` when
    /// the error escapes past `entry_depth`.
    pub(super) fn unwind(&mut self, error: Value, entry_depth: usize) -> Result<bool, Fault> {
        while self.frames.len() > entry_depth {
            let top = self.frames.len() - 1;
            let (function, current, locals_end) = {
                let frame = &self.frames[top];
                (
                    frame.closure.function.clone(),
                    frame.current,
                    frame.base + frame.local_count,
                )
            };

            let Some(entry) = function.handler_for(current).copied() else {
                self.discard_frame();
                continue;
            };

            self.truncate_stack(locals_end);
            let frame = &mut self.frames[top];
            frame.completions.retain(|c| entry.from >= c.finally_start);
            frame.ip = entry.jump;
            if entry.finally {
                frame.completions.push(Completion {
                    finally_start: entry.jump,
                    kind: CompletionKind::Throw(error),
                });
            } else {
                self.push(error)?;
            }
            self.pending_trace.clear();
            tracing::trace!(
                function = function.name(),
                at = current,
                handler = entry.jump,
                finally = entry.finally,
                "error caught"
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Pops every frame above `entry_depth` after a fatal fault.
    pub(super) fn abort_frames(&mut self, entry_depth: usize) {
        while self.frames.len() > entry_depth.max(1) {
            self.discard_frame();
        }
    }

    fn discard_frame(&mut self) {
        if self.frames.len() <= 1 {
            return;
        }
        if let Some(frame) = self.frames.pop() {
            self.pending_trace.push(frame.trace_entry());
            self.close_upvalues(frame.base);
            self.truncate_stack(frame.base);
        }
    }

    /// Records a pending return if the current instruction lies in a
    /// finally-protected range, and jumps to that finally block.
    pub(super) fn defer_to_finally(&mut self, top: usize, value: Value) -> Result<bool, Fault> {
        let frame = &mut self.frames[top];
        let Some(entry) = frame.closure.function.finally_for(frame.current).copied() else {
            return Ok(false);
        };
        frame.completions.retain(|c| entry.from >= c.finally_start);
        frame.completions.push(Completion {
            finally_start: entry.jump,
            kind: CompletionKind::Return(value),
        });
        frame.ip = entry.jump;
        Ok(true)
    }

    /// Jumps within the top frame. A jump that leaves a finally-protected
    /// range is routed through the innermost such finally block first.
    pub(super) fn jump_to(&mut self, top: usize, target: usize) -> Result<Flow, Fault> {
        let frame = &self.frames[top];
        let function = frame.closure.function.clone();
        let current = frame.current;
        if target > function.instructions.len() {
            return Err(Fault::Internal(format!(
                "jump target {target} beyond end of {} ({} bytes)",
                function.name(),
                function.instructions.len()
            )));
        }
        if target <= current {
            self.poll_stop()?;
        }

        let leaving = if function.has_finally() {
            function
                .catches
                .iter()
                .find(|entry| entry.finally && entry.covers(current) && !entry.covers(target))
                .copied()
        } else {
            None
        };

        let frame = &mut self.frames[top];
        match leaving {
            Some(entry) => {
                frame.completions.push(Completion {
                    finally_start: entry.jump,
                    kind: CompletionKind::Jump(target),
                });
                frame.ip = entry.jump;
            }
            None => {
                frame.completions.retain(|c| target >= c.finally_start);
                frame.ip = target;
            }
        }
        Ok(Flow::Next)
    }

    /// Normal-path entry into the finally block of the range ending here.
    pub(super) fn enter_finally(&mut self, top: usize, ip: usize) -> Result<(), Fault> {
        let frame = &mut self.frames[top];
        let entry = frame
            .closure
            .function
            .finally_for(ip)
            .copied()
            .ok_or_else(|| {
                Fault::Internal(format!("EnterFinally at {ip} is outside any finally range"))
            })?;
        frame.completions.push(Completion {
            finally_start: entry.jump,
            kind: CompletionKind::Normal,
        });
        frame.ip = entry.jump;
        Ok(())
    }

    /// Resumes the completion recorded when the finally block was entered.
    pub(super) fn end_finally(&mut self, top: usize, entry_depth: usize) -> Result<Flow, Fault> {
        let completion = self.frames[top].completions.pop().ok_or_else(|| {
            Fault::Internal("EndFinally without a pending completion".to_string())
        })?;
        match completion.kind {
            CompletionKind::Normal => Ok(Flow::Next),
            CompletionKind::Return(value) => self.execute_return(top, value, entry_depth),
            CompletionKind::Throw(error) => Err(Fault::Raise(error)),
            CompletionKind::Jump(target) => self.jump_to(top, target),
        }
    }
}
