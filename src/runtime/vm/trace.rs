use crate::{
    bytecode::{
        disassembler::{decode_instruction, render_instruction},
        function::BytecodeFunction,
    },
    runtime::{error::StackTrace, value::Value},
};

use super::Vm;

/// Stack slots shown per traced instruction.
const TRACE_STACK_WINDOW: usize = 4;

impl Vm {
    pub(super) fn trace_instruction(&self, function: &BytecodeFunction, ip: usize) {
        let rendered = match decode_instruction(&function.instructions, &function.constants, ip) {
            Ok(instruction) => {
                render_instruction(&instruction, &function.constants, Some(&self.registry))
            }
            Err(err) => err.to_string(),
        };
        let window: Vec<String> = self.stack[self.sp.saturating_sub(TRACE_STACK_WINDOW)..self.sp]
            .iter()
            .map(Value::repr)
            .collect();
        tracing::trace!(
            target: "kiln::vm",
            function = function.name(),
            depth = self.depth(),
            "{rendered} | stack: [{}]",
            window.join(", ")
        );
    }

    /// Live frames, innermost first, the sentinel excluded.
    pub fn backtrace(&self) -> StackTrace {
        StackTrace::new(
            self.frames[1..]
                .iter()
                .rev()
                .map(|frame| frame.trace_entry())
                .collect(),
        )
    }
}
