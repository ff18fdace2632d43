use std::sync::Arc;

use crate::{
    bytecode::{debug_info::FunctionDebugInfo, function::BytecodeFunction},
    runtime::{
        closure::Closure, error::TraceEntry, generator::Generator, value::Value,
    },
};

/// How control leaves a finally-protected range; resumed by `EndFinally`.
#[derive(Debug, Clone)]
pub enum CompletionKind {
    Normal,
    Return(Value),
    Throw(Value),
    Jump(usize),
}

/// A pending exit recorded when control entered the finally block starting
/// at `finally_start`.
#[derive(Debug, Clone)]
pub struct Completion {
    pub finally_start: usize,
    pub kind: CompletionKind,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub closure: Arc<Closure>,
    /// Offset of the next instruction.
    pub ip: usize,
    /// Offset of the instruction being executed. Line lookup, catch range
    /// matching and stack traces all use this cursor.
    pub current: usize,
    /// Stack index of slot 0 (the receiver, formerly the callee).
    pub base: usize,
    pub local_count: usize,
    pub tail_calls: usize,
    pub stop: bool,
    pub completions: Vec<Completion>,
    pub generator: Option<Arc<Generator>>,
    /// Constructor frames return the receiver whatever the body returns.
    pub returns_receiver: bool,
}

impl Frame {
    pub fn new(closure: Arc<Closure>, base: usize) -> Self {
        let local_count = closure.function.num_locals;
        Self {
            closure,
            ip: 0,
            current: 0,
            base,
            local_count,
            tail_calls: 0,
            stop: false,
            completions: Vec::new(),
            generator: None,
            returns_receiver: false,
        }
    }

    /// Bottom-of-stack marker. It never executes; returning into it ends a
    /// host-level run.
    pub fn sentinel() -> Self {
        let function = BytecodeFunction::new(
            vec![],
            vec![],
            FunctionDebugInfo::new(Some("<host>".to_string()), None, Default::default()),
            Default::default(),
            1,
            0,
            vec![],
            false,
            false,
        );
        Frame::new(Arc::new(Closure::new(Arc::new(function), vec![])), 0)
    }

    pub fn function(&self) -> &Arc<BytecodeFunction> {
        &self.closure.function
    }

    pub fn trace_entry(&self) -> TraceEntry {
        let info = &self.closure.function.debug_info;
        TraceEntry {
            function: info.display_name().to_string(),
            file: info.file.clone(),
            line: info.line_at(self.current),
            tail_calls: self.tail_calls,
        }
    }
}
