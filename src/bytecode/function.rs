use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    bytecode::{debug_info::FunctionDebugInfo, op_code::Instructions},
    runtime::value::Value,
};

/// A protected instruction range `[from, to)` and where control goes when an
/// error is raised inside it (or, for finally entries, on any exit from it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchEntry {
    pub from: usize,
    pub to: usize,
    pub jump: usize,
    pub finally: bool,
}

impl CatchEntry {
    pub fn catch(from: usize, to: usize, jump: usize) -> Self {
        Self {
            from,
            to,
            jump,
            finally: false,
        }
    }

    pub fn finally(from: usize, to: usize, jump: usize) -> Self {
        Self {
            from,
            to,
            jump,
            finally: true,
        }
    }

    pub fn covers(&self, offset: usize) -> bool {
        self.from <= offset && offset < self.to
    }
}

/// Declared parameters, in slot order:
/// required, optional, positional rest, post-rest, named rest.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Parameters {
    pub names: Vec<String>,
    pub optional: usize,
    /// `Some(n)` when the function takes a positional rest parameter followed
    /// by `n` trailing positional parameters.
    pub post_rest: Option<usize>,
    pub named_rest: bool,
}

impl Parameters {
    pub fn fixed<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.names.len()
    }

    pub fn has_rest(&self) -> bool {
        self.post_rest.is_some()
    }

    pub fn post_rest_count(&self) -> usize {
        self.post_rest.unwrap_or(0)
    }

    pub fn required(&self) -> usize {
        self.count()
            .saturating_sub(self.optional)
            .saturating_sub(usize::from(self.has_rest()))
            .saturating_sub(self.post_rest_count())
            .saturating_sub(usize::from(self.named_rest))
    }

    pub fn min_args(&self) -> usize {
        self.required() + self.post_rest_count()
    }

    /// `None` when a rest parameter absorbs any surplus.
    pub fn max_args(&self) -> Option<usize> {
        if self.has_rest() {
            None
        } else {
            Some(self.required() + self.optional)
        }
    }
}

/// Immutable compiled program unit, shared across every frame executing it.
///
/// Slot 0 of every frame holds the receiver; parameters follow in slot
/// order, so `num_locals` is always at least `parameters.count() + 1`.
#[derive(Debug, Clone)]
pub struct BytecodeFunction {
    pub instructions: Instructions,
    pub constants: Vec<Value>,
    pub debug_info: FunctionDebugInfo,
    pub parameters: Parameters,
    pub num_locals: usize,
    pub upvalue_count: usize,
    pub catches: Vec<CatchEntry>,
    pub sealed: bool,
    pub generator: bool,
    has_finally: bool,
}

impl BytecodeFunction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instructions: Instructions,
        constants: Vec<Value>,
        debug_info: FunctionDebugInfo,
        parameters: Parameters,
        num_locals: usize,
        upvalue_count: usize,
        catches: Vec<CatchEntry>,
        sealed: bool,
        generator: bool,
    ) -> Self {
        let has_finally = catches.iter().any(|entry| entry.finally);
        let num_locals = num_locals.max(parameters.count() + 1);
        Self {
            instructions,
            constants,
            debug_info,
            parameters,
            num_locals,
            upvalue_count,
            catches,
            sealed,
            generator,
            has_finally,
        }
    }

    pub fn name(&self) -> &str {
        self.debug_info.display_name()
    }

    pub fn has_finally(&self) -> bool {
        self.has_finally
    }

    /// First entry, in table order, whose range covers `offset`.
    pub fn handler_for(&self, offset: usize) -> Option<&CatchEntry> {
        self.catches.iter().find(|entry| entry.covers(offset))
    }

    /// First finally entry whose range covers `offset`.
    pub fn finally_for(&self, offset: usize) -> Option<&CatchEntry> {
        if !self.has_finally {
            return None;
        }
        self.catches
            .iter()
            .find(|entry| entry.finally && entry.covers(offset))
    }

    /// Restart target used by generator `reset`: the jump address of the
    /// first catch entry. Generator functions must carry one.
    pub fn reset_target(&self) -> Option<usize> {
        self.catches.first().map(|entry| entry.jump)
    }
}

impl PartialEq for BytecodeFunction {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl fmt::Display for BytecodeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn {}>", self.name())
    }
}
