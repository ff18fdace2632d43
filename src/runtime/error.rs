use std::fmt;

use crate::{bytecode::disassembler::DecodeError, runtime::value::Value};

/// Category of a language-level error object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Type,
    Arithmetic,
    Arity,
    Name,
    StopIteration,
    Generator,
    Resource,
    Value,
    /// Raised by user code with a message rather than an arbitrary value.
    User,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Type => "TypeError",
            ErrorKind::Arithmetic => "ArithmeticError",
            ErrorKind::Arity => "ArityError",
            ErrorKind::Name => "NameError",
            ErrorKind::StopIteration => "StopIteration",
            ErrorKind::Generator => "GeneratorError",
            ErrorKind::Resource => "ResourceError",
            ErrorKind::Value => "ValueError",
            ErrorKind::User => "Error",
        }
    }
}

/// Error object as seen by user code: catchable, inspectable via natives.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorObject {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

/// Internal propagation type of the dispatch loop and the native boundary.
///
/// `Raise` carries a language-level error value and is subject to catch
/// tables. Every other variant aborts the current execution outright.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Fault {
    #[error("uncaught {}", describe_raised(.0))]
    Raise(Value),
    #[error("call stack overflow: more than {limit} frames")]
    CallStackOverflow { limit: usize },
    #[error("value stack overflow: more than {limit} slots")]
    ValueStackOverflow { limit: usize },
    #[error("re-entrancy limit exceeded: more than {limit} nested dispatch loops")]
    ReentrancyLimit { limit: usize },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("execution halted by host")]
    Halted,
}

fn describe_raised(value: &Value) -> String {
    match value {
        Value::Error(error) => error.to_string(),
        other => format!("exception: {}", other.repr()),
    }
}

impl Fault {
    pub fn raise(kind: ErrorKind, message: impl Into<String>) -> Fault {
        Fault::Raise(Value::Error(std::sync::Arc::new(ErrorObject {
            kind,
            message: message.into(),
        })))
    }

    pub fn type_error(message: impl Into<String>) -> Fault {
        Fault::raise(ErrorKind::Type, message)
    }

    pub fn arithmetic(message: impl Into<String>) -> Fault {
        Fault::raise(ErrorKind::Arithmetic, message)
    }

    pub fn arity(want: impl fmt::Display, got: usize) -> Fault {
        Fault::raise(
            ErrorKind::Arity,
            format!("wrong number of arguments: want={want}, got={got}"),
        )
    }

    pub fn name(message: impl Into<String>) -> Fault {
        Fault::raise(ErrorKind::Name, message)
    }

    pub fn generator(message: impl Into<String>) -> Fault {
        Fault::raise(ErrorKind::Generator, message)
    }

    pub fn resource(message: impl Into<String>) -> Fault {
        Fault::raise(ErrorKind::Resource, message)
    }

    pub fn stop_iteration() -> Fault {
        Fault::raise(ErrorKind::StopIteration, "generator exhausted")
    }

    pub fn is_catchable(&self) -> bool {
        matches!(self, Fault::Raise(_))
    }

    /// Error kind of a raised error object, if any.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Fault::Raise(Value::Error(error)) => Some(error.kind),
            _ => None,
        }
    }
}

/// One frame of an unwound call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub tail_calls: usize,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {}", self.function)?;
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, " ({file}:{line})")?,
            (Some(file), None) => write!(f, " ({file})")?,
            (None, Some(line)) => write!(f, " (line {line})")?,
            (None, None) => {}
        }
        write!(f, " tail-calls={}", self.tail_calls)
    }
}

/// Frames from the innermost (where the error was raised) outwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackTrace {
    pub entries: Vec<TraceEntry>,
}

impl StackTrace {
    pub fn new(entries: Vec<TraceEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stack trace:")?;
        for entry in &self.entries {
            write!(f, "\n  {entry}")?;
        }
        Ok(())
    }
}

/// Failure reported to the host: the fault plus the frames it unwound.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{fault}\n{trace}")]
pub struct RuntimeError {
    pub fault: Fault,
    pub trace: StackTrace,
}

impl RuntimeError {
    pub fn new(fault: Fault, trace: StackTrace) -> Self {
        Self { fault, trace }
    }

    /// The value thrown by user code, for uncaught language-level errors.
    pub fn thrown(&self) -> Option<&Value> {
        match &self.fault {
            Fault::Raise(value) => Some(value),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.fault.error_kind()
    }

    pub fn message(&self) -> String {
        self.fault.to_string()
    }
}
