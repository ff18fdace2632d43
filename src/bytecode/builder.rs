//! Assembler for bytecode functions.
//!
//! Index-like operands pick the narrowest opcode variant that encodes them.
//! Forward jumps are emitted with a 16-bit operand and patched when the
//! function is built; backward jumps use the narrowest width.

use std::sync::Arc;

use crate::{
    bytecode::{
        constant_pool::ConstantPool,
        debug_info::{FunctionDebugInfo, LineTable},
        disassembler::Capture,
        function::{BytecodeFunction, CatchEntry, Parameters},
        op_code::{
            CAPTURE_LOCAL, CAPTURE_WIDE, CLASS_HAS_SUPERCLASS, OpCode, OperandLayout,
            RANGE_INCLUSIVE, Width, make,
        },
    },
    runtime::{registry::Registry, value::Value},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("label {label} is used but never bound in {function}")]
    UnboundLabel { label: usize, function: String },
    #[error("label {label} is bound twice in {function}")]
    LabelRebound { label: usize, function: String },
    #[error("forward jump at offset {at} to {target} does not fit a 16-bit operand")]
    JumpOutOfRange { at: usize, target: usize },
    #[error("operand {value} does not fit {op}")]
    OperandTooWide { op: OpCode, value: usize },
    #[error("closure over {function} lists {got} captures, the function declares {expected}")]
    CaptureMismatch {
        function: String,
        expected: usize,
        got: usize,
    },
    #[error("capture index {0} does not fit 16 bits")]
    CaptureTooWide(usize),
}

/// Position in the instruction stream, bound once with
/// [`FunctionBuilder::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug)]
struct JumpPatch {
    at: usize,
    operand_at: usize,
    label: Label,
}

#[derive(Debug)]
struct PendingCatch {
    from: Label,
    to: Label,
    jump: Label,
    finally: bool,
}

#[derive(Debug)]
pub struct FunctionBuilder {
    registry: Arc<Registry>,
    name: Option<String>,
    file: Option<String>,
    line: u32,
    code: Vec<u8>,
    pool: ConstantPool,
    lines: LineTable,
    parameters: Parameters,
    num_locals: usize,
    upvalue_count: usize,
    sealed: bool,
    generator: bool,
    labels: Vec<Option<usize>>,
    patches: Vec<JumpPatch>,
    catches: Vec<PendingCatch>,
    reset_target: Option<Label>,
    error: Option<BuildError>,
}

impl FunctionBuilder {
    pub fn new(registry: &Arc<Registry>, name: &str) -> Self {
        Self {
            registry: registry.clone(),
            name: Some(name.to_string()),
            file: None,
            line: 1,
            code: Vec::new(),
            pool: ConstantPool::new(),
            lines: LineTable::new(),
            parameters: Parameters::default(),
            num_locals: 1,
            upvalue_count: 0,
            sealed: false,
            generator: false,
            labels: Vec::new(),
            patches: Vec::new(),
            catches: Vec::new(),
            reset_target: None,
            error: None,
        }
    }

    /// Builder for a nested function in the same file.
    pub fn child(&self, name: &str) -> Self {
        let mut child = Self::new(&self.registry, name);
        child.file = self.file.clone();
        child.line = self.line;
        child
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn file(&mut self, file: &str) -> &mut Self {
        self.file = Some(file.to_string());
        self
    }

    /// Source line recorded for the instructions emitted next.
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    pub fn params<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = Parameters::fixed(names);
        self
    }

    pub fn parameters(&mut self, parameters: Parameters) -> &mut Self {
        self.parameters = parameters;
        self
    }

    /// Total frame slots, receiver included. Never fewer than the
    /// parameters need.
    pub fn locals(&mut self, count: usize) -> &mut Self {
        self.num_locals = count;
        self
    }

    pub fn upvalues(&mut self, count: usize) -> &mut Self {
        self.upvalue_count = count;
        self
    }

    /// Marks the function as a generator. Unless [`Self::reset_entry`] names
    /// another target, `reset` rewinds to offset 0.
    pub fn generator(&mut self) -> &mut Self {
        self.generator = true;
        self
    }

    pub fn sealed(&mut self) -> &mut Self {
        self.sealed = true;
        self
    }

    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn constant(&mut self, value: Value) -> usize {
        self.pool.add(value)
    }

    pub fn symbol(&mut self, name: &str) -> usize {
        let symbol = self.registry.intern(name);
        self.pool.add(Value::Symbol(symbol))
    }

    fn fail(&mut self, error: BuildError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn push_instruction(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
        self.lines.push(self.line, bytes.len() as u32);
    }

    /// Emits `op` exactly as given. Operands wider than the opcode's
    /// encoding are reported when the function is built.
    pub fn emit(&mut self, op: OpCode, operands: &[usize]) -> &mut Self {
        if let Some(value) = oversized_operand(op, operands) {
            self.fail(BuildError::OperandTooWide { op, value });
        }
        let instruction = make(op, operands);
        self.push_instruction(&instruction);
        self
    }

    pub fn op(&mut self, op: OpCode) -> &mut Self {
        self.emit(op, &[])
    }

    /// Emits the member of `base`'s family wide enough for `operands[0]`.
    fn family(&mut self, base: OpCode, operands: &[usize]) -> &mut Self {
        let value = operands.first().copied().unwrap_or(0);
        match Width::for_value(value) {
            Some(width) => self.emit(base.with_width(width), operands),
            None => {
                self.fail(BuildError::OperandTooWide { op: base, value });
                self
            }
        }
    }

    pub fn load_const(&mut self, value: Value) -> &mut Self {
        let index = self.constant(value);
        self.family(OpCode::Const8, &[index])
    }

    pub fn get_local(&mut self, slot: usize) -> &mut Self {
        self.family(OpCode::GetLocal8, &[slot])
    }

    pub fn set_local(&mut self, slot: usize) -> &mut Self {
        self.family(OpCode::SetLocal8, &[slot])
    }

    pub fn get_upvalue(&mut self, index: usize) -> &mut Self {
        self.family(OpCode::GetUpvalue8, &[index])
    }

    pub fn set_upvalue(&mut self, index: usize) -> &mut Self {
        self.family(OpCode::SetUpvalue8, &[index])
    }

    pub fn close_upvalues(&mut self, slot: usize) -> &mut Self {
        self.family(OpCode::CloseUpvalues8, &[slot])
    }

    pub fn get_global(&mut self, name: &str) -> &mut Self {
        let index = self.symbol(name);
        self.family(OpCode::GetGlobal8, &[index])
    }

    pub fn set_global(&mut self, name: &str) -> &mut Self {
        let index = self.symbol(name);
        self.family(OpCode::SetGlobal8, &[index])
    }

    pub fn get_field(&mut self, name: &str) -> &mut Self {
        let index = self.symbol(name);
        self.family(OpCode::GetField8, &[index])
    }

    pub fn set_field(&mut self, name: &str) -> &mut Self {
        let index = self.symbol(name);
        self.family(OpCode::SetField8, &[index])
    }

    pub fn invoke(&mut self, name: &str, argc: usize) -> &mut Self {
        let index = self.symbol(name);
        self.family(OpCode::Invoke8, &[index, argc])
    }

    pub fn instantiate(&mut self, class: &str, argc: usize) -> &mut Self {
        let index = self.symbol(class);
        self.family(OpCode::Instantiate8, &[index, argc])
    }

    pub fn call(&mut self, argc: usize) -> &mut Self {
        self.emit(OpCode::Call, &[argc])
    }

    pub fn tail_call(&mut self, argc: usize) -> &mut Self {
        self.emit(OpCode::TailCall, &[argc])
    }

    pub fn array(&mut self, count: usize) -> &mut Self {
        self.emit(OpCode::Array, &[count])
    }

    pub fn range(&mut self, inclusive: bool) -> &mut Self {
        let flag = if inclusive { RANGE_INCLUSIVE } else { 0 };
        self.emit(OpCode::Range, &[flag as usize])
    }

    pub fn regex(&mut self, pattern: &str, flags: u8) -> &mut Self {
        let index = self.constant(Value::string(pattern));
        self.family(OpCode::Regex8, &[index, flags as usize])
    }

    /// Defines class `name`; with `has_superclass` the parent class is
    /// popped from the stack first.
    pub fn def_class(&mut self, name: &str, has_superclass: bool) -> &mut Self {
        let index = self.symbol(name);
        let flags = if has_superclass { CLASS_HAS_SUPERCLASS } else { 0 };
        self.family(OpCode::DefClass8, &[index, flags as usize])
    }

    pub fn def_method(&mut self, name: &str) -> &mut Self {
        let index = self.symbol(name);
        self.family(OpCode::DefMethod8, &[index])
    }

    /// Emits a closure over `function` followed by one capture descriptor
    /// per declared upvalue.
    pub fn closure(&mut self, function: Arc<BytecodeFunction>, captures: &[Capture]) -> &mut Self {
        if captures.len() != function.upvalue_count {
            self.fail(BuildError::CaptureMismatch {
                function: function.name().to_string(),
                expected: function.upvalue_count,
                got: captures.len(),
            });
        }
        let index = self.constant(Value::Function(function));
        let Some(width) = Width::for_value(index) else {
            self.fail(BuildError::OperandTooWide {
                op: OpCode::Closure8,
                value: index,
            });
            return self;
        };
        let mut bytes = make(OpCode::Closure8.with_width(width), &[index]);
        for capture in captures {
            let mut flags = if capture.local { CAPTURE_LOCAL } else { 0 };
            if capture.index > u16::MAX as usize {
                self.fail(BuildError::CaptureTooWide(capture.index));
                continue;
            }
            if capture.index > u8::MAX as usize {
                flags |= CAPTURE_WIDE;
                bytes.push(flags);
                bytes.extend_from_slice(&(capture.index as u16).to_be_bytes());
            } else {
                bytes.push(flags);
                bytes.push(capture.index as u8);
            }
        }
        self.push_instruction(&bytes);
        self
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current offset.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        if self.labels[label.0].is_some() {
            self.fail(BuildError::LabelRebound {
                label: label.0,
                function: self.display_name(),
            });
        }
        self.labels[label.0] = Some(self.code.len());
        self
    }

    /// A new label bound at the current offset.
    pub fn here(&mut self) -> Label {
        let label = self.label();
        self.bind(label);
        label
    }

    fn jump_family(&mut self, base: OpCode, label: Label) -> &mut Self {
        if let Some(target) = self.labels[label.0] {
            return self.family(base, &[target]);
        }
        let at = self.code.len();
        self.emit(base.with_width(Width::Two), &[0]);
        self.patches.push(JumpPatch {
            at,
            operand_at: at + 1,
            label,
        });
        self
    }

    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.jump_family(OpCode::Jump8, label)
    }

    pub fn jump_if_false(&mut self, label: Label) -> &mut Self {
        self.jump_family(OpCode::JumpIfFalse8, label)
    }

    pub fn jump_if_true(&mut self, label: Label) -> &mut Self {
        self.jump_family(OpCode::JumpIfTrue8, label)
    }

    /// Advances the generator on top of the stack, jumping to `done` once it
    /// is exhausted.
    pub fn iter_next(&mut self, done: Label) -> &mut Self {
        self.jump_family(OpCode::IterNext8, done)
    }

    /// Protects `[from, to)` with a catch handler at `handler`. Entries are
    /// matched in the order they were added, so add inner ranges first.
    pub fn catch(&mut self, from: Label, to: Label, handler: Label) -> &mut Self {
        self.catches.push(PendingCatch {
            from,
            to,
            jump: handler,
            finally: false,
        });
        self
    }

    /// Protects `[from, to)` with the finally block at `handler`. The range
    /// should end just after its `EnterFinally`.
    pub fn finally(&mut self, from: Label, to: Label, handler: Label) -> &mut Self {
        self.catches.push(PendingCatch {
            from,
            to,
            jump: handler,
            finally: true,
        });
        self
    }

    /// Target generator `reset` rewinds to.
    pub fn reset_entry(&mut self, target: Label) -> &mut Self {
        self.reset_target = Some(target);
        self
    }

    fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "<anonymous>".to_string())
    }

    fn resolve(&self, label: Label) -> Result<usize, BuildError> {
        self.labels
            .get(label.0)
            .copied()
            .flatten()
            .ok_or_else(|| BuildError::UnboundLabel {
                label: label.0,
                function: self.display_name(),
            })
    }

    pub fn build(mut self) -> Result<BytecodeFunction, BuildError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        for patch in &self.patches {
            let target = self.resolve(patch.label)?;
            if target > u16::MAX as usize {
                return Err(BuildError::JumpOutOfRange {
                    at: patch.at,
                    target,
                });
            }
            self.code[patch.operand_at..patch.operand_at + 2]
                .copy_from_slice(&(target as u16).to_be_bytes());
        }

        let mut catches = Vec::with_capacity(self.catches.len() + 1);
        match self.reset_target {
            Some(label) => catches.push(CatchEntry::catch(0, 0, self.resolve(label)?)),
            None if self.generator => catches.push(CatchEntry::catch(0, 0, 0)),
            None => {}
        }
        for pending in &self.catches {
            let (from, to, jump) = (
                self.resolve(pending.from)?,
                self.resolve(pending.to)?,
                self.resolve(pending.jump)?,
            );
            catches.push(if pending.finally {
                CatchEntry::finally(from, to, jump)
            } else {
                CatchEntry::catch(from, to, jump)
            });
        }

        Ok(BytecodeFunction::new(
            self.code,
            self.pool.into_values(),
            FunctionDebugInfo::new(self.name, self.file, self.lines),
            self.parameters,
            self.num_locals,
            self.upvalue_count,
            catches,
            self.sealed,
            self.generator,
        ))
    }

    pub fn build_arc(self) -> Result<Arc<BytecodeFunction>, BuildError> {
        self.build().map(Arc::new)
    }
}

fn oversized_operand(op: OpCode, operands: &[usize]) -> Option<usize> {
    let operand = |i: usize| operands.get(i).copied().unwrap_or(0);
    let byte = u8::MAX as usize;
    match op.layout() {
        OperandLayout::None => None,
        OperandLayout::Numeric(width)
        | OperandLayout::Constant(width)
        | OperandLayout::Closure(width) => {
            Some(operand(0)).filter(|value| *value > width.max_value())
        }
        OperandLayout::ConstantCount(width) | OperandLayout::ConstantFlags(width) => {
            if operand(0) > width.max_value() {
                Some(operand(0))
            } else {
                Some(operand(1)).filter(|value| *value > byte)
            }
        }
        OperandLayout::RangeFlag => Some(operand(0)).filter(|value| *value > byte),
    }
}
