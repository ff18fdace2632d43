use std::fmt::Write as _;

use crate::{
    bytecode::{
        function::BytecodeFunction,
        op_code::{
            CAPTURE_LOCAL, CAPTURE_WIDE, OpCode, OperandLayout, RANGE_INCLUSIVE, read_operand,
            read_u8, read_u16,
        },
    },
    runtime::{registry::Registry, value::Value},
};

/// Malformed instruction stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("offset {offset} is past the end of the instruction stream")]
    EndOfStream { offset: usize },
    #[error("unknown opcode {byte:#04x} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },
    #[error("truncated {op} at offset {offset}: needs {needed} bytes, {available} available")]
    Truncated {
        op: OpCode,
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("constant index {index} out of bounds (pool has {len}) at offset {offset}")]
    ConstantOutOfBounds {
        index: usize,
        len: usize,
        offset: usize,
    },
    #[error("closure at offset {offset} targets constant {index}, which is not a function")]
    NotAFunction { index: usize, offset: usize },
}

/// One closure capture descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capture {
    /// Captures a local of the enclosing frame rather than one of its
    /// upvalues.
    pub local: bool,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operands {
    None,
    Numeric(usize),
    Constant(usize),
    ConstantCount { index: usize, count: u8 },
    ConstantFlags { index: usize, flags: u8 },
    Closure { index: usize, captures: Vec<Capture> },
    RangeFlag(u8),
}

impl Operands {
    /// Operand values in encoding order; capture descriptors contribute
    /// their index.
    pub fn values(&self) -> Vec<usize> {
        match self {
            Operands::None => Vec::new(),
            Operands::Numeric(value) | Operands::Constant(value) => vec![*value],
            Operands::ConstantCount { index, count } => vec![*index, *count as usize],
            Operands::ConstantFlags { index, flags } => vec![*index, *flags as usize],
            Operands::Closure { index, captures } => std::iter::once(*index)
                .chain(captures.iter().map(|capture| capture.index))
                .collect(),
            Operands::RangeFlag(flag) => vec![*flag as usize],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub op: OpCode,
    pub operands: Operands,
    /// Encoded length in bytes, capture descriptors included.
    pub len: usize,
}

/// Decodes the instruction at `offset`. `constants` resolves closure targets
/// (for their capture count) and bounds-checks constant operands.
pub fn decode_instruction(
    code: &[u8],
    constants: &[Value],
    offset: usize,
) -> Result<Instruction, DecodeError> {
    let byte = read_u8(code, offset).ok_or(DecodeError::EndOfStream { offset })?;
    let op = OpCode::from_byte(byte).ok_or(DecodeError::UnknownOpcode { byte, offset })?;
    let available = code.len() - offset;
    let truncated = |needed: usize| DecodeError::Truncated {
        op,
        offset,
        needed,
        available,
    };
    let check_constant = |index: usize| {
        if index < constants.len() {
            Ok(index)
        } else {
            Err(DecodeError::ConstantOutOfBounds {
                index,
                len: constants.len(),
                offset,
            })
        }
    };

    let (operands, len) = match op.layout() {
        OperandLayout::None => (Operands::None, 1),
        OperandLayout::Numeric(width) => {
            let len = 1 + width.bytes();
            let value = read_operand(code, offset + 1, width).ok_or_else(|| truncated(len))?;
            (Operands::Numeric(value), len)
        }
        OperandLayout::Constant(width) => {
            let len = 1 + width.bytes();
            let index = read_operand(code, offset + 1, width).ok_or_else(|| truncated(len))?;
            (Operands::Constant(check_constant(index)?), len)
        }
        OperandLayout::ConstantCount(width) | OperandLayout::ConstantFlags(width) => {
            let len = 2 + width.bytes();
            let index = read_operand(code, offset + 1, width).ok_or_else(|| truncated(len))?;
            let extra = read_u8(code, offset + 1 + width.bytes()).ok_or_else(|| truncated(len))?;
            let index = check_constant(index)?;
            let operands = if matches!(op.layout(), OperandLayout::ConstantCount(_)) {
                Operands::ConstantCount {
                    index,
                    count: extra,
                }
            } else {
                Operands::ConstantFlags {
                    index,
                    flags: extra,
                }
            };
            (operands, len)
        }
        OperandLayout::Closure(width) => {
            let mut len = 1 + width.bytes();
            let index = read_operand(code, offset + 1, width).ok_or_else(|| truncated(len))?;
            let Value::Function(target) = &constants[check_constant(index)?] else {
                return Err(DecodeError::NotAFunction { index, offset });
            };
            let mut captures = Vec::with_capacity(target.upvalue_count);
            for _ in 0..target.upvalue_count {
                let flags = read_u8(code, offset + len).ok_or_else(|| truncated(len + 2))?;
                let (index, width) = if flags & CAPTURE_WIDE != 0 {
                    let index =
                        read_u16(code, offset + len + 1).ok_or_else(|| truncated(len + 3))?;
                    (index as usize, 2)
                } else {
                    let index =
                        read_u8(code, offset + len + 1).ok_or_else(|| truncated(len + 2))?;
                    (index as usize, 1)
                };
                captures.push(Capture {
                    local: flags & CAPTURE_LOCAL != 0,
                    index,
                });
                len += 1 + width;
            }
            (Operands::Closure { index, captures }, len)
        }
        OperandLayout::RangeFlag => {
            let flag = read_u8(code, offset + 1).ok_or_else(|| truncated(2))?;
            (Operands::RangeFlag(flag), 2)
        }
    };

    Ok(Instruction {
        offset,
        op,
        operands,
        len,
    })
}

/// Decodes a whole instruction stream.
pub fn decode_all(code: &[u8], constants: &[Value]) -> Result<Vec<Instruction>, DecodeError> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let instruction = decode_instruction(code, constants, offset)?;
        offset += instruction.len;
        instructions.push(instruction);
    }
    Ok(instructions)
}

fn describe_constant(value: &Value, registry: Option<&Registry>) -> String {
    match registry {
        Some(registry) => registry.describe(value),
        None => value.repr(),
    }
}

/// Renders one decoded instruction as `"{offset:04} {Op} {operands}"`,
/// annotating constant operands with their value.
pub fn render_instruction(
    instruction: &Instruction,
    constants: &[Value],
    registry: Option<&Registry>,
) -> String {
    let constant = |index: usize| {
        constants
            .get(index)
            .map(|value| describe_constant(value, registry))
            .unwrap_or_else(|| "?".to_string())
    };
    let operands = match &instruction.operands {
        Operands::None => String::new(),
        Operands::Numeric(value) => value.to_string(),
        Operands::Constant(index) => format!("{index} ({})", constant(*index)),
        Operands::ConstantCount { index, count } => {
            format!("{index} ({}) argc={count}", constant(*index))
        }
        Operands::ConstantFlags { index, flags } => {
            format!("{index} ({}) flags={flags:#05b}", constant(*index))
        }
        Operands::Closure { index, captures } => {
            let captures: Vec<String> = captures
                .iter()
                .map(|capture| {
                    let kind = if capture.local { "local" } else { "upvalue" };
                    format!("{kind} {}", capture.index)
                })
                .collect();
            format!("{index} ({}) [{}]", constant(*index), captures.join(", "))
        }
        Operands::RangeFlag(flag) => {
            if flag & RANGE_INCLUSIVE != 0 {
                "inclusive".to_string()
            } else {
                "exclusive".to_string()
            }
        }
    };
    if operands.is_empty() {
        format!("{:04} {}", instruction.offset, instruction.op)
    } else {
        format!("{:04} {} {}", instruction.offset, instruction.op, operands)
    }
}

/// Human-readable listing of `function`: a header, the instructions, and
/// its catch table.
pub fn disassemble(
    function: &BytecodeFunction,
    registry: Option<&Registry>,
) -> Result<String, DecodeError> {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "== {} (params={}, locals={}, upvalues={}) ==",
        function.name(),
        function.parameters.count(),
        function.num_locals,
        function.upvalue_count
    );
    for instruction in decode_all(&function.instructions, &function.constants)? {
        let line = render_instruction(&instruction, &function.constants, registry);
        let _ = writeln!(out, "{line}");
    }
    for entry in &function.catches {
        let kind = if entry.finally { "finally" } else { "catch" };
        let _ = writeln!(
            out,
            "{kind} [{:04}, {:04}) -> {:04}",
            entry.from, entry.to, entry.jump
        );
    }
    Ok(out)
}

/// Disassembles `function` and, after it, every function in its constant
/// pool, depth first.
pub fn disassemble_all(
    function: &BytecodeFunction,
    registry: Option<&Registry>,
) -> Result<String, DecodeError> {
    let mut out = disassemble(function, registry)?;
    for constant in &function.constants {
        if let Value::Function(nested) = constant {
            out.push('\n');
            out.push_str(&disassemble_all(nested, registry)?);
        }
    }
    Ok(out)
}
