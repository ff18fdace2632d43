use std::fmt;

/// Instruction opcodes.
///
/// Index-like families (locals, upvalues, constants, jump targets) come in
/// three consecutive variants whose operand is 1, 2 or 4 bytes wide. The
/// compiler picks the narrowest variant that addresses the operand; see
/// [`OpCode::with_width`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Const8 = 0,
    Const16 = 1,
    Const32 = 2,
    Nil = 3,
    True = 4,
    False = 5,
    Pop = 6,
    Dup = 7,
    GetLocal8 = 8,
    GetLocal16 = 9,
    GetLocal32 = 10,
    SetLocal8 = 11,
    SetLocal16 = 12,
    SetLocal32 = 13,
    GetUpvalue8 = 14,
    GetUpvalue16 = 15,
    GetUpvalue32 = 16,
    SetUpvalue8 = 17,
    SetUpvalue16 = 18,
    SetUpvalue32 = 19,
    CloseUpvalues8 = 20,
    CloseUpvalues16 = 21,
    CloseUpvalues32 = 22,
    GetGlobal8 = 23,
    GetGlobal16 = 24,
    GetGlobal32 = 25,
    SetGlobal8 = 26,
    SetGlobal16 = 27,
    SetGlobal32 = 28,
    GetField8 = 29,
    GetField16 = 30,
    GetField32 = 31,
    SetField8 = 32,
    SetField16 = 33,
    SetField32 = 34,
    GetSelf = 35,
    Add = 36,
    Sub = 37,
    Mul = 38,
    Div = 39,
    Mod = 40,
    Negate = 41,
    Not = 42,
    Equal = 43,
    NotEqual = 44,
    Less = 45,
    LessEqual = 46,
    Greater = 47,
    GreaterEqual = 48,
    Jump8 = 49,
    Jump16 = 50,
    Jump32 = 51,
    JumpIfFalse8 = 52,
    JumpIfFalse16 = 53,
    JumpIfFalse32 = 54,
    JumpIfTrue8 = 55,
    JumpIfTrue16 = 56,
    JumpIfTrue32 = 57,
    IterNext8 = 58,
    IterNext16 = 59,
    IterNext32 = 60,
    Call = 61,
    TailCall = 62,
    Invoke8 = 63,
    Invoke16 = 64,
    Invoke32 = 65,
    Instantiate8 = 66,
    Instantiate16 = 67,
    Instantiate32 = 68,
    Return = 69,
    ReturnNil = 70,
    Closure8 = 71,
    Closure16 = 72,
    Closure32 = 73,
    Array = 74,
    Range = 75,
    Regex8 = 76,
    Regex16 = 77,
    Regex32 = 78,
    DefClass8 = 79,
    DefClass16 = 80,
    DefClass32 = 81,
    DefMethod8 = 82,
    DefMethod16 = 83,
    DefMethod32 = 84,
    Throw = 85,
    Yield = 86,
    EnterFinally = 87,
    EndFinally = 88,
}

/// Every opcode, indexed by its byte value.
pub const ALL_OPCODES: [OpCode; 89] = [
    OpCode::Const8,
    OpCode::Const16,
    OpCode::Const32,
    OpCode::Nil,
    OpCode::True,
    OpCode::False,
    OpCode::Pop,
    OpCode::Dup,
    OpCode::GetLocal8,
    OpCode::GetLocal16,
    OpCode::GetLocal32,
    OpCode::SetLocal8,
    OpCode::SetLocal16,
    OpCode::SetLocal32,
    OpCode::GetUpvalue8,
    OpCode::GetUpvalue16,
    OpCode::GetUpvalue32,
    OpCode::SetUpvalue8,
    OpCode::SetUpvalue16,
    OpCode::SetUpvalue32,
    OpCode::CloseUpvalues8,
    OpCode::CloseUpvalues16,
    OpCode::CloseUpvalues32,
    OpCode::GetGlobal8,
    OpCode::GetGlobal16,
    OpCode::GetGlobal32,
    OpCode::SetGlobal8,
    OpCode::SetGlobal16,
    OpCode::SetGlobal32,
    OpCode::GetField8,
    OpCode::GetField16,
    OpCode::GetField32,
    OpCode::SetField8,
    OpCode::SetField16,
    OpCode::SetField32,
    OpCode::GetSelf,
    OpCode::Add,
    OpCode::Sub,
    OpCode::Mul,
    OpCode::Div,
    OpCode::Mod,
    OpCode::Negate,
    OpCode::Not,
    OpCode::Equal,
    OpCode::NotEqual,
    OpCode::Less,
    OpCode::LessEqual,
    OpCode::Greater,
    OpCode::GreaterEqual,
    OpCode::Jump8,
    OpCode::Jump16,
    OpCode::Jump32,
    OpCode::JumpIfFalse8,
    OpCode::JumpIfFalse16,
    OpCode::JumpIfFalse32,
    OpCode::JumpIfTrue8,
    OpCode::JumpIfTrue16,
    OpCode::JumpIfTrue32,
    OpCode::IterNext8,
    OpCode::IterNext16,
    OpCode::IterNext32,
    OpCode::Call,
    OpCode::TailCall,
    OpCode::Invoke8,
    OpCode::Invoke16,
    OpCode::Invoke32,
    OpCode::Instantiate8,
    OpCode::Instantiate16,
    OpCode::Instantiate32,
    OpCode::Return,
    OpCode::ReturnNil,
    OpCode::Closure8,
    OpCode::Closure16,
    OpCode::Closure32,
    OpCode::Array,
    OpCode::Range,
    OpCode::Regex8,
    OpCode::Regex16,
    OpCode::Regex32,
    OpCode::DefClass8,
    OpCode::DefClass16,
    OpCode::DefClass32,
    OpCode::DefMethod8,
    OpCode::DefMethod16,
    OpCode::DefMethod32,
    OpCode::Throw,
    OpCode::Yield,
    OpCode::EnterFinally,
    OpCode::EndFinally,
];

/// Capture descriptor flag: the slot/upvalue index is 16 bits wide.
pub const CAPTURE_WIDE: u8 = 0b01;
/// Capture descriptor flag: capture a local of the enclosing frame rather
/// than forwarding one of its upvalues.
pub const CAPTURE_LOCAL: u8 = 0b10;

/// Range flag: the end bound is included.
pub const RANGE_INCLUSIVE: u8 = 0b1;

pub const REGEX_CASE_INSENSITIVE: u8 = 0b001;
pub const REGEX_MULTI_LINE: u8 = 0b010;
pub const REGEX_DOT_ALL: u8 = 0b100;

/// Class definition flag: the superclass sits on the stack below the name.
pub const CLASS_HAS_SUPERCLASS: u8 = 0b1;

/// Operand width of an index-like operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    One,
    Two,
    Four,
}

impl Width {
    pub fn bytes(self) -> usize {
        match self {
            Width::One => 1,
            Width::Two => 2,
            Width::Four => 4,
        }
    }

    pub fn max_value(self) -> usize {
        match self {
            Width::One => u8::MAX as usize,
            Width::Two => u16::MAX as usize,
            Width::Four => u32::MAX as usize,
        }
    }

    /// Narrowest width able to encode `value`.
    pub fn for_value(value: usize) -> Option<Width> {
        if value <= u8::MAX as usize {
            Some(Width::One)
        } else if value <= u16::MAX as usize {
            Some(Width::Two)
        } else if value <= u32::MAX as usize {
            Some(Width::Four)
        } else {
            None
        }
    }

    fn family_offset(self) -> u8 {
        match self {
            Width::One => 0,
            Width::Two => 1,
            Width::Four => 2,
        }
    }
}

/// How the bytes following an opcode are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandLayout {
    /// One-byte instruction.
    None,
    /// Slot, upvalue index, count, argument count or jump target.
    Numeric(Width),
    /// Index into the function's constant pool.
    Constant(Width),
    /// Constant index followed by a one-byte argument count.
    ConstantCount(Width),
    /// Constant index followed by a one-byte flag set.
    ConstantFlags(Width),
    /// Constant index of the target function, then one capture descriptor
    /// per declared upvalue of that function.
    Closure(Width),
    /// One-byte range flag.
    RangeFlag,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Option<OpCode> {
        ALL_OPCODES.get(byte as usize).copied()
    }

    pub fn layout(self) -> OperandLayout {
        use OpCode::*;
        match self {
            Const8 | GetGlobal8 | SetGlobal8 | GetField8 | SetField8 | DefMethod8 => {
                OperandLayout::Constant(Width::One)
            }
            Const16 | GetGlobal16 | SetGlobal16 | GetField16 | SetField16 | DefMethod16 => {
                OperandLayout::Constant(Width::Two)
            }
            Const32 | GetGlobal32 | SetGlobal32 | GetField32 | SetField32 | DefMethod32 => {
                OperandLayout::Constant(Width::Four)
            }
            GetLocal8 | SetLocal8 | GetUpvalue8 | SetUpvalue8 | CloseUpvalues8 | Jump8
            | JumpIfFalse8 | JumpIfTrue8 | IterNext8 | Call | TailCall => {
                OperandLayout::Numeric(Width::One)
            }
            GetLocal16 | SetLocal16 | GetUpvalue16 | SetUpvalue16 | CloseUpvalues16 | Jump16
            | JumpIfFalse16 | JumpIfTrue16 | IterNext16 | Array => {
                OperandLayout::Numeric(Width::Two)
            }
            GetLocal32 | SetLocal32 | GetUpvalue32 | SetUpvalue32 | CloseUpvalues32 | Jump32
            | JumpIfFalse32 | JumpIfTrue32 | IterNext32 => OperandLayout::Numeric(Width::Four),
            Invoke8 | Instantiate8 => OperandLayout::ConstantCount(Width::One),
            Invoke16 | Instantiate16 => OperandLayout::ConstantCount(Width::Two),
            Invoke32 | Instantiate32 => OperandLayout::ConstantCount(Width::Four),
            Regex8 | DefClass8 => OperandLayout::ConstantFlags(Width::One),
            Regex16 | DefClass16 => OperandLayout::ConstantFlags(Width::Two),
            Regex32 | DefClass32 => OperandLayout::ConstantFlags(Width::Four),
            Closure8 => OperandLayout::Closure(Width::One),
            Closure16 => OperandLayout::Closure(Width::Two),
            Closure32 => OperandLayout::Closure(Width::Four),
            Range => OperandLayout::RangeFlag,
            Nil | True | False | Pop | Dup | GetSelf | Add | Sub | Mul | Div | Mod | Negate
            | Not | Equal | NotEqual | Less | LessEqual | Greater | GreaterEqual | Return
            | ReturnNil | Throw | Yield | EnterFinally | EndFinally => OperandLayout::None,
        }
    }

    /// Whether this opcode is the 8-bit member of a width family.
    pub fn is_family_base(self) -> bool {
        use OpCode::*;
        matches!(
            self,
            Const8
                | GetLocal8
                | SetLocal8
                | GetUpvalue8
                | SetUpvalue8
                | CloseUpvalues8
                | GetGlobal8
                | SetGlobal8
                | GetField8
                | SetField8
                | Jump8
                | JumpIfFalse8
                | JumpIfTrue8
                | IterNext8
                | Invoke8
                | Instantiate8
                | Closure8
                | Regex8
                | DefClass8
                | DefMethod8
        )
    }

    /// Selects the member of this family with the given operand width.
    ///
    /// `self` must be the 8-bit member of the family; other opcodes are
    /// returned unchanged.
    pub fn with_width(self, width: Width) -> OpCode {
        if !self.is_family_base() {
            return self;
        }
        ALL_OPCODES[(self as u8 + width.family_offset()) as usize]
    }

    pub fn is_jump(self) -> bool {
        use OpCode::*;
        matches!(
            self,
            Jump8
                | Jump16
                | Jump32
                | JumpIfFalse8
                | JumpIfFalse16
                | JumpIfFalse32
                | JumpIfTrue8
                | JumpIfTrue16
                | JumpIfTrue32
                | IterNext8
                | IterNext16
                | IterNext32
        )
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Instructions = Vec<u8>;

/// Encodes an instruction whose layout has no capture list.
///
/// Operands are written big-endian in layout order; missing operands encode
/// as zero. Closure capture descriptors are appended by the caller.
pub fn make(op: OpCode, operands: &[usize]) -> Instructions {
    let mut instruction = vec![op as u8];
    let operand = |i: usize| operands.get(i).copied().unwrap_or(0);

    match op.layout() {
        OperandLayout::None => {}
        OperandLayout::Numeric(width)
        | OperandLayout::Constant(width)
        | OperandLayout::Closure(width) => write_operand(&mut instruction, operand(0), width),
        OperandLayout::ConstantCount(width) | OperandLayout::ConstantFlags(width) => {
            write_operand(&mut instruction, operand(0), width);
            instruction.push(operand(1) as u8);
        }
        OperandLayout::RangeFlag => instruction.push(operand(0) as u8),
    }

    instruction
}

pub fn write_operand(buffer: &mut Vec<u8>, value: usize, width: Width) {
    match width {
        Width::One => buffer.push(value as u8),
        Width::Two => buffer.extend_from_slice(&(value as u16).to_be_bytes()),
        Width::Four => buffer.extend_from_slice(&(value as u32).to_be_bytes()),
    }
}

pub fn read_u8(instructions: &[u8], offset: usize) -> Option<u8> {
    instructions.get(offset).copied()
}

pub fn read_u16(instructions: &[u8], offset: usize) -> Option<u16> {
    let bytes = instructions.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub fn read_u32(instructions: &[u8], offset: usize) -> Option<u32> {
    let bytes = instructions.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Reads a `width`-byte big-endian operand, or `None` if the stream ends.
pub fn read_operand(instructions: &[u8], offset: usize, width: Width) -> Option<usize> {
    match width {
        Width::One => read_u8(instructions, offset).map(usize::from),
        Width::Two => read_u16(instructions, offset).map(usize::from),
        Width::Four => read_u32(instructions, offset).map(|v| v as usize),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_table_matches_discriminants() {
        for (i, op) in ALL_OPCODES.iter().enumerate() {
            assert_eq!(*op as u8 as usize, i, "{op} is out of place");
        }
        assert_eq!(OpCode::from_byte(ALL_OPCODES.len() as u8), None);
    }

    #[test]
    fn families_select_by_width() {
        assert_eq!(OpCode::Const8.with_width(Width::Two), OpCode::Const16);
        assert_eq!(OpCode::Jump8.with_width(Width::Four), OpCode::Jump32);
        assert_eq!(OpCode::Closure8.with_width(Width::One), OpCode::Closure8);
        assert_eq!(OpCode::Add.with_width(Width::Four), OpCode::Add);
    }

    #[test]
    fn family_members_share_layout_kind() {
        for op in ALL_OPCODES.iter().copied().filter(|op| op.is_family_base()) {
            let kinds: Vec<_> = [Width::One, Width::Two, Width::Four]
                .into_iter()
                .map(|w| std::mem::discriminant(&op.with_width(w).layout()))
                .collect();
            assert!(kinds.windows(2).all(|w| w[0] == w[1]), "{op} family mixes layouts");
        }
    }

    #[test]
    fn width_for_value_picks_narrowest() {
        assert_eq!(Width::for_value(255), Some(Width::One));
        assert_eq!(Width::for_value(256), Some(Width::Two));
        assert_eq!(Width::for_value(70_000), Some(Width::Four));
    }
}
