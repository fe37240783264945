//! Bytecode chunks: instruction bytes, constant pool, and line table.
//!
//! Encoding rules shared with the compiler and the interpreter loop:
//! - every opcode is one byte
//! - slot, constant-index, and argument-count operands are one byte
//! - jump and loop distances are two bytes, big-endian

use super::value::Value;

/// Constant-pool capacity; constant operands are encoded in a single byte.
pub const MAX_CONSTANTS: usize = 256;

/// One instruction's tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Constant = 0,
    Nil,
    True,
    False,
    Pop,
    GetLocal,
    SetLocal,
    GetGlobal,
    DefineGlobal,
    SetGlobal,
    Equal,
    Greater,
    Less,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Not,
    Negate,
    Jump,
    JumpIfFalse,
    Loop,
    Call,
    Return,
    Info,
    Import,
}

impl OpCode {
    /// Name used by the disassembler and trace output.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Constant => "CONSTANT",
            OpCode::Nil => "NIL",
            OpCode::True => "TRUE",
            OpCode::False => "FALSE",
            OpCode::Pop => "POP",
            OpCode::GetLocal => "GET_LOCAL",
            OpCode::SetLocal => "SET_LOCAL",
            OpCode::GetGlobal => "GET_GLOBAL",
            OpCode::DefineGlobal => "DEFINE_GLOBAL",
            OpCode::SetGlobal => "SET_GLOBAL",
            OpCode::Equal => "EQUAL",
            OpCode::Greater => "GREATER",
            OpCode::Less => "LESS",
            OpCode::Add => "ADD",
            OpCode::Subtract => "SUBTRACT",
            OpCode::Multiply => "MULTIPLY",
            OpCode::Divide => "DIVIDE",
            OpCode::Modulo => "MODULO",
            OpCode::Power => "POWER",
            OpCode::Not => "NOT",
            OpCode::Negate => "NEGATE",
            OpCode::Jump => "JUMP",
            OpCode::JumpIfFalse => "JUMP_IF_FALSE",
            OpCode::Loop => "LOOP",
            OpCode::Call => "CALL",
            OpCode::Return => "RETURN",
            OpCode::Info => "INFO",
            OpCode::Import => "IMPORT",
        }
    }
}

impl OpCode {
    /// Number of operand bytes following the opcode.
    pub fn operand_width(self) -> usize {
        match self {
            OpCode::Constant
            | OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetGlobal
            | OpCode::DefineGlobal
            | OpCode::SetGlobal
            | OpCode::Call => 1,
            OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => 2,
            _ => 0,
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if byte <= OpCode::Import as u8 {
            // Safety not needed: exhaustive match keeps this table honest.
            Ok(match byte {
                0 => OpCode::Constant,
                1 => OpCode::Nil,
                2 => OpCode::True,
                3 => OpCode::False,
                4 => OpCode::Pop,
                5 => OpCode::GetLocal,
                6 => OpCode::SetLocal,
                7 => OpCode::GetGlobal,
                8 => OpCode::DefineGlobal,
                9 => OpCode::SetGlobal,
                10 => OpCode::Equal,
                11 => OpCode::Greater,
                12 => OpCode::Less,
                13 => OpCode::Add,
                14 => OpCode::Subtract,
                15 => OpCode::Multiply,
                16 => OpCode::Divide,
                17 => OpCode::Modulo,
                18 => OpCode::Power,
                19 => OpCode::Not,
                20 => OpCode::Negate,
                21 => OpCode::Jump,
                22 => OpCode::JumpIfFalse,
                23 => OpCode::Loop,
                24 => OpCode::Call,
                25 => OpCode::Return,
                26 => OpCode::Info,
                27 => OpCode::Import,
                _ => unreachable!(),
            })
        } else {
            Err(byte)
        }
    }
}

/// A compiled function's bytecode buffer, constant pool, and line table.
///
/// `lines[i]` is the source line that produced `code[i]`. The chunk is owned
/// by the compiler context that fills it, then moves into the finished
/// function object.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub constants: Vec<Value>,
    pub lines: Vec<u32>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one instruction byte stamped with its source line.
    pub fn write(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    /// Append a constant and return its pool index, or `None` when the pool
    /// is full (the caller reports a compile error).
    pub fn add_constant(&mut self, value: Value) -> Option<u8> {
        if self.constants.len() >= MAX_CONSTANTS {
            return None;
        }
        self.constants.push(value);
        Some((self.constants.len() - 1) as u8)
    }

    /// Source line for the instruction at `offset`.
    pub fn line_at(&self, offset: usize) -> u32 {
        self.lines.get(offset).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_keeps_lines_parallel() {
        let mut chunk = Chunk::new();
        chunk.write(OpCode::Nil as u8, 1);
        chunk.write(OpCode::Pop as u8, 2);
        chunk.write(OpCode::Return as u8, 2);

        assert_eq!(chunk.code.len(), chunk.lines.len());
        assert_eq!(chunk.line_at(0), 1);
        assert_eq!(chunk.line_at(1), 2);
        assert_eq!(chunk.line_at(2), 2);
    }

    #[test]
    fn test_add_constant_returns_indices() {
        let mut chunk = Chunk::new();
        assert_eq!(chunk.add_constant(Value::Number(1.0)), Some(0));
        assert_eq!(chunk.add_constant(Value::Number(2.0)), Some(1));
    }

    #[test]
    fn test_constant_pool_overflow() {
        let mut chunk = Chunk::new();
        for i in 0..MAX_CONSTANTS {
            assert_eq!(chunk.add_constant(Value::Number(i as f64)), Some(i as u8));
        }
        assert_eq!(chunk.add_constant(Value::Nil), None);
        assert_eq!(chunk.constants.len(), MAX_CONSTANTS);
    }

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 0..=OpCode::Import as u8 {
            let op = OpCode::try_from(byte).unwrap();
            assert_eq!(op as u8, byte);
        }
        assert!(OpCode::try_from(OpCode::Import as u8 + 1).is_err());
        assert!(OpCode::try_from(0xff).is_err());
    }
}
