//! file: core/src/bytecode/mod.rs
//! description: the restricted bytecode sub-compiler behind eval/exec/compile.
//!
//! A program is a flat instruction stream over an append-only constant
//! pool. Only constant loads, the arithmetic and comparison operators, and
//! a final return exist; the compiler rejects everything else so a partial
//! program is never produced.
//!
pub mod compiler;
pub mod err;
pub mod eval;
pub mod serialize;

use std::fmt;

pub use compiler::compile_expr;
pub use err::{BytecodeError, BytecodeErrorKind};
pub use eval::evaluate;
pub use serialize::{deserialize, serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    LoadConst = 0x01,
    Add = 0x10,
    Sub = 0x11,
    Mul = 0x12,
    Div = 0x13,
    FloorDiv = 0x14,
    Mod = 0x15,
    Pow = 0x16,
    Neg = 0x17,
    Not = 0x18,
    Eq = 0x20,
    NotEq = 0x21,
    Lt = 0x22,
    LtE = 0x23,
    Gt = 0x24,
    GtE = 0x25,
    Return = 0xFF,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        let op = match byte {
            0x01 => Opcode::LoadConst,
            0x10 => Opcode::Add,
            0x11 => Opcode::Sub,
            0x12 => Opcode::Mul,
            0x13 => Opcode::Div,
            0x14 => Opcode::FloorDiv,
            0x15 => Opcode::Mod,
            0x16 => Opcode::Pow,
            0x17 => Opcode::Neg,
            0x18 => Opcode::Not,
            0x20 => Opcode::Eq,
            0x21 => Opcode::NotEq,
            0x22 => Opcode::Lt,
            0x23 => Opcode::LtE,
            0x24 => Opcode::Gt,
            0x25 => Opcode::GtE,
            0xFF => Opcode::Return,
            _ => return None,
        };
        Some(op)
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::LoadConst => "LOAD_CONST",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::FloorDiv => "FLOOR_DIV",
            Opcode::Mod => "MOD",
            Opcode::Pow => "POW",
            Opcode::Neg => "NEG",
            Opcode::Not => "NOT",
            Opcode::Eq => "EQ",
            Opcode::NotEq => "NOT_EQ",
            Opcode::Lt => "LT",
            Opcode::LtE => "LT_E",
            Opcode::Gt => "GT",
            Opcode::GtE => "GT_E",
            Opcode::Return => "RETURN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: Opcode,
    /// Constant index for `LoadConst`, zero otherwise.
    pub operand: u32,
}

impl Instruction {
    pub fn new(op: Opcode) -> Self {
        Instruction { op, operand: 0 }
    }

    pub fn with_operand(op: Opcode, operand: u32) -> Self {
        Instruction { op, operand }
    }
}

/// A constant pool entry, and the value type of the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum BytecodeConstant {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
}

impl BytecodeConstant {
    pub fn tag(&self) -> u8 {
        match self {
            BytecodeConstant::Int(_) => 1,
            BytecodeConstant::Float(_) => 2,
            BytecodeConstant::Str(_) => 3,
            BytecodeConstant::Bool(_) => 4,
            BytecodeConstant::None => 5,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            BytecodeConstant::Int(_) => "int",
            BytecodeConstant::Float(_) => "float",
            BytecodeConstant::Str(_) => "str",
            BytecodeConstant::Bool(_) => "bool",
            BytecodeConstant::None => "NoneType",
        }
    }
}

impl fmt::Display for BytecodeConstant {
    /// Renders like the source language's `repr`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BytecodeConstant::Int(i) => write!(f, "{}", i),
            BytecodeConstant::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{:.1}", v),
            BytecodeConstant::Float(v) => write!(f, "{}", v),
            BytecodeConstant::Str(s) => write!(f, "'{}'", s),
            BytecodeConstant::Bool(true) => write!(f, "True"),
            BytecodeConstant::Bool(false) => write!(f, "False"),
            BytecodeConstant::None => write!(f, "None"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BytecodeProgram {
    pub instructions: Vec<Instruction>,
    pub constants: Vec<BytecodeConstant>,
}

impl BytecodeProgram {
    /// Append a constant and return its index. The pool is not
    /// deduplicated.
    pub fn add_constant(&mut self, value: BytecodeConstant) -> u32 {
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    pub fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }
}
