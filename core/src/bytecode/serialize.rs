//! file: core/src/bytecode/serialize.rs
//! description: the binary envelope of a bytecode program.
//!
//! Format (little-endian):
//! - 4 bytes: magic `b"PYBC"`
//! - 4 bytes: u32 version (1)
//! - 4 bytes: u32 constant count
//! - each constant: 1 byte tag + u32 payload length + payload
//! - 4 bytes: u32 instruction count
//! - each instruction: 1 byte opcode + u32 operand
//!
use std::io::{Cursor, Read};

use super::{BytecodeConstant, BytecodeError, BytecodeProgram, Instruction, Opcode};

pub const MAGIC: &[u8; 4] = b"PYBC";
pub const VERSION: u32 = 1;

pub fn serialize(program: &BytecodeProgram) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(MAGIC);
    write_u32(&mut out, VERSION);

    write_u32(&mut out, program.constants.len() as u32);
    for constant in &program.constants {
        out.push(constant.tag());
        match constant {
            BytecodeConstant::Int(i) => write_payload(&mut out, &i.to_le_bytes()),
            BytecodeConstant::Float(f) => write_payload(&mut out, &f.to_le_bytes()),
            BytecodeConstant::Str(s) => write_payload(&mut out, s.as_bytes()),
            BytecodeConstant::Bool(b) => write_payload(&mut out, &[u8::from(*b)]),
            BytecodeConstant::None => write_payload(&mut out, &[]),
        }
    }

    write_u32(&mut out, program.instructions.len() as u32);
    for instruction in &program.instructions {
        out.push(instruction.op as u8);
        write_u32(&mut out, instruction.operand);
    }
    out
}

pub fn deserialize(bytes: &[u8]) -> Result<BytecodeProgram, BytecodeError> {
    let mut cur = Cursor::new(bytes);

    let mut magic = [0u8; 4];
    cur.read_exact(&mut magic)
        .map_err(|e| BytecodeError::malformed(format!("missing header: {}", e)))?;
    if &magic != MAGIC {
        return Err(BytecodeError::malformed("invalid magic".into()));
    }
    let version = read_u32(&mut cur)?;
    if version != VERSION {
        return Err(BytecodeError::malformed(format!("unsupported version {}", version)));
    }

    let mut program = BytecodeProgram::default();
    let constant_count = read_u32(&mut cur)? as usize;
    for _ in 0..constant_count {
        let tag = read_u8(&mut cur)?;
        let len = read_u32(&mut cur)? as usize;
        let payload = read_bytes(&mut cur, len)?;
        program.constants.push(decode_constant(tag, &payload)?);
    }

    let instruction_count = read_u32(&mut cur)? as usize;
    for _ in 0..instruction_count {
        let byte = read_u8(&mut cur)?;
        let op = Opcode::from_byte(byte).ok_or_else(|| BytecodeError::malformed(format!("unknown opcode 0x{:02x}", byte)))?;
        let operand = read_u32(&mut cur)?;
        if op == Opcode::LoadConst && operand as usize >= program.constants.len() {
            return Err(BytecodeError::malformed(format!("constant index {} out of range", operand)));
        }
        program.instructions.push(Instruction::with_operand(op, operand));
    }

    if (cur.position() as usize) < bytes.len() {
        return Err(BytecodeError::malformed("trailing bytes after program".into()));
    }
    Ok(program)
}

fn decode_constant(tag: u8, payload: &[u8]) -> Result<BytecodeConstant, BytecodeError> {
    let fixed = |n: usize| -> Result<[u8; 8], BytecodeError> {
        <[u8; 8]>::try_from(payload)
            .map_err(|_| BytecodeError::malformed(format!("constant payload of {} bytes, expected {}", payload.len(), n)))
    };
    match tag {
        1 => Ok(BytecodeConstant::Int(i64::from_le_bytes(fixed(8)?))),
        2 => Ok(BytecodeConstant::Float(f64::from_le_bytes(fixed(8)?))),
        3 => String::from_utf8(payload.to_vec())
            .map(BytecodeConstant::Str)
            .map_err(|e| BytecodeError::malformed(format!("invalid UTF-8 in string constant: {}", e))),
        4 => match payload {
            [b] => Ok(BytecodeConstant::Bool(*b != 0)),
            _ => Err(BytecodeError::malformed("bool constant must be one byte".into())),
        },
        5 => Ok(BytecodeConstant::None),
        other => Err(BytecodeError::malformed(format!("unknown constant tag {}", other))),
    }
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_payload(out: &mut Vec<u8>, payload: &[u8]) {
    write_u32(out, payload.len() as u32);
    out.extend_from_slice(payload);
}

fn read_u8(cur: &mut Cursor<&[u8]>) -> Result<u8, BytecodeError> {
    let mut b = [0u8; 1];
    cur.read_exact(&mut b)
        .map_err(|e| BytecodeError::malformed(format!("unexpected end of program: {}", e)))?;
    Ok(b[0])
}

fn read_u32(cur: &mut Cursor<&[u8]>) -> Result<u32, BytecodeError> {
    let mut b = [0u8; 4];
    cur.read_exact(&mut b)
        .map_err(|e| BytecodeError::malformed(format!("unexpected end of program: {}", e)))?;
    Ok(u32::from_le_bytes(b))
}

fn read_bytes(cur: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>, BytecodeError> {
    let remaining = cur.get_ref().len().saturating_sub(cur.position() as usize);
    if len > remaining {
        return Err(BytecodeError::malformed(format!("payload of {} bytes exceeds the program", len)));
    }
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf)
        .map_err(|e| BytecodeError::malformed(format!("unexpected end of program: {}", e)))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_layout() {
        let mut program = BytecodeProgram::default();
        let index = program.add_constant(BytecodeConstant::Bool(true));
        program.emit(Instruction::with_operand(Opcode::LoadConst, index));
        program.emit(Instruction::new(Opcode::Return));
        let bytes = serialize(&program);
        assert_eq!(&bytes[0..4], b"PYBC");
        assert_eq!(&bytes[4..8], &[1, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[1, 0, 0, 0]);
        // tag, length, payload
        assert_eq!(&bytes[12..18], &[4, 1, 0, 0, 0, 1]);
        assert_eq!(&bytes[18..22], &[2, 0, 0, 0]);
        assert_eq!(&bytes[22..27], &[0x01, 0, 0, 0, 0]);
        assert_eq!(&bytes[27..32], &[0xFF, 0, 0, 0, 0]);
        assert_eq!(bytes.len(), 32);
    }

    #[test]
    fn truncated_programs_fail() {
        let mut program = BytecodeProgram::default();
        program.add_constant(BytecodeConstant::Str("abc".into()));
        let bytes = serialize(&program);
        let err = deserialize(&bytes[..bytes.len() - 2]).unwrap_err();
        assert_eq!(err.kind(), crate::bytecode::BytecodeErrorKind::Malformed);
        assert!(deserialize(b"NOPE").is_err());
    }
}
