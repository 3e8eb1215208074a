//! file: cli/src/disassembler.rs
//! description: human-readable listing of a serialized bytecode program.
//!
use std::fmt::Write;

use pyzig_core::bytecode::serialize::{MAGIC, VERSION};
use pyzig_core::bytecode::{BytecodeError, BytecodeProgram, Opcode};
use pyzig_core::deserialize;

pub fn disassemble(bytes: &[u8]) -> Result<String, BytecodeError> {
    let program = deserialize(bytes)?;
    Ok(render(&program, bytes.len()))
}

fn render(program: &BytecodeProgram, size: usize) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "Magic: {}", String::from_utf8_lossy(MAGIC));
    let _ = writeln!(out, "Version: {}", VERSION);
    let _ = writeln!(out, "Size: {} bytes", size);

    let _ = writeln!(out, "\nConstants ({}):", program.constants.len());
    for (i, constant) in program.constants.iter().enumerate() {
        let _ = writeln!(out, "  #{:<3} {:<8} {}", i, constant.type_name(), constant);
    }

    let _ = writeln!(out, "\nInstructions ({}):", program.instructions.len());
    for (pc, instruction) in program.instructions.iter().enumerate() {
        match instruction.op {
            Opcode::LoadConst => {
                let shown = program
                    .constants
                    .get(instruction.operand as usize)
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "?".to_string());
                let _ = writeln!(
                    out,
                    "  {:04}  {:<12} {:<4} ; {}",
                    pc,
                    instruction.op.mnemonic(),
                    instruction.operand,
                    shown
                );
            }
            op => {
                let _ = writeln!(out, "  {:04}  {}", pc, op.mnemonic());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyzig_core::compile_eval_source;

    #[test]
    fn listing_names_constants_and_opcodes() {
        let bytes = match compile_eval_source("1 + 2", "<test>") {
            Ok(bytes) => bytes,
            Err(e) => panic!("compile failed: {}", e),
        };
        let text = disassemble(&bytes).unwrap();
        assert!(text.starts_with("Magic: PYBC\nVersion: 1\n"));
        assert!(text.contains("Constants (2):"));
        assert!(text.contains("LOAD_CONST   0    ; 1"));
        assert!(text.contains("  0002  ADD"));
        assert!(text.trim_end().ends_with("RETURN"));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(disassemble(b"not bytecode").is_err());
    }
}
