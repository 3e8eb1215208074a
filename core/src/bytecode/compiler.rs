//! file: core/src/bytecode/compiler.rs
//! description: depth-first compiler from expression trees to bytecode.
//!
use log::trace;

use super::{BytecodeConstant, BytecodeError, BytecodeProgram, Instruction, Opcode};
use crate::ast::{BinOperator, CmpOperator, Constant, Expr, ExprKind, UnaryOperator};

/// Compile one expression into a program ending in `Return`.
pub fn compile_expr(expr: &Expr) -> Result<BytecodeProgram, BytecodeError> {
    let mut program = BytecodeProgram::default();
    compile_node(expr, &mut program)?;
    program.emit(Instruction::new(Opcode::Return));
    trace!(
        "compiled eval program: {} instructions, {} constants",
        program.instructions.len(),
        program.constants.len()
    );
    Ok(program)
}

fn compile_node(expr: &Expr, program: &mut BytecodeProgram) -> Result<(), BytecodeError> {
    match &expr.kind {
        ExprKind::Constant { value } => {
            let constant = match value {
                Constant::Int(i) => BytecodeConstant::Int(*i),
                Constant::Float(f) => BytecodeConstant::Float(*f),
                Constant::Str(s) => BytecodeConstant::Str(s.clone()),
                Constant::Bool(b) => BytecodeConstant::Bool(*b),
                Constant::None => BytecodeConstant::None,
            };
            let index = program.add_constant(constant);
            program.emit(Instruction::with_operand(Opcode::LoadConst, index));
            Ok(())
        }
        ExprKind::BinOp { left, op, right } => {
            let opcode = binary_opcode(*op).ok_or_else(|| {
                BytecodeError::unsupported(
                    format!("operator {} is not supported in eval", op.symbol()),
                    expr.location.clone(),
                )
            })?;
            compile_node(left, program)?;
            compile_node(right, program)?;
            program.emit(Instruction::new(opcode));
            Ok(())
        }
        ExprKind::UnaryOp { op, operand } => {
            compile_node(operand, program)?;
            match op {
                UnaryOperator::USub => program.emit(Instruction::new(Opcode::Neg)),
                UnaryOperator::Not => program.emit(Instruction::new(Opcode::Not)),
                UnaryOperator::UAdd => {}
                UnaryOperator::Invert => {
                    return Err(BytecodeError::unsupported(
                        "operator ~ is not supported in eval".into(),
                        expr.location.clone(),
                    ));
                }
            }
            Ok(())
        }
        ExprKind::Compare { left, ops, comparators } => {
            if ops.len() != 1 || comparators.len() != 1 {
                return Err(BytecodeError::unsupported(
                    "chained comparisons are not supported in eval".into(),
                    expr.location.clone(),
                ));
            }
            let opcode = compare_opcode(ops[0]).ok_or_else(|| {
                BytecodeError::unsupported(
                    format!("comparison {} is not supported in eval", ops[0].symbol()),
                    expr.location.clone(),
                )
            })?;
            compile_node(left, program)?;
            compile_node(&comparators[0], program)?;
            program.emit(Instruction::new(opcode));
            Ok(())
        }
        _ => Err(BytecodeError::unsupported(
            format!("{} expressions are not supported in eval", expr.kind_name()),
            expr.location.clone(),
        )),
    }
}

fn binary_opcode(op: BinOperator) -> Option<Opcode> {
    let opcode = match op {
        BinOperator::Add => Opcode::Add,
        BinOperator::Sub => Opcode::Sub,
        BinOperator::Mult => Opcode::Mul,
        BinOperator::Div => Opcode::Div,
        BinOperator::FloorDiv => Opcode::FloorDiv,
        BinOperator::Mod => Opcode::Mod,
        BinOperator::Pow => Opcode::Pow,
        _ => return None,
    };
    Some(opcode)
}

fn compare_opcode(op: CmpOperator) -> Option<Opcode> {
    let opcode = match op {
        CmpOperator::Eq => Opcode::Eq,
        CmpOperator::NotEq => Opcode::NotEq,
        CmpOperator::Lt => Opcode::Lt,
        CmpOperator::LtE => Opcode::LtE,
        CmpOperator::Gt => Opcode::Gt,
        CmpOperator::GtE => Opcode::GtE,
        _ => return None,
    };
    Some(opcode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;

    #[test]
    fn constants_are_not_deduplicated() {
        let program = compile_expr(&binop(int(2), BinOperator::Mult, int(2))).expect("compiles");
        assert_eq!(program.constants, vec![BytecodeConstant::Int(2), BytecodeConstant::Int(2)]);
        let ops: Vec<Opcode> = program.instructions.iter().map(|i| i.op).collect();
        assert_eq!(ops, vec![Opcode::LoadConst, Opcode::LoadConst, Opcode::Mul, Opcode::Return]);
        assert_eq!(program.instructions[1].operand, 1);
    }

    #[test]
    fn names_are_rejected() {
        let err = compile_expr(&binop(name("x"), BinOperator::Add, int(1))).unwrap_err();
        assert_eq!(err.kind(), crate::bytecode::BytecodeErrorKind::Unsupported);
        assert!(err.to_string().contains("Name"));
    }
}
