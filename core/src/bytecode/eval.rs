//! file: core/src/bytecode/eval.rs
//! description: reference stack evaluator for bytecode programs.
//!
//! Operators follow the source language: `/` always yields a float, `//`
//! and `%` round toward negative infinity, bools take part in arithmetic
//! as 0 and 1, and integer overflow is an error rather than a wrap.
//!
use log::trace;

use super::{BytecodeConstant as V, BytecodeError, BytecodeProgram, Opcode};

pub fn evaluate(program: &BytecodeProgram) -> Result<V, BytecodeError> {
    let mut stack: Vec<V> = Vec::new();
    for (pc, instruction) in program.instructions.iter().enumerate() {
        trace!("{:04} {} (stack depth {})", pc, instruction.op.mnemonic(), stack.len());
        match instruction.op {
            Opcode::LoadConst => {
                let value = program
                    .constants
                    .get(instruction.operand as usize)
                    .cloned()
                    .ok_or_else(|| BytecodeError::runtime(format!("constant index {} out of range", instruction.operand)))?;
                stack.push(value);
            }
            Opcode::Neg => {
                let value = pop(&mut stack)?;
                stack.push(negate(value)?);
            }
            Opcode::Not => {
                let value = pop(&mut stack)?;
                stack.push(V::Bool(!truthy(&value)));
            }
            Opcode::Return => return pop(&mut stack),
            op => {
                let right = pop(&mut stack)?;
                let left = pop(&mut stack)?;
                stack.push(binary(op, left, right)?);
            }
        }
    }
    Err(BytecodeError::runtime("program ended without RETURN".into()))
}

fn pop(stack: &mut Vec<V>) -> Result<V, BytecodeError> {
    stack.pop().ok_or_else(|| BytecodeError::runtime("stack underflow".into()))
}

fn truthy(value: &V) -> bool {
    match value {
        V::Int(i) => *i != 0,
        V::Float(f) => *f != 0.0,
        V::Str(s) => !s.is_empty(),
        V::Bool(b) => *b,
        V::None => false,
    }
}

fn negate(value: V) -> Result<V, BytecodeError> {
    match value {
        V::Int(i) => i.checked_neg().map(V::Int).ok_or_else(overflow),
        V::Bool(b) => Ok(V::Int(-i64::from(b))),
        V::Float(f) => Ok(V::Float(-f)),
        other => Err(type_error("unary -", &other, None)),
    }
}

/// Numeric view of an operand: bools count as ints.
enum Num {
    I(i64),
    F(f64),
}

fn num(value: &V) -> Option<Num> {
    match value {
        V::Int(i) => Some(Num::I(*i)),
        V::Bool(b) => Some(Num::I(i64::from(*b))),
        V::Float(f) => Some(Num::F(*f)),
        _ => None,
    }
}

fn as_f64(n: &Num) -> f64 {
    match n {
        Num::I(i) => *i as f64,
        Num::F(f) => *f,
    }
}

/// Largest string a repetition may produce.
pub const MAX_STRING_LEN: usize = 1 << 24;

fn binary(op: Opcode, left: V, right: V) -> Result<V, BytecodeError> {
    match (op, &left, &right) {
        (Opcode::Add, V::Str(a), V::Str(b)) => return Ok(V::Str(format!("{}{}", a, b))),
        (Opcode::Mul, V::Str(s), n) | (Opcode::Mul, n, V::Str(s)) if matches!(n, V::Int(_) | V::Bool(_)) => {
            let count = match num(n) {
                Some(Num::I(i)) => usize::try_from(i).unwrap_or(0),
                _ => 0,
            };
            let total = s.len().checked_mul(count).filter(|len| *len <= MAX_STRING_LEN);
            if total.is_none() {
                return Err(BytecodeError::runtime(format!(
                    "string repetition exceeds {} bytes",
                    MAX_STRING_LEN
                )));
            }
            return Ok(V::Str(s.repeat(count)));
        }
        (Opcode::Eq, _, _) => return Ok(V::Bool(equal(&left, &right))),
        (Opcode::NotEq, _, _) => return Ok(V::Bool(!equal(&left, &right))),
        (Opcode::Lt | Opcode::LtE | Opcode::Gt | Opcode::GtE, V::Str(a), V::Str(b)) => {
            return Ok(V::Bool(ordered(op, a.cmp(b))));
        }
        _ => {}
    }

    let (Some(a), Some(b)) = (num(&left), num(&right)) else {
        return Err(type_error(op.mnemonic(), &left, Some(&right)));
    };
    match op {
        Opcode::Lt | Opcode::LtE | Opcode::Gt | Opcode::GtE => {
            let ordering = match (&a, &b) {
                (Num::I(x), Num::I(y)) => Some(x.cmp(y)),
                _ => as_f64(&a).partial_cmp(&as_f64(&b)),
            };
            Ok(V::Bool(ordering.is_some_and(|o| ordered(op, o))))
        }
        Opcode::Div => {
            let divisor = as_f64(&b);
            if divisor == 0.0 {
                return Err(zero_division());
            }
            Ok(V::Float(as_f64(&a) / divisor))
        }
        _ => match (a, b) {
            (Num::I(x), Num::I(y)) => int_op(op, x, y),
            (a, b) => float_op(op, as_f64(&a), as_f64(&b)),
        },
    }
}

fn int_op(op: Opcode, x: i64, y: i64) -> Result<V, BytecodeError> {
    let value = match op {
        Opcode::Add => x.checked_add(y),
        Opcode::Sub => x.checked_sub(y),
        Opcode::Mul => x.checked_mul(y),
        Opcode::FloorDiv => {
            if y == 0 {
                return Err(zero_division());
            }
            x.checked_div(y).map(|q| if (x % y != 0) && ((x < 0) != (y < 0)) { q - 1 } else { q })
        }
        Opcode::Mod => {
            if y == 0 {
                return Err(zero_division());
            }
            if y == -1 {
                return Ok(V::Int(0));
            }
            x.checked_rem(y).map(|r| if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r })
        }
        Opcode::Pow => {
            if y < 0 {
                return float_op(op, x as f64, y as f64);
            }
            u32::try_from(y).ok().and_then(|e| x.checked_pow(e))
        }
        other => return Err(BytecodeError::runtime(format!("{} is not a binary operator", other.mnemonic()))),
    };
    value.map(V::Int).ok_or_else(overflow)
}

fn float_op(op: Opcode, x: f64, y: f64) -> Result<V, BytecodeError> {
    let value = match op {
        Opcode::Add => x + y,
        Opcode::Sub => x - y,
        Opcode::Mul => x * y,
        Opcode::FloorDiv => {
            if y == 0.0 {
                return Err(zero_division());
            }
            (x / y).floor()
        }
        Opcode::Mod => {
            if y == 0.0 {
                return Err(zero_division());
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) { r + y } else { r }
        }
        Opcode::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(zero_division());
            }
            x.powf(y)
        }
        other => return Err(BytecodeError::runtime(format!("{} is not a binary operator", other.mnemonic()))),
    };
    Ok(V::Float(value))
}

fn equal(left: &V, right: &V) -> bool {
    match (left, right) {
        (V::Str(a), V::Str(b)) => a == b,
        (V::None, V::None) => true,
        _ => match (num(left), num(right)) {
            (Some(Num::I(a)), Some(Num::I(b))) => a == b,
            (Some(a), Some(b)) => as_f64(&a) == as_f64(&b),
            _ => false,
        },
    }
}

fn ordered(op: Opcode, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        Opcode::Lt => ordering == Less,
        Opcode::LtE => ordering != Greater,
        Opcode::Gt => ordering == Greater,
        _ => ordering != Less,
    }
}

fn overflow() -> BytecodeError {
    BytecodeError::runtime("integer overflow".into())
}

fn zero_division() -> BytecodeError {
    BytecodeError::runtime("division by zero".into())
}

fn type_error(op: &str, left: &V, right: Option<&V>) -> BytecodeError {
    let message = match right {
        Some(r) => format!("unsupported operand types for {}: {} and {}", op, left.type_name(), r.type_name()),
        None => format!("bad operand type for {}: {}", op, left.type_name()),
    };
    BytecodeError::runtime(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinOperator;
    use crate::ast::build::*;
    use crate::bytecode::compile_expr;

    fn run(expr: crate::ast::Expr) -> Result<V, BytecodeError> {
        evaluate(&compile_expr(&expr)?)
    }

    #[test]
    fn floor_division_and_modulo_round_down() {
        assert_eq!(run(binop(int(-7), BinOperator::FloorDiv, int(2))).ok(), Some(V::Int(-4)));
        assert_eq!(run(binop(int(-7), BinOperator::Mod, int(3))).ok(), Some(V::Int(2)));
        assert_eq!(run(binop(int(7), BinOperator::Div, int(2))).ok(), Some(V::Float(3.5)));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let err = run(binop(int(1), BinOperator::Div, int(0))).unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn remainder_by_minus_one_is_zero() {
        assert_eq!(run(binop(int(i64::MIN), BinOperator::Mod, int(-1))).ok(), Some(V::Int(0)));
        assert_eq!(run(binop(int(7), BinOperator::Mod, int(-1))).ok(), Some(V::Int(0)));
    }

    #[test]
    fn oversized_string_repetition_is_an_error() {
        let err = run(binop(string("ab"), BinOperator::Mult, int(1 << 62))).unwrap_err();
        assert!(err.to_string().contains("string repetition exceeds"));
        assert_eq!(run(binop(int(3), BinOperator::Mult, string("x"))).ok(), Some(V::Str("xxx".into())));
    }

    #[test]
    fn mixed_comparisons() {
        let expr = compare(float(2.5), crate::ast::CmpOperator::Gt, int(2));
        assert_eq!(run(expr).ok(), Some(V::Bool(true)));
        let expr = compare(string("a"), crate::ast::CmpOperator::Eq, int(1));
        assert_eq!(run(expr).ok(), Some(V::Bool(false)));
    }
}
