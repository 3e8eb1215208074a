//! file: core/src/ast/rules.rs
//! description: pest parser for eval/exec/compile string arguments.
//!
//! The grammar in `eval.pest` covers literals, unary minus/plus, the
//! arithmetic operators and comparisons. Parsed strings become ordinary
//! `Expr` trees so the bytecode compiler consumes the same AST as the
//! lowering engine.
//!
use pest::Parser;
use pest::iterators::{Pair, Pairs};
use pest_derive::Parser;

use super::err::SyntaxError;
use super::kind::{BinOperator, CmpOperator, UnaryOperator};
use super::node::{Constant, Expr, ExprKind};
use crate::Level;
use crate::location::{Location, Span};
use crate::lower::strings;

#[derive(Parser)]
#[grammar = "ast/eval.pest"]
pub struct EvalParser;

/// Parse `source` as a single eval expression.
pub fn parse_eval_source(source: &str, file: &str) -> Result<Expr, SyntaxError> {
    let mut pairs = EvalParser::parse(Rule::eval_input, source).map_err(|e| {
        let (line, column) = match e.line_col {
            pest::error::LineColLocation::Pos(pos) => pos,
            pest::error::LineColLocation::Span(start, _) => start,
        };
        SyntaxError::with(
            Level::Error,
            format!("Invalid eval expression: {}", e.variant.message()),
            "pyzig.ast.rules.parse_eval_source".into(),
            Some(Location::new(file.to_string(), line, column)),
            None,
        )
    })?;
    let input = fetch_next_pair(&mut pairs, &None, &None)?;
    let (mut inner, location, span) = get_data_from_rule(&input, file);
    let expr_pair = fetch_next_pair(&mut inner, &location, &span)?;
    parse_expression_rule(expr_pair, file)
}

pub(crate) fn fetch_next_pair<'a>(
    pairs: &mut Pairs<'a, Rule>,
    location: &Option<Location>,
    span: &Option<Span>,
) -> Result<Pair<'a, Rule>, SyntaxError> {
    match pairs.next() {
        Some(pair) => Ok(pair),
        None => Err(SyntaxError::with(
            Level::Error,
            "Expected more inner pairs but found none.".into(),
            "pyzig.ast.rules.fetch_next_pair".into(),
            location.clone(),
            span.clone(),
        )),
    }
}

pub(crate) fn get_data_from_rule<'a>(
    rule: &Pair<'a, Rule>,
    file: &str,
) -> (Pairs<'a, Rule>, Option<Location>, Option<Span>) {
    let inner_rules = rule.clone().into_inner();
    let span = get_span_from_pair(rule, file);
    let location = get_location_from_pair(rule, file);
    (inner_rules, location, span)
}

pub fn get_location_from_pair(rule: &Pair<Rule>, file: &str) -> Option<Location> {
    let (line, column) = rule.as_span().start_pos().line_col();
    Some(Location::new(file.to_string(), line, column))
}

pub fn get_span_from_pair(rule: &Pair<Rule>, file: &str) -> Option<Span> {
    let span = rule.as_span();
    let (start_line, start_col) = span.start_pos().line_col();
    let (end_line, end_col) = span.end_pos().line_col();
    Some(Span::new(
        Location::new(file.to_string(), start_line, start_col),
        Location::new(file.to_string(), end_line, end_col),
    ))
}

fn unexpected(pair: &Pair<Rule>, issuer: &str, file: &str) -> SyntaxError {
    SyntaxError::with(
        Level::Error,
        format!("Unexpected rule {:?} ('{}').", pair.as_rule(), pair.as_str()),
        issuer.into(),
        get_location_from_pair(pair, file),
        get_span_from_pair(pair, file),
    )
}

fn parse_expression_rule(pair: Pair<Rule>, file: &str) -> Result<Expr, SyntaxError> {
    let (mut inner, location, span) = get_data_from_rule(&pair, file);
    let first = fetch_next_pair(&mut inner, &location, &span)?;
    let left = parse_arith_rule(first, file)?;

    let mut ops = Vec::new();
    let mut comparators = Vec::new();
    while let Some(op_pair) = inner.next() {
        let op = match op_pair.as_str() {
            "==" => CmpOperator::Eq,
            "!=" => CmpOperator::NotEq,
            "<" => CmpOperator::Lt,
            "<=" => CmpOperator::LtE,
            ">" => CmpOperator::Gt,
            ">=" => CmpOperator::GtE,
            _ => return Err(unexpected(&op_pair, "pyzig.ast.rules.parse_expression_rule", file)),
        };
        let right = fetch_next_pair(&mut inner, &location, &span)?;
        ops.push(op);
        comparators.push(parse_arith_rule(right, file)?);
    }

    if ops.is_empty() {
        return Ok(left);
    }
    Ok(Expr::new(
        ExprKind::Compare { left: Box::new(left), ops, comparators },
        location,
    ))
}

fn parse_arith_rule(pair: Pair<Rule>, file: &str) -> Result<Expr, SyntaxError> {
    let (mut inner, location, span) = get_data_from_rule(&pair, file);
    let first = fetch_next_pair(&mut inner, &location, &span)?;
    let mut node = parse_term_rule(first, file)?;

    while let Some(op_pair) = inner.next() {
        let op = match op_pair.as_str() {
            "+" => BinOperator::Add,
            "-" => BinOperator::Sub,
            _ => return Err(unexpected(&op_pair, "pyzig.ast.rules.parse_arith_rule", file)),
        };
        let right = fetch_next_pair(&mut inner, &location, &span)?;
        node = binop(node, op, parse_term_rule(right, file)?, location.clone());
    }
    Ok(node)
}

fn parse_term_rule(pair: Pair<Rule>, file: &str) -> Result<Expr, SyntaxError> {
    let (mut inner, location, span) = get_data_from_rule(&pair, file);
    let first = fetch_next_pair(&mut inner, &location, &span)?;
    let mut node = parse_factor_rule(first, file)?;

    while let Some(op_pair) = inner.next() {
        let op = match op_pair.as_str() {
            "*" => BinOperator::Mult,
            "/" => BinOperator::Div,
            "//" => BinOperator::FloorDiv,
            "%" => BinOperator::Mod,
            _ => return Err(unexpected(&op_pair, "pyzig.ast.rules.parse_term_rule", file)),
        };
        let right = fetch_next_pair(&mut inner, &location, &span)?;
        node = binop(node, op, parse_factor_rule(right, file)?, location.clone());
    }
    Ok(node)
}

fn parse_factor_rule(pair: Pair<Rule>, file: &str) -> Result<Expr, SyntaxError> {
    let (mut inner, location, span) = get_data_from_rule(&pair, file);
    let next = fetch_next_pair(&mut inner, &location, &span)?;
    match next.as_rule() {
        Rule::neg_op | Rule::pos_op => {
            let op = if next.as_rule() == Rule::neg_op {
                UnaryOperator::USub
            } else {
                UnaryOperator::UAdd
            };
            let operand = fetch_next_pair(&mut inner, &location, &span)?;
            Ok(Expr::new(
                ExprKind::UnaryOp { op, operand: Box::new(parse_factor_rule(operand, file)?) },
                location,
            ))
        }
        Rule::power => parse_power_rule(next, file),
        _ => Err(unexpected(&next, "pyzig.ast.rules.parse_factor_rule", file)),
    }
}

fn parse_power_rule(pair: Pair<Rule>, file: &str) -> Result<Expr, SyntaxError> {
    let (mut inner, location, span) = get_data_from_rule(&pair, file);
    let base_pair = fetch_next_pair(&mut inner, &location, &span)?;
    let base = parse_atom_rule(base_pair, file)?;

    match inner.next() {
        Some(_pow) => {
            let exponent = fetch_next_pair(&mut inner, &location, &span)?;
            Ok(binop(base, BinOperator::Pow, parse_factor_rule(exponent, file)?, location))
        }
        None => Ok(base),
    }
}

fn parse_atom_rule(pair: Pair<Rule>, file: &str) -> Result<Expr, SyntaxError> {
    let location = get_location_from_pair(&pair, file);
    let value = match pair.as_rule() {
        Rule::expression => return parse_expression_rule(pair, file),
        Rule::integer => {
            let text = pair.as_str();
            let parsed = text.parse::<i64>().map_err(|_| {
                SyntaxError::with(
                    Level::Error,
                    format!("Integer literal '{}' does not fit in 64 bits.", text),
                    "pyzig.ast.rules.parse_atom_rule".into(),
                    location.clone(),
                    get_span_from_pair(&pair, file),
                )
            })?;
            Constant::Int(parsed)
        }
        Rule::float => {
            let text = pair.as_str();
            let parsed = text.parse::<f64>().map_err(|_| {
                SyntaxError::with(
                    Level::Error,
                    format!("Invalid float literal '{}'.", text),
                    "pyzig.ast.rules.parse_atom_rule".into(),
                    location.clone(),
                    get_span_from_pair(&pair, file),
                )
            })?;
            Constant::Float(parsed)
        }
        Rule::string => {
            let raw = pair.clone().into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Constant::Str(strings::unescape(raw))
        }
        Rule::boolean => Constant::Bool(pair.as_str() == "True"),
        Rule::none => Constant::None,
        _ => return Err(unexpected(&pair, "pyzig.ast.rules.parse_atom_rule", file)),
    };
    Ok(Expr::new(ExprKind::Constant { value }, location))
}

fn binop(left: Expr, op: BinOperator, right: Expr, location: Option<Location>) -> Expr {
    Expr::new(
        ExprKind::BinOp { left: Box::new(left), op, right: Box::new(right) },
        location,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_precedence() {
        let expr = parse_eval_source("1 + 2 * 3", "<eval>").unwrap();
        match expr.kind {
            ExprKind::BinOp { op, right, .. } => {
                assert_eq!(op, BinOperator::Add);
                assert!(matches!(right.kind, ExprKind::BinOp { op: BinOperator::Mult, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn power_binds_tighter_than_negation() {
        let expr = parse_eval_source("-2 ** 2", "<eval>").unwrap();
        match expr.kind {
            ExprKind::UnaryOp { op, operand } => {
                assert_eq!(op, UnaryOperator::USub);
                assert!(matches!(operand.kind, ExprKind::BinOp { op: BinOperator::Pow, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn floor_division_is_not_two_divisions() {
        let expr = parse_eval_source("7 // 2", "<eval>").unwrap();
        assert!(matches!(expr.kind, ExprKind::BinOp { op: BinOperator::FloorDiv, .. }));
    }

    #[test]
    fn string_escapes_are_decoded() {
        let expr = parse_eval_source(r#""a\tb""#, "<eval>").unwrap();
        assert_eq!(expr.as_str_literal(), Some("a\tb"));
    }

    #[test]
    fn names_are_rejected() {
        let err = parse_eval_source("x + 1", "<eval>").unwrap_err();
        assert!(err.to_string().contains("Invalid eval expression"));
    }
}
