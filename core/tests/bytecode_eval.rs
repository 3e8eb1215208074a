use pyzig_core::bytecode::serialize::MAGIC;
use pyzig_core::bytecode::{BytecodeErrorKind, Opcode};
use pyzig_core::{BytecodeConstant, PyzigErrorExt, compile_eval_source, deserialize, evaluate};

fn eval(source: &str) -> BytecodeConstant {
    let bytes = match compile_eval_source(source, "<test>") {
        Ok(bytes) => bytes,
        Err(e) => panic!("{} failed to compile: {}", source, e.message()),
    };
    let program = deserialize(&bytes).expect("envelope decodes");
    evaluate(&program).expect("program evaluates")
}

#[test]
fn arithmetic_follows_operator_precedence() {
    assert_eq!(eval("1 + 2 * 3"), BytecodeConstant::Int(7));
    assert_eq!(eval("(1 + 2) * 3"), BytecodeConstant::Int(9));
    assert_eq!(eval("-2 ** 2"), BytecodeConstant::Int(-4));
    assert_eq!(eval("2 ** 3 ** 2"), BytecodeConstant::Int(512));
}

#[test]
fn true_division_always_yields_float() {
    assert_eq!(eval("7 / 2"), BytecodeConstant::Float(3.5));
    assert_eq!(eval("4 / 2"), BytecodeConstant::Float(2.0));
    assert_eq!(eval("4 / 2").to_string(), "2.0");
    assert_eq!(eval("7 // 2"), BytecodeConstant::Int(3));
    assert_eq!(eval("-7 // 2"), BytecodeConstant::Int(-4));
}

#[test]
fn comparisons_and_strings() {
    assert_eq!(eval("2 * 3 == 6"), BytecodeConstant::Bool(true));
    assert_eq!(eval("1 >= 2"), BytecodeConstant::Bool(false));
    assert_eq!(eval("'ab' + \"cd\""), BytecodeConstant::Str("abcd".into()));
    assert_eq!(eval("'ab' * 2").to_string(), "'abab'");
    assert_eq!(eval("True + 1"), BytecodeConstant::Int(2));
}

#[test]
fn envelope_round_trips_through_deserialize() {
    let bytes = compile_eval_source("1.5 + 2", "<test>").expect("compiles");
    assert_eq!(&bytes[0..4], MAGIC);
    let program = deserialize(&bytes).expect("decodes");
    let ops: Vec<Opcode> = program.instructions.iter().map(|i| i.op).collect();
    assert_eq!(ops, vec![Opcode::LoadConst, Opcode::LoadConst, Opcode::Add, Opcode::Return]);
    assert_eq!(program.constants, vec![BytecodeConstant::Float(1.5), BytecodeConstant::Int(2)]);
    assert_eq!(pyzig_core::serialize(&program), bytes);
}

#[test]
fn runtime_errors_are_reported() {
    let bytes = compile_eval_source("1 // 0", "<test>").expect("compiles");
    let program = deserialize(&bytes).expect("decodes");
    let err = evaluate(&program).unwrap_err();
    assert_eq!(err.kind(), BytecodeErrorKind::Runtime);

    let bytes = compile_eval_source("9223372036854775807 + 1", "<test>").expect("compiles");
    let program = deserialize(&bytes).expect("decodes");
    assert!(evaluate(&program).is_err());
}

#[test]
fn unsupported_sources_do_not_compile() {
    let err = compile_eval_source("x + 1", "<test>").unwrap_err();
    let loc = err.location().expect("location");
    assert_eq!(loc.file, "<test>");
    assert!(compile_eval_source("1 +", "<test>").is_err());
}

#[test]
fn corrupted_envelopes_are_malformed() {
    let mut bytes = compile_eval_source("1", "<test>").expect("compiles");
    bytes[4] = 9;
    let err = deserialize(&bytes).unwrap_err();
    assert_eq!(err.kind(), BytecodeErrorKind::Malformed);
    assert!(err.to_string().contains("unsupported version 9"));

    let mut bytes = compile_eval_source("1", "<test>").expect("compiles");
    let last = bytes.len() - 5;
    bytes[last] = 0x7E;
    assert!(deserialize(&bytes).is_err());
}

#[test]
fn remainder_by_minus_one_matches_source_semantics() {
    assert_eq!(eval("(-9223372036854775807 - 1) % -1"), BytecodeConstant::Int(0));
    assert_eq!(eval("-7 % -1"), BytecodeConstant::Int(0));
}

#[test]
fn huge_string_repetition_is_a_runtime_error() {
    let bytes = compile_eval_source("'ab' * 2 ** 62", "<test>").expect("compiles");
    let program = deserialize(&bytes).expect("decodes");
    let err = evaluate(&program).unwrap_err();
    assert_eq!(err.kind(), BytecodeErrorKind::Runtime);
    assert_eq!(eval("'ab' * 0"), BytecodeConstant::Str(String::new()));
}
