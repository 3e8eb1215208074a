use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use tempfile::tempdir;

fn sample(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("samples").join(name)
}

fn pyzig() -> Command {
    Command::cargo_bin("pyzig").expect("pyzig binary is built")
}

#[test]
fn build_single_file_prints_zig_to_stdout() {
    let output = pyzig().arg("build").arg(sample("arith.json")).output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("const std = @import(\"std\");"));
    assert!(stdout.contains("fn add("));
    assert!(stdout.contains("pub fn main() !void"));
}

#[test]
fn build_writes_output_file_and_report() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("arith.zig");
    let report = dir.path().join("report.json");
    pyzig()
        .arg("--quiet")
        .arg("build")
        .arg(sample("arith.json"))
        .arg("-o")
        .arg(&out)
        .arg("--report")
        .arg(&report)
        .assert()
        .success();

    let text = fs::read_to_string(&out).unwrap();
    assert!(text.contains("fn add("));
    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(value["files"].as_array().map(|a| a.len()), Some(1));
    assert!(value["files"][0]["error"].is_null());
    assert_eq!(value["files"][0]["diagnostics"].as_array().map(|a| a.len()), Some(0));
}

#[test]
fn no_main_flag_drops_entry_point() {
    let output = pyzig().arg("build").arg("--no-main").arg(sample("arith.json")).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("fn add("));
    assert!(!stdout.contains("pub fn main()"));
}

#[test]
fn diagnostics_are_tabled_and_strict_fails() {
    let output = pyzig().arg("build").arg(sample("enumerate.json")).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stdout.contains("@compileError(\"pyzig: enumerate() is only supported as a for-loop iterable"));
    assert!(stderr.contains("enumerate() is only supported"));
    assert!(stderr.contains("1 deferred diagnostic(s)"));

    pyzig().arg("build").arg("--strict").arg(sample("enumerate.json")).assert().code(2);
}

#[test]
fn glob_input_writes_into_directory() {
    let src = tempdir().unwrap();
    fs::copy(sample("arith.json"), src.path().join("one.json")).unwrap();
    fs::copy(sample("enumerate.json"), src.path().join("two.json")).unwrap();
    let out = tempdir().unwrap();
    let pattern = format!("{}/*.json", src.path().display());
    pyzig().arg("-q").arg("build").arg(&pattern).arg("-o").arg(out.path()).assert().success();
    assert!(out.path().join("one.zig").is_file());
    assert!(out.path().join("two.zig").is_file());
}

#[test]
fn malformed_ast_fails_with_status_one() {
    let output = pyzig().arg("build").arg(sample("broken.json")).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[ERROR]"));
}

#[test]
fn missing_glob_matches_are_an_error() {
    let dir = tempdir().unwrap();
    let pattern = format!("{}/*.json", dir.path().display());
    pyzig().arg("build").arg(&pattern).assert().code(1);
}

#[test]
fn eval_prints_the_result() {
    let output = pyzig().arg("eval").arg("1 + 2").output().unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "3");

    let output = pyzig().arg("eval").arg("7 / 2").output().unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "3.5");
}

#[test]
fn eval_rejects_names() {
    pyzig().arg("eval").arg("x + 1").assert().code(1);
}

#[test]
fn emitted_program_disassembles_and_runs() {
    let dir = tempdir().unwrap();
    let blob = dir.path().join("prog.pybc");
    pyzig().arg("eval").arg("2 * 3 == 6").arg("--emit").arg(&blob).assert().success();

    let output = pyzig().arg("disasm").arg(&blob).arg("--run").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Magic: PYBC"));
    assert!(stdout.contains("MUL"));
    assert!(stdout.contains("EQ"));
    assert!(stdout.trim_end().ends_with("Result: True"));
}

#[test]
fn disasm_rejects_garbage() {
    let dir = tempdir().unwrap();
    let blob = dir.path().join("junk.bin");
    fs::write(&blob, b"junk").unwrap();
    pyzig().arg("disasm").arg(&blob).assert().code(1);
}
