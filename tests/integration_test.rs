#![allow(deprecated)]

/// CLI integration tests: exit codes, written artifacts and report formats
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CLEAN: &str = "\
def add(a, b):
    return a + b

def main():
    return add(1, 2)
";

const MULTIPLE_INHERITANCE: &str = "\
class Walker:
    def walk(self):
        return 1

class Swimmer:
    def swim(self):
        return 2

class Duck(Walker, Swimmer):
    pass
";

const LAMBDA: &str = "\
square = lambda x: x * x

def main():
    return square(3)
";

fn py2rust(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("py2rust").unwrap();
    cmd.current_dir(dir);
    cmd
}

fn write_source(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

// ============================================================================
// TRANSPILE
// ============================================================================

/// Clean module: exit 0, output next to the input
#[test]
fn test_transpile_clean_module() {
    let temp_dir = TempDir::new().unwrap();
    write_source(temp_dir.path(), "calc.py", CLEAN);

    py2rust(temp_dir.path())
        .arg("transpile")
        .arg("calc.py")
        .assert()
        .success()
        .stdout(predicate::str::contains("TRANSPILATION REPORT: calc"))
        .stdout(predicate::str::contains("Status: success"));

    let code = fs::read_to_string(temp_dir.path().join("calc.rs")).unwrap();
    assert!(code.starts_with("// Generated from Python module: calc"));
    assert!(code.contains("pub fn add(a: i64, b: i64) -> i64 {"));
}

/// Blocking findings: exit 2, output still written with placeholders
#[test]
fn test_transpile_blocked_module_exits_partial() {
    let temp_dir = TempDir::new().unwrap();
    write_source(temp_dir.path(), "ducks.py", MULTIPLE_INHERITANCE);

    py2rust(temp_dir.path())
        .arg("transpile")
        .arg("ducks.py")
        .arg("-o")
        .arg("out.rs")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("multiple-inheritance"));

    let code = fs::read_to_string(temp_dir.path().join("out.rs")).unwrap();
    assert!(code.contains("py2rust: placeholder"));
    assert!(code.contains("pub struct Duck"));
}

/// Syntax error: exit 1, nothing written
#[test]
fn test_transpile_syntax_error_writes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    write_source(temp_dir.path(), "broken.py", "def broken(:\n    pass\n");

    py2rust(temp_dir.path())
        .arg("transpile")
        .arg("broken.py")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("syntax error"));

    assert!(!temp_dir.path().join("broken.rs").exists());
}

#[test]
fn test_transpile_missing_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    py2rust(temp_dir.path())
        .arg("transpile")
        .arg("missing.py")
        .assert()
        .code(1);
}

#[test]
fn test_transpile_strict_promotes_warnings() {
    let temp_dir = TempDir::new().unwrap();
    write_source(temp_dir.path(), "sq.py", LAMBDA);

    py2rust(temp_dir.path())
        .arg("transpile")
        .arg("sq.py")
        .assert()
        .success();

    py2rust(temp_dir.path())
        .arg("transpile")
        .arg("sq.py")
        .arg("--strict")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Status: partial (strict)"));
}

#[test]
fn test_transpile_module_name_override() {
    let temp_dir = TempDir::new().unwrap();
    write_source(temp_dir.path(), "calc.py", CLEAN);

    py2rust(temp_dir.path())
        .args(["transpile", "calc.py", "-m", "arith", "-o", "arith.rs"])
        .assert()
        .success();

    let code = fs::read_to_string(temp_dir.path().join("arith.rs")).unwrap();
    assert!(code.starts_with("// Generated from Python module: arith"));
}

#[test]
fn test_transpile_invalid_module_name_is_configuration_error() {
    let temp_dir = TempDir::new().unwrap();
    write_source(temp_dir.path(), "calc.py", CLEAN);

    py2rust(temp_dir.path())
        .args(["transpile", "calc.py", "-m", "fn"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid configuration"));

    assert!(!temp_dir.path().join("calc.rs").exists());
}

#[test]
fn test_transpile_json_report_to_file() {
    let temp_dir = TempDir::new().unwrap();
    write_source(temp_dir.path(), "sq.py", LAMBDA);

    py2rust(temp_dir.path())
        .args(["transpile", "sq.py", "--report", "json", "--report-out", "report.json"])
        .assert()
        .success();

    let content = fs::read_to_string(temp_dir.path().join("report.json")).unwrap();
    let report: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(report["status"], "success");
    assert_eq!(report["blocked"], false);
    assert_eq!(report["findings"][0]["kind"], "anonymous-function");
    assert_eq!(report["findings"][0]["severity"], "Warning");
}

#[test]
fn test_transpile_several_files_into_directory() {
    let temp_dir = TempDir::new().unwrap();
    write_source(temp_dir.path(), "calc.py", CLEAN);
    write_source(temp_dir.path(), "ducks.py", MULTIPLE_INHERITANCE);

    py2rust(temp_dir.path())
        .args(["transpile", "calc.py", "ducks.py", "-o", "out"])
        .assert()
        .code(2);

    assert!(temp_dir.path().join("out").join("calc.rs").exists());
    assert!(temp_dir.path().join("out").join("ducks.rs").exists());
}

#[test]
fn test_transpile_several_files_rejects_module_name() {
    let temp_dir = TempDir::new().unwrap();
    write_source(temp_dir.path(), "a.py", CLEAN);
    write_source(temp_dir.path(), "b.py", CLEAN);

    py2rust(temp_dir.path())
        .args(["transpile", "a.py", "b.py", "-m", "both"])
        .assert()
        .code(1);

    assert!(!temp_dir.path().join("a.rs").exists());
}

#[test]
fn test_transpile_reads_config_file() {
    let temp_dir = TempDir::new().unwrap();
    write_source(temp_dir.path(), "sq.py", LAMBDA);
    fs::write(
        temp_dir.path().join("py2rust.toml"),
        "version = \"1.0\"\n\n[analysis]\nstrict = true\n",
    )
    .unwrap();

    py2rust(temp_dir.path())
        .args(["transpile", "sq.py"])
        .assert()
        .code(2);
}

// ============================================================================
// ANALYZE
// ============================================================================

#[test]
fn test_analyze_clean_module() {
    let temp_dir = TempDir::new().unwrap();
    write_source(temp_dir.path(), "calc.py", CLEAN);

    py2rust(temp_dir.path())
        .args(["analyze", "calc.py"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Code appears compatible with Rust conversion"));

    assert!(!temp_dir.path().join("calc.rs").exists());
}

#[test]
fn test_analyze_markdown_format() {
    let temp_dir = TempDir::new().unwrap();
    write_source(temp_dir.path(), "ducks.py", MULTIPLE_INHERITANCE);

    py2rust(temp_dir.path())
        .args(["analyze", "ducks.py", "--format", "markdown"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("# Transpilation Report: ducks"))
        .stdout(predicate::str::contains("`multiple-inheritance`"));
}

#[test]
fn test_analyze_unknown_format_rejected_by_cli() {
    let temp_dir = TempDir::new().unwrap();
    write_source(temp_dir.path(), "calc.py", CLEAN);

    py2rust(temp_dir.path())
        .args(["analyze", "calc.py", "--format", "html"])
        .assert()
        .failure();
}

// ============================================================================
// INIT
// ============================================================================

#[test]
fn test_init_writes_default_config() {
    let temp_dir = TempDir::new().unwrap();

    py2rust(temp_dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("py2rust.toml"));

    let content = fs::read_to_string(temp_dir.path().join("py2rust.toml")).unwrap();
    assert!(content.contains("[analysis]"));

    py2rust(temp_dir.path()).arg("init").assert().code(1);
    py2rust(temp_dir.path())
        .args(["init", "--force"])
        .assert()
        .success();
}

#[test]
fn test_help_lists_subcommands() {
    let temp_dir = TempDir::new().unwrap();
    py2rust(temp_dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("transpile"))
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("init"));
}
