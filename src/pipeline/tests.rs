//! Pipeline module tests.

use super::*;
use crate::diagnostics::{ConstructKind, Severity};
use tempfile::TempDir;

const SHAPES: &str = "\
import math

class Shape:
    def area(self) -> float:
        return 0.0

class Circle(Shape):
    def __init__(self, r: float):
        self.r = r

    def area(self) -> float:
        return math.pi * self.r * self.r

def total(a: float, b: float) -> float:
    return a + b
";

const SQUARE: &str = "\
square = lambda x: x * x

def main():
    return square(3)
";

fn options() -> TranspileOptions {
    TranspileOptions::new("shapes")
}

// ============================================================================
// PIPELINE CONSTRUCTION TESTS
// ============================================================================

#[test]
fn test_standard_stage_order() {
    let pipeline = TranspilationPipeline::standard(ValidationStrategy::StopOnError);
    assert_eq!(
        pipeline.stage_names(),
        vec!["Analysis", "Inference", "Lowering", "Report"]
    );
}

#[test]
fn test_analysis_only_skips_lowering() {
    let pipeline = TranspilationPipeline::analysis_only(ValidationStrategy::StopOnError);
    assert!(!pipeline.stage_names().contains(&"Lowering"));
}

#[test]
fn test_empty_pipeline_has_no_report() {
    let module = crate::frontend::parse_source("x = 1\n", "x.py").unwrap();
    let pipeline = TranspilationPipeline::new(ValidationStrategy::None);
    assert!(pipeline.run(module, options()).is_err());
}

// ============================================================================
// RUN TESTS
// ============================================================================

#[test]
fn test_transpile_clean_module() {
    let output = transpile_source(SHAPES, "shapes.py", options()).unwrap();
    let code = output.code.as_deref().unwrap();
    assert!(code.starts_with("// Generated from Python module: shapes\n"));
    assert!(code.contains("manual review required"));
    assert!(code.contains("pub fn total(a: f64, b: f64) -> f64"));
    assert!(!output.blocked());
    assert!(output.validation_passed);
    assert_eq!(output.units.len(), 4);
}

#[test]
fn test_module_name_override_reaches_header_and_report() {
    let output = transpile_source(SHAPES, "shapes.py", TranspileOptions::new("geometry")).unwrap();
    assert!(output
        .code
        .unwrap()
        .starts_with("// Generated from Python module: geometry\n"));
    assert_eq!(output.report.module, "geometry");
}

#[test]
fn test_blocked_run_still_emits_code() {
    let src = "\
class A:
    pass

class B:
    pass

class C(A, B):
    pass
";
    let output = transpile_source(src, "mi.py", TranspileOptions::new("mi")).unwrap();
    assert!(output.blocked());
    let code = output.code.unwrap();
    assert!(code.contains(crate::codegen::PLACEHOLDER_MARKER));
    let inheritance: Vec<_> = output
        .report
        .findings
        .iter()
        .filter(|f| f.kind == ConstructKind::MultipleInheritance)
        .collect();
    assert_eq!(inheritance.len(), 1);
    assert_eq!(inheritance[0].severity, Severity::Blocking);
}

#[test]
fn test_analysis_only_has_no_code() {
    let output = analyze_source(SQUARE, "sq.py", TranspileOptions::new("sq"))
        .unwrap();
    assert!(output.code.is_none());
    assert!(output
        .report
        .findings
        .iter()
        .any(|f| f.kind == ConstructKind::AnonymousFunction && f.severity == Severity::Warning));
}

#[test]
fn test_strict_mode_blocks_warnings() {
    let relaxed = transpile_source(SQUARE, "sq.py", TranspileOptions::new("sq")).unwrap();
    let strict = transpile_source(SQUARE, "sq.py", TranspileOptions::new("sq").strict(true)).unwrap();
    assert!(!relaxed.blocked());
    assert!(strict.blocked());
    assert_eq!(relaxed.report.findings.len(), strict.report.findings.len());
}

#[test]
fn test_syntax_error_is_hard_failure() {
    let err = transpile_source("def broken(:\n", "bad.py", options()).unwrap_err();
    let cause = err.downcast_ref::<crate::error::TranspileError>().unwrap();
    assert!(cause.is_input_error());
}

#[test]
fn test_invalid_module_name_fails_before_parsing() {
    let err = transpile_source("def broken(:\n", "bad.py", TranspileOptions::new("fn")).unwrap_err();
    let cause = err.downcast_ref::<crate::error::TranspileError>().unwrap();
    assert!(matches!(cause, crate::error::TranspileError::Configuration(_)));
}

#[test]
fn test_runs_are_byte_identical() {
    let first = transpile_source(SHAPES, "shapes.py", options()).unwrap();
    let second = transpile_source(SHAPES, "shapes.py", options()).unwrap();
    assert_eq!(first.code, second.code);
    assert_eq!(first.report, second.report);
}

// ============================================================================
// FILE HELPERS
// ============================================================================

#[test]
fn test_load_module_from_source_and_json() {
    let temp_dir = TempDir::new().unwrap();
    let py = temp_dir.path().join("shapes.py");
    std::fs::write(&py, SHAPES).unwrap();
    let module = load_module(&py, false).unwrap();
    assert_eq!(module.name, "shapes");

    let json = temp_dir.path().join("shapes.json");
    std::fs::write(&json, module.to_json().unwrap()).unwrap();
    let reloaded = load_module(&json, true).unwrap();
    assert_eq!(reloaded.body.len(), module.body.len());
}

#[test]
fn test_load_module_missing_file() {
    assert!(load_module(std::path::Path::new("/nonexistent/x.py"), false).is_err());
}

#[test]
fn test_write_atomic_replaces_content() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out.rs");
    write_atomic(&path, "first").unwrap();
    write_atomic(&path, "second").unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
    assert!(!temp_dir.path().join(".out.rs.tmp").exists());
}

#[test]
fn test_write_atomic_missing_directory() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("missing").join("out.rs");
    let err = write_atomic(&path, "x").unwrap_err();
    assert!(matches!(err, crate::error::TranspileError::Io { .. }));
    assert!(!path.exists());
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn declaration(idx: usize, template: u8, n: i64) -> String {
        match template {
            0 => format!("def f{idx}(a: int) -> int:\n    return a + {n}\n"),
            1 => format!("def f{idx}(s: str) -> str:\n    return s.upper()\n"),
            2 => format!("f{idx} = lambda x: x * {n}\n\ndef use_f{idx}():\n    return f{idx}({n})\n"),
            3 => format!("class C{idx}:\n    def __init__(self, v: int):\n        self.v = v\n"),
            4 => format!(
                "def f{idx}(n: int) -> int:\n    if n < {n}:\n        raise ValueError(\"small\")\n    return n\n"
            ),
            5 => format!("def f{idx}():\n    yield {n}\n"),
            _ => format!("LIMIT_{idx} = {n}\n"),
        }
    }

    fn module_source() -> impl Strategy<Value = String> {
        prop::collection::vec((0u8..7, 0i64..100), 1..6).prop_map(|decls| {
            decls
                .iter()
                .enumerate()
                .map(|(idx, (template, n))| declaration(idx, *template, *n))
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_runs_are_idempotent(src in module_source()) {
            let first = transpile_source(&src, "gen.py", TranspileOptions::new("gen")).unwrap();
            let second = transpile_source(&src, "gen.py", TranspileOptions::new("gen")).unwrap();
            prop_assert_eq!(first.code, second.code);
            prop_assert_eq!(first.report, second.report);
        }

        #[test]
        fn prop_one_unit_per_declaration(src in module_source()) {
            let module = crate::frontend::parse_source(&src, "gen.py").unwrap();
            let output = transpile_source(&src, "gen.py", TranspileOptions::new("gen")).unwrap();
            prop_assert_eq!(output.units.len(), module.body.len());
        }

        #[test]
        fn prop_placeholders_are_blocked(src in module_source()) {
            let output = transpile_source(&src, "gen.py", TranspileOptions::new("gen")).unwrap();
            for unit in &output.units {
                if unit.has_placeholder() {
                    prop_assert!(unit.is_blocked(), "{}", unit.text);
                }
                if unit.findings.is_empty() {
                    prop_assert!(!unit.has_placeholder());
                }
            }
        }

        #[test]
        fn prop_strict_mode_keeps_findings(src in module_source()) {
            let relaxed = transpile_source(&src, "gen.py", TranspileOptions::new("gen")).unwrap();
            let strict =
                transpile_source(&src, "gen.py", TranspileOptions::new("gen").strict(true)).unwrap();
            prop_assert_eq!(relaxed.report.findings.len(), strict.report.findings.len());
            prop_assert_eq!(strict.report.count(Severity::Warning), 0);
            let expect_blocked = relaxed.report.count(Severity::Blocking)
                + relaxed.report.count(Severity::Warning)
                > 0;
            prop_assert_eq!(strict.blocked(), expect_blocked);
        }
    }
}
