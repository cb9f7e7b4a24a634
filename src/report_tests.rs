use super::*;
use crate::analyzer::rule;
use crate::diagnostics::Origin;
use tempfile::TempDir;

fn finding(kind: ConstructKind, line: u32, unit: usize) -> Finding {
    rule(kind).finding(Location::new(line, 0), "detail", unit, Origin::Analysis)
}

fn sample_findings() -> Vec<Finding> {
    vec![
        finding(ConstructKind::AnonymousFunction, 3, 1),
        finding(ConstructKind::MultipleInheritance, 9, 2),
        finding(ConstructKind::InferenceAmbiguity, 5, 1),
        finding(ConstructKind::ExceptionControlFlow, 1, 0),
        finding(ConstructKind::AnonymousFunction, 2, 0),
    ]
}

fn lowered(unit: usize, label: &str, text: &str) -> LoweredUnit {
    LoweredUnit {
        unit,
        label: label.to_string(),
        text: text.to_string(),
        findings: Vec::new(),
        helpers: Default::default(),
    }
}

// ============================================================================
// ASSEMBLY
// ============================================================================

#[test]
fn test_order_is_severity_then_location() {
    let report = assemble("sample", &sample_findings(), &[], false);
    let order: Vec<(Severity, u32)> = report
        .findings
        .iter()
        .map(|f| (f.severity, f.location.line))
        .collect();
    assert_eq!(
        order,
        vec![
            (Severity::Blocking, 9),
            (Severity::Warning, 1),
            (Severity::Warning, 2),
            (Severity::Warning, 3),
            (Severity::Info, 5),
        ]
    );
}

#[test]
fn test_equal_keys_keep_emission_order() {
    let mut first = finding(ConstructKind::AnonymousFunction, 4, 0);
    first.message = "first".to_string();
    let mut second = finding(ConstructKind::CustomDecorator, 4, 0);
    second.message = "second".to_string();
    let report = assemble("sample", &[first, second], &[], false);
    assert_eq!(report.findings[0].message, "first");
    assert_eq!(report.findings[1].message, "second");
}

#[test]
fn test_blocked_flag_and_status() {
    let report = assemble("sample", &sample_findings(), &[], false);
    assert!(report.blocked());
    assert_eq!(report.status(), RunStatus::Partial);

    let clean = assemble("sample", &[finding(ConstructKind::AnonymousFunction, 1, 0)], &[], false);
    assert!(!clean.blocked());
    assert_eq!(clean.status(), RunStatus::Success);
}

#[test]
fn test_strict_mode_promotes_warnings_only() {
    let findings = vec![
        finding(ConstructKind::AnonymousFunction, 1, 0),
        finding(ConstructKind::InferenceAmbiguity, 2, 0),
    ];
    let relaxed = assemble("sample", &findings, &[], false);
    let strict = assemble("sample", &findings, &[], true);
    assert!(!relaxed.blocked());
    assert!(strict.blocked());
    assert_eq!(relaxed.findings.len(), strict.findings.len());
    assert_eq!(strict.count(Severity::Blocking), 1);
    assert_eq!(strict.count(Severity::Info), 1);
    assert_eq!(strict.count(Severity::Warning), 0);
}

#[test]
fn test_summary_groups_by_severity_then_kind() {
    let report = assemble("sample", &sample_findings(), &[], false);
    let summary = report.summary();
    assert_eq!(summary.len(), 4);
    assert_eq!(summary[0].severity, Severity::Blocking);
    assert_eq!(summary[0].kind, ConstructKind::MultipleInheritance);
    let lambdas = summary
        .iter()
        .find(|row| row.kind == ConstructKind::AnonymousFunction)
        .unwrap();
    assert_eq!(lambdas.count, 2);
    assert_eq!(summary.last().unwrap().severity, Severity::Info);
}

#[test]
fn test_lowering_findings_come_from_units() {
    let mut unit = lowered(0, "function f", "// py2rust: placeholder: x, see [..]\n");
    let analysis = finding(ConstructKind::ExceptionControlFlow, 1, 0);
    let lowering = rule(ConstructKind::ManualImplementation).finding(
        Location::new(2, 4),
        "x",
        0,
        Origin::Lowering,
    );
    unit.findings = vec![analysis.clone(), lowering];
    let report = assemble("sample", &[analysis], &[unit], false);
    assert_eq!(report.findings.len(), 2);
    assert_eq!(report.units.len(), 1);
    assert!(report.units[0].blocked);
    assert!(report.units[0].placeholder);
    assert_eq!(report.units[0].findings, 2);
}

// ============================================================================
// RENDERING
// ============================================================================

#[test]
fn test_text_report_sections() {
    let units = vec![lowered(0, "function f", ""), lowered(1, "variable g", ""), lowered(2, "class C", "")];
    let report = assemble("sample", &sample_findings(), &units, false);
    let text = report.to_text();
    assert!(text.starts_with("TRANSPILATION REPORT: sample\n"));
    assert!(text.contains("Status: partial"));
    assert!(text.contains("Findings: 5 (1 blocking, 3 warning, 1 info)"));
    assert!(text.contains("SUMMARY"));
    assert!(text.contains("multiple-inheritance"));
    assert!(text.contains("UNITS"));
    assert!(text.find("Blocking").unwrap() < text.find("Warning").unwrap());
}

#[test]
fn test_text_report_without_findings() {
    let report = assemble("sample", &[], &[], false);
    let text = report.to_text();
    assert!(text.contains("Status: success"));
    assert!(text.contains("Code appears compatible with Rust conversion"));
}

#[test]
fn test_markdown_report_tables() {
    let report = assemble("sample", &sample_findings(), &[], true);
    let md = report.to_markdown();
    assert!(md.starts_with("# Transpilation Report: sample"));
    assert!(md.contains("- **Blocked:** yes"));
    assert!(md.contains("- **Strict mode:**"));
    assert!(md.contains("| Severity | Kind | Count |"));
    assert!(md.contains("`anonymous-function`"));
}

#[test]
fn test_json_report_fields() {
    let report = assemble("sample", &sample_findings(), &[], false);
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["module"], "sample");
    assert_eq!(json["blocked"], true);
    assert_eq!(json["status"], "partial");
    let findings = json["findings"].as_array().unwrap();
    assert_eq!(findings.len(), 5);
    let first = &findings[0];
    assert_eq!(first["kind"], "multiple-inheritance");
    assert_eq!(first["severity"], "Blocking");
    assert_eq!(first["location"]["line"], 9);
    assert!(first["message"].is_string());
    assert!(first["suggested_action"].is_string());
}

#[test]
fn test_json_summary_uses_finding_slugs() {
    let report = assemble("sample", &sample_findings(), &[], false);
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    let kinds: Vec<&str> = json["findings"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["kind"].as_str().unwrap())
        .collect();
    let summary = json["summary"].as_array().unwrap();
    assert_eq!(summary[0]["kind"], "multiple-inheritance");
    for row in summary {
        assert!(kinds.contains(&row["kind"].as_str().unwrap()), "{}", row);
    }
}

#[test]
fn test_rendering_is_byte_identical() {
    let a = assemble("sample", &sample_findings(), &[], false);
    let b = assemble("sample", &sample_findings(), &[], false);
    for format in [ReportFormat::Text, ReportFormat::Markdown, ReportFormat::Json] {
        assert_eq!(a.render(format).unwrap(), b.render(format).unwrap());
    }
}

#[test]
fn test_save_writes_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("report.json");
    let report = assemble("sample", &sample_findings(), &[], false);
    report.save(&path, ReportFormat::Json).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("\"status\": \"partial\""));
}

// ============================================================================
// FORMAT PARSING
// ============================================================================

#[test]
fn test_report_format_from_str() {
    assert_eq!("text".parse::<ReportFormat>().unwrap(), ReportFormat::Text);
    assert_eq!("MD".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
    assert_eq!("json".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
    assert!("html".parse::<ReportFormat>().is_err());
}

#[test]
fn test_report_format_display_round_trips() {
    for format in [ReportFormat::Text, ReportFormat::Markdown, ReportFormat::Json] {
        assert_eq!(format.to_string().parse::<ReportFormat>().unwrap(), format);
    }
}

#[test]
fn test_report_format_extension() {
    assert_eq!(ReportFormat::Text.extension(), "txt");
    assert_eq!(ReportFormat::Markdown.extension(), "md");
    assert_eq!(ReportFormat::Json.extension(), "json");
}
