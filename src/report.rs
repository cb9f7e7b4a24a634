//! Diagnostics / report assembly
//!
//! Collects the findings of every pass, orders them (severity descending, then source
//! location, then emission order), groups them by severity and construct kind and renders
//! text, Markdown or JSON. Nothing time-dependent goes into a report, so two runs on the
//! same input render byte-identical output.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ast::Location;
use crate::codegen::LoweredUnit;
use crate::diagnostics::{ConstructKind, Finding, Severity};
use crate::error::{Result, TranspileError};

/// Severities in report order
const SEVERITY_ORDER: [Severity; 3] = [Severity::Blocking, Severity::Warning, Severity::Info];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Markdown,
    Json,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Text => write!(f, "text"),
            ReportFormat::Markdown => write!(f, "markdown"),
            ReportFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for ReportFormat {
    type Err = TranspileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "json" => Ok(ReportFormat::Json),
            other => Err(TranspileError::Configuration(format!(
                "unknown report format '{}' (expected text, markdown or json)",
                other
            ))),
        }
    }
}

impl ReportFormat {
    /// File extension for a saved report
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Markdown => "md",
            ReportFormat::Json => "json",
        }
    }
}

/// Outcome of a run that produced output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// No Blocking findings
    Success,
    /// Blocking findings present; generated code contains placeholders
    Partial,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Partial => write!(f, "partial"),
        }
    }
}

/// One row of the grouped summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindCount {
    pub severity: Severity,
    #[serde(serialize_with = "serialize_slug")]
    pub kind: ConstructKind,
    pub count: usize,
}

fn serialize_slug<S: serde::Serializer>(
    kind: &ConstructKind,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(kind.slug())
}

/// Machine-readable form of one finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FindingRecord {
    pub kind: String,
    pub location: Location,
    pub severity: Severity,
    pub message: String,
    pub suggested_action: String,
}

impl From<&Finding> for FindingRecord {
    fn from(finding: &Finding) -> Self {
        Self {
            kind: finding.kind.slug().to_string(),
            location: finding.location,
            severity: finding.severity,
            message: finding.message.clone(),
            suggested_action: finding.suggested_action.clone(),
        }
    }
}

/// Translation status of one top-level declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitStatus {
    pub unit: usize,
    pub label: String,
    pub findings: usize,
    pub placeholder: bool,
    pub blocked: bool,
}

/// Findings of one run, ordered and grouped
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub module: String,
    pub strict: bool,
    /// Severity descending, then location, then emission order
    pub findings: Vec<Finding>,
    pub units: Vec<UnitStatus>,
}

/// Build the report of a run. `findings` are the analysis and inference findings; the
/// lowering findings are taken from `units`. Strict mode promotes Warning to Blocking
/// before ordering.
pub fn assemble(module: &str, findings: &[Finding], units: &[LoweredUnit], strict: bool) -> Report {
    let mut all: Vec<Finding> = findings
        .iter()
        .cloned()
        .chain(units.iter().flat_map(|u| u.lowering_findings().cloned()))
        .collect();
    if strict {
        all = all.into_iter().map(Finding::promoted).collect();
    }
    all.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.location.cmp(&b.location)));

    let units = units
        .iter()
        .map(|u| {
            let own = all.iter().filter(|f| f.unit == u.unit);
            UnitStatus {
                unit: u.unit,
                label: u.label.clone(),
                findings: own.clone().count(),
                placeholder: u.has_placeholder(),
                blocked: own.clone().any(Finding::is_blocking),
            }
        })
        .collect();

    Report {
        module: module.to_string(),
        strict,
        findings: all,
        units,
    }
}

#[derive(Serialize)]
struct JsonReport<'r> {
    module: &'r str,
    strict: bool,
    blocked: bool,
    status: RunStatus,
    summary: Vec<KindCount>,
    findings: Vec<FindingRecord>,
    units: &'r [UnitStatus],
}

impl Report {
    pub fn blocked(&self) -> bool {
        self.findings.iter().any(Finding::is_blocking)
    }

    pub fn status(&self) -> RunStatus {
        if self.blocked() {
            RunStatus::Partial
        } else {
            RunStatus::Success
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    /// Counts per severity (descending) and construct kind
    pub fn summary(&self) -> Vec<KindCount> {
        let mut groups: BTreeMap<(Severity, ConstructKind), usize> = BTreeMap::new();
        for finding in &self.findings {
            *groups.entry((finding.severity, finding.kind)).or_insert(0) += 1;
        }
        let mut out = Vec::with_capacity(groups.len());
        for severity in SEVERITY_ORDER {
            for ((s, kind), count) in &groups {
                if *s == severity {
                    out.push(KindCount {
                        severity,
                        kind: *kind,
                        count: *count,
                    });
                }
            }
        }
        out
    }

    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Text => Ok(self.to_text()),
            ReportFormat::Markdown => Ok(self.to_markdown()),
            ReportFormat::Json => self.to_json(),
        }
    }

    /// Generate plain text report
    pub fn to_text(&self) -> String {
        let mut text = String::new();

        text.push_str(&format!("TRANSPILATION REPORT: {}\n", self.module));
        text.push_str(&"=".repeat(80));
        text.push_str("\n\n");

        text.push_str(&format!("Status: {}", self.status()));
        if self.strict {
            text.push_str(" (strict)");
        }
        text.push('\n');
        text.push_str(&format!(
            "Findings: {} ({} blocking, {} warning, {} info)\n\n",
            self.findings.len(),
            self.count(Severity::Blocking),
            self.count(Severity::Warning),
            self.count(Severity::Info)
        ));

        if self.findings.is_empty() {
            text.push_str("Code appears compatible with Rust conversion\n");
            return text;
        }

        text.push_str("SUMMARY\n");
        text.push_str(&"-".repeat(80));
        text.push('\n');
        let mut current = None;
        for row in self.summary() {
            if current != Some(row.severity) {
                text.push_str(&format!("{}\n", row.severity));
                current = Some(row.severity);
            }
            text.push_str(&format!("  {:32} {:4}\n", row.kind.slug(), row.count));
        }
        text.push('\n');

        text.push_str("FINDINGS\n");
        text.push_str(&"-".repeat(80));
        text.push('\n');
        for finding in &self.findings {
            text.push_str(&format!(
                "{:8} {:9} [{}] {}\n",
                finding.location.to_string(),
                finding.severity.to_string(),
                finding.kind,
                finding.message
            ));
            text.push_str(&format!("         • {}\n", finding.suggested_action));
        }

        if !self.units.is_empty() {
            text.push('\n');
            text.push_str("UNITS\n");
            text.push_str(&"-".repeat(80));
            text.push('\n');
            for unit in &self.units {
                let state = match (unit.blocked, unit.placeholder) {
                    (true, true) => "blocked, placeholder",
                    (true, false) => "blocked",
                    (false, _) if unit.findings > 0 => "translated with notes",
                    _ => "translated",
                };
                text.push_str(&format!("{:40} {}\n", unit.label, state));
            }
        }

        text
    }

    /// Generate Markdown report
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str(&format!("# Transpilation Report: {}\n\n", self.module));
        md.push_str(&format!("- **Status:** {}\n", self.status()));
        md.push_str(&format!("- **Blocked:** {}\n", if self.blocked() { "yes" } else { "no" }));
        if self.strict {
            md.push_str("- **Strict mode:** warnings promoted to blocking\n");
        }
        md.push_str(&format!("- **Findings:** {}\n\n", self.findings.len()));

        if self.findings.is_empty() {
            md.push_str("Code appears compatible with Rust conversion.\n");
            return md;
        }

        md.push_str("## Summary\n\n");
        md.push_str("| Severity | Kind | Count |\n");
        md.push_str("|----------|------|-------|\n");
        for row in self.summary() {
            md.push_str(&format!("| {} | `{}` | {} |\n", row.severity, row.kind, row.count));
        }
        md.push('\n');

        md.push_str("## Findings\n\n");
        md.push_str("| Location | Severity | Kind | Message | Suggested action |\n");
        md.push_str("|----------|----------|------|---------|------------------|\n");
        for finding in &self.findings {
            md.push_str(&format!(
                "| {} | {} | `{}` | {} | {} |\n",
                finding.location,
                finding.severity,
                finding.kind,
                escape_cell(&finding.message),
                escape_cell(&finding.suggested_action)
            ));
        }

        if !self.units.is_empty() {
            md.push_str("\n## Units\n\n");
            md.push_str("| Declaration | Findings | Blocked | Placeholder |\n");
            md.push_str("|-------------|----------|---------|-------------|\n");
            for unit in &self.units {
                md.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    unit.label,
                    unit.findings,
                    if unit.blocked { "yes" } else { "no" },
                    if unit.placeholder { "yes" } else { "no" }
                ));
            }
        }

        md
    }

    /// Generate JSON report
    pub fn to_json(&self) -> Result<String> {
        let report = JsonReport {
            module: &self.module,
            strict: self.strict,
            blocked: self.blocked(),
            status: self.status(),
            summary: self.summary(),
            findings: self.findings.iter().map(FindingRecord::from).collect(),
            units: &self.units,
        };
        Ok(serde_json::to_string_pretty(&report)?)
    }

    /// Save report to file
    pub fn save(&self, path: &Path, format: ReportFormat) -> Result<()> {
        let content = self.render(format)?;
        crate::pipeline::write_atomic(path, &content)
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
