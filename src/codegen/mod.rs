//! Lowering: typed syntax tree to Rust source text
//!
//! One [`LoweredUnit`] per top-level declaration, in source order. Every construct the
//! lowering cannot justify from the source semantics becomes an explicit placeholder
//! (a `todo!()` preceded by a comment carrying [`PLACEHOLDER_MARKER`]) backed by a Blocking
//! finding: either the analyzer's own finding for that location, or a new
//! `ManualImplementation` finding.
//!
//! ```python
//! def add(a, b):
//!     return a + b
//! ```
//!
//! With integer call sites lowers to:
//!
//! ```rust,ignore
//! pub fn add(a: i64, b: i64) -> i64 {
//!     a + b
//! }
//! ```

mod class;
mod expr;
mod function;
mod stmt;
pub mod writer;


use std::collections::{BTreeSet, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::analyzer::rule;
use crate::ast::{Decl, Import, Location, Module, Stmt, Variable};
use crate::diagnostics::{ConstructKind, Finding, Origin};
use crate::error::Result;
use crate::inference::{statement_scope, Inference, MAIN_SCOPE};
use crate::mappings::MappingTable;

pub use writer::RustWriter;

/// Marker text present in every placeholder the generator emits
pub const PLACEHOLDER_MARKER: &str = "py2rust: placeholder";

/// Generated text for one top-level declaration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoweredUnit {
    /// Index of the declaration in the module body
    pub unit: usize,
    pub label: String,
    pub text: String,
    /// Findings associated with this declaration, from every pass
    pub findings: Vec<Finding>,
    #[serde(skip)]
    pub helpers: BTreeSet<Helper>,
}

impl LoweredUnit {
    pub fn has_placeholder(&self) -> bool {
        self.text.contains(PLACEHOLDER_MARKER)
    }

    pub fn is_blocked(&self) -> bool {
        self.findings.iter().any(Finding::is_blocking)
    }

    /// Findings the lowering pass itself produced
    pub fn lowering_findings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.origin == Origin::Lowering)
    }
}

/// Support functions emitted once per generated module when a unit needs them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Helper {
    FloorDiv,
    Modulo,
    FloatModulo,
}

impl Helper {
    fn source(self) -> &'static str {
        match self {
            Helper::FloorDiv => {
                "/// Python `//` on integers (rounds toward negative infinity)\n\
                 fn py_floordiv(a: i64, b: i64) -> i64 {\n    \
                     let q = a / b;\n    \
                     if a % b != 0 && ((a < 0) != (b < 0)) {\n        \
                         q - 1\n    \
                     } else {\n        \
                         q\n    \
                     }\n\
                 }\n"
            }
            Helper::Modulo => {
                "/// Python `%` on integers (the result takes the sign of the divisor)\n\
                 fn py_mod(a: i64, b: i64) -> i64 {\n    \
                     let r = a % b;\n    \
                     if r != 0 && ((r < 0) != (b < 0)) {\n        \
                         r + b\n    \
                     } else {\n        \
                         r\n    \
                     }\n\
                 }\n"
            }
            Helper::FloatModulo => {
                "/// Python `%` on floats (the result takes the sign of the divisor)\n\
                 fn py_fmod(a: f64, b: f64) -> f64 {\n    \
                     let r = a % b;\n    \
                     if r != 0.0 && ((r < 0.0) != (b < 0.0)) {\n        \
                         r + b\n    \
                     } else {\n        \
                         r\n    \
                     }\n\
                 }\n"
            }
        }
    }
}

/// A construct without a lowering rule
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Unsupported {
    pub loc: Location,
    pub what: String,
}

impl Unsupported {
    pub fn new(loc: Location, what: impl Into<String>) -> Self {
        Self {
            loc,
            what: what.into(),
        }
    }
}

pub(crate) type Lower<T> = std::result::Result<T, Unsupported>;

/// Per-unit lowering state
pub(crate) struct UnitCtx {
    pub unit: usize,
    pub findings: Vec<Finding>,
    pub helpers: BTreeSet<Helper>,
}

impl UnitCtx {
    fn new(unit: usize, findings: Vec<Finding>) -> Self {
        Self {
            unit,
            findings,
            helpers: BTreeSet::new(),
        }
    }

    /// Reference to the Blocking finding that covers `loc`, recording a
    /// manual-implementation finding when there is none
    pub fn justify(&mut self, loc: Location, what: &str) -> String {
        let covering = |f: &&Finding| f.is_blocking() && f.location == loc;
        let exact = self.findings.iter().filter(covering).find(|f| f.message == what);
        if let Some(existing) = exact.or_else(|| self.findings.iter().find(covering)) {
            return existing.reference();
        }
        self.raise_finding(ConstructKind::ManualImplementation, loc, what)
    }

    /// Record a lowering finding and return its reference
    pub fn raise_finding(&mut self, kind: ConstructKind, loc: Location, detail: &str) -> String {
        let finding = rule(kind).finding(loc, detail, self.unit, Origin::Lowering);
        debug!("{}", finding);
        let reference = finding.reference();
        self.findings.push(finding);
        reference
    }

    pub fn has_finding_at(&self, loc: Location) -> bool {
        self.findings.iter().any(|f| f.location == loc)
    }

    /// Emit a placeholder statement for `unsupported`
    pub fn placeholder(&mut self, w: &mut RustWriter, unsupported: &Unsupported) {
        let reference = self.justify(unsupported.loc, &unsupported.what);
        w.comment(format!(
            "{}: {}, see {}",
            PLACEHOLDER_MARKER, unsupported.what, reference
        ));
        w.line(format!("todo!({:?});", unsupported.what));
    }

    /// Marker comment for an item-level construct (type, field, signature) with no lowering
    pub fn placeholder_item(&mut self, w: &mut RustWriter, unsupported: &Unsupported) {
        let reference = self.justify(unsupported.loc, &unsupported.what);
        w.comment(format!(
            "{}: {}, see {}",
            PLACEHOLDER_MARKER, unsupported.what, reference
        ));
    }
}

/// Module-wide lowering inputs
pub(crate) struct Lowerer<'a> {
    pub module: &'a Module,
    pub inference: &'a Inference,
    pub table: &'a MappingTable,
    /// In-module classes deriving from an exception type
    pub exceptions: HashSet<String>,
}

/// Lower every declaration of `module` with the built-in import table
pub fn lower(module: &Module, inference: &Inference, findings: &[Finding]) -> Result<Vec<LoweredUnit>> {
    lower_with(module, inference, findings, &MappingTable::new())
}

/// Lower every declaration of `module`. `findings` are the analysis and inference findings;
/// each unit receives the ones recorded against its declaration.
pub fn lower_with(
    module: &Module,
    inference: &Inference,
    findings: &[Finding],
    table: &MappingTable,
) -> Result<Vec<LoweredUnit>> {
    module.validate()?;
    info!("Lowering {} declarations of '{}'", module.body.len(), module.name);

    let lowerer = Lowerer {
        module,
        inference,
        table,
        exceptions: module.exception_classes(),
    };
    let mut capabilities = BTreeSet::new();
    let mut units = Vec::with_capacity(module.body.len());

    for (idx, decl) in module.body.iter().enumerate() {
        let associated = findings.iter().filter(|f| f.unit == idx).cloned().collect();
        let mut unit = UnitCtx::new(idx, associated);
        let mut w = RustWriter::new();

        match decl {
            Decl::Import(import) => lowerer.import(&mut w, &mut unit, import),
            Decl::Variable(var) => lowerer.variable(&mut w, &mut unit, var),
            Decl::Function(func) => lowerer.function(&mut w, &mut unit, func),
            Decl::Class(class) => lowerer.class(&mut w, &mut unit, class, &mut capabilities),
            Decl::Statement(stmt) => lowerer.statement(&mut w, &mut unit, stmt),
        }

        let lowered = LoweredUnit {
            unit: idx,
            label: decl.label(),
            text: w.finish(),
            findings: unit.findings,
            helpers: unit.helpers,
        };
        debug!(
            "Lowered {} ({} findings{})",
            lowered.label,
            lowered.findings.len(),
            if lowered.has_placeholder() { ", placeholder" } else { "" }
        );
        units.push(lowered);
    }
    Ok(units)
}

/// Concatenate lowered units under the module header
pub fn render(module_name: &str, doc: Option<&str>, units: &[LoweredUnit]) -> String {
    let mut out = String::new();
    out.push_str(&format!("// Generated from Python module: {}\n", module_name));
    out.push_str("// This is an automated conversion - manual review required!\n");
    if let Some(doc) = doc {
        out.push('\n');
        for line in doc.trim().lines() {
            out.push_str(format!("//! {}", line.trim()).trim_end());
            out.push('\n');
        }
    }

    let helpers: BTreeSet<Helper> = units.iter().flat_map(|u| u.helpers.iter().copied()).collect();
    for helper in helpers {
        out.push('\n');
        out.push_str(helper.source());
    }

    for unit in units {
        if unit.text.is_empty() {
            continue;
        }
        out.push('\n');
        out.push_str(&unit.text);
    }
    out
}

impl<'a> Lowerer<'a> {
    fn import(&self, w: &mut RustWriter, unit: &mut UnitCtx, import: &Import) {
        let source = describe_import(import);
        let mapping = if import.level > 0 {
            None
        } else {
            self.table.lookup(&import.module)
        };
        match mapping {
            Some(mapping) => w.comment(format!("{} -> {}", source, mapping.hint())),
            None => {
                let reference = unit
                    .findings
                    .iter()
                    .find(|f| f.kind == ConstructKind::SourceOnlyImport && f.location == import.loc)
                    .map(Finding::reference);
                match reference {
                    Some(r) => w.comment(format!("{}: no known Rust equivalent, see {}", source, r)),
                    None => w.comment(format!("{}: no known Rust equivalent", source)),
                }
            }
        }
    }

    fn statement(&self, w: &mut RustWriter, unit: &mut UnitCtx, stmt: &Stmt) {
        let scope = statement_scope(stmt);
        if scope == MAIN_SCOPE {
            function::lower_entry_point(self, w, unit, stmt);
        } else {
            w.comment("Executed at import time in the source module");
            function::lower_module_statement(self, w, unit, stmt, &scope);
        }
    }

    fn variable(&self, w: &mut RustWriter, unit: &mut UnitCtx, var: &Variable) {
        function::lower_variable(self, w, unit, var);
    }
}

fn describe_import(import: &Import) -> String {
    let dots = ".".repeat(import.level as usize);
    if import.is_from {
        let names: Vec<String> = import
            .names
            .iter()
            .map(|n| match &n.alias {
                Some(alias) => format!("{} as {}", n.name, alias),
                None => n.name.clone(),
            })
            .collect();
        format!("from {}{} import {}", dots, import.module, names.join(", "))
    } else {
        match &import.alias {
            Some(alias) => format!("import {} as {}", import.module, alias),
            None => format!("import {}", import.module),
        }
    }
}

/// Rust spelling of a Python identifier
pub(crate) fn rust_ident(name: &str) -> String {
    const RAW: &[&str] = &[
        "abstract", "as", "async", "await", "become", "box", "const", "do", "dyn", "enum",
        "extern", "final", "fn", "gen", "impl", "let", "loop", "macro", "match", "mod", "move",
        "mut", "override", "priv", "pub", "ref", "static", "struct", "trait", "try", "type",
        "typeof", "unsafe", "unsized", "use", "virtual", "where", "yield",
    ];
    match name {
        "self" | "Self" | "super" | "crate" => format!("{}_", name),
        n if RAW.contains(&n) => format!("r#{}", n),
        n => n.to_string(),
    }
}
