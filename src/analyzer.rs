//! Compatibility analyzer
//!
//! Walks a validated [`Module`] once, depth-first in source order, and classifies every
//! construct against the [`rules::RULES`] table. Classification never fails; only a
//! structurally invalid tree is rejected (before any finding is produced).

pub mod evidence;
pub mod rules;

use std::collections::HashSet;

use tracing::{debug, info};

use crate::ast::{
    BinOp, Class, Decl, Expr, ExprKind, Function, Import, Module, ParamKind, Stmt, StmtKind,
};
use crate::diagnostics::{ConstructKind, Finding, Origin};
use crate::error::Result;
use crate::mappings::{self, MappingTable};

pub use evidence::{literal_type, CallSiteIndex};
pub use rules::{rule, Rule, RULES};

/// Analyze a module with the built-in mapping table
pub fn analyze(module: &Module) -> Result<Vec<Finding>> {
    analyze_with(module, &MappingTable::new())
}

/// Analyze a module against a specific import mapping table
pub fn analyze_with(module: &Module, table: &MappingTable) -> Result<Vec<Finding>> {
    module.validate()?;
    info!("Analyzing module '{}' ({} declarations)", module.name, module.body.len());

    let evidence = CallSiteIndex::build(module);
    let mut analyzer = Analyzer {
        module,
        table,
        evidence: &evidence,
        findings: Vec::new(),
        unit: 0,
        scope: String::from("module scope"),
    };
    for (unit, decl) in module.body.iter().enumerate() {
        analyzer.unit = unit;
        analyzer.visit_decl(decl);
    }

    debug!("Analysis produced {} findings", analyzer.findings.len());
    Ok(analyzer.findings)
}

/// `if __name__ == "__main__":` at module level
pub fn is_main_guard(stmt: &Stmt) -> bool {
    let StmtKind::If { test, .. } = &stmt.kind else {
        return false;
    };
    let ExprKind::Compare {
        left, comparators, ..
    } = &test.kind
    else {
        return false;
    };
    let is_dunder = |e: &Expr| e.as_name() == Some("__name__");
    let is_main = |e: &Expr| matches!(&e.kind, ExprKind::Str(s) if s == "__main__");
    comparators.len() == 1
        && ((is_dunder(left) && is_main(&comparators[0]))
            || (is_main(left) && is_dunder(&comparators[0])))
}

struct Analyzer<'a> {
    module: &'a Module,
    table: &'a MappingTable,
    evidence: &'a CallSiteIndex,
    findings: Vec<Finding>,
    unit: usize,
    /// Human-readable name of the enclosing function or module
    scope: String,
}

impl<'a> Analyzer<'a> {
    fn emit(&mut self, kind: ConstructKind, location: crate::ast::Location, detail: &str) {
        let finding = rule(kind).finding(location, detail, self.unit, Origin::Analysis);
        debug!("{}", finding);
        self.findings.push(finding);
    }

    fn visit_decl(&mut self, decl: &Decl) {
        match decl {
            Decl::Import(import) => self.visit_import(import),
            Decl::Variable(var) => {
                self.scope = format!("module variable `{}`", var.target);
                for expr in var.annotation.iter().chain(var.value.iter()) {
                    self.visit_expr(expr);
                }
            }
            Decl::Statement(stmt) => {
                self.scope = String::from("module scope");
                if is_main_guard(stmt) {
                    self.scope = String::from("the __main__ block");
                } else {
                    self.emit(
                        ConstructKind::ModuleLevelStatement,
                        stmt.loc,
                        &stmt.loc.line.to_string(),
                    );
                }
                self.visit_stmt(stmt);
            }
            Decl::Function(func) => self.visit_function(func, None),
            Decl::Class(class) => self.visit_class(class),
        }
    }

    fn visit_import(&mut self, import: &Import) {
        if import.level > 0 {
            let relative = format!("{}{}", ".".repeat(import.level as usize), import.module);
            self.emit(ConstructKind::SourceOnlyImport, import.loc, &relative);
            return;
        }
        if !self.table.is_mapped(&import.module) {
            self.emit(ConstructKind::SourceOnlyImport, import.loc, &import.module);
        }
    }

    fn visit_class(&mut self, class: &Class) {
        self.scope = format!("class `{}`", class.name);

        for decorator in &class.decorators {
            self.check_decorator(decorator);
        }

        let bases = class.effective_bases();
        if bases.len() > 1 {
            self.emit(ConstructKind::MultipleInheritance, class.loc, &class.name);
        } else if let Some(base) = bases.first() {
            let in_module = self.module.class(base).is_some();
            if !in_module && !mappings::is_builtin_exception(base) {
                self.emit(
                    ConstructKind::ExternalBaseClass,
                    class.loc,
                    &format!("`{}({})`", class.name, base),
                );
            }
        }

        if let Some(loc) = dynamic_attribute_site(self.module, class) {
            self.emit(ConstructKind::DynamicAttributeMutation, loc, &class.name);
        }

        for field in class.fields.iter().filter(|f| !f.from_init) {
            for expr in field.annotation.iter().chain(field.default.iter()) {
                self.visit_expr(expr);
            }
        }
        for stmt in &class.other {
            self.visit_stmt(stmt);
        }
        for method in &class.methods {
            self.visit_function(method, Some(class));
        }
    }

    fn visit_function(&mut self, func: &Function, class: Option<&Class>) {
        let qualified = match class {
            Some(c) => format!("{}.{}", c.name, func.name),
            None => func.name.clone(),
        };
        self.scope = format!("function `{}`", qualified);

        for decorator in &func.decorators {
            self.check_decorator(decorator);
        }
        if func.is_async {
            self.emit(
                ConstructKind::GeneratorOrCoroutine,
                func.loc,
                &format!("async function `{}`", qualified),
            );
        }

        let has_receiver = class.is_some() && func.takes_receiver();
        for (idx, param) in func.params.iter().enumerate() {
            match param.kind {
                ParamKind::VarArgs | ParamKind::KwArgs => {
                    self.emit(ConstructKind::VariadicParameters, param.loc, &param.name);
                }
                ParamKind::Positional | ParamKind::KeywordOnly => {
                    let is_receiver = has_receiver && idx == 0;
                    let has_default_type = param
                        .default
                        .as_ref()
                        .and_then(literal_type)
                        .is_some_and(|t| t != crate::types::Type::none());
                    if !is_receiver
                        && param.annotation.is_none()
                        && !has_default_type
                        && !self.evidence.has_evidence(&qualified, &param.name)
                    {
                        self.emit(
                            ConstructKind::DuckTypedParameter,
                            param.loc,
                            &format!("{}` of `{}", param.name, qualified),
                        );
                    }
                }
            }
            for expr in param.annotation.iter().chain(param.default.iter()) {
                self.visit_expr(expr);
            }
        }
        if let Some(ret) = &func.returns {
            self.visit_expr(ret);
        }

        self.visit_block(&func.body);
    }

    fn check_decorator(&mut self, decorator: &Expr) {
        let name = decorator.dotted_name().unwrap_or_default();
        if !mappings::is_known_decorator(&name) {
            let shown = if name.is_empty() { "<expression>" } else { &name };
            self.emit(ConstructKind::CustomDecorator, decorator.loc, shown);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let detail = format!("try statement in {}", self.scope);
                self.emit(ConstructKind::ExceptionControlFlow, stmt.loc, &detail);
                self.visit_block(body);
                for handler in handlers {
                    if let Some(ty) = &handler.exc_type {
                        self.visit_expr(ty);
                    }
                    self.visit_block(&handler.body);
                }
                self.visit_block(orelse);
                self.visit_block(finalbody);
                return;
            }
            StmtKind::Raise { .. } => {
                let detail = format!("raise in {}", self.scope);
                self.emit(ConstructKind::ExceptionControlFlow, stmt.loc, &detail);
            }
            StmtKind::Global(names) | StmtKind::Nonlocal(names) => {
                self.emit(ConstructKind::ScopeRebinding, stmt.loc, &names.join(", "));
            }
            StmtKind::AugAssign {
                op: BinOp::Pow,
                value,
                ..
            } if !matches!(value.kind, ExprKind::Float(_)) => {
                let detail = format!("exponentiation in {}", self.scope);
                self.emit(ConstructKind::ArbitraryPrecisionInteger, stmt.loc, &detail);
            }
            StmtKind::AugAssign {
                op: BinOp::LShift,
                value,
                ..
            } if !is_small_shift(value) => {
                let detail = format!("left shift in {}", self.scope);
                self.emit(ConstructKind::ArbitraryPrecisionInteger, stmt.loc, &detail);
            }
            StmtKind::Other { kind, .. } => {
                self.emit(ConstructKind::UnsupportedSyntax, stmt.loc, kind);
            }
            _ => {}
        }
        for expr in stmt.exprs() {
            self.visit_expr(expr);
        }
        for block in stmt.blocks() {
            self.visit_block(block);
        }
    }

    fn visit_block(&mut self, block: &[Stmt]) {
        for stmt in block {
            self.visit_stmt(stmt);
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Lambda { .. } => {
                let detail = self.scope.clone();
                self.emit(ConstructKind::AnonymousFunction, expr.loc, &detail);
            }
            ExprKind::BigInt(digits) => {
                self.emit(
                    ConstructKind::ArbitraryPrecisionInteger,
                    expr.loc,
                    &format!("integer literal {}", digits),
                );
            }
            ExprKind::BinOp {
                op: BinOp::Pow,
                left,
                right,
            } if !is_float_literal(left) && !is_float_literal(right) => {
                let detail = format!("exponentiation in {}", self.scope);
                self.emit(ConstructKind::ArbitraryPrecisionInteger, expr.loc, &detail);
            }
            ExprKind::BinOp {
                op: BinOp::LShift,
                right,
                ..
            } if !is_small_shift(right) => {
                let detail = format!("left shift in {}", self.scope);
                self.emit(ConstructKind::ArbitraryPrecisionInteger, expr.loc, &detail);
            }
            ExprKind::Call { func, args, .. } => {
                if let Some(name) = func.as_name() {
                    let on_self = args.first().and_then(Expr::as_name) == Some("self");
                    let handled_by_class = on_self && matches!(name, "setattr" | "delattr");
                    if mappings::REFLECTION_BUILTINS.contains(&name) && !handled_by_class {
                        self.emit(ConstructKind::Reflection, expr.loc, name);
                    }
                }
            }
            ExprKind::Attribute { value, attr } if attr == "__dict__" || attr == "__class__" => {
                if value.as_name() != Some("self") || attr == "__class__" {
                    self.emit(ConstructKind::Reflection, expr.loc, attr);
                }
            }
            ExprKind::Other { kind, .. } => match kind.as_str() {
                "ellipsis" => {}
                "yield" | "await" | "yield_from" => {
                    let detail = self.scope.clone();
                    self.emit(ConstructKind::GeneratorOrCoroutine, expr.loc, &detail);
                }
                _ => self.emit(ConstructKind::UnsupportedSyntax, expr.loc, kind),
            },
            _ => {}
        }
        for child in expr.children() {
            self.visit_expr(child);
        }
    }
}

fn is_float_literal(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Float(_))
}

/// Shift by a literal amount that keeps an `i32`-sized value inside `i64`
fn is_small_shift(amount: &Expr) -> bool {
    matches!(amount.kind, ExprKind::Int(n) if (0..32).contains(&n))
}

/// Fields of `class` and of every in-module class it derives from
fn declared_fields<'m>(module: &'m Module, class: &'m Class) -> HashSet<&'m str> {
    let mut declared = HashSet::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut pending = vec![class];
    while let Some(current) = pending.pop() {
        if !visited.insert(current.name.as_str()) {
            continue;
        }
        declared.extend(current.fields.iter().map(|f| f.name.as_str()));
        for base in current.effective_bases() {
            if let Some(parent) = module.class(&base) {
                pending.push(parent);
            }
        }
    }
    declared
}

/// First place a class assigns an attribute declared neither by it nor by an in-module base,
/// calls `setattr(self, ..)` or touches `self.__dict__`
fn dynamic_attribute_site(module: &Module, class: &Class) -> Option<crate::ast::Location> {
    let declared = declared_fields(module, class);
    let mut sites = Vec::new();

    for method in &class.methods {
        for stmt in &method.body {
            stmt.walk(&mut |s: &Stmt| {
                let targets: Vec<&Expr> = match &s.kind {
                    StmtKind::Assign { targets, .. } => targets.iter().collect(),
                    StmtKind::AnnAssign { target, .. } | StmtKind::AugAssign { target, .. } => {
                        vec![target]
                    }
                    _ => Vec::new(),
                };
                for target in targets {
                    if let Some(attr) = target.self_attribute() {
                        if !declared.contains(attr) {
                            sites.push(target.loc);
                        }
                    }
                }
            });
            stmt.walk_exprs(&mut |e: &Expr| match &e.kind {
                ExprKind::Call { func, args, .. }
                    if matches!(func.as_name(), Some("setattr") | Some("delattr"))
                        && args.first().and_then(Expr::as_name) == Some("self") =>
                {
                    sites.push(e.loc);
                }
                ExprKind::Attribute { value, attr }
                    if attr == "__dict__" && value.as_name() == Some("self") =>
                {
                    sites.push(e.loc);
                }
                _ => {}
            });
        }
    }
    sites.into_iter().min()
}

#[cfg(test)]
#[path = "analyzer_tests.rs"]
mod tests;
