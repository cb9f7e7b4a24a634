//! Ownership hints
//!
//! Decides how each parameter is passed (by value, shared reference, mutable reference) and
//! which methods need `&mut self`, from how the body uses the binding.

use std::collections::{BTreeSet, HashSet};

use crate::ast::{Class, Expr, ExprKind, Function, Stmt, StmtKind};
use crate::types::{Ownership, Type};

use super::builtins::MUTATING_METHODS;

/// Name at the root of an attribute/subscript chain (`x` for `x.a[0].b`)
pub fn root_name(expr: &Expr) -> Option<&str> {
    match &expr.kind {
        ExprKind::Name(name) => Some(name),
        ExprKind::Attribute { value, .. } | ExprKind::Subscript { value, .. } => root_name(value),
        _ => None,
    }
}

/// How a function body uses its bindings
#[derive(Debug, Default, Clone)]
pub struct Usage {
    /// Mutated in place: item/attribute assignment or a mutating method call
    pub mutated: HashSet<String>,
    /// Bound by plain assignment, with the number of bindings
    pub assignments: Vec<String>,
    /// Returned, stored, or aliased by another binding
    pub escaping: HashSet<String>,
    /// `self.method(...)` calls
    pub self_calls: BTreeSet<String>,
}

impl Usage {
    pub fn of(body: &[Stmt]) -> Usage {
        let mut usage = Usage::default();
        for stmt in body {
            stmt.walk(&mut |s: &Stmt| usage.statement(s));
            stmt.walk_exprs(&mut |e: &Expr| usage.expression(e));
        }
        usage
    }

    pub fn binding_count(&self, name: &str) -> usize {
        self.assignments.iter().filter(|n| *n == name).count()
    }

    fn statement(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    self.target(target);
                }
                self.escape(value);
            }
            StmtKind::AnnAssign { target, value, .. } => {
                self.target(target);
                if let Some(value) = value {
                    self.escape(value);
                }
            }
            StmtKind::AugAssign { target, .. } => match &target.kind {
                ExprKind::Name(name) => self.assignments.push(name.clone()),
                _ => {
                    if let Some(root) = root_name(target) {
                        self.mutated.insert(root.to_string());
                    }
                }
            },
            StmtKind::For { target, .. } => self.target(target),
            StmtKind::Return(Some(value)) => self.escape(value),
            _ => {}
        }
    }

    fn target(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Name(name) => self.assignments.push(name.clone()),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.target(item);
                }
            }
            _ => {
                if let Some(root) = root_name(target) {
                    self.mutated.insert(root.to_string());
                }
            }
        }
    }

    fn escape(&mut self, value: &Expr) {
        match &value.kind {
            ExprKind::Name(name) => {
                self.escaping.insert(name.clone());
            }
            ExprKind::Tuple(items) | ExprKind::List(items) | ExprKind::Set(items) => {
                for item in items {
                    self.escape(item);
                }
            }
            ExprKind::Dict(pairs) => {
                for (k, v) in pairs {
                    self.escape(k);
                    self.escape(v);
                }
            }
            _ => {}
        }
    }

    fn expression(&mut self, expr: &Expr) {
        let ExprKind::Call { func, args, .. } = &expr.kind else {
            return;
        };
        if let ExprKind::Attribute { value, attr } = &func.kind {
            if value.as_name() == Some("self") {
                self.self_calls.insert(attr.clone());
            }
            if MUTATING_METHODS.contains(&attr.as_str()) {
                if let Some(root) = root_name(value) {
                    self.mutated.insert(root.to_string());
                }
                for arg in args {
                    self.escape(arg);
                }
            }
        } else if func
            .as_name()
            .is_some_and(|n| n.starts_with(|c: char| c.is_uppercase()))
        {
            // constructor arguments are stored in the new value
            for arg in args {
                self.escape(arg);
            }
        }
    }
}

/// Ownership of one parameter and whether its binding is reassigned
pub fn param_ownership(name: &str, ty: &Type, usage: &Usage) -> (Ownership, bool) {
    let rebound = usage.binding_count(name) > 0;
    if ty.is_copy() || !ty.is_concrete() {
        return (Ownership::ByValue, rebound);
    }
    if usage.mutated.contains(name) && !rebound {
        return (Ownership::MutRef, false);
    }
    if rebound || usage.escaping.contains(name) {
        return (Ownership::ByValue, rebound);
    }
    (Ownership::ByRef, false)
}

/// Methods of a class that mutate `self`, directly or through another method
pub fn mutating_methods(class: &Class) -> BTreeSet<String> {
    let usages: Vec<(&Function, Usage)> = class
        .methods
        .iter()
        .filter(|m| m.name != "__init__" && m.takes_receiver())
        .map(|m| (m, Usage::of(&m.body)))
        .collect();

    let mut mutating: BTreeSet<String> = usages
        .iter()
        .filter(|(_, u)| u.mutated.contains("self"))
        .map(|(m, _)| m.name.clone())
        .collect();

    loop {
        let before = mutating.len();
        for (method, usage) in &usages {
            if usage.self_calls.iter().any(|c| mutating.contains(c)) {
                mutating.insert(method.name.clone());
            }
        }
        if mutating.len() == before {
            return mutating;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_source;

    fn usage(src: &str) -> Usage {
        let module = parse_source(src, "m.py").unwrap();
        let func = module.functions().next().unwrap().clone();
        Usage::of(&func.body)
    }

    #[test]
    fn test_read_only_list_is_borrowed() {
        let u = usage("def total(xs):\n    return sum(xs)\n");
        assert_eq!(
            param_ownership("xs", &Type::list(Type::int()), &u),
            (Ownership::ByRef, false)
        );
    }

    #[test]
    fn test_appended_list_is_mutable_reference() {
        let u = usage("def push(xs):\n    xs.append(1)\n");
        assert_eq!(
            param_ownership("xs", &Type::list(Type::int()), &u),
            (Ownership::MutRef, false)
        );
    }

    #[test]
    fn test_returned_value_is_owned() {
        let u = usage("def ident(s):\n    return s\n");
        assert_eq!(
            param_ownership("s", &Type::str(), &u),
            (Ownership::ByValue, false)
        );
    }

    #[test]
    fn test_rebound_parameter_is_owned_and_mut() {
        let u = usage("def shout(s):\n    s = s.upper()\n    return s\n");
        assert_eq!(param_ownership("s", &Type::str(), &u), (Ownership::ByValue, true));
    }

    #[test]
    fn test_copy_types_by_value() {
        let u = usage("def inc(n):\n    n += 1\n    return n\n");
        assert_eq!(param_ownership("n", &Type::int(), &u), (Ownership::ByValue, true));
    }

    #[test]
    fn test_mutating_methods_fixpoint() {
        let src = "\
class Counter:
    def __init__(self):
        self.n = 0

    def bump(self):
        self.n += 1

    def bump_twice(self):
        self.bump()
        self.bump()

    def get(self):
        return self.n
";
        let module = parse_source(src, "m.py").unwrap();
        let class = module.class("Counter").unwrap();
        let mutating = mutating_methods(class);
        assert!(mutating.contains("bump"));
        assert!(mutating.contains("bump_twice"));
        assert!(!mutating.contains("get"));
    }
}
