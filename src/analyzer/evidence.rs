//! Call-site evidence
//!
//! Types of literal arguments passed to module functions, methods and constructors, keyed by
//! callee and parameter name. Shared by the duck-typing rule and by inference.

use std::collections::{BTreeMap, HashMap};

use crate::ast::{Class, Expr, ExprKind, Function, Module, Param, ParamKind, UnaryOp};
use crate::types::Type;

/// Type of a literal expression, if it has one
pub fn literal_type(expr: &Expr) -> Option<Type> {
    match &expr.kind {
        ExprKind::Int(_) => Some(Type::int()),
        ExprKind::Float(_) => Some(Type::float()),
        ExprKind::Str(_) | ExprKind::FString(_) => Some(Type::str()),
        ExprKind::Bool(_) => Some(Type::bool()),
        ExprKind::NoneLit => Some(Type::none()),
        ExprKind::UnaryOp {
            op: UnaryOp::Neg | UnaryOp::Pos,
            operand,
        } => literal_type(operand).filter(Type::is_numeric),
        ExprKind::List(items) => uniform(items).map(Type::list),
        ExprKind::Set(items) => uniform(items).map(Type::set),
        ExprKind::Tuple(items) => items
            .iter()
            .map(literal_type)
            .collect::<Option<Vec<_>>>()
            .map(Type::tuple),
        ExprKind::Dict(pairs) => {
            let keys: Vec<Expr> = pairs.iter().map(|(k, _)| k.clone()).collect();
            let values: Vec<Expr> = pairs.iter().map(|(_, v)| v.clone()).collect();
            Some(Type::dict(uniform(&keys)?, uniform(&values)?))
        }
        _ => None,
    }
}

/// Common literal type of a non-empty collection
fn uniform(items: &[Expr]) -> Option<Type> {
    let mut types = items.iter().map(literal_type);
    let first = types.next()??;
    for ty in types {
        if ty? != first {
            return None;
        }
    }
    Some(first)
}

/// Callee name → parameter name → observed argument types
#[derive(Debug, Clone, Default)]
pub struct CallSiteIndex {
    params: HashMap<String, Vec<String>>,
    evidence: HashMap<String, BTreeMap<String, Vec<Type>>>,
}

impl CallSiteIndex {
    pub fn build(module: &Module) -> Self {
        let mut index = CallSiteIndex::default();

        for func in module.functions() {
            index.params.insert(func.name.clone(), positional_names(func, false));
        }
        for decl in &module.body {
            if let crate::ast::Decl::Variable(var) = decl {
                if let Some(params) = lambda_params(module, &var.target) {
                    let names = params
                        .iter()
                        .filter(|p| p.kind == ParamKind::Positional)
                        .map(|p| p.name.clone())
                        .collect();
                    index.params.insert(var.target.clone(), names);
                }
            }
        }
        for class in module.classes() {
            index
                .params
                .insert(format!("{}.__init__", class.name), constructor_params(class));
            for method in &class.methods {
                index.params.insert(
                    format!("{}.{}", class.name, method.name),
                    positional_names(method, method.takes_receiver()),
                );
            }
        }

        for decl in &module.body {
            let enclosing = match decl {
                crate::ast::Decl::Class(c) => Some(c.name.as_str()),
                _ => None,
            };
            decl.walk_exprs(&mut |expr: &Expr| index.record(module, enclosing, expr));
        }
        index
    }

    fn record(&mut self, module: &Module, enclosing: Option<&str>, expr: &Expr) {
        let ExprKind::Call {
            func,
            args,
            keywords,
        } = &expr.kind
        else {
            return;
        };
        let Some(callee) = resolve_callee(module, enclosing, func) else {
            return;
        };
        let Some(names) = self.params.get(&callee).cloned() else {
            return;
        };
        let slot = self.evidence.entry(callee).or_default();
        for (arg, name) in args.iter().zip(names.iter()) {
            if matches!(arg.kind, ExprKind::Starred(_)) {
                break;
            }
            if let Some(ty) = argument_type(module, arg) {
                slot.entry(name.clone()).or_default().push(ty);
            }
        }
        for kw in keywords {
            let Some(name) = &kw.name else { continue };
            if names.contains(name) {
                if let Some(ty) = argument_type(module, &kw.value) {
                    slot.entry(name.clone()).or_default().push(ty);
                }
            }
        }
    }

    /// Every observed argument type for a parameter, in source order
    pub fn observed(&self, callee: &str, param: &str) -> &[Type] {
        self.evidence
            .get(callee)
            .and_then(|m| m.get(param))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Agreed type across call sites; `Dynamic` when call sites disagree
    pub fn resolved(&self, callee: &str, param: &str) -> Option<Type> {
        let observed = self.observed(callee, param);
        let first = observed.first()?;
        if observed.iter().all(|t| t == first) {
            Some(first.clone())
        } else {
            Some(Type::Dynamic)
        }
    }

    pub fn has_evidence(&self, callee: &str, param: &str) -> bool {
        !self.observed(callee, param).is_empty()
    }
}

fn positional_names(func: &Function, skip_receiver: bool) -> Vec<String> {
    func.params
        .iter()
        .skip(usize::from(skip_receiver))
        .filter(|p| matches!(p.kind, ParamKind::Positional | ParamKind::KeywordOnly))
        .map(|p| p.name.clone())
        .collect()
}

/// `__init__` parameters, or the declared fields of a dataclass
fn constructor_params(class: &Class) -> Vec<String> {
    match class.method("__init__") {
        Some(init) => positional_names(init, true),
        None if class.is_dataclass() => class
            .fields
            .iter()
            .filter(|f| !f.from_init)
            .map(|f| f.name.clone())
            .collect(),
        None => Vec::new(),
    }
}

/// Parameters of a module-level `name = lambda ...` binding
pub fn lambda_params<'m>(module: &'m Module, name: &str) -> Option<&'m [Param]> {
    module.body.iter().find_map(|decl| match decl {
        crate::ast::Decl::Variable(var) if var.target == name => match &var.value {
            Some(Expr {
                kind: ExprKind::Lambda { params, .. },
                ..
            }) => Some(params.as_slice()),
            _ => None,
        },
        _ => None,
    })
}

fn resolve_callee(module: &Module, enclosing: Option<&str>, func: &Expr) -> Option<String> {
    match &func.kind {
        ExprKind::Name(name) => {
            if module.function(name).is_some() {
                Some(name.clone())
            } else if module.class(name).is_some() {
                Some(format!("{}.__init__", name))
            } else if lambda_params(module, name).is_some() {
                Some(name.clone())
            } else {
                None
            }
        }
        ExprKind::Attribute { value, attr } => match value.as_name() {
            Some("self") | Some("cls") => enclosing.map(|class| format!("{}.{}", class, attr)),
            Some(name) if module.class(name).is_some() => Some(format!("{}.{}", name, attr)),
            _ => None,
        },
        _ => None,
    }
}

fn argument_type(module: &Module, arg: &Expr) -> Option<Type> {
    if let ExprKind::Call { func, .. } = &arg.kind {
        if let Some(name) = func.as_name() {
            if module.class(name).is_some() {
                return Some(Type::Named(name.to_string()));
            }
        }
    }
    literal_type(arg).filter(|t| *t != Type::none())
}
