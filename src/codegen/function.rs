//! Function signatures, bodies and the per-function lowering context

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::ast::{
    Class, Decl, Expr, ExprKind, Function, Location, Param, ParamKind, Stmt, StmtKind, UnaryOp,
    Variable,
};
use crate::diagnostics::ConstructKind;
use crate::inference::ownership::{root_name, Usage};
use crate::inference::{terminates, MAIN_SCOPE};
use crate::types::{FunctionSig, Ownership, ParamSig, Type};

use super::expr::{float_literal, str_literal};
use super::{rust_ident, Lower, Lowerer, RustWriter, UnitCtx, Unsupported};

/// Error type of every generated fallible function
pub(crate) const ERROR_TYPE: &str = "Box<dyn std::error::Error>";

/// Where an error raised in the current context goes
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Exit {
    /// No error path exists
    Infallible,
    /// `?` / `return Err(..)` out of the function
    Propagate,
    /// `break 'label Err(..)` out of an attempt block
    Attempt(String),
    /// Initializer without an error path: panic with the message
    Expect(String),
}

/// What a name refers to at a use site
#[derive(Debug, Clone)]
pub(crate) enum Binding {
    Local(Type),
    /// Local of the source function with no `let` in scope at this point
    Unbound(Type),
    Param(ParamSig),
    Const(Type),
    Static(Type),
    Function,
    Class,
    SelfRef,
    HandlerError,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Receiver {
    None,
    Shared,
    Mutable,
}

impl Receiver {
    fn render(self) -> Option<&'static str> {
        match self {
            Receiver::None => None,
            Receiver::Shared => Some("&self"),
            Receiver::Mutable => Some("&mut self"),
        }
    }
}

/// Source of a generated function body
#[derive(Clone, Copy)]
pub(crate) enum Body<'b> {
    Block(&'b [Stmt]),
    /// Lambda body
    Expr(&'b Expr),
    /// Trait method declaration
    Declaration,
}

/// Everything about a function that is not its inferred signature
pub(crate) struct FnShape<'f> {
    /// Rust name
    pub name: String,
    /// Signature key (`f`, `Class.method`)
    pub qualified: String,
    /// Source parameters, receiver excluded
    pub params: &'f [Param],
    pub decorators: &'f [Expr],
    pub doc: Option<&'f str>,
    pub receiver: Receiver,
    pub vis: &'static str,
    pub is_async: bool,
    pub loc: Location,
    /// Reason the body cannot be lowered at all
    pub blocker: Option<Unsupported>,
}

impl<'f> FnShape<'f> {
    pub fn of(func: &'f Function, qualified: String, receiver: Receiver, vis: &'static str) -> Self {
        let params = if receiver == Receiver::None {
            &func.params[..]
        } else {
            func.params.get(1..).unwrap_or(&[])
        };
        Self {
            name: method_name(&func.name),
            qualified,
            params,
            decorators: &func.decorators,
            doc: func.doc.as_deref(),
            receiver,
            vis,
            is_async: func.is_async,
            loc: func.loc,
            blocker: None,
        }
    }
}

/// Rust name of a Python function or method
pub(crate) fn method_name(name: &str) -> String {
    match name {
        "__str__" => "display_text".to_string(),
        "__repr__" => "repr_text".to_string(),
        other => rust_ident(other),
    }
}

/// Lowering state of one generated function
pub(crate) struct FnCtx<'a> {
    pub lw: &'a Lowerer<'a>,
    pub unit: &'a mut UnitCtx,
    /// Inference scope key (`f`, `Class.method`, `main`, ...)
    pub scope: String,
    /// Class `self` refers to
    pub class: Option<&'a Class>,
    pub params: HashMap<String, ParamSig>,
    /// Generic type parameter standing in for each non-concrete parameter
    pub generics: HashMap<String, String>,
    pub ret: Type,
    pub ret_generic: Option<String>,
    pub fallible: bool,
    pub exit: Exit,
    pub usage: Usage,
    /// Bindings that need `mut`
    pub mutable: HashSet<String>,
    /// Locals with a `let` emitted so far
    pub declared: HashSet<String>,
    /// Closure parameters in scope (comprehensions)
    pub bound: Vec<(String, Type)>,
    pub closure_depth: usize,
    pub loop_depth: usize,
    /// Loop depth at which the innermost attempt block was opened
    pub attempt_loop_depth: Option<usize>,
    /// Python name bound by the enclosing `except ... as name`
    pub handler_name: Option<String>,
    /// Rust binding of the error in the enclosing handler
    pub active_error: Option<String>,
    /// Constructor mode: field name → local holding its value
    pub init_fields: Option<BTreeMap<String, String>>,
    /// Constructor fields assigned straight from the parameter of the same name
    pub passthrough: HashSet<String>,
    pub attempts: usize,
}

impl<'a> FnCtx<'a> {
    pub fn new(lw: &'a Lowerer<'a>, unit: &'a mut UnitCtx, scope: impl Into<String>) -> Self {
        Self {
            lw,
            unit,
            scope: scope.into(),
            class: None,
            params: HashMap::new(),
            generics: HashMap::new(),
            ret: Type::none(),
            ret_generic: None,
            fallible: false,
            exit: Exit::Infallible,
            usage: Usage::default(),
            mutable: HashSet::new(),
            declared: HashSet::new(),
            bound: Vec::new(),
            closure_depth: 0,
            loop_depth: 0,
            attempt_loop_depth: None,
            handler_name: None,
            active_error: None,
            init_fields: None,
            passthrough: HashSet::new(),
            attempts: 0,
        }
    }

    pub fn class_name(&self) -> Option<&'a str> {
        self.class.map(|c| c.name.as_str())
    }

    pub fn local_type(&self, name: &str) -> Option<&'a Type> {
        let lw: &'a Lowerer<'a> = self.lw;
        lw.inference.local_type(&self.scope, name)
    }

    /// What `name` refers to here
    pub fn binding(&self, name: &str) -> Binding {
        if self.handler_name.as_deref() == Some(name) {
            return Binding::HandlerError;
        }
        if let Some((_, ty)) = self.bound.iter().rev().find(|(n, _)| n == name) {
            return Binding::Local(ty.clone());
        }
        if let Some(param) = self.params.get(name) {
            return Binding::Param(param.clone());
        }
        if name == "self" && self.class.is_some() {
            return Binding::SelfRef;
        }
        if self.declared.contains(name) {
            return Binding::Local(self.local_type(name).cloned().unwrap_or(Type::Dynamic));
        }
        if let Some(ty) = self.local_type(name) {
            return Binding::Unbound(ty.clone());
        }
        self.module_binding(name)
    }

    fn module_binding(&self, name: &str) -> Binding {
        let lw = self.lw;
        for decl in &lw.module.body {
            match decl {
                Decl::Variable(var) if var.target == name => {
                    if is_lambda_variable(var) {
                        return Binding::Function;
                    }
                    if let Some((ty, _)) = const_literal(var) {
                        return Binding::Const(ty);
                    }
                    let ty = lw.inference.globals.get(name).cloned().unwrap_or(Type::Dynamic);
                    return Binding::Static(ty);
                }
                Decl::Function(f) if f.name == name => return Binding::Function,
                Decl::Class(c) if c.name == name => return Binding::Class,
                _ => {}
            }
        }
        Binding::Unknown
    }

    /// Module variables lower to immutable statics
    pub fn not_static(&self, place: &Expr) -> Lower<()> {
        match root_name(place) {
            Some(root) if matches!(self.binding(root), Binding::Static(_)) => Err(Unsupported::new(
                place.loc,
                format!("in-place change to module variable `{}`", root),
            )),
            _ => Ok(()),
        }
    }

    pub fn needs_mut(&self, name: &str) -> bool {
        self.usage.binding_count(name) > 1 || self.mutable.contains(name)
    }

    /// Bindings that are mutated in place or handed out as `&mut`
    pub fn collect_mutable(&mut self, body: &[Stmt]) {
        let lw = self.lw;
        let class = self.class_name();
        let mut found: HashSet<String> = self.usage.mutated.clone();
        for stmt in body {
            stmt.walk_exprs(&mut |e: &Expr| {
                let ExprKind::Call { func, args, .. } = &e.kind else {
                    return;
                };
                let Some(callee) = lw.inference.resolve_call(lw.module, class, func) else {
                    return;
                };
                if lw.inference.mutating.contains(&callee) {
                    if let ExprKind::Attribute { value, .. } = &func.kind {
                        if let Some(root) = root_name(value) {
                            found.insert(root.to_string());
                        }
                    }
                }
                if let Some(sig) = lw.inference.signature(&callee) {
                    for (param, arg) in sig.params.iter().zip(args) {
                        if param.ownership == Ownership::MutRef {
                            if let Some(root) = root_name(arg) {
                                found.insert(root.to_string());
                            }
                        }
                    }
                }
            });
        }
        self.mutable.extend(found);
    }

    // ========================================================================
    // Signatures
    // ========================================================================

    fn param_type(&self, param: &ParamSig) -> Option<String> {
        match param.ownership {
            Ownership::ByValue => param.ty.to_rust(),
            Ownership::ByRef => param.ty.to_rust_borrowed(),
            Ownership::MutRef => param.ty.to_rust().map(|t| format!("&mut {}", t)),
        }
    }

    /// Return type, re-derived from the final signatures when inference left it open
    fn resolved_return(&self, sig: &FunctionSig, body: Body<'_>) -> Type {
        if sig.ret.is_concrete() {
            return sig.ret.clone();
        }
        let mut joined: Option<Type> = None;
        for value in return_values(body) {
            let ty = match value {
                Some(e) => self.ty(e),
                None => Type::none(),
            };
            joined = match joined {
                None => Some(ty),
                Some(acc) => match acc.join(&ty) {
                    Some(t) => Some(t),
                    None => return sig.ret.clone(),
                },
            };
        }
        joined.filter(Type::is_concrete).unwrap_or_else(|| sig.ret.clone())
    }

    /// Generic parameter returned by every `return`
    fn generic_return(&self, body: Body<'_>) -> Option<String> {
        let mut found: Option<String> = None;
        for value in return_values(body) {
            let name = value.and_then(Expr::as_name)?;
            let generic = self.generics.get(name)?;
            match &found {
                Some(g) if g != generic => return None,
                _ => found = Some(generic.clone()),
            }
        }
        found
    }

    /// Render the `fn` header and set up parameters, return type and error path
    pub fn header(&mut self, w: &mut RustWriter, shape: &FnShape<'_>, sig: &FunctionSig, body: Body<'_>) -> String {
        let lw = self.lw;
        self.fallible = lw.inference.is_fallible(&shape.qualified);
        self.exit = if self.fallible {
            Exit::Propagate
        } else {
            Exit::Infallible
        };

        let mut rendered: Vec<String> = shape.receiver.render().map(str::to_string).into_iter().collect();
        let mut generic_names: Vec<String> = Vec::new();
        for param in &sig.params {
            let source = shape.params.iter().find(|p| p.name == param.name);
            if source.is_some_and(|p| matches!(p.kind, ParamKind::VarArgs | ParamKind::KwArgs)) {
                continue;
            }
            self.params.insert(param.name.clone(), param.clone());
            let ty = match self.param_type(param) {
                Some(ty) => ty,
                None => {
                    let loc = source.map(|p| p.loc).unwrap_or(shape.loc);
                    if !self.unit.has_finding_at(loc) {
                        self.unit.raise_finding(
                            ConstructKind::DuckTypedParameter,
                            loc,
                            &format!("{}` of `{}", param.name, shape.qualified),
                        );
                    }
                    let generic = format!("T{}", generic_names.len());
                    self.generics.insert(param.name.clone(), generic.clone());
                    generic_names.push(generic.clone());
                    generic
                }
            };
            let mutable = param.ownership == Ownership::ByValue
                && (param.rebound || self.mutable.contains(&param.name));
            rendered.push(format!(
                "{}{}: {}",
                if mutable { "mut " } else { "" },
                rust_ident(&param.name),
                ty
            ));
        }

        let ret = self.resolved_return(sig, body);
        let ret_code = if ret.is_concrete() {
            self.ret = ret.clone();
            if ret == Type::none() {
                None
            } else {
                ret.to_rust()
            }
        } else if let Some(generic) = self.generic_return(body) {
            self.ret = Type::Dynamic;
            self.ret_generic = Some(generic.clone());
            Some(generic)
        } else {
            self.ret = Type::Dynamic;
            let unsupported = Unsupported::new(
                shape.loc,
                format!("return type of `{}`", shape.qualified),
            );
            self.unit.placeholder_item(w, &unsupported);
            Some("impl Sized".to_string())
        };

        let generics = if generic_names.is_empty() {
            String::new()
        } else {
            let bounds: Vec<String> = generic_names.iter().map(|g| format!("{}: Clone", g)).collect();
            format!("<{}>", bounds.join(", "))
        };
        let ret_part = match (self.fallible, ret_code) {
            (true, Some(t)) => format!(" -> Result<{}, {}>", t, ERROR_TYPE),
            (true, None) => format!(" -> Result<(), {}>", ERROR_TYPE),
            (false, Some(t)) => format!(" -> {}", t),
            (false, None) => String::new(),
        };
        format!(
            "{}fn {}{}({}){}",
            shape.vis,
            shape.name,
            generics,
            rendered.join(", "),
            ret_part
        )
    }

    /// Lower a whole function: doc, header and body
    pub fn emit_function(&mut self, w: &mut RustWriter, shape: &FnShape<'_>, sig: &FunctionSig, body: Body<'_>) {
        if let Body::Block(stmts) = body {
            self.usage = Usage::of(stmts);
            self.collect_mutable(stmts);
        }
        w.doc(shape.doc);
        self.decorator_notes(w, shape.decorators);

        let blocker = shape.blocker.clone().or_else(|| self.shape_blocker(shape, body));
        let header = self.header(w, shape, sig, body);
        if let Body::Declaration = body {
            w.line(format!("{};", header));
            return;
        }
        w.open(header);
        match (blocker, body) {
            (Some(unsupported), _) => self.unit.placeholder(w, &unsupported),
            (None, Body::Block(stmts)) => self.block_body(w, stmts),
            (None, Body::Expr(e)) => match self.return_value(e) {
                Ok(code) => w.line(code),
                Err(unsupported) => self.unit.placeholder(w, &unsupported),
            },
            (None, Body::Declaration) => {}
        }
        w.close();
        debug!("Lowered fn {}", shape.qualified);
    }

    fn decorator_notes(&mut self, w: &mut RustWriter, decorators: &[Expr]) {
        for decorator in decorators {
            let reference = self
                .unit
                .findings
                .iter()
                .find(|f| f.kind == ConstructKind::CustomDecorator && f.location == decorator.loc)
                .map(|f| f.reference());
            if let Some(reference) = reference {
                let name = decorator.dotted_name().unwrap_or_else(|| "<expression>".to_string());
                w.comment(format!("@{} is not applied, see {}", name, reference));
            }
        }
    }

    /// Function shapes with no statement-level lowering at all
    pub fn shape_blocker(&self, shape: &FnShape<'_>, body: Body<'_>) -> Option<Unsupported> {
        if shape.is_async {
            return Some(Unsupported::new(
                shape.loc,
                format!("async function `{}`", shape.qualified),
            ));
        }
        if let Some(p) = shape
            .params
            .iter()
            .find(|p| matches!(p.kind, ParamKind::VarArgs | ParamKind::KwArgs))
        {
            return Some(Unsupported::new(p.loc, format!("variadic parameter `{}`", p.name)));
        }
        if let Body::Block(stmts) = body {
            let mut generator = None;
            for stmt in stmts {
                stmt.walk_exprs(&mut |e: &Expr| {
                    if generator.is_none()
                        && matches!(&e.kind, ExprKind::Other { kind, .. } if kind.starts_with("yield"))
                    {
                        generator = Some(e.loc);
                    }
                });
            }
            if let Some(loc) = generator {
                return Some(Unsupported::new(
                    loc,
                    format!("generator function `{}`", shape.qualified),
                ));
            }
        }
        None
    }

    // ========================================================================
    // Bodies
    // ========================================================================

    /// Function body: hoisted declarations, statements and the tail expression
    pub fn block_body(&mut self, w: &mut RustWriter, stmts: &[Stmt]) {
        self.hoist(w, stmts);
        let Some((last, init)) = stmts.split_last() else {
            return;
        };
        for stmt in init {
            self.stmt_or_placeholder(w, stmt);
        }
        match &last.kind {
            StmtKind::Return(Some(value)) if !matches!(value.kind, ExprKind::NoneLit) => {
                match self.return_value(value) {
                    Ok(code) => w.line(code),
                    Err(unsupported) => self.unit.placeholder(w, &unsupported),
                }
                return;
            }
            StmtKind::Return(_) => {}
            _ => {
                self.stmt_or_placeholder(w, last);
                if terminates(stmts) {
                    return;
                }
            }
        }
        let optional = self.ret.optional_inner().is_some();
        match (self.fallible, optional) {
            (true, true) => w.line("Ok(None)"),
            (true, false) => w.line("Ok(())"),
            (false, true) => w.line("None"),
            (false, false) => {}
        }
    }

    /// Lower one statement, or a placeholder in its place
    pub fn stmt_or_placeholder(&mut self, w: &mut RustWriter, stmt: &Stmt) {
        let mark = self.unit.findings.len();
        let mut child = w.child();
        match self.stmt(&mut child, stmt) {
            Ok(()) => w.append(child),
            Err(unsupported) => {
                debug!("No lowering for {} at {}", unsupported.what, unsupported.loc);
                self.unit.findings.truncate(mark);
                self.unit.placeholder(w, &unsupported);
            }
        }
    }

    /// Returned value with the function's wrapping applied
    pub fn return_value(&mut self, value: &Expr) -> Lower<String> {
        let code = if self.ret_generic.is_some() {
            self.value_move(value)?
        } else {
            let ret = self.ret.clone();
            self.coerce_move(value, &ret)?
        };
        Ok(if self.fallible {
            format!("Ok({})", code)
        } else {
            code
        })
    }

    /// `let` for every local first bound inside a nested block that is bound on every path
    /// through that block and has a Rust type. Anything else gets its `let` at the binding
    /// site and goes out of scope with its block.
    pub fn hoist(&mut self, w: &mut RustWriter, body: &[Stmt]) {
        let mut order: Vec<(String, usize, bool)> = Vec::new();
        collect_bindings(body, 0, &mut order);
        for (name, depth, loop_target) in order {
            if depth == 0 || loop_target || self.params.contains_key(&name) || self.declared.contains(&name) {
                continue;
            }
            let Some(ty) = self.local_type(&name).and_then(Type::to_rust) else {
                debug!("Not hoisting `{}`: no Rust type", name);
                continue;
            };
            let Some(first) = body.iter().find(|s| binds_name(s, &name)) else {
                continue;
            };
            if !self.always_binds(std::slice::from_ref(first), &|t: &Expr| t.as_name() == Some(name.as_str())) {
                debug!("Not hoisting `{}`: not bound on every path", name);
                continue;
            }
            let mutability = if self.needs_mut(&name) { "mut " } else { "" };
            w.line(format!("let {}{}: {};", mutability, rust_ident(&name), ty));
            self.declared.insert(name);
        }
    }

    /// Every path through `body` that reaches its end assigns a target matching `is_target`
    pub fn always_binds(&self, body: &[Stmt], is_target: &dyn Fn(&Expr) -> bool) -> bool {
        for stmt in body {
            if self.stmt_binds(stmt, is_target) {
                return true;
            }
            if matches!(
                stmt.kind,
                StmtKind::Return(_) | StmtKind::Raise { .. } | StmtKind::Break | StmtKind::Continue
            ) {
                return true;
            }
        }
        false
    }

    fn stmt_binds(&self, stmt: &Stmt, is_target: &dyn Fn(&Expr) -> bool) -> bool {
        let lw = self.lw;
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => targets.iter().any(|t| target_matches(t, is_target)),
            StmtKind::AnnAssign {
                target,
                value: Some(_),
                ..
            }
            | StmtKind::AugAssign { target, .. } => target_matches(target, is_target),
            StmtKind::If { body, orelse, .. } => {
                self.always_binds(body, is_target) && self.always_binds(orelse, is_target)
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                if self.always_binds(finalbody, is_target) {
                    return true;
                }
                // assignments inside an attempt block are not definite past it
                if handlers.is_empty() {
                    !lw.inference.block_may_fail(lw.module, self.class_name(), body)
                        && (self.always_binds(body, is_target) || self.always_binds(orelse, is_target))
                } else {
                    self.always_binds(orelse, is_target)
                        && handlers.iter().all(|h| self.always_binds(&h.body, is_target))
                }
            }
            _ => false,
        }
    }
}

fn target_matches(target: &Expr, is_target: &dyn Fn(&Expr) -> bool) -> bool {
    match &target.kind {
        ExprKind::Tuple(items) | ExprKind::List(items) => items.iter().any(|t| target_matches(t, is_target)),
        _ => is_target(target),
    }
}

/// `stmt` or a block nested in it binds `name`
fn binds_name(stmt: &Stmt, name: &str) -> bool {
    let mut order = Vec::new();
    collect_bindings(std::slice::from_ref(stmt), 0, &mut order);
    order.iter().any(|(n, _, _)| n == name)
}

/// Names bound by assignment or loop targets, in first-binding order, with nesting depth
pub(crate) fn collect_bindings(body: &[Stmt], depth: usize, out: &mut Vec<(String, usize, bool)>) {
    fn names(target: &Expr, acc: &mut Vec<String>) {
        match &target.kind {
            ExprKind::Name(n) => acc.push(n.clone()),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    names(item, acc);
                }
            }
            _ => {}
        }
    }
    for stmt in body {
        let mut bound = Vec::new();
        let mut is_loop = false;
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                for t in targets {
                    names(t, &mut bound);
                }
            }
            StmtKind::AnnAssign {
                target,
                value: Some(_),
                ..
            }
            | StmtKind::AugAssign { target, .. } => names(target, &mut bound),
            StmtKind::For { target, .. } => {
                names(target, &mut bound);
                is_loop = true;
            }
            _ => {}
        }
        for name in bound {
            if !out.iter().any(|(n, _, _)| *n == name) {
                out.push((name, depth, is_loop));
            }
        }
        for block in stmt.blocks() {
            collect_bindings(block, depth + 1, out);
        }
    }
}

/// Every `return` value in a body (`None` for a bare `return`)
fn return_values(body: Body<'_>) -> Vec<Option<&Expr>> {
    match body {
        Body::Expr(e) => vec![Some(e)],
        Body::Declaration => Vec::new(),
        Body::Block(stmts) => {
            let mut out = Vec::new();
            for stmt in stmts {
                stmt.walk(&mut |s: &Stmt| {
                    if let StmtKind::Return(value) = &s.kind {
                        out.push(value.as_ref().filter(|v| !matches!(v.kind, ExprKind::NoneLit)));
                    }
                });
            }
            out
        }
    }
}

pub(crate) fn is_lambda_variable(var: &Variable) -> bool {
    matches!(
        var.value.as_ref().map(|v| &v.kind),
        Some(ExprKind::Lambda { .. })
    )
}

/// `NAME = <literal>` that becomes a `pub const`, with its type and Rust literal
pub(crate) fn const_literal(var: &Variable) -> Option<(Type, String)> {
    let value = var.value.as_ref()?;
    let (ty, literal) = match &value.kind {
        ExprKind::Int(v) => (Type::int(), v.to_string()),
        ExprKind::Float(v) => (Type::float(), float_literal(*v)),
        ExprKind::Str(s) => (Type::str(), str_literal(s)),
        ExprKind::Bool(b) => (Type::bool(), b.to_string()),
        ExprKind::UnaryOp {
            op: UnaryOp::Neg,
            operand,
        } => match operand.kind {
            ExprKind::Int(v) => (Type::int(), format!("-{}", v)),
            ExprKind::Float(v) => (Type::float(), format!("-{}", float_literal(v))),
            _ => return None,
        },
        _ => return None,
    };
    match &var.annotation {
        Some(a) if Type::from_annotation(a) != ty => None,
        _ => Some((ty, literal)),
    }
}

// ============================================================================
// Module-level items
// ============================================================================

impl<'a> Lowerer<'a> {
    pub(super) fn function(&self, w: &mut RustWriter, unit: &mut UnitCtx, func: &Function) {
        let Some(sig) = self.inference.signature(&func.name) else {
            return;
        };
        let mut ctx = FnCtx::new(self, unit, func.name.clone());
        let shape = FnShape::of(func, func.name.clone(), Receiver::None, "pub ");
        ctx.emit_function(w, &shape, sig, Body::Block(&func.body));
    }
}

pub(super) fn lower_variable(lw: &Lowerer<'_>, w: &mut RustWriter, unit: &mut UnitCtx, var: &Variable) {
    let name = rust_ident(&var.target);
    let Some(value) = &var.value else {
        w.comment(format!("`{}` is declared without a value", var.target));
        return;
    };

    if let ExprKind::Lambda { params, body } = &value.kind {
        let Some(sig) = lw.inference.signature(&var.target) else {
            return;
        };
        let mut ctx = FnCtx::new(lw, unit, var.target.clone());
        let shape = FnShape {
            name,
            qualified: var.target.clone(),
            params,
            decorators: &[],
            doc: None,
            receiver: Receiver::None,
            vis: "pub ",
            is_async: false,
            loc: var.loc,
            blocker: None,
        };
        ctx.emit_function(w, &shape, sig, Body::Expr(body));
        return;
    }

    if let Some((ty, literal)) = const_literal(var) {
        let rust_ty = if ty.is_str() {
            "&str".to_string()
        } else {
            ty.to_rust().unwrap_or_default()
        };
        allow_lowercase(w, &name);
        w.line(format!("pub const {}: {} = {};", name, rust_ty, literal));
        return;
    }

    let ty = lw
        .inference
        .globals
        .get(&var.target)
        .cloned()
        .unwrap_or(Type::Dynamic);
    let mut ctx = FnCtx::new(lw, unit, String::new());
    ctx.exit = Exit::Expect(format!("initializer of `{}` failed", var.target));
    let Some(rust_ty) = ty.to_rust() else {
        let unsupported = Unsupported::new(var.loc, format!("type of module variable `{}`", var.target));
        ctx.unit.placeholder_item(w, &unsupported);
        return;
    };
    let mark = ctx.unit.findings.len();
    let code = match ctx.coerce(value, &ty) {
        Ok(code) => code,
        Err(unsupported) => {
            ctx.unit.findings.truncate(mark);
            ctx.unit.placeholder_item(w, &unsupported);
            format!("todo!({:?})", unsupported.what)
        }
    };
    allow_lowercase(w, &name);
    w.line(format!(
        "pub static {}: std::sync::LazyLock<{}> = std::sync::LazyLock::new(|| {});",
        name, rust_ty, code
    ));
}

/// Python module globals keep their source spelling
fn allow_lowercase(w: &mut RustWriter, name: &str) {
    if name.chars().any(|c| c.is_ascii_lowercase()) {
        w.line("#[allow(non_upper_case_globals)]");
    }
}

/// `if __name__ == "__main__":` block
pub(super) fn lower_entry_point(lw: &Lowerer<'_>, w: &mut RustWriter, unit: &mut UnitCtx, stmt: &Stmt) {
    let StmtKind::If { body, .. } = &stmt.kind else {
        return;
    };
    let name = if lw.module.function("main").is_some() {
        if calls_only_main(body) {
            w.comment("Entry point: the source module's `main` above is the program entry");
            return;
        }
        w.comment("Body of the source module's `__main__` block");
        "module_main"
    } else {
        "main"
    };
    lower_statement_fn(lw, w, unit, name, MAIN_SCOPE, body);
}

/// Executable module-level statement
pub(super) fn lower_module_statement(
    lw: &Lowerer<'_>,
    w: &mut RustWriter,
    unit: &mut UnitCtx,
    stmt: &Stmt,
    scope: &str,
) {
    lower_statement_fn(lw, w, unit, scope, scope, std::slice::from_ref(stmt));
}

fn lower_statement_fn(
    lw: &Lowerer<'_>,
    w: &mut RustWriter,
    unit: &mut UnitCtx,
    name: &str,
    scope: &str,
    body: &[Stmt],
) {
    let mut ctx = FnCtx::new(lw, unit, scope);
    ctx.fallible = lw.inference.block_may_fail(lw.module, None, body);
    ctx.exit = if ctx.fallible {
        Exit::Propagate
    } else {
        Exit::Infallible
    };
    ctx.usage = Usage::of(body);
    ctx.collect_mutable(body);
    let ret = if ctx.fallible {
        format!(" -> Result<(), {}>", ERROR_TYPE)
    } else {
        String::new()
    };
    w.open(format!("pub fn {}(){}", name, ret));
    ctx.block_body(w, body);
    w.close();
}

/// `main()` or `sys.exit(main())`
fn calls_only_main(body: &[Stmt]) -> bool {
    let [stmt] = body else { return false };
    let StmtKind::Expr(expr) = &stmt.kind else {
        return false;
    };
    let is_main_call = |e: &Expr| {
        matches!(&e.kind, ExprKind::Call { func, args, .. } if func.as_name() == Some("main") && args.is_empty())
    };
    match &expr.kind {
        ExprKind::Call { func, args, .. } if func.dotted_name().as_deref() == Some("sys.exit") => {
            args.len() == 1 && is_main_call(&args[0])
        }
        _ => is_main_call(expr),
    }
}
