//! Type inference engine
//!
//! One forward pass per function body, in module order. Types come from, in priority order:
//! declared annotations, literal expressions, signatures of callees inferred earlier in the
//! module, and call-site evidence for unannotated parameters. Anything else is
//! [`Type::Unresolved`]. There is no fixpoint: a function's own signature is registered only
//! after its body is inferred, so recursion and forward references stay unresolved.
//!
//! Disagreeing types at a join point (if/else, loop exit, try/except, conditional
//! expression, rebinding) widen to [`Type::Dynamic`] and produce an `InferenceAmbiguity`
//! finding.

pub mod builtins;
pub mod ownership;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::{debug, info};

use crate::analyzer::evidence::literal_type;
use crate::analyzer::{is_main_guard, rule, CallSiteIndex};
use crate::ast::{
    BinOp, BoolOp, Class, Decl, Expr, ExprId, ExprKind, FStringPart, Function, Location,
    Module, Param, ParamKind, Stmt, StmtKind, UnaryOp,
};
use crate::diagnostics::{ConstructKind, Finding, Origin};
use crate::error::Result;
use crate::mappings;
use crate::types::{FunctionSig, Ownership, ParamSig, PrimitiveKind, Type};

use ownership::{param_ownership, Usage};

/// Variable name → type
pub type Env = BTreeMap<String, Type>;

/// Everything inference learned about a module. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct Inference {
    types: HashMap<ExprId, Type>,
    /// Keyed by qualified name (`f`, `Class.method`, `Class.__init__`)
    pub signatures: BTreeMap<String, FunctionSig>,
    /// Field types per class, in declaration order
    pub fields: BTreeMap<String, Vec<(String, Type)>>,
    /// Final types of the bindings of each scope
    pub locals: BTreeMap<String, Env>,
    pub globals: Env,
    /// Single in-module base class of each derived class
    pub bases: BTreeMap<String, String>,
    /// Methods (`Class.method`) that need `&mut self`
    pub mutating: BTreeSet<String>,
    /// Functions and methods that can raise
    pub fallible: BTreeSet<String>,
    pub findings: Vec<Finding>,
}

/// Scope name used for the `if __name__ == "__main__":` block
pub const MAIN_SCOPE: &str = "main";

/// Scope name of a module-level statement
pub fn statement_scope(stmt: &Stmt) -> String {
    if is_main_guard(stmt) {
        MAIN_SCOPE.to_string()
    } else {
        format!("module_statement_{}", stmt.loc.line)
    }
}

impl Inference {
    /// Type of an expression node; nodes outside the traversal are `Dynamic`
    pub fn type_of(&self, expr: &Expr) -> Type {
        self.types.get(&expr.id).cloned().unwrap_or(Type::Dynamic)
    }

    pub fn has_type(&self, id: ExprId) -> bool {
        self.types.contains_key(&id)
    }

    pub fn signature(&self, qualified: &str) -> Option<&FunctionSig> {
        self.signatures.get(qualified)
    }

    pub fn local_type(&self, scope: &str, name: &str) -> Option<&Type> {
        self.locals.get(scope).and_then(|env| env.get(name))
    }

    pub fn is_fallible(&self, qualified: &str) -> bool {
        self.fallible.contains(qualified)
    }

    /// `Owner.method` for a method looked up on `class`, following in-module bases
    pub fn method_owner(&self, class: &str, method: &str) -> Option<String> {
        let mut current = Some(class.to_string());
        let mut guard = 0;
        while let Some(name) = current {
            let key = format!("{}.{}", name, method);
            if self.signatures.contains_key(&key) {
                return Some(key);
            }
            current = self.bases.get(&name).cloned();
            guard += 1;
            if guard > self.bases.len() {
                break;
            }
        }
        None
    }

    /// Field type looked up on `class`, following in-module bases
    pub fn field_type(&self, class: &str, field: &str) -> Option<Type> {
        let mut current = Some(class.to_string());
        let mut guard = 0;
        while let Some(name) = current {
            if let Some(ty) = self
                .fields
                .get(&name)
                .and_then(|fs| fs.iter().find(|(n, _)| n == field))
                .map(|(_, t)| t.clone())
            {
                return Some(ty);
            }
            current = self.bases.get(&name).cloned();
            guard += 1;
            if guard > self.bases.len() {
                break;
            }
        }
        None
    }

    /// Qualified name of the module function/method/constructor a call resolves to
    pub fn resolve_call(&self, module: &Module, class: Option<&str>, func: &Expr) -> Option<String> {
        match &func.kind {
            ExprKind::Name(name) => {
                if module.function(name).is_some() {
                    Some(name.clone())
                } else if module.class(name).is_some() {
                    Some(format!("{}.__init__", name))
                } else {
                    None
                }
            }
            ExprKind::Attribute { value, attr } => {
                let owner = match value.as_name() {
                    Some("self") | Some("cls") => class.map(str::to_string),
                    Some(name) if module.class(name).is_some() => Some(name.to_string()),
                    _ => match self.type_of(value) {
                        Type::Named(name) if module.class(&name).is_some() => Some(name),
                        _ => None,
                    },
                }?;
                self.method_owner(&owner, attr)
            }
            _ => None,
        }
    }

    /// True when executing `block` can raise out of it
    pub fn block_may_fail(&self, module: &Module, class: Option<&str>, block: &[Stmt]) -> bool {
        block.iter().any(|stmt| self.stmt_may_fail(module, class, stmt))
    }

    fn stmt_may_fail(&self, module: &Module, class: Option<&str>, stmt: &Stmt) -> bool {
        match &stmt.kind {
            StmtKind::Raise { .. } => return true,
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let body_escapes = handlers.is_empty() && self.block_may_fail(module, class, body);
                return body_escapes
                    || handlers
                        .iter()
                        .any(|h| self.block_may_fail(module, class, &h.body))
                    || self.block_may_fail(module, class, orelse)
                    || self.block_may_fail(module, class, finalbody);
            }
            _ => {}
        }
        let direct = stmt
            .exprs()
            .into_iter()
            .any(|e| self.expr_may_fail(module, class, e));
        direct
            || stmt
                .blocks()
                .into_iter()
                .any(|b| self.block_may_fail(module, class, b))
    }

    /// True when evaluating `expr` can raise
    pub fn expr_may_fail(&self, module: &Module, class: Option<&str>, expr: &Expr) -> bool {
        let mut fails = false;
        expr.walk(&mut |e: &Expr| {
            if fails {
                return;
            }
            if let ExprKind::Call { func, args, .. } = &e.kind {
                if self.call_may_fail(module, class, func, args) {
                    fails = true;
                }
            }
        });
        fails
    }

    /// A single call that can raise: a fallible module callable, or `int`/`float` on a string
    pub fn call_may_fail(
        &self,
        module: &Module,
        class: Option<&str>,
        func: &Expr,
        args: &[Expr],
    ) -> bool {
        if let Some(name) = func.as_name() {
            if matches!(name, "int" | "float")
                && args.first().is_some_and(|a| self.type_of(a).is_str())
            {
                return true;
            }
        }
        self.resolve_call(module, class, func)
            .is_some_and(|callee| self.fallible.contains(&callee))
    }
}

/// Infer types for a module
pub fn infer(module: &Module) -> Result<Inference> {
    module.validate()?;
    info!("Inferring types for module '{}'", module.name);

    let mut engine = Engine {
        module,
        evidence: CallSiteIndex::build(module),
        out: Inference::default(),
        unit: 0,
        class: None,
        method: String::new(),
        returns: Vec::new(),
        declared: HashSet::new(),
    };
    engine.run();
    let mut out = engine.out;
    out.fallible = fallibility(module, &out);

    debug!(
        "Inferred {} expression types, {} signatures, {} ambiguity findings",
        out.types.len(),
        out.signatures.len(),
        out.findings.len()
    );
    Ok(out)
}

/// Fixpoint over functions and methods: raising, or calling something that raises
fn fallibility(module: &Module, inference: &Inference) -> BTreeSet<String> {
    let mut bodies: Vec<(String, Option<&str>, &[Stmt])> = Vec::new();
    for decl in &module.body {
        match decl {
            Decl::Function(f) => bodies.push((f.name.clone(), None, &f.body)),
            Decl::Class(c) => {
                for m in &c.methods {
                    bodies.push((format!("{}.{}", c.name, m.name), Some(c.name.as_str()), &m.body));
                }
                // An inherited constructor runs the base body
                if c.method("__init__").is_none() && !c.is_dataclass() {
                    let owner = inference
                        .bases
                        .get(&c.name)
                        .and_then(|base| inference.method_owner(base, "__init__"))
                        .and_then(|key| key.split_once('.').map(|(o, _)| o.to_string()));
                    if let Some(base) = owner.and_then(|o| module.class(&o)) {
                        if let Some(init) = base.method("__init__") {
                            bodies.push((format!("{}.__init__", c.name), Some(base.name.as_str()), &init.body));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    let mut pass = Inference {
        types: inference.types.clone(),
        signatures: inference.signatures.clone(),
        bases: inference.bases.clone(),
        ..Inference::default()
    };
    loop {
        let mut changed = false;
        for (name, class, body) in &bodies {
            if !pass.fallible.contains(name) && pass.block_may_fail(module, *class, body) {
                pass.fallible.insert(name.clone());
                changed = true;
            }
        }
        if !changed {
            return pass.fallible;
        }
    }
}

struct Engine<'m> {
    module: &'m Module,
    evidence: CallSiteIndex,
    out: Inference,
    unit: usize,
    class: Option<&'m Class>,
    /// Name of the method being inferred, empty outside classes
    method: String,
    returns: Vec<Type>,
    /// Annotated bindings of the current scope; assignments never widen them
    declared: HashSet<String>,
}

impl<'m> Engine<'m> {
    fn run(&mut self) {
        let module = self.module;
        for (unit, decl) in module.body.iter().enumerate() {
            self.unit = unit;
            match decl {
                Decl::Import(_) => {}
                Decl::Variable(var) => {
                    let ty = match (&var.annotation, &var.value) {
                        (_, Some(value @ Expr { kind: ExprKind::Lambda { .. }, .. })) => {
                            self.lambda_signature(&var.target, value)
                        }
                        (annotation, value) => {
                            let env = self.out.globals.clone();
                            let value_ty = value.as_ref().map(|v| self.expr(v, &env));
                            match annotation {
                                Some(a) => self.annotation(a),
                                None => value_ty.unwrap_or(Type::Unresolved),
                            }
                        }
                    };
                    self.out.globals.insert(var.target.clone(), ty);
                }
                Decl::Function(func) => {
                    self.class = None;
                    self.method.clear();
                    let sig = self.function(func, None);
                    self.out.signatures.insert(sig.qualified_name.clone(), sig);
                }
                Decl::Class(class) => self.class_decl(class),
                Decl::Statement(stmt) => {
                    self.class = None;
                    self.method.clear();
                    self.declared.clear();
                    let scope = statement_scope(stmt);
                    let mut env = self.out.globals.clone();
                    let globals = env.clone();
                    self.stmt(stmt, &mut env);
                    let own: Env = env
                        .into_iter()
                        .filter(|(name, ty)| globals.get(name) != Some(ty))
                        .collect();
                    self.out.locals.insert(scope, own);
                }
            }
        }
        self.finalize();
    }

    /// Every expression in the traversal gets exactly one type
    fn finalize(&mut self) {
        let types = &mut self.out.types;
        for decl in &self.module.body {
            decl.walk_exprs(&mut |e: &Expr| {
                types.entry(e.id).or_insert(Type::Dynamic);
            });
        }
    }

    fn record(&mut self, expr: &Expr, ty: Type) -> Type {
        self.out.types.insert(expr.id, ty.clone());
        ty
    }

    fn ambiguity(&mut self, loc: Location, detail: String) {
        let finding = rule(ConstructKind::InferenceAmbiguity).finding(
            loc,
            &detail,
            self.unit,
            Origin::Inference,
        );
        debug!("{}", finding);
        self.out.findings.push(finding);
    }

    fn scope_name(&self, func: &Function) -> String {
        match self.class {
            Some(c) => format!("{}.{}", c.name, func.name),
            None => func.name.clone(),
        }
    }

    /// Record types for an annotation subtree and return the annotated type
    fn annotation(&mut self, expr: &Expr) -> Type {
        let ty = Type::from_annotation(expr);
        let mut nodes = Vec::new();
        expr.walk(&mut |e: &Expr| nodes.push((e.id, Type::from_annotation(e))));
        for (id, t) in nodes {
            self.out.types.insert(id, t);
        }
        ty
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    fn param_type(&mut self, qualified: &str, param: &Param, env: &Env) -> Type {
        if let Some(default) = &param.default {
            self.expr(default, env);
        }
        if let Some(annotation) = &param.annotation {
            return self.annotation(annotation);
        }
        match param.kind {
            ParamKind::VarArgs | ParamKind::KwArgs => return Type::Dynamic,
            ParamKind::Positional | ParamKind::KeywordOnly => {}
        }
        let default_ty = param.default.as_ref().and_then(literal_type);
        if let Some(ty) = default_ty.as_ref().filter(|t| **t != Type::none()) {
            return ty.clone();
        }
        match self.evidence.resolved(qualified, &param.name) {
            Some(Type::Dynamic) => {
                self.ambiguity(
                    param.loc,
                    format!("parameter `{}` across call sites of `{}`", param.name, qualified),
                );
                Type::Dynamic
            }
            Some(ty) if default_ty.is_some() => Type::optional(ty),
            Some(ty) => ty,
            None => Type::Unresolved,
        }
    }

    fn function(&mut self, func: &Function, class: Option<&Class>) -> FunctionSig {
        let qualified = self.scope_name(func);
        self.declared.clear();
        self.returns.clear();

        let env0 = self.out.globals.clone();
        for decorator in &func.decorators {
            self.expr(decorator, &env0);
        }

        let has_receiver = class.is_some() && func.takes_receiver();
        let mut env = self.out.globals.clone();
        let mut params = Vec::new();
        for (idx, param) in func.params.iter().enumerate() {
            if has_receiver && idx == 0 {
                let receiver = class.map(|c| Type::Named(c.name.clone())).unwrap_or(Type::Dynamic);
                env.insert(param.name.clone(), receiver);
                continue;
            }
            let ty = self.param_type(&qualified, param, &env0);
            if param.annotation.is_some() {
                self.declared.insert(param.name.clone());
            }
            env.insert(param.name.clone(), ty.clone());
            params.push((param, ty));
        }

        let param_names: HashSet<&str> = func.params.iter().map(|p| p.name.as_str()).collect();
        self.block(&func.body, &mut env);

        let ret = if func.name == "__init__" && class.is_some() {
            class.map(|c| Type::Named(c.name.clone())).unwrap_or(Type::Dynamic)
        } else if let Some(annotation) = &func.returns {
            self.annotation(annotation)
        } else {
            let returns = std::mem::take(&mut self.returns);
            match returns.split_first() {
                None => Type::none(),
                Some((first, rest)) => {
                    match rest.iter().try_fold(first.clone(), |acc, t| acc.join(t)) {
                        Some(ty) => ty,
                        None => {
                            self.ambiguity(func.loc, format!("the return value of `{}`", qualified));
                            Type::Dynamic
                        }
                    }
                }
            }
        };

        let mut usage = Usage::of(&func.body);
        self.mark_method_mutation(&func.body, &mut usage);
        let params = params
            .into_iter()
            .map(|(param, ty)| {
                let (ownership, rebound) = param_ownership(&param.name, &ty, &usage);
                ParamSig {
                    name: param.name.clone(),
                    ty,
                    ownership,
                    rebound,
                    has_default: param.default.is_some(),
                }
            })
            .collect();

        let assigned: HashSet<&String> = usage.assignments.iter().collect();
        let locals: Env = env
            .into_iter()
            .filter(|(name, _)| assigned.contains(name) && !param_names.contains(name.as_str()))
            .collect();
        self.out.locals.insert(qualified.clone(), locals);

        FunctionSig {
            qualified_name: qualified,
            params,
            ret,
            ret_declared: func.returns.is_some(),
        }
    }

    /// `obj.method()` mutates `obj` when the method needs `&mut self`
    fn mark_method_mutation(&self, body: &[Stmt], usage: &mut Usage) {
        for stmt in body {
            stmt.walk_exprs(&mut |e: &Expr| {
                let ExprKind::Call { func, .. } = &e.kind else {
                    return;
                };
                let ExprKind::Attribute { value, attr } = &func.kind else {
                    return;
                };
                let Some(name) = value.as_name() else { return };
                if let Type::Named(class) = self.out.type_of(value) {
                    let mutating = self
                        .out
                        .method_owner(&class, attr)
                        .is_some_and(|m| self.out.mutating.contains(&m));
                    if mutating {
                        usage.mutated.insert(name.to_string());
                    }
                }
            });
        }
    }

    fn lambda_signature(&mut self, name: &str, lambda: &Expr) -> Type {
        let ExprKind::Lambda { params, body } = &lambda.kind else {
            return Type::Dynamic;
        };
        let env0 = self.out.globals.clone();
        let mut env = env0.clone();
        let mut sig_params = Vec::new();
        for param in params {
            let ty = self.param_type(name, param, &env0);
            env.insert(param.name.clone(), ty.clone());
            sig_params.push((param.name.clone(), ty, param.default.is_some()));
        }
        let ret = self.expr(body, &env);
        let usage = Usage::default();
        let sig = FunctionSig {
            qualified_name: name.to_string(),
            params: sig_params
                .iter()
                .map(|(n, ty, has_default)| {
                    let (ownership, rebound) = param_ownership(n, ty, &usage);
                    ParamSig {
                        name: n.clone(),
                        ty: ty.clone(),
                        ownership,
                        rebound,
                        has_default: *has_default,
                    }
                })
                .collect(),
            ret: ret.clone(),
            ret_declared: false,
        };
        self.out.signatures.insert(name.to_string(), sig);

        let mut callable: Vec<Type> = sig_params.into_iter().map(|(_, t, _)| t).collect();
        callable.push(ret);
        self.record(lambda, Type::generic("Callable", callable))
    }

    fn class_decl(&mut self, class: &'m Class) {
        self.class = Some(class);
        self.method.clear();
        let env = self.out.globals.clone();

        for expr in class.decorators.iter().chain(class.bases.iter()) {
            self.expr(expr, &env);
        }
        let bases = class.effective_bases();
        if let [base] = bases.as_slice() {
            if self.module.class(base).is_some() {
                self.out.bases.insert(class.name.clone(), base.clone());
            }
        }

        let mut fields = Vec::new();
        for field in &class.fields {
            let ty = if field.from_init {
                field
                    .annotation
                    .as_ref()
                    .map(Type::from_annotation)
                    .unwrap_or(Type::Unresolved)
            } else {
                let default_ty = field.default.as_ref().map(|d| self.expr(d, &env));
                match &field.annotation {
                    Some(a) => self.annotation(a),
                    None => default_ty.unwrap_or(Type::Unresolved),
                }
            };
            fields.push((field.name.clone(), ty));
        }
        self.out.fields.insert(class.name.clone(), fields);

        let mut other_env = env.clone();
        for stmt in &class.other {
            self.stmt(stmt, &mut other_env);
        }

        if class.method("__init__").is_none() {
            let inherited = self
                .out
                .bases
                .get(&class.name)
                .and_then(|base| self.out.method_owner(base, "__init__"))
                .and_then(|key| self.out.signatures.get(&key))
                .map(|sig| sig.params.clone());
            let params = if class.is_dataclass() {
                class
                    .fields
                    .iter()
                    .filter(|f| !f.from_init)
                    .map(|f| ParamSig {
                        name: f.name.clone(),
                        ty: self.out.field_type(&class.name, &f.name).unwrap_or(Type::Unresolved),
                        ownership: Ownership::ByValue,
                        rebound: false,
                        has_default: f.default.is_some(),
                    })
                    .collect()
            } else {
                inherited.unwrap_or_default()
            };
            let key = format!("{}.__init__", class.name);
            self.out.signatures.insert(
                key.clone(),
                FunctionSig {
                    qualified_name: key,
                    params,
                    ret: Type::Named(class.name.clone()),
                    ret_declared: false,
                },
            );
        }

        for name in ownership::mutating_methods(class) {
            self.out.mutating.insert(format!("{}.{}", class.name, name));
        }
        for method in &class.methods {
            self.method = method.name.clone();
            let sig = self.function(method, Some(class));
            self.out.signatures.insert(sig.qualified_name.clone(), sig);
        }
        self.class = None;
        self.method.clear();
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn block(&mut self, block: &[Stmt], env: &mut Env) {
        for stmt in block {
            self.stmt(stmt, env);
        }
    }

    fn stmt(&mut self, stmt: &Stmt, env: &mut Env) {
        match &stmt.kind {
            StmtKind::Assign { targets, value } => {
                let ty = self.expr(value, env);
                for target in targets {
                    self.bind(target, ty.clone(), env, stmt.loc);
                }
            }
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
            } => {
                let declared = self.annotation(annotation);
                if let Some(value) = value {
                    self.expr(value, env);
                }
                if let Some(name) = target.as_name() {
                    self.record(target, declared.clone());
                    env.insert(name.to_string(), declared);
                    self.declared.insert(name.to_string());
                } else {
                    self.bind(target, declared, env, stmt.loc);
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.expr(target, env);
                let rhs = self.expr(value, env);
                let result = binop_type(*op, &current, &rhs);
                if let Some(name) = target.as_name() {
                    if !self.declared.contains(name) {
                        self.rebind(name, result, env, stmt.loc);
                    }
                } else if let Some(attr) = target.self_attribute() {
                    self.update_field(attr, result, stmt.loc);
                }
            }
            StmtKind::Expr(e) => {
                self.expr(e, env);
                self.refine_by_method(e, env);
            }
            StmtKind::Return(value) => {
                let ty = match value {
                    Some(v) => self.expr(v, env),
                    None => Type::none(),
                };
                self.returns.push(ty);
            }
            StmtKind::If { test, body, orelse } => {
                self.expr(test, env);
                let mut then_env = env.clone();
                self.block(body, &mut then_env);
                let mut else_env = env.clone();
                self.block(orelse, &mut else_env);
                *env = match (terminates(body), terminates(orelse)) {
                    (true, false) => else_env,
                    (false, true) => then_env,
                    _ => self.join_env(then_env, else_env, stmt.loc, "an if/else join"),
                };
            }
            StmtKind::While { test, body, orelse } => {
                self.expr(test, env);
                let mut loop_env = env.clone();
                self.block(body, &mut loop_env);
                let mut exit = self.join_env(env.clone(), loop_env, stmt.loc, "a loop exit");
                self.block(orelse, &mut exit);
                *env = exit;
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iter_ty = self.expr(iter, env);
                let mut loop_env = env.clone();
                self.bind_fresh(target, iter_ty.element_type(), &mut loop_env);
                self.block(body, &mut loop_env);
                let mut exit = self.join_env(env.clone(), loop_env, stmt.loc, "a loop exit");
                self.block(orelse, &mut exit);
                *env = exit;
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let before = env.clone();
                self.block(body, env);
                self.block(orelse, env);
                for handler in handlers {
                    let mut handler_env = before.clone();
                    if let Some(ty) = &handler.exc_type {
                        let exc = self.expr(ty, &before);
                        if let Some(name) = &handler.name {
                            let bound = match ty.dotted_name() {
                                Some(n) => Type::Named(n),
                                None => exc,
                            };
                            handler_env.insert(name.clone(), bound);
                        }
                    }
                    self.block(&handler.body, &mut handler_env);
                    if !terminates(&handler.body) {
                        let joined = self.join_env(env.clone(), handler_env, handler.loc, "a try/except join");
                        *env = joined;
                    }
                }
                self.block(finalbody, env);
            }
            StmtKind::Raise { exc, cause } => {
                for e in exc.iter().chain(cause.iter()) {
                    self.expr(e, env);
                }
            }
            StmtKind::Assert { test, msg } => {
                self.expr(test, env);
                if let Some(m) = msg {
                    self.expr(m, env);
                }
            }
            StmtKind::Other { exprs, .. } => {
                for e in exprs {
                    self.expr(e, env);
                }
            }
            StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Pass
            | StmtKind::Global(_)
            | StmtKind::Nonlocal(_) => {}
        }
    }

    /// `xs.append(v)` on a list with unknown elements fixes the element type
    fn refine_by_method(&mut self, expr: &Expr, env: &mut Env) {
        let ExprKind::Call { func, args, .. } = &expr.kind else {
            return;
        };
        let ExprKind::Attribute { value, attr } = &func.kind else {
            return;
        };
        let Some(name) = value.as_name() else { return };
        let Some(current) = env.get(name).cloned() else {
            return;
        };
        let refined = match (attr.as_str(), &current, args.first()) {
            ("append" | "add", Type::Generic { base, args: params }, Some(arg))
                if params.len() == 1 && (base == "list" || base == "set") =>
            {
                Type::generic(base, vec![self.out.type_of(arg)])
            }
            _ => return,
        };
        if let Some(joined) = current.join(&refined) {
            env.insert(name.to_string(), joined);
        }
    }

    fn join_env(&mut self, a: Env, b: Env, loc: Location, site: &str) -> Env {
        let mut out = a.clone();
        for (name, right) in b {
            let merged = match a.get(&name) {
                None => right,
                Some(left) => match left.join(&right) {
                    Some(ty) => ty,
                    None => {
                        self.ambiguity(loc, format!("`{}` at {}", name, site));
                        Type::Dynamic
                    }
                },
            };
            out.insert(name, merged);
        }
        out
    }

    /// Assignment to a name that may already be bound
    fn rebind(&mut self, name: &str, ty: Type, env: &mut Env, loc: Location) {
        if self.declared.contains(name) {
            return;
        }
        let merged = match env.get(name) {
            None => ty,
            Some(old) => match old.join(&ty) {
                Some(t) => t,
                None => {
                    self.ambiguity(loc, format!("`{}` rebound with a different type", name));
                    Type::Dynamic
                }
            },
        };
        env.insert(name.to_string(), merged);
    }

    fn bind(&mut self, target: &Expr, ty: Type, env: &mut Env, loc: Location) {
        match &target.kind {
            ExprKind::Name(name) => {
                self.record(target, ty.clone());
                self.rebind(name, ty, env, loc);
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                self.record(target, ty.clone());
                for (idx, item) in items.iter().enumerate() {
                    self.bind(item, unpacked(&ty, idx, items.len()), env, loc);
                }
            }
            ExprKind::Attribute { value, attr } => {
                self.expr(value, env);
                self.record(target, ty.clone());
                if value.as_name() == Some("self") && self.class.is_some() {
                    self.update_field(attr, ty, loc);
                }
            }
            _ => {
                self.expr(target, env);
            }
        }
    }

    /// Loop and comprehension targets shadow earlier bindings
    fn bind_fresh(&mut self, target: &Expr, ty: Type, env: &mut Env) {
        match &target.kind {
            ExprKind::Name(name) => {
                self.record(target, ty.clone());
                env.insert(name.clone(), ty);
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                self.record(target, ty.clone());
                for (idx, item) in items.iter().enumerate() {
                    self.bind_fresh(item, unpacked(&ty, idx, items.len()), env);
                }
            }
            _ => {
                self.expr(target, env);
            }
        }
    }

    fn update_field(&mut self, attr: &str, ty: Type, loc: Location) {
        let Some(class) = self.class else { return };
        let in_init = self.method == "__init__";
        let mut ambiguous = false;
        if let Some(fields) = self.out.fields.get_mut(&class.name) {
            match fields.iter_mut().find(|(n, _)| n == attr) {
                Some((_, current)) => {
                    let declared = class.field(attr).is_some_and(|f| f.annotation.is_some());
                    if !declared {
                        match current.join(&ty) {
                            Some(joined) => *current = joined,
                            None => {
                                *current = Type::Dynamic;
                                ambiguous = true;
                            }
                        }
                    }
                }
                None if in_init => fields.push((attr.to_string(), ty)),
                None => {}
            }
        }
        if ambiguous {
            self.ambiguity(loc, format!("field `{}.{}`", class.name, attr));
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn expr(&mut self, expr: &Expr, env: &Env) -> Type {
        let ty = match &expr.kind {
            ExprKind::Int(_) => Type::int(),
            ExprKind::BigInt(_) => Type::Dynamic,
            ExprKind::Float(_) => Type::float(),
            ExprKind::Str(_) => Type::str(),
            ExprKind::Bool(_) => Type::bool(),
            ExprKind::NoneLit => Type::none(),
            ExprKind::FString(parts) => {
                for part in parts {
                    if let FStringPart::Value { value, .. } = part {
                        self.expr(value, env);
                    }
                }
                Type::str()
            }
            ExprKind::Name(name) => self.name(name, env),
            ExprKind::BinOp { op, left, right } => {
                let l = self.expr(left, env);
                let r = self.expr(right, env);
                binop_type(*op, &l, &r)
            }
            ExprKind::UnaryOp { op, operand } => {
                let t = self.expr(operand, env);
                match op {
                    UnaryOp::Not => Type::bool(),
                    UnaryOp::Invert if t.is_int() || t.is_bool() => Type::int(),
                    UnaryOp::Neg | UnaryOp::Pos if t.is_bool() => Type::int(),
                    UnaryOp::Neg | UnaryOp::Pos if t.is_numeric() || t == Type::Unresolved => t,
                    _ => Type::Dynamic,
                }
            }
            ExprKind::BoolOp { op, left, right } => {
                let l = self.expr(left, env);
                let r = self.expr(right, env);
                match op {
                    _ if l.is_bool() && r.is_bool() => Type::bool(),
                    BoolOp::And | BoolOp::Or => l.join(&r).unwrap_or(Type::Dynamic),
                }
            }
            ExprKind::Compare {
                left, comparators, ..
            } => {
                self.expr(left, env);
                for c in comparators {
                    self.expr(c, env);
                }
                Type::bool()
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => self.call(func, args, keywords, env),
            ExprKind::Attribute { value, attr } => {
                if value.as_name() == Some("math") && !env.contains_key("math") {
                    self.record(value, Type::Dynamic);
                    match mappings::math_constant(attr) {
                        Some(_) => Type::float(),
                        None => Type::Unresolved,
                    }
                } else {
                    let recv = self.expr(value, env);
                    match recv {
                        Type::Named(class) => {
                            self.out.field_type(&class, attr).unwrap_or(Type::Unresolved)
                        }
                        _ => Type::Unresolved,
                    }
                }
            }
            ExprKind::Subscript { value, index } => {
                let recv = self.expr(value, env);
                self.expr(index, env);
                subscript_type(&recv, index)
            }
            ExprKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.expr(part, env);
                }
                Type::Dynamic
            }
            ExprKind::List(items) => {
                let elem = self.collection(items, env, expr.loc);
                Type::list(elem)
            }
            ExprKind::Set(items) => {
                let elem = self.collection(items, env, expr.loc);
                Type::set(elem)
            }
            ExprKind::Tuple(items) => {
                Type::tuple(items.iter().map(|i| self.expr(i, env)).collect())
            }
            ExprKind::Dict(pairs) => {
                let keys: Vec<Type> = pairs.iter().map(|(k, _)| self.expr(k, env)).collect();
                let values: Vec<Type> = pairs.iter().map(|(_, v)| self.expr(v, env)).collect();
                let key = fold_join(&keys).unwrap_or(Type::Dynamic);
                let value = fold_join(&values).unwrap_or(Type::Dynamic);
                Type::dict(key, value)
            }
            ExprKind::Lambda { params, body } => {
                let mut inner = env.clone();
                let mut callable = Vec::new();
                for param in params {
                    if let Some(default) = &param.default {
                        self.expr(default, env);
                    }
                    let ty = param
                        .default
                        .as_ref()
                        .and_then(literal_type)
                        .unwrap_or(Type::Unresolved);
                    inner.insert(param.name.clone(), ty.clone());
                    callable.push(ty);
                }
                callable.push(self.expr(body, &inner));
                Type::generic("Callable", callable)
            }
            ExprKind::IfExp { test, body, orelse } => {
                let b = self.expr(body, env);
                self.expr(test, env);
                let o = self.expr(orelse, env);
                match b.join(&o) {
                    Some(ty) => ty,
                    None => {
                        self.ambiguity(expr.loc, "a conditional expression".to_string());
                        Type::Dynamic
                    }
                }
            }
            ExprKind::ListComp {
                element,
                target,
                iter,
                condition,
            } => {
                let iter_ty = self.expr(iter, env);
                let mut inner = env.clone();
                self.bind_fresh(target, iter_ty.element_type(), &mut inner);
                if let Some(cond) = condition {
                    self.expr(cond, &inner);
                }
                Type::list(self.expr(element, &inner))
            }
            ExprKind::Starred(inner) => {
                self.expr(inner, env);
                Type::Dynamic
            }
            ExprKind::Other { children, .. } => {
                for child in children {
                    self.expr(child, env);
                }
                Type::Dynamic
            }
        };
        self.record(expr, ty)
    }

    fn collection(&mut self, items: &[Expr], env: &Env, loc: Location) -> Type {
        let types: Vec<Type> = items.iter().map(|i| self.expr(i, env)).collect();
        if types.is_empty() {
            return Type::Unresolved;
        }
        match fold_join(&types) {
            Some(ty) => ty,
            None => {
                self.ambiguity(loc, "the elements of a collection literal".to_string());
                Type::Dynamic
            }
        }
    }

    fn name(&self, name: &str, env: &Env) -> Type {
        if let Some(ty) = env.get(name) {
            return ty.clone();
        }
        if let Some(sig) = self.out.signatures.get(name) {
            let mut callable: Vec<Type> = sig.params.iter().map(|p| p.ty.clone()).collect();
            callable.push(sig.ret.clone());
            return Type::generic("Callable", callable);
        }
        if self.module.class(name).is_some() || builtins::call_type(name, &[]).is_some() {
            return Type::Dynamic;
        }
        Type::Unresolved
    }

    fn call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        keywords: &[crate::ast::Keyword],
        env: &Env,
    ) -> Type {
        let arg_types: Vec<Type> = args.iter().map(|a| self.expr(a, env)).collect();
        for kw in keywords {
            self.expr(&kw.value, env);
        }

        match &func.kind {
            ExprKind::Name(name) => {
                let callee = self.expr(func, env);
                if let Some(ret) = callable_return(&callee).filter(|_| env.contains_key(name)) {
                    return ret;
                }
                if let Some(sig) = self.out.signatures.get(name.as_str()) {
                    return sig.ret.clone();
                }
                if self.module.function(name).is_some() {
                    // forward reference or recursion
                    return Type::Unresolved;
                }
                if self.module.class(name).is_some() {
                    return Type::Named(name.clone());
                }
                if let Some(ret) = callable_return(&callee) {
                    return ret;
                }
                builtins::call_type(name, &arg_types).unwrap_or(Type::Unresolved)
            }
            ExprKind::Attribute { value, attr } => {
                if value.as_name() == Some("math") && !env.contains_key("math") {
                    self.record(value, Type::Dynamic);
                    self.record(func, Type::Dynamic);
                    return mappings::math_function(attr)
                        .map(|(_, ty)| ty)
                        .unwrap_or(Type::Unresolved);
                }
                let recv = self.expr(value, env);
                self.record(func, Type::Dynamic);
                let owner = match (&recv, value.as_name()) {
                    (Type::Named(class), _) if self.module.class(class).is_some() => Some(class.clone()),
                    (_, Some(name)) if self.module.class(name).is_some() => Some(name.to_string()),
                    _ => None,
                };
                if let Some(owner) = owner {
                    return self
                        .out
                        .method_owner(&owner, attr)
                        .and_then(|key| self.out.signatures.get(&key))
                        .map(|sig| sig.ret.clone())
                        .unwrap_or(Type::Unresolved);
                }
                builtins::method_type(&recv, attr, &arg_types).unwrap_or(Type::Unresolved)
            }
            _ => {
                self.expr(func, env);
                Type::Unresolved
            }
        }
    }
}

fn callable_return(ty: &Type) -> Option<Type> {
    match ty {
        Type::Generic { base, args } if base == "Callable" => args.last().cloned(),
        _ => None,
    }
}

fn fold_join(types: &[Type]) -> Option<Type> {
    let (first, rest) = types.split_first()?;
    rest.iter().try_fold(first.clone(), |acc, t| acc.join(t))
}

/// Type of element `idx` when unpacking a value of type `ty` into `len` targets
fn unpacked(ty: &Type, idx: usize, len: usize) -> Type {
    match ty {
        Type::Generic { base, args } if base == "tuple" && args.len() == len => args[idx].clone(),
        Type::Generic { base, args } if base == "list" && args.len() == 1 => args[0].clone(),
        Type::Unresolved => Type::Unresolved,
        _ => Type::Dynamic,
    }
}

/// Block always leaves by `return`, `raise`, `break` or `continue`
pub fn terminates(block: &[Stmt]) -> bool {
    matches!(
        block.last().map(|s| &s.kind),
        Some(StmtKind::Return(_))
            | Some(StmtKind::Raise { .. })
            | Some(StmtKind::Break)
            | Some(StmtKind::Continue)
    )
}

fn subscript_type(recv: &Type, index: &Expr) -> Type {
    let is_slice = matches!(index.kind, ExprKind::Slice { .. });
    match recv {
        Type::Primitive(PrimitiveKind::Str) => Type::str(),
        Type::Generic { base, args } => match (base.as_str(), args.as_slice()) {
            ("list", [_]) if is_slice => recv.clone(),
            ("list", [elem]) => elem.clone(),
            ("dict", [_, value]) => value.clone(),
            ("tuple", items) => match index.kind {
                ExprKind::Int(i) if i >= 0 && (i as usize) < items.len() => items[i as usize].clone(),
                _ => Type::Dynamic,
            },
            _ => Type::Dynamic,
        },
        Type::Unresolved => Type::Unresolved,
        _ => Type::Dynamic,
    }
}

/// Result type of a binary operator, following Python's numeric promotion
pub fn binop_type(op: BinOp, left: &Type, right: &Type) -> Type {
    let as_int = |t: &Type| if t.is_bool() { Type::int() } else { t.clone() };
    let (l, r) = (as_int(left), as_int(right));

    if l == Type::Dynamic || r == Type::Dynamic {
        return Type::Dynamic;
    }
    if l == Type::Unresolved || r == Type::Unresolved {
        return Type::Unresolved;
    }

    let arithmetic = matches!(
        op,
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod | BinOp::Pow
    );
    let bitwise = matches!(
        op,
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::LShift | BinOp::RShift
    );

    if l.is_int() && r.is_int() {
        return match op {
            BinOp::Div => Type::float(),
            BinOp::MatMul => Type::Dynamic,
            _ => Type::int(),
        };
    }
    if l.is_numeric() && r.is_numeric() {
        return if arithmetic { Type::float() } else { Type::Dynamic };
    }
    match (op, &l, &r) {
        (BinOp::Add, a, b) if a.is_str() && b.is_str() => Type::str(),
        (BinOp::Mod, a, _) if a.is_str() => Type::str(),
        (BinOp::Mul, a, b) | (BinOp::Mul, b, a) if a.is_str() && b.is_int() => Type::str(),
        (BinOp::Add, a, b) if a.is_generic("list") && b.is_generic("list") => {
            a.join(b).unwrap_or(Type::Dynamic)
        }
        (BinOp::Mul, a, b) | (BinOp::Mul, b, a) if a.is_generic("list") && b.is_int() => a.clone(),
        (_, a, b) if bitwise && a.is_generic("set") && b.is_generic("set") => {
            a.join(b).unwrap_or(Type::Dynamic)
        }
        (BinOp::Sub, a, b) if a.is_generic("set") && b.is_generic("set") => {
            a.join(b).unwrap_or(Type::Dynamic)
        }
        _ => Type::Dynamic,
    }
}

#[cfg(test)]
mod tests;
