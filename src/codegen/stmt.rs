//! Statement lowering

use std::mem;

use crate::ast::{BinOp, Expr, ExprKind, Handler, Location, Stmt, StmtKind};
use crate::mappings::is_builtin_exception;
use crate::types::Type;

use super::expr::{atom, shift_in_range, str_literal};
use super::function::{Binding, Exit, FnCtx, ERROR_TYPE};
use super::{rust_ident, Helper, Lower, RustWriter, Unsupported};

fn unsupported<T>(loc: Location, what: impl Into<String>) -> Lower<T> {
    Err(Unsupported::new(loc, what))
}

/// Block contains a `break` that leaves the loop it belongs to
fn breaks_out(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| match &stmt.kind {
        StmtKind::Break => true,
        StmtKind::For { .. } | StmtKind::While { .. } => false,
        _ => stmt.blocks().into_iter().any(breaks_out),
    })
}

/// Block contains a statement that leaves it early
fn leaves_early(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| {
        let mut found = false;
        stmt.walk(&mut |s: &Stmt| {
            if matches!(
                s.kind,
                StmtKind::Return(_) | StmtKind::Raise { .. } | StmtKind::Break | StmtKind::Continue
            ) {
                found = true;
            }
        });
        found
    })
}

/// Value needs its type spelled out in a fresh `let`
fn needs_annotation(value: &Expr) -> bool {
    match &value.kind {
        ExprKind::List(items) | ExprKind::Set(items) => items.is_empty(),
        ExprKind::Dict(pairs) => pairs.is_empty(),
        ExprKind::NoneLit => true,
        ExprKind::Call { func, args, .. } => {
            args.is_empty() && matches!(func.as_name(), Some("list" | "dict" | "set"))
        }
        _ => false,
    }
}

fn mutable_container(ty: &Type) -> bool {
    ty.is_generic("list") || ty.is_generic("dict") || ty.is_generic("set") || matches!(ty, Type::Named(_))
}

impl<'a> FnCtx<'a> {
    /// Braced block: its `let`s go out of scope when it closes
    pub fn block(&mut self, w: &mut RustWriter, stmts: &[Stmt]) {
        let outer = self.declared.clone();
        self.hoist(w, stmts);
        self.inline(w, stmts);
        self.declared = outer;
    }

    /// Statements emitted at the current nesting level
    pub fn inline(&mut self, w: &mut RustWriter, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt_or_placeholder(w, stmt);
        }
    }

    pub fn stmt(&mut self, w: &mut RustWriter, stmt: &Stmt) -> Lower<()> {
        let loc = stmt.loc;
        match &stmt.kind {
            StmtKind::Assign { targets, value } => self.assign(w, targets, value, loc),
            StmtKind::AnnAssign { target, value, .. } => match value {
                Some(value) => self.assign(w, std::slice::from_ref(target), value, loc),
                None => Ok(()),
            },
            StmtKind::AugAssign { target, op, value } => self.aug_assign(w, target, *op, value, loc),
            StmtKind::Expr(e) => self.expr_stmt(w, e),
            StmtKind::Return(value) => self.return_stmt(w, value.as_ref(), loc),
            StmtKind::If { test, body, orelse } => self.if_stmt(w, test, body, orelse),
            StmtKind::While { test, body, orelse } => self.while_stmt(w, test, body, orelse, loc),
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => self.for_stmt(w, target, iter, body, orelse, loc),
            StmtKind::Break => self.jump(w, "break", loc),
            StmtKind::Continue => self.jump(w, "continue", loc),
            StmtKind::Pass => Ok(()),
            StmtKind::Raise { exc, .. } => self.raise(w, exc.as_ref(), loc),
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => self.try_stmt(w, body, handlers, orelse, finalbody, loc),
            StmtKind::Assert { test, msg } => {
                let cond = self.condition(test)?;
                match msg {
                    None => w.line(format!("assert!({});", cond)),
                    Some(m) if self.ty(m).is_str() => {
                        let message = self.expr(m)?;
                        w.line(format!("assert!({}, \"{{}}\", {});", cond, message));
                    }
                    Some(m) => return unsupported(m.loc, "assertion message that is not a string"),
                }
                Ok(())
            }
            StmtKind::Global(names) => unsupported(loc, format!("`global {}`", names.join(", "))),
            StmtKind::Nonlocal(names) => unsupported(loc, format!("`nonlocal {}`", names.join(", "))),
            StmtKind::Other { kind, .. } => unsupported(loc, kind.clone()),
        }
    }

    fn expr_stmt(&mut self, w: &mut RustWriter, e: &Expr) -> Lower<()> {
        match &e.kind {
            ExprKind::Str(_) => return Ok(()),
            ExprKind::Other { kind, .. } if kind == "ellipsis" => return Ok(()),
            _ => {}
        }
        let code = self.expr(e)?;
        w.line(format!("{};", code));
        Ok(())
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    fn assign(&mut self, w: &mut RustWriter, targets: &[Expr], value: &Expr, loc: Location) -> Lower<()> {
        if targets.len() > 1 {
            let literal = matches!(
                value.kind,
                ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Bool(_) | ExprKind::Str(_)
            );
            if !literal || targets.iter().any(|t| t.as_name().is_none()) {
                return unsupported(loc, "chained assignment");
            }
            for target in targets {
                self.assign(w, std::slice::from_ref(target), value, loc)?;
            }
            return Ok(());
        }
        let Some(target) = targets.first() else {
            return Ok(());
        };
        match &target.kind {
            ExprKind::Name(name) => self.assign_name(w, name, value, loc),
            ExprKind::Tuple(items) | ExprKind::List(items) => self.assign_tuple(w, items, value, loc),
            ExprKind::Attribute { value: obj, attr } => self.assign_attribute(w, target, obj, attr, value),
            ExprKind::Subscript { value: obj, index } => self.assign_index(w, target, obj, index, value),
            _ => unsupported(target.loc, "assignment target"),
        }
    }

    fn assign_name(&mut self, w: &mut RustWriter, name: &str, value: &Expr, loc: Location) -> Lower<()> {
        match self.binding(name) {
            Binding::Const(_) | Binding::Static(_) | Binding::Function | Binding::Class => {
                return unsupported(loc, format!("assignment to module-level name `{}`", name));
            }
            Binding::HandlerError | Binding::SelfRef => {
                return unsupported(loc, format!("rebinding `{}`", name));
            }
            _ => {}
        }
        if let Some(source) = value.as_name() {
            let ty = self.ty(value);
            if mutable_container(&ty) && (self.mutable.contains(source) || self.mutable.contains(name)) {
                return unsupported(loc, format!("`{}` aliases the mutable value `{}`", name, source));
            }
        }
        let target_ty = match self.binding(name) {
            Binding::Param(p) => p.ty,
            _ => self
                .local_type(name)
                .cloned()
                .filter(Type::is_concrete)
                .unwrap_or_else(|| self.ty(value)),
        };
        let rebinding = self.declared.contains(name) || self.params.contains_key(name);
        if rebinding && matches!(self.local_type(name), Some(Type::Dynamic)) {
            return unsupported(loc, format!("`{}` is rebound to a value of another type", name));
        }
        let code = self.coerce(value, &target_ty)?;
        let ident = rust_ident(name);
        if rebinding {
            w.line(format!("{} = {};", ident, code));
            return Ok(());
        }
        let mutability = if self.needs_mut(name) { "mut " } else { "" };
        let annotation = if needs_annotation(value) {
            match target_ty.to_rust() {
                Some(t) => format!(": {}", t),
                None => return unsupported(loc, format!("type of `{}`", name)),
            }
        } else {
            String::new()
        };
        w.line(format!("let {}{}{} = {};", mutability, ident, annotation, code));
        self.declared.insert(name.to_string());
        Ok(())
    }

    fn assign_tuple(&mut self, w: &mut RustWriter, items: &[Expr], value: &Expr, loc: Location) -> Lower<()> {
        let mut names = Vec::with_capacity(items.len());
        for item in items {
            match item.as_name() {
                Some(n) if matches!(self.binding(n), Binding::Local(_) | Binding::Unbound(_) | Binding::Param(_) | Binding::Unknown) => {
                    names.push(n.to_string())
                }
                _ => return unsupported(loc, "unpacking into a target that is not a local name"),
            }
        }
        let ty = self.ty(value);
        let arity = match &ty {
            Type::Generic { base, args } if base == "tuple" => args.len(),
            _ => return unsupported(loc, format!("unpacking a {} value", ty)),
        };
        if arity != names.len() {
            return unsupported(loc, "unpacking with a different number of names");
        }
        let code = self.value(value)?;
        let existing = |ctx: &Self, n: &String| ctx.declared.contains(n) || ctx.params.contains_key(n);
        if names.iter().all(|n| existing(self, n)) {
            let targets: Vec<String> = names.iter().map(|n| rust_ident(n)).collect();
            w.line(format!("({}) = {};", targets.join(", "), code));
        } else if names.iter().all(|n| !existing(self, n)) {
            let patterns: Vec<String> = names
                .iter()
                .map(|n| {
                    let mutability = if self.needs_mut(n) { "mut " } else { "" };
                    format!("{}{}", mutability, rust_ident(n))
                })
                .collect();
            w.line(format!("let ({}) = {};", patterns.join(", "), code));
            self.declared.extend(names);
        } else {
            return unsupported(loc, "unpacking into a mix of new and existing names");
        }
        Ok(())
    }

    fn assign_attribute(&mut self, w: &mut RustWriter, target: &Expr, obj: &Expr, attr: &str, value: &Expr) -> Lower<()> {
        let lw = self.lw;
        if obj.as_name() == Some("self") {
            if self.init_fields.is_some() {
                return self.assign_init_field(w, target, attr, value);
            }
            let Some(class) = self.class_name() else {
                return unsupported(target.loc, "`self` outside a class");
            };
            let Some(field_ty) = lw.inference.field_type(class, attr) else {
                return unsupported(target.loc, format!("assignment to undeclared attribute `self.{}`", attr));
            };
            let code = self.coerce(value, &field_ty)?;
            w.line(format!("self.{} = {};", rust_ident(attr), code));
            return Ok(());
        }
        self.not_static(obj)?;
        let Type::Named(class) = self.ty(obj) else {
            return unsupported(target.loc, format!("attribute assignment on a {} value", self.ty(obj)));
        };
        let Some(field_ty) = lw.inference.field_type(&class, attr) else {
            return unsupported(target.loc, format!("assignment to undeclared attribute `{}`", attr));
        };
        let place = atom(self.expr(obj)?);
        let code = self.coerce(value, &field_ty)?;
        w.line(format!("{}.{} = {};", place, rust_ident(attr), code));
        Ok(())
    }

    /// `self.attr = value` inside a constructor assigns the local holding the field
    fn assign_init_field(&mut self, w: &mut RustWriter, target: &Expr, attr: &str, value: &Expr) -> Lower<()> {
        if self.passthrough.contains(attr) {
            return Ok(());
        }
        let lw = self.lw;
        let local = self
            .init_fields
            .as_ref()
            .and_then(|fields| fields.get(attr))
            .cloned();
        let (Some(class), Some(local)) = (self.class_name(), local) else {
            return unsupported(target.loc, format!("assignment to `self.{}`", attr));
        };
        let field_ty = lw.inference.field_type(class, attr).unwrap_or(Type::Dynamic);
        let code = self.coerce(value, &field_ty)?;
        if self.declared.contains(&local) {
            w.line(format!("{} = {};", local, code));
        } else {
            let mutability = if self.mutable.contains(&local) { "mut " } else { "" };
            let annotation = match (needs_annotation(value), field_ty.to_rust()) {
                (true, Some(t)) => format!(": {}", t),
                _ => String::new(),
            };
            w.line(format!("let {}{}{} = {};", mutability, local, annotation, code));
            self.declared.insert(local);
        }
        Ok(())
    }

    fn assign_index(&mut self, w: &mut RustWriter, target: &Expr, obj: &Expr, index: &Expr, value: &Expr) -> Lower<()> {
        self.not_static(obj)?;
        let ty = self.ty(obj);
        match &ty {
            Type::Generic { base, args } if base == "list" && args.len() == 1 && !matches!(index.kind, ExprKind::Slice { .. }) => {
                let elem = args[0].clone();
                let recv = atom(self.expr(obj)?);
                let idx = self.list_index(&recv, index)?;
                let code = self.coerce(value, &elem)?;
                w.line(format!("{}[{}] = {};", recv, idx, code));
                Ok(())
            }
            Type::Generic { base, args } if base == "dict" && args.len() == 2 => {
                let (key_ty, value_ty) = (args[0].clone(), args[1].clone());
                let recv = atom(self.expr(obj)?);
                let key = self.coerce(index, &key_ty)?;
                let code = self.coerce(value, &value_ty)?;
                w.line(format!("{}.insert({}, {});", recv, key, code));
                Ok(())
            }
            t => unsupported(target.loc, format!("item assignment on a {} value", t)),
        }
    }

    fn aug_assign(&mut self, w: &mut RustWriter, target: &Expr, op: BinOp, value: &Expr, loc: Location) -> Lower<()> {
        let tt = self.ty(target);
        let vt = self.ty(value);
        let place = match &target.kind {
            ExprKind::Name(n) => match self.binding(n) {
                Binding::Local(_) | Binding::Param(_) => rust_ident(n),
                _ => return unsupported(loc, format!("augmented assignment to `{}`", n)),
            },
            ExprKind::Attribute { .. } => {
                self.not_static(target)?;
                self.expr(target)?
            }
            ExprKind::Subscript { value: obj, index } => {
                self.not_static(obj)?;
                let obj_ty = self.ty(obj);
                if obj_ty.is_generic("list") {
                    self.expr(target)?
                } else if let Type::Generic { base, args } = &obj_ty {
                    if base != "dict" || args.len() != 2 {
                        return unsupported(loc, format!("augmented assignment on a {} item", obj_ty));
                    }
                    if !matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul) || !tt.is_numeric() {
                        return unsupported(loc, "augmented assignment on a dict entry");
                    }
                    let key_ty = args[0].clone();
                    let recv = atom(self.expr(obj)?);
                    let key = if key_ty.is_str() {
                        self.str_ref(index)?
                    } else {
                        format!("&{}", atom(self.coerce(index, &key_ty)?))
                    };
                    format!("*{}.get_mut({}).expect(\"key not found\")", recv, key)
                } else {
                    return unsupported(loc, format!("augmented assignment on a {} item", obj_ty));
                }
            }
            _ => return unsupported(loc, "augmented assignment target"),
        };

        if tt.is_int() && (vt.is_int() || vt.is_bool()) {
            let v = if vt.is_bool() {
                format!("{} as i64", atom(self.operand(value)?))
            } else {
                self.operand(value)?
            };
            let line = match op {
                BinOp::LShift | BinOp::RShift if !shift_in_range(value) => {
                    return unsupported(loc, format!("`{}=` by a constant outside 0..64", op.python_symbol()));
                }
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor
                | BinOp::LShift | BinOp::RShift => format!("{} {}= {};", place, op.python_symbol(), v),
                BinOp::FloorDiv => {
                    self.unit.helpers.insert(Helper::FloorDiv);
                    format!("{} = py_floordiv({}, {});", place, place, v)
                }
                BinOp::Mod => {
                    self.unit.helpers.insert(Helper::Modulo);
                    format!("{} = py_mod({}, {});", place, place, v)
                }
                BinOp::Pow => format!("{} = {}.pow({} as u32);", place, place, atom(v)),
                _ => return unsupported(loc, format!("`{}=` that changes the type of `{}`", op.python_symbol(), place)),
            };
            w.line(line);
            return Ok(());
        }
        if tt.is_float() && vt.is_numeric() {
            let v = if vt.is_int() {
                let mut coerced = self.coerce(value, &Type::float())?;
                if !coerced.ends_with(" as f64") {
                    coerced = atom(coerced);
                }
                coerced
            } else {
                self.operand(value)?
            };
            let line = match op {
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => format!("{} {}= {};", place, op.python_symbol(), v),
                BinOp::FloorDiv => format!("{} = ({} / {}).floor();", place, place, v),
                BinOp::Mod => {
                    self.unit.helpers.insert(Helper::FloatModulo);
                    format!("{} = py_fmod({}, {});", place, place, v)
                }
                BinOp::Pow if vt.is_int() => format!("{} = {}.powi({} as i32);", place, place, atom(self.operand(value)?)),
                BinOp::Pow => format!("{} = {}.powf({});", place, place, v),
                _ => return unsupported(loc, format!("`{}=` on a float", op.python_symbol())),
            };
            w.line(line);
            return Ok(());
        }
        if tt.is_str() && vt.is_str() && op == BinOp::Add {
            let piece = self.str_ref(value)?;
            w.line(format!("{}.push_str({});", place, piece));
            return Ok(());
        }
        if tt.is_generic("list") && op == BinOp::Add {
            let items = self.iter_source(value)?;
            w.line(format!("{}.extend({});", place, items));
            return Ok(());
        }
        unsupported(loc, format!("`{}=` on {} and {}", op.python_symbol(), tt, vt))
    }

    // ========================================================================
    // Control flow
    // ========================================================================

    fn return_stmt(&mut self, w: &mut RustWriter, value: Option<&Expr>, loc: Location) -> Lower<()> {
        if self.init_fields.is_some() {
            return unsupported(loc, "`return` inside a constructor");
        }
        let optional = self.ret.optional_inner().is_some();
        let code = match value {
            Some(v) if !matches!(v.kind, ExprKind::NoneLit) => Some(self.return_value(v)?),
            _ => None,
        };
        let line = match (code, self.fallible, optional) {
            (Some(c), _, _) => format!("return {};", c),
            (None, true, true) => "return Ok(None);".to_string(),
            (None, true, false) => "return Ok(());".to_string(),
            (None, false, true) => "return None;".to_string(),
            (None, false, false) => "return;".to_string(),
        };
        w.line(line);
        Ok(())
    }

    fn if_stmt(&mut self, w: &mut RustWriter, test: &Expr, body: &[Stmt], orelse: &[Stmt]) -> Lower<()> {
        let cond = self.condition(test)?;
        w.open(format!("if {}", cond));
        self.block(w, body);
        let mut rest = orelse;
        loop {
            match rest {
                [] => break,
                [single] => {
                    if let StmtKind::If { test, body, orelse } = &single.kind {
                        match self.condition(test) {
                            Ok(c) => {
                                w.reopen(format!("else if {}", c));
                                self.block(w, body);
                                rest = orelse;
                                continue;
                            }
                            Err(unsupported) => {
                                w.reopen("else");
                                self.unit.placeholder(w, &unsupported);
                                break;
                            }
                        }
                    }
                    w.reopen("else");
                    self.block(w, rest);
                    break;
                }
                _ => {
                    w.reopen("else");
                    self.block(w, rest);
                    break;
                }
            }
        }
        w.close();
        Ok(())
    }

    fn loop_else(&self, body: &[Stmt], orelse: &[Stmt], loc: Location) -> Lower<()> {
        if !orelse.is_empty() && breaks_out(body) {
            return unsupported(loc, "loop `else` clause after a `break`");
        }
        Ok(())
    }

    fn while_stmt(&mut self, w: &mut RustWriter, test: &Expr, body: &[Stmt], orelse: &[Stmt], loc: Location) -> Lower<()> {
        self.loop_else(body, orelse, loc)?;
        let header = match test.kind {
            ExprKind::Bool(true) | ExprKind::Int(1) => "loop".to_string(),
            _ => format!("while {}", self.condition(test)?),
        };
        self.loop_depth += 1;
        w.open(header);
        self.block(w, body);
        w.close();
        self.loop_depth -= 1;
        self.inline(w, orelse);
        Ok(())
    }

    fn for_stmt(
        &mut self,
        w: &mut RustWriter,
        target: &Expr,
        iter: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
        loc: Location,
    ) -> Lower<()> {
        self.loop_else(body, orelse, loc)?;
        let source = self.iter_source(iter)?;
        let bindings = self.target_bindings(target);
        let pattern = match &target.kind {
            ExprKind::Name(n) if self.needs_mut(n) && body_assigns(body, n) => format!("mut {}", rust_ident(n)),
            _ => self.pattern(target)?,
        };
        let fresh: Vec<String> = bindings
            .iter()
            .map(|(n, _)| n.clone())
            .filter(|n| !self.declared.contains(n))
            .collect();
        self.declared.extend(fresh.iter().cloned());
        self.loop_depth += 1;
        w.open(format!("for {} in {}", pattern, source));
        self.block(w, body);
        w.close();
        self.loop_depth -= 1;
        for name in &fresh {
            self.declared.remove(name);
        }
        self.inline(w, orelse);
        Ok(())
    }

    fn jump(&mut self, w: &mut RustWriter, keyword: &str, loc: Location) -> Lower<()> {
        if self.loop_depth == 0 {
            return unsupported(loc, format!("`{}` outside a loop", keyword));
        }
        if self.attempt_loop_depth == Some(self.loop_depth) {
            return unsupported(loc, format!("`{}` out of a try block", keyword));
        }
        w.line(format!("{};", keyword));
        Ok(())
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Boxed error value for `raise exc`
    fn error_value(&mut self, exc: &Expr) -> Lower<String> {
        let lw = self.lw;
        match &exc.kind {
            ExprKind::Call { func, args, keywords } if keywords.is_empty() => match func.as_name() {
                Some(name) if lw.exceptions.contains(name) => {
                    let message = self.error_message(exc, name, args)?;
                    Ok(format!("Box::new({}::new({}))", name, message))
                }
                Some(name) if is_builtin_exception(name) => {
                    let message = self.error_message(exc, name, args)?;
                    Ok(format!("{}.into()", atom(message)))
                }
                _ => unsupported(exc.loc, "raise of a computed exception value"),
            },
            ExprKind::Name(name) if lw.exceptions.contains(name) => {
                Ok(format!("Box::new({}::new({}))", name, str_literal(name)))
            }
            ExprKind::Name(name) if is_builtin_exception(name) => Ok(format!("{}.into()", str_literal(name))),
            ExprKind::Name(name) if matches!(self.binding(name), Binding::HandlerError) => Ok(rust_ident(name)),
            _ => unsupported(exc.loc, "raise of a computed exception value"),
        }
    }

    fn raise(&mut self, w: &mut RustWriter, exc: Option<&Expr>, loc: Location) -> Lower<()> {
        let error = match exc {
            Some(e) => self.error_value(e)?,
            None => match &self.active_error {
                Some(var) => var.clone(),
                None => return unsupported(loc, "bare `raise` outside an exception handler"),
            },
        };
        match &self.exit {
            Exit::Propagate => w.line(format!("return Err({});", error)),
            Exit::Attempt(label) => w.line(format!("break '{} Err({});", label, error)),
            _ => return unsupported(loc, "`raise` where no error can be returned"),
        }
        Ok(())
    }

    /// `let attempt = 'attempt: { body; Ok(()) };` and the label used
    fn attempt_block(&mut self, w: &mut RustWriter, body: &[Stmt]) -> (String, String) {
        self.attempts += 1;
        let (var, label) = if self.attempts == 1 {
            ("attempt".to_string(), "attempt".to_string())
        } else {
            (format!("attempt_{}", self.attempts), format!("attempt_{}", self.attempts))
        };
        w.open(format!("let {}: Result<(), {}> = '{}:", var, ERROR_TYPE, label));
        let saved_exit = mem::replace(&mut self.exit, Exit::Attempt(label.clone()));
        let saved_loop = mem::replace(&mut self.attempt_loop_depth, Some(self.loop_depth));
        self.block(w, body);
        if !body.last().is_some_and(|s| matches!(s.kind, StmtKind::Raise { .. } | StmtKind::Return(_))) {
            w.line("Ok(())");
        }
        self.exit = saved_exit;
        self.attempt_loop_depth = saved_loop;
        w.close_with(";");
        (var, label)
    }

    fn try_stmt(
        &mut self,
        w: &mut RustWriter,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
        loc: Location,
    ) -> Lower<()> {
        let lw = self.lw;
        let body_fails = lw.inference.block_may_fail(lw.module, self.class_name(), body);

        if handlers.is_empty() {
            if !body_fails {
                self.inline(w, body);
                self.inline(w, orelse);
                self.inline(w, finalbody);
                return Ok(());
            }
            if leaves_early(finalbody) {
                return unsupported(loc, "`finally` block that leaves early");
            }
            if matches!(self.exit, Exit::Infallible | Exit::Expect(_)) {
                return unsupported(loc, "`try` whose errors cannot be returned");
            }
            let (var, _) = self.attempt_block(w, body);
            self.inline(w, finalbody);
            match &self.exit {
                Exit::Propagate => w.line(format!("{}?;", var)),
                Exit::Attempt(label) => {
                    w.open(format!("if let Err(error) = {}", var));
                    w.line(format!("break '{} Err(error);", label));
                    w.close();
                }
                _ => {}
            }
            return Ok(());
        }

        let [handler] = handlers else {
            return unsupported(loc, "`try` with several `except` clauses");
        };
        if !handler.is_catch_all() {
            let name = handler
                .exc_type
                .as_ref()
                .and_then(Expr::dotted_name)
                .unwrap_or_else(|| "<expression>".to_string());
            return unsupported(handler.loc, format!("`except {}` clause", name));
        }
        if !body_fails {
            return unsupported(loc, "exception handler around code with no error path");
        }
        if !finalbody.is_empty() && (leaves_early(body) || leaves_early(&handler.body) || leaves_early(orelse)) {
            return unsupported(loc, "`finally` after a block that leaves early");
        }

        let (var, _) = self.attempt_block(w, body);
        w.open(format!("match {}", var));
        w.open("Ok(()) =>");
        self.block(w, orelse);
        w.close();

        let uses_error = handler.name.is_some() || handler.body.iter().any(|s| {
            let mut bare = false;
            s.walk(&mut |inner: &Stmt| {
                if matches!(inner.kind, StmtKind::Raise { exc: None, .. }) {
                    bare = true;
                }
            });
            bare
        });
        let error_var = match &handler.name {
            Some(name) => rust_ident(name),
            None if uses_error => "error".to_string(),
            None => "_".to_string(),
        };
        w.open(format!("Err({}) =>", error_var));
        let saved_name = mem::replace(&mut self.handler_name, handler.name.clone());
        let saved_error = mem::replace(&mut self.active_error, uses_error.then(|| error_var.clone()));
        self.block(w, &handler.body);
        self.handler_name = saved_name;
        self.active_error = saved_error;
        w.close();
        w.close();
        self.inline(w, finalbody);
        Ok(())
    }
}

/// Loop body assigns `name`
fn body_assigns(body: &[Stmt], name: &str) -> bool {
    let mut found = false;
    for stmt in body {
        stmt.walk(&mut |s: &Stmt| match &s.kind {
            StmtKind::Assign { targets, .. } => {
                if targets.iter().any(|t| t.as_name() == Some(name)) {
                    found = true;
                }
            }
            StmtKind::AugAssign { target, .. } | StmtKind::AnnAssign { target, .. } => {
                if target.as_name() == Some(name) {
                    found = true;
                }
            }
            _ => {}
        });
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Location;

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt::new(kind, Location::new(1, 0))
    }

    #[test]
    fn test_breaks_out_ignores_nested_loops() {
        let inner = stmt(StmtKind::While {
            test: Expr::new(ExprKind::Bool(true), Location::new(1, 0)),
            body: vec![stmt(StmtKind::Break)],
            orelse: Vec::new(),
        });
        assert!(!breaks_out(std::slice::from_ref(&inner)));
        assert!(breaks_out(&[stmt(StmtKind::Break)]));
    }

    #[test]
    fn test_needs_annotation_for_empty_containers() {
        let empty = Expr::new(ExprKind::List(Vec::new()), Location::new(1, 0));
        let full = Expr::new(
            ExprKind::List(vec![Expr::new(ExprKind::Int(1), Location::new(1, 1))]),
            Location::new(1, 0),
        );
        assert!(needs_annotation(&empty));
        assert!(!needs_annotation(&full));
    }
}
