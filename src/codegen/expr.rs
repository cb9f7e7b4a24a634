//! Expression lowering

use crate::ast::{BinOp, BoolOp, CmpOp, Expr, ExprKind, FStringPart, Keyword, UnaryOp};
use crate::inference::binop_type;
use crate::inference::builtins::MUTATING_METHODS;
use crate::mappings::{fill_template, is_builtin_exception, math_constant, math_function, REFLECTION_BUILTINS};
use crate::types::{FunctionSig, Ownership, ParamSig, Type};

use super::function::{method_name, Binding, Exit, FnCtx};
use super::{rust_ident, Helper, Lower, Unsupported};

pub(crate) fn float_literal(v: f64) -> String {
    if v.is_nan() {
        "f64::NAN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 {
            "f64::INFINITY".to_string()
        } else {
            "f64::NEG_INFINITY".to_string()
        }
    } else {
        format!("{:?}", v)
    }
}

pub(crate) fn str_literal(s: &str) -> String {
    format!("{:?}", s)
}

fn escape_braces(s: &str) -> String {
    s.replace('{', "{{").replace('}', "}}")
}

/// Top-level operators, spaces or a leading prefix operator outside any bracket or string
fn needs_parens(code: &str) -> bool {
    if code.starts_with(&['-', '!', '&', '*'][..]) {
        return true;
    }
    let mut depth = 0i32;
    let mut in_str = false;
    let mut escaped = false;
    let mut prev = ' ';
    for c in code.chars() {
        if in_str {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_str = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_str = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ' ' if depth == 0 => return true,
            '.' if depth == 0 && prev == '.' => return true,
            _ => {}
        }
        prev = c;
    }
    false
}

/// Parenthesize `code` for use as a method receiver or cast operand
pub(crate) fn atom(code: String) -> String {
    if needs_parens(&code) {
        format!("({})", code)
    } else {
        code
    }
}

/// Numeric literals need a suffix to be method receivers
fn receiver(code: String, ty: &Type) -> String {
    let digits = code.strip_prefix('-').unwrap_or(&code);
    let is_literal = !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit() || c == '.' || c == 'e');
    if is_literal && digits.starts_with(|c: char| c.is_ascii_digit()) {
        let suffix = if ty.is_float() || digits.contains(&['.', 'e'][..]) { "f64" } else { "i64" };
        let literal = format!("{}_{}", code, suffix);
        return atom(literal);
    }
    atom(code)
}

fn precedence(op: BinOp) -> u8 {
    match op {
        BinOp::Pow => 7,
        BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod | BinOp::MatMul => 6,
        BinOp::Add | BinOp::Sub => 5,
        BinOp::LShift | BinOp::RShift => 4,
        BinOp::BitAnd => 3,
        BinOp::BitXor => 2,
        BinOp::BitOr => 1,
    }
}

/// Parenthesize an operand whose own operator binds looser than its parent
fn wrap_operand(code: String, child: &Expr, parent: u8, right: bool) -> String {
    let child_prec = match &child.kind {
        ExprKind::BinOp { op, .. } => Some(precedence(*op)),
        ExprKind::BoolOp { .. }
        | ExprKind::Compare { .. }
        | ExprKind::IfExp { .. }
        | ExprKind::UnaryOp { op: UnaryOp::Not, .. } => Some(0),
        _ => None,
    };
    match child_prec {
        Some(c) if c < parent || (right && c == parent) => format!("({})", code),
        _ => code,
    }
}

/// Closure parameter name that does not occur in `avoid`
fn fresh(base: &str, avoid: &str) -> String {
    let mut name = base.to_string();
    while avoid.contains(name.as_str()) {
        name.push('_');
    }
    name
}

fn is_place(e: &Expr) -> bool {
    matches!(
        e.kind,
        ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
    )
}

fn is_simple(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Name(_)
        | ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Bool(_)
        | ExprKind::NoneLit => true,
        ExprKind::Attribute { value, .. } => is_simple(value),
        _ => false,
    }
}

/// Shift amount is not a literal outside the `i64` width
pub(crate) fn shift_in_range(amount: &Expr) -> bool {
    match &amount.kind {
        ExprKind::Int(n) => (0..64).contains(n),
        ExprKind::UnaryOp {
            op: UnaryOp::Neg,
            operand,
        } => !matches!(operand.kind, ExprKind::Int(_)),
        _ => true,
    }
}

fn unsupported<T>(e: &Expr, what: impl Into<String>) -> Lower<T> {
    Err(Unsupported::new(e.loc, what))
}

impl<'a> FnCtx<'a> {
    // ========================================================================
    // Types
    // ========================================================================

    /// Type of `e`, re-derived from final signatures where inference left it open
    pub fn ty(&self, e: &Expr) -> Type {
        let inferred = self.lw.inference.type_of(e);
        if inferred.is_concrete() {
            return inferred;
        }
        let derived = match &e.kind {
            ExprKind::Name(n) => match self.binding(n) {
                Binding::Local(t) | Binding::Unbound(t) | Binding::Const(t) | Binding::Static(t) => t,
                Binding::Param(p) => p.ty,
                Binding::SelfRef => self
                    .class_name()
                    .map(|c| Type::Named(c.to_string()))
                    .unwrap_or(Type::Dynamic),
                _ => Type::Dynamic,
            },
            ExprKind::Call { func, .. } => self.callee_type(func),
            ExprKind::BinOp { op, left, right } => binop_type(*op, &self.ty(left), &self.ty(right)),
            _ => Type::Dynamic,
        };
        if derived.is_concrete() {
            derived
        } else {
            inferred
        }
    }

    fn callee_type(&self, func: &Expr) -> Type {
        if let Some(name) = func.as_name() {
            if let Binding::Class = self.binding(name) {
                return Type::Named(name.to_string());
            }
        }
        self.callee_sig(func)
            .map(|sig| sig.ret.clone())
            .unwrap_or(Type::Dynamic)
    }

    /// Signature of the module function or method `func` calls
    pub fn callee_sig(&self, func: &Expr) -> Option<&'a FunctionSig> {
        let lw: &'a super::Lowerer<'a> = self.lw;
        if let Some(name) = func.as_name() {
            if let Binding::Function = self.binding(name) {
                return lw.inference.signature(name);
            }
        }
        let qualified = lw.inference.resolve_call(lw.module, self.class_name(), func)?;
        lw.inference.signature(&qualified)
    }

    fn has_display(&self, ty: &Type) -> bool {
        match ty {
            Type::Named(class) => {
                self.lw.exceptions.contains(class) || self.lw.display_owner(class).is_some()
            }
            _ => false,
        }
    }

    // ========================================================================
    // Value modes
    // ========================================================================

    /// Natural rendering: places stay unborrowed, string literals stay `&str`
    pub fn expr(&mut self, e: &Expr) -> Lower<String> {
        match &e.kind {
            ExprKind::Int(v) => Ok(v.to_string()),
            ExprKind::BigInt(digits) => unsupported(e, format!("integer literal {} outside the 64-bit range", digits)),
            ExprKind::Float(v) => Ok(float_literal(*v)),
            ExprKind::Str(s) => Ok(str_literal(s)),
            ExprKind::Bool(b) => Ok(b.to_string()),
            ExprKind::NoneLit => Ok("None".to_string()),
            ExprKind::FString(parts) => self.fstring(e, parts),
            ExprKind::Name(n) => self.name(e, n),
            ExprKind::BinOp { op, left, right } => self.binop(e, *op, left, right),
            ExprKind::UnaryOp { op, operand } => self.unary(e, *op, operand),
            ExprKind::BoolOp { left, right, .. } => {
                if self.ty(left).is_bool() && self.ty(right).is_bool() {
                    self.condition(e)
                } else {
                    unsupported(e, "`and`/`or` used for an operand value")
                }
            }
            ExprKind::Compare { .. } => self.condition(e),
            ExprKind::Call { func, args, keywords } => self.call(e, func, args, keywords),
            ExprKind::Attribute { value, attr } => self.attribute(e, value, attr),
            ExprKind::Subscript { value, index } => self.subscript(e, value, index),
            ExprKind::List(items) => {
                let target = self.ty(e);
                self.list_literal(items, &target)
            }
            ExprKind::Tuple(items) => {
                let mut rendered = Vec::with_capacity(items.len());
                for item in items {
                    rendered.push(self.value(item)?);
                }
                Ok(if rendered.len() == 1 {
                    format!("({},)", rendered[0])
                } else {
                    format!("({})", rendered.join(", "))
                })
            }
            ExprKind::Set(items) => {
                let mut rendered = Vec::with_capacity(items.len());
                for item in items {
                    rendered.push(self.value(item)?);
                }
                Ok(format!("std::collections::HashSet::from([{}])", rendered.join(", ")))
            }
            ExprKind::Dict(pairs) => {
                if pairs.is_empty() {
                    return Ok("std::collections::HashMap::new()".to_string());
                }
                let (key_ty, value_ty) = match self.ty(e) {
                    Type::Generic { base, args } if base == "dict" && args.len() == 2 => {
                        (args[0].clone(), args[1].clone())
                    }
                    _ => (Type::Dynamic, Type::Dynamic),
                };
                let mut rendered = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    rendered.push(format!("({}, {})", self.coerce(k, &key_ty)?, self.coerce(v, &value_ty)?));
                }
                Ok(format!("std::collections::HashMap::from([{}])", rendered.join(", ")))
            }
            ExprKind::IfExp { test, body, orelse } => {
                let target = self.ty(e);
                if !target.is_concrete() {
                    return unsupported(e, "conditional expression with branches of different types");
                }
                let cond = self.condition(test)?;
                let then = self.coerce(body, &target)?;
                let otherwise = self.coerce(orelse, &target)?;
                Ok(format!("if {} {{ {} }} else {{ {} }}", cond, then, otherwise))
            }
            ExprKind::ListComp {
                element,
                target,
                iter,
                condition,
            } => self.list_comp(element, target, iter, condition.as_deref()),
            ExprKind::Lambda { .. } => unsupported(e, "lambda expression"),
            ExprKind::Slice { .. } => unsupported(e, "slice outside a subscript"),
            ExprKind::Starred(_) => unsupported(e, "starred expression"),
            ExprKind::Other { kind, .. } => unsupported(e, kind.clone()),
        }
    }

    fn name(&self, e: &Expr, name: &str) -> Lower<String> {
        match self.binding(name) {
            Binding::Local(_) | Binding::Param(_) | Binding::HandlerError => Ok(rust_ident(name)),
            Binding::SelfRef => Ok("self".to_string()),
            Binding::Const(_) | Binding::Function => Ok(rust_ident(name)),
            Binding::Unbound(_) => unsupported(e, format!("`{}` is not bound on every path to this use", name)),
            Binding::Static(t) if t.to_rust().is_none() => {
                unsupported(e, format!("module variable `{}` has no Rust type", name))
            }
            Binding::Static(_) => Ok(format!("(*{})", rust_ident(name))),
            Binding::Class => unsupported(e, format!("class `{}` used as a value", name)),
            Binding::Unknown => unsupported(e, format!("name `{}` has no binding in the generated code", name)),
        }
    }

    /// Owned value of `e`
    pub fn value(&mut self, e: &Expr) -> Lower<String> {
        match &e.kind {
            ExprKind::Str(s) => Ok(format!("String::from({})", str_literal(s))),
            ExprKind::Name(n) => {
                let code = self.name(e, n)?;
                let ty = self.ty(e);
                Ok(match self.binding(n) {
                    Binding::Param(p) if !self.generics.contains_key(n) => match p.ownership {
                        Ownership::ByValue if p.ty.is_copy() => code,
                        Ownership::ByRef if p.ty.is_str() => format!("{}.to_string()", code),
                        Ownership::ByRef if p.ty.is_generic("list") => format!("{}.to_vec()", code),
                        _ => format!("{}.clone()", code),
                    },
                    Binding::Const(t) if t.is_str() => format!("{}.to_string()", code),
                    Binding::Const(_) => code,
                    Binding::HandlerError => return unsupported(e, "exception object used as a value"),
                    Binding::Function => return unsupported(e, "function used as a value"),
                    _ if ty.is_copy() => code,
                    _ => format!("{}.clone()", code),
                })
            }
            ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => {
                let code = self.expr(e)?;
                let ty = self.ty(e);
                let is_property_call = code.ends_with(')');
                if ty.is_copy() || is_property_call || code.ends_with("to_vec()") {
                    Ok(code)
                } else {
                    Ok(format!("{}.clone()", code))
                }
            }
            _ => self.expr(e),
        }
    }

    /// Owned value, moving out of locals and by-value parameters
    pub fn value_move(&mut self, e: &Expr) -> Lower<String> {
        if let ExprKind::Name(n) = &e.kind {
            match self.binding(n) {
                Binding::Local(_) if self.closure_depth == 0 => return self.name(e, n),
                Binding::Param(p) if p.ownership == Ownership::ByValue && !self.generics.contains_key(n) => {
                    return self.name(e, n);
                }
                _ => {}
            }
        }
        self.value(e)
    }

    /// Value of `e` converted to `target` (`Some` wrapping, integer widening, empty containers)
    pub fn coerce(&mut self, e: &Expr, target: &Type) -> Lower<String> {
        self.coerce_with(e, target, false)
    }

    pub fn coerce_move(&mut self, e: &Expr, target: &Type) -> Lower<String> {
        self.coerce_with(e, target, true)
    }

    fn coerce_with(&mut self, e: &Expr, target: &Type, moving: bool) -> Lower<String> {
        if let Some(inner) = target.optional_inner() {
            if matches!(e.kind, ExprKind::NoneLit) {
                return Ok("None".to_string());
            }
            let ty = self.ty(e);
            if ty.optional_inner().is_some() {
                return if moving { self.value_move(e) } else { self.value(e) };
            }
            let inner = inner.clone();
            return Ok(format!("Some({})", self.coerce_with(e, &inner, moving)?));
        }
        if target.is_float() && self.ty(e).is_int() {
            return self.as_float(e);
        }
        match &e.kind {
            ExprKind::List(items) => return self.list_literal(items, target),
            ExprKind::Dict(pairs) if pairs.is_empty() => {
                return Ok("std::collections::HashMap::new()".to_string())
            }
            _ => {}
        }
        // no narrowing of `Optional` and no implicit conversion between distinct types
        let source = self.ty(e);
        if source.is_concrete() && target.is_concrete() && source != *target {
            return unsupported(e, format!("{} value where {} is expected", source, target));
        }
        if moving {
            self.value_move(e)
        } else {
            self.value(e)
        }
    }

    fn list_literal(&mut self, items: &[Expr], target: &Type) -> Lower<String> {
        if items.is_empty() {
            return Ok("Vec::new()".to_string());
        }
        let elem = match target {
            Type::Generic { base, args } if base == "list" && args.len() == 1 => args[0].clone(),
            _ => Type::Dynamic,
        };
        let mut rendered = Vec::with_capacity(items.len());
        for item in items {
            rendered.push(self.coerce(item, &elem)?);
        }
        Ok(format!("vec![{}]", rendered.join(", ")))
    }

    /// Integer expression as `f64`
    fn as_float(&mut self, e: &Expr) -> Lower<String> {
        if let ExprKind::Int(v) = e.kind {
            return Ok(float_literal(v as f64));
        }
        if self.ty(e).is_bool() {
            return Ok(format!("{} as i64 as f64", atom(self.operand(e)?)));
        }
        Ok(format!("{} as f64", atom(self.operand(e)?)))
    }

    /// Copy value for arithmetic and comparisons
    pub fn operand(&mut self, e: &Expr) -> Lower<String> {
        let ty = self.ty(e);
        if ty.is_bool() && !matches!(e.kind, ExprKind::Bool(_)) {
            return self.expr(e);
        }
        if !ty.is_concrete() {
            return unsupported(e, format!("operand of type {}", ty));
        }
        self.expr(e)
    }

    /// `&str` view of a string expression
    pub fn str_ref(&mut self, e: &Expr) -> Lower<String> {
        if !self.ty(e).is_str() {
            return unsupported(e, format!("{} value where a string is expected", self.ty(e)));
        }
        match &e.kind {
            ExprKind::Str(s) => Ok(str_literal(s)),
            ExprKind::Name(n) => match self.binding(n) {
                Binding::Param(p) if p.ownership == Ownership::ByRef => Ok(rust_ident(n)),
                Binding::Const(_) => Ok(rust_ident(n)),
                _ => Ok(format!("{}.as_str()", atom(self.expr(e)?))),
            },
            _ => Ok(format!("{}.as_str()", atom(self.expr(e)?))),
        }
    }

    /// Shared borrow of a container or object
    pub fn borrow(&mut self, e: &Expr) -> Lower<String> {
        if self.ty(e).is_str() {
            return self.str_ref(e);
        }
        if let ExprKind::Name(n) = &e.kind {
            match self.binding(n) {
                Binding::Param(p) if p.ownership == Ownership::ByRef => return Ok(rust_ident(n)),
                Binding::Param(p) if p.ownership == Ownership::MutRef => {
                    return Ok(format!("&*{}", rust_ident(n)))
                }
                Binding::SelfRef => return Ok("self".to_string()),
                _ => {}
            }
        }
        Ok(format!("&{}", atom(self.expr(e)?)))
    }

    /// Mutable borrow of a place
    pub fn borrow_mut(&mut self, e: &Expr) -> Lower<String> {
        match &e.kind {
            ExprKind::Name(n) => match self.binding(n) {
                Binding::Param(p) if p.ownership == Ownership::MutRef => Ok(format!("&mut *{}", rust_ident(n))),
                Binding::Param(_) | Binding::Local(_) => Ok(format!("&mut {}", rust_ident(n))),
                Binding::SelfRef => Ok("self".to_string()),
                _ => unsupported(e, format!("mutable borrow of `{}`", n)),
            },
            ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(format!("&mut {}", self.expr(e)?)),
            _ => unsupported(e, "mutable borrow of a temporary value"),
        }
    }

    /// Python truthiness as a Rust `bool`
    pub fn condition(&mut self, e: &Expr) -> Lower<String> {
        match &e.kind {
            ExprKind::BoolOp { op, left, right } => {
                let symbol = match op {
                    BoolOp::And => "&&",
                    BoolOp::Or => "||",
                };
                let side = |ctx: &mut Self, operand: &Expr| -> Lower<String> {
                    let code = ctx.condition(operand)?;
                    Ok(match &operand.kind {
                        ExprKind::BoolOp { op: inner, .. } if inner != op => format!("({})", code),
                        _ => code,
                    })
                };
                let l = side(self, left)?;
                let r = side(self, right)?;
                Ok(format!("{} {} {}", l, symbol, r))
            }
            ExprKind::UnaryOp {
                op: UnaryOp::Not,
                operand,
            } => Ok(format!("!{}", atom(self.condition(operand)?))),
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => self.compare(e, left, ops, comparators),
            _ => {
                let ty = self.ty(e);
                let code = self.expr(e)?;
                match &ty {
                    t if t.is_bool() => Ok(code),
                    t if t.is_int() => Ok(format!("{} != 0", code)),
                    t if t.is_float() => Ok(format!("{} != 0.0", code)),
                    t if t.is_str() || t.is_generic("list") || t.is_generic("dict") || t.is_generic("set") => {
                        Ok(format!("!{}.is_empty()", atom(code)))
                    }
                    t if matches!(t.optional_inner(), Some(Type::Named(_))) => Ok(format!("{}.is_some()", atom(code))),
                    t => unsupported(e, format!("truth value of a {} value", t)),
                }
            }
        }
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn binop(&mut self, e: &Expr, op: BinOp, left: &Expr, right: &Expr) -> Lower<String> {
        let (lt, rt) = (self.ty(left), self.ty(right));
        let numeric = |t: &Type| t.is_numeric() || t.is_bool();
        if numeric(&lt) && numeric(&rt) {
            return self.arithmetic(e, op, left, right, &lt, &rt);
        }
        match op {
            BinOp::Add if lt.is_str() && rt.is_str() => {
                let l = self.expr(left)?;
                let r = self.expr(right)?;
                Ok(format!("format!(\"{{}}{{}}\", {}, {})", l, r))
            }
            BinOp::Mul if lt.is_str() && rt.is_int() => {
                let s = self.expr(left)?;
                let n = self.operand(right)?;
                Ok(format!("{}.repeat({} as usize)", atom(s), atom(n)))
            }
            BinOp::Add if lt.is_generic("list") && rt.is_generic("list") => {
                let l = self.expr(left)?;
                let r = self.expr(right)?;
                Ok(format!("[&{}[..], &{}[..]].concat()", atom(l), atom(r)))
            }
            BinOp::Mul if lt.is_generic("list") && rt.is_int() && lt.element_type().is_copy() => {
                let l = self.expr(left)?;
                let n = self.operand(right)?;
                Ok(format!("{}.repeat({} as usize)", atom(l), atom(n)))
            }
            BinOp::BitOr | BinOp::BitAnd | BinOp::BitXor | BinOp::Sub
                if lt.is_generic("set") && rt.is_generic("set") =>
            {
                let l = self.borrow(left)?;
                let r = self.borrow(right)?;
                Ok(format!("({} {} {})", l, op.python_symbol(), r))
            }
            _ => unsupported(e, format!("`{}` on {} and {}", op.python_symbol(), lt, rt)),
        }
    }

    fn arithmetic(&mut self, e: &Expr, op: BinOp, left: &Expr, right: &Expr, lt: &Type, rt: &Type) -> Lower<String> {
        let float = lt.is_float() || rt.is_float();
        let parent = precedence(op);
        let side = |ctx: &mut Self, operand: &Expr, ty: &Type, right: bool| -> Lower<String> {
            if float && !ty.is_float() {
                return ctx.as_float(operand);
            }
            if ty.is_bool() {
                return Ok(format!("{} as i64", atom(ctx.operand(operand)?)));
            }
            Ok(wrap_operand(ctx.operand(operand)?, operand, parent, right))
        };

        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul => {
                let l = side(self, left, lt, false)?;
                let r = side(self, right, rt, true)?;
                Ok(format!("{} {} {}", l, op.python_symbol(), r))
            }
            BinOp::Div if float => {
                let l = side(self, left, lt, false)?;
                let r = side(self, right, rt, true)?;
                Ok(format!("{} / {}", l, r))
            }
            BinOp::Div => {
                let l = self.as_float(left)?;
                let r = self.as_float(right)?;
                Ok(format!("{} / {}", l, r))
            }
            BinOp::FloorDiv | BinOp::Mod => {
                let l = side(self, left, lt, false)?;
                let r = side(self, right, rt, false)?;
                let (helper, name) = match (op, float) {
                    (BinOp::FloorDiv, true) => return Ok(format!("({} / {}).floor()", l, r)),
                    (BinOp::FloorDiv, false) => (Helper::FloorDiv, "py_floordiv"),
                    (_, true) => (Helper::FloatModulo, "py_fmod"),
                    (_, false) => (Helper::Modulo, "py_mod"),
                };
                self.unit.helpers.insert(helper);
                Ok(format!("{}({}, {})", name, l, r))
            }
            BinOp::Pow => {
                if !float && matches!(&right.kind, ExprKind::UnaryOp { op: UnaryOp::Neg, .. }) {
                    return unsupported(e, "integer power with a negative exponent");
                }
                let base = if float && !lt.is_float() {
                    atom(self.as_float(left)?)
                } else {
                    receiver(self.operand(left)?, lt)
                };
                let exponent = self.operand(right)?;
                Ok(match (float, rt.is_float()) {
                    (true, true) => format!("{}.powf({})", base, exponent),
                    (true, false) => format!("{}.powi({} as i32)", base, atom(exponent)),
                    (false, _) => format!("{}.pow({} as u32)", base, atom(exponent)),
                })
            }
            BinOp::LShift | BinOp::RShift if !float && !shift_in_range(right) => {
                unsupported(e, format!("`{}` by a constant outside 0..64", op.python_symbol()))
            }
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::LShift | BinOp::RShift if !float => {
                let l = side(self, left, lt, false)?;
                let r = side(self, right, rt, true)?;
                Ok(format!("{} {} {}", l, op.python_symbol(), r))
            }
            _ => unsupported(e, format!("`{}` on {} and {}", op.python_symbol(), lt, rt)),
        }
    }

    fn unary(&mut self, e: &Expr, op: UnaryOp, operand: &Expr) -> Lower<String> {
        let ty = self.ty(operand);
        match op {
            UnaryOp::Not => self.condition(e),
            UnaryOp::Neg if ty.is_numeric() => Ok(format!("-{}", atom(self.operand(operand)?))),
            UnaryOp::Neg if ty.is_bool() => Ok(format!("-({} as i64)", self.operand(operand)?)),
            UnaryOp::Pos if ty.is_numeric() => self.operand(operand),
            UnaryOp::Invert if ty.is_int() => Ok(format!("!{}", atom(self.operand(operand)?))),
            _ => unsupported(e, format!("unary operator on a {} value", ty)),
        }
    }

    fn compare(&mut self, e: &Expr, left: &Expr, ops: &[CmpOp], comparators: &[Expr]) -> Lower<String> {
        let mut parts = Vec::with_capacity(ops.len());
        let mut lhs = left;
        for (op, rhs) in ops.iter().zip(comparators) {
            if !parts.is_empty() && !is_simple(lhs) {
                return unsupported(e, "comparison chain with a computed middle operand");
            }
            parts.push(self.compare_pair(e, *op, lhs, rhs)?);
            lhs = rhs;
        }
        Ok(parts.join(" && "))
    }

    fn compare_pair(&mut self, e: &Expr, op: CmpOp, lhs: &Expr, rhs: &Expr) -> Lower<String> {
        let none_check = |ctx: &mut Self, value: &Expr, present: bool| -> Lower<String> {
            let code = atom(ctx.expr(value)?);
            Ok(format!("{}.{}()", code, if present { "is_some" } else { "is_none" }))
        };
        match op {
            CmpOp::Is | CmpOp::Eq if matches!(rhs.kind, ExprKind::NoneLit) => return none_check(self, lhs, false),
            CmpOp::IsNot | CmpOp::NotEq if matches!(rhs.kind, ExprKind::NoneLit) => {
                return none_check(self, lhs, true)
            }
            CmpOp::Is | CmpOp::Eq if matches!(lhs.kind, ExprKind::NoneLit) => return none_check(self, rhs, false),
            CmpOp::IsNot | CmpOp::NotEq if matches!(lhs.kind, ExprKind::NoneLit) => {
                return none_check(self, rhs, true)
            }
            CmpOp::Is | CmpOp::IsNot => return unsupported(e, "identity comparison"),
            CmpOp::In => return self.membership(e, lhs, rhs),
            CmpOp::NotIn => return Ok(format!("!{}", atom(self.membership(e, lhs, rhs)?))),
            _ => {}
        }
        let Some(symbol) = op.rust_symbol() else {
            return unsupported(e, "comparison operator");
        };
        let (lt, rt) = (self.ty(lhs), self.ty(rhs));
        let numeric = |t: &Type| t.is_numeric() || t.is_bool();
        if numeric(&lt) && numeric(&rt) {
            let float = lt.is_float() || rt.is_float();
            let side = |ctx: &mut Self, value: &Expr, ty: &Type| -> Lower<String> {
                if float && !ty.is_float() {
                    ctx.as_float(value)
                } else if ty.is_bool() && !(lt.is_bool() && rt.is_bool()) {
                    Ok(format!("{} as i64", atom(ctx.operand(value)?)))
                } else {
                    ctx.operand(value)
                }
            };
            let l = side(self, lhs, &lt)?;
            let r = side(self, rhs, &rt)?;
            return Ok(format!("{} {} {}", l, symbol, r));
        }
        if lt.is_str() && rt.is_str() {
            let l = self.expr(lhs)?;
            let r = self.expr(rhs)?;
            return Ok(match op {
                CmpOp::Eq | CmpOp::NotEq => format!("{} {} {}", l, symbol, r),
                _ => format!("{}[..] {} {}[..]", atom(l), symbol, atom(r)),
            });
        }
        let comparable = |t: &Type| t.is_generic("list") || t.is_generic("tuple") || t.is_generic("Optional");
        if lt == rt && comparable(&lt) && lt.is_concrete() && matches!(op, CmpOp::Eq | CmpOp::NotEq) {
            let l = self.expr(lhs)?;
            let r = self.expr(rhs)?;
            return Ok(format!("{} {} {}", l, symbol, r));
        }
        unsupported(e, format!("comparison of {} with {}", lt, rt))
    }

    fn membership(&mut self, e: &Expr, item: &Expr, container: &Expr) -> Lower<String> {
        let ct = self.ty(container);
        let item_ty = self.ty(item);
        if ct.is_str() {
            let haystack = atom(self.expr(container)?);
            let needle = self.str_ref(item)?;
            return Ok(format!("{}.contains({})", haystack, needle));
        }
        let Type::Generic { base, args } = &ct else {
            return unsupported(e, format!("`in` on a {} value", ct));
        };
        let key = args.first().cloned().unwrap_or(Type::Dynamic);
        let recv = atom(self.expr(container)?);
        match base.as_str() {
            "list" if key.is_str() => {
                let needle = self.str_ref(item)?;
                let var = fresh("entry", &needle);
                Ok(format!("{}.iter().any(|{}| {} == {})", recv, var, var, needle))
            }
            "list" if key.is_copy() && item_ty.is_copy() => {
                let needle = self.coerce(item, &key)?;
                Ok(format!("{}.contains(&{})", recv, needle))
            }
            "dict" | "set" => {
                let lookup = self.key_ref(item, &key)?;
                let method = if base == "dict" { "contains_key" } else { "contains" };
                Ok(format!("{}.{}({})", recv, method, lookup))
            }
            _ => unsupported(e, format!("`in` on a {} value", ct)),
        }
    }

    /// Borrowed lookup key for maps and sets
    fn key_ref(&mut self, key: &Expr, key_ty: &Type) -> Lower<String> {
        if key_ty.is_str() {
            self.str_ref(key)
        } else if key_ty.is_copy() {
            Ok(format!("&{}", atom(self.coerce(key, key_ty)?)))
        } else {
            self.borrow(key)
        }
    }

    // ========================================================================
    // Attributes and subscripts
    // ========================================================================

    fn attribute(&mut self, e: &Expr, value: &Expr, attr: &str) -> Lower<String> {
        if value.as_name() == Some("math") && matches!(self.binding("math"), Binding::Unknown) {
            return math_constant(attr)
                .map(str::to_string)
                .ok_or_else(|| Unsupported::new(e.loc, format!("`math.{}`", attr)));
        }
        if value.as_name() == Some("self") {
            if let Some(fields) = &self.init_fields {
                return match fields.get(attr) {
                    Some(local) => Ok(local.clone()),
                    None => unsupported(e, format!("read of `self.{}` before the instance exists", attr)),
                };
            }
        }
        let recv_ty = self.ty(value);
        let Type::Named(class) = &recv_ty else {
            return unsupported(e, format!("attribute `{}` of a {} value", attr, recv_ty));
        };
        let lw = self.lw;
        if lw.exceptions.contains(class) && attr == "message" {
            return Ok(format!("{}.message", atom(self.expr(value)?)));
        }
        if lw.inference.field_type(class, attr).is_some() {
            let recv = atom(self.expr(value)?);
            return Ok(format!("{}.{}", recv, rust_ident(attr)));
        }
        let is_property = lw
            .inference
            .method_owner(class, attr)
            .and_then(|q| {
                let (owner, _) = q.split_once('.')?;
                lw.module.class(owner)?.method(attr).map(|m| m.has_decorator("property"))
            })
            .unwrap_or(false);
        if is_property {
            let recv = atom(self.expr(value)?);
            return Ok(format!("{}.{}()", recv, rust_ident(attr)));
        }
        unsupported(e, format!("attribute `{}` of `{}`", attr, class))
    }

    fn subscript(&mut self, e: &Expr, value: &Expr, index: &Expr) -> Lower<String> {
        let recv_ty = self.ty(value);
        if let ExprKind::Slice { lower, upper, step } = &index.kind {
            if !recv_ty.is_generic("list") || step.is_some() {
                return unsupported(e, format!("slice of a {} value", recv_ty));
            }
            let recv = atom(self.expr(value)?);
            let lo = match lower {
                Some(b) => self.list_index(&recv, b)?,
                None => String::new(),
            };
            let hi = match upper {
                Some(b) => self.list_index(&recv, b)?,
                None => String::new(),
            };
            return Ok(format!("{}[{}..{}].to_vec()", recv, lo, hi));
        }
        match &recv_ty {
            t if t.is_generic("list") => {
                let recv = atom(self.expr(value)?);
                let idx = self.list_index(&recv, index)?;
                Ok(format!("{}[{}]", recv, idx))
            }
            Type::Generic { base, args } if base == "dict" && args.len() == 2 => {
                let key = self.key_ref(index, &args[0])?;
                let recv = atom(self.expr(value)?);
                Ok(format!("{}[{}]", recv, key))
            }
            Type::Generic { base, args } if base == "tuple" => match index.kind {
                ExprKind::Int(i) if i >= 0 && (i as usize) < args.len() => {
                    Ok(format!("{}.{}", atom(self.expr(value)?), i))
                }
                _ => unsupported(e, "tuple index that is not a literal"),
            },
            t => unsupported(e, format!("indexing a {} value", t)),
        }
    }

    /// `usize` index into `recv`, counting negative literals from the end
    pub fn list_index(&mut self, recv: &str, index: &Expr) -> Lower<String> {
        match &index.kind {
            ExprKind::Int(i) if *i >= 0 => Ok(i.to_string()),
            ExprKind::UnaryOp {
                op: UnaryOp::Neg,
                operand,
            } => match operand.kind {
                ExprKind::Int(k) => Ok(format!("{}.len() - {}", recv, k)),
                _ => unsupported(index, "negative computed index"),
            },
            _ if self.ty(index).is_int() => Ok(format!("{} as usize", atom(self.operand(index)?))),
            _ => unsupported(index, format!("index of type {}", self.ty(index))),
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn call(&mut self, e: &Expr, func: &Expr, args: &[Expr], keywords: &[Keyword]) -> Lower<String> {
        if args.iter().any(|a| matches!(a.kind, ExprKind::Starred(_))) || keywords.iter().any(|k| k.name.is_none()) {
            return unsupported(e, "argument unpacking");
        }
        match &func.kind {
            ExprKind::Name(name) => match self.binding(name) {
                Binding::Function => self.call_function(e, name, args, keywords),
                Binding::Class => self.construct(e, name, args, keywords),
                Binding::Unknown => self.builtin_call(e, name, args, keywords),
                _ => unsupported(e, format!("call through the value `{}`", name)),
            },
            ExprKind::Attribute { value, attr } => self.method_call(e, func, value, attr, args, keywords),
            _ => unsupported(e, "call of a computed callee"),
        }
    }

    /// Apply the current error path to a fallible call
    pub fn fallible_call(&mut self, e: &Expr, code: String) -> Lower<String> {
        if self.closure_depth > 0 {
            return unsupported(e, "call that can fail inside a closure");
        }
        match &self.exit {
            Exit::Propagate => Ok(format!("{}?", code)),
            Exit::Attempt(label) => Ok(format!(
                "match {} {{ Ok(value) => value, Err(error) => break '{} Err(error.into()) }}",
                code, label
            )),
            Exit::Expect(message) => Ok(format!("{}.expect({:?})", code, message)),
            Exit::Infallible => unsupported(e, "call that can fail where no error can be returned"),
        }
    }

    /// Rendered arguments for `sig`, filling keywords and defaults
    fn arguments(
        &mut self,
        e: &Expr,
        sig: &FunctionSig,
        defaults: &[Option<&Expr>],
        args: &[Expr],
        keywords: &[Keyword],
    ) -> Lower<Vec<String>> {
        if args.len() > sig.params.len() {
            return unsupported(e, format!("too many arguments for `{}`", sig.qualified_name));
        }
        let mut slots: Vec<Option<&Expr>> = vec![None; sig.params.len()];
        for (slot, arg) in slots.iter_mut().zip(args) {
            *slot = Some(arg);
        }
        for keyword in keywords {
            let name = keyword.name.as_deref().unwrap_or_default();
            let Some(idx) = sig.params.iter().position(|p| p.name == name) else {
                return unsupported(e, format!("unknown keyword argument `{}`", name));
            };
            slots[idx] = Some(&keyword.value);
        }
        let mut rendered = Vec::with_capacity(slots.len());
        for (idx, param) in sig.params.iter().enumerate() {
            let arg = match slots[idx].or_else(|| defaults.get(idx).copied().flatten()) {
                Some(arg) => arg,
                None => return unsupported(e, format!("missing argument `{}`", param.name)),
            };
            rendered.push(self.argument(arg, param)?);
        }
        Ok(rendered)
    }

    fn argument(&mut self, arg: &Expr, param: &ParamSig) -> Lower<String> {
        if !param.ty.is_concrete() {
            return self.value(arg);
        }
        match param.ownership {
            Ownership::ByValue => self.coerce(arg, &param.ty),
            Ownership::ByRef => self.borrow(arg),
            Ownership::MutRef => self.borrow_mut(arg),
        }
    }

    /// Default expressions of a module function or lambda's parameters
    fn function_defaults(&self, name: &str) -> Vec<Option<&'a Expr>> {
        let lw: &'a super::Lowerer<'a> = self.lw;
        if let Some(func) = lw.module.function(name) {
            return func.params.iter().map(|p| p.default.as_ref()).collect();
        }
        for decl in &lw.module.body {
            if let crate::ast::Decl::Variable(var) = decl {
                if var.target == name {
                    if let Some(ExprKind::Lambda { params, .. }) = var.value.as_ref().map(|v| &v.kind) {
                        return params.iter().map(|p| p.default.as_ref()).collect();
                    }
                }
            }
        }
        Vec::new()
    }

    /// Defaults of a class constructor's parameters
    fn constructor_defaults(&self, class: &str) -> Vec<Option<&'a Expr>> {
        let lw: &'a super::Lowerer<'a> = self.lw;
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            let Some(decl) = lw.module.class(&name) else { break };
            if let Some(init) = decl.method("__init__") {
                return init.params.iter().skip(1).map(|p| p.default.as_ref()).collect();
            }
            if decl.is_dataclass() {
                return decl
                    .fields
                    .iter()
                    .filter(|f| !f.from_init)
                    .map(|f| f.default.as_ref())
                    .collect();
            }
            current = lw.inference.bases.get(&name).cloned();
        }
        Vec::new()
    }

    fn call_function(&mut self, e: &Expr, name: &str, args: &[Expr], keywords: &[Keyword]) -> Lower<String> {
        let lw = self.lw;
        let Some(sig) = lw.inference.signature(name) else {
            return unsupported(e, format!("call to `{}` without a signature", name));
        };
        let defaults = self.function_defaults(name);
        let rendered = self.arguments(e, sig, &defaults, args, keywords)?;
        let code = format!("{}({})", rust_ident(name), rendered.join(", "));
        if lw.inference.is_fallible(name) {
            self.fallible_call(e, code)
        } else {
            Ok(code)
        }
    }

    fn construct(&mut self, e: &Expr, class: &str, args: &[Expr], keywords: &[Keyword]) -> Lower<String> {
        let lw = self.lw;
        if lw.exceptions.contains(class) {
            let message = self.error_message(e, class, args)?;
            return Ok(format!("{}::new({})", class, message));
        }
        let key = format!("{}.__init__", class);
        let Some(sig) = lw.inference.signature(&key) else {
            return unsupported(e, format!("constructor of `{}`", class));
        };
        let defaults = self.constructor_defaults(class);
        let rendered = self.arguments(e, sig, &defaults, args, keywords)?;
        let code = format!("{}::new({})", class, rendered.join(", "));
        if lw.inference.is_fallible(&key) {
            self.fallible_call(e, code)
        } else {
            Ok(code)
        }
    }

    /// Message argument of an exception constructor
    pub fn error_message(&mut self, e: &Expr, exception: &str, args: &[Expr]) -> Lower<String> {
        match args {
            [] => Ok(str_literal(exception)),
            [arg] => match &arg.kind {
                ExprKind::Str(s) => Ok(str_literal(s)),
                _ if self.ty(arg).is_str() => self.value(arg),
                _ => self.to_string(e, arg),
            },
            _ => unsupported(e, "exception with several arguments"),
        }
    }

    fn method_call(
        &mut self,
        e: &Expr,
        func: &Expr,
        value: &Expr,
        attr: &str,
        args: &[Expr],
        keywords: &[Keyword],
    ) -> Lower<String> {
        if MUTATING_METHODS.contains(&attr) {
            self.not_static(value)?;
        }
        if value.as_name() == Some("math") && matches!(self.binding("math"), Binding::Unknown) {
            let Some((template, _)) = math_function(attr) else {
                return unsupported(e, format!("`math.{}`", attr));
            };
            let mut rendered = Vec::with_capacity(args.len());
            for arg in args {
                rendered.push(atom(self.operand(arg)?));
            }
            return Ok(fill_template(template, &rendered));
        }
        if matches!(&value.kind, ExprKind::Call { func, .. } if func.as_name() == Some("super")) {
            return unsupported(e, "call through `super()`");
        }
        let lw = self.lw;
        if let Some(qualified) = lw.inference.resolve_call(lw.module, self.class_name(), func) {
            return self.call_method(e, value, &qualified, args, keywords);
        }
        self.builtin_method(e, value, attr, args, keywords)
    }

    fn call_method(&mut self, e: &Expr, value: &Expr, qualified: &str, args: &[Expr], keywords: &[Keyword]) -> Lower<String> {
        let lw = self.lw;
        let Some(sig) = lw.inference.signature(qualified) else {
            return unsupported(e, format!("call to `{}`", qualified));
        };
        let Some((owner, method)) = qualified.split_once('.') else {
            return unsupported(e, format!("call to `{}`", qualified));
        };
        if method == "__init__" {
            return unsupported(e, "explicit constructor call");
        }
        let decl = lw.module.class(owner).and_then(|c| c.method(method));
        let takes_receiver = decl.map_or(true, |m| m.takes_receiver());
        if decl.is_some_and(|m| m.has_decorator("classmethod")) {
            return unsupported(e, format!("call to class method `{}`", qualified));
        }
        let defaults: Vec<Option<&Expr>> = decl
            .map(|m| {
                m.params
                    .iter()
                    .skip(usize::from(takes_receiver))
                    .map(|p| p.default.as_ref())
                    .collect()
            })
            .unwrap_or_default();
        let receiver_is_class = value
            .as_name()
            .is_some_and(|n| matches!(self.binding(n), Binding::Class));
        let rendered = self.arguments(e, sig, &defaults, args, keywords)?;
        let code = if !takes_receiver {
            let path = match value.as_name() {
                Some("self") => "Self".to_string(),
                Some(name) if receiver_is_class => name.to_string(),
                _ => owner.to_string(),
            };
            format!("{}::{}({})", path, method_name(method), rendered.join(", "))
        } else {
            if receiver_is_class {
                return unsupported(e, "method called through its class");
            }
            if self.init_fields.is_some() && value.as_name() == Some("self") {
                return unsupported(e, "method call on `self` inside the constructor");
            }
            let recv = atom(self.expr(value)?);
            format!("{}.{}({})", recv, method_name(method), rendered.join(", "))
        };
        if lw.inference.is_fallible(qualified) {
            self.fallible_call(e, code)
        } else {
            Ok(code)
        }
    }

    fn builtin_method(&mut self, e: &Expr, value: &Expr, attr: &str, args: &[Expr], keywords: &[Keyword]) -> Lower<String> {
        let ty = self.ty(value);
        let sort_reverse = match keywords {
            [] => false,
            [k] if attr == "sort" && k.name.as_deref() == Some("reverse") => match k.value.kind {
                ExprKind::Bool(b) => b,
                _ => return unsupported(e, "`reverse` that is not a literal"),
            },
            _ => return unsupported(e, format!("keyword arguments to `{}`", attr)),
        };
        let elem = match &ty {
            Type::Generic { args, .. } => args.first().cloned().unwrap_or(Type::Dynamic),
            _ => Type::Dynamic,
        };
        if ty.is_generic("list") {
            let recv = atom(self.expr(value)?);
            return match (attr, args) {
                ("append", [item]) => Ok(format!("{}.push({})", recv, self.coerce(item, &elem)?)),
                ("extend", [items]) => Ok(format!("{}.extend({})", recv, self.iter_source(items)?)),
                ("pop", []) => Ok(format!("{}.pop().expect(\"pop from empty list\")", recv)),
                ("pop", [index]) => Ok(format!("{}.remove({})", recv, self.list_index(&recv, index)?)),
                ("insert", [index, item]) => {
                    let idx = self.list_index(&recv, index)?;
                    Ok(format!("{}.insert({}, {})", recv, idx, self.coerce(item, &elem)?))
                }
                ("clear", []) | ("reverse", []) => Ok(format!("{}.{}()", recv, attr)),
                ("copy", []) => Ok(format!("{}.to_vec()", recv)),
                ("sort", []) => {
                    let sort = if elem.is_float() {
                        format!("{}.sort_by(|a, b| a.total_cmp(b))", recv)
                    } else if elem.is_int() || elem.is_str() || elem.is_bool() {
                        format!("{}.sort()", recv)
                    } else {
                        return unsupported(e, format!("sorting a list of {}", elem));
                    };
                    Ok(if sort_reverse {
                        format!("{{ {}; {}.reverse() }}", sort, recv)
                    } else {
                        sort
                    })
                }
                ("count", [item]) if elem.is_copy() => {
                    let needle = self.coerce(item, &elem)?;
                    let var = fresh("entry", &needle);
                    Ok(format!("{}.iter().filter(|{}| **{} == {}).count() as i64", recv, var, var, needle))
                }
                ("index", [item]) if elem.is_copy() => {
                    let needle = self.coerce(item, &elem)?;
                    let var = fresh("entry", &needle);
                    Ok(format!(
                        "{}.iter().position(|{}| *{} == {}).expect(\"value is not in list\") as i64",
                        recv, var, var, needle
                    ))
                }
                _ => unsupported(e, format!("list method `{}`", attr)),
            };
        }
        if ty.is_str() {
            if attr == "join" {
                let [items] = args else {
                    return unsupported(e, "`join` arity");
                };
                if self.ty(items) != Type::list(Type::str()) {
                    return unsupported(e, format!("`join` over a {} value", self.ty(items)));
                }
                let separator = self.str_ref(value)?;
                let parts = atom(self.expr(items)?);
                return Ok(format!("{}.join({})", parts, separator));
            }
            let recv = atom(self.expr(value)?);
            return match (attr, args) {
                ("upper", []) => Ok(format!("{}.to_uppercase()", recv)),
                ("lower", []) => Ok(format!("{}.to_lowercase()", recv)),
                ("strip", []) => Ok(format!("{}.trim().to_string()", recv)),
                ("lstrip", []) => Ok(format!("{}.trim_start().to_string()", recv)),
                ("rstrip", []) => Ok(format!("{}.trim_end().to_string()", recv)),
                ("startswith", [p]) => Ok(format!("{}.starts_with({})", recv, self.str_ref(p)?)),
                ("endswith", [p]) => Ok(format!("{}.ends_with({})", recv, self.str_ref(p)?)),
                ("replace", [from, to]) => {
                    let from = self.str_ref(from)?;
                    let to = self.str_ref(to)?;
                    Ok(format!("{}.replace({}, {})", recv, from, to))
                }
                ("split", []) => Ok(format!(
                    "{}.split_whitespace().map(String::from).collect::<Vec<String>>()",
                    recv
                )),
                ("split", [sep]) => Ok(format!(
                    "{}.split({}).map(String::from).collect::<Vec<String>>()",
                    recv,
                    self.str_ref(sep)?
                )),
                _ => unsupported(e, format!("string method `{}`", attr)),
            };
        }
        if let Type::Generic { base, args: targs } = &ty {
            if base == "dict" && targs.len() == 2 {
                let (key_ty, value_ty) = (targs[0].clone(), targs[1].clone());
                let recv = atom(self.expr(value)?);
                return match (attr, args) {
                    ("get", [key]) => Ok(format!("{}.get({}).cloned()", recv, self.key_ref(key, &key_ty)?)),
                    ("get", [key, default]) => {
                        let key = self.key_ref(key, &key_ty)?;
                        let default = self.coerce(default, &value_ty)?;
                        Ok(format!("{}.get({}).cloned().unwrap_or({})", recv, key, default))
                    }
                    ("keys", []) => Ok(format!("{}.keys().cloned().collect::<Vec<_>>()", recv)),
                    ("values", []) => Ok(format!("{}.values().cloned().collect::<Vec<_>>()", recv)),
                    ("items", []) => Ok(format!(
                        "{}.iter().map(|(key, value)| (key.clone(), value.clone())).collect::<Vec<_>>()",
                        recv
                    )),
                    ("pop", [key]) => Ok(format!(
                        "{}.remove({}).expect(\"key not found\")",
                        recv,
                        self.key_ref(key, &key_ty)?
                    )),
                    ("clear", []) => Ok(format!("{}.clear()", recv)),
                    ("update", [other]) if self.ty(other) == ty => Ok(format!("{}.extend({})", recv, self.value(other)?)),
                    _ => unsupported(e, format!("dict method `{}`", attr)),
                };
            }
            if base == "set" {
                let recv = atom(self.expr(value)?);
                return match (attr, args) {
                    ("add", [item]) => Ok(format!("{}.insert({})", recv, self.coerce(item, &elem)?)),
                    ("discard", [item]) => Ok(format!("{}.remove({})", recv, self.key_ref(item, &elem)?)),
                    ("clear", []) => Ok(format!("{}.clear()", recv)),
                    ("union", [other]) | ("intersection", [other]) | ("difference", [other]) if self.ty(other) == ty => {
                        let symbol = match attr {
                            "union" => "|",
                            "intersection" => "&",
                            _ => "-",
                        };
                        let l = self.borrow(value)?;
                        let r = self.borrow(other)?;
                        Ok(format!("({} {} {})", l, symbol, r))
                    }
                    _ => unsupported(e, format!("set method `{}`", attr)),
                };
            }
        }
        unsupported(e, format!("method `{}` on a {} value", attr, ty))
    }

    fn builtin_call(&mut self, e: &Expr, name: &str, args: &[Expr], keywords: &[Keyword]) -> Lower<String> {
        if REFLECTION_BUILTINS.contains(&name) {
            return unsupported(e, name.to_string());
        }
        if is_builtin_exception(name) {
            return unsupported(e, format!("`{}` outside a raise statement", name));
        }
        match name {
            "print" => return self.print(e, args, keywords),
            "sorted" => return self.sorted(e, args, keywords),
            _ if !keywords.is_empty() => return unsupported(e, format!("keyword arguments to `{}`", name)),
            _ => {}
        }
        let arg_ty = args.first().map(|a| self.ty(a)).unwrap_or(Type::Dynamic);
        match (name, args) {
            ("len", [arg]) => {
                let code = atom(self.expr(arg)?);
                if arg_ty.is_str() {
                    Ok(format!("{}.chars().count() as i64", code))
                } else if arg_ty.is_generic("list") || arg_ty.is_generic("dict") || arg_ty.is_generic("set") {
                    Ok(format!("{}.len() as i64", code))
                } else {
                    unsupported(e, format!("`len` of a {} value", arg_ty))
                }
            }
            ("str", []) => Ok("String::new()".to_string()),
            ("str", [arg]) => self.to_string(e, arg),
            ("int", [arg]) => match &arg_ty {
                t if t.is_str() => {
                    let code = format!("{}.trim().parse::<i64>()", atom(self.expr(arg)?));
                    self.fallible_call(e, code)
                }
                t if t.is_float() => Ok(format!("{} as i64", atom(self.operand(arg)?))),
                t if t.is_bool() => Ok(format!("i64::from({})", self.operand(arg)?)),
                t if t.is_int() => self.operand(arg),
                t => unsupported(e, format!("`int` of a {} value", t)),
            },
            ("float", [arg]) => match &arg_ty {
                t if t.is_str() => {
                    let code = format!("{}.trim().parse::<f64>()", atom(self.expr(arg)?));
                    self.fallible_call(e, code)
                }
                t if t.is_int() => self.as_float(arg),
                t if t.is_bool() => Ok(format!("f64::from(u8::from({}))", self.operand(arg)?)),
                t if t.is_float() => self.operand(arg),
                t => unsupported(e, format!("`float` of a {} value", t)),
            },
            ("bool", [arg]) => self.condition(arg),
            ("abs", [arg]) if arg_ty.is_numeric() => Ok(format!("{}.abs()", receiver(self.operand(arg)?, &arg_ty))),
            ("round", [arg]) if arg_ty.is_float() => {
                Ok(format!("{}.round_ties_even() as i64", receiver(self.operand(arg)?, &arg_ty)))
            }
            ("round", [arg]) if arg_ty.is_int() => self.operand(arg),
            ("min" | "max", [first, rest @ ..]) if !rest.is_empty() => {
                let types: Vec<Type> = args.iter().map(|a| self.ty(a)).collect();
                if !types.iter().all(Type::is_numeric) {
                    return unsupported(e, format!("`{}` of non-numeric values", name));
                }
                let float = types.iter().any(Type::is_float);
                let target = if float { Type::float() } else { Type::int() };
                let mut code = receiver(self.coerce(first, &target)?, &target);
                for arg in rest {
                    code = format!("{}.{}({})", code, name, self.coerce(arg, &target)?);
                }
                Ok(code)
            }
            ("min" | "max", [items]) => {
                let elem = arg_ty.element_type();
                if !(arg_ty.is_generic("list") && (elem.is_int() || elem.is_str())) {
                    return unsupported(e, format!("`{}` of a {} value", name, arg_ty));
                }
                let code = atom(self.expr(items)?);
                Ok(format!(
                    "{}.iter().{}().cloned().expect(\"{}() arg is an empty sequence\")",
                    code, name, name
                ))
            }
            ("sum", [items]) => {
                let elem = arg_ty.element_type();
                let is_range = matches!(&arg_ty, Type::Named(n) if n == "range");
                let rust_ty = if elem.is_int() || is_range {
                    "i64"
                } else if elem.is_float() {
                    "f64"
                } else {
                    return unsupported(e, format!("`sum` of a {} value", arg_ty));
                };
                let source = atom(self.iter_source(items)?);
                Ok(format!("{}.sum::<{}>()", source, rust_ty))
            }
            ("reversed", [items]) => Ok(format!("{}.rev().collect::<Vec<_>>()", atom(self.iter_source(items)?))),
            ("list", []) => Ok("Vec::new()".to_string()),
            ("list", [items]) => Ok(format!("{}.collect::<Vec<_>>()", atom(self.iter_source(items)?))),
            ("set", []) => Ok("std::collections::HashSet::new()".to_string()),
            ("set", [items]) => Ok(format!(
                "{}.collect::<std::collections::HashSet<_>>()",
                atom(self.iter_source(items)?)
            )),
            ("dict", []) => Ok("std::collections::HashMap::new()".to_string()),
            ("range", [_] | [_, _]) => self.iter_source(e),
            ("enumerate" | "zip", _) => Ok(format!("{}.collect::<Vec<_>>()", atom(self.iter_source(e)?))),
            _ => unsupported(e, format!("call to `{}`", name)),
        }
    }

    fn sorted(&mut self, e: &Expr, args: &[Expr], keywords: &[Keyword]) -> Lower<String> {
        let [items] = args else {
            return unsupported(e, "`sorted` arity");
        };
        let mut reverse = false;
        for keyword in keywords {
            match (keyword.name.as_deref(), &keyword.value.kind) {
                (Some("reverse"), ExprKind::Bool(b)) => reverse = *b,
                _ => return unsupported(e, "`sorted` with a key function"),
            }
        }
        let elem = self.ty(items).element_type();
        let sort = if elem.is_float() {
            "sorted.sort_by(|a, b| a.total_cmp(b));"
        } else if elem.is_int() || elem.is_str() || elem.is_bool() {
            "sorted.sort();"
        } else {
            return unsupported(e, format!("sorting {} values", elem));
        };
        let source = atom(self.iter_source(items)?);
        let reverse = if reverse { " sorted.reverse();" } else { "" };
        Ok(format!(
            "{{ let mut sorted = {}.collect::<Vec<_>>(); {}{} sorted }}",
            source, sort, reverse
        ))
    }

    /// `str(x)`
    fn to_string(&mut self, e: &Expr, arg: &Expr) -> Lower<String> {
        let ty = self.ty(arg);
        if let ExprKind::Name(n) = &arg.kind {
            if let Binding::HandlerError = self.binding(n) {
                return Ok(format!("{}.to_string()", rust_ident(n)));
            }
        }
        match &ty {
            t if t.is_str() => self.value(arg),
            t if t.is_int() => Ok(format!("{}.to_string()", receiver(self.operand(arg)?, t))),
            t if t.is_float() => Ok(format!("format!(\"{{:?}}\", {})", self.operand(arg)?)),
            t if t.is_bool() => Ok(format!(
                "String::from(if {} {{ \"True\" }} else {{ \"False\" }})",
                self.operand(arg)?
            )),
            t if self.has_display(t) => Ok(format!("{}.to_string()", atom(self.expr(arg)?))),
            t => unsupported(e, format!("`str` of a {} value", t)),
        }
    }

    // ========================================================================
    // Formatting
    // ========================================================================

    /// Format piece and argument for printing `e` the way Python's `str` does
    fn display(&mut self, e: &Expr) -> Lower<(String, Option<String>)> {
        if let ExprKind::Str(s) = &e.kind {
            return Ok((escape_braces(s), None));
        }
        if let ExprKind::Name(n) = &e.kind {
            if let Binding::HandlerError = self.binding(n) {
                return Ok(("{}".to_string(), Some(rust_ident(n))));
            }
        }
        let ty = self.ty(e);
        match &ty {
            t if t.is_int() || t.is_str() => Ok(("{}".to_string(), Some(self.expr(e)?))),
            t if t.is_float() => Ok(("{:?}".to_string(), Some(self.expr(e)?))),
            t if t.is_bool() => Ok((
                "{}".to_string(),
                Some(format!("if {} {{ \"True\" }} else {{ \"False\" }}", self.operand(e)?)),
            )),
            t if t.is_generic("list") && t.element_type().is_numeric() => {
                Ok(("{:?}".to_string(), Some(self.expr(e)?)))
            }
            t if self.has_display(t) => Ok(("{}".to_string(), Some(self.expr(e)?))),
            t => unsupported(e, format!("printing a {} value", t)),
        }
    }

    fn print(&mut self, e: &Expr, args: &[Expr], keywords: &[Keyword]) -> Lower<String> {
        let mut separator = " ".to_string();
        let mut newline = true;
        for keyword in keywords {
            match (keyword.name.as_deref(), &keyword.value.kind) {
                (Some("sep"), ExprKind::Str(s)) => separator = s.clone(),
                (Some("end"), ExprKind::Str(s)) if s.is_empty() => newline = false,
                (Some("end"), ExprKind::Str(s)) if s == "\n" => newline = true,
                _ => return unsupported(e, "`print` keyword argument"),
            }
        }
        let mut pieces = Vec::with_capacity(args.len());
        let mut values = Vec::new();
        for arg in args {
            let (piece, value) = self.display(arg)?;
            pieces.push(piece);
            values.extend(value);
        }
        let template = pieces.join(&escape_braces(&separator));
        let mac = if newline { "println!" } else { "print!" };
        Ok(match (template.is_empty(), values.is_empty()) {
            (true, _) if newline => "println!()".to_string(),
            (_, true) => format!("{}({:?})", mac, template),
            _ => format!("{}({:?}, {})", mac, template, values.join(", ")),
        })
    }

    fn fstring(&mut self, e: &Expr, parts: &[FStringPart]) -> Lower<String> {
        let mut template = String::new();
        let mut values = Vec::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => template.push_str(&escape_braces(text)),
                FStringPart::Value {
                    conversion: Some(c), ..
                } => return unsupported(e, format!("`!{}` conversion in an f-string", c)),
                FStringPart::Value {
                    value,
                    spec: Some(spec),
                    ..
                } => {
                    let ty = self.ty(value);
                    let Some((piece, cast)) = format_spec(spec, &ty) else {
                        return unsupported(e, format!("format spec `{}` for a {} value", spec, ty));
                    };
                    template.push_str(&piece);
                    values.push(if cast { self.as_float(value)? } else { self.expr(value)? });
                }
                FStringPart::Value { value, .. } => {
                    let (piece, code) = self.display(value)?;
                    template.push_str(&piece);
                    values.extend(code);
                }
            }
        }
        Ok(if values.is_empty() {
            format!("String::from({:?})", template.replace("{{", "{").replace("}}", "}"))
        } else {
            format!("format!({:?}, {})", template, values.join(", "))
        })
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    /// Iterator over owned elements of `e`
    pub fn iter_source(&mut self, e: &Expr) -> Lower<String> {
        if let ExprKind::Call { func, args, keywords } = &e.kind {
            if keywords.is_empty() {
                if let Some(name) = func.as_name() {
                    if matches!(self.binding(name), Binding::Unknown) {
                        match (name, args.as_slice()) {
                            ("range", _) => return self.range(e, args),
                            ("enumerate", [items]) => {
                                let source = atom(self.iter_source(items)?);
                                return Ok(format!("{}.enumerate().map(|(index, item)| (index as i64, item))", source));
                            }
                            ("zip", [a, b]) => {
                                let left = atom(self.iter_source(a)?);
                                let right = self.iter_source(b)?;
                                return Ok(format!("{}.zip({})", left, right));
                            }
                            ("reversed", [items]) => return Ok(format!("{}.rev()", atom(self.iter_source(items)?))),
                            ("sorted", _) => return Ok(format!("{}.into_iter()", atom(self.expr(e)?))),
                            _ => {}
                        }
                    }
                }
                if let ExprKind::Attribute { value, attr } = &func.kind {
                    if self.ty(value).is_generic("dict") && args.is_empty() {
                        let recv = atom(self.expr(value)?);
                        match attr.as_str() {
                            "items" => {
                                return Ok(format!("{}.iter().map(|(key, value)| (key.clone(), value.clone()))", recv))
                            }
                            "keys" => return Ok(format!("{}.keys().cloned()", recv)),
                            "values" => return Ok(format!("{}.values().cloned()", recv)),
                            _ => {}
                        }
                    }
                }
            }
        }
        let ty = self.ty(e);
        let code = atom(self.expr(e)?);
        let container = ty.is_generic("list") || ty.is_generic("set") || ty.is_generic("dict");
        if container && !is_place(e) {
            return Ok(format!("{}.into_iter()", code));
        }
        match &ty {
            t if t.is_generic("list") || t.is_generic("set") => {
                if t.element_type().is_copy() {
                    Ok(format!("{}.iter().copied()", code))
                } else {
                    Ok(format!("{}.iter().cloned()", code))
                }
            }
            t if t.is_generic("dict") => Ok(format!("{}.keys().cloned()", code)),
            t if t.is_str() => Ok(format!("{}.chars().map(|c| c.to_string())", code)),
            Type::Named(n) if n == "range" => Ok(format!("{}.clone()", code)),
            t => unsupported(e, format!("iteration over a {} value", t)),
        }
    }

    fn range(&mut self, e: &Expr, args: &[Expr]) -> Lower<String> {
        for arg in args {
            if !self.ty(arg).is_int() {
                return unsupported(e, format!("`range` over a {} value", self.ty(arg)));
            }
        }
        match args {
            [stop] => Ok(format!("0..{}", self.operand(stop)?)),
            [start, stop] => Ok(format!("{}..{}", self.operand(start)?, self.operand(stop)?)),
            [start, stop, step] => {
                let start = self.operand(start)?;
                let stop = self.operand(stop)?;
                match &step.kind {
                    ExprKind::Int(k) if *k > 0 => Ok(format!("({}..{}).step_by({})", start, stop, k)),
                    ExprKind::UnaryOp {
                        op: UnaryOp::Neg,
                        operand,
                    } => match operand.kind {
                        ExprKind::Int(k) if k > 0 => Ok(format!(
                            "(({} + 1)..={}).rev().step_by({})",
                            stop, start, k
                        )),
                        _ => unsupported(e, "`range` step that is not a literal"),
                    },
                    _ => unsupported(e, "`range` step that is not a non-zero literal"),
                }
            }
            _ => unsupported(e, "`range` arity"),
        }
    }

    /// Closure or loop pattern for a target
    pub fn pattern(&self, target: &Expr) -> Lower<String> {
        match &target.kind {
            ExprKind::Name(n) => Ok(rust_ident(n)),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let mut names = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_name() {
                        Some(n) => names.push(rust_ident(n)),
                        None => return unsupported(target, "nested loop target"),
                    }
                }
                Ok(format!("({})", names.join(", ")))
            }
            _ => unsupported(target, "loop target that is not a name"),
        }
    }

    /// Names and element types a target binds
    pub fn target_bindings(&self, target: &Expr) -> Vec<(String, Type)> {
        match &target.kind {
            ExprKind::Name(n) => vec![(n.clone(), self.ty(target))],
            ExprKind::Tuple(items) | ExprKind::List(items) => items
                .iter()
                .filter_map(|i| i.as_name().map(|n| (n.to_string(), self.ty(i))))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn list_comp(&mut self, element: &Expr, target: &Expr, iter: &Expr, condition: Option<&Expr>) -> Lower<String> {
        let source = atom(self.iter_source(iter)?);
        let pattern = self.pattern(target)?;
        let mark = self.bound.len();
        let bindings = self.target_bindings(target);
        self.bound.extend(bindings);
        self.closure_depth += 1;
        let body = self.comprehension_body(element, condition);
        self.closure_depth -= 1;
        self.bound.truncate(mark);
        let (value, filter) = body?;
        Ok(match filter {
            Some(cond) => format!(
                "{}.filter_map(|{}| if {} {{ Some({}) }} else {{ None }}).collect::<Vec<_>>()",
                source, pattern, cond, value
            ),
            None => format!("{}.map(|{}| {}).collect::<Vec<_>>()", source, pattern, value),
        })
    }

    fn comprehension_body(&mut self, element: &Expr, condition: Option<&Expr>) -> Lower<(String, Option<String>)> {
        let value = self.value(element)?;
        let filter = match condition {
            Some(c) => Some(self.condition(c)?),
            None => None,
        };
        Ok((value, filter))
    }
}

/// Rust format piece for a Python format spec, and whether the value needs an `f64` cast
fn format_spec(spec: &str, ty: &Type) -> Option<(String, bool)> {
    let (body, kind) = match spec.chars().last() {
        Some(c) if "dsfxXobeE".contains(c) => (&spec[..spec.len() - 1], Some(c)),
        _ => (spec, None),
    };
    if body.contains(&[',', '_', '%', '=', ' ', '{', '#'][..]) {
        return None;
    }
    let numeric = ty.is_int() || ty.is_float();
    let (suffix, cast) = match kind {
        None if ty.is_float() => ("?", false),
        None if ty.is_int() || ty.is_str() => ("", false),
        Some('d') if ty.is_int() => ("", false),
        Some('s') if ty.is_str() => ("", false),
        Some('f') if numeric => ("", ty.is_int()),
        Some('e') if numeric => ("e", ty.is_int()),
        Some('E') if numeric => ("E", ty.is_int()),
        Some('x') if ty.is_int() => ("x", false),
        Some('X') if ty.is_int() => ("X", false),
        Some('o') if ty.is_int() => ("o", false),
        Some('b') if ty.is_int() => ("b", false),
        _ => return None,
    };
    let body = if kind == Some('f') && !body.contains('.') {
        format!("{}.6", body)
    } else {
        body.to_string()
    };
    if body.is_empty() && suffix.is_empty() {
        return Some(("{}".to_string(), cast));
    }
    Some((format!("{{:{}{}}}", body, suffix), cast))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atom_parenthesizes_operators_only() {
        assert_eq!(atom("x".to_string()), "x");
        assert_eq!(atom("foo(a, b)".to_string()), "foo(a, b)");
        assert_eq!(atom("a + b".to_string()), "(a + b)");
        assert_eq!(atom("-x".to_string()), "(-x)");
        assert_eq!(atom("0..n".to_string()), "(0..n)");
        assert_eq!(atom("\"a b\"".to_string()), "\"a b\"");
    }

    #[test]
    fn test_receiver_suffixes_literals() {
        assert_eq!(receiver("2".to_string(), &Type::int()), "2_i64");
        assert_eq!(receiver("2.5".to_string(), &Type::float()), "2.5_f64");
        assert_eq!(receiver("x".to_string(), &Type::int()), "x");
    }

    #[test]
    fn test_format_spec_translation() {
        assert_eq!(format_spec(".2f", &Type::float()), Some(("{:.2}".to_string(), false)));
        assert_eq!(format_spec(".2f", &Type::int()), Some(("{:.2}".to_string(), true)));
        assert_eq!(format_spec("f", &Type::float()), Some(("{:.6}".to_string(), false)));
        assert_eq!(format_spec(">8", &Type::str()), Some(("{:>8}".to_string(), false)));
        assert_eq!(format_spec("x", &Type::int()), Some(("{:x}".to_string(), false)));
        assert_eq!(format_spec(",", &Type::int()), None);
        assert_eq!(format_spec("x", &Type::str()), None);
    }

    #[test]
    fn test_float_literals_stay_floats() {
        assert_eq!(float_literal(1.0), "1.0");
        assert_eq!(float_literal(0.5), "0.5");
        assert_eq!(float_literal(f64::INFINITY), "f64::INFINITY");
    }
}
