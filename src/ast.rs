//! Syntax tree model
//!
//! Language-agnostic representation of one parsed source module. A [`Module`] is built once
//! per run (by [`crate::frontend`] or [`Module::from_json`]), gets its expression ids
//! assigned, is validated, and is read-only afterwards. Every pass traverses it in source
//! order, depth-first.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{Result, TranspileError};

/// Line/column position in the source file (1-based)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Identity of an expression node. Assigned once by [`Module::assign_expr_ids`]; `0` means
/// "not yet assigned".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ExprId(pub u32);

/// Top-level unit: one source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Declared module name (file stem unless overridden)
    pub name: String,
    /// Source file path as given to the front end
    pub path: String,
    #[serde(default)]
    pub doc: Option<String>,
    pub body: Vec<Decl>,
}

/// Top-level declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decl {
    Function(Function),
    Class(Class),
    Import(Import),
    Variable(Variable),
    /// Executable statement at module level
    Statement(Stmt),
}

impl Decl {
    pub fn location(&self) -> Location {
        match self {
            Decl::Function(f) => f.loc,
            Decl::Class(c) => c.loc,
            Decl::Import(i) => i.loc,
            Decl::Variable(v) => v.loc,
            Decl::Statement(s) => s.loc,
        }
    }

    /// Human-readable label used in logs and report headings
    pub fn label(&self) -> String {
        match self {
            Decl::Function(f) => format!("function {}", f.name),
            Decl::Class(c) => format!("class {}", c.name),
            Decl::Import(i) => format!("import {}", i.module),
            Decl::Variable(v) => format!("variable {}", v.target),
            Decl::Statement(s) => format!("statement at line {}", s.loc.line),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    /// Declared return annotation
    #[serde(default)]
    pub returns: Option<Expr>,
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub decorators: Vec<Expr>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub doc: Option<String>,
    pub loc: Location,
}

impl Function {
    pub fn has_decorator(&self, name: &str) -> bool {
        self.decorators.iter().any(|d| d.dotted_name().as_deref() == Some(name))
    }

    /// First parameter is the receiver (`self`/`cls`) for anything but static methods
    pub fn takes_receiver(&self) -> bool {
        !self.has_decorator("staticmethod")
            && self
                .params
                .first()
                .is_some_and(|p| p.kind == ParamKind::Positional)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamKind {
    Positional,
    KeywordOnly,
    /// `*args`
    VarArgs,
    /// `**kwargs`
    KwArgs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default)]
    pub annotation: Option<Expr>,
    #[serde(default)]
    pub default: Option<Expr>,
    pub kind: ParamKind,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub name: String,
    #[serde(default)]
    pub bases: Vec<Expr>,
    #[serde(default)]
    pub decorators: Vec<Expr>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub methods: Vec<Function>,
    /// Class-body statements that are neither fields nor methods
    #[serde(default)]
    pub other: Vec<Stmt>,
    #[serde(default)]
    pub doc: Option<String>,
    pub loc: Location,
}

impl Class {
    pub fn method(&self, name: &str) -> Option<&Function> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_decorator(&self, name: &str) -> bool {
        self.decorators.iter().any(|d| d.dotted_name().as_deref() == Some(name))
    }

    /// `@dataclass`, `@dataclasses.dataclass` or either called with options
    pub fn is_dataclass(&self) -> bool {
        self.decorators.iter().any(|d| {
            let target = match &d.kind {
                ExprKind::Call { func, .. } => func.dotted_name(),
                _ => d.dotted_name(),
            };
            matches!(target.as_deref(), Some("dataclass") | Some("dataclasses.dataclass"))
        })
    }

    /// Base class names that carry behaviour (`object`, `ABC`, `Protocol`, `Generic[...]`
    /// are not real bases for translation purposes).
    pub fn effective_bases(&self) -> Vec<String> {
        self.bases
            .iter()
            .filter_map(|b| b.dotted_name())
            .filter(|name| {
                !matches!(
                    name.as_str(),
                    "object" | "ABC" | "abc.ABC" | "Protocol" | "typing.Protocol"
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub annotation: Option<Expr>,
    /// Class-level default, or the value assigned in `__init__`
    #[serde(default)]
    pub default: Option<Expr>,
    /// Assigned in `__init__` (instance attribute) rather than at class level. The
    /// annotation/default of such a field mirror expressions owned by `__init__` and are not
    /// part of the traversal.
    #[serde(default)]
    pub from_init: bool,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    /// Dotted module path (`os.path`), empty for `from . import x`
    pub module: String,
    #[serde(default)]
    pub alias: Option<String>,
    /// Imported names for `from m import a, b`
    #[serde(default)]
    pub names: Vec<ImportName>,
    #[serde(default)]
    pub is_from: bool,
    /// Number of leading dots of a relative import
    #[serde(default)]
    pub level: u32,
    pub loc: Location,
}

impl Import {
    /// First segment of the module path (`os` for `os.path`)
    pub fn root(&self) -> &str {
        self.module.split('.').next().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportName {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
}

/// Module-level binding `NAME[: T] = value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub target: String,
    #[serde(default)]
    pub annotation: Option<Expr>,
    #[serde(default)]
    pub value: Option<Expr>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// `a = b = value`
    Assign { targets: Vec<Expr>, value: Expr },
    /// `target: annotation [= value]`
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
    },
    AugAssign { target: Expr, op: BinOp, value: Expr },
    Expr(Expr),
    Return(Option<Expr>),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    Break,
    Continue,
    Pass,
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<Handler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    Assert { test: Expr, msg: Option<Expr> },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    /// Syntax the model has no structured form for (`with`, `del`, nested `def`, ...)
    Other { kind: String, exprs: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handler {
    #[serde(default)]
    pub exc_type: Option<Expr>,
    #[serde(default)]
    pub name: Option<String>,
    pub body: Vec<Stmt>,
    pub loc: Location,
}

impl Handler {
    /// `except:` / `except Exception` / `except BaseException`
    pub fn is_catch_all(&self) -> bool {
        match &self.exc_type {
            None => true,
            Some(ty) => matches!(
                ty.dotted_name().as_deref(),
                Some("Exception") | Some("BaseException")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    #[serde(default)]
    pub id: ExprId,
    pub kind: ExprKind,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Int(i64),
    /// Integer literal outside the signed 64-bit range, kept as source digits
    BigInt(String),
    Float(f64),
    Str(String),
    Bool(bool),
    NoneLit,
    FString(Vec<FStringPart>),
    Name(String),
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
    BoolOp {
        op: BoolOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    Attribute { value: Box<Expr>, attr: String },
    Subscript { value: Box<Expr>, index: Box<Expr> },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Lambda { params: Vec<Param>, body: Box<Expr> },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    /// `[element for target in iter if condition]`
    ListComp {
        element: Box<Expr>,
        target: Box<Expr>,
        iter: Box<Expr>,
        condition: Option<Box<Expr>>,
    },
    Starred(Box<Expr>),
    /// Expression syntax without a structured form (`yield`, `await`, generators, ...)
    Other { kind: String, children: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FStringPart {
    Literal(String),
    Value {
        value: Expr,
        #[serde(default)]
        spec: Option<String>,
        #[serde(default)]
        conversion: Option<char>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    /// `None` for `**mapping`
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    MatMul,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
}

impl BinOp {
    pub fn python_symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::MatMul => "@",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
        }
    }

    pub fn from_python(symbol: &str) -> Option<BinOp> {
        let op = match symbol.trim_end_matches('=') {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "//" => BinOp::FloorDiv,
            "%" => BinOp::Mod,
            "**" => BinOp::Pow,
            "@" => BinOp::MatMul,
            "&" => BinOp::BitAnd,
            "|" => BinOp::BitOr,
            "^" => BinOp::BitXor,
            "<<" => BinOp::LShift,
            ">>" => BinOp::RShift,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    pub fn from_python(symbol: &str) -> Option<CmpOp> {
        let normalized: Vec<&str> = symbol.split_whitespace().collect();
        let op = match normalized.as_slice() {
            ["=="] => CmpOp::Eq,
            ["!="] | ["<>"] => CmpOp::NotEq,
            ["<"] => CmpOp::Lt,
            ["<="] => CmpOp::LtE,
            [">"] => CmpOp::Gt,
            [">="] => CmpOp::GtE,
            ["in"] => CmpOp::In,
            ["not", "in"] => CmpOp::NotIn,
            ["is"] => CmpOp::Is,
            ["is", "not"] => CmpOp::IsNot,
            _ => return None,
        };
        Some(op)
    }

    /// Rust operator for the ordering/equality comparisons
    pub fn rust_symbol(self) -> Option<&'static str> {
        match self {
            CmpOp::Eq => Some("=="),
            CmpOp::NotEq => Some("!="),
            CmpOp::Lt => Some("<"),
            CmpOp::LtE => Some("<="),
            CmpOp::Gt => Some(">"),
            CmpOp::GtE => Some(">="),
            _ => None,
        }
    }
}

impl Expr {
    pub fn new(kind: ExprKind, loc: Location) -> Self {
        Self {
            id: ExprId::default(),
            kind,
            loc,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name(name) => Some(name),
            _ => None,
        }
    }

    /// `a.b.c` for chains of names and attributes, also looking through `Generic[...]`
    pub fn dotted_name(&self) -> Option<String> {
        match &self.kind {
            ExprKind::Name(name) => Some(name.clone()),
            ExprKind::Attribute { value, attr } => {
                value.dotted_name().map(|base| format!("{}.{}", base, attr))
            }
            ExprKind::Call { func, .. } => func.dotted_name(),
            _ => None,
        }
    }

    /// True for `self.<attr>`, returning the attribute name
    pub fn self_attribute(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Attribute { value, attr } if value.as_name() == Some("self") => {
                Some(attr.as_str())
            }
            _ => None,
        }
    }

    /// Direct sub-expressions in source order
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Int(_)
            | ExprKind::BigInt(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Bool(_)
            | ExprKind::NoneLit
            | ExprKind::Name(_) => Vec::new(),
            ExprKind::FString(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    FStringPart::Value { value, .. } => Some(value),
                    FStringPart::Literal(_) => None,
                })
                .collect(),
            ExprKind::BinOp { left, right, .. } | ExprKind::BoolOp { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
            ExprKind::UnaryOp { operand, .. } => vec![operand.as_ref()],
            ExprKind::Compare {
                left, comparators, ..
            } => std::iter::once(left.as_ref())
                .chain(comparators.iter())
                .collect(),
            ExprKind::Call {
                func,
                args,
                keywords,
            } => std::iter::once(func.as_ref())
                .chain(args.iter())
                .chain(keywords.iter().map(|k| &k.value))
                .collect(),
            ExprKind::Attribute { value, .. } => vec![value.as_ref()],
            ExprKind::Subscript { value, index } => vec![value.as_ref(), index.as_ref()],
            ExprKind::Slice { lower, upper, step } => [lower, upper, step]
                .into_iter()
                .filter_map(|e| e.as_deref())
                .collect(),
            ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
                items.iter().collect()
            }
            ExprKind::Dict(pairs) => pairs.iter().flat_map(|(k, v)| [k, v]).collect(),
            ExprKind::Lambda { params, body } => params
                .iter()
                .filter_map(|p| p.default.as_ref())
                .chain(std::iter::once(body.as_ref()))
                .collect(),
            ExprKind::IfExp { test, body, orelse } => {
                // source order: body if test else orelse
                vec![body.as_ref(), test.as_ref(), orelse.as_ref()]
            }
            ExprKind::ListComp {
                element,
                target,
                iter,
                condition,
            } => {
                let mut out = vec![element.as_ref(), target.as_ref(), iter.as_ref()];
                if let Some(cond) = condition {
                    out.push(cond.as_ref());
                }
                out
            }
            ExprKind::Starred(inner) => vec![inner.as_ref()],
            ExprKind::Other { children, .. } => children.iter().collect(),
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            ExprKind::Int(_)
            | ExprKind::BigInt(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Bool(_)
            | ExprKind::NoneLit
            | ExprKind::Name(_) => Vec::new(),
            ExprKind::FString(parts) => parts
                .iter_mut()
                .filter_map(|p| match p {
                    FStringPart::Value { value, .. } => Some(value),
                    FStringPart::Literal(_) => None,
                })
                .collect(),
            ExprKind::BinOp { left, right, .. } | ExprKind::BoolOp { left, right, .. } => {
                vec![left.as_mut(), right.as_mut()]
            }
            ExprKind::UnaryOp { operand, .. } => vec![operand.as_mut()],
            ExprKind::Compare {
                left, comparators, ..
            } => std::iter::once(left.as_mut())
                .chain(comparators.iter_mut())
                .collect(),
            ExprKind::Call {
                func,
                args,
                keywords,
            } => std::iter::once(func.as_mut())
                .chain(args.iter_mut())
                .chain(keywords.iter_mut().map(|k| &mut k.value))
                .collect(),
            ExprKind::Attribute { value, .. } => vec![value.as_mut()],
            ExprKind::Subscript { value, index } => vec![value.as_mut(), index.as_mut()],
            ExprKind::Slice { lower, upper, step } => [lower, upper, step]
                .into_iter()
                .filter_map(|e| e.as_deref_mut())
                .collect(),
            ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
                items.iter_mut().collect()
            }
            ExprKind::Dict(pairs) => pairs
                .iter_mut()
                .flat_map(|(k, v)| [k, v])
                .collect(),
            ExprKind::Lambda { params, body } => params
                .iter_mut()
                .filter_map(|p| p.default.as_mut())
                .chain(std::iter::once(body.as_mut()))
                .collect(),
            ExprKind::IfExp { test, body, orelse } => {
                vec![body.as_mut(), test.as_mut(), orelse.as_mut()]
            }
            ExprKind::ListComp {
                element,
                target,
                iter,
                condition,
            } => {
                let mut out = vec![element.as_mut(), target.as_mut(), iter.as_mut()];
                if let Some(cond) = condition {
                    out.push(cond.as_mut());
                }
                out
            }
            ExprKind::Starred(inner) => vec![inner.as_mut()],
            ExprKind::Other { children, .. } => children.iter_mut().collect(),
        }
    }

    /// Pre-order walk over this expression and all sub-expressions
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    fn walk_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        f(self);
        for child in self.children_mut() {
            child.walk_mut(f);
        }
    }
}

impl Stmt {
    pub fn new(kind: StmtKind, loc: Location) -> Self {
        Self { kind, loc }
    }

    /// Expressions owned directly by this statement (not by nested blocks), in source order
    pub fn exprs(&self) -> Vec<&Expr> {
        match &self.kind {
            StmtKind::Assign { targets, value } => {
                targets.iter().chain(std::iter::once(value)).collect()
            }
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
            } => {
                let mut out = vec![target, annotation];
                out.extend(value.iter());
                out
            }
            StmtKind::AugAssign { target, value, .. } => vec![target, value],
            StmtKind::Expr(e) => vec![e],
            StmtKind::Return(value) => value.iter().collect(),
            StmtKind::If { test, .. } | StmtKind::While { test, .. } => vec![test],
            StmtKind::For { target, iter, .. } => vec![target, iter],
            StmtKind::Raise { exc, cause } => exc.iter().chain(cause.iter()).collect(),
            StmtKind::Assert { test, msg } => std::iter::once(test).chain(msg.iter()).collect(),
            StmtKind::Other { exprs, .. } => exprs.iter().collect(),
            StmtKind::Try { .. }
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Pass
            | StmtKind::Global(_)
            | StmtKind::Nonlocal(_) => Vec::new(),
        }
    }

    fn exprs_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            StmtKind::Assign { targets, value } => targets
                .iter_mut()
                .chain(std::iter::once(value))
                .collect(),
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
            } => {
                let mut out = vec![target, annotation];
                out.extend(value.iter_mut());
                out
            }
            StmtKind::AugAssign { target, value, .. } => vec![target, value],
            StmtKind::Expr(e) => vec![e],
            StmtKind::Return(value) => value.iter_mut().collect(),
            StmtKind::If { test, .. } | StmtKind::While { test, .. } => vec![test],
            StmtKind::For { target, iter, .. } => vec![target, iter],
            StmtKind::Raise { exc, cause } => exc.iter_mut().chain(cause.iter_mut()).collect(),
            StmtKind::Assert { test, msg } => std::iter::once(test)
                .chain(msg.iter_mut())
                .collect(),
            StmtKind::Other { exprs, .. } => exprs.iter_mut().collect(),
            StmtKind::Try { .. }
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Pass
            | StmtKind::Global(_)
            | StmtKind::Nonlocal(_) => Vec::new(),
        }
    }

    /// Nested statement blocks in source order
    pub fn blocks(&self) -> Vec<&[Stmt]> {
        match &self.kind {
            StmtKind::If { body, orelse, .. }
            | StmtKind::While { body, orelse, .. }
            | StmtKind::For { body, orelse, .. } => vec![body, orelse],
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let mut out: Vec<&[Stmt]> = vec![body];
                out.extend(handlers.iter().map(|h| h.body.as_slice()));
                out.push(orelse);
                out.push(finalbody);
                out
            }
            _ => Vec::new(),
        }
    }

    fn blocks_mut(&mut self) -> Vec<&mut Vec<Stmt>> {
        match &mut self.kind {
            StmtKind::If { body, orelse, .. }
            | StmtKind::While { body, orelse, .. }
            | StmtKind::For { body, orelse, .. } => vec![body, orelse],
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let mut out = vec![body];
                out.extend(handlers.iter_mut().map(|h| &mut h.body));
                out.push(orelse);
                out.push(finalbody);
                out
            }
            _ => Vec::new(),
        }
    }

    /// Pre-order walk over this statement and every nested statement
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Stmt)) {
        f(self);
        for block in self.blocks() {
            for stmt in block {
                stmt.walk(f);
            }
        }
    }

    /// Every expression in this statement and its nested blocks, in source order
    pub fn walk_exprs<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        for expr in self.exprs() {
            expr.walk(f);
        }
        if let StmtKind::Try { handlers, .. } = &self.kind {
            // handler types belong to the handler, visited before its body
            let body_blocks = self.blocks();
            for stmt in body_blocks[0] {
                stmt.walk_exprs(f);
            }
            for handler in handlers {
                if let Some(ty) = &handler.exc_type {
                    ty.walk(f);
                }
                for stmt in &handler.body {
                    stmt.walk_exprs(f);
                }
            }
            for block in &body_blocks[1 + handlers.len()..] {
                for stmt in *block {
                    stmt.walk_exprs(f);
                }
            }
            return;
        }
        for block in self.blocks() {
            for stmt in block {
                stmt.walk_exprs(f);
            }
        }
    }

    fn walk_exprs_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        for expr in self.exprs_mut() {
            expr.walk_mut(f);
        }
        if let StmtKind::Try { handlers, body, orelse, finalbody } = &mut self.kind {
            for stmt in body.iter_mut() {
                stmt.walk_exprs_mut(f);
            }
            for handler in handlers.iter_mut() {
                if let Some(ty) = &mut handler.exc_type {
                    ty.walk_mut(f);
                }
                for stmt in handler.body.iter_mut() {
                    stmt.walk_exprs_mut(f);
                }
            }
            for stmt in orelse.iter_mut().chain(finalbody.iter_mut()) {
                stmt.walk_exprs_mut(f);
            }
            return;
        }
        for block in self.blocks_mut() {
            for stmt in block.iter_mut() {
                stmt.walk_exprs_mut(f);
            }
        }
    }
}

/// Walk every expression of a function: decorators, parameter annotations and defaults,
/// return annotation, then body
pub fn walk_function_exprs<'a>(func: &'a Function, f: &mut impl FnMut(&'a Expr)) {
    for d in &func.decorators {
        d.walk(f);
    }
    for p in &func.params {
        if let Some(a) = &p.annotation {
            a.walk(f);
        }
        if let Some(d) = &p.default {
            d.walk(f);
        }
    }
    if let Some(r) = &func.returns {
        r.walk(f);
    }
    for stmt in &func.body {
        stmt.walk_exprs(f);
    }
}

fn walk_function_exprs_mut(func: &mut Function, f: &mut impl FnMut(&mut Expr)) {
    for d in func.decorators.iter_mut() {
        d.walk_mut(f);
    }
    for p in func.params.iter_mut() {
        if let Some(a) = &mut p.annotation {
            a.walk_mut(f);
        }
        if let Some(d) = &mut p.default {
            d.walk_mut(f);
        }
    }
    if let Some(r) = &mut func.returns {
        r.walk_mut(f);
    }
    for stmt in func.body.iter_mut() {
        stmt.walk_exprs_mut(f);
    }
}

impl Class {
    /// Walk every expression of the class in source order
    pub fn walk_exprs<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        for d in &self.decorators {
            d.walk(f);
        }
        for b in &self.bases {
            b.walk(f);
        }
        for field in self.fields.iter().filter(|fl| !fl.from_init) {
            if let Some(a) = &field.annotation {
                a.walk(f);
            }
            if let Some(d) = &field.default {
                d.walk(f);
            }
        }
        for stmt in &self.other {
            stmt.walk_exprs(f);
        }
        for method in &self.methods {
            walk_function_exprs(method, f);
        }
    }

    fn walk_exprs_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        for d in self.decorators.iter_mut() {
            d.walk_mut(f);
        }
        for b in self.bases.iter_mut() {
            b.walk_mut(f);
        }
        for field in self.fields.iter_mut().filter(|fl| !fl.from_init) {
            if let Some(a) = &mut field.annotation {
                a.walk_mut(f);
            }
            if let Some(d) = &mut field.default {
                d.walk_mut(f);
            }
        }
        for stmt in self.other.iter_mut() {
            stmt.walk_exprs_mut(f);
        }
        for method in self.methods.iter_mut() {
            walk_function_exprs_mut(method, f);
        }
    }
}

impl Decl {
    pub fn walk_exprs<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        match self {
            Decl::Function(func) => walk_function_exprs(func, f),
            Decl::Class(class) => class.walk_exprs(f),
            Decl::Import(_) => {}
            Decl::Variable(var) => {
                if let Some(a) = &var.annotation {
                    a.walk(f);
                }
                if let Some(v) = &var.value {
                    v.walk(f);
                }
            }
            Decl::Statement(stmt) => stmt.walk_exprs(f),
        }
    }

    fn walk_exprs_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        match self {
            Decl::Function(func) => walk_function_exprs_mut(func, f),
            Decl::Class(class) => class.walk_exprs_mut(f),
            Decl::Import(_) => {}
            Decl::Variable(var) => {
                if let Some(a) = &mut var.annotation {
                    a.walk_mut(f);
                }
                if let Some(v) = &mut var.value {
                    v.walk_mut(f);
                }
            }
            Decl::Statement(stmt) => stmt.walk_exprs_mut(f),
        }
    }
}

impl Module {
    /// Parse a tree produced by an external front end, assign ids and validate it
    pub fn from_json(text: &str) -> Result<Module> {
        let mut module: Module =
            serde_json::from_str(text).map_err(|e| TranspileError::ParseInput {
                path: "<json tree>".to_string(),
                message: e.to_string(),
            })?;
        module.assign_expr_ids();
        module.validate()?;
        Ok(module)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Number every expression node 1.. in traversal order. Called once at construction.
    pub fn assign_expr_ids(&mut self) {
        let mut next = 0u32;
        for decl in self.body.iter_mut() {
            decl.walk_exprs_mut(&mut |expr: &mut Expr| {
                next += 1;
                expr.id = ExprId(next);
            });
        }
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.body.iter().filter_map(|d| match d {
            Decl::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn classes(&self) -> impl Iterator<Item = &Class> {
        self.body.iter().filter_map(|d| match d {
            Decl::Class(c) => Some(c),
            _ => None,
        })
    }

    pub fn class(&self, name: &str) -> Option<&Class> {
        self.classes().find(|c| c.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions().find(|f| f.name == name)
    }

    /// Classes deriving (directly or through in-module classes) from a builtin exception
    pub fn exception_classes(&self) -> HashSet<String> {
        let mut found: HashSet<String> = HashSet::new();
        loop {
            let before = found.len();
            for class in self.classes() {
                if found.contains(&class.name) {
                    continue;
                }
                let is_error = class.effective_bases().iter().any(|base| {
                    crate::mappings::is_builtin_exception(base) || found.contains(base)
                });
                if is_error {
                    found.insert(class.name.clone());
                }
            }
            if found.len() == before {
                return found;
            }
        }
    }

    /// Check the structural contract every pass relies on
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TranspileError::malformed(
                Location::default(),
                "module has no name",
            ));
        }
        let mut seen = HashSet::new();
        for decl in &self.body {
            validate_decl(decl)?;
            let mut failure = None;
            decl.walk_exprs(&mut |expr: &Expr| {
                if failure.is_some() {
                    return;
                }
                if expr.id == ExprId(0) {
                    failure = Some(TranspileError::malformed(
                        expr.loc,
                        "expression has no assigned id",
                    ));
                } else if !seen.insert(expr.id) {
                    failure = Some(TranspileError::malformed(
                        expr.loc,
                        format!("duplicate expression id {}", expr.id.0),
                    ));
                } else if let Err(e) = validate_expr(expr) {
                    failure = Some(e);
                }
            });
            if let Some(err) = failure {
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Python identifier rules (Unicode letters allowed)
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn require_identifier(name: &str, what: &str, loc: Location) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(TranspileError::malformed(
            loc,
            format!("{} '{}' is not a valid identifier", what, name),
        ))
    }
}

fn validate_function(func: &Function) -> Result<()> {
    require_identifier(&func.name, "function name", func.loc)?;
    if func.body.is_empty() {
        return Err(TranspileError::malformed(
            func.loc,
            format!("function '{}' has an empty body", func.name),
        ));
    }
    validate_params(&func.params)?;
    validate_block(&func.body)
}

fn validate_params(params: &[Param]) -> Result<()> {
    let mut names = HashSet::new();
    for p in params {
        require_identifier(&p.name, "parameter name", p.loc)?;
        if !names.insert(p.name.as_str()) {
            return Err(TranspileError::malformed(
                p.loc,
                format!("duplicate parameter '{}'", p.name),
            ));
        }
    }
    Ok(())
}

fn validate_block(block: &[Stmt]) -> Result<()> {
    for stmt in block {
        match &stmt.kind {
            StmtKind::If { body, .. }
            | StmtKind::While { body, .. }
            | StmtKind::For { body, .. } => {
                if body.is_empty() {
                    return Err(TranspileError::malformed(stmt.loc, "compound statement has an empty body"));
                }
            }
            StmtKind::Try { body, handlers, finalbody, .. } => {
                if body.is_empty() || (handlers.is_empty() && finalbody.is_empty()) {
                    return Err(TranspileError::malformed(
                        stmt.loc,
                        "try statement needs a body and at least one handler or finally block",
                    ));
                }
                if handlers.iter().any(|h| h.body.is_empty()) {
                    return Err(TranspileError::malformed(stmt.loc, "except clause has an empty body"));
                }
            }
            StmtKind::Assign { targets, .. } if targets.is_empty() => {
                return Err(TranspileError::malformed(stmt.loc, "assignment without target"));
            }
            _ => {}
        }
        for nested in stmt.blocks() {
            validate_block(nested)?;
        }
    }
    Ok(())
}

fn validate_decl(decl: &Decl) -> Result<()> {
    match decl {
        Decl::Function(f) => validate_function(f),
        Decl::Class(c) => {
            require_identifier(&c.name, "class name", c.loc)?;
            for field in &c.fields {
                require_identifier(&field.name, "field name", field.loc)?;
            }
            for method in &c.methods {
                validate_function(method)?;
            }
            validate_block(&c.other)
        }
        Decl::Import(i) => {
            if i.module.is_empty() && i.level == 0 {
                return Err(TranspileError::malformed(i.loc, "import without module"));
            }
            if i.is_from && i.names.is_empty() {
                return Err(TranspileError::malformed(i.loc, "from-import without names"));
            }
            Ok(())
        }
        Decl::Variable(v) => require_identifier(&v.target, "variable name", v.loc),
        Decl::Statement(s) => validate_block(std::slice::from_ref(s)),
    }
}

fn validate_expr(expr: &Expr) -> Result<()> {
    match &expr.kind {
        ExprKind::Name(name) => require_identifier(name, "name", expr.loc),
        ExprKind::Attribute { attr, .. } => require_identifier(attr, "attribute", expr.loc),
        ExprKind::Compare {
            ops, comparators, ..
        } => {
            if ops.is_empty() || ops.len() != comparators.len() {
                Err(TranspileError::malformed(
                    expr.loc,
                    "comparison operator/operand count mismatch",
                ))
            } else {
                Ok(())
            }
        }
        ExprKind::Lambda { params, .. } => validate_params(params),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str, line: u32) -> Expr {
        Expr::new(ExprKind::Name(n.to_string()), Location::new(line, 1))
    }

    fn int(v: i64, line: u32) -> Expr {
        Expr::new(ExprKind::Int(v), Location::new(line, 5))
    }

    fn sample_module() -> Module {
        let ret = Stmt::new(
            StmtKind::Return(Some(Expr::new(
                ExprKind::BinOp {
                    op: BinOp::Add,
                    left: Box::new(name("a", 2)),
                    right: Box::new(int(1, 2)),
                },
                Location::new(2, 12),
            ))),
            Location::new(2, 5),
        );
        let func = Function {
            name: "inc".to_string(),
            params: vec![Param {
                name: "a".to_string(),
                annotation: None,
                default: None,
                kind: ParamKind::Positional,
                loc: Location::new(1, 9),
            }],
            returns: None,
            body: vec![ret],
            decorators: vec![],
            is_async: false,
            doc: None,
            loc: Location::new(1, 1),
        };
        let mut module = Module {
            name: "sample".to_string(),
            path: "sample.py".to_string(),
            doc: None,
            body: vec![Decl::Function(func)],
        };
        module.assign_expr_ids();
        module
    }

    #[test]
    fn test_assign_ids_sequential_in_source_order() {
        let module = sample_module();
        let mut ids = Vec::new();
        module.body[0].walk_exprs(&mut |e: &Expr| ids.push(e.id.0));
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_validate_accepts_well_formed_module() {
        assert!(sample_module().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unassigned_ids() {
        let mut module = sample_module();
        if let Decl::Function(f) = &mut module.body[0] {
            if let StmtKind::Return(Some(e)) = &mut f.body[0].kind {
                e.id = ExprId(0);
            }
        }
        let err = module.validate().unwrap_err();
        assert!(matches!(err, TranspileError::MalformedTree { .. }));
    }

    #[test]
    fn test_validate_rejects_empty_function_body() {
        let mut module = sample_module();
        if let Decl::Function(f) = &mut module.body[0] {
            f.body.clear();
        }
        let err = module.validate().unwrap_err();
        assert!(err.to_string().contains("empty body"));
    }

    #[test]
    fn test_validate_rejects_bad_identifier() {
        let mut module = sample_module();
        if let Decl::Function(f) = &mut module.body[0] {
            f.name = "1bad".to_string();
        }
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip_reassigns_ids() {
        let module = sample_module();
        let json = module.to_json().unwrap();
        let parsed = Module::from_json(&json).unwrap();
        assert_eq!(parsed, module);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = Module::from_json("{not json").unwrap_err();
        assert!(matches!(err, TranspileError::ParseInput { .. }));
    }

    #[test]
    fn test_dotted_name() {
        let attr = Expr::new(
            ExprKind::Attribute {
                value: Box::new(name("os", 1)),
                attr: "path".to_string(),
            },
            Location::new(1, 1),
        );
        assert_eq!(attr.dotted_name().as_deref(), Some("os.path"));
    }

    #[test]
    fn test_cmp_op_parsing() {
        assert_eq!(CmpOp::from_python("not  in"), Some(CmpOp::NotIn));
        assert_eq!(CmpOp::from_python("is not"), Some(CmpOp::IsNot));
        assert_eq!(CmpOp::from_python("<="), Some(CmpOp::LtE));
        assert_eq!(BinOp::from_python("//="), Some(BinOp::FloorDiv));
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("_private"));
        assert!(is_identifier("naïve"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }
}
