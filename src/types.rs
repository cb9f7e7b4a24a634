//! Static types assigned by inference and their Rust spelling

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ast::{BinOp, Expr, ExprKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    /// Signed word-width integer (`i64`)
    Int,
    /// Double precision (`f64`)
    Float,
    Bool,
    Str,
    Bytes,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Primitive(PrimitiveKind),
    /// Class defined in the module, or an opaque external name
    Named(String),
    /// `list[T]`, `dict[K, V]`, `set[T]`, `tuple[A, B]`, `Optional[T]`, `Callable[[A], R]`
    Generic { base: String, args: Vec<Type> },
    /// No evidence yet (forward reference, recursion, unannotated parameter)
    Unresolved,
    /// Conflicting evidence or explicitly untyped (`Any`)
    Dynamic,
}

/// How a parameter is passed in the generated signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ownership {
    ByValue,
    ByRef,
    MutRef,
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ownership::ByValue => write!(f, "by-value"),
            Ownership::ByRef => write!(f, "by-reference"),
            Ownership::MutRef => write!(f, "mutable-reference"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSig {
    pub name: String,
    pub ty: Type,
    pub ownership: Ownership,
    /// Value is rebound inside the body (`mut` binding)
    pub rebound: bool,
    pub has_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSig {
    /// `name` or `Class.method`
    pub qualified_name: String,
    pub params: Vec<ParamSig>,
    pub ret: Type,
    /// Declared return annotation exists
    pub ret_declared: bool,
}

impl FunctionSig {
    pub fn param(&self, name: &str) -> Option<&ParamSig> {
        self.params.iter().find(|p| p.name == name)
    }
}

impl Type {
    pub fn int() -> Type {
        Type::Primitive(PrimitiveKind::Int)
    }

    pub fn float() -> Type {
        Type::Primitive(PrimitiveKind::Float)
    }

    pub fn bool() -> Type {
        Type::Primitive(PrimitiveKind::Bool)
    }

    pub fn str() -> Type {
        Type::Primitive(PrimitiveKind::Str)
    }

    pub fn none() -> Type {
        Type::Primitive(PrimitiveKind::None)
    }

    pub fn generic(base: &str, args: Vec<Type>) -> Type {
        Type::Generic {
            base: base.to_string(),
            args,
        }
    }

    pub fn list(elem: Type) -> Type {
        Type::generic("list", vec![elem])
    }

    pub fn set(elem: Type) -> Type {
        Type::generic("set", vec![elem])
    }

    pub fn dict(key: Type, value: Type) -> Type {
        Type::generic("dict", vec![key, value])
    }

    pub fn tuple(items: Vec<Type>) -> Type {
        Type::generic("tuple", items)
    }

    pub fn optional(inner: Type) -> Type {
        Type::generic("Optional", vec![inner])
    }

    pub fn range() -> Type {
        Type::Named("range".to_string())
    }

    pub fn is_primitive(&self, kind: PrimitiveKind) -> bool {
        matches!(self, Type::Primitive(k) if *k == kind)
    }

    pub fn is_int(&self) -> bool {
        self.is_primitive(PrimitiveKind::Int)
    }

    pub fn is_float(&self) -> bool {
        self.is_primitive(PrimitiveKind::Float)
    }

    pub fn is_str(&self) -> bool {
        self.is_primitive(PrimitiveKind::Str)
    }

    pub fn is_bool(&self) -> bool {
        self.is_primitive(PrimitiveKind::Bool)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_int() || self.is_float()
    }

    pub fn is_generic(&self, name: &str) -> bool {
        matches!(self, Type::Generic { base, .. } if base == name)
    }

    /// True when the type contains no `Unresolved`/`Dynamic` component
    pub fn is_concrete(&self) -> bool {
        match self {
            Type::Primitive(_) | Type::Named(_) => true,
            Type::Generic { args, .. } => args.iter().all(Type::is_concrete),
            Type::Unresolved | Type::Dynamic => false,
        }
    }

    /// Values of this type are `Copy` in the generated code
    pub fn is_copy(&self) -> bool {
        match self {
            Type::Primitive(k) => matches!(
                k,
                PrimitiveKind::Int | PrimitiveKind::Float | PrimitiveKind::Bool | PrimitiveKind::None
            ),
            Type::Generic { base, args } if base == "tuple" || base == "Optional" => {
                args.iter().all(Type::is_copy)
            }
            _ => false,
        }
    }

    /// Element type produced by iterating over a value of this type
    pub fn element_type(&self) -> Type {
        match self {
            Type::Generic { base, args } => match (base.as_str(), args.as_slice()) {
                ("list", [elem]) | ("set", [elem]) => elem.clone(),
                ("dict", [key, _]) => key.clone(),
                _ => Type::Dynamic,
            },
            Type::Primitive(PrimitiveKind::Str) => Type::str(),
            Type::Primitive(PrimitiveKind::Bytes) => Type::int(),
            Type::Named(name) if name == "range" => Type::int(),
            Type::Unresolved => Type::Unresolved,
            _ => Type::Dynamic,
        }
    }

    /// Join at a control-flow merge point; `None` means the branches disagree.
    ///
    /// `Unresolved` carries no evidence and yields to the other side, `None` joined with `T`
    /// is `Optional[T]`, and generics join argument-wise. `Dynamic` absorbs everything.
    pub fn join(&self, other: &Type) -> Option<Type> {
        match (self, other) {
            (a, b) if a == b => Some(a.clone()),
            (Type::Dynamic, _) | (_, Type::Dynamic) => Some(Type::Dynamic),
            (Type::Unresolved, t) | (t, Type::Unresolved) => Some(t.clone()),
            (Type::Primitive(PrimitiveKind::None), t) | (t, Type::Primitive(PrimitiveKind::None)) => {
                if t.is_generic("Optional") {
                    Some(t.clone())
                } else {
                    Some(Type::optional(t.clone()))
                }
            }
            (
                Type::Generic { base: a, args: x },
                Type::Generic { base: b, args: y },
            ) if a == b && x.len() == y.len() => {
                let args = x
                    .iter()
                    .zip(y.iter())
                    .map(|(l, r)| l.join(r))
                    .collect::<Option<Vec<_>>>()?;
                Some(Type::generic(a, args))
            }
            (Type::Generic { base, args }, t) | (t, Type::Generic { base, args })
                if base == "Optional" && args.len() == 1 =>
            {
                args[0].join(t).map(Type::optional)
            }
            _ => None,
        }
    }

    /// Inner type of `Optional[T]`
    pub fn optional_inner(&self) -> Option<&Type> {
        match self {
            Type::Generic { base, args } if base == "Optional" && args.len() == 1 => Some(&args[0]),
            _ => None,
        }
    }

    /// Rust spelling, or `None` when the type is not concrete
    pub fn to_rust(&self) -> Option<String> {
        let rendered = match self {
            Type::Primitive(kind) => match kind {
                PrimitiveKind::Int => "i64".to_string(),
                PrimitiveKind::Float => "f64".to_string(),
                PrimitiveKind::Bool => "bool".to_string(),
                PrimitiveKind::Str => "String".to_string(),
                PrimitiveKind::Bytes => "Vec<u8>".to_string(),
                PrimitiveKind::None => "()".to_string(),
            },
            Type::Named(name) if name == "range" => "std::ops::Range<i64>".to_string(),
            Type::Named(name) => name.replace('.', "::"),
            Type::Generic { base, args } => {
                let rendered: Option<Vec<String>> = args.iter().map(Type::to_rust).collect();
                let rendered = rendered?;
                match (base.as_str(), rendered.as_slice()) {
                    ("list", [elem]) => format!("Vec<{}>", elem),
                    ("set", [elem]) => format!("std::collections::HashSet<{}>", elem),
                    ("dict", [key, value]) => {
                        format!("std::collections::HashMap<{}, {}>", key, value)
                    }
                    ("Optional", [inner]) => format!("Option<{}>", inner),
                    ("tuple", [single]) => format!("({},)", single),
                    ("tuple", items) => format!("({})", items.join(", ")),
                    ("Callable", [params @ .., ret]) => {
                        if ret == "()" {
                            format!("fn({})", params.join(", "))
                        } else {
                            format!("fn({}) -> {}", params.join(", "), ret)
                        }
                    }
                    _ => return None,
                }
            }
            Type::Unresolved | Type::Dynamic => return None,
        };
        Some(rendered)
    }

    /// Borrowed spelling for read-only parameters (`&str`, `&[T]`, `&T`)
    pub fn to_rust_borrowed(&self) -> Option<String> {
        match self {
            Type::Primitive(PrimitiveKind::Str) => Some("&str".to_string()),
            Type::Primitive(PrimitiveKind::Bytes) => Some("&[u8]".to_string()),
            Type::Generic { base, args } if base == "list" && args.len() == 1 => {
                args[0].to_rust().map(|elem| format!("&[{}]", elem))
            }
            _ => self.to_rust().map(|t| format!("&{}", t)),
        }
    }

    /// Convert a declared annotation expression into a type
    pub fn from_annotation(expr: &Expr) -> Type {
        match &expr.kind {
            ExprKind::NoneLit => Type::none(),
            ExprKind::Str(text) => Type::from_annotation_name(text.trim()),
            ExprKind::Name(_) | ExprKind::Attribute { .. } => match expr.dotted_name() {
                Some(name) => Type::from_annotation_name(&name),
                None => Type::Dynamic,
            },
            ExprKind::Subscript { value, index } => {
                let Some(base) = value.dotted_name() else {
                    return Type::Dynamic;
                };
                let base = base.rsplit('.').next().unwrap_or(&base).to_string();
                let args: Vec<Type> = match &index.kind {
                    ExprKind::Tuple(items) => items.iter().map(Type::from_annotation).collect(),
                    _ => vec![Type::from_annotation(index)],
                };
                Type::from_generic_annotation(&base, args, index)
            }
            ExprKind::BinOp {
                op: BinOp::BitOr,
                left,
                right,
            } => {
                let l = Type::from_annotation(left);
                let r = Type::from_annotation(right);
                match (&l, &r) {
                    (Type::Primitive(PrimitiveKind::None), other)
                    | (other, Type::Primitive(PrimitiveKind::None)) => Type::optional(other.clone()),
                    _ => Type::Dynamic,
                }
            }
            _ => Type::Dynamic,
        }
    }

    fn from_annotation_name(name: &str) -> Type {
        let short = name.strip_prefix("typing.").unwrap_or(name);
        match short {
            "int" => Type::int(),
            "float" => Type::float(),
            "bool" => Type::bool(),
            "str" => Type::str(),
            "bytes" | "bytearray" => Type::Primitive(PrimitiveKind::Bytes),
            "None" => Type::none(),
            "Any" | "object" => Type::Dynamic,
            "list" | "List" => Type::list(Type::Dynamic),
            "dict" | "Dict" => Type::dict(Type::Dynamic, Type::Dynamic),
            "set" | "Set" => Type::set(Type::Dynamic),
            "range" => Type::range(),
            other if crate::ast::is_identifier(other.split('.').next().unwrap_or("")) => {
                Type::Named(other.to_string())
            }
            _ => Type::Dynamic,
        }
    }

    fn from_generic_annotation(base: &str, args: Vec<Type>, index: &Expr) -> Type {
        match (base, args.as_slice()) {
            ("list" | "List" | "Sequence" | "Iterable" | "Iterator" | "MutableSequence", [elem]) => {
                Type::list(elem.clone())
            }
            ("set" | "Set" | "FrozenSet" | "frozenset" | "AbstractSet", [elem]) => {
                Type::set(elem.clone())
            }
            ("dict" | "Dict" | "Mapping" | "MutableMapping", [key, value]) => {
                Type::dict(key.clone(), value.clone())
            }
            ("Optional", [inner]) => Type::optional(inner.clone()),
            ("Union", [a, b]) => match (a, b) {
                (Type::Primitive(PrimitiveKind::None), other)
                | (other, Type::Primitive(PrimitiveKind::None)) => Type::optional(other.clone()),
                _ => Type::Dynamic,
            },
            ("tuple" | "Tuple", items) => {
                // tuple[int, ...] is a homogeneous sequence
                if let ExprKind::Tuple(raw) = &index.kind {
                    if raw.len() == 2 && matches!(raw[1].kind, ExprKind::Other { ref kind, .. } if kind == "ellipsis")
                    {
                        return Type::list(items[0].clone());
                    }
                }
                Type::tuple(items.to_vec())
            }
            ("Callable", [params, ret]) => {
                let mut all = match &index.kind {
                    ExprKind::Tuple(raw) => match &raw[0].kind {
                        ExprKind::List(ps) => ps.iter().map(Type::from_annotation).collect(),
                        _ => return Type::Dynamic,
                    },
                    _ => vec![params.clone()],
                };
                all.push(ret.clone());
                Type::generic("Callable", all)
            }
            _ => Type::Dynamic,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(kind) => match kind {
                PrimitiveKind::Int => write!(f, "int"),
                PrimitiveKind::Float => write!(f, "float"),
                PrimitiveKind::Bool => write!(f, "bool"),
                PrimitiveKind::Str => write!(f, "str"),
                PrimitiveKind::Bytes => write!(f, "bytes"),
                PrimitiveKind::None => write!(f, "None"),
            },
            Type::Named(name) => write!(f, "{}", name),
            Type::Generic { base, args } => {
                write!(f, "{}[", base)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, "]")
            }
            Type::Unresolved => write!(f, "<unresolved>"),
            Type::Dynamic => write!(f, "<dynamic>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Location;

    fn name(n: &str) -> Expr {
        Expr::new(ExprKind::Name(n.to_string()), Location::default())
    }

    fn subscript(base: &str, index: Expr) -> Expr {
        Expr::new(
            ExprKind::Subscript {
                value: Box::new(name(base)),
                index: Box::new(index),
            },
            Location::default(),
        )
    }

    fn tuple(items: Vec<Expr>) -> Expr {
        Expr::new(ExprKind::Tuple(items), Location::default())
    }

    #[test]
    fn test_primitive_annotations() {
        assert_eq!(Type::from_annotation(&name("int")), Type::int());
        assert_eq!(Type::from_annotation(&name("float")), Type::float());
        assert_eq!(Type::from_annotation(&name("str")), Type::str());
        assert_eq!(Type::from_annotation(&name("Any")), Type::Dynamic);
    }

    #[test]
    fn test_generic_annotations() {
        let list_int = subscript("list", name("int"));
        assert_eq!(Type::from_annotation(&list_int), Type::list(Type::int()));

        let dict = subscript("Dict", tuple(vec![name("str"), name("float")]));
        assert_eq!(
            Type::from_annotation(&dict),
            Type::dict(Type::str(), Type::float())
        );

        let opt = subscript("Optional", name("Point"));
        assert_eq!(
            Type::from_annotation(&opt),
            Type::optional(Type::Named("Point".to_string()))
        );
    }

    #[test]
    fn test_union_with_none_is_optional() {
        let union = Expr::new(
            ExprKind::BinOp {
                op: BinOp::BitOr,
                left: Box::new(name("int")),
                right: Box::new(Expr::new(ExprKind::NoneLit, Location::default())),
            },
            Location::default(),
        );
        assert_eq!(Type::from_annotation(&union), Type::optional(Type::int()));
    }

    #[test]
    fn test_rust_rendering() {
        assert_eq!(Type::int().to_rust().as_deref(), Some("i64"));
        assert_eq!(
            Type::dict(Type::str(), Type::list(Type::float())).to_rust().as_deref(),
            Some("std::collections::HashMap<String, Vec<f64>>")
        );
        assert_eq!(Type::tuple(vec![Type::int()]).to_rust().as_deref(), Some("(i64,)"));
        assert_eq!(Type::list(Type::Dynamic).to_rust(), None);
        assert_eq!(Type::Unresolved.to_rust(), None);
    }

    #[test]
    fn test_borrowed_rendering() {
        assert_eq!(Type::str().to_rust_borrowed().as_deref(), Some("&str"));
        assert_eq!(
            Type::list(Type::int()).to_rust_borrowed().as_deref(),
            Some("&[i64]")
        );
        assert_eq!(
            Type::Named("Point".to_string()).to_rust_borrowed().as_deref(),
            Some("&Point")
        );
    }

    #[test]
    fn test_element_types() {
        assert_eq!(Type::list(Type::str()).element_type(), Type::str());
        assert_eq!(Type::range().element_type(), Type::int());
        assert_eq!(Type::dict(Type::int(), Type::str()).element_type(), Type::int());
        assert_eq!(Type::Named("Point".into()).element_type(), Type::Dynamic);
    }

    #[test]
    fn test_copy_and_concrete() {
        assert!(Type::int().is_copy());
        assert!(!Type::str().is_copy());
        assert!(Type::tuple(vec![Type::int(), Type::float()]).is_copy());
        assert!(!Type::list(Type::Unresolved).is_concrete());
    }

    #[test]
    fn test_join() {
        assert_eq!(Type::int().join(&Type::int()), Some(Type::int()));
        assert_eq!(Type::int().join(&Type::str()), None);
        assert_eq!(Type::int().join(&Type::float()), None);
        assert_eq!(Type::Unresolved.join(&Type::str()), Some(Type::str()));
        assert_eq!(
            Type::none().join(&Type::int()),
            Some(Type::optional(Type::int()))
        );
        assert_eq!(
            Type::list(Type::Unresolved).join(&Type::list(Type::int())),
            Some(Type::list(Type::int()))
        );
        assert_eq!(
            Type::optional(Type::int()).join(&Type::int()),
            Some(Type::optional(Type::int()))
        );
        assert_eq!(Type::Dynamic.join(&Type::int()), Some(Type::Dynamic));
    }
}
