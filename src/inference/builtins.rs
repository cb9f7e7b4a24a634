//! Result types of builtin functions and of methods on builtin types

use crate::mappings;
use crate::types::{PrimitiveKind, Type};

/// Result type of a call to a Python builtin, `None` when the name is not a known builtin
pub fn call_type(name: &str, args: &[Type]) -> Option<Type> {
    let first = args.first().cloned().unwrap_or(Type::Unresolved);
    let ty = match name {
        "print" => Type::none(),
        "len" | "ord" | "hash" | "id" => Type::int(),
        "str" | "repr" | "chr" | "input" | "format" => Type::str(),
        "int" => Type::int(),
        "float" => Type::float(),
        "bool" | "isinstance" | "issubclass" | "callable" | "any" | "all" => Type::bool(),
        "abs" => first.clone(),
        "round" => {
            if args.len() > 1 {
                Type::float()
            } else {
                Type::int()
            }
        }
        "min" | "max" => {
            if args.len() >= 2 {
                args.iter()
                    .skip(1)
                    .try_fold(first.clone(), |acc, t| acc.join(t))
                    .unwrap_or(Type::Dynamic)
            } else {
                first.element_type()
            }
        }
        "sum" => {
            let elem = first.element_type();
            if elem.is_numeric() || elem == Type::Unresolved {
                elem
            } else {
                Type::Dynamic
            }
        }
        "sorted" | "reversed" | "list" => {
            if args.is_empty() {
                Type::list(Type::Unresolved)
            } else {
                Type::list(first.element_type())
            }
        }
        "set" => {
            if args.is_empty() {
                Type::set(Type::Unresolved)
            } else {
                Type::set(first.element_type())
            }
        }
        "dict" => Type::dict(Type::Unresolved, Type::Unresolved),
        "range" => Type::range(),
        "enumerate" => Type::list(Type::tuple(vec![Type::int(), first.element_type()])),
        "zip" => Type::list(Type::tuple(
            args.iter().map(Type::element_type).collect(),
        )),
        "divmod" => Type::tuple(vec![first.clone(), first.clone()]),
        exc if mappings::is_builtin_exception(exc) => Type::Named(exc.to_string()),
        _ => return None,
    };
    Some(ty)
}

/// Result type of `receiver.method(args)` for builtin receiver types
pub fn method_type(receiver: &Type, method: &str, args: &[Type]) -> Option<Type> {
    match receiver {
        Type::Primitive(PrimitiveKind::Str) => str_method(method),
        Type::Generic { base, args: params } => match (base.as_str(), params.as_slice()) {
            ("list", [elem]) => list_method(elem, method),
            ("dict", [key, value]) => dict_method(key, value, method, args),
            ("set", [elem]) => set_method(elem, method),
            _ => None,
        },
        _ => None,
    }
}

fn str_method(method: &str) -> Option<Type> {
    let ty = match method {
        "upper" | "lower" | "strip" | "lstrip" | "rstrip" | "replace" | "title"
        | "capitalize" | "format" | "join" | "zfill" | "center" | "ljust" | "rjust" => Type::str(),
        "startswith" | "endswith" | "isdigit" | "isalpha" | "isalnum" | "isspace" | "isupper"
        | "islower" => Type::bool(),
        "split" | "splitlines" | "rsplit" => Type::list(Type::str()),
        "find" | "rfind" | "count" | "index" => Type::int(),
        "encode" => Type::Primitive(PrimitiveKind::Bytes),
        _ => return None,
    };
    Some(ty)
}

fn list_method(elem: &Type, method: &str) -> Option<Type> {
    let ty = match method {
        "append" | "extend" | "insert" | "clear" | "reverse" | "sort" | "remove" => Type::none(),
        "pop" => elem.clone(),
        "index" | "count" => Type::int(),
        "copy" => Type::list(elem.clone()),
        _ => return None,
    };
    Some(ty)
}

fn dict_method(key: &Type, value: &Type, method: &str, args: &[Type]) -> Option<Type> {
    let ty = match method {
        "get" if args.len() >= 2 => value.clone(),
        "get" => Type::optional(value.clone()),
        "keys" => Type::list(key.clone()),
        "values" => Type::list(value.clone()),
        "items" => Type::list(Type::tuple(vec![key.clone(), value.clone()])),
        "pop" | "setdefault" => value.clone(),
        "update" | "clear" => Type::none(),
        "copy" => Type::dict(key.clone(), value.clone()),
        _ => return None,
    };
    Some(ty)
}

fn set_method(elem: &Type, method: &str) -> Option<Type> {
    let ty = match method {
        "add" | "remove" | "discard" | "clear" | "update" => Type::none(),
        "union" | "intersection" | "difference" | "copy" => Type::set(elem.clone()),
        "issubset" | "issuperset" | "isdisjoint" => Type::bool(),
        _ => return None,
    };
    Some(ty)
}

/// Methods that mutate their receiver in place
pub const MUTATING_METHODS: &[&str] = &[
    "append",
    "extend",
    "insert",
    "pop",
    "clear",
    "reverse",
    "sort",
    "remove",
    "add",
    "discard",
    "update",
    "setdefault",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_calls() {
        assert_eq!(call_type("len", &[Type::str()]), Some(Type::int()));
        assert_eq!(
            call_type("sorted", &[Type::list(Type::float())]),
            Some(Type::list(Type::float()))
        );
        assert_eq!(
            call_type("max", &[Type::int(), Type::int()]),
            Some(Type::int())
        );
        assert_eq!(
            call_type("max", &[Type::int(), Type::str()]),
            Some(Type::Dynamic)
        );
        assert_eq!(call_type("sum", &[Type::list(Type::int())]), Some(Type::int()));
        assert_eq!(
            call_type("ValueError", &[Type::str()]),
            Some(Type::Named("ValueError".to_string()))
        );
        assert_eq!(call_type("frobnicate", &[]), None);
    }

    #[test]
    fn test_enumerate_element_is_index_pair() {
        let ty = call_type("enumerate", &[Type::list(Type::str())]).unwrap();
        assert_eq!(ty.element_type(), Type::tuple(vec![Type::int(), Type::str()]));
    }

    #[test]
    fn test_methods() {
        assert_eq!(
            method_type(&Type::str(), "split", &[]),
            Some(Type::list(Type::str()))
        );
        assert_eq!(
            method_type(&Type::list(Type::int()), "pop", &[]),
            Some(Type::int())
        );
        let d = Type::dict(Type::str(), Type::int());
        assert_eq!(
            method_type(&d, "get", &[Type::str()]),
            Some(Type::optional(Type::int()))
        );
        assert_eq!(
            method_type(&d, "get", &[Type::str(), Type::int()]),
            Some(Type::int())
        );
        assert_eq!(method_type(&Type::int(), "bit_length", &[]), None);
    }
}
