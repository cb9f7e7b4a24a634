#![cfg(test)]

use super::*;
use crate::diagnostics::Severity;
use crate::frontend::parse_source;

fn infer_src(src: &str) -> (Module, Inference) {
    let module = parse_source(src, "sample.py").unwrap();
    let inference = infer(&module).unwrap();
    (module, inference)
}

fn ret(inference: &Inference, name: &str) -> Type {
    inference.signature(name).unwrap().ret.clone()
}

fn find_call<'a>(module: &'a Module, callee: &str) -> &'a Expr {
    let mut found = None;
    for decl in &module.body {
        decl.walk_exprs(&mut |e: &'a Expr| {
            if let ExprKind::Call { func, .. } = &e.kind {
                if func.as_name() == Some(callee) && found.is_none() {
                    found = Some(e);
                }
            }
        });
    }
    found.unwrap()
}

// ============================================================================
// SIGNATURES
// ============================================================================

#[test]
fn test_add_with_integer_call_sites() {
    let src = "\
def add(a, b):
    return a + b

def main():
    return add(1, 2)
";
    let (_, inference) = infer_src(src);
    let sig = inference.signature("add").unwrap();
    assert_eq!(sig.params.len(), 2);
    assert!(sig.params.iter().all(|p| p.ty == Type::int()));
    assert!(sig.params.iter().all(|p| p.ownership == Ownership::ByValue));
    assert_eq!(sig.ret, Type::int());
    assert_eq!(ret(&inference, "main"), Type::int());
    assert!(inference.findings.is_empty());
}

#[test]
fn test_annotations_are_never_overridden() {
    let src = "\
def scale(x: float, factor=2):
    x = 3
    return x * factor
";
    let (_, inference) = infer_src(src);
    let sig = inference.signature("scale").unwrap();
    assert_eq!(sig.param("x").unwrap().ty, Type::float());
    assert_eq!(sig.param("factor").unwrap().ty, Type::int());
    assert_eq!(sig.ret, Type::float());
}

#[test]
fn test_every_expression_has_a_type() {
    let src = "\
import math

LIMIT = 10

class Box:
    def __init__(self, size: int):
        self.size = size

    def area(self) -> int:
        return self.size * self.size

def run(items: list[int]) -> float:
    total = 0
    for i in items:
        total += i
    with open(\"x\") as fh:
        pass
    return math.sqrt(total) + (lambda y: y)(1)

if __name__ == \"__main__\":
    print(run([1, 2, 3]))
";
    let (module, inference) = infer_src(src);
    for decl in &module.body {
        decl.walk_exprs(&mut |e: &Expr| {
            assert!(inference.has_type(e.id), "no type for {:?}", e);
        });
    }
}

#[test]
fn test_true_division_of_ints_is_float() {
    let (_, inference) = infer_src("def half(n: int):\n    return n / 2\n");
    assert_eq!(ret(&inference, "half"), Type::float());
    let (_, inference) = infer_src("def half(n: int):\n    return n // 2\n");
    assert_eq!(ret(&inference, "half"), Type::int());
}

#[test]
fn test_function_without_return_is_none() {
    let (_, inference) = infer_src("def hello():\n    print(\"hi\")\n");
    assert_eq!(ret(&inference, "hello"), Type::none());
}

// ============================================================================
// JOIN POINTS
// ============================================================================

#[test]
fn test_disagreeing_branches_widen_to_dynamic() {
    let src = "\
def pick(flag: bool):
    if flag:
        x = 1
    else:
        x = \"one\"
    return x
";
    let (_, inference) = infer_src(src);
    assert_eq!(inference.local_type("pick", "x"), Some(&Type::Dynamic));
    assert_eq!(ret(&inference, "pick"), Type::Dynamic);
    assert_eq!(inference.findings.len(), 1);
    let finding = &inference.findings[0];
    assert_eq!(finding.kind, ConstructKind::InferenceAmbiguity);
    assert_eq!(finding.severity, Severity::Info);
    assert_eq!(finding.origin, Origin::Inference);
    assert!(finding.message.contains("`x`"));
}

#[test]
fn test_agreeing_branches_keep_type() {
    let src = "\
def sign(n: int):
    if n < 0:
        s = -1
    else:
        s = 1
    return s
";
    let (_, inference) = infer_src(src);
    assert_eq!(inference.local_type("sign", "s"), Some(&Type::int()));
    assert!(inference.findings.is_empty());
}

#[test]
fn test_early_return_branch_is_not_joined() {
    let src = "\
def describe(n: int):
    if n == 0:
        return \"zero\"
    return \"many\"
";
    let (_, inference) = infer_src(src);
    assert_eq!(ret(&inference, "describe"), Type::str());
}

#[test]
fn test_none_and_value_returns_become_optional() {
    let src = "\
def find(xs: list[int], target: int):
    for x in xs:
        if x == target:
            return x
    return None
";
    let (_, inference) = infer_src(src);
    assert_eq!(ret(&inference, "find"), Type::optional(Type::int()));
    assert!(inference.findings.is_empty());
}

#[test]
fn test_append_refines_empty_list() {
    let src = "\
def evens(n: int):
    out = []
    for i in range(n):
        if i % 2 == 0:
            out.append(i)
    return out
";
    let (_, inference) = infer_src(src);
    assert_eq!(ret(&inference, "evens"), Type::list(Type::int()));
}

#[test]
fn test_conflicting_call_sites_are_ambiguous() {
    let src = "\
def show(v):
    return v

def main():
    show(1)
    show(\"a\")
";
    let (_, inference) = infer_src(src);
    let sig = inference.signature("show").unwrap();
    assert_eq!(sig.param("v").unwrap().ty, Type::Dynamic);
    assert_eq!(inference.findings.len(), 1);
    assert!(inference.findings[0]
        .message
        .contains("parameter `v` across call sites of `show`"));
}

// ============================================================================
// RECURSION AND FORWARD REFERENCES
// ============================================================================

#[test]
fn test_recursive_call_is_unresolved() {
    let src = "\
def fact(n: int):
    if n <= 1:
        return 1
    return n * fact(n - 1)
";
    let (module, inference) = infer_src(src);
    let call = find_call(&module, "fact");
    assert_eq!(inference.type_of(call), Type::Unresolved);
    // the unresolved arm yields to the literal arm
    assert_eq!(ret(&inference, "fact"), Type::int());
}

#[test]
fn test_forward_reference_is_unresolved() {
    let src = "\
def first():
    return second()

def second():
    return 1
";
    let (_, inference) = infer_src(src);
    assert_eq!(ret(&inference, "first"), Type::Unresolved);
    assert_eq!(ret(&inference, "second"), Type::int());
}

#[test]
fn test_earlier_callee_signature_is_used() {
    let src = "\
def second() -> str:
    return \"b\"

def first():
    return second().upper()
";
    let (_, inference) = infer_src(src);
    assert_eq!(ret(&inference, "first"), Type::str());
}

// ============================================================================
// CLASSES
// ============================================================================

#[test]
fn test_init_fields_take_parameter_annotations() {
    let src = "\
class Point:
    def __init__(self, x: int, y: int):
        self.x = x
        self.y = y

    def norm2(self):
        return self.x * self.x + self.y * self.y
";
    let (_, inference) = infer_src(src);
    assert_eq!(
        inference.fields["Point"],
        vec![
            ("x".to_string(), Type::int()),
            ("y".to_string(), Type::int())
        ]
    );
    assert_eq!(ret(&inference, "Point.__init__"), Type::Named("Point".to_string()));
    assert_eq!(ret(&inference, "Point.norm2"), Type::int());
}

#[test]
fn test_dataclass_constructor_is_synthesized() {
    let src = "\
from dataclasses import dataclass

@dataclass
class Item:
    name: str
    qty: int = 0
";
    let (_, inference) = infer_src(src);
    let init = inference.signature("Item.__init__").unwrap();
    assert_eq!(init.params.len(), 2);
    assert_eq!(init.params[0].ty, Type::str());
    assert!(!init.params[0].has_default);
    assert_eq!(init.params[1].ty, Type::int());
    assert!(init.params[1].has_default);
}

#[test]
fn test_method_lookup_follows_base_class() {
    let src = "\
class Animal:
    def name(self) -> str:
        return \"animal\"

class Dog(Animal):
    def bark(self):
        return self.name()
";
    let (_, inference) = infer_src(src);
    assert_eq!(inference.bases["Dog"], "Animal");
    assert_eq!(inference.method_owner("Dog", "name").as_deref(), Some("Animal.name"));
    assert_eq!(ret(&inference, "Dog.bark"), Type::str());
}

#[test]
fn test_mutating_methods_are_recorded() {
    let src = "\
class Counter:
    def __init__(self):
        self.n = 0

    def bump(self):
        self.n += 1

    def get(self) -> int:
        return self.n
";
    let (_, inference) = infer_src(src);
    assert!(inference.mutating.contains("Counter.bump"));
    assert!(!inference.mutating.contains("Counter.get"));
    assert_eq!(inference.field_type("Counter", "n"), Some(Type::int()));
}

// ============================================================================
// FALLIBILITY
// ============================================================================

#[test]
fn test_raise_propagates_through_callers() {
    let src = "\
def parse(s: str) -> int:
    if not s:
        raise ValueError(\"empty\")
    return int(s)

def total(a: str, b: str) -> int:
    return parse(a) + parse(b)

def safe(s: str) -> int:
    try:
        return parse(s)
    except ValueError:
        return 0
";
    let (_, inference) = infer_src(src);
    assert!(inference.is_fallible("parse"));
    assert!(inference.is_fallible("total"));
    assert!(!inference.is_fallible("safe"));
}

#[test]
fn test_int_of_string_is_fallible() {
    let (_, inference) = infer_src("def conv(s: str) -> int:\n    return int(s)\n");
    assert!(inference.is_fallible("conv"));
    let (_, inference) = infer_src("def conv(x: float) -> int:\n    return int(x)\n");
    assert!(!inference.is_fallible("conv"));
}

#[test]
fn test_fallible_constructor() {
    let src = "\
class Account:
    def __init__(self, balance: int):
        if balance < 0:
            raise ValueError(\"negative\")
        self.balance = balance

def open_account() -> Account:
    return Account(10)
";
    let (_, inference) = infer_src(src);
    assert!(inference.is_fallible("Account.__init__"));
    assert!(inference.is_fallible("open_account"));
}

// ============================================================================
// MODULE SCOPE
// ============================================================================

#[test]
fn test_lambda_variable_gets_signature() {
    let src = "\
square = lambda x: x * x

def main():
    return square(3)
";
    let (_, inference) = infer_src(src);
    let sig = inference.signature("square").unwrap();
    assert_eq!(sig.params[0].ty, Type::int());
    assert_eq!(sig.ret, Type::int());
    assert_eq!(ret(&inference, "main"), Type::int());
}

#[test]
fn test_globals_and_main_scope() {
    let src = "\
NAMES = [\"a\", \"b\"]

if __name__ == \"__main__\":
    count = len(NAMES)
";
    let (_, inference) = infer_src(src);
    assert_eq!(inference.globals["NAMES"], Type::list(Type::str()));
    assert_eq!(inference.local_type(MAIN_SCOPE, "count"), Some(&Type::int()));
}

#[test]
fn test_binop_type_rules() {
    assert_eq!(binop_type(BinOp::Add, &Type::int(), &Type::float()), Type::float());
    assert_eq!(binop_type(BinOp::Mul, &Type::str(), &Type::int()), Type::str());
    assert_eq!(binop_type(BinOp::Mul, &Type::int(), &Type::str()), Type::str());
    assert_eq!(binop_type(BinOp::Add, &Type::bool(), &Type::int()), Type::int());
    assert_eq!(
        binop_type(BinOp::Add, &Type::int(), &Type::Unresolved),
        Type::Unresolved
    );
    assert_eq!(binop_type(BinOp::Sub, &Type::str(), &Type::str()), Type::Dynamic);
}
