use super::*;
use crate::diagnostics::Severity;
use crate::frontend::parse_source;

fn findings(src: &str) -> Vec<Finding> {
    let module = parse_source(src, "sample.py").unwrap();
    analyze(&module).unwrap()
}

fn kinds(src: &str) -> Vec<ConstructKind> {
    findings(src).into_iter().map(|f| f.kind).collect()
}

fn count(src: &str, kind: ConstructKind) -> usize {
    kinds(src).into_iter().filter(|k| *k == kind).count()
}

// ============================================================================
// CORE SCENARIOS
// ============================================================================

#[test]
fn test_add_with_integer_call_sites_is_clean() {
    let src = "\
def add(a, b):
    return a + b

def main():
    return add(1, 2)

if __name__ == \"__main__\":
    print(add(3, 4))
";
    assert!(findings(src).is_empty(), "{:?}", findings(src));
}

#[test]
fn test_multiple_inheritance_is_one_blocking_finding() {
    let src = "\
class Walker:
    def walk(self) -> str:
        return \"walk\"

class Swimmer:
    def swim(self) -> str:
        return \"swim\"

class Duck(Walker, Swimmer):
    pass
";
    let found = findings(src);
    let mi: Vec<&Finding> = found
        .iter()
        .filter(|f| f.kind == ConstructKind::MultipleInheritance)
        .collect();
    assert_eq!(mi.len(), 1);
    assert_eq!(mi[0].severity, Severity::Blocking);
    assert_eq!(mi[0].location.line, 9);
    assert!(mi[0].message.contains("Duck"));
}

#[test]
fn test_lambda_assigned_to_variable_is_one_warning() {
    let found = findings("square = lambda x: x * x\n");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].kind, ConstructKind::AnonymousFunction);
    assert_eq!(found[0].severity, Severity::Warning);
    assert!(found[0].message.contains("module variable `square`"));
}

#[test]
fn test_analysis_is_deterministic() {
    let src = "import numpy\n\ndef f(x):\n    try:\n        return x\n    except Exception:\n        raise ValueError(\"bad\")\n";
    assert_eq!(findings(src), findings(src));
}

// ============================================================================
// IMPORTS
// ============================================================================

#[test]
fn test_mapped_imports_produce_no_findings() {
    assert!(findings("import math\nimport os.path\nfrom typing import List\n").is_empty());
}

#[test]
fn test_unmapped_import_is_blocking() {
    let found = findings("import django\n");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].kind, ConstructKind::SourceOnlyImport);
    assert!(found[0].is_blocking());
    assert!(found[0].message.contains("django"));
}

#[test]
fn test_relative_import_is_source_only() {
    let found = findings("from .helpers import tool\n");
    assert_eq!(found.len(), 1);
    assert!(found[0].message.contains(".helpers"));
}

#[test]
fn test_extra_mappings_suppress_findings() {
    let module = parse_source("import flask\n", "app.py").unwrap();
    let mut extra = std::collections::BTreeMap::new();
    extra.insert("flask".to_string(), "axum".to_string());
    let table = MappingTable::new().with_extra(&extra);
    assert!(analyze_with(&module, &table).unwrap().is_empty());
}

// ============================================================================
// CLASSES
// ============================================================================

#[test]
fn test_dynamic_attribute_outside_init() {
    let src = "\
class Counter:
    def __init__(self, start: int):
        self.count = start

    def tag(self, label: str):
        self.label = label
";
    let found = findings(src);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].kind, ConstructKind::DynamicAttributeMutation);
    assert_eq!(found[0].location.line, 6);
}

#[test]
fn test_inherited_field_is_declared_in_subclass() {
    let src = "\
class Counter:
    def __init__(self, start: int):
        self.count = start

class Sub(Counter):
    def dec(self):
        self.count -= 1
";
    assert_eq!(count(src, ConstructKind::DynamicAttributeMutation), 0);

    let fresh = "\
class Counter:
    def __init__(self, start: int):
        self.count = start

class Sub(Counter):
    def tag(self, label: str):
        self.label = label
";
    let found = findings(fresh);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].kind, ConstructKind::DynamicAttributeMutation);
    assert_eq!(found[0].location.line, 7);
}

#[test]
fn test_setattr_on_self_is_dynamic_attribute_not_reflection() {
    let src = "\
class Bag:
    def put(self, key: str, value: int):
        setattr(self, key, value)
";
    let k = kinds(src);
    assert!(k.contains(&ConstructKind::DynamicAttributeMutation));
    assert!(!k.contains(&ConstructKind::Reflection));
}

#[test]
fn test_external_base_class_warning() {
    let found = findings("class Handler(BaseHandler):\n    pass\n");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].kind, ConstructKind::ExternalBaseClass);
    assert_eq!(found[0].severity, Severity::Warning);
}

#[test]
fn test_exception_subclass_is_not_external_base() {
    assert!(findings("class ParseError(ValueError):\n    pass\n").is_empty());
}

#[test]
fn test_in_module_single_base_is_fine() {
    let src = "class A:\n    x: int = 0\n\nclass B(A):\n    y: int = 1\n";
    assert!(findings(src).is_empty());
}

#[test]
fn test_object_and_abc_bases_are_ignored() {
    let src = "from abc import ABC\n\nclass Shape(ABC, object):\n    pass\n";
    assert!(findings(src).is_empty());
}

// ============================================================================
// FUNCTIONS
// ============================================================================

#[test]
fn test_duck_typed_parameter_without_evidence() {
    let found = findings("def show(item):\n    return item\n");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].kind, ConstructKind::DuckTypedParameter);
    assert!(found[0].message.contains("`item` of `show`"));
}

#[test]
fn test_annotation_or_default_counts_as_evidence() {
    assert!(findings("def f(a: int, b=2, c=\"x\"):\n    return a\n").is_empty());
}

#[test]
fn test_none_default_is_not_evidence() {
    assert_eq!(
        count("def f(a=None):\n    return a\n", ConstructKind::DuckTypedParameter),
        1
    );
}

#[test]
fn test_method_receiver_is_not_duck_typed() {
    let src = "class P:\n    def get(self) -> int:\n        return 1\n";
    assert!(findings(src).is_empty());
}

#[test]
fn test_constructor_call_sites_count_as_evidence() {
    let src = "\
class Point:
    def __init__(self, x, y):
        self.x = x
        self.y = y

def origin() -> Point:
    return Point(0, 0)
";
    assert!(findings(src).is_empty(), "{:?}", findings(src));
}

#[test]
fn test_variadic_parameters_are_blocking() {
    let found = findings("def f(*args, **kwargs):\n    pass\n");
    assert_eq!(found.len(), 2);
    assert!(found
        .iter()
        .all(|f| f.kind == ConstructKind::VariadicParameters && f.is_blocking()));
}

#[test]
fn test_custom_decorator_warning() {
    let src = "@lru_cache\ndef f(n: int) -> int:\n    return n\n";
    let found = findings(src);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].kind, ConstructKind::CustomDecorator);
    assert!(found[0].message.contains("lru_cache"));
}

#[test]
fn test_async_and_yield_are_blocking() {
    let k = kinds("async def fetch() -> int:\n    return await get()\n");
    assert_eq!(
        k.iter()
            .filter(|k| **k == ConstructKind::GeneratorOrCoroutine)
            .count(),
        2
    );
    assert_eq!(
        count("def gen():\n    yield 1\n", ConstructKind::GeneratorOrCoroutine),
        1
    );
}

// ============================================================================
// STATEMENTS AND EXPRESSIONS
// ============================================================================

#[test]
fn test_try_and_raise_are_exception_control_flow() {
    let src = "\
def parse(s: str) -> int:
    try:
        return int(s)
    except ValueError:
        raise RuntimeError(\"bad\")
";
    let found = findings(src);
    assert_eq!(found.len(), 2);
    assert!(found
        .iter()
        .all(|f| f.kind == ConstructKind::ExceptionControlFlow));
    // source order: try first, raise second
    assert!(found[0].location < found[1].location);
}

#[test]
fn test_global_rebinding() {
    let src = "COUNT = 0\n\ndef bump():\n    global COUNT\n    COUNT += 1\n";
    assert_eq!(count(src, ConstructKind::ScopeRebinding), 1);
}

#[test]
fn test_big_integer_literal_and_int_power() {
    assert_eq!(
        count("BIG = 123456789012345678901234567890\n", ConstructKind::ArbitraryPrecisionInteger),
        1
    );
    assert_eq!(
        count("def p(n: int) -> int:\n    return 2 ** n\n", ConstructKind::ArbitraryPrecisionInteger),
        1
    );
    assert_eq!(
        count("def p(x: float) -> float:\n    return x ** 0.5\n", ConstructKind::ArbitraryPrecisionInteger),
        0
    );
}

#[test]
fn test_wide_left_shift_is_arbitrary_precision() {
    let shift = |body: &str| format!("def sh(a: int, n: int) -> int:\n    {}\n    return a\n", body);
    assert_eq!(count(&shift("a = a << 70"), ConstructKind::ArbitraryPrecisionInteger), 1);
    assert_eq!(count(&shift("a = a << n"), ConstructKind::ArbitraryPrecisionInteger), 1);
    assert_eq!(count(&shift("a <<= 40"), ConstructKind::ArbitraryPrecisionInteger), 1);
    assert_eq!(count(&shift("a = a << 4"), ConstructKind::ArbitraryPrecisionInteger), 0);
    assert_eq!(count(&shift("a = a >> 70"), ConstructKind::ArbitraryPrecisionInteger), 0);
}

#[test]
fn test_reflection_builtins() {
    let src = "def run(code: str):\n    return eval(code)\n";
    let found = findings(src);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].kind, ConstructKind::Reflection);
    assert!(found[0].is_blocking());
}

#[test]
fn test_module_level_statement_warning() {
    let found = findings("print(\"loaded\")\n");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].kind, ConstructKind::ModuleLevelStatement);
    assert!(found[0].message.contains("line 1"));
}

#[test]
fn test_main_guard_is_not_module_statement() {
    let src = "def main() -> None:\n    pass\n\nif __name__ == \"__main__\":\n    main()\n";
    assert!(findings(src).is_empty());
}

#[test]
fn test_with_statement_is_unsupported() {
    let src = "def read(path: str) -> str:\n    with open(path) as fh:\n        return fh.read()\n";
    let found = findings(src);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].kind, ConstructKind::UnsupportedSyntax);
    assert!(found[0].message.contains("with statement"));
}

#[test]
fn test_findings_carry_unit_index() {
    let src = "import json\n\ndef f(x):\n    return x\n";
    let found = findings(src);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].unit, 1);
    assert_eq!(found[0].origin, Origin::Analysis);
}

#[test]
fn test_is_main_guard_reversed_operands() {
    let module =
        parse_source("if \"__main__\" == __name__:\n    pass\n", "m.py").unwrap();
    match &module.body[0] {
        Decl::Statement(stmt) => assert!(is_main_guard(stmt)),
        other => panic!("expected statement, got {:?}", other),
    }
}
