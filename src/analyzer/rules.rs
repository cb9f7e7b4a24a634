//! Classification table
//!
//! One row per construct kind. Messages and actions are templates; `{detail}` is replaced
//! with the construct's name or context when a finding is produced.

use crate::ast::Location;
use crate::diagnostics::{ConstructKind, Finding, Origin, Severity};

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub kind: ConstructKind,
    pub severity: Severity,
    pub message: &'static str,
    pub action: &'static str,
}

impl Rule {
    pub fn finding(&self, location: Location, detail: &str, unit: usize, origin: Origin) -> Finding {
        Finding {
            kind: self.kind,
            location,
            severity: self.severity,
            message: self.message.replace("{detail}", detail),
            suggested_action: self.action.replace("{detail}", detail),
            origin,
            unit,
        }
    }
}

pub const RULES: &[Rule] = &[
    Rule {
        kind: ConstructKind::SourceOnlyImport,
        severity: Severity::Blocking,
        message: "import of `{detail}` has no known Rust equivalent",
        action: "Find a Rust crate covering `{detail}` or reimplement the functionality used",
    },
    Rule {
        kind: ConstructKind::DynamicAttributeMutation,
        severity: Severity::Warning,
        message: "class `{detail}` adds or mutates attributes dynamically",
        action: "Declare every attribute as an explicit struct field",
    },
    Rule {
        kind: ConstructKind::ExceptionControlFlow,
        severity: Severity::Warning,
        message: "{detail} uses exception-based control flow",
        action: "Propagate errors with Result and the ? operator",
    },
    Rule {
        kind: ConstructKind::AnonymousFunction,
        severity: Severity::Warning,
        message: "lambda in {detail} must become a named function or closure",
        action: "Extract a named fn, or a closure with an explicit capture list",
    },
    Rule {
        kind: ConstructKind::MultipleInheritance,
        severity: Severity::Blocking,
        message: "class `{detail}` uses multiple inheritance",
        action: "Decompose each base into a trait and implement the traits on the struct",
    },
    Rule {
        kind: ConstructKind::DuckTypedParameter,
        severity: Severity::Warning,
        message: "parameter `{detail}` has no usable type evidence",
        action: "Add a type annotation, or bound the generic parameter with a trait",
    },
    Rule {
        kind: ConstructKind::ArbitraryPrecisionInteger,
        severity: Severity::Warning,
        message: "{detail} may exceed the 64-bit integer range",
        action: "Choose i64/i128 with checked arithmetic, or a big-integer crate such as num-bigint",
    },
    Rule {
        kind: ConstructKind::ExternalBaseClass,
        severity: Severity::Warning,
        message: "class {detail} extends a base defined outside this module",
        action: "Hold the external type as a field, or implement its trait on the struct",
    },
    Rule {
        kind: ConstructKind::GeneratorOrCoroutine,
        severity: Severity::Blocking,
        message: "{detail} is a generator or coroutine",
        action: "Rewrite as an Iterator implementation or an async fn",
    },
    Rule {
        kind: ConstructKind::Reflection,
        severity: Severity::Blocking,
        message: "`{detail}` relies on runtime reflection",
        action: "Replace with statically known field access or an explicit dispatch table",
    },
    Rule {
        kind: ConstructKind::ScopeRebinding,
        severity: Severity::Blocking,
        message: "`{detail}` rebinds a variable of an enclosing scope",
        action: "Pass the value explicitly, or keep shared state in a struct",
    },
    Rule {
        kind: ConstructKind::VariadicParameters,
        severity: Severity::Blocking,
        message: "parameter `{detail}` is variadic",
        action: "Replace with a slice or an options struct",
    },
    Rule {
        kind: ConstructKind::CustomDecorator,
        severity: Severity::Warning,
        message: "decorator `{detail}` has no Rust equivalent",
        action: "Inline the decorator behaviour or write an explicit wrapper function",
    },
    Rule {
        kind: ConstructKind::ModuleLevelStatement,
        severity: Severity::Warning,
        message: "module-level statement at line {detail} runs at import time",
        action: "Move the statement into main() or an explicit init function",
    },
    Rule {
        kind: ConstructKind::UnsupportedSyntax,
        severity: Severity::Blocking,
        message: "`{detail}` has no lowering rule",
        action: "Translate this construct manually",
    },
    Rule {
        kind: ConstructKind::InferenceAmbiguity,
        severity: Severity::Info,
        message: "conflicting types for {detail}; widened to a dynamic type",
        action: "Annotate the binding to pick one type",
    },
    Rule {
        kind: ConstructKind::ManualImplementation,
        severity: Severity::Blocking,
        message: "{detail} requires manual implementation",
        action: "Replace the placeholder with a hand-written translation",
    },
    Rule {
        kind: ConstructKind::AmbiguousCapability,
        severity: Severity::Blocking,
        message: "method `{detail}` is defined by more than one base",
        action: "Decide which trait owns `{detail}` and implement it explicitly",
    },
];

/// Row for a construct kind
pub fn rule(kind: ConstructKind) -> &'static Rule {
    RULES
        .iter()
        .find(|r| r.kind == kind)
        .unwrap_or(&FALLBACK)
}

const FALLBACK: Rule = Rule {
    kind: ConstructKind::UnsupportedSyntax,
    severity: Severity::Blocking,
    message: "`{detail}` has no lowering rule",
    action: "Translate this construct manually",
};

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KINDS: &[ConstructKind] = &[
        ConstructKind::SourceOnlyImport,
        ConstructKind::DynamicAttributeMutation,
        ConstructKind::ExceptionControlFlow,
        ConstructKind::AnonymousFunction,
        ConstructKind::MultipleInheritance,
        ConstructKind::DuckTypedParameter,
        ConstructKind::ArbitraryPrecisionInteger,
        ConstructKind::ExternalBaseClass,
        ConstructKind::GeneratorOrCoroutine,
        ConstructKind::Reflection,
        ConstructKind::ScopeRebinding,
        ConstructKind::VariadicParameters,
        ConstructKind::CustomDecorator,
        ConstructKind::ModuleLevelStatement,
        ConstructKind::UnsupportedSyntax,
        ConstructKind::InferenceAmbiguity,
        ConstructKind::ManualImplementation,
        ConstructKind::AmbiguousCapability,
    ];

    #[test]
    fn test_every_kind_has_exactly_one_rule() {
        for kind in ALL_KINDS {
            assert_eq!(
                RULES.iter().filter(|r| r.kind == *kind).count(),
                1,
                "{:?}",
                kind
            );
        }
        assert_eq!(RULES.len(), ALL_KINDS.len());
    }

    #[test]
    fn test_core_severities() {
        assert_eq!(rule(ConstructKind::SourceOnlyImport).severity, Severity::Blocking);
        assert_eq!(rule(ConstructKind::DynamicAttributeMutation).severity, Severity::Warning);
        assert_eq!(rule(ConstructKind::ExceptionControlFlow).severity, Severity::Warning);
        assert_eq!(rule(ConstructKind::AnonymousFunction).severity, Severity::Warning);
        assert_eq!(rule(ConstructKind::MultipleInheritance).severity, Severity::Blocking);
        assert_eq!(rule(ConstructKind::DuckTypedParameter).severity, Severity::Warning);
        assert_eq!(rule(ConstructKind::ArbitraryPrecisionInteger).severity, Severity::Warning);
        assert_eq!(rule(ConstructKind::InferenceAmbiguity).severity, Severity::Info);
    }

    #[test]
    fn test_templates_are_filled() {
        let f = rule(ConstructKind::SourceOnlyImport).finding(
            Location::new(1, 1),
            "django",
            0,
            Origin::Analysis,
        );
        assert_eq!(f.message, "import of `django` has no known Rust equivalent");
        assert!(f.suggested_action.contains("django"));
        assert!(!f.message.contains("{detail}"));
    }
}
