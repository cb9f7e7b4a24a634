//! Findings: structured diagnostics describing one construct's translation status

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ast::Location;

/// Ordered so that `Blocking > Warning > Info`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Blocking,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "Info"),
            Severity::Warning => write!(f, "Warning"),
            Severity::Blocking => write!(f, "Blocking"),
        }
    }
}

/// Kind of construct a finding is about. Reports group and count by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConstructKind {
    SourceOnlyImport,
    DynamicAttributeMutation,
    ExceptionControlFlow,
    AnonymousFunction,
    MultipleInheritance,
    DuckTypedParameter,
    ArbitraryPrecisionInteger,
    ExternalBaseClass,
    GeneratorOrCoroutine,
    Reflection,
    ScopeRebinding,
    VariadicParameters,
    CustomDecorator,
    ModuleLevelStatement,
    UnsupportedSyntax,
    InferenceAmbiguity,
    ManualImplementation,
    AmbiguousCapability,
}

impl ConstructKind {
    /// Stable kebab-case identifier used in machine-readable output
    pub fn slug(self) -> &'static str {
        match self {
            ConstructKind::SourceOnlyImport => "source-only-import",
            ConstructKind::DynamicAttributeMutation => "dynamic-attribute-mutation",
            ConstructKind::ExceptionControlFlow => "exception-control-flow",
            ConstructKind::AnonymousFunction => "anonymous-function",
            ConstructKind::MultipleInheritance => "multiple-inheritance",
            ConstructKind::DuckTypedParameter => "duck-typed-parameter",
            ConstructKind::ArbitraryPrecisionInteger => "arbitrary-precision-integer",
            ConstructKind::ExternalBaseClass => "external-base-class",
            ConstructKind::GeneratorOrCoroutine => "generator-or-coroutine",
            ConstructKind::Reflection => "reflection",
            ConstructKind::ScopeRebinding => "scope-rebinding",
            ConstructKind::VariadicParameters => "variadic-parameters",
            ConstructKind::CustomDecorator => "custom-decorator",
            ConstructKind::ModuleLevelStatement => "module-level-statement",
            ConstructKind::UnsupportedSyntax => "unsupported-syntax",
            ConstructKind::InferenceAmbiguity => "inference-ambiguity",
            ConstructKind::ManualImplementation => "manual-implementation",
            ConstructKind::AmbiguousCapability => "ambiguous-capability",
        }
    }
}

impl fmt::Display for ConstructKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Pass that produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Origin {
    Analysis,
    Inference,
    Lowering,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Finding {
    pub kind: ConstructKind,
    pub location: Location,
    pub severity: Severity,
    pub message: String,
    pub suggested_action: String,
    pub origin: Origin,
    /// Index of the top-level declaration the construct belongs to
    pub unit: usize,
}

impl Finding {
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }

    /// Strict mode: Warning becomes Blocking, nothing else changes
    pub fn promoted(mut self) -> Self {
        if self.severity == Severity::Warning {
            self.severity = Severity::Blocking;
        }
        self
    }

    /// One-line reference used in generated-code comments
    pub fn reference(&self) -> String {
        format!("[{}: {} at {}]", self.severity, self.kind, self.location)
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}] {}",
            self.location, self.severity, self.kind, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(severity: Severity) -> Finding {
        Finding {
            kind: ConstructKind::AnonymousFunction,
            location: Location::new(4, 9),
            severity,
            message: "lambda must become a named function".to_string(),
            suggested_action: "Extract a named fn".to_string(),
            origin: Origin::Analysis,
            unit: 0,
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Blocking > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_promotion_only_touches_warnings() {
        assert_eq!(finding(Severity::Warning).promoted().severity, Severity::Blocking);
        assert_eq!(finding(Severity::Info).promoted().severity, Severity::Info);
        assert_eq!(finding(Severity::Blocking).promoted().severity, Severity::Blocking);
    }

    #[test]
    fn test_reference_format() {
        assert_eq!(
            finding(Severity::Warning).reference(),
            "[Warning: anonymous-function at 4:9]"
        );
    }

    #[test]
    fn test_kind_serializes_as_variant_name() {
        let json = serde_json::to_string(&ConstructKind::MultipleInheritance).unwrap();
        assert_eq!(json, "\"MultipleInheritance\"");
    }
}
