//! Static equivalence tables
//!
//! Maps Python library imports to the Rust crate or std module that covers the same ground,
//! and `math` functions/constants to their `f64` spelling. Lookups are exact on the dotted
//! module path first, then on its root package.
//!
//! ```python
//! import numpy as np
//! from collections import defaultdict
//! ```
//!
//! Lowers to mapping hints:
//!
//! ```rust,ignore
//! // import numpy as np -> trueno (add `trueno` to Cargo.toml)
//! // from collections import defaultdict -> std::collections
//! ```

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::types::Type;

/// Rust equivalent of one Python module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportMapping {
    pub python_module: String,
    /// Rust path or crate that provides the equivalent functionality
    pub rust_equivalent: String,
    /// Third-party crate to add to Cargo.toml
    pub crate_name: Option<String>,
    /// Typing/annotation helper with no runtime counterpart
    pub annotation_only: bool,
}

impl ImportMapping {
    fn std(python: &str, rust: &str) -> Self {
        Self {
            python_module: python.to_string(),
            rust_equivalent: rust.to_string(),
            crate_name: None,
            annotation_only: false,
        }
    }

    fn krate(python: &str, rust: &str) -> Self {
        Self {
            python_module: python.to_string(),
            rust_equivalent: rust.to_string(),
            crate_name: Some(rust.split("::").next().unwrap_or(rust).to_string()),
            annotation_only: false,
        }
    }

    fn annotation(python: &str) -> Self {
        Self {
            python_module: python.to_string(),
            rust_equivalent: String::new(),
            crate_name: None,
            annotation_only: true,
        }
    }

    /// Comment text used by the lowering pass
    pub fn hint(&self) -> String {
        if self.annotation_only {
            "no Rust equivalent needed".to_string()
        } else if let Some(krate) = &self.crate_name {
            format!("{} (add `{}` to Cargo.toml)", self.rust_equivalent, krate)
        } else {
            self.rust_equivalent.clone()
        }
    }
}

/// Import equivalence table
#[derive(Debug, Clone)]
pub struct MappingTable {
    imports: HashMap<String, ImportMapping>,
}

impl Default for MappingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingTable {
    /// Create the table with the built-in mappings
    pub fn new() -> Self {
        let mut imports = HashMap::new();
        let mut insert = |m: ImportMapping| {
            imports.insert(m.python_module.clone(), m);
        };

        // Annotation-only helpers
        for module in ["typing", "typing_extensions", "dataclasses", "abc", "__future__"] {
            insert(ImportMapping::annotation(module));
        }

        // Standard library
        insert(ImportMapping::std("math", "f64 methods and std::f64::consts"));
        insert(ImportMapping::std("os", "std::env and std::fs"));
        insert(ImportMapping::std("os.path", "std::path::Path"));
        insert(ImportMapping::std("pathlib", "std::path::PathBuf"));
        insert(ImportMapping::std("sys", "std::env and std::process"));
        insert(ImportMapping::std("collections", "std::collections"));
        insert(ImportMapping::std("time", "std::time"));
        insert(ImportMapping::std("subprocess", "std::process::Command"));
        insert(ImportMapping::std("threading", "std::thread and std::sync"));
        insert(ImportMapping::std("copy", "Clone"));
        insert(ImportMapping::std("io", "std::io"));
        insert(ImportMapping::std("functools", "closures and Iterator adapters"));
        insert(ImportMapping::std("unittest", "#[test] functions"));

        // Ecosystem crates
        insert(ImportMapping::krate("json", "serde_json"));
        insert(ImportMapping::krate("re", "regex"));
        insert(ImportMapping::krate("itertools", "itertools"));
        insert(ImportMapping::krate("random", "rand"));
        insert(ImportMapping::krate("datetime", "chrono"));
        insert(ImportMapping::krate("logging", "tracing"));
        insert(ImportMapping::krate("argparse", "clap"));
        insert(ImportMapping::krate("csv", "csv"));
        insert(ImportMapping::krate("hashlib", "sha2"));
        insert(ImportMapping::krate("requests", "reqwest"));
        insert(ImportMapping::krate("pytest", "proptest"));

        // Scientific stack
        insert(ImportMapping::krate("numpy", "trueno"));
        insert(ImportMapping::krate("sklearn", "aprender"));
        insert(ImportMapping::krate("torch", "realizar"));
        insert(ImportMapping::krate("pandas", "polars"));

        Self { imports }
    }

    /// Add user-supplied mappings (`[analysis] extra_mappings` in the config file)
    pub fn with_extra(mut self, extra: &BTreeMap<String, String>) -> Self {
        for (python, rust) in extra {
            self.imports
                .insert(python.clone(), ImportMapping::krate(python, rust));
        }
        self
    }

    /// Look up a dotted module path, falling back to its root package
    pub fn lookup(&self, module: &str) -> Option<&ImportMapping> {
        self.imports.get(module).or_else(|| {
            let root = module.split('.').next()?;
            self.imports.get(root)
        })
    }

    pub fn is_mapped(&self, module: &str) -> bool {
        self.lookup(module).is_some()
    }

    /// All mapped Python modules, sorted
    pub fn available_modules(&self) -> Vec<&str> {
        let mut modules: Vec<&str> = self.imports.keys().map(String::as_str).collect();
        modules.sort_unstable();
        modules
    }

    /// Human-readable listing of the table
    pub fn mapping_report(&self) -> String {
        let mut report = String::from("Python → Rust Import Map\n");
        report.push_str("========================\n\n");
        for module in self.available_modules() {
            if let Some(mapping) = self.imports.get(module) {
                report.push_str(&format!("{:<20} → {}\n", module, mapping.hint()));
            }
        }
        report
    }
}

/// `math` function lowering: template with `{0}`, `{1}` argument slots and the result type
pub fn math_function(name: &str) -> Option<(&'static str, Type)> {
    let mapping = match name {
        "sqrt" => ("({0} as f64).sqrt()", Type::float()),
        "exp" => ("({0} as f64).exp()", Type::float()),
        "log" => ("({0} as f64).ln()", Type::float()),
        "log2" => ("({0} as f64).log2()", Type::float()),
        "log10" => ("({0} as f64).log10()", Type::float()),
        "sin" => ("({0} as f64).sin()", Type::float()),
        "cos" => ("({0} as f64).cos()", Type::float()),
        "tan" => ("({0} as f64).tan()", Type::float()),
        "atan2" => ("({0} as f64).atan2({1} as f64)", Type::float()),
        "fabs" => ("({0} as f64).abs()", Type::float()),
        "pow" => ("({0} as f64).powf({1} as f64)", Type::float()),
        "hypot" => ("({0} as f64).hypot({1} as f64)", Type::float()),
        "floor" => ("({0} as f64).floor() as i64", Type::int()),
        "ceil" => ("({0} as f64).ceil() as i64", Type::int()),
        "trunc" => ("({0} as f64).trunc() as i64", Type::int()),
        "isnan" => ("({0} as f64).is_nan()", Type::bool()),
        "isinf" => ("({0} as f64).is_infinite()", Type::bool()),
        _ => return None,
    };
    Some(mapping)
}

/// `math` constants
pub fn math_constant(name: &str) -> Option<&'static str> {
    match name {
        "pi" => Some("std::f64::consts::PI"),
        "e" => Some("std::f64::consts::E"),
        "tau" => Some("std::f64::consts::TAU"),
        "inf" => Some("f64::INFINITY"),
        "nan" => Some("f64::NAN"),
        _ => None,
    }
}

/// Fill `{0}`, `{1}`, ... slots of a template
pub fn fill_template(template: &str, args: &[String]) -> String {
    let mut out = template.to_string();
    for (i, arg) in args.iter().enumerate() {
        out = out.replace(&format!("{{{}}}", i), arg);
    }
    out
}

/// Builtins whose use is runtime reflection or metaprogramming
pub const REFLECTION_BUILTINS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
    "globals",
    "locals",
    "vars",
    "__import__",
];

/// Decorators with a structural meaning the lowering pass understands
pub const KNOWN_DECORATORS: &[&str] = &[
    "staticmethod",
    "classmethod",
    "property",
    "dataclass",
    "dataclasses.dataclass",
    "abstractmethod",
    "abc.abstractmethod",
    "final",
    "typing.final",
];

pub fn is_known_decorator(name: &str) -> bool {
    KNOWN_DECORATORS.contains(&name)
        || [".setter", ".getter", ".deleter"]
            .iter()
            .any(|suffix| name.ends_with(suffix))
}

/// Builtin exception types a class may derive from to become an error type
pub const BUILTIN_EXCEPTIONS: &[&str] = &[
    "Exception",
    "BaseException",
    "ValueError",
    "TypeError",
    "KeyError",
    "IndexError",
    "LookupError",
    "RuntimeError",
    "ArithmeticError",
    "ZeroDivisionError",
    "OverflowError",
    "AttributeError",
    "NotImplementedError",
    "OSError",
    "IOError",
];

pub fn is_builtin_exception(name: &str) -> bool {
    BUILTIN_EXCEPTIONS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_exact_and_root() {
        let table = MappingTable::new();
        assert_eq!(
            table.lookup("os.path").map(|m| m.rust_equivalent.as_str()),
            Some("std::path::Path")
        );
        assert_eq!(
            table.lookup("numpy.linalg").map(|m| m.rust_equivalent.as_str()),
            Some("trueno")
        );
        assert!(table.lookup("django").is_none());
    }

    #[test]
    fn test_annotation_only_modules() {
        let table = MappingTable::new();
        let typing = table.lookup("typing").unwrap();
        assert!(typing.annotation_only);
        assert_eq!(typing.hint(), "no Rust equivalent needed");
    }

    #[test]
    fn test_crate_hint() {
        let table = MappingTable::new();
        assert_eq!(
            table.lookup("json").unwrap().hint(),
            "serde_json (add `serde_json` to Cargo.toml)"
        );
    }

    #[test]
    fn test_extra_mappings() {
        let mut extra = BTreeMap::new();
        extra.insert("flask".to_string(), "axum".to_string());
        let table = MappingTable::new().with_extra(&extra);
        assert!(table.is_mapped("flask"));
        assert_eq!(table.lookup("flask").unwrap().crate_name.as_deref(), Some("axum"));
    }

    #[test]
    fn test_available_modules_sorted() {
        let table = MappingTable::new();
        let modules = table.available_modules();
        let mut sorted = modules.clone();
        sorted.sort_unstable();
        assert_eq!(modules, sorted);
        assert!(table.mapping_report().contains("numpy"));
    }

    #[test]
    fn test_math_tables() {
        let (template, ty) = math_function("sqrt").unwrap();
        assert_eq!(fill_template(template, &["x".to_string()]), "(x as f64).sqrt()");
        assert_eq!(ty, Type::float());
        assert_eq!(math_constant("pi"), Some("std::f64::consts::PI"));
        assert!(math_function("gamma").is_none());
    }

    #[test]
    fn test_known_decorators() {
        assert!(is_known_decorator("staticmethod"));
        assert!(!is_known_decorator("lru_cache"));
    }
}
