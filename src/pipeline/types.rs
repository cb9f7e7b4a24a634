//! Pipeline types and trait definitions.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::ast::Module;
use crate::codegen::LoweredUnit;
use crate::config::TranspileOptions;
use crate::diagnostics::Finding;
use crate::inference::Inference;
use crate::mappings::MappingTable;
use crate::report::Report;

/// Context passed between pipeline stages
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Module under translation; no stage mutates it
    pub module: Module,

    pub options: TranspileOptions,

    /// Import equivalents, built-ins plus configured extras
    pub table: MappingTable,

    /// Analysis and inference findings, in emission order
    pub findings: Vec<Finding>,

    /// Set by the inference stage; lowering requires it
    pub inference: Option<Inference>,

    /// One per top-level declaration once lowering ran
    pub units: Vec<LoweredUnit>,

    /// Rendered Rust module
    pub code: Option<String>,

    pub report: Option<Report>,

    /// Validation results
    pub validation_results: Vec<ValidationResult>,
}

impl PipelineContext {
    pub fn new(module: Module, options: TranspileOptions) -> Self {
        let table = MappingTable::new().with_extra(&options.extra_mappings);
        Self {
            module,
            options,
            table,
            findings: Vec::new(),
            inference: None,
            units: Vec::new(),
            code: None,
            report: None,
            validation_results: Vec::new(),
        }
    }

    /// Get final output artifacts
    pub fn output(self) -> Result<PipelineOutput> {
        let validation_passed = self.validation_results.iter().all(|v| v.passed);
        let report = self
            .report
            .ok_or_else(|| anyhow::anyhow!("pipeline finished without a report stage"))?;
        Ok(PipelineOutput {
            code: self.code,
            report,
            units: self.units,
            validation_passed,
        })
    }
}

/// Validation result from a pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub stage: String,
    pub passed: bool,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

/// Final output from the pipeline
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Generated Rust module; `None` for analysis-only runs
    pub code: Option<String>,
    pub report: Report,
    pub units: Vec<LoweredUnit>,
    pub validation_passed: bool,
}

impl PipelineOutput {
    pub fn blocked(&self) -> bool {
        self.report.blocked()
    }
}

/// Validation strategy for pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStrategy {
    /// Stop on first error (Jidoka principle)
    StopOnError,
    /// Continue on errors but collect them
    ContinueOnError,
    /// Skip validation
    None,
}

/// Trait for pipeline stages
pub trait PipelineStage: Send + Sync {
    /// Name of this stage
    fn name(&self) -> &str;

    /// Execute this stage
    fn execute(&self, ctx: PipelineContext) -> Result<PipelineContext>;

    /// Validate the output of this stage
    fn validate(&self, _ctx: &PipelineContext) -> Result<ValidationResult> {
        // Default: always pass
        Ok(ValidationResult {
            stage: self.name().to_string(),
            passed: true,
            message: "No validation configured".to_string(),
            details: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn empty_module() -> Module {
        Module {
            name: "sample".to_string(),
            path: "sample.py".to_string(),
            doc: None,
            body: Vec::new(),
        }
    }

    #[test]
    fn test_pipeline_context_new() {
        let ctx = PipelineContext::new(empty_module(), TranspileOptions::new("sample"));
        assert_eq!(ctx.options.module_name, "sample");
        assert!(ctx.findings.is_empty());
        assert!(ctx.inference.is_none());
        assert!(ctx.units.is_empty());
        assert!(ctx.code.is_none());
        assert!(ctx.report.is_none());
        assert!(ctx.validation_results.is_empty());
    }

    #[test]
    fn test_pipeline_context_uses_extra_mappings() {
        let mut options = TranspileOptions::new("sample");
        options.extra_mappings = BTreeMap::from([("flask".to_string(), "axum".to_string())]);
        let ctx = PipelineContext::new(empty_module(), options);
        assert!(ctx.table.lookup("flask").is_some());
    }

    #[test]
    fn test_output_requires_report() {
        let ctx = PipelineContext::new(empty_module(), TranspileOptions::new("sample"));
        assert!(ctx.output().is_err());
    }

    #[test]
    fn test_output_with_failed_validation() {
        let mut ctx = PipelineContext::new(empty_module(), TranspileOptions::new("sample"));
        ctx.report = Some(crate::report::assemble("sample", &[], &[], false));
        ctx.validation_results.push(ValidationResult {
            stage: "stage1".to_string(),
            passed: true,
            message: "OK".to_string(),
            details: None,
        });
        ctx.validation_results.push(ValidationResult {
            stage: "stage2".to_string(),
            passed: false,
            message: "Failed".to_string(),
            details: None,
        });
        let output = ctx.output().unwrap();
        assert!(!output.validation_passed); // One failure means overall failure
        assert!(!output.blocked());
    }

    #[test]
    fn test_validation_result_serialization() {
        let result = ValidationResult {
            stage: "Lowering".to_string(),
            passed: true,
            message: "Success".to_string(),
            details: Some(serde_json::json!({"units": 3})),
        };
        let json = serde_json::to_string(&result).unwrap();
        let deserialized: ValidationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.stage, "Lowering");
        assert!(deserialized.passed);
    }
}
