//! Analysis stage - flags constructs with no direct Rust equivalent.

use anyhow::Result;
use tracing::info;

use crate::diagnostics::Severity;
use crate::pipeline::types::{PipelineContext, PipelineStage, ValidationResult};

/// Analysis stage - runs the compatibility analyzer
pub struct AnalysisStage;

impl PipelineStage for AnalysisStage {
    fn name(&self) -> &str {
        "Analysis"
    }

    fn execute(&self, mut ctx: PipelineContext) -> Result<PipelineContext> {
        info!("Analyzing module '{}'", ctx.module.name);

        let findings = crate::analyzer::analyze_with(&ctx.module, &ctx.table)?;
        ctx.findings.extend(findings);

        Ok(ctx)
    }

    fn validate(&self, ctx: &PipelineContext) -> Result<ValidationResult> {
        let blocking = ctx
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Blocking)
            .count();
        Ok(ValidationResult {
            stage: self.name().to_string(),
            passed: true,
            message: format!(
                "{} findings ({} blocking)",
                ctx.findings.len(),
                blocking
            ),
            details: Some(serde_json::json!({
                "findings": ctx.findings.len(),
                "blocking": blocking,
            })),
        })
    }
}
