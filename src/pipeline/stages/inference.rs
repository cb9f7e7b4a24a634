//! Inference stage - assigns types and ownership hints.

use anyhow::Result;
use tracing::info;

use crate::pipeline::types::{PipelineContext, PipelineStage, ValidationResult};

/// Inference stage - must complete before lowering
pub struct InferenceStage;

impl PipelineStage for InferenceStage {
    fn name(&self) -> &str {
        "Inference"
    }

    fn execute(&self, mut ctx: PipelineContext) -> Result<PipelineContext> {
        info!("Inferring types for '{}'", ctx.module.name);

        let inference = crate::inference::infer(&ctx.module)?;
        ctx.findings.extend(inference.findings.iter().cloned());
        ctx.inference = Some(inference);

        Ok(ctx)
    }

    fn validate(&self, ctx: &PipelineContext) -> Result<ValidationResult> {
        let passed = ctx.inference.is_some();
        let signatures = ctx.inference.as_ref().map_or(0, |i| i.signatures.len());
        Ok(ValidationResult {
            stage: self.name().to_string(),
            passed,
            message: if passed {
                format!("{} signatures inferred", signatures)
            } else {
                "Inference produced no result".to_string()
            },
            details: None,
        })
    }
}
