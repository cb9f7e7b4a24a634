//! Lowering stage - generates Rust text for every declaration.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::pipeline::types::{PipelineContext, PipelineStage, ValidationResult};

/// Lowering stage - one unit per top-level declaration
pub struct LoweringStage;

impl PipelineStage for LoweringStage {
    fn name(&self) -> &str {
        "Lowering"
    }

    fn execute(&self, mut ctx: PipelineContext) -> Result<PipelineContext> {
        let inference = ctx
            .inference
            .as_ref()
            .context("Lowering requires the inference stage to run first")?;

        let units =
            crate::codegen::lower_with(&ctx.module, inference, &ctx.findings, &ctx.table)?;
        let code = crate::codegen::render(
            &ctx.options.module_name,
            ctx.module.doc.as_deref(),
            &units,
        );
        info!(
            "Generated {} units ({} bytes) for '{}'",
            units.len(),
            code.len(),
            ctx.options.module_name
        );

        ctx.units = units;
        ctx.code = Some(code);
        Ok(ctx)
    }

    fn validate(&self, ctx: &PipelineContext) -> Result<ValidationResult> {
        let expected = ctx.module.body.len();
        if ctx.units.len() != expected {
            return Ok(ValidationResult {
                stage: self.name().to_string(),
                passed: false,
                message: format!(
                    "{} declarations but {} lowered units",
                    expected,
                    ctx.units.len()
                ),
                details: None,
            });
        }

        let unbacked: Vec<&str> = ctx
            .units
            .iter()
            .filter(|u| u.has_placeholder() && !u.is_blocked())
            .map(|u| u.label.as_str())
            .collect();
        if !unbacked.is_empty() {
            warn!("Placeholders without a blocking finding: {:?}", unbacked);
            return Ok(ValidationResult {
                stage: self.name().to_string(),
                passed: false,
                message: format!(
                    "placeholder without a blocking finding in {}",
                    unbacked.join(", ")
                ),
                details: Some(serde_json::json!({ "units": unbacked })),
            });
        }

        let placeholders = ctx.units.iter().filter(|u| u.has_placeholder()).count();
        Ok(ValidationResult {
            stage: self.name().to_string(),
            passed: true,
            message: format!("{} units, {} with placeholders", expected, placeholders),
            details: None,
        })
    }
}
