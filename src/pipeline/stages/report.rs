//! Report stage - orders and groups the findings of every pass.

use anyhow::Result;
use tracing::info;

use crate::pipeline::types::{PipelineContext, PipelineStage, ValidationResult};

/// Report stage - assembles the run's report
pub struct ReportStage;

impl PipelineStage for ReportStage {
    fn name(&self) -> &str {
        "Report"
    }

    fn execute(&self, mut ctx: PipelineContext) -> Result<PipelineContext> {
        let report = crate::report::assemble(
            &ctx.options.module_name,
            &ctx.findings,
            &ctx.units,
            ctx.options.strict,
        );
        info!(
            "Report for '{}': {} findings, status {}",
            report.module,
            report.findings.len(),
            report.status()
        );
        ctx.report = Some(report);

        Ok(ctx)
    }

    fn validate(&self, ctx: &PipelineContext) -> Result<ValidationResult> {
        let passed = ctx.report.is_some();
        Ok(ValidationResult {
            stage: self.name().to_string(),
            passed,
            message: match &ctx.report {
                Some(report) => format!("Status: {}", report.status()),
                None => "No report assembled".to_string(),
            },
            details: None,
        })
    }
}
