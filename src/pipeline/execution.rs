//! Pipeline execution engine.

use anyhow::{Context as AnyhowContext, Result};
use tracing::{debug, info};

use super::stages::{AnalysisStage, InferenceStage, LoweringStage, ReportStage};
use super::types::{PipelineContext, PipelineOutput, PipelineStage, ValidationStrategy};
use crate::ast::Module;
use crate::config::TranspileOptions;

/// Main transpilation pipeline
pub struct TranspilationPipeline {
    pub(crate) stages: Vec<Box<dyn PipelineStage>>,
    pub(crate) validation: ValidationStrategy,
}

impl TranspilationPipeline {
    pub fn new(validation: ValidationStrategy) -> Self {
        Self {
            stages: Vec::new(),
            validation,
        }
    }

    /// Analysis, inference, lowering and report, in that order
    pub fn standard(validation: ValidationStrategy) -> Self {
        Self::new(validation)
            .add_stage(Box::new(AnalysisStage))
            .add_stage(Box::new(InferenceStage))
            .add_stage(Box::new(LoweringStage))
            .add_stage(Box::new(ReportStage))
    }

    /// Findings only, no generated code
    pub fn analysis_only(validation: ValidationStrategy) -> Self {
        Self::new(validation)
            .add_stage(Box::new(AnalysisStage))
            .add_stage(Box::new(InferenceStage))
            .add_stage(Box::new(ReportStage))
    }

    /// Add a stage to the pipeline
    pub fn add_stage(mut self, stage: Box<dyn PipelineStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run the complete pipeline
    pub fn run(&self, module: Module, options: TranspileOptions) -> Result<PipelineOutput> {
        options.validate()?;
        info!(
            "Starting pipeline with {} stages for '{}'",
            self.stages.len(),
            options.module_name
        );

        let mut ctx = PipelineContext::new(module, options);

        for (idx, stage) in self.stages.iter().enumerate() {
            info!(
                "Running stage {}/{}: {}",
                idx + 1,
                self.stages.len(),
                stage.name()
            );

            // Execute stage
            ctx = stage
                .execute(ctx)
                .with_context(|| format!("Stage '{}' failed", stage.name()))?;

            // Validate if strategy requires it
            if self.validation != ValidationStrategy::None {
                debug!("Validating stage: {}", stage.name());
                let validation_result = stage.validate(&ctx)?;
                ctx.validation_results.push(validation_result.clone());

                if !validation_result.passed && self.validation == ValidationStrategy::StopOnError {
                    anyhow::bail!(
                        "Validation failed for stage '{}': {}",
                        stage.name(),
                        validation_result.message
                    );
                }
            }
        }

        info!("Pipeline completed successfully");
        ctx.output()
    }
}
