//! Stage-based transpilation pipeline with stop-on-error validation.
//!
//! The pipeline turns one parsed module into Rust text and a report:
//! 1. Analysis - Flags constructs with no direct Rust equivalent
//! 2. Inference - Assigns types and ownership hints
//! 3. Lowering - Emits one unit of Rust per declaration (needs Inference)
//! 4. Report - Orders and groups every finding
//!
//! Every run is independent: several modules may run in parallel, each with its own context.

mod execution;
mod stages;
#[cfg(test)]
mod tests;
mod types;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::ast::Module;
use crate::config::TranspileOptions;
use crate::error::TranspileError;

// Re-export all public types from types module
pub use types::{PipelineContext, PipelineOutput, PipelineStage, ValidationResult, ValidationStrategy};

// Re-export execution pipeline
pub use execution::TranspilationPipeline;

// Re-export all stage implementations
pub use stages::{AnalysisStage, InferenceStage, LoweringStage, ReportStage};

/// Parse `source` and run the standard pipeline on it
pub fn transpile_source(source: &str, path: &str, options: TranspileOptions) -> Result<PipelineOutput> {
    options.validate()?;
    let module = crate::frontend::parse_source(source, path)?;
    TranspilationPipeline::standard(ValidationStrategy::StopOnError).run(module, options)
}

/// Parse `source` and report findings without generating code
pub fn analyze_source(source: &str, path: &str, options: TranspileOptions) -> Result<PipelineOutput> {
    options.validate()?;
    let module = crate::frontend::parse_source(source, path)?;
    TranspilationPipeline::analysis_only(ValidationStrategy::StopOnError).run(module, options)
}

/// Read a module from disk: Python source, or a JSON syntax tree when `tree_json` is set
pub fn load_module(path: &Path, tree_json: bool) -> Result<Module> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let module = if tree_json {
        Module::from_json(&text)?
    } else {
        crate::frontend::parse_source(&text, &path.to_string_lossy())?
    };
    debug!("Loaded {} ({} declarations)", path.display(), module.body.len());
    Ok(module)
}

/// Write `content` to a sibling temp file, then rename it over `path`
pub fn write_atomic(path: &Path, content: &str) -> crate::error::Result<()> {
    let io_error = |source: std::io::Error| TranspileError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file_name = path
        .file_name()
        .ok_or_else(|| TranspileError::Configuration(format!("{} names no file", path.display())))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let temp_path = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));

    if let Err(e) = std::fs::write(&temp_path, content.as_bytes()) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_error(e));
    }
    std::fs::rename(&temp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        io_error(e)
    })
}
