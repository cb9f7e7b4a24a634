//! Python to Rust transpiler core.
//!
//! A module goes through four passes: the compatibility [`analyzer`] flags constructs with no
//! direct Rust equivalent, [`inference`] assigns types and ownership hints, [`codegen`] lowers
//! each declaration to Rust text, and [`report`] orders and groups the findings. The
//! [`pipeline`] runs them in that order.

pub mod analyzer;
pub mod ast;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod frontend;
pub mod inference;
pub mod mappings;
pub mod pipeline;
pub mod report;
pub mod types;

// Re-export key types for convenience
pub use ast::{Decl, Location, Module};
pub use codegen::LoweredUnit;
pub use config::{OptionOverrides, TranspileConfig, TranspileOptions};
pub use diagnostics::{ConstructKind, Finding, Severity};
pub use error::TranspileError;
pub use pipeline::{
    analyze_source, transpile_source, AnalysisStage, InferenceStage, LoweringStage,
    PipelineOutput, PipelineStage, ReportStage, TranspilationPipeline, ValidationStrategy,
};
pub use report::{Report, ReportFormat, RunStatus};
pub use types::Type;
