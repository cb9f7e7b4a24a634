//! Pipeline stage implementations.

mod analysis;
mod inference;
mod lowering;
mod report;

pub use analysis::AnalysisStage;
pub use inference::InferenceStage;
pub use lowering::LoweringStage;
pub use report::ReportStage;
