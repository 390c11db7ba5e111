//! Core pipeline orchestration and report assembly for modeldoc.
//!
//! This crate ties the normalized model, the deterministic heuristics and the
//! text-generation stages together into one end-to-end run (`run_pipeline`),
//! repairs the drafted report into its guaranteed shape, and writes it out.

pub mod assembler;
pub mod coerce;
pub mod context;
pub mod domain;
pub mod json;
pub mod parse;
pub mod pipeline;
pub mod report;
pub mod stages;

#[cfg(test)]
pub(crate) mod testing;

pub use assembler::{METADATA_FILE, REPORT_FILE, WrittenOutput, validate_output, write_output};
pub use coerce::{coerce, coerce_text};
pub use context::PipelineContext;
pub use pipeline::{PipelineInput, PipelineOutput, ProgressReporter, SilentProgress, run_pipeline};
pub use report::FinalReport;
pub use stages::{StageResult, StageState};
