//! Shared types, error model, and configuration for modeldoc.
//!
//! This crate is the foundation depended on by all other modeldoc crates.
//! It provides:
//! - [`ModelDocError`]: the unified error type
//! - Model entities ([`Measure`], [`Table`], [`Column`], [`Relationship`], [`ModelData`])
//! - Stage identifiers and the [`ReportMetadata`] record
//! - Configuration ([`AppConfig`], [`PipelineSettings`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConfidenceCeilings, DefaultsConfig, LlmConfig, PipelineConfig, PipelineSettings,
    api_key, config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_api_key,
};
pub use error::{ModelDocError, Result};
pub use types::{
    ArtifactChecksum, CURRENT_SCHEMA_VERSION, Cardinality, Column, Direction, EntityCounts,
    Measure, ModelData, Relationship, ReportMetadata, RunId, StageId, StageSummary, Table,
    TableRole,
};
