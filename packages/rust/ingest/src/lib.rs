//! Model export ingest for modeldoc.
//!
//! Turns loosely-shaped CSV exports into the canonical [`ModelData`] and
//! checks it for structural problems.
//! - [`loader`]: input discovery, CSV reading, fingerprinting
//! - [`normalize`]: raw rows → entities, with skip accounting
//! - [`integrity`]: reference, uniqueness and cardinality checks
//!
//! [`ModelData`]: modeldoc_shared::ModelData

pub mod fields;
pub mod integrity;
pub mod loader;
pub mod normalize;
pub mod relationship;

pub use fields::{RawRow, clean_value};
pub use integrity::{IntegrityIssue, IntegrityReport, IntegritySummary, IssueKind, check};
pub use loader::{InputFiles, InputKind, LoadedModel, discover_inputs, load_model, parse_csv};
pub use normalize::{EntityStats, IngestStats, Normalized, RawModel, normalize};
