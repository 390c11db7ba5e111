//! Deterministic formula analysis for modeldoc.
//!
//! Everything here is pure and synchronous: no I/O, no external calls, and
//! every entry point accepts arbitrary text without panicking.
//! - [`lint`]: six independent anti-pattern rules producing [`Finding`]s
//! - [`describe`]: kind, window, purpose, risks and dependencies of a measure

pub mod describe;
pub mod lint;
pub mod scan;

pub use describe::{
    MeasureDescription, MeasureKind, classify, describe, extract_dependencies, extract_window,
    infer_format_string,
};
pub use lint::{Finding, RULES, Rule, Severity, lint};
pub use scan::{Scanned, scan};
