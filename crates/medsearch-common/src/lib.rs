//! medsearch-common — Shared types, errors, and source configuration used across all medsearch crates.

pub mod error;
pub mod models;
pub mod sandbox;
pub mod source_config;

// Re-export commonly used types
pub use error::{MedsearchError, Result};
pub use models::{DateRange, ResultRecord, StrategyKind};
pub use source_config::{SourceCatalog, SourceConfig};
