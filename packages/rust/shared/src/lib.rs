//! Shared types, error model, and configuration for Roadmend.
//!
//! This crate is the foundation depended on by all other Roadmend crates.
//! It provides:
//! - [`RoadmendError`]: the unified error type
//! - Domain types ([`RoadmapDocument`], [`LinkOccurrence`], [`InvalidLinkRecord`])
//! - Configuration ([`AppConfig`], [`CheckConfig`], [`ReplacementConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CheckConfig, CheckerConfig, DatabaseConfig, LockBackend, LockConfig,
    LoggingConfig, OpenRouterConfig, ReplacementConfig, ReplacementSection, api_key, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from,
};
pub use error::{Result, RoadmendError};
pub use types::{
    InvalidLinkRecord, LinkOccurrence, NOW_VALID, RoadmapDocument, RoadmapRow, Stage, Step,
};
