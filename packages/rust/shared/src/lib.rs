//! Shared types, error model, and configuration for domainscout.
//!
//! This crate is the foundation depended on by all other domainscout crates.
//! It provides:
//! - [`DomainScoutError`], the unified error type
//! - The data model ([`ContentBlock`], [`DomainCandidate`], [`SimilarityPair`],
//!   [`Domain`], [`ReviewItem`], ...)
//! - Configuration ([`AppConfig`], [`ThresholdTable`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BlockingConfig, EmbeddingConfig, EmbeddingProvider, ModeThresholds, NamingConfig,
    StorageConfig, ThresholdTable, ThresholdsConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, validate_api_key,
};
pub use error::{DomainScoutError, Result};
pub use types::{
    AliasInfo, BlockType, ContentBlock, Domain, DomainCandidate, EmbeddingMode, PreferredLanguage,
    ReviewItem, ReviewStatus, SimilarityPair, SourceDocument, TokenizationMode,
};
