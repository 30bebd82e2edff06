//! Shared types, error model, and configuration for edastream.
//!
//! This crate is the foundation depended on by all other edastream crates.
//! It provides:
//! - [`EdaError`]: the unified error type
//! - Wire types ([`BlockUpdate`], [`BlockStatus`], [`GenerateEdaRequest`], [`DatasetSummary`])
//! - Report-history records ([`CsvRecord`], [`CommentRecord`], [`CommentAsset`])
//! - Configuration ([`AppConfig`], [`ClientConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ClientConfig, DefaultsConfig, ServerConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{EdaError, Result};
pub use types::{
    BlockStatus, BlockUpdate, ColumnInfo, CommentAsset, CommentRecord, CsvRecord, DatasetSummary,
    GenerateEdaRequest, PlotListing, SessionId,
};
