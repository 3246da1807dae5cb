//! Shared types, error model, and configuration for coursegraph.
//!
//! This crate is the foundation depended on by all other coursegraph crates.
//! It provides:
//! - [`CourseGraphError`]: the unified error type
//! - Domain types ([`BlockKey`], [`Block`], [`VideoBlock`], [`UsageInfo`])
//! - Configuration ([`AppConfig`], [`CollectConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CollectConfig, CollectSettings, DEFAULT_CDN_URL, SourceConfig, SourceKind,
    VideoUrlConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_config,
};
pub use error::{CourseGraphError, Result};
pub use types::{
    Block, BlockContent, BlockKey, CONTAINER_BLOCK_TYPES, ContainerBlock, EncodedVideo,
    GenericBlock, UsageInfo, VIDEO_BLOCK_TYPE, VideoBlock,
};
