//! Application configuration for coursegraph.
//!
//! User config lives at `~/.coursegraph/coursegraph.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CourseGraphError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "coursegraph.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".coursegraph";

/// Key of the fallback entry in `[video.cdn_urls]`.
pub const DEFAULT_CDN_KEY: &str = "default";

/// CDN used when the config names none.
pub const DEFAULT_CDN_URL: &str = "https://edx-video.net";

// ---------------------------------------------------------------------------
// Config structs (matching coursegraph.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Video URL rewriting.
    #[serde(default)]
    pub video: VideoUrlConfig,

    /// Collect phase tuning.
    #[serde(default)]
    pub collect: CollectSettings,

    /// Where student view data comes from.
    #[serde(default)]
    pub source: SourceConfig,
}

/// `[video]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoUrlConfig {
    /// Formats whose URLs are never rewritten.
    #[serde(default = "default_format_exceptions")]
    pub format_exceptions: Vec<String>,

    /// CDN base URLs keyed by region code, with a `default` entry.
    #[serde(default = "default_cdn_urls")]
    pub cdn_urls: BTreeMap<String, String>,
}

impl Default for VideoUrlConfig {
    fn default() -> Self {
        Self {
            format_exceptions: default_format_exceptions(),
            cdn_urls: default_cdn_urls(),
        }
    }
}

fn default_format_exceptions() -> Vec<String> {
    vec!["youtube".into(), "fallback".into()]
}
fn default_cdn_urls() -> BTreeMap<String, String> {
    BTreeMap::from([(DEFAULT_CDN_KEY.to_string(), DEFAULT_CDN_URL.to_string())])
}

/// `[collect]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectSettings {
    /// Maximum concurrent student view data fetches.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Per-block fetch timeout in milliseconds.
    #[serde(default = "default_block_timeout")]
    pub block_timeout_ms: u64,
}

impl Default for CollectSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            block_timeout_ms: default_block_timeout(),
        }
    }
}

fn default_concurrency() -> u32 {
    4
}
fn default_block_timeout() -> u64 {
    10_000
}

/// Kind of student view data source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Derive data from the authored content in the course export.
    #[default]
    Authored,
    /// Fetch data from an HTTP endpoint.
    Http,
}

/// `[source]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,

    /// Base URL of the student view data service (http kind only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Collect config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime collect configuration.
#[derive(Debug, Clone)]
pub struct CollectConfig {
    /// Maximum concurrent fetches (at least 1).
    pub concurrency: usize,
    /// Per-block fetch timeout.
    pub block_timeout: Duration,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CollectConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            concurrency: config.collect.concurrency.max(1) as usize,
            block_timeout: Duration::from_millis(config.collect.block_timeout_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.coursegraph/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CourseGraphError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.coursegraph/coursegraph.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CourseGraphError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        CourseGraphError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CourseGraphError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CourseGraphError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CourseGraphError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Checks serde cannot express.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    for (region, url) in &config.video.cdn_urls {
        url::Url::parse(url).map_err(|e| {
            CourseGraphError::config(format!("invalid CDN url for '{region}': {url} ({e})"))
        })?;
    }

    if config.source.kind == SourceKind::Http && config.source.base_url.is_none() {
        return Err(CourseGraphError::config(
            "source.kind = \"http\" requires source.base_url",
        ));
    }

    Ok(())
}
