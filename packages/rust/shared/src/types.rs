//! Core domain types for course content blocks.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CourseGraphError;

/// Block types treated as pure containers (no student view data of their own).
pub const CONTAINER_BLOCK_TYPES: &[&str] = &["course", "chapter", "sequential", "vertical"];

/// Block type of video blocks.
pub const VIDEO_BLOCK_TYPE: &str = "video";

// ---------------------------------------------------------------------------
// BlockKey
// ---------------------------------------------------------------------------

/// Stable identity of a block: `(block_type, block_id)`.
///
/// Displays as `video@intro`. Parsing also accepts the usage-key form
/// `block-v1:edX+Demo+2024+type@video+block@intro`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    pub block_type: String,
    pub block_id: String,
}

impl BlockKey {
    pub fn new(block_type: impl Into<String>, block_id: impl Into<String>) -> Self {
        Self {
            block_type: block_type.into(),
            block_id: block_id.into(),
        }
    }

    /// Whether this key names a block of the given type.
    pub fn is_type(&self, block_type: &str) -> bool {
        self.block_type == block_type
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.block_type, self.block_id)
    }
}

impl FromStr for BlockKey {
    type Err = CourseGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("block-v1:") {
            return parse_usage_key(rest)
                .ok_or_else(|| CourseGraphError::parse(format!("invalid usage key '{s}'")));
        }

        match s.split_once('@') {
            Some((block_type, block_id)) if !block_type.is_empty() && !block_id.is_empty() => {
                Ok(Self::new(block_type, block_id))
            }
            _ => Err(CourseGraphError::parse(format!(
                "invalid block key '{s}': expected <type>@<id>"
            ))),
        }
    }
}

/// Parse the `+`-separated tail of a `block-v1:` usage key.
fn parse_usage_key(rest: &str) -> Option<BlockKey> {
    let mut block_type = None;
    let mut block_id = None;
    for part in rest.split('+') {
        if let Some(t) = part.strip_prefix("type@") {
            block_type = Some(t);
        } else if let Some(id) = part.strip_prefix("block@") {
            block_id = Some(id);
        }
    }
    match (block_type, block_id) {
        (Some(t), Some(id)) if !t.is_empty() && !id.is_empty() => Some(BlockKey::new(t, id)),
        _ => None,
    }
}

impl Serialize for BlockKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlockKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Block content
// ---------------------------------------------------------------------------

/// One encoded variant of a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedVideo {
    pub url: String,
    #[serde(default)]
    pub file_size: u64,
}

/// A block that only groups other blocks (course, chapter, sequential, vertical).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerBlock;

/// A video block and its authored renditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoBlock {
    /// Renditions keyed by format name (`mp4`, `hls`, `youtube`, ...).
    pub encoded_videos: BTreeMap<String, EncodedVideo>,
    /// Duration in seconds, when known.
    pub duration: Option<f64>,
    /// Whether the video may only be played in a browser.
    pub only_on_web: bool,
    /// Transcript URLs keyed by language code.
    pub transcripts: BTreeMap<String, String>,
}

impl VideoBlock {
    /// Typed accessor for the renditions mapping.
    pub fn renditions(&self) -> &BTreeMap<String, EncodedVideo> {
        &self.encoded_videos
    }

    /// Student-facing view of this video, as served to mobile clients.
    pub fn student_view_data(&self) -> serde_json::Value {
        serde_json::json!({
            "only_on_web": self.only_on_web,
            "duration": self.duration,
            "transcripts": self.transcripts,
            "encoded_videos": self.encoded_videos,
        })
    }
}

/// Any other block type; authored fields are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenericBlock {
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Capability-typed block content.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockContent {
    Container(ContainerBlock),
    Video(VideoBlock),
    Generic(GenericBlock),
}

impl BlockContent {
    pub fn as_video(&self) -> Option<&VideoBlock> {
        match self {
            Self::Video(video) => Some(video),
            _ => None,
        }
    }
}

/// A node in the course content DAG.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub key: BlockKey,
    pub display_name: Option<String>,
    pub content: BlockContent,
}

impl Block {
    pub fn container(key: BlockKey, display_name: Option<String>) -> Self {
        Self {
            key,
            display_name,
            content: BlockContent::Container(ContainerBlock),
        }
    }

    pub fn video(key: BlockKey, display_name: Option<String>, video: VideoBlock) -> Self {
        Self {
            key,
            display_name,
            content: BlockContent::Video(video),
        }
    }

    pub fn generic(key: BlockKey, display_name: Option<String>, block: GenericBlock) -> Self {
        Self {
            key,
            display_name,
            content: BlockContent::Generic(block),
        }
    }

    pub fn block_type(&self) -> &str {
        &self.key.block_type
    }
}

// ---------------------------------------------------------------------------
// UsageInfo
// ---------------------------------------------------------------------------

/// Per-request context handed to `transform`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageInfo {
    /// Requesting user, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Region code used to pick a CDN (e.g. `CN`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}
