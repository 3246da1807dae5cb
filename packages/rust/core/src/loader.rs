//! Course export loading: JSON → `BlockStructure`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use coursegraph_shared::{
    Block, BlockKey, CONTAINER_BLOCK_TYPES, CourseGraphError, EncodedVideo, GenericBlock, Result,
    VIDEO_BLOCK_TYPE, VideoBlock,
};
use coursegraph_structure::BlockStructure;

/// Top-level shape of a course export file.
#[derive(Debug, Deserialize)]
struct CourseExport {
    root: BlockKey,
    blocks: Vec<ExportedBlock>,
}

#[derive(Debug, Deserialize)]
struct ExportedBlock {
    key: BlockKey,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    children: Vec<BlockKey>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

/// Authored fields of a `video` block.
#[derive(Debug, Deserialize)]
struct VideoFields {
    #[serde(default)]
    encoded_videos: BTreeMap<String, EncodedVideo>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    only_on_web: bool,
    #[serde(default)]
    transcripts: BTreeMap<String, String>,
}

/// A loaded course and the hash of the export it came from.
#[derive(Debug)]
pub struct LoadedCourse {
    pub structure: BlockStructure,
    /// Hex SHA-256 of the export bytes; ties a collect cache to its input.
    pub content_hash: String,
    /// Blocks dropped because nothing under the root reaches them.
    pub pruned: usize,
}

/// Read and parse a course export file.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_course(path: &Path) -> Result<LoadedCourse> {
    let bytes = std::fs::read(path).map_err(|e| CourseGraphError::io(path, e))?;
    parse_course(&bytes)
}

/// Parse course export bytes.
pub fn parse_course(bytes: &[u8]) -> Result<LoadedCourse> {
    let export: CourseExport = serde_json::from_slice(bytes)
        .map_err(|e| CourseGraphError::parse(format!("invalid course export: {e}")))?;

    let mut structure = BlockStructure::new();
    let mut edges = Vec::new();
    for exported in export.blocks {
        let key = exported.key.clone();
        edges.extend(exported.children.iter().map(|c| (key.clone(), c.clone())));
        structure.add_block(to_block(exported)?)?;
    }

    structure.set_root(&export.root)?;

    for (parent, child) in &edges {
        structure.add_relation(parent, child)?;
    }

    let pruned = structure.prune_unreachable();
    if pruned > 0 {
        warn!(pruned, "dropped blocks unreachable from the root");
    }

    let content_hash = compute_hash(bytes);
    info!(blocks = structure.len(), edges = edges.len(), "course loaded");
    Ok(LoadedCourse {
        structure,
        content_hash,
        pruned,
    })
}

fn to_block(exported: ExportedBlock) -> Result<Block> {
    let ExportedBlock {
        key,
        display_name,
        fields,
        ..
    } = exported;

    if key.is_type(VIDEO_BLOCK_TYPE) {
        let video: VideoFields = serde_json::from_value(Value::Object(fields))
            .map_err(|e| CourseGraphError::parse(format!("video block {key}: {e}")))?;
        debug!(block = %key, renditions = video.encoded_videos.len(), "video block");
        return Ok(Block::video(
            key,
            display_name,
            VideoBlock {
                encoded_videos: video.encoded_videos,
                duration: video.duration,
                only_on_web: video.only_on_web,
                transcripts: video.transcripts,
            },
        ));
    }

    if CONTAINER_BLOCK_TYPES.contains(&key.block_type.as_str()) {
        return Ok(Block::container(key, display_name));
    }

    Ok(Block::generic(key, display_name, GenericBlock { fields }))
}

/// Hex SHA-256 of the export bytes.
pub fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
