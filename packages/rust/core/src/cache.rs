//! On-disk cache of collected transformer fields.
//!
//! `collect` runs upstream and is expensive; `transform` runs per request.
//! The cache carries the field side-table between the two, pinned to the
//! exact course export it was collected from.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use coursegraph_shared::{BlockKey, CourseGraphError, Result};
use coursegraph_structure::FieldStore;

use crate::loader::LoadedCourse;

/// Bumped whenever the cache layout changes incompatibly.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Collected fields for one course export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectedCache {
    pub schema_version: u32,
    pub root: Option<BlockKey>,
    /// Hash of the export the fields were collected from.
    pub content_hash: String,
    pub collected_at: DateTime<Utc>,
    pub fields: FieldStore,
}

impl CollectedCache {
    /// Snapshot the fields of a collected course.
    pub fn from_course(course: &LoadedCourse) -> Self {
        Self {
            schema_version: CACHE_SCHEMA_VERSION,
            root: course.structure.root().cloned(),
            content_hash: course.content_hash.clone(),
            collected_at: Utc::now(),
            fields: course.structure.fields().clone(),
        }
    }

    /// Write as pretty JSON, creating parent directories.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CourseGraphError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            CourseGraphError::validation(format!("failed to serialize collect cache: {e}"))
        })?;
        std::fs::write(path, json).map_err(|e| CourseGraphError::io(path, e))?;
        info!(fields = self.fields.block_field_count(), "collect cache written");
        Ok(())
    }

    /// Read a cache file and check its schema version.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CourseGraphError::io(path, e))?;
        let cache: Self = serde_json::from_str(&content)
            .map_err(|e| CourseGraphError::parse(format!("invalid collect cache: {e}")))?;

        if cache.schema_version != CACHE_SCHEMA_VERSION {
            return Err(CourseGraphError::validation(format!(
                "collect cache schema {} is not supported (expected {CACHE_SCHEMA_VERSION}); recollect",
                cache.schema_version
            )));
        }
        debug!(collected_at = %cache.collected_at, "collect cache loaded");
        Ok(cache)
    }

    /// Install the cached fields into a freshly loaded course.
    ///
    /// The course must be the very export the cache was collected from.
    pub fn apply(self, course: &mut LoadedCourse) -> Result<()> {
        if self.content_hash != course.content_hash {
            return Err(CourseGraphError::validation(format!(
                "collect cache was built from a different export ({} != {}); recollect",
                short(&self.content_hash),
                short(&course.content_hash)
            )));
        }
        if self.root.as_ref() != course.structure.root() {
            return Err(CourseGraphError::validation(
                "collect cache root does not match the course root; recollect",
            ));
        }
        course.structure.install_fields(self.fields);
        Ok(())
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_course;
    use coursegraph_structure::FieldScope;
    use serde_json::json;
    use uuid::Uuid;

    fn fixture() -> Vec<u8> {
        std::fs::read("../../../fixtures/json/course.fixture.json").expect("read course fixture")
    }

    fn tmp_path() -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("coursegraph-cache-test-{}", Uuid::now_v7()))
            .join("collected.json")
    }

    #[test]
    fn save_load_apply() {
        let bytes = fixture();
        let mut course = parse_course(&bytes).unwrap();
        let scope = FieldScope::new("video_url", 1, 1);
        let key = BlockKey::new("video", "intro");
        course
            .structure
            .set_transformer_block_field(&key, &scope, "student_view_data", json!({"x": 1}))
            .unwrap();
        course.structure.set_collected_version("video_url", 1);

        let path = tmp_path();
        CollectedCache::from_course(&course).save(&path).unwrap();

        let mut fresh = parse_course(&bytes).unwrap();
        CollectedCache::load(&path).unwrap().apply(&mut fresh).unwrap();
        assert_eq!(
            fresh
                .structure
                .get_transformer_block_field(&key, &scope, "student_view_data")
                .unwrap(),
            &json!({"x": 1})
        );
        assert_eq!(fresh.structure.collected_version("video_url"), Some(1));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn different_export_rejected() {
        let bytes = fixture();
        let course = parse_course(&bytes).unwrap();
        let cache = CollectedCache::from_course(&course);

        let mut edited = bytes.clone();
        edited.extend_from_slice(b"\n");
        let mut other = parse_course(&edited).unwrap();
        let err = cache.apply(&mut other).unwrap_err();
        assert!(err.to_string().contains("recollect"));
    }

    #[test]
    fn unsupported_schema_rejected() {
        let course = parse_course(&fixture()).unwrap();
        let mut cache = CollectedCache::from_course(&course);
        cache.schema_version = CACHE_SCHEMA_VERSION + 1;

        let path = tmp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_string(&cache).unwrap()).unwrap();
        let err = CollectedCache::load(&path).unwrap_err();
        assert!(matches!(err, CourseGraphError::Validation { .. }));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = CollectedCache::load(Path::new("/nonexistent/coursegraph/cache.json")).unwrap_err();
        assert!(matches!(err, CourseGraphError::Io { .. }));
    }
}
