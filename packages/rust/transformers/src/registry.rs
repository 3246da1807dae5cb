//! Ordered, name-unique registry of transformers.

use tracing::{info, instrument};

use coursegraph_shared::{BlockKey, CourseGraphError, Result, UsageInfo, VideoUrlConfig};
use coursegraph_structure::{BlockStructure, FieldScope};

use crate::transformer::{
    BlockStructureTransformer, CollectContext, CollectReport, TransformReport,
};
use crate::video_urls::VideoBlockUrlTransformer;

/// Pseudo-field under which a transformer's collected version is checked.
const COLLECTED_VERSION_FIELD: &str = "collected_version";

/// Holds registered transformers in the order they run.
#[derive(Default)]
pub struct TransformerRegistry {
    transformers: Vec<Box<dyn BlockStructureTransformer>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all built-in transformers.
    pub fn with_builtins(video: &VideoUrlConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Box::new(VideoBlockUrlTransformer::new(video)?))?;
        Ok(registry)
    }

    /// Append a transformer. Names must be unique.
    pub fn register(&mut self, transformer: Box<dyn BlockStructureTransformer>) -> Result<()> {
        if self.transformers.iter().any(|t| t.name() == transformer.name()) {
            return Err(CourseGraphError::config(format!(
                "transformer '{}' registered twice",
                transformer.name()
            )));
        }
        self.transformers.push(transformer);
        Ok(())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    /// Run every transformer's `collect`, in order, recording its write
    /// version as the structure's collected version for it.
    #[instrument(skip_all, fields(transformers = self.transformers.len(), blocks = structure.len()))]
    pub async fn collect(
        &self,
        ctx: &CollectContext<'_>,
        structure: &mut BlockStructure,
    ) -> Result<Vec<CollectReport>> {
        let mut reports = Vec::with_capacity(self.transformers.len());
        for transformer in &self.transformers {
            let report = transformer.collect(ctx, structure).await?;
            structure.set_collected_version(transformer.name(), transformer.write_version());
            reports.push(report);
        }
        info!(reports = reports.len(), "collect phase complete");
        Ok(reports)
    }

    /// Run every transformer's `transform`, in order.
    ///
    /// Fails before touching anything if a transformer was never collected
    /// for this structure, or was collected by an incompatible version.
    #[instrument(skip_all, fields(transformers = self.transformers.len(), blocks = structure.len()))]
    pub fn transform(
        &self,
        usage: &UsageInfo,
        structure: &mut BlockStructure,
    ) -> Result<Vec<TransformReport>> {
        for transformer in &self.transformers {
            check_collected(transformer.as_ref(), structure)?;
        }

        let mut reports = Vec::with_capacity(self.transformers.len());
        for transformer in &self.transformers {
            reports.push(transformer.transform(usage, structure)?);
        }
        info!(reports = reports.len(), "transform phase complete");
        Ok(reports)
    }

    /// Every `(scope, field)` pair the registered transformers expose.
    pub fn output_fields(&self) -> Vec<(FieldScope<'static>, &'static str)> {
        self.transformers
            .iter()
            .flat_map(|t| t.output_fields().iter().map(move |f| (t.scope(), *f)))
            .collect()
    }

    /// Names of transformers whose collected data must be recomputed.
    pub fn outdated(&self, structure: &BlockStructure) -> Vec<&'static str> {
        self.transformers
            .iter()
            .filter(|t| structure.collected_version(t.name()) != Some(t.write_version()))
            .map(|t| t.name())
            .collect()
    }
}

fn check_collected(
    transformer: &dyn BlockStructureTransformer,
    structure: &BlockStructure,
) -> Result<()> {
    let block = structure
        .root()
        .cloned()
        .unwrap_or_else(|| BlockKey::new("structure", "root"));

    match structure.collected_version(transformer.name()) {
        None => Err(CourseGraphError::MissingBlockData {
            block,
            transformer: transformer.name().to_string(),
            field: COLLECTED_VERSION_FIELD.to_string(),
        }),
        Some(stored) if stored != transformer.read_version() => Err(CourseGraphError::StaleField {
            block,
            transformer: transformer.name().to_string(),
            field: COLLECTED_VERSION_FIELD.to_string(),
            stored,
            expected: transformer.read_version(),
        }),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use coursegraph_shared::{Block, CollectConfig, EncodedVideo, VideoBlock};
    use serde_json::json;

    use crate::source::AuthoredContentSource;

    /// Records the order it was called in and writes one structure-wide field.
    struct Recorder {
        name: &'static str,
        version: u32,
        log: &'static Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlockStructureTransformer for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }
        fn write_version(&self) -> u32 {
            self.version
        }
        fn read_version(&self) -> u32 {
            self.version
        }
        async fn collect(
            &self,
            _ctx: &CollectContext<'_>,
            structure: &mut BlockStructure,
        ) -> Result<CollectReport> {
            self.log.lock().unwrap().push(format!("collect:{}", self.name));
            structure.set_transformer_data(&self.scope(), "seen", json!(true));
            Ok(CollectReport::new(self.name))
        }
        fn transform(
            &self,
            _usage: &UsageInfo,
            structure: &mut BlockStructure,
        ) -> Result<TransformReport> {
            self.log.lock().unwrap().push(format!("transform:{}", self.name));
            assert!(structure.get_transformer_data(&self.scope(), "seen")?.is_some());
            Ok(TransformReport::new(self.name))
        }
    }

    fn course() -> BlockStructure {
        let root = BlockKey::new("course", "c");
        let mut s = BlockStructure::with_root(Block::container(root.clone(), None));
        let mut video = VideoBlock::default();
        video.encoded_videos.insert(
            "mp4".into(),
            EncodedVideo {
                url: "http://origin/a.mp4".into(),
                file_size: 1,
            },
        );
        let key = BlockKey::new("video", "a");
        s.add_block(Block::video(key.clone(), None, video)).unwrap();
        s.add_relation(&root, &key).unwrap();
        s
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut registry = TransformerRegistry::with_builtins(&VideoUrlConfig::default()).unwrap();
        let err = registry
            .register(Box::new(VideoBlockUrlTransformer::default()))
            .unwrap_err();
        assert!(err.to_string().contains("registered twice"));
        assert_eq!(registry.names(), vec!["video_url"]);
    }

    #[tokio::test]
    async fn runs_in_registration_order() {
        static LOG: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let mut registry = TransformerRegistry::new();
        registry
            .register(Box::new(Recorder { name: "first", version: 1, log: &LOG }))
            .unwrap();
        registry
            .register(Box::new(Recorder { name: "second", version: 1, log: &LOG }))
            .unwrap();

        let mut s = course();
        let source = AuthoredContentSource;
        let ctx = CollectContext::new(&source, CollectConfig::default());
        registry.collect(&ctx, &mut s).await.unwrap();
        registry.transform(&UsageInfo::default(), &mut s).unwrap();

        assert_eq!(
            *LOG.lock().unwrap(),
            vec![
                "collect:first",
                "collect:second",
                "transform:first",
                "transform:second"
            ]
        );
    }

    #[tokio::test]
    async fn collect_then_transform_end_to_end() {
        let registry = TransformerRegistry::with_builtins(&VideoUrlConfig::default()).unwrap();
        let mut s = course();
        assert_eq!(registry.outdated(&s), vec!["video_url"]);

        let source = AuthoredContentSource;
        let ctx = CollectContext::new(&source, CollectConfig::default());
        let collected = registry.collect(&ctx, &mut s).await.unwrap();
        assert_eq!(collected[0].collected, 1);
        assert!(registry.outdated(&s).is_empty());

        let reports = registry.transform(&UsageInfo::default(), &mut s).unwrap();
        assert_eq!(reports[0].rewritten, 1);

        let outputs = registry.output_fields();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].1, "student_view_data");
        assert_eq!(outputs[0].0.name, "video_url");
    }

    #[test]
    fn transform_without_collect_is_missing_data() {
        let registry = TransformerRegistry::with_builtins(&VideoUrlConfig::default()).unwrap();
        let mut s = course();
        let err = registry
            .transform(&UsageInfo::default(), &mut s)
            .unwrap_err();
        assert!(matches!(err, CourseGraphError::MissingBlockData { .. }));
    }

    #[test]
    fn transform_after_incompatible_collect_is_stale() {
        let registry = TransformerRegistry::with_builtins(&VideoUrlConfig::default()).unwrap();
        let mut s = course();
        s.set_collected_version("video_url", 7);
        let err = registry
            .transform(&UsageInfo::default(), &mut s)
            .unwrap_err();
        assert!(matches!(
            err,
            CourseGraphError::StaleField {
                stored: 7,
                expected: 1,
                ..
            }
        ));
        assert_eq!(registry.outdated(&s), vec!["video_url"]);
    }
}
