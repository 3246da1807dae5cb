//! Video URL transformer.
//!
//! Collects each video block's student view data and, at transform time,
//! rewrites its encoded video URLs to be served from the configured CDN.
//! Formats in the exemption table (by default `youtube` and `fallback`) are
//! left alone: YouTube URLs are not ours to rewrite, and fallback URLs come
//! from authored sources that may live on any CDN.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use coursegraph_shared::config::DEFAULT_CDN_KEY;
use coursegraph_shared::{
    BlockKey, CourseGraphError, Result, UsageInfo, VIDEO_BLOCK_TYPE, VideoUrlConfig,
};
use coursegraph_structure::{BlockStructure, MatchRule};

use crate::collect::fetch_student_views;
use crate::rewrite::{FormatExemptions, RewriteRule};
use crate::transformer::{
    BlockFailure, BlockStructureTransformer, CollectContext, CollectReport, TransformReport,
};

/// Rewrites video rendition URLs onto a CDN.
#[derive(Debug, Clone)]
pub struct VideoBlockUrlTransformer {
    default_rule: RewriteRule,
    /// Per-region overrides of `default_rule`.
    regional: BTreeMap<String, RewriteRule>,
    exemptions: FormatExemptions,
}

impl VideoBlockUrlTransformer {
    pub const NAME: &'static str = "video_url";
    pub const WRITE_VERSION: u32 = 1;
    pub const READ_VERSION: u32 = 1;
    /// Field holding the collected student view data.
    pub const STUDENT_VIEW_DATA: &'static str = "student_view_data";
    /// Key of the renditions mapping inside the student view data.
    pub const ENCODED_VIDEOS: &'static str = "encoded_videos";
    const OUTPUT_FIELDS: &'static [&'static str] = &[Self::STUDENT_VIEW_DATA];

    /// Build from config, validating every CDN base up front.
    pub fn new(config: &VideoUrlConfig) -> Result<Self> {
        let mut default_rule = RewriteRule::default();
        let mut regional = BTreeMap::new();
        for (region, base) in &config.cdn_urls {
            let rule = RewriteRule::new(base)?;
            if region == DEFAULT_CDN_KEY {
                default_rule = rule;
            } else {
                regional.insert(region.clone(), rule);
            }
        }

        Ok(Self {
            default_rule,
            regional,
            exemptions: config.format_exceptions.iter().cloned().collect(),
        })
    }

    /// The traversal filter shared by both phases.
    pub fn match_rule() -> MatchRule {
        MatchRule::block_type(VIDEO_BLOCK_TYPE)
    }

    pub fn exemptions(&self) -> &FormatExemptions {
        &self.exemptions
    }

    /// Rule for the requesting region, falling back to `default`.
    pub fn rule_for(&self, region: Option<&str>) -> &RewriteRule {
        region
            .and_then(|r| self.regional.get(r))
            .unwrap_or(&self.default_rule)
    }

    /// Rewrite one block's renditions in place.
    ///
    /// The whole mapping is validated before anything is changed, so a
    /// malformed block is never left half rewritten.
    fn rewrite_block(
        &self,
        key: &BlockKey,
        data: &mut Value,
        rule: &RewriteRule,
        report: &mut TransformReport,
    ) -> Result<()> {
        let encoded = data
            .get_mut(Self::ENCODED_VIDEOS)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                CourseGraphError::malformed(
                    key,
                    Self::STUDENT_VIEW_DATA,
                    format!("missing '{}' mapping", Self::ENCODED_VIDEOS),
                )
            })?;

        validate_renditions(key, encoded, &self.exemptions)?;

        for (format, video) in encoded.iter_mut() {
            if self.exemptions.contains(format) {
                report.unchanged += 1;
                continue;
            }

            let Some(slot) = video.get_mut("url") else {
                continue;
            };
            let Some(current) = slot.as_str() else {
                // null url: nothing to rewrite
                report.skipped += 1;
                continue;
            };

            match rule.rewrite(current) {
                Some(rewritten) if rewritten == current => report.unchanged += 1,
                Some(rewritten) => {
                    debug!(block = %key, format = %format, url = %rewritten, "rewrote video url");
                    *slot = Value::String(rewritten);
                    report.rewritten += 1;
                }
                None => {
                    warn!(block = %key, format = %format, url = current, "could not rewrite video url");
                    report.skipped += 1;
                }
            }
        }

        Ok(())
    }
}

/// Every non-exempt rendition must be an object with a string or null `url`.
fn validate_renditions(
    key: &BlockKey,
    encoded: &Map<String, Value>,
    exemptions: &FormatExemptions,
) -> Result<()> {
    for (format, video) in encoded {
        if exemptions.contains(format) {
            continue;
        }
        let field = VideoBlockUrlTransformer::STUDENT_VIEW_DATA;
        let Some(obj) = video.as_object() else {
            return Err(CourseGraphError::malformed(
                key,
                field,
                format!("rendition '{format}' is not an object"),
            ));
        };
        match obj.get("url") {
            Some(Value::String(_)) | Some(Value::Null) => {}
            Some(_) => {
                return Err(CourseGraphError::malformed(
                    key,
                    field,
                    format!("rendition '{format}' has a non-string url"),
                ));
            }
            None => {
                return Err(CourseGraphError::malformed(
                    key,
                    field,
                    format!("rendition '{format}' has no url"),
                ));
            }
        }
    }
    Ok(())
}

impl Default for VideoBlockUrlTransformer {
    fn default() -> Self {
        Self {
            default_rule: RewriteRule::default(),
            regional: BTreeMap::new(),
            exemptions: FormatExemptions::default(),
        }
    }
}

#[async_trait]
impl BlockStructureTransformer for VideoBlockUrlTransformer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn write_version(&self) -> u32 {
        Self::WRITE_VERSION
    }

    fn read_version(&self) -> u32 {
        Self::READ_VERSION
    }

    fn output_fields(&self) -> &'static [&'static str] {
        Self::OUTPUT_FIELDS
    }

    #[instrument(skip_all, fields(transformer = Self::NAME))]
    async fn collect(
        &self,
        ctx: &CollectContext<'_>,
        structure: &mut BlockStructure,
    ) -> Result<CollectReport> {
        let scope = self.scope();
        let keys = structure.topological_traversal(&Self::match_rule(), true);
        let total = keys.len();
        let results = fetch_student_views(ctx, structure, &keys).await?;

        let mut report = CollectReport::new(Self::NAME);
        for (i, (key, result)) in results.into_iter().enumerate() {
            match result {
                Ok(data) => {
                    structure.set_transformer_block_field(
                        &key,
                        &scope,
                        Self::STUDENT_VIEW_DATA,
                        data,
                    )?;
                    report.collected += 1;
                    ctx.progress.block_collected(&key, true, i + 1, total);
                }
                Err(e) if e.is_block_local() => {
                    warn!(block = %key, error = %e, "student view data unavailable");
                    ctx.progress.block_collected(&key, false, i + 1, total);
                    report.failures.push(BlockFailure {
                        block: key,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            collected = report.collected,
            failed = report.failures.len(),
            "video data collected"
        );
        Ok(report)
    }

    #[instrument(skip_all, fields(transformer = Self::NAME))]
    fn transform(
        &self,
        usage: &UsageInfo,
        structure: &mut BlockStructure,
    ) -> Result<TransformReport> {
        let scope = self.scope();
        let rule = self.rule_for(usage.region.as_deref());
        let mut report = TransformReport::new(Self::NAME);

        for key in structure.topological_traversal(&Self::match_rule(), true) {
            let data = match structure.get_transformer_block_field_mut(
                &key,
                &scope,
                Self::STUDENT_VIEW_DATA,
            ) {
                Ok(data) => data,
                Err(e) if e.is_block_local() => {
                    warn!(block = %key, error = %e, "no collected video data, leaving block as is");
                    report.missing.push(key);
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.rewrite_block(&key, data, rule, &mut report)?;
            report.blocks += 1;
        }

        info!(
            blocks = report.blocks,
            rewritten = report.rewritten,
            unchanged = report.unchanged,
            skipped = report.skipped,
            missing = report.missing.len(),
            cdn = rule.cdn_base(),
            "video urls transformed"
        );
        Ok(report)
    }
}
