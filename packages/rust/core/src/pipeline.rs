//! End-to-end course pipelines: export → collect → transform → render.
//!
//! `run_course` does everything in one pass. `collect_course` and
//! `transform_course` split the work the way it runs in production: collect
//! once upstream into a cache, transform per request from that cache.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use url::Url;
use uuid::Uuid;

use coursegraph_shared::{
    AppConfig, BlockKey, CollectConfig, CourseGraphError, Result, SourceConfig, SourceKind,
    UsageInfo,
};
use coursegraph_transformers::{
    AuthoredContentSource, CollectContext, CollectProgress, CollectReport, HttpStudentViewSource,
    StudentViewSource, TransformReport, TransformerRegistry,
};

use crate::cache::CollectedCache;
use crate::loader::{self, LoadedCourse};
use crate::render::{self, RenderedCourse, RequestedField};

/// Configuration shared by the course pipelines.
#[derive(Debug, Clone)]
pub struct CourseRunConfig {
    /// Course export to load.
    pub course: PathBuf,
    /// Resolved application config (CLI overrides already applied).
    pub app: AppConfig,
    /// Cancels an in-flight collect.
    pub cancel: CancellationToken,
}

impl CourseRunConfig {
    pub fn new(course: impl Into<PathBuf>, app: AppConfig) -> Self {
        Self {
            course: course.into(),
            app,
            cancel: CancellationToken::new(),
        }
    }
}

/// Summary handed to [`ProgressReporter::done`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub blocks: usize,
    pub collected: usize,
    pub collect_failures: usize,
    pub rewritten: usize,
    pub missing: usize,
    pub elapsed: Duration,
}

/// Result of `run_course` / `transform_course`.
#[derive(Debug)]
pub struct CourseRunResult {
    pub summary: RunSummary,
    pub collect_reports: Vec<CollectReport>,
    pub transform_reports: Vec<TransformReport>,
    pub rendered: RenderedCourse,
}

/// Result of `collect_course`.
#[derive(Debug)]
pub struct CollectOutcome {
    pub summary: RunSummary,
    pub reports: Vec<CollectReport>,
    pub cache_path: PathBuf,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called for every block once its student view data fetch resolved.
    fn block_collected(&self, block: &BlockKey, ok: bool, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn block_collected(&self, _block: &BlockKey, _ok: bool, _current: usize, _total: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

/// Load, collect, transform and render a course in one pass.
#[instrument(skip_all, fields(run_id = tracing::field::Empty, course = %config.course.display()))]
pub async fn run_course(
    config: &CourseRunConfig,
    usage: &UsageInfo,
    progress: &dyn ProgressReporter,
) -> Result<CourseRunResult> {
    let start = Instant::now();
    let run_id = start_run();

    progress.phase("Loading course");
    let mut course = loader::load_course(&config.course)?;
    let registry = TransformerRegistry::with_builtins(&config.app.video)?;

    let collect_reports = collect_phase(config, &registry, &mut course, progress).await?;
    let transform_reports = transform_phase(&registry, usage, &mut course, progress)?;

    progress.phase("Rendering");
    let rendered = render_phase(&registry, &course);

    let summary = summarize(run_id, &course, &collect_reports, &transform_reports, start);
    progress.done(&summary);
    log_summary("run", &summary);

    Ok(CourseRunResult {
        summary,
        collect_reports,
        transform_reports,
        rendered,
    })
}

/// Load and collect a course, then write the collected fields to `cache_path`.
#[instrument(skip_all, fields(run_id = tracing::field::Empty, course = %config.course.display()))]
pub async fn collect_course(
    config: &CourseRunConfig,
    cache_path: &Path,
    progress: &dyn ProgressReporter,
) -> Result<CollectOutcome> {
    let start = Instant::now();
    let run_id = start_run();

    progress.phase("Loading course");
    let mut course = loader::load_course(&config.course)?;
    let registry = TransformerRegistry::with_builtins(&config.app.video)?;

    let reports = collect_phase(config, &registry, &mut course, progress).await?;

    progress.phase("Writing collect cache");
    CollectedCache::from_course(&course).save(cache_path)?;

    let summary = summarize(run_id, &course, &reports, &[], start);
    progress.done(&summary);
    log_summary("collect", &summary);

    Ok(CollectOutcome {
        summary,
        reports,
        cache_path: cache_path.to_path_buf(),
    })
}

/// Load a course, install fields from a collect cache, then transform and render.
#[instrument(skip_all, fields(run_id = tracing::field::Empty, course = %config.course.display()))]
pub fn transform_course(
    config: &CourseRunConfig,
    cache_path: &Path,
    usage: &UsageInfo,
    progress: &dyn ProgressReporter,
) -> Result<CourseRunResult> {
    let start = Instant::now();
    let run_id = start_run();

    progress.phase("Loading course");
    let mut course = loader::load_course(&config.course)?;
    let registry = TransformerRegistry::with_builtins(&config.app.video)?;

    progress.phase("Reading collect cache");
    CollectedCache::load(cache_path)?.apply(&mut course)?;

    let transform_reports = transform_phase(&registry, usage, &mut course, progress)?;

    progress.phase("Rendering");
    let rendered = render_phase(&registry, &course);

    let summary = summarize(run_id, &course, &[], &transform_reports, start);
    progress.done(&summary);
    log_summary("transform", &summary);

    Ok(CourseRunResult {
        summary,
        collect_reports: Vec::new(),
        transform_reports,
        rendered,
    })
}

/// Build the student view data source named by the config.
pub fn build_source(
    source: &SourceConfig,
    collect: &CollectConfig,
) -> Result<Box<dyn StudentViewSource>> {
    match source.kind {
        SourceKind::Authored => Ok(Box::new(AuthoredContentSource)),
        SourceKind::Http => {
            let raw = source
                .base_url
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| CourseGraphError::config("source.base_url is required for http"))?;
            let base = Url::parse(raw)
                .map_err(|e| CourseGraphError::config(format!("invalid source.base_url: {e}")))?;
            Ok(Box::new(HttpStudentViewSource::new(base, collect.block_timeout)?))
        }
    }
}

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

fn start_run() -> Uuid {
    let run_id = Uuid::now_v7();
    tracing::Span::current().record("run_id", tracing::field::display(run_id));
    info!(%run_id, "starting course pipeline");
    run_id
}

async fn collect_phase(
    config: &CourseRunConfig,
    registry: &TransformerRegistry,
    course: &mut LoadedCourse,
    progress: &dyn ProgressReporter,
) -> Result<Vec<CollectReport>> {
    progress.phase("Collecting student view data");
    let collect = CollectConfig::from(&config.app);
    let source = build_source(&config.app.source, &collect)?;
    let collect_progress = PipelineCollectProgress { inner: progress };
    let ctx = CollectContext::new(source.as_ref(), collect)
        .with_cancellation(config.cancel.clone())
        .with_progress(&collect_progress);

    registry.collect(&ctx, &mut course.structure).await
}

fn transform_phase(
    registry: &TransformerRegistry,
    usage: &UsageInfo,
    course: &mut LoadedCourse,
    progress: &dyn ProgressReporter,
) -> Result<Vec<TransformReport>> {
    progress.phase("Transforming");
    registry.transform(usage, &mut course.structure)
}

fn render_phase(registry: &TransformerRegistry, course: &LoadedCourse) -> RenderedCourse {
    let outputs = registry.output_fields();
    let requested: Vec<RequestedField<'_>> = outputs
        .iter()
        .map(|(scope, field)| RequestedField {
            scope: *scope,
            field,
        })
        .collect();
    render::render_course(&course.structure, &requested)
}

fn summarize(
    run_id: Uuid,
    course: &LoadedCourse,
    collect: &[CollectReport],
    transform: &[TransformReport],
    start: Instant,
) -> RunSummary {
    RunSummary {
        run_id,
        blocks: course.structure.len(),
        collected: collect.iter().map(|r| r.collected).sum(),
        collect_failures: collect.iter().map(|r| r.failures.len()).sum(),
        rewritten: transform.iter().map(|r| r.rewritten).sum(),
        missing: transform.iter().map(|r| r.missing.len()).sum(),
        elapsed: start.elapsed(),
    }
}

fn log_summary(pipeline: &str, summary: &RunSummary) {
    info!(
        pipeline,
        run_id = %summary.run_id,
        blocks = summary.blocks,
        collected = summary.collected,
        collect_failures = summary.collect_failures,
        rewritten = summary.rewritten,
        missing = summary.missing,
        elapsed_ms = summary.elapsed.as_millis(),
        "course pipeline complete"
    );
}

// ---------------------------------------------------------------------------
// Collect progress adapter
// ---------------------------------------------------------------------------

/// Adapts a `ProgressReporter` to the `CollectProgress` interface.
struct PipelineCollectProgress<'a> {
    inner: &'a dyn ProgressReporter,
}

impl CollectProgress for PipelineCollectProgress<'_> {
    fn block_collected(&self, block: &BlockKey, ok: bool, current: usize, total: usize) {
        self.inner.block_collected(block, ok, current, total);
    }
}
