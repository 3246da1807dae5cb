//! The transformer contract and the context/reports it works with.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use coursegraph_shared::{BlockKey, CollectConfig, Result, UsageInfo};
use coursegraph_structure::{BlockStructure, FieldScope};

use crate::source::StudentViewSource;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A named, versioned two-phase unit of work over a [`BlockStructure`].
///
/// `collect` runs upstream, once, and caches whatever external data the
/// transformer needs as versioned block fields. `transform` runs per request
/// and must not assume `collect` happened in the same pass: it relies on the
/// read-version check to detect missing or incompatible fields.
#[async_trait]
pub trait BlockStructureTransformer: Send + Sync {
    /// Unique name; scopes this transformer's fields.
    fn name(&self) -> &'static str;

    /// Version stamped on fields written by `collect`.
    fn write_version(&self) -> u32;

    /// Version `transform` expects to read back.
    fn read_version(&self) -> u32;

    fn scope(&self) -> FieldScope<'static> {
        FieldScope::new(self.name(), self.write_version(), self.read_version())
    }

    /// Block fields shown to students once transformed.
    fn output_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Gather external per-block data into transformer-scoped fields.
    async fn collect(
        &self,
        ctx: &CollectContext<'_>,
        structure: &mut BlockStructure,
    ) -> Result<CollectReport>;

    /// Rewrite previously collected fields in place.
    fn transform(
        &self,
        usage: &UsageInfo,
        structure: &mut BlockStructure,
    ) -> Result<TransformReport>;
}

// ---------------------------------------------------------------------------
// Collect context
// ---------------------------------------------------------------------------

/// Progress callback for the collect phase.
pub trait CollectProgress: Send + Sync {
    /// Called once per block after its fetch resolved.
    fn block_collected(&self, block: &BlockKey, ok: bool, current: usize, total: usize);
}

/// No-op collect progress for headless/test usage.
pub struct SilentCollectProgress;

impl CollectProgress for SilentCollectProgress {
    fn block_collected(&self, _block: &BlockKey, _ok: bool, _current: usize, _total: usize) {}
}

/// Everything `collect` may touch outside the structure.
pub struct CollectContext<'a> {
    pub source: &'a dyn StudentViewSource,
    pub config: CollectConfig,
    pub cancel: CancellationToken,
    pub progress: &'a dyn CollectProgress,
}

impl<'a> CollectContext<'a> {
    pub fn new(source: &'a dyn StudentViewSource, config: CollectConfig) -> Self {
        Self {
            source,
            config,
            cancel: CancellationToken::new(),
            progress: &SilentCollectProgress,
        }
    }

    /// Use `token` to cancel in-flight fetches.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn CollectProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// A block whose data could not be collected or transformed.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockFailure {
    pub block: BlockKey,
    pub reason: String,
}

/// Outcome of one transformer's `collect`.
#[derive(Debug, Clone, Default)]
pub struct CollectReport {
    pub transformer: String,
    /// Blocks whose data was stored.
    pub collected: usize,
    /// Blocks whose fetch failed; traversal continued past them.
    pub failures: Vec<BlockFailure>,
}

impl CollectReport {
    pub fn new(transformer: &str) -> Self {
        Self {
            transformer: transformer.to_string(),
            ..Self::default()
        }
    }
}

/// Outcome of one transformer's `transform`.
#[derive(Debug, Clone, Default)]
pub struct TransformReport {
    pub transformer: String,
    /// Blocks whose collected data was read and processed.
    pub blocks: usize,
    /// Values changed in place.
    pub rewritten: usize,
    /// Values left as they were (exempt, or already in target form).
    pub unchanged: usize,
    /// Values that could not be rewritten and were left untouched.
    pub skipped: usize,
    /// Blocks with no collected data.
    pub missing: Vec<BlockKey>,
}

impl TransformReport {
    pub fn new(transformer: &str) -> Self {
        Self {
            transformer: transformer.to_string(),
            ..Self::default()
        }
    }
}
