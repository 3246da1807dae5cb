//! Bounded-concurrency fetching of student view data for `collect`.
//!
//! Fetches run concurrently up to the configured limit, each under a
//! per-block timeout and raced against the context's cancellation token.
//! Results come back in request order so callers can attach them to the
//! structure sequentially.

use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, instrument};

use coursegraph_shared::{Block, BlockKey, CourseGraphError, Result};
use coursegraph_structure::BlockStructure;

use crate::transformer::CollectContext;

/// Fetch student view data for each of `keys`, in order.
///
/// Per-block failures are returned inline. Cancellation fails the whole
/// call with [`CourseGraphError::Cancelled`].
#[instrument(skip_all, fields(source = ctx.source.name(), blocks = keys.len()))]
pub async fn fetch_student_views(
    ctx: &CollectContext<'_>,
    structure: &BlockStructure,
    keys: &[BlockKey],
) -> Result<Vec<(BlockKey, Result<Value>)>> {
    if ctx.is_cancelled() {
        return Err(CourseGraphError::Cancelled);
    }

    let blocks: Vec<Block> = keys
        .iter()
        .filter_map(|key| structure.get_block(key).cloned())
        .collect();

    let results: Vec<(BlockKey, Result<Value>)> = stream::iter(blocks)
        .map(|block| async move {
            let result = fetch_one(ctx, &block).await;
            (block.key, result)
        })
        .buffered(ctx.config.concurrency.max(1))
        .collect()
        .await;

    if ctx.is_cancelled() {
        return Err(CourseGraphError::Cancelled);
    }

    debug!(fetched = results.len(), "student view fetch complete");
    Ok(results)
}

async fn fetch_one(ctx: &CollectContext<'_>, block: &Block) -> Result<Value> {
    let timeout = ctx.config.block_timeout;
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(CourseGraphError::Cancelled),
        result = tokio::time::timeout(timeout, ctx.source.student_view_data(block)) => {
            result.unwrap_or_else(|_| {
                Err(CourseGraphError::Source(format!(
                    "block {} timed out after {}ms",
                    block.key,
                    timeout.as_millis()
                )))
            })
        }
    }
}
