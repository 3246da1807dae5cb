//! Block structure transformers.
//!
//! This crate provides:
//! - [`BlockStructureTransformer`]: the two-phase (collect, transform) contract
//! - [`TransformerRegistry`]: runs transformers in order with version checks
//! - [`VideoBlockUrlTransformer`]: rewrites video rendition URLs onto a CDN
//! - [`StudentViewSource`]: where `collect` gets per-block data from

pub mod collect;
pub mod registry;
pub mod rewrite;
pub mod source;
pub mod transformer;
pub mod video_urls;

pub use registry::TransformerRegistry;
pub use rewrite::{FormatExemptions, RewriteRule};
pub use source::{AuthoredContentSource, HttpStudentViewSource, StudentViewSource};
pub use transformer::{
    BlockFailure, BlockStructureTransformer, CollectContext, CollectProgress, CollectReport,
    SilentCollectProgress, TransformReport,
};
pub use video_urls::VideoBlockUrlTransformer;
