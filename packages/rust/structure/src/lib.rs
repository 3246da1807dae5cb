//! The block structure: a DAG of course content blocks plus a versioned,
//! transformer-scoped field cache.
//!
//! This crate provides:
//! - [`BlockStructure`]: the graph container and its traversals
//! - [`MatchRule`]: declarative traversal filters
//! - [`FieldStore`] / [`FieldScope`]: the versioned field side-table

pub mod block_structure;
pub mod fields;
pub mod match_rule;
pub mod traversal;

pub use block_structure::BlockStructure;
pub use fields::{FieldScope, FieldStore, VersionedField};
pub use match_rule::MatchRule;
