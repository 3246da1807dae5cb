//! Core pipeline orchestration for coursegraph.
//!
//! This crate ties together export loading, the transformer registry, the
//! collect cache and rendering into end-to-end workflows (e.g. `run_course`).

pub mod cache;
pub mod loader;
pub mod pipeline;
pub mod render;
