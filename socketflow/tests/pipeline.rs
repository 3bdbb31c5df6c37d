//! End-to-end pipeline tests over in-memory channels.
//!
//! - stream: pass-through, skip sentinel, sibling stages, exhaustion
//! - folds: fixed-count and predicate-terminated accumulation
//! - conversation: a multi-stage exchange with a replying peer

#[path = "pipeline/mod.rs"]
mod pipeline;
