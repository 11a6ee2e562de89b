#![deny(missing_docs)]
//! Stream-set object compaction core for S3-backed log storage.
//!
//! Producers continuously commit *stream-set objects*: packed bundles of
//! small data blocks belonging to many logical streams. This crate rewrites
//! those objects into fewer, larger, per-stream ones. It indexes candidate
//! layouts, plans bounded read iterations, paces reads through a token
//! bucket, chains output writes, and commits one atomic result per run
//! while guaranteeing every live byte stays addressable.
//!
//! The object store, metadata manager and stream-metadata source are
//! external collaborators consumed through the traits in [`storage`],
//! [`objects`] and [`streams`].

/// Stream-set object compaction pipeline.
pub mod compact;
/// Configuration surface of the compaction core.
pub mod config;
/// Metadata records for physical objects and logical streams.
pub mod metadata;
/// Metadata-manager contract and commit request types.
pub mod objects;
/// Object-store contracts and the in-memory backend.
pub mod storage;
/// Stream-metadata contract.
pub mod streams;

pub(crate) mod observability;

pub use compact::{CompactionError, CompactionManager};
pub use config::CompactionConfig;
