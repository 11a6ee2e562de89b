//! Stream-set object compaction pipeline.
//!
//! Producers pack blocks of many streams into shared stream-set objects;
//! over time this leaves readers merging across many small, mixed objects.
//! The pipeline here periodically rewrites those objects into fewer, larger,
//! per-stream ones while keeping every live byte addressable:
//!
//! 1. [`index`] fetches the block layout of every candidate object.
//! 2. The filter stage drops trimmed blocks and blocks of deleted streams.
//! 3. [`analyzer`] turns the block map into bounded read iterations.
//! 4. [`CompactionManager`] drives iterations through throttled reads and
//!    chained writes, then publishes one atomic commit request.
//! 5. A final sanity pass verifies the request still covers every live
//!    input block.

/// Pure planner turning a block map into bounded iterations.
pub mod analyzer;
/// Stream data blocks and offset-grouping helpers.
pub mod block;
/// Trim/dead-stream filtering of indexed blocks.
pub(crate) mod filter;
/// Block-index footer codec and parallel index fetch.
pub mod index;
/// Top-level state machine driving scheduled runs.
mod manager;
/// Coalesced, throttled ranged reads.
pub(crate) mod reader;
/// Interval-coverage verification of commit requests.
pub(crate) mod sanity;
/// Token-bucket byte throttle.
pub mod throttle;
/// Output-object write chaining.
pub(crate) mod uploader;
/// Buffered multipart block writer.
pub(crate) mod writer;

use std::time::Duration;

use thiserror::Error;

pub use analyzer::{CompactedObject, CompactionAnalyzer, CompactionKind, CompactionPlan};
pub use block::StreamDataBlock;
pub use manager::CompactionManager;
pub use throttle::Throttle;

use crate::{
    config::ConfigError, objects::ObjectManagerError, storage::StorageError,
    streams::StreamManagerError,
};

/// Floor for the delay between scheduled compaction runs.
pub(crate) const MIN_COMPACTION_DELAY: Duration = Duration::from_millis(10_000);

/// Refill rate above which read throttling is disabled entirely.
pub(crate) const MAX_THROTTLE_BYTES_PER_SEC: u64 = 1_000_000_000;

/// TTL attached to reserved object ids; uncommitted reservations expire.
pub(crate) const S3_OBJECT_TTL: Duration = Duration::from_secs(30 * 60);

/// Upper bound for one coalesced ranged read.
pub(crate) const S3_OBJECT_MAX_READ_BATCH: u64 = 32 * 1024 * 1024;

/// Errors that can surface while planning or executing compaction.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// The configuration is structurally invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A single block cannot be loaded within the read budget, so
    /// compaction is structurally impossible for this candidate set.
    #[error("block of {size} bytes in object {object_id} exceeds compaction cache {cache}")]
    BlockTooLarge {
        /// Object holding the oversized block.
        object_id: u64,
        /// Size of the block in bytes.
        size: u64,
        /// Configured read budget.
        cache: u64,
    },
    /// A ranged read against the object store failed.
    #[error("object read failed: {0}")]
    Read(#[source] StorageError),
    /// An upload against the object store failed.
    #[error("object write failed: {0}")]
    Write(#[source] StorageError),
    /// A block reached a writer without its payload loaded.
    #[error("block payload for object {object_id} was not loaded")]
    PayloadMissing {
        /// Source object of the block.
        object_id: u64,
    },
    /// The metadata manager rejected an operation.
    #[error(transparent)]
    ObjectManager(#[from] ObjectManagerError),
    /// The stream-metadata source could not be queried.
    #[error(transparent)]
    StreamManager(#[from] StreamManagerError),
    /// The commit request fails to cover a live input block.
    #[error("sanity check failed: {0}")]
    SanityCheckFailed(&'static str),
    /// A force-split run cannot fit even one contiguous span into the cache.
    #[error("cannot fit a run of {run_size} bytes into the {cache} byte cache")]
    Unsplittable {
        /// Read span of the smallest unsplittable run.
        run_size: u64,
        /// Configured read budget.
        cache: u64,
    },
    /// The run was cancelled mid-flight.
    #[error("compaction cancelled")]
    Cancelled,
    /// The manager is shut down.
    #[error("compaction manager is shut down")]
    Shutdown,
}
