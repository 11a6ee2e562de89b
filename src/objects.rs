//! Metadata-manager contract and commit request types.
//!
//! The metadata manager is an external collaborator; the compaction core
//! consumes candidate listings and id reservation from it and hands back one
//! atomic commit request per run.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::metadata::{S3ObjectMetadata, StreamOffsetRange};

/// Errors surfaced by the metadata manager.
#[derive(Debug, Error)]
pub enum ObjectManagerError {
    /// Object id reservation failed.
    #[error("failed to prepare object ids: {0}")]
    Prepare(String),
    /// The commit was rejected; no metadata was changed.
    #[error("commit rejected: {0}")]
    CommitRejected(String),
    /// The manager could not be reached.
    #[error("object manager unavailable: {0}")]
    Unavailable(String),
}

/// One fresh per-stream object produced by a SPLIT or force-split.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamObject {
    /// Identifier of the new object.
    pub object_id: u64,
    /// Stream the object holds data for.
    pub stream_id: u64,
    /// Inclusive start offset of the covered range.
    pub start_offset: u64,
    /// Exclusive end offset of the covered range.
    pub end_offset: u64,
    /// Total size of the object in bytes.
    pub object_size: u64,
}

/// Atomic output artifact of one compaction run.
///
/// Publishing the request makes the new stream-set object (if any) and the
/// fresh stream objects visible while retiring every id in
/// `compacted_object_ids` in the same metadata transaction.
#[derive(Clone, Debug, Default)]
pub struct CommitStreamSetObjectRequest {
    /// Id of the new stream-set object, or [`NOOP_OBJECT_ID`] when the run
    /// produced no stream-set output.
    ///
    /// [`NOOP_OBJECT_ID`]: crate::metadata::NOOP_OBJECT_ID
    pub object_id: u64,
    /// Ordering key of the new object: the smallest input object id.
    pub order_id: u64,
    /// Total size of the new stream-set object in bytes.
    pub object_size: u64,
    /// Contiguous per-stream spans inside the new stream-set object.
    pub stream_ranges: Vec<StreamOffsetRange>,
    /// Fresh per-stream objects produced by this run.
    pub stream_objects: Vec<StreamObject>,
    /// Input objects to delete once the commit lands.
    pub compacted_object_ids: Vec<u64>,
}

/// Candidate listing, id reservation and atomic publication.
#[async_trait]
pub trait ObjectManager: Send + Sync {
    /// Stream-set objects owned by this node, i.e. compaction candidates.
    async fn get_server_objects(&self) -> Result<Vec<S3ObjectMetadata>, ObjectManagerError>;

    /// Reserve `count` consecutive object ids valid for `ttl`; returns the
    /// first reserved id.
    async fn prepare_object(
        &self,
        count: usize,
        ttl: Duration,
    ) -> Result<u64, ObjectManagerError>;

    /// Atomically publish the new objects and retire the compacted inputs.
    async fn commit_stream_set_object(
        &self,
        request: CommitStreamSetObjectRequest,
    ) -> Result<(), ObjectManagerError>;
}
