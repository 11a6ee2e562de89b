//! Stream-metadata contract.

use async_trait::async_trait;
use thiserror::Error;

use crate::metadata::StreamMetadata;

/// Errors surfaced by the stream-metadata source.
#[derive(Debug, Error)]
pub enum StreamManagerError {
    /// The manager could not be reached.
    #[error("stream manager unavailable: {0}")]
    Unavailable(String),
}

/// Live offset ranges of logical streams.
///
/// Streams absent from the response are considered deleted; their blocks are
/// dropped by the filter stage.
#[async_trait]
pub trait StreamManager: Send + Sync {
    /// Fetch live metadata for the given stream ids.
    async fn get_streams(
        &self,
        stream_ids: &[u64],
    ) -> Result<Vec<StreamMetadata>, StreamManagerError>;
}
