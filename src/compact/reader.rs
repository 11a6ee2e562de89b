//! Coalesced, throttled ranged reads of stream data blocks.

use std::sync::Arc;

use crate::{
    compact::{CompactionError, block::StreamDataBlock, throttle::Throttle},
    metadata::S3ObjectMetadata,
    observability::log_debug,
    storage::ObjectStorage,
};

/// Reads the payloads of selected blocks out of one source object.
///
/// Adjacent blocks are coalesced into single ranged reads capped at the
/// batch limit; every batch acquires its byte count from the throttle
/// before the read is issued. Payload cells are filled by zero-copy
/// slicing of the fetched buffer.
pub(crate) struct DataBlockReader {
    metadata: S3ObjectMetadata,
    storage: Arc<dyn ObjectStorage>,
    throttle: Option<Arc<Throttle>>,
}

impl DataBlockReader {
    pub(crate) fn new(
        metadata: S3ObjectMetadata,
        storage: Arc<dyn ObjectStorage>,
        throttle: Option<Arc<Throttle>>,
    ) -> Self {
        Self {
            metadata,
            storage,
            throttle,
        }
    }

    /// Load every block's payload, batching at most `max_batch_bytes` per
    /// ranged read.
    pub(crate) async fn read_blocks(
        &self,
        blocks: &[StreamDataBlock],
        max_batch_bytes: u64,
    ) -> Result<(), CompactionError> {
        let mut sorted: Vec<&StreamDataBlock> = blocks.iter().collect();
        sorted.sort_by_key(|block| block.block_start_position());
        let max_batch = max_batch_bytes.max(1);

        let mut batch: Vec<&StreamDataBlock> = Vec::new();
        for block in sorted {
            let flush = match batch.first().zip(batch.last()) {
                Some((first, prev)) => {
                    prev.block_end_position() != block.block_start_position()
                        || block.block_end_position() - first.block_start_position() > max_batch
                }
                None => false,
            };
            if flush {
                self.read_batch(&batch).await?;
                batch.clear();
            }
            batch.push(block);
        }
        self.read_batch(&batch).await
    }

    async fn read_batch(&self, batch: &[&StreamDataBlock]) -> Result<(), CompactionError> {
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            return Ok(());
        };
        let start = first.block_start_position();
        let end = last.block_end_position();
        if let Some(throttle) = &self.throttle {
            throttle.acquire(end - start).await;
        }
        log_debug!(
            component = "compaction",
            event = "read_batch",
            object_id = self.metadata.object_id(),
            start,
            bytes = end - start,
            blocks = batch.len(),
        );
        let data = self
            .storage
            .range_read(self.metadata.object_id(), start..end)
            .await
            .map_err(CompactionError::Read)?;
        for block in batch {
            let from = (block.block_start_position() - start) as usize;
            let to = (block.block_end_position() - start) as usize;
            block.payload().fill(data.slice(from..to));
        }
        Ok(())
    }
}
