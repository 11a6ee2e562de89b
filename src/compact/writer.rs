//! Buffered multipart block writer.

use bytes::BytesMut;

use crate::{
    compact::{
        CompactionError,
        block::StreamDataBlock,
        index::{self, IndexEntry},
    },
    storage::{ObjectStorage, ObjectWriter},
};

/// Streams data blocks into one output object.
///
/// Payloads are buffered into `part_size` chunks for multipart upload; the
/// writer records an index entry per block at its rewritten position and
/// appends the index block plus footer on close, so outputs are themselves
/// valid compaction candidates.
pub(crate) struct DataBlockWriter {
    object_id: u64,
    part_size: usize,
    writer: Box<dyn ObjectWriter>,
    buffer: BytesMut,
    entries: Vec<IndexEntry>,
    position: u64,
}

impl DataBlockWriter {
    /// Open a multipart upload for `object_id`.
    pub(crate) async fn open(
        storage: &dyn ObjectStorage,
        object_id: u64,
        part_size: usize,
    ) -> Result<Self, CompactionError> {
        let writer = storage
            .writer(object_id)
            .await
            .map_err(CompactionError::Write)?;
        Ok(Self {
            object_id,
            part_size: part_size.max(1),
            writer,
            buffer: BytesMut::new(),
            entries: Vec::new(),
            position: 0,
        })
    }

    /// Consume a block's payload and append it to the object.
    pub(crate) async fn write(&mut self, block: &StreamDataBlock) -> Result<(), CompactionError> {
        let data = block
            .payload()
            .take()
            .ok_or(CompactionError::PayloadMissing {
                object_id: block.object_id(),
            })?;
        debug_assert_eq!(data.len() as u64, block.block_size());
        self.entries.push(IndexEntry {
            stream_id: block.stream_id(),
            start_offset: block.start_offset(),
            end_offset: block.end_offset(),
            position: self.position,
            size: data.len() as u32,
        });
        self.position += data.len() as u64;
        self.buffer.extend_from_slice(&data);
        drop(data);
        while self.buffer.len() >= self.part_size {
            let part = self.buffer.split_to(self.part_size).freeze();
            self.writer.write_part(part).await.map_err(CompactionError::Write)?;
        }
        Ok(())
    }

    /// Append index and footer, flush the tail part, and finish the upload.
    /// Returns the total object size.
    pub(crate) async fn close(self) -> Result<u64, CompactionError> {
        let Self {
            mut writer,
            mut buffer,
            entries,
            position,
            ..
        } = self;
        buffer.extend_from_slice(&index::encode_index_and_footer(&entries, position));
        if !buffer.is_empty() {
            writer
                .write_part(buffer.freeze())
                .await
                .map_err(CompactionError::Write)?;
        }
        writer.close().await.map_err(CompactionError::Write)
    }

    /// Discard the upload; nothing becomes visible.
    pub(crate) async fn abort(self) {
        if let Err(err) = self.writer.abort().await {
            crate::observability::log_warn!(
                component = "uploader",
                event = "upload_abort_failed",
                object_id = self.object_id,
                error = ?err,
            );
        }
    }
}
