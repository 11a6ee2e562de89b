//! Output-object write chaining.
//!
//! One uploader lives per compaction run. COMPACT contributions append to a
//! single lazily-opened stream-set object writer in strict sequence; SPLIT
//! units write independent stream objects and may run in parallel.

use std::sync::Arc;

use crate::{
    compact::{
        CompactionError, S3_OBJECT_TTL,
        analyzer::CompactedObject,
        writer::DataBlockWriter,
    },
    metadata::NOOP_OBJECT_ID,
    objects::{ObjectManager, StreamObject},
    observability::log_info,
    storage::ObjectStorage,
};

pub(crate) struct CompactionUploader {
    object_manager: Arc<dyn ObjectManager>,
    storage: Arc<dyn ObjectStorage>,
    part_size: usize,
    stream_set_object_id: Option<u64>,
    stream_set_writer: Option<DataBlockWriter>,
}

impl CompactionUploader {
    pub(crate) fn new(
        object_manager: Arc<dyn ObjectManager>,
        storage: Arc<dyn ObjectStorage>,
        part_size: usize,
    ) -> Self {
        Self {
            object_manager,
            storage,
            part_size,
            stream_set_object_id: None,
            stream_set_writer: None,
        }
    }

    /// Cloneable handle for independent stream-object writes.
    pub(crate) fn stream_object_uploader(&self) -> StreamObjectUploader {
        StreamObjectUploader {
            object_manager: Arc::clone(&self.object_manager),
            storage: Arc::clone(&self.storage),
            part_size: self.part_size,
        }
    }

    /// Append a COMPACT unit to the single output stream-set object.
    ///
    /// The writer is opened lazily on the first contribution so a run that
    /// produces only SPLIT output never reserves a stream-set id.
    pub(crate) async fn chain_write_stream_set_object(
        &mut self,
        object: &CompactedObject,
    ) -> Result<(), CompactionError> {
        if self.stream_set_writer.is_none() {
            let object_id = self
                .object_manager
                .prepare_object(1, S3_OBJECT_TTL)
                .await?;
            let writer = DataBlockWriter::open(self.storage.as_ref(), object_id, self.part_size)
                .await?;
            self.stream_set_object_id = Some(object_id);
            self.stream_set_writer = Some(writer);
            log_info!(
                component = "uploader",
                event = "stream_set_object_opened",
                object_id,
            );
        }
        let writer = self
            .stream_set_writer
            .as_mut()
            .expect("stream-set writer was just initialized");
        for block in object.blocks() {
            writer.write(block).await?;
        }
        Ok(())
    }

    /// Id of the output stream-set object, or [`NOOP_OBJECT_ID`] when the
    /// run contributed nothing to one.
    pub(crate) fn stream_set_object_id(&self) -> u64 {
        self.stream_set_object_id.unwrap_or(NOOP_OBJECT_ID)
    }

    /// Finish the stream-set upload and return its final size, or zero when
    /// no COMPACT contribution was written.
    pub(crate) async fn complete(&mut self) -> Result<u64, CompactionError> {
        match self.stream_set_writer.take() {
            Some(writer) => writer.close().await,
            None => Ok(0),
        }
    }

    /// Abandon the in-flight stream-set upload, if any.
    pub(crate) async fn release(&mut self) {
        if let Some(writer) = self.stream_set_writer.take() {
            writer.abort().await;
        }
        self.stream_set_object_id = None;
    }
}

/// Writes one stream object per SPLIT unit; holds no per-run state, so
/// writes through different handles may run concurrently.
#[derive(Clone)]
pub(crate) struct StreamObjectUploader {
    object_manager: Arc<dyn ObjectManager>,
    storage: Arc<dyn ObjectStorage>,
    part_size: usize,
}

impl StreamObjectUploader {
    pub(crate) async fn write_stream_object(
        &self,
        object: &CompactedObject,
    ) -> Result<StreamObject, CompactionError> {
        let (Some(first), Some(last)) = (object.blocks().first(), object.blocks().last()) else {
            return Err(CompactionError::SanityCheckFailed(
                "compacted object has no blocks",
            ));
        };
        let object_id = self.object_manager.prepare_object(1, S3_OBJECT_TTL).await?;
        let mut writer =
            DataBlockWriter::open(self.storage.as_ref(), object_id, self.part_size).await?;
        for block in object.blocks() {
            if let Err(err) = writer.write(block).await {
                writer.abort().await;
                return Err(err);
            }
        }
        let object_size = writer.close().await?;
        Ok(StreamObject {
            object_id,
            stream_id: first.stream_id(),
            start_offset: first.start_offset(),
            end_offset: last.end_offset(),
            object_size,
        })
    }
}
