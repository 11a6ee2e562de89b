//! Stream data blocks and offset-grouping helpers.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use bytes::Bytes;

use crate::metadata::StreamOffsetRange;

/// Shared cell holding a block's buffered payload.
///
/// The reader fills the cell once the ranged read completes; the single
/// writer that consumes the block takes the buffer out, releasing it when
/// the last `Bytes` handle drops. Clones share the same cell.
#[derive(Clone, Default)]
pub struct BlockPayload {
    inner: Arc<Mutex<Option<Bytes>>>,
}

impl BlockPayload {
    /// Store the loaded buffer.
    pub(crate) fn fill(&self, data: Bytes) {
        let mut guard = self.inner.lock().expect("payload cell mutex should not be poisoned");
        *guard = Some(data);
    }

    /// Take the buffer out, leaving the cell empty.
    pub(crate) fn take(&self) -> Option<Bytes> {
        self.inner
            .lock()
            .expect("payload cell mutex should not be poisoned")
            .take()
    }

    /// Whether a buffer is currently held.
    pub(crate) fn is_filled(&self) -> bool {
        self.inner
            .lock()
            .expect("payload cell mutex should not be poisoned")
            .is_some()
    }
}

impl fmt::Debug for BlockPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_filled() {
            f.write_str("BlockPayload(filled)")
        } else {
            f.write_str("BlockPayload(empty)")
        }
    }
}

/// An interval of a single stream stored inside one physical object.
#[derive(Clone, Debug)]
pub struct StreamDataBlock {
    stream_id: u64,
    start_offset: u64,
    end_offset: u64,
    object_id: u64,
    block_start_position: u64,
    block_end_position: u64,
    payload: BlockPayload,
}

impl StreamDataBlock {
    /// Build a block descriptor. Offsets and positions must be non-empty
    /// half-open intervals.
    pub fn new(
        stream_id: u64,
        start_offset: u64,
        end_offset: u64,
        object_id: u64,
        block_start_position: u64,
        block_end_position: u64,
    ) -> Self {
        debug_assert!(start_offset < end_offset);
        debug_assert!(block_start_position < block_end_position);
        Self {
            stream_id,
            start_offset,
            end_offset,
            object_id,
            block_start_position,
            block_end_position,
            payload: BlockPayload::default(),
        }
    }

    /// Stream the block belongs to.
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Inclusive start offset.
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Exclusive end offset.
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// Physical object the block is stored in.
    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    /// Byte position of the block start inside the source object.
    pub fn block_start_position(&self) -> u64 {
        self.block_start_position
    }

    /// Byte position one past the block end inside the source object.
    pub fn block_end_position(&self) -> u64 {
        self.block_end_position
    }

    /// Size of the block in bytes.
    pub fn block_size(&self) -> u64 {
        self.block_end_position - self.block_start_position
    }

    /// The buffered payload cell shared by every clone of this block.
    pub(crate) fn payload(&self) -> &BlockPayload {
        &self.payload
    }
}

impl PartialEq for StreamDataBlock {
    fn eq(&self, other: &Self) -> bool {
        self.stream_id == other.stream_id
            && self.start_offset == other.start_offset
            && self.end_offset == other.end_offset
            && self.object_id == other.object_id
            && self.block_start_position == other.block_start_position
            && self.block_end_position == other.block_end_position
    }
}

impl Eq for StreamDataBlock {}

/// Sort blocks by stream id, then by start offset.
pub(crate) fn sort_by_stream_offset(blocks: &mut [StreamDataBlock]) {
    blocks.sort_by_key(|block| (block.stream_id(), block.start_offset()));
}

/// Group blocks into contiguous per-stream runs.
///
/// Input must be sorted by `(stream_id, start_offset)`; a new run starts
/// whenever the stream changes or an offset gap appears.
pub(crate) fn group_by_offset(blocks: &[StreamDataBlock]) -> Vec<Vec<StreamDataBlock>> {
    let mut groups: Vec<Vec<StreamDataBlock>> = Vec::new();
    for block in blocks {
        match groups.last_mut() {
            Some(group)
                if group
                    .last()
                    .is_some_and(|prev| {
                        prev.stream_id() == block.stream_id()
                            && prev.end_offset() == block.start_offset()
                    }) =>
            {
                group.push(block.clone());
            }
            _ => groups.push(vec![block.clone()]),
        }
    }
    groups
}

/// Build the contiguous per-stream offset spans covered by `blocks`.
///
/// Blocks are re-sorted by `(stream_id, start_offset)` so the resulting
/// range list is canonical regardless of write order.
pub(crate) fn build_stream_ranges(blocks: &[StreamDataBlock]) -> Vec<StreamOffsetRange> {
    let mut sorted = blocks.to_vec();
    sort_by_stream_offset(&mut sorted);
    group_by_offset(&sorted)
        .iter()
        .filter_map(|group| {
            let first = group.first()?;
            let last = group.last()?;
            Some(StreamOffsetRange::new(
                first.stream_id(),
                first.start_offset(),
                last.end_offset(),
            ))
        })
        .collect()
}
