//! Trim and dead-stream filtering of indexed blocks.
//!
//! Pure functions over the per-run block map; independently testable.

use std::collections::HashMap;

use crate::{
    compact::{CompactionError, block::StreamDataBlock},
    metadata::StreamMetadata,
};

/// Distinct stream ids referenced by the block map, ascending.
pub(crate) fn collect_stream_ids(blocks_by_object: &HashMap<u64, Vec<StreamDataBlock>>) -> Vec<u64> {
    let mut ids: Vec<u64> = blocks_by_object
        .values()
        .flatten()
        .map(StreamDataBlock::stream_id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Fail the run if any block cannot be loaded within the read budget.
pub(crate) fn check_block_sizes(
    blocks_by_object: &HashMap<u64, Vec<StreamDataBlock>>,
    cache_size: u64,
) -> Result<(), CompactionError> {
    for block in blocks_by_object.values().flatten() {
        if block.block_size() > cache_size {
            return Err(CompactionError::BlockTooLarge {
                object_id: block.object_id(),
                size: block.block_size(),
                cache: cache_size,
            });
        }
    }
    Ok(())
}

/// Drop blocks that are fully trimmed or belong to deleted streams.
///
/// Entries whose block list becomes empty are kept: an empty entry marks an
/// out-of-date object that the commit will retire without output.
pub(crate) fn filter_invalid_blocks(
    streams: &[StreamMetadata],
    blocks_by_object: &mut HashMap<u64, Vec<StreamDataBlock>>,
) {
    let watermarks: HashMap<u64, u64> = streams
        .iter()
        .map(|stream| (stream.stream_id(), stream.start_offset()))
        .collect();
    for blocks in blocks_by_object.values_mut() {
        blocks.retain(|block| {
            watermarks
                .get(&block.stream_id())
                .is_some_and(|watermark| block.end_offset() > *watermark)
        });
    }
}
