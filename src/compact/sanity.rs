//! Interval-coverage verification of commit requests.
//!
//! Before a commit is submitted, every live block of every input object must
//! still be addressable through the request's output ranges. A miss means the
//! rewrite would lose data; the run aborts without touching metadata.

use std::collections::HashMap;

use crate::{
    compact::{CompactionError, block::StreamDataBlock},
    metadata::{StreamMetadata, StreamOffsetRange},
    objects::CommitStreamSetObjectRequest,
};

/// Check that `request` covers every live input block.
pub(crate) fn verify(
    streams: &[StreamMetadata],
    request: &CommitStreamSetObjectRequest,
    blocks_by_object: &HashMap<u64, Vec<StreamDataBlock>>,
) -> Result<(), CompactionError> {
    let watermarks: HashMap<u64, u64> = streams
        .iter()
        .map(|stream| (stream.stream_id(), stream.start_offset()))
        .collect();
    let merged = merged_output_ranges(request);

    for object_id in &request.compacted_object_ids {
        let Some(blocks) = blocks_by_object.get(object_id) else {
            continue;
        };
        for block in blocks {
            let Some(watermark) = watermarks.get(&block.stream_id()) else {
                // stream deleted since indexing; nothing left to cover
                continue;
            };
            if block.end_offset() <= *watermark {
                continue;
            }
            let Some(ranges) = merged.get(&block.stream_id()) else {
                return Err(CompactionError::SanityCheckFailed(
                    "stream missing from compaction output",
                ));
            };
            if !covers(ranges, block) {
                return Err(CompactionError::SanityCheckFailed(
                    "input block not covered by compaction output",
                ));
            }
        }
    }
    Ok(())
}

/// Merge the request's stream ranges and stream objects into sorted,
/// non-overlapping per-stream interval lists.
fn merged_output_ranges(
    request: &CommitStreamSetObjectRequest,
) -> HashMap<u64, Vec<StreamOffsetRange>> {
    let mut by_stream: HashMap<u64, Vec<StreamOffsetRange>> = HashMap::new();
    for range in &request.stream_ranges {
        by_stream.entry(range.stream_id()).or_default().push(*range);
    }
    for object in &request.stream_objects {
        by_stream
            .entry(object.stream_id)
            .or_default()
            .push(StreamOffsetRange::new(
                object.stream_id,
                object.start_offset,
                object.end_offset,
            ));
    }
    for ranges in by_stream.values_mut() {
        ranges.sort();
        let mut merged: Vec<StreamOffsetRange> = Vec::with_capacity(ranges.len());
        for range in ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if range.start_offset() <= last.end_offset() => {
                    if range.end_offset() > last.end_offset() {
                        *last = StreamOffsetRange::new(
                            last.stream_id(),
                            last.start_offset(),
                            range.end_offset(),
                        );
                    }
                }
                _ => merged.push(range),
            }
        }
        *ranges = merged;
    }
    by_stream
}

fn covers(ranges: &[StreamOffsetRange], block: &StreamDataBlock) -> bool {
    let idx = ranges.partition_point(|range| range.start_offset() <= block.start_offset());
    idx > 0 && ranges[idx - 1].end_offset() >= block.end_offset()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::StreamObject;

    fn block(stream_id: u64, start: u64, end: u64) -> StreamDataBlock {
        StreamDataBlock::new(stream_id, start, end, 1, start, end + 1)
    }

    fn request_with_ranges(ranges: Vec<StreamOffsetRange>) -> CommitStreamSetObjectRequest {
        CommitStreamSetObjectRequest {
            compacted_object_ids: vec![1],
            stream_ranges: ranges,
            ..Default::default()
        }
    }

    fn blocks(entries: Vec<StreamDataBlock>) -> HashMap<u64, Vec<StreamDataBlock>> {
        HashMap::from([(1, entries)])
    }

    #[test]
    fn covered_blocks_pass() {
        let request = request_with_ranges(vec![StreamOffsetRange::new(1, 0, 100)]);
        let streams = [StreamMetadata::new(1, 0)];
        let map = blocks(vec![block(1, 0, 50), block(1, 50, 100)]);
        verify(&streams, &request, &map).expect("covered");
    }

    #[test]
    fn adjacent_outputs_merge_for_coverage() {
        // a stream range and a stream object chain into one interval
        let mut request = request_with_ranges(vec![StreamOffsetRange::new(1, 0, 50)]);
        request.stream_objects.push(StreamObject {
            object_id: 2,
            stream_id: 1,
            start_offset: 50,
            end_offset: 100,
            object_size: 0,
        });
        let streams = [StreamMetadata::new(1, 0)];
        let map = blocks(vec![block(1, 40, 90)]);
        verify(&streams, &request, &map).expect("merged coverage");
    }

    #[test]
    fn uncovered_block_fails() {
        let request = request_with_ranges(vec![StreamOffsetRange::new(1, 0, 50)]);
        let streams = [StreamMetadata::new(1, 0)];
        let map = blocks(vec![block(1, 40, 90)]);
        let err = verify(&streams, &request, &map).expect_err("gap");
        assert!(matches!(err, CompactionError::SanityCheckFailed(_)));
    }

    #[test]
    fn trimmed_and_dead_blocks_are_skipped() {
        let request = request_with_ranges(Vec::new());
        // stream 1 trimmed past the block; stream 9 deleted entirely
        let streams = [StreamMetadata::new(1, 100)];
        let map = blocks(vec![block(1, 0, 50), block(9, 0, 50)]);
        verify(&streams, &request, &map).expect("nothing live to cover");
    }

    #[test]
    fn missing_stream_fails() {
        let request = request_with_ranges(vec![StreamOffsetRange::new(2, 0, 50)]);
        let streams = [StreamMetadata::new(1, 0)];
        let map = blocks(vec![block(1, 0, 50)]);
        let err = verify(&streams, &request, &map).expect_err("missing stream");
        assert!(matches!(err, CompactionError::SanityCheckFailed(_)));
    }
}
