//! Pure compaction planner.
//!
//! The analyzer turns a filtered block map into an ordered list of read
//! iterations bounded by the in-memory cache budget. It performs no I/O and
//! is deterministic for a given input and configuration.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::compact::block::{self, StreamDataBlock};

/// How a compacted object's blocks are rewritten.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompactionKind {
    /// Contributes a portion of the single rewritten stream-set object.
    Compact,
    /// Becomes its own per-stream object.
    Split,
}

/// One output unit of a plan: an ordered slice of a single stream's blocks.
#[derive(Clone, Debug)]
pub struct CompactedObject {
    kind: CompactionKind,
    blocks: Vec<StreamDataBlock>,
    size: u64,
}

impl CompactedObject {
    fn new(kind: CompactionKind, blocks: Vec<StreamDataBlock>) -> Self {
        let size = blocks.iter().map(StreamDataBlock::block_size).sum();
        Self { kind, blocks, size }
    }

    /// Whether this unit is written as a stream object or a stream-set part.
    pub fn kind(&self) -> CompactionKind {
        self.kind
    }

    /// Blocks in write order.
    pub fn blocks(&self) -> &[StreamDataBlock] {
        &self.blocks
    }

    /// Total payload bytes of the unit.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// One read iteration: the blocks to load per source object and the output
/// units the iteration emits.
#[derive(Clone, Debug, Default)]
pub struct CompactionPlan {
    blocks_by_object: BTreeMap<u64, Vec<StreamDataBlock>>,
    compacted_objects: Vec<CompactedObject>,
    read_bytes: u64,
}

impl CompactionPlan {
    /// Blocks to load, keyed by source object id.
    pub fn blocks_by_object(&self) -> &BTreeMap<u64, Vec<StreamDataBlock>> {
        &self.blocks_by_object
    }

    /// Output units in write order.
    pub fn compacted_objects(&self) -> &[CompactedObject] {
        &self.compacted_objects
    }

    /// Total bytes the iteration loads; never exceeds the cache budget.
    pub fn read_bytes(&self) -> u64 {
        self.read_bytes
    }

    fn is_empty(&self) -> bool {
        self.read_bytes == 0 && self.compacted_objects.is_empty()
    }

    fn add_block(&mut self, block: &StreamDataBlock) {
        self.read_bytes += block.block_size();
        self.blocks_by_object
            .entry(block.object_id())
            .or_default()
            .push(block.clone());
    }

    fn push_object(&mut self, kind: CompactionKind, blocks: Vec<StreamDataBlock>) {
        self.compacted_objects.push(CompactedObject::new(kind, blocks));
    }
}

#[derive(Debug)]
struct Run {
    stream_id: u64,
    kind: CompactionKind,
    blocks: Vec<StreamDataBlock>,
    size: u64,
}

/// Pure planner enforcing the cache budget and output ceilings.
#[derive(Clone, Debug)]
pub struct CompactionAnalyzer {
    compaction_cache_size: u64,
    stream_split_size: u64,
    max_stream_num_per_stream_set_object: usize,
    max_stream_object_num_per_commit: usize,
}

impl CompactionAnalyzer {
    /// Create a planner from the configured budgets and ceilings.
    pub fn new(
        compaction_cache_size: u64,
        stream_split_size: u64,
        max_stream_num_per_stream_set_object: usize,
        max_stream_object_num_per_commit: usize,
    ) -> Self {
        Self {
            compaction_cache_size,
            stream_split_size,
            max_stream_num_per_stream_set_object,
            max_stream_object_num_per_commit,
        }
    }

    /// Plan the compaction of `blocks_by_object`.
    ///
    /// Objects that cannot be admitted under the fanout or stream-count
    /// ceilings are added to `excluded` and deferred to a later run; the
    /// analysis then restarts on the reduced map until it is stable.
    /// Exclusion is object-granular: dropping single blocks would delete
    /// live data when the commit retires their source objects.
    pub fn analyze(
        &self,
        blocks_by_object: &HashMap<u64, Vec<StreamDataBlock>>,
        excluded: &mut HashSet<u64>,
    ) -> Vec<CompactionPlan> {
        loop {
            let runs = self.collect_runs(blocks_by_object, excluded);
            let (admitted, newly_excluded) = self.admit(runs);
            if newly_excluded.is_empty() {
                return self.pack(admitted);
            }
            excluded.extend(newly_excluded);
        }
    }

    /// Group live blocks into contiguous per-stream runs, streams ascending.
    fn collect_runs(
        &self,
        blocks_by_object: &HashMap<u64, Vec<StreamDataBlock>>,
        excluded: &HashSet<u64>,
    ) -> Vec<Run> {
        let mut by_stream: BTreeMap<u64, Vec<StreamDataBlock>> = BTreeMap::new();
        for (object_id, blocks) in blocks_by_object {
            if excluded.contains(object_id) {
                continue;
            }
            for b in blocks {
                by_stream.entry(b.stream_id()).or_default().push(b.clone());
            }
        }
        let mut runs = Vec::new();
        for (stream_id, mut blocks) in by_stream {
            block::sort_by_stream_offset(&mut blocks);
            for group in block::group_by_offset(&blocks) {
                let size = group.iter().map(StreamDataBlock::block_size).sum::<u64>();
                runs.push(Run {
                    stream_id,
                    kind: if size >= self.stream_split_size {
                        CompactionKind::Split
                    } else {
                        CompactionKind::Compact
                    },
                    blocks: group,
                    size,
                });
            }
        }
        runs
    }

    /// Admit runs under the fanout and stream-count ceilings.
    ///
    /// A SPLIT run wider than the cache will straddle plans and emit one
    /// stream object per plan segment, so it reserves that many fanout slots
    /// up front.
    fn admit(&self, runs: Vec<Run>) -> (Vec<Run>, HashSet<u64>) {
        let mut admitted = Vec::with_capacity(runs.len());
        let mut newly_excluded = HashSet::new();
        let mut split_slots = 0usize;
        let mut compact_streams: HashSet<u64> = HashSet::new();
        for run in runs {
            match run.kind {
                CompactionKind::Split => {
                    let slots = run.size.div_ceil(self.compaction_cache_size) as usize;
                    if split_slots + slots <= self.max_stream_object_num_per_commit {
                        split_slots += slots;
                        admitted.push(run);
                    } else {
                        newly_excluded.extend(run.blocks.iter().map(StreamDataBlock::object_id));
                    }
                }
                CompactionKind::Compact => {
                    if compact_streams.contains(&run.stream_id)
                        || compact_streams.len() < self.max_stream_num_per_stream_set_object
                    {
                        compact_streams.insert(run.stream_id);
                        admitted.push(run);
                    } else {
                        newly_excluded.extend(run.blocks.iter().map(StreamDataBlock::object_id));
                    }
                }
            }
        }
        (admitted, newly_excluded)
    }

    /// Pack admitted runs into plans under the cache budget.
    ///
    /// Blocks never span plans. A SPLIT run that fits the cache is kept in a
    /// single plan (closing the current one early if needed) so it yields
    /// exactly one stream object.
    fn pack(&self, admitted: Vec<Run>) -> Vec<CompactionPlan> {
        let cache = self.compaction_cache_size;
        let mut plans = Vec::new();
        let mut current = CompactionPlan::default();
        for run in &admitted {
            if run.kind == CompactionKind::Split
                && run.size <= cache
                && !current.is_empty()
                && current.read_bytes + run.size > cache
            {
                plans.push(std::mem::take(&mut current));
            }
            let mut segment: Vec<StreamDataBlock> = Vec::new();
            for b in &run.blocks {
                if !current.is_empty() && current.read_bytes + b.block_size() > cache {
                    if !segment.is_empty() {
                        current.push_object(run.kind, std::mem::take(&mut segment));
                    }
                    plans.push(std::mem::take(&mut current));
                }
                current.add_block(b);
                segment.push(b.clone());
            }
            if !segment.is_empty() {
                current.push_object(run.kind, segment);
            }
        }
        if !current.is_empty() {
            plans.push(current);
        }
        plans
    }
}
