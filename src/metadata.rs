//! Metadata records describing physical objects and logical streams.

/// Object id marking a commit request that carries no stream-set output
/// (e.g. a pure force-split commit).
pub const NOOP_OBJECT_ID: u64 = u64::MAX;

/// Metadata of one physical stream-set object as reported by the metadata
/// manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3ObjectMetadata {
    object_id: u64,
    object_size: u64,
    /// Logical creation time of the data inside the object.
    data_time_ms: i64,
    /// Wall-clock time the object was committed to metadata.
    committed_timestamp_ms: i64,
    bucket: u16,
}

impl S3ObjectMetadata {
    /// Build a metadata record.
    pub fn new(
        object_id: u64,
        object_size: u64,
        data_time_ms: i64,
        committed_timestamp_ms: i64,
        bucket: u16,
    ) -> Self {
        Self {
            object_id,
            object_size,
            data_time_ms,
            committed_timestamp_ms,
            bucket,
        }
    }

    /// Identifier of the object.
    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    /// Total size of the object in bytes.
    pub fn object_size(&self) -> u64 {
        self.object_size
    }

    /// Logical creation time of the contained data, in Unix millis.
    pub fn data_time_ms(&self) -> i64 {
        self.data_time_ms
    }

    /// Commit time in Unix millis.
    pub fn committed_timestamp_ms(&self) -> i64 {
        self.committed_timestamp_ms
    }

    /// Bucket the object lives in.
    pub fn bucket(&self) -> u16 {
        self.bucket
    }
}

/// Live metadata of one logical stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamMetadata {
    stream_id: u64,
    /// Trim watermark; offsets below this are logically deleted.
    start_offset: u64,
}

impl StreamMetadata {
    /// Build a stream record.
    pub fn new(stream_id: u64, start_offset: u64) -> Self {
        Self {
            stream_id,
            start_offset,
        }
    }

    /// Identifier of the stream.
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Current trim watermark.
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }
}

/// A half-open offset interval `[start, end)` of a single stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamOffsetRange {
    stream_id: u64,
    start_offset: u64,
    end_offset: u64,
}

impl StreamOffsetRange {
    /// Build a range. `start_offset` must be strictly below `end_offset`.
    pub fn new(stream_id: u64, start_offset: u64, end_offset: u64) -> Self {
        debug_assert!(start_offset < end_offset);
        Self {
            stream_id,
            start_offset,
            end_offset,
        }
    }

    /// Stream the range belongs to.
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
}
