//! Configuration surface of the compaction core.

use std::time::Duration;

use thiserror::Error;

const DEFAULT_COMPACTION_INTERVAL: Duration = Duration::from_secs(20 * 60);
const DEFAULT_FORCE_SPLIT_PERIOD: Duration = Duration::from_secs(120 * 60);
const DEFAULT_CACHE_SIZE: u64 = 200 * 1024 * 1024;
const DEFAULT_STREAM_SPLIT_SIZE: u64 = 8 * 1024 * 1024;
const DEFAULT_NETWORK_BANDWIDTH: u64 = 100 * 1024 * 1024;
const DEFAULT_PART_SIZE: usize = 16 * 1024 * 1024;

/// Errors raised while validating a [`CompactionConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A numeric option that must be positive was zero.
    #[error("configuration option `{0}` must be greater than zero")]
    Zero(&'static str),
    /// The stream split threshold exceeds the read budget, making SPLIT
    /// outputs impossible to load.
    #[error("stream_split_size {split} exceeds compaction_cache_size {cache}")]
    SplitExceedsCache {
        /// Configured split threshold.
        split: u64,
        /// Configured read budget.
        cache: u64,
    },
}

/// Configure the operating parameters of the compaction core.
///
/// Defaults are sized for a node compacting a few hundred small stream-set
/// objects per run against S3-class storage.
#[derive(Clone, Debug)]
pub struct CompactionConfig {
    /// Node identifier used in log context.
    pub(crate) node_id: u32,

    /// Base period between compaction runs.
    pub(crate) compaction_interval: Duration,

    /// Age threshold after which an object is force-split per stream.
    pub(crate) force_split_object_period: Duration,

    /// Hard cap on the number of candidate objects per run.
    pub(crate) max_object_num_to_compact: usize,

    /// Maximum distinct streams admitted to one output stream-set object.
    pub(crate) max_stream_num_per_stream_set_object: usize,

    /// Maximum stream objects emitted by one commit.
    pub(crate) max_stream_object_num_per_commit: usize,

    /// In-memory read budget per plan iteration, in bytes.
    pub(crate) compaction_cache_size: u64,

    /// SPLIT vs COMPACT threshold for a per-stream run, in bytes.
    pub(crate) stream_split_size: u64,

    /// Baseline network bandwidth capping per-read batch size, bytes/sec.
    pub(crate) network_baseline_bandwidth: u64,

    /// Multipart upload chunk size, in bytes.
    pub(crate) object_part_size: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            compaction_interval: DEFAULT_COMPACTION_INTERVAL,
            force_split_object_period: DEFAULT_FORCE_SPLIT_PERIOD,
            max_object_num_to_compact: 500,
            max_stream_num_per_stream_set_object: 100_000,
            max_stream_object_num_per_commit: 10_000,
            compaction_cache_size: DEFAULT_CACHE_SIZE,
            stream_split_size: DEFAULT_STREAM_SPLIT_SIZE,
            network_baseline_bandwidth: DEFAULT_NETWORK_BANDWIDTH,
            object_part_size: DEFAULT_PART_SIZE,
        }
    }
}

impl CompactionConfig {
    /// Build the default configuration for the given node.
    pub fn new(node_id: u32) -> Self {
        Self {
            node_id,
            ..Self::default()
        }
    }

    /// Set the base period between runs.
    pub fn with_compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    /// Set the age threshold for force-split classification.
    pub fn with_force_split_object_period(mut self, period: Duration) -> Self {
        self.force_split_object_period = period;
        self
    }

    /// Cap the number of candidate objects per run.
    pub fn with_max_object_num_to_compact(mut self, num: usize) -> Self {
        self.max_object_num_to_compact = num;
        self
    }

    /// Cap the distinct streams of the output stream-set object.
    pub fn with_max_stream_num_per_stream_set_object(mut self, num: usize) -> Self {
        self.max_stream_num_per_stream_set_object = num;
        self
    }

    /// Cap the stream objects emitted by one commit.
    pub fn with_max_stream_object_num_per_commit(mut self, num: usize) -> Self {
        self.max_stream_object_num_per_commit = num;
        self
    }

    /// Set the per-iteration read budget in bytes.
    pub fn with_compaction_cache_size(mut self, bytes: u64) -> Self {
        self.compaction_cache_size = bytes;
        self
    }

    /// Set the SPLIT vs COMPACT threshold in bytes.
    pub fn with_stream_split_size(mut self, bytes: u64) -> Self {
        self.stream_split_size = bytes;
        self
    }

    /// Set the baseline network bandwidth in bytes per second.
    pub fn with_network_baseline_bandwidth(mut self, bytes_per_sec: u64) -> Self {
        self.network_baseline_bandwidth = bytes_per_sec;
        self
    }

    /// Set the multipart upload chunk size in bytes.
    pub fn with_object_part_size(mut self, bytes: usize) -> Self {
        self.object_part_size = bytes;
        self
    }

    /// Node identifier used in log context.
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Base period between compaction runs.
    pub fn compaction_interval(&self) -> Duration {
        self.compaction_interval
    }

    /// In-memory read budget per plan iteration.
    pub fn compaction_cache_size(&self) -> u64 {
        self.compaction_cache_size
    }

    /// Check the configuration for structurally impossible settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compaction_interval.is_zero() {
            return Err(ConfigError::Zero("compaction_interval"));
        }
        if self.max_object_num_to_compact == 0 {
            return Err(ConfigError::Zero("max_object_num_to_compact"));
        }
        if self.max_stream_num_per_stream_set_object == 0 {
            return Err(ConfigError::Zero("max_stream_num_per_stream_set_object"));
        }
        if self.max_stream_object_num_per_commit == 0 {
            return Err(ConfigError::Zero("max_stream_object_num_per_commit"));
        }
        if self.compaction_cache_size == 0 {
            return Err(ConfigError::Zero("compaction_cache_size"));
        }
        if self.stream_split_size == 0 {
            return Err(ConfigError::Zero("stream_split_size"));
        }
        if self.network_baseline_bandwidth == 0 {
            return Err(ConfigError::Zero("network_baseline_bandwidth"));
        }
        if self.object_part_size == 0 {
            return Err(ConfigError::Zero("object_part_size"));
        }
        if self.stream_split_size > self.compaction_cache_size {
            return Err(ConfigError::SplitExceedsCache {
                split: self.stream_split_size,
                cache: self.compaction_cache_size,
            });
        }
        Ok(())
    }
}
