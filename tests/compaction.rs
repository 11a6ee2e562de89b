//! End-to-end compaction scenarios over the in-memory object store.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use bytes::BytesMut;
use umi::{
    CompactionConfig, CompactionError, CompactionManager,
    compact::index::{IndexEntry, encode_index_and_footer},
    metadata::{NOOP_OBJECT_ID, S3ObjectMetadata, StreamMetadata, StreamOffsetRange},
    objects::{CommitStreamSetObjectRequest, ObjectManager, ObjectManagerError},
    storage::{InMemoryObjectStorage, ObjectStorage},
    streams::{StreamManager, StreamManagerError},
};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_millis() as i64
}

struct StubObjectManager {
    objects: Mutex<Vec<S3ObjectMetadata>>,
    next_id: AtomicU64,
    commits: Mutex<Vec<CommitStreamSetObjectRequest>>,
    fail_commit: AtomicBool,
}

impl StubObjectManager {
    fn new(objects: Vec<S3ObjectMetadata>) -> Arc<Self> {
        Arc::new(Self {
            objects: Mutex::new(objects),
            next_id: AtomicU64::new(1000),
            commits: Mutex::new(Vec::new()),
            fail_commit: AtomicBool::new(false),
        })
    }

    fn commits(&self) -> Vec<CommitStreamSetObjectRequest> {
        self.commits.lock().expect("commit list").clone()
    }
}

#[async_trait]
impl ObjectManager for StubObjectManager {
    async fn get_server_objects(&self) -> Result<Vec<S3ObjectMetadata>, ObjectManagerError> {
        Ok(self.objects.lock().expect("object list").clone())
    }

    async fn prepare_object(
        &self,
        count: usize,
        _ttl: Duration,
    ) -> Result<u64, ObjectManagerError> {
        Ok(self.next_id.fetch_add(count as u64, Ordering::SeqCst))
    }

    async fn commit_stream_set_object(
        &self,
        request: CommitStreamSetObjectRequest,
    ) -> Result<(), ObjectManagerError> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(ObjectManagerError::CommitRejected("injected".into()));
        }
        self.commits.lock().expect("commit list").push(request);
        Ok(())
    }
}

struct StubStreamManager {
    streams: Vec<StreamMetadata>,
}

#[async_trait]
impl StreamManager for StubStreamManager {
    async fn get_streams(
        &self,
        stream_ids: &[u64],
    ) -> Result<Vec<StreamMetadata>, StreamManagerError> {
        Ok(self
            .streams
            .iter()
            .filter(|stream| stream_ids.contains(&stream.stream_id()))
            .copied()
            .collect())
    }
}

/// Write a stream-set object whose blocks are `(stream_id, start, end)`
/// triples; each block's byte size equals its offset width. Returns the
/// stored object size.
async fn put_stream_set_object(
    storage: &InMemoryObjectStorage,
    object_id: u64,
    blocks: &[(u64, u64, u64)],
) -> u64 {
    let mut data = BytesMut::new();
    let mut entries = Vec::new();
    let mut position = 0u64;
    for &(stream_id, start, end) in blocks {
        let size = (end - start) as usize;
        data.extend(std::iter::repeat((object_id % 251) as u8).take(size));
        entries.push(IndexEntry {
            stream_id,
            start_offset: start,
            end_offset: end,
            position,
            size: size as u32,
        });
        position += size as u64;
    }
    let mut writer = storage.writer(object_id).await.expect("writer");
    writer.write_part(data.freeze()).await.expect("data");
    writer
        .write_part(encode_index_and_footer(&entries, position))
        .await
        .expect("index");
    writer.close().await.expect("close")
}

struct Harness {
    storage: InMemoryObjectStorage,
    object_manager: Arc<StubObjectManager>,
    manager: CompactionManager,
}

impl Harness {
    fn build(
        config: CompactionConfig,
        objects: Vec<S3ObjectMetadata>,
        streams: Vec<StreamMetadata>,
        storage: InMemoryObjectStorage,
    ) -> Self {
        let object_manager = StubObjectManager::new(objects);
        let stream_manager = Arc::new(StubStreamManager { streams });
        let manager = CompactionManager::new(
            config,
            Arc::clone(&object_manager) as Arc<dyn ObjectManager>,
            stream_manager,
            Arc::new(storage.clone()),
        )
        .expect("manager");
        Self {
            storage,
            object_manager,
            manager,
        }
    }
}

fn test_config() -> CompactionConfig {
    CompactionConfig::new(1)
        .with_compaction_interval(Duration::from_secs(20 * 60))
        .with_force_split_object_period(Duration::from_secs(120 * 60))
        .with_compaction_cache_size(64 * 1024)
        .with_stream_split_size(10_000)
        .with_object_part_size(1024)
}

#[tokio::test]
async fn single_small_object_compacts_into_one_stream_set_object() {
    let storage = InMemoryObjectStorage::new(0);
    let size = put_stream_set_object(&storage, 1, &[(1, 0, 100), (1, 100, 200)]).await;
    let now = now_ms();
    let harness = Harness::build(
        test_config(),
        vec![S3ObjectMetadata::new(1, size, now, now, 0)],
        vec![StreamMetadata::new(1, 0)],
        storage,
    );

    harness.manager.compact().await.expect("compact");

    let commits = harness.object_manager.commits();
    assert_eq!(commits.len(), 1);
    let request = &commits[0];
    assert_eq!(request.object_id, 1000);
    assert_eq!(request.order_id, 1);
    assert_eq!(request.compacted_object_ids, vec![1]);
    assert!(request.stream_objects.is_empty());
    assert_eq!(request.stream_ranges, vec![StreamOffsetRange::new(1, 0, 200)]);
    // the new stream-set object is on storage at its reported size
    assert_eq!(harness.storage.object_size(1000), Some(request.object_size));
}

#[tokio::test]
async fn aged_object_is_force_split_into_stream_objects() {
    let storage = InMemoryObjectStorage::new(0);
    let size = put_stream_set_object(&storage, 1, &[(1, 0, 100), (1, 100, 200)]).await;
    let now = now_ms();
    let aged = now - Duration::from_secs(121 * 60).as_millis() as i64;
    let harness = Harness::build(
        test_config(),
        vec![S3ObjectMetadata::new(1, size, aged, aged, 0)],
        vec![StreamMetadata::new(1, 0)],
        storage,
    );

    harness.manager.compact().await.expect("compact");

    let commits = harness.object_manager.commits();
    assert_eq!(commits.len(), 1);
    let request = &commits[0];
    assert_eq!(request.object_id, NOOP_OBJECT_ID);
    assert!(request.stream_ranges.is_empty());
    assert_eq!(request.compacted_object_ids, vec![1]);
    assert_eq!(request.stream_objects.len(), 1);
    let stream_object = &request.stream_objects[0];
    assert_eq!(stream_object.stream_id, 1);
    assert_eq!(stream_object.start_offset, 0);
    assert_eq!(stream_object.end_offset, 200);
    // the split carried the source bytes across
    let data = harness
        .storage
        .range_read(stream_object.object_id, 0..200)
        .await
        .expect("output data");
    assert!(data.iter().all(|byte| *byte == 1));
}

#[tokio::test]
async fn interleaved_streams_merge_across_objects() {
    let storage = InMemoryObjectStorage::new(0);
    let size_a = put_stream_set_object(&storage, 1, &[(1, 0, 50), (2, 0, 50)]).await;
    let size_b = put_stream_set_object(&storage, 2, &[(1, 50, 100), (2, 50, 100)]).await;
    let now = now_ms();
    let harness = Harness::build(
        test_config(),
        vec![
            S3ObjectMetadata::new(1, size_a, now, now, 0),
            S3ObjectMetadata::new(2, size_b, now, now, 0),
        ],
        vec![StreamMetadata::new(1, 0), StreamMetadata::new(2, 0)],
        storage,
    );

    harness.manager.compact().await.expect("compact");

    let commits = harness.object_manager.commits();
    assert_eq!(commits.len(), 1);
    let request = &commits[0];
    assert_eq!(
        request.stream_ranges,
        vec![
            StreamOffsetRange::new(1, 0, 100),
            StreamOffsetRange::new(2, 0, 100),
        ]
    );
    assert_eq!(request.compacted_object_ids, vec![1, 2]);
    assert_eq!(request.order_id, 1);
}

#[tokio::test]
async fn read_budget_splits_iterations_but_not_the_output() {
    let storage = InMemoryObjectStorage::new(0);
    let size = put_stream_set_object(&storage, 1, &[(1, 0, 100), (2, 0, 100)]).await;
    let now = now_ms();
    let config = test_config()
        .with_compaction_cache_size(120)
        .with_stream_split_size(110);
    let harness = Harness::build(
        config,
        vec![S3ObjectMetadata::new(1, size, now, now, 0)],
        vec![StreamMetadata::new(1, 0), StreamMetadata::new(2, 0)],
        storage,
    );

    harness.manager.compact().await.expect("compact");

    let commits = harness.object_manager.commits();
    assert_eq!(commits.len(), 1);
    let request = &commits[0];
    // both streams land in the single rewritten stream-set object
    assert_ne!(request.object_id, NOOP_OBJECT_ID);
    assert_eq!(
        request.stream_ranges,
        vec![
            StreamOffsetRange::new(1, 0, 100),
            StreamOffsetRange::new(2, 0, 100),
        ]
    );
}

#[tokio::test]
async fn trimmed_source_is_retired_without_output() {
    let storage = InMemoryObjectStorage::new(0);
    let size = put_stream_set_object(&storage, 1, &[(1, 0, 50)]).await;
    let now = now_ms();
    let harness = Harness::build(
        test_config(),
        vec![S3ObjectMetadata::new(1, size, now, now, 0)],
        vec![StreamMetadata::new(1, 50)],
        storage,
    );

    harness.manager.compact().await.expect("compact");

    let commits = harness.object_manager.commits();
    assert_eq!(commits.len(), 1);
    let request = &commits[0];
    assert_eq!(request.object_id, NOOP_OBJECT_ID);
    assert!(request.stream_ranges.is_empty());
    assert!(request.stream_objects.is_empty());
    assert_eq!(request.compacted_object_ids, vec![1]);
}

#[tokio::test]
async fn fanout_cap_defers_excess_split_sources() {
    let storage = InMemoryObjectStorage::new(0);
    let now = now_ms();
    let mut objects = Vec::new();
    for id in 1u64..=5 {
        let size = put_stream_set_object(&storage, id, &[(id, 0, 500)]).await;
        objects.push(S3ObjectMetadata::new(id, size, now, now, 0));
    }
    let config = test_config()
        .with_stream_split_size(400)
        .with_max_stream_object_num_per_commit(2);
    let streams = (1u64..=5).map(|id| StreamMetadata::new(id, 0)).collect();
    let harness = Harness::build(config, objects, streams, storage);

    harness.manager.compact().await.expect("compact");

    let commits = harness.object_manager.commits();
    assert_eq!(commits.len(), 1);
    let request = &commits[0];
    assert_eq!(request.stream_objects.len(), 2);
    assert_eq!(request.compacted_object_ids.len(), 2);
    // deferred sources are neither deleted nor rewritten
    for id in request.compacted_object_ids.iter() {
        assert!(request.stream_objects.iter().any(|o| o.stream_id == *id));
    }
    assert!(harness.manager.has_remaining_objects());
}

#[tokio::test]
async fn empty_candidate_set_is_a_no_op() {
    let harness = Harness::build(
        test_config(),
        Vec::new(),
        Vec::new(),
        InMemoryObjectStorage::new(0),
    );
    harness.manager.compact().await.expect("compact");
    assert!(harness.object_manager.commits().is_empty());
    assert!(!harness.manager.has_remaining_objects());
}

#[tokio::test]
async fn force_split_all_splits_young_objects_too() {
    let storage = InMemoryObjectStorage::new(0);
    let size_a = put_stream_set_object(&storage, 1, &[(1, 0, 100), (2, 0, 50)]).await;
    let size_b = put_stream_set_object(&storage, 2, &[(3, 0, 80)]).await;
    let now = now_ms();
    let harness = Harness::build(
        test_config(),
        vec![
            S3ObjectMetadata::new(1, size_a, now, now, 0),
            S3ObjectMetadata::new(2, size_b, now, now, 0),
        ],
        vec![
            StreamMetadata::new(1, 0),
            StreamMetadata::new(2, 0),
            StreamMetadata::new(3, 0),
        ],
        storage,
    );

    harness.manager.force_split_all().await.expect("force split");

    let commits = harness.object_manager.commits();
    assert_eq!(commits.len(), 2);
    // one commit per source object, each all-SPLIT
    for request in &commits {
        assert_eq!(request.object_id, NOOP_OBJECT_ID);
        assert!(request.stream_ranges.is_empty());
        assert_eq!(request.compacted_object_ids.len(), 1);
    }
    assert_eq!(commits[0].stream_objects.len(), 2);
    assert_eq!(commits[1].stream_objects.len(), 1);
}

#[tokio::test]
async fn commit_failure_leaves_the_engine_ready() {
    let storage = InMemoryObjectStorage::new(0);
    let size = put_stream_set_object(&storage, 1, &[(1, 0, 100)]).await;
    let now = now_ms();
    let harness = Harness::build(
        test_config(),
        vec![S3ObjectMetadata::new(1, size, now, now, 0)],
        vec![StreamMetadata::new(1, 0)],
        storage,
    );

    harness
        .object_manager
        .fail_commit
        .store(true, Ordering::SeqCst);
    let err = harness.manager.compact().await.expect_err("commit fails");
    assert!(matches!(err, CompactionError::ObjectManager(_)));

    harness
        .object_manager
        .fail_commit
        .store(false, Ordering::SeqCst);
    harness.manager.compact().await.expect("retry succeeds");
    assert_eq!(harness.object_manager.commits().len(), 1);
}

#[tokio::test]
async fn shutdown_is_idempotent_and_stops_runs() {
    let harness = Harness::build(
        test_config(),
        Vec::new(),
        Vec::new(),
        InMemoryObjectStorage::new(0),
    );
    harness.manager.shutdown();
    harness.manager.shutdown();
    let err = harness.manager.compact().await.expect_err("shut down");
    assert!(matches!(err, CompactionError::Shutdown));
}
