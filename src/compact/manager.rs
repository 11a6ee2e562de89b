//! Top-level compaction state machine.
//!
//! The manager owns the scheduled run loop: list candidates, index their
//! block layout, filter trimmed data, classify force-split vs compact,
//! execute bounded read iterations, and publish one atomic commit request.
//! Only one run executes at a time per node.

use std::{
    cmp::Reverse,
    collections::{BTreeSet, HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use futures::future::try_join_all;
use tokio::task::JoinHandle;

use crate::{
    compact::{
        CompactionError, MAX_THROTTLE_BYTES_PER_SEC, MIN_COMPACTION_DELAY, S3_OBJECT_MAX_READ_BATCH,
        S3_OBJECT_TTL,
        analyzer::{CompactedObject, CompactionAnalyzer, CompactionKind, CompactionPlan},
        block::{self, StreamDataBlock},
        filter, index,
        reader::DataBlockReader,
        sanity,
        throttle::Throttle,
        uploader::CompactionUploader,
        writer::DataBlockWriter,
    },
    config::CompactionConfig,
    metadata::{NOOP_OBJECT_ID, S3ObjectMetadata, StreamMetadata},
    objects::{CommitStreamSetObjectRequest, ObjectManager, StreamObject},
    observability::{log_error, log_info, log_warn},
    storage::ObjectStorage,
    streams::StreamManager,
};

/// Sampling period of the compaction-delay gauge.
const DELAY_SAMPLE_PERIOD: Duration = Duration::from_secs(60);

/// Drives scheduled stream-set object compaction for one node.
pub struct CompactionManager {
    inner: Arc<ManagerInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct ManagerInner {
    config: CompactionConfig,
    object_manager: Arc<dyn ObjectManager>,
    stream_manager: Arc<dyn StreamManager>,
    storage: Arc<dyn ObjectStorage>,
    analyzer: CompactionAnalyzer,
    running: AtomicBool,
    has_remaining_objects: AtomicBool,
    compaction_delay_ms: AtomicI64,
    run_lock: tokio::sync::Mutex<()>,
}

impl CompactionManager {
    /// Build a manager; fails if the configuration is structurally invalid.
    pub fn new(
        config: CompactionConfig,
        object_manager: Arc<dyn ObjectManager>,
        stream_manager: Arc<dyn StreamManager>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Result<Self, CompactionError> {
        config.validate()?;
        let analyzer = CompactionAnalyzer::new(
            config.compaction_cache_size,
            config.stream_split_size,
            config.max_stream_num_per_stream_set_object,
            config.max_stream_object_num_per_commit,
        );
        log_info!(
            component = "compaction",
            event = "compaction_manager_initialized",
            node_id = config.node_id,
            compaction_interval_secs = config.compaction_interval.as_secs(),
            compaction_cache_size = config.compaction_cache_size,
            stream_split_size = config.stream_split_size,
            force_split_period_secs = config.force_split_object_period.as_secs(),
            max_object_num = config.max_object_num_to_compact,
            max_stream_num = config.max_stream_num_per_stream_set_object,
            max_stream_object_num = config.max_stream_object_num_per_commit,
        );
        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                object_manager,
                stream_manager,
                storage,
                analyzer,
                running: AtomicBool::new(true),
                has_remaining_objects: AtomicBool::new(false),
                compaction_delay_ms: AtomicI64::new(0),
                run_lock: tokio::sync::Mutex::new(()),
            }),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Schedule the first run after one compaction interval and start the
    /// delay-gauge sampler.
    pub fn start(&self) {
        let scheduler = tokio::spawn(scheduler_loop(Arc::clone(&self.inner)));
        let sampler = tokio::spawn(delay_sampler(Arc::clone(&self.inner)));
        self.tasks
            .lock()
            .expect("task list mutex should not be poisoned")
            .extend([scheduler, sampler]);
        log_info!(
            component = "compaction",
            event = "compaction_manager_started",
            first_run_in_secs = self.inner.config.compaction_interval.as_secs(),
        );
    }

    /// Run one full compaction immediately.
    ///
    /// Runs are serialized with the scheduler; a concurrent call waits for
    /// the in-flight run to finish first.
    pub async fn compact(&self) -> Result<(), CompactionError> {
        self.inner.run_once().await
    }

    /// Force-split every current candidate into per-stream objects,
    /// regardless of age. Per-object failures are logged and skipped.
    pub async fn force_split_all(&self) -> Result<(), CompactionError> {
        let inner = &self.inner;
        let _guard = inner.run_lock.lock().await;
        if !inner.running.load(Ordering::Acquire) {
            return Err(CompactionError::Shutdown);
        }
        let candidates = inner.object_manager.get_server_objects().await?;
        if candidates.is_empty() {
            log_info!(component = "compaction", event = "force_split_no_candidates");
            return Ok(());
        }
        let mut blocks_by_object = index::fetch_block_indices(&inner.storage, &candidates).await?;
        let stream_ids = filter::collect_stream_ids(&blocks_by_object);
        let streams = inner.stream_manager.get_streams(&stream_ids).await?;
        filter::filter_invalid_blocks(&streams, &mut blocks_by_object);
        inner
            .force_split_objects(&streams, &candidates, &blocks_by_object, None)
            .await;
        Ok(())
    }

    /// Whether the last run left candidates behind (capped, or excluded by
    /// the planner ceilings); the scheduler reacts with a quick re-run.
    pub fn has_remaining_objects(&self) -> bool {
        self.inner.has_remaining_objects.load(Ordering::Acquire)
    }

    /// Age of the oldest uncompacted candidate, as last sampled.
    pub fn compaction_delay(&self) -> Duration {
        Duration::from_millis(self.inner.compaction_delay_ms.load(Ordering::Acquire).max(0) as u64)
    }

    /// Stop scheduling and cancel in-flight work. Idempotent.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            log_warn!(component = "compaction", event = "already_shut_down");
            return;
        }
        log_info!(component = "compaction", event = "shutting_down");
        for task in self
            .tasks
            .lock()
            .expect("task list mutex should not be poisoned")
            .drain(..)
        {
            task.abort();
        }
        log_info!(component = "compaction", event = "shutdown_complete");
    }
}

impl Drop for CompactionManager {
    fn drop(&mut self) {
        for task in self
            .tasks
            .lock()
            .expect("task list mutex should not be poisoned")
            .drain(..)
        {
            task.abort();
        }
    }
}

async fn scheduler_loop(inner: Arc<ManagerInner>) {
    let interval = inner.config.compaction_interval;
    let mut delay = interval;
    loop {
        tokio::time::sleep(delay).await;
        if !inner.running.load(Ordering::Acquire) {
            return;
        }
        log_info!(component = "compaction", event = "compaction_started");
        let started = Instant::now();
        match inner.run_once().await {
            Ok(()) => log_info!(
                component = "compaction",
                event = "compaction_complete",
                cost_ms = started.elapsed().as_millis() as u64,
            ),
            Err(err) => log_error!(
                component = "compaction",
                event = "compaction_failed",
                cost_ms = started.elapsed().as_millis() as u64,
                error = ?err,
            ),
        }
        delay = if inner.has_remaining_objects.swap(false, Ordering::AcqRel) {
            MIN_COMPACTION_DELAY
        } else {
            interval
                .saturating_sub(started.elapsed())
                .max(MIN_COMPACTION_DELAY)
        };
        log_info!(
            component = "compaction",
            event = "next_compaction_scheduled",
            delay_ms = delay.as_millis() as u64,
        );
    }
}

/// Records the age of the oldest uncompacted candidate once a minute.
async fn delay_sampler(inner: Arc<ManagerInner>) {
    tokio::time::sleep(inner.config.compaction_interval * 2).await;
    loop {
        if !inner.running.load(Ordering::Acquire) {
            return;
        }
        match inner.object_manager.get_server_objects().await {
            Ok(objects) => {
                let delay = objects
                    .iter()
                    .map(S3ObjectMetadata::committed_timestamp_ms)
                    .min()
                    .map_or(0, |oldest| now_ms().saturating_sub(oldest));
                inner.compaction_delay_ms.store(delay, Ordering::Release);
            }
            Err(err) => log_error!(
                component = "compaction",
                event = "delay_sample_failed",
                error = ?err,
            ),
        }
        tokio::time::sleep(DELAY_SAMPLE_PERIOD).await;
    }
}

impl ManagerInner {
    async fn run_once(&self) -> Result<(), CompactionError> {
        let _guard = self.run_lock.lock().await;
        if !self.running.load(Ordering::Acquire) {
            return Err(CompactionError::Shutdown);
        }
        let mut candidates = self.object_manager.get_server_objects().await?;
        log_info!(
            component = "compaction",
            event = "candidates_listed",
            count = candidates.len(),
        );
        if candidates.is_empty() {
            return Ok(());
        }

        let mut blocks_by_object = index::fetch_block_indices(&self.storage, &candidates).await?;
        filter::check_block_sizes(&blocks_by_object, self.config.compaction_cache_size)?;
        let stream_ids = filter::collect_stream_ids(&blocks_by_object);
        let streams = self.stream_manager.get_streams(&stream_ids).await?;
        filter::filter_invalid_blocks(&streams, &mut blocks_by_object);

        if candidates.len() > self.config.max_object_num_to_compact {
            let total = candidates.len();
            candidates.sort_by_key(|metadata| Reverse(metadata.data_time_ms()));
            candidates.truncate(self.config.max_object_num_to_compact);
            self.has_remaining_objects.store(true, Ordering::Release);
            log_info!(
                component = "compaction",
                event = "candidates_capped",
                kept = candidates.len(),
                total,
            );
        }
        let now = now_ms();
        let (to_force_split, to_compact) =
            partition_by_age(candidates, self.config.force_split_object_period, now);

        let total_size: u64 = to_force_split
            .iter()
            .chain(&to_compact)
            .map(S3ObjectMetadata::object_size)
            .sum();
        let throttle = build_throttle(self.config.compaction_interval, total_size);

        if !to_force_split.is_empty() {
            self.force_split_objects(&streams, &to_force_split, &blocks_by_object, throttle.clone())
                .await;
        }
        self.compact_objects(&streams, &to_compact, &blocks_by_object, throttle)
            .await
    }

    async fn compact_objects(
        &self,
        streams: &[StreamMetadata],
        to_compact: &[S3ObjectMetadata],
        blocks_by_object: &HashMap<u64, Vec<StreamDataBlock>>,
        throttle: Option<Arc<Throttle>>,
    ) -> Result<(), CompactionError> {
        if to_compact.is_empty() {
            return Ok(());
        }
        log_info!(
            component = "compaction",
            event = "compact_candidates_selected",
            count = to_compact.len(),
            total_bytes = to_compact.iter().map(S3ObjectMetadata::object_size).sum::<u64>(),
        );
        let started = Instant::now();
        let Some(request) = self
            .build_compact_request(streams, to_compact, blocks_by_object, throttle)
            .await?
        else {
            return Ok(());
        };
        if !self.running.load(Ordering::Acquire) {
            return Err(CompactionError::Cancelled);
        }
        if request.compacted_object_ids.is_empty() {
            log_info!(component = "compaction", event = "nothing_to_compact");
            return Ok(());
        }
        log_info!(
            component = "compaction",
            event = "compact_request_built",
            compacted_objects = request.compacted_object_ids.len(),
            stream_set_object_id = request.object_id,
            stream_set_object_size = request.object_size,
            stream_object_count = request.stream_objects.len(),
            cost_ms = started.elapsed().as_millis() as u64,
        );
        self.commit(request, "compact").await
    }

    async fn commit(
        &self,
        request: CommitStreamSetObjectRequest,
        phase: &'static str,
    ) -> Result<(), CompactionError> {
        let started = Instant::now();
        match self
            .object_manager
            .commit_stream_set_object(request.clone())
            .await
        {
            Ok(()) => {
                log_info!(
                    component = "compaction",
                    event = "commit_succeeded",
                    phase,
                    cost_ms = started.elapsed().as_millis() as u64,
                );
                log_info!(
                    component = "s3_object",
                    event = "s3_object_audit",
                    audit = "COMPACT",
                    request = ?request,
                );
                Ok(())
            }
            Err(err) => {
                log_error!(
                    component = "compaction",
                    event = "commit_failed",
                    phase,
                    error = ?err,
                );
                Err(err.into())
            }
        }
    }

    async fn build_compact_request(
        &self,
        streams: &[StreamMetadata],
        to_compact: &[S3ObjectMetadata],
        blocks_by_object: &HashMap<u64, Vec<StreamDataBlock>>,
        throttle: Option<Arc<Throttle>>,
    ) -> Result<Option<CommitStreamSetObjectRequest>, CompactionError> {
        let map_to_compact: HashMap<u64, Vec<StreamDataBlock>> = to_compact
            .iter()
            .filter_map(|metadata| {
                blocks_by_object
                    .get(&metadata.object_id())
                    .map(|blocks| (metadata.object_id(), blocks.clone()))
            })
            .collect();

        let planned = Instant::now();
        let mut excluded = HashSet::new();
        let plans = self.analyzer.analyze(&map_to_compact, &mut excluded);
        log_plans(&plans, &excluded, planned.elapsed());
        if !excluded.is_empty() {
            self.has_remaining_objects.store(true, Ordering::Release);
        }
        let candidates: Vec<S3ObjectMetadata> = to_compact
            .iter()
            .filter(|metadata| !excluded.contains(&metadata.object_id()))
            .cloned()
            .collect();

        let mut request = CommitStreamSetObjectRequest {
            object_id: NOOP_OBJECT_ID,
            ..Default::default()
        };
        self.execute_compaction_plans(&mut request, &plans, &candidates, throttle)
            .await?;
        if !self.running.load(Ordering::Acquire) {
            return Err(CompactionError::Cancelled);
        }

        let mut compacted: BTreeSet<u64> = plans
            .iter()
            .flat_map(|plan| plan.blocks_by_object().keys().copied())
            .collect();
        for (object_id, blocks) in &map_to_compact {
            if blocks.is_empty() && !excluded.contains(object_id) {
                log_info!(
                    component = "compaction",
                    event = "object_out_of_date",
                    object_id = *object_id,
                );
                compacted.insert(*object_id);
            }
        }
        if compacted.is_empty() {
            return Ok(None);
        }
        request.order_id = compacted.first().copied().unwrap_or(NOOP_OBJECT_ID);
        request.compacted_object_ids = compacted.into_iter().collect();
        sanity::verify(streams, &request, blocks_by_object)?;
        Ok(Some(request))
    }

    /// Execute plans in order: one throttled read pass per plan, then SPLIT
    /// writes in parallel with the chained stream-set append.
    async fn execute_compaction_plans(
        &self,
        request: &mut CommitStreamSetObjectRequest,
        plans: &[CompactionPlan],
        candidates: &[S3ObjectMetadata],
        throttle: Option<Arc<Throttle>>,
    ) -> Result<(), CompactionError> {
        if plans.is_empty() {
            return Ok(());
        }
        let metadata_by_id: HashMap<u64, &S3ObjectMetadata> = candidates
            .iter()
            .map(|metadata| (metadata.object_id(), metadata))
            .collect();
        let max_batch = S3_OBJECT_MAX_READ_BATCH.min(self.config.network_baseline_bandwidth);
        let mut uploader = CompactionUploader::new(
            Arc::clone(&self.object_manager),
            Arc::clone(&self.storage),
            self.config.object_part_size,
        );
        let mut sorted_blocks: Vec<StreamDataBlock> = Vec::new();

        for (iteration, plan) in plans.iter().enumerate() {
            if !self.running.load(Ordering::Acquire) {
                release_plan_payloads(plan);
                uploader.release().await;
                return Err(CompactionError::Cancelled);
            }
            log_info!(
                component = "compaction",
                event = "plan_started",
                iteration = iteration + 1,
                total = plans.len(),
                source_objects = plan.blocks_by_object().len(),
                read_bytes = plan.read_bytes(),
            );

            let mut reads = Vec::with_capacity(plan.blocks_by_object().len());
            for (object_id, blocks) in plan.blocks_by_object() {
                let Some(metadata) = metadata_by_id.get(object_id) else {
                    uploader.release().await;
                    return Err(CompactionError::SanityCheckFailed(
                        "plan references an unknown source object",
                    ));
                };
                let reader = DataBlockReader::new(
                    (*metadata).clone(),
                    Arc::clone(&self.storage),
                    throttle.clone(),
                );
                reads.push(async move { reader.read_blocks(blocks, max_batch).await });
            }
            if let Err(err) = try_join_all(reads).await {
                log_error!(
                    component = "compaction",
                    event = "plan_read_failed",
                    iteration = iteration + 1,
                    error = ?err,
                );
                release_plan_payloads(plan);
                uploader.release().await;
                return Err(err);
            }

            let split_uploader = uploader.stream_object_uploader();
            let splits: Vec<&CompactedObject> = plan
                .compacted_objects()
                .iter()
                .filter(|object| object.kind() == CompactionKind::Split)
                .collect();
            let compacts: Vec<&CompactedObject> = plan
                .compacted_objects()
                .iter()
                .filter(|object| object.kind() == CompactionKind::Compact)
                .collect();
            for object in &compacts {
                sorted_blocks.extend(object.blocks().iter().cloned());
            }

            let split_writes = try_join_all(
                splits
                    .iter()
                    .map(|object| split_uploader.write_stream_object(object)),
            );
            let chain_writes = async {
                for object in &compacts {
                    uploader.chain_write_stream_set_object(object).await?;
                }
                Ok::<(), CompactionError>(())
            };
            let (split_result, chain_result) = tokio::join!(split_writes, chain_writes);
            let failure = match (split_result, chain_result) {
                (Ok(stream_objects), Ok(())) => {
                    request.stream_objects.extend(stream_objects);
                    None
                }
                (Err(err), _) | (_, Err(err)) => Some(err),
            };
            if let Some(err) = failure {
                log_error!(
                    component = "compaction",
                    event = "plan_upload_failed",
                    iteration = iteration + 1,
                    error = ?err,
                );
                release_plan_payloads(plan);
                uploader.release().await;
                return Err(err);
            }
            debug_assert_plan_released(plan);
        }

        request.object_size = uploader.complete().await?;
        request.object_id = uploader.stream_set_object_id();
        request.stream_ranges = block::build_stream_ranges(&sorted_blocks);
        Ok(())
    }

    /// Force-split each object into per-stream objects. Errors are isolated:
    /// a failing object is skipped and the remaining candidates proceed.
    async fn force_split_objects(
        &self,
        streams: &[StreamMetadata],
        objects: &[S3ObjectMetadata],
        blocks_by_object: &HashMap<u64, Vec<StreamDataBlock>>,
        throttle: Option<Arc<Throttle>>,
    ) {
        log_info!(
            component = "compaction",
            event = "force_split_started",
            count = objects.len(),
        );
        for (i, metadata) in objects.iter().enumerate() {
            if !self.running.load(Ordering::Acquire) {
                log_info!(component = "compaction", event = "force_split_aborted");
                return;
            }
            let started = Instant::now();
            log_info!(
                component = "compaction",
                event = "force_split_progress",
                current = i + 1,
                total = objects.len(),
                object_id = metadata.object_id(),
                object_size = metadata.object_size(),
            );
            let request = match self
                .build_split_request(streams, metadata, blocks_by_object, throttle.clone())
                .await
            {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(err) => {
                    log_error!(
                        component = "compaction",
                        event = "force_split_failed",
                        object_id = metadata.object_id(),
                        error = ?err,
                    );
                    continue;
                }
            };
            log_info!(
                component = "compaction",
                event = "split_request_built",
                object_id = metadata.object_id(),
                stream_object_count = request.stream_objects.len(),
                cost_ms = started.elapsed().as_millis() as u64,
            );
            if let Err(err) = self.commit(request, "force_split").await {
                log_error!(
                    component = "compaction",
                    event = "force_split_commit_failed",
                    object_id = metadata.object_id(),
                    error = ?err,
                );
            }
        }
    }

    async fn build_split_request(
        &self,
        streams: &[StreamMetadata],
        metadata: &S3ObjectMetadata,
        blocks_by_object: &HashMap<u64, Vec<StreamDataBlock>>,
        throttle: Option<Arc<Throttle>>,
    ) -> Result<Option<CommitStreamSetObjectRequest>, CompactionError> {
        let Some(blocks) = blocks_by_object.get(&metadata.object_id()) else {
            return Ok(None);
        };
        let mut request = CommitStreamSetObjectRequest {
            object_id: NOOP_OBJECT_ID,
            order_id: metadata.object_id(),
            compacted_object_ids: vec![metadata.object_id()],
            ..Default::default()
        };
        if blocks.is_empty() {
            log_info!(
                component = "compaction",
                event = "object_out_of_date",
                object_id = metadata.object_id(),
            );
            return Ok(Some(request));
        }
        request.stream_objects = self.split_object(metadata, blocks, throttle).await?;
        sanity::verify(streams, &request, blocks_by_object)?;
        Ok(Some(request))
    }

    /// Rewrite one object's contiguous runs as per-stream objects, batching
    /// reads under the cache budget.
    async fn split_object(
        &self,
        metadata: &S3ObjectMetadata,
        blocks: &[StreamDataBlock],
        throttle: Option<Arc<Throttle>>,
    ) -> Result<Vec<StreamObject>, CompactionError> {
        let mut sorted = blocks.to_vec();
        block::sort_by_stream_offset(&mut sorted);
        let runs = block::group_by_offset(&sorted);
        log_info!(
            component = "compaction",
            event = "force_split_planned",
            object_id = metadata.object_id(),
            stream_object_count = runs.len(),
        );
        let cache = self.config.compaction_cache_size;
        let max_batch = S3_OBJECT_MAX_READ_BATCH.min(self.config.network_baseline_bandwidth);
        let mut stream_objects = Vec::with_capacity(runs.len());

        let mut idx = 0;
        while idx < runs.len() {
            let mut batch: Vec<&Vec<StreamDataBlock>> = Vec::new();
            let mut read_size = 0u64;
            while idx < runs.len() {
                let run = &runs[idx];
                let span = run[run.len() - 1].block_end_position() - run[0].block_start_position();
                if read_size + span > cache {
                    break;
                }
                read_size += span;
                batch.push(run);
                idx += 1;
            }
            if batch.is_empty() {
                let run = &runs[idx];
                let span = run[run.len() - 1].block_end_position() - run[0].block_start_position();
                return Err(CompactionError::Unsplittable {
                    run_size: span,
                    cache,
                });
            }

            let first_id = self
                .object_manager
                .prepare_object(batch.len(), S3_OBJECT_TTL)
                .await?;
            let to_read: Vec<StreamDataBlock> =
                batch.iter().flat_map(|run| run.iter().cloned()).collect();
            let reader = DataBlockReader::new(
                metadata.clone(),
                Arc::clone(&self.storage),
                throttle.clone(),
            );
            if let Err(err) = reader.read_blocks(&to_read, max_batch).await {
                release_blocks(&to_read);
                return Err(err);
            }

            let writes = batch.iter().enumerate().map(|(k, run)| {
                let object_id = first_id + k as u64;
                let storage = Arc::clone(&self.storage);
                let part_size = self.config.object_part_size;
                async move {
                    let mut writer =
                        DataBlockWriter::open(storage.as_ref(), object_id, part_size).await?;
                    for block in run.iter() {
                        if let Err(err) = writer.write(block).await {
                            writer.abort().await;
                            return Err(err);
                        }
                    }
                    let object_size = writer.close().await?;
                    Ok(StreamObject {
                        object_id,
                        stream_id: run[0].stream_id(),
                        start_offset: run[0].start_offset(),
                        end_offset: run[run.len() - 1].end_offset(),
                        object_size,
                    })
                }
            });
            match try_join_all(writes).await {
                Ok(objects) => stream_objects.extend(objects),
                Err(err) => {
                    release_blocks(&to_read);
                    return Err(err);
                }
            }
        }
        Ok(stream_objects)
    }
}

/// Partition candidates into (force-split, compact) by data age.
fn partition_by_age(
    candidates: Vec<S3ObjectMetadata>,
    force_split_period: Duration,
    now_ms: i64,
) -> (Vec<S3ObjectMetadata>, Vec<S3ObjectMetadata>) {
    let threshold = force_split_period.as_millis() as i64;
    candidates
        .into_iter()
        .partition(|metadata| now_ms.saturating_sub(metadata.data_time_ms()) >= threshold)
}

/// Size the per-run token bucket so reads finish one minute ahead of the
/// next scheduled run. The `target_secs` floor is kept so tiny workloads do
/// not degenerate into a zero-rate bucket.
fn build_throttle(interval: Duration, total_bytes: u64) -> Option<Arc<Throttle>> {
    let target_minutes = (interval.as_secs() / 60).saturating_sub(1).max(1);
    let target_secs = target_minutes * 60;
    let rate = target_secs.max(total_bytes / target_secs);
    if rate < MAX_THROTTLE_BYTES_PER_SEC {
        log_info!(
            component = "compaction",
            event = "throttle_installed",
            bytes_per_sec = rate,
            target_complete_minutes = target_minutes,
        );
        Some(Arc::new(Throttle::new(rate)))
    } else {
        log_warn!(
            component = "compaction",
            event = "throttle_disabled",
            bytes_per_sec = rate,
        );
        None
    }
}

fn log_plans(plans: &[CompactionPlan], excluded: &HashSet<u64>, cost: Duration) {
    if plans.is_empty() {
        log_info!(component = "compaction", event = "no_compaction_plans");
        return;
    }
    let stream_object_num = plans
        .iter()
        .flat_map(CompactionPlan::compacted_objects)
        .filter(|object| object.kind() == CompactionKind::Split)
        .count();
    let stream_set_object_size: u64 = plans
        .iter()
        .flat_map(CompactionPlan::compacted_objects)
        .filter(|object| object.kind() == CompactionKind::Compact)
        .map(CompactedObject::size)
        .sum();
    log_info!(
        component = "compaction",
        event = "plans_built",
        iterations = plans.len(),
        stream_object_num,
        stream_set_object_num = u64::from(stream_set_object_size > 0),
        stream_set_object_size,
        excluded_objects = excluded.len(),
        cost_ms = cost.as_millis() as u64,
    );
}

fn release_plan_payloads(plan: &CompactionPlan) {
    for blocks in plan.blocks_by_object().values() {
        release_blocks(blocks);
    }
}

fn release_blocks(blocks: &[StreamDataBlock]) {
    for block in blocks {
        let _ = block.payload().take();
    }
}

fn debug_assert_plan_released(plan: &CompactionPlan) {
    if !cfg!(debug_assertions) {
        return;
    }
    for blocks in plan.blocks_by_object().values() {
        for block in blocks {
            debug_assert!(
                !block.payload().is_filled(),
                "block payload leaked past its iteration (object {})",
                block.object_id()
            );
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
