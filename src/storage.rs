//! Object-store contracts consumed by the compaction core.
//!
//! The production driver (S3 multipart client, retries, credential plumbing)
//! lives outside this crate; the pipeline only relies on ranged reads and
//! append-style multipart writes. An in-memory backend is provided for tests
//! and local tooling.

use std::{
    collections::HashMap,
    ops::Range,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Errors surfaced by an object-store backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested object does not exist in the bucket.
    #[error("object {0} not found")]
    NotFound(u64),
    /// A ranged read fell outside the object bounds.
    #[error("range {start}..{end} out of bounds for object {object_id} ({size} bytes)")]
    RangeOutOfBounds {
        /// Object being read.
        object_id: u64,
        /// Requested range start.
        start: u64,
        /// Requested range end.
        end: u64,
        /// Actual object size.
        size: u64,
    },
    /// The object content failed structural validation.
    #[error("object {0} is corrupted: {1}")]
    Corrupted(u64, &'static str),
    /// Transport-level failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Byte-range reads and multipart uploads against one bucket.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Identifier of the bucket this driver operates on.
    fn bucket_id(&self) -> u16;

    /// Read `range` of the given object.
    async fn range_read(&self, object_id: u64, range: Range<u64>) -> Result<Bytes, StorageError>;

    /// Open a multipart upload for a new object.
    async fn writer(&self, object_id: u64) -> Result<Box<dyn ObjectWriter>, StorageError>;
}

/// One in-flight multipart upload.
#[async_trait]
pub trait ObjectWriter: Send {
    /// Append one part to the upload.
    async fn write_part(&mut self, part: Bytes) -> Result<(), StorageError>;

    /// Finish the upload, returning the total object size.
    async fn close(self: Box<Self>) -> Result<u64, StorageError>;

    /// Discard the upload; nothing becomes visible.
    async fn abort(self: Box<Self>) -> Result<(), StorageError>;
}

/// In-memory [`ObjectStorage`] backend.
#[derive(Clone, Default)]
pub struct InMemoryObjectStorage {
    objects: Arc<Mutex<HashMap<u64, Bytes>>>,
    bucket: u16,
}

impl InMemoryObjectStorage {
    /// Create an empty backend for the given bucket id.
    pub fn new(bucket: u16) -> Self {
        Self {
            objects: Arc::default(),
            bucket,
        }
    }

    /// Size of a stored object, if present.
    pub fn object_size(&self, object_id: u64) -> Option<u64> {
        self.objects
            .lock()
            .expect("storage map lock")
            .get(&object_id)
            .map(|data| data.len() as u64)
    }

    /// Whether an object exists.
    pub fn contains(&self, object_id: u64) -> bool {
        self.objects
            .lock()
            .expect("storage map lock")
            .contains_key(&object_id)
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    fn bucket_id(&self) -> u16 {
        self.bucket
    }

    async fn range_read(&self, object_id: u64, range: Range<u64>) -> Result<Bytes, StorageError> {
        let guard = self.objects.lock().expect("storage map lock");
        let data = guard
            .get(&object_id)
            .ok_or(StorageError::NotFound(object_id))?;
        let size = data.len() as u64;
        if range.start > range.end || range.end > size {
            return Err(StorageError::RangeOutOfBounds {
                object_id,
                start: range.start,
                end: range.end,
                size,
            });
        }
        Ok(data.slice(range.start as usize..range.end as usize))
    }

    async fn writer(&self, object_id: u64) -> Result<Box<dyn ObjectWriter>, StorageError> {
        Ok(Box::new(InMemoryObjectWriter {
            objects: Arc::clone(&self.objects),
            object_id,
            buffer: BytesMut::new(),
        }))
    }
}

struct InMemoryObjectWriter {
    objects: Arc<Mutex<HashMap<u64, Bytes>>>,
    object_id: u64,
    buffer: BytesMut,
}

#[async_trait]
impl ObjectWriter for InMemoryObjectWriter {
    async fn write_part(&mut self, part: Bytes) -> Result<(), StorageError> {
        self.buffer.extend_from_slice(&part);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<u64, StorageError> {
        let size = self.buffer.len() as u64;
        self.objects
            .lock()
            .expect("storage map lock")
            .insert(self.object_id, self.buffer.freeze());
        Ok(size)
    }

    async fn abort(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_range_read() {
        let storage = InMemoryObjectStorage::new(0);
        let mut writer = storage.writer(7).await.expect("writer");
        writer
            .write_part(Bytes::from_static(b"hello world"))
            .await
            .expect("part");
        let size = writer.close().await.expect("close");
        assert_eq!(size, 11);

        let data = storage.range_read(7, 6..11).await.expect("read");
        assert_eq!(&data[..], b"world");
    }

    #[tokio::test]
    async fn out_of_bounds_read_rejected() {
        let storage = InMemoryObjectStorage::new(0);
        let writer = storage.writer(1).await.expect("writer");
        writer.close().await.expect("close");
        let err = storage.range_read(1, 0..4).await.expect_err("oob");
        assert!(matches!(err, StorageError::RangeOutOfBounds { .. }));
    }

    #[tokio::test]
    async fn aborted_upload_is_invisible() {
        let storage = InMemoryObjectStorage::new(0);
        let mut writer = storage.writer(3).await.expect("writer");
        writer
            .write_part(Bytes::from_static(b"partial"))
            .await
            .expect("part");
        writer.abort().await.expect("abort");
        assert!(!storage.contains(3));
    }
}
