//! Block-index footer codec and candidate index fetch.
//!
//! A stream-set object ends with a fixed-width index block describing every
//! data block it packs, followed by a 16-byte footer pointing at the index:
//!
//! ```text
//! | data blocks ... | index entries ... | index_position u64 | index_size u32 | magic u32 |
//! ```
//!
//! All integers are big-endian.

use std::{collections::HashMap, sync::Arc};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::future::try_join_all;

use crate::{
    compact::{CompactionError, block::StreamDataBlock},
    metadata::S3ObjectMetadata,
    storage::{ObjectStorage, StorageError},
};

/// Encoded width of one index entry.
pub const INDEX_ENTRY_SIZE: usize = 36;
/// Encoded width of the trailing footer.
pub const FOOTER_SIZE: u64 = 16;
/// Magic value closing every stream-set object.
pub const FOOTER_MAGIC: u32 = 0x554D_4931;

/// One block described by an object's index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    /// Stream the block belongs to.
    pub stream_id: u64,
    /// Inclusive start offset.
    pub start_offset: u64,
    /// Exclusive end offset.
    pub end_offset: u64,
    /// Byte position of the block inside the object.
    pub position: u64,
    /// Block size in bytes.
    pub size: u32,
}

impl IndexEntry {
    /// Append the encoded entry to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.stream_id);
        buf.put_u64(self.start_offset);
        buf.put_u64(self.end_offset);
        buf.put_u64(self.position);
        buf.put_u32(self.size);
    }

    /// Decode one entry from `buf`.
    pub fn decode(buf: &mut impl Buf) -> Self {
        Self {
            stream_id: buf.get_u64(),
            start_offset: buf.get_u64(),
            end_offset: buf.get_u64(),
            position: buf.get_u64(),
            size: buf.get_u32(),
        }
    }
}

/// Encode the index block plus footer for an object whose data section ends
/// at `index_position`.
pub fn encode_index_and_footer(entries: &[IndexEntry], index_position: u64) -> Bytes {
    let index_size = entries.len() * INDEX_ENTRY_SIZE;
    let mut buf = BytesMut::with_capacity(index_size + FOOTER_SIZE as usize);
    for entry in entries {
        entry.encode(&mut buf);
    }
    buf.put_u64(index_position);
    buf.put_u32(index_size as u32);
    buf.put_u32(FOOTER_MAGIC);
    buf.freeze()
}

/// Fetch the block layout of every candidate object, in parallel.
///
/// Returns the ordered block list per object id. Blocks carry empty payload
/// cells; reads happen later, plan by plan.
pub async fn fetch_block_indices(
    storage: &Arc<dyn ObjectStorage>,
    objects: &[S3ObjectMetadata],
) -> Result<HashMap<u64, Vec<StreamDataBlock>>, CompactionError> {
    let futures = objects
        .iter()
        .map(|metadata| read_object_index(storage.as_ref(), metadata));
    let indices = try_join_all(futures).await?;
    Ok(objects
        .iter()
        .map(S3ObjectMetadata::object_id)
        .zip(indices)
        .collect())
}

async fn read_object_index(
    storage: &dyn ObjectStorage,
    metadata: &S3ObjectMetadata,
) -> Result<Vec<StreamDataBlock>, CompactionError> {
    let object_id = metadata.object_id();
    let size = metadata.object_size();
    if size < FOOTER_SIZE {
        return Err(CompactionError::Read(StorageError::Corrupted(
            object_id,
            "object smaller than footer",
        )));
    }
    let mut footer = storage
        .range_read(object_id, size - FOOTER_SIZE..size)
        .await
        .map_err(CompactionError::Read)?;
    let index_position = footer.get_u64();
    let index_size = footer.get_u32() as u64;
    let magic = footer.get_u32();
    if magic != FOOTER_MAGIC {
        return Err(CompactionError::Read(StorageError::Corrupted(
            object_id,
            "bad footer magic",
        )));
    }
    if index_size % INDEX_ENTRY_SIZE as u64 != 0
        || index_position + index_size != size - FOOTER_SIZE
    {
        return Err(CompactionError::Read(StorageError::Corrupted(
            object_id,
            "index does not line up with footer",
        )));
    }

    let mut index = storage
        .range_read(object_id, index_position..index_position + index_size)
        .await
        .map_err(CompactionError::Read)?;
    let mut blocks = Vec::with_capacity((index_size / INDEX_ENTRY_SIZE as u64) as usize);
    while index.remaining() >= INDEX_ENTRY_SIZE {
        let entry = IndexEntry::decode(&mut index);
        blocks.push(StreamDataBlock::new(
            entry.stream_id,
            entry.start_offset,
            entry.end_offset,
            object_id,
            entry.position,
            entry.position + entry.size as u64,
        ));
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryObjectStorage, ObjectStorage};

    async fn put_object(storage: &InMemoryObjectStorage, object_id: u64, entries: &[IndexEntry]) {
        let data_len: u64 = entries.iter().map(|e| e.size as u64).sum();
        let mut writer = storage.writer(object_id).await.expect("writer");
        writer
            .write_part(Bytes::from(vec![0u8; data_len as usize]))
            .await
            .expect("data");
        writer
            .write_part(encode_index_and_footer(entries, data_len))
            .await
            .expect("index");
        writer.close().await.expect("close");
    }

    #[tokio::test]
    async fn fetch_yields_ordered_blocks_per_object() {
        let storage = InMemoryObjectStorage::new(0);
        let entries = [
            IndexEntry {
                stream_id: 1,
                start_offset: 0,
                end_offset: 100,
                position: 0,
                size: 64,
            },
            IndexEntry {
                stream_id: 2,
                start_offset: 10,
                end_offset: 20,
                position: 64,
                size: 32,
            },
        ];
        put_object(&storage, 5, &entries).await;
        let size = storage.object_size(5).expect("size");

        let storage: Arc<dyn ObjectStorage> = Arc::new(storage);
        let metadata = S3ObjectMetadata::new(5, size, 0, 0, 0);
        let map = fetch_block_indices(&storage, std::slice::from_ref(&metadata))
            .await
            .expect("indices");
        let blocks = map.get(&5).expect("object 5");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].stream_id(), 1);
        assert_eq!(blocks[0].block_size(), 64);
        assert_eq!(blocks[1].block_start_position(), 64);
        assert_eq!(blocks[1].end_offset(), 20);
    }

    #[tokio::test]
    async fn bad_magic_is_a_read_failure() {
        let storage = InMemoryObjectStorage::new(0);
        let mut writer = storage.writer(9).await.expect("writer");
        writer
            .write_part(Bytes::from(vec![0u8; FOOTER_SIZE as usize]))
            .await
            .expect("garbage");
        writer.close().await.expect("close");

        let storage: Arc<dyn ObjectStorage> = Arc::new(storage);
        let metadata = S3ObjectMetadata::new(9, FOOTER_SIZE, 0, 0, 0);
        let err = fetch_block_indices(&storage, std::slice::from_ref(&metadata))
            .await
            .expect_err("corrupted");
        assert!(matches!(err, CompactionError::Read(_)));
    }
}
