//! In-process blob store
//!
//! Backs the integration tests and local development. Blobs only become
//! visible when a sink commits, which mirrors the all-or-nothing visibility
//! of the durable backends.

use super::{Blob, BlobMetadata, BlobSink, BlobStore, BlobStream, Collection, STREAM_CHUNK_SIZE};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone)]
struct StoredBlob {
    id: Uuid,
    data: Bytes,
    metadata: BlobMetadata,
}

#[derive(Default)]
struct Shelves {
    entries: HashMap<(Collection, String), StoredBlob>,
    ids: HashMap<Uuid, (Collection, String)>,
}

/// Blob store holding committed blobs in process memory
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    inner: Arc<RwLock<Shelves>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed blobs in a collection
    pub async fn len(&self, collection: Collection) -> usize {
        let shelves = self.inner.read().await;
        shelves
            .entries
            .keys()
            .filter(|(c, _)| *c == collection)
            .count()
    }
}

struct MemorySink {
    store: MemoryBlobStore,
    collection: Collection,
    name: String,
    metadata: BlobMetadata,
    buf: BytesMut,
}

#[async_trait]
impl BlobSink for MemorySink {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let mut shelves = self.store.inner.write().await;

        let key = (self.collection, self.name.clone());
        // Re-committing a logical name replaces the previous blob
        if let Some(previous) = shelves.entries.remove(&key) {
            shelves.ids.remove(&previous.id);
        }

        shelves.entries.insert(
            key.clone(),
            StoredBlob {
                id,
                data: self.buf.freeze(),
                metadata: self.metadata,
            },
        );
        shelves.ids.insert(id, key);

        Ok(id)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn open_write(
        &self,
        collection: Collection,
        name: &str,
        metadata: BlobMetadata,
    ) -> Result<Box<dyn BlobSink>> {
        Ok(Box::new(MemorySink {
            store: self.clone(),
            collection,
            name: name.to_string(),
            metadata,
            buf: BytesMut::new(),
        }))
    }

    async fn open_read_by_name(
        &self,
        collection: Collection,
        name: &str,
    ) -> Result<(Blob, BlobStream)> {
        let shelves = self.inner.read().await;
        let stored = shelves
            .entries
            .get(&(collection, name.to_string()))
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!("no blob named {name} in {}", collection.as_str()))
            })?;

        let blob = Blob {
            id: stored.id,
            name: name.to_string(),
            length: stored.data.len() as u64,
            metadata: stored.metadata,
        };

        // Bytes slices are refcounted, so chunking the committed buffer is cheap
        let data = stored.data;
        let mut chunks = Vec::with_capacity(data.len() / STREAM_CHUNK_SIZE + 1);
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + STREAM_CHUNK_SIZE).min(data.len());
            chunks.push(Ok(data.slice(offset..end)));
            offset = end;
        }

        Ok((blob, Box::pin(futures::stream::iter(chunks))))
    }

    async fn find_by_id(&self, collection: Collection, id: &str) -> Result<Option<Blob>> {
        let id = Uuid::parse_str(id)
            .map_err(|_| AppError::InvalidId(format!("malformed blob id: {id}")))?;

        let shelves = self.inner.read().await;
        let Some(key) = shelves.ids.get(&id) else {
            return Ok(None);
        };
        if key.0 != collection {
            return Ok(None);
        }

        Ok(shelves.entries.get(key).map(|stored| Blob {
            id: stored.id,
            name: key.1.clone(),
            length: stored.data.len() as u64,
            metadata: stored.metadata.clone(),
        }))
    }

    async fn update_metadata(
        &self,
        collection: Collection,
        id: Uuid,
        metadata: BlobMetadata,
    ) -> Result<()> {
        let mut shelves = self.inner.write().await;
        let key = shelves
            .ids
            .get(&id)
            .filter(|(c, _)| *c == collection)
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!("no blob {id} in {}", collection.as_str()))
            })?;

        if let Some(stored) = shelves.entries.get_mut(&key) {
            stored.metadata = metadata;
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> Result<()> {
        let mut shelves = self.inner.write().await;
        let Some(key) = shelves
            .ids
            .get(&id)
            .filter(|(c, _)| *c == collection)
            .cloned()
        else {
            return Ok(());
        };
        shelves.entries.remove(&key);
        shelves.ids.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn collect(mut stream: BlobStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.try_next().await.expect("stream chunk") {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn committed_blob_round_trips() {
        let store = MemoryBlobStore::new();
        let mut sink = store
            .open_write(
                Collection::Originals,
                "a.jpg",
                BlobMetadata::thumbnail("image/jpeg"),
            )
            .await
            .unwrap();
        sink.write_chunk(Bytes::from_static(b"hello ")).await.unwrap();
        sink.write_chunk(Bytes::from_static(b"world")).await.unwrap();
        let id = sink.commit().await.unwrap();

        let (blob, stream) = store
            .open_read_by_name(Collection::Originals, "a.jpg")
            .await
            .unwrap();
        assert_eq!(blob.id, id);
        assert_eq!(blob.metadata.content_type, "image/jpeg");
        assert_eq!(collect(stream).await, b"hello world");
    }

    #[tokio::test]
    async fn uncommitted_write_is_invisible() {
        let store = MemoryBlobStore::new();
        let mut sink = store
            .open_write(Collection::Originals, "b.jpg", BlobMetadata::default())
            .await
            .unwrap();
        sink.write_chunk(Bytes::from_static(b"partial")).await.unwrap();
        drop(sink);

        let err = store
            .open_read_by_name(Collection::Originals, "b.jpg")
            .await
            .err()
            .expect("read should fail");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn recommit_replaces_by_name() {
        let store = MemoryBlobStore::new();
        for content in [&b"first"[..], &b"second"[..]] {
            let mut sink = store
                .open_write(Collection::Thumbnails, "t.jpg", BlobMetadata::default())
                .await
                .unwrap();
            sink.write_chunk(Bytes::copy_from_slice(content)).await.unwrap();
            sink.commit().await.unwrap();
        }

        assert_eq!(store.len(Collection::Thumbnails).await, 1);
        let (_, stream) = store
            .open_read_by_name(Collection::Thumbnails, "t.jpg")
            .await
            .unwrap();
        assert_eq!(collect(stream).await, b"second");
    }

    #[tokio::test]
    async fn malformed_id_is_rejected() {
        let store = MemoryBlobStore::new();
        let err = store
            .find_by_id(Collection::Originals, "not-a-uuid")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidId(_)));
    }

    #[tokio::test]
    async fn unknown_id_is_none() {
        let store = MemoryBlobStore::new();
        let found = store
            .find_by_id(Collection::Originals, &Uuid::new_v4().to_string())
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
