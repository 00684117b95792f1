//! Blob store abstraction
//!
//! Durable storage for immutable byte objects plus attached metadata,
//! organized into two named collections: one for original photos and one for
//! generated thumbnails. Writes are buffered by a sink and committed
//! atomically; readers never observe partial content. Reads are two-phase:
//! the open call returns the blob's metadata, then a byte stream delivers the
//! content in order.

pub mod memory;
pub mod s3;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use uuid::Uuid;

pub use memory::MemoryBlobStore;
pub use s3::S3BlobStore;

/// Named partition of the blob store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    Originals,
    Thumbnails,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Originals => "photos",
            Collection::Thumbnails => "thumbnails",
        }
    }
}

/// Metadata attached to a blob at write time.
///
/// Originals carry the owning photo record's fields; thumbnails only carry a
/// content type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlobMetadata {
    pub content_type: String,
    pub caption: Option<String>,
    pub owner_id: Option<String>,
    pub thumbnail_id: Option<Uuid>,
}

impl BlobMetadata {
    /// Metadata for a generated thumbnail blob
    pub fn thumbnail(content_type: &str) -> Self {
        Self {
            content_type: content_type.to_string(),
            ..Self::default()
        }
    }
}

/// A committed blob: store-assigned id, logical name, and attached metadata
#[derive(Clone, Debug)]
pub struct Blob {
    pub id: Uuid,
    pub name: String,
    pub length: u64,
    pub metadata: BlobMetadata,
}

/// Ordered byte stream for a committed blob
pub type BlobStream = BoxStream<'static, Result<Bytes>>;

/// Write sink for a blob.
///
/// Bytes are buffered until `commit`, which makes the blob durable and
/// visible in one step and yields the assigned id. Dropping the sink without
/// committing leaves no trace in the store.
#[async_trait]
pub trait BlobSink: Send {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<Uuid>;
}

/// Durable blob storage with attached metadata.
///
/// Committing a blob under an existing logical name replaces the previous
/// blob, so logical names stay unique per collection.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Open a write sink for a new blob
    async fn open_write(
        &self,
        collection: Collection,
        name: &str,
        metadata: BlobMetadata,
    ) -> Result<Box<dyn BlobSink>>;

    /// Open a blob for reading by logical name.
    ///
    /// Returns `NotFound` if no committed blob carries that name. Metadata is
    /// available before the first byte is consumed.
    async fn open_read_by_name(
        &self,
        collection: Collection,
        name: &str,
    ) -> Result<(Blob, BlobStream)>;

    /// Look up a blob by store-assigned id.
    ///
    /// Returns `InvalidId` for a malformed identifier; callers upstream treat
    /// that the same as a missing blob.
    async fn find_by_id(&self, collection: Collection, id: &str) -> Result<Option<Blob>>;

    /// Replace the metadata attached to a blob. Last write wins.
    async fn update_metadata(
        &self,
        collection: Collection,
        id: Uuid,
        metadata: BlobMetadata,
    ) -> Result<()>;

    /// Remove a blob. Used to compensate a failed ingestion.
    async fn delete(&self, collection: Collection, id: Uuid) -> Result<()>;
}

/// Chunk size used when materializing streams from buffered blobs
pub(crate) const STREAM_CHUNK_SIZE: usize = 64 * 1024;
