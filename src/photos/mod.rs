//! Photo records
//!
//! A photo record is the metadata attached to the original blob at write
//! time; the record's identifier is the blob's store-assigned id. The store
//! here is a thin view over the blob store's metadata facility: lookups read
//! the originals collection, and linking a thumbnail rewrites the attached
//! metadata.

use crate::error::{AppError, Result};
use crate::storage::{BlobMetadata, BlobStore, Collection};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Per-photo metadata, keyed by the original blob's id
#[derive(Clone, Debug, Serialize)]
pub struct PhotoRecord {
    pub id: Uuid,
    /// Logical name of the original blob
    pub filename: String,
    pub content_type: String,
    pub caption: Option<String>,
    pub owner_id: String,
    /// Set by the thumbnail worker once generation completes
    pub thumbnail_id: Option<Uuid>,
}

impl PhotoRecord {
    fn from_blob(blob: crate::storage::Blob) -> Self {
        Self {
            id: blob.id,
            filename: blob.name,
            content_type: blob.metadata.content_type,
            caption: blob.metadata.caption,
            owner_id: blob.metadata.owner_id.unwrap_or_default(),
            thumbnail_id: blob.metadata.thumbnail_id,
        }
    }

    fn to_metadata(&self) -> BlobMetadata {
        BlobMetadata {
            content_type: self.content_type.clone(),
            caption: self.caption.clone(),
            owner_id: Some(self.owner_id.clone()),
            thumbnail_id: self.thumbnail_id,
        }
    }
}

/// Accessor for photo records stored as original-blob metadata
#[derive(Clone)]
pub struct PhotoStore {
    store: Arc<dyn BlobStore>,
}

impl PhotoStore {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Fetch a record by identifier string.
    ///
    /// A malformed identifier resolves to `None`, the same as a missing
    /// record.
    pub async fn find(&self, id: &str) -> Result<Option<PhotoRecord>> {
        match self.store.find_by_id(Collection::Originals, id).await {
            Ok(blob) => Ok(blob.map(PhotoRecord::from_blob)),
            Err(AppError::InvalidId(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch a record by parsed identifier
    pub async fn find_by_uuid(&self, id: Uuid) -> Result<Option<PhotoRecord>> {
        let blob = self
            .store
            .find_by_id(Collection::Originals, &id.to_string())
            .await?;
        Ok(blob.map(PhotoRecord::from_blob))
    }

    /// Point the record at its generated thumbnail blob.
    ///
    /// Idempotent: redeliveries of the same job recompute the same thumbnail,
    /// so rewriting the link is a last-write-wins no-op in effect.
    pub async fn link_thumbnail(&self, photo_id: Uuid, thumbnail_id: Uuid) -> Result<()> {
        let mut record = self
            .find_by_uuid(photo_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("photo record {photo_id} not found")))?;

        record.thumbnail_id = Some(thumbnail_id);
        self.store
            .update_metadata(Collection::Originals, photo_id, record.to_metadata())
            .await
    }
}
