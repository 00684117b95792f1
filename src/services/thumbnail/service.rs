//! Thumbnail pipeline
//!
//! Runs the per-job sequence: fetch the photo record and its original blob,
//! transform, persist the thumbnail under its deterministic name, then link
//! the record to the new blob. Every step is safe to repeat: the persist
//! overwrites by name and the link is last-write-wins, so redeliveries of the
//! same job converge on the same state.

use super::processor::ThumbnailProcessor;
use super::thumbnail_name;
use crate::error::{AppError, Result};
use crate::photos::PhotoStore;
use crate::storage::{BlobMetadata, BlobStore, Collection, STREAM_CHUNK_SIZE};
use bytes::BytesMut;
use futures::TryStreamExt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Coordinates transform, storage, and record linkage for one job at a time
pub struct ThumbnailService {
    store: Arc<dyn BlobStore>,
    photos: PhotoStore,
    processor: Arc<ThumbnailProcessor>,
}

impl ThumbnailService {
    pub fn new(store: Arc<dyn BlobStore>, processor: ThumbnailProcessor) -> Self {
        let photos = PhotoStore::new(store.clone());
        Self {
            store,
            photos,
            processor: Arc::new(processor),
        }
    }

    /// Run the full pipeline for one photo and return the thumbnail blob id
    pub async fn process_photo(&self, photo_id: Uuid) -> Result<Uuid> {
        // Fetching
        let record = self
            .photos
            .find_by_uuid(photo_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("photo record {photo_id} not found")))?;

        let (original, mut stream) = self
            .store
            .open_read_by_name(Collection::Originals, &record.filename)
            .await?;

        debug!(
            %photo_id,
            filename = %record.filename,
            size = original.length,
            "fetched original"
        );

        let mut buf = BytesMut::with_capacity(original.length as usize);
        while let Some(chunk) = stream.try_next().await? {
            buf.extend_from_slice(&chunk);
        }

        // Transforming
        let thumbnail = self.processor.clone().generate_async(buf.freeze()).await?;

        // Persisting, under the name derived from the photo id
        let name = thumbnail_name(photo_id);
        let mut sink = self
            .store
            .open_write(
                Collection::Thumbnails,
                &name,
                BlobMetadata::thumbnail("image/jpeg"),
            )
            .await?;

        let data = thumbnail.data;
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + STREAM_CHUNK_SIZE).min(data.len());
            sink.write_chunk(data.slice(offset..end)).await?;
            offset = end;
        }
        let thumbnail_id = sink.commit().await?;

        // Linking metadata
        self.photos.link_thumbnail(photo_id, thumbnail_id).await?;

        info!(
            %photo_id,
            %thumbnail_id,
            thumbnail = %name,
            "thumbnail pipeline completed"
        );

        Ok(thumbnail_id)
    }
}
