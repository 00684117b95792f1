//! Ingestion path
//!
//! Takes a staged local file plus its declared metadata, streams it into the
//! originals collection under a fresh random logical name, and publishes one
//! thumbnail job carrying the new photo id. The photo record is the metadata
//! written with the blob, so blob commit and record creation are a single
//! atomic step; the only partial-failure window left is a committed blob
//! whose job publish fails, compensated by deleting the orphan blob.

use crate::error::{AppError, Result};
use crate::queue::JobPublisher;
use crate::services::thumbnail;
use crate::storage::{BlobMetadata, BlobStore, Collection};
use bytes::Bytes;
use rand::RngCore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use uuid::Uuid;

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Accepted input content types and their storage extensions
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        _ => None,
    }
}

/// A staged upload handed over by the HTTP layer
#[derive(Debug)]
pub struct NewPhoto {
    pub local_path: PathBuf,
    pub content_type: String,
    pub caption: Option<String>,
    pub owner_id: String,
}

/// Result of a successful ingestion
#[derive(Debug)]
pub struct IngestedPhoto {
    pub photo_id: Uuid,
    /// Logical name of the stored original
    pub filename: String,
    /// Deterministic logical name the worker will store the thumbnail under
    pub thumbnail_name: String,
}

/// Ingestion service: one staged file, one blob write, one publish
pub struct IngestService {
    store: Arc<dyn BlobStore>,
    publisher: Arc<dyn JobPublisher>,
}

impl IngestService {
    pub fn new(store: Arc<dyn BlobStore>, publisher: Arc<dyn JobPublisher>) -> Self {
        Self { store, publisher }
    }

    pub async fn ingest(&self, photo: NewPhoto) -> Result<IngestedPhoto> {
        let extension = extension_for(&photo.content_type).ok_or_else(|| {
            AppError::InvalidInput(format!("unsupported content type: {}", photo.content_type))
        })?;
        if photo.owner_id.trim().is_empty() {
            return Err(AppError::InvalidInput("ownerId is required".to_string()));
        }

        let filename = format!("{}.{extension}", random_hex_name());
        let metadata = BlobMetadata {
            content_type: photo.content_type.clone(),
            caption: photo.caption.clone(),
            owner_id: Some(photo.owner_id.clone()),
            thumbnail_id: None,
        };

        let mut sink = self
            .store
            .open_write(Collection::Originals, &filename, metadata)
            .await?;

        let mut file = tokio::fs::File::open(&photo.local_path)
            .await
            .map_err(|e| {
                AppError::Storage(format!(
                    "failed to open staged file {}: {e}",
                    photo.local_path.display()
                ))
            })?;

        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| AppError::Storage(format!("failed to read staged file: {e}")))?;
            if n == 0 {
                break;
            }
            sink.write_chunk(Bytes::copy_from_slice(&buf[..n])).await?;
        }

        let photo_id = sink.commit().await?;

        if let Err(e) = self
            .publisher
            .publish(Bytes::from(photo_id.to_string()))
            .await
        {
            // Compensate: no job may exist for a record, but no record may
            // outlive a failed publish either
            warn!(%photo_id, error = %e, "job publish failed, removing orphan blob");
            if let Err(del) = self.store.delete(Collection::Originals, photo_id).await {
                warn!(%photo_id, error = %del, "orphan cleanup failed");
            }
            return Err(e);
        }

        // Staged-file cleanup sits after the critical path; failure is logged,
        // never propagated
        if let Err(e) = tokio::fs::remove_file(&photo.local_path).await {
            warn!(
                path = %photo.local_path.display(),
                error = %e,
                "failed to remove staged upload file"
            );
        }

        info!(%photo_id, filename = %filename, owner_id = %photo.owner_id, "photo ingested");

        Ok(IngestedPhoto {
            photo_id,
            filename,
            thumbnail_name: thumbnail::thumbnail_name(photo_id),
        })
    }
}

fn random_hex_name() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_and_png_map_to_extensions() {
        assert_eq!(extension_for("image/jpeg"), Some("jpg"));
        assert_eq!(extension_for("image/png"), Some("png"));
        assert_eq!(extension_for("image/gif"), None);
        assert_eq!(extension_for("text/plain"), None);
    }

    #[test]
    fn random_names_are_unique_hex() {
        let a = random_hex_name();
        let b = random_hex_name();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
