//! Media endpoints: streamed reads of originals and thumbnails
//!
//! Metadata arrives with the blob open, so the content type is on the
//! response before the first byte streams out. A thumbnail that the worker
//! has not committed yet is simply not found.
use actix_web::{web, HttpResponse};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::photos::PhotoStore;
use crate::storage::{BlobStore, Collection};

/// GET /media/images/{id} - stream an original by photo id.
///
/// A trailing extension on the path segment is tolerated, mirroring the
/// upload links handed out at creation time.
pub async fn get_original(
    photos: web::Data<PhotoStore>,
    store: web::Data<Arc<dyn BlobStore>>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let id = path.split('.').next().unwrap_or_default();

    let record = photos
        .find(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("photo {id} not found")))?;

    let (blob, stream) = store
        .open_read_by_name(Collection::Originals, &record.filename)
        .await?;

    Ok(HttpResponse::Ok()
        .content_type(blob.metadata.content_type)
        .streaming(stream))
}

/// GET /media/thumbnail/{filename} - stream a thumbnail by logical name
pub async fn get_thumbnail(
    store: web::Data<Arc<dyn BlobStore>>,
    filename: web::Path<String>,
) -> Result<HttpResponse> {
    let (blob, stream) = store
        .open_read_by_name(Collection::Thumbnails, &filename)
        .await?;

    Ok(HttpResponse::Ok()
        .content_type(blob.metadata.content_type)
        .streaming(stream))
}
