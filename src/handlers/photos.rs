//! Photo endpoints: multipart upload and record lookup
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures::StreamExt;
use rand::RngCore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::photos::PhotoStore;
use crate::services::ingest::extension_for;
use crate::services::thumbnail::thumbnail_name;
use crate::services::{IngestService, NewPhoto};

#[derive(Serialize)]
struct PhotoLinks {
    photo: String,
    media: String,
    thumbnail: String,
}

impl PhotoLinks {
    fn new(id: Uuid, filename: &str) -> Self {
        let extension = filename.rsplit('.').next().unwrap_or("jpg");
        Self {
            photo: format!("/photos/{id}"),
            media: format!("/media/images/{id}.{extension}"),
            thumbnail: format!("/media/thumbnail/{}", thumbnail_name(id)),
        }
    }
}

#[derive(Serialize)]
struct CreatePhotoResponse {
    id: Uuid,
    links: PhotoLinks,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PhotoResponse {
    id: Uuid,
    content_type: String,
    owner_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail_id: Option<Uuid>,
    links: PhotoLinks,
}

/// A multipart upload staged to the local filesystem
struct StagedUpload {
    path: PathBuf,
    content_type: String,
}

/// Fields collected from the upload form
struct UploadForm {
    staged: Option<StagedUpload>,
    owner_id: String,
    caption: Option<String>,
}

/// POST /photos - stage the uploaded image, ingest it, enqueue its job
pub async fn create_photo(
    config: web::Data<Config>,
    ingest: web::Data<IngestService>,
    mut payload: Multipart,
) -> Result<HttpResponse> {
    let staging_dir = PathBuf::from(&config.app.staging_dir);
    tokio::fs::create_dir_all(&staging_dir)
        .await
        .map_err(|e| AppError::Storage(format!("failed to create staging dir: {e}")))?;

    let form = collect_upload_form(&staging_dir, &mut payload).await?;

    let staged = form
        .staged
        .ok_or_else(|| AppError::InvalidInput("missing image file field".to_string()))?;

    let photo = NewPhoto {
        local_path: staged.path.clone(),
        content_type: staged.content_type,
        caption: form.caption,
        owner_id: form.owner_id,
    };

    let ingested = match ingest.ingest(photo).await {
        Ok(ingested) => ingested,
        Err(e) => {
            remove_staged(&staged.path).await;
            return Err(e);
        }
    };

    Ok(HttpResponse::Created().json(CreatePhotoResponse {
        id: ingested.photo_id,
        links: PhotoLinks::new(ingested.photo_id, &ingested.filename),
    }))
}

/// Drain the multipart form, staging the image field to the local
/// filesystem. Any error removes the staged file before propagating, so
/// failed uploads leave nothing behind in the staging directory.
async fn collect_upload_form(
    staging_dir: &Path,
    payload: &mut Multipart,
) -> Result<UploadForm> {
    let mut form = UploadForm {
        staged: None,
        owner_id: String::new(),
        caption: None,
    };

    if let Err(e) = read_form_fields(staging_dir, payload, &mut form).await {
        if let Some(ref staged) = form.staged {
            remove_staged(&staged.path).await;
        }
        return Err(e);
    }

    Ok(form)
}

async fn read_form_fields(
    staging_dir: &Path,
    payload: &mut Multipart,
    form: &mut UploadForm,
) -> Result<()> {
    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::InvalidInput(format!("multipart error: {e}")))?;

        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" => {
                let content_type = field
                    .content_type()
                    .map(|mime| mime.to_string())
                    .unwrap_or_default();
                if extension_for(&content_type).is_none() {
                    return Err(AppError::InvalidInput(format!(
                        "unsupported content type: {content_type}"
                    )));
                }

                // A repeated image field replaces the earlier staged file
                if let Some(previous) = form.staged.take() {
                    remove_staged(&previous.path).await;
                }

                let path = staging_dir.join(random_staging_name());
                let mut file = tokio::fs::File::create(&path)
                    .await
                    .map_err(|e| AppError::Storage(format!("failed to stage upload: {e}")))?;
                // Recorded before streaming so a partial write is cleaned up
                form.staged = Some(StagedUpload { path, content_type });

                while let Some(chunk) = field.next().await {
                    let chunk = chunk
                        .map_err(|e| AppError::InvalidInput(format!("upload read error: {e}")))?;
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| AppError::Storage(format!("failed to stage upload: {e}")))?;
                }
                file.flush()
                    .await
                    .map_err(|e| AppError::Storage(format!("failed to stage upload: {e}")))?;
            }
            "ownerId" => form.owner_id = read_text_field(&mut field).await?,
            "caption" => {
                let text = read_text_field(&mut field).await?;
                if !text.is_empty() {
                    form.caption = Some(text);
                }
            }
            other => {
                warn!(field = %other, "ignoring unexpected multipart field");
                while field.next().await.is_some() {}
            }
        }
    }

    Ok(())
}

async fn remove_staged(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(
            path = %path.display(),
            error = %e,
            "failed to remove staged upload file"
        );
    }
}

/// GET /photos/{id} - record lookup
pub async fn get_photo(
    photos: web::Data<PhotoStore>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let record = photos
        .find(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("photo {id} not found")))?;

    let links = PhotoLinks::new(record.id, &record.filename);
    Ok(HttpResponse::Ok().json(PhotoResponse {
        id: record.id,
        content_type: record.content_type,
        owner_id: record.owner_id,
        caption: record.caption,
        thumbnail_id: record.thumbnail_id,
        links,
    }))
}

async fn read_text_field(field: &mut actix_multipart::Field) -> Result<String> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::InvalidInput(format!("form read error: {e}")))?;
        buf.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&buf).trim().to_string())
}

fn random_staging_name() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
