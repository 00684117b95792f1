//! S3-backed blob store
//!
//! Blob bytes live as objects keyed by logical name; attached metadata rides
//! in `x-amz-meta-*` headers. A sink buffers writes and commits with a single
//! `PutObject`, so readers never observe partial content. Id lookup goes
//! through small index objects under `.ids/` that map a blob id back to its
//! logical name.

use super::{Blob, BlobMetadata, BlobSink, BlobStore, BlobStream, Collection};
use crate::config::StorageConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::MetadataDirective;
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

const META_BLOB_ID: &str = "blob-id";
const META_CAPTION: &str = "caption";
const META_OWNER_ID: &str = "owner-id";
const META_THUMBNAIL_ID: &str = "thumbnail-id";

/// Blob store backed by two S3 buckets (originals and thumbnails)
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    originals_bucket: String,
    thumbnails_bucket: String,
}

impl S3BlobStore {
    pub fn new(client: Client, config: &StorageConfig) -> Self {
        Self {
            client,
            originals_bucket: config.originals_bucket.clone(),
            thumbnails_bucket: config.thumbnails_bucket.clone(),
        }
    }

    /// Build a store from configuration, resolving AWS credentials from the
    /// environment and honoring a custom endpoint (MinIO et al.)
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(ref endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        info!(
            originals = %config.originals_bucket,
            thumbnails = %config.thumbnails_bucket,
            "S3 blob store initialized"
        );

        Ok(Self::new(client, config))
    }

    fn bucket(&self, collection: Collection) -> &str {
        match collection {
            Collection::Originals => &self.originals_bucket,
            Collection::Thumbnails => &self.thumbnails_bucket,
        }
    }

    fn index_key(id: Uuid) -> String {
        format!(".ids/{id}")
    }

    /// Resolve a blob id to its logical name via the index object
    async fn name_for_id(&self, collection: Collection, id: Uuid) -> Result<Option<String>> {
        let resp = self
            .client
            .get_object()
            .bucket(self.bucket(collection))
            .key(Self::index_key(id))
            .send()
            .await;

        let resp = match resp {
            Ok(resp) => resp,
            Err(e) if is_not_found(&e.to_string()) => return Ok(None),
            Err(e) => return Err(AppError::Storage(format!("id lookup failed: {e}"))),
        };

        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| AppError::Storage(format!("id index read failed: {e}")))?;

        String::from_utf8(body.into_bytes().to_vec())
            .map(Some)
            .map_err(|e| AppError::Storage(format!("corrupt id index: {e}")))
    }

    /// Fetch the current blob id stored for a logical name, if any
    async fn id_for_name(&self, collection: Collection, name: &str) -> Result<Option<Uuid>> {
        let resp = self
            .client
            .head_object()
            .bucket(self.bucket(collection))
            .key(name)
            .send()
            .await;

        match resp {
            Ok(head) => Ok(head
                .metadata()
                .and_then(|m| m.get(META_BLOB_ID))
                .and_then(|raw| Uuid::parse_str(raw).ok())),
            Err(e) if is_not_found(&e.to_string()) => Ok(None),
            Err(e) => Err(AppError::Storage(format!("head failed for {name}: {e}"))),
        }
    }
}

fn is_not_found(message: &str) -> bool {
    message.contains("404") || message.contains("NoSuchKey") || message.contains("NotFound")
}

fn metadata_to_headers(id: Uuid, metadata: &BlobMetadata) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert(META_BLOB_ID.to_string(), id.to_string());
    if let Some(ref caption) = metadata.caption {
        headers.insert(META_CAPTION.to_string(), caption.clone());
    }
    if let Some(ref owner) = metadata.owner_id {
        headers.insert(META_OWNER_ID.to_string(), owner.clone());
    }
    if let Some(thumbnail_id) = metadata.thumbnail_id {
        headers.insert(META_THUMBNAIL_ID.to_string(), thumbnail_id.to_string());
    }
    headers
}

fn metadata_from_headers(
    content_type: Option<&str>,
    headers: Option<&HashMap<String, String>>,
) -> BlobMetadata {
    let get = |key: &str| headers.and_then(|m| m.get(key)).cloned();
    BlobMetadata {
        content_type: content_type.unwrap_or("application/octet-stream").to_string(),
        caption: get(META_CAPTION),
        owner_id: get(META_OWNER_ID),
        thumbnail_id: get(META_THUMBNAIL_ID).and_then(|raw| Uuid::parse_str(&raw).ok()),
    }
}

struct S3Sink {
    store: S3BlobStore,
    collection: Collection,
    name: String,
    metadata: BlobMetadata,
    buf: BytesMut,
}

#[async_trait]
impl BlobSink for S3Sink {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let bucket = self.store.bucket(self.collection).to_string();

        // Re-committing a name replaces the previous blob; its index entry is
        // cleaned up once the new object is durable.
        let previous_id = self.store.id_for_name(self.collection, &self.name).await?;

        let data = self.buf.freeze();
        let size = data.len();

        // Index goes in first: the blob only becomes visible with the data
        // put, and an index entry whose object never landed resolves to
        // nothing on lookup
        self.store
            .client
            .put_object()
            .bucket(&bucket)
            .key(S3BlobStore::index_key(id))
            .body(ByteStream::from(Bytes::from(self.name.clone())))
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("id index write failed: {e}")))?;

        if let Err(e) = self
            .store
            .client
            .put_object()
            .bucket(&bucket)
            .key(&self.name)
            .content_type(&self.metadata.content_type)
            .set_metadata(Some(metadata_to_headers(id, &self.metadata)))
            .body(ByteStream::from(data))
            .send()
            .await
        {
            let _ = self
                .store
                .client
                .delete_object()
                .bucket(&bucket)
                .key(S3BlobStore::index_key(id))
                .send()
                .await;
            return Err(AppError::Storage(format!("put failed for {}: {e}", self.name)));
        }

        if let Some(old_id) = previous_id.filter(|old| *old != id) {
            let _ = self
                .store
                .client
                .delete_object()
                .bucket(&bucket)
                .key(S3BlobStore::index_key(old_id))
                .send()
                .await;
        }

        debug!(name = %self.name, %id, size, "blob committed");
        Ok(id)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn open_write(
        &self,
        collection: Collection,
        name: &str,
        metadata: BlobMetadata,
    ) -> Result<Box<dyn BlobSink>> {
        Ok(Box::new(S3Sink {
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
        let resp = self
            .client
            .get_object()
            .bucket(self.bucket(collection))
            .key(name)
            .send()
            .await;

        let resp = match resp {
            Ok(resp) => resp,
            Err(e) if is_not_found(&e.to_string()) => {
                return Err(AppError::NotFound(format!(
                    "no blob named {name} in {}",
                    collection.as_str()
                )))
            }
            Err(e) => return Err(AppError::Storage(format!("get failed for {name}: {e}"))),
        };

        let id = resp
            .metadata()
            .and_then(|m| m.get(META_BLOB_ID))
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| AppError::Storage(format!("blob {name} has no id metadata")))?;

        let blob = Blob {
            id,
            name: name.to_string(),
            length: resp.content_length().unwrap_or(0).max(0) as u64,
            metadata: metadata_from_headers(resp.content_type(), resp.metadata()),
        };

        let stream = futures::stream::unfold(resp.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Some((Ok(chunk), body)),
                Ok(None) => None,
                Err(e) => Some((Err(AppError::Storage(format!("read failed: {e}"))), body)),
            }
        });

        Ok((blob, Box::pin(stream)))
    }

    async fn find_by_id(&self, collection: Collection, id: &str) -> Result<Option<Blob>> {
        let id = Uuid::parse_str(id)
            .map_err(|_| AppError::InvalidId(format!("malformed blob id: {id}")))?;

        let Some(name) = self.name_for_id(collection, id).await? else {
            return Ok(None);
        };

        let resp = self
            .client
            .head_object()
            .bucket(self.bucket(collection))
            .key(&name)
            .send()
            .await;

        let head = match resp {
            Ok(head) => head,
            // Index can outlive its object briefly after an overwrite
            Err(e) if is_not_found(&e.to_string()) => return Ok(None),
            Err(e) => return Err(AppError::Storage(format!("head failed for {name}: {e}"))),
        };

        Ok(Some(Blob {
            id,
            name,
            length: head.content_length().unwrap_or(0).max(0) as u64,
            metadata: metadata_from_headers(head.content_type(), head.metadata()),
        }))
    }

    async fn update_metadata(
        &self,
        collection: Collection,
        id: Uuid,
        metadata: BlobMetadata,
    ) -> Result<()> {
        let bucket = self.bucket(collection).to_string();
        let name = self
            .name_for_id(collection, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no blob {id} in {}", collection.as_str())))?;

        self.client
            .copy_object()
            .bucket(&bucket)
            .key(&name)
            .copy_source(format!("{bucket}/{name}"))
            .metadata_directive(MetadataDirective::Replace)
            .content_type(&metadata.content_type)
            .set_metadata(Some(metadata_to_headers(id, &metadata)))
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("metadata update failed for {name}: {e}")))?;

        Ok(())
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> Result<()> {
        let bucket = self.bucket(collection).to_string();
        let Some(name) = self.name_for_id(collection, id).await? else {
            return Ok(());
        };

        self.client
            .delete_object()
            .bucket(&bucket)
            .key(&name)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("delete failed for {name}: {e}")))?;

        let _ = self
            .client
            .delete_object()
            .bucket(&bucket)
            .key(S3BlobStore::index_key(id))
            .send()
            .await;

        Ok(())
    }
}
