//! End-to-end pipeline tests over the in-process backends: ingestion, job
//! delivery, the worker pipeline, redelivery, and dead-lettering.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use tokio::sync::watch;
use uuid::Uuid;

use photo_service::config::ThumbnailSettings;
use photo_service::error::{AppError, Result};
use photo_service::photos::PhotoStore;
use photo_service::queue::{JobPublisher, JobSource, MemoryJobQueue};
use photo_service::services::thumbnail::thumbnail_name;
use photo_service::services::{IngestService, NewPhoto, ThumbnailConsumer, ThumbnailProcessor, ThumbnailService};
use photo_service::storage::{
    Blob, BlobMetadata, BlobSink, BlobStore, BlobStream, Collection, MemoryBlobStore,
};

fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::new_rgb8(width, height);
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), ImageOutputFormat::Jpeg(90))
        .expect("encode sample image");
    buf
}

async fn stage_file(bytes: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("photo-pipeline-{}", Uuid::new_v4()));
    tokio::fs::write(&path, bytes).await.expect("stage file");
    path
}

fn new_photo(path: PathBuf) -> NewPhoto {
    NewPhoto {
        local_path: path,
        content_type: "image/jpeg".to_string(),
        caption: Some("x".to_string()),
        owner_id: "B1".to_string(),
    }
}

fn thumbnail_service(store: Arc<dyn BlobStore>) -> Arc<ThumbnailService> {
    let processor = ThumbnailProcessor::new(ThumbnailSettings {
        dimension: 100,
        quality: 85,
    });
    Arc::new(ThumbnailService::new(store, processor))
}

async fn collect(mut stream: BlobStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.try_next().await.expect("stream chunk") {
        out.extend_from_slice(&chunk);
    }
    out
}

#[tokio::test]
async fn upload_creates_record_and_enqueues_one_job() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let queue = MemoryJobQueue::new();
    let ingest = IngestService::new(store.clone(), Arc::new(queue.clone()));

    let staged = stage_file(&sample_jpeg(640, 480)).await;
    let ingested = ingest.ingest(new_photo(staged.clone())).await.unwrap();

    let photos = PhotoStore::new(store);
    let record = photos
        .find_by_uuid(ingested.photo_id)
        .await
        .unwrap()
        .expect("record exists");
    assert_eq!(record.owner_id, "B1");
    assert_eq!(record.caption.as_deref(), Some("x"));
    assert_eq!(record.content_type, "image/jpeg");
    assert!(record.thumbnail_id.is_none());

    assert_eq!(queue.pending_len().await, 1);
    let mut source = queue.source();
    let delivery = source.next().await.unwrap().unwrap();
    assert_eq!(&delivery.payload[..], ingested.photo_id.to_string().as_bytes());

    // The staged file is cleaned up after a successful ingest
    assert!(tokio::fs::metadata(&staged).await.is_err());
}

#[tokio::test]
async fn stored_original_round_trips() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let queue = MemoryJobQueue::new();
    let ingest = IngestService::new(store.clone(), Arc::new(queue));

    let original = sample_jpeg(320, 200);
    let staged = stage_file(&original).await;
    let ingested = ingest.ingest(new_photo(staged)).await.unwrap();

    let (blob, stream) = store
        .open_read_by_name(Collection::Originals, &ingested.filename)
        .await
        .unwrap();
    assert_eq!(blob.metadata.content_type, "image/jpeg");
    assert_eq!(collect(stream).await, original);
}

#[tokio::test]
async fn worker_produces_thumbnail_links_record_and_acks() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let queue = MemoryJobQueue::new();
    let ingest = IngestService::new(store.clone(), Arc::new(queue.clone()));

    let staged = stage_file(&sample_jpeg(640, 480)).await;
    let ingested = ingest.ingest(new_photo(staged)).await.unwrap();

    let (_tx, shutdown_rx) = watch::channel(false);
    let mut consumer =
        ThumbnailConsumer::new(queue.source(), thumbnail_service(store.clone()), None, 5, shutdown_rx);
    consumer.process_next().await.unwrap();

    let name = thumbnail_name(ingested.photo_id);
    let (blob, stream) = store
        .open_read_by_name(Collection::Thumbnails, &name)
        .await
        .unwrap();
    assert_eq!(blob.metadata.content_type, "image/jpeg");

    let thumb = image::load_from_memory(&collect(stream).await).unwrap();
    assert_eq!(thumb.dimensions(), (100, 100));

    let photos = PhotoStore::new(store);
    let record = photos
        .find_by_uuid(ingested.photo_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.thumbnail_id, Some(blob.id));

    assert!(queue.is_drained().await);
}

#[tokio::test]
async fn repeated_runs_yield_identical_thumbnails() {
    let memory = MemoryBlobStore::new();
    let store: Arc<dyn BlobStore> = Arc::new(memory.clone());
    let queue = MemoryJobQueue::new();
    let ingest = IngestService::new(store.clone(), Arc::new(queue));

    let staged = stage_file(&sample_jpeg(500, 300)).await;
    let ingested = ingest.ingest(new_photo(staged)).await.unwrap();

    let service = thumbnail_service(store.clone());
    let first_id = service.process_photo(ingested.photo_id).await.unwrap();
    let name = thumbnail_name(ingested.photo_id);
    let (_, stream) = store
        .open_read_by_name(Collection::Thumbnails, &name)
        .await
        .unwrap();
    let first_bytes = collect(stream).await;

    let second_id = service.process_photo(ingested.photo_id).await.unwrap();
    let (blob, stream) = store
        .open_read_by_name(Collection::Thumbnails, &name)
        .await
        .unwrap();
    let second_bytes = collect(stream).await;

    assert_eq!(first_bytes, second_bytes);
    assert_eq!(blob.id, second_id);
    assert_ne!(first_id, second_id); // second commit replaced the first blob

    let photos = PhotoStore::new(store.clone());
    let record = photos
        .find_by_uuid(ingested.photo_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.thumbnail_id, Some(second_id));

    // No blob proliferation under the deterministic name
    assert_eq!(memory.len(Collection::Thumbnails).await, 1);
}

#[tokio::test]
async fn never_ingested_photo_is_not_found() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let photos = PhotoStore::new(store.clone());

    let ghost = Uuid::new_v4();
    assert!(photos.find(&ghost.to_string()).await.unwrap().is_none());
    assert!(photos.find("not-a-uuid").await.unwrap().is_none());

    let err = store
        .open_read_by_name(Collection::Thumbnails, &thumbnail_name(ghost))
        .await
        .err()
        .expect("read should fail");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn duplicate_deliveries_converge_on_one_thumbnail() {
    // Two deliveries of the same job run concurrently
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let queue = MemoryJobQueue::new();
    let ingest = IngestService::new(store.clone(), Arc::new(queue));

    let staged = stage_file(&sample_jpeg(640, 480)).await;
    let ingested = ingest.ingest(new_photo(staged)).await.unwrap();

    let service = thumbnail_service(store.clone());
    let (a, b) = tokio::join!(
        service.process_photo(ingested.photo_id),
        service.process_photo(ingested.photo_id)
    );
    a.unwrap();
    b.unwrap();

    // Exactly one uncorrupted blob survives under the deterministic name
    let name = thumbnail_name(ingested.photo_id);
    let (_, stream) = store
        .open_read_by_name(Collection::Thumbnails, &name)
        .await
        .unwrap();
    let thumb = image::load_from_memory(&collect(stream).await).unwrap();
    assert_eq!(thumb.dimensions(), (100, 100));

    let photos = PhotoStore::new(store);
    let record = photos
        .find_by_uuid(ingested.photo_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.thumbnail_id.is_some());
}

/// Delegating store that fails thumbnail writes while armed. Used to model a
/// worker dying between persist and ack.
struct FlakyStore {
    inner: MemoryBlobStore,
    fail_thumbnail_writes: AtomicBool,
}

#[async_trait]
impl BlobStore for FlakyStore {
    async fn open_write(
        &self,
        collection: Collection,
        name: &str,
        metadata: BlobMetadata,
    ) -> Result<Box<dyn BlobSink>> {
        if collection == Collection::Thumbnails && self.fail_thumbnail_writes.load(Ordering::SeqCst)
        {
            return Err(AppError::Storage("injected write failure".to_string()));
        }
        self.inner.open_write(collection, name, metadata).await
    }

    async fn open_read_by_name(
        &self,
        collection: Collection,
        name: &str,
    ) -> Result<(Blob, BlobStream)> {
        self.inner.open_read_by_name(collection, name).await
    }

    async fn find_by_id(&self, collection: Collection, id: &str) -> Result<Option<Blob>> {
        self.inner.find_by_id(collection, id).await
    }

    async fn update_metadata(
        &self,
        collection: Collection,
        id: Uuid,
        metadata: BlobMetadata,
    ) -> Result<()> {
        self.inner.update_metadata(collection, id, metadata).await
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> Result<()> {
        self.inner.delete(collection, id).await
    }
}

#[tokio::test]
async fn failed_job_stays_unacked_and_redelivery_completes_it() {
    // Ack-after-commit: the message is only settled once the thumbnail exists
    // and the record is linked
    let flaky = Arc::new(FlakyStore {
        inner: MemoryBlobStore::new(),
        fail_thumbnail_writes: AtomicBool::new(true),
    });
    let store: Arc<dyn BlobStore> = flaky.clone();
    let queue = MemoryJobQueue::new();
    let ingest = IngestService::new(store.clone(), Arc::new(queue.clone()));

    let staged = stage_file(&sample_jpeg(640, 480)).await;
    let ingested = ingest.ingest(new_photo(staged)).await.unwrap();

    let (_tx, shutdown_rx) = watch::channel(false);
    let mut consumer =
        ThumbnailConsumer::new(queue.source(), thumbnail_service(store.clone()), None, 5, shutdown_rx);

    // First delivery fails mid-pipeline and is nacked
    consumer.process_next().await.unwrap();
    assert_eq!(queue.pending_len().await, 1);
    assert!(store
        .open_read_by_name(Collection::Thumbnails, &thumbnail_name(ingested.photo_id))
        .await
        .is_err());

    // Redelivery after the fault clears runs the pipeline to completion
    flaky.fail_thumbnail_writes.store(false, Ordering::SeqCst);
    consumer.process_next().await.unwrap();

    assert!(queue.is_drained().await);
    let photos = PhotoStore::new(store);
    let record = photos
        .find_by_uuid(ingested.photo_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.thumbnail_id.is_some());
}

#[tokio::test]
async fn unprocessable_job_is_dead_lettered_after_max_attempts() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let queue = MemoryJobQueue::new();
    let dead_letters = MemoryJobQueue::new();

    // A job referencing a photo that was never ingested
    let ghost = Uuid::new_v4();
    queue
        .publish(Bytes::from(ghost.to_string()))
        .await
        .unwrap();

    let (_tx, shutdown_rx) = watch::channel(false);
    let mut consumer = ThumbnailConsumer::new(
        queue.source(),
        thumbnail_service(store),
        Some(Arc::new(dead_letters.clone())),
        2,
        shutdown_rx,
    );

    consumer.process_next().await.unwrap(); // attempt 1: nacked
    assert_eq!(queue.pending_len().await, 1);

    consumer.process_next().await.unwrap(); // attempt 2: dead-lettered
    assert!(queue.is_drained().await);
    assert_eq!(dead_letters.pending_len().await, 1);
}

#[tokio::test]
async fn malformed_payload_goes_straight_to_dead_letters() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let queue = MemoryJobQueue::new();
    let dead_letters = MemoryJobQueue::new();

    queue.publish(Bytes::from_static(b"garbage")).await.unwrap();

    let (_tx, shutdown_rx) = watch::channel(false);
    let mut consumer = ThumbnailConsumer::new(
        queue.source(),
        thumbnail_service(store),
        Some(Arc::new(dead_letters.clone())),
        5,
        shutdown_rx,
    );

    consumer.process_next().await.unwrap();
    assert!(queue.is_drained().await);
    assert_eq!(dead_letters.pending_len().await, 1);
}

#[tokio::test]
async fn failed_dead_letter_publish_keeps_the_job() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let queue = MemoryJobQueue::new();

    let ghost = Uuid::new_v4();
    queue
        .publish(Bytes::from(ghost.to_string()))
        .await
        .unwrap();

    let (_tx, shutdown_rx) = watch::channel(false);
    let mut consumer = ThumbnailConsumer::new(
        queue.source(),
        thumbnail_service(store),
        Some(Arc::new(FailingPublisher)),
        1,
        shutdown_rx,
    );

    // The dead-letter hand-off fails, so the message must stay queued
    // instead of being acked away
    consumer.process_next().await.unwrap();
    assert!(!queue.is_drained().await);
    assert_eq!(queue.pending_len().await, 1);
}

#[tokio::test]
async fn consumer_stops_when_shutdown_channel_closes() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let queue = MemoryJobQueue::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut consumer =
        ThumbnailConsumer::new(queue.source(), thumbnail_service(store), None, 5, shutdown_rx);
    drop(shutdown_tx);

    tokio::time::timeout(std::time::Duration::from_secs(1), consumer.run())
        .await
        .expect("consumer should stop once the shutdown sender is gone")
        .unwrap();
}

/// Publisher that always fails, to exercise the ingestion compensation path
struct FailingPublisher;

#[async_trait]
impl JobPublisher for FailingPublisher {
    async fn publish(&self, _payload: Bytes) -> Result<()> {
        Err(AppError::Queue("broker unavailable".to_string()))
    }
}

#[tokio::test]
async fn failed_publish_removes_the_orphan_blob() {
    let memory = MemoryBlobStore::new();
    let store: Arc<dyn BlobStore> = Arc::new(memory.clone());
    let ingest = IngestService::new(store, Arc::new(FailingPublisher));

    let staged = stage_file(&sample_jpeg(100, 100)).await;
    let err = ingest.ingest(new_photo(staged.clone())).await.unwrap_err();
    assert!(matches!(err, AppError::Queue(_)));

    // No record may exist without a published job
    assert_eq!(memory.len(Collection::Originals).await, 0);

    tokio::fs::remove_file(&staged).await.ok();
}

#[tokio::test]
async fn invalid_input_is_rejected_before_any_write() {
    let memory = MemoryBlobStore::new();
    let store: Arc<dyn BlobStore> = Arc::new(memory.clone());
    let queue = MemoryJobQueue::new();
    let ingest = IngestService::new(store, Arc::new(queue.clone()));

    let staged = stage_file(&sample_jpeg(100, 100)).await;

    let err = ingest
        .ingest(NewPhoto {
            local_path: staged.clone(),
            content_type: "image/gif".to_string(),
            caption: None,
            owner_id: "B1".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let err = ingest
        .ingest(NewPhoto {
            local_path: staged.clone(),
            content_type: "image/jpeg".to_string(),
            caption: None,
            owner_id: "  ".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    assert_eq!(memory.len(Collection::Originals).await, 0);
    assert_eq!(queue.pending_len().await, 0);

    tokio::fs::remove_file(&staged).await.ok();
}

#[tokio::test]
async fn crashed_consumer_gets_the_job_back() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let queue = MemoryJobQueue::new();
    let ingest = IngestService::new(store.clone(), Arc::new(queue.clone()));

    let staged = stage_file(&sample_jpeg(300, 300)).await;
    let ingested = ingest.ingest(new_photo(staged)).await.unwrap();

    // A consumer takes the delivery and dies without settling it
    {
        let mut source = queue.source();
        let _delivery = source.next().await.unwrap().unwrap();
    }
    queue.redeliver_unacked().await;

    let (_tx, shutdown_rx) = watch::channel(false);
    let mut consumer =
        ThumbnailConsumer::new(queue.source(), thumbnail_service(store.clone()), None, 5, shutdown_rx);
    consumer.process_next().await.unwrap();

    assert!(queue.is_drained().await);
    assert!(store
        .open_read_by_name(Collection::Thumbnails, &thumbnail_name(ingested.photo_id))
        .await
        .is_ok());
}
