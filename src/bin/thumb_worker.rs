//! Thumbnail Worker - queue consumer for asynchronous thumbnail generation
//!
//! Listens on the job topic, runs the fetch → transform → persist → link
//! pipeline for each delivered photo id, and acknowledges a message only once
//! the pipeline has fully committed. Jobs that keep failing are routed to the
//! dead-letter topic instead of redelivering forever.
//!
//! Environment variables:
//! - KAFKA_BROKERS: broker addresses (default: "localhost:9092")
//! - THUMBNAIL_TOPIC: job topic (default: "thumbnail-jobs")
//! - THUMBNAIL_DLQ_TOPIC: dead-letter topic (default: "<topic>.dlq")
//! - THUMBNAIL_GROUP_ID: consumer group (default: "thumbnail-worker")
//! - THUMBNAIL_MAX_ATTEMPTS: deliveries before dead-lettering (default: 5)
//! - S3_ORIGINALS_BUCKET / S3_THUMBNAILS_BUCKET: blob store buckets
//! - THUMB_DIMENSION / THUMB_QUALITY: transform parameters

use std::sync::Arc;

use photo_service::queue::{JobPublisher, KafkaJobPublisher, KafkaJobSource};
use photo_service::services::{ThumbnailConsumer, ThumbnailProcessor, ThumbnailService};
use photo_service::storage::{BlobStore, S3BlobStore};
use photo_service::Config;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("thumb_worker=info".parse().expect("valid directive"))
                .add_directive("photo_service=info".parse().expect("valid directive")),
        )
        .init();

    info!("starting thumbnail worker");

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    info!(
        brokers = %config.queue.brokers,
        topic = %config.queue.topic,
        group_id = %config.queue.group_id,
        "configuration loaded"
    );

    let store: Arc<dyn BlobStore> = Arc::new(S3BlobStore::from_config(&config.storage).await?);

    let processor = ThumbnailProcessor::new(config.thumbnail.clone());
    let service = Arc::new(ThumbnailService::new(store, processor));

    let source = KafkaJobSource::new(&config.queue)?;
    let dead_letters: Arc<dyn JobPublisher> = Arc::new(KafkaJobPublisher::new(
        &config.queue.brokers,
        &config.queue.dead_letter_topic,
    )?);

    // Graceful shutdown on SIGINT
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut consumer = ThumbnailConsumer::new(
        source,
        service,
        Some(dead_letters),
        config.queue.max_attempts,
        shutdown_rx,
    );

    if let Err(e) = consumer.run().await {
        error!(error = %e, "consumer error");
    }

    info!("thumbnail worker stopped");
    Ok(())
}
