/// Photo Service - HTTP Server
///
/// Accepts photo uploads, serves photo records and media streams, and emits
/// one thumbnail job per ingested photo. Thumbnails themselves are produced
/// by the separate thumb-worker binary.
use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use std::io;
use std::sync::Arc;

use photo_service::handlers;
use photo_service::photos::PhotoStore;
use photo_service::queue::{JobPublisher, KafkaJobPublisher};
use photo_service::services::IngestService;
use photo_service::storage::{BlobStore, S3BlobStore};
use photo_service::Config;

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().expect("Failed to load configuration");
    let bind_address = format!("{}:{}", config.app.host, config.app.port);

    let store: Arc<dyn BlobStore> = Arc::new(
        S3BlobStore::from_config(&config.storage)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?,
    );

    let publisher: Arc<dyn JobPublisher> = Arc::new(
        KafkaJobPublisher::new(&config.queue.brokers, &config.queue.topic)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?,
    );

    let ingest = web::Data::new(IngestService::new(store.clone(), publisher));
    let photos = web::Data::new(PhotoStore::new(store.clone()));
    let store_data = web::Data::new(store);
    let config_data = web::Data::new(config);

    tracing::info!(address = %bind_address, "photo service starting");

    HttpServer::new(move || {
        App::new()
            .app_data(config_data.clone())
            .app_data(ingest.clone())
            .app_data(photos.clone())
            .app_data(store_data.clone())
            .wrap(middleware::Logger::default())
            .route(
                "/health",
                web::get()
                    .to(|| async { HttpResponse::Ok().json(serde_json::json!({"status": "ok"})) }),
            )
            .service(
                web::scope("/photos")
                    .route("", web::post().to(handlers::create_photo))
                    .route("/{id}", web::get().to(handlers::get_photo)),
            )
            .service(
                web::scope("/media")
                    .route("/images/{id}", web::get().to(handlers::get_original))
                    .route("/thumbnail/{filename}", web::get().to(handlers::get_thumbnail)),
            )
    })
    .bind(&bind_address)?
    .run()
    .await
}
