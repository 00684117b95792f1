/// Configuration management for the photo service
///
/// Loads configuration from environment variables with sensible defaults.
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub thumbnail: ThumbnailSettings,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Directory where multipart uploads are staged before ingestion
    pub staging_dir: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StorageConfig {
    pub originals_bucket: String,
    pub thumbnails_bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct QueueConfig {
    pub brokers: String,
    pub topic: String,
    pub dead_letter_topic: String,
    pub group_id: String,
    /// Deliveries per photo before the job is routed to the dead-letter topic
    pub max_attempts: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ThumbnailSettings {
    pub dimension: u32,
    pub quality: u8,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let topic =
            std::env::var("THUMBNAIL_TOPIC").unwrap_or_else(|_| "thumbnail-jobs".to_string());
        let dead_letter_topic =
            std::env::var("THUMBNAIL_DLQ_TOPIC").unwrap_or_else(|_| format!("{topic}.dlq"));

        Ok(Config {
            app: AppConfig {
                host: std::env::var("PHOTO_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("PHOTO_SERVICE_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .unwrap_or(8080),
                staging_dir: std::env::var("UPLOAD_STAGING_DIR")
                    .unwrap_or_else(|_| std::env::temp_dir().join("photo-uploads").display().to_string()),
            },
            storage: StorageConfig {
                originals_bucket: std::env::var("S3_ORIGINALS_BUCKET")
                    .unwrap_or_else(|_| "photos".to_string()),
                thumbnails_bucket: std::env::var("S3_THUMBNAILS_BUCKET")
                    .unwrap_or_else(|_| "thumbnails".to_string()),
                region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                endpoint: std::env::var("S3_ENDPOINT").ok(),
            },
            queue: QueueConfig {
                brokers: std::env::var("KAFKA_BROKERS")
                    .unwrap_or_else(|_| "localhost:9092".to_string()),
                topic,
                dead_letter_topic,
                group_id: std::env::var("THUMBNAIL_GROUP_ID")
                    .unwrap_or_else(|_| "thumbnail-worker".to_string()),
                max_attempts: std::env::var("THUMBNAIL_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
            },
            thumbnail: ThumbnailSettings {
                dimension: std::env::var("THUMB_DIMENSION")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(100),
                quality: std::env::var("THUMB_QUALITY")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(85),
            },
        })
    }
}
