//! Thumbnail generation
//!
//! - `processor`: deterministic square resize and JPEG re-encode
//! - `service`: per-job pipeline (fetch, transform, persist, link)
//! - `consumer`: queue loop with manual ack and bounded retry

pub mod consumer;
pub mod processor;
pub mod service;

pub use consumer::ThumbnailConsumer;
pub use processor::{ThumbnailProcessor, ThumbnailResult};
pub use service::ThumbnailService;

use uuid::Uuid;

/// Logical name a photo's thumbnail is stored under.
///
/// Derived from the photo id so reprocessing the same job overwrites instead
/// of proliferating blobs; this is what makes redelivery safe.
pub fn thumbnail_name(photo_id: Uuid) -> String {
    format!("{photo_id}.jpg")
}
