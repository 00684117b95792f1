/// Service layer
///
/// - Ingest service: staged-file validation, blob write, job publish
/// - Thumbnail services: deterministic transform, per-job pipeline, consumer loop
pub mod ingest;
pub mod thumbnail;

pub use ingest::{IngestService, IngestedPhoto, NewPhoto};
pub use thumbnail::{ThumbnailConsumer, ThumbnailProcessor, ThumbnailService};
