/// HTTP handlers for photo and media endpoints
pub mod media;
pub mod photos;

pub use media::{get_original, get_thumbnail};
pub use photos::{create_photo, get_photo};
