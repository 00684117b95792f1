//! Photo Service
//!
//! Accepts uploaded photos, stores them durably, and generates thumbnails
//! asynchronously through a queue-fed worker.

pub mod config;
pub mod error;
pub mod handlers;
pub mod photos;
pub mod queue;
pub mod services;
pub mod storage;

// Public re-exports
pub use config::Config;
pub use error::{AppError, Result};
