//! Job queue abstraction
//!
//! A durable point-to-point channel carrying thumbnail-generation jobs with
//! at-least-once delivery. The payload wire format is the photo id's string
//! form, nothing else. Acknowledgment is manual: a delivery is only acked
//! after the job's full pipeline has committed, so a consumer crash leaves
//! the message to be redelivered.

pub mod kafka;
pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

pub use kafka::{KafkaJobPublisher, KafkaJobSource};
pub use memory::{MemoryJobQueue, MemoryJobSource};

/// Producer side of the job queue
#[async_trait]
pub trait JobPublisher: Send + Sync {
    /// Enqueue one message; returns once the broker has accepted it
    async fn publish(&self, payload: Bytes) -> Result<()>;
}

/// One delivered message plus the receipt needed to settle it
#[derive(Clone, Debug)]
pub struct JobDelivery {
    pub payload: Bytes,
    pub(crate) receipt: Receipt,
}

#[derive(Clone, Debug)]
pub(crate) enum Receipt {
    Memory {
        tag: u64,
    },
    Kafka {
        topic: String,
        partition: i32,
        offset: i64,
    },
}

/// Consumer side of the job queue.
///
/// No ordering guarantee across independent messages. A delivery that is
/// neither acked nor nacked before the consumer disappears comes back on
/// reconnect.
#[async_trait]
pub trait JobSource: Send {
    /// Wait for the next delivery. `None` means the source is closed.
    async fn next(&mut self) -> Result<Option<JobDelivery>>;

    /// Settle a delivery after the full side-effecting pipeline committed
    async fn ack(&mut self, delivery: &JobDelivery) -> Result<()>;

    /// Return a delivery for redelivery
    async fn nack(&mut self, delivery: &JobDelivery) -> Result<()>;
}
