//! Queue consumer for thumbnail jobs
//!
//! Pulls deliveries from the job source and runs the pipeline for each.
//! Acknowledgment happens only after the pipeline has fully committed; any
//! failure leaves the message unacked and nacked for redelivery. Attempts are
//! counted per photo so an unprocessable job is routed to the dead-letter
//! topic instead of redelivering forever.

use super::service::ThumbnailService;
use crate::error::Result;
use crate::queue::{JobDelivery, JobPublisher, JobSource};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Long-lived consumer driving the thumbnail pipeline
pub struct ThumbnailConsumer<S: JobSource> {
    source: S,
    service: Arc<ThumbnailService>,
    dead_letters: Option<Arc<dyn JobPublisher>>,
    max_attempts: u32,
    attempts: HashMap<Uuid, u32>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: JobSource> ThumbnailConsumer<S> {
    pub fn new(
        source: S,
        service: Arc<ThumbnailService>,
        dead_letters: Option<Arc<dyn JobPublisher>>,
        max_attempts: u32,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            service,
            dead_letters,
            max_attempts: max_attempts.max(1),
            attempts: HashMap::new(),
            shutdown_rx,
        }
    }

    /// Consume until the source closes or shutdown is signalled
    pub async fn run(&mut self) -> Result<()> {
        info!("starting thumbnail consumer loop");

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    match changed {
                        Ok(()) => {
                            if *self.shutdown_rx.borrow() {
                                info!("shutdown signal received, stopping consumer");
                                break;
                            }
                        }
                        // Sender gone, nothing can signal us anymore
                        Err(_) => {
                            info!("shutdown channel closed, stopping consumer");
                            break;
                        }
                    }
                }

                delivery = self.source.next() => {
                    match delivery {
                        Ok(Some(delivery)) => self.handle(delivery).await,
                        Ok(None) => {
                            warn!("job source closed");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "job source error");
                        }
                    }
                }
            }
        }

        info!("thumbnail consumer stopped");
        Ok(())
    }

    /// Process exactly one delivery. Exposed for tests that drive the
    /// consumer deterministically.
    pub async fn process_next(&mut self) -> Result<()> {
        if let Some(delivery) = self.source.next().await? {
            self.handle(delivery).await;
        }
        Ok(())
    }

    async fn handle(&mut self, delivery: JobDelivery) {
        let photo_id = match std::str::from_utf8(&delivery.payload)
            .ok()
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        {
            Some(id) => id,
            None => {
                warn!("malformed job payload, routing to dead letters");
                let _ = self.dead_letter(&delivery).await;
                return;
            }
        };

        match self.service.process_photo(photo_id).await {
            Ok(thumbnail_id) => {
                self.attempts.remove(&photo_id);
                if let Err(e) = self.source.ack(&delivery).await {
                    // The pipeline committed; redelivery will rerun it
                    // harmlessly thanks to deterministic naming
                    warn!(%photo_id, error = %e, "ack failed after commit");
                } else {
                    info!(%photo_id, %thumbnail_id, "job acknowledged");
                }
            }
            Err(e) => {
                let attempt = {
                    let counter = self.attempts.entry(photo_id).or_insert(0);
                    *counter += 1;
                    *counter
                };

                if attempt >= self.max_attempts {
                    error!(
                        %photo_id,
                        attempts = attempt,
                        error = %e,
                        "job exhausted retries, routing to dead letters"
                    );
                    if self.dead_letter(&delivery).await {
                        self.attempts.remove(&photo_id);
                    }
                } else {
                    warn!(
                        %photo_id,
                        attempt = attempt,
                        error = %e,
                        "job failed, leaving unacked for redelivery"
                    );
                    if let Err(nack_err) = self.source.nack(&delivery).await {
                        error!(%photo_id, error = %nack_err, "nack failed");
                    }
                }
            }
        }
    }

    /// Move a poison message out of the way: publish to the dead-letter
    /// topic, then ack. The message is only acked once the hand-off
    /// succeeded; otherwise it stays unacked so the broker retains it.
    /// Returns whether the hand-off succeeded.
    async fn dead_letter(&mut self, delivery: &JobDelivery) -> bool {
        let handed_off = match self.dead_letters {
            Some(ref dlq) => match dlq.publish(Bytes::copy_from_slice(&delivery.payload)).await {
                Ok(()) => true,
                Err(e) => {
                    error!(error = %e, "dead-letter publish failed, keeping message for redelivery");
                    false
                }
            },
            None => {
                error!("no dead-letter topic configured, keeping message for redelivery");
                false
            }
        };

        if handed_off {
            if let Err(e) = self.source.ack(delivery).await {
                error!(error = %e, "failed to ack dead-lettered message");
            }
        } else if let Err(e) = self.source.nack(delivery).await {
            error!(error = %e, "nack failed for undeliverable message");
        }

        handed_off
    }
}
