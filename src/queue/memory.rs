//! In-process job queue
//!
//! Backs the integration tests and local development with the same manual-ack
//! contract as the broker: a delivered message stays in flight until acked,
//! a nack requeues it, and `redeliver_unacked` models a consumer crash by
//! returning every in-flight message to the pending set.

use super::{JobDelivery, JobPublisher, JobSource, Receipt};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

#[derive(Default)]
struct State {
    pending: VecDeque<(u64, Bytes)>,
    in_flight: HashMap<u64, Bytes>,
    next_tag: u64,
}

/// Point-to-point queue held in process memory
#[derive(Clone, Default)]
pub struct MemoryJobQueue {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumer handle over this queue
    pub fn source(&self) -> MemoryJobSource {
        MemoryJobSource {
            queue: self.clone(),
        }
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// True once every published message has been acked
    pub async fn is_drained(&self) -> bool {
        let state = self.state.lock().await;
        state.pending.is_empty() && state.in_flight.is_empty()
    }

    /// Return all unacked deliveries to the pending set, as a broker does
    /// when a consumer disconnects without acknowledging
    pub async fn redeliver_unacked(&self) {
        let mut state = self.state.lock().await;
        let tags: Vec<u64> = state.in_flight.keys().copied().collect();
        for tag in tags {
            if let Some(payload) = state.in_flight.remove(&tag) {
                state.pending.push_back((tag, payload));
            }
        }
        drop(state);
        self.notify.notify_waiters();
    }

    async fn take(&self) -> Option<JobDelivery> {
        let mut state = self.state.lock().await;
        let (tag, payload) = state.pending.pop_front()?;
        state.in_flight.insert(tag, payload.clone());
        Some(JobDelivery {
            payload,
            receipt: Receipt::Memory { tag },
        })
    }
}

#[async_trait]
impl JobPublisher for MemoryJobQueue {
    async fn publish(&self, payload: Bytes) -> Result<()> {
        let mut state = self.state.lock().await;
        let tag = state.next_tag;
        state.next_tag += 1;
        state.pending.push_back((tag, payload));
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Consumer handle for [`MemoryJobQueue`]
pub struct MemoryJobSource {
    queue: MemoryJobQueue,
}

#[async_trait]
impl JobSource for MemoryJobSource {
    async fn next(&mut self) -> Result<Option<JobDelivery>> {
        loop {
            let notified = self.queue.notify.notified();
            if let Some(delivery) = self.queue.take().await {
                return Ok(Some(delivery));
            }
            notified.await;
        }
    }

    async fn ack(&mut self, delivery: &JobDelivery) -> Result<()> {
        let Receipt::Memory { tag } = delivery.receipt else {
            return Err(AppError::Queue("foreign delivery receipt".to_string()));
        };
        self.queue.state.lock().await.in_flight.remove(&tag);
        Ok(())
    }

    async fn nack(&mut self, delivery: &JobDelivery) -> Result<()> {
        let Receipt::Memory { tag } = delivery.receipt else {
            return Err(AppError::Queue("foreign delivery receipt".to_string()));
        };
        let mut state = self.queue.state.lock().await;
        if let Some(payload) = state.in_flight.remove(&tag) {
            state.pending.push_back((tag, payload));
        }
        drop(state);
        self.queue.notify.notify_waiters();
        Ok(())
    }
}
