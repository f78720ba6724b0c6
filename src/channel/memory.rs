use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use super::{Delivery, DispatchMessage, MessageChannel, PublishReceipt, Subscription};
use crate::error::ChannelError;

#[derive(Debug, Clone)]
struct Stored {
    message_id: String,
    topic: String,
    message: DispatchMessage,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct ChannelState {
    ready: VecDeque<(Stored, u32)>,
    in_flight: HashMap<String, (Stored, u32)>,
    seen_keys: HashMap<String, String>,
    published: Vec<Stored>,
    publish_attempts: u32,
    failures_remaining: u32,
}

/// In-process broker with idempotency-key deduplication.
///
/// Intended for tests and the demo: no persistence, single process only.
/// Failure injection ([`MemoryChannel::fail_next`]) makes the next N publish
/// calls return `ChannelError::Unavailable`.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    state: Mutex<ChannelState>,
    push_token: Option<String>,
}

fn poison_err<T>(_: PoisonError<T>) -> ChannelError {
    ChannelError::Unavailable("channel lock poisoned".into())
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `token` to every delivery, as a push transport would.
    pub fn with_push_token(mut self, token: impl Into<String>) -> Self {
        self.push_token = Some(token.into());
        self
    }

    pub fn fail_next(&self, publishes: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.failures_remaining = publishes;
        }
    }

    /// Effective (non-deduplicated) publishes so far.
    pub fn published(&self) -> Vec<DispatchMessage> {
        self.state
            .lock()
            .map(|s| s.published.iter().map(|m| m.message.clone()).collect())
            .unwrap_or_default()
    }

    pub fn published_for(&self, job_id: &str) -> usize {
        self.published()
            .iter()
            .filter(|m| m.job_id == job_id)
            .count()
    }

    /// Every publish call, including failed and deduplicated ones.
    pub fn publish_attempts(&self) -> u32 {
        self.state.lock().map(|s| s.publish_attempts).unwrap_or(0)
    }

    /// Queues another delivery of every message ever published, simulating
    /// at-least-once redelivery by the broker.
    pub fn replay_all(&self) {
        if let Ok(mut state) = self.state.lock() {
            let copies: Vec<_> = state.published.iter().cloned().map(|m| (m, 1)).collect();
            state.ready.extend(copies);
        }
    }

    pub fn pending(&self) -> usize {
        self.state.lock().map(|s| s.ready.len()).unwrap_or(0)
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn publish(
        &self,
        topic: &str,
        message: &DispatchMessage,
        idempotency_key: &str,
    ) -> Result<PublishReceipt, ChannelError> {
        let payload = message.encode()?;
        let mut state = self.state.lock().map_err(poison_err)?;
        state.publish_attempts += 1;

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(ChannelError::Unavailable("injected publish failure".into()));
        }

        if let Some(existing) = state.seen_keys.get(idempotency_key) {
            return Ok(PublishReceipt::Deduplicated {
                message_id: existing.clone(),
            });
        }

        let stored = Stored {
            message_id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            message: message.clone(),
            payload,
        };
        state
            .seen_keys
            .insert(idempotency_key.to_string(), stored.message_id.clone());
        state.published.push(stored.clone());
        let message_id = stored.message_id.clone();
        state.ready.push_back((stored, 1));
        Ok(PublishReceipt::Published { message_id })
    }
}

#[async_trait]
impl Subscription for MemoryChannel {
    async fn pull(&self) -> Result<Option<Delivery>, ChannelError> {
        let mut state = self.state.lock().map_err(poison_err)?;
        let Some((stored, attempt)) = state.ready.pop_front() else {
            return Ok(None);
        };
        let delivery = Delivery {
            delivery_id: Uuid::new_v4().to_string(),
            message_id: stored.message_id.clone(),
            attempt,
            payload: stored.payload.clone(),
            push_token: self.push_token.clone(),
        };
        tracing::debug!(topic = %stored.topic, message_id = %stored.message_id, attempt, "delivering");
        state
            .in_flight
            .insert(delivery.delivery_id.clone(), (stored, attempt));
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let mut state = self.state.lock().map_err(poison_err)?;
        state.in_flight.remove(&delivery.delivery_id);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let mut state = self.state.lock().map_err(poison_err)?;
        if let Some((stored, attempt)) = state.in_flight.remove(&delivery.delivery_id) {
            state.ready.push_back((stored, attempt + 1));
        }
        Ok(())
    }
}
