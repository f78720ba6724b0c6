//! Dispatch message channel between the approval gate and the dispatcher.
//!
//! This module provides:
//!
//! - [`MessageChannel`]: publish side, at-least-once, keyed by idempotency key
//! - [`Subscription`]: consumer side with explicit ack/nack
//! - [`MemoryChannel`]: in-process broker for tests and the demo
//! - [`SpoolChannel`]: directory-backed broker used by the CLI
//!
//! Publishing the same idempotency key twice never yields two effective
//! dispatches: the second publish reports [`PublishReceipt::Deduplicated`].

mod memory;
mod spool;

pub use memory::MemoryChannel;
pub use spool::SpoolChannel;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::job::TaskPlan;

/// Payload carried from the approval gate to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub job_id: String,
    pub task_plan: TaskPlan,
    pub idempotency_key: String,
}

impl DispatchMessage {
    pub fn new(job_id: impl Into<String>, task_plan: TaskPlan) -> Self {
        let job_id = job_id.into();
        Self {
            idempotency_key: idempotency_key(&job_id),
            job_id,
            task_plan,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ChannelError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Idempotency key for a job's dispatch. Stable across retries and republishes.
pub fn idempotency_key(job_id: &str) -> String {
    format!("dispatch-{job_id}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishReceipt {
    Published { message_id: String },
    /// A message with the same idempotency key was already accepted.
    Deduplicated { message_id: String },
}

impl PublishReceipt {
    pub fn message_id(&self) -> &str {
        match self {
            Self::Published { message_id } | Self::Deduplicated { message_id } => message_id,
        }
    }
}

/// One delivery of a message to a consumer. The same message may be
/// delivered more than once.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_id: String,
    pub message_id: String,
    /// 1-indexed delivery attempt.
    pub attempt: u32,
    pub payload: Vec<u8>,
    /// Sender token attached by the push transport, if any.
    pub push_token: Option<String>,
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        message: &DispatchMessage,
        idempotency_key: &str,
    ) -> Result<PublishReceipt, ChannelError>;
}

#[async_trait]
pub trait Subscription: Send + Sync {
    /// Next pending delivery, or `None` when the subscription is drained.
    async fn pull(&self) -> Result<Option<Delivery>, ChannelError>;

    /// Settles the delivery; it will not be redelivered.
    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError>;

    /// Returns the delivery to the queue for a later attempt.
    async fn nack(&self, delivery: &Delivery) -> Result<(), ChannelError>;
}
