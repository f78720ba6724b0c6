//! Human approval gate.
//!
//! `approve` commits `pending_approval → processing` first and publishes the
//! dispatch message only after the commit. The commit and the publish cannot
//! be made atomic: when every publish attempt fails the job stays in
//! `processing`, a `DispatchEscalated` audit event is recorded and the error
//! is returned to the caller. [`ApprovalCoordinator::republish`] is the
//! reconciliation path for such jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::channel::{DispatchMessage, MessageChannel, PublishReceipt};
use crate::error::{ApprovalError, AuthError, ChannelError, DispatchError, StoreError};
use crate::identity::{ActorId, IdentityVerifier};
use crate::job::{AuditEvent, AuditKind, Job, JobStatus, RetryConfig};
use crate::store::JobStore;

/// How `approve`/`reject` answer a job that already left `pending_approval`
/// in the direction the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReapprovalPolicy {
    /// Report the earlier decision as a success. Nothing is published.
    #[default]
    Idempotent,
    /// Report a conflict.
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// This call made the transition and the dispatch was published.
    Approved { message_id: String },
    /// The job was approved earlier; no side effect.
    AlreadyApproved { status: JobStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectOutcome {
    Rejected,
    AlreadyRejected,
}

pub struct ApprovalCoordinator {
    store: Arc<dyn JobStore>,
    channel: Arc<dyn MessageChannel>,
    identity: Arc<dyn IdentityVerifier>,
    topic: String,
    retry: RetryConfig,
    policy: ReapprovalPolicy,
}

impl ApprovalCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        channel: Arc<dyn MessageChannel>,
        identity: Arc<dyn IdentityVerifier>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            channel,
            identity,
            topic: topic.into(),
            retry: RetryConfig::default(),
            policy: ReapprovalPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_policy(mut self, policy: ReapprovalPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn approve(&self, job_id: &str, credential: &str) -> Result<ApprovalOutcome, ApprovalError> {
        let actor = self.authorize(job_id, credential).await?;

        let approver = actor.clone();
        let committed = self
            .store
            .conditional_update(
                job_id,
                JobStatus::PendingApproval,
                Box::new(move |job: &mut Job| {
                    let now = Utc::now();
                    job.status = JobStatus::Processing;
                    job.approved_at = Some(now);
                    job.audit_trail.push(AuditEvent::new(AuditKind::Approved).by(approver));
                }),
            )
            .await;

        let job = match committed {
            Ok(job) => job,
            Err(StoreError::Conflict { actual, .. }) => {
                return match (actual, self.policy) {
                    (JobStatus::Processing | JobStatus::Completed, ReapprovalPolicy::Idempotent) => {
                        info!(job_id, %actor, status = %actual, "approve on already-approved job");
                        Ok(ApprovalOutcome::AlreadyApproved { status: actual })
                    }
                    _ => Err(ApprovalError::Conflict {
                        job_id: job_id.to_string(),
                        status: actual,
                    }),
                };
            }
            Err(e) => return Err(e.into()),
        };
        info!(job_id, %actor, "job approved");

        let receipt = self.publish_with_retry(&job).await?;
        Ok(ApprovalOutcome::Approved {
            message_id: receipt.message_id().to_string(),
        })
    }

    /// `pending_approval → rejected`. Never publishes.
    pub async fn reject(&self, job_id: &str, credential: &str) -> Result<RejectOutcome, ApprovalError> {
        let actor = self.authorize(job_id, credential).await?;

        let rejecter = actor.clone();
        let committed = self
            .store
            .conditional_update(
                job_id,
                JobStatus::PendingApproval,
                Box::new(move |job: &mut Job| {
                    job.status = JobStatus::Rejected;
                    job.audit_trail.push(AuditEvent::new(AuditKind::Rejected).by(rejecter));
                }),
            )
            .await;

        match committed {
            Ok(_) => {
                info!(job_id, %actor, "job rejected");
                Ok(RejectOutcome::Rejected)
            }
            Err(StoreError::Conflict {
                actual: JobStatus::Rejected,
                ..
            }) if self.policy == ReapprovalPolicy::Idempotent => Ok(RejectOutcome::AlreadyRejected),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-sends the dispatch for a job stuck in `processing`.
    ///
    /// Uses the same idempotency key as the first publish, so a message
    /// the broker already accepted is not dispatched twice.
    pub async fn republish(&self, job_id: &str) -> Result<PublishReceipt, ApprovalError> {
        let job = self.store.get(job_id).await?;
        if job.status != JobStatus::Processing {
            return Err(ApprovalError::Conflict {
                job_id: job_id.to_string(),
                status: job.status,
            });
        }

        let receipt = self.publish_with_retry(&job).await?;
        let detail = match &receipt {
            PublishReceipt::Published { message_id } => format!("published {message_id}"),
            PublishReceipt::Deduplicated { message_id } => format!("deduplicated {message_id}"),
        };
        let recorded = self
            .store
            .conditional_update(
                job_id,
                JobStatus::Processing,
                Box::new(move |job: &mut Job| {
                    job.audit_trail
                        .push(AuditEvent::new(AuditKind::Republished).detail(detail));
                }),
            )
            .await;
        if let Err(e) = recorded {
            warn!(job_id, error = %e, "could not record republish");
        }
        Ok(receipt)
    }

    async fn authorize(&self, job_id: &str, credential: &str) -> Result<ActorId, ApprovalError> {
        let actor = self.identity.verify(credential).await?;
        let job = self.store.get(job_id).await?;
        if job.owner_id != actor {
            warn!(job_id, %actor, "actor does not own job");
            return Err(AuthError::NotOwner {
                actor,
                owner: job.owner_id,
            }
            .into());
        }
        Ok(actor)
    }

    async fn publish_with_retry(&self, job: &Job) -> Result<PublishReceipt, ApprovalError> {
        let message = DispatchMessage::new(&job.id, job.task_plan.clone());
        let attempts = self.retry.max_retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self
                .channel
                .publish(&self.topic, &message, &message.idempotency_key)
                .await
            {
                Ok(receipt) => {
                    info!(job_id = %job.id, attempt, message_id = receipt.message_id(), "dispatch published");
                    return Ok(receipt);
                }
                Err(e) => {
                    warn!(job_id = %job.id, attempt, error = %e, "dispatch publish failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        let delay = self.retry.delay_for_attempt(attempt);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        let last_error =
            last_error.unwrap_or_else(|| ChannelError::Unavailable("no publish attempted".into()));
        error!(
            job_id = %job.id,
            attempts,
            error = %last_error,
            "dispatch publish exhausted, job left in processing for reconciliation"
        );
        self.record_escalation(&job.id, attempts, &last_error).await;
        Err(DispatchError {
            job_id: job.id.clone(),
            attempts,
            last_error,
        }
        .into())
    }

    async fn record_escalation(&self, job_id: &str, attempts: u32, cause: &ChannelError) {
        let detail = format!("publish failed after {attempts} attempts: {cause}");
        let recorded = self
            .store
            .conditional_update(
                job_id,
                JobStatus::Processing,
                Box::new(move |job: &mut Job| {
                    job.audit_trail
                        .push(AuditEvent::new(AuditKind::DispatchEscalated).detail(detail));
                }),
            )
            .await;
        if let Err(e) = recorded {
            error!(job_id, error = %e, "could not record dispatch escalation");
        }
    }
}
