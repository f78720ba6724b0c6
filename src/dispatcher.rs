//! Consumer side: turns dispatch deliveries into terminal job records.
//!
//! Deliveries are at-least-once. The status check before generating and the
//! conditional final commit keep duplicates from producing a second
//! transition. A duplicate that arrives before the first commit may still
//! regenerate assets; objects are keyed per job and file, so it overwrites
//! the same objects. Once a job completes, its uploaded reference image is
//! removed from the object store.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::channel::{Delivery, DispatchMessage, Subscription, idempotency_key};
use crate::error::{ChannelError, StoreError};
use crate::identity::PushVerifier;
use crate::job::{AuditEvent, AuditKind, Job, JobStatus};
use crate::objects::ObjectStore;
use crate::orchestrator::{Strategy, StrategyKind, StrategySelector};
use crate::store::JobStore;

/// What happened to one delivery. Every outcome is acked; an `Err` from
/// [`TaskDispatcher::handle`] means the delivery should be nacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    Completed { job_id: String, strategy: StrategyKind },
    Failed { job_id: String, strategy: StrategyKind },
    /// Already terminal; nothing was regenerated.
    Duplicate { job_id: String, status: JobStatus },
    /// The job is in a status a dispatch should never see.
    Inconsistent { job_id: String, status: JobStatus },
    NotFound { job_id: String },
    Malformed { reason: String },
    /// Push sender failed verification; the payload was not read.
    Untrusted,
    /// Another delivery committed first.
    LostRace { job_id: String, status: JobStatus },
}

pub struct TaskDispatcher {
    store: Arc<dyn JobStore>,
    push: Arc<dyn PushVerifier>,
    selector: StrategySelector,
    direct: Arc<dyn Strategy>,
    delegated: Option<Arc<dyn Strategy>>,
    objects: Option<Arc<dyn ObjectStore>>,
}

impl TaskDispatcher {
    pub fn new(store: Arc<dyn JobStore>, push: Arc<dyn PushVerifier>, direct: Arc<dyn Strategy>) -> Self {
        Self {
            store,
            push,
            selector: StrategySelector::default(),
            direct,
            delegated: None,
            objects: None,
        }
    }

    /// Object store holding uploaded reference images, cleaned up on completion.
    pub fn with_objects(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn with_delegated(mut self, selector: StrategySelector, delegated: Arc<dyn Strategy>) -> Self {
        self.selector = selector;
        self.delegated = Some(delegated);
        self
    }

    fn strategy_for(&self, job_id: &str) -> &Arc<dyn Strategy> {
        match (self.selector.select(job_id), &self.delegated) {
            (StrategyKind::DelegatedCoordinator, Some(delegated)) => delegated,
            _ => &self.direct,
        }
    }

    pub async fn handle(&self, delivery: &Delivery) -> Result<HandleOutcome, StoreError> {
        if let Err(e) = self.push.verify(delivery) {
            warn!(delivery_id = %delivery.delivery_id, error = %e, "dropping unverified delivery");
            return Ok(HandleOutcome::Untrusted);
        }

        let message = match DispatchMessage::decode(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(delivery_id = %delivery.delivery_id, error = %e, "malformed dispatch payload");
                return Ok(HandleOutcome::Malformed {
                    reason: e.to_string(),
                });
            }
        };
        if message.idempotency_key != idempotency_key(&message.job_id) {
            warn!(job_id = %message.job_id, key = %message.idempotency_key, "idempotency key mismatch");
            return Ok(HandleOutcome::Malformed {
                reason: format!("idempotency key {} does not match job", message.idempotency_key),
            });
        }
        let job_id = message.job_id;

        let job = match self.store.get(&job_id).await {
            Ok(job) => job,
            Err(StoreError::NotFound(_)) => {
                warn!(%job_id, "dispatch for unknown job");
                return Ok(HandleOutcome::NotFound { job_id });
            }
            Err(e) => return Err(e),
        };

        match job.status {
            JobStatus::Processing => {}
            status @ (JobStatus::Completed | JobStatus::Failed) => {
                info!(%job_id, %status, attempt = delivery.attempt, "duplicate delivery ignored");
                return Ok(HandleOutcome::Duplicate { job_id, status });
            }
            status => {
                error!(%job_id, %status, "dispatch for job that is not processing");
                return Ok(HandleOutcome::Inconsistent { job_id, status });
            }
        }
        if job.task_plan != message.task_plan {
            warn!(%job_id, "dispatch plan differs from stored plan, using stored plan");
        }

        let strategy = self.strategy_for(&job_id);
        let kind = strategy.kind();
        info!(%job_id, strategy = %kind, capabilities = ?job.task_plan.requested(), "generating");
        let report = strategy.run_all(&job_id, &job.task_plan).await;

        let status = if report.all_failed() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        let detail = format!(
            "strategy={kind} assets={} failures={}",
            report.assets.len(),
            report.failures.len()
        );
        let committed = self
            .store
            .conditional_update(
                &job_id,
                JobStatus::Processing,
                Box::new(move |job: &mut Job| {
                    let kind = match status {
                        JobStatus::Failed => AuditKind::Failed,
                        _ => AuditKind::Completed,
                    };
                    job.status = status;
                    job.assets.extend(report.assets);
                    job.warnings.extend(report.warnings);
                    job.audit_trail.push(AuditEvent::new(kind).detail(detail));
                }),
            )
            .await;

        match committed {
            Ok(job) => {
                info!(%job_id, status = %job.status, warnings = job.warnings.len(), "job settled");
                if job.status == JobStatus::Completed && job.task_plan.reference_image_url.is_some() {
                    self.remove_reference_image(&job_id).await;
                }
                Ok(match job.status {
                    JobStatus::Failed => HandleOutcome::Failed { job_id, strategy: kind },
                    _ => HandleOutcome::Completed { job_id, strategy: kind },
                })
            }
            Err(StoreError::Conflict { actual, .. }) => {
                info!(%job_id, status = %actual, "lost commit race to another delivery");
                Ok(HandleOutcome::LostRace {
                    job_id,
                    status: actual,
                })
            }
            Err(StoreError::NotFound(_)) => Ok(HandleOutcome::NotFound { job_id }),
            Err(e @ (StoreError::Unavailable(_) | StoreError::Io(_))) => Err(e),
            Err(e) => {
                error!(%job_id, error = %e, "final commit refused");
                Ok(HandleOutcome::Inconsistent {
                    job_id,
                    status: JobStatus::Processing,
                })
            }
        }
    }

    /// Best effort; a leftover reference image never fails the job.
    async fn remove_reference_image(&self, job_id: &str) {
        let Some(objects) = &self.objects else {
            return;
        };
        match objects.delete_reference_image(job_id).await {
            Ok(true) => info!(%job_id, "reference image removed"),
            Ok(false) => debug!(%job_id, "no stored reference image to remove"),
            Err(e) => warn!(%job_id, error = %e, "failed to remove reference image"),
        }
    }
}

/// Tally of one [`DispatchWorker::drain`] run.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub outcomes: Vec<HandleOutcome>,
    pub nacked: usize,
}

/// Pulls deliveries and settles each one with the dispatcher's verdict.
pub struct DispatchWorker {
    dispatcher: Arc<TaskDispatcher>,
}

impl DispatchWorker {
    pub fn new(dispatcher: Arc<TaskDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Handles deliveries until the subscription is empty.
    ///
    /// A message nacked earlier in the same run is nacked again and ends the
    /// run, leaving it for the next drain.
    pub async fn drain(&self, subscription: &dyn Subscription) -> Result<DrainReport, ChannelError> {
        let mut report = DrainReport::default();
        let mut retried = HashSet::new();

        while let Some(delivery) = subscription.pull().await? {
            if retried.contains(&delivery.message_id) {
                subscription.nack(&delivery).await?;
                report.nacked += 1;
                break;
            }
            match self.dispatcher.handle(&delivery).await {
                Ok(outcome) => {
                    subscription.ack(&delivery).await?;
                    report.outcomes.push(outcome);
                }
                Err(e) => {
                    warn!(message_id = %delivery.message_id, error = %e, "handling failed, nacking");
                    subscription.nack(&delivery).await?;
                    retried.insert(delivery.message_id.clone());
                    report.nacked += 1;
                }
            }
        }
        Ok(report)
    }
}
