//! Transactional job storage.
//!
//! [`JobStore::conditional_update`] is the primitive the whole pipeline leans
//! on: the status check, the mutation and the write happen as one indivisible
//! step, so two callers racing on the same expected status get exactly one
//! success. Implementations also police the job invariants after the mutator
//! runs, on a scratch copy, and never persist a record that breaks them.

mod file;
mod memory;

pub use file::FileJobStore;
pub use memory::MemoryJobStore;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreError;
use crate::job::{Job, JobStatus};

/// Mutation applied inside a conditional update.
pub type Mutator = Box<dyn FnOnce(&mut Job) + Send>;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new job. Fails if the id is taken.
    async fn create(&self, job: Job) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Job, StoreError>;

    /// Atomically applies `mutator` if the job is currently `expected`.
    ///
    /// Returns the committed job, or `StoreError::Conflict` carrying the
    /// actual status when the check fails.
    async fn conditional_update(
        &self,
        id: &str,
        expected: JobStatus,
        mutator: Mutator,
    ) -> Result<Job, StoreError>;
}

/// Read-check-write core shared by every store implementation.
///
/// Must be called while the implementation holds its exclusive lock.
pub(crate) fn apply_update(
    current: &Job,
    expected: JobStatus,
    mutator: Mutator,
) -> Result<Job, StoreError> {
    if current.status != expected {
        return Err(StoreError::Conflict {
            job_id: current.id.clone(),
            expected,
            actual: current.status,
        });
    }
    if current.status.is_terminal() {
        return Err(StoreError::InvariantViolation(format!(
            "job {} is terminal ({})",
            current.id, current.status
        )));
    }

    let mut next = current.clone();
    mutator(&mut next);

    if next.status != current.status && !current.status.can_transition_to(next.status) {
        return Err(StoreError::IllegalTransition {
            from: current.status,
            to: next.status,
        });
    }
    if next.id != current.id || next.owner_id != current.owner_id {
        return Err(StoreError::InvariantViolation("identity fields changed".into()));
    }
    if next.task_plan != current.task_plan {
        return Err(StoreError::InvariantViolation("task_plan is immutable".into()));
    }
    if next.created_at != current.created_at {
        return Err(StoreError::InvariantViolation("created_at is immutable".into()));
    }
    if !next.warnings.starts_with(&current.warnings) {
        return Err(StoreError::InvariantViolation("warnings are append-only".into()));
    }
    if !next.audit_trail.starts_with(&current.audit_trail) {
        return Err(StoreError::InvariantViolation("audit_trail is append-only".into()));
    }

    next.updated_at = Utc::now();
    Ok(next)
}
