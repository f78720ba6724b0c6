use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job record.
///
/// Each job flows through: PENDING_APPROVAL → PROCESSING → COMPLETED | FAILED,
/// or PENDING_APPROVAL → REJECTED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    PendingApproval,
    Processing,
    Completed,
    Failed,
    Rejected,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::PendingApproval => write!(f, "pending_approval"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl JobStatus {
    /// Terminal statuses accept no further mutation.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Rejected
        )
    }

    /// Whether `self → next` is one of the four edges of the job state machine.
    ///
    /// - `PendingApproval` may move to `Processing` (approval) or `Rejected`.
    /// - `Processing` may move to `Completed` or `Failed` (dispatch commit).
    /// - Everything else, including self-loops, is not a transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::PendingApproval, JobStatus::Processing)
                | (JobStatus::PendingApproval, JobStatus::Rejected)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub fn all() -> [JobStatus; 5] {
        [
            JobStatus::PendingApproval,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Rejected,
        ]
    }
}
