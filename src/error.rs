use std::time::Duration;

use thiserror::Error;

use crate::job::{Capability, JobStatus};

/// Malformed task plan, raised at intake before a job exists.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid task plan: {0}")]
pub struct ValidationError(String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job {job_id} is {actual}, expected {expected}")]
    Conflict {
        job_id: String,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    #[error("job already exists: {0}")]
    AlreadyExists(String),

    #[error("update would violate job invariant: {0}")]
    InvariantViolation(String),

    #[error("job store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("message channel unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode dispatch message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,

    #[error("credential rejected")]
    InvalidCredential,

    #[error("actor {actor} does not own job (owner: {owner})")]
    NotOwner { actor: String, owner: String },

    #[error("push delivery sender could not be verified")]
    UntrustedSender,
}

/// Normalized failure taxonomy shared by every generator provider.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("provider timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ProviderError {
    /// Whether a fallback asset may stand in for the real output.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            ProviderError::Unavailable(_) | ProviderError::QuotaExceeded(_)
        )
    }
}

/// Extraction failure for a delegated coordinator result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("coordinator output contained no structured or recognizable result")]
    Unparseable,

    #[error("coordinator output reported no {0} asset")]
    MissingAsset(Capability),

    #[error("coordinator reported an untrusted {capability} url: {url}")]
    UntrustedUrl { capability: Capability, url: String },
}

/// Transport failure talking to the delegated multi-agent engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("coordinator engine timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("coordinator engine returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("coordinator engine unreachable: {0}")]
    Network(#[from] reqwest::Error),
}

/// Publish retries exhausted after a committed approval.
#[derive(Debug, Error)]
#[error("dispatch of job {job_id} failed after {attempts} attempts: {last_error}")]
pub struct DispatchError {
    pub job_id: String,
    pub attempts: u32,
    pub last_error: ChannelError,
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job {job_id} cannot change from {status}")]
    Conflict { job_id: String, status: JobStatus },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("job store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ApprovalError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApprovalError::NotFound(id),
            StoreError::Conflict { job_id, actual, .. } => ApprovalError::Conflict {
                job_id,
                status: actual,
            },
            other => ApprovalError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_maps_to_approval_conflict() {
        let err: ApprovalError = StoreError::Conflict {
            job_id: "j1".into(),
            expected: JobStatus::PendingApproval,
            actual: JobStatus::Rejected,
        }
        .into();
        assert!(matches!(
            err,
            ApprovalError::Conflict {
                status: JobStatus::Rejected,
                ..
            }
        ));
        assert_eq!(err.to_string(), "job j1 cannot change from rejected");
    }

    #[test]
    fn provider_error_display() {
        let err = ProviderError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "provider timed out after 1.5s");
        assert!(ProviderError::QuotaExceeded("daily".into()).allows_fallback());
        assert!(!ProviderError::InvalidInput("bad".into()).allows_fallback());
        assert!(!ProviderError::Timeout(Duration::from_secs(1)).allows_fallback());
    }

    #[test]
    fn dispatch_error_display() {
        let err = DispatchError {
            job_id: "j9".into(),
            attempts: 4,
            last_error: ChannelError::Unavailable("broker down".into()),
        };
        assert_eq!(
            err.to_string(),
            "dispatch of job j9 failed after 4 attempts: message channel unavailable: broker down"
        );
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StoreError>();
        assert_send_sync::<ApprovalError>();
        assert_send_sync::<ProviderError>();
    }
}
