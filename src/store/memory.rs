use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{JobStore, Mutator, apply_update};
use crate::error::StoreError;
use crate::job::{Job, JobStatus};

/// In-process job store. One lock guards the whole map, so every
/// conditional update is a single critical section.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Unavailable("job store lock poisoned".into())
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().map_err(poison_err)?;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Job, StoreError> {
        let jobs = self.jobs.lock().map_err(poison_err)?;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected: JobStatus,
        mutator: Mutator,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.lock().map_err(poison_err)?;
        let current = jobs
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let next = apply_update(current, expected, mutator)?;
        jobs.insert(id.to_string(), next.clone());
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::job::TaskPlan;

    fn job() -> Job {
        Job::new("owner", TaskPlan::new("goal").with_captions(1, "casual")).with_id("job-1")
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = MemoryJobStore::new();
        store.create(job()).await.unwrap();
        let fetched = store.get("job-1").await.unwrap();
        assert_eq!(fetched.owner_id, "owner");
        assert!(matches!(
            store.create(job()).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn missing_job_is_not_found() {
        let store = MemoryJobStore::new();
        assert!(matches!(store.get("nope").await, Err(StoreError::NotFound(_))));
        let res = store
            .conditional_update("nope", JobStatus::PendingApproval, Box::new(|_| {}))
            .await;
        assert!(matches!(res, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn failed_update_leaves_record_untouched() {
        let store = MemoryJobStore::new();
        store.create(job()).await.unwrap();
        let before = store.get("job-1").await.unwrap();
        let res = store
            .conditional_update(
                "job-1",
                JobStatus::PendingApproval,
                Box::new(|j| {
                    j.warnings.push("x".into());
                    j.status = JobStatus::Completed;
                }),
            )
            .await;
        assert!(res.is_err());
        assert_eq!(store.get("job-1").await.unwrap(), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_transitions_yield_one_success() {
        let store = Arc::new(MemoryJobStore::new());
        store.create(job()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .conditional_update(
                        "job-1",
                        JobStatus::PendingApproval,
                        Box::new(|j| j.status = JobStatus::Processing),
                    )
                    .await
            }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(StoreError::Conflict { actual, .. }) => {
                    assert_eq!(actual, JobStatus::Processing);
                    conflicts += 1;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 15);
    }
}
