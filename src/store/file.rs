use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{JobStore, Mutator, apply_update};
use crate::error::StoreError;
use crate::job::{Job, JobStatus};
use crate::lock::{DirLock, write_atomic};

/// One JSON document per job under a directory.
///
/// Every read-check-write runs under an exclusive lock on `<dir>/.lock`, so
/// several processes (or several handles in one process) can share the
/// directory and still get exactly one winner per conditional update.
/// Writes are atomic renames; readers never see a partial document.
pub struct FileJobStore {
    dir: PathBuf,
    lock: DirLock,
}

impl FileJobStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            lock: DirLock::new(&dir),
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Runs `f` on a blocking thread while holding the directory lock.
    async fn locked<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, StoreError> + Send + 'static,
    {
        let dir = self.dir.clone();
        let lock = self.lock.clone();
        tokio::task::spawn_blocking(move || lock.exclusive(|| f(&dir)))
            .await
            .map_err(|e| StoreError::Unavailable(format!("job store task failed: {e}")))?
    }
}

fn path_for(dir: &Path, id: &str) -> Option<PathBuf> {
    is_safe_id(id).then(|| dir.join(format!("{id}.json")))
}

fn read(dir: &Path, id: &str) -> Result<Job, StoreError> {
    let path = path_for(dir, id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    match std::fs::read(&path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(id.to_string())),
        Err(e) => Err(e.into()),
    }
}

fn write(dir: &Path, job: &Job) -> Result<(), StoreError> {
    let path = path_for(dir, &job.id)
        .ok_or_else(|| StoreError::InvariantViolation(format!("unsafe job id {:?}", job.id)))?;
    write_atomic(&path, &serde_json::to_vec_pretty(job)?)?;
    Ok(())
}

fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn create(&self, job: Job) -> Result<(), StoreError> {
        self.locked(move |dir| {
            match read(dir, &job.id) {
                Ok(_) => return Err(StoreError::AlreadyExists(job.id)),
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            write(dir, &job)
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Job, StoreError> {
        let id = id.to_string();
        self.locked(move |dir| read(dir, &id)).await
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected: JobStatus,
        mutator: Mutator,
    ) -> Result<Job, StoreError> {
        let id = id.to_string();
        self.locked(move |dir| {
            let current = read(dir, &id)?;
            let next = apply_update(&current, expected, mutator)?;
            write(dir, &next)?;
            Ok(next)
        })
        .await
    }
}
