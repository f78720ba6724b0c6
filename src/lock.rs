//! Cross-process exclusion for the file-backed stores.
//!
//! Every CLI command is its own process working on the same `data_dir`, so
//! an in-process mutex is not enough. [`DirLock`] takes an exclusive
//! advisory lock (`flock` on unix) on a `.lock` file inside the directory it
//! guards. Separate handles, in one process or many, exclude each other.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use fd_lock::RwLock;

#[derive(Debug, Clone)]
pub(crate) struct DirLock {
    path: PathBuf,
}

impl DirLock {
    pub(crate) fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(".lock"),
        }
    }

    /// Runs `f` while holding the exclusive lock.
    ///
    /// Blocks the calling thread until the lock is free; async callers run
    /// this on `spawn_blocking`.
    pub(crate) fn exclusive<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<io::Error>,
    {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)?;
        let mut lock = RwLock::new(file);
        let _guard = lock.write()?;
        f()
    }
}

/// Writes `bytes` to a sibling temp file, syncs it and renames it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    use std::io::Write;

    let tmp = path.with_extension("tmp");
    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)
}
