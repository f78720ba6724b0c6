//! Object storage for generated assets.
//!
//! Objects are keyed `<job_id>/<filename>`, so a regenerated asset for the
//! same job and capability overwrites the previous object in place. A job's
//! uploaded reference image lives next to its assets as
//! `reference_image.<ext>` until the job completes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::job::AssetRef;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        job_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<AssetRef, ProviderError>;

    /// Removes one object. `Ok(false)` when there was nothing to remove.
    async fn delete(&self, job_id: &str, filename: &str) -> Result<bool, ProviderError>;

    /// URL prefix every reference handed out by this store starts with.
    fn public_prefix(&self) -> &str;

    async fn put_reference_image(
        &self,
        job_id: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<AssetRef, ProviderError> {
        let ext = match content_type {
            "image/png" => "png",
            "image/jpeg" => "jpg",
            other => {
                return Err(ProviderError::InvalidInput(format!(
                    "reference image must be PNG or JPEG, got {other}"
                )));
            }
        };
        self.put(job_id, &format!("{REFERENCE_IMAGE_STEM}.{ext}"), bytes, content_type)
            .await
    }

    /// Removes whatever reference image was uploaded for `job_id`.
    async fn delete_reference_image(&self, job_id: &str) -> Result<bool, ProviderError> {
        let mut removed = false;
        for ext in ["png", "jpg"] {
            removed |= self.delete(job_id, &format!("{REFERENCE_IMAGE_STEM}.{ext}")).await?;
        }
        Ok(removed)
    }
}

pub const REFERENCE_IMAGE_STEM: &str = "reference_image";

fn object_url(base: &str, key: &ObjectKey) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), key.job, key.file)
}

/// A `<job>/<filename>` pair with both segments made path- and URL-safe.
///
/// ASCII alphanumerics and `-_.` pass through; every other byte, `%`
/// included, is percent-encoded, and a segment of only dots has its dots
/// encoded. Distinct inputs never collide and never escape the job
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ObjectKey {
    job: String,
    file: String,
}

impl ObjectKey {
    fn new(job_id: &str, filename: &str) -> Result<Self, ProviderError> {
        Ok(Self {
            job: encode_segment(job_id)?,
            file: encode_segment(filename)?,
        })
    }
}

fn encode_segment(segment: &str) -> Result<String, ProviderError> {
    if segment.is_empty() {
        return Err(ProviderError::InvalidInput("empty object path segment".into()));
    }
    let dots_only = segment.bytes().all(|b| b == b'.');
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        if (b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.')) && !(dots_only && b == b'.') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    Ok(out)
}

#[derive(Debug)]
pub struct MemoryObjectStore {
    base_url: String,
    objects: Mutex<HashMap<ObjectKey, (Vec<u8>, String)>>,
}

impl MemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, job_id: &str, filename: &str) -> Option<Vec<u8>> {
        let key = ObjectKey::new(job_id, filename).ok()?;
        self.objects
            .lock()
            .ok()
            .and_then(|o| o.get(&key).map(|(bytes, _)| bytes.clone()))
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        job_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<AssetRef, ProviderError> {
        let key = ObjectKey::new(job_id, filename)?;
        let size_bytes = bytes.len() as u64;
        let url = object_url(&self.base_url, &key);
        self.objects
            .lock()
            .map_err(|_| ProviderError::Unavailable("object store lock poisoned".into()))?
            .insert(key, (bytes, content_type.to_string()));
        Ok(AssetRef {
            url,
            content_type: content_type.to_string(),
            size_bytes,
        })
    }

    async fn delete(&self, job_id: &str, filename: &str) -> Result<bool, ProviderError> {
        let key = ObjectKey::new(job_id, filename)?;
        Ok(self
            .objects
            .lock()
            .map_err(|_| ProviderError::Unavailable("object store lock poisoned".into()))?
            .remove(&key)
            .is_some())
    }

    fn public_prefix(&self) -> &str {
        &self.base_url
    }
}

/// Writes objects under a local directory and serves them under `base_url`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    base_url: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        job_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<AssetRef, ProviderError> {
        let key = ObjectKey::new(job_id, filename)?;
        let dir = self.root.join(&key.job);
        let size_bytes = bytes.len() as u64;
        let write = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(dir.join(&key.file), bytes).await
        };
        write
            .await
            .map_err(|e| ProviderError::Unavailable(format!("object write failed: {e}")))?;
        Ok(AssetRef {
            url: object_url(&self.base_url, &key),
            content_type: content_type.to_string(),
            size_bytes,
        })
    }

    async fn delete(&self, job_id: &str, filename: &str) -> Result<bool, ProviderError> {
        let key = ObjectKey::new(job_id, filename)?;
        match tokio::fs::remove_file(self.root.join(&key.job).join(&key.file)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ProviderError::Unavailable(format!("object delete failed: {e}"))),
        }
    }

    fn public_prefix(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_put_returns_prefixed_url() {
        let store = MemoryObjectStore::new("https://assets.example.com/bucket/");
        let r = store
            .put("job-1", "captions.json", b"[]".to_vec(), "application/json")
            .await
            .unwrap();
        assert_eq!(r.url, "https://assets.example.com/bucket/job-1/captions.json");
        assert_eq!(r.size_bytes, 2);
        assert!(r.url.starts_with(store.public_prefix()));
        assert_eq!(store.get("job-1", "captions.json").unwrap(), b"[]");
    }

    #[tokio::test]
    async fn same_key_overwrites() {
        let store = MemoryObjectStore::new("https://a");
        store.put("j", "image.png", vec![1], "image/png").await.unwrap();
        store.put("j", "image.png", vec![2, 2], "image/png").await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("j", "image.png").unwrap(), vec![2, 2]);
    }

    #[tokio::test]
    async fn traversal_segments_are_encoded() {
        let store = MemoryObjectStore::new("https://a");
        let r = store.put("..", "x", vec![], "text/plain").await.unwrap();
        assert_eq!(r.url, "https://a/%2E%2E/x");
        let err = store.put("", "x", vec![], "text/plain").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unusual_job_ids_are_percent_encoded() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(tmp.path(), "https://cdn.test");
        let r = store
            .put("tenant:42/job 1", "image.png", vec![7], "image/png")
            .await
            .unwrap();
        assert_eq!(r.url, "https://cdn.test/tenant%3A42%2Fjob%201/image.png");
        assert!(tmp.path().join("tenant%3A42%2Fjob%201").join("image.png").is_file());

        // `%` itself is encoded, so a pre-encoded id is a different key.
        assert_eq!(encode_segment("a%3Ab").unwrap(), "a%253Ab");
        assert_eq!(encode_segment("v1.2").unwrap(), "v1.2");
    }

    #[tokio::test]
    async fn local_store_writes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(tmp.path(), "file:///srv/assets");
        let r = store
            .put("job-2", "video.mp4", vec![0u8; 16], "video/mp4")
            .await
            .unwrap();
        assert_eq!(r.url, "file:///srv/assets/job-2/video.mp4");
        let on_disk = std::fs::read(tmp.path().join("job-2").join("video.mp4")).unwrap();
        assert_eq!(on_disk.len(), 16);

        assert!(store.delete("job-2", "video.mp4").await.unwrap());
        assert!(!tmp.path().join("job-2").join("video.mp4").exists());
        assert!(!store.delete("job-2", "video.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn reference_image_round_trip() {
        let store = MemoryObjectStore::new("mem://a");
        let r = store
            .put_reference_image("job-3", vec![0xff, 0xd8], "image/jpeg")
            .await
            .unwrap();
        assert_eq!(r.url, "mem://a/job-3/reference_image.jpg");
        store.put("job-3", "image.png", vec![1], "image/png").await.unwrap();

        assert!(store.delete_reference_image("job-3").await.unwrap());
        assert!(store.get("job-3", "reference_image.jpg").is_none());
        assert!(store.get("job-3", "image.png").is_some());
        assert!(!store.delete_reference_image("job-3").await.unwrap());

        let err = store
            .put_reference_image("job-3", vec![0], "image/gif")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidInput(_)));
    }
}
