use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::{Delivery, DispatchMessage, MessageChannel, PublishReceipt, Subscription};
use crate::error::ChannelError;
use crate::lock::{DirLock, write_atomic};

const PENDING: &str = "pending";
const CLAIMED: &str = "claimed";
const DONE: &str = "done";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    message_id: String,
    attempt: u32,
    message: DispatchMessage,
}

/// Directory-backed broker: one JSON envelope per idempotency key.
///
/// Layout under `<root>/<topic>/`: `pending/<key>.json` until a consumer
/// claims it, `claimed/<key>.json` while it is being handled, then
/// `done/<key>.json` once acked. A key present in any of the three is never
/// published again. Every state change runs under the topic's `.lock`, so
/// separate processes sharing the spool publish and claim each key once.
///
/// A claim older than the claim timeout is assumed to belong to a consumer
/// that died and goes back to `pending` on the next pull.
pub struct SpoolChannel {
    root: PathBuf,
    topic: String,
    push_token: Option<String>,
    claim_timeout: Duration,
}

impl SpoolChannel {
    pub fn open(root: impl Into<PathBuf>, topic: impl Into<String>) -> Result<Self, ChannelError> {
        let root = root.into();
        let topic = topic.into();
        create_layout(&root.join(&topic))?;
        Ok(Self {
            root,
            topic,
            push_token: None,
            claim_timeout: Duration::from_secs(600),
        })
    }

    pub fn with_push_token(mut self, token: impl Into<String>) -> Self {
        self.push_token = Some(token.into());
        self
    }

    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    /// Runs `f` on a blocking thread while holding `topic`'s lock.
    async fn locked<T, F>(&self, topic: &str, f: F) -> Result<T, ChannelError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, ChannelError> + Send + 'static,
    {
        let dir = self.root.join(topic);
        tokio::task::spawn_blocking(move || {
            create_layout(&dir)?;
            DirLock::new(&dir).exclusive(|| f(&dir))
        })
        .await
        .map_err(|e| ChannelError::Unavailable(format!("spool task failed: {e}")))?
    }
}

fn create_layout(dir: &Path) -> std::io::Result<()> {
    for sub in [PENDING, CLAIMED, DONE] {
        std::fs::create_dir_all(dir.join(sub))?;
    }
    Ok(())
}

fn read_envelope(path: &Path) -> Result<Envelope, ChannelError> {
    Ok(serde_json::from_slice(&std::fs::read(path)?)?)
}

fn write_envelope(path: &Path, envelope: &Envelope) -> Result<(), ChannelError> {
    write_atomic(path, &serde_json::to_vec_pretty(envelope)?)?;
    Ok(())
}

/// Moves a claimed envelope back to `pending` with its attempt bumped.
fn release(dir: &Path, name: &str) -> Result<bool, ChannelError> {
    let claimed = dir.join(CLAIMED).join(name);
    let mut envelope = match read_envelope(&claimed) {
        Ok(envelope) => envelope,
        Err(ChannelError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    envelope.attempt += 1;
    write_envelope(&dir.join(PENDING).join(name), &envelope)?;
    std::fs::remove_file(&claimed)?;
    Ok(true)
}

fn reclaim_stale(dir: &Path, timeout: Duration) -> Result<usize, ChannelError> {
    let mut reclaimed = 0;
    for entry in std::fs::read_dir(dir.join(CLAIMED))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".json") {
            continue;
        }
        let age = entry.metadata()?.modified()?.elapsed().unwrap_or_default();
        if age >= timeout && release(dir, &name)? {
            warn!(%name, age_secs = age.as_secs(), "reclaimed stale spool claim");
            reclaimed += 1;
        }
    }
    Ok(reclaimed)
}

fn oldest_pending(dir: &Path) -> Result<Option<String>, ChannelError> {
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir.join(PENDING))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".json") {
            candidates.push((entry.metadata()?.modified()?, name));
        }
    }
    candidates.sort();
    Ok(candidates.into_iter().next().map(|(_, name)| name))
}

fn file_name(key: &str) -> Result<String, ChannelError> {
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ChannelError::Unavailable(format!(
            "idempotency key {key:?} is not a valid spool name"
        )));
    }
    Ok(format!("{key}.json"))
}

#[async_trait]
impl MessageChannel for SpoolChannel {
    async fn publish(
        &self,
        topic: &str,
        message: &DispatchMessage,
        idempotency_key: &str,
    ) -> Result<PublishReceipt, ChannelError> {
        let name = file_name(idempotency_key)?;
        let message = message.clone();
        self.locked(topic, move |dir| {
            for sub in [PENDING, CLAIMED, DONE] {
                let path = dir.join(sub).join(&name);
                if path.try_exists()? {
                    return Ok(PublishReceipt::Deduplicated {
                        message_id: read_envelope(&path)?.message_id,
                    });
                }
            }
            let envelope = Envelope {
                message_id: Uuid::new_v4().to_string(),
                attempt: 1,
                message,
            };
            write_envelope(&dir.join(PENDING).join(&name), &envelope)?;
            Ok(PublishReceipt::Published {
                message_id: envelope.message_id,
            })
        })
        .await
    }
}

#[async_trait]
impl Subscription for SpoolChannel {
    async fn pull(&self) -> Result<Option<Delivery>, ChannelError> {
        let timeout = self.claim_timeout;
        let push_token = self.push_token.clone();
        self.locked(&self.topic, move |dir| {
            reclaim_stale(dir, timeout)?;
            let Some(name) = oldest_pending(dir)? else {
                return Ok(None);
            };
            let claimed = dir.join(CLAIMED).join(&name);
            std::fs::rename(dir.join(PENDING).join(&name), &claimed)?;
            // The claim's age runs from now, not from the last write.
            std::fs::File::options()
                .write(true)
                .open(&claimed)?
                .set_modified(SystemTime::now())?;

            let envelope = read_envelope(&claimed)?;
            Ok(Some(Delivery {
                delivery_id: name,
                message_id: envelope.message_id,
                attempt: envelope.attempt,
                payload: serde_json::to_vec(&envelope.message)?,
                push_token,
            }))
        })
        .await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let name = delivery.delivery_id.clone();
        self.locked(&self.topic, move |dir| {
            let done = dir.join(DONE).join(&name);
            // A reclaimed claim may already be back in pending.
            for sub in [CLAIMED, PENDING] {
                match std::fs::rename(dir.join(sub).join(&name), &done) {
                    Ok(()) => return Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        })
        .await
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let name = delivery.delivery_id.clone();
        self.locked(&self.topic, move |dir| release(dir, &name).map(|_| ()))
            .await
    }
}
