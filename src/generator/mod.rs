//! Generator capability set.
//!
//! Every capability (captions, image, video) exposes the same [`Generator`]
//! contract: produce one stored asset for a job, optionally with warnings,
//! or fail with a [`ProviderError`]. Concrete generators wrap one provider
//! each (see [`provider`]) and add the shared policy:
//!
//! - fallback assets when the provider is unavailable or over quota, if the
//!   capability is configured for it
//! - a post-generation size check that warns instead of failing
//!
//! The [`GeneratorRegistry`] maps capability → implementation and is what
//! the orchestration strategies are handed, so tests can swap in doubles.

mod captions;
mod copy;
mod http;
mod image;
pub mod provider;
mod video;

pub use captions::CaptionGenerator;
pub use copy::{AnthropicCopyProvider, parse_numbered_captions};
pub use http::HttpMediaProvider;
pub use image::ImageGenerator;
pub use provider::{Brand, CopyProvider, ImageProvider, MediaOutput, VideoProvider};
pub use video::VideoGenerator;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ProviderError;
use crate::job::{AssetRef, Capability, TaskPlan};

/// Input for one generator invocation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub job_id: String,
    pub plan: TaskPlan,
}

impl GenerationRequest {
    pub fn new(job_id: impl Into<String>, plan: TaskPlan) -> Self {
        Self {
            job_id: job_id.into(),
            plan,
        }
    }
}

/// A stored asset plus any non-fatal notes about it.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAsset {
    pub asset: AssetRef,
    pub warnings: Vec<String>,
    /// The asset is a fallback stand-in, not real provider output.
    pub degraded: bool,
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn capability(&self) -> Capability;

    /// Upper bound the caller enforces around [`Generator::generate`].
    fn timeout(&self) -> Duration;

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedAsset, ProviderError>;
}

/// Per-capability policy, read from `[generators.<capability>]`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GeneratorSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Store a fallback asset when the provider is unavailable or over quota.
    #[serde(default)]
    pub fallback: bool,

    /// Soft size cap; a task plan's `max_file_size_mb` takes precedence.
    #[serde(default)]
    pub max_output_bytes: Option<u64>,

    /// Provider endpoint. Without one the stub provider is used.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Bearer token sent to `endpoint`.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            fallback: false,
            max_output_bytes: None,
            endpoint: None,
            api_key: None,
        }
    }
}

impl GeneratorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Effective limit in bytes: the plan's megabyte cap, else the configured one.
    pub fn size_limit(&self, plan_cap_mb: Option<f64>) -> Option<u64> {
        plan_cap_mb
            .map(|mb| (mb * 1024.0 * 1024.0) as u64)
            .or(self.max_output_bytes)
    }
}

/// Warning for an asset larger than `limit`. The asset is still kept.
pub fn size_warning(capability: Capability, size_bytes: u64, limit: Option<u64>) -> Option<String> {
    let limit = limit?;
    if size_bytes <= limit {
        return None;
    }
    const MB: f64 = 1024.0 * 1024.0;
    Some(format!(
        "{capability}: generated output is {:.2} MB, exceeding the {:.2} MB limit; \
         it may not upload to the target platform",
        size_bytes as f64 / MB,
        limit as f64 / MB
    ))
}

pub(crate) fn fallback_warning(capability: Capability, cause: &ProviderError, filename: &str) -> String {
    format!("{capability}: {cause}; stored fallback asset {filename}")
}

/// Capability → generator lookup handed to the orchestration strategies.
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    generators: HashMap<Capability, Arc<dyn Generator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `generator` under its own capability, replacing any previous one.
    pub fn register(&mut self, generator: Arc<dyn Generator>) -> &mut Self {
        self.generators.insert(generator.capability(), generator);
        self
    }

    pub fn with(mut self, generator: Arc<dyn Generator>) -> Self {
        self.register(generator);
        self
    }

    pub fn get(&self, capability: Capability) -> Option<Arc<dyn Generator>> {
        self.generators.get(&capability).cloned()
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps: Vec<_> = self.generators.keys().copied().collect();
        caps.sort();
        caps
    }
}

impl std::fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorRegistry")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_warning_only_above_limit() {
        assert_eq!(size_warning(Capability::Video, 10, None), None);
        assert_eq!(size_warning(Capability::Video, 10, Some(10)), None);
        let w = size_warning(Capability::Video, 3 * 1024 * 1024, Some(1024 * 1024)).unwrap();
        assert!(w.starts_with("video: generated output is 3.00 MB"));
        assert!(w.contains("1.00 MB limit"));
    }

    #[test]
    fn plan_cap_overrides_configured_limit() {
        let settings = GeneratorSettings {
            max_output_bytes: Some(100),
            ..Default::default()
        };
        assert_eq!(settings.size_limit(None), Some(100));
        assert_eq!(settings.size_limit(Some(1.0)), Some(1024 * 1024));
        assert_eq!(GeneratorSettings::default().size_limit(None), None);
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let s: GeneratorSettings = toml::from_str("fallback = true").unwrap();
        assert!(s.fallback);
        assert_eq!(s.timeout(), Duration::from_secs(120));
        assert!(s.endpoint.is_none());
    }
}
