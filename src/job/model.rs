use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::brand::BrandStyle;
use super::status::JobStatus;
use crate::error::ValidationError;

/// One requested asset type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Captions,
    Image,
    Video,
}

impl Capability {
    pub fn name(self) -> &'static str {
        match self {
            Capability::Captions => "captions",
            Capability::Image => "image",
            Capability::Video => "video",
        }
    }

    pub fn all() -> [Capability; 3] {
        [Capability::Captions, Capability::Image, Capability::Video]
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionConfig {
    pub n: u32,
    #[serde(default = "default_caption_style")]
    pub style: String,
}

fn default_caption_style() -> String {
    "engaging".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub prompt: String,
    #[serde(default = "default_image_size")]
    pub size: String,
    /// Soft cap on the stored file, in megabytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size_mb: Option<f64>,
}

fn default_image_size() -> String {
    "1024x1024".to_string()
}

impl ImageConfig {
    /// Parses `size` as `WIDTHxHEIGHT`.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let (w, h) = self.size.split_once('x')?;
        Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
    }

    /// Encoding requested from the provider: JPEG under a size cap, PNG otherwise.
    pub fn output_format(&self) -> &'static str {
        match self.max_file_size_mb {
            Some(_) => "jpeg",
            None => "png",
        }
    }

    pub fn output_content_type(&self) -> &'static str {
        match self.max_file_size_mb {
            Some(_) => "image/jpeg",
            None => "image/png",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoConfig {
    pub prompt: String,
    #[serde(default = "default_duration_sec")]
    pub duration_sec: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size_mb: Option<f64>,
}

fn default_duration_sec() -> u32 {
    15
}

/// Immutable snapshot of the goal and the requested capability configurations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captions: Option<CaptionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_style: Option<BrandStyle>,
    /// Product photo the image and video should stay faithful to. Removed
    /// from the object store once the job completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_image_url: Option<String>,
}

impl TaskPlan {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            captions: None,
            image: None,
            video: None,
            brand_style: None,
            reference_image_url: None,
        }
    }

    pub fn with_captions(mut self, n: u32, style: impl Into<String>) -> Self {
        self.captions = Some(CaptionConfig {
            n,
            style: style.into(),
        });
        self
    }

    pub fn with_image(mut self, prompt: impl Into<String>, size: impl Into<String>) -> Self {
        self.image = Some(ImageConfig {
            prompt: prompt.into(),
            size: size.into(),
            max_file_size_mb: None,
        });
        self
    }

    pub fn with_video(mut self, prompt: impl Into<String>, duration_sec: u32) -> Self {
        self.video = Some(VideoConfig {
            prompt: prompt.into(),
            duration_sec,
            max_file_size_mb: None,
        });
        self
    }

    pub fn with_brand_style(mut self, style: BrandStyle) -> Self {
        self.brand_style = Some(style);
        self
    }

    pub fn with_reference_image(mut self, url: impl Into<String>) -> Self {
        self.reference_image_url = Some(url.into());
        self
    }

    /// Requested capabilities in stable order: captions, image, video.
    pub fn requested(&self) -> Vec<Capability> {
        let mut caps = Vec::with_capacity(3);
        if self.captions.is_some() {
            caps.push(Capability::Captions);
        }
        if self.image.is_some() {
            caps.push(Capability::Image);
        }
        if self.video.is_some() {
            caps.push(Capability::Video);
        }
        caps
    }

    /// Intake-time validation. Plans that fail here never become jobs.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.goal.trim().is_empty() {
            return Err(ValidationError::new("goal must not be empty"));
        }
        if self.requested().is_empty() {
            return Err(ValidationError::new("task plan requests no capability"));
        }
        if let Some(c) = &self.captions
            && !(1..=10).contains(&c.n)
        {
            return Err(ValidationError::new(format!(
                "captions.n must be between 1 and 10, got {}",
                c.n
            )));
        }
        if let Some(img) = &self.image {
            if img.prompt.trim().is_empty() {
                return Err(ValidationError::new("image.prompt must not be empty"));
            }
            if img.dimensions().is_none() {
                return Err(ValidationError::new(format!(
                    "image.size must look like 1024x1024, got {:?}",
                    img.size
                )));
            }
            check_size_cap("image", img.max_file_size_mb)?;
        }
        if let Some(v) = &self.video {
            if v.prompt.trim().is_empty() {
                return Err(ValidationError::new("video.prompt must not be empty"));
            }
            if !(5..=60).contains(&v.duration_sec) {
                return Err(ValidationError::new(format!(
                    "video.duration_sec must be between 5 and 60, got {}",
                    v.duration_sec
                )));
            }
            check_size_cap("video", v.max_file_size_mb)?;
        }
        if let Some(style) = &self.brand_style {
            style.validate()?;
        }
        if let Some(url) = &self.reference_image_url
            && url.trim().is_empty()
        {
            return Err(ValidationError::new("reference_image_url must not be empty"));
        }
        Ok(())
    }
}

fn check_size_cap(field: &str, cap: Option<f64>) -> Result<(), ValidationError> {
    match cap {
        Some(mb) if !(mb > 0.0 && mb.is_finite()) => Err(ValidationError::new(format!(
            "{field}.max_file_size_mb must be positive, got {mb}"
        ))),
        _ => Ok(()),
    }
}

/// Where a generated asset ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub url: String,
    pub content_type: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Created,
    Approved,
    Rejected,
    Completed,
    Failed,
    /// Publish retries were exhausted after the approval committed.
    DispatchEscalated,
    Republished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(kind: AuditKind) -> Self {
        Self {
            kind,
            actor: None,
            at: Utc::now(),
            detail: None,
        }
    }

    pub fn by(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given retry attempt using exponential backoff.
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// The unit of work tracking one request through approval and generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub owner_id: String,
    pub status: JobStatus,
    pub task_plan: TaskPlan,
    #[serde(default)]
    pub assets: BTreeMap<Capability, AssetRef>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub audit_trail: Vec<AuditEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A fresh `pending_approval` job, as the intake component creates it.
    pub fn new(owner_id: impl Into<String>, task_plan: TaskPlan) -> Self {
        let now = Utc::now();
        let owner_id = owner_id.into();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.clone(),
            status: JobStatus::PendingApproval,
            task_plan,
            assets: BTreeMap::new(),
            warnings: Vec::new(),
            audit_trail: vec![AuditEvent::new(AuditKind::Created).by(owner_id)],
            created_at: now,
            updated_at: now,
            approved_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}
