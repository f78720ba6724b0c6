//! Provider seams behind each generator, plus the local stand-ins used
//! when no provider is configured or as fallback output.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ProviderError;
use crate::job::{BrandStyle, CaptionConfig, ImageConfig, TaskPlan, VideoConfig};

/// Brand inputs of one job, as every provider call sees them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Brand<'a> {
    #[serde(rename = "brand_style", skip_serializing_if = "Option::is_none")]
    pub style: Option<&'a BrandStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_image_url: Option<&'a str>,
}

impl<'a> Brand<'a> {
    pub fn of(plan: &'a TaskPlan) -> Self {
        Self {
            style: plan.brand_style.as_ref(),
            reference_image_url: plan.reference_image_url.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.style.is_none() && self.reference_image_url.is_none()
    }

    pub fn tagline(&self) -> Option<&'a str> {
        self.style.and_then(|s| s.tagline.as_deref())
    }

    /// Visual prompt with tone, palette and reference image appended.
    /// Unchanged when the job carries no brand inputs.
    pub fn styled_prompt(&self, prompt: &str) -> String {
        if self.is_empty() {
            return prompt.to_string();
        }
        let mut parts = vec![prompt.trim().trim_end_matches('.').to_string()];
        if let Some(style) = self.style {
            parts.push(format!("Brand tone: {}", style.tone));
            parts.extend(style.palette());
        }
        if let Some(url) = self.reference_image_url {
            parts.push(format!("Feature the product shown in the reference image {url}"));
        }
        let mut prompt = parts.join(". ");
        prompt.push('.');
        prompt
    }
}

/// Raw media bytes as returned by an image or video provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaOutput {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl MediaOutput {
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }

    /// File extension for the stored object.
    pub fn extension(&self) -> &'static str {
        let base = self
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        match base {
            "image/png" => "png",
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/svg+xml" => "svg",
            "video/mp4" => "mp4",
            "video/webm" => "webm",
            "text/plain" => "txt",
            _ => "bin",
        }
    }
}

#[async_trait]
pub trait CopyProvider: Send + Sync {
    async fn captions(
        &self,
        goal: &str,
        config: &CaptionConfig,
        brand: Brand<'_>,
    ) -> Result<Vec<String>, ProviderError>;
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn image(&self, config: &ImageConfig, brand: Brand<'_>) -> Result<MediaOutput, ProviderError>;
}

#[async_trait]
pub trait VideoProvider: Send + Sync {
    async fn video(&self, config: &VideoConfig, brand: Brand<'_>) -> Result<MediaOutput, ProviderError>;
}

const CAPTION_TEMPLATES: [&str; 5] = [
    "{goal} starts today. Don't miss it!",
    "Ready for {goal}? Tap the link to find out more.",
    "{goal}: made for you. Share it with a friend.",
    "Big news: {goal}. Limited time only.",
    "We've been waiting to tell you about {goal}.",
];

/// Deterministic template captions. A brand tagline closes the first one.
pub fn template_captions(goal: &str, config: &CaptionConfig, brand: Brand<'_>) -> Vec<String> {
    (0..config.n as usize)
        .map(|i| {
            let base = CAPTION_TEMPLATES[i % CAPTION_TEMPLATES.len()].replace("{goal}", goal.trim());
            match (i, brand.tagline()) {
                (0, Some(tagline)) => format!("{base} {}", tagline.trim()),
                _ if i >= CAPTION_TEMPLATES.len() => format!("{base} (#{})", i + 1),
                _ => base,
            }
        })
        .collect()
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// SVG placeholder at the requested dimensions, captioned with the prompt
/// and filled with the brand's primary color when there is one.
pub fn placeholder_svg(config: &ImageConfig, brand: Brand<'_>) -> MediaOutput {
    let (w, h) = config.dimensions().unwrap_or((1024, 1024));
    let fill = brand
        .style
        .and_then(|s| s.primary())
        .map(|c| format!("#{}", c.hex_code))
        .unwrap_or_else(|| "#1f2937".to_string());
    let prompt: String = config.prompt.chars().take(80).collect();
    let svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">
  <rect width="100%" height="100%" fill="{fill}"/>
  <text x="50%" y="45%" fill="#9ca3af" font-family="sans-serif" font-size="{fs}" text-anchor="middle">PLACEHOLDER</text>
  <text x="50%" y="55%" fill="#e5e7eb" font-family="sans-serif" font-size="{ps}" text-anchor="middle">{prompt}</text>
</svg>
"##,
        fs = (w.min(h) / 10).max(12),
        ps = (w.min(h) / 32).max(10),
        prompt = escape_xml(&prompt),
        fill = escape_xml(&fill),
    );
    MediaOutput::new(svg, "image/svg+xml")
}

/// Plain-text production brief standing in for a rendered video.
pub fn video_brief(config: &VideoConfig, brand: Brand<'_>) -> MediaOutput {
    let shots = (config.duration_sec / 5).max(1);
    let mut brief = format!(
        "VIDEO BRIEF (placeholder, not rendered)\n\nPrompt: {}\nDuration: {}s\n",
        brand.styled_prompt(&config.prompt),
        config.duration_sec
    );
    if let Some(tagline) = brand.tagline() {
        brief.push_str(&format!("End card: {tagline}\n"));
    }
    brief.push_str("\nShot list:\n");
    for i in 0..shots {
        let start = i * 5;
        let end = ((i + 1) * 5).min(config.duration_sec);
        brief.push_str(&format!("  {start:>2}s-{end:>2}s  shot {}\n", i + 1));
    }
    MediaOutput::new(brief, "text/plain; charset=utf-8")
}

/// Local provider backed by [`template_captions`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StubCopyProvider;

#[async_trait]
impl CopyProvider for StubCopyProvider {
    async fn captions(
        &self,
        goal: &str,
        config: &CaptionConfig,
        brand: Brand<'_>,
    ) -> Result<Vec<String>, ProviderError> {
        Ok(template_captions(goal, config, brand))
    }
}

/// Local provider backed by [`placeholder_svg`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StubImageProvider;

#[async_trait]
impl ImageProvider for StubImageProvider {
    async fn image(&self, config: &ImageConfig, brand: Brand<'_>) -> Result<MediaOutput, ProviderError> {
        Ok(placeholder_svg(config, brand))
    }
}

/// Local provider backed by [`video_brief`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StubVideoProvider;

#[async_trait]
impl VideoProvider for StubVideoProvider {
    async fn video(&self, config: &VideoConfig, brand: Brand<'_>) -> Result<MediaOutput, ProviderError> {
        Ok(video_brief(config, brand))
    }
}
