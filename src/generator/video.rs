use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::provider::{Brand, VideoProvider, video_brief};
use super::{GeneratedAsset, GenerationRequest, Generator, GeneratorSettings, fallback_warning, size_warning};
use crate::error::ProviderError;
use crate::job::Capability;
use crate::objects::ObjectStore;

const BRIEF_FILENAME: &str = "video_brief.txt";

pub struct VideoGenerator {
    provider: Arc<dyn VideoProvider>,
    objects: Arc<dyn ObjectStore>,
    settings: GeneratorSettings,
}

impl VideoGenerator {
    pub fn new(
        provider: Arc<dyn VideoProvider>,
        objects: Arc<dyn ObjectStore>,
        settings: GeneratorSettings,
    ) -> Self {
        Self {
            provider,
            objects,
            settings,
        }
    }
}

#[async_trait]
impl Generator for VideoGenerator {
    fn capability(&self) -> Capability {
        Capability::Video
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedAsset, ProviderError> {
        let config = request
            .plan
            .video
            .as_ref()
            .ok_or_else(|| ProviderError::InvalidInput("task plan has no video config".into()))?;

        let brand = Brand::of(&request.plan);
        let mut warnings = Vec::new();
        let (output, degraded) = match self.provider.video(config, brand).await {
            Ok(output) => (output, false),
            Err(e) if e.allows_fallback() && self.settings.fallback => {
                warn!(job_id = %request.job_id, error = %e, "video provider failed, storing brief");
                warnings.push(fallback_warning(Capability::Video, &e, BRIEF_FILENAME));
                (video_brief(config, brand), true)
            }
            Err(e) => return Err(e),
        };

        // Text output is a brief, whether from the stub or the fallback path.
        let filename = match output.extension() {
            "txt" => BRIEF_FILENAME.to_string(),
            ext => format!("video.{ext}"),
        };
        let asset = self
            .objects
            .put(&request.job_id, &filename, output.bytes, &output.content_type)
            .await?;

        warnings.extend(size_warning(
            Capability::Video,
            asset.size_bytes,
            self.settings.size_limit(config.max_file_size_mb),
        ));
        info!(job_id = %request.job_id, bytes = asset.size_bytes, "video stored");
        Ok(GeneratedAsset {
            asset,
            warnings,
            degraded,
        })
    }
}
