use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::provider::{Brand, ImageProvider, placeholder_svg};
use super::{GeneratedAsset, GenerationRequest, Generator, GeneratorSettings, fallback_warning, size_warning};
use crate::error::ProviderError;
use crate::job::Capability;
use crate::objects::ObjectStore;

pub struct ImageGenerator {
    provider: Arc<dyn ImageProvider>,
    objects: Arc<dyn ObjectStore>,
    settings: GeneratorSettings,
}

impl ImageGenerator {
    pub fn new(
        provider: Arc<dyn ImageProvider>,
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
impl Generator for ImageGenerator {
    fn capability(&self) -> Capability {
        Capability::Image
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedAsset, ProviderError> {
        let config = request
            .plan
            .image
            .as_ref()
            .ok_or_else(|| ProviderError::InvalidInput("task plan has no image config".into()))?;

        let brand = Brand::of(&request.plan);
        let mut warnings = Vec::new();
        let (output, degraded) = match self.provider.image(config, brand).await {
            Ok(output) => (output, false),
            Err(e) if e.allows_fallback() && self.settings.fallback => {
                warn!(job_id = %request.job_id, error = %e, "image provider failed, using placeholder");
                let placeholder = placeholder_svg(config, brand);
                warnings.push(fallback_warning(Capability::Image, &e, "image_placeholder.svg"));
                (placeholder, true)
            }
            Err(e) => return Err(e),
        };

        let filename = if degraded {
            "image_placeholder.svg".to_string()
        } else {
            if output.content_type != config.output_content_type() {
                debug!(
                    job_id = %request.job_id,
                    requested = config.output_format(),
                    returned = %output.content_type,
                    "image provider ignored the requested format"
                );
            }
            format!("image.{}", output.extension())
        };
        let asset = self
            .objects
            .put(&request.job_id, &filename, output.bytes, &output.content_type)
            .await?;

        warnings.extend(size_warning(
            Capability::Image,
            asset.size_bytes,
            self.settings.size_limit(config.max_file_size_mb),
        ));
        info!(job_id = %request.job_id, bytes = asset.size_bytes, "image stored");
        Ok(GeneratedAsset {
            asset,
            warnings,
            degraded,
        })
    }
}
