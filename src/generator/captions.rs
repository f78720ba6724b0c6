use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use super::provider::{Brand, CopyProvider, template_captions};
use super::{GeneratedAsset, GenerationRequest, Generator, GeneratorSettings, fallback_warning, size_warning};
use crate::error::ProviderError;
use crate::job::Capability;
use crate::objects::ObjectStore;

const FILENAME: &str = "captions.json";

/// Writes the captions as one JSON document per job.
pub struct CaptionGenerator {
    provider: Arc<dyn CopyProvider>,
    objects: Arc<dyn ObjectStore>,
    settings: GeneratorSettings,
}

impl CaptionGenerator {
    pub fn new(
        provider: Arc<dyn CopyProvider>,
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
impl Generator for CaptionGenerator {
    fn capability(&self) -> Capability {
        Capability::Captions
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedAsset, ProviderError> {
        let config = request
            .plan
            .captions
            .as_ref()
            .ok_or_else(|| ProviderError::InvalidInput("task plan has no captions config".into()))?;

        let brand = Brand::of(&request.plan);
        let mut warnings = Vec::new();
        let (captions, degraded) = match self.provider.captions(&request.plan.goal, config, brand).await {
            Ok(captions) => (captions, false),
            Err(e) if e.allows_fallback() && self.settings.fallback => {
                warn!(job_id = %request.job_id, error = %e, "caption provider failed, using templates");
                warnings.push(fallback_warning(Capability::Captions, &e, FILENAME));
                (template_captions(&request.plan.goal, config, brand), true)
            }
            Err(e) => return Err(e),
        };

        let doc = json!({
            "goal": request.plan.goal,
            "style": config.style,
            "captions": captions,
            "degraded": degraded,
        });
        let bytes = serde_json::to_vec_pretty(&doc)
            .map_err(|e| ProviderError::InvalidInput(format!("encode captions: {e}")))?;
        let asset = self
            .objects
            .put(&request.job_id, FILENAME, bytes, "application/json")
            .await?;

        warnings.extend(size_warning(
            Capability::Captions,
            asset.size_bytes,
            self.settings.size_limit(None),
        ));
        info!(job_id = %request.job_id, count = captions.len(), "captions stored");
        Ok(GeneratedAsset {
            asset,
            warnings,
            degraded,
        })
    }
}
