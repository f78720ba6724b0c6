//! Wiring: builds every component from a [`PipelineConfig`] and hands them
//! out explicitly. Nothing here is global; each `Pipeline` owns its clients.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::anthropic::AnthropicClient;
use crate::approval::ApprovalCoordinator;
use crate::channel::{MemoryChannel, MessageChannel, SpoolChannel, Subscription};
use crate::config::PipelineConfig;
use crate::dispatcher::{DispatchWorker, TaskDispatcher};
use crate::generator::provider::{StubCopyProvider, StubImageProvider, StubVideoProvider};
use crate::generator::{
    AnthropicCopyProvider, CaptionGenerator, CopyProvider, GeneratorRegistry, GeneratorSettings, HttpMediaProvider,
    ImageGenerator, ImageProvider, VideoGenerator, VideoProvider,
};
use crate::identity::{
    IdentityVerifier, PushVerifier, SharedSecretPushVerifier, StaticTokenVerifier, TrustLocalPushVerifier,
};
use crate::objects::{LocalObjectStore, MemoryObjectStore, ObjectStore};
use crate::orchestrator::{DelegatedCoordinator, DirectParallel, HttpCoordinatorEngine};
use crate::store::{FileJobStore, JobStore, MemoryJobStore};

/// Fully wired pipeline.
pub struct Pipeline {
    pub store: Arc<dyn JobStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub approval: ApprovalCoordinator,
    pub dispatcher: Arc<TaskDispatcher>,
    pub subscription: Arc<dyn Subscription>,
}

impl Pipeline {
    /// File-backed pipeline rooted at `config.data_dir`.
    pub fn open(config: &PipelineConfig) -> Result<Self> {
        let store: Arc<dyn JobStore> =
            Arc::new(FileJobStore::open(config.jobs_dir()).context("opening job store")?);
        let spool = SpoolChannel::open(config.spool_dir(), &config.topic).context("opening dispatch spool")?;
        let spool = if config.push_token.is_empty() {
            spool
        } else {
            spool.with_push_token(&config.push_token)
        };
        let spool = Arc::new(spool);
        let objects: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(
            config.assets_dir(),
            config.public_base_url(),
        ));
        info!(data_dir = %config.data_dir.display(), topic = %config.topic, "pipeline opened");
        Self::assemble(config, store, spool.clone(), spool, objects)
    }

    /// In-process pipeline for the demo and tests.
    pub fn in_memory(config: &PipelineConfig) -> Result<(Self, Arc<MemoryChannel>)> {
        let channel = Arc::new(if config.push_token.is_empty() {
            MemoryChannel::new()
        } else {
            MemoryChannel::new().with_push_token(&config.push_token)
        });
        let objects: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new(config.public_base_url()));
        let pipeline = Self::assemble(
            config,
            Arc::new(MemoryJobStore::new()),
            channel.clone(),
            channel.clone(),
            objects,
        )?;
        Ok((pipeline, channel))
    }

    fn assemble(
        config: &PipelineConfig,
        store: Arc<dyn JobStore>,
        channel: Arc<dyn MessageChannel>,
        subscription: Arc<dyn Subscription>,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        let mut identity = StaticTokenVerifier::new();
        for (actor, token) in &config.approvers {
            identity = identity.with_token(token, actor);
        }
        let identity: Arc<dyn IdentityVerifier> = Arc::new(identity);

        let approval = ApprovalCoordinator::new(store.clone(), channel, identity, &config.topic)
            .with_retry(config.publish.clone())
            .with_policy(config.approval.reapproval);

        let push: Arc<dyn PushVerifier> = if config.push_token.is_empty() {
            Arc::new(TrustLocalPushVerifier)
        } else {
            Arc::new(SharedSecretPushVerifier::new(&config.push_token))
        };

        let direct = DirectParallel::new(build_registry(config, objects.clone())?);
        let mut dispatcher =
            TaskDispatcher::new(store.clone(), push, Arc::new(direct.clone())).with_objects(objects.clone());
        if let Some(url) = &config.orchestration.engine_url {
            let timeout = config.orchestration.engine_timeout();
            let engine = HttpCoordinatorEngine::new(url, timeout).context("building coordinator engine client")?;
            let delegated = DelegatedCoordinator::new(Arc::new(engine), direct, objects.public_prefix(), timeout);
            dispatcher = dispatcher.with_delegated(config.orchestration.selector(), Arc::new(delegated));
        }

        Ok(Self {
            store,
            objects,
            approval,
            dispatcher: Arc::new(dispatcher),
            subscription,
        })
    }

    pub fn worker(&self) -> DispatchWorker {
        DispatchWorker::new(self.dispatcher.clone())
    }
}

/// Real providers where configured, local stubs otherwise.
pub fn build_registry(config: &PipelineConfig, objects: Arc<dyn ObjectStore>) -> Result<GeneratorRegistry> {
    let gens = &config.generators;

    let copy: Arc<dyn CopyProvider> = if config.api_key.is_empty() {
        debug!("no API key, using template captions");
        Arc::new(StubCopyProvider)
    } else {
        let client = AnthropicClient::new(config.api_key.clone(), gens.captions.timeout())
            .context("building Anthropic client")?;
        Arc::new(AnthropicCopyProvider::new(client, &config.copy_model, gens.captions.timeout()))
    };

    let image: Arc<dyn ImageProvider> = match media_provider(&gens.image)? {
        Some(provider) => Arc::new(provider),
        None => Arc::new(StubImageProvider),
    };

    let video: Arc<dyn VideoProvider> = match media_provider(&gens.video)? {
        Some(provider) => Arc::new(provider),
        None => Arc::new(StubVideoProvider),
    };

    Ok(GeneratorRegistry::new()
        .with(Arc::new(CaptionGenerator::new(copy, objects.clone(), gens.captions.clone())))
        .with(Arc::new(ImageGenerator::new(image, objects.clone(), gens.image.clone())))
        .with(Arc::new(VideoGenerator::new(video, objects, gens.video.clone()))))
}

fn media_provider(settings: &GeneratorSettings) -> Result<Option<HttpMediaProvider>> {
    let Some(url) = &settings.endpoint else {
        return Ok(None);
    };
    let provider = HttpMediaProvider::new(url, settings.timeout())?;
    Ok(Some(match &settings.api_key {
        Some(key) => provider.with_api_key(key),
        None => provider,
    }))
}
