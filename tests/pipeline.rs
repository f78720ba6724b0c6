//! End-to-end flows through approval, dispatch and generation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use promogate::approval::{ApprovalCoordinator, ApprovalOutcome, RejectOutcome};
use promogate::channel::MemoryChannel;
use promogate::config::PipelineConfig;
use promogate::dispatcher::{DispatchWorker, HandleOutcome, TaskDispatcher};
use promogate::error::ProviderError;
use promogate::generator::{
    Brand, GeneratedAsset, GenerationRequest, Generator, GeneratorRegistry, GeneratorSettings, ImageGenerator,
    ImageProvider, MediaOutput,
};
use promogate::identity::{StaticTokenVerifier, TrustLocalPushVerifier};
use promogate::job::{AssetRef, AuditKind, Capability, ImageConfig, Job, JobStatus, TaskPlan};
use promogate::objects::MemoryObjectStore;
use promogate::orchestrator::{DirectParallel, StrategyKind, StrategySelector};
use promogate::pipeline::Pipeline;
use promogate::store::{JobStore, MemoryJobStore};

const OWNER: &str = "alice";
const TOKEN: &str = "alice-token";

enum Script {
    Ok,
    Fail(ProviderError),
    Hang,
}

struct ScriptedGenerator {
    capability: Capability,
    script: Script,
    calls: AtomicU32,
}

impl ScriptedGenerator {
    fn new(capability: Capability, script: Script) -> Arc<Self> {
        Arc::new(Self {
            capability,
            script,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn capability(&self) -> Capability {
        self.capability
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(50)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedAsset, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Ok => Ok(GeneratedAsset {
                asset: AssetRef {
                    url: format!("mem://assets/{}/{}", request.job_id, self.capability),
                    content_type: "application/octet-stream".into(),
                    size_bytes: 16,
                },
                warnings: Vec::new(),
                degraded: false,
            }),
            Script::Fail(e) => Err(e.clone()),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                unreachable!("the fan-out timeout fires first")
            }
        }
    }
}

/// In-memory harness wired the same way `Pipeline` wires it.
struct Harness {
    store: Arc<MemoryJobStore>,
    channel: Arc<MemoryChannel>,
    approval: ApprovalCoordinator,
    worker: DispatchWorker,
}

impl Harness {
    fn new(registry: GeneratorRegistry) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let channel = Arc::new(MemoryChannel::new());
        let identity = Arc::new(StaticTokenVerifier::new().with_token(TOKEN, OWNER));
        let approval = ApprovalCoordinator::new(store.clone(), channel.clone(), identity, "creative-tasks");
        let dispatcher = TaskDispatcher::new(
            store.clone(),
            Arc::new(TrustLocalPushVerifier),
            Arc::new(DirectParallel::new(registry)),
        );
        Self {
            store,
            channel,
            approval,
            worker: DispatchWorker::new(Arc::new(dispatcher)),
        }
    }

    async fn submit(&self, plan: TaskPlan) -> String {
        let job = Job::new(OWNER, plan);
        let id = job.id.clone();
        self.store.create(job).await.unwrap();
        id
    }

    async fn approve_and_drain(&self, job_id: &str) -> Job {
        let outcome = self.approval.approve(job_id, TOKEN).await.unwrap();
        assert!(matches!(outcome, ApprovalOutcome::Approved { .. }));
        self.worker.drain(self.channel.as_ref()).await.unwrap();
        self.store.get(job_id).await.unwrap()
    }
}

#[tokio::test]
async fn slow_captions_time_out_and_image_still_completes() {
    let captions = ScriptedGenerator::new(Capability::Captions, Script::Hang);
    let image = ScriptedGenerator::new(Capability::Image, Script::Ok);
    let harness = Harness::new(GeneratorRegistry::new().with(captions).with(image));

    let id = harness
        .submit(TaskPlan::new("Autumn launch").with_captions(3, "warm").with_image("knitwear", "512x512"))
        .await;
    let job = harness.approve_and_drain(&id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.assets.keys().copied().collect::<Vec<_>>(), vec![Capability::Image]);
    assert_eq!(job.warnings.len(), 1);
    assert!(job.warnings[0].starts_with("captions: provider timed out"));
}

#[tokio::test]
async fn unavailable_video_without_fallback_fails_the_job() {
    let video = ScriptedGenerator::new(Capability::Video, Script::Fail(ProviderError::Unavailable("503".into())));
    let harness = Harness::new(GeneratorRegistry::new().with(video));

    let id = harness.submit(TaskPlan::new("Teaser").with_video("slow pan", 10)).await;
    let job = harness.approve_and_drain(&id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.assets.is_empty());
    assert_eq!(job.warnings, vec!["video: provider unavailable: 503"]);
    assert_eq!(job.audit_trail.last().unwrap().kind, AuditKind::Failed);
}

#[tokio::test]
async fn concurrent_approvals_publish_once_and_generate_once() {
    let image = ScriptedGenerator::new(Capability::Image, Script::Ok);
    let harness = Arc::new(Harness::new(GeneratorRegistry::new().with(image.clone())));
    let id = harness.submit(TaskPlan::new("Flash sale").with_image("banner", "800x400")).await;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let harness = harness.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move { harness.approval.approve(&id, TOKEN).await.unwrap() }));
    }
    let mut approved = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), ApprovalOutcome::Approved { .. }) {
            approved += 1;
        }
    }
    assert_eq!(approved, 1);
    assert_eq!(harness.channel.published_for(&id), 1);

    harness.worker.drain(harness.channel.as_ref()).await.unwrap();
    assert_eq!(image.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.store.get(&id).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn rejected_job_is_never_dispatched() {
    let image = ScriptedGenerator::new(Capability::Image, Script::Ok);
    let harness = Harness::new(GeneratorRegistry::new().with(image.clone()));
    let id = harness.submit(TaskPlan::new("Drafts").with_image("sketch", "64x64")).await;

    assert_eq!(harness.approval.reject(&id, TOKEN).await.unwrap(), RejectOutcome::Rejected);
    let report = harness.worker.drain(harness.channel.as_ref()).await.unwrap();

    assert!(report.outcomes.is_empty());
    assert_eq!(harness.channel.publish_attempts(), 0);
    assert_eq!(image.calls.load(Ordering::SeqCst), 0);
    let job = harness.store.get(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Rejected);
    assert!(job.approved_at.is_none());
    assert!(harness.approval.approve(&id, TOKEN).await.is_err());
}

#[tokio::test]
async fn redelivery_after_completion_changes_nothing() {
    let image = ScriptedGenerator::new(Capability::Image, Script::Ok);
    let harness = Harness::new(GeneratorRegistry::new().with(image.clone()));
    let id = harness.submit(TaskPlan::new("Replay").with_image("x", "32x32")).await;
    let first = harness.approve_and_drain(&id).await;

    harness.channel.replay_all();
    let report = harness.worker.drain(harness.channel.as_ref()).await.unwrap();

    assert!(matches!(
        report.outcomes.as_slice(),
        [HandleOutcome::Duplicate { status: JobStatus::Completed, .. }]
    ));
    assert_eq!(image.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.store.get(&id).await.unwrap(), first);
}

struct OversizedImages;

#[async_trait]
impl ImageProvider for OversizedImages {
    async fn image(&self, config: &ImageConfig, _brand: Brand<'_>) -> Result<MediaOutput, ProviderError> {
        Ok(MediaOutput::new(vec![0u8; 2 * 1024 * 1024], config.output_content_type()))
    }
}

#[tokio::test]
async fn oversized_image_is_kept_with_one_warning() {
    let objects = Arc::new(MemoryObjectStore::new("mem://assets"));
    let generator = ImageGenerator::new(Arc::new(OversizedImages), objects.clone(), GeneratorSettings::default());
    let harness = Harness::new(GeneratorRegistry::new().with(Arc::new(generator)));

    let mut plan = TaskPlan::new("Poster").with_image("poster", "2048x2048");
    if let Some(image) = plan.image.as_mut() {
        image.max_file_size_mb = Some(1.0);
    }
    let id = harness.submit(plan).await;
    let job = harness.approve_and_drain(&id).await;

    assert_eq!(job.status, JobStatus::Completed);
    let asset = &job.assets[&Capability::Image];
    assert_eq!(asset.size_bytes, 2 * 1024 * 1024);
    assert_eq!(asset.url, format!("mem://assets/{id}/image.jpg"));
    assert_eq!(job.warnings.len(), 1);
    assert!(job.warnings[0].contains("exceeding the 1.00 MB limit"));
    assert!(objects.get(&id, "image.jpg").is_some());
}

#[test]
fn rollout_routing_is_stable_per_job() {
    let selector = StrategySelector::new(true, 30);
    let ids: Vec<String> = (0..500).map(|i| format!("job-{i}")).collect();
    let first: Vec<StrategyKind> = ids.iter().map(|id| selector.select(id)).collect();
    let second: Vec<StrategyKind> = ids.iter().map(|id| selector.select(id)).collect();
    assert_eq!(first, second);
    assert!(first.contains(&StrategyKind::DelegatedCoordinator));
    assert!(first.contains(&StrategyKind::DirectParallel));

    let off = StrategySelector::new(false, 100);
    assert!(ids.iter().all(|id| off.select(id) == StrategyKind::DirectParallel));
}

#[tokio::test]
async fn file_backed_pipeline_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    config.approvers.insert(OWNER.into(), TOKEN.into());
    config.publish.base_delay_ms = 1;

    let plan = TaskPlan::new("Spring campaign")
        .with_captions(2, "playful")
        .with_image("tulips", "1024x1024")
        .with_video("field of tulips", 10);
    let id = {
        let pipeline = Pipeline::open(&config).unwrap();
        let job = Job::new(OWNER, plan);
        let id = job.id.clone();
        pipeline.store.create(job).await.unwrap();
        pipeline.approval.approve(&id, TOKEN).await.unwrap();
        id
    };

    let pipeline = Pipeline::open(&config).unwrap();
    assert_eq!(pipeline.store.get(&id).await.unwrap().status, JobStatus::Processing);
    let report = pipeline.worker().drain(pipeline.subscription.as_ref()).await.unwrap();
    assert!(matches!(report.outcomes.as_slice(), [HandleOutcome::Completed { .. }]));

    let job = pipeline.store.get(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.assets.len(), 3);
    for asset in job.assets.values() {
        assert!(asset.url.starts_with(pipeline.objects.public_prefix()));
    }
    assert!(dir.path().join("assets").join(&id).join("captions.json").is_file());

    let again = pipeline.worker().drain(pipeline.subscription.as_ref()).await.unwrap();
    assert!(again.outcomes.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_processes_approving_the_same_job_publish_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    config.approvers.insert(OWNER.into(), TOKEN.into());
    config.publish.base_delay_ms = 1;

    // Each `open` gets its own file handles, as a second CLI process would.
    let first = Pipeline::open(&config).unwrap();
    let second = Pipeline::open(&config).unwrap();

    let mut ids = Vec::new();
    for round in 0..10 {
        let job = Job::new(OWNER, TaskPlan::new(format!("Race {round}")).with_image("x", "64x64"));
        let id = job.id.clone();
        first.store.create(job).await.unwrap();

        let (a, b) = tokio::join!(first.approval.approve(&id, TOKEN), second.approval.approve(&id, TOKEN));
        let approved = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|o| matches!(o, ApprovalOutcome::Approved { .. }))
            .count();
        assert_eq!(approved, 1, "round {round}");
        ids.push(id);
    }

    let pending = dir.path().join("spool").join(&config.topic).join("pending");
    assert_eq!(std::fs::read_dir(&pending).unwrap().count(), ids.len());

    let report = second.worker().drain(second.subscription.as_ref()).await.unwrap();
    assert_eq!(report.outcomes.len(), ids.len());
    for id in &ids {
        assert_eq!(first.store.get(id).await.unwrap().status, JobStatus::Completed);
    }
}
