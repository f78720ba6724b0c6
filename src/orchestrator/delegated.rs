use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::direct::DirectParallel;
use super::parse::parse_engine_output;
use super::{FanOutReport, Strategy, StrategyKind};
use crate::error::EngineError;
use crate::job::TaskPlan;

/// External multi-agent engine that plans and runs the generation itself.
#[async_trait]
pub trait CoordinatorEngine: Send + Sync {
    /// Runs the coordinator and returns its final free-form answer.
    async fn run(&self, job_id: &str, prompt: &str) -> Result<String, EngineError>;
}

#[derive(Serialize)]
struct EngineRequest<'a> {
    job_id: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EngineResponse {
    output: String,
}

/// Engine reached over HTTP: JSON `{job_id, prompt}` in, `{output}` or plain text out.
pub struct HttpCoordinatorEngine {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpCoordinatorEngine {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl CoordinatorEngine for HttpCoordinatorEngine {
    async fn run(&self, job_id: &str, prompt: &str) -> Result<String, EngineError> {
        let response = self
            .client
            .post(&self.url)
            .json(&EngineRequest { job_id, prompt })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(EngineError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(serde_json::from_str::<EngineResponse>(&body)
            .map(|r| r.output)
            .unwrap_or(body))
    }
}

impl HttpCoordinatorEngine {
    fn transport_error(&self, e: reqwest::Error) -> EngineError {
        if e.is_timeout() {
            EngineError::Timeout(self.timeout)
        } else {
            EngineError::Network(e)
        }
    }
}

/// Instructions handed to the coordinator for one job.
pub fn coordinator_prompt(job_id: &str, plan: &TaskPlan) -> String {
    let mut prompt = format!(
        "You coordinate a team of creative agents. Campaign goal: {}\n\
         Job id: {job_id}. Store every asset under the job id.\n\nProduce:\n",
        plan.goal.trim()
    );
    if let Some(c) = &plan.captions {
        prompt.push_str(&format!("- captions: {} captions, style {}\n", c.n, c.style));
    }
    if let Some(i) = &plan.image {
        prompt.push_str(&format!("- image: {} at {}\n", i.prompt, i.size));
    }
    if let Some(v) = &plan.video {
        prompt.push_str(&format!("- video: {} ({}s)\n", v.prompt, v.duration_sec));
    }
    prompt.push_str(
        "\nRun independent work in parallel. Finish with one JSON object with \
         `captions_url`, `image_url` and `video_url` for what you produced, \
         and `warnings` listing anything that failed or was degraded.",
    );
    prompt
}

/// Hands the whole plan to a [`CoordinatorEngine`] and parses what comes back.
pub struct DelegatedCoordinator {
    engine: Arc<dyn CoordinatorEngine>,
    fallback: DirectParallel,
    trusted_prefix: String,
    timeout: Duration,
}

impl DelegatedCoordinator {
    /// `trusted_prefix` is the object store's public prefix; URLs outside it are refused.
    pub fn new(
        engine: Arc<dyn CoordinatorEngine>,
        fallback: DirectParallel,
        trusted_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            engine,
            fallback,
            trusted_prefix: trusted_prefix.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Strategy for DelegatedCoordinator {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DelegatedCoordinator
    }

    async fn run_all(&self, job_id: &str, plan: &TaskPlan) -> FanOutReport {
        let prompt = coordinator_prompt(job_id, plan);
        let result = match tokio::time::timeout(self.timeout, self.engine.run(job_id, &prompt)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(self.timeout)),
        };

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                warn!(job_id, error = %e, "coordinator engine failed, generating directly");
                let mut report = self.fallback.run_all(job_id, plan).await;
                report
                    .warnings
                    .insert(0, format!("delegated coordinator failed ({e}); generated directly"));
                return report;
            }
        };

        let mut report = FanOutReport::default();
        match parse_engine_output(&output) {
            Ok(parsed) => {
                for capability in plan.requested() {
                    match parsed.asset(capability, &self.trusted_prefix) {
                        Ok(asset) => {
                            report.assets.insert(capability, asset);
                        }
                        Err(e) => report.record_failure(capability, e.to_string()),
                    }
                }
                report.warnings.extend(parsed.warnings);
            }
            Err(e) => {
                for capability in plan.requested() {
                    report.record_failure(capability, e.to_string());
                }
            }
        }
        info!(job_id, assets = report.assets.len(), failures = report.failures.len(), "delegated run parsed");
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::generator::GeneratorRegistry;
    use crate::generator::provider::{StubCopyProvider, StubImageProvider};
    use crate::generator::{CaptionGenerator, GeneratorSettings, ImageGenerator};
    use crate::job::Capability;
    use crate::objects::MemoryObjectStore;

    const PREFIX: &str = "https://cdn.example.com/assets";

    struct Scripted {
        reply: Result<String, u16>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn ok(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                calls: AtomicU32::new(0),
            })
        }

        fn err(status: u16) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(status),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl CoordinatorEngine for Scripted {
        async fn run(&self, _job_id: &str, _prompt: &str) -> Result<String, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map_err(|status| EngineError::Api {
                status,
                message: "down".into(),
            })
        }
    }

    fn direct() -> DirectParallel {
        let objects = Arc::new(MemoryObjectStore::new(PREFIX));
        DirectParallel::new(
            GeneratorRegistry::new()
                .with(Arc::new(CaptionGenerator::new(
                    Arc::new(StubCopyProvider),
                    objects.clone(),
                    GeneratorSettings::default(),
                )))
                .with(Arc::new(ImageGenerator::new(
                    Arc::new(StubImageProvider),
                    objects,
                    GeneratorSettings::default(),
                ))),
        )
    }

    fn plan() -> TaskPlan {
        TaskPlan::new("Autumn drop").with_captions(2, "warm").with_image("leaves", "512x512")
    }

    fn coordinator(engine: Arc<Scripted>) -> DelegatedCoordinator {
        DelegatedCoordinator::new(engine, direct(), PREFIX, Duration::from_secs(5))
    }

    #[test]
    fn prompt_mentions_each_requested_capability() {
        let prompt = coordinator_prompt("j1", &plan());
        assert!(prompt.contains("2 captions, style warm"));
        assert!(prompt.contains("leaves at 512x512"));
        assert!(!prompt.contains("- video"));
    }

    #[tokio::test]
    async fn parsed_assets_and_missing_capability() {
        let engine = Scripted::ok(
            r#"Done. {"image_url": "https://cdn.example.com/assets/j1/image.png", "warnings": ["captions skipped"]}"#,
        );
        let report = coordinator(engine).run_all("j1", &plan()).await;
        assert!(report.assets.contains_key(&Capability::Image));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, Capability::Captions);
        assert!(report.warnings.iter().any(|w| w == "captions skipped"));
    }

    #[tokio::test]
    async fn unparseable_output_fails_each_capability() {
        let report = coordinator(Scripted::ok("I gave up.")).run_all("j1", &plan()).await;
        assert!(report.all_failed());
        assert_eq!(report.failures.len(), 2);
    }

    #[tokio::test]
    async fn engine_error_falls_back_to_direct() {
        let engine = Scripted::err(502);
        let report = coordinator(engine.clone()).run_all("j1", &plan()).await;
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.assets.len(), 2);
        assert!(report.warnings[0].starts_with("delegated coordinator failed"));
    }

    #[tokio::test]
    async fn http_engine_reads_output_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"job_id": "j1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"output": "hello"})))
            .mount(&server)
            .await;
        let engine = HttpCoordinatorEngine::new(server.uri(), Duration::from_secs(5)).unwrap();
        assert_eq!(engine.run("j1", "p").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn http_engine_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let engine = HttpCoordinatorEngine::new(server.uri(), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            engine.run("j1", "p").await,
            Err(EngineError::Api { status: 500, .. })
        ));
    }
}
