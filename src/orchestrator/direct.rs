use std::collections::HashMap;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{FanOutReport, Strategy, StrategyKind};
use crate::error::ProviderError;
use crate::generator::{GenerationRequest, GeneratorRegistry};
use crate::job::TaskPlan;

/// One task per requested capability, each under its generator's own timeout.
#[derive(Debug, Clone)]
pub struct DirectParallel {
    registry: GeneratorRegistry,
}

impl DirectParallel {
    pub fn new(registry: GeneratorRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Strategy for DirectParallel {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectParallel
    }

    async fn run_all(&self, job_id: &str, plan: &TaskPlan) -> FanOutReport {
        let requested = plan.requested();
        let request = GenerationRequest::new(job_id, plan.clone());
        let mut outcomes = HashMap::with_capacity(requested.len());
        let mut set = JoinSet::new();

        for &capability in &requested {
            let Some(generator) = self.registry.get(capability) else {
                outcomes.insert(
                    capability,
                    Err(format!("no generator registered for {capability}")),
                );
                continue;
            };
            let request = request.clone();
            set.spawn(async move {
                let limit = generator.timeout();
                let result = match tokio::time::timeout(limit, generator.generate(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(limit)),
                };
                (capability, result.map_err(|e| e.to_string()))
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((capability, result)) => {
                    debug!(job_id, capability = %capability, ok = result.is_ok(), "capability settled");
                    outcomes.insert(capability, result);
                }
                // The capability is found missing below.
                Err(e) => warn!(job_id, error = %e, "generator task aborted"),
            }
        }

        let mut report = FanOutReport::default();
        for capability in requested {
            match outcomes.remove(&capability) {
                Some(Ok(generated)) => report.record_success(capability, generated),
                Some(Err(reason)) => report.record_failure(capability, reason),
                None => report.record_failure(capability, "generator task panicked"),
            }
        }
        report
    }
}
