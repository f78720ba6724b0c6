//! Fan-out strategies that turn a task plan into stored assets.
//!
//! Both strategies share one contract, [`Strategy::run_all`], and never fail
//! as a whole: every capability ends up either in `assets` or in `failures`
//! (with a matching warning), and the dispatcher makes the terminal call.

mod delegated;
mod direct;
mod parse;
mod selector;

pub use delegated::{CoordinatorEngine, DelegatedCoordinator, HttpCoordinatorEngine, coordinator_prompt};
pub use direct::DirectParallel;
pub use parse::{ParsedOutput, parse_engine_output};
pub use selector::{StrategySelector, bucket};

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::generator::GeneratedAsset;
use crate::job::{AssetRef, Capability, TaskPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    DirectParallel,
    DelegatedCoordinator,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::DirectParallel => write!(f, "direct_parallel"),
            StrategyKind::DelegatedCoordinator => write!(f, "delegated_coordinator"),
        }
    }
}

/// Aggregated outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOutReport {
    pub assets: BTreeMap<Capability, AssetRef>,
    pub warnings: Vec<String>,
    pub failures: Vec<(Capability, String)>,
}

impl FanOutReport {
    pub fn record_success(&mut self, capability: Capability, generated: GeneratedAsset) {
        self.warnings.extend(generated.warnings);
        self.assets.insert(capability, generated.asset);
    }

    /// A failed capability is excluded from `assets` and explained in `warnings`.
    pub fn record_failure(&mut self, capability: Capability, reason: impl Into<String>) {
        let reason = reason.into();
        self.warnings.push(format!("{capability}: {reason}"));
        self.failures.push((capability, reason));
    }

    /// No requested capability produced an asset.
    pub fn all_failed(&self) -> bool {
        self.assets.is_empty()
    }
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn run_all(&self, job_id: &str, plan: &TaskPlan) -> FanOutReport;
}
