use serde::Deserialize;

use super::StrategyKind;

/// Stable rollout bucket in `0..100` for a job id.
pub fn bucket(job_id: &str) -> u8 {
    let hash = blake3::hash(job_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_le_bytes(prefix) % 100) as u8
}

/// Picks a strategy per job. Pure: same id, same answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct StrategySelector {
    #[serde(default)]
    pub delegated_enabled: bool,
    #[serde(default)]
    pub rollout_percentage: u8,
}

impl StrategySelector {
    pub fn new(delegated_enabled: bool, rollout_percentage: u8) -> Self {
        Self {
            delegated_enabled,
            rollout_percentage: rollout_percentage.min(100),
        }
    }

    pub fn select(&self, job_id: &str) -> StrategyKind {
        if self.delegated_enabled && bucket(job_id) < self.rollout_percentage.min(100) {
            StrategyKind::DelegatedCoordinator
        } else {
            StrategyKind::DirectParallel
        }
    }
}
