//! Rollout phase classification.

use std::fmt;

use crate::types::{ConditionStatus, ROLLOUT_COMPLETED, Rollout, RolloutCondition};

/// Which routing policy applies to a rollout right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RolloutPhase {
    /// The controller hasn't reported canary status yet. Nothing to do.
    NoCanaryYet,
    /// Rollout aborted. Canary traffic goes back to stable.
    Aborted,
    /// Rollout fully promoted. Stable now points at the new version.
    Completed,
    /// Canary is receiving a share of traffic.
    InProgress,
}

impl fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoCanaryYet => "no-canary-yet",
            Self::Aborted => "aborted",
            Self::Completed => "completed",
            Self::InProgress => "in-progress",
        })
    }
}

/// Classify a rollout. Abort wins over completion.
pub fn classify(rollout: &Rollout) -> RolloutPhase {
    if rollout.status.canary.is_empty() {
        RolloutPhase::NoCanaryYet
    } else if rollout.status.abort {
        RolloutPhase::Aborted
    } else if is_complete(rollout) {
        RolloutPhase::Completed
    } else {
        RolloutPhase::InProgress
    }
}

/// The controller has observed the current generation and marked it completed.
pub fn is_complete(rollout: &Rollout) -> bool {
    let Some(condition) = completed_condition(rollout) else {
        return false;
    };
    rollout.metadata.generation.to_string() == rollout.status.observed_generation
        && condition.status == ConditionStatus::True
}

fn completed_condition(rollout: &Rollout) -> Option<&RolloutCondition> {
    rollout
        .status
        .conditions
        .iter()
        .find(|c| c.type_ == ROLLOUT_COMPLETED)
}
