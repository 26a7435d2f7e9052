//! Sync gate — refuse to touch an entry the Consul controller hasn't applied.
//!
//! The Consul controller reports a `Synced` condition and a last-synced
//! timestamp on every config entry. If the condition is not `True`, or the
//! two timestamps have drifted apart, the entry in Kubernetes may not be
//! what Consul is serving and the rollout must wait.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::error::{RouterError, RouterResult};
use crate::types::{CONDITION_SYNCED, Condition, ConditionStatus, EntryKind, Status};

/// Default maximum drift between transition time and last sync.
pub const DEFAULT_SYNC_TOLERANCE: Duration = Duration::from_secs(2);

/// Freshness check for config entry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub tolerance: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_SYNC_TOLERANCE,
        }
    }
}

impl SyncPolicy {
    pub fn new(tolerance: Duration) -> Self {
        Self { tolerance }
    }

    /// Check every `Synced` condition on `status`.
    ///
    /// An entry without a `Synced` condition passes.
    pub fn check(&self, kind: EntryKind, status: &Status) -> RouterResult<()> {
        for condition in status
            .conditions
            .iter()
            .filter(|c| c.type_ == CONDITION_SYNCED)
        {
            if condition.status != ConditionStatus::True
                || self.drifted(condition, status.last_synced_time)
            {
                debug!(
                    kind = %kind,
                    status = ?condition.status,
                    transition = ?condition.last_transition_time,
                    last_synced = ?status.last_synced_time,
                    "config entry not synced"
                );
                return Err(RouterError::NotSynced(kind));
            }
        }
        Ok(())
    }

    /// Missing timestamps count as drift.
    fn drifted(&self, condition: &Condition, last_synced: Option<DateTime<Utc>>) -> bool {
        let (Some(transition), Some(synced)) = (condition.last_transition_time, last_synced) else {
            return true;
        };
        // A tolerance too large for TimeDelta can never be exceeded.
        TimeDelta::from_std(self.tolerance)
            .is_ok_and(|tolerance| (transition - synced).abs() > tolerance)
    }
}
