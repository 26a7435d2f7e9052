//! Routing state derivation — resolver subset filters and splitter weights.
//!
//! Both functions mutate an in-memory copy of the entry. Nothing here talks
//! to the client; the caller decides whether and when to persist.
//!
//! Filter policy per phase:
//!
//! | Phase       | canary subset     | stable subset     |
//! |-------------|-------------------|-------------------|
//! | InProgress  | new version       | untouched         |
//! | Aborted     | cleared           | untouched         |
//! | Completed   | cleared           | new version       |

use tracing::debug;

use crate::config::ConsulTrafficRouting;
use crate::error::{RouterError, RouterResult};
use crate::phase::RolloutPhase;
use crate::types::{ServiceResolver, ServiceSplitter};

/// Number of splits a managed splitter must have: canary and stable.
pub const EXPECTED_SPLITS: usize = 2;

/// Rewrite resolver subset filters for `phase`.
///
/// `filter` is the expression selecting the rollout's new version. Every
/// subset that will be written is checked before anything is changed, so
/// a missing subset leaves `resolver` untouched and the error carries its
/// original content.
pub fn apply_subset_filters(
    phase: RolloutPhase,
    routing: &ConsulTrafficRouting,
    filter: &str,
    resolver: &mut ServiceResolver,
) -> RouterResult<()> {
    let canary = routing.canary_subset_name.as_str();
    let stable = routing.stable_subset_name.as_str();

    let writes: Vec<(&str, &str)> = match phase {
        RolloutPhase::NoCanaryYet => Vec::new(),
        RolloutPhase::InProgress => vec![(canary, filter)],
        RolloutPhase::Aborted => vec![(canary, "")],
        RolloutPhase::Completed => vec![(canary, ""), (stable, filter)],
    };

    for (subset, _) in &writes {
        if !resolver.spec.subsets.contains_key(*subset) {
            return Err(RouterError::SubsetNotFound {
                subset: subset.to_string(),
                resolver: describe(resolver),
            });
        }
    }

    for (subset, value) in writes {
        if let Some(entry) = resolver.spec.subsets.get_mut(subset) {
            debug!(%phase, subset, filter = value, "setting resolver subset filter");
            entry.filter = value.to_string();
        }
    }
    Ok(())
}

/// Set canary and stable split weights. `desired_weight` goes to canary,
/// the remainder of 100 to stable.
pub fn apply_split_weights(
    desired_weight: u8,
    routing: &ConsulTrafficRouting,
    splitter: &mut ServiceSplitter,
) -> RouterResult<()> {
    if desired_weight > 100 {
        return Err(RouterError::InvalidWeight(desired_weight.into()));
    }

    let splits = &mut splitter.spec.splits;
    match splits.len() {
        0 => return Err(RouterError::SplitsNotFound),
        EXPECTED_SPLITS => {}
        n => return Err(RouterError::SplitCount(n)),
    }

    // Each side must appear exactly once.
    let (mut canary, mut stable) = (None, None);
    for (i, split) in splits.iter().enumerate() {
        let slot = if split.service_subset == routing.canary_subset_name {
            &mut canary
        } else if split.service_subset == routing.stable_subset_name {
            &mut stable
        } else {
            return Err(RouterError::UnexpectedSplit(split.service_subset.clone()));
        };
        if slot.replace(i).is_some() {
            return Err(RouterError::UnexpectedSplit(split.service_subset.clone()));
        }
    }
    let (Some(canary), Some(stable)) = (canary, stable) else {
        return Err(RouterError::SplitCount(splits.len()));
    };

    let canary_weight = f32::from(desired_weight);
    let stable_weight = f32::from(100 - desired_weight);
    splits[canary].weight = canary_weight;
    splits[stable].weight = stable_weight;

    debug!(
        canary = canary_weight,
        stable = stable_weight,
        "set splitter weights"
    );
    Ok(())
}

/// JSON rendering of a resolver for error messages.
fn describe(resolver: &ServiceResolver) -> String {
    serde_json::to_string(resolver).unwrap_or_else(|_| format!("{resolver:?}"))
}
