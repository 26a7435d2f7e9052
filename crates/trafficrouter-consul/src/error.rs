//! Error types for the Consul traffic router.

use thiserror::Error;

use crate::client::ClientError;
use crate::types::EntryKind;

/// Result type alias for router operations.
pub type RouterResult<T> = Result<T, RouterError>;

/// Errors returned to the rollout controller. Each renders as one line.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("traffic routing plugin configuration {0:?} was not found in rollout")]
    MissingPluginConfig(String),

    #[error("failed to parse consul traffic routing configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error(
        "invalid consul traffic routing configuration. stableSubsetName, canarySubsetName, and serviceName must be set"
    )]
    InvalidConfig,

    #[error("desired weight {0} is outside the range 0-100")]
    InvalidWeight(i32),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("expected {expected} but received {found}")]
    UnexpectedKind { expected: EntryKind, found: EntryKind },

    #[error(
        "{} has not synced with Consul. The {} needs to be up to date before rollout can continue",
        .0.label(),
        .0.label()
    )]
    NotSynced(EntryKind),

    #[error("spec.subsets.{subset}.filter was not found in consul service resolver: {resolver}")]
    SubsetNotFound { subset: String, resolver: String },

    #[error("spec.splits was not found in consul service splitter")]
    SplitsNotFound,

    #[error("unexpected number of service splits. Expected 2, found {0}")]
    SplitCount(usize),

    #[error("unexpected service split {0:?}")]
    UnexpectedSplit(String),
}

/// Broad classes of failure, for callers that react differently to each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad plugin configuration or input. No resource was touched.
    Config,
    /// A routing resource does not exist.
    NotFound,
    /// A routing resource has not converged with Consul yet.
    Stale,
    /// A routing resource does not have the expected subsets or splits.
    Shape,
    /// Reading or writing a routing resource failed.
    Persistence,
}

impl RouterError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingPluginConfig(_)
            | Self::ConfigParse(_)
            | Self::InvalidConfig
            | Self::InvalidWeight(_) => ErrorCategory::Config,
            Self::Client(ClientError::NotFound { .. }) => ErrorCategory::NotFound,
            Self::Client(_) => ErrorCategory::Persistence,
            Self::NotSynced(_) => ErrorCategory::Stale,
            Self::UnexpectedKind { .. }
            | Self::SubsetNotFound { .. }
            | Self::SplitsNotFound
            | Self::SplitCount(_)
            | Self::UnexpectedSplit(_) => ErrorCategory::Shape,
        }
    }
}
