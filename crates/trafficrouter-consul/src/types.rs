//! Wire types for rollouts and Consul config entries.
//!
//! These mirror the JSON shape of the Kubernetes objects the router reads
//! and writes: the rollout (read-only) and the two Consul config entries,
//! `ServiceResolver` and `ServiceSplitter` (fetched, mutated, written back).
//! Only the fields the router looks at are modelled; everything is
//! camelCase on the wire.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition type marking a rollout as fully promoted.
pub const ROLLOUT_COMPLETED: &str = "Completed";

/// Condition type reported by the Consul controller once an entry is applied.
pub const CONDITION_SYNCED: &str = "Synced";

// ── Metadata ──────────────────────────────────────────────────────

/// Subset of Kubernetes object metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub generation: i64,
    /// Opaque version used for optimistic concurrency on update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Metadata for a named object in a namespace.
    pub fn named(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }
}

/// Tri-state condition status, serialized as `"True"`, `"False"`, `"Unknown"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

// ── Rollout ───────────────────────────────────────────────────────

/// The rollout being reconciled. Owned by the rollout controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rollout {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RolloutSpec,
    #[serde(default)]
    pub status: RolloutStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolloutSpec {
    #[serde(default)]
    pub template: PodTemplate,
    #[serde(default)]
    pub strategy: RolloutStrategy,
}

/// Pod template; only its annotations matter here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodTemplate {
    #[serde(default)]
    pub metadata: ObjectMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolloutStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary: Option<CanaryStrategy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanaryStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_routing: Option<TrafficRouting>,
}

/// Traffic routing block. Plugin configs are kept as raw JSON keyed by
/// plugin name and decoded by the plugin that owns the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficRouting {
    #[serde(default)]
    pub plugins: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStatus {
    #[serde(default)]
    pub abort: bool,
    /// Generation the controller last observed, as a decimal string.
    #[serde(default)]
    pub observed_generation: String,
    #[serde(default)]
    pub conditions: Vec<RolloutCondition>,
    #[serde(default)]
    pub canary: CanaryStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Canary progress as reported by the rollout controller.
///
/// All fields absent means the controller has not started a canary yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanaryStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_analysis_run_status: Option<AnalysisRunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_background_analysis_run_status: Option<AnalysisRunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_experiment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<TrafficWeights>,
    /// Which ping/pong service currently acts as stable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_ping_pong: Option<String>,
}

impl CanaryStatus {
    /// True when nothing has been reported yet.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRunStatus {
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficWeights {
    pub canary: WeightDestination,
    pub stable: WeightDestination,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional: Vec<WeightDestination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightDestination {
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub pod_template_hash: String,
}

// ── Header / mirror routes ────────────────────────────────────────

/// String matcher used by header and mirror routes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StringMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderRoutingMatch {
    pub header_name: String,
    pub header_value: StringMatch,
}

/// Header-based route requested by the rollout controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetHeaderRoute {
    pub name: String,
    #[serde(default, rename = "match")]
    pub matches: Vec<HeaderRoutingMatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<StringMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<StringMatch>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, StringMatch>,
}

/// Mirror route requested by the rollout controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetMirrorRoute {
    pub name: String,
    #[serde(default, rename = "match")]
    pub matches: Vec<RouteMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<i32>,
}

// ── Consul config entries ─────────────────────────────────────────

/// Sync status the Consul controller writes on every config entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Resolver: maps subset names to catalog filter expressions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceResolver {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceResolverSpec,
    #[serde(default)]
    pub status: Status,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResolverSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_subset: Option<String>,
    #[serde(default)]
    pub subsets: BTreeMap<String, ServiceResolverSubset>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResolverSubset {
    /// Catalog filter expression, e.g. `Service.Meta.version == 2`.
    #[serde(default)]
    pub filter: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub only_passing: bool,
}

/// Splitter: weighted split of traffic across resolver subsets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSplitter {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceSplitterSpec,
    #[serde(default)]
    pub status: Status,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSplitterSpec {
    #[serde(default)]
    pub splits: Vec<ServiceSplit>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSplit {
    pub weight: f32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(default)]
    pub service_subset: String,
}

/// The two kinds of config entry the router touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    ServiceResolver,
    ServiceSplitter,
}

impl EntryKind {
    /// Fully qualified plural resource name, as the API server reports it.
    pub fn plural(self) -> &'static str {
        match self {
            Self::ServiceResolver => "serviceresolvers.consul.hashicorp.com",
            Self::ServiceSplitter => "servicesplitters.consul.hashicorp.com",
        }
    }

    /// Human-readable name used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::ServiceResolver => "service resolver",
            Self::ServiceSplitter => "service splitter",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

/// A config entry of either kind, tagged by `kind` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ConfigEntry {
    ServiceResolver(ServiceResolver),
    ServiceSplitter(ServiceSplitter),
}

impl ConfigEntry {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::ServiceResolver(_) => EntryKind::ServiceResolver,
            Self::ServiceSplitter(_) => EntryKind::ServiceSplitter,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::ServiceResolver(r) => &r.metadata,
            Self::ServiceSplitter(s) => &s.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::ServiceResolver(r) => &mut r.metadata,
            Self::ServiceSplitter(s) => &mut s.metadata,
        }
    }
}

impl From<ServiceResolver> for ConfigEntry {
    fn from(resolver: ServiceResolver) -> Self {
        Self::ServiceResolver(resolver)
    }
}

impl From<ServiceSplitter> for ConfigEntry {
    fn from(splitter: ServiceSplitter) -> Self {
        Self::ServiceSplitter(splitter)
    }
}
