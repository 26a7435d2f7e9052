//! Plugin configuration and operator settings.
//!
//! `ConsulTrafficRouting` is the per-rollout config found under the
//! `hashicorp/consul` key of the rollout's traffic routing plugins.
//! `PluginSettings` is the operator-level TOML file for the binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RouterError, RouterResult};
use crate::freshness::{DEFAULT_SYNC_TOLERANCE, SyncPolicy};
use crate::types::Rollout;

/// Key identifying this plugin in the rollout's traffic routing plugins.
pub const CONFIG_KEY: &str = "hashicorp/consul";

/// Annotation suffix used when the config does not name one.
pub const DEFAULT_ANNOTATION_SUFFIX: &str = "version";

const SERVICE_META_ANNOTATION_PREFIX: &str = "consul.hashicorp.com/service-meta-";

/// Per-rollout Consul routing configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsulTrafficRouting {
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub canary_subset_name: String,
    #[serde(default)]
    pub stable_subset_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_meta_annotation_suffix: Option<String>,
}

impl ConsulTrafficRouting {
    /// Decode and validate the plugin config attached to `rollout`.
    pub fn from_rollout(rollout: &Rollout) -> RouterResult<Self> {
        let raw = rollout
            .spec
            .strategy
            .canary
            .as_ref()
            .and_then(|canary| canary.traffic_routing.as_ref())
            .and_then(|routing| routing.plugins.get(CONFIG_KEY))
            .ok_or_else(|| RouterError::MissingPluginConfig(CONFIG_KEY.to_string()))?;

        let config = Self::deserialize(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Service name and both subset names must be non-empty.
    pub fn validate(&self) -> RouterResult<()> {
        if self.service_name.is_empty()
            || self.canary_subset_name.is_empty()
            || self.stable_subset_name.is_empty()
        {
            return Err(RouterError::InvalidConfig);
        }
        Ok(())
    }

    /// Configured annotation suffix, or `version`.
    pub fn annotation_suffix(&self) -> &str {
        match self.service_meta_annotation_suffix.as_deref() {
            Some(suffix) if !suffix.is_empty() => suffix,
            _ => DEFAULT_ANNOTATION_SUFFIX,
        }
    }

    /// Pod template annotation holding the version value, e.g.
    /// `consul.hashicorp.com/service-meta-version`.
    pub fn annotation_key(&self) -> String {
        format!("{SERVICE_META_ANNOTATION_PREFIX}{}", self.annotation_suffix())
    }

    /// Value of the version annotation on the rollout's pod template.
    /// Missing annotations read as empty.
    pub fn service_meta_value<'a>(&self, rollout: &'a Rollout) -> &'a str {
        rollout
            .spec
            .template
            .metadata
            .annotations
            .get(&self.annotation_key())
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Catalog filter selecting instances whose service meta matches `value`.
    pub fn filter_for(&self, value: &str) -> String {
        service_meta_filter(self.annotation_suffix(), value)
    }
}

/// `Service.Meta.<suffix> == <value>`
pub fn service_meta_filter(suffix: &str, value: &str) -> String {
    format!("Service.Meta.{suffix} == {value}")
}

// ── Operator settings ─────────────────────────────────────────────

/// Settings for the `trafficrouter-consul` binary, read from TOML.
///
/// ```toml
/// [sync]
/// tolerance_ms = 2000
///
/// [log]
/// level = "info"
/// format = "json"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginSettings {
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Maximum gap between a Synced condition's transition time and the
    /// entry's last sync, in milliseconds.
    #[serde(default = "default_tolerance_ms")]
    pub tolerance_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            tolerance_ms: default_tolerance_ms(),
        }
    }
}

impl SyncSettings {
    pub fn policy(&self) -> SyncPolicy {
        SyncPolicy::new(Duration::from_millis(self.tolerance_ms))
    }
}

fn default_tolerance_ms() -> u64 {
    DEFAULT_SYNC_TOLERANCE.as_millis() as u64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Default filter directive; `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl PluginSettings {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
