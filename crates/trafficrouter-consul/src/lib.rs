//! Consul traffic router for progressive rollouts.
//!
//! Shifts traffic between the stable and canary versions of a service by
//! rewriting two Consul config entries: the `ServiceResolver` subset
//! filters that decide which instances belong to each subset, and the
//! `ServiceSplitter` weights that divide traffic between the subsets.
//!
//! # Components
//!
//! - **`phase`** — Classifies a rollout as in-progress, aborted or completed
//! - **`resolver`** — Derives resolver filters and splitter weights
//! - **`freshness`** — Sync gate: entries must be current with Consul
//! - **`plugin`** — `set_weight` and the rest of the router interface
//! - **`client`** — Config entry fetch/update trait and in-memory store
//! - **`config`** — Per-rollout plugin config and operator settings

pub mod client;
pub mod config;
pub mod error;
pub mod freshness;
pub mod phase;
pub mod plugin;
pub mod resolver;
pub mod types;

pub use client::{ClientError, ClientResult, ConfigEntryClient, EntrySnapshot, MemoryClient};
pub use config::{CONFIG_KEY, ConsulTrafficRouting, LogFormat, PluginSettings};
pub use error::{ErrorCategory, RouterError, RouterResult};
pub use freshness::SyncPolicy;
pub use phase::{RolloutPhase, classify};
pub use plugin::{ConsulPlugin, PLUGIN_TYPE, TrafficRouterPlugin, Verified};
pub use types::*;
