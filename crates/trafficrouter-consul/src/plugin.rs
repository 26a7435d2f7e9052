//! The traffic router plugin — drives resolver and splitter updates.
//!
//! `set_weight` is the only operation with real work. It classifies the
//! rollout, fetches both config entries, gates on their sync status,
//! derives the new filters and weights, and persists the resolver then the
//! splitter. Nothing is written unless every check passes. The two writes
//! are not atomic: if the splitter write fails the resolver has already
//! been updated, and the next call re-derives and re-applies both.

use tracing::{debug, debug_span, info, warn};

use crate::client::ConfigEntryClient;
use crate::config::ConsulTrafficRouting;
use crate::error::{RouterError, RouterResult};
use crate::freshness::SyncPolicy;
use crate::phase::{RolloutPhase, classify};
use crate::resolver::{apply_split_weights, apply_subset_filters};
use crate::types::{
    ConfigEntry, EntryKind, Rollout, ServiceResolver, ServiceSplitter, SetHeaderRoute,
    SetMirrorRoute, Status, WeightDestination,
};

/// Plugin type reported to the rollout controller.
pub const PLUGIN_TYPE: &str = "Consul";

/// Value of the `plugin` field on every log line and span.
const LOG_PLUGIN: &str = "trafficrouter";

/// Outcome of a weight verification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Verified {
    Verified,
    NotVerified,
    NotImplemented,
}

/// Operations a traffic router plugin exposes to the rollout controller.
pub trait TrafficRouterPlugin {
    /// One-time setup before the first call.
    fn init(&self) -> RouterResult<()>;

    /// Record new canary/stable pod template hashes.
    fn update_hash(
        &self,
        rollout: &Rollout,
        canary_hash: &str,
        stable_hash: &str,
        additional: &[WeightDestination],
    ) -> RouterResult<()>;

    /// Route `desired_weight` percent of traffic to the canary.
    fn set_weight(
        &self,
        rollout: &Rollout,
        desired_weight: i32,
        additional: &[WeightDestination],
    ) -> RouterResult<()>;

    fn set_header_route(&self, rollout: &Rollout, route: &SetHeaderRoute) -> RouterResult<()>;

    fn set_mirror_route(&self, rollout: &Rollout, route: &SetMirrorRoute) -> RouterResult<()>;

    /// Remove routes the plugin created for header or mirror routing.
    fn remove_managed_routes(&self, rollout: &Rollout) -> RouterResult<()>;

    /// Check that the routing layer is actually serving `desired_weight`.
    fn verify_weight(
        &self,
        rollout: &Rollout,
        desired_weight: i32,
        additional: &[WeightDestination],
    ) -> RouterResult<Verified>;

    fn plugin_type(&self) -> &'static str;
}

/// Consul implementation of [`TrafficRouterPlugin`].
pub struct ConsulPlugin<C> {
    client: C,
    sync: SyncPolicy,
}

impl<C: ConfigEntryClient> ConsulPlugin<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            sync: SyncPolicy::default(),
        }
    }

    /// Override the sync gate tolerance.
    pub fn with_sync_policy(mut self, sync: SyncPolicy) -> Self {
        self.sync = sync;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        self.sync
    }

    fn fetch_resolver(&self, name: &str, namespace: &str) -> RouterResult<ServiceResolver> {
        match self.client.get(EntryKind::ServiceResolver, name, namespace)? {
            ConfigEntry::ServiceResolver(resolver) => Ok(resolver),
            other => Err(RouterError::UnexpectedKind {
                expected: EntryKind::ServiceResolver,
                found: other.kind(),
            }),
        }
    }

    fn fetch_splitter(&self, name: &str, namespace: &str) -> RouterResult<ServiceSplitter> {
        match self.client.get(EntryKind::ServiceSplitter, name, namespace)? {
            ConfigEntry::ServiceSplitter(splitter) => Ok(splitter),
            other => Err(RouterError::UnexpectedKind {
                expected: EntryKind::ServiceSplitter,
                found: other.kind(),
            }),
        }
    }

    fn check_synced(&self, kind: EntryKind, status: &Status) -> RouterResult<()> {
        self.sync.check(kind, status).inspect_err(|_| {
            warn!(kind = %kind, "config entry not synced with Consul, holding rollout");
        })
    }
}

impl<C: ConfigEntryClient> TrafficRouterPlugin for ConsulPlugin<C> {
    fn init(&self) -> RouterResult<()> {
        debug!(plugin = LOG_PLUGIN, "traffic router initialized");
        Ok(())
    }

    fn update_hash(
        &self,
        _rollout: &Rollout,
        _canary_hash: &str,
        _stable_hash: &str,
        _additional: &[WeightDestination],
    ) -> RouterResult<()> {
        Ok(())
    }

    fn set_weight(
        &self,
        rollout: &Rollout,
        desired_weight: i32,
        _additional: &[WeightDestination],
    ) -> RouterResult<()> {
        let _span = debug_span!(
            "set_weight",
            plugin = LOG_PLUGIN,
            rollout = %rollout.metadata.name,
            namespace = %rollout.metadata.namespace,
            desired_weight
        )
        .entered();

        let routing = ConsulTrafficRouting::from_rollout(rollout)?;
        let weight = u8::try_from(desired_weight)
            .ok()
            .filter(|w| *w <= 100)
            .ok_or(RouterError::InvalidWeight(desired_weight))?;

        let phase = classify(rollout);
        if phase == RolloutPhase::NoCanaryYet {
            debug!("rollout does not have a canary status yet");
            return Ok(());
        }

        let namespace = rollout.metadata.namespace.as_str();
        let service = routing.service_name.as_str();
        let filter = routing.filter_for(routing.service_meta_value(rollout));

        let mut resolver = self.fetch_resolver(service, namespace)?;
        self.check_synced(EntryKind::ServiceResolver, &resolver.status)?;
        debug!(%phase, service, %filter, "updating service resolver");
        apply_subset_filters(phase, &routing, &filter, &mut resolver)?;

        let mut splitter = self.fetch_splitter(service, namespace)?;
        self.check_synced(EntryKind::ServiceSplitter, &splitter.status)?;
        apply_split_weights(weight, &routing, &mut splitter)?;

        // Writes go last so a failed check never leaves a partial update.
        self.client.update(&ConfigEntry::ServiceResolver(resolver))?;
        info!(%phase, service, "service resolver updated");

        self.client.update(&ConfigEntry::ServiceSplitter(splitter))?;
        info!(
            %phase,
            service,
            canary = weight,
            stable = 100 - weight,
            "service splitter updated"
        );
        Ok(())
    }

    fn set_header_route(&self, _rollout: &Rollout, _route: &SetHeaderRoute) -> RouterResult<()> {
        Ok(())
    }

    fn set_mirror_route(&self, _rollout: &Rollout, _route: &SetMirrorRoute) -> RouterResult<()> {
        Ok(())
    }

    fn remove_managed_routes(&self, _rollout: &Rollout) -> RouterResult<()> {
        Ok(())
    }

    fn verify_weight(
        &self,
        _rollout: &Rollout,
        _desired_weight: i32,
        _additional: &[WeightDestination],
    ) -> RouterResult<Verified> {
        Ok(Verified::NotImplemented)
    }

    fn plugin_type(&self) -> &'static str {
        PLUGIN_TYPE
    }
}
