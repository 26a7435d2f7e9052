//! End-to-end `set_weight` scenarios against the in-memory client.

use chrono::{TimeDelta, Utc};

use trafficrouter_consul::{
    CONFIG_KEY, CanaryStatus, CanaryStrategy, ClientError, ClientResult, Condition,
    ConditionStatus, ConfigEntry, ConfigEntryClient, ConsulPlugin, EntryKind, ErrorCategory,
    MemoryClient, ObjectMeta, Rollout, RolloutCondition, RouterError, ServiceResolver,
    ServiceResolverSubset, ServiceSplit, ServiceSplitter, Status, TrafficRouterPlugin,
    TrafficRouting, TrafficWeights, WeightDestination,
};

const SERVICE: &str = "test-service";
const NAMESPACE: &str = "default";

// ── Fixtures ──────────────────────────────────────────────────────

fn plugin_config(suffix: Option<&str>) -> serde_json::Value {
    let mut config = serde_json::json!({
        "serviceName": SERVICE,
        "canarySubsetName": "canary",
        "stableSubsetName": "stable",
    });
    if let Some(suffix) = suffix {
        config["serviceMetaAnnotationSuffix"] = suffix.into();
    }
    config
}

struct RolloutBuilder {
    rollout: Rollout,
}

impl RolloutBuilder {
    fn new() -> Self {
        let mut rollout = Rollout {
            metadata: ObjectMeta {
                generation: 10,
                ..ObjectMeta::named("rollout", NAMESPACE)
            },
            ..Default::default()
        };
        rollout.spec.strategy.canary = Some(CanaryStrategy {
            traffic_routing: Some(TrafficRouting {
                plugins: [(CONFIG_KEY.to_string(), plugin_config(None))]
                    .into_iter()
                    .collect(),
            }),
        });
        rollout.status.observed_generation = "10".to_string();
        Self { rollout }
            .annotation("consul.hashicorp.com/service-meta-version", "2")
            .completed(ConditionStatus::False)
            .weights(50)
    }

    fn plugin(mut self, config: serde_json::Value) -> Self {
        if let Some(routing) = self
            .rollout
            .spec
            .strategy
            .canary
            .as_mut()
            .and_then(|c| c.traffic_routing.as_mut())
        {
            routing.plugins.insert(CONFIG_KEY.to_string(), config);
        }
        self
    }

    fn annotation(mut self, key: &str, value: &str) -> Self {
        self.rollout
            .spec
            .template
            .metadata
            .annotations
            .insert(key.to_string(), value.to_string());
        self
    }

    fn completed(mut self, status: ConditionStatus) -> Self {
        self.rollout.status.conditions = vec![RolloutCondition {
            type_: "Completed".to_string(),
            status,
            ..Default::default()
        }];
        self
    }

    fn weights(mut self, canary: i32) -> Self {
        self.rollout.status.canary.weights = Some(TrafficWeights {
            canary: WeightDestination {
                weight: canary,
                ..Default::default()
            },
            stable: WeightDestination {
                weight: 100 - canary,
                ..Default::default()
            },
            ..Default::default()
        });
        self
    }

    fn aborted(mut self) -> Self {
        self.rollout.status.abort = true;
        self
    }

    fn no_canary_status(mut self) -> Self {
        self.rollout.status.canary = CanaryStatus::default();
        self
    }

    fn build(self) -> Rollout {
        self.rollout
    }
}

fn synced_status() -> Status {
    let now = Utc::now();
    Status {
        conditions: vec![Condition {
            type_: "Synced".to_string(),
            status: ConditionStatus::True,
            last_transition_time: Some(now),
            ..Default::default()
        }],
        last_synced_time: Some(now),
    }
}

fn resolver_with(subsets: &[(&str, &str)]) -> ServiceResolver {
    ServiceResolver {
        metadata: ObjectMeta::named(SERVICE, NAMESPACE),
        spec: trafficrouter_consul::ServiceResolverSpec {
            default_subset: None,
            subsets: subsets
                .iter()
                .map(|(name, filter)| {
                    (
                        name.to_string(),
                        ServiceResolverSubset {
                            filter: filter.to_string(),
                            ..Default::default()
                        },
                    )
                })
                .collect(),
        },
        status: synced_status(),
    }
}

fn default_resolver() -> ServiceResolver {
    resolver_with(&[("stable", "Service.Meta.version == 1"), ("canary", "")])
}

fn splitter_with(splits: &[(&str, f32)]) -> ServiceSplitter {
    ServiceSplitter {
        metadata: ObjectMeta::named(SERVICE, NAMESPACE),
        spec: trafficrouter_consul::ServiceSplitterSpec {
            splits: splits
                .iter()
                .map(|(subset, weight)| ServiceSplit {
                    weight: *weight,
                    service_subset: subset.to_string(),
                    ..Default::default()
                })
                .collect(),
        },
        status: synced_status(),
    }
}

fn default_splitter() -> ServiceSplitter {
    splitter_with(&[("stable", 100.0), ("canary", 0.0)])
}

fn client_with(resolver: ServiceResolver, splitter: ServiceSplitter) -> MemoryClient {
    MemoryClient::with_entries([ConfigEntry::from(resolver), ConfigEntry::from(splitter)])
}

fn filter(client: &MemoryClient, subset: &str) -> String {
    client.resolver(SERVICE, NAMESPACE).unwrap().spec.subsets[subset]
        .filter
        .clone()
}

fn weight(client: &MemoryClient, subset: &str) -> f32 {
    client
        .splitter(SERVICE, NAMESPACE)
        .unwrap()
        .spec
        .splits
        .iter()
        .find(|s| s.service_subset == subset)
        .map(|s| s.weight)
        .unwrap()
}

// ── Phases ────────────────────────────────────────────────────────

#[test]
fn in_progress_sets_canary_filter_and_weights() {
    for desired in [0, 25, 50, 75, 100] {
        let client = client_with(default_resolver(), default_splitter());
        let plugin = ConsulPlugin::new(&client);
        let rollout = RolloutBuilder::new().weights(desired).build();

        plugin.set_weight(&rollout, desired, &[]).unwrap();

        assert_eq!(filter(&client, "canary"), "Service.Meta.version == 2");
        assert_eq!(filter(&client, "stable"), "Service.Meta.version == 1");
        assert_eq!(weight(&client, "canary"), desired as f32);
        assert_eq!(weight(&client, "stable"), (100 - desired) as f32);
        assert_eq!(client.update_calls(), 2);
    }
}

#[test]
fn completed_moves_stable_to_new_version() {
    let client = client_with(
        resolver_with(&[
            ("stable", "Service.Meta.version == 1"),
            ("canary", "Service.Meta.version == 2"),
        ]),
        splitter_with(&[("stable", 0.0), ("canary", 100.0)]),
    );
    let plugin = ConsulPlugin::new(&client);
    let rollout = RolloutBuilder::new()
        .completed(ConditionStatus::True)
        .weights(0)
        .build();

    plugin.set_weight(&rollout, 0, &[]).unwrap();

    assert_eq!(filter(&client, "canary"), "");
    assert_eq!(filter(&client, "stable"), "Service.Meta.version == 2");
    assert_eq!(weight(&client, "canary"), 0.0);
    assert_eq!(weight(&client, "stable"), 100.0);
}

#[test]
fn completion_needs_current_generation() {
    let client = client_with(default_resolver(), default_splitter());
    let plugin = ConsulPlugin::new(&client);
    let mut rollout = RolloutBuilder::new().completed(ConditionStatus::True).build();
    rollout.status.observed_generation = "9".to_string();

    plugin.set_weight(&rollout, 50, &[]).unwrap();

    // Treated as still in progress.
    assert_eq!(filter(&client, "canary"), "Service.Meta.version == 2");
    assert_eq!(filter(&client, "stable"), "Service.Meta.version == 1");
}

#[test]
fn aborted_clears_canary_filter() {
    let client = client_with(
        resolver_with(&[
            ("stable", "Service.Meta.version == 1"),
            ("canary", "Service.Meta.version == 2"),
        ]),
        splitter_with(&[("stable", 0.0), ("canary", 100.0)]),
    );
    let plugin = ConsulPlugin::new(&client);
    let rollout = RolloutBuilder::new().aborted().weights(100).build();

    plugin.set_weight(&rollout, 0, &[]).unwrap();

    assert_eq!(filter(&client, "canary"), "");
    assert_eq!(filter(&client, "stable"), "Service.Meta.version == 1");
    assert_eq!(weight(&client, "canary"), 0.0);
    assert_eq!(weight(&client, "stable"), 100.0);
}

#[test]
fn abort_wins_over_completion() {
    let client = client_with(default_resolver(), default_splitter());
    let plugin = ConsulPlugin::new(&client);
    let rollout = RolloutBuilder::new()
        .completed(ConditionStatus::True)
        .aborted()
        .build();

    plugin.set_weight(&rollout, 20, &[]).unwrap();

    assert_eq!(filter(&client, "canary"), "");
    assert_eq!(filter(&client, "stable"), "Service.Meta.version == 1");
    assert_eq!(weight(&client, "canary"), 20.0);
}

#[test]
fn custom_annotation_suffix() {
    let client = client_with(default_resolver(), default_splitter());
    let plugin = ConsulPlugin::new(&client);
    let rollout = RolloutBuilder::new()
        .plugin(plugin_config(Some("release")))
        .annotation("consul.hashicorp.com/service-meta-release", "2")
        .build();

    plugin.set_weight(&rollout, 50, &[]).unwrap();

    assert_eq!(filter(&client, "canary"), "Service.Meta.release == 2");
    assert_eq!(weight(&client, "canary"), 50.0);
    assert_eq!(weight(&client, "stable"), 50.0);
}

#[test]
fn no_canary_status_is_a_no_op() {
    let client = client_with(default_resolver(), default_splitter());
    let plugin = ConsulPlugin::new(&client);
    let rollout = RolloutBuilder::new().no_canary_status().build();

    plugin.set_weight(&rollout, 50, &[]).unwrap();

    assert_eq!(client.get_calls(), 0);
    assert_eq!(client.update_calls(), 0);
}

#[test]
fn repeated_call_converges() {
    let client = client_with(default_resolver(), default_splitter());
    let plugin = ConsulPlugin::new(&client);
    let rollout = RolloutBuilder::new().build();

    plugin.set_weight(&rollout, 40, &[]).unwrap();
    let first = (
        client.resolver(SERVICE, NAMESPACE).unwrap().spec,
        client.splitter(SERVICE, NAMESPACE).unwrap().spec,
    );

    plugin.set_weight(&rollout, 40, &[]).unwrap();
    let second = (
        client.resolver(SERVICE, NAMESPACE).unwrap().spec,
        client.splitter(SERVICE, NAMESPACE).unwrap().spec,
    );

    assert_eq!(first, second);
}

// ── Configuration errors ──────────────────────────────────────────

#[test]
fn invalid_plugin_config() {
    let client = client_with(default_resolver(), default_splitter());
    let plugin = ConsulPlugin::new(&client);
    let rollout = RolloutBuilder::new().plugin(serde_json::json!({})).build();

    let err = plugin.set_weight(&rollout, 50, &[]).unwrap_err();

    assert!(
        err.to_string()
            .starts_with("invalid consul traffic routing configuration.")
    );
    assert_eq!(err.category(), ErrorCategory::Config);
    assert_eq!(client.get_calls(), 0);
}

#[test]
fn invalid_config_reported_even_without_canary_status() {
    let client = MemoryClient::new();
    let plugin = ConsulPlugin::new(&client);
    let rollout = RolloutBuilder::new()
        .plugin(serde_json::json!({"serviceName": SERVICE}))
        .no_canary_status()
        .build();

    let err = plugin.set_weight(&rollout, 50, &[]).unwrap_err();
    assert!(matches!(err, RouterError::InvalidConfig));
}

#[test]
fn weight_out_of_range() {
    let client = client_with(default_resolver(), default_splitter());
    let plugin = ConsulPlugin::new(&client);
    let rollout = RolloutBuilder::new().build();

    for desired in [-1, 101] {
        let err = plugin.set_weight(&rollout, desired, &[]).unwrap_err();
        assert!(matches!(err, RouterError::InvalidWeight(w) if w == desired));
    }
    assert_eq!(client.get_calls(), 0);
}

// ── Missing resources ─────────────────────────────────────────────

#[test]
fn missing_resolver() {
    let client = MemoryClient::with_entries([ConfigEntry::from(default_splitter())]);
    let plugin = ConsulPlugin::new(&client);

    let err = plugin
        .set_weight(&RolloutBuilder::new().build(), 50, &[])
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "serviceresolvers.consul.hashicorp.com \"test-service\" not found"
    );
    assert_eq!(client.update_calls(), 0);
}

#[test]
fn missing_splitter() {
    let client = MemoryClient::with_entries([ConfigEntry::from(default_resolver())]);
    let plugin = ConsulPlugin::new(&client);

    let err = plugin
        .set_weight(&RolloutBuilder::new().build(), 50, &[])
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "servicesplitters.consul.hashicorp.com \"test-service\" not found"
    );
    assert_eq!(err.category(), ErrorCategory::NotFound);
    assert_eq!(client.update_calls(), 0);
}

// ── Resolver shape ────────────────────────────────────────────────

#[test]
fn missing_canary_subset_blocks_all_writes() {
    let rollouts = [
        RolloutBuilder::new().build(),
        RolloutBuilder::new().aborted().build(),
        RolloutBuilder::new().completed(ConditionStatus::True).build(),
    ];
    for rollout in rollouts {
        let client = client_with(
            resolver_with(&[("stable", "Service.Meta.version == 1")]),
            default_splitter(),
        );
        let plugin = ConsulPlugin::new(&client);

        let err = plugin.set_weight(&rollout, 50, &[]).unwrap_err();

        assert!(
            err.to_string()
                .starts_with("spec.subsets.canary.filter was not found in consul service resolver")
        );
        assert_eq!(client.update_calls(), 0);
    }
}

#[test]
fn missing_stable_subset_on_completion() {
    let client = client_with(resolver_with(&[("canary", "")]), default_splitter());
    let plugin = ConsulPlugin::new(&client);
    let rollout = RolloutBuilder::new().completed(ConditionStatus::True).build();

    let err = plugin.set_weight(&rollout, 0, &[]).unwrap_err();

    assert!(
        err.to_string()
            .starts_with("spec.subsets.stable.filter was not found in consul service resolver")
    );
    assert_eq!(err.category(), ErrorCategory::Shape);
    assert_eq!(client.update_calls(), 0);
}

// ── Splitter shape ────────────────────────────────────────────────

#[test]
fn splitter_without_splits() {
    let client = client_with(default_resolver(), splitter_with(&[]));
    let plugin = ConsulPlugin::new(&client);

    let err = plugin
        .set_weight(&RolloutBuilder::new().build(), 50, &[])
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "spec.splits was not found in consul service splitter"
    );
    assert_eq!(client.update_calls(), 0);
}

#[test]
fn splitter_with_wrong_split_count() {
    for (splits, found) in [
        (vec![("stable", 100.0)], 1),
        (
            vec![("stable", 100.0), ("canary", 0.0), ("canary", 0.0)],
            3,
        ),
    ] {
        let client = client_with(default_resolver(), splitter_with(&splits));
        let plugin = ConsulPlugin::new(&client);

        let err = plugin
            .set_weight(&RolloutBuilder::new().build(), 50, &[])
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            format!("unexpected number of service splits. Expected 2, found {found}")
        );
        assert_eq!(client.update_calls(), 0);
    }
}

#[test]
fn splitter_with_unknown_subset() {
    let client = client_with(
        default_resolver(),
        splitter_with(&[("stable", 100.0), ("blue", 0.0)]),
    );
    let plugin = ConsulPlugin::new(&client);

    let err = plugin
        .set_weight(&RolloutBuilder::new().build(), 50, &[])
        .unwrap_err();

    assert!(err.to_string().starts_with("unexpected service split"));
    assert_eq!(client.update_calls(), 0);
}

#[test]
fn splitter_with_repeated_subset() {
    let client = client_with(
        default_resolver(),
        splitter_with(&[("canary", 100.0), ("canary", 0.0)]),
    );
    let plugin = ConsulPlugin::new(&client);

    let err = plugin
        .set_weight(&RolloutBuilder::new().build(), 30, &[])
        .unwrap_err();

    assert!(matches!(&err, RouterError::UnexpectedSplit(name) if name == "canary"));
    assert_eq!(err.category(), ErrorCategory::Shape);
    assert_eq!(client.update_calls(), 0);
}

// ── Sync gate ─────────────────────────────────────────────────────

#[test]
fn unsynced_resolver_blocks_before_splitter_fetch() {
    let mut resolver = default_resolver();
    resolver.status.conditions[0].status = ConditionStatus::False;
    let client = client_with(resolver, default_splitter());
    let plugin = ConsulPlugin::new(&client);

    let err = plugin
        .set_weight(&RolloutBuilder::new().build(), 50, &[])
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "service resolver has not synced with Consul. The service resolver needs to be up to date before rollout can continue"
    );
    assert_eq!(client.get_calls(), 1);
    assert_eq!(client.update_calls(), 0);
}

#[test]
fn drifted_resolver_sync_time() {
    let mut resolver = default_resolver();
    resolver.status.last_synced_time = Some(Utc::now() - TimeDelta::seconds(3));
    let client = client_with(resolver, default_splitter());
    let plugin = ConsulPlugin::new(&client);

    let err = plugin
        .set_weight(&RolloutBuilder::new().build(), 50, &[])
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Stale);
    assert_eq!(client.update_calls(), 0);
}

#[test]
fn unsynced_splitter() {
    let mut splitter = default_splitter();
    splitter.status.last_synced_time = Some(Utc::now() + TimeDelta::minutes(5));
    let client = client_with(default_resolver(), splitter);
    let plugin = ConsulPlugin::new(&client);

    let err = plugin
        .set_weight(&RolloutBuilder::new().build(), 50, &[])
        .unwrap_err();

    assert!(matches!(err, RouterError::NotSynced(EntryKind::ServiceSplitter)));
    assert_eq!(client.update_calls(), 0);
}

#[test]
fn wider_tolerance_accepts_drift() {
    let mut resolver = default_resolver();
    resolver.status.last_synced_time = Some(Utc::now() - TimeDelta::seconds(3));
    let client = client_with(resolver, default_splitter());
    let plugin = ConsulPlugin::new(&client)
        .with_sync_policy(trafficrouter_consul::SyncPolicy::new(
            std::time::Duration::from_secs(10),
        ));

    plugin
        .set_weight(&RolloutBuilder::new().build(), 50, &[])
        .unwrap();
    assert_eq!(client.update_calls(), 2);
}

#[test]
fn entries_without_sync_condition_are_trusted() {
    let mut resolver = default_resolver();
    resolver.status = Status::default();
    let mut splitter = default_splitter();
    splitter.status = Status::default();
    let client = client_with(resolver, splitter);
    let plugin = ConsulPlugin::new(&client);

    plugin
        .set_weight(&RolloutBuilder::new().build(), 50, &[])
        .unwrap();
    assert_eq!(weight(&client, "canary"), 50.0);
}

// ── Persistence ───────────────────────────────────────────────────

#[test]
fn splitter_write_failure_leaves_resolver_updated() {
    let client = client_with(default_resolver(), default_splitter());
    client.fail_updates(EntryKind::ServiceSplitter, "etcdserver: request timed out");
    let plugin = ConsulPlugin::new(&client);
    let rollout = RolloutBuilder::new().build();

    let err = plugin.set_weight(&rollout, 50, &[]).unwrap_err();

    assert_eq!(err.to_string(), "etcdserver: request timed out");
    assert_eq!(err.category(), ErrorCategory::Persistence);
    assert_eq!(filter(&client, "canary"), "Service.Meta.version == 2");
    assert_eq!(weight(&client, "canary"), 0.0);
    assert_eq!(weight(&client, "stable"), 100.0);
}

#[test]
fn resolver_write_failure_skips_splitter() {
    let client = client_with(default_resolver(), default_splitter());
    client.fail_updates(EntryKind::ServiceResolver, "admission webhook denied the request");
    let plugin = ConsulPlugin::new(&client);

    let err = plugin
        .set_weight(&RolloutBuilder::new().build(), 50, &[])
        .unwrap_err();

    assert_eq!(err.to_string(), "admission webhook denied the request");
    assert_eq!(client.update_calls(), 0);
    assert_eq!(weight(&client, "canary"), 0.0);
}

/// Bumps the stored resolver right after handing out a copy, so the
/// router's write carries a stale resourceVersion.
struct ConcurrentWriter<'a> {
    inner: &'a MemoryClient,
}

impl ConfigEntryClient for ConcurrentWriter<'_> {
    fn get(&self, kind: EntryKind, name: &str, namespace: &str) -> ClientResult<ConfigEntry> {
        let entry = self.inner.get(kind, name, namespace)?;
        if kind == EntryKind::ServiceResolver {
            self.inner.update(&entry)?;
        }
        Ok(entry)
    }

    fn update(&self, entry: &ConfigEntry) -> ClientResult<()> {
        self.inner.update(entry)
    }
}

#[test]
fn conflicting_write_is_terminal() {
    let client = client_with(default_resolver(), default_splitter());
    let plugin = ConsulPlugin::new(ConcurrentWriter { inner: &client });

    let err = plugin
        .set_weight(&RolloutBuilder::new().build(), 50, &[])
        .unwrap_err();

    assert!(matches!(
        err,
        RouterError::Client(ClientError::Conflict {
            kind: EntryKind::ServiceResolver,
            ..
        })
    ));
    // Only the concurrent writer's touch landed.
    assert_eq!(client.update_calls(), 1);
    assert_eq!(filter(&client, "canary"), "");
    assert_eq!(weight(&client, "canary"), 0.0);
}
