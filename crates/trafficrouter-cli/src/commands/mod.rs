use std::path::Path;

use anyhow::Context;
use tracing::warn;

use trafficrouter_consul::{
    ConsulPlugin, MemoryClient, PluginSettings, Rollout, TrafficRouterPlugin, Verified,
};

fn read_rollout(path: &Path) -> anyhow::Result<Rollout> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading rollout {}", path.display()))?;
    let rollout = serde_json::from_str(&content)
        .with_context(|| format!("parsing rollout {}", path.display()))?;
    Ok(rollout)
}

pub fn set_weight(
    rollout_path: &Path,
    entries_path: &Path,
    weight: i32,
    settings: &PluginSettings,
) -> anyhow::Result<()> {
    let rollout = read_rollout(rollout_path)?;
    let client = MemoryClient::load(entries_path)?;
    let plugin = ConsulPlugin::new(&client).with_sync_policy(settings.sync.policy());

    let result = plugin.set_weight(&rollout, weight, &[]);

    // The resolver may have been written even if the splitter write failed.
    if client.update_calls() > 0 {
        client.save(entries_path)?;
    }
    if let Err(e) = &result {
        warn!(category = ?e.category(), "set-weight failed");
    }
    result?;

    match client.update_calls() {
        0 => println!("✓ No changes (rollout has no canary status yet)"),
        _ => println!(
            "✓ Routed {weight}% to canary, {}% to stable",
            100 - weight
        ),
    }
    Ok(())
}

pub fn verify_weight(rollout_path: &Path, weight: i32) -> anyhow::Result<()> {
    let rollout = read_rollout(rollout_path)?;
    let plugin = ConsulPlugin::new(MemoryClient::new());

    match plugin.verify_weight(&rollout, weight, &[])? {
        Verified::Verified => println!("verified"),
        Verified::NotVerified => println!("not verified"),
        Verified::NotImplemented => println!("not implemented"),
    }
    Ok(())
}

pub fn classify(rollout_path: &Path) -> anyhow::Result<()> {
    let rollout = read_rollout(rollout_path)?;
    println!("{}", trafficrouter_consul::classify(&rollout));
    Ok(())
}
