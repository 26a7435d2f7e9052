//! Config entry access — the fetch/update capability the router is given.
//!
//! The router never talks to a cluster directly. It is handed a
//! [`ConfigEntryClient`] and only ever fetches an existing entry by kind,
//! name and namespace, or writes a modified entry back. [`MemoryClient`]
//! is the in-process implementation used by tests and by the CLI's
//! file-backed mode.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::{ConfigEntry, EntryKind, ServiceResolver, ServiceSplitter};

/// Result type alias for config entry access.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors from fetching or persisting a config entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: EntryKind, name: String },

    #[error(
        "operation cannot be fulfilled on {kind} \"{name}\": the object has been modified; please apply your changes to the latest version and try again"
    )]
    Conflict { kind: EntryKind, name: String },

    #[error("{0}")]
    Backend(String),
}

/// Fetch and persist Consul config entries.
///
/// Entries are never created or deleted through this trait; `update`
/// on a missing entry is `NotFound`.
pub trait ConfigEntryClient {
    /// Fetch the entry of `kind` named `name` in `namespace`.
    fn get(&self, kind: EntryKind, name: &str, namespace: &str) -> ClientResult<ConfigEntry>;

    /// Persist a modified entry.
    fn update(&self, entry: &ConfigEntry) -> ClientResult<()>;
}

impl<C: ConfigEntryClient + ?Sized> ConfigEntryClient for &C {
    fn get(&self, kind: EntryKind, name: &str, namespace: &str) -> ClientResult<ConfigEntry> {
        (**self).get(kind, name, namespace)
    }

    fn update(&self, entry: &ConfigEntry) -> ClientResult<()> {
        (**self).update(entry)
    }
}

/// Convert any `Display` error into a `ClientError::Backend`.
macro_rules! backend_err {
    ($what:literal) => {
        |e| ClientError::Backend(format!(concat!($what, ": {}"), e))
    };
}

/// On-disk form of a [`MemoryClient`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    #[serde(default)]
    pub entries: Vec<ConfigEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct EntryKey {
    kind: EntryKind,
    namespace: String,
    name: String,
}

impl EntryKey {
    fn new(kind: EntryKind, name: &str, namespace: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn of(entry: &ConfigEntry) -> Self {
        let meta = entry.metadata();
        Self::new(entry.kind(), &meta.name, &meta.namespace)
    }
}

/// Thread-safe in-memory config entry store.
///
/// Every stored entry carries a numeric `resourceVersion` that is bumped on
/// each successful update. An update whose version does not match the
/// stored one is rejected with [`ClientError::Conflict`]; an update without
/// a version is applied unconditionally.
#[derive(Debug, Default)]
pub struct MemoryClient {
    entries: RwLock<BTreeMap<EntryKey, ConfigEntry>>,
    update_failures: RwLock<HashMap<EntryKind, String>>,
    gets: AtomicUsize,
    updates: AtomicUsize,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a client pre-populated with `entries`.
    pub fn with_entries(entries: impl IntoIterator<Item = ConfigEntry>) -> Self {
        let client = Self::new();
        for entry in entries {
            client.insert(entry);
        }
        client
    }

    /// Load a client from a JSON [`EntrySnapshot`] file.
    pub fn load(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(backend_err!("read snapshot"))?;
        let snapshot: EntrySnapshot =
            serde_json::from_str(&content).map_err(backend_err!("parse snapshot"))?;
        debug!(?path, entries = snapshot.entries.len(), "entry snapshot loaded");
        Ok(Self::with_entries(snapshot.entries))
    }

    /// Write the current contents to `path` as a JSON [`EntrySnapshot`].
    pub fn save(&self, path: &Path) -> ClientResult<()> {
        let snapshot = self.snapshot();
        let json =
            serde_json::to_string_pretty(&snapshot).map_err(backend_err!("encode snapshot"))?;
        std::fs::write(path, json).map_err(backend_err!("write snapshot"))?;
        debug!(?path, entries = snapshot.entries.len(), "entry snapshot saved");
        Ok(())
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        let entries = self.entries.read().expect("entries lock");
        EntrySnapshot {
            entries: entries.values().cloned().collect(),
        }
    }

    /// Insert or replace an entry, assigning a version if it has none.
    pub fn insert(&self, mut entry: ConfigEntry) {
        let meta = entry.metadata_mut();
        if meta.resource_version.is_none() {
            meta.resource_version = Some("1".to_string());
        }
        let mut entries = self.entries.write().expect("entries lock");
        entries.insert(EntryKey::of(&entry), entry);
    }

    /// Current stored copy of an entry, bypassing call accounting.
    pub fn entry(&self, kind: EntryKind, name: &str, namespace: &str) -> Option<ConfigEntry> {
        let entries = self.entries.read().expect("entries lock");
        entries.get(&EntryKey::new(kind, name, namespace)).cloned()
    }

    pub fn resolver(&self, name: &str, namespace: &str) -> Option<ServiceResolver> {
        match self.entry(EntryKind::ServiceResolver, name, namespace)? {
            ConfigEntry::ServiceResolver(r) => Some(r),
            ConfigEntry::ServiceSplitter(_) => None,
        }
    }

    pub fn splitter(&self, name: &str, namespace: &str) -> Option<ServiceSplitter> {
        match self.entry(EntryKind::ServiceSplitter, name, namespace)? {
            ConfigEntry::ServiceSplitter(s) => Some(s),
            ConfigEntry::ServiceResolver(_) => None,
        }
    }

    /// Make every subsequent update of `kind` fail with `message`.
    pub fn fail_updates(&self, kind: EntryKind, message: &str) {
        let mut failures = self.update_failures.write().expect("failures lock");
        failures.insert(kind, message.to_string());
    }

    /// Number of `get` calls served so far.
    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    /// Number of successful `update` calls so far.
    pub fn update_calls(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }
}

impl ConfigEntryClient for MemoryClient {
    fn get(&self, kind: EntryKind, name: &str, namespace: &str) -> ClientResult<ConfigEntry> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.entry(kind, name, namespace)
            .ok_or_else(|| ClientError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    fn update(&self, entry: &ConfigEntry) -> ClientResult<()> {
        let kind = entry.kind();
        let meta = entry.metadata();

        if let Some(message) = self
            .update_failures
            .read()
            .expect("failures lock")
            .get(&kind)
        {
            return Err(ClientError::Backend(message.clone()));
        }

        let key = EntryKey::of(entry);
        let mut entries = self.entries.write().expect("entries lock");
        let stored = entries.get(&key).ok_or_else(|| ClientError::NotFound {
            kind,
            name: meta.name.clone(),
        })?;

        let current = stored.metadata().resource_version.clone();
        if meta.resource_version.is_some() && meta.resource_version != current {
            return Err(ClientError::Conflict {
                kind,
                name: meta.name.clone(),
            });
        }

        let next = current
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        let mut updated = entry.clone();
        updated.metadata_mut().resource_version = Some(next.to_string());
        entries.insert(key, updated);
        self.updates.fetch_add(1, Ordering::Relaxed);

        debug!(
            kind = %kind,
            name = %meta.name,
            namespace = %meta.namespace,
            version = next,
            "config entry updated"
        );
        Ok(())
    }
}
