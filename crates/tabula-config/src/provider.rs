//! Consumer-facing snapshot with staleness-driven reloads.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::keys::{KEY_DELIMITER, is_secret_key, normalize_key, strip_secret_marker};
use crate::loader::SettingsLoader;
use crate::protect::{SecretProtector, unprotect_value};

/// A single entry as seen by consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotEntry {
    /// Key as stored, without the secret sentinel.
    pub key: String,
    /// Plaintext value; `None` for SQL `NULL`.
    pub value: Option<String>,
    /// Whether the stored key carried the secret sentinel.
    pub secret: bool,
}

/// Immutable view of the table at one point in time.
///
/// Lookups ignore case. Secret keys appear without their sentinel and with
/// their values unprotected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsSnapshot {
    entries: BTreeMap<String, SnapshotEntry>,
    marker: Option<String>,
}

impl SettingsSnapshot {
    /// Value for `key`; `None` when absent or `NULL`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entry(key).and_then(|entry| entry.value.as_deref())
    }

    /// Whether `key` exists, including keys whose value is `NULL`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&normalize_key(key))
    }

    /// Full entry for `key`.
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<&SnapshotEntry> {
        self.entries.get(&normalize_key(key))
    }

    /// Distinct immediate child segments beneath `parent`.
    ///
    /// An empty `parent` yields the top-level segments.
    #[must_use]
    pub fn child_keys(&self, parent: &str) -> Vec<String> {
        let (prefix, depth) = if parent.is_empty() {
            (String::new(), 0)
        } else {
            (
                format!("{}{KEY_DELIMITER}", normalize_key(parent)),
                parent.split(KEY_DELIMITER).count(),
            )
        };

        let mut seen = BTreeSet::new();
        let mut children = Vec::new();
        for (normalized, entry) in self.entries.range(prefix.clone()..) {
            if !normalized.starts_with(&prefix) {
                break;
            }
            if let Some(segment) = entry.key.split(KEY_DELIMITER).nth(depth)
                && seen.insert(normalize_key(segment))
            {
                children.push(segment.to_string());
            }
        }
        children
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in case-insensitive order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|entry| entry.key.as_str())
    }

    /// Entries in case-insensitive key order.
    pub fn entries(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.entries.values()
    }

    /// Freshness marker observed before the snapshot was read.
    #[must_use]
    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    fn from_rows(
        rows: BTreeMap<String, Option<String>>,
        marker: Option<String>,
        protector: &dyn SecretProtector,
    ) -> ConfigResult<Self> {
        let mut entries = BTreeMap::new();
        for (key, value) in rows {
            let secret = is_secret_key(&key);
            let (key, value) = if secret {
                let plain = unprotect_value(protector, value.as_deref())?;
                (strip_secret_marker(&key).to_string(), plain)
            } else {
                (key, value)
            };
            entries.insert(normalize_key(&key), SnapshotEntry { key, value, secret });
        }
        Ok(Self { entries, marker })
    }
}

/// Holds the current [`SettingsSnapshot`] and replaces it when the table
/// changes.
#[derive(Clone)]
pub struct SettingsProvider {
    loader: SettingsLoader,
    protector: Arc<dyn SecretProtector>,
    current: Arc<watch::Sender<Option<Arc<SettingsSnapshot>>>>,
    changes: Option<watch::Receiver<Option<String>>>,
    poll_interval: Duration,
}

impl SettingsProvider {
    pub(crate) fn new(
        loader: SettingsLoader,
        protector: Arc<dyn SecretProtector>,
        changes: Option<watch::Receiver<Option<String>>>,
        poll_interval: Duration,
    ) -> Self {
        let (current, _receiver) = watch::channel(None);
        Self {
            loader,
            protector,
            current: Arc::new(current),
            changes,
            poll_interval,
        }
    }

    /// Read the whole table and replace the current snapshot.
    ///
    /// The marker is read first so a write racing with the load is picked
    /// up by the next staleness check.
    ///
    /// # Errors
    ///
    /// Returns an error when the read or unprotection fails; the previous
    /// snapshot stays in place.
    #[instrument(name = "settings_provider.load", skip(self))]
    pub async fn load(&self) -> ConfigResult<Arc<SettingsSnapshot>> {
        let marker = self.loader.freshness_marker().await?;
        let rows = self.loader.load_all().await?;
        let snapshot = Arc::new(SettingsSnapshot::from_rows(
            rows,
            marker,
            self.protector.as_ref(),
        )?);
        self.current.send_replace(Some(Arc::clone(&snapshot)));
        info!(
            entries = snapshot.len(),
            marker = snapshot.marker(),
            "settings snapshot loaded"
        );
        Ok(snapshot)
    }

    /// Current snapshot; empty until the first load.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SettingsSnapshot> {
        self.current.borrow().clone().unwrap_or_default()
    }

    /// Receiver that wakes on every snapshot replacement.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<SettingsSnapshot>>> {
        self.current.subscribe()
    }

    /// Reload when the stored marker differs from the current snapshot's,
    /// or when nothing has been loaded yet.
    ///
    /// # Errors
    ///
    /// Returns an error when the marker query or the reload fails.
    pub async fn reload_if_stale(&self) -> ConfigResult<Option<Arc<SettingsSnapshot>>> {
        let fresh = self.loader.freshness_marker().await?;
        let loaded = self.current.borrow().clone();
        if let Some(snapshot) = loaded
            && snapshot.marker() == fresh.as_deref()
        {
            debug!(marker = fresh.as_deref(), "settings snapshot is current");
            return Ok(None);
        }
        self.load().await.map(Some)
    }

    /// Watcher yielding each new snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when the source was built with
    /// reload-on-change disabled.
    pub fn watch(&self) -> ConfigResult<ReloadWatcher> {
        let Some(changes) = self.changes.clone() else {
            return Err(ConfigError::InvalidField {
                field: "reload_on_change",
                reason: "must be enabled to watch for changes",
                value: None,
            });
        };
        Ok(ReloadWatcher {
            provider: self.clone(),
            changes: Some(changes),
            poll_interval: self.poll_interval,
        })
    }
}

/// Waits for in-process change notifications or the poll interval, then
/// reloads if the table changed.
///
/// Driven by the caller; nothing runs between calls to [`Self::next`].
pub struct ReloadWatcher {
    provider: SettingsProvider,
    changes: Option<watch::Receiver<Option<String>>>,
    poll_interval: Duration,
}

impl ReloadWatcher {
    /// Await the next snapshot that differs from the current one.
    ///
    /// # Errors
    ///
    /// Returns an error when a freshness check or reload fails.
    pub async fn next(&mut self) -> ConfigResult<Arc<SettingsSnapshot>> {
        loop {
            let closed = match &mut self.changes {
                Some(changes) => {
                    tokio::select! {
                        changed = changes.changed() => changed.is_err(),
                        () = sleep(self.poll_interval) => false,
                    }
                }
                None => {
                    sleep(self.poll_interval).await;
                    false
                }
            };
            if closed {
                warn!("change notifier closed; polling only");
                self.changes = None;
            }

            if let Some(snapshot) = self.provider.reload_if_stale().await? {
                return Ok(snapshot);
            }
        }
    }

    /// Provider this watcher reloads.
    #[must_use]
    pub const fn provider(&self) -> &SettingsProvider {
        &self.provider
    }
}
