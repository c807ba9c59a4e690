//! The resource store: current desired state per resource type.
//!
//! Each type lives in its own slot. A publish builds the complete new
//! [`Snapshot`] first and then swaps it in with a single pointer store, so
//! readers never see a partially applied update and never wait for writers.
//! Publishes to the same type serialize on the slot's lock; publishes to
//! different types never touch each other's slots.

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::resource::{Resource, TypeUrl};
use crate::session::config::ServerConfig;
use crate::version::{Version, VersionTracker};

mod snapshot;

pub use snapshot::{ResourceSet, Snapshot};

/// Notification sent to sessions after each publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// The type that changed.
    pub type_url: TypeUrl,
    /// The version now current for that type.
    pub version: Version,
}

/// Per-type storage.
#[derive(Debug, Default)]
struct TypeSlot {
    /// The snapshot readers resolve against.
    current: ArcSwapOption<Snapshot>,
    /// Retained snapshots, oldest first. The lock also serializes publishes.
    history: Mutex<VecDeque<Arc<Snapshot>>>,
}

/// Holds the desired resources of every type.
///
/// The store is shared between the publisher and every session, usually
/// behind an `Arc`.
#[derive(Debug)]
pub struct ResourceStore {
    tracker: VersionTracker,
    slots: DashMap<TypeUrl, Arc<TypeSlot>>,
    retained_versions: usize,
    publishes: broadcast::Sender<Published>,
}

impl Default for ResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStore {
    /// Create a store with the default configuration.
    pub fn new() -> Self {
        Self::from_config(&ServerConfig::default())
    }

    /// Create a store using the retention and notification settings of
    /// `config`.
    pub fn from_config(config: &ServerConfig) -> Self {
        let (publishes, _) = broadcast::channel(config.publish_channel_capacity);
        Self {
            tracker: VersionTracker::new(),
            slots: DashMap::new(),
            retained_versions: config.retained_versions,
            publishes,
        }
    }

    /// Replace the resource set of `type_url`.
    ///
    /// Returns the version stamped on the new snapshot. Concurrent publishes
    /// to the same type are applied one after the other; the one that
    /// receives the higher version is the one left in place.
    pub fn publish(&self, type_url: impl Into<TypeUrl>, resources: Vec<Resource>) -> Version {
        let type_url = type_url.into();
        let slot = self.slot(&type_url);

        let version = {
            let mut history = slot.history.lock();
            let version = self.tracker.next_version(&type_url);
            let snapshot = Arc::new(Snapshot::new(type_url.clone(), version, resources));

            slot.current.store(Some(Arc::clone(&snapshot)));
            history.push_back(snapshot);
            while history.len() > self.retained_versions {
                history.pop_front();
            }
            version
        };

        tracing::debug!(type_url = %type_url, %version, "published snapshot");

        // No receivers just means no session is connected.
        let _ = self.publishes.send(Published { type_url, version });
        version
    }

    /// Publish several types. Each type gets its own version.
    pub fn publish_set(&self, set: ResourceSet) -> Vec<(TypeUrl, Version)> {
        set.into_types()
            .map(|(type_url, resources)| {
                let version = self.publish(type_url.clone(), resources);
                (type_url, version)
            })
            .collect()
    }

    /// The latest snapshot of `type_url`, if it was ever published.
    pub fn current_snapshot(&self, type_url: &str) -> Option<Arc<Snapshot>> {
        let slot = self.slots.get(type_url).map(|s| Arc::clone(s.value()))?;
        slot.current.load_full()
    }

    /// A retained snapshot of `type_url` at `version`.
    ///
    /// Only the most recent versions are retained; older ones return `None`.
    /// Sessions never read the history: they track what each client holds
    /// by content hash. It is kept for publishers and operators that need to
    /// inspect or diff recent versions.
    pub fn snapshot(&self, type_url: &str, version: Version) -> Option<Arc<Snapshot>> {
        let slot = self.slots.get(type_url).map(|s| Arc::clone(s.value()))?;
        let history = slot.history.lock();
        history
            .iter()
            .rev()
            .find(|s| s.version() == version)
            .cloned()
    }

    /// The latest version issued for `type_url`.
    pub fn latest_version(&self, type_url: &str) -> Option<Version> {
        self.tracker.latest(type_url)
    }

    /// Number of versions retained per type.
    pub fn retained_versions(&self) -> usize {
        self.retained_versions
    }

    /// Receive a notification for every subsequent publish.
    pub fn subscribe_publishes(&self) -> broadcast::Receiver<Published> {
        self.publishes.subscribe()
    }

    fn slot(&self, type_url: &TypeUrl) -> Arc<TypeSlot> {
        // Clone the slot out so the map shard is not locked while publishing.
        if let Some(slot) = self.slots.get(type_url.as_str()) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.slots.entry(type_url.clone()).or_default().value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(name: &str, payload: &'static [u8]) -> Resource {
        Resource::new(name, payload)
    }

    #[test]
    fn test_publish_replaces_whole_set() {
        let store = ResourceStore::new();

        let v1 = store.publish(
            TypeUrl::endpoint(),
            vec![endpoint("ep1", b"a"), endpoint("ep2", b"b")],
        );
        let v2 = store.publish(TypeUrl::endpoint(), vec![endpoint("ep3", b"c")]);
        assert!(v2 > v1);

        let current = store.current_snapshot(TypeUrl::ENDPOINT).unwrap();
        assert_eq!(current.version(), v2);
        assert_eq!(current.len(), 1);
        assert!(current.contains("ep3"));
        assert!(!current.contains("ep1"));
    }

    #[test]
    fn test_unpublished_type_has_no_snapshot() {
        let store = ResourceStore::new();
        assert!(store.current_snapshot(TypeUrl::CLUSTER).is_none());
        assert_eq!(store.latest_version(TypeUrl::CLUSTER), None);
    }

    #[test]
    fn test_history_keeps_previous_version() {
        let store = ResourceStore::new();
        assert_eq!(store.retained_versions(), 2);

        let v1 = store.publish(TypeUrl::endpoint(), vec![endpoint("ep1", b"1")]);
        let v2 = store.publish(TypeUrl::endpoint(), vec![endpoint("ep1", b"2")]);
        let v3 = store.publish(TypeUrl::endpoint(), vec![endpoint("ep1", b"3")]);

        assert!(store.snapshot(TypeUrl::ENDPOINT, v1).is_none());
        assert_eq!(
            store.snapshot(TypeUrl::ENDPOINT, v2).unwrap().version(),
            v2
        );
        assert_eq!(
            store.snapshot(TypeUrl::ENDPOINT, v3).unwrap().version(),
            v3
        );
    }

    #[test]
    fn test_old_snapshot_survives_republish() {
        let store = ResourceStore::new();
        store.publish(TypeUrl::endpoint(), vec![endpoint("ep1", b"old")]);
        let held = store.current_snapshot(TypeUrl::ENDPOINT).unwrap();

        store.publish(TypeUrl::endpoint(), vec![endpoint("ep1", b"new")]);

        assert_eq!(held.get("ep1").unwrap().payload().as_ref(), b"old");
        let current = store.current_snapshot(TypeUrl::ENDPOINT).unwrap();
        assert_eq!(current.get("ep1").unwrap().payload().as_ref(), b"new");
    }

    #[test]
    fn test_publish_set_versions_each_type() {
        let store = ResourceStore::new();
        store.publish(TypeUrl::cluster(), vec![]);

        let versions = store.publish_set(
            ResourceSet::new()
                .with_resources(TypeUrl::cluster(), vec![endpoint("c1", b"c")])
                .with_resources(TypeUrl::listener(), vec![endpoint("l1", b"l")]),
        );

        assert!(versions.contains(&(TypeUrl::cluster(), Version::new(2))));
        assert!(versions.contains(&(TypeUrl::listener(), Version::new(1))));
    }

    #[tokio::test]
    async fn test_publish_notifies_subscribers() {
        let store = ResourceStore::new();
        let mut rx = store.subscribe_publishes();

        let version = store.publish(TypeUrl::endpoint(), vec![endpoint("ep1", b"x")]);

        let published = rx.recv().await.unwrap();
        assert_eq!(published.type_url, TypeUrl::endpoint());
        assert_eq!(published.version, version);
    }

    #[test]
    fn test_concurrent_publishes_leave_highest_version() {
        let store = Arc::new(ResourceStore::new());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let payload = format!("{i}-{j}");
                        store.publish(
                            TypeUrl::endpoint(),
                            vec![Resource::new("ep1", payload)],
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let current = store.current_snapshot(TypeUrl::ENDPOINT).unwrap();
        assert_eq!(current.version(), Version::new(200));
        assert_eq!(store.latest_version(TypeUrl::ENDPOINT), Some(Version::new(200)));
    }
}
