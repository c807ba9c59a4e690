//! Computes the minimal update that brings a client up to date.
//!
//! The reconciler compares what a client is known to hold (resource names
//! and content hashes at its last-acked version) against the current
//! snapshot, restricted to the client's subscription.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::registry::Subscription;
use crate::resource::{ContentHash, Resource, TypeUrl};
use crate::store::Snapshot;
use crate::version::Version;

/// Resources a client holds for one type: name to content hash.
pub type KnownResources = BTreeMap<String, ContentHash>;

/// The changes needed to move a client to `version`.
///
/// All three lists are ordered by resource name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    /// The resource type.
    pub type_url: TypeUrl,
    /// The snapshot version this delta brings the client to.
    pub version: Version,
    /// Resources the client does not have yet.
    pub added: Vec<Arc<Resource>>,
    /// Resources whose content changed.
    pub updated: Vec<Arc<Resource>>,
    /// Names the client should drop.
    pub removed: Vec<String>,
}

impl Delta {
    /// An empty delta.
    pub fn empty(type_url: TypeUrl, version: Version) -> Self {
        Self {
            type_url,
            version,
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
        }
    }

    /// Returns true if there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// What the client holds after applying this delta on top of `base`.
    pub fn apply_to(&self, base: &KnownResources) -> KnownResources {
        let mut known = base.clone();
        for name in &self.removed {
            known.remove(name);
        }
        for resource in self.added.iter().chain(&self.updated) {
            known.insert(resource.name().to_string(), resource.hash());
        }
        known
    }
}

/// Compute the delta from `known` to the current state of a type.
///
/// A type that was never published behaves like an empty snapshot. Anything
/// in `known` that the subscription no longer covers is reported as removed,
/// so narrowing a subscription cleans up the client.
pub fn reconcile(
    type_url: &TypeUrl,
    known: &KnownResources,
    snapshot: Option<&Snapshot>,
    subscription: &Subscription,
) -> Delta {
    let version = snapshot.map(Snapshot::version).unwrap_or(Version::ZERO);
    let mut delta = Delta::empty(type_url.clone(), version);

    if let Some(snapshot) = snapshot {
        for resource in snapshot.iter() {
            if !subscription.matches(resource.name()) {
                continue;
            }
            match known.get(resource.name()) {
                None => delta.added.push(Arc::clone(resource)),
                Some(hash) if *hash != resource.hash() => delta.updated.push(Arc::clone(resource)),
                Some(_) => {}
            }
        }
    }

    delta.removed = known
        .keys()
        .filter(|name| {
            !subscription.matches(name) || !snapshot.is_some_and(|s| s.contains(name))
        })
        .cloned()
        .collect();

    delta
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(version: u64, resources: &[(&str, &'static [u8])]) -> Snapshot {
        Snapshot::new(
            TypeUrl::endpoint(),
            Version::new(version),
            resources
                .iter()
                .map(|(name, payload)| Resource::new(*name, *payload)),
        )
    }

    fn names(resources: &[Arc<Resource>]) -> Vec<&str> {
        resources.iter().map(|r| r.name()).collect()
    }

    #[test]
    fn test_fresh_client_gets_everything_matching() {
        let snap = snapshot(1, &[("ep1", b"a"), ("ep2", b"b")]);
        let delta = reconcile(
            &TypeUrl::endpoint(),
            &KnownResources::new(),
            Some(&snap),
            &Subscription::Wildcard,
        );

        assert_eq!(names(&delta.added), ["ep1", "ep2"]);
        assert!(delta.updated.is_empty());
        assert!(delta.removed.is_empty());
        assert_eq!(delta.version, Version::new(1));
    }

    #[test]
    fn test_named_subscription_filters() {
        let snap = snapshot(1, &[("ep1", b"a"), ("ep2", b"b")]);
        let delta = reconcile(
            &TypeUrl::endpoint(),
            &KnownResources::new(),
            Some(&snap),
            &Subscription::named(["ep2", "ep9"]),
        );

        assert_eq!(names(&delta.added), ["ep2"]);
    }

    #[test]
    fn test_up_to_date_client_gets_empty_delta() {
        let snap = snapshot(4, &[("ep1", b"a"), ("ep2", b"b")]);
        let first = reconcile(
            &TypeUrl::endpoint(),
            &KnownResources::new(),
            Some(&snap),
            &Subscription::Wildcard,
        );
        let known = first.apply_to(&KnownResources::new());

        let second = reconcile(
            &TypeUrl::endpoint(),
            &known,
            Some(&snap),
            &Subscription::Wildcard,
        );
        assert!(second.is_empty());
    }

    #[test]
    fn test_changed_hash_is_update_and_missing_is_removed() {
        let old = snapshot(1, &[("ep1", b"a"), ("ep2", b"b")]);
        let known = reconcile(
            &TypeUrl::endpoint(),
            &KnownResources::new(),
            Some(&old),
            &Subscription::Wildcard,
        )
        .apply_to(&KnownResources::new());

        let new = snapshot(2, &[("ep1", b"changed"), ("ep3", b"c")]);
        let delta = reconcile(
            &TypeUrl::endpoint(),
            &known,
            Some(&new),
            &Subscription::Wildcard,
        );

        assert_eq!(names(&delta.added), ["ep3"]);
        assert_eq!(names(&delta.updated), ["ep1"]);
        assert_eq!(delta.removed, ["ep2"]);

        let after = delta.apply_to(&known);
        assert_eq!(after.keys().collect::<Vec<_>>(), ["ep1", "ep3"]);
        assert_eq!(after["ep1"], ContentHash::of(b"changed"));
    }

    #[test]
    fn test_narrowed_subscription_removes() {
        let snap = snapshot(1, &[("ep1", b"a"), ("ep2", b"b")]);
        let known = reconcile(
            &TypeUrl::endpoint(),
            &KnownResources::new(),
            Some(&snap),
            &Subscription::Wildcard,
        )
        .apply_to(&KnownResources::new());

        let delta = reconcile(
            &TypeUrl::endpoint(),
            &known,
            Some(&snap),
            &Subscription::named(["ep1"]),
        );

        assert!(delta.added.is_empty());
        assert!(delta.updated.is_empty());
        assert_eq!(delta.removed, ["ep2"]);
    }

    #[test]
    fn test_unpublished_type_is_empty() {
        let delta = reconcile(
            &TypeUrl::cluster(),
            &KnownResources::new(),
            None,
            &Subscription::Wildcard,
        );
        assert!(delta.is_empty());
        assert_eq!(delta.version, Version::ZERO);
    }
}
