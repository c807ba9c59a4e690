//! Immutable, versioned resource snapshots.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::sync::Arc;

use crate::resource::{Resource, TypeUrl};
use crate::version::Version;

/// All resources of one type at one version.
///
/// A snapshot is built once and never mutated. Publishing a new resource set
/// produces a new snapshot with a new version; readers holding the old one
/// keep a consistent view.
#[derive(Debug, Clone)]
pub struct Snapshot {
    type_url: TypeUrl,
    version: Version,
    resources: BTreeMap<String, Arc<Resource>>,
}

impl Snapshot {
    /// Build a snapshot. If two resources share a name, the later one wins.
    pub(crate) fn new(
        type_url: TypeUrl,
        version: Version,
        resources: impl IntoIterator<Item = Resource>,
    ) -> Self {
        let resources = resources
            .into_iter()
            .map(|r| (r.name().to_string(), Arc::new(r)))
            .collect();
        Self {
            type_url,
            version,
            resources,
        }
    }

    /// The resource type of this snapshot.
    pub fn type_url(&self) -> &TypeUrl {
        &self.type_url
    }

    /// The version every resource in this snapshot belongs to.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Look up a resource by name.
    pub fn get(&self, name: &str) -> Option<&Arc<Resource>> {
        self.resources.get(name)
    }

    /// Returns true if a resource with `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    /// Number of resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if the snapshot holds no resources.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Iterate resources in name order.
    pub fn iter(&self) -> btree_map::Values<'_, String, Arc<Resource>> {
        self.resources.values()
    }
}

/// Resources of several types, published together.
///
/// # Example
///
/// ```
/// use xds_server::{Resource, ResourceSet, ResourceStore, TypeUrl};
///
/// let store = ResourceStore::new();
/// let set = ResourceSet::new()
///     .with_resources(TypeUrl::cluster(), vec![Resource::new("greeter", &b"cluster"[..])])
///     .with_resources(TypeUrl::endpoint(), vec![Resource::new("greeter", &b"endpoint"[..])]);
///
/// let versions = store.publish_set(set);
/// assert_eq!(versions.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ResourceSet {
    types: BTreeMap<TypeUrl, Vec<Resource>>,
}

impl ResourceSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resources for a type, replacing any set earlier.
    pub fn with_resources(mut self, type_url: TypeUrl, resources: Vec<Resource>) -> Self {
        self.types.insert(type_url, resources);
        self
    }

    /// Returns true if no type has been added.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub(crate) fn into_types(self) -> impl Iterator<Item = (TypeUrl, Vec<Resource>)> {
        self.types.into_iter()
    }
}
