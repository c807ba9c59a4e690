//! Resource types served by the control plane.
//!
//! Resources are opaque to this crate: a publisher hands over serialized
//! payloads (typically protobuf-encoded Envoy configuration) and the server
//! only looks at their name and content hash.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Identifies a resource type, e.g.
/// `"type.googleapis.com/envoy.config.listener.v3.Listener"`.
///
/// Cloning is cheap; the URL is reference counted.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeUrl(Arc<str>);

impl TypeUrl {
    /// Envoy listener resources (LDS).
    pub const LISTENER: &'static str = "type.googleapis.com/envoy.config.listener.v3.Listener";
    /// Envoy route configuration resources (RDS).
    pub const ROUTE: &'static str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
    /// Envoy cluster resources (CDS).
    pub const CLUSTER: &'static str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
    /// Envoy endpoint assignment resources (EDS).
    pub const ENDPOINT: &'static str =
        "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";

    /// Create a type URL.
    pub fn new(url: impl Into<Arc<str>>) -> Self {
        Self(url.into())
    }

    /// The listener type URL.
    pub fn listener() -> Self {
        Self::new(Self::LISTENER)
    }

    /// The route configuration type URL.
    pub fn route() -> Self {
        Self::new(Self::ROUTE)
    }

    /// The cluster type URL.
    pub fn cluster() -> Self {
        Self::new(Self::CLUSTER)
    }

    /// The cluster load assignment type URL.
    pub fn endpoint() -> Self {
        Self::new(Self::ENDPOINT)
    }

    /// Returns the URL as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TypeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for TypeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TypeUrl {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TypeUrl {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for TypeUrl {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

/// SHA-256 digest of a resource payload, used for change detection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash a payload.
    pub fn of(payload: &[u8]) -> Self {
        Self(Sha256::digest(payload).into())
    }

    /// Wrap a digest computed elsewhere.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding of the digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Eight bytes are plenty to tell hashes apart in logs.
        write!(f, "ContentHash({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A named, serialized resource.
///
/// The resource name combined with its type URL uniquely identifies a
/// resource. Resources are immutable; publishing a changed payload creates a
/// new `Resource` in a new snapshot.
#[derive(Clone, PartialEq, Eq)]
pub struct Resource {
    name: String,
    payload: Bytes,
    hash: ContentHash,
}

impl Resource {
    /// Create a resource, hashing its payload.
    pub fn new(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let hash = ContentHash::of(&payload);
        Self {
            name: name.into(),
            payload,
            hash,
        }
    }

    /// Create a resource with a hash supplied by the publisher.
    ///
    /// The server trusts the hash: two payloads with the same hash are
    /// treated as identical.
    pub fn with_hash(name: impl Into<String>, payload: impl Into<Bytes>, hash: ContentHash) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            hash,
        }
    }

    /// Returns the resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the serialized payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the content hash.
    pub fn hash(&self) -> ContentHash {
        self.hash
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("payload", &format!("<{} bytes>", self.payload.len()))
            .field("hash", &self.hash)
            .finish()
    }
}
