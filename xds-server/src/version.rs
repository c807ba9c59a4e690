//! Version identifiers.
//!
//! Every publish to a resource type is stamped with the next [`Version`] for
//! that type. Versions for one type strictly increase for the lifetime of the
//! process; different types count independently.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use dashmap::DashMap;

use crate::resource::TypeUrl;

/// A snapshot version for one resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    /// The version of a type that has never been published.
    pub const ZERO: Version = Version(0);

    /// Create a version from its numeric value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Version)
    }
}

/// Issues versions per resource type.
#[derive(Debug, Default)]
pub struct VersionTracker {
    counters: DashMap<TypeUrl, u64>,
}

impl VersionTracker {
    /// Create a tracker with no versions issued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next version for `type_url`. The first version is 1.
    pub fn next_version(&self, type_url: &TypeUrl) -> Version {
        // The entry guard holds the shard lock, so concurrent callers for the
        // same type never observe the same counter value.
        let mut counter = self.counters.entry(type_url.clone()).or_insert(0);
        *counter += 1;
        Version(*counter)
    }

    /// The most recently issued version for `type_url`.
    pub fn latest(&self, type_url: &str) -> Option<Version> {
        self.counters.get(type_url).map(|c| Version(*c))
    }
}

/// Versions a single client has accepted, per resource type.
///
/// Acked versions only move forward: an attempt to record an older version
/// than the current one is refused.
#[derive(Debug, Clone, Default)]
pub struct AckedVersions {
    acked: HashMap<TypeUrl, Version>,
}

impl AckedVersions {
    /// The last version the client accepted for `type_url`.
    pub fn get(&self, type_url: &str) -> Option<Version> {
        self.acked.get(type_url).copied()
    }

    /// Record an accepted version. Returns `false` if `version` is older
    /// than what is already recorded.
    pub fn advance(&mut self, type_url: &TypeUrl, version: Version) -> bool {
        match self.acked.get_mut(type_url.as_str()) {
            Some(current) if *current > version => false,
            Some(current) => {
                *current = version;
                true
            }
            None => {
                self.acked.insert(type_url.clone(), version);
                true
            }
        }
    }

    /// Forget the acked version of `type_url`.
    pub fn remove(&mut self, type_url: &str) -> Option<Version> {
        self.acked.remove(type_url)
    }
}
