//! Tracks which resources each session is interested in.

use std::collections::{BTreeSet, HashMap};

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::resource::TypeUrl;
use crate::session::SessionId;

/// The resources of one type a session wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    /// Every resource of the type, whatever its name.
    Wildcard,
    /// Only resources with these names.
    Named(BTreeSet<String>),
}

impl Subscription {
    /// A named subscription.
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Named(names.into_iter().map(Into::into).collect())
    }

    /// Check whether a resource name falls under this subscription.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Named(names) => names.contains(name),
        }
    }

    /// Returns true for a wildcard subscription.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }

    /// Returns true if nothing can ever match.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Named(names) if names.is_empty())
    }
}

/// Per-session, per-type interest sets.
///
/// Subscribing to a type or name that has not been published yet is legal;
/// the session simply receives nothing until a matching resource appears.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    sessions: DashMap<SessionId, HashMap<TypeUrl, Subscription>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the interest set of `session` for `type_url`.
    pub fn subscribe(&self, session: SessionId, type_url: TypeUrl, subscription: Subscription) {
        self.sessions
            .entry(session)
            .or_default()
            .insert(type_url, subscription);
    }

    /// Drop the interest of `session` in `type_url`.
    ///
    /// Returns [`Error::SubscriptionNotFound`] if there was none; callers
    /// generally treat that as a no-op.
    pub fn unsubscribe(&self, session: SessionId, type_url: &TypeUrl) -> Result<()> {
        let removed = self
            .sessions
            .get_mut(&session)
            .and_then(|mut types| types.remove(type_url.as_str()));

        match removed {
            Some(_) => Ok(()),
            None => Err(Error::SubscriptionNotFound {
                type_url: type_url.clone(),
            }),
        }
    }

    /// Remove every subscription held by `session`.
    ///
    /// Returns the number of types the session was subscribed to.
    pub fn remove_session(&self, session: SessionId) -> usize {
        self.sessions
            .remove(&session)
            .map(|(_, types)| types.len())
            .unwrap_or(0)
    }

    /// The current subscription of `session` for `type_url`.
    pub fn subscription(&self, session: SessionId, type_url: &str) -> Option<Subscription> {
        self.sessions
            .get(&session)
            .and_then(|types| types.get(type_url).cloned())
    }

    /// Types `session` is subscribed to.
    pub fn subscribed_types(&self, session: SessionId) -> Vec<TypeUrl> {
        self.sessions
            .get(&session)
            .map(|types| types.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Sessions with any subscription to `type_url`.
    pub fn subscribers(&self, type_url: &str) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().contains_key(type_url))
            .map(|entry| *entry.key())
            .collect()
    }

    /// Returns true if `session` is known to the registry.
    pub fn contains_session(&self, session: SessionId) -> bool {
        self.sessions.contains_key(&session)
    }
}
