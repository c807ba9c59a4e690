//! Per-session protocol state.
//!
//! [`Session`] is the synchronous core of a session: it tracks what each
//! client has accepted, what is in flight, and how many times in a row the
//! client has rejected a type. The async worker drives it but never touches
//! the tracked state directly.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::message::{AckRecord, AckResult};
use crate::reconcile::{Delta, KnownResources, reconcile};
use crate::registry::Subscription;
use crate::resource::TypeUrl;
use crate::session::SessionId;
use crate::session::retry::{Backoff, RetryPolicy};
use crate::store::Snapshot;
use crate::version::{AckedVersions, Version};

/// Sent versions remembered per type to tell stale acks from bogus ones.
const SENT_HISTORY: usize = 16;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The client is connected but has not subscribed to anything.
    Connected,
    /// At least one subscription was made; updates are being pushed.
    Active,
    /// Tearing down: subscriptions are being released.
    Closing,
    /// Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connected => "connected",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// What an ack or nack did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckOutcome {
    /// The in-flight version was accepted and is now the acked version.
    Accepted,
    /// The in-flight version was rejected; resend after the given wait.
    Rejected { retry_after: Duration },
    /// The version was sent earlier but has since been superseded.
    Stale,
}

/// A delta that has been sent but not yet acked or nacked.
#[derive(Debug, Clone)]
struct InFlight {
    version: Version,
    /// What the client will hold if it accepts.
    known_after: KnownResources,
}

/// Tracking for one resource type.
#[derive(Debug)]
struct TypeTracking {
    /// Resources the client holds at its last-acked version.
    acked: KnownResources,
    in_flight: Option<InFlight>,
    sent: VecDeque<Version>,
    backoff: Backoff,
}

impl TypeTracking {
    fn new(policy: RetryPolicy) -> Self {
        Self {
            acked: KnownResources::new(),
            in_flight: None,
            sent: VecDeque::with_capacity(SENT_HISTORY),
            backoff: Backoff::new(policy),
        }
    }
}

/// State of one connected client.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    client_id: String,
    state: SessionState,
    acked_versions: AckedVersions,
    types: HashMap<TypeUrl, TypeTracking>,
    retry_policy: RetryPolicy,
}

impl Session {
    /// A freshly connected session.
    pub fn new(id: SessionId, client_id: impl Into<String>, retry_policy: RetryPolicy) -> Self {
        Self {
            id,
            client_id: client_id.into(),
            state: SessionState::Connected,
            acked_versions: AckedVersions::default(),
            types: HashMap::new(),
            retry_policy,
        }
    }

    /// The session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The identifier the client presented.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `Active` on the first subscription. Returns true if the
    /// state changed.
    pub fn activate(&mut self) -> bool {
        if self.state == SessionState::Connected {
            self.state = SessionState::Active;
            return true;
        }
        false
    }

    /// Start tearing down.
    pub fn begin_close(&mut self) {
        if self.state != SessionState::Closed {
            self.state = SessionState::Closing;
        }
    }

    /// Finish tearing down. Terminal.
    pub fn finish_close(&mut self) {
        self.state = SessionState::Closed;
        self.types.clear();
    }

    /// The last version of `type_url` the client accepted.
    pub fn last_acked(&self, type_url: &str) -> Option<Version> {
        self.acked_versions.get(type_url)
    }

    /// The version of `type_url` awaiting an ack, if any.
    pub fn in_flight(&self, type_url: &str) -> Option<Version> {
        self.types
            .get(type_url)
            .and_then(|t| t.in_flight.as_ref())
            .map(|f| f.version)
    }

    /// Resources of `type_url` the client holds at its last-acked version.
    pub fn known(&self, type_url: &str) -> Option<&KnownResources> {
        self.types.get(type_url).map(|t| &t.acked)
    }

    /// Compute what to send for `type_url`.
    ///
    /// The delta is computed against the last-acked state. While an earlier
    /// delta is in flight the client may apply it before this one, so every
    /// name the in-flight delta changed is restated: resent if still wanted,
    /// removed if not. The result leaves the client in the same state on
    /// either base.
    pub fn reconcile(
        &self,
        type_url: &TypeUrl,
        snapshot: Option<&Snapshot>,
        subscription: &Subscription,
    ) -> Delta {
        let Some(tracking) = self.types.get(type_url.as_str()) else {
            return reconcile(type_url, &KnownResources::new(), snapshot, subscription);
        };

        let mut delta = reconcile(type_url, &tracking.acked, snapshot, subscription);
        let Some(in_flight) = &tracking.in_flight else {
            return delta;
        };

        let changed = in_flight
            .known_after
            .iter()
            .filter(|(name, hash)| tracking.acked.get(*name) != Some(*hash))
            .map(|(name, _)| name)
            .chain(
                tracking
                    .acked
                    .keys()
                    .filter(|name| !in_flight.known_after.contains_key(*name)),
            );

        let mut restated = false;
        for name in changed {
            let current = snapshot
                .filter(|_| subscription.matches(name))
                .and_then(|s| s.get(name));
            let acked = tracking.acked.get(name);
            match current {
                // Reverted to the acked content: the plain diff skipped it.
                Some(resource) if acked == Some(&resource.hash()) => {
                    delta.updated.push(Arc::clone(resource));
                    restated = true;
                }
                // Any other wanted resource already differs from the acked
                // state and is in the diff.
                Some(_) => {}
                None if acked.is_none() => {
                    delta.removed.push(name.clone());
                    restated = true;
                }
                // Acked but no longer wanted: already removed by the diff.
                None => {}
            }
        }

        if restated {
            delta.updated.sort_by(|a, b| a.name().cmp(b.name()));
            delta.removed.sort();
        }
        delta
    }

    /// Returns true if sending `delta` would repeat the delta in flight.
    pub(crate) fn repeats_in_flight(&self, delta: &Delta) -> bool {
        let Some(tracking) = self.types.get(delta.type_url.as_str()) else {
            return false;
        };
        tracking.in_flight.as_ref().is_some_and(|f| {
            f.version == delta.version && f.known_after == delta.apply_to(&tracking.acked)
        })
    }

    /// Record that `delta` reached the transport.
    pub fn record_sent(&mut self, delta: &Delta) {
        let policy = &self.retry_policy;
        let tracking = self
            .types
            .entry(delta.type_url.clone())
            .or_insert_with(|| TypeTracking::new(policy.clone()));

        tracking.in_flight = Some(InFlight {
            version: delta.version,
            known_after: delta.apply_to(&tracking.acked),
        });
        if tracking.sent.len() == SENT_HISTORY {
            tracking.sent.pop_front();
        }
        tracking.sent.push_back(delta.version);
    }

    /// Apply a client ack or nack.
    ///
    /// Only the most recently sent version of a type can be accepted or
    /// rejected. A nack leaves the last-acked state untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownVersionAck`] if the version was never sent for the
    ///   type. The session stays usable.
    /// - [`Error::RetryCeilingExceeded`] if this nack exceeds the retry
    ///   ceiling. The session should be closed.
    pub(crate) fn apply_ack(&mut self, record: &AckRecord) -> Result<AckOutcome> {
        let unknown = || Error::UnknownVersionAck {
            type_url: record.type_url.clone(),
            version: record.version,
        };

        let Some(tracking) = self.types.get_mut(record.type_url.as_str()) else {
            return Err(unknown());
        };

        let in_flight = match tracking.in_flight.take() {
            Some(f) if f.version == record.version => f,
            other => {
                tracking.in_flight = other;
                return if tracking.sent.contains(&record.version) {
                    Ok(AckOutcome::Stale)
                } else {
                    Err(unknown())
                };
            }
        };

        match &record.result {
            AckResult::Accepted => {
                tracking.acked = in_flight.known_after;
                tracking.backoff.reset();
                self.acked_versions
                    .advance(&record.type_url, record.version);
                Ok(AckOutcome::Accepted)
            }
            AckResult::Rejected(_) => match tracking.backoff.next_backoff() {
                Some(retry_after) => Ok(AckOutcome::Rejected { retry_after }),
                None => Err(Error::RetryCeilingExceeded {
                    type_url: record.type_url.clone(),
                    attempts: tracking.backoff.attempts() + 1,
                }),
            },
        }
    }

    /// Drop everything tracked for `type_url`.
    pub fn forget_type(&mut self, type_url: &str) {
        self.types.remove(type_url);
        self.acked_versions.remove(type_url);
    }
}
